//! In-memory introspector

use std::collections::HashMap;

use log::debug;

use crate::{Capabilities, IntrospectError, Introspector, LineNumberEntry, MethodId};

/// Class the built-in registry describes
pub const HARNESS_CLASS: &str = "linetab002";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodInfo {
    pub class: String,
    pub name: String,
    pub signature: String,
    pub native: bool,
    /// `None` when the method was compiled without line information
    pub lines: Option<Vec<LineNumberEntry>>,
}

impl MethodInfo {
    pub fn new(class: &str, name: &str, signature: &str, lines: Vec<LineNumberEntry>) -> Self {
        Self {
            class: class.to_string(),
            name: name.to_string(),
            signature: signature.to_string(),
            native: false,
            lines: Some(lines),
        }
    }

    pub fn native(class: &str, name: &str, signature: &str) -> Self {
        Self {
            class: class.to_string(),
            name: name.to_string(),
            signature: signature.to_string(),
            native: true,
            lines: None,
        }
    }

    pub fn without_lines(mut self) -> Self {
        self.lines = None;
        self
    }
}

#[derive(Debug)]
pub struct MethodRegistry {
    potential: Capabilities,
    possessed: Capabilities,
    methods: HashMap<MethodId, MethodInfo>,
    next_id: u32,
}

impl MethodRegistry {
    pub fn new(potential: Capabilities) -> Self {
        Self {
            potential,
            possessed: Capabilities::default(),
            methods: HashMap::new(),
            next_id: 1,
        }
    }

    /// Registry describing the harness class itself
    pub fn builtin() -> Self {
        let mut registry = Self::new(Capabilities {
            can_get_line_numbers: true,
        });
        registry.register(MethodInfo::new(
            HARNESS_CLASS,
            "<init>",
            "()V",
            vec![LineNumberEntry {
                start_location: 0,
                line_number: 27,
            }],
        ));
        registry.register(MethodInfo::new(
            HARNESS_CLASS,
            "run",
            "([Ljava/lang/String;Ljava/io/PrintStream;)I",
            vec![
                LineNumberEntry {
                    start_location: 0,
                    line_number: 48,
                },
                LineNumberEntry {
                    start_location: 4,
                    line_number: 49,
                },
            ],
        ));
        registry.register(MethodInfo::native(HARNESS_CLASS, "check", "()I"));
        registry
    }

    pub fn register(&mut self, method: MethodInfo) -> MethodId {
        let id = MethodId(self.next_id);
        self.next_id += 1;
        debug!("MethodRegistry::register: {} {}.{}{}", id, method.class, method.name, method.signature);
        self.methods.insert(id, method);
        id
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl Introspector for MethodRegistry {
    fn potential_capabilities(&self) -> Result<Capabilities, IntrospectError> {
        Ok(self.potential)
    }

    fn add_capabilities(&mut self, capabilities: Capabilities) -> Result<(), IntrospectError> {
        if capabilities.can_get_line_numbers && !self.potential.can_get_line_numbers {
            return Err(IntrospectError::NotAvailable);
        }
        self.possessed.can_get_line_numbers |= capabilities.can_get_line_numbers;
        Ok(())
    }

    fn capabilities(&self) -> Result<Capabilities, IntrospectError> {
        Ok(self.possessed)
    }

    fn find_method(&self, class: &str, name: &str, signature: &str) -> Option<MethodId> {
        self.methods
            .iter()
            .find(|(_, m)| m.class == class && m.name == name && m.signature == signature)
            .map(|(id, _)| *id)
    }

    fn get_line_number_table(
        &self,
        method: Option<MethodId>,
        entry_count: Option<&mut i32>,
        table: Option<&mut Vec<LineNumberEntry>>,
    ) -> Result<(), IntrospectError> {
        if !self.possessed.can_get_line_numbers {
            return Err(IntrospectError::MustPossessCapability);
        }
        let info = method
            .and_then(|id| self.methods.get(&id))
            .ok_or(IntrospectError::InvalidMethodId)?;
        let (Some(entry_count), Some(table)) = (entry_count, table) else {
            return Err(IntrospectError::NullPointer);
        };
        if info.native {
            return Err(IntrospectError::NativeMethod);
        }
        let lines = info.lines.as_ref().ok_or(IntrospectError::AbsentInformation)?;

        *entry_count = i32::try_from(lines.len()).unwrap_or(i32::MAX);
        table.clear();
        table.extend_from_slice(lines);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready() -> MethodRegistry {
        let mut registry = MethodRegistry::builtin();
        registry
            .add_capabilities(Capabilities {
                can_get_line_numbers: true,
            })
            .unwrap();
        registry
    }

    #[test]
    fn test_requires_capability() {
        let registry = MethodRegistry::builtin();
        let id = registry.find_method(HARNESS_CLASS, "<init>", "()V").unwrap();
        let (mut count, mut table) = (0, Vec::new());

        assert_eq!(
            registry.get_line_number_table(Some(id), Some(&mut count), Some(&mut table)),
            Err(IntrospectError::MustPossessCapability)
        );
    }

    #[test]
    fn test_returns_table() {
        let registry = ready();
        let id = registry
            .find_method(HARNESS_CLASS, "run", "([Ljava/lang/String;Ljava/io/PrintStream;)I")
            .unwrap();
        let (mut count, mut table) = (0, Vec::new());

        registry
            .get_line_number_table(Some(id), Some(&mut count), Some(&mut table))
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(table[1].line_number, 49);
    }

    #[test]
    fn test_error_kinds() {
        let mut registry = ready();
        let init = registry.find_method(HARNESS_CLASS, "<init>", "()V").unwrap();
        let native = registry.find_method(HARNESS_CLASS, "check", "()I").unwrap();
        let bare = registry.register(MethodInfo::new("Other", "m", "()V", vec![]).without_lines());
        let (mut count, mut table) = (0, Vec::new());

        assert_eq!(
            registry.get_line_number_table(None, Some(&mut count), Some(&mut table)),
            Err(IntrospectError::InvalidMethodId)
        );
        assert_eq!(
            registry.get_line_number_table(Some(MethodId(999)), Some(&mut count), Some(&mut table)),
            Err(IntrospectError::InvalidMethodId)
        );
        assert_eq!(
            registry.get_line_number_table(Some(init), None, Some(&mut table)),
            Err(IntrospectError::NullPointer)
        );
        assert_eq!(
            registry.get_line_number_table(Some(init), Some(&mut count), None),
            Err(IntrospectError::NullPointer)
        );
        assert_eq!(
            registry.get_line_number_table(Some(native), Some(&mut count), Some(&mut table)),
            Err(IntrospectError::NativeMethod)
        );
        assert_eq!(
            registry.get_line_number_table(Some(bare), Some(&mut count), Some(&mut table)),
            Err(IntrospectError::AbsentInformation)
        );
    }

    #[test]
    fn test_cannot_add_unavailable_capability() {
        let mut registry = MethodRegistry::new(Capabilities::default());
        assert_eq!(
            registry.add_capabilities(Capabilities {
                can_get_line_numbers: true,
            }),
            Err(IntrospectError::NotAvailable)
        );
        assert!(registry.is_empty());
    }
}
