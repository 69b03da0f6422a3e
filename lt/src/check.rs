//! Capability negotiation and the boundary check

use std::fmt;

use log::{debug, info, warn};
use thiserror::Error;

use crate::registry::HARNESS_CLASS;
use crate::{Capabilities, IntrospectError, Introspector, LineNumberEntry, MethodId};

/// Exit status of a passing check
pub const PASSED: i32 = 0;

/// Exit status when any boundary call misbehaved
pub const STATUS_FAILED: i32 = 2;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AgentError {
    #[error("{step}: unexpected error: {source}")]
    Negotiation {
        step: &'static str,
        #[source]
        source: IntrospectError,
    },

    #[error("Cannot get method ID for {class}.{name}{signature}")]
    MethodNotFound {
        class: String,
        name: String,
        signature: String,
    },
}

/// One boundary call of the check
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Probe {
    /// No method handle
    InvalidMethod,
    /// Valid method, missing entry-count slot
    NullEntryCount,
    /// Valid method, missing table slot
    NullTable,
}

impl Probe {
    pub const ALL: [Probe; 3] = [Probe::InvalidMethod, Probe::NullEntryCount, Probe::NullTable];

    pub fn expected(&self) -> IntrospectError {
        match self {
            Probe::InvalidMethod => IntrospectError::InvalidMethodId,
            Probe::NullEntryCount | Probe::NullTable => IntrospectError::NullPointer,
        }
    }

    fn description(&self) -> &'static str {
        match self {
            Probe::InvalidMethod => "invalid method check",
            Probe::NullEntryCount => "(entry_count) null pointer check",
            Probe::NullTable => "(table) null pointer check",
        }
    }

    fn call(&self, introspector: &dyn Introspector, method: MethodId) -> Result<(), IntrospectError> {
        let mut entry_count = 0;
        let mut table: Vec<LineNumberEntry> = Vec::new();
        match self {
            Probe::InvalidMethod => introspector.get_line_number_table(None, Some(&mut entry_count), Some(&mut table)),
            Probe::NullEntryCount => introspector.get_line_number_table(Some(method), None, Some(&mut table)),
            Probe::NullTable => introspector.get_line_number_table(Some(method), Some(&mut entry_count), None),
        }
    }
}

impl fmt::Display for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// A boundary call that did not fail the expected way
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mismatch {
    pub probe: Probe,
    pub expected: IntrospectError,
    /// `Ok` when the call wrongly succeeded
    pub actual: Result<(), IntrospectError>,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let actual = match &self.actual {
            Ok(()) => "NONE",
            Err(e) => e.name(),
        };
        write!(
            f,
            "{}: error expected: {}, actual: {}",
            self.probe,
            self.expected.name(),
            actual
        )
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CheckReport {
    pub mismatches: Vec<Mismatch>,
    /// Progress lines, only collected with printdump
    pub dump: Vec<String>,
    /// True when line numbers were unavailable and nothing was probed
    pub skipped: bool,
}

impl CheckReport {
    pub fn passed(&self) -> bool {
        self.mismatches.is_empty()
    }

    pub fn status(&self) -> i32 {
        if self.passed() { PASSED } else { STATUS_FAILED }
    }
}

/// Issue the three boundary calls against `method`
pub fn check(introspector: &dyn Introspector, method: MethodId, printdump: bool) -> CheckReport {
    debug!("check: method={} printdump={}", method, printdump);
    let mut report = CheckReport::default();

    for probe in Probe::ALL {
        if printdump {
            report.dump.push(format!(">>> {} ...", probe));
        }
        let actual = probe.call(introspector, method);
        let expected = probe.expected();
        if actual != Err(expected) {
            warn!("{}: expected {}, got {:?}", probe, expected.name(), actual);
            report.mismatches.push(Mismatch {
                probe,
                expected,
                actual,
            });
        }
    }

    if printdump {
        report.dump.push(">>> ... done".to_string());
    }
    report
}

/// An introspection client that has negotiated its capabilities
pub struct Agent<I: Introspector> {
    introspector: I,
    capabilities: Capabilities,
    printdump: bool,
}

impl<I: Introspector> Agent<I> {
    /// Request every potential capability and read back what was granted
    pub fn initialize(mut introspector: I, printdump: bool) -> Result<Self, AgentError> {
        let potential = introspector
            .potential_capabilities()
            .map_err(|source| AgentError::Negotiation {
                step: "GetPotentialCapabilities",
                source,
            })?;
        introspector
            .add_capabilities(potential)
            .map_err(|source| AgentError::Negotiation {
                step: "AddCapabilities",
                source,
            })?;
        let capabilities = introspector.capabilities().map_err(|source| AgentError::Negotiation {
            step: "GetCapabilities",
            source,
        })?;

        if !capabilities.can_get_line_numbers {
            warn!("Warning: GetLineNumberTable is not implemented");
        }
        info!("Agent::initialize: capabilities {:?}", capabilities);

        Ok(Self {
            introspector,
            capabilities,
            printdump,
        })
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Check the harness class constructor; passes trivially without line numbers
    pub fn run_check(&self) -> Result<CheckReport, AgentError> {
        if !self.capabilities.can_get_line_numbers {
            return Ok(CheckReport {
                skipped: true,
                ..Default::default()
            });
        }

        let (name, signature) = ("<init>", "()V");
        let method = self
            .introspector
            .find_method(HARNESS_CLASS, name, signature)
            .ok_or_else(|| AgentError::MethodNotFound {
                class: HARNESS_CLASS.to_string(),
                name: name.to_string(),
                signature: signature.to_string(),
            })?;
        Ok(check(&self.introspector, method, self.printdump))
    }
}
