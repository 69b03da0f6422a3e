//! linetab - boundary checks for the line-number-table query
//!
//! An [`Introspector`] exposes the debug-introspection surface a stepping
//! controller relies on: capability negotiation and the per-method line
//! number table. [`check`] drives the query with invalid arguments and
//! records every call that does not fail with the expected error.

pub mod check;
pub mod cli;
pub mod registry;

use std::fmt;

use thiserror::Error;

pub use check::{Agent, AgentError, CheckReport, Mismatch, PASSED, Probe, STATUS_FAILED, check};
pub use registry::{MethodInfo, MethodRegistry};

/// Opaque method handle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MethodId(pub u32);

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "method#{}", self.0)
    }
}

/// One row of a line number table
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LineNumberEntry {
    /// Code offset where the line begins
    pub start_location: u64,
    pub line_number: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub can_get_line_numbers: bool,
}

/// Errors returned by introspection calls
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum IntrospectError {
    #[error("invalid method id")]
    InvalidMethodId,

    #[error("null pointer")]
    NullPointer,

    #[error("must possess capability")]
    MustPossessCapability,

    #[error("native method")]
    NativeMethod,

    #[error("absent information")]
    AbsentInformation,

    #[error("capability not available")]
    NotAvailable,
}

impl IntrospectError {
    /// Stable upper-case name used in reports
    pub fn name(&self) -> &'static str {
        match self {
            IntrospectError::InvalidMethodId => "INVALID_METHODID",
            IntrospectError::NullPointer => "NULL_POINTER",
            IntrospectError::MustPossessCapability => "MUST_POSSESS_CAPABILITY",
            IntrospectError::NativeMethod => "NATIVE_METHOD",
            IntrospectError::AbsentInformation => "ABSENT_INFORMATION",
            IntrospectError::NotAvailable => "NOT_AVAILABLE",
        }
    }
}

/// The introspection surface under test
///
/// Output slots are `Option<&mut _>` so callers can pass a missing slot, the
/// way a raw interface would accept a null pointer.
pub trait Introspector {
    fn potential_capabilities(&self) -> Result<Capabilities, IntrospectError>;

    fn add_capabilities(&mut self, capabilities: Capabilities) -> Result<(), IntrospectError>;

    /// Capabilities currently possessed
    fn capabilities(&self) -> Result<Capabilities, IntrospectError>;

    fn find_method(&self, class: &str, name: &str, signature: &str) -> Option<MethodId>;

    fn get_line_number_table(
        &self,
        method: Option<MethodId>,
        entry_count: Option<&mut i32>,
        table: Option<&mut Vec<LineNumberEntry>>,
    ) -> Result<(), IntrospectError>;
}
