//! Mode selector

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from parsing a mode selector
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModeError {
    #[error("Invalid mode '{0}' (expected precise, aggressive or remote)")]
    Invalid(String),
}

/// How interrupts are delivered to the worker
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Local generator, one interrupt per iteration, hand-off through a rendezvous
    Precise,
    /// Local generator, uncoordinated, fixed short pace
    Aggressive,
    /// Controller-side generator signalling through the command channel
    Remote,
}

impl Mode {
    /// All modes, in the order they are usually exercised
    pub const ALL: [Mode; 3] = [Mode::Precise, Mode::Aggressive, Mode::Remote];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Precise => "precise",
            Mode::Aggressive => "aggressive",
            Mode::Remote => "remote",
        }
    }

    /// True when the target process owns the generator thread
    pub fn has_local_generator(&self) -> bool {
        matches!(self, Mode::Precise | Mode::Aggressive)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = ModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "precise" => Ok(Mode::Precise),
            "aggressive" => Ok(Mode::Aggressive),
            "remote" => Ok(Mode::Remote),
            _ => Err(ModeError::Invalid(s.to_string())),
        }
    }
}
