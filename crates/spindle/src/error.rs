//! Error taxonomy for definition-time and run-time failures.
//!
//! Definition-time errors ([`Error::Syntax`], [`Error::NotDag`], [`Error::Copy`],
//! [`Error::Context`], [`Error::Invalid`], ...) abort the definition of a
//! workflow function. Run-time errors abort the run. Nothing is silently
//! recovered and drivers never retry.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};
use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The failure kinds surfaced by the engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// Illegal use of a deferred result inside the constants block: reassigning
    /// a known name, applying an operator to a deferred result, or an AST form
    /// the block does not admit.
    #[error("constants block syntax: {0}")]
    Syntax(String),

    /// The constants-block statement graph or the whole-workflow call graph has
    /// a cycle.
    #[error("not a DAG: {0}")]
    NotDag(String),

    /// A deferred value escapes into an ordinary (non-workflow) function call
    /// without being loaded first.
    #[error("cannot copy deferred value: {0}")]
    Copy(String),

    /// A referenced workflow function is missing from the dependency map.
    #[error("no definition found for workflow function `{0}`")]
    MissingFunction(String),

    /// An unbound name is referenced inside the constants block.
    #[error("unbound name in constants block: `{0}`")]
    Context(String),

    /// Structurally invalid definition: more than one constants block, a
    /// mutating statement inside the block, or multiple assignment targets.
    #[error("{0}")]
    Invalid(String),

    /// The source uses a construct outside the supported subset.
    #[error("unsupported construct: {0}")]
    Unsupported(String),

    /// The source text failed to parse.
    #[error("parse error: {0}")]
    Parse(String),

    /// A result was loaded from the store before its call completed.
    #[error("no stored result for {0}")]
    NotCompleted(String),

    /// A storage backend failed.
    #[error("store error: {0}")]
    Storage(String),

    /// A failure raised by user code during execution, propagated verbatim by
    /// the drivers.
    #[error(transparent)]
    Runtime(#[from] RunError),

    /// The driver observed a cancellation signal between call dispatches.
    #[error("execution cancelled")]
    Cancelled,
}

/// Exception-style categories for failures raised while evaluating user code.
///
/// The display form matches the Python exception the failure corresponds to,
/// which keeps messages recognizable to authors of workflow functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, IntoStaticStr, Serialize, Deserialize)]
pub enum RunErrorKind {
    #[strum(serialize = "TypeError")]
    Type,
    #[strum(serialize = "ValueError")]
    Value,
    #[strum(serialize = "NameError")]
    Name,
    #[strum(serialize = "IndexError")]
    Index,
    #[strum(serialize = "KeyError")]
    Key,
    #[strum(serialize = "ZeroDivisionError")]
    ZeroDivision,
    #[strum(serialize = "OverflowError")]
    Overflow,
    #[strum(serialize = "UnpackError")]
    Unpack,
    #[strum(serialize = "ResourceError")]
    Resource,
    #[strum(serialize = "UnhashableError")]
    Unhashable,
}

/// A run-time failure from evaluating a workflow function body.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct RunError {
    pub kind: RunErrorKind,
    pub message: String,
}

impl RunError {
    pub fn new(kind: RunErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(RunErrorKind::Type, message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::new(RunErrorKind::Value, message)
    }

    pub fn name_error(name: &str) -> Self {
        Self::new(RunErrorKind::Name, format!("name '{name}' is not defined"))
    }
}
