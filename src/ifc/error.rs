//! Information-flow errors.

use std::fmt::{self, Display, Formatter};

use crate::ctx::InternalError;
use crate::ir::{NodeId, ProgramError};

/// A failed flow: where, what was found, and what was required.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Violation {
    /// The offending node
    pub node: NodeId,
    /// The label that was found
    pub actual: String,
    /// The label it had to flow to
    pub required: String,
    /// Delegation hypotheses and function label constraints in force
    pub context: Vec<String>,
}

impl Display for Violation {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "at {}: {} does not flow to {}", self.node, self.actual, self.required)?;
        if !self.context.is_empty() {
            write!(f, " (assuming {})", self.context.join(", "))?;
        }
        Ok(())
    }
}

/// Why a program was rejected by information-flow checking.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum IfcError {
    #[error("Insecure data flow {0}")]
    /// Data reaches a place that may not see it, or may not be influenced by it
    InsecureDataFlow(Violation),
    #[error("Insecure control flow {0}")]
    /// A branch or the program counter leaks into a less restrictive place
    InsecureControlFlow(Violation),
    #[error("Malleable downgrade {0}")]
    /// A downgrade endpoint could be influenced by principals that may not read it
    MalleableDowngrade(Violation),
    #[error("Declassification changes integrity {0}")]
    /// A declassification also changes integrity
    IntegrityChangingDeclassification(Violation),
    #[error("Endorsement changes confidentiality {0}")]
    /// An endorsement also changes confidentiality
    ConfidentialityChangingEndorsement(Violation),
    #[error(transparent)]
    /// A label expression is malformed
    Program(#[from] ProgramError),
    #[error(transparent)]
    /// The analysis itself went wrong
    Internal(#[from] InternalError),
}

/// The kind of [IfcError] a constraint raises.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// [IfcError::InsecureDataFlow]
    DataFlow,
    /// [IfcError::InsecureControlFlow]
    ControlFlow,
    /// [IfcError::MalleableDowngrade]
    Malleable,
    /// [IfcError::IntegrityChangingDeclassification]
    IntegrityChange,
    /// [IfcError::ConfidentialityChangingEndorsement]
    ConfidentialityChange,
}

impl ErrorKind {
    /// Build the error for a failure of this kind.
    pub fn error(self, v: Violation) -> IfcError {
        match self {
            ErrorKind::DataFlow => IfcError::InsecureDataFlow(v),
            ErrorKind::ControlFlow => IfcError::InsecureControlFlow(v),
            ErrorKind::Malleable => IfcError::MalleableDowngrade(v),
            ErrorKind::IntegrityChange => IfcError::IntegrityChangingDeclassification(v),
            ErrorKind::ConfidentialityChange => IfcError::ConfidentialityChangingEndorsement(v),
        }
    }
}

/// Result of information-flow checking.
pub type Result<T> = std::result::Result<T, IfcError>;
