//! Error kinds per `spec.md` §7, plus the infrastructure failures of the
//! Context Store (§4.1) and Procedure Registry (§4.3).

use crate::cause::EmmCause;
use crate::types::UeId;
use thiserror::Error;

/// One of the §7 error kinds a sub-procedure's `failure_cb` can report.
/// Each carries enough to let the Attach engine set `emm_cause` and
/// trigger Reject without the sub-procedure needing to know about Reject
/// itself.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProcedureFailure {
    /// A timer exhausted its retransmission budget; not itself terminal
    /// for the caller, but already resolved to a cause by the time it
    /// reaches this type.
    #[error("transient failure, cause {0}")]
    Transient(EmmCause),
    #[error("protocol violation")]
    ProtocolViolation,
    #[error("authentication failure")]
    AuthFailure,
    #[error("policy denied, cause {0}")]
    PolicyDenied(EmmCause),
    #[error("ESM failure")]
    EsmFailure { esm_reject_pdu: Option<Vec<u8>> },
    #[error("resource exhausted")]
    ResourceExhausted,
}

impl ProcedureFailure {
    /// Maps a failure to the EMM cause carried in the resulting Attach
    /// Reject (§7).
    pub fn emm_cause(&self) -> EmmCause {
        match self {
            ProcedureFailure::Transient(c) => *c,
            ProcedureFailure::ProtocolViolation => EmmCause::ProtocolError,
            ProcedureFailure::AuthFailure => EmmCause::IllegalUe,
            ProcedureFailure::PolicyDenied(c) => *c,
            ProcedureFailure::EsmFailure { .. } => EmmCause::EsmFailure,
            ProcedureFailure::ResourceExhausted => EmmCause::IllegalUe,
        }
    }
}

/// Top-level error type for `ContextStore` and `ProcedureRegistry`
/// operations (§4.1, §4.3).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EmmError {
    #[error("ue_id {0} already present in context store")]
    Duplicate(UeId),
    #[error("no EMM context for ue_id {0}")]
    ContextNotFound(UeId),
    #[error("a specific procedure is already running for ue_id {0}")]
    Busy(UeId),
    #[error(transparent)]
    Procedure(#[from] ProcedureFailure),
}
