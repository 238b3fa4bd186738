//! The closed set of EMM causes this core ever emits (`spec.md` §6).

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmmCause {
    Success,
    IllegalUe,
    ImeiNotAccepted,
    EsmFailure,
    ProtocolError,
}

impl Default for EmmCause {
    /// §4.7.2: "Any failure -> Attach Reject with the procedure's
    /// `emm_cause`, defaulting to `ILLEGAL_UE` if unset."
    fn default() -> Self {
        EmmCause::IllegalUe
    }
}

impl fmt::Display for EmmCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EmmCause::Success => "success",
            EmmCause::IllegalUe => "illegal UE",
            EmmCause::ImeiNotAccepted => "IMEI not accepted",
            EmmCause::EsmFailure => "ESM failure",
            EmmCause::ProtocolError => "protocol error",
        };
        write!(f, "{s}")
    }
}
