//! Internal process-boundary primitives (`spec.md` §6 "SAP primitives").
//!
//! EMMREG/EMMAS notify whatever sits above the EMM sublayer (S1AP glue,
//! metrics, whatever the host process wires up); ESM is the session
//! management peer this crate treats as a black box (§1 Non-goals). Both
//! are modeled as async traits the same way the teacher's `Analyzer`
//! plugin trait is the seam between `lib` and its callers
//! (`examples/BeigeBox-rayhunter/lib/src/analysis/analyzer.rs`).

use async_trait::async_trait;

use crate::cause::EmmCause;
use crate::types::UeId;

/// EMMREG primitives delivered upward out of the Attach engine (§6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmmRegPrimitive {
    AttachRej { ue_id: UeId, cause: EmmCause },
    AttachAbort { ue_id: UeId },
    AttachCnf { ue_id: UeId },
    CommonProcAbort { ue_id: UeId },
}

/// EMMAS primitives: outcome of an Attach Accept/Reject establishment
/// attempt, as seen by the access-stratum glue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmmAsPrimitive {
    EstablishCnf { ue_id: UeId },
    EstablishRej { ue_id: UeId },
}

/// Upward notification sink. A no-op implementation is valid for
/// contexts that don't care (e.g. unit tests); `emm-sim` implements it to
/// log and/or drive scenario assertions.
#[async_trait]
pub trait SapSink: Send + Sync {
    async fn emm_reg(&self, primitive: EmmRegPrimitive);
    async fn emm_as(&self, primitive: EmmAsPrimitive);
}

/// A sink that drops every primitive. Useful as a default/test double.
pub struct NullSapSink;

#[async_trait]
impl SapSink for NullSapSink {
    async fn emm_reg(&self, _primitive: EmmRegPrimitive) {}
    async fn emm_as(&self, _primitive: EmmAsPrimitive) {}
}
