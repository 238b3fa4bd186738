//! Semantic NAS message types produced and consumed by the engines in
//! this crate (`spec.md` §6). Wire-level encode/decode is out of scope
//! (§1); a [`NasSink`] implementation is the boundary to whatever layer
//! actually serializes these onto S1AP.

use async_trait::async_trait;

use crate::cause::EmmCause;
use crate::config::{EeaAlgorithm, EiaAlgorithm};
use crate::procedures::IdentityType;
use crate::types::{Guti, Imei, Imeisv, Imsi, Ksi, UeId};

/// One identity value as carried in an Identity Response (§6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityValue {
    Imsi(Imsi),
    Imei(Imei),
    Imeisv(Imeisv),
    Tmsi(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityRequest {
    pub requested_type: IdentityType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticationRequest {
    pub rand: Vec<u8>,
    pub autn: Vec<u8>,
}

/// Result of an Authentication Response/Failure from the UE (§4.5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenticationOutcome {
    Response { res: Vec<u8> },
    SyncFailure { auts: Vec<u8> },
    Failure { emm_cause: EmmCause },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityModeCommand {
    pub selected_eea: EeaAlgorithm,
    pub selected_eia: EiaAlgorithm,
    pub ksi: Ksi,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityModeOutcome {
    Complete,
    Reject { emm_cause: EmmCause },
}

/// Attach Accept fields (§6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachAccept {
    pub assigned_guti: Option<Guti>,
    pub t3402_secs: u64,
    pub eps_network_feature_support: u16,
    pub selected_eea: EeaAlgorithm,
    pub selected_eia: EiaAlgorithm,
    pub esm_msg: Vec<u8>,
}

/// Attach Reject fields (§6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachReject {
    pub emm_cause: EmmCause,
    pub esm_reject_pdu: Option<Vec<u8>>,
}

/// Outbound NAS messages this crate produces, and the transport they're
/// handed to (S1AP encode/transmit, out of scope per §1).
#[async_trait]
pub trait NasSink: Send + Sync {
    async fn send_identity_request(&self, ue_id: UeId, msg: IdentityRequest);
    async fn send_authentication_request(&self, ue_id: UeId, msg: AuthenticationRequest);
    async fn send_security_mode_command(&self, ue_id: UeId, msg: SecurityModeCommand);
    async fn send_attach_accept(&self, ue_id: UeId, msg: AttachAccept);
    async fn send_attach_reject(&self, ue_id: UeId, msg: AttachReject);
}

/// Inbound Attach Request IE carrier, re-exported here for callers that
/// only need the NAS-facing surface (full detail lives in
/// [`crate::types::IeSnapshot`]).
pub use crate::types::IeSnapshot as AttachRequestIes;

/// eNB association the Attach Request arrived over (§4.7.1 step 1: "If
/// found via a different `enb_key`, flag duplicate-eNB-context").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngressMeta {
    pub enb_key: u64,
}
