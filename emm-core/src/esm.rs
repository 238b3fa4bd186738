//! ESM (session management) treated as an opaque peer reachable by two
//! request/response primitives (`spec.md` §1 Non-goals, §4.7.3, §4.7.5).

use async_trait::async_trait;

use crate::types::UeId;

/// Outcome of handing an ESM PDU to the session-management peer
/// (§4.7.3: "ESM returns one of: Success ..., Failure ..., Discarded").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EsmOutcome {
    Success { response_pdu: Vec<u8> },
    Failure { response_pdu: Vec<u8> },
    Discarded,
}

/// EPS Session Management peer, reachable only through these three
/// SAP-style primitives (`ESM_UNITDATA_IND`,
/// `ESM_DEFAULT_EPS_BEARER_CONTEXT_ACTIVATE_CNF`, `ESM_PDN_CONNECTIVITY_REJ`).
#[async_trait]
pub trait EsmPeer: Send + Sync {
    /// Forwards an inner ESM PDU carried non-standalone inside an Attach
    /// Request (§4.7.3).
    async fn unitdata_ind(&self, ue_id: UeId, esm_msg: Vec<u8>) -> EsmOutcome;

    /// Forwards the ESM PDU carried inside an Attach Complete (§4.7.5
    /// step 2). No response is expected; this is a fire-and-forget
    /// confirmation.
    async fn default_eps_bearer_context_activate_cnf(&self, ue_id: UeId, esm_msg: Vec<u8>);

    /// Tells ESM its PDN connectivity request will not be completed
    /// because the Attach it rode in on is being aborted (§4.7.4 /
    /// abnormal cancellation, not a rejected Attach Request).
    async fn pdn_connectivity_rej(&self, ue_id: UeId);
}
