//! Test doubles for the external collaborators this crate treats as
//! black boxes (`spec.md` §1 Non-goals): the HSS/AuC vector provider and
//! the ESM peer. Mirrors the teacher's habit of keeping lightweight
//! fixtures alongside the types they stand in for rather than a
//! separate mocking crate.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::esm::{EsmOutcome, EsmPeer};
use crate::provider::{AuthVector, AuthVectorError, AuthVectorProvider};
use crate::types::{Imsi, UeId};

/// Hands back a fixed vector for a configured set of IMSIs, or
/// `UnknownSubscriber` otherwise.
pub struct MockAuthVectorProvider {
    vectors: HashMap<String, AuthVector>,
}

impl MockAuthVectorProvider {
    pub fn new() -> Self {
        MockAuthVectorProvider { vectors: HashMap::new() }
    }

    pub fn with_vector(mut self, imsi: &str, vector: AuthVector) -> Self {
        self.vectors.insert(imsi.to_string(), vector);
        self
    }
}

impl Default for MockAuthVectorProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthVectorProvider for MockAuthVectorProvider {
    async fn get_vector(&self, imsi: &Imsi) -> Result<AuthVector, AuthVectorError> {
        self.vectors
            .get(&imsi.0)
            .cloned()
            .ok_or(AuthVectorError::UnknownSubscriber)
    }
}

/// Always responds with a configured outcome to `unitdata_ind`, and
/// records every `ue_id` it was asked to confirm a default bearer
/// activation for.
pub struct MockEsmPeer {
    outcome: EsmOutcome,
    activations: Mutex<Vec<UeId>>,
    pdn_rejections: Mutex<Vec<UeId>>,
}

impl MockEsmPeer {
    pub fn new(outcome: EsmOutcome) -> Self {
        MockEsmPeer { outcome, activations: Mutex::new(Vec::new()), pdn_rejections: Mutex::new(Vec::new()) }
    }

    pub async fn activations(&self) -> Vec<UeId> {
        self.activations.lock().await.clone()
    }

    pub async fn pdn_rejections(&self) -> Vec<UeId> {
        self.pdn_rejections.lock().await.clone()
    }
}

#[async_trait]
impl EsmPeer for MockEsmPeer {
    async fn unitdata_ind(&self, _ue_id: UeId, _esm_msg: Vec<u8>) -> EsmOutcome {
        self.outcome.clone()
    }

    async fn default_eps_bearer_context_activate_cnf(&self, ue_id: UeId, _esm_msg: Vec<u8>) {
        self.activations.lock().await.push(ue_id);
    }

    async fn pdn_connectivity_rej(&self, ue_id: UeId) {
        self.pdn_rejections.lock().await.push(ue_id);
    }
}
