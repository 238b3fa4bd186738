//! HSS/AuC authentication vector retrieval, modeled as a black-box
//! provider (`spec.md` §1 Non-goals, §4.5).

use async_trait::async_trait;
use thiserror::Error;

use crate::types::Imsi;

/// One EPS authentication vector: RAND, AUTN, XRES, KASME.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthVector {
    pub rand: Vec<u8>,
    pub autn: Vec<u8>,
    pub xres: Vec<u8>,
    pub kasme: Vec<u8>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthVectorError {
    #[error("no subscriber record for the given IMSI")]
    UnknownSubscriber,
    #[error("vector provider unavailable")]
    Unavailable,
}

/// External collaborator retrieving authentication vectors keyed by
/// IMSI (§4.5: "Obtains an authentication vector ... from the external
/// provider keyed by IMSI").
#[async_trait]
pub trait AuthVectorProvider: Send + Sync {
    async fn get_vector(&self, imsi: &Imsi) -> Result<AuthVector, AuthVectorError>;
}
