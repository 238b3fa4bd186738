//! Network-side EPS Mobility Management (EMM) Attach procedure engine
//! for an LTE/EPC MME (3GPP TS 24.301).
//!
//! `emm_core::mme::Mme` is the entry point: construct one with the
//! external collaborators ([`nas::NasSink`], [`esm::EsmPeer`],
//! [`provider::AuthVectorProvider`], [`sap::SapSink`]) wired in, then
//! drive it with inbound NAS events.

/// Initialize logging with the given default level, suppressing noisy
/// warnings from sub-procedure retry loops at anything below `info`.
/// Respects `RUST_LOG` overrides.
pub fn init_logging(default_level: log::LevelFilter) {
    env_logger::Builder::new()
        .filter_level(default_level)
        .parse_default_env()
        .init();
}

pub mod attach;
pub mod auth;
pub mod cause;
pub mod config;
pub mod context;
pub mod error;
pub mod esm;
pub mod ident;
pub mod mme;
pub mod nas;
pub mod procedures;
pub mod provider;
pub mod sap;
pub mod security;
pub mod smc;
pub mod testing;
pub mod timer;
pub mod types;
