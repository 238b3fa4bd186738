//! MME-wide configuration: timer durations, retransmission limits, and the
//! security-algorithm priority lists used by §4.2's selection rule.
//!
//! Deserializable with `serde`/`toml`, the way the teacher daemon loads its
//! `Config` (`rayhunter-daemon`'s `toml = "0.8.8"` dependency); see
//! `SPEC_FULL.md` §10.3.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Ciphering algorithms, in the priority order the MME is configured to
/// prefer (highest priority first is the operator's job to order; this
/// crate never reorders the list it's given).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EeaAlgorithm {
    Eea0,
    Eea1,
    Eea2,
    Eea3,
}

/// Integrity algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EiaAlgorithm {
    Eia0,
    Eia1,
    Eia2,
    Eia3,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MmeConfig {
    /// Retransmission timer for Attach Accept (also Detach/TAU Accept).
    pub t3450_secs: u64,
    /// Authentication procedure retransmission timer.
    pub t3460_secs: u64,
    /// Identification procedure retransmission timer.
    pub t3470_secs: u64,
    /// Periodic TAU timer value advertised to the UE in Attach Accept.
    pub t3402_secs: u64,

    /// §3.3 invariant 5: T3450 retransmission count bound.
    pub attach_counter_max: u8,
    /// §4.4: Identification retransmits before `failure_cb`.
    pub identification_counter_max: u8,
    /// §4.5/§4.6 analogue for Authentication and Security Mode Control.
    pub authentication_counter_max: u8,
    pub security_mode_counter_max: u8,

    /// §4.7.1 step 2: gate on EMERGENCY attach type.
    pub emergency_bearer_services_supported: bool,

    /// EPS network feature support bits advertised in Attach Accept
    /// (opaque to this crate beyond passing them through).
    pub eps_network_feature_support: u16,

    /// MME-configured ciphering priority list, highest priority first.
    pub eea_priority: Vec<EeaAlgorithm>,
    /// MME-configured integrity priority list, highest priority first.
    pub eia_priority: Vec<EiaAlgorithm>,
    /// Whether falling back to null ciphering (EEA0) is permitted when no
    /// mutually supported non-null algorithm exists (§4.2).
    pub allow_null_encryption_fallback: bool,
}

impl Default for MmeConfig {
    fn default() -> Self {
        MmeConfig {
            t3450_secs: 6,
            t3460_secs: 6,
            t3470_secs: 6,
            t3402_secs: 12,
            attach_counter_max: 5,
            identification_counter_max: 4,
            authentication_counter_max: 4,
            security_mode_counter_max: 4,
            emergency_bearer_services_supported: false,
            eps_network_feature_support: 0,
            eea_priority: vec![
                EeaAlgorithm::Eea2,
                EeaAlgorithm::Eea1,
                EeaAlgorithm::Eea0,
            ],
            eia_priority: vec![EiaAlgorithm::Eia2, EiaAlgorithm::Eia1],
            allow_null_encryption_fallback: true,
        }
    }
}

impl MmeConfig {
    pub fn t3450(&self) -> Duration {
        Duration::from_secs(self.t3450_secs)
    }

    pub fn t3460(&self) -> Duration {
        Duration::from_secs(self.t3460_secs)
    }

    pub fn t3470(&self) -> Duration {
        Duration::from_secs(self.t3470_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_timer_values() {
        let cfg = MmeConfig::default();
        assert_eq!(cfg.t3450_secs, 6);
        assert_eq!(cfg.t3460_secs, 6);
        assert_eq!(cfg.t3470_secs, 6);
        assert_eq!(cfg.t3402_secs, 12);
        assert_eq!(cfg.attach_counter_max, 5);
    }

    #[test]
    fn serde_round_trip() {
        // `emm-core` itself does not depend on the `toml` crate (only the
        // `emm-sim` binary loads configuration from disk); this exercises
        // the `Serialize`/`Deserialize` derives via `serde_json`, a
        // dev-dependency, to prove the config type round-trips cleanly.
        let cfg = MmeConfig::default();
        let s = serde_json::to_string(&cfg).expect("serialize");
        let back: MmeConfig = serde_json::from_str(&s).expect("deserialize");
        assert_eq!(cfg, back);
    }
}
