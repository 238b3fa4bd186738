//! Per-UE cryptographic state (`spec.md` §3.2, §4.2).
//!
//! Cryptographic algorithms themselves are out of scope (`spec.md` §1
//! Non-goals); this module only selects *which* algorithm identifiers to
//! use and tracks the counters and key material as opaque bytes.

use crate::config::{EeaAlgorithm, EiaAlgorithm, MmeConfig};

/// Type of security context (3GPP TS 24.301 §3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KsiType {
    #[default]
    NotAvailable,
    Native,
    Mapped,
}

/// 32-bit NAS COUNT split as `{reserved:8, overflow:16, seq_num:8}`
/// (`spec.md` §4.2). The sequence number increments per NAS message; the
/// overflow counter advances on sequence-number wrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NasCount {
    overflow: u16,
    seq_num: u8,
}

impl NasCount {
    pub fn seq_num(&self) -> u8 {
        self.seq_num
    }

    pub fn overflow(&self) -> u16 {
        self.overflow
    }

    /// Packs the reserved/overflow/seq_num triple into the wire-ready
    /// 32-bit representation (reserved bits are always zero on our side).
    pub fn as_u32(&self) -> u32 {
        ((self.overflow as u32) << 8) | self.seq_num as u32
    }

    /// Advances the counter by one NAS message, rolling `overflow` on
    /// sequence-number wrap.
    pub fn increment(&mut self) {
        let (next, wrapped) = self.seq_num.overflowing_add(1);
        self.seq_num = next;
        if wrapped {
            self.overflow = self.overflow.wrapping_add(1);
        }
    }
}

/// EPS NAS security context handled by the EMM sublayer (`spec.md` §4.2).
#[derive(Debug, Clone)]
pub struct SecurityContext {
    pub ksi_type: KsiType,
    pub eksi: Ksi,
    /// ASME key (KASME), opaque key material.
    pub kasme: Vec<u8>,
    pub knas_enc: Vec<u8>,
    pub knas_int: Vec<u8>,
    pub dl_count: NasCount,
    pub ul_count: NasCount,
    pub selected_eea: Option<EeaAlgorithm>,
    pub selected_eia: Option<EiaAlgorithm>,
    /// §3.3 invariant 3: activated only after Security Mode Complete.
    pub activated: bool,
}

/// Key Set Identifier, re-exported here so `SecurityContext` does not need
/// to depend on `crate::types` for a one-field newtype. Kept structurally
/// identical to [`crate::types::Ksi`].
pub type Ksi = crate::types::Ksi;

impl SecurityContext {
    /// Fresh context for a new authentication run: counters reset, not
    /// yet activated (§4.2: "Counters are reset when a new Security
    /// Context is established").
    pub fn new_native(eksi: Ksi, kasme: Vec<u8>) -> Self {
        SecurityContext {
            ksi_type: KsiType::Native,
            eksi,
            kasme,
            knas_enc: Vec::new(),
            knas_int: Vec::new(),
            dl_count: NasCount::default(),
            ul_count: NasCount::default(),
            selected_eea: None,
            selected_eia: None,
            activated: false,
        }
    }
}

impl Default for SecurityContext {
    /// No security context established yet (§3.3 invariant: a fresh
    /// `EmmContext` starts with `ksi_type = NotAvailable`).
    fn default() -> Self {
        SecurityContext {
            ksi_type: KsiType::NotAvailable,
            eksi: Ksi::NONE,
            kasme: Vec::new(),
            knas_enc: Vec::new(),
            knas_int: Vec::new(),
            dl_count: NasCount::default(),
            ul_count: NasCount::default(),
            selected_eea: None,
            selected_eia: None,
            activated: false,
        }
    }
}

/// Selects the highest-priority mutually supported encryption and
/// integrity algorithm (§4.2). `ue_eea`/`ue_eia` are the algorithms the UE
/// advertised as supported; `config` carries the MME's priority lists.
///
/// Returns `Err` if no mutually supported integrity algorithm exists
/// (fatal per §4.2); falls back to `Eea0` (null encryption) if no
/// encryption algorithm matches and the policy allows it.
pub fn select_algorithms(
    ue_eea: &[EeaAlgorithm],
    ue_eia: &[EiaAlgorithm],
    config: &MmeConfig,
) -> Result<(EeaAlgorithm, EiaAlgorithm), AlgorithmSelectionError> {
    let eia = config
        .eia_priority
        .iter()
        .find(|candidate| ue_eia.contains(candidate))
        .copied()
        .ok_or(AlgorithmSelectionError::NoIntegrityAlgorithm)?;

    let eea = config
        .eea_priority
        .iter()
        .find(|candidate| ue_eea.contains(candidate))
        .copied()
        .or_else(|| {
            if config.allow_null_encryption_fallback {
                Some(EeaAlgorithm::Eea0)
            } else {
                None
            }
        })
        .ok_or(AlgorithmSelectionError::NoEncryptionAlgorithm)?;

    Ok((eea, eia))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AlgorithmSelectionError {
    #[error("no mutually supported integrity algorithm")]
    NoIntegrityAlgorithm,
    #[error("no mutually supported encryption algorithm and null fallback disabled")]
    NoEncryptionAlgorithm,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> MmeConfig {
        MmeConfig::default()
    }

    #[test]
    fn picks_highest_priority_mutual_algorithms() {
        let cfg = config();
        let (eea, eia) = select_algorithms(
            &[EeaAlgorithm::Eea1, EeaAlgorithm::Eea2],
            &[EiaAlgorithm::Eia1, EiaAlgorithm::Eia2],
            &cfg,
        )
        .unwrap();
        // cfg's priority order is Eea2 > Eea1 > Eea0, Eia2 > Eia1.
        assert_eq!(eea, EeaAlgorithm::Eea2);
        assert_eq!(eia, EiaAlgorithm::Eia2);
    }

    #[test]
    fn ties_broken_by_priority_list_order() {
        let cfg = config();
        // UE supports only Eea1 and Eea0; priority list prefers Eea1.
        let (eea, _) = select_algorithms(&[EeaAlgorithm::Eea0, EeaAlgorithm::Eea1], &[EiaAlgorithm::Eia2], &cfg).unwrap();
        assert_eq!(eea, EeaAlgorithm::Eea1);
    }

    #[test]
    fn no_integrity_algorithm_is_fatal() {
        let cfg = config();
        let err = select_algorithms(&[EeaAlgorithm::Eea2], &[EiaAlgorithm::Eia3], &cfg).unwrap_err();
        assert_eq!(err, AlgorithmSelectionError::NoIntegrityAlgorithm);
    }

    #[test]
    fn falls_back_to_null_encryption_when_allowed() {
        let cfg = config();
        let (eea, _) = select_algorithms(&[], &[EiaAlgorithm::Eia1], &cfg).unwrap();
        assert_eq!(eea, EeaAlgorithm::Eea0);
    }

    #[test]
    fn rejects_when_null_fallback_disabled() {
        let mut cfg = config();
        cfg.allow_null_encryption_fallback = false;
        let err = select_algorithms(&[], &[EiaAlgorithm::Eia1], &cfg).unwrap_err();
        assert_eq!(err, AlgorithmSelectionError::NoEncryptionAlgorithm);
    }

    #[test]
    fn nas_count_wraps_overflow_on_sequence_rollover() {
        let mut count = NasCount::default();
        for _ in 0..255 {
            count.increment();
        }
        assert_eq!(count.seq_num(), 255);
        assert_eq!(count.overflow(), 0);
        count.increment();
        assert_eq!(count.seq_num(), 0);
        assert_eq!(count.overflow(), 1);
    }
}
