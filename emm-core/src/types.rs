//! Semantic (already-decoded) types shared across the Attach engine.
//!
//! Wire-level NAS IE encode/decode is out of scope for this crate (see
//! `spec.md` §1); everything here models the *meaning* of an IE, not its
//! byte layout. `UeNetworkCapability` and friends are opaque byte buffers
//! because §4.7.6 requires byte comparison, not field comparison, when
//! deciding whether an Attach Request has changed.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque network-assigned UE identifier (the NAS-layer analogue of an
/// `mme_ue_s1ap_id`). Unique while the owning [`crate::context::EmmContext`]
/// exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UeId(pub u32);

impl fmt::Display for UeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ue-{}", self.0)
    }
}

/// International Mobile Subscriber Identity, digits only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Imsi(pub String);

/// International Mobile Equipment Identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Imei(pub String);

/// IMEI with software version suffix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Imeisv(pub String);

/// Mobile/country-network code pair identifying a PLMN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlmnId {
    pub mcc: [u8; 3],
    pub mnc: [u8; 3],
}

/// Tracking Area Identity: a PLMN plus a tracking area code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tai {
    pub plmn: PlmnId,
    pub tac: u16,
}

/// E-UTRAN Cell Global Identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ecgi {
    pub plmn: PlmnId,
    pub cell_identity: u32,
}

/// Globally Unique Temporary Identity allocated to a UE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Guti {
    pub plmn: PlmnId,
    pub mme_group_id: u16,
    pub mme_code: u8,
    pub m_tmsi: u32,
}

/// A GUTI together with the validity flag from invariant 6: a freshly
/// allocated GUTI is "present, not yet valid" until Attach Complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GutiSlot {
    pub guti: Guti,
    pub valid: bool,
}

/// Key Set Identifier advertised by the UE, or the "no key available" value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ksi(pub u8);

impl Ksi {
    /// 3GPP TS 24.301: value 111 (7) denotes "no key is available".
    pub const NONE: Ksi = Ksi(7);

    pub fn is_available(self) -> bool {
        self.0 != Self::NONE.0
    }
}

/// EPS attach type (3GPP TS 24.301 §9.9.3.11).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttachType {
    Eps,
    Combined,
    Emergency,
}

/// Opaque, byte-compared capability buffers. §4.7.6 requires byte
/// comparison of the UE network capability IE rather than a decoded
/// field-by-field comparison, so these are never parsed by this crate.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UeNetworkCapability(pub Vec<u8>);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsNetworkCapability(pub Vec<u8>);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrxParameter(pub Vec<u8>);

/// Decode status of the Attach Request as handed to this engine by the
/// (out-of-scope) wire-layer decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecodeStatus {
    Ok,
    /// Decoded, but one or more non-mandatory IEs were malformed and
    /// dropped; the engine may still proceed using the IEs it has.
    PartialWithErrors,
}

/// Immutable snapshot of a decoded Attach Request, per `spec.md` §6 and
/// §3.1 ("Attach Request IEs: owned by the Attach Procedure Record, freed
/// with it").
#[derive(Debug, Clone, PartialEq)]
pub struct IeSnapshot {
    pub is_initial: bool,
    pub attach_type: AttachType,
    pub is_native_sc: bool,
    pub ksi: Ksi,
    pub is_native_guti: bool,
    pub guti: Option<Guti>,
    pub imsi: Option<Imsi>,
    pub imei: Option<Imei>,
    pub last_visited_registered_tai: Option<Tai>,
    pub originating_tai: Tai,
    pub originating_ecgi: Ecgi,
    pub ue_network_capability: UeNetworkCapability,
    pub ms_network_capability: Option<MsNetworkCapability>,
    pub drx_parameter: Option<DrxParameter>,
    pub esm_msg: Option<Vec<u8>>,
    pub decode_status: DecodeStatus,
    /// Whether the Attach Request carried integrity protection that the
    /// MME could verify against an existing security context (§4.7.2's
    /// "NAS-integrity MAC matched" branch). Not compared by
    /// [`ies_have_changed`]: it reflects verification state, not content.
    pub mac_verified: bool,
}

/// Two IE snapshots are "changed" (§4.7.6) if any of the listed fields
/// differ. The ESM payload is deliberately excluded.
pub fn ies_have_changed(a: &IeSnapshot, b: &IeSnapshot) -> bool {
    a.attach_type != b.attach_type
        || a.is_native_sc != b.is_native_sc
        || a.ksi != b.ksi
        || a.is_native_guti != b.is_native_guti
        || a.guti != b.guti
        || a.imsi != b.imsi
        || a.imei != b.imei
        || a.last_visited_registered_tai != b.last_visited_registered_tai
        || a.originating_tai != b.originating_tai
        || a.originating_ecgi != b.originating_ecgi
        || a.ue_network_capability != b.ue_network_capability
        || a.ms_network_capability != b.ms_network_capability
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_tai() -> Tai {
        Tai {
            plmn: PlmnId { mcc: [2, 0, 8], mnc: [9, 3, 0] },
            tac: 100,
        }
    }

    fn base_ecgi() -> Ecgi {
        Ecgi {
            plmn: PlmnId { mcc: [2, 0, 8], mnc: [9, 3, 0] },
            cell_identity: 42,
        }
    }

    fn base_ies() -> IeSnapshot {
        IeSnapshot {
            is_initial: true,
            attach_type: AttachType::Eps,
            is_native_sc: true,
            ksi: Ksi(0),
            is_native_guti: false,
            guti: None,
            imsi: Some(Imsi("001010000000001".into())),
            imei: None,
            last_visited_registered_tai: None,
            originating_tai: base_tai(),
            originating_ecgi: base_ecgi(),
            ue_network_capability: UeNetworkCapability(vec![0xe6, 0x04]),
            ms_network_capability: None,
            drx_parameter: None,
            esm_msg: Some(vec![1, 2, 3]),
            decode_status: DecodeStatus::Ok,
            mac_verified: false,
        }
    }

    #[test]
    fn identical_snapshots_have_not_changed() {
        let a = base_ies();
        let b = base_ies();
        assert!(!ies_have_changed(&a, &b));
    }

    #[test]
    fn change_predicate_is_reflexive() {
        let a = base_ies();
        assert!(!ies_have_changed(&a, &a));
    }

    #[test]
    fn change_predicate_is_symmetric() {
        let a = base_ies();
        let mut b = base_ies();
        b.ksi = Ksi(1);
        assert_eq!(ies_have_changed(&a, &b), ies_have_changed(&b, &a));
    }

    #[test]
    fn esm_payload_difference_is_ignored() {
        let a = base_ies();
        let mut b = base_ies();
        b.esm_msg = Some(vec![9, 9, 9, 9]);
        assert!(!ies_have_changed(&a, &b));
    }

    #[test]
    fn ksi_difference_is_detected() {
        let a = base_ies();
        let mut b = base_ies();
        b.ksi = Ksi(3);
        assert!(ies_have_changed(&a, &b));
    }

    #[test]
    fn guti_presence_difference_is_detected() {
        let a = base_ies();
        let mut b = base_ies();
        b.guti = Some(Guti {
            plmn: base_tai().plmn,
            mme_group_id: 1,
            mme_code: 1,
            m_tmsi: 1,
        });
        assert!(ies_have_changed(&a, &b));
    }

    #[test]
    fn ue_network_capability_is_byte_compared() {
        let a = base_ies();
        let mut b = base_ies();
        b.ue_network_capability = UeNetworkCapability(vec![0xe6, 0x05]);
        assert!(ies_have_changed(&a, &b));
    }

    #[test]
    fn mac_verified_difference_alone_is_ignored() {
        let a = base_ies();
        let mut b = base_ies();
        b.mac_verified = true;
        assert!(!ies_have_changed(&a, &b));
    }
}
