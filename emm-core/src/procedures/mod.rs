//! Procedure Registry (`spec.md` §4.3): per-context holder of the one
//! running specific procedure and the zero-or-more common procedures.
//!
//! Grounded on `examples/original_source/SRC/NAS/EMM/Attach.c`'s
//! `emm_proc_attach_request` bookkeeping (`attach_proc->attach_accept_sent`,
//! `emm_cause`) and the base-procedure/child relationship described in
//! `spec.md` §9: continuations are enum-dispatched here rather than
//! function pointers, so the registry owns plain data and the engine in
//! `crate::attach` drives the transitions.

use crate::cause::EmmCause;
use crate::error::EmmError;
use crate::types::{Guti, IeSnapshot, Ksi, UeId};

/// Which identity the Identification common procedure is requesting
/// (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityType {
    Imsi,
    Imei,
    Imeisv,
    Tmsi,
}

/// The three EMM common sub-procedures (§2 item 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommonProcedureKind {
    Identification,
    Authentication,
    SecurityModeControl,
}

/// The specific procedures that share an EMM Context's procedure slot
/// (§2 item 3). Only `Attach` is driven by this crate; `Detach`/`Tau`
/// are modeled so the registry's "at most one specific procedure" rule
/// is meaningful even though their engines live outside this crate's
/// scope (`spec.md` §1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecificProcedureKind {
    Attach,
    Detach,
    Tau,
}

/// A running Attach procedure instance (§4.3).
#[derive(Debug, Clone)]
pub struct AttachProc {
    pub ue_id: UeId,
    pub ies: IeSnapshot,
    pub assigned_guti: Option<Guti>,
    pub emm_cause: EmmCause,
    /// Number of Attach Accepts sent so far, bounded by
    /// `attach_counter_max` (§3.3 invariant 5).
    pub attach_accept_sent: u8,
    pub attach_reject_sent: bool,
    pub attach_complete_received: bool,
    /// Response ESM PDU to piggy-back on the next outbound message.
    pub esm_msg_out: Option<Vec<u8>>,
    /// What the engine is waiting on next; drives dispatch when a
    /// common procedure or ESM call completes (replaces the original's
    /// function-pointer continuations, per `spec.md` §9).
    pub pending_step: PendingStep,
}

/// Enum-dispatched continuation state for an in-flight Attach (§9:
/// "express continuations as enum-dispatched messages").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingStep {
    /// Just created; ingress run-step has not classified identity yet.
    Fresh,
    AwaitingIdentification,
    AwaitingAuthentication,
    AwaitingSecurityMode,
    AwaitingEsm,
    AwaitingComplete,
}

impl AttachProc {
    pub fn new(ue_id: UeId, ies: IeSnapshot) -> Self {
        AttachProc {
            ue_id,
            ies,
            assigned_guti: None,
            emm_cause: EmmCause::default(),
            attach_accept_sent: 0,
            attach_reject_sent: false,
            attach_complete_received: false,
            esm_msg_out: None,
            pending_step: PendingStep::Fresh,
        }
    }
}

/// Record for a running Identification common procedure (§4.4).
#[derive(Debug, Clone)]
pub struct IdentificationProc {
    pub ue_id: UeId,
    pub requested_type: IdentityType,
    /// Marks Identification invoked by an Attach, so collisions route to
    /// abnormal-case §5.4.4.6 instead of being treated as standalone.
    pub is_cause_is_attach: bool,
    pub retransmit_count: u8,
}

/// Record for a running Authentication common procedure (§4.5).
#[derive(Debug, Clone)]
pub struct AuthenticationProc {
    pub ue_id: UeId,
    pub retransmit_count: u8,
    /// Set once a synchronization-failure retry has already consumed a
    /// fresh vector; a second sync failure is terminal (§4.5).
    pub resync_attempted: bool,
}

/// Record for a running Security Mode Control common procedure (§4.6).
#[derive(Debug, Clone)]
pub struct SecurityModeProc {
    pub ue_id: UeId,
    pub ksi: Ksi,
    pub retransmit_count: u8,
}

/// One of the three common procedure records, tagged by kind.
#[derive(Debug, Clone)]
pub enum CommonProc {
    Identification(IdentificationProc),
    Authentication(AuthenticationProc),
    SecurityMode(SecurityModeProc),
}

impl CommonProc {
    fn kind(&self) -> CommonProcedureKind {
        match self {
            CommonProc::Identification(_) => CommonProcedureKind::Identification,
            CommonProc::Authentication(_) => CommonProcedureKind::Authentication,
            CommonProc::SecurityMode(_) => CommonProcedureKind::SecurityModeControl,
        }
    }
}

/// Per-context procedure bookkeeping: at most one specific procedure and
/// at most one of each common-procedure kind (§3.3 invariant 2).
#[derive(Debug, Clone, Default)]
pub struct ProcedureRegistry {
    attach: Option<AttachProc>,
    common: Vec<CommonProc>,
}

impl ProcedureRegistry {
    pub fn is_specific_running(&self, kind: SpecificProcedureKind) -> bool {
        matches!(kind, SpecificProcedureKind::Attach) && self.attach.is_some()
    }

    pub fn is_common_running(&self, kind: CommonProcedureKind) -> bool {
        self.common.iter().any(|c| c.kind() == kind)
    }

    pub fn get_specific_attach(&self) -> Option<&AttachProc> {
        self.attach.as_ref()
    }

    pub fn get_specific_attach_mut(&mut self) -> Option<&mut AttachProc> {
        self.attach.as_mut()
    }

    /// Fails with `Busy` if a specific procedure already runs (§4.3).
    pub fn new_attach(&mut self, ue_id: UeId, ies: IeSnapshot) -> Result<&mut AttachProc, EmmError> {
        if self.attach.is_some() {
            return Err(EmmError::Busy(ue_id));
        }
        self.attach = Some(AttachProc::new(ue_id, ies));
        Ok(self.attach.as_mut().expect("just inserted"))
    }

    /// Clears the specific slot. Timer handles belong to the EMM Context
    /// (§3.3 invariant 7); the caller is responsible for stopping them
    /// before or after this call.
    pub fn delete_attach(&mut self) -> Option<AttachProc> {
        self.attach.take()
    }

    pub fn start_identification(
        &mut self,
        ue_id: UeId,
        requested_type: IdentityType,
        is_cause_is_attach: bool,
    ) -> Result<&mut IdentificationProc, EmmError> {
        if self.is_common_running(CommonProcedureKind::Identification) {
            return Err(EmmError::Busy(ue_id));
        }
        self.common.push(CommonProc::Identification(IdentificationProc {
            ue_id,
            requested_type,
            is_cause_is_attach,
            retransmit_count: 0,
        }));
        match self.common.last_mut().expect("just pushed") {
            CommonProc::Identification(p) => Ok(p),
            _ => unreachable!(),
        }
    }

    pub fn start_authentication(&mut self, ue_id: UeId) -> Result<&mut AuthenticationProc, EmmError> {
        if self.is_common_running(CommonProcedureKind::Authentication) {
            return Err(EmmError::Busy(ue_id));
        }
        self.common.push(CommonProc::Authentication(AuthenticationProc {
            ue_id,
            retransmit_count: 0,
            resync_attempted: false,
        }));
        match self.common.last_mut().expect("just pushed") {
            CommonProc::Authentication(p) => Ok(p),
            _ => unreachable!(),
        }
    }

    pub fn start_security_mode(&mut self, ue_id: UeId, ksi: Ksi) -> Result<&mut SecurityModeProc, EmmError> {
        if self.is_common_running(CommonProcedureKind::SecurityModeControl) {
            return Err(EmmError::Busy(ue_id));
        }
        self.common.push(CommonProc::SecurityMode(SecurityModeProc {
            ue_id,
            ksi,
            retransmit_count: 0,
        }));
        match self.common.last_mut().expect("just pushed") {
            CommonProc::SecurityMode(p) => Ok(p),
            _ => unreachable!(),
        }
    }

    pub fn clear_common(&mut self, kind: CommonProcedureKind) {
        self.common.retain(|c| c.kind() != kind);
    }

    pub fn identification_mut(&mut self) -> Option<&mut IdentificationProc> {
        self.common.iter_mut().find_map(|c| match c {
            CommonProc::Identification(p) => Some(p),
            _ => None,
        })
    }

    pub fn authentication_mut(&mut self) -> Option<&mut AuthenticationProc> {
        self.common.iter_mut().find_map(|c| match c {
            CommonProc::Authentication(p) => Some(p),
            _ => None,
        })
    }

    pub fn security_mode_mut(&mut self) -> Option<&mut SecurityModeProc> {
        self.common.iter_mut().find_map(|c| match c {
            CommonProc::SecurityMode(p) => Some(p),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AttachType, DecodeStatus, Ecgi, PlmnId, Tai, UeNetworkCapability};

    fn plmn() -> PlmnId {
        PlmnId { mcc: [2, 0, 8], mnc: [9, 3, 0] }
    }

    fn dummy_ies() -> IeSnapshot {
        IeSnapshot {
            is_initial: true,
            attach_type: AttachType::Eps,
            is_native_sc: false,
            ksi: Ksi::NONE,
            is_native_guti: false,
            guti: None,
            imsi: None,
            imei: None,
            last_visited_registered_tai: None,
            originating_tai: Tai { plmn: plmn(), tac: 1 },
            originating_ecgi: Ecgi { plmn: plmn(), cell_identity: 1 },
            ue_network_capability: UeNetworkCapability(vec![0xe6, 0x04]),
            ms_network_capability: None,
            drx_parameter: None,
            esm_msg: None,
            decode_status: DecodeStatus::Ok,
            mac_verified: false,
        }
    }

    #[test]
    fn only_one_attach_procedure_at_a_time() {
        let mut reg = ProcedureRegistry::default();
        let ue = UeId(1);
        reg.new_attach(ue, dummy_ies()).unwrap();
        let err = reg.new_attach(ue, dummy_ies()).unwrap_err();
        assert_eq!(err, EmmError::Busy(ue));
    }

    #[test]
    fn delete_then_new_attach_succeeds() {
        let mut reg = ProcedureRegistry::default();
        let ue = UeId(1);
        reg.new_attach(ue, dummy_ies()).unwrap();
        reg.delete_attach();
        assert!(reg.new_attach(ue, dummy_ies()).is_ok());
    }

    #[test]
    fn common_procedures_of_different_kinds_coexist() {
        let mut reg = ProcedureRegistry::default();
        let ue = UeId(1);
        reg.start_identification(ue, IdentityType::Imsi, true).unwrap();
        assert!(reg.start_authentication(ue).is_ok());
        assert!(reg.is_common_running(CommonProcedureKind::Identification));
        assert!(reg.is_common_running(CommonProcedureKind::Authentication));
    }

    #[test]
    fn duplicate_common_procedure_of_same_kind_is_busy() {
        let mut reg = ProcedureRegistry::default();
        let ue = UeId(1);
        reg.start_authentication(ue).unwrap();
        let err = reg.start_authentication(ue).unwrap_err();
        assert_eq!(err, EmmError::Busy(ue));
    }

    #[test]
    fn clearing_a_common_procedure_frees_its_slot() {
        let mut reg = ProcedureRegistry::default();
        let ue = UeId(1);
        reg.start_identification(ue, IdentityType::Imsi, true).unwrap();
        reg.clear_common(CommonProcedureKind::Identification);
        assert!(!reg.is_common_running(CommonProcedureKind::Identification));
        assert!(reg.start_identification(ue, IdentityType::Imei, false).is_ok());
    }
}
