//! Attach Procedure Engine (`spec.md` §4.7): ingress classification,
//! run-step branching, Accept composition, T3450 supervision, Complete
//! and Reject/Abort handling.
//!
//! Grounded on `examples/original_source/SRC/NAS/EMM/Attach.c`'s
//! `emm_proc_attach_request`/`_emm_attach_ies_have_changed`/
//! `_emm_attach_accept`/`_emm_attach_abort` family, with the
//! function-pointer continuations replaced by the plain decision
//! functions below: `crate::mme` drives timers and NAS I/O around them,
//! the same split `crate::ident`/`crate::auth`/`crate::smc` use.

use crate::cause::EmmCause;
use crate::config::MmeConfig;
use crate::context::{EmmContext, EmmState};
use crate::nas::{AttachAccept, AttachReject};
use crate::procedures::{AttachProc, CommonProcedureKind};
use crate::types::{ies_have_changed, AttachType, GutiSlot, IeSnapshot};

/// §4.7.1 step 2.
pub fn emergency_gate_blocks(attach_type: AttachType, config: &MmeConfig) -> bool {
    attach_type == AttachType::Emergency && !config.emergency_bearer_services_supported
}

/// What the ingress classifier decided to do with an already-existing
/// context (§4.7.1 step 3). `abort_smc`/`abort_identification` are
/// orthogonal to `action`: whichever common procedures are running get
/// cleared regardless of which row of the table matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollisionDecision {
    pub abort_smc: bool,
    pub abort_identification: bool,
    pub action: CollisionAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollisionAction {
    /// No specific Attach running (or case f, `EMM_REGISTERED` with
    /// nothing running): create a fresh Attach.
    CreateNew,
    /// IEs unchanged versus the running Attach: drop the new request
    /// silently, let the existing procedure continue.
    Drop,
    /// IEs changed versus the running Attach: abort it and create a new
    /// one, re-running the classifier's caller from scratch.
    AbortAttachCreateNew,
    /// Accept already sent, IEs unchanged (abnormal case d.2): resend
    /// Accept without bumping `attach_accept_sent`.
    ResendAccept,
}

/// Classifies a new Attach Request against whatever is already running
/// for this context (§4.7.1 step 3 / TS 24.301 §5.5.1.2.7 cases d/e/f).
pub fn classify_collision(ctx: &EmmContext, new_ies: &IeSnapshot) -> CollisionDecision {
    let abort_smc = ctx.procedures.is_common_running(CommonProcedureKind::SecurityModeControl);

    if let Some(attach) = ctx.procedures.get_specific_attach() {
        let ies_changed = ies_have_changed(&attach.ies, new_ies);

        if attach.attach_accept_sent > 0 && !attach.attach_complete_received {
            // Case d.
            return CollisionDecision {
                abort_smc,
                abort_identification: false,
                action: if ies_changed {
                    CollisionAction::AbortAttachCreateNew
                } else {
                    CollisionAction::ResendAccept
                },
            };
        }

        let ident_running = ctx.procedures.is_common_running(CommonProcedureKind::Identification);
        return CollisionDecision {
            abort_smc,
            abort_identification: ident_running && ies_changed,
            // Case e (and the Identification-with-Attach-in-progress rows,
            // which follow the same changed/unchanged split).
            action: if ies_changed {
                CollisionAction::AbortAttachCreateNew
            } else {
                CollisionAction::Drop
            },
        };
    }

    // No specific Attach running. Identification alone (no Attach) still
    // resolves to a fresh Attach; so does case f (context REGISTERED,
    // nothing running) per the Open Question decision in DESIGN.md.
    CollisionDecision { abort_smc, abort_identification: false, action: CollisionAction::CreateNew }
}

/// §4.7.2 run-step branch, decided from the Attach Request's identity
/// IEs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunBranch {
    /// IMSI present and the request's NAS-integrity MAC already verified
    /// against an existing security context: go straight to
    /// Authentication.
    SkipIdentification,
    /// IMSI present but unverified, or GUTI present without IMSI: run
    /// Identification first.
    StartIdentification,
    /// IMEI present and no IMSI/GUTI: emergency fast path, left
    /// implementation-defined by `spec.md` §4.7.2/§9. Resolved in
    /// DESIGN.md: skip Authentication/SMC, go straight to ESM hand-off.
    EmergencyImeiOnly,
}

pub fn classify_run(ies: &IeSnapshot) -> RunBranch {
    if ies.imei.is_some() && ies.imsi.is_none() && ies.guti.is_none() {
        RunBranch::EmergencyImeiOnly
    } else if ies.imsi.is_some() && ies.mac_verified {
        RunBranch::SkipIdentification
    } else {
        RunBranch::StartIdentification
    }
}

/// Composes and applies an Attach Accept (§4.7.3). `allocate_guti` is
/// called only if the context has no currently-valid GUTI.
pub fn build_attach_accept(
    ctx: &mut EmmContext,
    proc: &mut AttachProc,
    config: &MmeConfig,
    esm_msg_out: Vec<u8>,
    allocate_guti: impl FnOnce() -> Result<crate::types::Guti, crate::error::ProcedureFailure>,
) -> Result<AttachAccept, crate::error::ProcedureFailure> {
    if let Some(imsi) = &proc.ies.imsi {
        ctx.imsi = Some(imsi.clone());
    }
    if let Some(imei) = &proc.ies.imei {
        ctx.imei = Some(imei.clone());
    }
    ctx.last_visited_registered_tai = proc.ies.last_visited_registered_tai;
    ctx.originating_tai = Some(proc.ies.originating_tai);
    ctx.originating_ecgi = Some(proc.ies.originating_ecgi);

    let needs_allocation = !matches!(ctx.guti, Some(slot) if slot.valid);
    if needs_allocation {
        let new_guti = allocate_guti()?;
        ctx.guti = Some(GutiSlot { guti: new_guti, valid: false });
    }
    proc.assigned_guti = ctx.guti.map(|slot| slot.guti);

    let (eea, eia) = ctx
        .security
        .as_ref()
        .and_then(|s| Some((s.selected_eea?, s.selected_eia?)))
        .ok_or(crate::error::ProcedureFailure::ProtocolViolation)?;

    proc.esm_msg_out = Some(esm_msg_out.clone());
    proc.attach_accept_sent += 1;

    Ok(AttachAccept {
        assigned_guti: proc.assigned_guti,
        t3402_secs: config.t3402_secs,
        eps_network_feature_support: config.eps_network_feature_support,
        selected_eea: eea,
        selected_eia: eia,
        esm_msg: esm_msg_out,
    })
}

/// Rebuilds the same Attach Accept content for a case-d.2 resend,
/// without touching `attach_accept_sent` (done by the caller, see
/// [`on_t3450_expiry`] and the ingress resend path).
pub fn rebuild_attach_accept(ctx: &EmmContext, proc: &AttachProc, config: &MmeConfig) -> Option<AttachAccept> {
    let (eea, eia) = ctx.security.as_ref().and_then(|s| Some((s.selected_eea?, s.selected_eia?)))?;
    Some(AttachAccept {
        assigned_guti: proc.assigned_guti,
        t3402_secs: config.t3402_secs,
        eps_network_feature_support: config.eps_network_feature_support,
        selected_eea: eea,
        selected_eia: eia,
        esm_msg: proc.esm_msg_out.clone().unwrap_or_default(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum T3450Outcome {
    Resend(AttachAccept),
    Abort,
}

/// §4.7.4: resend while under `attach_counter_max`, abort on the Nth
/// expiry.
pub fn on_t3450_expiry(ctx: &EmmContext, proc: &mut AttachProc, config: &MmeConfig) -> T3450Outcome {
    if proc.attach_accept_sent >= config.attach_counter_max {
        return T3450Outcome::Abort;
    }
    match rebuild_attach_accept(ctx, proc, config) {
        Some(accept) => {
            proc.attach_accept_sent += 1;
            T3450Outcome::Resend(accept)
        }
        None => T3450Outcome::Abort,
    }
}

/// §4.7.5: Attach Complete. Returns `Err(())` if no Attach is running,
/// in which case the caller discards the message silently.
pub fn on_complete(ctx: &mut EmmContext) -> Result<(), ()> {
    let assigned_guti = {
        let proc = ctx.procedures.get_specific_attach_mut().ok_or(())?;
        proc.attach_complete_received = true;
        proc.assigned_guti
    };
    if let Some(guti) = assigned_guti {
        ctx.guti = Some(GutiSlot { guti, valid: true });
    }
    ctx.old_guti = None;
    ctx.is_attached = true;
    ctx.procedures.delete_attach();
    ctx.emm_state = EmmState::Registered;
    Ok(())
}

/// §4.7.2 terminal failure / §5 cancellation: reject the Attach with
/// `cause`, carrying any stashed ESM reject PDU.
pub fn reject(ctx: &mut EmmContext, cause: EmmCause) -> AttachReject {
    let esm_reject_pdu = ctx.procedures.get_specific_attach_mut().and_then(|p| {
        p.attach_reject_sent = true;
        p.esm_msg_out.take()
    });
    ctx.procedures.delete_attach();
    ctx.emm_state = EmmState::Deregistered;
    AttachReject { emm_cause: cause, esm_reject_pdu }
}

/// T3450-exhaustion abort (§4.7.4) or any other cancellation that
/// notifies the peer with `EMMREG_ATTACH_ABORT` rather than a Reject.
pub fn abort(ctx: &mut EmmContext) {
    ctx.procedures.delete_attach();
    ctx.emm_state = EmmState::Deregistered;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DecodeStatus, Ecgi, Imsi, Ksi, PlmnId, Tai, UeId, UeNetworkCapability};

    fn plmn() -> PlmnId {
        PlmnId { mcc: [2, 0, 8], mnc: [9, 3, 0] }
    }

    fn ies(imsi: Option<Imsi>, mac_verified: bool) -> IeSnapshot {
        IeSnapshot {
            is_initial: true,
            attach_type: AttachType::Eps,
            is_native_sc: false,
            ksi: Ksi(0),
            is_native_guti: false,
            guti: None,
            imsi,
            imei: None,
            last_visited_registered_tai: None,
            originating_tai: Tai { plmn: plmn(), tac: 1 },
            originating_ecgi: Ecgi { plmn: plmn(), cell_identity: 1 },
            ue_network_capability: UeNetworkCapability(vec![0xe6, 0x04]),
            ms_network_capability: None,
            drx_parameter: None,
            esm_msg: Some(vec![1, 2, 3]),
            decode_status: DecodeStatus::Ok,
            mac_verified,
        }
    }

    #[test]
    fn emergency_attach_is_blocked_when_disabled() {
        let mut cfg = MmeConfig::default();
        cfg.emergency_bearer_services_supported = false;
        assert!(emergency_gate_blocks(AttachType::Emergency, &cfg));
        assert!(!emergency_gate_blocks(AttachType::Eps, &cfg));
    }

    #[test]
    fn run_branch_skips_identification_when_mac_verified() {
        let snapshot = ies(Some(Imsi("001010000000001".into())), true);
        assert_eq!(classify_run(&snapshot), RunBranch::SkipIdentification);
    }

    #[test]
    fn run_branch_starts_identification_when_mac_unverified() {
        let snapshot = ies(Some(Imsi("001010000000001".into())), false);
        assert_eq!(classify_run(&snapshot), RunBranch::StartIdentification);
    }

    #[test]
    fn no_running_attach_creates_new() {
        let ctx = EmmContext::new(UeId(1));
        let decision = classify_collision(&ctx, &ies(None, false));
        assert_eq!(decision.action, CollisionAction::CreateNew);
    }

    #[test]
    fn unchanged_retransmit_after_accept_resends_without_incrementing() {
        let mut ctx = EmmContext::new(UeId(1));
        let original = ies(Some(Imsi("001010000000001".into())), true);
        ctx.procedures.new_attach(ctx.ue_id, original.clone()).unwrap();
        ctx.procedures.get_specific_attach_mut().unwrap().attach_accept_sent = 1;

        let decision = classify_collision(&ctx, &original);
        assert_eq!(decision.action, CollisionAction::ResendAccept);
    }

    #[test]
    fn changed_retransmit_after_accept_aborts_and_creates_new() {
        let mut ctx = EmmContext::new(UeId(1));
        let original = ies(Some(Imsi("001010000000001".into())), true);
        ctx.procedures.new_attach(ctx.ue_id, original).unwrap();
        ctx.procedures.get_specific_attach_mut().unwrap().attach_accept_sent = 1;

        let changed = ies(Some(Imsi("001010000000002".into())), true);
        let decision = classify_collision(&ctx, &changed);
        assert_eq!(decision.action, CollisionAction::AbortAttachCreateNew);
    }

    #[test]
    fn unchanged_retransmit_before_accept_is_dropped() {
        let mut ctx = EmmContext::new(UeId(1));
        let original = ies(Some(Imsi("001010000000001".into())), true);
        ctx.procedures.new_attach(ctx.ue_id, original.clone()).unwrap();

        let decision = classify_collision(&ctx, &original);
        assert_eq!(decision.action, CollisionAction::Drop);
    }

    #[test]
    fn t3450_expiry_resends_until_counter_max_then_aborts() {
        let mut ctx = EmmContext::new(UeId(1));
        let snapshot = ies(Some(Imsi("001010000000001".into())), true);
        ctx.procedures.new_attach(ctx.ue_id, snapshot).unwrap();
        ctx.security = Some({
            let mut sc = crate::security::SecurityContext::default();
            sc.selected_eea = Some(crate::config::EeaAlgorithm::Eea2);
            sc.selected_eia = Some(crate::config::EiaAlgorithm::Eia2);
            sc
        });
        let cfg = MmeConfig::default();

        {
            let proc = ctx.procedures.get_specific_attach_mut().unwrap();
            proc.attach_accept_sent = 1;
        }

        for _ in 0..(cfg.attach_counter_max - 1) {
            let mut proc = ctx.procedures.get_specific_attach().unwrap().clone();
            match on_t3450_expiry(&ctx, &mut proc, &cfg) {
                T3450Outcome::Resend(_) => {
                    *ctx.procedures.get_specific_attach_mut().unwrap() = proc;
                }
                T3450Outcome::Abort => panic!("should still be resending"),
            }
        }

        let mut proc = ctx.procedures.get_specific_attach().unwrap().clone();
        assert_eq!(on_t3450_expiry(&ctx, &mut proc, &cfg), T3450Outcome::Abort);
    }

    #[test]
    fn complete_marks_guti_valid_and_registers() {
        let mut ctx = EmmContext::new(UeId(1));
        let snapshot = ies(Some(Imsi("001010000000001".into())), true);
        ctx.procedures.new_attach(ctx.ue_id, snapshot).unwrap();
        let g = crate::types::Guti { plmn: plmn(), mme_group_id: 1, mme_code: 1, m_tmsi: 7 };
        ctx.procedures.get_specific_attach_mut().unwrap().assigned_guti = Some(g);

        on_complete(&mut ctx).unwrap();
        assert_eq!(ctx.emm_state, EmmState::Registered);
        assert!(ctx.is_attached);
        assert_eq!(ctx.guti, Some(GutiSlot { guti: g, valid: true }));
        assert!(ctx.procedures.get_specific_attach().is_none());
    }

    #[test]
    fn reject_clears_procedure_and_deregisters() {
        let mut ctx = EmmContext::new(UeId(1));
        let snapshot = ies(Some(Imsi("001010000000001".into())), true);
        ctx.procedures.new_attach(ctx.ue_id, snapshot).unwrap();
        let rej = reject(&mut ctx, EmmCause::IllegalUe);
        assert_eq!(rej.emm_cause, EmmCause::IllegalUe);
        assert_eq!(ctx.emm_state, EmmState::Deregistered);
        assert!(ctx.procedures.get_specific_attach().is_none());
    }
}
