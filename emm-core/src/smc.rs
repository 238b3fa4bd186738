//! Security Mode Control common procedure (`spec.md` §4.6).

use crate::config::MmeConfig;
use crate::context::EmmContext;
use crate::error::ProcedureFailure;
use crate::nas::SecurityModeCommand;
use crate::procedures::CommonProcedureKind;
use crate::security::{select_algorithms, SecurityContext};
use crate::types::Ksi;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeoutOutcome {
    Retransmit(SecurityModeCommand),
    Failure(ProcedureFailure),
}

/// Clears the current security context, selects algorithms, and returns
/// the Security Mode Command to transmit (§4.6).
pub fn start(
    ctx: &mut EmmContext,
    ksi: Ksi,
    ue_eea: &[crate::config::EeaAlgorithm],
    ue_eia: &[crate::config::EiaAlgorithm],
    config: &MmeConfig,
) -> Result<SecurityModeCommand, ProcedureFailure> {
    ctx.security = None;
    let pending = ctx
        .non_current_security
        .take()
        .unwrap_or_else(|| SecurityContext::new_native(ksi, Vec::new()));

    let (eea, eia) = select_algorithms(ue_eea, ue_eia, config)
        .map_err(|_| ProcedureFailure::ProtocolViolation)?;

    let mut pending = pending;
    pending.selected_eea = Some(eea);
    pending.selected_eia = Some(eia);
    ctx.non_current_security = Some(pending);

    ctx.procedures
        .start_security_mode(ctx.ue_id, ksi)
        .map_err(|_| ProcedureFailure::ResourceExhausted)?;

    Ok(SecurityModeCommand { selected_eea: eea, selected_eia: eia, ksi })
}

/// Activates the pending Security Context on Security Mode Complete
/// (§3.3 invariant 3, §4.6).
pub fn on_complete(ctx: &mut EmmContext) -> Result<(), ProcedureFailure> {
    ctx.procedures.clear_common(CommonProcedureKind::SecurityModeControl);
    match ctx.non_current_security.take() {
        Some(mut sc) => {
            sc.activated = true;
            ctx.security = Some(sc);
            Ok(())
        }
        None => Err(ProcedureFailure::ProtocolViolation),
    }
}

pub fn on_reject(ctx: &mut EmmContext, emm_cause: crate::cause::EmmCause) -> ProcedureFailure {
    ctx.procedures.clear_common(CommonProcedureKind::SecurityModeControl);
    ctx.non_current_security = None;
    ProcedureFailure::Transient(emm_cause)
}

pub fn on_timeout(
    ctx: &mut EmmContext,
    counter_max: u8,
    command: SecurityModeCommand,
) -> TimeoutOutcome {
    let exhausted = match ctx.procedures.security_mode_mut() {
        Some(p) => {
            p.retransmit_count += 1;
            p.retransmit_count > counter_max
        }
        None => return TimeoutOutcome::Failure(ProcedureFailure::ProtocolViolation),
    };
    if exhausted {
        ctx.procedures.clear_common(CommonProcedureKind::SecurityModeControl);
        ctx.non_current_security = None;
        TimeoutOutcome::Failure(ProcedureFailure::ProtocolViolation)
    } else {
        TimeoutOutcome::Retransmit(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EeaAlgorithm, EiaAlgorithm};
    use crate::types::UeId;

    fn ctx() -> EmmContext {
        EmmContext::new(UeId(1))
    }

    #[test]
    fn start_selects_algorithms_and_stashes_pending_context() {
        let mut c = ctx();
        let cfg = MmeConfig::default();
        let cmd = start(
            &mut c,
            Ksi(0),
            &[EeaAlgorithm::Eea1, EeaAlgorithm::Eea2],
            &[EiaAlgorithm::Eia1, EiaAlgorithm::Eia2],
            &cfg,
        )
        .unwrap();
        assert_eq!(cmd.selected_eea, EeaAlgorithm::Eea2);
        assert_eq!(cmd.selected_eia, EiaAlgorithm::Eia2);
        assert!(c.non_current_security.is_some());
    }

    #[test]
    fn complete_activates_the_security_context() {
        let mut c = ctx();
        let cfg = MmeConfig::default();
        start(&mut c, Ksi(0), &[EeaAlgorithm::Eea2], &[EiaAlgorithm::Eia2], &cfg).unwrap();
        on_complete(&mut c).unwrap();
        assert!(c.security.as_ref().unwrap().activated);
        assert!(c.non_current_security.is_none());
    }

    #[test]
    fn reject_clears_pending_context_without_activating() {
        let mut c = ctx();
        let cfg = MmeConfig::default();
        start(&mut c, Ksi(0), &[EeaAlgorithm::Eea2], &[EiaAlgorithm::Eia2], &cfg).unwrap();
        on_reject(&mut c, crate::cause::EmmCause::IllegalUe);
        assert!(c.security.is_none());
        assert!(c.non_current_security.is_none());
    }
}
