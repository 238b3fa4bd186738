//! Identification common procedure (`spec.md` §4.4).
//!
//! Pure decision logic: arming the T3470 timer and actually transmitting
//! the NAS message is the caller's job (`crate::mme`), mirroring how the
//! teacher keeps its `analysis` modules free of I/O and lets the daemon
//! shell drive them (`examples/BeigeBox-rayhunter/lib/src/analysis/`).

use crate::context::EmmContext;
use crate::error::ProcedureFailure;
use crate::nas::{IdentityRequest, IdentityValue};
use crate::procedures::IdentityType;

/// What the caller should do after a T3470 expiry (§4.4: "retransmit up
/// to 4 times, then invoke `failure_cb`").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeoutOutcome {
    Retransmit(IdentityRequest),
    Failure(ProcedureFailure),
}

/// Starts Identification, pushing the procedure record into the
/// context's registry and returning the request message to transmit.
pub fn start(
    ctx: &mut EmmContext,
    requested_type: IdentityType,
    is_cause_is_attach: bool,
) -> Result<IdentityRequest, crate::error::EmmError> {
    ctx.procedures
        .start_identification(ctx.ue_id, requested_type, is_cause_is_attach)?;
    Ok(IdentityRequest { requested_type })
}

/// Applies an Identity Response: stores the returned identity on the
/// context and clears the procedure. There is no failure branch in
/// §4.4's response handling — any well-formed response succeeds.
pub fn on_response(ctx: &mut EmmContext, value: IdentityValue) {
    match value {
        IdentityValue::Imsi(imsi) => ctx.imsi = Some(imsi),
        IdentityValue::Imei(imei) => ctx.imei = Some(imei),
        IdentityValue::Imeisv(imeisv) => ctx.imeisv = Some(imeisv),
        IdentityValue::Tmsi(_) => {}
    }
    ctx.procedures
        .clear_common(crate::procedures::CommonProcedureKind::Identification);
}

/// Drives a T3470 expiry: retransmit while under the configured limit,
/// otherwise fail and clear the procedure.
pub fn on_timeout(ctx: &mut EmmContext, counter_max: u8) -> TimeoutOutcome {
    let requested_type = match ctx.procedures.identification_mut() {
        Some(p) => {
            p.retransmit_count += 1;
            if p.retransmit_count > counter_max {
                None
            } else {
                Some(p.requested_type)
            }
        }
        None => return TimeoutOutcome::Failure(ProcedureFailure::ProtocolViolation),
    };

    match requested_type {
        Some(requested_type) => TimeoutOutcome::Retransmit(IdentityRequest { requested_type }),
        None => {
            ctx.procedures
                .clear_common(crate::procedures::CommonProcedureKind::Identification);
            TimeoutOutcome::Failure(ProcedureFailure::ProtocolViolation)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Ecgi, Imsi, PlmnId, Tai, UeId};

    fn plmn() -> PlmnId {
        PlmnId { mcc: [2, 0, 8], mnc: [9, 3, 0] }
    }

    fn ctx() -> EmmContext {
        let mut c = EmmContext::new(UeId(1));
        c.originating_tai = Some(Tai { plmn: plmn(), tac: 1 });
        c.originating_ecgi = Some(Ecgi { plmn: plmn(), cell_identity: 1 });
        c
    }

    #[test]
    fn start_then_response_populates_imsi_and_clears_procedure() {
        let mut c = ctx();
        start(&mut c, IdentityType::Imsi, true).unwrap();
        assert!(c.procedures.identification_mut().is_some());
        on_response(&mut c, IdentityValue::Imsi(Imsi("001010000000001".into())));
        assert_eq!(c.imsi, Some(Imsi("001010000000001".into())));
        assert!(c.procedures.identification_mut().is_none());
    }

    #[test]
    fn timeout_retransmits_until_counter_max() {
        let mut c = ctx();
        start(&mut c, IdentityType::Imsi, true).unwrap();
        for _ in 0..4 {
            match on_timeout(&mut c, 4) {
                TimeoutOutcome::Retransmit(_) => {}
                TimeoutOutcome::Failure(_) => panic!("should still be retransmitting"),
            }
        }
        match on_timeout(&mut c, 4) {
            TimeoutOutcome::Failure(_) => {}
            TimeoutOutcome::Retransmit(_) => panic!("should have failed after 4 retransmits"),
        }
        assert!(c.procedures.identification_mut().is_none());
    }
}
