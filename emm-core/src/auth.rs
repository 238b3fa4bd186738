//! Authentication common procedure (`spec.md` §4.5).

use crate::context::EmmContext;
use crate::error::ProcedureFailure;
use crate::nas::AuthenticationRequest;
use crate::procedures::CommonProcedureKind;
use crate::provider::{AuthVector, AuthVectorError, AuthVectorProvider};
use crate::security::SecurityContext;
use crate::types::{Imsi, Ksi};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeoutOutcome {
    Retransmit(AuthenticationRequest),
    Failure(ProcedureFailure),
}

/// Fetches a vector and starts Authentication, returning the request
/// message to transmit (§4.5). Split into [`imsi_for_vector_fetch`] +
/// [`apply_vector`] so callers holding a context lock that can't be held
/// across an `.await` (e.g. `crate::mme`) can fetch the vector outside
/// the lock and apply it afterwards.
pub async fn start(
    ctx: &mut EmmContext,
    provider: &dyn AuthVectorProvider,
) -> Result<AuthenticationRequest, ProcedureFailure> {
    let imsi = imsi_for_vector_fetch(ctx)?;
    let vector = fetch_vector(&imsi, provider).await?;
    apply_vector(ctx, vector)
}

/// Reads the IMSI a vector fetch should be keyed on.
pub fn imsi_for_vector_fetch(ctx: &EmmContext) -> Result<Imsi, ProcedureFailure> {
    ctx.imsi.clone().ok_or(ProcedureFailure::ProtocolViolation)
}

pub async fn fetch_vector(imsi: &Imsi, provider: &dyn AuthVectorProvider) -> Result<AuthVector, ProcedureFailure> {
    provider.get_vector(imsi).await.map_err(|e| match e {
        AuthVectorError::UnknownSubscriber => ProcedureFailure::AuthFailure,
        AuthVectorError::Unavailable => ProcedureFailure::ResourceExhausted,
    })
}

/// Applies an already-fetched vector: pushes the Authentication record
/// and stashes the pending security context / expected RES.
pub fn apply_vector(ctx: &mut EmmContext, vector: AuthVector) -> Result<AuthenticationRequest, ProcedureFailure> {
    ctx.procedures
        .start_authentication(ctx.ue_id)
        .map_err(|_| ProcedureFailure::ResourceExhausted)?;
    let request = AuthenticationRequest {
        rand: vector.rand,
        autn: vector.autn,
    };
    ctx.non_current_security = Some(pending_security_context(vector.kasme, ctx.ksi));
    ctx.pending_xres = Some(vector.xres);
    Ok(request)
}

fn pending_security_context(kasme: Vec<u8>, ksi: Ksi) -> SecurityContext {
    let next_ksi = Ksi((ksi.0 + 1) % 7);
    SecurityContext::new_native(next_ksi, kasme)
}

/// Applies an Authentication Response: RES vs XRES comparison is plain
/// byte equality, not a cryptographic algorithm, so it's done here
/// directly (§1 Non-goals only excludes implementing the algorithms
/// themselves).
pub fn on_response(ctx: &mut EmmContext, res: Vec<u8>) -> Result<(), ProcedureFailure> {
    let xres = ctx.pending_xres.take();
    ctx.procedures.clear_common(CommonProcedureKind::Authentication);
    match xres {
        Some(xres) if xres == res => {
            if let Some(sc) = ctx.non_current_security.take() {
                ctx.security = Some(sc);
            }
            Ok(())
        }
        _ => {
            ctx.non_current_security = None;
            Err(ProcedureFailure::AuthFailure)
        }
    }
}

/// Applies a synchronization failure (AUTS): the caller is expected to
/// re-fetch a fresh vector once before giving up (§4.5). Mirrors the
/// `start`/`apply_vector` split: [`prepare_resync`] decides whether a
/// refetch is warranted (and returns the IMSI to key it on), the caller
/// fetches outside any lock, then [`apply_resync_vector`] installs it.
pub async fn on_sync_failure(
    ctx: &mut EmmContext,
    provider: &dyn AuthVectorProvider,
) -> Result<AuthenticationRequest, ProcedureFailure> {
    let imsi = prepare_resync(ctx)?;
    let vector = fetch_vector(&imsi, provider).await?;
    Ok(apply_resync_vector(ctx, vector))
}

/// Returns `Err` if a resync was already attempted (terminal per §4.5),
/// otherwise marks the retry and returns the IMSI to fetch a fresh
/// vector for.
pub fn prepare_resync(ctx: &mut EmmContext) -> Result<Imsi, ProcedureFailure> {
    let already_retried = ctx
        .procedures
        .authentication_mut()
        .map(|p| p.resync_attempted)
        .unwrap_or(false);
    if already_retried {
        ctx.procedures.clear_common(CommonProcedureKind::Authentication);
        ctx.non_current_security = None;
        ctx.pending_xres = None;
        return Err(ProcedureFailure::AuthFailure);
    }
    if let Some(p) = ctx.procedures.authentication_mut() {
        p.resync_attempted = true;
    }
    imsi_for_vector_fetch(ctx)
}

pub fn apply_resync_vector(ctx: &mut EmmContext, vector: AuthVector) -> AuthenticationRequest {
    ctx.non_current_security = Some(pending_security_context(vector.kasme, ctx.ksi));
    ctx.pending_xres = Some(vector.xres);
    AuthenticationRequest { rand: vector.rand, autn: vector.autn }
}

pub fn on_failure(ctx: &mut EmmContext, emm_cause: crate::cause::EmmCause) -> ProcedureFailure {
    ctx.procedures.clear_common(CommonProcedureKind::Authentication);
    ctx.non_current_security = None;
    ctx.pending_xres = None;
    ProcedureFailure::Transient(emm_cause)
}

pub fn on_timeout(ctx: &mut EmmContext, counter_max: u8, request: AuthenticationRequest) -> TimeoutOutcome {
    let exhausted = match ctx.procedures.authentication_mut() {
        Some(p) => {
            p.retransmit_count += 1;
            p.retransmit_count > counter_max
        }
        None => return TimeoutOutcome::Failure(ProcedureFailure::ProtocolViolation),
    };
    if exhausted {
        ctx.procedures.clear_common(CommonProcedureKind::Authentication);
        ctx.non_current_security = None;
        ctx.pending_xres = None;
        TimeoutOutcome::Failure(ProcedureFailure::AuthFailure)
    } else {
        TimeoutOutcome::Retransmit(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UeId;
    use async_trait::async_trait;

    struct FixedVectorProvider {
        vector: AuthVector,
    }

    #[async_trait]
    impl AuthVectorProvider for FixedVectorProvider {
        async fn get_vector(&self, _imsi: &Imsi) -> Result<AuthVector, AuthVectorError> {
            Ok(self.vector.clone())
        }
    }

    fn provider() -> FixedVectorProvider {
        FixedVectorProvider {
            vector: AuthVector {
                rand: vec![1; 16],
                autn: vec![2; 16],
                xres: vec![3; 8],
                kasme: vec![4; 32],
            },
        }
    }

    fn ctx() -> EmmContext {
        let mut c = EmmContext::new(UeId(1));
        c.imsi = Some(Imsi("001010000000001".into()));
        c
    }

    #[tokio::test]
    async fn matching_res_activates_pending_security_context() {
        let mut c = ctx();
        start(&mut c, &provider()).await.unwrap();
        on_response(&mut c, vec![3; 8]).unwrap();
        assert!(c.security.is_some());
        assert!(c.non_current_security.is_none());
    }

    #[tokio::test]
    async fn mismatched_res_fails_and_drops_pending_context() {
        let mut c = ctx();
        start(&mut c, &provider()).await.unwrap();
        let err = on_response(&mut c, vec![9; 8]).unwrap_err();
        assert_eq!(err, ProcedureFailure::AuthFailure);
        assert!(c.security.is_none());
        assert!(c.non_current_security.is_none());
    }

    #[tokio::test]
    async fn second_sync_failure_is_terminal() {
        let mut c = ctx();
        start(&mut c, &provider()).await.unwrap();
        on_sync_failure(&mut c, &provider()).await.unwrap();
        let err = on_sync_failure(&mut c, &provider()).await.unwrap_err();
        assert_eq!(err, ProcedureFailure::AuthFailure);
    }
}
