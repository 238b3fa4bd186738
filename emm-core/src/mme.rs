//! Process-wide MME handle (`spec.md` §9 Design Notes: "the original
//! `_emm_data` and `mme_app_desc` globals become an explicit process-wide
//! handle passed into each API call").
//!
//! `Mme` is the imperative shell: it owns the [`ContextStore`], arms
//! timers, and drives the external collaborators ([`NasSink`],
//! [`EsmPeer`], [`AuthVectorProvider`], [`SapSink`]) around the pure
//! decision logic in [`crate::attach`]/[`crate::ident`]/[`crate::auth`]/
//! [`crate::smc`]. Cloning an `Mme` is cheap (`Arc` inside), the same
//! handle style as the teacher's `DeviceInfoHandle`
//! (`examples/BeigeBox-rayhunter/daemon/src/display/mod.rs`).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::attach::{self, CollisionAction};
use crate::auth;
use crate::cause::EmmCause;
use crate::config::MmeConfig;
use crate::context::{ContextStore, EmmContext};
use crate::error::ProcedureFailure;
use crate::esm::{EsmOutcome, EsmPeer};
use crate::ident;
use crate::nas::{
    AttachReject, AuthenticationOutcome, AuthenticationRequest, IdentityValue, IngressMeta,
    NasSink, SecurityModeCommand, SecurityModeOutcome,
};
use crate::procedures::{AttachProc, CommonProcedureKind, IdentityType};
use crate::provider::AuthVectorProvider;
use crate::sap::{EmmAsPrimitive, EmmRegPrimitive, SapSink};
use crate::smc;
use crate::types::{Guti, GutiSlot, IeSnapshot, PlmnId, UeId};

struct MmeInner {
    config: MmeConfig,
    store: ContextStore,
    nas: Arc<dyn NasSink>,
    esm: Arc<dyn EsmPeer>,
    auth_provider: Arc<dyn AuthVectorProvider>,
    sap: Arc<dyn SapSink>,
    plmn: PlmnId,
    mme_group_id: u16,
    mme_code: u8,
    next_ue_id: AtomicU32,
    next_m_tmsi: AtomicU32,
    /// Last Authentication Request sent per UE, kept so a T3460 expiry can
    /// resend the same RAND/AUTN (§4.5) without re-fetching a vector.
    last_auth_request: Mutex<HashMap<UeId, AuthenticationRequest>>,
    /// Last Security Mode Command sent per UE, for the same reason (§4.6).
    last_smc_command: Mutex<HashMap<UeId, SecurityModeCommand>>,
}

/// Process-wide handle tying the Context Store, timers, and every
/// external collaborator together.
#[derive(Clone)]
pub struct Mme {
    inner: Arc<MmeInner>,
}

impl Mme {
    pub fn new(
        config: MmeConfig,
        nas: Arc<dyn NasSink>,
        esm: Arc<dyn EsmPeer>,
        auth_provider: Arc<dyn AuthVectorProvider>,
        sap: Arc<dyn SapSink>,
        plmn: PlmnId,
        mme_group_id: u16,
        mme_code: u8,
    ) -> Self {
        Mme {
            inner: Arc::new(MmeInner {
                config,
                store: ContextStore::new(),
                nas,
                esm,
                auth_provider,
                sap,
                plmn,
                mme_group_id,
                mme_code,
                next_ue_id: AtomicU32::new(1),
                next_m_tmsi: AtomicU32::new(1),
                last_auth_request: Mutex::new(HashMap::new()),
                last_smc_command: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Access to the underlying store, for callers (scenario drivers,
    /// tests) that need to inspect context state directly.
    pub fn store(&self) -> &ContextStore {
        &self.inner.store
    }

    fn allocate_guti(&self) -> Result<Guti, ProcedureFailure> {
        let m_tmsi = self.inner.next_m_tmsi.fetch_add(1, Ordering::Relaxed);
        Ok(Guti {
            plmn: self.inner.plmn,
            mme_group_id: self.inner.mme_group_id,
            mme_code: self.inner.mme_code,
            m_tmsi,
        })
    }

    /// Entry point for an inbound Attach Request (§4.7.1). Returns the
    /// `ue_id` the request was resolved to, new or existing.
    pub async fn handle_attach_request(&self, meta: IngressMeta, ies: IeSnapshot) -> UeId {
        let ue_id = self.resolve_context(meta, &ies).await;

        if attach::emergency_gate_blocks(ies.attach_type, &self.inner.config) {
            self.reject(ue_id, EmmCause::ImeiNotAccepted).await;
            return ue_id;
        }

        let decision = self
            .inner
            .store
            .with_context(ue_id, |ctx| attach::classify_collision(ctx, &ies))
            .await
            .expect("just resolved");

        if decision.abort_smc {
            let _ = self
                .inner
                .store
                .with_context_mut(ue_id, |ctx| {
                    ctx.procedures.clear_common(CommonProcedureKind::SecurityModeControl)
                })
                .await;
            self.inner.sap.emm_reg(EmmRegPrimitive::CommonProcAbort { ue_id }).await;
        }
        if decision.abort_identification {
            let _ = self
                .inner
                .store
                .with_context_mut(ue_id, |ctx| {
                    ctx.procedures.clear_common(CommonProcedureKind::Identification)
                })
                .await;
            self.inner.sap.emm_reg(EmmRegPrimitive::CommonProcAbort { ue_id }).await;
        }

        match decision.action {
            CollisionAction::Drop => {}
            CollisionAction::ResendAccept => {
                self.resend_accept(ue_id).await;
                let _ = self
                    .inner
                    .store
                    .with_context_mut(ue_id, |ctx| ctx.num_attach_request += 1)
                    .await;
            }
            CollisionAction::AbortAttachCreateNew => {
                self.abort_attach(ue_id).await;
                self.create_and_run_attach(ue_id, ies).await;
            }
            CollisionAction::CreateNew => {
                self.create_and_run_attach(ue_id, ies).await;
            }
        }

        ue_id
    }

    async fn resolve_context(&self, meta: IngressMeta, ies: &IeSnapshot) -> UeId {
        let existing = if let Some(guti) = &ies.guti {
            self.inner.store.find_ue_id_by_guti(guti).await
        } else if let Some(imsi) = &ies.imsi {
            self.inner.store.find_ue_id_by_imsi(imsi).await
        } else {
            self.inner.store.find_ue_id_by_enb_key(meta.enb_key).await
        };

        let ue_id = match existing {
            Some(id) => id,
            None => {
                let id = UeId(self.inner.next_ue_id.fetch_add(1, Ordering::Relaxed));
                let _ = self.inner.store.insert(EmmContext::new(id)).await;
                id
            }
        };

        // Carry the claimed identity IEs onto the context before any
        // procedure runs: `run_step`/`auth::imsi_for_vector_fetch` read
        // `ctx.imsi`, not the Attach Request's own IEs, and a claimed
        // GUTI has to be indexed (unvalidated, per §3.3 invariant 6)
        // so a retransmission before Accept resolves to the same
        // context instead of minting a new one.
        let claimed_guti = ies.guti;
        let claimed_imsi = ies.imsi.clone();
        let claimed_imei = ies.imei.clone();
        let _ = self
            .inner
            .store
            .with_context_mut(ue_id, move |ctx| {
                if let Some(imsi) = claimed_imsi {
                    ctx.imsi = Some(imsi);
                }
                if let Some(imei) = claimed_imei {
                    ctx.imei = Some(imei);
                }
                if let Some(guti) = claimed_guti {
                    if ctx.guti.map(|slot| slot.guti) != Some(guti) {
                        ctx.guti = Some(GutiSlot { guti, valid: false });
                    }
                }
            })
            .await;

        let mismatched = self
            .inner
            .store
            .with_context(ue_id, |ctx| ctx.enb_key.is_some_and(|k| k != meta.enb_key))
            .await
            .unwrap_or(false);
        if mismatched {
            let is_initial = ies.is_initial;
            let _ = self
                .inner
                .store
                .with_context_mut(ue_id, move |ctx| {
                    crate::context::reconcile_duplicate_enb(ctx, meta.enb_key, is_initial)
                })
                .await;
        } else {
            let _ = self
                .inner
                .store
                .with_context_mut(ue_id, move |ctx| ctx.enb_key = Some(meta.enb_key))
                .await;
        }
        ue_id
    }

    async fn create_and_run_attach(&self, ue_id: UeId, ies: IeSnapshot) {
        let created = self
            .inner
            .store
            .with_context_mut(ue_id, |ctx| {
                ctx.num_attach_request += 1;
                ctx.procedures.new_attach(ue_id, ies.clone()).map(|_| ())
            })
            .await;
        if !matches!(created, Ok(Ok(()))) {
            return;
        }
        self.run_step(ue_id, ies).await;
    }

    async fn run_step(&self, ue_id: UeId, ies: IeSnapshot) {
        match attach::classify_run(&ies) {
            attach::RunBranch::SkipIdentification => self.start_authentication(ue_id).await,
            attach::RunBranch::StartIdentification => self.start_identification(ue_id).await,
            attach::RunBranch::EmergencyImeiOnly => self.esm_handoff(ue_id).await,
        }
    }

    async fn start_identification(&self, ue_id: UeId) {
        let started = self
            .inner
            .store
            .with_context_mut(ue_id, |ctx| ident::start(ctx, IdentityType::Imsi, true))
            .await;
        let Ok(Ok(request)) = started else { return };
        self.inner.nas.send_identity_request(ue_id, request).await;
        self.arm_t3470(ue_id).await;
    }

    pub async fn handle_identity_response(&self, ue_id: UeId, value: IdentityValue) {
        let updated = self
            .inner
            .store
            .with_context_mut(ue_id, |ctx| {
                ctx.t3470 = None;
                ident::on_response(ctx, value)
            })
            .await;
        if updated.is_err() {
            return;
        }
        let _ = self.inner.store.reindex(ue_id).await;
        self.start_authentication(ue_id).await;
    }

    async fn start_authentication(&self, ue_id: UeId) {
        let imsi = self
            .inner
            .store
            .with_context(ue_id, |ctx| auth::imsi_for_vector_fetch(ctx))
            .await;
        let Ok(Ok(imsi)) = imsi else {
            self.reject(ue_id, EmmCause::IllegalUe).await;
            return;
        };
        let vector = match auth::fetch_vector(&imsi, self.inner.auth_provider.as_ref()).await {
            Ok(v) => v,
            Err(_) => {
                self.reject(ue_id, EmmCause::IllegalUe).await;
                return;
            }
        };
        let applied = self
            .inner
            .store
            .with_context_mut(ue_id, |ctx| auth::apply_vector(ctx, vector))
            .await;
        let Ok(Ok(request)) = applied else {
            self.reject(ue_id, EmmCause::IllegalUe).await;
            return;
        };
        self.inner.last_auth_request.lock().await.insert(ue_id, request.clone());
        self.inner.nas.send_authentication_request(ue_id, request).await;
        self.arm_t3460(ue_id).await;
    }

    pub async fn handle_authentication_outcome(&self, ue_id: UeId, outcome: AuthenticationOutcome) {
        let _ = self.inner.store.with_context_mut(ue_id, |ctx| ctx.t3460 = None).await;
        match outcome {
            AuthenticationOutcome::Response { res } => {
                let result = self.inner.store.with_context_mut(ue_id, |ctx| auth::on_response(ctx, res)).await;
                self.inner.last_auth_request.lock().await.remove(&ue_id);
                match result {
                    Ok(Ok(())) => self.start_security_mode(ue_id).await,
                    _ => self.reject(ue_id, EmmCause::IllegalUe).await,
                }
            }
            AuthenticationOutcome::SyncFailure { auts: _ } => {
                let imsi = self.inner.store.with_context_mut(ue_id, |ctx| auth::prepare_resync(ctx)).await;
                match imsi {
                    Ok(Ok(imsi)) => match auth::fetch_vector(&imsi, self.inner.auth_provider.as_ref()).await {
                        Ok(vector) => {
                            let request = self
                                .inner
                                .store
                                .with_context_mut(ue_id, |ctx| auth::apply_resync_vector(ctx, vector))
                                .await;
                            if let Ok(request) = request {
                                self.inner.last_auth_request.lock().await.insert(ue_id, request.clone());
                                self.inner.nas.send_authentication_request(ue_id, request).await;
                                self.arm_t3460(ue_id).await;
                            } else {
                                self.reject(ue_id, EmmCause::IllegalUe).await;
                            }
                        }
                        Err(_) => self.reject(ue_id, EmmCause::IllegalUe).await,
                    },
                    _ => self.reject(ue_id, EmmCause::IllegalUe).await,
                }
            }
            AuthenticationOutcome::Failure { emm_cause } => {
                let failure = self
                    .inner
                    .store
                    .with_context_mut(ue_id, move |ctx| auth::on_failure(ctx, emm_cause))
                    .await;
                self.inner.last_auth_request.lock().await.remove(&ue_id);
                self.reject(ue_id, failure.map(|f| f.emm_cause()).unwrap_or(emm_cause)).await;
            }
        }
    }

    async fn start_security_mode(&self, ue_id: UeId) {
        let config = self.inner.config.clone();
        let command = self
            .inner
            .store
            .with_context_mut(ue_id, move |ctx| {
                let ksi = ctx.ksi;
                // Decoding the UE's advertised EEA/EIA lists out of the
                // opaque UE network capability bytes is out of scope
                // (`types::IeSnapshot` doc comment); treat the UE as
                // supporting the MME's whole configured priority list, so
                // selection always lands on the MME's own top choice.
                smc::start(ctx, ksi, &config.eea_priority, &config.eia_priority, &config)
            })
            .await;
        match command {
            Ok(Ok(command)) => {
                self.inner.last_smc_command.lock().await.insert(ue_id, command.clone());
                self.inner.nas.send_security_mode_command(ue_id, command).await;
                self.arm_t3460(ue_id).await;
            }
            _ => self.reject(ue_id, EmmCause::IllegalUe).await,
        }
    }

    pub async fn handle_security_mode_outcome(&self, ue_id: UeId, outcome: SecurityModeOutcome) {
        let _ = self.inner.store.with_context_mut(ue_id, |ctx| ctx.t3460 = None).await;
        self.inner.last_smc_command.lock().await.remove(&ue_id);
        match outcome {
            SecurityModeOutcome::Complete => {
                let result = self.inner.store.with_context_mut(ue_id, |ctx| smc::on_complete(ctx)).await;
                match result {
                    Ok(Ok(())) => self.esm_handoff(ue_id).await,
                    _ => self.reject(ue_id, EmmCause::IllegalUe).await,
                }
            }
            SecurityModeOutcome::Reject { emm_cause } => {
                let failure = self
                    .inner
                    .store
                    .with_context_mut(ue_id, move |ctx| smc::on_reject(ctx, emm_cause))
                    .await;
                self.reject(ue_id, failure.map(|f| f.emm_cause()).unwrap_or(emm_cause)).await;
            }
        }
    }

    async fn esm_handoff(&self, ue_id: UeId) {
        let esm_msg = self
            .inner
            .store
            .with_context(ue_id, |ctx| {
                ctx.procedures.get_specific_attach().and_then(|p| p.ies.esm_msg.clone())
            })
            .await
            .ok()
            .flatten();

        let outcome = match esm_msg {
            Some(msg) => self.inner.esm.unitdata_ind(ue_id, msg).await,
            None => EsmOutcome::Discarded,
        };

        match outcome {
            EsmOutcome::Success { response_pdu } => self.emit_attach_accept(ue_id, response_pdu).await,
            EsmOutcome::Failure { response_pdu } => {
                let _ = self
                    .inner
                    .store
                    .with_context_mut(ue_id, move |ctx| {
                        if let Some(p) = ctx.procedures.get_specific_attach_mut() {
                            p.esm_msg_out = Some(response_pdu);
                        }
                    })
                    .await;
                self.reject(ue_id, EmmCause::EsmFailure).await;
            }
            EsmOutcome::Discarded => {}
        }
    }

    async fn emit_attach_accept(&self, ue_id: UeId, esm_msg_out: Vec<u8>) {
        let config = self.inner.config.clone();
        let this = self.clone();
        let accept = self
            .inner
            .store
            .with_context_mut(ue_id, move |ctx| {
                let mut proc = ctx.procedures.get_specific_attach().cloned();
                let result = match &mut proc {
                    Some(p) => attach::build_attach_accept(ctx, p, &config, esm_msg_out, || this.allocate_guti()),
                    None => Err(ProcedureFailure::ProtocolViolation),
                };
                if result.is_ok() {
                    if let Some(p) = proc {
                        if let Some(slot) = ctx.procedures.get_specific_attach_mut() {
                            *slot = p;
                        }
                    }
                }
                result
            })
            .await;

        match accept {
            Ok(Ok(accept)) => {
                self.inner.nas.send_attach_accept(ue_id, accept).await;
                self.inner.sap.emm_as(EmmAsPrimitive::EstablishCnf { ue_id }).await;
                self.arm_t3450(ue_id).await;
            }
            _ => self.reject(ue_id, EmmCause::IllegalUe).await,
        }
    }

    async fn resend_accept(&self, ue_id: UeId) {
        let config = self.inner.config.clone();
        let accept = self
            .inner
            .store
            .with_context(ue_id, move |ctx| {
                ctx.procedures
                    .get_specific_attach()
                    .and_then(|p| attach::rebuild_attach_accept(ctx, p, &config))
            })
            .await
            .ok()
            .flatten();
        if let Some(accept) = accept {
            self.inner.nas.send_attach_accept(ue_id, accept).await;
            self.arm_t3450(ue_id).await;
        }
    }

    /// Attach Complete (§4.7.5). Discards silently if no Attach is
    /// running or the context is gone.
    pub async fn handle_attach_complete(&self, ue_id: UeId) {
        let esm_msg = self
            .inner
            .store
            .with_context(ue_id, |ctx| ctx.procedures.get_specific_attach().map(|p| p.esm_msg_out.clone()))
            .await
            .ok()
            .flatten()
            .flatten();

        let _ = self.inner.store.with_context_mut(ue_id, |ctx| ctx.t3450 = None).await;
        let result = self.inner.store.with_context_mut(ue_id, |ctx| attach::on_complete(ctx)).await;
        if !matches!(result, Ok(Ok(()))) {
            return;
        }
        if let Some(msg) = esm_msg {
            self.inner.esm.default_eps_bearer_context_activate_cnf(ue_id, msg).await;
        }
        self.inner.sap.emm_reg(EmmRegPrimitive::AttachCnf { ue_id }).await;
    }

    async fn reject(&self, ue_id: UeId, cause: EmmCause) {
        let rej: AttachReject = self
            .inner
            .store
            .with_context_mut(ue_id, move |ctx| {
                ctx.t3450 = None;
                attach::reject(ctx, cause)
            })
            .await
            .unwrap_or(AttachReject { emm_cause: cause, esm_reject_pdu: None });
        self.inner.last_auth_request.lock().await.remove(&ue_id);
        self.inner.last_smc_command.lock().await.remove(&ue_id);
        self.inner.nas.send_attach_reject(ue_id, rej).await;
        self.inner.sap.emm_as(EmmAsPrimitive::EstablishRej { ue_id }).await;
        self.inner.sap.emm_reg(EmmRegPrimitive::AttachRej { ue_id, cause }).await;
    }

    async fn abort_attach(&self, ue_id: UeId) {
        let _ = self
            .inner
            .store
            .with_context_mut(ue_id, |ctx| {
                ctx.t3450 = None;
                attach::abort(ctx)
            })
            .await;
        self.inner.esm.pdn_connectivity_rej(ue_id).await;
        self.inner.sap.emm_reg(EmmRegPrimitive::AttachAbort { ue_id }).await;
    }

    async fn arm_t3470(&self, ue_id: UeId) {
        let duration = self.inner.config.t3470();
        let mme = self.clone();
        let handle = crate::timer::TimerHandle::arm(duration, move || async move { mme.on_t3470_expiry(ue_id).await });
        let _ = self.inner.store.with_context_mut(ue_id, |ctx| ctx.t3470 = Some(handle)).await;
    }

    async fn arm_t3460(&self, ue_id: UeId) {
        let duration = self.inner.config.t3460();
        let mme = self.clone();
        let handle = crate::timer::TimerHandle::arm(duration, move || async move { mme.on_t3460_expiry(ue_id).await });
        let _ = self.inner.store.with_context_mut(ue_id, |ctx| ctx.t3460 = Some(handle)).await;
    }

    async fn arm_t3450(&self, ue_id: UeId) {
        let duration = self.inner.config.t3450();
        let mme = self.clone();
        let handle = crate::timer::TimerHandle::arm(duration, move || async move { mme.on_t3450_expiry(ue_id).await });
        let _ = self.inner.store.with_context_mut(ue_id, |ctx| ctx.t3450 = Some(handle)).await;
    }

    async fn on_t3470_expiry(&self, ue_id: UeId) {
        let counter_max = self.inner.config.identification_counter_max;
        let outcome = self.inner.store.with_context_mut(ue_id, |ctx| ident::on_timeout(ctx, counter_max)).await;
        match outcome {
            Ok(ident::TimeoutOutcome::Retransmit(request)) => {
                self.inner.nas.send_identity_request(ue_id, request).await;
                self.arm_t3470(ue_id).await;
            }
            Ok(ident::TimeoutOutcome::Failure(_)) => self.reject(ue_id, EmmCause::IllegalUe).await,
            Err(_) => {}
        }
    }

    /// T3460 is shared by Authentication (§4.5) and Security Mode Control
    /// (§4.6); disambiguate by which one is actually running.
    async fn on_t3460_expiry(&self, ue_id: UeId) {
        let auth_running = self
            .inner
            .store
            .with_context(ue_id, |ctx| ctx.procedures.is_common_running(CommonProcedureKind::Authentication))
            .await
            .unwrap_or(false);

        if auth_running {
            self.on_authentication_timeout(ue_id).await;
        } else {
            self.on_security_mode_timeout(ue_id).await;
        }
    }

    async fn on_authentication_timeout(&self, ue_id: UeId) {
        let counter_max = self.inner.config.authentication_counter_max;
        let Some(request) = self.inner.last_auth_request.lock().await.get(&ue_id).cloned() else {
            return;
        };
        let outcome = self
            .inner
            .store
            .with_context_mut(ue_id, move |ctx| auth::on_timeout(ctx, counter_max, request))
            .await;
        match outcome {
            Ok(auth::TimeoutOutcome::Retransmit(request)) => {
                self.inner.nas.send_authentication_request(ue_id, request).await;
                self.arm_t3460(ue_id).await;
            }
            Ok(auth::TimeoutOutcome::Failure(_)) => {
                self.inner.last_auth_request.lock().await.remove(&ue_id);
                self.reject(ue_id, EmmCause::IllegalUe).await;
            }
            Err(_) => {}
        }
    }

    async fn on_security_mode_timeout(&self, ue_id: UeId) {
        let counter_max = self.inner.config.security_mode_counter_max;
        let Some(command) = self.inner.last_smc_command.lock().await.get(&ue_id).cloned() else {
            return;
        };
        let outcome = self
            .inner
            .store
            .with_context_mut(ue_id, move |ctx| smc::on_timeout(ctx, counter_max, command))
            .await;
        match outcome {
            Ok(smc::TimeoutOutcome::Retransmit(command)) => {
                self.inner.nas.send_security_mode_command(ue_id, command).await;
                self.arm_t3460(ue_id).await;
            }
            Ok(smc::TimeoutOutcome::Failure(_)) => {
                self.inner.last_smc_command.lock().await.remove(&ue_id);
                self.reject(ue_id, EmmCause::IllegalUe).await;
            }
            Err(_) => {}
        }
    }

    async fn on_t3450_expiry(&self, ue_id: UeId) {
        let config = self.inner.config.clone();
        let outcome = self
            .inner
            .store
            .with_context_mut(ue_id, move |ctx| {
                let mut proc = ctx.procedures.get_specific_attach().cloned();
                let result = proc.as_mut().map(|p| attach::on_t3450_expiry(ctx, p, &config));
                if let Some(p) = proc {
                    if let Some(slot) = ctx.procedures.get_specific_attach_mut() {
                        *slot = p;
                    }
                }
                result
            })
            .await;
        match outcome {
            Ok(Some(attach::T3450Outcome::Resend(accept))) => {
                self.inner.nas.send_attach_accept(ue_id, accept).await;
                self.arm_t3450(ue_id).await;
            }
            Ok(Some(attach::T3450Outcome::Abort)) => self.abort_attach(ue_id).await,
            _ => {}
        }
    }
}

/// A running Attach's common-procedure record, for callers that need to
/// reach into it directly (tests, scenario drivers).
pub fn attach_of(ctx: &EmmContext) -> Option<&AttachProc> {
    ctx.procedures.get_specific_attach()
}
