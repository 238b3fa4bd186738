//! EMM Context Store (`spec.md` §3.2, §4.1).
//!
//! Grounded on `examples/original_source/NAS/EMM/emmData.h`'s
//! `emm_data_context_s` / `emm_data_t` (the `ctx_coll_ue_id` /
//! `ctx_coll_guti` hash tables), reworked as an `Arc<RwLock<HashMap>>`
//! handle the way the teacher's `DeviceInfoHandle` wraps shared device
//! state (`examples/BeigeBox-rayhunter/daemon/src/display/mod.rs`).

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::EmmError;
use crate::procedures::ProcedureRegistry;
use crate::security::SecurityContext;
use crate::timer::TimerHandle;
use crate::types::{Ecgi, Guti, GutiSlot, Imei, Imeisv, Imsi, Ksi, Tai, UeId};

/// EMM mobility management state for a context (§4.7.7, §5.1.3.4 of
/// TS 24.301).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmmState {
    Deregistered,
    RegisteredInitiated,
    CommonProcedureInitiated,
    Registered,
    DeregisteredInitiated,
}

/// Whether a context was dynamically created by an Attach Request or
/// pre-provisioned some other way (§11: "`is_dynamic` / context
/// provenance"). This engine only ever constructs `Dynamic` contexts;
/// the variant exists so a future static-provisioning path doesn't
/// require a breaking change to `EmmContext`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextOrigin {
    Dynamic,
}

/// All mobility state for one UE (§3.2).
pub struct EmmContext {
    pub ue_id: UeId,
    pub origin: ContextOrigin,

    pub imsi: Option<Imsi>,
    pub imei: Option<Imei>,
    pub imeisv: Option<Imeisv>,
    pub guti: Option<GutiSlot>,
    pub old_guti: Option<Guti>,

    pub last_visited_registered_tai: Option<Tai>,
    pub originating_tai: Option<Tai>,
    pub originating_ecgi: Option<Ecgi>,

    pub ksi: Ksi,

    pub security: Option<SecurityContext>,
    pub non_current_security: Option<SecurityContext>,
    /// XRES from the in-flight authentication vector, held until the
    /// Authentication Response arrives (§4.5).
    pub pending_xres: Option<Vec<u8>>,

    pub emm_state: EmmState,
    pub procedures: ProcedureRegistry,

    /// Count of Attach Requests received since the last terminal outcome
    /// (§3.3 invariant 4).
    pub num_attach_request: u32,
    pub is_attached: bool,
    pub is_emergency: bool,

    pub t3450: Option<TimerHandle>,
    pub t3460: Option<TimerHandle>,
    pub t3470: Option<TimerHandle>,

    /// Tags which `enb_key` this context is currently associated with, so
    /// the ingress classifier can detect the duplicate-eNB-context case
    /// of §4.7.1 step 1.
    pub enb_key: Option<u64>,
}

impl EmmContext {
    pub fn new(ue_id: UeId) -> Self {
        EmmContext {
            ue_id,
            origin: ContextOrigin::Dynamic,
            imsi: None,
            imei: None,
            imeisv: None,
            guti: None,
            old_guti: None,
            last_visited_registered_tai: None,
            originating_tai: None,
            originating_ecgi: None,
            ksi: Ksi::NONE,
            security: None,
            non_current_security: None,
            pending_xres: None,
            emm_state: EmmState::Deregistered,
            procedures: ProcedureRegistry::default(),
            num_attach_request: 0,
            is_attached: false,
            is_emergency: false,
            t3450: None,
            t3460: None,
            t3470: None,
            enb_key: None,
        }
    }
}

#[derive(Default)]
struct Indexes {
    by_ue_id: HashMap<UeId, EmmContext>,
    by_guti: HashMap<Guti, UeId>,
    by_imsi: HashMap<Imsi, UeId>,
    by_enb_key: HashMap<u64, UeId>,
}

fn rehash_one(idx: &mut Indexes, ue_id: UeId) {
    let (guti, imsi, enb_key) = {
        let ctx = idx.by_ue_id.get(&ue_id).expect("caller just looked this up");
        (ctx.guti.map(|s| s.guti), ctx.imsi.clone(), ctx.enb_key)
    };
    idx.by_guti.retain(|_, v| *v != ue_id);
    idx.by_imsi.retain(|_, v| *v != ue_id);
    idx.by_enb_key.retain(|_, v| *v != ue_id);
    if let Some(guti) = guti {
        idx.by_guti.insert(guti, ue_id);
    }
    if let Some(imsi) = imsi {
        idx.by_imsi.insert(imsi, ue_id);
    }
    if let Some(enb_key) = enb_key {
        idx.by_enb_key.insert(enb_key, ue_id);
    }
}

/// Concurrent map from `ue_id` to `EmmContext`, with secondary indexes by
/// GUTI, IMSI, and eNB association (§4.1, §4.7.1 step 1's GUTI -> IMSI ->
/// eNB-context fallback chain). All indexes are updated under one lock so
/// readers never observe a partial update (§4.1 invariant).
#[derive(Clone, Default)]
pub struct ContextStore {
    inner: Arc<RwLock<Indexes>>,
}

impl ContextStore {
    pub fn new() -> Self {
        ContextStore::default()
    }

    pub async fn insert(&self, context: EmmContext) -> Result<(), EmmError> {
        let mut idx = self.inner.write().await;
        if idx.by_ue_id.contains_key(&context.ue_id) {
            return Err(EmmError::Duplicate(context.ue_id));
        }
        if let Some(slot) = &context.guti {
            idx.by_guti.insert(slot.guti, context.ue_id);
        }
        if let Some(imsi) = &context.imsi {
            idx.by_imsi.insert(imsi.clone(), context.ue_id);
        }
        if let Some(enb_key) = context.enb_key {
            idx.by_enb_key.insert(enb_key, context.ue_id);
        }
        idx.by_ue_id.insert(context.ue_id, context);
        Ok(())
    }

    /// Rehashes the secondary indexes after `context`'s GUTI/IMSI/eNB key
    /// have changed in place. Callers hold the context only transiently
    /// via [`ContextStore::with_context_mut`]; this re-derives the index
    /// entries from the context's current fields.
    pub async fn reindex(&self, ue_id: UeId) -> Result<(), EmmError> {
        let mut idx = self.inner.write().await;
        if !idx.by_ue_id.contains_key(&ue_id) {
            return Err(EmmError::ContextNotFound(ue_id));
        }
        rehash_one(&mut idx, ue_id);
        Ok(())
    }

    pub async fn remove(&self, ue_id: UeId) -> Option<EmmContext> {
        let mut idx = self.inner.write().await;
        let removed = idx.by_ue_id.remove(&ue_id)?;
        idx.by_guti.retain(|_, v| *v != ue_id);
        idx.by_imsi.retain(|_, v| *v != ue_id);
        idx.by_enb_key.retain(|_, v| *v != ue_id);
        Some(removed)
    }

    pub async fn contains(&self, ue_id: UeId) -> bool {
        self.inner.read().await.by_ue_id.contains_key(&ue_id)
    }

    pub async fn find_ue_id_by_guti(&self, guti: &Guti) -> Option<UeId> {
        self.inner.read().await.by_guti.get(guti).copied()
    }

    pub async fn find_ue_id_by_imsi(&self, imsi: &Imsi) -> Option<UeId> {
        self.inner.read().await.by_imsi.get(imsi).copied()
    }

    /// Third tier of the §4.7.1 step 1 fallback chain: a request with
    /// neither a recognized GUTI nor an IMSI resolves to whatever
    /// context this eNB association already belongs to, if any.
    pub async fn find_ue_id_by_enb_key(&self, enb_key: u64) -> Option<UeId> {
        self.inner.read().await.by_enb_key.get(&enb_key).copied()
    }

    /// Runs `f` against the context for `ue_id` under the store's write
    /// lock, then rehashes the secondary indexes. This is the only
    /// sanctioned way to mutate a context's identity-bearing fields
    /// (GUTI/IMSI/eNB key), keeping all indexes consistent.
    pub async fn with_context_mut<R>(
        &self,
        ue_id: UeId,
        f: impl FnOnce(&mut EmmContext) -> R,
    ) -> Result<R, EmmError> {
        let mut idx = self.inner.write().await;
        let result = {
            let ctx = idx
                .by_ue_id
                .get_mut(&ue_id)
                .ok_or(EmmError::ContextNotFound(ue_id))?;
            f(ctx)
        };
        rehash_one(&mut idx, ue_id);
        Ok(result)
    }

    /// Read-only access to a context for callers that don't need to
    /// mutate identity-bearing fields.
    pub async fn with_context<R>(
        &self,
        ue_id: UeId,
        f: impl FnOnce(&EmmContext) -> R,
    ) -> Result<R, EmmError> {
        let idx = self.inner.read().await;
        let ctx = idx
            .by_ue_id
            .get(&ue_id)
            .ok_or(EmmError::ContextNotFound(ue_id))?;
        Ok(f(ctx))
    }
}

/// Which side of a duplicate eNB association was kept (§4.7.1 step 1 /
/// §11: "destroy the new eNB association side" vs. "retain the old
/// side"). This crate keeps a single `EmmContext` per `ue_id` rather
/// than separate per-eNB objects, so reconciliation just decides which
/// `enb_key` survives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateSide {
    Old,
    New,
}

/// Reconciles a detected duplicate-eNB-context collision: an initial
/// request keeps the existing association, a non-initial one (e.g. a
/// retransmission arriving over a new eNB) adopts the new one.
pub fn reconcile_duplicate_enb(ctx: &mut EmmContext, new_enb_key: u64, is_initial: bool) -> DuplicateSide {
    if is_initial {
        DuplicateSide::Old
    } else {
        ctx.enb_key = Some(new_enb_key);
        DuplicateSide::New
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PlmnId;

    fn plmn() -> PlmnId {
        PlmnId { mcc: [2, 0, 8], mnc: [9, 3, 0] }
    }

    fn guti(m_tmsi: u32) -> Guti {
        Guti { plmn: plmn(), mme_group_id: 1, mme_code: 1, m_tmsi }
    }

    #[tokio::test]
    async fn insert_then_get_round_trips() {
        let store = ContextStore::new();
        let ue = UeId(1);
        store.insert(EmmContext::new(ue)).await.unwrap();
        assert!(store.contains(ue).await);
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected() {
        let store = ContextStore::new();
        let ue = UeId(1);
        store.insert(EmmContext::new(ue)).await.unwrap();
        let err = store.insert(EmmContext::new(ue)).await.unwrap_err();
        assert_eq!(err, EmmError::Duplicate(ue));
    }

    #[tokio::test]
    async fn guti_index_tracks_mutation() {
        let store = ContextStore::new();
        let ue = UeId(7);
        store.insert(EmmContext::new(ue)).await.unwrap();

        let g = guti(42);
        store
            .with_context_mut(ue, |ctx| {
                ctx.guti = Some(GutiSlot { guti: g, valid: false });
            })
            .await
            .unwrap();

        assert_eq!(store.find_ue_id_by_guti(&g).await, Some(ue));
    }

    #[tokio::test]
    async fn guti_index_is_cleared_on_remove() {
        let store = ContextStore::new();
        let ue = UeId(3);
        store.insert(EmmContext::new(ue)).await.unwrap();
        let g = guti(1);
        store
            .with_context_mut(ue, |ctx| ctx.guti = Some(GutiSlot { guti: g, valid: true }))
            .await
            .unwrap();
        store.remove(ue).await;
        assert_eq!(store.find_ue_id_by_guti(&g).await, None);
        assert!(!store.contains(ue).await);
    }

    #[tokio::test]
    async fn reassigning_guti_drops_the_old_index_entry() {
        let store = ContextStore::new();
        let ue = UeId(9);
        store.insert(EmmContext::new(ue)).await.unwrap();
        let g1 = guti(1);
        let g2 = guti(2);
        store
            .with_context_mut(ue, |ctx| ctx.guti = Some(GutiSlot { guti: g1, valid: true }))
            .await
            .unwrap();
        store
            .with_context_mut(ue, |ctx| ctx.guti = Some(GutiSlot { guti: g2, valid: true }))
            .await
            .unwrap();
        assert_eq!(store.find_ue_id_by_guti(&g1).await, None);
        assert_eq!(store.find_ue_id_by_guti(&g2).await, Some(ue));
    }

    #[tokio::test]
    async fn imsi_lookup_after_insert_with_identity() {
        let store = ContextStore::new();
        let ue = UeId(11);
        let mut ctx = EmmContext::new(ue);
        ctx.imsi = Some(Imsi("001010000000001".into()));
        store.insert(ctx).await.unwrap();
        let found = store
            .find_ue_id_by_imsi(&Imsi("001010000000001".into()))
            .await;
        assert_eq!(found, Some(ue));
    }

    #[tokio::test]
    async fn context_not_found_on_unknown_ue() {
        let store = ContextStore::new();
        let err = store.with_context(UeId(404), |_| ()).await.unwrap_err();
        assert_eq!(err, EmmError::ContextNotFound(UeId(404)));
    }
}
