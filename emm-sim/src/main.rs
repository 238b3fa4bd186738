//! Reference MME process: loads an [`emm_core::config::MmeConfig`] from a
//! TOML file, wires it to a scripted attach scenario also given in TOML,
//! and drives `emm_core::mme::Mme` through it end to end, logging every
//! outbound NAS message and SAP primitive.
//!
//! This is a demonstration harness, not a production S1AP stack: the
//! "NAS sink" just logs what it would send, and the scenario script
//! stands in for a real eNB/UE conversation.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use log::info;
use serde::Deserialize;
use tokio::sync::Mutex;

use emm_core::cause::EmmCause;
use emm_core::config::MmeConfig;
use emm_core::esm::EsmOutcome;
use emm_core::mme::Mme;
use emm_core::nas::{
    AttachAccept, AttachReject, AuthenticationOutcome, AuthenticationRequest, IdentityRequest,
    IdentityValue, IngressMeta, NasSink, SecurityModeCommand, SecurityModeOutcome,
};
use emm_core::provider::AuthVector;
use emm_core::sap::{EmmAsPrimitive, EmmRegPrimitive, SapSink};
use emm_core::testing::{MockAuthVectorProvider, MockEsmPeer};
use emm_core::types::{AttachType, Ecgi, IeSnapshot, Imei, Imsi, Ksi, PlmnId, Tai, UeNetworkCapability};

/// Drives `emm-core`'s Attach engine through a scripted scenario.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Path to a TOML `MmeConfig`. Falls back to `MmeConfig::default()`.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to the TOML scenario script to run.
    #[arg(long)]
    scenario: PathBuf,

    /// Minimum log level (overridden by `RUST_LOG`).
    #[arg(long, default_value = "info")]
    log_level: log::LevelFilter,
}

#[derive(Debug, Deserialize)]
struct ScenarioFile {
    plmn: PlmnSpec,
    mme_group_id: u16,
    mme_code: u8,
    #[serde(default)]
    subscribers: Vec<SubscriberSpec>,
    esm_outcome: EsmOutcomeSpec,
    attach: AttachSpec,
}

#[derive(Debug, Deserialize, Clone, Copy)]
struct PlmnSpec {
    mcc: [u8; 3],
    mnc: [u8; 3],
}

impl From<PlmnSpec> for PlmnId {
    fn from(p: PlmnSpec) -> Self {
        PlmnId { mcc: p.mcc, mnc: p.mnc }
    }
}

#[derive(Debug, Deserialize)]
struct TaiSpec {
    tac: u16,
}

#[derive(Debug, Deserialize)]
struct EcgiSpec {
    cell_identity: u32,
}

#[derive(Debug, Deserialize)]
struct SubscriberSpec {
    imsi: String,
    rand: Vec<u8>,
    autn: Vec<u8>,
    xres: Vec<u8>,
    kasme: Vec<u8>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
enum EsmOutcomeSpec {
    Success { response_pdu: Vec<u8> },
    Failure { response_pdu: Vec<u8> },
    Discarded,
}

impl From<EsmOutcomeSpec> for EsmOutcome {
    fn from(spec: EsmOutcomeSpec) -> Self {
        match spec {
            EsmOutcomeSpec::Success { response_pdu } => EsmOutcome::Success { response_pdu },
            EsmOutcomeSpec::Failure { response_pdu } => EsmOutcome::Failure { response_pdu },
            EsmOutcomeSpec::Discarded => EsmOutcome::Discarded,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
enum AuthOutcomeSpec {
    Response { res: Vec<u8> },
    SyncFailure { auts: Vec<u8> },
    Failure { emm_cause: EmmCause },
}

impl From<AuthOutcomeSpec> for AuthenticationOutcome {
    fn from(spec: AuthOutcomeSpec) -> Self {
        match spec {
            AuthOutcomeSpec::Response { res } => AuthenticationOutcome::Response { res },
            AuthOutcomeSpec::SyncFailure { auts } => AuthenticationOutcome::SyncFailure { auts },
            AuthOutcomeSpec::Failure { emm_cause } => AuthenticationOutcome::Failure { emm_cause },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
enum SmcOutcomeSpec {
    Complete,
    Reject { emm_cause: EmmCause },
}

impl From<SmcOutcomeSpec> for SecurityModeOutcome {
    fn from(spec: SmcOutcomeSpec) -> Self {
        match spec {
            SmcOutcomeSpec::Complete => SecurityModeOutcome::Complete,
            SmcOutcomeSpec::Reject { emm_cause } => SecurityModeOutcome::Reject { emm_cause },
        }
    }
}

#[derive(Debug, Deserialize)]
struct AttachSpec {
    attach_type: AttachTypeSpec,
    imsi: Option<String>,
    imei: Option<String>,
    ksi: u8,
    is_native_sc: bool,
    is_native_guti: bool,
    originating_tai: TaiSpec,
    originating_ecgi: EcgiSpec,
    #[serde(default)]
    ue_network_capability: Vec<u8>,
    #[serde(default)]
    esm_msg: Vec<u8>,
    enb_key: u64,
    /// Whether the Attach Request's IMSI (if any) arrived already MAC
    /// verified, e.g. carried inside an integrity protected GUTI
    /// reattach. Controls whether the engine skips Identification.
    #[serde(default)]
    mac_verified: bool,
    /// If set, the engine is expected to run Identification first; this
    /// is the IMSI it's scripted to answer with.
    identity_response_imsi: Option<String>,
    authentication: AuthOutcomeSpec,
    security_mode: SmcOutcomeSpec,
    #[serde(default)]
    send_attach_complete: bool,
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(rename_all = "snake_case")]
enum AttachTypeSpec {
    Eps,
    Combined,
    Emergency,
}

impl From<AttachTypeSpec> for AttachType {
    fn from(spec: AttachTypeSpec) -> Self {
        match spec {
            AttachTypeSpec::Eps => AttachType::Eps,
            AttachTypeSpec::Combined => AttachType::Combined,
            AttachTypeSpec::Emergency => AttachType::Emergency,
        }
    }
}

/// Logs every outbound NAS message instead of actually encoding and
/// transmitting it over S1AP (out of scope, `spec.md` §1).
struct LoggingNasSink;

#[async_trait]
impl NasSink for LoggingNasSink {
    async fn send_identity_request(&self, ue_id: emm_core::types::UeId, msg: IdentityRequest) {
        info!("{ue_id}: -> Identity Request ({:?})", msg.requested_type);
    }

    async fn send_authentication_request(&self, ue_id: emm_core::types::UeId, msg: AuthenticationRequest) {
        info!("{ue_id}: -> Authentication Request (rand={} bytes)", msg.rand.len());
    }

    async fn send_security_mode_command(&self, ue_id: emm_core::types::UeId, msg: SecurityModeCommand) {
        info!(
            "{ue_id}: -> Security Mode Command (eea={:?} eia={:?})",
            msg.selected_eea, msg.selected_eia
        );
    }

    async fn send_attach_accept(&self, ue_id: emm_core::types::UeId, msg: AttachAccept) {
        info!(
            "{ue_id}: -> Attach Accept (guti={:?} eea={:?} eia={:?})",
            msg.assigned_guti, msg.selected_eea, msg.selected_eia
        );
    }

    async fn send_attach_reject(&self, ue_id: emm_core::types::UeId, msg: AttachReject) {
        info!("{ue_id}: -> Attach Reject (cause={})", msg.emm_cause);
    }
}

/// Logs every upward SAP primitive and records the last one seen per
/// kind, so `main` can report the final outcome.
struct LoggingSapSink {
    last_reg: Mutex<Option<EmmRegPrimitive>>,
}

impl LoggingSapSink {
    fn new() -> Self {
        LoggingSapSink { last_reg: Mutex::new(None) }
    }

    async fn last_reg(&self) -> Option<EmmRegPrimitive> {
        self.last_reg.lock().await.clone()
    }
}

#[async_trait]
impl SapSink for LoggingSapSink {
    async fn emm_reg(&self, primitive: EmmRegPrimitive) {
        info!("EMMREG: {primitive:?}");
        *self.last_reg.lock().await = Some(primitive);
    }

    async fn emm_as(&self, primitive: EmmAsPrimitive) {
        info!("EMMAS: {primitive:?}");
    }
}

fn build_ies(plmn: PlmnId, attach: &AttachSpec) -> IeSnapshot {
    IeSnapshot {
        is_initial: true,
        attach_type: attach.attach_type.into(),
        is_native_sc: attach.is_native_sc,
        ksi: Ksi(attach.ksi),
        is_native_guti: attach.is_native_guti,
        guti: None,
        imsi: attach.imsi.clone().map(Imsi),
        imei: attach.imei.clone().map(Imei),
        last_visited_registered_tai: None,
        originating_tai: Tai { plmn, tac: attach.originating_tai.tac },
        originating_ecgi: Ecgi { plmn, cell_identity: attach.originating_ecgi.cell_identity },
        ue_network_capability: UeNetworkCapability(attach.ue_network_capability.clone()),
        ms_network_capability: None,
        drx_parameter: None,
        esm_msg: Some(attach.esm_msg.clone()),
        decode_status: emm_core::types::DecodeStatus::Ok,
        mac_verified: attach.mac_verified,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    emm_core::init_logging(cli.log_level);

    let config = match &cli.config {
        Some(path) => {
            let raw = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading config {}", path.display()))?;
            toml::from_str::<MmeConfig>(&raw).with_context(|| format!("parsing config {}", path.display()))?
        }
        None => MmeConfig::default(),
    };

    let raw = tokio::fs::read_to_string(&cli.scenario)
        .await
        .with_context(|| format!("reading scenario {}", cli.scenario.display()))?;
    let scenario: ScenarioFile =
        toml::from_str(&raw).with_context(|| format!("parsing scenario {}", cli.scenario.display()))?;

    let mut provider = MockAuthVectorProvider::new();
    for sub in &scenario.subscribers {
        provider = provider.with_vector(
            &sub.imsi,
            AuthVector {
                rand: sub.rand.clone(),
                autn: sub.autn.clone(),
                xres: sub.xres.clone(),
                kasme: sub.kasme.clone(),
            },
        );
    }

    let esm_outcome: EsmOutcome = scenario.esm_outcome.into();
    let esm = Arc::new(MockEsmPeer::new(esm_outcome));
    let nas = Arc::new(LoggingNasSink);
    let sap = Arc::new(LoggingSapSink::new());

    let plmn: PlmnId = scenario.plmn.into();
    let mme = Mme::new(
        config,
        nas,
        esm,
        Arc::new(provider),
        sap.clone(),
        plmn,
        scenario.mme_group_id,
        scenario.mme_code,
    );

    let ies = build_ies(plmn, &scenario.attach);
    let meta = IngressMeta { enb_key: scenario.attach.enb_key };
    let ue_id = mme.handle_attach_request(meta, ies).await;
    info!("attach request resolved to {ue_id}");

    if let Some(imsi) = scenario.attach.identity_response_imsi {
        mme.handle_identity_response(ue_id, IdentityValue::Imsi(Imsi(imsi))).await;
    }

    mme.handle_authentication_outcome(ue_id, scenario.attach.authentication.into()).await;
    mme.handle_security_mode_outcome(ue_id, scenario.attach.security_mode.into()).await;

    if scenario.attach.send_attach_complete {
        mme.handle_attach_complete(ue_id).await;
    }

    match sap.last_reg().await {
        Some(EmmRegPrimitive::AttachCnf { ue_id }) => info!("{ue_id}: attach complete"),
        Some(other) => info!("final EMMREG state: {other:?}"),
        None => info!("no terminal EMMREG primitive observed"),
    }

    Ok(())
}
