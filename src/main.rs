mod config;
mod error;
mod keys;
mod ledger;
mod middleware;
mod models;
mod routes;
mod services;
mod store;
mod tasks;
mod utils;

use std::sync::Arc;

use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::keys::hsm::HsmProvider;
use crate::keys::local_vault::LocalVaultProvider;
use crate::keys::ProviderRegistry;
use crate::routes::portal::PortalTokenStore;
use crate::services::agreement_engine::AgreementEngine;
use crate::services::anchor_engine::AnchorEngine;
use crate::services::cid_registry::CidRegistry;
use crate::services::event_log::EventLog;
use crate::services::fingerprint_engine::FingerprintEngine;
use crate::services::intent_logger::IntentLogger;
use crate::services::lifecycle_registry::LifecycleRegistry;
use crate::services::multisig_engine::MultisigEngine;
use crate::services::otp_engine::OtpEngine;
use crate::services::session_engine::SessionEngine;

/// Shared application state accessible in all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<LifecycleRegistry>,
    pub sessions: Arc<SessionEngine>,
    pub workflows: Arc<MultisigEngine>,
    pub intents: Arc<IntentLogger>,
    pub otp: Arc<OtpEngine>,
    pub fingerprints: Arc<FingerprintEngine>,
    pub anchors: Arc<AnchorEngine>,
    pub cids: Arc<CidRegistry>,
    pub events: Arc<EventLog>,
    pub agreements: Arc<AgreementEngine>,
    pub keys: Arc<ProviderRegistry>,
    pub portal_tokens: Arc<PortalTokenStore>,
}

#[tokio::main]
async fn main() {
    // Tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "doc_engine=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(Config::from_env());
    tracing::info!(
        gateway = %config.gateway_addr(),
        portal = %config.portal_addr(),
        data_dir = %config.data_dir.display(),
        "Starting sovereign document engine"
    );

    // Open all persistent stores up front; a corrupt store is fatal at boot.
    let data_dir = config.data_dir.clone();
    let registry = Arc::new(LifecycleRegistry::open(&data_dir).expect("lifecycle registry"));
    let sessions = Arc::new(SessionEngine::open(&data_dir).expect("session store"));
    let workflows = Arc::new(MultisigEngine::open(&data_dir).expect("workflow store"));
    let intents = Arc::new(IntentLogger::open(&data_dir).expect("intent log"));
    let otp = Arc::new(
        OtpEngine::open(
            &data_dir,
            config.otp_ttl_secs,
            config.otp_max_attempts,
            config.otp_min_interval_secs,
        )
        .expect("OTP store"),
    );
    let fingerprints = Arc::new(FingerprintEngine::open(&data_dir).expect("fingerprint store"));
    let cids = Arc::new(CidRegistry::open(&data_dir).expect("CID registry"));
    let events = Arc::new(EventLog::open(&data_dir).expect("event log"));
    let agreements = Arc::new(AgreementEngine::open(&data_dir).expect("agreement store"));

    // Key providers: local vault is active by default, HSM stub registered
    // alongside for deployments that wire in a backend.
    let key_registry = Arc::new(ProviderRegistry::new());
    key_registry.register(Arc::new(
        LocalVaultProvider::open(&data_dir).expect("key vault"),
    ));
    key_registry.register(Arc::new(HsmProvider::new()));

    let portal_tokens = Arc::new(PortalTokenStore::new(
        config.portal_token_ttl_secs,
        config.portal_token_cap,
    ));

    let http_client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(config.adapter_timeout_secs))
        .pool_max_idle_per_host(10)
        .build()
        .expect("Failed to create HTTP client");

    let anchors = Arc::new(
        AnchorEngine::open(&data_dir, config.clone(), http_client.clone())
            .expect("anchor store"),
    );

    let state = AppState {
        config: config.clone(),
        registry,
        sessions,
        workflows,
        intents,
        otp,
        fingerprints,
        anchors,
        cids,
        events,
        agreements,
        keys: key_registry,
        portal_tokens,
    };

    // Spawn background tasks
    tasks::spawn_all(state.clone());

    // CORS: verification reads are public.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Prometheus metrics
    let metrics_handle = setup_metrics();

    let gateway = Router::new()
        .merge(routes::health::router())
        .merge(routes::gateway::router())
        .route(
            "/metrics",
            axum::routing::get(move || async move { metrics_handle.render() }),
        )
        .layer(middleware::security::SecurityHeadersLayer)
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(std::time::Duration::from_secs(30)))
        .layer(TraceLayer::new_for_http())
        .layer(cors.clone())
        .with_state(state.clone());

    let portal = Router::new()
        .merge(routes::health::router())
        .merge(routes::portal::router())
        .layer(middleware::security::SecurityHeadersLayer)
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(std::time::Duration::from_secs(30)))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    let gateway_listener = tokio::net::TcpListener::bind(config.gateway_addr())
        .await
        .expect("Failed to bind gateway");
    let portal_listener = tokio::net::TcpListener::bind(config.portal_addr())
        .await
        .expect("Failed to bind portal");

    tracing::info!("Gateway listening on {}", config.gateway_addr());
    tracing::info!("Portal listening on {}", config.portal_addr());

    let gateway_server =
        axum::serve(gateway_listener, gateway).with_graceful_shutdown(shutdown_signal());
    let portal_server =
        axum::serve(portal_listener, portal).with_graceful_shutdown(shutdown_signal());

    let (g, p) = tokio::join!(gateway_server, portal_server);
    g.expect("Gateway server error");
    p.expect("Portal server error");
}

fn setup_metrics() -> metrics_exporter_prometheus::PrometheusHandle {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    builder
        .install_recorder()
        .expect("Failed to install Prometheus recorder")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Ctrl+C received, shutting down"),
        _ = terminate => tracing::info!("SIGTERM received, shutting down"),
    }
}
