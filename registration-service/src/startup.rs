//! Application state, routing and server lifecycle.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, patch, post},
    Router,
};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::middleware::{
    metrics::metrics_middleware,
    tracing::{make_request_span, request_id_middleware},
};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::RegistrationConfig;
use crate::handlers::{self, payments, registrations, uploads};
use crate::middleware::admin_auth_middleware;
use crate::models::FileUrls;
use crate::services::{
    CurrencyOracle, Database, DiskFileStore, ExpirySweeper, FileStore, HttpCurrencyOracle,
    MidtransClient, PaymentGateway, RegistrationService, RegistrationStore, StaticRateOracle,
    WebhookProcessor,
};

/// Multipart framing allowance on top of the file size limit.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: RegistrationConfig,
    pub store: Arc<dyn RegistrationStore>,
    pub files: Arc<dyn FileStore>,
    pub service: RegistrationService,
    pub webhooks: WebhookProcessor,
    pub urls: FileUrls,
}

impl AppState {
    pub fn new(
        config: RegistrationConfig,
        store: Arc<dyn RegistrationStore>,
        files: Arc<dyn FileStore>,
        oracle: Arc<dyn CurrencyOracle>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        let urls = FileUrls::from_config(&config.storage);
        let service = RegistrationService::new(
            store.clone(),
            files.clone(),
            oracle,
            gateway.clone(),
            urls.clone(),
        );
        let webhooks = WebhookProcessor::new(store.clone(), gateway);
        Self {
            config,
            store,
            files,
            service,
            webhooks,
            urls,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let upload_limit = usize::try_from(state.config.storage.max_upload_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD_BYTES);

    let public_routes = Router::new()
        .route(
            "/api/registrations/fully-funded",
            post(registrations::submit_fully_funded),
        )
        .route(
            "/api/registrations/self-funded",
            post(registrations::submit_self_funded),
        )
        .route(
            "/api/registrations/submission/:submission_id",
            get(registrations::get_by_submission_id),
        )
        .route(
            "/api/registrations/check-email/:email",
            get(registrations::check_email),
        )
        .route(
            "/api/payments/ryls/transactions",
            post(payments::create_transaction),
        )
        .route("/api/payments/notifications", post(payments::notification))
        .route(
            "/api/payments/ryls/:id/status",
            get(payments::payment_status),
        )
        .route("/api/uploads/:id", get(uploads::download))
        .route("/api/uploads/:id/info", get(uploads::info));

    let upload_routes = Router::new()
        .route("/api/uploads/essay", post(uploads::upload_essay))
        .route("/api/uploads/headshot", post(uploads::upload_headshot))
        .route(
            "/api/uploads/payment-proof",
            post(uploads::upload_payment_proof),
        )
        .layer(DefaultBodyLimit::max(upload_limit));

    let admin_routes = Router::new()
        .route("/api/registrations", get(registrations::list_registrations))
        .route("/api/registrations/stats", get(registrations::statistics))
        .route("/api/registrations/date-range", get(registrations::date_range))
        .route("/api/registrations/export", get(registrations::export))
        .route(
            "/api/registrations/:id",
            get(registrations::get_registration).delete(registrations::delete_registration),
        )
        .route(
            "/api/registrations/:id/status",
            patch(registrations::update_status),
        )
        .route("/api/payments/ryls/statistics", get(payments::statistics))
        .route("/api/payments/ryls/:id/cancel", post(payments::cancel))
        .route("/api/uploads", get(uploads::list))
        .route("/api/uploads/statistics", get(uploads::statistics))
        .route("/api/uploads/cleanup", post(uploads::cleanup))
        .route("/api/uploads/:id", delete(uploads::delete))
        .route_layer(from_fn_with_state(state.clone(), admin_auth_middleware));

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        .merge(public_routes)
        .merge(upload_routes)
        .merge(admin_routes)
        .layer(from_fn(metrics_middleware))
        .layer(from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(make_request_span::<axum::body::Body>))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
    sweeper: Option<(ExpirySweeper, Duration)>,
}

impl Application {
    /// Connect collaborators, run migrations and bind the listener.
    pub async fn build(config: RegistrationConfig) -> Result<Self, AppError> {
        let db = Database::new(
            config.database.url.expose_secret(),
            config.database.max_connections,
            config.database.min_connections,
        )
        .await?;
        db.run_migrations().await?;

        let files = DiskFileStore::new(
            db.pool().clone(),
            config.storage.upload_root.clone(),
            config.storage.max_upload_bytes,
        );
        files
            .init()
            .await
            .map_err(|e| AppError::ConfigError(anyhow::Error::new(e)))?;

        let oracle: Arc<dyn CurrencyOracle> = match config.oracle.fixed_rate {
            Some(rate) => {
                tracing::warn!(%rate, "Using a fixed IDR rate");
                Arc::new(StaticRateOracle::new(rate))
            }
            None => Arc::new(
                HttpCurrencyOracle::new(&config.oracle)
                    .map_err(|e| AppError::ConfigError(anyhow::Error::new(e)))?,
            ),
        };

        let midtrans = MidtransClient::new(&config.midtrans)
            .map_err(|e| AppError::ConfigError(anyhow::Error::new(e)))?;
        if midtrans.is_configured() {
            tracing::info!(production = config.midtrans.is_production, "Midtrans client initialized");
        } else {
            tracing::warn!("Midtrans server key not configured - hosted checkout will fail");
        }
        let gateway: Arc<dyn PaymentGateway> = Arc::new(midtrans);
        let store: Arc<dyn RegistrationStore> = Arc::new(db);

        let sweeper = config.sweep.enabled.then(|| {
            (
                ExpirySweeper::new(store.clone(), gateway.clone()),
                Duration::from_secs(config.sweep.interval_secs.max(1)),
            )
        });

        let state = AppState::new(config.clone(), store, Arc::new(files), oracle, gateway);
        let router = build_router(state);

        // Port 0 picks a random port for tests.
        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind HTTP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        Ok(Self {
            port,
            listener,
            router,
            sweeper,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Serve until SIGINT or SIGTERM, then stop the expiry sweep.
    pub async fn run_until_stopped(self) -> Result<(), AppError> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let sweep = self
            .sweeper
            .map(|(sweeper, interval)| sweeper.spawn(interval, shutdown_rx));

        tracing::info!(port = self.port, "Listening");
        axum::serve(
            self.listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        let _ = shutdown_tx.send(true);
        if let Some(handle) = sweep {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Expiry sweep task ended abnormally");
            }
        }
        tracing::info!("Service shutdown complete");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
