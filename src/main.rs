use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Json, Router,
};
use tokio::signal;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tracing::{error, info};

use pixmint_backend::api::payments::PaymentApiState;
use pixmint_backend::api::webhooks::WebhookState;
use pixmint_backend::config::AppConfig;
use pixmint_backend::database::payment_record_repository::PaymentRecordRepository;
use pixmint_backend::database::repository::{CreditLedger, PaymentRecordStore};
use pixmint_backend::database::user_repository::UserRepository;
use pixmint_backend::gateway::cashfree::{CashfreeConfig, CashfreeGateway};
use pixmint_backend::gateway::provider::PaymentGateway;
use pixmint_backend::health::{HealthChecker, HealthState, HealthStatus};
use pixmint_backend::logging::init_tracing;
use pixmint_backend::middleware::logging::{request_logging_middleware, UuidRequestId};
use pixmint_backend::services::reconciler::{PaymentReconciler, ReconcilerConfig};
use pixmint_backend::workers::payment_monitor::{PaymentMonitorConfig, PaymentMonitorWorker};
use pixmint_backend::{api, database};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::from_env()?;
    config.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %config.server.host,
        port = config.server.port,
        "🚀 Starting pixmint backend service"
    );

    // Database pool
    info!("📊 Initializing database connection pool...");
    let db_pool = database::init_pool_from_config(&config.database)
        .await
        .map_err(|e| {
            error!("Failed to initialize database pool: {}", e);
            anyhow::anyhow!(e)
        })?;
    info!("✅ Database connection pool initialized");

    let records: Arc<dyn PaymentRecordStore> =
        Arc::new(PaymentRecordRepository::new(db_pool.clone()));
    let ledger: Arc<dyn CreditLedger> = Arc::new(UserRepository::new(db_pool.clone()));

    // Payment gateway: absent credentials put the service in manual mode.
    let gateway: Option<Arc<dyn PaymentGateway>> = match CashfreeConfig::from_env() {
        Some(gateway_config) => {
            let environment = gateway_config.environment;
            let gateway = CashfreeGateway::new(gateway_config).map_err(|e| {
                error!("Failed to initialize payment gateway: {}", e);
                anyhow::anyhow!(e)
            })?;
            info!(environment = ?environment, "✅ Cashfree gateway initialized");
            Some(Arc::new(gateway) as Arc<dyn PaymentGateway>)
        }
        None => {
            info!("⚠️  Cashfree credentials not set, running in manual payment mode");
            None
        }
    };
    let gateway_name = gateway.as_ref().map(|g| g.name());

    let reconciler = Arc::new(PaymentReconciler::new(
        records.clone(),
        ledger.clone(),
        gateway.clone(),
        ReconcilerConfig {
            currency: config.payment.currency.clone(),
            frontend_url: config.payment.frontend_url.clone(),
            backend_url: config.payment.backend_url.clone(),
            manual: config.payment.manual.clone(),
        },
    ));

    let health_checker = HealthChecker::new(db_pool.clone(), gateway_name);

    // Pending-payment monitor: only useful when a gateway can be queried.
    let (worker_shutdown_tx, worker_shutdown_rx) = watch::channel(false);
    let monitor_enabled = std::env::var("PAYMENT_MONITOR_ENABLED")
        .unwrap_or_else(|_| "true".to_string())
        .to_lowercase()
        != "false";
    let mut monitor_handle = None;
    if monitor_enabled && gateway.is_some() {
        let monitor_config = PaymentMonitorConfig::from_env();
        info!(
            poll_interval_secs = monitor_config.poll_interval.as_secs(),
            min_age_secs = monitor_config.min_age.as_secs(),
            "Starting pending-payment monitor worker"
        );
        let worker =
            PaymentMonitorWorker::new(records.clone(), reconciler.clone(), monitor_config);
        monitor_handle = Some(tokio::spawn(worker.run(worker_shutdown_rx)));
    } else if monitor_enabled {
        info!("Skipping payment monitor worker (gateway unconfigured)");
    } else {
        info!("Payment monitor worker disabled (PAYMENT_MONITOR_ENABLED=false)");
    }

    // Routes
    let payment_state = Arc::new(PaymentApiState {
        reconciler: reconciler.clone(),
    });
    let payment_routes = Router::new()
        .route(
            "/api/payment/create",
            post(api::payments::create_payment_link),
        )
        .route(
            "/api/payment/status",
            post(api::payments::check_payment_status),
        )
        .route(
            "/api/payment/verify-manual",
            post(api::payments::verify_manual_payment),
        )
        .with_state(payment_state);

    let webhook_state = Arc::new(WebhookState {
        reconciler: reconciler.clone(),
    });
    let webhook_routes = Router::new()
        .route("/api/payment/webhook", post(api::webhooks::handle_webhook))
        .with_state(webhook_state);

    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .route("/health/live", get(liveness))
        .with_state(health_checker);

    let app = Router::new()
        .route("/", get(root))
        .merge(payment_routes)
        .merge(webhook_routes)
        .merge(health_routes)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(axum::middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id()),
        );

    info!("✅ Routes configured");

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("❌ Failed to bind to address {}: {}", addr, e);
        e
    })?;

    info!(address = %addr, "🚀 Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(worker_shutdown_tx.clone()))
        .await?;

    let _ = worker_shutdown_tx.send(true);
    if let Some(handle) = monitor_handle {
        if let Err(e) = tokio::time::timeout(std::time::Duration::from_secs(5), handle).await {
            error!(error = %e, "Timed out waiting for monitor worker shutdown");
        }
    }

    info!("👋 Server shutdown complete");

    Ok(())
}

// Handlers
async fn root() -> &'static str {
    "Welcome to pixmint backend API"
}

async fn health(
    axum::extract::State(checker): axum::extract::State<HealthChecker>,
) -> Result<Json<HealthStatus>, (axum::http::StatusCode, String)> {
    let health_status = checker.check_health().await;

    // Return 503 if any required component is down
    if matches!(health_status.status, HealthState::Unhealthy) {
        error!("❌ Health check failed - service unhealthy");
        Err((
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            "Service Unavailable".to_string(),
        ))
    } else {
        Ok(Json(health_status))
    }
}

/// Readiness probe - checks if the service is ready to accept traffic
async fn readiness(
    state: axum::extract::State<HealthChecker>,
) -> Result<Json<HealthStatus>, (axum::http::StatusCode, String)> {
    health(state).await
}

/// Liveness probe - checks if the service is alive (basic check)
async fn liveness() -> Result<&'static str, (axum::http::StatusCode, String)> {
    Ok("OK")
}
