use crate::cli::ServeArgs;
use crate::infra::AppState;
use crate::routes::with_service_routes;
use axum::extract::DefaultBodyLimit;
use axum::{Extension, Router};
use axum_prometheus::PrometheusMetricLayer;
use mortgage_router::applications::{
    application_router, ApplicationPortal, ApplicationRepository, AssignmentLedger,
    FileSystemStorage,
};
use mortgage_router::config::AppConfig;
use mortgage_router::error::AppError;
use mortgage_router::identity::{
    account_router, AccountService, IdentityStore, LogResetNotifier, SessionGuard,
};
use mortgage_router::store::{MemoryStore, SqliteStore};
use mortgage_router::telemetry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{info, warn};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let portal = if config.storage.uses_memory_store() {
        warn!("APP_DATABASE_PATH is in-memory; records are lost on shutdown");
        portal_routes(Arc::new(MemoryStore::default()), &config)?
    } else {
        let store = SqliteStore::open(&config.storage.database_path)?;
        info!(path = %config.storage.database_path, "sqlite store opened");
        portal_routes(Arc::new(store), &config)?
    };

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let app = with_service_routes(portal)
        .layer(DefaultBodyLimit::max(config.storage.max_upload_bytes))
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "mortgage application router ready");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Seed the bootstrap reviewer and build the account and application routes over `store`.
fn portal_routes<S>(store: Arc<S>, config: &AppConfig) -> Result<Router, AppError>
where
    S: IdentityStore + ApplicationRepository + AssignmentLedger + 'static,
{
    let storage = Arc::new(FileSystemStorage::open(&config.storage.upload_dir)?);
    let accounts = Arc::new(AccountService::new(
        store.clone(),
        Arc::new(LogResetNotifier),
        config.accounts.settings(),
    ));

    if let Some(seed) = &config.accounts.seed_admin {
        match accounts.seed_reviewer(&seed.email, &seed.password)? {
            Some(reviewer) => info!(user_id = %reviewer.user_id, "seed reviewer created"),
            None => info!("reviewers already exist; seed skipped"),
        }
    }

    let portal = Arc::new(ApplicationPortal::new(store.clone(), storage));
    Ok(Router::new()
        .merge(account_router(accounts))
        .merge(application_router(portal, SessionGuard::new(store))))
}
