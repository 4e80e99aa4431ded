use clap::Args;
use metrics_exporter_prometheus::PrometheusHandle;
use mortgage_router::applications::{next_reviewer, AssignmentLedger};
use mortgage_router::config::{AppConfig, StorageConfig};
use mortgage_router::error::AppError;
use mortgage_router::identity::{AccountService, IdentityStore, LogResetNotifier, Profile};
use mortgage_router::store::SqliteStore;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

#[derive(Args, Debug)]
pub(crate) struct ReviewerAddArgs {
    /// Login email for the reviewer
    #[arg(long)]
    pub(crate) email: String,
    /// Initial password
    #[arg(long)]
    pub(crate) password: String,
    #[arg(long)]
    pub(crate) first_name: Option<String>,
    #[arg(long)]
    pub(crate) last_name: Option<String>,
}

/// Open the configured SQLite database for operator commands.
pub(crate) fn open_records(storage: &StorageConfig) -> Result<Arc<SqliteStore>, AppError> {
    if storage.uses_memory_store() {
        println!("Note: APP_DATABASE_PATH is in-memory; changes end with this command.");
    }
    Ok(Arc::new(SqliteStore::open(&storage.database_path)?))
}

pub(crate) fn add_reviewer(args: ReviewerAddArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    let store = open_records(&config.storage)?;
    let accounts = AccountService::new(
        store,
        Arc::new(LogResetNotifier),
        config.accounts.settings(),
    );

    let profile = Profile {
        first_name: args.first_name,
        last_name: args.last_name,
        ..Profile::default()
    };
    let reviewer = accounts.create_reviewer(&args.email, &args.password, profile)?;
    println!("Reviewer #{} created for {}", reviewer.user_id, reviewer.email);
    Ok(())
}

pub(crate) fn list_reviewers() -> Result<(), AppError> {
    let config = AppConfig::load()?;
    let store = open_records(&config.storage)?;
    let reviewers = store.reviewer_ids()?;
    let cursor = store.cursor()?;

    if reviewers.is_empty() {
        println!("No reviewers registered; submissions will wait for one.");
        return Ok(());
    }

    let next = next_reviewer(&reviewers, cursor);
    println!("Reviewers in assignment order");
    for id in &reviewers {
        let email = store
            .user_by_id(*id)?
            .map(|user| user.email)
            .unwrap_or_default();
        let marker = if Some(*id) == next { "  <- next" } else { "" };
        println!("  #{id} {email}{marker}");
    }
    match cursor {
        Some(cursor) => println!("Cursor: #{cursor}"),
        None => println!("Cursor: unset"),
    }
    Ok(())
}
