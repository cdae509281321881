use anyhow::Context;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};
use unibox_core::accounts::AccountRegistry;
use unibox_core::config::AppConfig;
use unibox_core::credentials::{mask_secret, CredentialStore};
use unibox_core::metrics::MetricsStore;
use unibox_core::types::PlatformType;
use unibox_inbox::Inbox;
use unibox_persistence::open_store;
use unibox_server::{build_clients, build_receivers, Gateway};

pub fn get_config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".unibox")
}

/// Stdout gets everything except the `audit` target, which goes to a daily
/// rolling JSONL file. Keep the guard alive for the life of the process.
pub fn init_tracing(log_dir: &Path) -> WorkerGuard {
    let (non_blocking, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(log_dir, "audit.jsonl"));

    let audit_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_target(false)
        .with_level(false)
        .with_file(false)
        .with_line_number(false)
        .without_time()
        .with_filter(tracing_subscriber::filter::Targets::new().with_target("audit", Level::INFO));

    let stdout_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_filter(stdout_filter)
        .with_filter(tracing_subscriber::filter::filter_fn(|metadata| {
            metadata.target() != "audit"
        }));

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(audit_layer)
        .init();
    guard
}

pub fn credentials_path(config: &AppConfig) -> PathBuf {
    config
        .credentials_path
        .clone()
        .unwrap_or_else(CredentialStore::default_path)
}

pub fn log_dir(config: &AppConfig) -> PathBuf {
    config
        .log_dir
        .clone()
        .unwrap_or_else(|| get_config_dir().join("logs"))
}

pub fn load_accounts(config: &AppConfig) -> anyhow::Result<Arc<AccountRegistry>> {
    let path = credentials_path(config);
    let credentials = CredentialStore::load(&path)
        .with_context(|| format!("failed to read credentials from {}", path.display()))?;
    Ok(Arc::new(config.account_registry(&credentials)))
}

/// Wire store, accounts, platforms and the ingest pipeline.
pub async fn build_inbox(config: &AppConfig) -> anyhow::Result<(Inbox, Arc<AccountRegistry>, Arc<MetricsStore>)> {
    let accounts = load_accounts(config)?;
    let store = open_store(&config.database.url)
        .await
        .with_context(|| format!("failed to open store `{}`", config.database.url))?;
    let metrics = MetricsStore::new();
    let inbox = Inbox::start(
        config,
        store,
        accounts.clone(),
        build_clients(&config.platforms),
        metrics.clone(),
    );
    Ok((inbox, accounts, metrics))
}

pub async fn run_server(config: AppConfig) -> anyhow::Result<()> {
    let (inbox, accounts, metrics) = build_inbox(&config).await?;
    for platform in config.configured_platforms() {
        info!(platform, "webhook endpoint enabled at /webhooks/{platform}");
    }
    if accounts.is_empty() {
        warn!("no connected accounts configured; every webhook event will be skipped");
    }

    let gateway = Gateway::new(
        &config.server,
        build_receivers(&config.platforms, accounts.clone()),
        inbox.ingestor.clone(),
        inbox.queue.clone(),
        inbox.controller.clone(),
        accounts,
        metrics,
    );

    gateway
        .serve(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for shutdown signal");
            }
            info!("shutdown requested");
        })
        .await?;

    inbox.shutdown().await;
    info!("ingest queue drained, bye");
    Ok(())
}

pub async fn run_stats(config: &AppConfig, organization_id: &str) -> anyhow::Result<()> {
    let (inbox, accounts, _) = build_inbox(config).await?;
    let scope = accounts.scope_for_org(organization_id);
    let stats = inbox.controller.get_stats(&scope).await?;

    println!("Organization: {organization_id} ({} accounts)", scope.account_ids.len());
    println!("Total:  {}", stats.total);
    println!("Unread: {}", stats.unread());
    for (status, count) in &stats.by_status {
        println!("  {status:<10} {count}");
    }
    for (platform, count) in &stats.by_platform {
        println!("  {platform:<10} {count}");
    }
    inbox.shutdown().await;
    Ok(())
}

pub async fn run_sync(config: &AppConfig, organization_id: &str) -> anyhow::Result<()> {
    let (inbox, accounts, _) = build_inbox(config).await?;
    let scope = accounts.scope_for_org(organization_id);
    let report = inbox.controller.sync(&scope).await;

    for account in &report.accounts {
        println!(
            "{:<16} {:<10} {:?}: fetched {}, inserted {}, duplicates {}{}",
            account.account_id,
            account.platform,
            account.status,
            account.fetched,
            account.inserted,
            account.duplicates,
            account
                .error
                .as_deref()
                .map(|e| format!(" ({e})"))
                .unwrap_or_default(),
        );
    }
    println!("Inserted {} new messages", report.inserted());
    inbox.shutdown().await;
    Ok(())
}

/// Print what is configured without starting anything.
pub fn check_config(config: &AppConfig) -> anyhow::Result<()> {
    println!("Database: {}", config.database.url);
    println!(
        "Server:   {}:{} (auth {})",
        config.server.host,
        config.server.port,
        if config.server.auth_token.is_some() { "on" } else { "off, localhost only" }
    );
    println!("Ingest:   {:?} mode", config.ingest.mode);

    let accounts = load_accounts(config)?;
    for platform in PlatformType::ALL {
        let configured = config.configured_platforms().contains(&platform.as_str());
        let count = accounts.for_platform(*platform).count();
        println!(
            "{:<10} webhook {:<4} accounts {}",
            platform.as_str(),
            if configured { "yes" } else { "no" },
            count
        );
        for account in accounts.for_platform(*platform) {
            let token = account
                .access_token
                .as_deref()
                .map(mask_secret)
                .unwrap_or_else(|| "missing".to_string());
            println!("    {} ({}) token {}", account.id, account.platform_account_id, token);
        }
    }
    Ok(())
}

pub fn set_credential(config: &AppConfig, account_id: &str, token: &str) -> anyhow::Result<()> {
    let path = credentials_path(config);
    let mut store = CredentialStore::load(&path)?;
    store.set(account_id.to_string(), token.to_string());
    store.save(&path)?;
    println!("Stored token {} for {account_id}", mask_secret(token));
    Ok(())
}

pub fn remove_credential(config: &AppConfig, account_id: &str) -> anyhow::Result<()> {
    let path = credentials_path(config);
    let mut store = CredentialStore::load(&path)?;
    match store.remove(account_id) {
        Some(_) => {
            store.save(&path)?;
            println!("Removed token for {account_id}");
        }
        None => println!("No token stored for {account_id}"),
    }
    Ok(())
}
