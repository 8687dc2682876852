//! Reader Catalogs - command-line front end
//!
//! Syncs the remote catalog index and manages installed catalogs.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use reader_catalogs::cache::IconCache;
use reader_catalogs::catalog::{
    Catalog, CatalogRegistry, HttpIndexSource, InstallTimeouts, InstallationEvents, LocalPackageInstaller,
    NativeInstaller, RegistryOptions, RemoteIndexSync,
};
use reader_catalogs::core::config::{CliArgs, Command, Config};
use reader_catalogs::core::{FilePreferenceStore, HttpClient, Logger, ReqwestHttpClient};
use reader_catalogs::plugin::{PermissionStore, PluginMetadata, ValidationEngine, ValidationResult};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = CliArgs::parse();

    // Load configuration (handles CLI args, env vars, and config file)
    let config = match Config::load(&cli) {
        Ok(cfg) => cfg,
        Err(e) => {
            // Logging isn't initialized yet
            eprintln!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    let _logger = match Logger::init(&config.logging) {
        Ok(logger) => logger,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            return Err(e);
        }
    };

    info!(version = reader_catalogs::VERSION, "Starting reader-catalogs");
    info!(
        index_url = %config.catalog.index_url,
        data_dir = ?config.storage.data_dir,
        cache_dir = ?config.storage.cache_dir,
        "Configuration loaded"
    );

    if let Command::Validate { script, metadata } = &cli.command {
        return validate_script(script, metadata.as_deref());
    }

    let shutdown = CancellationToken::new();
    // Explicit commands never install or update anything besides their target
    let options = match cli.command {
        Command::Sync | Command::Watch => RegistryOptions::from(&config.catalog),
        _ => RegistryOptions {
            auto_install_new: false,
            auto_update: false,
        },
    };
    let registry = Arc::new(build_registry(&config, options, shutdown.clone())?);
    let restored = registry.restore()?;
    info!(restored, "Catalog registry ready");

    match cli.command {
        Command::Sync => {
            let report = registry.sync_remote().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::List { lang, all } => {
            if all {
                registry.sync_remote().await?;
            }
            let catalogs = match (&lang, all) {
                (Some(lang), _) => registry.get_catalogs_by_lang(lang),
                (None, true) => registry.catalogs(),
                (None, false) => registry.get_installed_catalogs(),
            };
            catalogs
                .iter()
                .filter(|c| all || c.install_state.is_installed())
                .for_each(print_catalog);
        }
        Command::Install { id } => {
            registry.sync_remote().await?;
            let catalog = registry.install(&id).await?;
            print_catalog(&catalog);
        }
        Command::Update { id } => {
            registry.sync_remote().await?;
            let catalog = registry.update(&id).await?;
            print_catalog(&catalog);
        }
        Command::UpdateAll => {
            registry.sync_remote().await?;
            let report = registry.update_all().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.failures.is_empty() {
                anyhow::bail!("{} catalog(s) failed to update", report.failures.len());
            }
        }
        Command::Uninstall { id } => {
            registry.uninstall(&id).await?;
            println!("Uninstalled {}", id);
        }
        Command::Pin { id } => {
            let pinned = registry.toggle_pinned(&id).await?;
            println!("{} {}", id, if pinned { "pinned" } else { "unpinned" });
        }
        Command::Watch => {
            let interval = Duration::from_secs(config.catalog.sync_interval_secs);
            let handle = RemoteIndexSync::spawn_periodic(registry.clone(), interval, shutdown.clone());
            info!(interval_secs = interval.as_secs(), "Watching remote index, press Ctrl-C to stop");

            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for shutdown signal")?;
            info!("Shutdown requested");
            shutdown.cancel();
            if let Err(e) = handle.await {
                warn!(error = %e, "Periodic sync task ended abnormally");
            }
        }
        // Handled before the registry is built
        Command::Validate { .. } => {}
    }

    Ok(())
}

fn build_registry(config: &Config, options: RegistryOptions, shutdown: CancellationToken) -> Result<CatalogRegistry> {
    for dir in [
        config.storage.preferences_dir(),
        config.storage.scripts_dir(),
        config.storage.native_dir(),
        config.storage.cache_dir.clone(),
    ] {
        std::fs::create_dir_all(&dir).with_context(|| format!("Failed to create directory {:?}", dir))?;
    }

    let http: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::new(&config.network)?);
    let prefs = Arc::new(FilePreferenceStore::new(config.storage.preferences_dir())?);
    let permissions = Arc::new(PermissionStore::new(prefs.clone(), config.permissions.policy()));
    let icons = Arc::new(
        IconCache::new(config.storage.cache_dir.clone(), http.clone(), config.network.max_icon_bytes)
            .with_download_timeout(Duration::from_secs(config.network.request_timeout_secs))
            .with_shutdown(shutdown.clone())
            .allow_localhost(config.network.allow_localhost),
    );

    let installer = NativeInstaller::new(
        http.clone(),
        Arc::new(LocalPackageInstaller::new(config.storage.native_dir())),
        Arc::new(InstallationEvents::default()),
        config.storage.scripts_dir(),
        InstallTimeouts::uniform(Duration::from_secs(config.catalog.install_timeout_secs)),
    )
    .allow_localhost(config.network.allow_localhost)
    .max_package_bytes(config.network.max_package_bytes);

    let index = Arc::new(HttpIndexSource::new(
        config.catalog.index_url.clone(),
        http,
        config.network.allow_localhost,
    ));

    Ok(CatalogRegistry::new(installer, prefs, permissions, icons, index, options).with_shutdown(shutdown))
}

fn validate_script(script: &std::path::Path, metadata: Option<&std::path::Path>) -> Result<()> {
    let source = std::fs::read_to_string(script).with_context(|| format!("Failed to read {:?}", script))?;
    let engine = ValidationEngine::new();

    let result = match metadata {
        Some(path) => {
            let raw = std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
            let meta: PluginMetadata = serde_json::from_str(&raw).context("Invalid metadata JSON")?;
            engine.validate(&source, &meta)
        }
        None => engine.validate_code(&source),
    };

    match result {
        ValidationResult::Valid => {
            println!("valid");
            Ok(())
        }
        ValidationResult::Invalid(reason) => anyhow::bail!("invalid: {}", reason),
    }
}

fn print_catalog(catalog: &Catalog) {
    let mut state = format!("{:?}", catalog.install_state);
    if catalog.has_update() {
        state.push_str(", update available");
    }
    println!(
        "{}{:<24} {:<10} {:<6} {:<7} {}",
        if catalog.pinned { "*" } else { " " },
        catalog.id(),
        catalog.version(),
        catalog.metadata.lang,
        catalog.kind.to_string(),
        state
    );
}
