//! # Secrets Manager
//!
//! A Kubernetes controller that materializes `SecretDefinition` resources into
//! Kubernetes Secrets, reading the values from Vault.
//!
//! ## Overview
//!
//! 1. **Watching SecretDefinitions** - every change enqueues the definition's key
//! 2. **Reading Vault** - each data entry is read from its path/key and decoded
//! 3. **Writing Secrets** - the Secret is written into every target namespace
//!    whose current content differs
//!
//! ## Usage
//!
//! ```bash
//! VAULT_ADDR=https://vault:8200 VAULT_TOKEN=... secrets-manager --workers 4
//! ```

mod cli;

use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use kube::api::{Api, ListParams};
use kube::Client;
use kube_runtime::reflector::store::Writer;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use secrets_manager::backend::VaultBackend;
use secrets_manager::config::{ControllerConfig, VaultConfig};
use secrets_manager::controller::cache::watch_definitions;
use secrets_manager::controller::Controller;
use secrets_manager::crd::{SecretDefinition, GROUP, VERSION};
use secrets_manager::kubernetes::KubeSecretStore;
use secrets_manager::observability::metrics;
use secrets_manager::secrets_manager::SecretsManager;
use secrets_manager::server::{start_server, ServerState};

use crate::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut controller_config = ControllerConfig::from_env();
    cli.apply_controller(&mut controller_config);
    let mut vault_config = VaultConfig::from_env();
    cli.apply_vault(&mut vault_config);

    // Required for rustls 0.23+ when no default provider is set via features
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("failed to install rustls crypto provider"))?;

    init_tracing(&controller_config.log_level, &controller_config.log_format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        git_hash = env!("BUILD_GIT_HASH"),
        built = env!("BUILD_DATETIME"),
        "starting secrets-manager"
    );
    info!(config = ?controller_config, vault = ?vault_config, "configuration loaded");

    metrics::register_metrics().context("failed to register metrics")?;

    let client = Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;

    let definitions: Api<SecretDefinition> = match &controller_config.watch_namespace {
        Some(namespace) => Api::namespaced(client.clone(), namespace),
        None => Api::all(client.clone()),
    };
    definitions
        .list(&ListParams::default().limit(1))
        .await
        .with_context(|| {
            format!("SecretDefinition CRD ({GROUP}/{VERSION}) is not queryable, is it installed?")
        })?;

    if vault_config.token.is_empty() {
        bail!("a Vault token is required (VAULT_TOKEN or --vault-token)");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);

    let backend =
        Arc::new(VaultBackend::new(&vault_config).context("failed to create Vault client")?);
    let renewer = Arc::clone(&backend).spawn_token_renewer(shutdown_rx.clone());

    let store = Arc::new(KubeSecretStore::new(client));
    let manager = Arc::new(SecretsManager::new(backend, store));

    let writer: Writer<SecretDefinition> = Writer::default();
    let reader = writer.as_reader();
    let controller = Controller::new(Arc::new(reader.clone()), manager, &controller_config);

    let watcher = tokio::spawn(watch_definitions(
        definitions,
        writer,
        controller.queue(),
        shutdown_rx.clone(),
    ));

    let server_state = Arc::new(ServerState::default());
    let server = tokio::spawn({
        let state = Arc::clone(&server_state);
        let port = controller_config.metrics_port;
        let shutdown = shutdown_rx.clone();
        async move {
            if let Err(e) = start_server(port, state, shutdown).await {
                error!(error = %e, "HTTP server error");
            }
        }
    });

    tokio::spawn({
        let state = Arc::clone(&server_state);
        let reader = reader.clone();
        async move {
            if reader.wait_until_ready().await.is_ok() {
                state.set_ready();
                info!("SecretDefinition cache synced, ready");
            }
        }
    });

    tokio::spawn({
        let state = Arc::clone(&server_state);
        let shutdown_tx = Arc::clone(&shutdown_tx);
        async move {
            shutdown_signal().await;
            info!("received shutdown signal (SIGINT/SIGTERM), initiating graceful shutdown");
            state
                .is_ready
                .store(false, std::sync::atomic::Ordering::Relaxed);
            shutdown_tx.send_replace(true);
        }
    });

    let result = controller
        .run(controller_config.workers, shutdown_rx)
        .await
        .context("controller failed");

    shutdown_tx.send_replace(true);
    let (watcher, server, renewer) = tokio::join!(watcher, server, renewer);
    for (task, joined) in [("watcher", watcher), ("server", server), ("token renewer", renewer)] {
        if let Err(e) = joined {
            error!(task, error = %e, "background task failed");
        }
    }

    result?;
    info!("secrets-manager stopped");
    Ok(())
}

/// Install the global subscriber. `level` accepts any `EnvFilter` directive.
fn init_tracing(level: &str, format: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if format.eq_ignore_ascii_case("json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Resolves on SIGINT, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "unable to listen for SIGINT");
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
                error!(error = %e, "unable to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
