#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

mod args;

use std::{path::Path, sync::Arc};

use anyhow::Context;
use args::{Args, Command, DispatchArgs};
use clap::Parser;
use conduit_config::Config;
use conduit_llm::{Credential, Gateway, GatewayRequest, Request, Router, Transport};
use conduit_ratelimit::RateLimiter;
use conduit_store::{Backoff, ChangeHandler, ChangeListener, ConfigStore, MemorySource, PgNotifications, PostgresSource};
use futures_util::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::load(&args.config)?;
    let _telemetry_guard = conduit_telemetry::init(config.telemetry.as_ref(), &args.log)?;

    tracing::debug!(config_path = %args.config.display(), "configuration loaded");

    match args.command {
        Command::Dispatch(dispatch_args) => dispatch(&config, dispatch_args).await,
        Command::Watch => watch(&config).await,
    }
}

/// Config store plus the Postgres source backing it, if any
async fn open_store(config: &Config) -> anyhow::Result<(Arc<ConfigStore>, Option<PostgresSource>)> {
    match &config.database {
        Some(database) => {
            let source = PostgresSource::connect(database)
                .await
                .context("failed to connect to the config database")?;
            let store = ConfigStore::load(Arc::new(source.clone())).await?;
            Ok((Arc::new(store), Some(source)))
        }
        None => {
            let source = MemorySource::from_records(config.provider_records(), config.virtual_keys.clone());
            let store = ConfigStore::load(Arc::new(source)).await?;
            Ok((Arc::new(store), None))
        }
    }
}

async fn dispatch(config: &Config, args: DispatchArgs) -> anyhow::Result<()> {
    let request: Request = serde_json::from_slice(&read_request(&args.request).await?)
        .with_context(|| format!("{} is not a canonical request", args.request.display()))?;

    let (store, _) = open_store(config).await?;
    let router = Router::new(store, Transport::new(config.gateway.stream_buffer))
        .with_base_url_fallbacks(config.base_url_fallbacks());
    let limiter = RateLimiter::from_config(&config.rate_limit)?;
    let gateway = Gateway::standard(router, limiter, &config.gateway);

    let mut gateway_request = GatewayRequest::new(args.provider, request);
    if let Some(secret) = args.virtual_key {
        gateway_request = gateway_request.with_virtual_key(secret);
    }
    if let Some(name) = args.key {
        gateway_request = gateway_request.with_credential(Credential::Named(name));
    }

    let mut stdout = tokio::io::stdout();

    if args.stream {
        let mut chunks = gateway.dispatch_streaming(gateway_request).await?;
        while let Some(chunk) = chunks.next().await {
            let mut line = serde_json::to_vec(&chunk)?;
            line.push(b'\n');
            stdout.write_all(&line).await?;
        }
    } else {
        let response = gateway.dispatch(gateway_request).await?;
        let mut body = serde_json::to_vec_pretty(&response)?;
        body.push(b'\n');
        stdout.write_all(&body).await?;
    }

    stdout.flush().await?;
    Ok(())
}

async fn read_request(path: &Path) -> anyhow::Result<Vec<u8>> {
    if path == Path::new("-") {
        let mut buffer = Vec::new();
        tokio::io::stdin().read_to_end(&mut buffer).await?;
        return Ok(buffer);
    }

    tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))
}

async fn watch(config: &Config) -> anyhow::Result<()> {
    let database = config
        .database
        .as_ref()
        .context("watch needs a [database] section")?;
    let (store, source) = open_store(config).await?;
    let source = source.context("watch needs a database-backed store")?;

    let (initial, max) = config.listener.backoff()?;
    let mut listener = ChangeListener::new(Backoff { initial, max });
    listener.subscribe(Arc::clone(&store) as Arc<dyn ChangeHandler>);
    let handle = listener.spawn(PgNotifications::new(source.pool().clone(), database.channel.clone()));

    let counts = store.counts().await;
    tracing::info!(
        channel = %database.channel,
        providers = counts.providers,
        api_keys = counts.api_keys,
        virtual_keys = counts.virtual_keys,
        "watching config changes"
    );

    let shutdown = CancellationToken::new();
    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown_clone.cancel();
    });

    shutdown.cancelled().await;
    handle.stop().await;

    tracing::info!("conduit stopped");
    Ok(())
}

/// Wait for `SIGINT` or `SIGTERM`
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
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
                tracing::error!(error = %e, "failed to install SIGTERM handler");
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

    tracing::info!("shutdown signal received");
}
