//! Daemon command: wires the scheduler, the container executors, the
//! configuration watch loop, and the web server together.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use miette::Result;
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::{error, info, warn};

use tugboat_docker::{DockerCli, DockerError, DockerExecutor, ExecParams, StartParams};
use tugboat_scheduler::{
    CompletionCorrelator, HandlerError, HandlerTable, JobHandler, ParamSource, Scheduler,
    registry,
};
use tugboat_web::{AppState, FileLogStore, create_router};

use crate::config::DaemonConfig;

/// Run the daemon until a shutdown signal arrives.
pub async fn run(config_path: PathBuf) -> Result<()> {
    let raw = tokio::fs::read_to_string(&config_path)
        .await
        .map_err(|e| miette::miette!("cannot read {}: {e}", config_path.display()))?;
    let config = DaemonConfig::parse(&raw)?;
    let loaded = registry::load(&raw).map_err(|e| miette::miette!("{e}"))?;

    let params: ParamSource = Arc::new(std::sync::RwLock::new(loaded.parameters.clone()));
    let runtime = Arc::new(DockerCli::new(&config.docker.binary));
    let executor = Arc::new(DockerExecutor::new(runtime));

    let table = build_handler_table(Arc::clone(&params), executor);
    let correlator = Arc::new(CompletionCorrelator::new());
    let scheduler = Arc::new(Scheduler::new(table.into_executor(), correlator));

    // A schedule that cannot be built at startup is fatal.
    scheduler
        .reconcile(loaded.definitions)
        .await
        .map_err(|e| miette::miette!("{e}"))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Handle shutdown signals
    let signal_shutdown_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal");
        let _ = signal_shutdown_tx.send(true);
    });

    // Spawn scheduler loop
    let scheduler_handle = {
        let scheduler = Arc::clone(&scheduler);
        let shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move { scheduler.run(shutdown_rx).await })
    };

    // Spawn configuration watch loop
    let watch_handle = spawn_config_watch(
        config_path,
        Duration::from_secs(config.watch.interval),
        Arc::clone(&scheduler),
        params,
        shutdown_tx,
        shutdown_rx.clone(),
    );

    // Web server
    let state = Arc::new(AppState {
        scheduler: Arc::clone(&scheduler),
        logs: Arc::new(FileLogStore::new(&config.logs.dir)),
    });
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.web.port))
        .await
        .map_err(|e| miette::miette!("cannot bind port {}: {e}", config.web.port))?;
    info!("web server listening on http://0.0.0.0:{}", config.web.port);

    let mut web_shutdown = shutdown_rx;
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            loop {
                if *web_shutdown.borrow() {
                    break;
                }
                if web_shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
        .map_err(|e| miette::miette!("web server error: {e}"))?;

    let _ = scheduler_handle.await;
    let _ = watch_handle.await;
    info!("daemon stopped");
    Ok(())
}

/// Build the table mapping each handler kind to its container routine.
fn build_handler_table(params: ParamSource, executor: Arc<DockerExecutor>) -> HandlerTable {
    let mut table = HandlerTable::new(params);

    {
        let executor = Arc::clone(&executor);
        table.register(JobHandler::Start, move |ctx| {
            let executor = Arc::clone(&executor);
            async move {
                let params: StartParams = parse_params(ctx.parameters)?;
                executor
                    .start(&params, &ctx.cancel)
                    .await
                    .map_err(into_handler_error)
            }
        });
    }

    table.register(JobHandler::Exec, move |ctx| {
        let executor = Arc::clone(&executor);
        async move {
            let params: ExecParams = parse_params(ctx.parameters)?;
            executor
                .exec(&params, ctx.instance_param.as_deref(), &ctx.cancel)
                .await
                .map_err(into_handler_error)
        }
    });

    table
}

fn parse_params<T: DeserializeOwned>(value: Option<toml::Value>) -> Result<T, HandlerError> {
    value
        .ok_or_else(|| HandlerError::Config("job has no parameters".to_string()))?
        .try_into()
        .map_err(|e: toml::de::Error| HandlerError::Config(e.to_string()))
}

fn into_handler_error(e: DockerError) -> HandlerError {
    match e {
        DockerError::Cancelled => HandlerError::Cancelled,
        DockerError::MissingParameter(p) => {
            HandlerError::Config(format!("missing parameter: {p}"))
        }
        other => HandlerError::Failed(other.to_string()),
    }
}

/// Poll the configuration file's modification time; on change, re-read it,
/// swap the live parameters, and reconcile the schedule. The fingerprint
/// short-circuit inside `reconcile` keeps spurious wakeups cheap.
///
/// An unusable configuration (unparseable file, or an empty job set) shuts
/// the daemon down rather than letting it run a stale schedule forever.
fn spawn_config_watch(
    path: PathBuf,
    interval: Duration,
    scheduler: Arc<Scheduler>,
    params: ParamSource,
    shutdown_tx: watch::Sender<bool>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        info!(path = %path.display(), interval = ?interval, "configuration watch started");
        let mut last_modified = modified_at(&path).await;
        let mut ticker = tokio::time::interval(interval);

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }

                _ = ticker.tick() => {
                    let modified = modified_at(&path).await;
                    if modified == last_modified {
                        continue;
                    }
                    last_modified = modified;
                    info!(path = %path.display(), "configuration file changed, reloading");

                    let raw = match tokio::fs::read_to_string(&path).await {
                        Ok(raw) => raw,
                        Err(e) => {
                            warn!(error = %e, "cannot re-read configuration, keeping previous schedule");
                            continue;
                        }
                    };

                    match registry::load(&raw) {
                        Ok(loaded) => {
                            if let Ok(mut live) = params.write() {
                                *live = loaded.parameters;
                            }
                            if let Err(e) = scheduler.reconcile(loaded.definitions).await {
                                error!(error = %e, "unusable configuration, shutting down");
                                let _ = shutdown_tx.send(true);
                                break;
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "unusable configuration, shutting down");
                            let _ = shutdown_tx.send(true);
                            break;
                        }
                    }
                }
            }
        }

        info!("configuration watch stopped");
    })
}

async fn modified_at(path: &Path) -> Option<SystemTime> {
    tokio::fs::metadata(path)
        .await
        .and_then(|m| m.modified())
        .ok()
}
