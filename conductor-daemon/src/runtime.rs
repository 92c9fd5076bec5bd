use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

use conductor_core::{config, ConductorConfig, ConfigError, TargetKey};
use conductor_sync::Orchestrator;

use crate::connectors::CommandConnector;
use crate::error::{io_err, DaemonError};
use crate::paths::{conductor_root, socket_path};
use crate::protocol::{DaemonRequest, DaemonResponse, DaemonStatus, SyncReply};

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path, config_path: &Path) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf(), config_path.to_path_buf()))
}

/// Load the target configuration and serve until stopped.
pub async fn run(home: PathBuf, config_path: PathBuf) -> Result<(), DaemonError> {
    let config = config::load_from(&config_path)?;
    let orchestrator = Arc::new(build_orchestrator(&config)?);
    tracing::info!(
        config = %config_path.display(),
        targets = orchestrator.registry().len(),
        "daemon starting",
    );
    serve(home, orchestrator).await
}

/// Register the configured targets, each backed by its connector command.
pub fn build_orchestrator(config: &ConductorConfig) -> Result<Orchestrator, DaemonError> {
    let registry = config.build_registry()?;
    let mut builder = Orchestrator::builder(registry).settings(config);
    for target in &config.targets {
        let key = target.key();
        let Some(connector) = target.connector.clone() else {
            return Err(ConfigError::InvalidTarget {
                key: key.to_string(),
                reason: "no connector command configured".to_string(),
            }
            .into());
        };
        builder = builder.connector(key.clone(), Arc::new(CommandConnector::new(key, connector)));
    }
    Ok(builder.build()?)
}

/// Run the tick loop, socket server and signal handler until shutdown.
pub async fn serve(home: PathBuf, orchestrator: Arc<Orchestrator>) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;
    let started_at = Utc::now();
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let scheduler_handle = {
        let shutdown = shutdown_tx.clone();
        let orchestrator = Arc::clone(&orchestrator);
        let shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            let result = scheduler_task(orchestrator, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let orchestrator = Arc::clone(&orchestrator);
        let shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            let result = socket_server_task(
                home,
                orchestrator,
                shutdown.clone(),
                shutdown_rx,
                started_at,
            )
            .await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        let mut shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (scheduler_result, socket_result, signal_result) =
        tokio::join!(scheduler_handle, socket_handle, signal_handle);

    handle_join("scheduler", scheduler_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    tracing::info!("daemon stopped");
    Ok(())
}

async fn scheduler_task(
    orchestrator: Arc<Orchestrator>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut interval = tokio::time::interval(orchestrator.tick_period());
    // A slow tick never causes a burst of catch-up ticks.
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                let pending = orchestrator.tick();
                let report = pending.report();
                tracing::debug!(
                    tick = report.tick,
                    dispatched = report.dispatched.len(),
                    skipped = report.skipped.len(),
                    still_running = report.still_running.len(),
                    "tick dispatched",
                );
                tokio::spawn(pending.finish());
            }
        }
    }
    Ok(())
}

async fn socket_server_task(
    home: PathBuf,
    orchestrator: Arc<Orchestrator>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
    started_at: DateTime<Utc>,
) -> Result<(), DaemonError> {
    let socket = socket_path(&home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let client = Client {
                    orchestrator: Arc::clone(&orchestrator),
                    shutdown_tx: shutdown_tx.clone(),
                    socket: socket.clone(),
                    started_at,
                };
                tokio::spawn(async move {
                    if let Err(err) = client.handle(stream).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

struct Client {
    orchestrator: Arc<Orchestrator>,
    shutdown_tx: broadcast::Sender<()>,
    socket: PathBuf,
    started_at: DateTime<Utc>,
}

impl Client {
    async fn handle(self, stream: UnixStream) -> Result<(), DaemonError> {
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| io_err("daemon socket read", e))?
        {
            if line.trim().is_empty() {
                continue;
            }

            let request = match serde_json::from_str::<DaemonRequest>(&line) {
                Ok(request) => request,
                Err(err) => {
                    write_response(
                        &mut writer,
                        &DaemonResponse::error(format!("invalid request JSON: {err}")),
                    )
                    .await?;
                    continue;
                }
            };

            let response = self.respond(&request).await;
            write_response(&mut writer, &response).await?;
            if request.cmd == "stop" {
                break;
            }
        }

        Ok(())
    }

    async fn respond(&self, request: &DaemonRequest) -> DaemonResponse {
        match request.cmd.as_str() {
            "status" => {
                let status = DaemonStatus {
                    running: true,
                    started_at: self.started_at,
                    socket: self.socket.display().to_string(),
                    tick_secs: self.orchestrator.tick_period().as_secs(),
                    report: self.orchestrator.status().await,
                };
                to_response(&status)
            }
            "sync" => {
                let Some(raw) = request.target.as_deref() else {
                    return DaemonResponse::error("sync requires a target (platform/data_type)");
                };
                let key = match raw.parse::<TargetKey>() {
                    Ok(key) => key,
                    Err(err) => return DaemonResponse::error(err.to_string()),
                };
                match self.orchestrator.force_sync(&key).await {
                    Ok(outcome) => to_response(&SyncReply {
                        attempts: outcome.retried.len() + 1,
                        record: outcome.record,
                    }),
                    Err(err) => DaemonResponse::error(err.to_string()),
                }
            }
            "stop" => {
                let _ = self.shutdown_tx.send(());
                DaemonResponse::ok(json!({ "stopping": true }))
            }
            other => DaemonResponse::error(format!("unknown command '{other}'")),
        }
    }
}

fn to_response(payload: &impl serde::Serialize) -> DaemonResponse {
    match serde_json::to_value(payload) {
        Ok(value) => DaemonResponse::ok(value),
        Err(err) => DaemonResponse::error(format!("failed to encode response: {err}")),
    }
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    let root = conductor_root(home);
    if !root.exists() {
        fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

/// `RUST_LOG` filters (default `info`); `CONDUCTOR_LOG_FORMAT=json` switches
/// to one JSON object per event.
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("CONDUCTOR_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let _ = if json {
        fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .try_init()
    } else {
        fmt().with_env_filter(filter).with_target(false).try_init()
    };
}

fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;

    fn config(yaml: &str) -> ConductorConfig {
        serde_yaml::from_str(yaml).expect("config")
    }

    #[test]
    fn targets_without_a_connector_command_are_rejected() {
        let config = config(
            "targets:\n  - platform: crm\n    data_type: deals\n    priority: high\n    interval_secs: 60\n",
        );
        let err = build_orchestrator(&config).unwrap_err();
        assert!(err.to_string().contains("no connector command"), "{err}");
    }

    #[test]
    fn dependency_cycles_stop_startup() {
        let config = config(
            "targets:
  - {platform: a, data_type: x, priority: high, interval_secs: 60, depends_on: [b/x], connector: {command: /bin/true}}
  - {platform: b, data_type: x, priority: high, interval_secs: 60, depends_on: [a/x], connector: {command: /bin/true}}
",
        );
        let err = build_orchestrator(&config).unwrap_err();
        assert!(matches!(err, DaemonError::Config(ConfigError::DependencyCycle { .. })), "{err}");
    }

    #[test]
    fn stale_socket_file_is_removed_before_bind() {
        let home = TempDir::new().expect("home");
        let socket = socket_path(home.path());
        fs::create_dir_all(socket.parent().expect("parent")).expect("mkdir");
        fs::write(&socket, b"").expect("stale socket");

        prepare_socket_for_bind(&socket).expect("prepare");
        assert!(!socket.exists());
    }

    #[tokio::test]
    async fn unknown_commands_get_an_error_response() {
        let orchestrator = Orchestrator::builder(conductor_core::TargetRegistry::default())
            .build()
            .expect("build");
        let (shutdown_tx, _) = broadcast::channel(1);
        let client = Client {
            orchestrator: Arc::new(orchestrator),
            shutdown_tx,
            socket: PathBuf::from("/tmp/conductor.sock"),
            started_at: Utc::now(),
        };

        let response = client
            .respond(&DaemonRequest {
                cmd: "reload".to_string(),
                target: None,
            })
            .await;
        assert!(!response.ok);
        assert_eq!(response.error.as_deref(), Some("unknown command 'reload'"));

        let response = client
            .respond(&DaemonRequest {
                cmd: "sync".to_string(),
                target: Some("nope".to_string()),
            })
            .await;
        assert!(!response.ok);
    }
}
