//! Encoder process lifecycle.
//!
//! Exactly one encoder runs at a time. Starting a new composition always
//! tears the previous one down first and wipes the working directory, so
//! the static server never mixes segments from two runs. Teardown is
//! awaited: the old child is reaped before the directory is purged and a
//! new process spawned. Each run carries a generation number so a stale
//! monitor task can never touch a newer run's state.

use parking_lot::Mutex;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::oneshot;

use crate::error::{GatewayError, Result};
use crate::multiview::{build_invocation, MultiviewConfig, MultiviewSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposerState {
    Idle,
    Starting,
    Running,
    Stopping,
    /// The encoder exited on its own; a new start request is required.
    Crashed,
}

struct Inner {
    state: ComposerState,
    /// Incremented per spawn; the monitor only mutates state while its
    /// generation is current.
    generation: u64,
    stop_tx: Option<oneshot::Sender<()>>,
    /// Resolves once the monitor has reaped the child.
    done_rx: Option<oneshot::Receiver<()>>,
}

pub struct Composer {
    config: MultiviewConfig,
    inner: Arc<Mutex<Inner>>,
}

impl Composer {
    pub fn new(config: MultiviewConfig) -> Self {
        Self {
            config,
            inner: Arc::new(Mutex::new(Inner {
                state: ComposerState::Idle,
                generation: 0,
                stop_tx: None,
                done_rx: None,
            })),
        }
    }

    pub fn state(&self) -> ComposerState {
        self.inner.lock().state
    }

    /// Start a composition, replacing any running one. A spec with zero
    /// streams is a stop request.
    pub async fn start(&self, spec: MultiviewSpec) -> Result<&'static str> {
        if spec.streams.is_empty() {
            self.stop().await?;
            return Ok("stopped");
        }
        spec.validate()?;

        // The previous encoder must be gone before the workdir is purged,
        // or it keeps writing stale segments into the fresh directory.
        self.stop().await?;
        self.inner.lock().state = ComposerState::Starting;
        self.purge_workdir()?;

        let invocation = build_invocation(&spec, &self.config);
        tracing::info!(
            "Starting encoder: {} stream(s), dvr={}, output {}",
            spec.streams.len(),
            spec.dvr,
            self.config.out_dir.display()
        );
        tracing::debug!("Encoder args: {:?}", invocation.args);

        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                self.inner.lock().state = ComposerState::Idle;
                GatewayError::Encoder(format!("failed to spawn {}: {e}", invocation.program))
            })?;

        let (stop_tx, mut stop_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();
        let generation = {
            let mut inner = self.inner.lock();
            inner.generation += 1;
            inner.state = ComposerState::Running;
            inner.stop_tx = Some(stop_tx);
            inner.done_rx = Some(done_rx);
            inner.generation
        };

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::select! {
                _ = &mut stop_rx => {
                    if let Err(e) = child.kill().await {
                        tracing::warn!("Failed to kill encoder: {}", e);
                    }
                    let _ = child.wait().await;
                    let mut inner = inner.lock();
                    if inner.generation == generation {
                        inner.state = ComposerState::Idle;
                    }
                    tracing::info!("Encoder stopped");
                }
                status = child.wait() => {
                    let mut inner = inner.lock();
                    if inner.generation == generation {
                        match inner.state {
                            ComposerState::Running => {
                                inner.state = ComposerState::Crashed;
                                inner.stop_tx = None;
                                match status {
                                    Ok(status) => {
                                        tracing::warn!("Encoder exited unexpectedly: {}", status)
                                    }
                                    Err(e) => tracing::warn!("Encoder wait failed: {}", e),
                                }
                            }
                            // Exit raced a stop request; the stop wins.
                            ComposerState::Stopping => inner.state = ComposerState::Idle,
                            _ => {}
                        }
                    }
                }
            }
            let _ = done_tx.send(());
        });

        Ok("started")
    }

    /// Kill the running encoder, if any, wait for it to be reaped, and
    /// wipe the working directory.
    pub async fn stop(&self) -> Result<()> {
        let (stop_tx, done_rx) = {
            let mut inner = self.inner.lock();
            let tx = inner.stop_tx.take();
            let done = inner.done_rx.take();
            if tx.is_some() {
                inner.state = ComposerState::Stopping;
            } else if inner.state == ComposerState::Crashed {
                inner.state = ComposerState::Idle;
            }
            (tx, done)
        };
        if let Some(tx) = stop_tx {
            // Receiver gone means the monitor already observed an exit.
            let _ = tx.send(());
        }
        if let Some(done) = done_rx {
            let _ = done.await;
        }
        self.purge_workdir()
    }

    fn purge_workdir(&self) -> Result<()> {
        match std::fs::remove_dir_all(&self.config.out_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        std::fs::create_dir_all(&self.config.out_dir)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn composer(dir: &std::path::Path) -> Composer {
        Composer::new(MultiviewConfig {
            ffmpeg_path: "ffmpeg".to_string(),
            out_dir: dir.join("mv"),
            playlist_name: "multiview.m3u8".to_string(),
        })
    }

    #[tokio::test]
    async fn test_empty_spec_is_stop() {
        let dir = tempfile::tempdir().unwrap();
        let c = composer(dir.path());
        let msg = c.start(MultiviewSpec::default()).await.unwrap();
        assert_eq!(msg, "stopped");
        assert_eq!(c.state(), ComposerState::Idle);
    }

    #[tokio::test]
    async fn test_too_many_streams_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let c = composer(dir.path());
        let spec = MultiviewSpec {
            streams: (0..5).map(|i| format!("u{i}")).collect(),
            ..Default::default()
        };
        assert!(c.start(spec).await.is_err());
    }

    #[test]
    fn test_purge_recreates_workdir() {
        let dir = tempfile::tempdir().unwrap();
        let c = composer(dir.path());
        let out = dir.path().join("mv");
        std::fs::create_dir_all(&out).unwrap();
        std::fs::write(out.join("stale.ts"), b"x").unwrap();

        c.purge_workdir().unwrap();
        assert!(out.exists());
        assert!(!out.join("stale.ts").exists());
    }

    #[cfg(unix)]
    fn fake_encoder(dir: &std::path::Path) -> String {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join("fake-encoder");
        std::fs::write(&script, "#!/bin/sh\nsleep 5\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script.to_string_lossy().into_owned()
    }

    #[cfg(unix)]
    fn spec_one() -> MultiviewSpec {
        MultiviewSpec {
            streams: vec!["https://u.example/0.m3u8".to_string()],
            ..Default::default()
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_restart_keeps_new_run_running() {
        let dir = tempfile::tempdir().unwrap();
        let c = Composer::new(MultiviewConfig {
            ffmpeg_path: fake_encoder(dir.path()),
            out_dir: dir.path().join("mv"),
            playlist_name: "multiview.m3u8".to_string(),
        });

        assert_eq!(c.start(spec_one()).await.unwrap(), "started");
        assert_eq!(c.start(spec_one()).await.unwrap(), "started");

        // The first run's monitor must not touch the second run's state.
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        assert_eq!(c.state(), ComposerState::Running);

        c.stop().await.unwrap();
        assert_eq!(c.state(), ComposerState::Idle);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_reaps_before_returning() {
        let dir = tempfile::tempdir().unwrap();
        let c = Composer::new(MultiviewConfig {
            ffmpeg_path: fake_encoder(dir.path()),
            out_dir: dir.path().join("mv"),
            playlist_name: "multiview.m3u8".to_string(),
        });

        assert_eq!(c.start(spec_one()).await.unwrap(), "started");
        c.stop().await.unwrap();
        // No sleep: the state is settled the moment stop returns.
        assert_eq!(c.state(), ComposerState::Idle);
        assert!(dir.path().join("mv").exists());
    }
}
