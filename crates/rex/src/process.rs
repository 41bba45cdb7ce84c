//! Supervision of subprocess backends.
//!
//! A child is treated like a network peer: its stdout is the response body,
//! its exit status is the response status, and the request's cancellation
//! token decides when it dies. Every exit path reaps the child.

use std::collections::VecDeque;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use kill_tree::{blocking::kill_tree_with_config, Config as KillConfig};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::errors::{GatewayError, GatewayResult};
use crate::models::event::CanonicalEvent;
use crate::normalizer::{ByteSession, EventStream, SessionEnd, Step};
use crate::providers::base::{ProcessRequest, Provider};
use crate::providers::configs::Timeouts;

/// Number of stderr lines kept for error reporting.
const STDERR_TAIL_LINES: usize = 20;

/// How long to wait for the stderr reader once the child is gone.
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Owns one running child process.
pub struct ProcessSupervisor {
    child: Child,
    program: String,
    stderr_tail: Option<JoinHandle<String>>,
}

impl ProcessSupervisor {
    /// Spawn the child with piped stdio and hand back its stdout.
    ///
    /// The environment is exactly `request.env`; nothing else is inherited.
    pub fn spawn(request: &ProcessRequest) -> GatewayResult<(Self, ChildStdout)> {
        let mut cmd = Command::new(&request.program);
        cmd.args(&request.args)
            .env_clear()
            .envs(request.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Kill the child if the gateway itself dies without running Drop.
        #[cfg(target_os = "linux")]
        unsafe {
            cmd.pre_exec(|| {
                libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM);
                Ok(())
            });
        }

        debug!("spawning {} with {} args", request.program, request.args.len());
        let mut child = cmd.spawn().map_err(|e| {
            error!("failed to spawn {}: {}", request.program, e);
            GatewayError::unavailable(format!("failed to start {}: {}", request.program, e))
        })?;

        let stdout = child.stdout.take().ok_or_else(|| {
            GatewayError::unavailable(format!("{} started without a stdout pipe", request.program))
        })?;
        let stderr_tail = child.stderr.take().map(|stderr| {
            tokio::spawn(collect_stderr_tail(stderr, request.program.clone()))
        });

        info!(
            "started {} (pid {})",
            request.program,
            child.id().map(|pid| pid.to_string()).unwrap_or_default()
        );

        Ok((
            Self {
                child,
                program: request.program.clone(),
                stderr_tail,
            },
            stdout,
        ))
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Wait up to `grace` for a voluntary exit, then kill.
    pub async fn finish(&mut self, grace: Duration) -> Option<ExitStatus> {
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                warn!("failed to wait for {}: {}", self.program, e);
                None
            }
            Err(_) => {
                warn!(
                    "{} still running {:?} after completion, killing it",
                    self.program, grace
                );
                self.kill().await;
                None
            }
        }
    }

    /// Kill the child and everything it started, then reap it.
    pub async fn kill(&mut self) {
        if let Some(pid) = self.child.id() {
            let killed = tokio::task::spawn_blocking(move || {
                let config = KillConfig {
                    signal: "SIGKILL".to_string(),
                    ..Default::default()
                };
                kill_tree_with_config(pid, &config)
            })
            .await;

            match killed {
                Ok(Ok(outputs)) => debug!("killed {} processes under pid {}", outputs.len(), pid),
                Ok(Err(e)) => debug!("kill_tree for pid {} failed: {}", pid, e),
                Err(e) => debug!("kill_tree task for pid {} panicked: {}", pid, e),
            }
        }

        // The tree kill can race a fork; the direct kill always reaches the child.
        let _ = self.child.start_kill();
        if let Err(e) = self.child.wait().await {
            warn!("failed to reap {}: {}", self.program, e);
        }
    }

    /// The last lines the child wrote to stderr.
    pub async fn stderr_tail(&mut self) -> String {
        let Some(handle) = self.stderr_tail.take() else {
            return String::new();
        };
        match tokio::time::timeout(STDERR_DRAIN_TIMEOUT, handle).await {
            Ok(Ok(tail)) => tail,
            _ => String::new(),
        }
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            debug!("supervisor dropped while {} is running, killing it", self.program);
            let _ = self.child.start_kill();
        }
        if let Some(handle) = self.stderr_tail.take() {
            handle.abort();
        }
    }
}

async fn collect_stderr_tail(stderr: ChildStderr, program: String) -> String {
    let mut lines = BufReader::new(stderr).lines();
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                debug!("{} stderr: {}", program, line);
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            Ok(None) => break,
            Err(e) => {
                debug!("stopped reading {} stderr: {}", program, e);
                break;
            }
        }
    }

    tail.into_iter().collect::<Vec<_>>().join("\n")
}

/// Human-readable delta for a child that failed before completing.
fn exit_error_message(program: &str, status: Option<ExitStatus>, stderr: &str) -> String {
    let mut message = match status.and_then(|s| s.code()) {
        Some(code) => format!("[Fehler: {} wurde mit Code {} beendet]", program, code),
        None => format!("[Fehler: {} wurde unerwartet beendet]", program),
    };
    let stderr = stderr.trim();
    if !stderr.is_empty() {
        message.push('\n');
        message.push_str(stderr);
    }
    message
}

/// Stream the stdout of a spawned child as canonical events.
///
/// The child is reaped before the stream ends: after `Done` it gets a short
/// grace period, on cancellation or idle timeout it is killed at once.
pub fn process_event_stream<P>(
    mut supervisor: ProcessSupervisor,
    stdout: ChildStdout,
    provider: Arc<P>,
    timeouts: Timeouts,
    cancel: CancellationToken,
) -> EventStream
where
    P: Provider + ?Sized + 'static,
{
    Box::pin(async_stream::stream! {
        let mut session = ByteSession::new(ReaderStream::new(stdout), provider, timeouts.idle, cancel);

        let end = loop {
            match session.next_step().await {
                Step::Events(events) => {
                    for event in events {
                        yield event;
                    }
                }
                Step::End(end) => break end,
            }
        };

        let program = supervisor.program.clone();
        match end {
            SessionEnd::Completed => {
                if let Some(status) = supervisor.finish(timeouts.exit_grace).await {
                    debug!("{} exited with {}", program, status);
                }
            }
            SessionEnd::Cancelled => {
                info!("client disconnected, killing {}", program);
                supervisor.kill().await;
            }
            SessionEnd::IdleTimeout => {
                warn!("{} produced no output for {:?}, killing it", program, timeouts.idle);
                supervisor.kill().await;
            }
            SessionEnd::Exhausted => {
                let status = supervisor.finish(timeouts.exit_grace).await;
                match status {
                    Some(status) if status.success() => {
                        warn!("{} exited without a completion event", program);
                    }
                    _ => {
                        let stderr = supervisor.stderr_tail().await;
                        warn!("{} failed: {:?}", program, status);
                        yield CanonicalEvent::ContentDelta(exit_error_message(&program, status, &stderr));
                    }
                }
            }
            SessionEnd::Failed(e) => {
                warn!("reading {} output failed: {}", program, e);
                supervisor.kill().await;
                yield CanonicalEvent::ContentDelta(format!("[Fehler: Ausgabe von {} konnte nicht gelesen werden: {}]", program, e));
            }
        }

        if let Some(done) = session.finish() {
            yield done;
        }
    })
}
