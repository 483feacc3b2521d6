//! External transcoder processes.
//!
//! Each streaming session runs one transcoder that pulls the camera's RTSP
//! stream and pushes SRTP to the client, plus a second one for two-way
//! audio that decodes the client's return audio for the camera speaker.
//!
//! [`Transcoder`] is a transport: it exposes the process's stdin and stdout
//! and reports how the process ended as a [`TranscoderEvent`]. It never
//! interprets media. Stderr is forwarded to `tracing` and its last lines are
//! carried in the exit event so the owner can reason about the failure.
//!
//! [`args`] builds the argument vectors.

pub mod args;

use std::collections::VecDeque;
use std::fmt;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};

use crate::error::{Result, StreamError};

/// Stderr lines kept for the exit event.
const STDERR_TAIL_LINES: usize = 16;

/// How long the supervisor waits for stderr to drain after exit.
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// What a transcoder does for its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TranscoderRole {
    /// Camera RTSP in, SRTP video and audio out to the client.
    Stream,
    /// Client return audio in, ADTS AAC out to the camera speaker.
    ReturnAudio,
}

impl fmt::Display for TranscoderRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stream => write!(f, "stream"),
            Self::ReturnAudio => write!(f, "return-audio"),
        }
    }
}

/// How a transcoder process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitInfo {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<ExitStatus> for ExitInfo {
    fn from(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

impl fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {code}"),
            (None, Some(signal)) => write!(f, "killed by signal {signal}"),
            (None, None) => write!(f, "unknown exit status"),
        }
    }
}

/// Lifecycle notifications sent to the session manager's control loop.
#[derive(Debug, Clone)]
pub enum TranscoderEvent {
    Exited {
        session_id: String,
        role: TranscoderRole,
        exit: ExitInfo,
        /// True when the exit followed [`Transcoder::stop`].
        requested: bool,
        stderr_tail: Vec<String>,
    },
    /// Waiting on the process failed; its state is unknown.
    Failed {
        session_id: String,
        role: TranscoderRole,
        error: String,
    },
}

/// Transcoder binary and encoder selection.
#[derive(Debug, Clone)]
pub struct TranscoderConfig {
    /// Path or name of the FFmpeg-compatible binary.
    pub binary: String,
    /// Pass `-loglevel verbose` instead of `error`.
    pub verbose: bool,
    /// Software H.264 encoder.
    pub encoder: String,
    /// H.264 encoder used when hardware transcoding is hinted.
    pub hardware_encoder: String,
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            binary: "ffmpeg".to_string(),
            verbose: false,
            encoder: "libx264".to_string(),
            hardware_encoder: "h264_v4l2m2m".to_string(),
        }
    }
}

/// One supervised transcoder process.
///
/// Dropping the handle stops the process.
pub struct Transcoder {
    session_id: String,
    role: TranscoderRole,
    pid: Option<u32>,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    kill: Mutex<Option<oneshot::Sender<()>>>,
}

impl Transcoder {
    /// Launch `binary` with `args` and start supervising it.
    ///
    /// Exit is reported on `events` exactly once, whether the process dies
    /// on its own or after [`stop`](Self::stop).
    pub fn spawn(
        binary: &str,
        args: &[String],
        session_id: &str,
        role: TranscoderRole,
        events: mpsc::UnboundedSender<TranscoderEvent>,
    ) -> Result<Self> {
        tracing::debug!(session_id, %role, binary, args = %args.join(" "), "spawning transcoder");

        let mut child = Command::new(binary)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| StreamError::TranscoderSpawnFailed {
                binary: binary.to_string(),
                source,
            })?;

        let pid = child.id();
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();

        let tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
        let stderr_task = child.stderr.take().map(|stderr| {
            let tail = tail.clone();
            let session_id = session_id.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(session_id = %session_id, %role, "{line}");
                    let mut tail = tail.lock();
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
            })
        });

        let (kill_tx, kill_rx) = oneshot::channel();
        let supervisor = Supervisor {
            session_id: session_id.to_string(),
            role,
            events,
            tail,
        };
        tokio::spawn(supervisor.run(child, kill_rx, stderr_task));

        tracing::info!(session_id, %role, pid = ?pid, "transcoder started");

        Ok(Self {
            session_id: session_id.to_string(),
            role,
            pid,
            stdin,
            stdout,
            kill: Mutex::new(Some(kill_tx)),
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Take the process's stdin. Dropping it closes the pipe.
    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.stdin.take()
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    /// Terminate the process. Safe to call more than once.
    pub fn stop(&self) {
        if let Some(kill) = self.kill.lock().take() {
            tracing::debug!(session_id = %self.session_id, role = %self.role, "stopping transcoder");
            let _ = kill.send(());
        }
    }
}

impl Drop for Transcoder {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for Transcoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transcoder")
            .field("session_id", &self.session_id)
            .field("role", &self.role)
            .field("pid", &self.pid)
            .finish()
    }
}

struct Supervisor {
    session_id: String,
    role: TranscoderRole,
    events: mpsc::UnboundedSender<TranscoderEvent>,
    tail: Arc<Mutex<VecDeque<String>>>,
}

impl Supervisor {
    async fn run(
        self,
        mut child: Child,
        kill: oneshot::Receiver<()>,
        stderr_task: Option<tokio::task::JoinHandle<()>>,
    ) {
        // A dropped sender counts as a stop request.
        let (status, requested) = tokio::select! {
            status = child.wait() => (status, false),
            _ = kill => {
                let _ = child.start_kill();
                (child.wait().await, true)
            }
        };

        if let Some(task) = stderr_task {
            let _ = tokio::time::timeout(STDERR_DRAIN_TIMEOUT, task).await;
        }

        let event = match status {
            Ok(status) => {
                let exit = ExitInfo::from(status);
                if requested || exit.success() {
                    tracing::debug!(session_id = %self.session_id, role = %self.role, %exit, "transcoder exited");
                } else {
                    tracing::warn!(session_id = %self.session_id, role = %self.role, %exit, "transcoder exited unexpectedly");
                }
                TranscoderEvent::Exited {
                    session_id: self.session_id,
                    role: self.role,
                    exit,
                    requested,
                    stderr_tail: self.tail.lock().drain(..).collect(),
                }
            }
            Err(e) => {
                tracing::error!(session_id = %self.session_id, role = %self.role, error = %e, "waiting on transcoder failed");
                TranscoderEvent::Failed {
                    session_id: self.session_id,
                    role: self.role,
                    error: e.to_string(),
                }
            }
        };

        // Receiver gone means the manager shut down; nothing left to notify.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<TranscoderEvent>) -> TranscoderEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no transcoder event")
            .expect("event channel closed")
    }

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn reports_natural_exit() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _t = Transcoder::spawn("true", &[], "s1", TranscoderRole::Stream, tx).unwrap();

        match next_event(&mut rx).await {
            TranscoderEvent::Exited {
                session_id,
                role,
                exit,
                requested,
                ..
            } => {
                assert_eq!(session_id, "s1");
                assert_eq!(role, TranscoderRole::Stream);
                assert!(exit.success());
                assert!(!requested);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn stop_is_requested_and_idempotent() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let t = Transcoder::spawn("sleep", &args(&["30"]), "s2", TranscoderRole::Stream, tx)
            .unwrap();
        assert!(t.pid().is_some());

        t.stop();
        t.stop();

        match next_event(&mut rx).await {
            TranscoderEvent::Exited {
                requested, exit, ..
            } => {
                assert!(requested);
                assert!(!exit.success());
            }
            other => panic!("unexpected event: {other:?}"),
        }
        drop(t);
        // Exactly one event per process.
        assert!(
            tokio::time::timeout(Duration::from_millis(200), rx.recv())
                .await
                .map_or(true, |e| e.is_none())
        );
    }

    #[tokio::test]
    async fn stderr_tail_is_captured() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let script = "for i in $(seq 1 20); do echo line$i >&2; done; exit 3";
        let _t = Transcoder::spawn(
            "sh",
            &args(&["-c", script]),
            "s3",
            TranscoderRole::ReturnAudio,
            tx,
        )
        .unwrap();

        match next_event(&mut rx).await {
            TranscoderEvent::Exited {
                exit, stderr_tail, ..
            } => {
                assert_eq!(exit.code, Some(3));
                assert_eq!(stderr_tail.len(), STDERR_TAIL_LINES);
                assert_eq!(stderr_tail.first().map(String::as_str), Some("line5"));
                assert_eq!(stderr_tail.last().map(String::as_str), Some("line20"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn stdin_and_stdout_are_exposed() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut t = Transcoder::spawn("cat", &[], "s4", TranscoderRole::ReturnAudio, tx).unwrap();

        let mut stdin = t.take_stdin().unwrap();
        let mut stdout = t.take_stdout().unwrap();
        assert!(t.take_stdin().is_none());

        stdin.write_all(b"v=0\r\n").await.unwrap();
        drop(stdin);

        let mut out = Vec::new();
        stdout.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"v=0\r\n");
    }

    #[tokio::test]
    async fn missing_binary_fails_to_spawn() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = Transcoder::spawn(
            "/nonexistent/transcoder",
            &[],
            "s5",
            TranscoderRole::Stream,
            tx,
        )
        .unwrap_err();
        assert!(matches!(err, StreamError::TranscoderSpawnFailed { .. }));
    }

    #[test]
    fn exit_info_display() {
        let code = ExitInfo {
            code: Some(1),
            signal: None,
        };
        let signal = ExitInfo {
            code: None,
            signal: Some(9),
        };
        assert_eq!(code.to_string(), "exit code 1");
        assert_eq!(signal.to_string(), "killed by signal 9");
        assert_eq!(TranscoderRole::ReturnAudio.to_string(), "return-audio");
    }
}
