//! Child-process isolation.
//!
//! The job goes to the worker as one JSON line on stdin; the worker's stdout
//! is the serialized handoff slot. stderr is inherited so worker logs land in
//! the server log.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use isoport_core::{DispatchError, Job, JobOutcome, MAX_MESSAGE_BYTES};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::handoff::read_serialized_slot;

/// Cap on captured worker stdout. Binary fields travel as base64 and a
/// separation result carries two of them.
const MAX_SLOT_BYTES: usize = 4 * MAX_MESSAGE_BYTES;

/// The program (and arguments) started once per call.
#[derive(Clone, Debug)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub envs: Vec<(OsString, OsString)>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    /// Re-run the current executable, e.g. `isoportd worker`.
    pub fn current_exe() -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    fn build(&self) -> Command {
        let mut std_cmd = std::process::Command::new(&self.program);
        // Leader of its own group, so everything it starts can be signalled at once.
        #[cfg(unix)]
        std::os::unix::process::CommandExt::process_group(&mut std_cmd, 0);

        let mut cmd = Command::from(std_cmd);
        cmd.args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        cmd
    }
}

/// Kills the worker's whole process group when dropped. `kill_on_drop` only
/// reaches the direct child; programs the worker started (e.g. the separator)
/// share its group.
struct GroupKill {
    pgid: Option<u32>,
}

impl GroupKill {
    fn new(pgid: Option<u32>) -> Self {
        Self { pgid }
    }

    fn kill(&mut self) {
        let Some(pgid) = self.pgid.take() else {
            return;
        };
        #[cfg(unix)]
        {
            let Ok(pgid) = libc::pid_t::try_from(pgid) else {
                return;
            };
            // SAFETY: kill(2) takes plain integers; a negative pid addresses a group.
            let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
            if rc == 0 {
                debug!(pgid, "worker process group killed");
            }
        }
        #[cfg(not(unix))]
        let _ = pgid;
    }
}

impl Drop for GroupKill {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Run `job` in a fresh child and return whatever it left in the slot.
///
/// If the returned future is dropped (caller went away) the child and every
/// process in its group are killed. On timeout the group is killed and the
/// child reaped before returning. No worker descendant outlives its call.
pub async fn run_in_process(
    command: &WorkerCommand,
    job: &Job,
    timeout: Option<Duration>,
) -> Result<Option<JobOutcome>, DispatchError> {
    let mut line = serde_json::to_vec(job)?;
    line.push(b'\n');

    let mut child = command.build().spawn().map_err(DispatchError::Spawn)?;
    let mut group = GroupKill::new(child.id());
    debug!(pid = child.id(), program = %command.program.display(), "worker spawned");

    // stdin and stdout are serviced concurrently with `wait`; a full pipe
    // would stall the child.
    if let Some(mut stdin) = child.stdin.take() {
        tokio::spawn(async move {
            if let Err(err) = stdin.write_all(&line).await {
                debug!(error = %err, "worker closed stdin early");
            }
        });
    }
    let stdout = child.stdout.take();
    let stdout_task = tokio::spawn(read_capped(stdout));

    let status = match timeout {
        Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                warn!(pid = child.id(), ?limit, "worker timed out, killing");
                group.kill();
                if let Err(err) = child.kill().await {
                    warn!(error = %err, "failed to kill worker");
                }
                return Err(DispatchError::Timeout(limit));
            }
        },
        None => child.wait().await?,
    };
    // Stragglers would otherwise hold stdout open.
    group.kill();

    let raw = stdout_task.await.unwrap_or_default();
    debug!(%status, stdout_bytes = raw.len(), "worker exited");
    if !status.success() {
        warn!(%status, "worker exited abnormally");
    }
    Ok(read_serialized_slot(&raw))
}

async fn read_capped<R: AsyncRead + Unpin>(handle: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut h) = handle {
        if let Err(err) = (&mut h)
            .take(MAX_SLOT_BYTES as u64)
            .read_to_end(&mut buf)
            .await
        {
            debug!(error = %err, read = buf.len(), "worker stdout read failed");
        }
    }
    buf
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use tokio::io::ReadBuf;

    use super::*;

    /// Yields `data` once, then fails like a broken pipe.
    struct Broken {
        data: Option<&'static [u8]>,
    }

    impl AsyncRead for Broken {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            match self.data.take() {
                Some(data) => {
                    buf.put_slice(data);
                    Poll::Ready(Ok(()))
                }
                None => Poll::Ready(Err(io::Error::from(io::ErrorKind::BrokenPipe))),
            }
        }
    }

    #[tokio::test]
    async fn read_error_keeps_what_arrived() {
        let raw = read_capped(Some(Broken { data: Some(b"{\"failure\":") })).await;
        assert_eq!(raw, b"{\"failure\":");
        assert_eq!(read_serialized_slot(&raw), None);
    }

    #[tokio::test]
    async fn missing_stdout_reads_nothing() {
        assert!(read_capped(None::<Broken>).await.is_empty());
    }
}
