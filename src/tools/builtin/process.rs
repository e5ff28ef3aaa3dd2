//! Child process plumbing shared by the subprocess-backed tools.
//!
//! Children are started as the leader of a fresh process group so that a
//! timeout can take down everything the command started, not only the
//! direct child.

use std::io;
use std::process::Output;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::time::error::Elapsed;

/// Spawn `command` in its own process group.
pub(crate) fn spawn_grouped(command: &mut Command) -> io::Result<Child> {
    command.kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);
    command.spawn()
}

/// Collect the child's output, or kill its whole process group and reap it
/// once `timeout` expires.
pub(crate) async fn wait_or_kill(
    mut child: Child,
    timeout: Duration,
) -> Result<io::Result<Output>, Elapsed> {
    // Captured up front: the id is gone once the leader has been reaped,
    // while its background jobs may still be running.
    let pgid = child.id();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let collect = async {
        let (status, stdout, stderr) =
            tokio::try_join!(child.wait(), read_all(stdout), read_all(stderr))?;
        Ok::<_, io::Error>(Output {
            status,
            stdout,
            stderr,
        })
    };

    let result = tokio::time::timeout(timeout, collect).await;
    match result {
        Ok(output) => Ok(output),
        Err(elapsed) => {
            if let Some(pgid) = pgid {
                kill_group(pgid);
            }
            if let Err(e) = child.kill().await {
                tracing::debug!(pid = ?pgid, "Child already gone: {}", e);
            }
            Err(elapsed)
        }
    }
}

async fn read_all<R: AsyncRead + Unpin>(reader: Option<R>) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        reader.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

#[cfg(unix)]
fn kill_group(pgid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pgid) else {
        return;
    };
    // SAFETY: killpg only sends a signal; the group was created by
    // `spawn_grouped` with the child as leader.
    let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if rc != 0 {
        tracing::debug!(
            pgid,
            "killpg failed: {}",
            io::Error::last_os_error()
        );
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: u32) {}
