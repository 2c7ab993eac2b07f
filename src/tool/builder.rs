//! src/tool/builder.rs
//! Runs the external image builder against the staged AppDir and streams its output.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

use crate::error::PackError;

/// Which child stream a forwarded line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

/// A fully resolved builder command line.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub envs: Vec<(String, OsString)>,
    pub current_dir: PathBuf,
    /// Stderr lines shorter than this many characters are dropped.
    pub stderr_noise_threshold: usize,
}

/// Spawns the builder, forwards every output line to `on_line` as it arrives and
/// returns the child's exit code. A non-zero code is returned, not raised.
pub async fn build<F>(inv: &Invocation, mut on_line: F) -> Result<i32, PackError>
where
    F: FnMut(Stream, &str),
{
    let mut child = spawn(inv)?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut readers = Vec::new();
    if let Some(out) = stdout {
        readers.push(tokio::spawn(forward_lines(out, Stream::Stdout, tx.clone())));
    }
    if let Some(err) = stderr {
        readers.push(tokio::spawn(forward_lines(err, Stream::Stderr, tx.clone())));
    }
    drop(tx);

    // Ends once both pipes hit EOF.
    while let Some((stream, line)) = rx.recv().await {
        if stream == Stream::Stderr && line.trim_end().chars().count() < inv.stderr_noise_threshold {
            continue;
        }
        on_line(stream, &line);
    }

    let status = child.wait().await.map_err(|source| PackError::Spawn {
        tool: inv.program.clone(),
        source,
    })?;
    for reader in readers {
        let _ = reader.await;
    }

    tracing::debug!(?status, program = %inv.program.display(), "builder exited");
    Ok(status.code().unwrap_or(1))
}

fn spawn(inv: &Invocation) -> Result<Child, PackError> {
    Command::new(&inv.program)
        .args(&inv.args)
        .envs(inv.envs.iter().map(|(k, v)| (k, v)))
        .current_dir(&inv.current_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| PackError::Spawn {
            tool: inv.program.clone(),
            source,
        })
}

async fn forward_lines<R>(reader: R, stream: Stream, tx: mpsc::UnboundedSender<(Stream, String)>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tx.send((stream, line)).is_err() {
            break;
        }
    }
}

// Held by every test that writes a script and then runs it. A concurrent fork
// elsewhere in the test binary can inherit the still-open write handle, and
// exec of that file then fails with "text file busy".
#[cfg(all(test, unix))]
pub(crate) fn exec_lock() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
    LOCK.lock().unwrap_or_else(|e| e.into_inner())
}
