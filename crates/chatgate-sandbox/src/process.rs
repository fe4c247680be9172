//! Subprocess spawn/wait/terminate with the timeout and signal-escalation
//! policy from spec §4.4 and §5: SIGTERM, wait up to 5s, then SIGKILL.

use anyhow::{Context, Result};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

const KILL_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ExecOutcome {
    pub timed_out: bool,
    pub cancelled: bool,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

/// Spawns `binary args...`, optionally feeding `stdin_data`, and waits up to
/// `invocation_timeout` or until `cancel` fires, whichever comes first. On
/// either path the process is signaled per [`terminate`] and the
/// corresponding `ExecOutcome` flag is set; the caller (the driver) turns
/// that into a `timeout` or `cancelled` error (§7).
pub async fn spawn_with_timeout(
    binary: &str,
    args: &[String],
    stdin_data: Option<&str>,
    cwd: Option<&Path>,
    invocation_timeout: Duration,
    cancel: CancellationToken,
) -> Result<ExecOutcome> {
    let mut cmd = Command::new(binary);
    cmd.args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    scrub_sensitive_env(&mut cmd);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("failed to spawn {binary}"))?;
    let pid = child.id();

    if let Some(data) = stdin_data {
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(data.as_bytes()).await.ok();
            stdin.shutdown().await.ok();
        }
    } else {
        child.stdin.take();
    }

    tokio::select! {
        result = timeout(invocation_timeout, child.wait_with_output()) => match result {
            Ok(Ok(output)) => Ok(ExecOutcome {
                timed_out: false,
                cancelled: false,
                success: output.status.success(),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                exit_code: output.status.code(),
            }),
            Ok(Err(e)) => Err(e).context("failed waiting for subprocess"),
            Err(_elapsed) => {
                if let Some(pid) = pid {
                    terminate(pid).await;
                }
                Ok(ExecOutcome {
                    timed_out: true,
                    cancelled: false,
                    success: false,
                    stdout: String::new(),
                    stderr: String::new(),
                    exit_code: None,
                })
            }
        },
        _ = cancel.cancelled() => {
            if let Some(pid) = pid {
                terminate(pid).await;
            }
            Ok(ExecOutcome {
                timed_out: false,
                cancelled: true,
                success: false,
                stdout: String::new(),
                stderr: String::new(),
                exit_code: None,
            })
        }
    }
}

/// Strip environment variables likely to carry credentials before handing
/// the inherited environment to an external binary (§4.4: "inherited
/// environment minus sensitive keys").
fn scrub_sensitive_env(cmd: &mut Command) {
    const SENSITIVE_SUFFIXES: &[&str] = &["_API_KEY", "_SECRET", "_TOKEN", "_PASSWORD"];
    for (key, _) in std::env::vars() {
        let upper = key.to_ascii_uppercase();
        if SENSITIVE_SUFFIXES.iter().any(|s| upper.ends_with(s)) {
            cmd.env_remove(&key);
        }
    }
}

/// SIGTERM, wait up to 5s for the process to exit, then SIGKILL. Used both
/// for the timeout path above and for caller cancellation (§4.4, §5, §8
/// property 6).
#[cfg(unix)]
pub async fn terminate(pid: u32) {
    // SAFETY: pid was returned by Child::id() for a process we own.
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGTERM);
    }

    let deadline = tokio::time::Instant::now() + KILL_GRACE;
    while tokio::time::Instant::now() < deadline {
        // kill(pid, 0) only probes existence/permission, sends no signal.
        let alive = unsafe { libc::kill(pid as libc::pid_t, 0) } == 0;
        if !alive {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
pub async fn terminate(_pid: u32) {
    // No portable signal story on non-unix targets; the subprocess is
    // reaped via Child::kill() by the caller when this is a no-op.
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_and_captures_stdout() {
        let outcome = spawn_with_timeout(
            "sh",
            &["-c".to_string(), "echo hello".to_string()],
            None,
            None,
            Duration::from_secs(5),
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.stdout.trim(), "hello");
        assert!(!outcome.timed_out);
    }

    #[tokio::test]
    async fn times_out_long_running_process() {
        let outcome = spawn_with_timeout(
            "sh",
            &["-c".to_string(), "sleep 5".to_string()],
            None,
            None,
            Duration::from_millis(200),
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert!(outcome.timed_out);
    }

    #[tokio::test]
    async fn nonzero_exit_reported() {
        let outcome = spawn_with_timeout(
            "sh",
            &["-c".to_string(), "exit 3".to_string()],
            None,
            None,
            Duration::from_secs(5),
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.exit_code, Some(3));
    }

    #[tokio::test]
    async fn cancellation_kills_and_flags_outcome() {
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel_clone.cancel();
        });
        let outcome = spawn_with_timeout(
            "sh",
            &["-c".to_string(), "sleep 5".to_string()],
            None,
            None,
            Duration::from_secs(10),
            cancel,
        )
        .await
        .unwrap();
        assert!(outcome.cancelled);
        assert!(!outcome.timed_out);
    }
}
