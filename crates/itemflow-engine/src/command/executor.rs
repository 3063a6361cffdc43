//! Command-chain execution.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::time::timeout;

use crate::command::parser::{parse_chain, split_args, CommandSegment, Dependency};
use crate::error::{EngineError, EngineResult};

/// Exit code reported when a program cannot be started.
pub const SPAWN_FAILURE_EXIT_CODE: i32 = 127;

/// Exit code reported when a segment exceeds its timeout.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Options for [`run_chain`].
#[derive(Debug, Clone)]
pub struct ChainOptions {
    /// Record non-muted failures and keep going instead of failing the chain.
    pub continue_on_error: bool,

    /// Working directory for every segment.
    pub cwd: Option<PathBuf>,

    /// Extra environment variables for every segment.
    pub env: HashMap<String, String>,

    /// Per-segment timeout.
    pub timeout: Option<Duration>,

    /// Copy process output to our stdout while it runs.
    pub mirror: bool,
}

impl Default for ChainOptions {
    fn default() -> Self {
        Self {
            continue_on_error: false,
            cwd: None,
            env: HashMap::new(),
            timeout: None,
            mirror: true,
        }
    }
}

/// Result of a chain that did not fail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Always 0; failures surface as [`EngineError::Command`].
    pub code: i32,
    /// Concatenated stdout of every executed segment.
    pub stdout: String,
}

struct SegmentOutcome {
    code: i32,
    stdout: Vec<u8>,
    stderr: String,
}

/// Parse and run a command chain.
///
/// Segments run in order. A segment gated on the previous one's success or
/// failure is skipped when the gate is not met, and a skip counts as a
/// failure for the next gate. A non-muted failure aborts the chain with
/// [`EngineError::Command`] unless `continue_on_error` is set or the next
/// segment runs only on failure (`a || b`). Muted failures are ignored.
pub async fn run_chain(chain: &str, options: &ChainOptions) -> EngineResult<CommandOutput> {
    let segments = parse_chain(chain)?;
    let mut stdout = Vec::new();
    let mut last_run_failed = false;

    for (index, segment) in segments.iter().enumerate() {
        if index > 0 {
            let skip = match segment.dependency {
                Dependency::RequirePreviousSucceeded => last_run_failed,
                Dependency::RequirePreviousFailed => !last_run_failed,
                Dependency::None => false,
            };
            if skip {
                tracing::info!(
                    command = %segment.command,
                    dependency = ?segment.dependency,
                    "Skipping command, dependency not satisfied"
                );
                last_run_failed = true;
                continue;
            }
        }

        let outcome = run_segment(segment, options).await?;
        stdout.extend_from_slice(&outcome.stdout);

        if outcome.code == 0 {
            last_run_failed = false;
            continue;
        }

        let handled_by_next = segments
            .get(index + 1)
            .is_some_and(|next| next.dependency == Dependency::RequirePreviousFailed);

        if segment.muted {
            tracing::debug!(command = %segment.command, code = outcome.code, "Ignoring muted command failure");
            last_run_failed = false;
        } else if options.continue_on_error || handled_by_next {
            tracing::warn!(command = %segment.command, code = outcome.code, "Command failed, continuing");
            last_run_failed = true;
        } else {
            return Err(EngineError::Command {
                code: outcome.code,
                stderr: outcome.stderr,
            });
        }
    }

    let mut stdout = String::from_utf8_lossy(&stdout).into_owned();
    if stdout.ends_with('\n') {
        stdout.pop();
        if stdout.ends_with('\r') {
            stdout.pop();
        }
    }

    Ok(CommandOutput { code: 0, stdout })
}

async fn run_segment(segment: &CommandSegment, options: &ChainOptions) -> EngineResult<SegmentOutcome> {
    let args = split_args(&segment.command)?;
    let Some((program, rest)) = args.split_first() else {
        return Err(EngineError::CommandParse(format!(
            "no program in `{}`",
            segment.command
        )));
    };

    tracing::debug!(program = %program, args = rest.len(), "Running command");

    let mut cmd = Command::new(program);
    cmd.args(rest)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &options.cwd {
        cmd.current_dir(dir);
    }
    for (k, v) in &options.env {
        cmd.env(k, v);
    }

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            tracing::warn!(program = %program, error = %e, "Failed to spawn process");
            return Ok(SegmentOutcome {
                code: SPAWN_FAILURE_EXIT_CODE,
                stdout: Vec::new(),
                stderr: format!("failed to spawn `{}`: {}", program, e),
            });
        }
    };

    let stdout_handle = tokio::spawn(pump(child.stdout.take(), options.mirror));
    let stderr_handle = tokio::spawn(pump(child.stderr.take(), options.mirror));

    let status = match options.timeout {
        Some(limit) => match timeout(limit, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                let _ = child.kill().await;
                tracing::warn!(program = %program, timeout_ms = limit.as_millis() as u64, "Command timed out");
                let stdout = stdout_handle.await.unwrap_or_default();
                return Ok(SegmentOutcome {
                    code: TIMEOUT_EXIT_CODE,
                    stdout,
                    stderr: format!("`{}` timed out after {:?}", program, limit),
                });
            }
        },
        None => child.wait().await?,
    };

    let stdout = stdout_handle.await.unwrap_or_default();
    let stderr = stderr_handle.await.unwrap_or_default();

    Ok(SegmentOutcome {
        code: status.code().unwrap_or(-1),
        stdout,
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
    })
}

/// Drain a pipe, optionally copying each chunk to our stdout as it arrives.
async fn pump<R: AsyncRead + Unpin>(reader: Option<R>, mirror: bool) -> Vec<u8> {
    let mut collected = Vec::new();
    let Some(mut reader) = reader else {
        return collected;
    };
    let mut out = tokio::io::stdout();
    let mut buf = [0u8; 8192];

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if mirror {
                    // Mirroring is best effort; a closed stdout must not fail the command.
                    let _ = out.write_all(&buf[..n]).await;
                    let _ = out.flush().await;
                }
                collected.extend_from_slice(&buf[..n]);
            }
            Err(e) => {
                tracing::debug!(error = %e, "Stopped reading process output");
                break;
            }
        }
    }
    collected
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet() -> ChainOptions {
        ChainOptions {
            mirror: false,
            ..Default::default()
        }
    }

    fn continuing() -> ChainOptions {
        ChainOptions {
            continue_on_error: true,
            ..quiet()
        }
    }

    #[tokio::test]
    async fn test_success_gate() {
        let output = run_chain("true && echo A", &quiet()).await.unwrap();
        assert_eq!(output, CommandOutput { code: 0, stdout: "A".to_string() });

        let err = run_chain("false && echo A", &quiet()).await.unwrap_err();
        assert!(matches!(err, EngineError::Command { code: 1, .. }));

        let output = run_chain("false && echo A", &continuing()).await.unwrap();
        assert!(!output.stdout.contains('A'));
    }

    #[tokio::test]
    async fn test_failure_gate() {
        let output = run_chain("true || echo A", &quiet()).await.unwrap();
        assert!(!output.stdout.contains('A'));

        let output = run_chain("false || echo A", &quiet()).await.unwrap();
        assert!(output.stdout.contains('A'));
    }

    #[tokio::test]
    async fn test_muted_failure() {
        for options in [quiet(), continuing()] {
            let output = run_chain("false & echo A", &options).await.unwrap();
            assert_eq!(output.stdout, "A");
        }
    }

    #[tokio::test]
    async fn test_skipped_failure_branch_blocks_next_success_gate() {
        let output = run_chain("true || echo A && echo B", &quiet()).await.unwrap();
        assert_eq!(output.stdout, "");
    }

    #[tokio::test]
    async fn test_output_is_concatenated() {
        let output = run_chain(r#"echo "one two" && echo three"#, &quiet()).await.unwrap();
        assert_eq!(output.stdout, "one two\nthree");
    }

    #[tokio::test]
    async fn test_stderr_in_error() {
        let err = run_chain("ls /definitely/not/here", &quiet()).await.unwrap_err();
        match err {
            EngineError::Command { code, stderr } => {
                assert_ne!(code, 0);
                assert!(!stderr.is_empty());
            }
            other => panic!("expected command error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_spawn_failure_is_127() {
        let err = run_chain("itemflow-no-such-program", &quiet()).await.unwrap_err();
        assert!(matches!(err, EngineError::Command { code: SPAWN_FAILURE_EXIT_CODE, .. }));

        let output = run_chain("itemflow-no-such-program || echo fallback", &quiet())
            .await
            .unwrap();
        assert_eq!(output.stdout, "fallback");
    }

    #[tokio::test]
    async fn test_timeout_is_124() {
        let options = ChainOptions {
            timeout: Some(Duration::from_millis(100)),
            ..quiet()
        };
        let err = run_chain("sleep 5", &options).await.unwrap_err();
        assert!(matches!(err, EngineError::Command { code: TIMEOUT_EXIT_CODE, .. }));
    }

    #[tokio::test]
    async fn test_cwd_and_env() {
        let dir = tempfile::tempdir().unwrap();
        let options = ChainOptions {
            cwd: Some(dir.path().to_path_buf()),
            env: HashMap::from([("ITEMFLOW_TEST_VALUE".to_string(), "42".to_string())]),
            ..quiet()
        };
        let output = run_chain("printenv ITEMFLOW_TEST_VALUE && pwd", &options).await.unwrap();
        let mut lines = output.stdout.lines();
        assert_eq!(lines.next(), Some("42"));
        let pwd = std::path::PathBuf::from(lines.next().unwrap());
        assert_eq!(pwd.canonicalize().unwrap(), dir.path().canonicalize().unwrap());
    }
}
