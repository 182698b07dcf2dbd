use anyhow::{Context, Result};
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Run `program` with `args`, failing if it exits non-zero or outlives `timeout`.
///
/// Returns the captured stdout. The child is killed when the timeout elapses.
///
/// # Errors
///
/// Returns an error if the program cannot be spawned, times out, or fails.
pub async fn run(program: &str, args: &[&str], timeout: Duration) -> Result<String> {
    debug!("Running {} {}", program, args.join(" "));

    let mut cmd = Command::new(program);
    cmd.args(args).kill_on_drop(true);

    let output = tokio::time::timeout(timeout, cmd.output())
        .await
        .with_context(|| format!("`{program}` timed out after {}s", timeout.as_secs_f32()))?
        .with_context(|| format!("Failed to run `{program}`"))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!(
            "`{program} {}` failed with {}: {}",
            args.join(" "),
            output.status,
            stderr.trim()
        );
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout() {
        let out = run("sh", &["-c", "echo reloaded"], Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.trim(), "reloaded");
    }

    #[tokio::test]
    async fn non_zero_exit_is_an_error() {
        let err = run("sh", &["-c", "echo broken >&2; exit 3"], Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("broken"));
    }

    #[tokio::test]
    async fn slow_commands_time_out() {
        let err = run("sleep", &["5"], Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
