//! Runs a hook's script after a matched push.

use tokio::process::Command;
use tracing::{error, info};

use crate::HookConfig;
use crate::error::HookError;
use crate::middleware::MatchedPush;

/// Runs the hook's `run_script` for a matched push and returns its stdout.
///
/// The script is split on whitespace into a command and its arguments; it
/// runs in `work_dir` when set, with the push described in `HOOK_*`
/// environment variables. A hook without a script does nothing.
pub async fn run_hook_script(hook: &HookConfig, push: &MatchedPush) -> Result<String, HookError> {
    let Some(run_script) = hook.run_script.as_deref() else {
        info!(
            "Delivery {} for '{}' has no run_script configured",
            push.delivery_id, hook.path
        );
        return Ok(String::new());
    };

    let mut parts = run_script.split_whitespace();
    let script = parts.next().ok_or_else(|| {
        let msg = format!("run_script for hook '{}' is empty", hook.path);
        error!("{}", msg);
        HookError::ScriptExecutionFailed(msg)
    })?;
    let args: Vec<&str> = parts.collect();

    let mut command = Command::new(script);
    command
        .args(&args)
        .env("HOOK_REPOSITORY", &push.repository)
        .env("HOOK_BRANCH", &push.branch)
        .env("HOOK_DELIVERY_ID", push.delivery_id.to_string());
    if let Some(work_dir) = &hook.work_dir {
        command.current_dir(work_dir);
    }

    info!(
        "Delivery {} running (cwd = {:?}): {}",
        push.delivery_id, hook.work_dir, run_script
    );
    let output = command.output().await.map_err(|e| {
        error!("run_script failed to start: {}", e);
        HookError::ScriptExecutionFailed(format!("run_script failed to start: {}", e))
    })?;

    if output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        info!("run_script output:\n{}", stdout);
        Ok(stdout)
    } else {
        let msg = format!(
            "run_script exited with {}:\n{}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        );
        error!("{}", msg);
        Err(HookError::ScriptExecutionFailed(msg))
    }
}
