//! OCI lifecycle hooks.
//!
//! Hooks get the container state as JSON on stdin and run with only the
//! environment they declare.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::Instant;

use kennel_common::{KennelError, KennelResult};
use kennel_oci::ContainerState;
use kennel_oci::runtime::Hook;

/// Run one hook and wait for it to exit successfully.
///
/// # Errors
///
/// Returns an error if the hook can't be started, exits non-zero or runs past
/// its own timeout or `deadline`, whichever comes first. Feeding the state
/// counts against the same limit. A hook that times out is killed.
pub async fn run_hook(hook: &Hook, state: &ContainerState, deadline: Instant) -> KennelResult<()> {
    let path = hook.path.display().to_string();
    let state_json = serde_json::to_vec(state)?;

    let mut cmd = Command::new(&hook.path);
    if let Some((arg0, args)) = hook.args.split_first() {
        cmd.arg0(arg0).args(args);
    }
    cmd.env_clear()
        .envs(hook.env.iter().filter_map(|kv| kv.split_once('=')))
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|e| KennelError::Internal {
            message: format!("failed to run hook {path}: {e}"),
        })?;

    let deadline = hook
        .timeout
        .and_then(|secs| Instant::now().checked_add(Duration::from_secs(u64::from(secs))))
        .map_or(deadline, |own| own.min(deadline));

    let stdin = child.stdin.take();
    let run = async {
        if let Some(mut stdin) = stdin {
            match stdin.write_all(&state_json).await {
                Ok(()) => {}
                // Hooks are free to ignore the state.
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                Err(e) => return Err(KennelError::from(e)),
            }
        }
        child.wait().await.map_err(KennelError::from)
    };
    let result = tokio::time::timeout_at(deadline, run).await;
    let status = match result {
        Ok(status) => status?,
        Err(_) => {
            let _ = child.start_kill();
            return Err(KennelError::timeout(format!("hook {path}")));
        }
    };

    if !status.success() {
        return Err(KennelError::Internal {
            message: format!("hook {path} failed with {status}"),
        });
    }
    Ok(())
}

/// Run every hook of a phase in order.
///
/// Failures don't stop the remaining hooks. Each one is logged and the first
/// is returned. Every hook is bounded by `deadline`, so once it has passed
/// the remaining hooks fail with a timeout.
///
/// # Errors
///
/// Returns the first hook failure.
pub async fn run_hooks(
    phase: &str,
    hooks: &[Hook],
    state: &ContainerState,
    deadline: Instant,
) -> KennelResult<()> {
    let mut first_error = None;
    for hook in hooks {
        tracing::debug!(container_id = %state.id, phase, path = %hook.path.display(), "Running hook");
        if let Err(e) = run_hook(hook, state, deadline).await {
            tracing::warn!(
                container_id = %state.id,
                phase,
                path = %hook.path.display(),
                error = %e,
                "Hook failed"
            );
            first_error.get_or_insert(e);
        }
    }
    first_error.map_or(Ok(()), Err)
}
