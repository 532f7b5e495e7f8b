//! Launch handling for docker-backed servers.
//!
//! A command like `docker run --detach --name kb kb-image` starts a
//! background container and exits, so there is nothing to drive over
//! stdio. Such servers are recreated in interactive mode before each
//! handshake: stop and remove the existing container if present, then run
//! a non-detached `-i` variant of the command with piped stdio. The
//! planning half is pure and unit-tested; only the executor shells out to
//! the docker CLI.

use crate::config::DockerConfig;
use crate::error::McpError;
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;

/// How a server's process should be launched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    /// Container to stop and remove before spawning, when set.
    pub restart_container: Option<String>,
    /// Final argv to spawn with piped stdio.
    pub argv: Vec<String>,
}

/// True when the argv is a `docker run`/`create` that detaches.
pub fn is_detached_docker(argv: &[String]) -> bool {
    if argv.first().map(String::as_str) != Some("docker") {
        return false;
    }
    argv.iter()
        .skip(1)
        .any(|arg| arg == "-d" || arg == "--detach" || arg == "--detach=true")
}

/// The value of `--name` in a docker argv, if present.
pub fn container_name(argv: &[String]) -> Option<String> {
    let mut args = argv.iter();
    while let Some(arg) = args.next() {
        if arg == "--name" {
            return args.next().cloned();
        }
        if let Some(value) = arg.strip_prefix("--name=") {
            return Some(value.to_string());
        }
    }
    None
}

/// Rewrite a detached docker argv into its interactive form: detach flags
/// dropped, `-i` ensured right after the subcommand.
pub fn interactive_argv(argv: &[String]) -> Vec<String> {
    let mut out: Vec<String> = argv
        .iter()
        .filter(|arg| *arg != "-d" && *arg != "--detach" && *arg != "--detach=true")
        .cloned()
        .collect();
    let has_interactive = out
        .iter()
        .any(|arg| arg == "-i" || arg == "-it" || arg == "--interactive");
    if !has_interactive {
        // Insert after `docker run` / `docker create`.
        let pos = out.iter().position(|arg| arg == "run" || arg == "create");
        match pos {
            Some(i) => out.insert(i + 1, "-i".to_string()),
            None => out.push("-i".to_string()),
        }
    }
    out
}

/// Decide how to launch a server given its command and docker sub-config.
///
/// `restart_on_connect` forces the stop/remove cycle; otherwise it is
/// triggered by a detached command. Either way the spawned argv is always
/// interactive — a detached instance is never attached to.
pub fn plan_launch(command: &[String], docker: Option<&DockerConfig>) -> LaunchPlan {
    if let Some(cfg) = docker {
        if cfg.restart_on_connect {
            let argv = if cfg.interactive_restart_command.is_empty() {
                interactive_argv(command)
            } else {
                cfg.interactive_restart_command.clone()
            };
            return LaunchPlan {
                restart_container: Some(cfg.container_name.clone()),
                argv,
            };
        }
    }
    if is_detached_docker(command) {
        return LaunchPlan {
            restart_container: container_name(command),
            argv: interactive_argv(command),
        };
    }
    LaunchPlan {
        restart_container: None,
        argv: command.to_vec(),
    }
}

/// Stop and remove `name` so the subsequent interactive `docker run` can
/// reuse it. Cleanup is best-effort: failures are logged and the spawn that
/// follows surfaces any real problem.
pub async fn remove_container(name: &str, timeout: Duration) -> Result<(), McpError> {
    if !container_exists(name, timeout).await? {
        tracing::debug!("No existing container '{name}' to remove");
        return Ok(());
    }
    tracing::info!("Recreating container '{name}' in interactive mode");
    match run_docker(&["stop", name], timeout).await {
        Ok(out) if !out.status.success() => {
            tracing::debug!("docker stop '{name}' exited with {}", out.status);
        }
        Ok(_) => {}
        Err(e) => tracing::debug!("docker stop '{name}' failed: {e}"),
    }
    match run_docker(&["rm", name], timeout).await {
        Ok(out) if !out.status.success() => {
            tracing::warn!("docker rm '{name}' exited with {}", out.status);
        }
        Ok(_) => {}
        Err(e) => tracing::warn!("docker rm '{name}' failed: {e}"),
    }
    Ok(())
}

/// Whether a container with exactly this name exists, running or not.
async fn container_exists(name: &str, timeout: Duration) -> Result<bool, McpError> {
    // Anchored filter: the name filter is a regex and would otherwise match
    // substrings ("kb" would match "kb-server").
    let filter = format!("name=^{name}$");
    let out = run_docker(
        &["ps", "-a", "--filter", &filter, "--format", "{{.Names}}"],
        timeout,
    )
    .await?;
    if !out.status.success() {
        let stderr = String::from_utf8_lossy(&out.stderr);
        return Err(McpError::Transport {
            server: name.to_string(),
            reason: format!("docker ps failed: {}", stderr.trim()),
        });
    }
    let stdout = String::from_utf8_lossy(&out.stdout);
    Ok(stdout.lines().any(|line| line.trim() == name))
}

async fn run_docker(args: &[&str], timeout: Duration) -> Result<Output, McpError> {
    let operation = format!("docker {}", args.first().copied().unwrap_or_default());
    tracing::debug!("Running {operation}");
    let result = tokio::time::timeout(timeout, Command::new("docker").args(args).output()).await;
    match result {
        Ok(output) => Ok(output?),
        Err(_) => Err(McpError::Timeout {
            operation,
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}
