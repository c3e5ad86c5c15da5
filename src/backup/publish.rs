// mysql2docker/src/backup/publish.rs
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::tag::ImageRef;
use crate::config::{BackupJobConfig, RegistryConfig};
use crate::errors::PublishError;
use crate::utils::command::{CommandOutput, CommandRunner, Invocation};
use crate::utils::stderr_tail;

/// Per-run credential store, created inside the run directory.
const AUTH_DIR: &str = "registry-auth";

const AUTH_MARKERS: &[&str] = &[
    "unauthorized",
    "authentication required",
    "denied",
    "incorrect username or password",
    "login attempt",
    "not logged in",
    "forbidden",
];

const NETWORK_MARKERS: &[&str] = &[
    "connection refused",
    "no such host",
    "i/o timeout",
    "timeout",
    "timed out",
    "tls handshake",
    "connection reset",
    "network is unreachable",
    "temporary failure in name resolution",
    "dial tcp",
];

/// Creates the directory the container tool stores this run's registry
/// login in. Without a configured token there is nothing to store and the
/// tool's existing login is used.
pub async fn prepare_auth_dir(config: &BackupJobConfig, run_dir: &Path) -> Result<Option<PathBuf>, PublishError> {
    if config.registry.password.is_none() {
        return Ok(None);
    }
    let dir = run_dir.join(AUTH_DIR);
    tokio::fs::create_dir(&dir).await.map_err(PublishError::AuthDir)?;
    debug!("Registry credentials scoped to {}", dir.display());
    Ok(Some(dir))
}

/// Container tool call that reads and writes credentials under `auth_dir`
/// (docker via `DOCKER_CONFIG`, podman via `REGISTRY_AUTH_FILE`).
fn container_invocation(config: &BackupJobConfig, auth_dir: Option<&Path>) -> Invocation {
    let invocation = Invocation::new(&config.tools.container);
    match auth_dir {
        Some(dir) => invocation
            .env("DOCKER_CONFIG", dir.display().to_string())
            .env("REGISTRY_AUTH_FILE", dir.join("auth.json").display().to_string()),
        None => invocation,
    }
}

/// Logs in when a registry token is configured, then pushes `image`.
pub async fn publish_image(
    runner: &dyn CommandRunner,
    config: &BackupJobConfig,
    image: &ImageRef,
    auth_dir: Option<&Path>,
) -> Result<(), PublishError> {
    let registry = &config.registry;

    match login_invocation(config, auth_dir) {
        Some(login) => {
            info!(
                "Logging in to {} as {}",
                registry.host.as_deref().unwrap_or("default registry"),
                registry.username
            );
            let output = runner.run(&login).await.map_err(PublishError::Spawn)?;
            check(&login, output, config)?;
        }
        None => info!("No registry password configured, using existing container tool login"),
    }

    info!("Pushing image to registry: {}", image);
    let push = container_invocation(config, auth_dir)
        .arg("push")
        .arg(image.to_string());
    let output = runner.run(&push).await.map_err(PublishError::Spawn)?;
    check(&push, output, config)?;

    info!("✅ Image pushed successfully: {}", image);
    Ok(())
}

/// Removes the local copy of a pushed image. Failures are only logged.
pub async fn remove_local_image(
    runner: &dyn CommandRunner,
    config: &BackupJobConfig,
    image: &ImageRef,
    auth_dir: Option<&Path>,
) {
    let rmi = container_invocation(config, auth_dir)
        .arg("rmi")
        .arg(image.to_string());
    match runner.run(&rmi).await {
        Ok(output) if output.success() => info!("Removed local image {}", image),
        Ok(output) => warn!(
            "Could not remove local image {}: {}",
            image,
            stderr_tail(&output.stderr, &config.secrets())
        ),
        Err(e) => warn!("Could not remove local image {}: {}", image, e),
    }
}

fn login_invocation(config: &BackupJobConfig, auth_dir: Option<&Path>) -> Option<Invocation> {
    let RegistryConfig { host, username, password, .. } = &config.registry;
    let password = password.as_ref()?;
    let login = container_invocation(config, auth_dir)
        .args(["login", "--username", username.as_str(), "--password-stdin"])
        .stdin(password.expose());
    Some(match host {
        Some(host) => login.arg(host.as_str()),
        None => login,
    })
}

fn check(invocation: &Invocation, output: CommandOutput, config: &BackupJobConfig) -> Result<(), PublishError> {
    match output.code {
        Some(0) => Ok(()),
        None => Err(PublishError::Interrupted),
        Some(code) => {
            let step = invocation.subcommand().unwrap_or_default();
            let stderr = stderr_tail(&output.stderr, &config.secrets());
            let detail = format!("`{}` exited with status {}: {}", step, code, stderr);
            Err(classify_failure(step == "login", &stderr, detail))
        }
    }
}

/// Network markers win over everything; a failed login is otherwise always
/// an authentication problem.
fn classify_failure(during_login: bool, stderr: &str, detail: String) -> PublishError {
    let lowered = stderr.to_ascii_lowercase();
    if NETWORK_MARKERS.iter().any(|m| lowered.contains(m)) {
        PublishError::Network(detail)
    } else if during_login || AUTH_MARKERS.iter().any(|m| lowered.contains(m)) {
        PublishError::Authentication(detail)
    } else {
        PublishError::Rejected(detail)
    }
}
