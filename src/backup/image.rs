// mysql2docker/src/backup/image.rs
use chrono::{DateTime, Local};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use super::archive::CompressedArtifact;
use super::tag::{ImageRef, Tag};
use crate::config::BackupJobConfig;
use crate::errors::BuildError;
use crate::utils::command::{CommandRunner, Invocation};
use crate::utils::stderr_tail;

pub const METADATA_FILE: &str = "backup_info.txt";

/// Fixed image template. It is fed to the build tool on stdin so it never
/// sits in the build context.
pub const BUILD_TEMPLATE: &str = "\
FROM alpine:3.20
WORKDIR /backup
COPY *.sql.gz ./
COPY backup_info.txt ./
CMD [\"cat\", \"/backup/backup_info.txt\"]
";

/// Facts written next to the artifact inside the image.
#[derive(Debug, Clone)]
pub struct BackupMetadata {
    pub run_id: Uuid,
    pub created_at: DateTime<Local>,
    pub database: String,
    pub source: String,
    pub tag: Tag,
    pub artifact_name: String,
    pub artifact_size: u64,
}

impl BackupMetadata {
    pub fn render(&self) -> String {
        format!(
            "Backup created: {}\n\
             Database: {}\n\
             Source: {}\n\
             Tag: {}\n\
             Artifact: {}\n\
             Artifact size: {} bytes\n\
             Run id: {}\n",
            self.created_at.format("%Y-%m-%d %H:%M:%S %:z"),
            self.database,
            self.source,
            self.tag,
            self.artifact_name,
            self.artifact_size,
            self.run_id,
        )
    }
}

pub fn image_ref(config: &BackupJobConfig, tag: &Tag) -> ImageRef {
    ImageRef {
        registry: config.registry.host.clone(),
        username: config.registry.username.clone(),
        image: config.registry.image_name.clone(),
        tag: tag.clone(),
    }
}

fn build_invocation(config: &BackupJobConfig, image: &ImageRef, metadata: &BackupMetadata, context: &Path) -> Invocation {
    Invocation::new(&config.tools.container)
        .arg("build")
        .arg("--tag")
        .arg(image.to_string())
        .arg("--label")
        .arg(format!("org.opencontainers.image.created={}", metadata.created_at.to_rfc3339()))
        .arg("--label")
        .arg(format!("mysql2docker.database={}", metadata.database))
        .args(["--file", "-"])
        .arg(context.display().to_string())
        .stdin(BUILD_TEMPLATE)
}

/// Builds the backup image from a throwaway context under `scratch_dir`.
///
/// The compressed artifact is moved into the context, so after this call it
/// is gone from disk either way; the context itself is always removed.
pub async fn assemble_image(
    runner: &dyn CommandRunner,
    config: &BackupJobConfig,
    artifact: &CompressedArtifact,
    image: &ImageRef,
    metadata: &BackupMetadata,
    scratch_dir: &Path,
) -> Result<(), BuildError> {
    let context = tempfile::Builder::new()
        .prefix("build-context-")
        .tempdir_in(scratch_dir)?;
    debug!("Build context: {}", context.path().display());

    let result = build_in_context(runner, config, artifact, image, metadata, context.path()).await;

    let context_path = context.path().to_path_buf();
    if let Err(e) = context.close() {
        warn!("Could not remove build context {}: {}", context_path.display(), e);
    }
    result
}

async fn build_in_context(
    runner: &dyn CommandRunner,
    config: &BackupJobConfig,
    artifact: &CompressedArtifact,
    image: &ImageRef,
    metadata: &BackupMetadata,
    context: &Path,
) -> Result<(), BuildError> {
    let staged = context.join(&metadata.artifact_name);
    if tokio::fs::rename(&artifact.path, &staged).await.is_err() {
        tokio::fs::copy(&artifact.path, &staged).await?;
        tokio::fs::remove_file(&artifact.path).await?;
    }
    tokio::fs::write(context.join(METADATA_FILE), metadata.render()).await?;

    verify_context(context, &[metadata.artifact_name.as_str(), METADATA_FILE])?;

    info!("Building image {}", image);
    let invocation = build_invocation(config, image, metadata, context);
    let output = runner.run(&invocation).await.map_err(BuildError::Spawn)?;
    debug!("build stdout: {}", String::from_utf8_lossy(&output.stdout).trim());
    if !output.stderr_is_empty() {
        debug!("build stderr: {}", String::from_utf8_lossy(&output.stderr).trim());
    }

    match output.code {
        Some(0) => {
            info!("✓ Image built: {}", image);
            Ok(())
        }
        Some(code) => Err(BuildError::ToolFailed {
            code,
            stderr: stderr_tail(&output.stderr, &config.secrets()),
        }),
        None => Err(BuildError::Interrupted),
    }
}

/// The context must hold exactly `expected`: no credentials, no raw dump,
/// no stray files.
fn verify_context(context: &Path, expected: &[&str]) -> Result<(), BuildError> {
    let mut found = BTreeSet::new();
    for entry in WalkDir::new(context).min_depth(1) {
        let entry = entry.map_err(|e| BuildError::Context(e.into()))?;
        let name = entry
            .path()
            .strip_prefix(context)
            .unwrap_or(entry.path())
            .display()
            .to_string();
        found.insert(name);
    }

    let expected: BTreeSet<String> = expected.iter().map(|s| s.to_string()).collect();
    if found == expected {
        Ok(())
    } else {
        Err(BuildError::UnexpectedContext(found.into_iter().collect()))
    }
}
