use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::archive::{self, CompressedArtifact};
use super::db_dump;
use super::image::{self, BackupMetadata};
use super::publish;
use super::report::{RunReport, RunStatus};
use super::tag::{ImageRef, Tag};
use super::{BackupArtifact, Clock, Stage};
use crate::config::BackupJobConfig;
use crate::errors::{BackupError, CompressionError, Result};
use crate::utils::command::CommandRunner;
use crate::utils::connection::ConnectionProbe;

const RUN_DIR_REMOVAL_ATTEMPTS: u32 = 20;
const RUN_DIR_REMOVAL_PAUSE: Duration = Duration::from_millis(100);

#[derive(Debug)]
struct RunState {
    stage: Stage,
    artifact: BackupArtifact,
    image: Option<ImageRef>,
    run_dir: Option<PathBuf>,
    dump_warnings: Option<String>,
}

/// Drives one backup run: probe, dump, compress, build, publish.
///
/// Each stage gates the next. The first failure ends the run in
/// [`Stage::Failed`]; there are no retries at this level. Local files live
/// in a per-run directory under the configured work dir that is removed on
/// every exit path. An image that was partially pushed before a failure is
/// not rolled back.
pub struct BackupOrchestrator<'a> {
    config: &'a BackupJobConfig,
    runner: &'a dyn CommandRunner,
    probe: &'a dyn ConnectionProbe,
    clock: &'a dyn Clock,
    run_id: Uuid,
    state: Mutex<RunState>,
}

impl<'a> BackupOrchestrator<'a> {
    pub fn new(
        config: &'a BackupJobConfig,
        runner: &'a dyn CommandRunner,
        probe: &'a dyn ConnectionProbe,
        clock: &'a dyn Clock,
    ) -> Self {
        Self {
            config,
            runner,
            probe,
            clock,
            run_id: Uuid::new_v4(),
            state: Mutex::new(RunState {
                stage: Stage::Idle,
                artifact: BackupArtifact::default(),
                image: None,
                run_dir: None,
                dump_warnings: None,
            }),
        }
    }

    pub fn stage(&self) -> Stage {
        self.lock().stage
    }

    /// Runs the pipeline, abandoning it when `shutdown` resolves first.
    ///
    /// Abandoning drops the active stage: its child process is killed and
    /// the run directory is removed before the report is returned.
    pub async fn run_until<F>(&self, shutdown: F) -> RunReport
    where
        F: Future<Output = ()>,
    {
        let started = Instant::now();
        info!("Starting backup run {} for database `{}`", self.run_id, self.config.database.name);

        let finished = tokio::select! {
            result = self.execute() => Some(result),
            _ = shutdown => None,
        };
        let outcome = match finished {
            Some(result) => result,
            None => {
                let stage = self.stage();
                warn!("Interrupted during {}, cleaning up", stage);
                self.remove_abandoned_run_dir().await;
                Err(BackupError::Cancelled(stage))
            }
        };

        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        match outcome {
            Ok(image) => {
                info!("✓ Backup completed: {} in {} ms", image, elapsed_ms);
                self.report(RunStatus::Done, Stage::Done, None, elapsed_ms)
            }
            Err(e) => {
                let stage = e.stage();
                self.advance(Stage::Failed);
                if let Some(path) = &self.lock().artifact.path {
                    info!("Local artifact {} was discarded", path.display());
                }
                error!(stage = %stage, kind = e.kind(), "Backup failed during {}: {}", stage, e);
                self.report(RunStatus::Failed, stage, Some(&e), elapsed_ms)
            }
        }
    }

    async fn execute(&self) -> Result<ImageRef> {
        let config = self.config;
        let started_at = self.clock.now();
        let tag = match &config.custom_tag {
            Some(tag) => tag.clone(),
            None => Tag::generate(&config.database.name, started_at.naive_local()),
        };
        self.lock().artifact.tag = Some(tag.clone());
        info!("Backup tag: {}", tag);

        self.advance(Stage::Probing);
        self.probe
            .probe(&config.database, config.probe_timeout)
            .await?;

        self.advance(Stage::Dumping);
        tokio::fs::create_dir_all(&config.work_dir)
            .await
            .map_err(BackupError::Workspace)?;
        let run_dir = tempfile::Builder::new()
            .prefix(&format!("run-{}-", tag))
            .tempdir_in(&config.work_dir)
            .map_err(BackupError::Workspace)?;
        let run_dir_path = run_dir.path().to_path_buf();
        self.lock().run_dir = Some(run_dir_path.clone());

        let result = self.execute_in(&run_dir_path, &tag, started_at).await;

        if let Err(e) = run_dir.close() {
            warn!("Could not remove run directory {}: {}", run_dir_path.display(), e);
        }
        self.lock().run_dir = None;
        result
    }

    async fn execute_in(&self, run_dir: &Path, tag: &Tag, started_at: DateTime<Local>) -> Result<ImageRef> {
        let config = self.config;

        let dump_path = run_dir.join(format!("{}.sql", tag.as_str()));
        let dump = db_dump::dump_database(self.runner, config, &dump_path).await?;
        {
            let mut state = self.lock();
            state.artifact.path = Some(dump.path.clone());
            state.dump_warnings = dump.warnings;
        }

        self.advance(Stage::Compressing);
        let raw_size = dump.size;
        let compressed = self.compress(dump.path, config.compression_level).await?;
        info!("Dump reduced from {} to {} bytes", raw_size, compressed.size);
        {
            let mut state = self.lock();
            state.artifact.path = Some(compressed.path.clone());
            state.artifact.size = Some(compressed.size);
        }

        self.advance(Stage::Building);
        let image = image::image_ref(config, tag);
        self.lock().image = Some(image.clone());
        let metadata = BackupMetadata {
            run_id: self.run_id,
            created_at: started_at,
            database: config.database.name.clone(),
            source: format!("{}:{}", config.database.host, config.database.port),
            tag: tag.clone(),
            artifact_name: compressed
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| format!("{}.sql.gz", tag)),
            artifact_size: compressed.size,
        };
        image::assemble_image(self.runner, config, &compressed, &image, &metadata, run_dir).await?;

        self.advance(Stage::Publishing);
        let auth_dir = publish::prepare_auth_dir(config, run_dir).await?;
        publish::publish_image(self.runner, config, &image, auth_dir.as_deref()).await?;
        if config.remove_local_image {
            publish::remove_local_image(self.runner, config, &image, auth_dir.as_deref()).await;
        }

        self.advance(Stage::Done);
        Ok(image)
    }

    async fn compress(&self, source: PathBuf, level: u32) -> Result<CompressedArtifact> {
        let compressed = tokio::task::spawn_blocking(move || archive::compress_dump(&source, level))
            .await
            .map_err(|e| CompressionError::Task(e.to_string()))??;
        Ok(compressed)
    }

    fn advance(&self, next: Stage) {
        let mut state = self.lock();
        debug_assert!(next > state.stage, "stage {} cannot follow {}", next, state.stage);
        if next > state.stage {
            info!("Stage: {} -> {}", state.stage, next);
            state.stage = next;
        }
    }

    /// A dropped stage may still have a blocking task touching the run
    /// directory, so removal is retried briefly.
    async fn remove_abandoned_run_dir(&self) {
        let Some(dir) = self.lock().run_dir.take() else {
            return;
        };
        for _ in 0..RUN_DIR_REMOVAL_ATTEMPTS {
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => return,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
                Err(_) => tokio::time::sleep(RUN_DIR_REMOVAL_PAUSE).await,
            }
        }
        warn!("Could not remove run directory {}", dir.display());
    }

    fn report(&self, status: RunStatus, stage: Stage, error: Option<&BackupError>, elapsed_ms: u64) -> RunReport {
        let state = self.lock();
        RunReport {
            status,
            run_id: self.run_id,
            stage,
            error_kind: error.map(BackupError::kind),
            message: error.map(ToString::to_string),
            image: state.image.as_ref().map(ToString::to_string),
            tag: state.artifact.tag.as_ref().map(ToString::to_string),
            artifact_bytes: state.artifact.size,
            dump_warnings: state.dump_warnings.clone(),
            elapsed_ms,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
