// mysql2docker/src/backup/db_dump.rs
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::{BackupJobConfig, StderrPolicy};
use crate::errors::DumpError;
use crate::utils::command::{CommandRunner, Invocation};
use crate::utils::{discard_file, partial_path, stderr_tail};

/// A finished dump on disk.
#[derive(Debug, Clone)]
pub struct DumpOutcome {
    pub path: PathBuf,
    pub size: u64,
    /// Stderr the tool printed on a successful run, kept when the policy is `Warn`.
    pub warnings: Option<String>,
}

/// Builds the mysqldump call. The password goes through `MYSQL_PWD` so it
/// never shows up in the process list or in logs.
pub fn dump_invocation(config: &BackupJobConfig, stdout_path: &Path) -> Invocation {
    let db = &config.database;
    let inv = Invocation::new(&config.tools.dump)
        .args(["-h", db.host.as_str()])
        .arg("-P")
        .arg(db.port.to_string())
        // `localhost` would otherwise mean the unix socket, not the TCP
        // endpoint the connection check used.
        .arg("--protocol=TCP")
        .args(["-u", db.user.as_str()])
        .args(["--single-transaction", "--quick", "--lock-tables=false"]);

    let inv = if config.dump.include_routines {
        inv.args(["--routines", "--triggers", "--events"])
    } else {
        inv.arg("--skip-triggers")
    };

    inv.arg(db.name.as_str())
        .secret_env("MYSQL_PWD", db.password.clone())
        .stdout_to(stdout_path)
}

/// Dumps the configured database to `destination`.
///
/// Output is streamed to `<destination>.partial` and only renamed once the
/// tool has exited and the result passed every check, so a visible
/// `destination` is always a complete dump. On failure nothing is left behind.
pub async fn dump_database(
    runner: &dyn CommandRunner,
    config: &BackupJobConfig,
    destination: &Path,
) -> Result<DumpOutcome, DumpError> {
    let partial = partial_path(destination);
    let invocation = dump_invocation(config, &partial);

    info!(
        "Starting MySQL dump of `{}` from {}:{}",
        config.database.name, config.database.host, config.database.port
    );

    let result = run_dump(runner, config, &invocation, &partial, destination).await;
    if result.is_err() {
        discard_file(&partial);
        discard_file(destination);
    }
    result
}

async fn run_dump(
    runner: &dyn CommandRunner,
    config: &BackupJobConfig,
    invocation: &Invocation,
    partial: &Path,
    destination: &Path,
) -> Result<DumpOutcome, DumpError> {
    let output = runner.run(invocation).await.map_err(DumpError::Spawn)?;
    let stderr = stderr_tail(&output.stderr, &config.secrets());

    match output.code {
        Some(0) => {}
        Some(code) => return Err(DumpError::ToolFailed { code, stderr }),
        None => return Err(DumpError::Interrupted),
    }

    let warnings = if output.stderr_is_empty() {
        None
    } else {
        match config.dump.stderr_policy {
            StderrPolicy::Fatal => return Err(DumpError::StderrOutput { stderr }),
            StderrPolicy::Warn => {
                warn!("mysqldump reported on stderr: {}", stderr);
                Some(stderr)
            }
        }
    };

    let size = tokio::fs::metadata(partial).await?.len();
    if size == 0 {
        return Err(DumpError::EmptyOutput(destination.to_path_buf()));
    }

    tokio::fs::rename(partial, destination).await?;
    info!("✓ Dump written to {} ({} bytes)", destination.display(), size);

    Ok(DumpOutcome {
        path: destination.to_path_buf(),
        size,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::testing::{FakeRunner, Reply, files_under, job_config};

    const DUMP: &[u8] = b"CREATE TABLE orders (id INT);\nINSERT INTO orders VALUES (1);\n";

    #[test]
    fn test_invocation_defaults_to_schema_and_data() {
        let config = job_config(Path::new("/tmp"));
        let inv = dump_invocation(&config, Path::new("/tmp/out.sql.partial"));

        assert_eq!(
            inv.args,
            vec![
                "-h", "localhost", "-P", "3306", "--protocol=TCP", "-u", "backup",
                "--single-transaction", "--quick", "--lock-tables=false",
                "--skip-triggers", "myapp",
            ]
        );
        assert!(!inv.to_string().contains("db-pass-42"));
        assert_eq!(inv.secret_env[0].0, "MYSQL_PWD");
        assert_eq!(inv.secret_env[0].1.expose(), "db-pass-42");
    }

    #[test]
    fn test_invocation_with_routines() {
        let mut config = job_config(Path::new("/tmp"));
        config.dump.include_routines = true;
        let inv = dump_invocation(&config, Path::new("/tmp/out.sql.partial"));

        assert!(inv.args.iter().any(|a| a == "--routines"));
        assert!(inv.args.iter().any(|a| a == "--triggers"));
        assert!(inv.args.iter().any(|a| a == "--events"));
        assert!(!inv.args.iter().any(|a| a == "--skip-triggers"));
        assert_eq!(inv.args.last().map(String::as_str), Some("myapp"));
    }

    #[tokio::test]
    async fn test_successful_dump_is_renamed_into_place() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = job_config(dir.path());
        let runner = FakeRunner::new().on("mysqldump", Reply::ok().with_stdout(DUMP));
        let destination = dir.path().join("myapp.sql");

        let outcome = dump_database(&runner, &config, &destination).await?;

        assert_eq!(outcome.size, DUMP.len() as u64);
        assert!(outcome.warnings.is_none());
        assert_eq!(std::fs::read(&destination)?, DUMP);
        assert_eq!(files_under(dir.path()), vec![PathBuf::from("myapp.sql")]);
        Ok(())
    }

    #[tokio::test]
    async fn test_non_zero_exit_leaves_no_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = job_config(dir.path());
        let runner = FakeRunner::new().on(
            "mysqldump",
            Reply::failed(2, "mysqldump: Got error: 2002: Can't connect").with_stdout(b"-- partial"),
        );

        let err = dump_database(&runner, &config, &dir.path().join("myapp.sql"))
            .await
            .unwrap_err();

        assert!(matches!(err, DumpError::ToolFailed { code: 2, .. }));
        assert!(files_under(dir.path()).is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_output_is_an_error() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = job_config(dir.path());
        let runner = FakeRunner::new().on("mysqldump", Reply::ok());

        let err = dump_database(&runner, &config, &dir.path().join("myapp.sql"))
            .await
            .unwrap_err();

        assert!(matches!(err, DumpError::EmptyOutput(_)));
        assert!(files_under(dir.path()).is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_interrupted_dump_fails() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = job_config(dir.path());
        let runner = FakeRunner::new().on("mysqldump", Reply::killed().with_stdout(DUMP));

        let err = dump_database(&runner, &config, &dir.path().join("myapp.sql"))
            .await
            .unwrap_err();

        assert!(matches!(err, DumpError::Interrupted));
        assert!(files_under(dir.path()).is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_stderr_policy() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut config = job_config(dir.path());
        let reply = Reply::ok()
            .with_stdout(DUMP)
            .with_stderr("Warning: column statistics not supported");

        let runner = FakeRunner::new().on("mysqldump", reply.clone());
        let outcome = dump_database(&runner, &config, &dir.path().join("warn.sql")).await?;
        assert_eq!(
            outcome.warnings.as_deref(),
            Some("Warning: column statistics not supported")
        );

        config.dump.stderr_policy = StderrPolicy::Fatal;
        let runner = FakeRunner::new().on("mysqldump", reply);
        let err = dump_database(&runner, &config, &dir.path().join("fatal.sql"))
            .await
            .unwrap_err();
        assert!(matches!(err, DumpError::StderrOutput { .. }));
        assert_eq!(files_under(dir.path()), vec![PathBuf::from("warn.sql")]);
        Ok(())
    }

    #[tokio::test]
    async fn test_stderr_in_errors_is_scrubbed() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = job_config(dir.path());
        let runner = FakeRunner::new().on("mysqldump", Reply::failed(1, "bad password db-pass-42"));

        let err = dump_database(&runner, &config, &dir.path().join("myapp.sql"))
            .await
            .unwrap_err();

        assert!(!err.to_string().contains("db-pass-42"));
        Ok(())
    }
}
