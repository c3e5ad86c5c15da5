//! Fakes for the external boundaries: tools, database probe, clock.
use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDate, TimeZone};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use crate::backup::Clock;
use crate::config::{BackupJobConfig, DatabaseConfig};
use crate::errors::ConnectivityError;
use crate::utils::command::{CommandOutput, CommandRunner, Invocation, StdoutTarget};

/// Canned reply for one tool call. `stdout` is written to the target file
/// when the invocation redirects stdout.
#[derive(Debug, Clone, Default)]
pub(crate) struct Reply {
    pub code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl Reply {
    pub fn ok() -> Self {
        Self { code: Some(0), ..Default::default() }
    }

    pub fn with_stdout(mut self, bytes: &[u8]) -> Self {
        self.stdout = bytes.to_vec();
        self
    }

    pub fn failed(code: i32, stderr: &str) -> Self {
        Self { code: Some(code), stdout: Vec::new(), stderr: stderr.as_bytes().to_vec() }
    }

    pub fn killed() -> Self {
        Self { code: None, ..Default::default() }
    }

    pub fn with_stderr(mut self, stderr: &str) -> Self {
        self.stderr = stderr.as_bytes().to_vec();
        self
    }
}

/// Scripted [`CommandRunner`]. Calls are matched against keys like
/// `"mysqldump"` or `"docker push"`; unmatched calls succeed silently.
#[derive(Default)]
pub(crate) struct FakeRunner {
    replies: Mutex<Vec<(String, Reply)>>,
    calls: Mutex<Vec<Invocation>>,
    build_contexts: Mutex<Vec<Vec<String>>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, key: &str, reply: Reply) -> Self {
        self.replies
            .lock()
            .unwrap()
            .push((key.to_string(), reply));
        self
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    /// Keys (`"program subcommand"`) of every call, in order.
    pub fn call_keys(&self) -> Vec<String> {
        self.calls().iter().map(key_of).collect()
    }

    /// File names present in the build context each time `build` ran.
    pub fn build_contexts(&self) -> Vec<Vec<String>> {
        self.build_contexts.lock().unwrap().clone()
    }
}

fn program_name(inv: &Invocation) -> String {
    inv.program
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn key_of(inv: &Invocation) -> String {
    match inv.subcommand() {
        Some(sub) if !sub.starts_with('-') => format!("{} {}", program_name(inv), sub),
        _ => program_name(inv),
    }
}

fn list_dir(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, invocation: &Invocation) -> std::io::Result<CommandOutput> {
        self.calls.lock().unwrap().push(invocation.clone());

        if invocation.subcommand() == Some("build") {
            if let Some(context) = invocation.args.last() {
                self.build_contexts
                    .lock()
                    .unwrap()
                    .push(list_dir(Path::new(context)));
            }
        }

        let key = key_of(invocation);
        let program = program_name(invocation);
        let reply = self
            .replies
            .lock()
            .unwrap()
            .iter()
            .find(|(k, _)| *k == key || *k == program)
            .map(|(_, r)| r.clone())
            .unwrap_or_else(Reply::ok);

        let stdout = match &invocation.stdout {
            StdoutTarget::File(path) => {
                std::fs::write(path, &reply.stdout)?;
                Vec::new()
            }
            StdoutTarget::Capture => reply.stdout.clone(),
        };
        Ok(CommandOutput { code: reply.code, stdout, stderr: reply.stderr })
    }
}

/// Probe that returns a preset outcome.
pub(crate) struct FakeProbe {
    failure: Mutex<Option<ConnectivityError>>,
    calls: Mutex<usize>,
}

impl FakeProbe {
    pub fn reachable() -> Self {
        Self { failure: Mutex::new(None), calls: Mutex::new(0) }
    }

    pub fn failing(error: ConnectivityError) -> Self {
        Self { failure: Mutex::new(Some(error)), calls: Mutex::new(0) }
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl crate::utils::connection::ConnectionProbe for FakeProbe {
    async fn probe(&self, _: &DatabaseConfig, _: Duration) -> Result<(), ConnectivityError> {
        *self.calls.lock().unwrap() += 1;
        match self.failure.lock().unwrap().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

pub(crate) struct FixedClock(pub DateTime<Local>);

impl FixedClock {
    /// 2024-10-16T10:30:45 local time.
    pub fn october_16() -> Self {
        let naive = NaiveDate::from_ymd_opt(2024, 10, 16)
            .and_then(|d| d.and_hms_opt(10, 30, 45))
            .unwrap();
        Self(Local.from_local_datetime(&naive).earliest().unwrap())
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Local> {
        self.0
    }
}

/// A complete configuration pointing at `work_dir`, with fake tool names.
pub(crate) fn job_config(work_dir: &Path) -> BackupJobConfig {
    let pairs = [
        ("MYSQL_USER", "backup"),
        ("MYSQL_PASSWORD", "db-pass-42"),
        ("MYSQL_DATABASE", "myapp"),
        ("DOCKER_USERNAME", "acme"),
        ("DOCKER_PASSWORD", "registry-token-42"),
    ];
    let mut config = BackupJobConfig::from_lookup(|key| {
        pairs.iter().find(|(k, _)| *k == key).map(|(_, v)| v.to_string())
    })
    .unwrap();
    config.work_dir = work_dir.to_path_buf();
    config
}

/// Recursively lists every file under `dir`, relative to it.
pub(crate) fn files_under(dir: &Path) -> Vec<PathBuf> {
    walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path().strip_prefix(dir).unwrap_or(e.path()).to_path_buf())
        .collect()
}
