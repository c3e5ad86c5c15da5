use std::path::PathBuf;

use thiserror::Error;

use crate::backup::Stage;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required environment variables: {}", .0.join(", "))]
    Missing(Vec<&'static str>),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("required tool `{program}` not found in PATH")]
    ToolNotFound { program: String },
}

#[derive(Error, Debug)]
pub enum ConnectivityError {
    #[error("authentication failed for user `{user}`: {detail}")]
    Authentication { user: String, detail: String },

    #[error("database `{database}` does not exist on the server")]
    UnknownDatabase { database: String },

    #[error("cannot reach {host}:{port}: {detail}")]
    Unreachable { host: String, port: u16, detail: String },
}

#[derive(Error, Debug)]
pub enum DumpError {
    #[error("failed to start dump tool: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("dump tool exited with status {code}: {stderr}")]
    ToolFailed { code: i32, stderr: String },

    #[error("dump tool was interrupted before completing")]
    Interrupted,

    #[error("dump tool wrote to stderr and the stderr policy is fatal: {stderr}")]
    StderrOutput { stderr: String },

    #[error("dump tool produced an empty file at {}", .0.display())]
    EmptyOutput(PathBuf),

    #[error("I/O error while handling the dump file: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum CompressionError {
    #[error("dump file {} does not exist", .0.display())]
    MissingSource(PathBuf),

    #[error("dump file {} is empty", .0.display())]
    EmptySource(PathBuf),

    #[error("compression failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("compression task did not complete: {0}")]
    Task(String),
}

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("failed to prepare build context: {0}")]
    Context(#[from] std::io::Error),

    #[error("build context must contain exactly the artifact and metadata file, found: {}", .0.join(", "))]
    UnexpectedContext(Vec<String>),

    #[error("failed to start build tool: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("build tool exited with status {code}: {stderr}")]
    ToolFailed { code: i32, stderr: String },

    #[error("build tool was interrupted before completing")]
    Interrupted,
}

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("registry authentication failed: {0}")]
    Authentication(String),

    #[error("network failure talking to the registry: {0}")]
    Network(String),

    #[error("registry rejected the push: {0}")]
    Rejected(String),

    #[error("failed to start container tool: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("container tool was interrupted before completing")]
    Interrupted,

    #[error("failed to prepare the registry credential directory: {0}")]
    AuthDir(#[source] std::io::Error),
}

/// Failure of a backup run, tagged with the stage that produced it.
#[derive(Error, Debug)]
pub enum BackupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Connectivity(#[from] ConnectivityError),

    #[error(transparent)]
    Dump(#[from] DumpError),

    #[error(transparent)]
    Compression(#[from] CompressionError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error("run was cancelled during {0}")]
    Cancelled(Stage),

    #[error("failed to manage the run directory: {0}")]
    Workspace(#[source] std::io::Error),
}

impl BackupError {
    /// Stage the run was in when this error surfaced.
    pub fn stage(&self) -> Stage {
        match self {
            BackupError::Config(_) => Stage::Idle,
            BackupError::Connectivity(_) => Stage::Probing,
            BackupError::Dump(_) | BackupError::Workspace(_) => Stage::Dumping,
            BackupError::Compression(_) => Stage::Compressing,
            BackupError::Build(_) => Stage::Building,
            BackupError::Publish(_) => Stage::Publishing,
            BackupError::Cancelled(stage) => *stage,
        }
    }

    /// Stable classification used in the final status line.
    pub fn kind(&self) -> &'static str {
        match self {
            BackupError::Config(_) => "configuration",
            BackupError::Connectivity(e) => match e {
                ConnectivityError::Authentication { .. } => "authentication",
                ConnectivityError::UnknownDatabase { .. } => "unknown_database",
                ConnectivityError::Unreachable { .. } => "unreachable",
            },
            BackupError::Dump(e) => match e {
                DumpError::Spawn(_) => "spawn",
                DumpError::ToolFailed { .. } => "tool_failed",
                DumpError::Interrupted => "interrupted",
                DumpError::StderrOutput { .. } => "stderr_output",
                DumpError::EmptyOutput(_) => "empty_output",
                DumpError::Io(_) => "io",
            },
            BackupError::Compression(e) => match e {
                CompressionError::MissingSource(_) => "missing_source",
                CompressionError::EmptySource(_) => "empty_source",
                CompressionError::Io(_) | CompressionError::Task(_) => "io",
            },
            BackupError::Build(e) => match e {
                BuildError::Context(_) => "io",
                BuildError::UnexpectedContext(_) => "unexpected_context",
                BuildError::Spawn(_) => "spawn",
                BuildError::ToolFailed { .. } => "tool_failed",
                BuildError::Interrupted => "interrupted",
            },
            BackupError::Publish(e) => match e {
                PublishError::Authentication(_) => "authentication",
                PublishError::Network(_) => "network",
                PublishError::Rejected(_) => "rejected",
                PublishError::Spawn(_) => "spawn",
                PublishError::Interrupted => "interrupted",
                PublishError::AuthDir(_) => "io",
            },
            BackupError::Cancelled(_) => "interrupted",
            BackupError::Workspace(_) => "io",
        }
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
