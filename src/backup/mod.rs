mod logic;
pub(crate) mod archive;  // gzip compression of the raw dump
pub(crate) mod db_dump;  // mysqldump invocation
pub(crate) mod image;    // build context + image build
pub(crate) mod publish;  // registry login + push
pub(crate) mod report;
pub(crate) mod tag;

use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

pub use logic::BackupOrchestrator;
pub use report::RunReport;

use tag::Tag;

/// Pipeline states. Runs only ever move forward through these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Idle,
    Probing,
    Dumping,
    Compressing,
    Building,
    Publishing,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Idle => "idle",
            Stage::Probing => "probing",
            Stage::Dumping => "dumping",
            Stage::Compressing => "compressing",
            Stage::Building => "building",
            Stage::Publishing => "publishing",
            Stage::Done => "done",
            Stage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// The backup file as it moves through the stages.
#[derive(Debug, Clone, Default)]
pub struct BackupArtifact {
    pub path: Option<PathBuf>,
    pub size: Option<u64>,
    pub tag: Option<Tag>,
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}
