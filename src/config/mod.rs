// mysql2docker/src/config/mod.rs
use std::path::PathBuf;
use std::time::Duration;

use crate::backup::tag::{Tag, validate_registry_host, validate_repository_component};
use crate::errors::ConfigError;
use crate::utils::Secret;

const DEFAULT_MYSQL_HOST: &str = "localhost";
const DEFAULT_MYSQL_PORT: u16 = 3306;
const DEFAULT_IMAGE_NAME: &str = "mysql-backup";
const DEFAULT_BACKUP_DIR: &str = "backups";
const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 10;
const DEFAULT_COMPRESSION_LEVEL: u32 = 6;
const DEFAULT_DUMP_TOOL: &str = "mysqldump";
const DEFAULT_CONTAINER_TOOL: &str = "docker";

/// What to do when the dump tool writes to stderr but exits with status 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StderrPolicy {
    /// Log the output as a warning and keep going.
    Warn,
    /// Treat any stderr output as a failed dump.
    Fatal,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Secret,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Registry host; `None` means the container tool's default registry.
    pub host: Option<String>,
    pub username: String,
    pub image_name: String,
    /// When absent, the container tool's existing login is used.
    pub password: Option<Secret>,
}

#[derive(Debug, Clone)]
pub struct DumpOptions {
    pub include_routines: bool,
    pub stderr_policy: StderrPolicy,
}

#[derive(Debug, Clone)]
pub struct ToolConfig {
    pub dump: PathBuf,
    pub container: PathBuf,
}

/// Everything one backup run needs. Built once at startup and passed down.
#[derive(Debug, Clone)]
pub struct BackupJobConfig {
    pub database: DatabaseConfig,
    pub registry: RegistryConfig,
    pub custom_tag: Option<Tag>,
    pub work_dir: PathBuf,
    pub dump: DumpOptions,
    pub probe_timeout: Duration,
    pub compression_level: u32,
    pub tools: ToolConfig,
    pub remove_local_image: bool,
}

impl BackupJobConfig {
    /// Loads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup. Blank values count as
    /// unset. All missing required keys are reported together.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut missing = Vec::new();
        let mut required = |key: &'static str| {
            let value = get(key);
            if value.is_none() {
                missing.push(key);
            }
            value.unwrap_or_default()
        };
        let user = required("MYSQL_USER");
        let password = required("MYSQL_PASSWORD");
        let name = required("MYSQL_DATABASE");
        let username = required("DOCKER_USERNAME");
        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }

        let port = match get("MYSQL_PORT") {
            Some(raw) => raw.parse::<u16>().ok().filter(|p| *p != 0).ok_or_else(|| {
                ConfigError::Invalid {
                    key: "MYSQL_PORT",
                    reason: format!("`{}` is not a valid TCP port", raw),
                }
            })?,
            None => DEFAULT_MYSQL_PORT,
        };

        let image_name = get("DOCKER_IMAGE_NAME").unwrap_or_else(|| DEFAULT_IMAGE_NAME.to_string());
        validate_repository_component(&username)
            .map_err(|reason| ConfigError::Invalid { key: "DOCKER_USERNAME", reason })?;
        validate_repository_component(&image_name)
            .map_err(|reason| ConfigError::Invalid { key: "DOCKER_IMAGE_NAME", reason })?;

        let registry_host = get("DOCKER_REGISTRY");
        if let Some(host) = &registry_host {
            validate_registry_host(host)
                .map_err(|reason| ConfigError::Invalid { key: "DOCKER_REGISTRY", reason })?;
        }

        let custom_tag = get("CUSTOM_TAG")
            .map(|raw| Tag::parse(&raw))
            .transpose()
            .map_err(|reason| ConfigError::Invalid { key: "CUSTOM_TAG", reason })?;

        let stderr_policy = match get("DUMP_STDERR_POLICY").as_deref() {
            None => StderrPolicy::Warn,
            Some(raw) => match raw.to_ascii_lowercase().as_str() {
                "warn" => StderrPolicy::Warn,
                "fatal" => StderrPolicy::Fatal,
                _ => {
                    return Err(ConfigError::Invalid {
                        key: "DUMP_STDERR_POLICY",
                        reason: format!("expected `warn` or `fatal`, got `{}`", raw),
                    });
                }
            },
        };

        let probe_timeout_secs = match get("PROBE_TIMEOUT_SECS") {
            Some(raw) => raw.parse::<u64>().ok().filter(|s| *s > 0).ok_or_else(|| {
                ConfigError::Invalid {
                    key: "PROBE_TIMEOUT_SECS",
                    reason: format!("`{}` is not a positive number of seconds", raw),
                }
            })?,
            None => DEFAULT_PROBE_TIMEOUT_SECS,
        };

        let compression_level = match get("COMPRESSION_LEVEL") {
            Some(raw) => raw.parse::<u32>().ok().filter(|l| *l <= 9).ok_or_else(|| {
                ConfigError::Invalid {
                    key: "COMPRESSION_LEVEL",
                    reason: format!("`{}` is not a gzip level between 0 and 9", raw),
                }
            })?,
            None => DEFAULT_COMPRESSION_LEVEL,
        };

        Ok(BackupJobConfig {
            database: DatabaseConfig {
                host: get("MYSQL_HOST").unwrap_or_else(|| DEFAULT_MYSQL_HOST.to_string()),
                port,
                user,
                password: Secret::new(password),
                name,
            },
            registry: RegistryConfig {
                host: registry_host,
                username,
                image_name,
                password: get("DOCKER_PASSWORD").map(Secret::new),
            },
            custom_tag,
            work_dir: get("BACKUP_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_BACKUP_DIR)),
            dump: DumpOptions {
                include_routines: parse_flag(get("DUMP_INCLUDE_ROUTINES"), "DUMP_INCLUDE_ROUTINES")?,
                stderr_policy,
            },
            probe_timeout: Duration::from_secs(probe_timeout_secs),
            compression_level,
            tools: ToolConfig {
                dump: PathBuf::from(get("MYSQLDUMP_BIN").unwrap_or_else(|| DEFAULT_DUMP_TOOL.to_string())),
                container: PathBuf::from(
                    get("CONTAINER_TOOL").unwrap_or_else(|| DEFAULT_CONTAINER_TOOL.to_string()),
                ),
            },
            remove_local_image: parse_flag(get("REMOVE_LOCAL_IMAGE"), "REMOVE_LOCAL_IMAGE")?,
        })
    }

    /// Secrets that must be scrubbed from any tool output we surface.
    pub fn secrets(&self) -> Vec<&Secret> {
        let mut secrets = vec![&self.database.password];
        if let Some(token) = &self.registry.password {
            secrets.push(token);
        }
        secrets
    }
}

fn parse_flag(value: Option<String>, key: &'static str) -> Result<bool, ConfigError> {
    match value.as_deref().map(str::to_ascii_lowercase).as_deref() {
        None => Ok(false),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(other) => Err(ConfigError::Invalid {
            key,
            reason: format!("`{}` is not a boolean", other),
        }),
    }
}
