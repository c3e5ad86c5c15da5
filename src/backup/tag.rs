// Registry tag and image reference naming.
use chrono::NaiveDateTime;
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

const TAG_PREFIX: &str = "backup";
const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
pub const MAX_TAG_LEN: usize = 128;

static TAG_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}$").expect("static tag pattern")
});

static REPOSITORY_COMPONENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]+(?:[._-]+[a-z0-9]+)*$").expect("static repository pattern")
});

static REGISTRY_HOST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?)*(?::[0-9]{1,5})?$")
        .expect("static registry pattern")
});

/// A validated registry tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag(String);

impl Tag {
    /// Validates a user-supplied tag.
    pub fn parse(raw: &str) -> Result<Self, String> {
        if TAG_PATTERN.is_match(raw) {
            Ok(Self(raw.to_string()))
        } else {
            Err(format!(
                "`{}` is not a valid image tag (allowed: letters, digits, '_', '.', '-', \
                 must not start with '.' or '-', at most {} characters)",
                raw, MAX_TAG_LEN
            ))
        }
    }

    /// Builds `backup_<database>_<YYYYmmdd>_<HHMMSS>`. Characters the
    /// registry rejects are replaced and the database part is shortened so
    /// the result is always a valid tag.
    pub fn generate(database: &str, at: NaiveDateTime) -> Self {
        let timestamp = at.format(TIMESTAMP_FORMAT).to_string();
        let budget = MAX_TAG_LEN - TAG_PREFIX.len() - timestamp.len() - 2;
        let database: String = database
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .take(budget)
            .collect();
        Self(format!("{}_{}_{}", TAG_PREFIX, database, timestamp))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Checks one path component of a repository name (`user` or `image`).
pub fn validate_repository_component(value: &str) -> Result<(), String> {
    if REPOSITORY_COMPONENT.is_match(value) {
        Ok(())
    } else {
        Err(format!(
            "`{}` must be lowercase letters and digits, optionally separated by '.', '_' or '-'",
            value
        ))
    }
}

/// Fully qualified image reference, `[registry/]user/image:tag`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub registry: Option<String>,
    pub username: String,
    pub image: String,
    pub tag: Tag,
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(registry) = &self.registry {
            write!(f, "{}/", registry)?;
        }
        write!(f, "{}/{}:{}", self.username, self.image, self.tag)
    }
}

/// A registry is `host[:port]`: no scheme, no path, no whitespace.
pub fn validate_registry_host(value: &str) -> Result<(), String> {
    let port_ok = value
        .rsplit_once(':')
        .is_none_or(|(_, port)| port.parse::<u16>().is_ok_and(|p| p != 0));
    if REGISTRY_HOST.is_match(value) && port_ok {
        Ok(())
    } else {
        Err(format!("`{}` is not a registry host (expected host[:port])", value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn clock_reading() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 10, 16)
            .and_then(|d| d.and_hms_opt(10, 30, 45))
            .unwrap()
    }

    #[test]
    fn test_generated_tag_format() {
        let tag = Tag::generate("myapp", clock_reading());
        assert_eq!(tag.as_str(), "backup_myapp_20241016_103045");
    }

    #[test]
    fn test_generated_tag_is_always_valid() {
        let awkward = format!("shop db$ü{}", "x".repeat(300));
        let tag = Tag::generate(&awkward, clock_reading());

        assert!(tag.as_str().len() <= MAX_TAG_LEN);
        assert!(tag.as_str().starts_with("backup_shop_db__"));
        assert!(tag.as_str().ends_with("_20241016_103045"));
        assert!(Tag::parse(tag.as_str()).is_ok());
    }

    #[test]
    fn test_custom_tag_validation() {
        assert!(Tag::parse("production-v1").is_ok());
        assert!(Tag::parse("v1.2.3_final").is_ok());
        assert!(Tag::parse("").is_err());
        assert!(Tag::parse("-leading-dash").is_err());
        assert!(Tag::parse("has space").is_err());
        assert!(Tag::parse("colon:tag").is_err());
        assert!(Tag::parse(&"a".repeat(MAX_TAG_LEN + 1)).is_err());
    }

    #[test]
    fn test_image_ref_rendering() -> anyhow::Result<()> {
        let tag = Tag::parse("production-v1").map_err(anyhow::Error::msg)?;
        let mut image = ImageRef {
            registry: None,
            username: "acme".to_string(),
            image: "mysql-backup".to_string(),
            tag,
        };
        assert_eq!(image.to_string(), "acme/mysql-backup:production-v1");

        image.registry = Some("ghcr.io".to_string());
        assert_eq!(image.to_string(), "ghcr.io/acme/mysql-backup:production-v1");
        Ok(())
    }

    #[test]
    fn test_registry_host_validation() {
        assert!(validate_registry_host("ghcr.io").is_ok());
        assert!(validate_registry_host("localhost:5000").is_ok());
        assert!(validate_registry_host("registry.example.com:443").is_ok());
        assert!(validate_registry_host("https://ghcr.io").is_err());
        assert!(validate_registry_host("ghcr.io/acme").is_err());
        assert!(validate_registry_host("ghcr .io").is_err());
        assert!(validate_registry_host("ghcr.io:99999").is_err());
        assert!(validate_registry_host("-bad.io").is_err());
    }

    #[test]
    fn test_repository_component_validation() {
        assert!(validate_repository_component("mysql-backup").is_ok());
        assert!(validate_repository_component("acme.corp").is_ok());
        assert!(validate_repository_component("Acme").is_err());
        assert!(validate_repository_component("trailing-").is_err());
        assert!(validate_repository_component("").is_err());
    }
}
