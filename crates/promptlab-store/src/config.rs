//! Store configuration.
//!
//! | Environment Variable | Description |
//! |---------------------|-------------|
//! | `PROMPTLAB_STORE_URL` | Full store URL, wins over the bucket (`s3://`, `file://`, `memory://`) |
//! | `PROMPTLAB_S3_BUCKET` | S3 bucket holding both tables |
//! | `PROMPTLAB_S3_REGION` | S3 region |
//! | `AWS_ACCESS_KEY_ID` | Access key |
//! | `AWS_SECRET_ACCESS_KEY` | Secret key |
//! | `PROMPTLAB_ANSWERS_PREFIX` | Key prefix for answer tables (default: `answers/`) |
//! | `PROMPTLAB_PLAYGROUND_PREFIX` | Key prefix for interaction logs (default: `playground/`) |
//! | `PROMPTLAB_CONDITIONAL_WRITES` | `1`/`true` to reject writes that lost a race |

use std::path::Path;

use serde::Deserialize;

use crate::error::{StoreError, StoreResult};

/// Parsed store specification.
///
/// # Examples
///
/// ```text
/// s3://quiz-bucket
/// s3://quiz-bucket/staging?region=eu-west-1
/// file:///var/lib/promptlab
/// memory://  (for testing)
/// ```
#[derive(Debug, Clone)]
pub struct StoreSpec {
    /// The scheme (s3, file, memory)
    pub scheme: String,
    /// Bucket name (empty for file://)
    pub bucket: Option<String>,
    /// Base path within the bucket, joined in front of both table prefixes
    pub prefix: String,
    /// Optional region (for S3)
    pub region: Option<String>,
}

impl StoreSpec {
    /// Parse a store URL like `s3://bucket/prefix` or `file:///path`.
    pub fn parse(url: &str) -> StoreResult<Self> {
        let url = url::Url::parse(url).map_err(|e| StoreError::InvalidSpec {
            spec: url.to_string(),
            reason: e.to_string(),
        })?;

        let scheme = url.scheme().to_string();
        let bucket = url
            .host_str()
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string());
        let prefix = url.path().trim_start_matches('/').to_string();

        let region = url
            .query_pairs()
            .find(|(k, _)| k == "region")
            .map(|(_, v)| v.to_string());

        Ok(Self {
            scheme,
            bucket,
            prefix,
            region,
        })
    }

    /// Check if this is a memory store (for testing).
    pub fn is_memory(&self) -> bool {
        self.scheme == "memory"
    }

    /// Check if this is a local file store.
    pub fn is_file(&self) -> bool {
        self.scheme == "file"
    }
}

/// How a rewritten table is put back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Unconditional put. Concurrent writers to the same table lose updates.
    #[default]
    Overwrite,
    /// Put only if the table is unchanged since it was read.
    Conditional,
}

/// Record store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Full store URL. Takes precedence over `bucket`.
    #[serde(default)]
    pub url: Option<String>,

    /// S3 bucket name.
    #[serde(default)]
    pub bucket: Option<String>,

    /// S3 region.
    #[serde(default)]
    pub region: Option<String>,

    #[serde(default)]
    pub access_key_id: Option<String>,

    #[serde(default)]
    pub secret_access_key: Option<String>,

    /// Prefix for `{email}_answers.csv` keys.
    #[serde(default = "default_answers_prefix")]
    pub answers_prefix: String,

    /// Prefix for `{email}_interactions.csv` keys.
    #[serde(default = "default_playground_prefix")]
    pub playground_prefix: String,

    #[serde(default)]
    pub write_mode: WriteMode,
}

fn default_answers_prefix() -> String {
    "answers/".to_string()
}

fn default_playground_prefix() -> String {
    "playground/".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: None,
            bucket: None,
            region: None,
            access_key_id: None,
            secret_access_key: None,
            answers_prefix: default_answers_prefix(),
            playground_prefix: default_playground_prefix(),
            write_mode: WriteMode::default(),
        }
    }
}

impl StoreConfig {
    /// Create config from environment variables (see module docs).
    pub fn from_env() -> Self {
        Self {
            url: non_empty_var("PROMPTLAB_STORE_URL"),
            bucket: non_empty_var("PROMPTLAB_S3_BUCKET"),
            region: non_empty_var("PROMPTLAB_S3_REGION"),
            access_key_id: non_empty_var("AWS_ACCESS_KEY_ID"),
            secret_access_key: non_empty_var("AWS_SECRET_ACCESS_KEY"),
            answers_prefix: std::env::var("PROMPTLAB_ANSWERS_PREFIX")
                .unwrap_or_else(|_| default_answers_prefix()),
            playground_prefix: std::env::var("PROMPTLAB_PLAYGROUND_PREFIX")
                .unwrap_or_else(|_| default_playground_prefix()),
            write_mode: if std::env::var("PROMPTLAB_CONDITIONAL_WRITES")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false)
            {
                WriteMode::Conditional
            } else {
                WriteMode::Overwrite
            },
        }
    }

    /// Parse config from YAML. Missing fields take their defaults.
    pub fn from_yaml_str(yaml: &str) -> StoreResult<Self> {
        serde_yaml::from_str(yaml).map_err(|e| StoreError::NotConfigured {
            message: format!("invalid store config: {e}"),
        })
    }

    /// Load config from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| StoreError::Io {
            message: format!("failed to read config {}: {}", path.display(), e),
        })?;
        Self::from_yaml_str(&text)
    }

    /// Memory-backed config for tests.
    pub fn memory() -> Self {
        Self {
            url: Some("memory://".to_string()),
            ..Self::default()
        }
    }

    /// Set the store URL.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Set the S3 bucket.
    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    /// Set both table prefixes.
    pub fn with_prefixes(
        mut self,
        answers_prefix: impl Into<String>,
        playground_prefix: impl Into<String>,
    ) -> Self {
        self.answers_prefix = answers_prefix.into();
        self.playground_prefix = playground_prefix.into();
        self
    }

    /// Set the write mode.
    pub fn with_write_mode(mut self, mode: WriteMode) -> Self {
        self.write_mode = mode;
        self
    }

    /// Resolve the store location.
    ///
    /// The URL wins; otherwise the bucket becomes `s3://{bucket}`. A region
    /// set on the config fills in when the URL has none.
    pub fn spec(&self) -> StoreResult<StoreSpec> {
        let mut spec = match (&self.url, &self.bucket) {
            (Some(url), _) => StoreSpec::parse(url)?,
            (None, Some(bucket)) => StoreSpec::parse(&format!("s3://{bucket}"))?,
            (None, None) => {
                return Err(StoreError::NotConfigured {
                    message: "set PROMPTLAB_STORE_URL or PROMPTLAB_S3_BUCKET".to_string(),
                })
            }
        };
        if spec.region.is_none() {
            spec.region.clone_from(&self.region);
        }
        Ok(spec)
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}
