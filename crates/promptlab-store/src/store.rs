//! Record store backed by `object_store`.
//!
//! Each user owns two blobs: an answer table and an interaction log. Every
//! write fetches the whole table, changes it in memory and puts the whole
//! table back. Nothing is cached between calls.

use std::sync::Arc;

use async_trait::async_trait;
use futures::TryStreamExt;
use object_store::path::Path;
use object_store::{
    GetOptions, ObjectMeta, ObjectStore, PutMode, PutOptions, PutPayload, UpdateVersion,
};
use serde_json::{Map, Value};
use tracing::{debug, error, warn};

use crate::codec;
use crate::config::{StoreConfig, StoreSpec, WriteMode};
use crate::error::{StoreError, StoreResult};
use crate::naming::KeyBuilder;
use crate::record::{AnswerRecord, InteractionRecord, Record};
use crate::table::Table;

/// Interaction column holding the JSON-encoded model parameters.
pub const PARAMETERS_COLUMN: &str = "parameters";

/// Sentinel returned by [`RecordStore::get_last_answered_question`] for a
/// user without answers.
pub const NO_ANSWERS: i64 = -1;

/// Persistence of quiz answers and playground interactions.
///
/// The required methods are fallible and distinguish a missing table (empty
/// result) from every other failure. The provided `get_*` methods are the
/// soft reads: they log failures and return an empty table instead.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert or replace the answer for `(email, question_number)`.
    ///
    /// A replaced answer keeps its row position. All fields, including the
    /// submission timestamp, take the new values.
    async fn upsert_answer(
        &self,
        email: &str,
        question_number: i64,
        answer: &str,
        ai_usage: &str,
        time_taken: i64,
    ) -> StoreResult<()>;

    /// All answers of one user, in table order. No table means no answers.
    async fn load_answers(&self, email: &str) -> StoreResult<Vec<AnswerRecord>>;

    /// Append one interaction to the user's log. Never deduplicates.
    async fn append_interaction(
        &self,
        email: &str,
        question_number: i64,
        prompt: &str,
        parameters: Map<String, Value>,
        response: &str,
    ) -> StoreResult<()>;

    /// Interactions of one user, or of every user when `email` is `None`.
    ///
    /// The all-users form lists every interaction log under the playground
    /// prefix and concatenates them in key order.
    async fn load_interactions(&self, email: Option<&str>) -> StoreResult<Vec<InteractionRecord>>;

    /// Answer table of one user.
    ///
    /// Returns an empty table with the canonical answer columns when the
    /// user has no table or the table cannot be read.
    async fn get_user_answers(&self, email: &str) -> Table {
        let loaded = self
            .load_answers(email)
            .await
            .and_then(|records| Table::from_records(&records));
        match loaded {
            Ok(table) => table,
            Err(e) => {
                warn!(email = %email, error = %e, "failed to read answers, returning empty table");
                Table::empty(AnswerRecord::COLUMNS)
            }
        }
    }

    /// Highest answered question number, or [`NO_ANSWERS`].
    async fn get_last_answered_question(&self, email: &str) -> i64 {
        self.get_user_answers(email)
            .await
            .column("question_number")
            .and_then(|cells| cells.filter_map(Value::as_i64).max())
            .unwrap_or(NO_ANSWERS)
    }

    /// Interaction table with `parameters` flattened into columns.
    async fn try_get_playground_interactions(&self, email: Option<&str>) -> StoreResult<Table> {
        let records = self.load_interactions(email).await?;
        let mut table = Table::from_records(&records)?;
        table.flatten_json_column(PARAMETERS_COLUMN)?;
        Ok(table)
    }

    /// Soft version of [`RecordStore::try_get_playground_interactions`].
    ///
    /// Any failure yields an empty table; rows already collected from other
    /// users are dropped.
    async fn get_playground_interactions(&self, email: Option<&str>) -> Table {
        match self.try_get_playground_interactions(email).await {
            Ok(table) => table,
            Err(e) => {
                match email {
                    Some(email) => {
                        warn!(email = %email, error = %e, "failed to read playground interactions")
                    }
                    None => error!(error = %e, "failed to aggregate playground interactions"),
                }
                empty_interactions_table()
            }
        }
    }
}

/// Empty flattened interaction table.
pub fn empty_interactions_table() -> Table {
    let columns: Vec<&str> = InteractionRecord::COLUMNS
        .iter()
        .copied()
        .filter(|c| *c != PARAMETERS_COLUMN)
        .collect();
    Table::empty(&columns)
}

/// A table as read, with the version needed for a conditional put.
struct Snapshot<R> {
    records: Vec<R>,
    /// `None` when the blob does not exist yet.
    version: Option<UpdateVersion>,
}

/// Record store on top of any `object_store` backend.
///
/// Supports:
/// - S3 and S3-compatible (MinIO, R2)
/// - Local filesystem
/// - In-memory (for testing)
pub struct ObjectRecordStore {
    inner: Arc<dyn ObjectStore>,
    keys: KeyBuilder,
    write_mode: WriteMode,
}

impl ObjectRecordStore {
    /// Build a store from configuration.
    pub async fn from_config(config: &StoreConfig) -> StoreResult<Self> {
        let spec = config.spec()?;
        let inner: Arc<dyn ObjectStore> = if spec.is_memory() {
            Arc::new(object_store::memory::InMemory::new())
        } else if spec.is_file() {
            Arc::new(local_store(&spec)?)
        } else if spec.scheme == "s3" {
            Arc::new(s3_store(&spec, config)?)
        } else {
            return Err(StoreError::InvalidSpec {
                spec: spec.scheme.clone(),
                reason: format!("unsupported scheme: {}", spec.scheme),
            });
        };

        // For file:// the URL path is the root directory, not a key prefix
        let base = if spec.is_file() { "" } else { spec.prefix.as_str() };
        let keys = KeyBuilder::new(
            join_base(base, &config.answers_prefix),
            join_base(base, &config.playground_prefix),
        );
        debug!(scheme = %spec.scheme, ?keys, write_mode = ?config.write_mode, "record store ready");

        Ok(Self {
            inner,
            keys,
            write_mode: config.write_mode,
        })
    }

    /// Build a store from environment variables.
    pub async fn from_env() -> StoreResult<Self> {
        Self::from_config(&StoreConfig::from_env()).await
    }

    /// Wrap an existing backend.
    pub fn new(inner: Arc<dyn ObjectStore>, keys: KeyBuilder) -> Self {
        Self {
            inner,
            keys,
            write_mode: WriteMode::Overwrite,
        }
    }

    /// Create an in-memory store with the default prefixes, for testing.
    pub fn memory() -> Self {
        let config = StoreConfig::default();
        Self::new(
            Arc::new(object_store::memory::InMemory::new()),
            KeyBuilder::new(config.answers_prefix, config.playground_prefix),
        )
    }

    pub fn with_write_mode(mut self, mode: WriteMode) -> Self {
        self.write_mode = mode;
        self
    }

    pub fn keys(&self) -> &KeyBuilder {
        &self.keys
    }

    /// Underlying backend.
    pub fn backend(&self) -> &Arc<dyn ObjectStore> {
        &self.inner
    }

    async fn fetch<R: Record>(&self, key: &Path) -> StoreResult<Snapshot<R>> {
        let result = match self.inner.get_opts(key, GetOptions::default()).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => {
                debug!(key = %key, "table not found, treating as empty");
                return Ok(Snapshot {
                    records: Vec::new(),
                    version: None,
                });
            }
            Err(e) => return Err(StoreError::from_object_store(e, key.as_ref())),
        };

        let version = UpdateVersion {
            e_tag: result.meta.e_tag.clone(),
            version: result.meta.version.clone(),
        };
        let bytes = result
            .bytes()
            .await
            .map_err(|e| StoreError::from_object_store(e, key.as_ref()))?;
        let records = codec::decode(key.as_ref(), &bytes)?;
        debug!(key = %key, rows = records.len(), "fetched table");

        Ok(Snapshot {
            records,
            version: Some(version),
        })
    }

    /// Write the whole table back.
    ///
    /// In conditional mode the put only succeeds if the blob still has the
    /// version seen by the read (or still does not exist).
    async fn put_table<R: Record>(
        &self,
        key: &Path,
        records: &[R],
        read_version: Option<UpdateVersion>,
    ) -> StoreResult<()> {
        let body = codec::encode(key.as_ref(), records)?;

        let mode = match (self.write_mode, read_version) {
            (WriteMode::Overwrite, _) => PutMode::Overwrite,
            (WriteMode::Conditional, Some(version)) => PutMode::Update(version),
            (WriteMode::Conditional, None) => PutMode::Create,
        };
        let conditional = !matches!(mode, PutMode::Overwrite);
        let opts = PutOptions {
            mode,
            ..Default::default()
        };

        match self
            .inner
            .put_opts(key, PutPayload::from_bytes(body.clone()), opts)
            .await
        {
            Ok(_) => {
                debug!(key = %key, rows = records.len(), conditional, "wrote table");
                Ok(())
            }
            Err(
                object_store::Error::NotImplemented { .. }
                | object_store::Error::NotSupported { .. },
            ) if conditional => {
                warn!(
                    key = %key,
                    "conditional writes not supported by backend, falling back to overwrite"
                );
                self.inner
                    .put_opts(key, PutPayload::from_bytes(body), PutOptions::default())
                    .await
                    .map_err(|e| StoreError::from_object_store(e, key.as_ref()))?;
                Ok(())
            }
            Err(e) => Err(StoreError::from_object_store(e, key.as_ref())),
        }
    }

    /// Every interaction log under the playground prefix as `(email, key)`,
    /// sorted by key.
    async fn list_interaction_logs(&self) -> StoreResult<Vec<(String, Path)>> {
        let root = self.keys.interactions_listing_root();
        let entries: Vec<ObjectMeta> = self
            .inner
            .list(root.as_ref())
            .try_collect()
            .await
            .map_err(|e| {
                let label = root.as_ref().map(|p| p.to_string()).unwrap_or_default();
                StoreError::from_object_store(e, &label)
            })?;

        let mut logs: Vec<(String, Path)> = entries
            .into_iter()
            .filter_map(|meta| {
                self.keys
                    .parse_interactions_key(&meta.location)
                    .map(|email| (email, meta.location))
            })
            .collect();
        logs.sort_by(|a, b| a.1.cmp(&b.1));
        debug!(count = logs.len(), "listed interaction logs");
        Ok(logs)
    }
}

#[async_trait]
impl RecordStore for ObjectRecordStore {
    async fn upsert_answer(
        &self,
        email: &str,
        question_number: i64,
        answer: &str,
        ai_usage: &str,
        time_taken: i64,
    ) -> StoreResult<()> {
        let email = KeyBuilder::normalize_email(email)?;
        let key = self.keys.answers_key(&email)?;
        let record = AnswerRecord::new(&email, question_number, answer, ai_usage, time_taken);

        let Snapshot {
            mut records,
            version,
        } = self.fetch::<AnswerRecord>(&key).await?;

        let mut replaced = false;
        for existing in records
            .iter_mut()
            .filter(|r| r.same_slot(&email, question_number))
        {
            *existing = record.clone();
            replaced = true;
        }
        if !replaced {
            records.push(record);
        }
        debug!(key = %key, question_number, replaced, "upserting answer");

        self.put_table(&key, &records, version).await
    }

    async fn load_answers(&self, email: &str) -> StoreResult<Vec<AnswerRecord>> {
        let key = self.keys.answers_key(email)?;
        Ok(self.fetch(&key).await?.records)
    }

    async fn append_interaction(
        &self,
        email: &str,
        question_number: i64,
        prompt: &str,
        parameters: Map<String, Value>,
        response: &str,
    ) -> StoreResult<()> {
        let email = KeyBuilder::normalize_email(email)?;
        let key = self.keys.interactions_key(&email)?;
        let record = InteractionRecord::new(&email, question_number, prompt, parameters, response);

        let Snapshot {
            mut records,
            version,
        } = self.fetch::<InteractionRecord>(&key).await?;
        records.push(record);

        self.put_table(&key, &records, version).await
    }

    async fn load_interactions(&self, email: Option<&str>) -> StoreResult<Vec<InteractionRecord>> {
        if let Some(email) = email {
            let key = self.keys.interactions_key(email)?;
            return Ok(self.fetch(&key).await?.records);
        }

        let mut all = Vec::new();
        for (owner, key) in self.list_interaction_logs().await? {
            // A log deleted between list and get reads as empty
            let snapshot = self.fetch::<InteractionRecord>(&key).await?;
            debug!(email = %owner, rows = snapshot.records.len(), "collected interaction log");
            all.extend(snapshot.records);
        }
        Ok(all)
    }
}

fn local_store(spec: &StoreSpec) -> StoreResult<object_store::local::LocalFileSystem> {
    let path = if let Some(bucket) = &spec.bucket {
        format!("/{}/{}", bucket, spec.prefix)
    } else if spec.prefix.is_empty() {
        "/tmp/promptlab-store".to_string()
    } else {
        format!("/{}", spec.prefix)
    };
    // Ensure directory exists
    std::fs::create_dir_all(&path).map_err(|e| StoreError::Io {
        message: format!("failed to create store directory {path}: {e}"),
    })?;
    object_store::local::LocalFileSystem::new_with_prefix(&path).map_err(|e| StoreError::Io {
        message: format!("failed to create local store at {path}: {e}"),
    })
}

fn s3_store(
    spec: &StoreSpec,
    config: &StoreConfig,
) -> StoreResult<object_store::aws::AmazonS3> {
    let bucket = spec
        .bucket
        .as_ref()
        .ok_or_else(|| StoreError::InvalidSpec {
            spec: format!("s3://{:?}/{}", spec.bucket, spec.prefix),
            reason: "S3 URL must include bucket name".to_string(),
        })?;

    let mut builder = object_store::aws::AmazonS3Builder::from_env()
        .with_bucket_name(bucket)
        .with_allow_http(false);

    if let Some(region) = &spec.region {
        builder = builder.with_region(region);
    }
    if let (Some(key_id), Some(secret)) = (&config.access_key_id, &config.secret_access_key) {
        builder = builder
            .with_access_key_id(key_id)
            .with_secret_access_key(secret);
    }

    builder.build().map_err(|e| StoreError::Io {
        message: format!("failed to create S3 client: {e}"),
    })
}

fn join_base(base: &str, prefix: &str) -> String {
    let base = base.trim_matches('/');
    if base.is_empty() {
        prefix.to_string()
    } else {
        format!("{}/{}", base, prefix.trim_start_matches('/'))
    }
}
