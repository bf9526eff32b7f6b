//! Per-user quiz answers and playground interaction logs in object storage.
//!
//! Each user owns two CSV tables in one bucket:
//!
//! ```text
//! {answers_prefix}{email}_answers.csv          # upserted by (email, question_number)
//! {playground_prefix}{email}_interactions.csv  # append-only
//! ```
//!
//! Every write is a full read-modify-write of one table. Reads come in two
//! flavours: fallible `load_*` methods that only treat a missing table as
//! empty, and soft `get_*` methods that log any failure and return an empty
//! [`Table`].
//!
//! # Quick Start
//!
//! ```no_run
//! use promptlab_store::{ObjectRecordStore, RecordStore, StoreResult};
//!
//! # async fn example() -> StoreResult<()> {
//! let store = ObjectRecordStore::from_env().await?;
//!
//! store.upsert_answer("ada@example.com", 3, "B", "none", 42).await?;
//! assert_eq!(store.get_last_answered_question("ada@example.com").await, 3);
//!
//! let mut params = serde_json::Map::new();
//! params.insert("temperature".into(), 0.7.into());
//! store
//!     .append_interaction("ada@example.com", 3, "Explain B", params, "Because...")
//!     .await?;
//!
//! // Every user's log, parameters flattened into columns
//! let all = store.get_playground_interactions(None).await;
//! println!("{}", all.to_csv()?);
//! # Ok(())
//! # }
//! ```
//!
//! Configuration is described in [`config`].

pub mod codec;
pub mod config;
pub mod error;
pub mod naming;
pub mod record;
pub mod store;
pub mod table;

pub use config::{StoreConfig, StoreSpec, WriteMode};
pub use error::{StoreError, StoreResult};
pub use naming::KeyBuilder;
pub use record::{AnswerRecord, InteractionRecord, Record};
pub use store::{
    empty_interactions_table, ObjectRecordStore, RecordStore, NO_ANSWERS, PARAMETERS_COLUMN,
};
pub use table::Table;
