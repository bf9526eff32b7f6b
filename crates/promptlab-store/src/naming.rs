//! Key naming conventions for record tables.
//!
//! # Key Schema
//!
//! ```text
//! {answers_prefix}{email}_answers.csv          # one answer table per user
//! {playground_prefix}{email}_interactions.csv  # one interaction log per user
//! ```
//!
//! Prefixes are joined to the email verbatim, so `answers/` yields a
//! directory-style layout and `answers_` a flat one. Both work for reads;
//! aggregation lists the directory part of the playground prefix and filters
//! on the rest.

use object_store::path::Path;

use crate::error::{StoreError, StoreResult};

const ANSWERS_SUFFIX: &str = "_answers.csv";
const INTERACTIONS_SUFFIX: &str = "_interactions.csv";

/// Builder for storage keys.
#[derive(Debug, Clone)]
pub struct KeyBuilder {
    answers_prefix: String,
    playground_prefix: String,
}

impl KeyBuilder {
    /// Create a key builder from the two table prefixes.
    pub fn new(answers_prefix: impl Into<String>, playground_prefix: impl Into<String>) -> Self {
        Self {
            answers_prefix: normalize_prefix(answers_prefix.into()),
            playground_prefix: normalize_prefix(playground_prefix.into()),
        }
    }

    /// Canonical form of an email: trimmed, restricted to `[A-Za-z0-9@.+_-]`.
    ///
    /// The key, the stored `email` column and slot matching all use this
    /// form, so two inputs share a table only if they normalize to the same
    /// string. Characters outside the allowed set are rejected rather than
    /// replaced, keeping the email-to-key mapping one-to-one.
    pub fn normalize_email(email: &str) -> StoreResult<String> {
        let trimmed = email.trim();
        if trimmed.is_empty() {
            return Err(StoreError::InvalidEmail {
                email: email.to_string(),
                reason: "email is empty".to_string(),
            });
        }
        if let Some(bad) = trimmed
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '@' | '.' | '+' | '-' | '_')))
        {
            return Err(StoreError::InvalidEmail {
                email: email.to_string(),
                reason: format!("character {bad:?} is not allowed in a table key"),
            });
        }
        Ok(trimmed.to_string())
    }

    /// Key for a user's answer table.
    ///
    /// Returns: `{answers_prefix}{email}_answers.csv`
    pub fn answers_key(&self, email: &str) -> StoreResult<Path> {
        let email = Self::normalize_email(email)?;
        Ok(Path::from(format!(
            "{}{}{}",
            self.answers_prefix, email, ANSWERS_SUFFIX
        )))
    }

    /// Key for a user's playground interaction log.
    ///
    /// Returns: `{playground_prefix}{email}_interactions.csv`
    pub fn interactions_key(&self, email: &str) -> StoreResult<Path> {
        let email = Self::normalize_email(email)?;
        Ok(Path::from(format!(
            "{}{}{}",
            self.playground_prefix, email, INTERACTIONS_SUFFIX
        )))
    }

    /// Directory to list when collecting every interaction log.
    ///
    /// `object_store` lists whole path segments, so only the part of the
    /// prefix up to its last `/` is usable here. `None` lists the whole store.
    pub fn interactions_listing_root(&self) -> Option<Path> {
        self.playground_prefix
            .rfind('/')
            .map(|idx| &self.playground_prefix[..idx])
            .filter(|dir| !dir.is_empty())
            .map(Path::from)
    }

    /// Extract the email from a listed interaction log key.
    ///
    /// Input: `{playground_prefix}{email}_interactions.csv`
    /// Output: `Some(email)`, or `None` for keys that are not interaction logs
    /// (other tables, nested paths, stray files).
    pub fn parse_interactions_key(&self, key: &Path) -> Option<String> {
        key.as_ref()
            .strip_prefix(&self.playground_prefix)
            .and_then(|rest| rest.strip_suffix(INTERACTIONS_SUFFIX))
            .filter(|email| !email.is_empty() && !email.contains('/'))
            .map(|email| email.to_string())
    }
}

fn normalize_prefix(prefix: String) -> String {
    prefix.trim_start_matches('/').to_string()
}
