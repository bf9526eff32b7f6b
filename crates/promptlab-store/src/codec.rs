//! CSV encoding of record tables.
//!
//! Every table is written with a header row taken from [`Record::COLUMNS`],
//! including tables with no rows. Decoding matches fields by header name, so
//! column order in a blob does not matter.

use bytes::Bytes;

use crate::error::{StoreError, StoreResult};
use crate::record::Record;

/// Decode a CSV blob into typed records.
///
/// An empty blob decodes to no records. `key` only labels errors.
pub fn decode<R: Record>(key: &str, data: &[u8]) -> StoreResult<Vec<R>> {
    if data.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(data);

    let headers = reader
        .headers()
        .map_err(|e| StoreError::csv(key, e))?
        .clone();
    if let Some(missing) = R::COLUMNS
        .iter()
        .find(|col| !headers.iter().any(|h| h == **col))
    {
        return Err(StoreError::InvalidRecord {
            message: format!("{key}: missing column '{missing}'"),
        });
    }

    reader
        .deserialize::<R>()
        .map(|row| row.map_err(|e| StoreError::csv(key, e)))
        .collect()
}

/// Encode records as a CSV blob with a header row.
pub fn encode<R: Record>(key: &str, records: &[R]) -> StoreResult<Bytes> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());

    writer
        .write_record(R::COLUMNS)
        .map_err(|e| StoreError::csv(key, e))?;
    for record in records {
        writer
            .serialize(record)
            .map_err(|e| StoreError::csv(key, e))?;
    }

    let buf = writer.into_inner().map_err(|e| StoreError::Io {
        message: format!("failed to flush CSV for {key}: {e}"),
    })?;
    Ok(Bytes::from(buf))
}
