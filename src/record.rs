//! Raw user records as they arrive from a CSV row or a queue message.
//!
//! A [`RawRecord`] is transient: the producer builds it from a file row and
//! publishes it verbatim as JSON, the consumer decodes it back and transforms
//! it into a [`User`](crate::entity::User).
//!
//! # Wire format
//!
//! ```json
//! {"Id":8,"FirstName":"Hanah","LastName":"Schmidt","Email":"h@example.com",
//!  "ParentUserId":-1,"CreatedAt":1361218223000,"DeletedAt":-1,"MergedAt":-1}
//! ```
//!
//! # Example
//!
//! ```
//! use user_pipeline::record::{parse_row, encode, decode};
//!
//! let raw = parse_row(&["8", "Hanah", "Schmidt", "h@example.com"]).unwrap();
//! assert_eq!(raw.id, 8);
//! assert_eq!(raw.created_at, 0); // short row: trailing fields stay zero
//!
//! let payload = encode(&raw).unwrap();
//! assert_eq!(decode(&payload).unwrap(), raw);
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Column count of a complete CSV row.
pub const FIELD_COUNT: usize = 8;

/// A user record before transformation. Epoch fields are milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct RawRecord {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    /// Negative means "no parent".
    pub parent_user_id: i64,
    pub created_at: i64,
    pub deleted_at: i64,
    pub merged_at: i64,
}

#[derive(Error, Debug)]
pub enum FieldError {
    #[error("row has no id field")]
    MissingId,
    #[error("invalid id in record: {0:?}")]
    InvalidId(String),
    #[error("invalid {field} in record: {value:?}")]
    InvalidNumber { field: &'static str, value: String },
}

#[derive(Error, Debug)]
#[error("malformed record payload: {0}")]
pub struct DecodeError(#[from] serde_json::Error);

/// Decode a queue payload. Malformed JSON or mistyped fields are errors;
/// absent keys take their zero value.
pub fn decode(payload: &[u8]) -> Result<RawRecord, DecodeError> {
    Ok(serde_json::from_slice(payload)?)
}

/// Encode a record to its queue payload.
pub fn encode(record: &RawRecord) -> Result<Vec<u8>, DecodeError> {
    Ok(serde_json::to_vec(record)?)
}

/// Build a record from positional CSV fields.
///
/// Column order: `id, first_name, last_name, email, created_at, deleted_at,
/// merged_at, parent_user_id`. Rows shorter than [`FIELD_COUNT`] are accepted
/// and the missing trailing fields stay at zero. Only the id is mandatory.
///
/// Known quirk: `merged_at` is read from the `deleted_at` column (column 5),
/// matching every row ingested so far. Column 6 only has to be present.
pub fn parse_row<S: AsRef<str>>(fields: &[S]) -> Result<RawRecord, FieldError> {
    let field = |i: usize| fields.get(i).map(|f| f.as_ref());

    let id = field(0).ok_or(FieldError::MissingId)?;
    let mut record = RawRecord {
        id: id
            .trim()
            .parse()
            .map_err(|_| FieldError::InvalidId(id.to_string()))?,
        ..RawRecord::default()
    };

    if let Some(v) = field(1) {
        record.first_name = v.to_string();
    }
    if let Some(v) = field(2) {
        record.last_name = v.to_string();
    }
    if let Some(v) = field(3) {
        record.email = v.to_string();
    }
    if let Some(v) = field(4) {
        record.created_at = parse_optional("created_at", v)?;
    }
    if let Some(v) = field(5) {
        record.deleted_at = parse_optional("deleted_at", v)?;
    }
    if field(6).is_some() {
        // see doc comment: same column as deleted_at
        record.merged_at = parse_optional("merged_at", field(5).unwrap_or_default())?;
    }
    if let Some(v) = field(7) {
        record.parent_user_id = parse_optional("parent_user_id", v)?;
    }

    Ok(record)
}

/// Empty string is zero; anything else must be an integer.
fn parse_optional(field: &'static str, value: &str) -> Result<i64, FieldError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(0);
    }
    value.parse().map_err(|_| FieldError::InvalidNumber {
        field,
        value: value.to_string(),
    })
}
