//! Turn a raw login event body into a `MaskedRecord`.
//!
//! `ip` and `device_id` are replaced by the hex SHA3-512 digest of their UTF-8 bytes and never
//! leave this module in clear text. Keys outside the `user_logins` schema are discarded while
//! decoding.
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{Map, Value};
use sha3::{Digest, Sha3_512};
use thiserror::Error;

use crate::record::MaskedRecord;

/// Enumeration of errors raised while masking a single message body.
#[derive(Error, Debug)]
pub enum MaskError {
    #[error("message body is not a well-formed event: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("{field} value {value} cannot be coerced to an integer")]
    Format { field: &'static str, value: String },
}

/// Decoded form of a message body. Only lives for the duration of `RecordMasker::mask`.
#[derive(Deserialize, Debug)]
struct ParsedEvent {
    user_id: Option<String>,
    device_type: Option<String>,
    ip: Option<String>,
    device_id: Option<String>,
    locale: Option<String>,
    app_version: Option<Vec<Value>>,
}

/// Masks message bodies, stamping every record with the same processing date.
#[derive(Debug, Clone, Copy)]
pub struct RecordMasker {
    create_date: NaiveDate,
}

impl RecordMasker {
    pub fn new(create_date: NaiveDate) -> Self {
        Self { create_date }
    }

    /// A masker stamping records with today's local date.
    pub fn for_today() -> Self {
        Self::new(chrono::Local::now().date_naive())
    }

    pub fn create_date(&self) -> NaiveDate {
        self.create_date
    }

    pub fn mask(&self, body: &str) -> Result<MaskedRecord, MaskError> {
        // Go through a Map first: a derived struct would also accept a JSON array.
        let object: Map<String, Value> = serde_json::from_str(body).map_err(MaskError::Decode)?;
        let event: ParsedEvent =
            serde_json::from_value(Value::Object(object)).map_err(MaskError::Decode)?;

        let app_version = match event.app_version.as_deref() {
            Some(components) => coerce_app_version(components)?,
            None => None,
        };

        Ok(MaskedRecord {
            user_id: non_empty(event.user_id),
            device_type: non_empty(event.device_type),
            masked_ip: non_empty(event.ip).map(|ip| mask_pii(&ip)),
            masked_device_id: non_empty(event.device_id).map(|device_id| mask_pii(&device_id)),
            locale: non_empty(event.locale),
            app_version,
            create_date: self.create_date,
        })
    }
}

/// One-way hash of a PII value: lowercase hex of SHA3-512 over its UTF-8 bytes.
pub fn mask_pii(value: &str) -> String {
    hex::encode(Sha3_512::digest(value.as_bytes()))
}

/// Empty strings carry no information and are stored as null.
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Only the major component of an app version is kept. An empty sequence maps to null.
fn coerce_app_version(components: &[Value]) -> Result<Option<i32>, MaskError> {
    let Some(first) = components.first() else {
        return Ok(None);
    };

    let coerced = match first {
        Value::String(s) => s.trim().parse::<i32>().ok(),
        Value::Number(n) => n.as_i64().and_then(|v| i32::try_from(v).ok()),
        _ => None,
    };

    coerced.map(Some).ok_or_else(|| MaskError::Format {
        field: "app_version",
        value: first.to_string(),
    })
}
