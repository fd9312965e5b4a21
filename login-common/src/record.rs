use std::fmt;

use chrono::NaiveDate;

/// Columns of the `user_logins` table, in insertion order.
pub const COLUMNS: [&str; 7] = [
    "user_id",
    "device_type",
    "masked_ip",
    "masked_device_id",
    "locale",
    "app_version",
    "create_date",
];

/// Identifies the slice of deduplicated messages owned by one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BatchId(pub usize);

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "batch-{}", self.0)
    }
}

/// A disjoint slice of raw message bodies assigned to exactly one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub id: BatchId,
    pub bodies: Vec<String>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }
}

/// A login event with PII replaced by digests, projected onto the `user_logins` schema.
/// Raw `ip` and `device_id` values have no place in this type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskedRecord {
    pub user_id: Option<String>,
    pub device_type: Option<String>,
    pub masked_ip: Option<String>,
    pub masked_device_id: Option<String>,
    pub locale: Option<String>,
    pub app_version: Option<i32>,
    pub create_date: NaiveDate,
}

impl MaskedRecord {
    /// A record carrying nothing but its processing date.
    pub fn empty(create_date: NaiveDate) -> Self {
        Self {
            user_id: None,
            device_type: None,
            masked_ip: None,
            masked_device_id: None,
            locale: None,
            app_version: None,
            create_date,
        }
    }

    /// Count of non-null columns, `create_date` included.
    pub fn non_null_count(&self) -> usize {
        let optional = [
            self.user_id.is_some(),
            self.device_type.is_some(),
            self.masked_ip.is_some(),
            self.masked_device_id.is_some(),
            self.locale.is_some(),
            self.app_version.is_some(),
        ];

        1 + optional.iter().filter(|present| **present).count()
    }
}

/// A `MaskedRecord` that passed validation. Only `validate::validate_batch` builds these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedRow(pub(crate) MaskedRecord);

impl PersistedRow {
    pub fn record(&self) -> &MaskedRecord {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    #[test]
    fn test_empty_record_only_counts_create_date() {
        assert_eq!(MaskedRecord::empty(today()).non_null_count(), 1);
    }

    #[test]
    fn test_non_null_count() {
        let record = MaskedRecord {
            user_id: Some("u1".to_owned()),
            app_version: Some(0),
            ..MaskedRecord::empty(today())
        };

        assert_eq!(record.non_null_count(), 3);
    }

    #[test]
    fn test_batch_id_display() {
        assert_eq!(BatchId(3).to_string(), "batch-3");
    }
}
