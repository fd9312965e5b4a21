use crate::record::{MaskedRecord, PersistedRow};

/// Records need at least this many non-null columns to be persisted. `create_date` is always
/// set, so a record must carry one more column to be worth a row.
pub const MIN_NON_NULL_COLUMNS: usize = 2;

/// Filter masked records down to the rows worth persisting. The result may be empty.
///
/// Columns outside the `user_logins` schema cannot reach a `MaskedRecord`, they are dropped when
/// the body is decoded, so this only has to filter on information content.
pub fn validate_batch(records: Vec<MaskedRecord>) -> Vec<PersistedRow> {
    records
        .into_iter()
        .filter(|record| record.non_null_count() >= MIN_NON_NULL_COLUMNS)
        .map(PersistedRow)
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    #[test]
    fn test_drops_records_with_only_create_date() {
        let records = vec![
            MaskedRecord::empty(today()),
            MaskedRecord {
                locale: Some("PH".to_owned()),
                ..MaskedRecord::empty(today())
            },
            MaskedRecord::empty(today()),
        ];

        let rows = validate_batch(records);

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].record().locale.as_deref(), Some("PH"));
    }

    #[test]
    fn test_every_row_has_two_non_null_columns() {
        let records = vec![
            MaskedRecord {
                app_version: Some(0),
                ..MaskedRecord::empty(today())
            },
            MaskedRecord {
                user_id: Some("u1".to_owned()),
                masked_ip: Some("digest".to_owned()),
                ..MaskedRecord::empty(today())
            },
        ];

        let rows = validate_batch(records);

        assert_eq!(rows.len(), 2);
        assert!(rows
            .iter()
            .all(|row| row.record().non_null_count() >= MIN_NON_NULL_COLUMNS));
    }

    #[test]
    fn test_empty_input_is_valid() {
        assert!(validate_batch(Vec::new()).is_empty());
        assert!(validate_batch(vec![MaskedRecord::empty(today())]).is_empty());
    }
}
