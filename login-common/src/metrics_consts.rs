pub const MESSAGES_DRAINED: &str = "login_messages_drained";
pub const DUPLICATES_DROPPED: &str = "login_duplicate_messages_dropped";
pub const RECORDS_MASKED: &str = "login_records_masked";
pub const RECORDS_FILTERED: &str = "login_records_filtered";
pub const ROWS_PERSISTED: &str = "login_rows_persisted";
pub const BATCH_ROLLBACKS: &str = "login_batch_rollbacks";
pub const BATCH_LOAD_TIME: &str = "login_batch_load_time_ms";
pub const WORKER_FAILURES: &str = "login_worker_failures";
