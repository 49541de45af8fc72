/// Job identifiers are caller-supplied strings or generated UUIDs.
pub type JobId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
