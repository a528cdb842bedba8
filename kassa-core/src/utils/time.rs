use time::{OffsetDateTime, PrimitiveDateTime};

/// Current UTC wall-clock time without an offset, as stored in the database.
pub fn now() -> PrimitiveDateTime {
    let now = OffsetDateTime::now_utc();
    PrimitiveDateTime::new(now.date(), now.time())
}

/// Interpret a unix timestamp (seconds) as a UTC [`PrimitiveDateTime`].
pub fn from_unix(timestamp: i64) -> Option<PrimitiveDateTime> {
    let at = OffsetDateTime::from_unix_timestamp(timestamp).ok()?;
    Some(PrimitiveDateTime::new(at.date(), at.time()))
}
