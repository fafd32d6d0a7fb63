//! Column encodings shared by the CRUD modules.
//!
//! Timestamps are stored as fixed-width RFC-3339 strings with microsecond
//! precision and a `Z` suffix, so text comparison in SQL matches time order.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::types::Type;
use uuid::Uuid;

use matchday_shared::ParticipantId;

pub(crate) fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Current time at the precision the store keeps.
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

pub(crate) fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn parse_uuid(idx: usize, raw: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn parse_participant(idx: usize, raw: &str) -> rusqlite::Result<ParticipantId> {
    parse_uuid(idx, raw).map(ParticipantId)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamps_sort_as_text() {
        let early = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let later = early + chrono::Duration::microseconds(1);
        assert!(format_ts(&early) < format_ts(&later));
        assert_eq!(format_ts(&early).len(), format_ts(&later).len());
        assert_eq!(parse_ts(0, &format_ts(&later)).unwrap(), later);
    }
}
