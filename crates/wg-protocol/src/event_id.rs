//! Deterministic business-level identifiers used as unique keys for
//! idempotent inserts (downsell schedules, funnel events).
//!
//! Re-running the same logical trigger with the same inputs must produce
//! the same id, so the DB's unique constraint turns re-delivery into a
//! no-op. See spec §6 "Persistent layout".

use chrono::{DateTime, NaiveDate, Utc};

/// The trigger that caused a downsell schedule row to be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DownsellTrigger {
    Start,
    Pix,
}

impl DownsellTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            DownsellTrigger::Start => "start",
            DownsellTrigger::Pix => "pix",
        }
    }
}

/// `dw:{slug}:{recipient}:{templateId}:st:{scheduledAtISO8601}` for the
/// start trigger, `dw:{slug}:{recipient}:{templateId}:{transactionId}:{scheduledAtISO8601}`
/// for the pix trigger.
pub fn downsell_event_id(
    slug: &str,
    recipient: i64,
    template_id: impl std::fmt::Display,
    trigger: DownsellTrigger,
    transaction_id: Option<&str>,
    scheduled_at: DateTime<Utc>,
) -> String {
    let ts = scheduled_at.to_rfc3339();
    match trigger {
        DownsellTrigger::Start => format!("dw:{slug}:{recipient}:{template_id}:st:{ts}"),
        DownsellTrigger::Pix => {
            let txn = transaction_id.unwrap_or_default();
            format!("dw:{slug}:{recipient}:{template_id}:{txn}:{ts}")
        }
    }
}

/// `st:{slug}:{recipient}:{YYYYMMDD}` -- deduplicates the "start" funnel
/// event per recipient per UTC day.
pub fn start_funnel_event_id(slug: &str, recipient: i64, day: NaiveDate) -> String {
    format!("st:{slug}:{recipient}:{}", day.format("%Y%m%d"))
}

/// Object-store key: `{tenant}/{kind}/{sha256}[.{ext}]`.
pub fn object_store_key(tenant: &str, kind: &str, sha256_hex: &str, ext: Option<&str>) -> String {
    match ext {
        Some(ext) if !ext.is_empty() => format!("{tenant}/{kind}/{sha256_hex}.{ext}"),
        _ => format!("{tenant}/{kind}/{sha256_hex}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn downsell_event_id_is_deterministic_for_start_trigger() {
        let a = downsell_event_id("bot1", 7205343917, 42, DownsellTrigger::Start, None, ts(1_700_000_000));
        let b = downsell_event_id("bot1", 7205343917, 42, DownsellTrigger::Start, None, ts(1_700_000_000));
        assert_eq!(a, b);
        assert!(a.starts_with("dw:bot1:7205343917:42:st:"));
    }

    #[test]
    fn downsell_event_id_includes_transaction_id_for_pix_trigger() {
        let id = downsell_event_id("bot1", 42, 7, DownsellTrigger::Pix, Some("tx-9"), ts(1_700_000_100));
        assert_eq!(id.matches("tx-9").count(), 1);
        assert!(id.starts_with("dw:bot1:42:7:tx-9:"));
    }

    #[test]
    fn start_funnel_event_id_buckets_by_utc_day() {
        let day = NaiveDate::from_ymd_opt(2026, 7, 28).unwrap();
        assert_eq!(start_funnel_event_id("bot1", 42, day), "st:bot1:42:20260728");
    }

    #[test]
    fn object_store_key_omits_dot_when_ext_is_absent() {
        assert_eq!(
            object_store_key("bot1", "photo", "abc123", None),
            "bot1/photo/abc123"
        );
        assert_eq!(
            object_store_key("bot1", "photo", "abc123", Some("jpg")),
            "bot1/photo/abc123.jpg"
        );
    }
}
