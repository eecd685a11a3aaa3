//! Pure downsell eligibility gate, evaluated at send time against a view
//! of the funnel-event log already fetched by the caller.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownsellTrigger {
    Start,
    Pix,
}

/// Why a row was deemed ineligible at send time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoUnpaidPix,
}

/// The funnel facts the gate needs, pre-fetched by the caller for the
/// relevant recipient/transaction.
#[derive(Debug, Clone, Copy, Default)]
pub struct FunnelFacts {
    /// For `Pix` trigger: exactly one `pix_created` event exists for the
    /// referenced transaction.
    pub pix_created_for_transaction: bool,
    /// For `Pix` trigger: a `payment_approved` event exists for the
    /// referenced transaction.
    pub payment_approved_for_transaction: bool,
    /// For `Start` trigger: at least one `pix_created` event in the last
    /// 7 days for the recipient.
    pub pix_created_within_7_days: bool,
    /// For `Start` trigger: a matching `payment_approved` event exists.
    pub payment_approved_matching: bool,
}

/// Evaluates the eligibility gate described for downsell sends: pix
/// triggers require exactly one unpaid pix_created; start triggers
/// require an unpaid pix_created within the last 7 days.
pub fn check_eligibility(trigger: DownsellTrigger, facts: FunnelFacts) -> Result<(), SkipReason> {
    let eligible = match trigger {
        DownsellTrigger::Pix => facts.pix_created_for_transaction && !facts.payment_approved_for_transaction,
        DownsellTrigger::Start => facts.pix_created_within_7_days && !facts.payment_approved_matching,
    };
    if eligible {
        Ok(())
    } else {
        Err(SkipReason::NoUnpaidPix)
    }
}

/// Returns true if `event_at` falls within the last 7 days relative to `now`.
pub fn within_last_7_days(event_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now.signed_duration_since(event_at) <= chrono::Duration::days(7) && event_at <= now
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pix_trigger_requires_unpaid_pix_created() {
        let eligible = FunnelFacts { pix_created_for_transaction: true, payment_approved_for_transaction: false, ..Default::default() };
        assert_eq!(check_eligibility(DownsellTrigger::Pix, eligible), Ok(()));

        let no_pix = FunnelFacts::default();
        assert_eq!(check_eligibility(DownsellTrigger::Pix, no_pix), Err(SkipReason::NoUnpaidPix));

        let already_paid =
            FunnelFacts { pix_created_for_transaction: true, payment_approved_for_transaction: true, ..Default::default() };
        assert_eq!(check_eligibility(DownsellTrigger::Pix, already_paid), Err(SkipReason::NoUnpaidPix));
    }

    #[test]
    fn start_trigger_requires_unpaid_pix_within_7_days() {
        let eligible = FunnelFacts { pix_created_within_7_days: true, payment_approved_matching: false, ..Default::default() };
        assert_eq!(check_eligibility(DownsellTrigger::Start, eligible), Ok(()));

        let stale = FunnelFacts::default();
        assert_eq!(check_eligibility(DownsellTrigger::Start, stale), Err(SkipReason::NoUnpaidPix));

        let paid =
            FunnelFacts { pix_created_within_7_days: true, payment_approved_matching: true, ..Default::default() };
        assert_eq!(check_eligibility(DownsellTrigger::Start, paid), Err(SkipReason::NoUnpaidPix));
    }

    #[test]
    fn within_last_7_days_boundary() {
        let now: DateTime<Utc> = DateTime::parse_from_rfc3339("2026-01-08T00:00:00Z").unwrap().with_timezone(&Utc);
        let exactly_7_days_ago = now - chrono::Duration::days(7);
        let eight_days_ago = now - chrono::Duration::days(8);
        assert!(within_last_7_days(exactly_7_days_ago, now));
        assert!(!within_last_7_days(eight_days_ago, now));
        assert!(!within_last_7_days(now + chrono::Duration::seconds(1), now));
    }
}
