//! Daily-limit eligibility check.
//!
//! The count is a one-shot read; two concurrent requests for the same user
//! may both pass at `limit - 1`. The limit is a soft control.

use crate::error::StoreError;
use crate::ports::AttendanceStore;
use crate::record::DateRange;
use crate::types::EligibilityDecision;
use chrono::NaiveDate;

pub fn check_eligibility(
    store: &dyn AttendanceStore,
    user_id: &str,
    today: NaiveDate,
    daily_limit: usize,
) -> Result<EligibilityDecision, StoreError> {
    let today_count = store.count(user_id, &DateRange::day(today))?;
    let allowed = today_count < daily_limit;
    let reason = if allowed {
        format!("{today_count} of {daily_limit} attendance records used today")
    } else {
        format!("daily limit of {daily_limit} attendance records reached")
    };
    tracing::debug!(user_id, today_count, daily_limit, allowed, "eligibility checked");
    Ok(EligibilityDecision {
        allowed,
        reason,
        today_count,
        daily_limit,
    })
}
