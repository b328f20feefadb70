//! Lot status derived from expiry.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockroom_core::DomainError;

/// Lots expiring within this many (whole, rounded-up) days are `near_expiry`.
pub const NEAR_EXPIRY_DAYS: i64 = 7;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LotStatus {
    Active,
    NearExpiry,
    Expired,
}

impl LotStatus {
    pub const ALL: [LotStatus; 3] = [LotStatus::Active, LotStatus::NearExpiry, LotStatus::Expired];

    pub fn as_str(self) -> &'static str {
        match self {
            LotStatus::Active => "active",
            LotStatus::NearExpiry => "near_expiry",
            LotStatus::Expired => "expired",
        }
    }

    /// Expired stock is never counted or allocated.
    pub fn is_allocatable(self) -> bool {
        !matches!(self, LotStatus::Expired)
    }
}

impl fmt::Display for LotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LotStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "active" => Ok(LotStatus::Active),
            "near_expiry" => Ok(LotStatus::NearExpiry),
            "expired" => Ok(LotStatus::Expired),
            other => Err(DomainError::validation(format!("unknown lot status: {other}"))),
        }
    }
}

/// Status of a lot with the given expiry, as seen at `now`.
///
/// Any expiry strictly in the past is `expired`, even by one second. Otherwise
/// the remaining time is rounded up to whole days and compared against
/// [`NEAR_EXPIRY_DAYS`].
pub fn derive_status(expiry_date: Option<DateTime<Utc>>, now: DateTime<Utc>) -> LotStatus {
    let Some(expiry) = expiry_date else {
        return LotStatus::Active;
    };
    if expiry < now {
        return LotStatus::Expired;
    }
    if days_until(expiry, now) <= NEAR_EXPIRY_DAYS {
        LotStatus::NearExpiry
    } else {
        LotStatus::Active
    }
}

// ceil((expiry - now) / 1 day), expiry >= now
fn days_until(expiry: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    const DAY_MS: i64 = 86_400_000;
    let remaining_ms = (expiry - now).num_milliseconds();
    (remaining_ms + DAY_MS - 1) / DAY_MS
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn no_expiry_is_active() {
        assert_eq!(derive_status(None, now()), LotStatus::Active);
    }

    #[test]
    fn exactly_seven_days_is_near_expiry() {
        assert_eq!(
            derive_status(Some(now() + Duration::days(7)), now()),
            LotStatus::NearExpiry
        );
    }

    #[test]
    fn exactly_eight_days_is_active() {
        assert_eq!(
            derive_status(Some(now() + Duration::days(8)), now()),
            LotStatus::Active
        );
    }

    #[test]
    fn partial_day_rounds_up() {
        let expiry = now() + Duration::days(7) + Duration::seconds(1);
        assert_eq!(derive_status(Some(expiry), now()), LotStatus::Active);
    }

    #[test]
    fn one_second_past_is_expired() {
        assert_eq!(
            derive_status(Some(now() - Duration::seconds(1)), now()),
            LotStatus::Expired
        );
    }

    #[test]
    fn expiring_right_now_is_near_expiry() {
        assert_eq!(derive_status(Some(now()), now()), LotStatus::NearExpiry);
    }

    #[test]
    fn status_parses_wire_names() {
        for status in LotStatus::ALL {
            assert_eq!(status.as_str().parse::<LotStatus>().unwrap(), status);
        }
        assert!("stale".parse::<LotStatus>().is_err());
    }
}
