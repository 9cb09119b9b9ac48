use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};

use super::model::DigestError;
use crate::preference::model::DigestFrequency;

/// Identifies the digest period `now` falls in, e.g. `weekly:2024-W07`.
pub fn period_key(frequency: DigestFrequency, now: DateTime<Utc>) -> Result<String, DigestError> {
    match frequency {
        DigestFrequency::Daily => Ok(format!("daily:{}", now.format("%Y-%m-%d"))),
        DigestFrequency::Weekly => {
            let week = now.iso_week();
            Ok(format!("weekly:{}-W{:02}", week.year(), week.week()))
        }
        DigestFrequency::Monthly => Ok(format!("monthly:{}", now.format("%Y-%m"))),
        DigestFrequency::None => Err(DigestError::Unscheduled(frequency.as_str().to_string())),
    }
}

/// Daily runs every day at `digest_hour`, weekly on Mondays, monthly on the 1st.
pub fn is_due(frequency: DigestFrequency, now: DateTime<Utc>, digest_hour: u32) -> bool {
    if now.hour() != digest_hour {
        return false;
    }
    match frequency {
        DigestFrequency::Daily => true,
        DigestFrequency::Weekly => now.weekday() == Weekday::Mon,
        DigestFrequency::Monthly => now.day() == 1,
        DigestFrequency::None => false,
    }
}

/// Frequencies due at `now`.
pub fn due_frequencies(now: DateTime<Utc>, digest_hour: u32) -> Vec<DigestFrequency> {
    DigestFrequency::SCHEDULED
        .into_iter()
        .filter(|f| is_due(*f, now, digest_hour))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_period_keys() {
        let at = Utc.with_ymd_and_hms(2024, 2, 12, 8, 30, 0).unwrap();
        assert_eq!(period_key(DigestFrequency::Daily, at).unwrap(), "daily:2024-02-12");
        assert_eq!(period_key(DigestFrequency::Weekly, at).unwrap(), "weekly:2024-W07");
        assert_eq!(period_key(DigestFrequency::Monthly, at).unwrap(), "monthly:2024-02");
        assert!(period_key(DigestFrequency::None, at).is_err());
    }

    #[test]
    fn test_iso_week_spans_year_boundary() {
        let at = Utc.with_ymd_and_hms(2024, 12, 30, 8, 0, 0).unwrap();
        assert_eq!(period_key(DigestFrequency::Weekly, at).unwrap(), "weekly:2025-W01");
    }

    #[test]
    fn test_due_on_monday_the_first() {
        // 2024-01-01 was a Monday
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap();
        assert_eq!(
            due_frequencies(at, 8),
            vec![
                DigestFrequency::Daily,
                DigestFrequency::Weekly,
                DigestFrequency::Monthly
            ]
        );
        assert!(due_frequencies(at, 9).is_empty());
    }

    #[test]
    fn test_tuesday_only_daily() {
        let at = Utc.with_ymd_and_hms(2024, 1, 2, 8, 15, 0).unwrap();
        assert_eq!(due_frequencies(at, 8), vec![DigestFrequency::Daily]);
    }
}
