//! Calendar & frequency engine — pure date arithmetic, no side effects.
//!
//! Month-unit frequencies anchor on the contract's billing day and clamp
//! to the target month's length, so a day-31 contract bills on Feb 28 and
//! is back on Mar 31 the cycle after.

use chrono::{Datelike, Duration, NaiveDate};

use facturio_core::error::{FacturioError, Result};
use facturio_core::model::{BillingFrequency, CustomCycle};

/// Next scheduled occurrence after `reference` for the given frequency.
///
/// `billing_day` is the day-of-month anchor for month-unit frequencies
/// (0 = keep the reference's day). Day-unit frequencies (weekly,
/// bi-weekly, custom-by-days) advance by exact days and ignore it.
pub fn next_occurrence(
    reference: NaiveDate,
    frequency: BillingFrequency,
    billing_day: u32,
    custom: Option<&CustomCycle>,
) -> Result<NaiveDate> {
    match frequency {
        BillingFrequency::Weekly => Ok(reference + Duration::days(7)),
        BillingFrequency::BiWeekly => Ok(reference + Duration::days(14)),
        BillingFrequency::Monthly => add_months_anchored(reference, 1, billing_day),
        BillingFrequency::BiMonthly => add_months_anchored(reference, 2, billing_day),
        BillingFrequency::Quarterly => add_months_anchored(reference, 3, billing_day),
        BillingFrequency::FourMonthly => add_months_anchored(reference, 4, billing_day),
        BillingFrequency::SemiAnnual => add_months_anchored(reference, 6, billing_day),
        BillingFrequency::Annual => add_months_anchored(reference, 12, billing_day),
        BillingFrequency::Custom => {
            let spec = custom.ok_or_else(|| {
                FacturioError::Validation("custom frequency requires a cycle spec".into())
            })?;
            match (spec.months, spec.days) {
                (Some(m), None) => add_months_anchored(reference, m, billing_day),
                (None, Some(d)) => Ok(reference + Duration::days(d as i64)),
                (Some(_), Some(_)) | (None, None) => Err(FacturioError::Validation(
                    "custom cycle must set exactly one of months/days".into(),
                )),
            }
        }
    }
}

/// Estimated occurrences per year. Fixed table for calendar units,
/// `12/months` or `365/days` for custom. Estimation only — never used
/// for schedule correctness.
pub fn estimated_annual_occurrences(
    frequency: BillingFrequency,
    custom: Option<&CustomCycle>,
) -> Result<f64> {
    let n = match frequency {
        BillingFrequency::Weekly => 52.0,
        BillingFrequency::BiWeekly => 24.0,
        BillingFrequency::Monthly => 12.0,
        BillingFrequency::BiMonthly => 6.0,
        BillingFrequency::Quarterly => 4.0,
        BillingFrequency::FourMonthly => 3.0,
        BillingFrequency::SemiAnnual => 2.0,
        BillingFrequency::Annual => 1.0,
        BillingFrequency::Custom => {
            let spec = custom.ok_or_else(|| {
                FacturioError::Validation("custom frequency requires a cycle spec".into())
            })?;
            match (spec.months, spec.days) {
                (Some(m), None) if m > 0 => 12.0 / m as f64,
                (None, Some(d)) if d > 0 => 365.0 / d as f64,
                _ => {
                    return Err(FacturioError::Validation(
                        "custom cycle must set exactly one of months/days (non-zero)".into(),
                    ));
                }
            }
        }
    };
    Ok(n)
}

/// Estimated annual revenue for a recurring amount at the given cadence.
pub fn estimated_annual_revenue(
    amount: f64,
    frequency: BillingFrequency,
    custom: Option<&CustomCycle>,
) -> Result<f64> {
    Ok(amount * estimated_annual_occurrences(frequency, custom)?)
}

/// Add whole months, anchoring on `billing_day` clamped to the target
/// month's length.
fn add_months_anchored(reference: NaiveDate, months: u32, billing_day: u32) -> Result<NaiveDate> {
    let total = reference.year() * 12 + reference.month0() as i32 + months as i32;
    let year = total.div_euclid(12);
    let month = total.rem_euclid(12) as u32 + 1;
    let anchor = if billing_day == 0 { reference.day() } else { billing_day };
    let day = anchor.min(days_in_month(year, month));
    NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| {
        FacturioError::Validation(format!("invalid target date {year}-{month:02}-{day:02}"))
    })
}

/// Number of days in a month.
fn days_in_month(year: i32, month: u32) -> u32 {
    let (ny, nm) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    // First of next month minus one day.
    let first_next = NaiveDate::from_ymd_opt(ny, nm, 1).expect("valid first-of-month");
    (first_next - Duration::days(1)).day()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_monthly_advance() {
        let next = next_occurrence(d(2025, 1, 1), BillingFrequency::Monthly, 1, None).unwrap();
        assert_eq!(next, d(2025, 2, 1));
    }

    #[test]
    fn test_day_31_clamps_then_reanchors() {
        // Jan 31 → Feb 28 (clamped) → Mar 31 (anchor restored).
        let feb = next_occurrence(d(2025, 1, 31), BillingFrequency::Monthly, 31, None).unwrap();
        assert_eq!(feb, d(2025, 2, 28));
        let mar = next_occurrence(feb, BillingFrequency::Monthly, 31, None).unwrap();
        assert_eq!(mar, d(2025, 3, 31));
    }

    #[test]
    fn test_compositionality() {
        // Applying twice lands exactly one cycle past applying once.
        let start = d(2025, 3, 15);
        let month_units = [
            (BillingFrequency::Monthly, 1),
            (BillingFrequency::BiMonthly, 2),
            (BillingFrequency::Quarterly, 3),
            (BillingFrequency::FourMonthly, 4),
            (BillingFrequency::SemiAnnual, 6),
            (BillingFrequency::Annual, 12),
        ];
        for (freq, months) in month_units {
            let once = next_occurrence(start, freq, 15, None).unwrap();
            let twice = next_occurrence(once, freq, 15, None).unwrap();
            assert_eq!(twice, add_months_anchored(start, months * 2, 15).unwrap(), "{freq:?}");
        }
        for (freq, days) in [(BillingFrequency::Weekly, 7), (BillingFrequency::BiWeekly, 14)] {
            let once = next_occurrence(start, freq, 0, None).unwrap();
            let twice = next_occurrence(once, freq, 0, None).unwrap();
            assert_eq!(twice, start + Duration::days(days * 2), "{freq:?}");
        }
    }

    #[test]
    fn test_custom_by_days_and_months() {
        let spec = CustomCycle { months: None, days: Some(10) };
        assert_eq!(
            next_occurrence(d(2025, 1, 1), BillingFrequency::Custom, 0, Some(&spec)).unwrap(),
            d(2025, 1, 11)
        );
        let spec = CustomCycle { months: Some(5), days: None };
        assert_eq!(
            next_occurrence(d(2025, 1, 31), BillingFrequency::Custom, 31, Some(&spec)).unwrap(),
            d(2025, 6, 30)
        );
    }

    #[test]
    fn test_custom_requires_exactly_one_field() {
        let neither = CustomCycle { months: None, days: None };
        assert!(next_occurrence(d(2025, 1, 1), BillingFrequency::Custom, 0, Some(&neither)).is_err());
        let both = CustomCycle { months: Some(1), days: Some(30) };
        assert!(next_occurrence(d(2025, 1, 1), BillingFrequency::Custom, 0, Some(&both)).is_err());
        assert!(next_occurrence(d(2025, 1, 1), BillingFrequency::Custom, 0, None).is_err());
    }

    #[test]
    fn test_annual_occurrence_table() {
        let cases = [
            (BillingFrequency::Weekly, 52.0),
            (BillingFrequency::BiWeekly, 24.0),
            (BillingFrequency::Monthly, 12.0),
            (BillingFrequency::BiMonthly, 6.0),
            (BillingFrequency::Quarterly, 4.0),
            (BillingFrequency::FourMonthly, 3.0),
            (BillingFrequency::SemiAnnual, 2.0),
            (BillingFrequency::Annual, 1.0),
        ];
        for (freq, expected) in cases {
            assert_eq!(estimated_annual_occurrences(freq, None).unwrap(), expected);
        }
        let spec = CustomCycle { months: Some(3), days: None };
        assert_eq!(
            estimated_annual_occurrences(BillingFrequency::Custom, Some(&spec)).unwrap(),
            4.0
        );
    }

    #[test]
    fn test_annual_revenue_estimate() {
        let rev = estimated_annual_revenue(1000.0, BillingFrequency::Quarterly, None).unwrap();
        assert_eq!(rev, 4000.0);
    }

    #[test]
    fn test_leap_year_february() {
        let next = next_occurrence(d(2024, 1, 31), BillingFrequency::Monthly, 31, None).unwrap();
        assert_eq!(next, d(2024, 2, 29));
    }
}
