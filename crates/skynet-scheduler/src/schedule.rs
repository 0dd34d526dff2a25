use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use tracing::warn;

use crate::types::Schedule;

/// Compute the next UTC execution time for `schedule` starting *after* `from`.
///
/// Returns `None` when the schedule is exhausted (e.g. a `Once` job whose
/// time has already passed) or when the schedule type is not yet supported
/// (e.g. `Cron`).
pub fn compute_next_run(schedule: &Schedule, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match schedule {
        Schedule::Once { at } => {
            // Fire only if the instant is still in the future.
            if *at > from {
                Some(*at)
            } else {
                None
            }
        }

        Schedule::InN { amount, unit } => {
            // Treated the same as Interval on the first (and only) tick: the
            // caller is expected to drop the job to Completed after it fires
            // once via `max_runs = Some(1)`.
            Some(from + unit.to_duration(*amount))
        }

        Schedule::EveryN { amount, unit } => Some(from + unit.to_duration(*amount)),

        Schedule::Interval { every_secs } => Some(from + Duration::seconds(*every_secs as i64)),

        Schedule::Daily { hour, minute } => {
            // Build today's candidate at HH:MM:00 UTC.
            let candidate = Utc
                .with_ymd_and_hms(
                    from.year(),
                    from.month(),
                    from.day(),
                    *hour as u32,
                    *minute as u32,
                    0,
                )
                .single()?;
            if candidate > from {
                Some(candidate)
            } else {
                // Today's window has passed — advance to tomorrow.
                Some(candidate + Duration::days(1))
            }
        }

        Schedule::Weekly { day, hour, minute } => {
            // `day` follows ISO weekday numbering: 0=Monday … 6=Sunday,
            // which matches chrono's `num_days_from_monday`.
            let today_dow = from.weekday().num_days_from_monday() as i64;
            let target_dow = (*day as i64).clamp(0, 6);
            let mut days_ahead = target_dow - today_dow;

            // Normalise: negative means the target day already passed this week.
            let candidate_day = if days_ahead < 0 {
                from + Duration::days(7 + days_ahead)
            } else {
                from + Duration::days(days_ahead)
            };

            let candidate = Utc
                .with_ymd_and_hms(
                    candidate_day.year(),
                    candidate_day.month(),
                    candidate_day.day(),
                    *hour as u32,
                    *minute as u32,
                    0,
                )
                .single()?;

            if candidate > from {
                Some(candidate)
            } else {
                // The time on the target weekday has already passed — push 7 days.
                days_ahead = if days_ahead <= 0 { 7 } else { 7 - days_ahead };
                Some(candidate + Duration::days(days_ahead))
            }
        }

        Schedule::Cron { expression } => {
            // Standard 5-field expressions (minute hour day month weekday) are
            // accepted directly; the `cron` crate requires a leading seconds
            // field, so a bare 5-field expression gets "0 " prepended.
            let normalized = if expression.split_whitespace().count() == 5 {
                format!("0 {expression}")
            } else {
                expression.clone()
            };
            match cron::Schedule::from_str(&normalized) {
                Ok(parsed) => parsed.after(&from).next(),
                Err(e) => {
                    warn!(expression, "invalid cron expression: {e}");
                    None
                }
            }
        }
    }
}

/// Parse informal one-shot/repeating phrases into a [`Schedule`].
///
/// Accepts:
/// - `"in 10 minutes"`, `"in 2 hours"` → [`Schedule::InN`]
/// - `"every 30 seconds"`, `"every 2 days"` → [`Schedule::EveryN`]
/// - a bare RFC3339 datetime → [`Schedule::Once`]
/// - a 5-field cron expression → [`Schedule::Cron`]
pub fn parse_informal(input: &str) -> Result<Schedule, String> {
    let trimmed = input.trim();
    let lower = trimmed.to_lowercase();

    if let Some(rest) = lower.strip_prefix("in ") {
        let (amount, unit) = parse_amount_unit(rest)?;
        return Ok(Schedule::InN { amount, unit });
    }
    if let Some(rest) = lower.strip_prefix("every ") {
        let (amount, unit) = parse_amount_unit(rest)?;
        return Ok(Schedule::EveryN { amount, unit });
    }
    if let Ok(at) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(Schedule::Once { at: at.with_timezone(&Utc) });
    }
    if trimmed.split_whitespace().count() == 5 {
        return Ok(Schedule::Cron {
            expression: trimmed.to_string(),
        });
    }
    Err(format!("unrecognized schedule expression: {input}"))
}

fn parse_amount_unit(rest: &str) -> Result<(u64, crate::types::TimeUnit), String> {
    let mut parts = rest.split_whitespace();
    let amount: u64 = parts
        .next()
        .ok_or_else(|| "missing amount".to_string())?
        .parse()
        .map_err(|_| "amount must be a positive integer".to_string())?;
    let unit_str = parts.next().ok_or_else(|| "missing time unit".to_string())?;
    let unit = unit_str.parse::<crate::types::TimeUnit>()?;
    Ok((amount, unit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TimeUnit;
    use chrono::Timelike;

    #[test]
    fn once_in_future_fires() {
        let from = Utc::now();
        let at = from + Duration::seconds(60);
        let next = compute_next_run(&Schedule::Once { at }, from);
        assert_eq!(next, Some(at));
    }

    #[test]
    fn once_in_past_is_exhausted() {
        let from = Utc::now();
        let at = from - Duration::seconds(60);
        assert_eq!(compute_next_run(&Schedule::Once { at }, from), None);
    }

    #[test]
    fn every_n_advances_by_unit() {
        let from = Utc::now();
        let sched = Schedule::EveryN {
            amount: 2,
            unit: TimeUnit::Hours,
        };
        let next = compute_next_run(&sched, from).unwrap();
        assert_eq!(next, from + Duration::hours(2));
    }

    #[test]
    fn cron_five_field_expression_resolves() {
        let from = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        // Every day at 09:30.
        let sched = Schedule::Cron {
            expression: "30 9 * * *".to_string(),
        };
        let next = compute_next_run(&sched, from).unwrap();
        assert_eq!(next.hour(), 9);
        assert_eq!(next.minute(), 30);
    }

    #[test]
    fn invalid_cron_expression_yields_none() {
        let sched = Schedule::Cron {
            expression: "not a cron expr".to_string(),
        };
        assert_eq!(compute_next_run(&sched, Utc::now()), None);
    }

    #[test]
    fn parse_informal_in_n() {
        let sched = parse_informal("in 10 minutes").unwrap();
        assert!(matches!(
            sched,
            Schedule::InN {
                amount: 10,
                unit: TimeUnit::Minutes
            }
        ));
    }

    #[test]
    fn parse_informal_every_n() {
        let sched = parse_informal("every 30 seconds").unwrap();
        assert!(matches!(
            sched,
            Schedule::EveryN {
                amount: 30,
                unit: TimeUnit::Seconds
            }
        ));
    }

    #[test]
    fn parse_informal_cron_passthrough() {
        let sched = parse_informal("0 9 * * 1").unwrap();
        assert!(matches!(sched, Schedule::Cron { .. }));
    }

    #[test]
    fn parse_informal_rejects_garbage() {
        assert!(parse_informal("whenever you feel like it").is_err());
    }
}
