use std::collections::BTreeSet;

use chrono::{Datelike, NaiveDate, Weekday};

use crate::config::AnalysisConfig;
use crate::models::{Season, Term, TermWeek};

pub fn max_week(term: &Term, config: &AnalysisConfig) -> u8 {
    match term.season {
        Season::Summer => config.weeks_summer,
        Season::Fall | Season::Spring => config.weeks_regular,
    }
}

/// Weekdays of term weeks `1..=max_week` that are not campus holidays, in
/// date order.
pub fn instructional_days(
    weeks: &[TermWeek],
    holidays: &BTreeSet<NaiveDate>,
    max_week: u8,
) -> Vec<NaiveDate> {
    let mut weeks: Vec<&TermWeek> = weeks
        .iter()
        .filter(|week| (1..=max_week).contains(&week.week_number))
        .collect();
    weeks.sort_by_key(|week| week.week_number);

    let mut days = Vec::new();
    for week in weeks {
        let mut day = week.start_date;
        while day <= week.end_date {
            if !matches!(day.weekday(), Weekday::Sat | Weekday::Sun) && !holidays.contains(&day) {
                days.push(day);
            }
            match day.succ_opt() {
                Some(next) => day = next,
                None => break,
            }
        }
    }
    days
}
