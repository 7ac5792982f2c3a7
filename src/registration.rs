use std::collections::BTreeMap;

use chrono::NaiveDate;
use tracing::warn;

use crate::config::{AnalysisConfig, TrackRules};
use crate::models::{OpenStatus, Registration};

/// The registrations in force on one evaluation day, keyed by course id.
pub type EffectiveRegistrations<'a> = BTreeMap<&'a str, &'a Registration>;

#[derive(Debug, Default)]
struct CourseRows<'a> {
    open: Option<&'a Registration>,
    latest_dropped: Option<&'a Registration>,
}

/// Narrows one student's registration rows for a term to at most one row
/// per course.
///
/// An open row always wins over dropped rows for the same course. Among
/// dropped rows the one with the latest roll date is kept, and it only stays
/// effective until the evaluation day passes that roll date.
#[derive(Debug)]
pub struct RegistrationFilter<'a> {
    courses: BTreeMap<&'a str, CourseRows<'a>>,
}

impl<'a> RegistrationFilter<'a> {
    pub fn new(rows: &'a [Registration], config: &AnalysisConfig) -> Self {
        let mut courses: BTreeMap<&'a str, CourseRows<'a>> = BTreeMap::new();

        for row in rows {
            if row.incomplete_deadline.is_some() || !config.includes(&row.course_id, &row.section) {
                continue;
            }

            let entry = courses.entry(row.course_id.as_str()).or_default();
            if row.open_status.is_dropped() {
                let replace = match entry.latest_dropped {
                    None => true,
                    Some(kept) => roll_date_later(row.last_roll_date, kept.last_roll_date),
                };
                if replace {
                    entry.latest_dropped = Some(row);
                }
            } else if let Some(kept) = entry.open {
                warn!(
                    student_id = %row.student_id,
                    course_id = %row.course_id,
                    kept_section = %kept.section,
                    ignored_section = %row.section,
                    "multiple open registrations for one course"
                );
            } else {
                entry.open = Some(row);
            }
        }

        Self { courses }
    }

    /// The effective registration for each course on `day`.
    pub fn effective_on(&self, day: NaiveDate) -> EffectiveRegistrations<'a> {
        self.courses
            .iter()
            .filter_map(|(course, rows)| {
                if let Some(open) = rows.open {
                    return Some((*course, open));
                }
                rows.latest_dropped
                    .filter(|dropped| dropped.last_roll_date.map_or(true, |roll| day <= roll))
                    .map(|dropped| (*course, dropped))
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.courses.is_empty()
    }
}

fn roll_date_later(candidate: Option<NaiveDate>, kept: Option<NaiveDate>) -> bool {
    match (candidate, kept) {
        (Some(candidate), Some(kept)) => candidate > kept,
        (Some(_), None) => true,
        _ => false,
    }
}

/// Pace is the number of courses carried on the evaluation day.
pub fn pace(effective: &EffectiveRegistrations<'_>) -> u8 {
    effective.len() as u8
}

/// Picks the milestone schedule track for a student's course mix.
///
/// The lowest open section number decides which rule applies, so a student
/// mixing an online section with a face-to-face one is tracked by the online
/// section.
pub fn pace_track(effective: &EffectiveRegistrations<'_>, pace: u8, rules: &TrackRules) -> String {
    let lowest_open = effective
        .values()
        .filter(|reg| reg.open_status == OpenStatus::Active)
        .map(|reg| reg.section.as_str())
        .min();
    let section = lowest_open.or_else(|| effective.values().map(|reg| reg.section.as_str()).min());

    let Some(section) = section else {
        return "A".to_string();
    };

    let track = if rules.standard_sections.iter().any(|s| s == section) {
        match pace {
            1 => {
                let late = effective
                    .keys()
                    .any(|course| rules.late_sequence_courses.iter().any(|c| c == course));
                if late {
                    "B"
                } else {
                    "A"
                }
            }
            2 => {
                if effective.contains_key(rules.pair_anchor_course.as_str()) {
                    "A"
                } else {
                    "B"
                }
            }
            _ => "A",
        }
    } else if rules.late_start_sections.iter().any(|s| s == section) {
        "C"
    } else {
        "A"
    };

    track.to_string()
}

/// Registrations on the roll at census, one per course, used to form the
/// completion-rate cohort.
///
/// Rows whose last roll date falls before census are drops. Rows without a
/// final grade, with an incomplete (`I`), or in an excluded section are
/// skipped. Duplicates keep the later roll date; on a tie a withdrawn (`W`)
/// row gives way.
pub fn census_cohort<'a>(
    rows: &'a [Registration],
    census: NaiveDate,
    config: &AnalysisConfig,
) -> EffectiveRegistrations<'a> {
    let mut kept: EffectiveRegistrations<'a> = BTreeMap::new();

    for row in rows {
        if config.excluded_sections.iter().any(|s| s == &row.section)
            || !config.courses.contains_key(&row.course_id)
        {
            continue;
        }
        let Some(grade) = row.course_grade.as_deref().map(str::trim) else {
            continue;
        };
        if grade.is_empty() || grade == "I" {
            continue;
        }
        let Some(roll) = row.last_roll_date else {
            continue;
        };
        if roll < census {
            continue;
        }

        match kept.get(row.course_id.as_str()) {
            None => {
                kept.insert(row.course_id.as_str(), row);
            }
            Some(existing) => {
                let existing_roll = existing.last_roll_date.unwrap_or(roll);
                let withdrawn = existing.course_grade.as_deref() == Some("W");
                if roll > existing_roll || (roll == existing_roll && withdrawn) {
                    kept.insert(row.course_id.as_str(), row);
                }
            }
        }
    }

    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, m, d).unwrap()
    }

    fn reg(course: &str, section: &str, status: &str, roll: Option<NaiveDate>) -> Registration {
        Registration {
            student_id: "830001234".to_string(),
            term_id: "SP25".to_string(),
            course_id: course.to_string(),
            section: section.to_string(),
            open_status: OpenStatus::from_code(status),
            last_roll_date: roll,
            course_grade: None,
            incomplete_deadline: None,
        }
    }

    fn graded(mut row: Registration, grade: &str) -> Registration {
        row.course_grade = Some(grade.to_string());
        row
    }

    #[test]
    fn open_row_wins_over_dropped_rows() {
        let config = AnalysisConfig::default();
        let rows = vec![
            reg("M 117", "001", "D", Some(date(2, 1))),
            reg("M 117", "801", "Y", Some(date(5, 9))),
            reg("M 117", "002", "D", Some(date(4, 1))),
        ];
        let filter = RegistrationFilter::new(&rows, &config);
        let effective = filter.effective_on(date(3, 1));
        assert_eq!(effective.len(), 1);
        assert_eq!(effective["M 117"].section, "801");
    }

    #[test]
    fn latest_dropped_row_is_retained_until_its_roll_date() {
        let config = AnalysisConfig::default();
        let rows = vec![
            reg("M 118", "001", "D", Some(date(2, 10))),
            reg("M 118", "002", "G", Some(date(3, 5))),
        ];
        let filter = RegistrationFilter::new(&rows, &config);

        let before = filter.effective_on(date(3, 5));
        assert_eq!(before["M 118"].section, "002");

        let after = filter.effective_on(date(3, 6));
        assert!(after.is_empty());
    }

    #[test]
    fn excluded_sections_and_incompletes_are_skipped() {
        let config = AnalysisConfig::default();
        let mut incomplete = reg("M 124", "001", "Y", None);
        incomplete.incomplete_deadline = Some(date(4, 30));
        let rows = vec![incomplete, reg("M 125", "550", "Y", None), reg("M 160", "001", "Y", None)];
        let filter = RegistrationFilter::new(&rows, &config);
        assert!(filter.is_empty());
    }

    #[test]
    fn duplicate_open_rows_keep_first_encountered() {
        let config = AnalysisConfig::default();
        let rows = vec![reg("M 125", "801", "Y", None), reg("M 125", "001", "Y", None)];
        let filter = RegistrationFilter::new(&rows, &config);
        assert_eq!(filter.effective_on(date(3, 1))["M 125"].section, "801");
    }

    #[test]
    fn pace_track_rules() {
        let rules = TrackRules::default();
        let day = date(3, 1);
        let config = AnalysisConfig::default();

        let single = vec![reg("M 125", "001", "Y", None)];
        let effective = RegistrationFilter::new(&single, &config).effective_on(day);
        assert_eq!(pace_track(&effective, pace(&effective), &rules), "B");

        let single = vec![reg("M 124", "801", "Y", None)];
        let effective = RegistrationFilter::new(&single, &config).effective_on(day);
        assert_eq!(pace_track(&effective, 1, &rules), "A");

        let pair = vec![reg("M 117", "001", "Y", None), reg("M 118", "001", "Y", None)];
        let effective = RegistrationFilter::new(&pair, &config).effective_on(day);
        assert_eq!(pace_track(&effective, pace(&effective), &rules), "A");

        let pair = vec![reg("M 124", "001", "Y", None), reg("M 125", "001", "Y", None)];
        let effective = RegistrationFilter::new(&pair, &config).effective_on(day);
        assert_eq!(pace_track(&effective, 2, &rules), "B");

        let late = vec![reg("M 117", "002", "Y", None)];
        let effective = RegistrationFilter::new(&late, &config).effective_on(day);
        assert_eq!(pace_track(&effective, 1, &rules), "C");

        let mixed = vec![
            reg("M 117", "401", "Y", None),
            reg("M 118", "001", "Y", None),
            reg("M 124", "401", "Y", None),
        ];
        let effective = RegistrationFilter::new(&mixed, &config).effective_on(day);
        assert_eq!(pace_track(&effective, pace(&effective), &rules), "A");
    }

    #[test]
    fn census_cohort_drops_early_rolls_and_prefers_later_rows() {
        let config = AnalysisConfig::default();
        let census = date(2, 5);
        let rows = vec![
            graded(reg("M 117", "001", "D", Some(date(1, 30))), "W"),
            graded(reg("M 118", "001", "Y", Some(date(5, 10))), "W"),
            graded(reg("M 118", "801", "Y", Some(date(5, 10))), "B"),
            graded(reg("M 124", "001", "Y", Some(date(5, 10))), "I"),
            reg("M 125", "001", "Y", Some(date(5, 10))),
            graded(reg("M 126", "550", "Y", Some(date(5, 10))), "A"),
        ];
        let cohort = census_cohort(&rows, census, &config);
        assert_eq!(cohort.len(), 1);
        assert_eq!(cohort["M 118"].section, "801");
    }
}
