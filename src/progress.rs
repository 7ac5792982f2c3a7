use chrono::NaiveDate;
use serde::Serialize;

use crate::models::{CheckpointAttempt, CheckpointType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CheckpointStatus {
    PassedOnTime,
    PassedLate,
    DueNotPassed,
    NotYetDue,
}

/// One gated assessment within a course.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint<'a> {
    pub course_id: &'a str,
    pub unit: u8,
    pub kind: CheckpointType,
}

impl Checkpoint<'_> {
    fn matches(&self, attempt: &CheckpointAttempt) -> bool {
        attempt.course_id == self.course_id
            && attempt.unit == self.unit
            && attempt.checkpoint == self.kind
    }
}

/// Classifies a checkpoint as of `as_of`, given its resolved due date.
///
/// A checkpoint due after `as_of` is not yet due. Otherwise only passing
/// attempts made on or before `as_of` count, and the earliest of them decides
/// between on time and late.
pub fn classify(
    checkpoint: &Checkpoint<'_>,
    due: NaiveDate,
    attempts: &[CheckpointAttempt],
    as_of: NaiveDate,
) -> CheckpointStatus {
    if due > as_of {
        return CheckpointStatus::NotYetDue;
    }

    let first_pass = attempts
        .iter()
        .filter(|a| a.passed && a.attempt_date <= as_of && checkpoint.matches(a))
        .map(|a| a.attempt_date)
        .min();

    match first_pass {
        Some(passed_on) if passed_on <= due => CheckpointStatus::PassedOnTime,
        Some(_) => CheckpointStatus::PassedLate,
        None => CheckpointStatus::DueNotPassed,
    }
}

/// A classified checkpoint for one evaluation day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SlotOutcome {
    pub slot: u8,
    pub unit: u8,
    pub status: CheckpointStatus,
}

/// Counts of checkpoint verdicts for one student-day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProgressTally {
    pub on_time: u32,
    pub late: u32,
    pub due_not_passed: u32,
    pub not_yet_due: u32,
}

impl ProgressTally {
    pub fn record(&mut self, status: CheckpointStatus) {
        match status {
            CheckpointStatus::PassedOnTime => self.on_time += 1,
            CheckpointStatus::PassedLate => self.late += 1,
            CheckpointStatus::DueNotPassed => self.due_not_passed += 1,
            CheckpointStatus::NotYetDue => self.not_yet_due += 1,
        }
    }

    pub fn passed(&self) -> u32 {
        self.on_time + self.late
    }

    pub fn due(&self) -> u32 {
        self.passed() + self.due_not_passed
    }

    /// Share of due checkpoints already passed; 1.0 when nothing is due yet.
    pub fn completion_rate(&self) -> f64 {
        match self.due() {
            0 => 1.0,
            due => f64::from(self.passed()) / f64::from(due),
        }
    }
}

impl FromIterator<SlotOutcome> for ProgressTally {
    fn from_iter<I: IntoIterator<Item = SlotOutcome>>(outcomes: I) -> Self {
        let mut tally = Self::default();
        for outcome in outcomes {
            tally.record(outcome.status);
        }
        tally
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, m, d).unwrap()
    }

    fn attempt(unit: u8, kind: CheckpointType, on: NaiveDate, passed: bool) -> CheckpointAttempt {
        CheckpointAttempt {
            student_id: "830005555".to_string(),
            course_id: "M 124".to_string(),
            unit,
            checkpoint: kind,
            attempt_date: on,
            attempt_time: None,
            passed,
        }
    }

    const REVIEW_1: Checkpoint<'static> = Checkpoint {
        course_id: "M 124",
        unit: 1,
        kind: CheckpointType::Review,
    };

    #[test]
    fn pass_after_due_date_is_late() {
        let attempts = vec![attempt(1, CheckpointType::Review, date(3, 20), true)];
        assert_eq!(
            classify(&REVIEW_1, date(3, 16), &attempts, date(3, 25)),
            CheckpointStatus::PassedLate
        );
    }

    #[test]
    fn not_yet_due_before_due_date() {
        assert_eq!(
            classify(&REVIEW_1, date(3, 16), &[], date(3, 10)),
            CheckpointStatus::NotYetDue
        );
    }

    #[test]
    fn pass_on_due_date_is_on_time() {
        let attempts = vec![
            attempt(1, CheckpointType::Review, date(3, 14), false),
            attempt(1, CheckpointType::Review, date(3, 16), true),
        ];
        assert_eq!(
            classify(&REVIEW_1, date(3, 16), &attempts, date(3, 16)),
            CheckpointStatus::PassedOnTime
        );
    }

    #[test]
    fn future_passes_and_other_checkpoints_do_not_count() {
        let attempts = vec![
            attempt(1, CheckpointType::Review, date(3, 30), true),
            attempt(2, CheckpointType::Review, date(3, 10), true),
            attempt(1, CheckpointType::Unit, date(3, 10), true),
            attempt(1, CheckpointType::Review, date(3, 12), false),
        ];
        assert_eq!(
            classify(&REVIEW_1, date(3, 16), &attempts, date(3, 25)),
            CheckpointStatus::DueNotPassed
        );
    }

    #[test]
    fn exactly_one_status_for_every_day_around_the_deadline() {
        let attempts = vec![attempt(1, CheckpointType::Review, date(3, 18), true)];
        let due = date(3, 16);
        let statuses: Vec<CheckpointStatus> = (10..=20)
            .map(|d| classify(&REVIEW_1, due, &attempts, date(3, d)))
            .collect();

        assert!(statuses[..6].iter().all(|s| *s == CheckpointStatus::NotYetDue));
        assert_eq!(statuses[6], CheckpointStatus::DueNotPassed);
        assert_eq!(statuses[7], CheckpointStatus::DueNotPassed);
        assert!(statuses[8..].iter().all(|s| *s == CheckpointStatus::PassedLate));
    }

    #[test]
    fn tally_rates() {
        let tally: ProgressTally = [
            CheckpointStatus::PassedOnTime,
            CheckpointStatus::PassedLate,
            CheckpointStatus::DueNotPassed,
            CheckpointStatus::NotYetDue,
        ]
        .into_iter()
        .enumerate()
        .map(|(i, status)| SlotOutcome {
            slot: 1,
            unit: i as u8 + 1,
            status,
        })
        .collect();

        assert_eq!(tally.due(), 3);
        assert!((tally.completion_rate() - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(ProgressTally::default().completion_rate(), 1.0);
    }
}
