//! Day-by-day review progress for every student in a term.
//!
//! For each instructional day the student's registrations are narrowed,
//! slotted by activity, matched to a pace and track, and every configured
//! checkpoint of every slot is resolved against the schedule and classified.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::NaiveDate;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, warn};

use crate::calendar;
use crate::config::AnalysisConfig;
use crate::error::AnalysisError;
use crate::extract::{StudentRecords, TermExtract};
use crate::milestone::{MilestoneKey, MilestoneSchedule};
use crate::ordering::ActivityIndex;
use crate::progress::{classify, Checkpoint, ProgressTally, SlotOutcome};
use crate::registration::{self, RegistrationFilter};

/// Checkpoint evaluations skipped per missing schedule entry.
pub type MissingMilestones = BTreeMap<MilestoneKey, u64>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayProgress {
    pub date: NaiveDate,
    pub pace: u8,
    pub track: String,
    pub tally: ProgressTally,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentProgress {
    pub student_id: String,
    pub days: Vec<DayProgress>,
}

#[derive(Debug, Default)]
pub struct ProgressBatch {
    pub students: Vec<StudentProgress>,
    pub missing: MissingMilestones,
    /// Students excluded after a failure, by id.
    pub failed: Vec<String>,
    pub canceled: bool,
}

impl ProgressBatch {
    /// Logs each missing milestone once for the whole batch.
    pub fn log_missing(&self) {
        for (key, skipped) in &self.missing {
            warn!(
                milestone = %key,
                skipped,
                "no base milestone; checkpoint excluded from classification"
            );
        }
    }
}

#[derive(Debug)]
pub struct ProgressAnalysis<'a> {
    config: &'a AnalysisConfig,
    schedule: MilestoneSchedule,
    days: Vec<NaiveDate>,
}

impl<'a> ProgressAnalysis<'a> {
    pub fn new(extract: &TermExtract, config: &'a AnalysisConfig) -> Self {
        let max_week = calendar::max_week(&extract.term, config);
        Self {
            config,
            schedule: MilestoneSchedule::new(extract.base_milestones()),
            days: calendar::instructional_days(extract.weeks(), extract.holidays(), max_week),
        }
    }

    pub fn days(&self) -> &[NaiveDate] {
        &self.days
    }

    /// Classified checkpoints for one student on one day.
    ///
    /// Checkpoints with no base milestone are left out and counted in
    /// `missing`.
    pub fn day_outcomes(
        &self,
        filter: &RegistrationFilter<'_>,
        activity: &ActivityIndex,
        records: &StudentRecords<'_>,
        day: NaiveDate,
        missing: &mut MissingMilestones,
    ) -> Result<(u8, String, Vec<SlotOutcome>), AnalysisError> {
        let effective = filter.effective_on(day);
        let slots = activity.assign_slots(&effective);
        let pace = registration::pace(&effective);
        let track = registration::pace_track(&effective, pace, &self.config.tracks);
        let kind = self.config.checkpoint_type;

        let mut outcomes = Vec::with_capacity(usize::from(pace) * self.config.review_units.len());
        for slot in 1..=pace {
            let reg = slots.slot(slot).ok_or(AnalysisError::EmptySlot { slot })?;

            for &unit in &self.config.review_units {
                let key = MilestoneKey::for_checkpoint(pace, &track, slot, unit, kind);
                let due = match self.schedule.resolve(&key, records.overrides) {
                    Ok(due) => due,
                    Err(AnalysisError::MissingMilestone { key }) => {
                        *missing.entry(key).or_default() += 1;
                        continue;
                    }
                    Err(other) => return Err(other),
                };

                let checkpoint = Checkpoint {
                    course_id: &reg.course_id,
                    unit,
                    kind,
                };
                let status = classify(&checkpoint, due, records.attempts, day);
                outcomes.push(SlotOutcome { slot, unit, status });
            }
        }

        Ok((pace, track, outcomes))
    }

    /// Evaluates every instructional day for one student. Students with no
    /// included registrations yield `None`.
    pub fn evaluate_student(
        &self,
        records: StudentRecords<'_>,
    ) -> Result<Option<(StudentProgress, MissingMilestones)>, AnalysisError> {
        let filter = RegistrationFilter::new(records.registrations, self.config);
        if filter.is_empty() {
            return Ok(None);
        }
        let activity = ActivityIndex::from_attempts(records.attempts);
        let mut missing = MissingMilestones::new();

        let mut days = Vec::with_capacity(self.days.len());
        for &day in &self.days {
            let (pace, track, outcomes) =
                self.day_outcomes(&filter, &activity, &records, day, &mut missing)?;
            days.push(DayProgress {
                date: day,
                pace,
                track,
                tally: outcomes.into_iter().collect(),
            });
        }

        let progress = StudentProgress {
            student_id: records.student_id.to_string(),
            days,
        };
        Ok(Some((progress, missing)))
    }

    /// Runs every student in the extract. Failures are logged and the
    /// student left out; `cancel` is checked between students.
    pub fn run(&self, extract: &TermExtract, cancel: &AtomicBool) -> ProgressBatch {
        let ids: Vec<&str> = extract.students().collect();

        let results: Vec<_> = ids
            .par_iter()
            .map(|&student_id| {
                if cancel.load(Ordering::Acquire) {
                    return None;
                }
                Some((student_id, self.evaluate_student(extract.student_records(student_id))))
            })
            .collect();

        let mut batch = ProgressBatch::default();
        for result in results {
            match result {
                None => batch.canceled = true,
                Some((_, Ok(None))) => {}
                Some((_, Ok(Some((progress, missing))))) => {
                    for (key, skipped) in missing {
                        *batch.missing.entry(key).or_default() += skipped;
                    }
                    batch.students.push(progress);
                }
                Some((student_id, Err(error))) => {
                    warn!(student_id, %error, "student excluded from progress history");
                    batch.failed.push(student_id.to_string());
                }
            }
        }

        debug!(
            students = batch.students.len(),
            failed = batch.failed.len(),
            canceled = batch.canceled,
            "progress batch finished"
        );
        batch
    }
}

/// Mean of a per-day metric across students, one value per day.
pub fn daily_average(
    students: &[StudentProgress],
    metric: impl Fn(&DayProgress) -> f64,
) -> Vec<f64> {
    let day_count = students.iter().map(|s| s.days.len()).max().unwrap_or(0);
    (0..day_count)
        .map(|index| {
            let values: Vec<f64> = students
                .iter()
                .filter_map(|s| s.days.get(index))
                .map(&metric)
                .collect();
            if values.is_empty() {
                0.0
            } else {
                values.iter().sum::<f64>() / values.len() as f64
            }
        })
        .collect()
}
