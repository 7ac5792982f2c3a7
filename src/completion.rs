//! Completion rates by course combination for the cohort on the roll at
//! census.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::NaiveDate;
use rayon::prelude::*;
use serde::Serialize;
use tracing::warn;

use crate::aggregate::{OutcomeAggregator, SlotResult};
use crate::config::AnalysisConfig;
use crate::error::AnalysisError;
use crate::extract::{StudentRecords, TermExtract};
use crate::ordering::ActivityIndex;
use crate::registration::census_cohort;

/// A pace together with the exact set of courses making it up.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct CohortKey {
    pub pace: u8,
    /// Course ids, ascending.
    pub courses: Vec<String>,
}

impl fmt::Display for CohortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.courses.join("+"))
    }
}

/// The student's cohort and slot-ordered results, or `None` when nothing
/// they took was on the roll at census.
///
/// A slot is passed on a passing final grade, not attempted when the student
/// never sat a checkpoint in that course, and failed otherwise.
pub fn student_outcome(
    records: &StudentRecords<'_>,
    census: NaiveDate,
    config: &AnalysisConfig,
) -> Option<(CohortKey, Vec<SlotResult>)> {
    let cohort = census_cohort(records.registrations, census, config);
    if cohort.is_empty() {
        return None;
    }

    let activity = ActivityIndex::from_attempts(records.attempts);
    let slots = activity.assign_slots(&cohort);

    let results = slots
        .iter()
        .map(|(_, reg)| {
            let passed = reg
                .course_grade
                .as_deref()
                .is_some_and(|grade| config.is_passing_grade(grade));
            if passed {
                SlotResult::Passed
            } else if activity.has_attempted(&reg.course_id) {
                SlotResult::Failed
            } else {
                SlotResult::NotAttempted
            }
        })
        .collect();

    let key = CohortKey {
        pace: slots.pace(),
        courses: cohort.keys().map(|course| course.to_string()).collect(),
    };
    Some((key, results))
}

#[derive(Debug, Default)]
pub struct CompletionBatch {
    pub groups: BTreeMap<CohortKey, OutcomeAggregator>,
    pub failed: Vec<String>,
    pub canceled: bool,
}

impl CompletionBatch {
    /// Every group's aggregator is sized by the pace in its key, so partial
    /// batches always agree on slot count for a shared key.
    fn record(&mut self, key: CohortKey, outcome: &[SlotResult]) -> Result<(), AnalysisError> {
        let aggregator = match self.groups.entry(key) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let slots = usize::from(entry.key().pace);
                entry.insert(OutcomeAggregator::new(slots)?)
            }
        };
        aggregator.accumulate(outcome)
    }

    /// Combines two partial batches over disjoint students.
    pub fn merge(mut self, other: CompletionBatch) -> CompletionBatch {
        for (key, partial) in other.groups {
            match self.groups.get_mut(&key) {
                Some(existing) => {
                    if let Err(error) = existing.merge(&partial) {
                        warn!(
                            cohort = %key,
                            pace = key.pace,
                            students = partial.cohort_size(),
                            %error,
                            "partial aggregate dropped from completion rates"
                        );
                    }
                }
                None => {
                    self.groups.insert(key, partial);
                }
            }
        }
        self.failed.extend(other.failed);
        self.canceled |= other.canceled;
        self
    }

    pub fn cohort_size(&self) -> u64 {
        self.groups.values().map(OutcomeAggregator::cohort_size).sum()
    }

    /// Groups with the given pace, in course order.
    pub fn by_pace(&self, pace: u8) -> impl Iterator<Item = (&CohortKey, &OutcomeAggregator)> + '_ {
        self.groups.iter().filter(move |(key, _)| key.pace == pace)
    }
}

/// Aggregates every student in the extract, grouped by course combination.
///
/// Workers build partial batches that are merged at the end, so no counters
/// are shared. `cancel` is checked between students.
pub fn completion_rates(
    extract: &TermExtract,
    census: NaiveDate,
    config: &AnalysisConfig,
    cancel: &AtomicBool,
) -> CompletionBatch {
    let ids: Vec<&str> = extract.students().collect();

    let mut batch = ids
        .par_iter()
        .fold(CompletionBatch::default, |mut batch, &student_id| {
            if cancel.load(Ordering::Acquire) {
                batch.canceled = true;
                return batch;
            }
            let records = extract.student_records(student_id);
            if let Some((key, outcome)) = student_outcome(&records, census, config) {
                if let Err(error) = batch.record(key, &outcome) {
                    warn!(student_id, %error, "student excluded from completion rates");
                    batch.failed.push(student_id.to_string());
                }
            }
            batch
        })
        .reduce(CompletionBatch::default, CompletionBatch::merge);

    batch.failed.sort();
    batch
}
