//! Success statistics over cohorts of students working an ordered sequence
//! of courses.
//!
//! Every cohort member contributes a tuple of per-slot results. A student
//! has to clear slot `i` before slot `i + 1` counts as in progress, so the
//! first slot that is not passed ends the tuple: every later slot is
//! tallied as never attempted.

use serde::Serialize;

use crate::error::AnalysisError;

/// Longest course sequence the aggregator accepts.
pub const MAX_SLOTS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SlotResult {
    Passed,
    Failed,
    NotAttempted,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SlotTally {
    pub passed: u64,
    pub failed_attempted: u64,
    pub never_attempted: u64,
}

impl SlotTally {
    pub fn attempted(&self) -> u64 {
        self.passed + self.failed_attempted
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutcomeAggregator {
    slots: Vec<SlotTally>,
    cohort: u64,
}

impl OutcomeAggregator {
    pub fn new(slot_count: usize) -> Result<Self, AnalysisError> {
        if !(1..=MAX_SLOTS).contains(&slot_count) {
            return Err(AnalysisError::InvalidSlotCount { n: slot_count });
        }
        Ok(Self {
            slots: vec![SlotTally::default(); slot_count],
            cohort: 0,
        })
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn cohort_size(&self) -> u64 {
        self.cohort
    }

    /// Tally for slot `i` (1-based).
    pub fn tally(&self, slot: usize) -> Option<&SlotTally> {
        slot.checked_sub(1).and_then(|index| self.slots.get(index))
    }

    pub fn accumulate(&mut self, outcome: &[SlotResult]) -> Result<(), AnalysisError> {
        if outcome.len() != self.slots.len() {
            return Err(AnalysisError::OutcomeLength {
                expected: self.slots.len(),
                actual: outcome.len(),
            });
        }

        let mut stopped = false;
        for (index, (tally, result)) in self.slots.iter_mut().zip(outcome).enumerate() {
            if stopped {
                tally.never_attempted += 1;
                continue;
            }
            match result {
                SlotResult::Passed => tally.passed += 1,
                // cohort membership means slot 1 was always attempted
                SlotResult::Failed => tally.failed_attempted += 1,
                SlotResult::NotAttempted if index == 0 => tally.failed_attempted += 1,
                SlotResult::NotAttempted => tally.never_attempted += 1,
            }
            stopped = *result != SlotResult::Passed;
        }

        self.cohort += 1;
        Ok(())
    }

    /// Folds in a partial aggregate built over a disjoint set of students.
    pub fn merge(&mut self, other: &OutcomeAggregator) -> Result<(), AnalysisError> {
        if other.slots.len() != self.slots.len() {
            return Err(AnalysisError::OutcomeLength {
                expected: self.slots.len(),
                actual: other.slots.len(),
            });
        }
        for (mine, theirs) in self.slots.iter_mut().zip(&other.slots) {
            mine.passed += theirs.passed;
            mine.failed_attempted += theirs.failed_attempted;
            mine.never_attempted += theirs.never_attempted;
        }
        self.cohort += other.cohort;
        Ok(())
    }

    /// `passed(i) / cohort`; `None` for an empty cohort or a slot past the end.
    pub fn success_rate(&self, slot: usize) -> Option<f64> {
        let tally = self.tally(slot)?;
        ratio(tally.passed, self.cohort)
    }

    /// `passed(i) / (passed(i) + failed_attempted(i))`.
    pub fn conditional_success_rate(&self, slot: usize) -> Option<f64> {
        let tally = self.tally(slot)?;
        ratio(tally.passed, tally.attempted())
    }

    /// Mean number of courses in the sequence a cohort member completes:
    /// `sum(i * (success(i) - success(i + 1)))`, with `success(N + 1) = 0`.
    pub fn expected_credits_passed(&self) -> Option<f64> {
        let n = self.slots.len();
        let mut expected = 0.0;
        for slot in 1..=n {
            let here = self.success_rate(slot)?;
            let next = if slot == n { 0.0 } else { self.success_rate(slot + 1)? };
            expected += slot as f64 * (here - next);
        }
        Some(expected)
    }
}

fn ratio(numerator: u64, denominator: u64) -> Option<f64> {
    (denominator > 0).then(|| numerator as f64 / denominator as f64)
}
