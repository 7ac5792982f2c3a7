use std::collections::HashMap;

use chrono::NaiveDate;

use crate::models::{CheckpointAttempt, Registration};
use crate::registration::EffectiveRegistrations;

/// Earliest checkpoint attempt per course over a student's whole history.
#[derive(Debug, Default, Clone)]
pub struct ActivityIndex {
    first_attempt: HashMap<String, NaiveDate>,
}

impl ActivityIndex {
    pub fn from_attempts(attempts: &[CheckpointAttempt]) -> Self {
        let mut first_attempt: HashMap<String, NaiveDate> = HashMap::new();
        for attempt in attempts {
            first_attempt
                .entry(attempt.course_id.clone())
                .and_modify(|first| *first = (*first).min(attempt.attempt_date))
                .or_insert(attempt.attempt_date);
        }
        Self { first_attempt }
    }

    pub fn first_attempt(&self, course_id: &str) -> Option<NaiveDate> {
        self.first_attempt.get(course_id).copied()
    }

    pub fn has_attempted(&self, course_id: &str) -> bool {
        self.first_attempt.contains_key(course_id)
    }

    /// Orders the effective registrations into slots 1..=pace.
    ///
    /// Courses with any attempt come first, by earliest attempt date with the
    /// course id breaking ties. Courses never attempted follow in course-id
    /// order.
    pub fn assign_slots<'a>(&self, effective: &EffectiveRegistrations<'a>) -> SlotAssignment<'a> {
        let mut attempted: Vec<(NaiveDate, &'a str, &'a Registration)> = Vec::new();
        let mut untouched: Vec<&'a Registration> = Vec::new();

        // BTreeMap iteration is already in course-id order.
        for (&course, &reg) in effective {
            match self.first_attempt(course) {
                Some(first) => attempted.push((first, course, reg)),
                None => untouched.push(reg),
            }
        }
        attempted.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)));

        let slots = attempted
            .into_iter()
            .map(|(_, _, reg)| reg)
            .chain(untouched)
            .collect();
        SlotAssignment { slots }
    }
}

/// Registrations in slot order; slot `n` is at index `n - 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotAssignment<'a> {
    slots: Vec<&'a Registration>,
}

impl<'a> SlotAssignment<'a> {
    pub fn pace(&self) -> u8 {
        self.slots.len() as u8
    }

    pub fn slot(&self, slot: u8) -> Option<&'a Registration> {
        usize::from(slot)
            .checked_sub(1)
            .and_then(|index| self.slots.get(index).copied())
    }

    /// `(slot, registration)` pairs, slot ascending.
    pub fn iter(&self) -> impl Iterator<Item = (u8, &'a Registration)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .map(|(index, reg)| (index as u8 + 1, *reg))
    }
}
