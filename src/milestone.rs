use std::collections::HashMap;
use std::fmt;

use chrono::NaiveDate;

use crate::error::AnalysisError;
use crate::models::{BaseMilestone, CheckpointType, MilestoneOverride};

/// Composite milestone number: pace in the hundreds, slot in the tens, unit
/// in the ones.
pub fn milestone_number(pace: u8, slot: u8, unit: u8) -> u16 {
    u16::from(pace) * 100 + u16::from(slot) * 10 + u16::from(unit)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MilestoneKey {
    pub pace: u8,
    pub track: String,
    pub number: u16,
    pub checkpoint: CheckpointType,
}

impl MilestoneKey {
    pub fn for_checkpoint(
        pace: u8,
        track: &str,
        slot: u8,
        unit: u8,
        checkpoint: CheckpointType,
    ) -> Self {
        Self {
            pace,
            track: track.to_string(),
            number: milestone_number(pace, slot, unit),
            checkpoint,
        }
    }
}

impl fmt::Display for MilestoneKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} (pace {}, track {})",
            self.checkpoint, self.number, self.pace, self.track
        )
    }
}

/// The term's base pacing schedule.
#[derive(Debug, Clone, Default)]
pub struct MilestoneSchedule {
    base: HashMap<MilestoneKey, NaiveDate>,
}

impl MilestoneSchedule {
    pub fn new(milestones: &[BaseMilestone]) -> Self {
        let mut base = HashMap::with_capacity(milestones.len());
        for row in milestones {
            let key = MilestoneKey {
                pace: row.pace,
                track: row.pace_track.clone(),
                number: row.number,
                checkpoint: row.checkpoint,
            };
            base.entry(key).or_insert(row.scheduled);
        }
        Self { base }
    }

    pub fn base_date(&self, key: &MilestoneKey) -> Option<NaiveDate> {
        self.base.get(key).copied()
    }

    /// Effective due date for a checkpoint after student overrides.
    ///
    /// Overrides only ever extend a deadline: the result is the latest of the
    /// base date and every override matching the track, number and type.
    /// Override order does not matter.
    pub fn resolve(
        &self,
        key: &MilestoneKey,
        overrides: &[MilestoneOverride],
    ) -> Result<NaiveDate, AnalysisError> {
        let base = self
            .base_date(key)
            .ok_or_else(|| AnalysisError::MissingMilestone { key: key.clone() })?;

        Ok(overrides
            .iter()
            .filter(|o| {
                o.pace_track == key.track
                    && o.number == key.number
                    && o.checkpoint == key.checkpoint
            })
            .map(|o| o.override_date)
            .fold(base, NaiveDate::max))
    }
}
