use thiserror::Error;

use crate::aggregate::MAX_SLOTS;
use crate::milestone::MilestoneKey;

/// Failures raised by the inference and aggregation passes.
///
/// None of these abort a batch: callers log them against the student or
/// checkpoint they came from and carry on with the rest of the cohort.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalysisError {
    /// No base milestone exists for the checkpoint, so it cannot be classified.
    #[error("no base milestone for {key}")]
    MissingMilestone { key: MilestoneKey },

    /// Slot assignment left a hole; the student's day cannot be evaluated.
    #[error("no effective registration holds slot {slot}")]
    EmptySlot { slot: u8 },

    #[error("outcome aggregation supports 1 to {max} slots, got {n}", max = MAX_SLOTS)]
    InvalidSlotCount { n: usize },

    #[error("outcome tuple has {actual} slots but the aggregator expects {expected}")]
    OutcomeLength { expected: usize, actual: usize },

    #[error("unknown checkpoint type '{0}'")]
    UnknownCheckpointType(String),

    #[error("unknown term season '{0}'")]
    UnknownSeason(String),
}
