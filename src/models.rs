use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpenStatus {
    Active,
    Dropped,
    GraceDropped,
}

impl OpenStatus {
    /// Maps the registrar's open-status code. Anything other than a drop
    /// (`D`) or a grace-period drop (`G`) counts as an open registration.
    pub fn from_code(code: &str) -> Self {
        match code.trim() {
            "D" => OpenStatus::Dropped,
            "G" => OpenStatus::GraceDropped,
            _ => OpenStatus::Active,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            OpenStatus::Active => "Y",
            OpenStatus::Dropped => "D",
            OpenStatus::GraceDropped => "G",
        }
    }

    pub fn is_dropped(self) -> bool {
        !matches!(self, OpenStatus::Active)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub student_id: String,
    pub term_id: String,
    pub course_id: String,
    pub section: String,
    pub open_status: OpenStatus,
    pub last_roll_date: Option<NaiveDate>,
    pub course_grade: Option<String>,
    /// Set on incompletes carried in from an earlier term.
    pub incomplete_deadline: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointType {
    Review,
    Unit,
    Final,
}

impl CheckpointType {
    /// Milestone type code used by the pacing schedule.
    pub fn milestone_code(self) -> &'static str {
        match self {
            CheckpointType::Review => "RE",
            CheckpointType::Unit => "UE",
            CheckpointType::Final => "FE",
        }
    }
}

impl FromStr for CheckpointType {
    type Err = AnalysisError;

    /// Accepts exam-type codes (`R`), milestone codes (`RE`) and plain names.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "R" | "RE" | "REVIEW" => Ok(CheckpointType::Review),
            "U" | "UE" | "UNIT" => Ok(CheckpointType::Unit),
            "F" | "FE" | "FINAL" => Ok(CheckpointType::Final),
            _ => Err(AnalysisError::UnknownCheckpointType(value.to_string())),
        }
    }
}

impl fmt::Display for CheckpointType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.milestone_code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointAttempt {
    pub student_id: String,
    pub course_id: String,
    pub unit: u8,
    pub checkpoint: CheckpointType,
    pub attempt_date: NaiveDate,
    pub attempt_time: Option<NaiveTime>,
    pub passed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseMilestone {
    pub term_id: String,
    pub pace: u8,
    pub pace_track: String,
    pub number: u16,
    pub checkpoint: CheckpointType,
    pub scheduled: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MilestoneOverride {
    pub student_id: String,
    pub term_id: String,
    pub pace_track: String,
    pub number: u16,
    pub checkpoint: CheckpointType,
    pub override_date: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Season {
    Fall,
    Spring,
    Summer,
}

impl FromStr for Season {
    type Err = AnalysisError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "FA" | "FALL" => Ok(Season::Fall),
            "SP" | "SPRING" => Ok(Season::Spring),
            "SM" | "SUMMER" => Ok(Season::Summer),
            _ => Err(AnalysisError::UnknownSeason(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Term {
    pub term_id: String,
    pub season: Season,
    pub census_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermWeek {
    pub term_id: String,
    pub week_number: u8,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_type_accepts_exam_and_milestone_codes() {
        assert_eq!("R".parse::<CheckpointType>().unwrap(), CheckpointType::Review);
        assert_eq!("re".parse::<CheckpointType>().unwrap(), CheckpointType::Review);
        assert_eq!("UE".parse::<CheckpointType>().unwrap(), CheckpointType::Unit);
        assert_eq!("final".parse::<CheckpointType>().unwrap(), CheckpointType::Final);
        assert!("X".parse::<CheckpointType>().is_err());
    }

    #[test]
    fn open_status_codes() {
        assert_eq!(OpenStatus::from_code("D"), OpenStatus::Dropped);
        assert_eq!(OpenStatus::from_code(" G "), OpenStatus::GraceDropped);
        assert_eq!(OpenStatus::from_code("Y"), OpenStatus::Active);
        assert_eq!(OpenStatus::from_code(""), OpenStatus::Active);
        assert!(OpenStatus::GraceDropped.is_dropped());
        assert!(!OpenStatus::Active.is_dropped());
    }
}
