//! Layered configuration for the analysis runs.
//!
//! Sources, highest priority first:
//! 1. Environment variables prefixed `PACE_` (`__` separates nested keys,
//!    so `PACE_TRACKS__LATE_START_SECTIONS` maps to `tracks.late_start_sections`)
//! 2. `pace-analytics.toml` in the working directory, or the file passed with `--config`
//! 3. Built-in defaults

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::aggregate::MAX_SLOTS;
use crate::models::CheckpointType;

pub const DEFAULT_CONFIG_FILE: &str = "pace-analytics.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration error: {0}")]
    Figment(#[from] Box<figment::Error>),

    #[error("invalid configuration value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AnalysisConfig {
    /// Course id to the section numbers included in the analysis.
    pub courses: BTreeMap<String, Vec<String>>,
    /// Alternate course ids (as seen on exam rows) to their canonical id.
    pub course_aliases: BTreeMap<String, String>,
    pub review_units: Vec<u8>,
    pub checkpoint_type: CheckpointType,
    pub passing_grades: Vec<String>,
    pub excluded_sections: Vec<String>,
    pub weeks_regular: u8,
    pub weeks_summer: u8,
    pub tracks: TrackRules,
}

/// Course and section lists driving pace-track selection.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TrackRules {
    pub standard_sections: Vec<String>,
    pub late_start_sections: Vec<String>,
    /// Single courses that put a 1-course pace on track B.
    pub late_sequence_courses: Vec<String>,
    /// The course that keeps a 2-course pace on track A.
    pub pair_anchor_course: String,
}

impl Default for TrackRules {
    fn default() -> Self {
        Self {
            standard_sections: strings(&["001", "801", "809"]),
            late_start_sections: strings(&["002"]),
            late_sequence_courses: strings(&["M 118", "M 125", "M 126"]),
            pair_anchor_course: "M 117".to_string(),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        let sections = strings(&["001", "002", "401", "801", "809"]);
        let courses = ["M 117", "M 118", "M 124", "M 125", "M 126"]
            .iter()
            .map(|course| (course.to_string(), sections.clone()))
            .collect();
        let course_aliases = ["117", "118", "124", "125", "126"]
            .iter()
            .map(|number| (format!("MATH {number}"), format!("M {number}")))
            .collect();

        Self {
            courses,
            course_aliases,
            review_units: vec![1, 2, 3, 4],
            checkpoint_type: CheckpointType::Review,
            passing_grades: strings(&["A", "B", "C", "S"]),
            excluded_sections: strings(&["550"]),
            weeks_regular: 15,
            weeks_summer: 12,
            tracks: TrackRules::default(),
        }
    }
}

impl AnalysisConfig {
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config: Self = Self::figment(path).extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    pub fn figment(path: Option<&Path>) -> Figment {
        let file = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if file.exists() {
            figment = figment.merge(Toml::file(file));
        }
        figment.merge(Env::prefixed("PACE_").split("__"))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.courses.is_empty() {
            return Err(invalid("courses", "at least one course must be included"));
        }
        // pace is one digit of the milestone number and one aggregator slot per course
        if self.courses.len() > MAX_SLOTS {
            return Err(invalid(
                "courses",
                &format!("at most {MAX_SLOTS} courses can be included, got {}", self.courses.len()),
            ));
        }
        if self.review_units.iter().any(|unit| !(1..=9).contains(unit)) {
            return Err(invalid("review_units", "units must be between 1 and 9"));
        }
        if self.weeks_regular == 0 || self.weeks_summer == 0 {
            return Err(invalid("weeks_regular", "term length must be at least one week"));
        }
        Ok(())
    }

    /// Canonical id for a course, resolving aliases.
    pub fn canonical_course<'a>(&'a self, course_id: &'a str) -> &'a str {
        let trimmed = course_id.trim();
        self.course_aliases
            .get(trimmed)
            .map(String::as_str)
            .unwrap_or(trimmed)
    }

    pub fn includes(&self, course_id: &str, section: &str) -> bool {
        self.courses
            .get(course_id)
            .is_some_and(|sections| sections.iter().any(|s| s == section))
    }

    pub fn is_passing_grade(&self, grade: &str) -> bool {
        self.passing_grades.iter().any(|g| g == grade.trim())
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}
