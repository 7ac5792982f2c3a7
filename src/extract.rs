//! Point-in-time data extract for one term, held in memory for the
//! inference passes.
//!
//! An extract comes from Postgres (see `db::load_extract`) or from a
//! directory of CSV files with these names:
//! `terms.csv`, `registrations.csv`, `attempts.csv`, `milestones.csv`,
//! `overrides.csv`, `term_weeks.csv`, `holidays.csv`.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use anyhow::Context;
use chrono::{NaiveDate, NaiveTime};
use serde::Deserialize;

use crate::config::AnalysisConfig;
use crate::models::{
    BaseMilestone, CheckpointAttempt, CheckpointType, MilestoneOverride, OpenStatus, Registration,
    Season, Term, TermWeek,
};

/// One student's slice of the extract.
#[derive(Debug, Clone, Copy)]
pub struct StudentRecords<'a> {
    pub student_id: &'a str,
    pub registrations: &'a [Registration],
    pub attempts: &'a [CheckpointAttempt],
    pub overrides: &'a [MilestoneOverride],
}

#[derive(Debug, Clone)]
pub struct TermExtract {
    pub term: Term,
    registrations: BTreeMap<String, Vec<Registration>>,
    attempts: HashMap<String, Vec<CheckpointAttempt>>,
    overrides: HashMap<String, Vec<MilestoneOverride>>,
    milestones: Vec<BaseMilestone>,
    weeks: Vec<TermWeek>,
    holidays: BTreeSet<NaiveDate>,
}

#[derive(Debug, Default)]
pub struct ExtractRows {
    pub registrations: Vec<Registration>,
    pub attempts: Vec<CheckpointAttempt>,
    pub milestones: Vec<BaseMilestone>,
    pub overrides: Vec<MilestoneOverride>,
    pub weeks: Vec<TermWeek>,
    pub holidays: Vec<NaiveDate>,
}

impl TermExtract {
    /// Groups raw rows by student, keeping only the term's rows and mapping
    /// course aliases to canonical ids. Attempts are kept for every term.
    pub fn new(term: Term, rows: ExtractRows, config: &AnalysisConfig) -> Self {
        let term_id = term.term_id.clone();

        let mut registrations: BTreeMap<String, Vec<Registration>> = BTreeMap::new();
        for mut row in rows.registrations.into_iter().filter(|r| r.term_id == term_id) {
            row.course_id = config.canonical_course(&row.course_id).to_string();
            registrations.entry(row.student_id.clone()).or_default().push(row);
        }

        let mut attempts: HashMap<String, Vec<CheckpointAttempt>> = HashMap::new();
        for mut row in rows.attempts {
            if !registrations.contains_key(&row.student_id) {
                continue;
            }
            row.course_id = config.canonical_course(&row.course_id).to_string();
            attempts.entry(row.student_id.clone()).or_default().push(row);
        }

        let mut overrides: HashMap<String, Vec<MilestoneOverride>> = HashMap::new();
        for row in rows.overrides.into_iter().filter(|o| o.term_id == term_id) {
            overrides.entry(row.student_id.clone()).or_default().push(row);
        }

        Self {
            term,
            registrations,
            attempts,
            overrides,
            milestones: rows.milestones.into_iter().filter(|m| m.term_id == term_id).collect(),
            weeks: rows.weeks.into_iter().filter(|w| w.term_id == term_id).collect(),
            holidays: rows.holidays.into_iter().collect(),
        }
    }

    /// Reads every extract file in `dir` and keeps the rows for `term_id`.
    pub fn load_dir(dir: &Path, term_id: &str, config: &AnalysisConfig) -> anyhow::Result<Self> {
        let term = read_terms(&dir.join("terms.csv"))?
            .into_iter()
            .find(|t| t.term_id == term_id)
            .with_context(|| format!("term {term_id} not found in {}", dir.display()))?;

        Ok(Self::new(term, read_rows(dir)?, config))
    }

    /// Student ids with at least one registration in the term, ascending.
    pub fn students(&self) -> impl Iterator<Item = &str> + '_ {
        self.registrations.keys().map(String::as_str)
    }

    pub fn student_count(&self) -> usize {
        self.registrations.len()
    }

    pub fn registrations(&self, student_id: &str) -> &[Registration] {
        self.registrations.get(student_id).map_or(&[], Vec::as_slice)
    }

    pub fn checkpoint_attempts(&self, student_id: &str) -> &[CheckpointAttempt] {
        self.attempts.get(student_id).map_or(&[], Vec::as_slice)
    }

    pub fn overrides(&self, student_id: &str) -> &[MilestoneOverride] {
        self.overrides.get(student_id).map_or(&[], Vec::as_slice)
    }

    pub fn base_milestones(&self) -> &[BaseMilestone] {
        &self.milestones
    }

    pub fn weeks(&self) -> &[TermWeek] {
        &self.weeks
    }

    pub fn holidays(&self) -> &BTreeSet<NaiveDate> {
        &self.holidays
    }

    pub fn student_records<'a>(&'a self, student_id: &'a str) -> StudentRecords<'a> {
        StudentRecords {
            student_id,
            registrations: self.registrations(student_id),
            attempts: self.checkpoint_attempts(student_id),
            overrides: self.overrides(student_id),
        }
    }
}

#[derive(Deserialize)]
struct TermRow {
    term_id: String,
    season: String,
    census_date: Option<NaiveDate>,
}

#[derive(Deserialize)]
struct RegistrationRow {
    student_id: String,
    term_id: String,
    course_id: String,
    section: String,
    open_status: Option<String>,
    last_roll_date: Option<NaiveDate>,
    course_grade: Option<String>,
    incomplete_deadline: Option<NaiveDate>,
}

#[derive(Deserialize)]
struct AttemptRow {
    student_id: String,
    course_id: String,
    unit: u8,
    exam_type: String,
    attempt_date: NaiveDate,
    attempt_time: Option<NaiveTime>,
    passed: String,
}

#[derive(Deserialize)]
struct MilestoneRow {
    term_id: String,
    pace: u8,
    pace_track: String,
    ms_nbr: u16,
    ms_type: String,
    ms_date: NaiveDate,
}

#[derive(Deserialize)]
struct OverrideRow {
    student_id: String,
    term_id: String,
    pace_track: String,
    ms_nbr: u16,
    ms_type: String,
    ms_date: NaiveDate,
}

#[derive(Deserialize)]
struct WeekRow {
    term_id: String,
    week_nbr: u8,
    start_date: NaiveDate,
    end_date: NaiveDate,
}

#[derive(Deserialize)]
struct HolidayRow {
    holiday_date: NaiveDate,
}

fn read_csv<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<Vec<T>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;

    let mut rows = Vec::new();
    for (line, result) in reader.deserialize::<T>().enumerate() {
        rows.push(result.with_context(|| format!("{}: bad record {}", path.display(), line + 1))?);
    }
    Ok(rows)
}

fn is_yes(flag: &str) -> bool {
    matches!(flag.trim().to_ascii_uppercase().as_str(), "Y" | "YES" | "TRUE" | "1")
}

pub fn read_terms(path: &Path) -> anyhow::Result<Vec<Term>> {
    read_csv::<TermRow>(path)?
        .into_iter()
        .map(|row| {
            Ok(Term {
                season: row.season.parse::<Season>()?,
                term_id: row.term_id,
                census_date: row.census_date,
            })
        })
        .collect()
}

/// Reads every row file of an extract directory. Missing optional files
/// (`overrides.csv`, `holidays.csv`) read as empty.
pub fn read_rows(dir: &Path) -> anyhow::Result<ExtractRows> {
    let registrations = read_csv::<RegistrationRow>(&dir.join("registrations.csv"))?
        .into_iter()
        .map(|row| Registration {
            student_id: row.student_id,
            term_id: row.term_id,
            course_id: row.course_id,
            section: row.section,
            open_status: OpenStatus::from_code(row.open_status.as_deref().unwrap_or("")),
            last_roll_date: row.last_roll_date,
            course_grade: row.course_grade.filter(|g| !g.is_empty()),
            incomplete_deadline: row.incomplete_deadline,
        })
        .collect();

    let attempts = read_csv::<AttemptRow>(&dir.join("attempts.csv"))?
        .into_iter()
        .map(|row| {
            Ok(CheckpointAttempt {
                checkpoint: row.exam_type.parse::<CheckpointType>()?,
                student_id: row.student_id,
                course_id: row.course_id,
                unit: row.unit,
                attempt_date: row.attempt_date,
                attempt_time: row.attempt_time,
                passed: is_yes(&row.passed),
            })
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let milestones = read_csv::<MilestoneRow>(&dir.join("milestones.csv"))?
        .into_iter()
        .map(|row| {
            Ok(BaseMilestone {
                checkpoint: row.ms_type.parse::<CheckpointType>()?,
                term_id: row.term_id,
                pace: row.pace,
                pace_track: row.pace_track,
                number: row.ms_nbr,
                scheduled: row.ms_date,
            })
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let overrides_path = dir.join("overrides.csv");
    let overrides = if overrides_path.exists() {
        read_csv::<OverrideRow>(&overrides_path)?
            .into_iter()
            .map(|row| {
                Ok(MilestoneOverride {
                    checkpoint: row.ms_type.parse::<CheckpointType>()?,
                    student_id: row.student_id,
                    term_id: row.term_id,
                    pace_track: row.pace_track,
                    number: row.ms_nbr,
                    override_date: row.ms_date,
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?
    } else {
        Vec::new()
    };

    let weeks = read_csv::<WeekRow>(&dir.join("term_weeks.csv"))?
        .into_iter()
        .map(|row| TermWeek {
            term_id: row.term_id,
            week_number: row.week_nbr,
            start_date: row.start_date,
            end_date: row.end_date,
        })
        .collect();

    let holidays_path = dir.join("holidays.csv");
    let holidays = if holidays_path.exists() {
        read_csv::<HolidayRow>(&holidays_path)?
            .into_iter()
            .map(|row| row.holiday_date)
            .collect()
    } else {
        Vec::new()
    };

    Ok(ExtractRows {
        registrations,
        attempts,
        milestones,
        overrides,
        weeks,
        holidays,
    })
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::fs;
    use std::path::Path;

    /// Writes a small spring term: two students, one in a two-course pace.
    pub fn write_extract(dir: &Path) {
        fs::write(
            dir.join("terms.csv"),
            "term_id,season,census_date\nSP25,SP,2025-01-29\nFA24,FA,2024-09-04\n",
        )
        .unwrap();
        fs::write(
            dir.join("registrations.csv"),
            "student_id,term_id,course_id,section,open_status,\
             last_roll_date,course_grade,incomplete_deadline\n\
             830000001,SP25,M 117,001,Y,2025-05-09,B,\n\
             830000001,SP25,M 118,001,Y,2025-05-09,F,\n\
             830000002,SP25,M 125,001,Y,2025-05-09,A,\n\
             830000002,SP25,M 126,001,D,2025-01-24,W,\n\
             830000003,FA24,M 117,001,Y,2024-12-13,A,\n",
        )
        .unwrap();
        fs::write(
            dir.join("attempts.csv"),
            "student_id,course_id,unit,exam_type,attempt_date,attempt_time,passed\n\
             830000001,MATH 118,1,R,2025-01-22,10:15:00,Y\n\
             830000001,M 117,1,R,2025-01-27,,Y\n\
             830000001,M 118,2,R,2025-02-10,,N\n\
             830000002,M 125,1,R,2025-01-23,09:00:00,Y\n\
             830000002,M 125,2,R,2025-02-05,,Y\n",
        )
        .unwrap();
        fs::write(
            dir.join("milestones.csv"),
            "term_id,pace,pace_track,ms_nbr,ms_type,ms_date\n\
             SP25,1,B,111,RE,2025-01-24\n\
             SP25,1,B,112,RE,2025-01-31\n\
             SP25,2,A,211,RE,2025-01-24\n\
             SP25,2,A,212,RE,2025-01-29\n\
             SP25,2,A,221,RE,2025-01-30\n\
             SP25,2,A,222,RE,2025-02-04\n",
        )
        .unwrap();
        fs::write(
            dir.join("overrides.csv"),
            "student_id,term_id,pace_track,ms_nbr,ms_type,ms_date\n\
             830000002,SP25,B,112,RE,2025-02-07\n",
        )
        .unwrap();
        fs::write(
            dir.join("term_weeks.csv"),
            "term_id,week_nbr,start_date,end_date\n\
             SP25,0,2025-01-13,2025-01-19\n\
             SP25,1,2025-01-20,2025-01-26\n\
             SP25,2,2025-01-27,2025-02-02\n\
             SP25,3,2025-02-03,2025-02-09\n",
        )
        .unwrap();
        fs::write(dir.join("holidays.csv"), "holiday_date\n2025-01-20\n").unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn loads_a_term_from_csv_extract() {
        let temp = TempDir::new().unwrap();
        fixtures::write_extract(temp.path());
        let config = AnalysisConfig::default();

        let extract = TermExtract::load_dir(temp.path(), "SP25", &config).unwrap();
        assert_eq!(extract.term.season, Season::Spring);
        assert_eq!(extract.students().collect::<Vec<_>>(), vec!["830000001", "830000002"]);
        assert_eq!(extract.registrations("830000002").len(), 2);
        assert_eq!(extract.base_milestones().len(), 6);
        assert_eq!(extract.weeks().len(), 4);
        assert_eq!(extract.overrides("830000002").len(), 1);
        assert!(extract.overrides("830000001").is_empty());

        let attempts = extract.checkpoint_attempts("830000001");
        assert_eq!(attempts.len(), 3);
        assert_eq!(attempts[0].course_id, "M 118");
        assert_eq!(attempts[0].attempt_time, NaiveTime::from_hms_opt(10, 15, 0));
        assert!(!attempts[2].passed);
    }

    #[test]
    fn unknown_term_is_an_error() {
        let temp = TempDir::new().unwrap();
        fixtures::write_extract(temp.path());
        let err =
            TermExtract::load_dir(temp.path(), "SM25", &AnalysisConfig::default()).unwrap_err();
        assert!(err.to_string().contains("SM25"));
    }

    #[test]
    fn optional_files_may_be_absent() {
        let temp = TempDir::new().unwrap();
        fixtures::write_extract(temp.path());
        std::fs::remove_file(temp.path().join("overrides.csv")).unwrap();
        std::fs::remove_file(temp.path().join("holidays.csv")).unwrap();

        let rows = read_rows(temp.path()).unwrap();
        assert!(rows.overrides.is_empty());
        assert!(rows.holidays.is_empty());
        assert_eq!(rows.registrations.len(), 5);
    }
}
