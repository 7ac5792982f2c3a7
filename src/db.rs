use std::path::Path;

use anyhow::Context;
use chrono::NaiveDate;
use sqlx::{PgPool, Row};
use tracing::info;
use uuid::Uuid;

use crate::config::AnalysisConfig;
use crate::extract::{self, ExtractRows, TermExtract};
use crate::models::{
    BaseMilestone, CheckpointAttempt, CheckpointType, MilestoneOverride, OpenStatus, Registration,
    Season, Term, TermWeek,
};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Rows inserted or changed by an import, per table.
#[derive(Debug, Default)]
pub struct ImportSummary {
    pub terms: u64,
    pub registrations: u64,
    pub attempts: u64,
    pub milestones: u64,
    pub overrides: u64,
    pub weeks: u64,
    pub holidays: u64,
}

fn date_key(date: Option<NaiveDate>) -> String {
    date.map(|d| d.to_string()).unwrap_or_default()
}

/// Identifies a registration row across imports. Grade and incomplete
/// deadline are left out so a later extract updates them in place.
fn registration_key(row: &Registration) -> String {
    format!(
        "{}|{}|{}|{}|{}|{}",
        row.student_id,
        row.term_id,
        row.course_id,
        row.section,
        row.open_status.code(),
        date_key(row.last_roll_date)
    )
}

fn attempt_key(row: &CheckpointAttempt) -> String {
    format!(
        "{}|{}|{}|{}|{}|{}|{}",
        row.student_id,
        row.course_id,
        row.unit,
        row.checkpoint.milestone_code(),
        row.attempt_date,
        row.attempt_time.map(|t| t.to_string()).unwrap_or_default(),
        row.passed
    )
}

fn override_key(row: &MilestoneOverride) -> String {
    format!(
        "{}|{}|{}|{}|{}|{}",
        row.student_id,
        row.term_id,
        row.pace_track,
        row.number,
        row.checkpoint.milestone_code(),
        row.override_date
    )
}

const UPSERT_REGISTRATION: &str = r#"
    INSERT INTO pace_analytics.registrations
    (id, source_key, student_id, term_id, course_id, section, open_status,
     last_roll_date, course_grade, incomplete_deadline)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
    ON CONFLICT (source_key) DO UPDATE
    SET course_grade = EXCLUDED.course_grade,
        incomplete_deadline = EXCLUDED.incomplete_deadline
    WHERE (pace_analytics.registrations.course_grade,
           pace_analytics.registrations.incomplete_deadline)
        IS DISTINCT FROM (EXCLUDED.course_grade, EXCLUDED.incomplete_deadline)
"#;

/// Loads a CSV extract directory into Postgres. Re-importing the same files
/// writes nothing new; grades, schedule dates and term weeks are updated in place.
pub async fn import_extract(pool: &PgPool, dir: &Path) -> anyhow::Result<ImportSummary> {
    let terms = extract::read_terms(&dir.join("terms.csv"))?;
    let rows = extract::read_rows(dir)?;
    let mut summary = ImportSummary::default();
    let mut tx = pool.begin().await?;

    for term in &terms {
        let result = sqlx::query(
            r#"
            INSERT INTO pace_analytics.terms (term_id, season, census_date)
            VALUES ($1, $2, $3)
            ON CONFLICT (term_id) DO UPDATE
            SET season = EXCLUDED.season, census_date = EXCLUDED.census_date
            "#,
        )
        .bind(&term.term_id)
        .bind(season_code(term.season))
        .bind(term.census_date)
        .execute(&mut *tx)
        .await?;
        summary.terms += result.rows_affected();
    }

    for row in &rows.registrations {
        let result = sqlx::query(UPSERT_REGISTRATION)
            .bind(Uuid::new_v4())
            .bind(registration_key(row))
            .bind(&row.student_id)
            .bind(&row.term_id)
            .bind(&row.course_id)
            .bind(&row.section)
            .bind(row.open_status.code())
            .bind(row.last_roll_date)
            .bind(&row.course_grade)
            .bind(row.incomplete_deadline)
            .execute(&mut *tx)
            .await?;
        summary.registrations += result.rows_affected();
    }

    for row in &rows.attempts {
        let result = sqlx::query(
            r#"
            INSERT INTO pace_analytics.checkpoint_attempts
            (id, source_key, student_id, course_id, unit, exam_type,
             attempt_date, attempt_time, passed)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (source_key) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(attempt_key(row))
        .bind(&row.student_id)
        .bind(&row.course_id)
        .bind(i16::from(row.unit))
        .bind(row.checkpoint.milestone_code())
        .bind(row.attempt_date)
        .bind(row.attempt_time)
        .bind(row.passed)
        .execute(&mut *tx)
        .await?;
        summary.attempts += result.rows_affected();
    }

    for row in &rows.milestones {
        let result = sqlx::query(
            r#"
            INSERT INTO pace_analytics.milestones
            (term_id, pace, pace_track, ms_nbr, ms_type, ms_date)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (term_id, pace, pace_track, ms_nbr, ms_type) DO UPDATE
            SET ms_date = EXCLUDED.ms_date
            WHERE pace_analytics.milestones.ms_date <> EXCLUDED.ms_date
            "#,
        )
        .bind(&row.term_id)
        .bind(i16::from(row.pace))
        .bind(&row.pace_track)
        .bind(i32::from(row.number))
        .bind(row.checkpoint.milestone_code())
        .bind(row.scheduled)
        .execute(&mut *tx)
        .await?;
        summary.milestones += result.rows_affected();
    }

    for row in &rows.overrides {
        let result = sqlx::query(
            r#"
            INSERT INTO pace_analytics.milestone_overrides
            (id, source_key, student_id, term_id, pace_track, ms_nbr, ms_type, ms_date)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (source_key) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(override_key(row))
        .bind(&row.student_id)
        .bind(&row.term_id)
        .bind(&row.pace_track)
        .bind(i32::from(row.number))
        .bind(row.checkpoint.milestone_code())
        .bind(row.override_date)
        .execute(&mut *tx)
        .await?;
        summary.overrides += result.rows_affected();
    }

    for row in &rows.weeks {
        let result = sqlx::query(
            r#"
            INSERT INTO pace_analytics.term_weeks (term_id, week_nbr, start_date, end_date)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (term_id, week_nbr) DO UPDATE
            SET start_date = EXCLUDED.start_date, end_date = EXCLUDED.end_date
            WHERE (pace_analytics.term_weeks.start_date, pace_analytics.term_weeks.end_date)
                <> (EXCLUDED.start_date, EXCLUDED.end_date)
            "#,
        )
        .bind(&row.term_id)
        .bind(i16::from(row.week_number))
        .bind(row.start_date)
        .bind(row.end_date)
        .execute(&mut *tx)
        .await?;
        summary.weeks += result.rows_affected();
    }

    for holiday in &rows.holidays {
        let result = sqlx::query(
            "INSERT INTO pace_analytics.holidays (holiday_date) VALUES ($1) ON CONFLICT DO NOTHING",
        )
        .bind(holiday)
        .execute(&mut *tx)
        .await?;
        summary.holidays += result.rows_affected();
    }

    tx.commit().await?;
    Ok(summary)
}

fn season_code(season: Season) -> &'static str {
    match season {
        Season::Fall => "FA",
        Season::Spring => "SP",
        Season::Summer => "SM",
    }
}

fn small(value: i16, column: &str) -> anyhow::Result<u8> {
    u8::try_from(value).with_context(|| format!("{column} out of range: {value}"))
}

/// Reads everything the analyses need for one term.
pub async fn load_extract(
    pool: &PgPool,
    term_id: &str,
    config: &AnalysisConfig,
) -> anyhow::Result<TermExtract> {
    let term_row = sqlx::query(
        "SELECT term_id, season, census_date FROM pace_analytics.terms WHERE term_id = $1",
    )
    .bind(term_id)
    .fetch_optional(pool)
    .await?
    .with_context(|| format!("term {term_id} not found"))?;

    let term = Term {
        term_id: term_row.get("term_id"),
        season: term_row.get::<String, _>("season").parse()?,
        census_date: term_row.get("census_date"),
    };

    let mut rows = ExtractRows::default();

    let records = sqlx::query(
        "SELECT student_id, term_id, course_id, section, open_status, last_roll_date, \
         course_grade, incomplete_deadline \
         FROM pace_analytics.registrations WHERE term_id = $1",
    )
    .bind(term_id)
    .fetch_all(pool)
    .await?;

    for row in records {
        rows.registrations.push(Registration {
            student_id: row.get("student_id"),
            term_id: row.get("term_id"),
            course_id: row.get("course_id"),
            section: row.get("section"),
            open_status: OpenStatus::from_code(&row.get::<String, _>("open_status")),
            last_roll_date: row.get("last_roll_date"),
            course_grade: row.get("course_grade"),
            incomplete_deadline: row.get("incomplete_deadline"),
        });
    }

    let records = sqlx::query(
        "SELECT a.student_id, a.course_id, a.unit, a.exam_type, \
         a.attempt_date, a.attempt_time, a.passed \
         FROM pace_analytics.checkpoint_attempts a \
         WHERE a.student_id IN \
         (SELECT DISTINCT r.student_id FROM pace_analytics.registrations r WHERE r.term_id = $1)",
    )
    .bind(term_id)
    .fetch_all(pool)
    .await?;

    for row in records {
        rows.attempts.push(CheckpointAttempt {
            student_id: row.get("student_id"),
            course_id: row.get("course_id"),
            unit: small(row.get("unit"), "unit")?,
            checkpoint: row.get::<String, _>("exam_type").parse::<CheckpointType>()?,
            attempt_date: row.get("attempt_date"),
            attempt_time: row.get("attempt_time"),
            passed: row.get("passed"),
        });
    }

    let records = sqlx::query(
        "SELECT term_id, pace, pace_track, ms_nbr, ms_type, ms_date \
         FROM pace_analytics.milestones WHERE term_id = $1",
    )
    .bind(term_id)
    .fetch_all(pool)
    .await?;

    for row in records {
        rows.milestones.push(BaseMilestone {
            term_id: row.get("term_id"),
            pace: small(row.get("pace"), "pace")?,
            pace_track: row.get("pace_track"),
            number: u16::try_from(row.get::<i32, _>("ms_nbr")).context("ms_nbr out of range")?,
            checkpoint: row.get::<String, _>("ms_type").parse::<CheckpointType>()?,
            scheduled: row.get("ms_date"),
        });
    }

    let records = sqlx::query(
        "SELECT student_id, term_id, pace_track, ms_nbr, ms_type, ms_date \
         FROM pace_analytics.milestone_overrides WHERE term_id = $1",
    )
    .bind(term_id)
    .fetch_all(pool)
    .await?;

    for row in records {
        rows.overrides.push(MilestoneOverride {
            student_id: row.get("student_id"),
            term_id: row.get("term_id"),
            pace_track: row.get("pace_track"),
            number: u16::try_from(row.get::<i32, _>("ms_nbr")).context("ms_nbr out of range")?,
            checkpoint: row.get::<String, _>("ms_type").parse::<CheckpointType>()?,
            override_date: row.get("ms_date"),
        });
    }

    let records = sqlx::query(
        "SELECT term_id, week_nbr, start_date, end_date \
         FROM pace_analytics.term_weeks WHERE term_id = $1",
    )
    .bind(term_id)
    .fetch_all(pool)
    .await?;

    for row in records {
        rows.weeks.push(TermWeek {
            term_id: row.get("term_id"),
            week_number: small(row.get("week_nbr"), "week_nbr")?,
            start_date: row.get("start_date"),
            end_date: row.get("end_date"),
        });
    }

    rows.holidays = sqlx::query("SELECT holiday_date FROM pace_analytics.holidays")
        .fetch_all(pool)
        .await?
        .iter()
        .map(|row| row.get("holiday_date"))
        .collect();

    info!(
        term_id,
        registrations = rows.registrations.len(),
        attempts = rows.attempts.len(),
        milestones = rows.milestones.len(),
        overrides = rows.overrides.len(),
        "loaded term from postgres"
    );

    Ok(TermExtract::new(term, rows, config))
}
