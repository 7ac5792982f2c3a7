use std::fmt::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::NaiveDate;
use serde::Serialize;
use uuid::Uuid;

use crate::aggregate::{OutcomeAggregator, MAX_SLOTS};
use crate::completion::CompletionBatch;
use crate::pipeline::{daily_average, DayProgress, ProgressBatch, StudentProgress};

/// Per-day metrics written as one CSV each by `write_progress_csvs`.
const DAILY_METRICS: [(&str, fn(&DayProgress) -> f64); 5] = [
    ("pace_by_day", |d| f64::from(d.pace)),
    ("passed_on_time_by_day", |d| f64::from(d.tally.on_time)),
    ("passed_late_by_day", |d| f64::from(d.tally.late)),
    ("due_not_passed_by_day", |d| f64::from(d.tally.due_not_passed)),
    ("completion_rate_by_day", |d| d.tally.completion_rate()),
];

/// Blank for an undefined rate.
pub fn format_pct(rate: Option<f64>) -> String {
    rate.map(|value| format!("{:.1}%", value * 100.0)).unwrap_or_default()
}

pub fn format_expectation(value: Option<f64>) -> String {
    value.map(|v| format!("{v:.2}")).unwrap_or_default()
}

pub fn build_progress_report(term_id: &str, days: &[NaiveDate], batch: &ProgressBatch) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Review Progress History");
    let _ = writeln!(
        output,
        "Term {} across {} instructional days ({} students)",
        term_id,
        days.len(),
        batch.students.len()
    );
    if !batch.failed.is_empty() {
        let _ = writeln!(output, "{} students excluded after errors.", batch.failed.len());
    }
    if batch.canceled {
        let _ = writeln!(output, "Run was canceled; results are partial.");
    }
    let _ = writeln!(output);
    let _ = writeln!(output, "## Daily Averages");

    if batch.students.is_empty() {
        let _ = writeln!(output, "No students with included registrations.");
    } else {
        let pace = daily_average(&batch.students, |d| f64::from(d.pace));
        let completion = daily_average(&batch.students, |d| d.tally.completion_rate());
        for ((day, pace), completion) in days.iter().zip(pace).zip(completion) {
            let _ = writeln!(
                output,
                "- {}: pace {:.2}, reviews completed {}",
                day,
                pace,
                format_pct(Some(completion))
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Furthest Behind at Term End");

    let mut behind: Vec<(&StudentProgress, &DayProgress)> = batch
        .students
        .iter()
        .filter_map(|s| s.days.last().map(|d| (s, d)))
        .filter(|(_, d)| d.tally.due_not_passed > 0)
        .collect();
    behind.sort_by(|a, b| b.1.tally.due_not_passed.cmp(&a.1.tally.due_not_passed));

    if behind.is_empty() {
        let _ = writeln!(output, "No student has an overdue review on the last day.");
    } else {
        for (student, day) in behind.iter().take(10) {
            let _ = writeln!(
                output,
                "- {} (pace {}, track {}): {} overdue, {} late, {} on time",
                student.student_id,
                day.pace,
                day.track,
                day.tally.due_not_passed,
                day.tally.late,
                day.tally.on_time
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Schedule Gaps");

    if batch.missing.is_empty() {
        let _ = writeln!(output, "Every checkpoint resolved to a milestone.");
    } else {
        for (key, skipped) in &batch.missing {
            let _ = writeln!(output, "- {key}: {skipped} evaluations skipped");
        }
    }

    output
}

/// Writes one CSV per daily metric into `dir`: a row per student, a column
/// per day, and a closing AVERAGE row. Returns the files written.
pub fn write_progress_csvs(
    dir: &Path,
    prefix: &str,
    days: &[NaiveDate],
    students: &[StudentProgress],
) -> anyhow::Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;

    let mut header = vec!["Student".to_string()];
    header.extend(days.iter().map(|day| day.to_string()));

    let mut written = Vec::with_capacity(DAILY_METRICS.len());
    for (name, metric) in DAILY_METRICS {
        let path = dir.join(format!("{prefix}_{name}.csv"));
        let mut writer =
            csv::Writer::from_path(&path)
                .with_context(|| format!("failed to create {}", path.display()))?;

        writer.write_record(&header)?;
        for student in students {
            let mut record = vec![student.student_id.clone()];
            record.extend(student.days.iter().map(|d| metric(d).to_string()));
            writer.write_record(&record)?;
        }

        let mut average = vec!["AVERAGE".to_string()];
        average.extend(daily_average(students, metric).iter().map(|v| format!("{v:.4}")));
        writer.write_record(&average)?;
        writer.flush()?;

        written.push(path);
    }

    Ok(written)
}

pub fn build_completion_report(
    term_id: &str,
    census: NaiveDate,
    batch: &CompletionBatch,
) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Completion Rates by Course Combination");
    let _ = writeln!(
        output,
        "Term {} cohort on the roll at census {} ({} students)",
        term_id,
        census,
        batch.cohort_size()
    );
    if !batch.failed.is_empty() {
        let _ = writeln!(output, "{} students excluded after errors.", batch.failed.len());
    }
    if batch.canceled {
        let _ = writeln!(output, "Run was canceled; results are partial.");
    }

    for pace in 1..=MAX_SLOTS as u8 {
        let groups: Vec<_> = batch.by_pace(pace).collect();
        if groups.is_empty() {
            continue;
        }

        let _ = writeln!(output);
        let _ = writeln!(output, "## {pace}-Course Pace");

        for (key, aggregate) in groups {
            let _ = writeln!(output, "- {} (n={})", key, aggregate.cohort_size());
            for slot in 1..=aggregate.slot_count() {
                let _ = write!(
                    output,
                    "  - success in course {}: {}",
                    slot,
                    format_pct(aggregate.success_rate(slot))
                );
                if slot > 1 {
                    let _ = write!(
                        output,
                        " ({} if started)",
                        format_pct(aggregate.conditional_success_rate(slot))
                    );
                }
                let _ = writeln!(output);
            }
            if aggregate.slot_count() > 1 {
                let _ = writeln!(
                    output,
                    "  - expected courses passed: {}",
                    format_expectation(aggregate.expected_credits_passed())
                );
            }
        }
    }

    output
}

/// One CSV row per course combination. Rate columns run to the longest
/// pace; undefined or absent rates are left blank.
pub fn write_completion_csv(path: &Path, batch: &CompletionBatch) -> anyhow::Result<()> {
    let mut writer =
        csv::Writer::from_path(path)
            .with_context(|| format!("failed to create {}", path.display()))?;

    let mut header: Vec<String> = ["pace", "courses", "n"].iter().map(|s| s.to_string()).collect();
    for slot in 1..=MAX_SLOTS {
        header.push(format!("success_{slot}"));
        header.push(format!("success_if_started_{slot}"));
    }
    header.push("expected_courses_passed".to_string());
    writer.write_record(&header)?;

    for (key, aggregate) in &batch.groups {
        let mut record = vec![
            key.pace.to_string(),
            key.to_string(),
            aggregate.cohort_size().to_string(),
        ];
        for slot in 1..=MAX_SLOTS {
            record.push(rate_cell(aggregate.success_rate(slot)));
            record.push(rate_cell(aggregate.conditional_success_rate(slot)));
        }
        record.push(rate_cell(aggregate.expected_credits_passed()));
        writer.write_record(&record)?;
    }

    writer.flush()?;
    Ok(())
}

fn rate_cell(rate: Option<f64>) -> String {
    rate.map(|value| format!("{value:.4}")).unwrap_or_default()
}

#[derive(Debug, Serialize)]
struct CompletionGroupSummary<'a> {
    pace: u8,
    courses: &'a [String],
    n: u64,
    success: Vec<Option<f64>>,
    success_if_started: Vec<Option<f64>>,
    expected_courses_passed: Option<f64>,
}

#[derive(Debug, Serialize)]
struct CompletionSummary<'a> {
    run_id: Uuid,
    term_id: &'a str,
    census: NaiveDate,
    students: u64,
    excluded: &'a [String],
    groups: Vec<CompletionGroupSummary<'a>>,
}

/// Machine-readable form of the completion report; undefined rates are `null`.
pub fn completion_json(
    run_id: Uuid,
    term_id: &str,
    census: NaiveDate,
    batch: &CompletionBatch,
) -> anyhow::Result<String> {
    let groups = batch
        .groups
        .iter()
        .map(|(key, aggregate)| group_summary(&key.courses, key.pace, aggregate))
        .collect();

    let summary = CompletionSummary {
        run_id,
        term_id,
        census,
        students: batch.cohort_size(),
        excluded: &batch.failed,
        groups,
    };
    Ok(serde_json::to_string_pretty(&summary)?)
}

fn group_summary<'a>(
    courses: &'a [String],
    pace: u8,
    aggregate: &OutcomeAggregator,
) -> CompletionGroupSummary<'a> {
    let slots = 1..=aggregate.slot_count();
    CompletionGroupSummary {
        pace,
        courses,
        n: aggregate.cohort_size(),
        success: slots.clone().map(|i| aggregate.success_rate(i)).collect(),
        success_if_started: slots.map(|i| aggregate.conditional_success_rate(i)).collect(),
        expected_courses_passed: aggregate.expected_credits_passed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::SlotResult::{Failed, NotAttempted, Passed};
    use crate::completion::CohortKey;
    use crate::progress::ProgressTally;
    use tempfile::TempDir;

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, m, d).unwrap()
    }

    fn sample_batch() -> CompletionBatch {
        let mut trio = OutcomeAggregator::new(3).unwrap();
        trio.accumulate(&[Passed, Passed, Passed]).unwrap();
        trio.accumulate(&[Passed, Failed, NotAttempted]).unwrap();
        trio.accumulate(&[Passed, Passed, Failed]).unwrap();

        let mut batch = CompletionBatch::default();
        batch.groups.insert(
            CohortKey {
                pace: 3,
                courses: vec!["M 117".to_string(), "M 118".to_string(), "M 124".to_string()],
            },
            trio,
        );
        batch.groups.insert(
            CohortKey {
                pace: 1,
                courses: vec!["M 126".to_string()],
            },
            OutcomeAggregator::new(1).unwrap(),
        );
        batch
    }

    fn sample_progress() -> Vec<StudentProgress> {
        let tally = |on_time, due_not_passed| ProgressTally {
            on_time,
            late: 0,
            due_not_passed,
            not_yet_due: 0,
        };
        vec![
            StudentProgress {
                student_id: "830000001".to_string(),
                days: vec![
                    DayProgress {
                        date: date(2, 3),
                        pace: 2,
                        track: "A".to_string(),
                        tally: tally(1, 1),
                    },
                    DayProgress {
                        date: date(2, 4),
                        pace: 2,
                        track: "A".to_string(),
                        tally: tally(2, 2),
                    },
                ],
            },
            StudentProgress {
                student_id: "830000002".to_string(),
                days: vec![
                    DayProgress {
                        date: date(2, 3),
                        pace: 1,
                        track: "B".to_string(),
                        tally: tally(0, 0),
                    },
                    DayProgress {
                        date: date(2, 4),
                        pace: 1,
                        track: "B".to_string(),
                        tally: tally(1, 0),
                    },
                ],
            },
        ]
    }

    #[test]
    fn undefined_rates_render_blank() {
        assert_eq!(format_pct(None), "");
        assert_eq!(format_pct(Some(0.625)), "62.5%");
        assert_eq!(format_expectation(Some(2.0)), "2.00");
        assert_eq!(format_expectation(None), "");
    }

    #[test]
    fn completion_report_lists_each_combination() {
        let report = build_completion_report("FA25", date(9, 3), &sample_batch());
        assert!(report.contains("census 2025-09-03 (3 students)"));
        assert!(report.contains("## 3-Course Pace"));
        assert!(report.contains("- M 117+M 118+M 124 (n=3)"));
        assert!(report.contains("success in course 3: 33.3% (50.0% if started)"));
        assert!(report.contains("expected courses passed: 2.00"));
        assert!(report.contains("- M 126 (n=0)"));
        assert!(!report.contains("## 2-Course Pace"));
    }

    #[test]
    fn completion_csv_leaves_undefined_cells_blank() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("completion.csv");
        write_completion_csv(&path, &sample_batch()).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(headers.len(), 3 + 2 * MAX_SLOTS + 1);

        let rows: Vec<csv::StringRecord> = reader.records().map(Result::unwrap).collect();
        assert_eq!(rows.len(), 2);
        // pace 1 sorts first and has an empty cohort
        assert_eq!(&rows[0][1], "M 126");
        assert_eq!(&rows[0][3], "");
        assert_eq!(&rows[1][2], "3");
        assert_eq!(&rows[1][3], "1.0000");
        assert_eq!(&rows[1][13], "2.0000");
    }

    #[test]
    fn completion_json_uses_null_for_undefined() {
        let json = completion_json(Uuid::nil(), "FA25", date(9, 3), &sample_batch()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["students"], 3);
        assert_eq!(value["groups"][0]["success"][0], serde_json::Value::Null);
        let expected = value["groups"][1]["expected_courses_passed"].as_f64().unwrap();
        assert!((expected - 2.0).abs() < 1e-9);
    }

    #[test]
    fn progress_csvs_have_average_rows() {
        let temp = TempDir::new().unwrap();
        let students = sample_progress();
        let days = [date(2, 3), date(2, 4)];
        let written = write_progress_csvs(temp.path(), "SP25", &days, &students).unwrap();
        assert_eq!(written.len(), DAILY_METRICS.len());

        let pace_path = temp.path().join("SP25_pace_by_day.csv");
        let mut reader = csv::Reader::from_path(&pace_path).unwrap();
        assert_eq!(
            reader.headers().unwrap().iter().collect::<Vec<_>>(),
            vec!["Student", "2025-02-03", "2025-02-04"]
        );
        let rows: Vec<csv::StringRecord> = reader.records().map(Result::unwrap).collect();
        assert_eq!(rows.len(), 3);
        assert_eq!(&rows[2][0], "AVERAGE");
        assert_eq!(&rows[2][1], "1.5000");

        let rate_path = temp.path().join("SP25_completion_rate_by_day.csv");
        let rows: Vec<csv::StringRecord> = csv::Reader::from_path(&rate_path)
            .unwrap()
            .records()
            .map(Result::unwrap)
            .collect();
        assert_eq!(&rows[0][1], "0.5");
        assert_eq!(&rows[1][1], "1");
    }

    #[test]
    fn progress_report_ranks_students_by_overdue_reviews() {
        let batch = ProgressBatch {
            students: sample_progress(),
            ..ProgressBatch::default()
        };
        let report = build_progress_report("SP25", &[date(2, 3), date(2, 4)], &batch);
        assert!(report.contains("2 instructional days (2 students)"));
        assert!(report.contains("- 2025-02-03: pace 1.50, reviews completed 75.0%"));
        assert!(report.contains("- 830000001 (pace 2, track A): 2 overdue, 0 late, 2 on time"));
        assert!(!report.contains("830000002 (pace"));
        assert!(report.contains("Every checkpoint resolved to a milestone."));
    }
}
