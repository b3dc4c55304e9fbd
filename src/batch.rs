//! Sequential batch scoring
//!
//! Rows are evaluated one at a time, in input order. A failed evaluation
//! becomes a sentinel row rather than aborting the run, so the output always
//! has one row per case.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cases::{CaseTable, PatientCase, PreconditionError};
use crate::evaluator::{RiskAssessment, RiskEvaluator};

/// Score recorded for rows whose evaluation failed
pub const FAILURE_SCORE: i64 = -1;
/// Level recorded for rows whose evaluation failed
pub const FAILURE_LEVEL: &str = "Error";
/// Separator used when flattening justification bullets
pub const JUSTIFICATION_SEPARATOR: &str = " | ";

/// One output row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchResult {
    pub id: String,
    pub score: i64,
    pub level: String,
    pub justification: String,
}

impl BatchResult {
    pub fn success(id: &str, assessment: RiskAssessment) -> Self {
        Self {
            id: id.to_string(),
            score: assessment.score,
            level: assessment.level,
            justification: assessment.justification.join(JUSTIFICATION_SEPARATOR),
        }
    }

    pub fn failure(id: &str, error: impl std::fmt::Display) -> Self {
        Self {
            id: id.to_string(),
            score: FAILURE_SCORE,
            level: FAILURE_LEVEL.to_string(),
            justification: format!("Error: {}", error),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.score == FAILURE_SCORE && self.level == FAILURE_LEVEL
    }
}

/// Progress after each processed row
#[derive(Debug, Clone, Copy)]
pub struct BatchProgress<'a> {
    /// 1-based count of rows processed so far
    pub done: usize,
    pub total: usize,
    pub id: &'a str,
}

impl BatchProgress<'_> {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.done as f64 / self.total as f64
        }
    }
}

/// A finished batch run
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub run_id: Uuid,
    pub model: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Sorted by score descending, ties in input order
    pub rows: Vec<BatchResult>,
}

impl BatchReport {
    pub fn failures(&self) -> usize {
        self.rows.iter().filter(|r| r.is_failure()).count()
    }
}

/// Validate the table, then score every case
pub async fn run_batch<F>(
    evaluator: &RiskEvaluator,
    table: &CaseTable,
    on_progress: F,
) -> Result<BatchReport, PreconditionError>
where
    F: FnMut(BatchProgress<'_>),
{
    let cases = table.patient_cases()?;
    Ok(run_cases(evaluator, &cases, on_progress).await)
}

/// Score already-validated cases. Never fails: row errors become sentinel rows.
pub async fn run_cases<F>(
    evaluator: &RiskEvaluator,
    cases: &[PatientCase],
    mut on_progress: F,
) -> BatchReport
where
    F: FnMut(BatchProgress<'_>),
{
    let run_id = Uuid::new_v4();
    let started_at = Utc::now();
    let total = cases.len();
    info!("Batch {} starting: {} cases, model {}", run_id, total, evaluator.model_name());

    let mut rows = Vec::with_capacity(total);
    for (index, case) in cases.iter().enumerate() {
        let row = match evaluator.evaluate(&case.summary()).await {
            Ok(assessment) => {
                info!("Case {}: score {} ({})", case.id, assessment.score, assessment.level);
                BatchResult::success(&case.id, assessment)
            }
            Err(e) => {
                warn!("Case {} failed: {}", case.id, e);
                BatchResult::failure(&case.id, e)
            }
        };
        rows.push(row);

        on_progress(BatchProgress {
            done: index + 1,
            total,
            id: &case.id,
        });
    }

    sort_by_score(&mut rows);

    let report = BatchReport {
        run_id,
        model: evaluator.model_name().to_string(),
        started_at,
        finished_at: Utc::now(),
        rows,
    };
    info!(
        "Batch {} complete: {} rows, {} failures",
        run_id,
        report.rows.len(),
        report.failures()
    );
    report
}

/// Highest score first. `sort_by` is stable, so ties keep input order.
pub fn sort_by_score(rows: &mut [BatchResult]) {
    rows.sort_by(|a, b| b.score.cmp(&a.score));
}
