//! Severity bands, terminal rendering and export of results

use std::fmt::Write as _;
use std::path::Path;
use thiserror::Error;
use tracing::info;

use crate::batch::BatchReport;
use crate::evaluator::RiskAssessment;

/// Column titles of the results table
pub const COLUMNS: [&str; 4] = ["ID", "IRC (Score)", "Nivel de Riesgo", "Justificación (IA)"];

const RESET: &str = "\x1b[0m";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Unsupported export format for {0:?} (use .csv or .json)")]
    UnsupportedFormat(std::path::PathBuf),

    #[error("Failed to write export: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to write CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("Failed to write JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Severity indicator keyed to score bands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskBand {
    Critical,
    High,
    Medium,
    Low,
    /// Negative scores (failed evaluations)
    Unscored,
}

impl RiskBand {
    pub fn from_score(score: i64) -> Self {
        match score {
            s if s >= 90 => Self::Critical,
            s if s >= 70 => Self::High,
            s if s >= 40 => Self::Medium,
            s if s >= 0 => Self::Low,
            _ => Self::Unscored,
        }
    }

    /// ANSI escape for the band: 24-bit background, foreground, bold
    pub fn ansi_style(&self) -> Option<&'static str> {
        match self {
            // #ff4b4b on white
            Self::Critical => Some("\x1b[1;38;2;255;255;255;48;2;255;75;75m"),
            // #ffa500 on black
            Self::High => Some("\x1b[1;38;2;0;0;0;48;2;255;165;0m"),
            // #8ecae6 on black
            Self::Medium => Some("\x1b[1;38;2;0;0;0;48;2;142;202;230m"),
            // #90ee90 on black
            Self::Low => Some("\x1b[1;38;2;0;0;0;48;2;144;238;144m"),
            Self::Unscored => None,
        }
    }
}

fn paint(text: &str, band: RiskBand, color: bool) -> String {
    match band.ansi_style() {
        Some(style) if color => format!("{}{}{}", style, text, RESET),
        _ => text.to_string(),
    }
}

fn pad(text: &str, width: usize) -> String {
    let len = text.chars().count();
    format!("{}{}", text, " ".repeat(width.saturating_sub(len)))
}

/// Render the sorted batch rows as a text table
pub fn render_table(report: &BatchReport, color: bool) -> String {
    let cells: Vec<[String; 3]> = report
        .rows
        .iter()
        .map(|r| [r.id.clone(), r.score.to_string(), r.level.clone()])
        .collect();

    let mut widths = [0usize; 3];
    for (i, width) in widths.iter_mut().enumerate() {
        *width = cells
            .iter()
            .map(|c| c[i].chars().count())
            .chain(std::iter::once(COLUMNS[i].chars().count()))
            .max()
            .unwrap_or(0);
    }

    let mut out = String::new();
    let header = format!(
        "{}  {}  {}  {}",
        pad(COLUMNS[0], widths[0]),
        pad(COLUMNS[1], widths[1]),
        pad(COLUMNS[2], widths[2]),
        COLUMNS[3]
    );
    let _ = writeln!(out, "{}", header.trim_end());
    let _ = writeln!(out, "{}", "-".repeat(header.chars().count()));

    for (row, [id, score, level]) in report.rows.iter().zip(&cells) {
        let band = RiskBand::from_score(row.score);
        let _ = writeln!(
            out,
            "{}  {}  {}  {}",
            pad(id, widths[0]),
            paint(&pad(score, widths[1]), band, color),
            pad(level, widths[2]),
            row.justification
        );
    }
    out
}

/// One-line summary under the table
pub fn render_summary(report: &BatchReport) -> String {
    let count = |band: RiskBand| {
        report
            .rows
            .iter()
            .filter(|r| RiskBand::from_score(r.score) == band)
            .count()
    };
    format!(
        "{} casos | Crítico: {} | Alto: {} | Medio: {} | Bajo: {} | Error: {}",
        report.rows.len(),
        count(RiskBand::Critical),
        count(RiskBand::High),
        count(RiskBand::Medium),
        count(RiskBand::Low),
        report.failures()
    )
}

/// Render a single assessment for the interactive query
pub fn render_assessment(assessment: &RiskAssessment, color: bool) -> String {
    let band = RiskBand::from_score(assessment.score);
    let mut out = String::new();
    let _ = writeln!(
        out,
        "IRC: {}  Nivel: {}",
        paint(&format!(" {} ", assessment.score), band, color),
        assessment.level
    );
    let _ = writeln!(out);
    for bullet in &assessment.justification {
        let _ = writeln!(out, "  - {}", bullet);
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "csv" => Some(Self::Csv),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Write the sorted rows to `path`, format chosen by extension
pub fn export(report: &BatchReport, path: &Path) -> Result<ExportFormat, ExportError> {
    let format = ExportFormat::from_path(path)
        .ok_or_else(|| ExportError::UnsupportedFormat(path.to_path_buf()))?;

    match format {
        ExportFormat::Csv => {
            let mut writer = csv::Writer::from_path(path)?;
            writer.write_record(COLUMNS)?;
            for row in &report.rows {
                let score = row.score.to_string();
                writer.write_record([
                    row.id.as_str(),
                    score.as_str(),
                    row.level.as_str(),
                    row.justification.as_str(),
                ])?;
            }
            writer.flush()?;
        }
        ExportFormat::Json => {
            let file = std::fs::File::create(path)?;
            serde_json::to_writer_pretty(std::io::BufWriter::new(file), report)?;
        }
    }

    info!("Exported {} rows to {:?}", report.rows.len(), path);
    Ok(format)
}
