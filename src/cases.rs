//! Patient case input
//!
//! Cases come from a spreadsheet with one row per patient. Workbooks are read
//! through calamine (first sheet only), CSV through the csv crate. Both land in a
//! [`CaseTable`] whose headers are normalised before the required columns are
//! checked.

use calamine::{open_workbook_auto, Data, Reader};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Text used for cells with no value
pub const MISSING_VALUE: &str = "N/A";

/// Rendering of workbook date cells
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Columns every input table must carry, in summary order
pub const REQUIRED_COLUMNS: [&str; 9] = [
    "ID",
    "DEMOGRAFÍA",
    "PABELLÓN",
    "FARMACIA",
    "EVENTOS ADVERSOS",
    "INDICACIÓN MÉDICA",
    "HOSPITALIZACIÓN",
    "ATENCIÓN AMBULATORIA",
    "LISTA DE ESPERA CONSULTA NUEVA",
];

/// Batch-fatal input problems, raised before any row is evaluated
#[derive(Debug, Error)]
pub enum PreconditionError {
    #[error("Input file not found (tried: {})", display_paths(.0))]
    NotFound(Vec<PathBuf>),

    #[error("Failed to read {path:?}: {reason}")]
    Unreadable { path: PathBuf, reason: String },

    #[error("{0:?} has no header row")]
    NoHeader(PathBuf),

    #[error("Missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Where batch input is read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    Workbook(PathBuf),
    Csv(PathBuf),
}

impl InputSource {
    pub fn path(&self) -> &Path {
        match self {
            Self::Workbook(p) | Self::Csv(p) => p,
        }
    }
}

/// Pick the input file.
///
/// An explicit path is read as CSV when its extension is `csv`, otherwise as a
/// workbook. Without one, the default workbook is tried first and the default
/// CSV only when the workbook does not exist.
pub fn resolve_input(
    explicit: Option<&Path>,
    default_xlsx: &Path,
    default_csv: &Path,
) -> Result<InputSource, PreconditionError> {
    if let Some(path) = explicit {
        if !path.exists() {
            return Err(PreconditionError::NotFound(vec![path.to_path_buf()]));
        }
        let is_csv = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("csv"));
        return Ok(if is_csv {
            InputSource::Csv(path.to_path_buf())
        } else {
            InputSource::Workbook(path.to_path_buf())
        });
    }

    if default_xlsx.exists() {
        Ok(InputSource::Workbook(default_xlsx.to_path_buf()))
    } else if default_csv.exists() {
        debug!("{:?} not found, falling back to {:?}", default_xlsx, default_csv);
        Ok(InputSource::Csv(default_csv.to_path_buf()))
    } else {
        Err(PreconditionError::NotFound(vec![
            default_xlsx.to_path_buf(),
            default_csv.to_path_buf(),
        ]))
    }
}

/// Raw tabular input: header row plus string cells
#[derive(Debug, Clone, Default)]
pub struct CaseTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl CaseTable {
    pub fn load(source: &InputSource) -> Result<Self, PreconditionError> {
        let table = match source {
            InputSource::Workbook(path) => Self::from_workbook(path)?,
            InputSource::Csv(path) => Self::from_csv_path(path)?,
        };
        info!(
            "Loaded {:?}: {} columns, {} rows",
            source.path(),
            table.headers.len(),
            table.rows.len()
        );
        Ok(table)
    }

    pub fn from_csv_path(path: &Path) -> Result<Self, PreconditionError> {
        let file = std::fs::File::open(path).map_err(|e| PreconditionError::Unreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_csv_reader(file).map_err(|e| PreconditionError::Unreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    pub fn from_csv_reader<R: std::io::Read>(reader: R) -> Result<Self, csv::Error> {
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);

        let headers = reader.headers()?.iter().map(str::to_string).collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            rows.push(record?.iter().map(str::to_string).collect());
        }
        Ok(Self { headers, rows })
    }

    pub fn from_workbook(path: &Path) -> Result<Self, PreconditionError> {
        let unreadable = |reason: String| PreconditionError::Unreadable {
            path: path.to_path_buf(),
            reason,
        };

        let mut workbook = open_workbook_auto(path).map_err(|e| unreadable(e.to_string()))?;
        let range = workbook
            .worksheet_range_at(0)
            .ok_or_else(|| unreadable("workbook has no sheets".to_string()))?
            .map_err(|e| unreadable(e.to_string()))?;

        let mut rows = range.rows();
        let headers = rows
            .next()
            .ok_or_else(|| PreconditionError::NoHeader(path.to_path_buf()))?
            .iter()
            .map(cell_to_string)
            .collect();
        let rows = rows
            .map(|row| row.iter().map(cell_to_string).collect())
            .collect();

        Ok(Self { headers, rows })
    }

    /// Validate the required columns and turn every row into a case.
    /// Empty cells, including those of an all-empty row, become `N/A`.
    pub fn patient_cases(&self) -> Result<Vec<PatientCase>, PreconditionError> {
        let normalised: Vec<String> = self.headers.iter().map(|h| normalise_column(h)).collect();

        let mut positions = [0usize; REQUIRED_COLUMNS.len()];
        let mut missing = Vec::new();
        for (slot, column) in positions.iter_mut().zip(REQUIRED_COLUMNS) {
            match normalised.iter().position(|h| h == column) {
                Some(idx) => *slot = idx,
                None => missing.push(column.to_string()),
            }
        }
        if !missing.is_empty() {
            return Err(PreconditionError::MissingColumns(missing));
        }

        let cases = self
            .rows
            .iter()
            .enumerate()
            .map(|(index, cells)| {
                if cells.iter().all(|value| value.is_empty()) {
                    warn!("Row {} has no values, scoring it as all {}", index + 1, MISSING_VALUE);
                }
                let cell = |column: usize| {
                    cells
                        .get(positions[column])
                        .filter(|value| !value.is_empty())
                        .cloned()
                        .unwrap_or_else(|| MISSING_VALUE.to_string())
                };
                PatientCase {
                    id: cell(0),
                    demographics: cell(1),
                    surgery: cell(2),
                    pharmacy: cell(3),
                    adverse_events: cell(4),
                    medical_indication: cell(5),
                    hospitalization: cell(6),
                    outpatient_care: cell(7),
                    waiting_list: cell(8),
                }
            })
            .collect();
        Ok(cases)
    }
}

/// Upper-case and trim a header for matching
pub fn normalise_column(header: &str) -> String {
    header.trim_start_matches('\u{feff}').trim().to_uppercase()
}

/// Render a workbook cell as text; whole floats drop their decimal part and
/// date cells render as `YYYY-MM-DD HH:MM:SS`
fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => float_to_string(*f),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(value) if !dt.is_duration() => value.format(DATETIME_FORMAT).to_string(),
            _ => float_to_string(dt.as_f64()),
        },
        other => other.to_string(),
    }
}

fn float_to_string(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else {
        f.to_string()
    }
}

/// One patient row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatientCase {
    pub id: String,
    pub demographics: String,
    pub surgery: String,
    pub pharmacy: String,
    pub adverse_events: String,
    pub medical_indication: String,
    pub hospitalization: String,
    pub outpatient_care: String,
    pub waiting_list: String,
}

impl PatientCase {
    fn values(&self) -> [&str; REQUIRED_COLUMNS.len()] {
        [
            &self.id,
            &self.demographics,
            &self.surgery,
            &self.pharmacy,
            &self.adverse_events,
            &self.medical_indication,
            &self.hospitalization,
            &self.outpatient_care,
            &self.waiting_list,
        ]
    }

    /// Fixed-field summary sent to the evaluator, one `[COLUMN] value` line per field
    pub fn summary(&self) -> String {
        REQUIRED_COLUMNS
            .iter()
            .zip(self.values())
            .map(|(column, value)| format!("[{}] {}", column, value))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "ID,Demografía,Pabellón,Farmacia,Eventos Adversos,Indicación Médica,Hospitalización,Atención Ambulatoria,Lista de Espera Consulta Nueva";

    fn table(csv: &str) -> CaseTable {
        CaseTable::from_csv_reader(csv.as_bytes()).unwrap()
    }

    #[test]
    fn test_normalise_column() {
        assert_eq!(normalise_column("  farmacia "), "FARMACIA");
        assert_eq!(normalise_column("Indicación médica"), "INDICACIÓN MÉDICA");
        assert_eq!(normalise_column("\u{feff}id"), "ID");
    }

    #[test]
    fn test_patient_cases_from_csv() {
        let csv = format!(
            "{}\n1,\"M, 80 años\",Colecistectomía,Metformina,,DM2,,Control,No\n",
            HEADER
        );
        let cases = table(&csv).patient_cases().unwrap();
        assert_eq!(cases.len(), 1);
        let case = &cases[0];
        assert_eq!(case.id, "1");
        assert_eq!(case.demographics, "M, 80 años");
        assert_eq!(case.adverse_events, MISSING_VALUE);
        assert_eq!(case.hospitalization, MISSING_VALUE);
        assert_eq!(case.waiting_list, "No");
    }

    #[test]
    fn test_header_whitespace_and_case() {
        let csv = " id ,demografía,PABELLÓN , farmacia,eventos adversos,indicación médica,hospitalización,atención ambulatoria,lista de espera consulta nueva,extra\n7,a,b,c,d,e,f,g,h,ignored\n";
        let cases = table(csv).patient_cases().unwrap();
        assert_eq!(cases[0].id, "7");
        assert_eq!(cases[0].waiting_list, "h");
    }

    #[test]
    fn test_short_rows_and_blank_rows() {
        let csv = format!("{}\n1,a\n,,,,,,,,\n3,b,c,d,e,f,g,h,i\n", HEADER);
        let table = table(&csv);
        let cases = table.patient_cases().unwrap();

        // One case per input row, blank rows included
        assert_eq!(cases.len(), table.rows.len());
        assert_eq!(cases.len(), 3);
        assert_eq!(cases[0].surgery, MISSING_VALUE);
        assert!(cases[1].values().iter().all(|v| *v == MISSING_VALUE));
        assert!(cases[1].summary().starts_with("[ID] N/A\n"));
        assert_eq!(cases[2].id, "3");
    }

    #[test]
    fn test_missing_columns_listed() {
        let csv = "ID,DEMOGRAFÍA,PABELLÓN,EVENTOS ADVERSOS,INDICACIÓN MÉDICA,HOSPITALIZACIÓN,ATENCIÓN AMBULATORIA\n1,a,b,c,d,e,f\n";
        let err = table(csv).patient_cases().unwrap_err();
        match err {
            PreconditionError::MissingColumns(cols) => assert_eq!(
                cols,
                vec!["FARMACIA", "LISTA DE ESPERA CONSULTA NUEVA"]
            ),
            other => panic!("expected MissingColumns, got {:?}", other),
        }
    }

    #[test]
    fn test_summary_layout() {
        let csv = format!("{}\n15,F 45,Ninguno,Losartán,Caída,HTA,2023,Cardiología,Sí\n", HEADER);
        let summary = table(&csv).patient_cases().unwrap()[0].summary();
        let lines: Vec<&str> = summary.lines().collect();
        assert_eq!(lines.len(), 9);
        assert_eq!(lines[0], "[ID] 15");
        assert_eq!(lines[3], "[FARMACIA] Losartán");
        assert_eq!(lines[8], "[LISTA DE ESPERA CONSULTA NUEVA] Sí");
    }

    #[test]
    fn test_cell_to_string() {
        assert_eq!(cell_to_string(&Data::Float(12.0)), "12");
        assert_eq!(cell_to_string(&Data::Float(12.5)), "12.5");
        assert_eq!(cell_to_string(&Data::Int(3)), "3");
        assert_eq!(cell_to_string(&Data::Empty), "");
        assert_eq!(cell_to_string(&Data::String("x".to_string())), "x");
        assert_eq!(
            cell_to_string(&Data::DateTimeIso("2024-03-15T08:30:00".to_string())),
            "2024-03-15T08:30:00"
        );
    }

    #[test]
    fn test_load_workbook_with_dates() {
        use rust_xlsxwriter::{ExcelDateTime, Format, Workbook};

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("casos_pacientes.xlsx");

        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        for (col, header) in REQUIRED_COLUMNS.iter().enumerate() {
            sheet.write_string(0, col as u16, *header).unwrap();
        }
        sheet.write_number(1, 0, 12.0).unwrap();
        sheet.write_string(1, 1, "F 71").unwrap();
        let surgery_date = ExcelDateTime::from_ymd(2024, 3, 15).unwrap();
        let date_format = Format::new().set_num_format("yyyy-mm-dd");
        sheet
            .write_datetime_with_format(1, 2, &surgery_date, &date_format)
            .unwrap();
        sheet.write_string(1, 3, "Warfarina").unwrap();
        workbook.save(&path).unwrap();

        let table = CaseTable::load(&InputSource::Workbook(path)).unwrap();
        let cases = table.patient_cases().unwrap();
        assert_eq!(cases.len(), 1);

        let case = &cases[0];
        assert_eq!(case.id, "12");
        assert_eq!(case.demographics, "F 71");
        assert_eq!(case.surgery, "2024-03-15 00:00:00");
        assert_eq!(case.pharmacy, "Warfarina");
        assert_eq!(case.waiting_list, MISSING_VALUE);
        assert!(case
            .summary()
            .contains("[PABELLÓN] 2024-03-15 00:00:00\n"));
    }

    #[test]
    fn test_resolve_input_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let xlsx = dir.path().join("casos_pacientes.xlsx");
        let csv = dir.path().join("casos_pacientes.csv");

        let err = resolve_input(None, &xlsx, &csv).unwrap_err();
        assert!(matches!(err, PreconditionError::NotFound(ref paths) if paths.len() == 2));

        std::fs::write(&csv, HEADER).unwrap();
        assert_eq!(
            resolve_input(None, &xlsx, &csv).unwrap(),
            InputSource::Csv(csv.clone())
        );

        std::fs::write(&xlsx, b"not really a workbook").unwrap();
        assert_eq!(
            resolve_input(None, &xlsx, &csv).unwrap(),
            InputSource::Workbook(xlsx.clone())
        );
    }

    #[test]
    fn test_resolve_input_explicit() {
        let dir = tempfile::tempdir().unwrap();
        let upper = dir.path().join("CASOS.CSV");
        std::fs::write(&upper, HEADER).unwrap();
        let source = resolve_input(Some(&upper), Path::new("a"), Path::new("b")).unwrap();
        assert_eq!(source, InputSource::Csv(upper));

        let missing = dir.path().join("missing.xlsx");
        assert!(matches!(
            resolve_input(Some(&missing), Path::new("a"), Path::new("b")),
            Err(PreconditionError::NotFound(_))
        ));
    }

    #[test]
    fn test_corrupt_workbook_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("casos.xlsx");
        std::fs::write(&path, b"not a zip archive").unwrap();
        let err = CaseTable::load(&InputSource::Workbook(path)).unwrap_err();
        assert!(matches!(err, PreconditionError::Unreadable { .. }));
    }

    #[test]
    fn test_load_csv_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("casos.csv");
        std::fs::write(&path, format!("{}\n1,a,b,c,d,e,f,g,h\n", HEADER)).unwrap();
        let table = CaseTable::load(&InputSource::Csv(path)).unwrap();
        assert_eq!(table.headers.len(), 9);
        assert_eq!(table.rows.len(), 1);
    }
}
