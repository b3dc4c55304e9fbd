//! End-to-end batch flow: CSV on disk -> cases -> scoring -> sorted export

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use prioria::batch::{run_batch, FAILURE_SCORE};
use prioria::cases::{resolve_input, CaseTable, InputSource, PreconditionError};
use prioria::evaluator::RiskEvaluator;
use prioria::gemini_client::{GenerationError, TextGenerator};
use prioria::report;

/// Scores each case from the ID line of its summary
struct IdScoredBackend {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl TextGenerator for IdScoredBackend {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let id = prompt
            .lines()
            .find_map(|l| l.trim_start_matches('"').strip_prefix("[ID] "))
            .unwrap_or_default()
            .to_string();
        match id.as_str() {
            "P-3" => Err(GenerationError::Status {
                status: 429,
                body: "RESOURCE_EXHAUSTED".to_string(),
            }),
            "P-4" => Ok("Lo siento, no puedo evaluar este caso.".to_string()),
            _ => {
                let score: i64 = id.trim_start_matches("P-").parse().unwrap_or(0) * 20;
                Ok(format!(
                    "```json\n{{\"score\": {}, \"nivel\": \"Nivel {}\", \"justificacion\": [\"motivo\"]}}\n```",
                    score, id
                ))
            }
        }
    }

    fn model_name(&self) -> &str {
        "id-scored"
    }
}

const CSV: &str = "\
id,Demografía,Pabellón,Farmacia,Eventos Adversos,Indicación Médica,Hospitalización,Atención Ambulatoria,Lista de Espera Consulta Nueva
P-1,F 30,,Paracetamol,,Control,,APS,No
P-4,M 66,Bypass,Warfarina,Urgencia,ACO,2024,Cardio,Sí
P-3,F 80,,Polifarmacia,,HTA,,,No
P-2,M 52,Hernia,,,DM2,,,No
";

#[tokio::test]
async fn test_csv_batch_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let xlsx = dir.path().join("casos_pacientes.xlsx");
    let csv = dir.path().join("casos_pacientes.csv");
    std::fs::write(&csv, CSV).unwrap();

    let source = resolve_input(None, &xlsx, &csv).unwrap();
    assert_eq!(source, InputSource::Csv(csv.clone()));
    let table = CaseTable::load(&source).unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let evaluator = RiskEvaluator::new(Box::new(IdScoredBackend {
        calls: calls.clone(),
    }));

    let mut progress = Vec::new();
    let result = run_batch(&evaluator, &table, |p| progress.push(p.id.to_string()))
        .await
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(progress, vec!["P-1", "P-4", "P-3", "P-2"]);

    let order: Vec<(&str, i64)> = result
        .rows
        .iter()
        .map(|r| (r.id.as_str(), r.score))
        .collect();
    assert_eq!(
        order,
        vec![("P-2", 40), ("P-1", 20), ("P-4", FAILURE_SCORE), ("P-3", FAILURE_SCORE)]
    );
    assert_eq!(result.failures(), 2);
    assert!(result.rows[3].justification.contains("429"));

    let export_path = dir.path().join("resultados.json");
    report::export(&result, &export_path).unwrap();
    let exported: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&export_path).unwrap()).unwrap();
    assert_eq!(exported["rows"].as_array().unwrap().len(), 4);
    assert_eq!(exported["rows"][0]["id"], "P-2");
    assert_eq!(exported["model"], "id-scored");
}

#[tokio::test]
async fn test_missing_column_stops_batch() {
    let dir = tempfile::tempdir().unwrap();
    let csv = dir.path().join("casos.csv");
    let without_pharmacy = CSV
        .lines()
        .map(|line| {
            let mut cells: Vec<&str> = line.split(',').collect();
            cells.remove(3);
            cells.join(",")
        })
        .collect::<Vec<_>>()
        .join("\n");
    std::fs::write(&csv, without_pharmacy).unwrap();

    let table = CaseTable::load(&InputSource::Csv(csv)).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let evaluator = RiskEvaluator::new(Box::new(IdScoredBackend {
        calls: calls.clone(),
    }));

    let err = run_batch(&evaluator, &table, |_| {}).await.unwrap_err();
    assert!(matches!(err, PreconditionError::MissingColumns(ref c) if c.len() == 1 && c[0] == "FARMACIA"));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}
