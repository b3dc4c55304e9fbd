//! Risk evaluation: prompt construction and reply parsing
//!
//! A summary is interpolated into a fixed instruction template, sent to a
//! [`TextGenerator`], and the reply is parsed into a [`RiskAssessment`].
//! Replies are validated against an explicit schema rather than trusted.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::LazyLock;
use thiserror::Error;
use tracing::{debug, warn};

use crate::gemini_client::{GenerationError, TextGenerator};

pub const MIN_SCORE: i64 = 0;
pub const MAX_SCORE: i64 = 100;

/// Placeholder replaced by the patient summary
const SUMMARY_PLACEHOLDER: &str = "{summary}";

const PROMPT_TEMPLATE: &str = r#"ACTÚA COMO: Un médico especialista senior y un ingeniero de riesgos clínicos del Hospital Padre Hurtado.

TAREA: Evaluar el siguiente resumen de paciente anonimizado. Tu misión es generar un "Índice de Riesgo Clínico" (IRC) de 0 a 100 y una justificación clara.

REGLAS DE EVALUACIÓN:
- **Riesgo Crítico (90-100):** Cirugía compleja reciente (<30 días) + eventos adversos (Urgencia/MAE) + polifarmacia de riesgo. Pacientes oncológicos descompensados.
- **Riesgo Alto (70-89):** Cirugía reciente O eventos adversos O polifarmacia de riesgo. Vulnerabilidad demográfica.
- **Riesgo Medio (40-69):** Paciente crónico estable (DM2, HTA) o con cirugía programada pasada (> 2 meses).
- **Riesgo Bajo (0-39):** Paciente estable, crónico controlado, o consulta de rutina.

FORMATO DE SALIDA (JSON OBLIGATORIO):
Responde ÚNICAMENTE con este JSON válido:
{
  "score": <número 0-100>,
  "nivel": "<Texto del nivel>",
  "justificacion": ["<Bullet 1>", "<Bullet 2>", "<Bullet 3>"]
}

RESUMEN DEL PACIENTE:
"{summary}"
"#;

static CODE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```json\n?|```").expect("code fence pattern is valid"));

/// Reasons a single evaluation can fail
#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error("{0}")]
    Upstream(#[from] GenerationError),

    #[error("Unparseable reply: {0}")]
    Parse(String),

    #[error("Reply violates the assessment schema: {0}")]
    Schema(String),
}

/// Structured output of one evaluation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub score: i64,
    #[serde(rename = "nivel")]
    pub level: String,
    #[serde(rename = "justificacion")]
    pub justification: Vec<String>,
}

/// Build the full instruction prompt for a summary
pub fn build_prompt(summary: &str) -> String {
    PROMPT_TEMPLATE.replace(SUMMARY_PLACEHOLDER, summary)
}

/// Remove markdown code fences from a raw model reply
pub fn strip_code_fences(reply: &str) -> String {
    CODE_FENCE.replace_all(reply.trim(), "").trim().to_string()
}

/// Parse and validate a raw model reply
pub fn parse_assessment(reply: &str) -> Result<RiskAssessment, EvaluationError> {
    let cleaned = strip_code_fences(reply);

    let value: Value =
        serde_json::from_str(&cleaned).map_err(|e| EvaluationError::Parse(e.to_string()))?;

    let Value::Object(fields) = value else {
        return Err(EvaluationError::Parse("expected a JSON object".to_string()));
    };

    let missing: Vec<&str> = ["score", "nivel", "justificacion"]
        .into_iter()
        .filter(|key| !fields.contains_key(*key))
        .collect();
    if !missing.is_empty() {
        return Err(EvaluationError::Parse(format!(
            "missing required fields: {}",
            missing.join(", ")
        )));
    }

    let score = coerce_score(&fields["score"])?;
    if !(MIN_SCORE..=MAX_SCORE).contains(&score) {
        return Err(EvaluationError::Schema(format!(
            "score {} outside {}..={}",
            score, MIN_SCORE, MAX_SCORE
        )));
    }

    let level = match &fields["nivel"] {
        Value::String(s) if !s.trim().is_empty() => s.clone(),
        Value::String(_) => return Err(EvaluationError::Schema("nivel is empty".to_string())),
        other => {
            return Err(EvaluationError::Schema(format!(
                "nivel must be a string, got {}",
                other
            )))
        }
    };

    let justification = match &fields["justificacion"] {
        Value::Array(items) if items.is_empty() => {
            return Err(EvaluationError::Schema("justificacion is empty".to_string()))
        }
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(s.clone()),
                other => Err(EvaluationError::Schema(format!(
                    "justificacion items must be strings, got {}",
                    other
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?,
        other => {
            return Err(EvaluationError::Schema(format!(
                "justificacion must be a list, got {}",
                other
            )))
        }
    };

    Ok(RiskAssessment {
        score,
        level,
        justification,
    })
}

/// Integer coercion: integers as-is, floats truncated, numeric strings parsed
fn coerce_score(value: &Value) -> Result<i64, EvaluationError> {
    let invalid = || EvaluationError::Schema(format!("score is not an integer: {}", value));
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(i)
            } else {
                n.as_f64()
                    .filter(|f| f.is_finite() && f.abs() < i64::MAX as f64)
                    .map(|f| f.trunc() as i64)
                    .ok_or_else(invalid)
            }
        }
        Value::String(s) => s.trim().parse::<i64>().map_err(|_| invalid()),
        _ => Err(invalid()),
    }
}

/// Scores patient summaries through a pluggable text-generation backend
pub struct RiskEvaluator {
    backend: Box<dyn TextGenerator>,
}

impl RiskEvaluator {
    pub fn new(backend: Box<dyn TextGenerator>) -> Self {
        Self { backend }
    }

    pub fn model_name(&self) -> &str {
        self.backend.model_name()
    }

    /// Evaluate one summary. No caching, no retries.
    pub async fn evaluate(&self, summary: &str) -> Result<RiskAssessment, EvaluationError> {
        let prompt = build_prompt(summary);
        debug!("Evaluating summary: {} chars", summary.len());

        let reply = self.backend.generate(&prompt).await?;

        parse_assessment(&reply).inspect_err(|e| {
            warn!("Unusable reply from {}: {}", self.backend.model_name(), e);
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Backend that replays canned replies in order
    pub struct ScriptedBackend {
        replies: Mutex<VecDeque<Result<String, String>>>,
        pub calls: Arc<AtomicUsize>,
        pub prompts: Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedBackend {
        pub fn new(replies: Vec<Result<String, String>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                calls: Arc::new(AtomicUsize::new(0)),
                prompts: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl TextGenerator for ScriptedBackend {
        async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(prompt.to_string());
            match self.replies.lock().unwrap().pop_front() {
                Some(Ok(reply)) => Ok(reply),
                Some(Err(e)) => Err(GenerationError::Request(e)),
                None => Err(GenerationError::EmptyReply(None)),
            }
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }
}
