//! PRIOR-IA: Clinical Risk Index (IRC) scoring
//!
//! Patient summaries are scored by a hosted LLM through a fixed prompt, and the
//! reply is validated into a [`evaluator::RiskAssessment`]. Batches of cases are
//! read from a spreadsheet and scored sequentially.

pub mod batch;
pub mod cases;
pub mod config;
pub mod evaluator;
pub mod gemini_client;
pub mod report;

pub use batch::{run_batch, run_cases, BatchProgress, BatchReport, BatchResult};
pub use cases::{resolve_input, CaseTable, InputSource, PatientCase, PreconditionError};
pub use config::{Config, ConfigError};
pub use evaluator::{EvaluationError, RiskAssessment, RiskEvaluator};
pub use gemini_client::{GeminiClient, GenerationError, TextGenerator};
