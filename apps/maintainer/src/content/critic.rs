//! Critic Loop — bounded grade → repair refinement over a draft.
//!
//! # State machine
//! `Draft → Graded → (Accepted | Repaired) → Draft′`
//!
//! - At most `MAX_GRADES` grading calls and `MAX_REPAIRS` repair calls per run.
//! - A repair is kept only if it is at least `MIN_REPAIR_RATIO` of the
//!   original length (guards against truncated output).
//! - Any error ends the loop immediately with the best draft so far.
//!
//! The returned draft is NOT guaranteed to reach `ACCEPT_SCORE`.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::content::sanitize::sanitize;
use crate::llm_client::prompts::{OutputFormat, PromptKey};
use crate::llm_client::{generate_json, Generator};

pub const ACCEPT_SCORE: u8 = 90;
const MAX_GRADES: u32 = 2;
const MAX_REPAIRS: u32 = 1;
const MIN_REPAIR_RATIO: f64 = 0.5;

#[derive(Debug, Clone, Deserialize)]
pub struct Grade {
    /// As returned by the model; may be fractional or out of range.
    pub score: f64,
    #[serde(default)]
    pub issues: Vec<String>,
}

impl Grade {
    /// Score rounded and clamped to 0..=100. NaN counts as 0.
    pub fn normalized_score(&self) -> u8 {
        if self.score.is_nan() {
            return 0;
        }
        self.score.round().clamp(0.0, 100.0) as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CriticState {
    Draft,
    Graded { score: u8 },
    Accepted,
    Repaired,
}

#[derive(Debug, Clone, Serialize)]
pub struct CriticOutcome {
    pub html: String,
    /// Score of the returned draft, if it was graded.
    pub score: Option<u8>,
    pub final_state: CriticState,
    pub grading_calls: u32,
    pub repair_calls: u32,
    pub repaired: bool,
}

pub async fn run_critic_loop(generator: &dyn Generator, draft: &str) -> CriticOutcome {
    let original_len = draft.len();
    let mut outcome = CriticOutcome {
        html: draft.to_string(),
        score: None,
        final_state: CriticState::Draft,
        grading_calls: 0,
        repair_calls: 0,
        repaired: false,
    };

    while outcome.grading_calls < MAX_GRADES {
        outcome.grading_calls += 1;
        let grade: Grade =
            match generate_json(generator, PromptKey::CriticGrade, &[outcome.html.clone()]).await {
                Ok(grade) => grade,
                Err(e) => {
                    warn!(error = %e, "Critic grading failed, keeping current draft");
                    break;
                }
            };

        let score = grade.normalized_score();
        debug!(score, issues = grade.issues.len(), "Draft graded");
        outcome.score = Some(score);
        outcome.final_state = CriticState::Graded { score };

        if score >= ACCEPT_SCORE {
            outcome.final_state = CriticState::Accepted;
            break;
        }
        if outcome.repair_calls >= MAX_REPAIRS {
            break;
        }

        outcome.repair_calls += 1;
        let issues = format_issues(&grade);
        let repair = generator
            .generate(
                PromptKey::CriticRepair,
                &[outcome.html.clone(), issues],
                OutputFormat::Html,
            )
            .await;
        let candidate = match repair {
            Ok(text) => sanitize(&text),
            Err(e) => {
                warn!(error = %e, "Critic repair failed, keeping current draft");
                break;
            }
        };
        if (candidate.len() as f64) < original_len as f64 * MIN_REPAIR_RATIO {
            warn!(
                original = original_len,
                repaired = candidate.len(),
                "Repair output too short, discarded"
            );
            break;
        }

        outcome.html = candidate;
        outcome.score = None;
        outcome.repaired = true;
        outcome.final_state = CriticState::Repaired;
    }

    outcome
}

fn format_issues(grade: &Grade) -> String {
    if grade.issues.is_empty() {
        return format!("- overall quality scored {}/100", grade.normalized_score());
    }
    grade
        .issues
        .iter()
        .map(|i| format!("- {i}"))
        .collect::<Vec<_>>()
        .join("\n")
}
