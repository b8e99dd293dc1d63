//! Estimate generation — the two LLM stages and total-weeks extraction.

use std::sync::Arc;

use regex::Regex;
use tracing::debug;

use crate::error::LlmError;
use crate::llm::{GenerationRequest, LlmProvider};
use crate::prompts;

/// Drives the notes and estimate generation stages against one provider.
pub struct EstimateGenerator {
    llm: Arc<dyn LlmProvider>,
    temperature: f64,
}

impl EstimateGenerator {
    pub fn new(llm: Arc<dyn LlmProvider>, temperature: f64) -> Self {
        Self { llm, temperature }
    }

    /// Generate the BA estimation notes from the fetched source content.
    pub async fn generate_notes(
        &self,
        url: &str,
        title: &str,
        body_markdown: &str,
        ballpark: Option<&str>,
    ) -> Result<String, LlmError> {
        let request =
            build_notes_request(url, title, body_markdown, ballpark).with_temperature(self.temperature);
        debug!(model = self.llm.model_name(), url = url, "Generating estimation notes");
        self.llm.generate(request).await
    }

    /// Generate the PERT estimate sheet from the BA notes.
    pub async fn generate_estimate(
        &self,
        url: &str,
        notes_markdown: &str,
        ballpark: Option<&str>,
    ) -> Result<String, LlmError> {
        let request =
            build_estimate_request(url, notes_markdown, ballpark).with_temperature(self.temperature);
        debug!(model = self.llm.model_name(), url = url, "Generating estimate sheet");
        self.llm.generate(request).await
    }
}

fn build_notes_request(
    url: &str,
    title: &str,
    body_markdown: &str,
    ballpark: Option<&str>,
) -> GenerationRequest {
    let mut instructions = "You will receive a requirements page link and its content. \
         Produce the required Markdown estimation analysis."
        .to_string();
    if ballpark.is_some() {
        instructions.push_str(
            " The initial ballpark is provided; align your suggested breakdown to \
             approximately fit this band.",
        );
    }

    let ballpark_line = ballpark
        .map(|b| format!("Initial Ballpark: {b}\n\n"))
        .unwrap_or_default();
    let payload = format!(
        "Source Link: {url}\n\n\
         Source Title: {title}\n\n\
         {ballpark_line}Source Content (Markdown):\n\n{body_markdown}"
    );

    GenerationRequest::new(prompts::BA_PERSONA, vec![instructions, payload])
}

fn build_estimate_request(
    url: &str,
    notes_markdown: &str,
    ballpark: Option<&str>,
) -> GenerationRequest {
    let mut instructions = "Using the PERT template, the BA estimation notes, and the source \
         link, produce a complete PERT estimation Markdown."
        .to_string();
    if ballpark.is_some() {
        instructions.push_str(" Respect the initial ballpark in your totals where practical.");
    }

    let ballpark_line = ballpark
        .map(|b| format!("Initial Ballpark: {b}\n\n"))
        .unwrap_or_default();
    let payload = format!(
        "Single Source of Truth: {url}\n\n\
         PERT Template:\n\n{}\n\n\
         {ballpark_line}BA Estimation Notes:\n\n{notes_markdown}",
        prompts::ESTIMATE_TEMPLATE
    );

    GenerationRequest::new(prompts::ENGINEER_PERSONA, vec![instructions, payload])
}

/// Patterns for the rolled-up total, tried in order; within a pattern the
/// last match wins (totals come after per-item rows). The exact rule is a
/// strategy over fuzzy LLM output, not a fixed algorithm.
const TOTAL_PATTERNS: &[&str] = &[
    r"(?i)(?:total|overall|sum).*?(\d+(?:\.\d+)?)\s*(?:man[\s-]?weeks?|weeks?)",
    r"(?i)expected.*?(\d+(?:\.\d+)?)\s*(?:man[\s-]?weeks?|weeks?)",
    r"(?i)(\d+(?:\.\d+)?)\s*(?:man[\s-]?weeks?|weeks?)\s*(?:total|overall)",
];

/// Extract the rolled-up total effort, in weeks, from a generated estimate.
///
/// Returns `None` when no pattern yields a parseable nonnegative number —
/// which fails the job, per the content-format contract.
pub fn parse_total_weeks(estimate_markdown: &str) -> Option<f64> {
    for pattern in TOTAL_PATTERNS {
        let re = Regex::new(pattern).unwrap();
        let last = re
            .captures_iter(estimate_markdown)
            .filter_map(|c| c[1].parse::<f64>().ok())
            .last();
        if let Some(value) = last {
            if value.is_finite() && value >= 0.0 {
                return Some(value);
            }
        }
    }
    None
}
