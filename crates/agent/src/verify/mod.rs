//! The verification loop: apply model edits, run build/test commands, feed
//! failures back, and stop on success, a repeated failure, or the iteration
//! ceiling.
//!
//! Every path through [`verification_loop`] either returns or advances the
//! iteration counter, which is bounded by `max_iterations`.

pub mod detect;
pub mod edits;
pub mod model;
pub mod runner;
pub mod signature;

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::Utc;
use hearth_config::VerificationConfig;
use hearth_core::event::{DomainEvent, EventBus};
use tracing::{info, warn};

pub use detect::detect_commands;
pub use edits::{EditAction, FileEdit, apply_edits, parse_edits};
pub use model::{ModelCall, ProviderModel, Unblocker};
pub use runner::{ExecutionResult, run_commands};
pub use signature::failure_signature;

const STDERR_CONTEXT_CHARS: usize = 2000;
const STDOUT_CONTEXT_CHARS: usize = 1000;

/// What to verify and how.
#[derive(Debug, Clone)]
pub struct VerificationJob {
    pub prompt: String,
    pub root: PathBuf,
    /// `None` detects commands from project marker files
    pub commands: Option<Vec<String>>,
    pub max_iterations: u32,
    pub timeout: Duration,
    pub output_tail_lines: usize,
}

impl VerificationJob {
    pub fn from_config(prompt: impl Into<String>, root: impl Into<PathBuf>, config: &VerificationConfig) -> Self {
        Self {
            prompt: prompt.into(),
            root: root.into(),
            commands: (!config.commands.is_empty()).then(|| config.commands.clone()),
            max_iterations: config.max_iterations,
            timeout: config.timeout(),
            output_tail_lines: config.output_tail_lines,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationStatus {
    Success,
    /// The model call itself failed
    Failure,
    /// The same failure signature came back and no further diagnosis is available
    Stalled,
    MaxIterations,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Stalled => "stalled",
            Self::MaxIterations => "max_iterations",
        }
    }
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit record of one iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopIteration {
    pub iteration: u32,
    pub edits_applied: usize,
    pub commands_run: Vec<String>,
    pub success: bool,
    pub failure_signature: Option<String>,
    pub duration: Duration,
}

#[derive(Debug, Clone)]
pub struct VerificationResult {
    pub status: VerificationStatus,
    pub iterations: Vec<LoopIteration>,
    /// The last command run, if any iteration got that far
    pub final_run: Option<ExecutionResult>,
    pub total_duration: Duration,
    pub edits_total: usize,
    pub unblocker_invoked: bool,
    pub message: String,
}

/// Run the loop for `job`.
///
/// A failure signature seen for the second time is a stall. The unblocker,
/// when present, is consulted once per run and its diagnosis goes into the
/// next prompt; a stall after that ends the run.
pub async fn verification_loop(
    job: &VerificationJob,
    model: &dyn ModelCall,
    unblocker: Option<&dyn Unblocker>,
    events: Option<&EventBus>,
) -> VerificationResult {
    let started = Instant::now();
    let commands = job.commands.clone().unwrap_or_else(|| detect_commands(&job.root));
    info!(commands = ?commands, max_iterations = job.max_iterations, "Starting verification loop");

    let mut result = VerificationResult {
        status: VerificationStatus::MaxIterations,
        iterations: Vec::new(),
        final_run: None,
        total_duration: Duration::ZERO,
        edits_total: 0,
        unblocker_invoked: false,
        message: String::new(),
    };
    let mut seen = HashSet::new();
    let mut prompt = job.prompt.clone();

    for i in 1..=job.max_iterations {
        let iteration_started = Instant::now();

        let reply = match model.call(&prompt).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(iteration = i, error = %e, "Verification model call failed");
                result.status = VerificationStatus::Failure;
                result.message = format!("Model call failed: {e}");
                break;
            }
        };

        let edits = parse_edits(&reply);
        let root = job.root.clone();
        let applied = match tokio::task::spawn_blocking(move || apply_edits(&edits, &root)).await {
            Ok(applied) => applied,
            Err(e) => {
                warn!(error = %e, "Edit task failed");
                Vec::new()
            }
        };
        result.edits_total += applied.len();

        let run = run_commands(&commands, &job.root, job.timeout, job.output_tail_lines).await;

        result.iterations.push(LoopIteration {
            iteration: i,
            edits_applied: applied.len(),
            commands_run: run.commands_run.clone(),
            success: run.success,
            failure_signature: run.failure_signature.clone(),
            duration: iteration_started.elapsed(),
        });
        if let Some(bus) = events {
            bus.publish(DomainEvent::VerificationIteration {
                iteration: i,
                success: run.success,
                signature: run.failure_signature.clone(),
                timestamp: Utc::now(),
            });
        }
        info!(
            iteration = i,
            edits = applied.len(),
            success = run.success,
            signature = ?run.failure_signature,
            "Verification iteration complete"
        );

        if run.success {
            result.status = VerificationStatus::Success;
            result.message = format!("Verification passed after {i} iteration(s)");
            result.final_run = Some(run);
            break;
        }

        let signature = run.failure_signature.clone().unwrap_or_default();
        let mut diagnosis = None;
        if !seen.insert(signature.clone()) {
            match unblocker {
                Some(unblocker) if !result.unblocker_invoked => {
                    result.unblocker_invoked = true;
                    info!(signature = %signature, "Stall detected, consulting unblocker");
                    match unblocker.diagnose(&signature, &run.stderr_tail).await {
                        Ok(text) => diagnosis = Some(text),
                        Err(e) => warn!(error = %e, "Unblocker failed, continuing without a diagnosis"),
                    }
                }
                _ => {
                    info!(signature = %signature, "Stalled on repeated failure");
                    result.status = VerificationStatus::Stalled;
                    result.message = format!("Stalled on repeated failure: {signature}");
                    result.final_run = Some(run);
                    break;
                }
            }
        }

        prompt = next_prompt(&job.prompt, i, &run, diagnosis.as_deref());
        result.final_run = Some(run);
    }

    if result.status == VerificationStatus::MaxIterations {
        result.message = format!("Max iterations ({}) reached without success", job.max_iterations);
    }
    result.total_duration = started.elapsed();
    result
}

/// The job prompt plus what went wrong in iteration `i`.
fn next_prompt(job: &str, i: u32, run: &ExecutionResult, diagnosis: Option<&str>) -> String {
    let mut prompt = job.to_string();
    if let Some(diagnosis) = diagnosis {
        prompt.push_str(&format!(
            "\n\nUNBLOCKER DIAGNOSIS:\n{diagnosis}\n\nLAST ERROR:\n{}",
            run.stderr_tail
        ));
    }
    let exit_code = run
        .exit_code
        .map(|c| c.to_string())
        .unwrap_or_else(|| "none".into());
    prompt.push_str(&format!(
        "\n\nITERATION {i} FAILED:\nExit code: {exit_code}\nFailure signature: {}\n\n\
         STDERR:\n{}\n\nSTDOUT:\n{}\n\n\
         Fix the issue and try again. Focus on the error above.",
        run.failure_signature.as_deref().unwrap_or("unknown"),
        last_chars(&run.stderr_tail, STDERR_CONTEXT_CHARS),
        last_chars(&run.stdout_tail, STDOUT_CONTEXT_CHARS),
    ));
    prompt
}

fn last_chars(text: &str, n: usize) -> &str {
    let count = text.chars().count();
    if count <= n {
        return text;
    }
    match text.char_indices().nth(count - n) {
        Some((at, _)) => &text[at..],
        None => text,
    }
}

/// Render a result for the terminal.
pub fn format_verification_result(result: &VerificationResult) -> String {
    let rule = "=".repeat(50);
    let mut lines = vec![
        rule.clone(),
        "VERIFICATION LOOP RESULT".to_string(),
        rule,
        format!("Status: {}", result.status),
        format!("Iterations: {}", result.iterations.len()),
        format!("Total edits: {}", result.edits_total),
        format!("Duration: {:.1}s", result.total_duration.as_secs_f64()),
    ];
    if result.unblocker_invoked {
        lines.push("Unblocker: Invoked".into());
    }

    lines.push(String::new());
    lines.push("ITERATION HISTORY:".into());
    for it in &result.iterations {
        let mark = if it.success { "✓" } else { "✗" };
        lines.push(format!(
            "  {mark} Iteration {}: {} edits, {:.1}s",
            it.iteration,
            it.edits_applied,
            it.duration.as_secs_f64()
        ));
        if let Some(sig) = &it.failure_signature {
            lines.push(format!("      Failure: {sig}"));
        }
    }

    if !result.message.is_empty() {
        lines.push(String::new());
        lines.push(format!("Message: {}", result.message));
    }
    lines.join("\n")
}
