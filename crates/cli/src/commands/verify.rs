//! `hearth verify`: edit, build and test until the commands pass.

use std::path::{Path, PathBuf};

use hearth_agent::verify::{ProviderModel, Unblocker};
use hearth_agent::{
    RetryPolicy, StreamAdapter, VerificationJob, VerificationResult, VerificationStatus,
    format_verification_result, verification_loop,
};
use hearth_config::AppConfig;
use hearth_core::event::EventBus;

use super::session::{TurnGuard, load_config};

pub struct VerifyOptions {
    pub prompt: String,
    /// Empty means use the config, then detection
    pub commands: Vec<String>,
    pub max_iterations: Option<u32>,
    pub use_unblocker: bool,
}

/// The job the options describe, with config filling the gaps.
pub fn job_for(root: &Path, config: &AppConfig, options: &VerifyOptions) -> VerificationJob {
    let mut job = VerificationJob::from_config(options.prompt.clone(), root, &config.verification);
    if !options.commands.is_empty() {
        job.commands = Some(options.commands.clone());
    }
    if let Some(max) = options.max_iterations {
        job.max_iterations = max;
    }
    job
}

pub async fn execute(
    root: &Path,
    config: &AppConfig,
    options: VerifyOptions,
) -> hearth_core::Result<VerificationResult> {
    let job = job_for(root, config, &options);
    let guard = TurnGuard::new();

    let provider = hearth_providers::build_from_config(config)?;
    let adapter = StreamAdapter::new(provider, RetryPolicy::from_config(&config.retry));
    let model = ProviderModel::new(adapter, config.model.model.clone())
        .with_temperature(config.model.temperature)
        .with_cancel(guard.cancel.clone());

    let events = EventBus::default();
    let unblocker: Option<&dyn Unblocker> = options.use_unblocker.then_some(&model as &dyn Unblocker);

    eprintln!("  Verifying in {} (up to {} iterations)...", root.display(), job.max_iterations);
    Ok(verification_loop(&job, &model, unblocker, Some(&events)).await)
}

pub async fn run(root: PathBuf, options: VerifyOptions) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let result = execute(&root, &config, options).await?;
    println!("{}", format_verification_result(&result));

    if result.status != VerificationStatus::Success {
        return Err(format!("verification {}", result.status).into());
    }
    Ok(())
}
