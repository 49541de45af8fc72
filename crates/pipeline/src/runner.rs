//! Job orchestration.
//!
//! [`JobRunner::run`] drives one job through validate, probe, upload,
//! LoRA staging, patching, submit, poll, collect and cleanup. Every state
//! change is written through the [`JobReporter`], and every exit path
//! produces a [`JobOutcome`]; nothing is raised to the caller.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use relay_cloud::BlobPublisher;
use relay_comfyui::api::ComfyUIApi;
use relay_comfyui::poller::GenerationRunner;
use relay_comfyui::readiness::{probe_with_policy, Readiness};
use relay_comfyui::retry::RetryPolicy;
use relay_core::assets::{ProtectionPolicy, StagedAsset};
use relay_core::error::JobError;
use relay_core::job::{Job, JobContext, JobState};
use relay_core::validation::{validate_input, JobInput, LoraInput};
use relay_core::workflow::patch_or_original;
use relay_events::{JobReporter, WebhookPayload};
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::cleanup::CleanupManager;
use crate::collector::OutputCollector;
use crate::outcome::JobOutcome;
use crate::staging::{upload_images, LoraStager, Verification};

/// Static settings shared by every job.
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub probe: RetryPolicy,
    pub poll: RetryPolicy,
    /// Directory ComfyUI writes images to.
    pub output_root: PathBuf,
    /// ComfyUI install root, holding `extra_model_paths.yaml`.
    pub comfy_root: PathBuf,
    /// Ordered candidate directories for downloaded LoRAs.
    pub staging_dirs: Vec<PathBuf>,
    pub protection: ProtectionPolicy,
    /// Use the structural patch strategy for Flux graphs.
    pub enable_flux: bool,
    pub refresh_worker: bool,
    pub job_deadline: Option<Duration>,
}

/// Mutable bookkeeping for one run.
struct RunState {
    ctx: JobContext,
    job: Job,
    started: Instant,
    state_writes_failed: u32,
    images_count: usize,
    loras_count: usize,
    /// Fixed once staging finishes; `None` until LoRAs were staged.
    cleanup_candidates: Option<Vec<PathBuf>>,
}

pub struct JobRunner {
    api: ComfyUIApi,
    reporter: JobReporter,
    stager: LoraStager,
    cleanup: CleanupManager,
    collector: OutputCollector,
    settings: RunnerSettings,
}

impl JobRunner {
    pub fn new(
        api: ComfyUIApi,
        reporter: JobReporter,
        publisher: Option<Arc<dyn BlobPublisher>>,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            stager: LoraStager::new(settings.staging_dirs.clone(), settings.protection.clone()),
            cleanup: CleanupManager::new(settings.staging_dirs.clone(), settings.protection.clone()),
            collector: OutputCollector::new(settings.output_root.clone(), publisher),
            api,
            reporter,
            settings,
        }
    }

    pub fn api(&self) -> &ComfyUIApi {
        &self.api
    }

    /// Run one job to completion.
    pub async fn run(&self, job_id: Option<String>, payload: &Value) -> JobOutcome {
        self.run_with_cancellation(job_id, payload, CancellationToken::new())
            .await
    }

    /// [`run`](Self::run), stopping the retry loops early when `cancel` fires.
    pub async fn run_with_cancellation(
        &self,
        job_id: Option<String>,
        payload: &Value,
        cancel: CancellationToken,
    ) -> JobOutcome {
        let ctx = JobContext::new(job_id);
        let span = tracing::info_span!("job", job_id = %ctx.job_id);
        self.execute(ctx, payload, cancel).instrument(span).await
    }

    async fn execute(&self, ctx: JobContext, payload: &Value, cancel: CancellationToken) -> JobOutcome {
        let mut run = RunState {
            job: Job::new(ctx.job_id.clone()),
            ctx,
            started: Instant::now(),
            state_writes_failed: 0,
            images_count: 0,
            loras_count: 0,
            cleanup_candidates: None,
        };
        tracing::info!("Job received");
        if !self.reporter.persist(&run.job).await {
            run.state_writes_failed += 1;
        }

        let result = self.process(&mut run, payload, cancel).await;
        self.finish(run, result).await
    }

    async fn process(
        &self,
        run: &mut RunState,
        payload: &Value,
        cancel: CancellationToken,
    ) -> Result<Value, JobError> {
        let input: JobInput = validate_input(payload)?;
        run.job.webhook_url = input.webhook_url.clone();
        run.images_count = input.images.as_ref().map_or(0, Vec::len);
        run.loras_count = input.loras.as_ref().map_or(0, Vec::len);

        let deadline = self.settings.job_deadline.map(|d| run.started + d);

        match probe_with_policy(&self.api, &self.settings.probe, &cancel, deadline).await {
            Readiness::Ready => {}
            Readiness::Unavailable { attempts } => {
                return Err(JobError::DependencyUnavailable {
                    url: self.api.api_url().to_string(),
                    attempts,
                });
            }
            Readiness::Interrupted { .. } => return Err(JobError::Cancelled),
        }

        if let Some(images) = input.images.as_deref().filter(|i| !i.is_empty()) {
            upload_images(&run.ctx, &self.api, images).await?;
        }

        let assets = match input.loras.as_deref().filter(|l| !l.is_empty()) {
            Some(loras) => self.stage_loras(run, loras).await,
            None => Vec::new(),
        };

        let patch = patch_or_original(&input.workflow, &assets, self.settings.enable_flux);
        match &patch.fallback_reason {
            Some(reason) => {
                tracing::warn!(reason = %reason, "Workflow patching failed, submitting original workflow")
            }
            None => tracing::info!(
                strategy = ?patch.strategy,
                replacements = patch.replacements,
                "Workflow patched",
            ),
        }

        let generation = GenerationRunner::new(&self.api, self.settings.poll.clone())
            .with_cancellation(cancel)
            .with_deadline(deadline);

        let prompt_id = generation.submit(&run.ctx, &patch.workflow).await?;
        self.transition(run, JobState::InQueue, Some(format!("prompt_id {prompt_id}")))
            .await;

        let outputs = generation.wait_for_outputs(&run.ctx, &prompt_id).await?;
        let report = self.collector.collect(&run.ctx, &outputs).await;
        Ok(serde_json::to_value(&report).unwrap_or_else(|e| {
            serde_json::json!({"status": "error", "images": [], "message": e.to_string()})
        }))
    }

    async fn stage_loras(&self, run: &mut RunState, loras: &[LoraInput]) -> Vec<StagedAsset> {
        self.transition(run, JobState::ProcessingLoras, None).await;

        let report = self.stager.stage(&run.ctx, loras).await;
        run.cleanup_candidates = Some(report.cleanup_candidates());

        let state = if report.errors.is_empty() {
            JobState::LoraProcessingComplete
        } else {
            JobState::LoraProcessingPartial
        };
        self.transition(run, state, report.error_summary()).await;

        let verification = self
            .stager
            .verify(&run.ctx, &self.api, &self.settings.comfy_root, &report.assets)
            .await;
        if let Verification::Warning(message) = verification {
            self.transition(run, JobState::LoraVerificationWarning, Some(message))
                .await;
        }

        report.assets
    }

    async fn transition(&self, run: &mut RunState, state: JobState, message: Option<String>) {
        if !self.reporter.transition(&mut run.job, state, message).await {
            run.state_writes_failed += 1;
        }
    }

    /// Cleanup, terminal state write, webhook. Side-effect outcomes are
    /// attached to the returned result but never change it.
    async fn finish(&self, mut run: RunState, result: Result<Value, JobError>) -> JobOutcome {
        let cleanup = match run.cleanup_candidates.take() {
            Some(candidates) => Some(self.cleanup.cleanup(&run.ctx, &candidates).await),
            None => None,
        };

        let mut outcome = match &result {
            Ok(output) => {
                run.job.result = Some(output.clone());
                self.transition(&mut run, JobState::Completed, None).await;
                tracing::info!(elapsed_ms = run.started.elapsed().as_millis() as u64, "Job completed");
                JobOutcome::completed(run.ctx.job_id.clone(), output.clone(), self.settings.refresh_worker)
            }
            Err(e) => {
                run.job.error = Some(e.to_string());
                run.job.error_kind = Some(e.kind().to_string());
                self.transition(&mut run, JobState::Failed, Some(e.to_string())).await;
                tracing::error!(error = %e, kind = e.kind(), "Job failed");
                JobOutcome::failed(run.ctx.job_id.clone(), e, self.settings.refresh_worker)
            }
        };

        let payload = WebhookPayload {
            job_id: run.ctx.job_id.clone(),
            status: run.job.state.as_str().to_string(),
            timestamp: chrono::Utc::now(),
            result: outcome.output.clone(),
            error: outcome.error.clone(),
            error_kind: outcome.error_kind.clone(),
            duration_ms: run.started.elapsed().as_millis() as u64,
            images_count: run.images_count,
            loras_count: run.loras_count,
        };
        let webhook = self
            .reporter
            .notify(run.job.webhook_url.as_deref(), &payload)
            .await;
        if let Some(delivery) = webhook.as_ref().filter(|w| !w.delivered) {
            let error = JobError::Webhook(delivery.error.clone().unwrap_or_default());
            tracing::warn!(error = %error, "Webhook notification not delivered");
        }

        outcome.side_effects.state_writes_failed = run.state_writes_failed;
        outcome.side_effects.cleanup = cleanup;
        outcome.side_effects.webhook = webhook;
        outcome
    }
}
