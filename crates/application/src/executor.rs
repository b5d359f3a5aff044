//! The stage executor: runs a job through the static stage table, invoking
//! collaborators with bounded timeouts, persisting every transition before
//! the next external call, and translating collaborator failures into the
//! retry/fail/clarify branches.
//!
//! Persist-then-call is the invariant the whole reliability story hangs on:
//! `current_stage` is written before each collaborator call, so a redelivery
//! after a crash resumes at the persisted stage and completed stages are
//! never re-invoked.

use crate::backoff::BackoffConfig;
use crate::publisher::StatusPublisher;
use scriba_domain::collaborators::{
    CollaboratorError, ContextRetriever, MediaPoll, MediaSynthesizer, Notifier, ScriptGenerator,
    TopicExtractor,
};
use scriba_domain::events::{JobEvent, JobEventKind, StatusUpdate};
use scriba_domain::pipeline::stages_from;
use scriba_domain::repository::{EventRepository, JobRepository, StageRepository};
use scriba_domain::stage_record::StageRecord;
use scriba_domain::{DomainError, Job, Stage, StageStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info, warn};

/// The external AI services, behind their domain ports.
#[derive(Clone)]
pub struct Collaborators {
    pub topic_extractor: Arc<dyn TopicExtractor>,
    pub context_retriever: Arc<dyn ContextRetriever>,
    pub script_generator: Arc<dyn ScriptGenerator>,
    pub media_synthesizer: Arc<dyn MediaSynthesizer>,
    pub notifier: Arc<dyn Notifier>,
}

/// Stage-specific call timeouts and the in-process retry policy.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub topic_timeout: Duration,
    pub retrieval_timeout: Duration,
    pub script_timeout: Duration,
    /// Applies to the submit call and to each individual poll.
    pub media_timeout: Duration,
    pub notify_timeout: Duration,
    pub media_poll_interval: Duration,
    pub media_poll_max: u32,
    pub backoff: BackoffConfig,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            topic_timeout: Duration::from_secs(30),
            retrieval_timeout: Duration::from_secs(30),
            script_timeout: Duration::from_secs(120),
            media_timeout: Duration::from_secs(60),
            notify_timeout: Duration::from_secs(10),
            media_poll_interval: Duration::from_secs(2),
            media_poll_max: 90,
            backoff: BackoffConfig::default(),
        }
    }
}

impl ExecutorConfig {
    fn call_timeout(&self, stage: Stage) -> Duration {
        match stage {
            Stage::Validating => self.topic_timeout,
            Stage::RetrievingContext => self.retrieval_timeout,
            Stage::GeneratingScript => self.script_timeout,
            Stage::GeneratingMedia => self.media_timeout,
            // Output processing is local work; give it the notify budget.
            Stage::ProcessingOutput => self.notify_timeout,
            Stage::Notifying => self.notify_timeout,
        }
    }
}

/// Settled result of one pipeline run. Every variant is acknowledged: a
/// settled job, whatever the branch, is not redeliverable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    Completed,
    /// Settled success with a distinct status, never counted as a failure.
    NeedsClarification,
    Failed,
}

pub struct StageExecutor {
    jobs: Arc<dyn JobRepository>,
    stages: Arc<dyn StageRepository>,
    events: Arc<dyn EventRepository>,
    publisher: Arc<dyn StatusPublisher>,
    collaborators: Collaborators,
    config: ExecutorConfig,
}

impl StageExecutor {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        stages: Arc<dyn StageRepository>,
        events: Arc<dyn EventRepository>,
        publisher: Arc<dyn StatusPublisher>,
        collaborators: Collaborators,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            jobs,
            stages,
            events,
            publisher,
            collaborators,
            config,
        }
    }

    /// Run the pipeline from the job's persisted stage to a terminal status.
    ///
    /// Store errors and version conflicts bubble up as `Err`; the consumer
    /// maps those to a negative acknowledgement and lets the channel
    /// redeliver.
    pub async fn run(&self, mut job: Job) -> Result<PipelineOutcome, DomainError> {
        let resume_from = job.current_stage;
        if resume_from.is_some() {
            info!(job_id = %job.id, stage = ?resume_from, "resuming job at persisted stage");
        }

        for entry in stages_from(resume_from) {
            let stage = entry.stage;

            // A record settled by a previous delivery attempt means the
            // collaborator was already paid; never invoke it again.
            let existing = self.stages.find(&job.id, stage).await?;
            if existing
                .as_ref()
                .map(|r| r.status.is_settled())
                .unwrap_or(false)
            {
                continue;
            }

            if (entry.skip)(&job) {
                self.stages
                    .upsert(&StageRecord::skipped(job.id, stage))
                    .await?;
                self.events
                    .append(&JobEvent::now(&job, JobEventKind::StageSkipped, None))
                    .await?;
                info!(job_id = %job.id, stage = %stage, "stage skipped for requested modalities");
                continue;
            }

            job.begin_stage(stage)?;
            self.jobs.update(&mut job).await?;

            let mut record = match existing {
                Some(mut record) if record.status == StageStatus::InProgress => {
                    record.record_attempt();
                    record
                }
                _ => StageRecord::started(job.id, stage),
            };
            self.stages.upsert(&record).await?;
            self.events
                .append(&JobEvent::now(&job, JobEventKind::StageStarted, None))
                .await?;
            self.publisher.publish(&StatusUpdate::from_job(&job)).await;

            match self.run_stage_with_retries(stage, &mut job, &mut record).await? {
                StageRun::Succeeded(snapshot) => {
                    // Output first, settled record second: a crash between
                    // the two writes leaves the record in progress, so a
                    // redelivery re-invokes the collaborator instead of
                    // skipping a stage whose output was never persisted.
                    self.jobs.update(&mut job).await?;
                    record.complete(snapshot);
                    self.stages.upsert(&record).await?;
                    self.events
                        .append(&JobEvent::now(&job, JobEventKind::StageCompleted, None))
                        .await?;
                }
                StageRun::Clarification(questions) => {
                    return self.settle_clarification(job, record, questions).await;
                }
                StageRun::Failed(raw_error) => {
                    return self.settle_failure(job, record, raw_error).await;
                }
            }
        }

        job.complete()?;
        self.jobs.update(&mut job).await?;
        self.events
            .append(&JobEvent::now(&job, JobEventKind::JobCompleted, None))
            .await?;
        self.publisher.publish(&StatusUpdate::from_job(&job)).await;
        info!(job_id = %job.id, "job completed");
        Ok(PipelineOutcome::Completed)
    }

    async fn run_stage_with_retries(
        &self,
        stage: Stage,
        job: &mut Job,
        record: &mut StageRecord,
    ) -> Result<StageRun, DomainError> {
        let mut attempt = 0u32;
        loop {
            match self.invoke_stage(stage, job).await {
                Ok(snapshot) => return Ok(StageRun::Succeeded(snapshot)),
                Err(CollaboratorError::NeedsClarification { questions }) => {
                    return Ok(StageRun::Clarification(questions));
                }
                Err(CollaboratorError::Permanent(raw)) => {
                    error!(job_id = %job.id, stage = %stage, error = %raw, "permanent collaborator error");
                    return Ok(StageRun::Failed(raw));
                }
                Err(CollaboratorError::Transient(raw)) => {
                    if !self.config.backoff.can_retry(attempt) {
                        error!(
                            job_id = %job.id,
                            stage = %stage,
                            attempts = record.attempt_count,
                            error = %raw,
                            "stage retries exhausted"
                        );
                        return Ok(StageRun::Failed(raw));
                    }
                    let delay = self.config.backoff.delay(attempt);
                    warn!(
                        job_id = %job.id,
                        stage = %stage,
                        attempt = record.attempt_count,
                        delay_ms = delay.as_millis() as u64,
                        error = %raw,
                        "transient collaborator error, retrying"
                    );
                    record.record_attempt();
                    self.stages.upsert(record).await?;
                    // Event rows reach the query API; only a sanitized label
                    // goes in, the raw error stays in the log line above.
                    self.events
                        .append(&JobEvent::now(
                            job,
                            JobEventKind::StageRetried,
                            Some("transient collaborator error".to_string()),
                        ))
                        .await?;
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// One collaborator invocation for the given stage, bounded by the
    /// stage's timeout. Mutates the job output in place; the caller
    /// persists.
    async fn invoke_stage(
        &self,
        stage: Stage,
        job: &mut Job,
    ) -> Result<Option<serde_json::Value>, CollaboratorError> {
        let budget = self.config.call_timeout(stage);
        match stage {
            Stage::Validating => {
                let extraction = bounded(
                    budget,
                    self.collaborators
                        .topic_extractor
                        .extract(&job.request_text, &job.context_fields),
                )
                .await?;
                let snapshot = serde_json::json!({
                    "topic": extraction.topic,
                    "confidence": extraction.confidence,
                });
                job.output.topic = Some(extraction.topic);
                job.output.topic_confidence = Some(extraction.confidence);
                Ok(Some(snapshot))
            }
            Stage::RetrievingContext => {
                let topic = job.output.topic.clone().ok_or_else(|| {
                    CollaboratorError::Permanent("no topic persisted from validation".to_string())
                })?;
                let snippets = bounded(
                    budget,
                    self.collaborators.context_retriever.retrieve(&topic),
                )
                .await?;
                let snapshot = serde_json::json!({ "snippet_count": snippets.len() });
                job.output.context_snippets = snippets;
                Ok(Some(snapshot))
            }
            Stage::GeneratingScript => {
                let topic = job.output.topic.clone().ok_or_else(|| {
                    CollaboratorError::Permanent("no topic persisted from validation".to_string())
                })?;
                let script = bounded(
                    budget,
                    self.collaborators.script_generator.generate(
                        &topic,
                        &job.output.context_snippets,
                        &job.context_fields,
                    ),
                )
                .await?;
                let snapshot = serde_json::json!({ "script_chars": script.chars().count() });
                job.output.script = Some(script);
                Ok(Some(snapshot))
            }
            Stage::GeneratingMedia => self.synthesize_media(budget, job).await,
            Stage::ProcessingOutput => {
                let script = job.output.script.clone().ok_or_else(|| {
                    CollaboratorError::Permanent("no script persisted for output processing".to_string())
                })?;
                let captions = build_captions(&script);
                let snapshot = serde_json::json!({
                    "caption_lines": captions.lines().count(),
                });
                job.output.captions = Some(captions);
                Ok(Some(snapshot))
            }
            Stage::Notifying => {
                let summary = match &job.output.topic {
                    Some(topic) => format!("Your content on \"{}\" is ready", topic),
                    None => "Your content is ready".to_string(),
                };
                bounded(
                    budget,
                    self.collaborators.notifier.notify(&job.requester_id, &summary),
                )
                .await?;
                Ok(None)
            }
        }
    }

    /// Submit-then-poll media synthesis. The handle is persisted as soon as
    /// submission succeeds, so a retried or redelivered stage polls the
    /// existing synthesis instead of paying for a second one.
    async fn synthesize_media(
        &self,
        budget: Duration,
        job: &mut Job,
    ) -> Result<Option<serde_json::Value>, CollaboratorError> {
        let handle = match job.output.media_handle.clone() {
            Some(handle) => handle,
            None => {
                let handle = bounded(
                    budget,
                    self.collaborators
                        .media_synthesizer
                        .submit(job.output.script.as_deref().ok_or_else(|| {
                            CollaboratorError::Permanent(
                                "no script persisted for media synthesis".to_string(),
                            )
                        })?),
                )
                .await?;
                job.output.media_handle = Some(handle.clone());
                self.jobs
                    .update(job)
                    .await
                    .map_err(|e| CollaboratorError::Transient(e.to_string()))?;
                handle
            }
        };

        for _ in 0..self.config.media_poll_max {
            match bounded(budget, self.collaborators.media_synthesizer.poll(&handle)).await? {
                MediaPoll::Done { artifact_url } => {
                    let snapshot = serde_json::json!({
                        "handle": handle,
                        "artifact_url": artifact_url,
                    });
                    job.output.media_url = Some(artifact_url);
                    return Ok(Some(snapshot));
                }
                MediaPoll::Error { message } => {
                    return Err(CollaboratorError::Permanent(message));
                }
                MediaPoll::Pending => {
                    tokio::time::sleep(self.config.media_poll_interval).await;
                }
            }
        }

        Err(CollaboratorError::Transient(format!(
            "media synthesis still pending after {} polls",
            self.config.media_poll_max
        )))
    }

    async fn settle_clarification(
        &self,
        mut job: Job,
        mut record: StageRecord,
        questions: Vec<String>,
    ) -> Result<PipelineOutcome, DomainError> {
        // The collaborator answered properly, just not with output: the
        // stage record settles as completed. The job row carries the
        // questions and goes first, same write order as the success arm.
        let snapshot = serde_json::json!({
            "needs_clarification": true,
            "questions": questions,
        });
        job.need_clarification(questions)?;
        self.jobs.update(&mut job).await?;

        record.complete(Some(snapshot));
        self.stages.upsert(&record).await?;
        self.events
            .append(&JobEvent::now(
                &job,
                JobEventKind::ClarificationRequested,
                None,
            ))
            .await?;
        self.publisher.publish(&StatusUpdate::from_job(&job)).await;

        // Best-effort: the requester learns about the questions even if the
        // notifier is down; the job is settled either way.
        let summary = "Your request needs clarification before generation can continue";
        if let Err(e) = bounded(
            self.config.notify_timeout,
            self.collaborators.notifier.notify(&job.requester_id, summary),
        )
        .await
        {
            warn!(job_id = %job.id, error = %e, "clarification notification failed");
        }

        info!(job_id = %job.id, "job settled as needs_clarification");
        Ok(PipelineOutcome::NeedsClarification)
    }

    async fn settle_failure(
        &self,
        mut job: Job,
        mut record: StageRecord,
        raw_error: String,
    ) -> Result<PipelineOutcome, DomainError> {
        let stage = record.stage;
        let attempts = record.attempt_count;

        // Raw collaborator errors stay in the logs; stage records and the
        // job's error detail carry only this sanitized message, which is
        // what the query API exposes.
        let sanitized = format!("{} did not succeed after {} attempts", stage, attempts);
        job.fail(stage, sanitized.clone(), attempts)?;
        job.retry_count = attempts;
        self.jobs.update(&mut job).await?;

        record.fail(sanitized.clone());
        self.stages.upsert(&record).await?;
        self.events
            .append(&JobEvent::now(
                &job,
                JobEventKind::StageFailed,
                Some(sanitized.clone()),
            ))
            .await?;
        self.events
            .append(&JobEvent::now(&job, JobEventKind::JobFailed, Some(sanitized)))
            .await?;
        self.publisher.publish(&StatusUpdate::from_job(&job)).await;

        error!(job_id = %job.id, stage = %stage, attempts, error = %raw_error, "job failed");
        Ok(PipelineOutcome::Failed)
    }
}

enum StageRun {
    Succeeded(Option<serde_json::Value>),
    Clarification(Vec<String>),
    Failed(String),
}

async fn bounded<T, F>(budget: Duration, fut: F) -> Result<T, CollaboratorError>
where
    F: std::future::Future<Output = Result<T, CollaboratorError>>,
{
    match timeout(budget, fut).await {
        Ok(result) => result,
        Err(_) => Err(CollaboratorError::Transient(format!(
            "collaborator call timed out after {:?}",
            budget
        ))),
    }
}

/// Segment a script into caption lines of at most 80 characters, breaking on
/// word boundaries.
fn build_captions(script: &str) -> String {
    const MAX_LINE: usize = 80;
    let mut lines: Vec<String> = Vec::new();
    let mut current = String::new();
    for word in script.split_whitespace() {
        if !current.is_empty() && current.len() + 1 + word.len() > MAX_LINE {
            lines.push(std::mem::take(&mut current));
        }
        if current.is_empty() {
            current.push_str(word);
        } else {
            current.push(' ');
            current.push_str(word);
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines.join("\n")
}
