//! End-to-end pipeline scenarios over the in-memory repositories.
//!
//! These exercise the delivery semantics the consumer relies on: settled
//! stages are never re-invoked, duplicates of settled jobs are inert,
//! clarification is a success branch, and exhausted retries fail the job
//! with a sanitized error.

use async_trait::async_trait;
use scriba_application::{
    BackoffConfig, Collaborators, Disposition, ExecutorConfig, IdempotencyGuard, PipelineOutcome,
    StageExecutor, StatusPublisher,
};
use scriba_domain::collaborators::{
    CollaboratorError, ContextRetriever, MediaPoll, MediaSynthesizer, Notifier, ScriptGenerator,
    TopicExtraction, TopicExtractor,
};
use scriba_domain::repository::{EventRepository, JobRepository, StageRepository};
use scriba_domain::{
    DomainError, Job, JobEventKind, JobId, JobStatus, Modality, Stage, StageRecord, StageStatus,
    StatusUpdate,
};
use scriba_infrastructure::persistence::memory::{
    InMemoryEventRepository, InMemoryJobRepository, InMemoryStageRepository,
};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct CallCounts {
    extract: AtomicU32,
    retrieve: AtomicU32,
    generate: AtomicU32,
    submit: AtomicU32,
    notify: AtomicU32,
}

/// What the script generator should do on each call.
#[derive(Clone)]
enum GeneratorBehavior {
    Succeed,
    Clarify(Vec<String>),
    /// Sleep past any timeout, simulating a hung collaborator.
    Hang,
}

struct MockTopicExtractor(Arc<CallCounts>);

#[async_trait]
impl TopicExtractor for MockTopicExtractor {
    async fn extract(
        &self,
        _text: &str,
        _context: &serde_json::Value,
    ) -> Result<TopicExtraction, CollaboratorError> {
        self.0.extract.fetch_add(1, Ordering::SeqCst);
        Ok(TopicExtraction {
            topic: "photosynthesis".to_string(),
            confidence: 0.93,
        })
    }
}

struct MockContextRetriever(Arc<CallCounts>);

#[async_trait]
impl ContextRetriever for MockContextRetriever {
    async fn retrieve(&self, _topic: &str) -> Result<Vec<String>, CollaboratorError> {
        self.0.retrieve.fetch_add(1, Ordering::SeqCst);
        Ok(vec![
            "Plants convert light into chemical energy.".to_string(),
            "Chlorophyll absorbs red and blue light.".to_string(),
        ])
    }
}

struct MockScriptGenerator {
    counts: Arc<CallCounts>,
    behavior: GeneratorBehavior,
}

#[async_trait]
impl ScriptGenerator for MockScriptGenerator {
    async fn generate(
        &self,
        topic: &str,
        _snippets: &[String],
        _context: &serde_json::Value,
    ) -> Result<String, CollaboratorError> {
        self.counts.generate.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            GeneratorBehavior::Succeed => Ok(format!(
                "Today we explore {}: how plants turn sunlight into the energy \
                 that feeds almost every living thing on Earth.",
                topic
            )),
            GeneratorBehavior::Clarify(questions) => Err(CollaboratorError::NeedsClarification {
                questions: questions.clone(),
            }),
            GeneratorBehavior::Hang => {
                tokio::time::sleep(Duration::from_secs(5)).await;
                unreachable!("call should be cut off by the stage timeout")
            }
        }
    }
}

struct MockMediaSynthesizer(Arc<CallCounts>);

#[async_trait]
impl MediaSynthesizer for MockMediaSynthesizer {
    async fn submit(&self, _script: &str) -> Result<String, CollaboratorError> {
        self.0.submit.fetch_add(1, Ordering::SeqCst);
        Ok("synth-42".to_string())
    }

    async fn poll(&self, handle: &str) -> Result<MediaPoll, CollaboratorError> {
        Ok(MediaPoll::Done {
            artifact_url: format!("https://cdn.example/{}.mp4", handle),
        })
    }
}

struct MockNotifier(Arc<CallCounts>);

#[async_trait]
impl Notifier for MockNotifier {
    async fn notify(&self, _requester_id: &str, _summary: &str) -> Result<(), CollaboratorError> {
        self.0.notify.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct RecordingPublisher {
    updates: Mutex<Vec<StatusUpdate>>,
}

#[async_trait]
impl StatusPublisher for RecordingPublisher {
    async fn publish(&self, update: &StatusUpdate) {
        self.updates.lock().unwrap().push(update.clone());
    }
}

/// Stage repository whose first attempt to settle a record as completed
/// fails, simulating a crash between a stage's two success-path writes.
struct SettleOnceFailingStageRepo {
    inner: Arc<InMemoryStageRepository>,
    tripped: AtomicBool,
}

#[async_trait]
impl StageRepository for SettleOnceFailingStageRepo {
    async fn upsert(&self, record: &StageRecord) -> scriba_domain::Result<()> {
        if record.status == StageStatus::Completed && !self.tripped.swap(true, Ordering::SeqCst) {
            return Err(DomainError::store("stage store connection reset"));
        }
        self.inner.upsert(record).await
    }

    async fn find(
        &self,
        job_id: &JobId,
        stage: Stage,
    ) -> scriba_domain::Result<Option<StageRecord>> {
        self.inner.find(job_id, stage).await
    }

    async fn find_by_job(&self, job_id: &JobId) -> scriba_domain::Result<Vec<StageRecord>> {
        self.inner.find_by_job(job_id).await
    }
}

struct Harness {
    jobs: Arc<InMemoryJobRepository>,
    stages: Arc<InMemoryStageRepository>,
    events: Arc<InMemoryEventRepository>,
    publisher: Arc<RecordingPublisher>,
    counts: Arc<CallCounts>,
    guard: IdempotencyGuard,
    executor: StageExecutor,
}

fn harness(behavior: GeneratorBehavior, config: ExecutorConfig) -> Harness {
    let jobs = Arc::new(InMemoryJobRepository::new());
    let stages = Arc::new(InMemoryStageRepository::new());
    let events = Arc::new(InMemoryEventRepository::new());
    let publisher = Arc::new(RecordingPublisher::default());
    let counts = Arc::new(CallCounts::default());

    let collaborators = Collaborators {
        topic_extractor: Arc::new(MockTopicExtractor(counts.clone())),
        context_retriever: Arc::new(MockContextRetriever(counts.clone())),
        script_generator: Arc::new(MockScriptGenerator {
            counts: counts.clone(),
            behavior,
        }),
        media_synthesizer: Arc::new(MockMediaSynthesizer(counts.clone())),
        notifier: Arc::new(MockNotifier(counts.clone())),
    };

    let guard = IdempotencyGuard::new(jobs.clone());
    let executor = StageExecutor::new(
        jobs.clone(),
        stages.clone(),
        events.clone(),
        publisher.clone(),
        collaborators,
        config,
    );

    Harness {
        jobs,
        stages,
        events,
        publisher,
        counts,
        guard,
        executor,
    }
}

fn fast_config() -> ExecutorConfig {
    ExecutorConfig {
        media_poll_interval: Duration::from_millis(1),
        backoff: BackoffConfig::immediate(),
        ..ExecutorConfig::default()
    }
}

fn start_payload(job_id: &JobId, modalities: Option<&str>) -> Vec<u8> {
    let modalities = modalities
        .map(|m| format!(r#", "requested_modalities": {}"#, m))
        .unwrap_or_default();
    format!(
        r#"{{
            "job_id": "{}",
            "requester_id": "creator-7",
            "request_text": "explain photosynthesis for ninth graders",
            "context_fields": {{"grade": 9, "tone": "friendly"}}{}
        }}"#,
        job_id, modalities
    )
    .into_bytes()
}

async fn classify_fresh(h: &Harness, payload: &[u8]) -> Job {
    let cmd = scriba_application::validate_message(payload).unwrap();
    match h.guard.classify(&cmd).await.unwrap() {
        Disposition::Fresh(job) => job,
        other => panic!("expected fresh job, got {:?}", other),
    }
}

#[tokio::test]
async fn full_pipeline_completes_with_media() {
    let h = harness(GeneratorBehavior::Succeed, fast_config());
    let job_id = JobId::new();
    let payload = start_payload(&job_id, None);

    let job = classify_fresh(&h, &payload).await;
    let outcome = h.executor.run(job).await.unwrap();
    assert_eq!(outcome, PipelineOutcome::Completed);

    let job = h.jobs.find_by_id(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress_percentage(), 100);
    assert_eq!(job.output.topic.as_deref(), Some("photosynthesis"));
    assert_eq!(
        job.output.media_url.as_deref(),
        Some("https://cdn.example/synth-42.mp4")
    );
    assert!(job.output.captions.is_some());
    assert!(job.completed_at.is_some());

    let records = h.stages.find_by_job(&job_id).await.unwrap();
    assert_eq!(records.len(), 6);
    for record in &records {
        assert_eq!(record.status, StageStatus::Completed, "{}", record.stage);
    }

    assert_eq!(h.counts.extract.load(Ordering::SeqCst), 1);
    assert_eq!(h.counts.submit.load(Ordering::SeqCst), 1);
    assert_eq!(h.counts.notify.load(Ordering::SeqCst), 1);

    let updates = h.publisher.updates.lock().unwrap();
    assert_eq!(updates.last().unwrap().status, JobStatus::Completed);
    assert_eq!(updates.last().unwrap().progress_percentage, 100);
}

#[tokio::test]
async fn text_only_request_skips_media_stage() {
    let h = harness(GeneratorBehavior::Succeed, fast_config());
    let job_id = JobId::new();
    let payload = start_payload(&job_id, Some(r#"["text"]"#));

    let job = classify_fresh(&h, &payload).await;
    assert_eq!(job.requested_modalities, vec![Modality::Text]);

    let outcome = h.executor.run(job).await.unwrap();
    assert_eq!(outcome, PipelineOutcome::Completed);

    let job = h.jobs.find_by_id(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.output.media_url.is_none());
    assert!(job.output.media_handle.is_none());

    let media = h
        .stages
        .find(&job_id, Stage::GeneratingMedia)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(media.status, StageStatus::Skipped);
    assert_eq!(media.attempt_count, 0);
    assert_eq!(h.counts.submit.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn duplicate_delivery_of_settled_job_is_inert() {
    let h = harness(GeneratorBehavior::Succeed, fast_config());
    let job_id = JobId::new();
    let payload = start_payload(&job_id, None);

    let job = classify_fresh(&h, &payload).await;
    h.executor.run(job).await.unwrap();
    assert_eq!(h.counts.extract.load(Ordering::SeqCst), 1);

    // Redeliver the very same message.
    let cmd = scriba_application::validate_message(&payload).unwrap();
    match h.guard.classify(&cmd).await.unwrap() {
        Disposition::DuplicateOfTerminal(status) => assert_eq!(status, JobStatus::Completed),
        other => panic!("expected duplicate of terminal, got {:?}", other),
    }
    // Nothing ran again.
    assert_eq!(h.counts.extract.load(Ordering::SeqCst), 1);
    assert_eq!(h.counts.submit.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn redelivery_resumes_at_persisted_stage() {
    let h = harness(GeneratorBehavior::Succeed, fast_config());
    let job_id = JobId::new();
    let payload = start_payload(&job_id, None);

    // First delivery: simulate a crash mid-script-generation by building the
    // state that delivery would have persisted before dying.
    let mut job = classify_fresh(&h, &payload).await;

    job.begin_stage(Stage::Validating).unwrap();
    job.output.topic = Some("photosynthesis".to_string());
    job.output.topic_confidence = Some(0.93);
    h.jobs.update(&mut job).await.unwrap();
    let mut rec = StageRecord::started(job_id, Stage::Validating);
    rec.complete(Some(serde_json::json!({"topic": "photosynthesis"})));
    h.stages.upsert(&rec).await.unwrap();

    job.begin_stage(Stage::RetrievingContext).unwrap();
    job.output.context_snippets = vec!["Plants convert light.".to_string()];
    h.jobs.update(&mut job).await.unwrap();
    let mut rec = StageRecord::started(job_id, Stage::RetrievingContext);
    rec.complete(None);
    h.stages.upsert(&rec).await.unwrap();

    job.begin_stage(Stage::GeneratingScript).unwrap();
    h.jobs.update(&mut job).await.unwrap();
    // Crash here: generating_script record in progress, call never returned.
    h.stages
        .upsert(&StageRecord::started(job_id, Stage::GeneratingScript))
        .await
        .unwrap();

    // Redelivery classifies as resume, not fresh.
    let cmd = scriba_application::validate_message(&payload).unwrap();
    let resumed = match h.guard.classify(&cmd).await.unwrap() {
        Disposition::Resume(job) => job,
        other => panic!("expected resume, got {:?}", other),
    };
    assert_eq!(resumed.current_stage, Some(Stage::GeneratingScript));

    let outcome = h.executor.run(resumed).await.unwrap();
    assert_eq!(outcome, PipelineOutcome::Completed);

    // Earlier stages were settled and must not have been re-invoked.
    assert_eq!(h.counts.extract.load(Ordering::SeqCst), 0);
    assert_eq!(h.counts.retrieve.load(Ordering::SeqCst), 0);
    assert_eq!(h.counts.generate.load(Ordering::SeqCst), 1);

    let job = h.jobs.find_by_id(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    // The in-progress record picked up a second attempt on resume.
    let script_record = h
        .stages
        .find(&job_id, Stage::GeneratingScript)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(script_record.status, StageStatus::Completed);
    assert_eq!(script_record.attempt_count, 2);
}

#[tokio::test]
async fn output_is_persisted_before_the_stage_record_settles() {
    let jobs = Arc::new(InMemoryJobRepository::new());
    let inner_stages = Arc::new(InMemoryStageRepository::new());
    let stages = Arc::new(SettleOnceFailingStageRepo {
        inner: inner_stages.clone(),
        tripped: AtomicBool::new(false),
    });
    let events = Arc::new(InMemoryEventRepository::new());
    let counts = Arc::new(CallCounts::default());
    let collaborators = Collaborators {
        topic_extractor: Arc::new(MockTopicExtractor(counts.clone())),
        context_retriever: Arc::new(MockContextRetriever(counts.clone())),
        script_generator: Arc::new(MockScriptGenerator {
            counts: counts.clone(),
            behavior: GeneratorBehavior::Succeed,
        }),
        media_synthesizer: Arc::new(MockMediaSynthesizer(counts.clone())),
        notifier: Arc::new(MockNotifier(counts.clone())),
    };
    let guard = IdempotencyGuard::new(jobs.clone());
    let executor = StageExecutor::new(
        jobs.clone(),
        stages,
        events,
        Arc::new(RecordingPublisher::default()),
        collaborators,
        fast_config(),
    );

    let job_id = JobId::new();
    let payload = start_payload(&job_id, None);
    let cmd = scriba_application::validate_message(&payload).unwrap();
    let job = match guard.classify(&cmd).await.unwrap() {
        Disposition::Fresh(job) => job,
        other => panic!("expected fresh job, got {:?}", other),
    };

    // First delivery dies while settling the validating record; by then the
    // stage's output must already be on the job row.
    executor.run(job).await.unwrap_err();
    let stored = jobs.find_by_id(&job_id).await.unwrap().unwrap();
    assert_eq!(stored.output.topic.as_deref(), Some("photosynthesis"));
    let record = inner_stages
        .find(&job_id, Stage::Validating)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, StageStatus::InProgress);

    // Redelivery re-invokes the unsettled stage and runs to completion; the
    // torn write costs one repeated collaborator call, never the job.
    let resumed = match guard.classify(&cmd).await.unwrap() {
        Disposition::Resume(job) => job,
        other => panic!("expected resume, got {:?}", other),
    };
    let outcome = executor.run(resumed).await.unwrap();
    assert_eq!(outcome, PipelineOutcome::Completed);

    let job = jobs.find_by_id(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.output.topic.as_deref(), Some("photosynthesis"));
    assert_eq!(counts.extract.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn clarification_settles_job_as_success() {
    let questions = vec![
        "Which grade level is the audience?".to_string(),
        "Should the tone be formal or playful?".to_string(),
    ];
    let h = harness(GeneratorBehavior::Clarify(questions.clone()), fast_config());
    let job_id = JobId::new();
    let payload = start_payload(&job_id, None);

    let job = classify_fresh(&h, &payload).await;
    let outcome = h.executor.run(job).await.unwrap();
    assert_eq!(outcome, PipelineOutcome::NeedsClarification);

    let job = h.jobs.find_by_id(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::NeedsClarification);
    assert_eq!(job.output.clarification_questions, questions);
    assert!(job.error_detail.is_none());
    assert!(job.completed_at.is_some());

    // The stage that asked settles as completed, not failed.
    let record = h
        .stages
        .find(&job_id, Stage::GeneratingScript)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, StageStatus::Completed);
    assert_eq!(
        record.output_snapshot.as_ref().unwrap()["needs_clarification"],
        serde_json::json!(true)
    );

    // Requester was told about the questions.
    assert_eq!(h.counts.notify.load(Ordering::SeqCst), 1);

    let events = h.events.recent_for_job(&job_id, 50).await.unwrap();
    assert!(events
        .iter()
        .any(|e| e.kind == JobEventKind::ClarificationRequested));
}

#[tokio::test]
async fn repeated_timeouts_fail_the_job_with_sanitized_error() {
    let config = ExecutorConfig {
        script_timeout: Duration::from_millis(10),
        backoff: BackoffConfig {
            base_delay_ms: 1,
            max_delay_ms: 5,
            jitter_factor: 0.0,
            max_retries: 2,
        },
        ..fast_config()
    };
    let h = harness(GeneratorBehavior::Hang, config);
    let job_id = JobId::new();
    let payload = start_payload(&job_id, None);

    let job = classify_fresh(&h, &payload).await;
    let outcome = h.executor.run(job).await.unwrap();
    assert_eq!(outcome, PipelineOutcome::Failed);

    let job = h.jobs.find_by_id(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    let detail = job.error_detail.as_ref().unwrap();
    assert_eq!(detail.stage, Stage::GeneratingScript);
    assert_eq!(detail.retry_count, 3);
    // Sanitized: no timeout internals leak into the stored detail.
    assert_eq!(
        detail.message,
        "generating_script did not succeed after 3 attempts"
    );

    // Three consecutive attempts, all cut off by the stage timeout.
    assert_eq!(h.counts.generate.load(Ordering::SeqCst), 3);
    let record = h
        .stages
        .find(&job_id, Stage::GeneratingScript)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, StageStatus::Failed);
    assert_eq!(record.attempt_count, 3);
    assert_eq!(record.error_message.as_deref(), Some(detail.message.as_str()));

    let events = h.events.recent_for_job(&job_id, 50).await.unwrap();
    let retried = events
        .iter()
        .filter(|e| e.kind == JobEventKind::StageRetried)
        .count();
    assert_eq!(retried, 2);
    assert!(events.iter().any(|e| e.kind == JobEventKind::JobFailed));
}

#[tokio::test]
async fn status_updates_are_monotonic() {
    let h = harness(GeneratorBehavior::Succeed, fast_config());
    let job_id = JobId::new();
    let payload = start_payload(&job_id, None);

    let job = classify_fresh(&h, &payload).await;
    h.executor.run(job).await.unwrap();

    let updates = h.publisher.updates.lock().unwrap();
    assert!(!updates.is_empty());
    let mut last = 0u8;
    for update in updates.iter() {
        assert!(
            update.progress_percentage >= last,
            "progress regressed: {} after {}",
            update.progress_percentage,
            last
        );
        last = update.progress_percentage;
    }
}
