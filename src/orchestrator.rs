//! Drives queued work items through the processing stages.
//!
//! Files are handled one at a time on a single background task. For each
//! file the orchestrator walks `Idle -> ExtractingAudio -> Transcribing ->
//! (Translating) -> EmittingOutput -> Done`, polling the cancellation token
//! on every state entry and reporting through [`PipelineEvent`]s. Failures
//! stay inside the file that raised them; translation failures degrade to
//! the original text instead of failing the file.

use parking_lot::Mutex;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cancel::CancellationToken;
use crate::config::Config;
use crate::error::{ErrorKind, Result, SubqueueError};
use crate::events::{EventReceiver, EventSink, PipelineEvent, ProgressCallback};
use crate::media::{AudioExtractor, AudioExtractorFactory};
use crate::progress::{ProgressSnapshot, ProgressTracker, Stage};
use crate::queue::{WorkItem, WorkItemId, WorkQueue, WorkStatus};
use crate::segment::TranscriptSegment;
use crate::subtitle::{EmitContext, SrtEmitter, SubtitleEmitter};
use crate::throttle::ThrottleManager;
use crate::transcribe::{Transcriber, TranscriberFactory};
use crate::translate::{Translator, TranslatorFactory};

/// The four stage collaborators a run depends on.
#[derive(Clone)]
pub struct Stages {
    pub extractor: Arc<dyn AudioExtractor>,
    pub transcriber: Arc<dyn Transcriber>,
    pub translator: Arc<dyn Translator>,
    pub emitter: Arc<dyn SubtitleEmitter>,
}

/// Per-file state machine position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    Idle,
    ExtractingAudio,
    Transcribing,
    Translating,
    EmittingOutput,
    Done,
    Failed,
    Cancelled,
}

impl From<Stage> for FileState {
    fn from(stage: Stage) -> Self {
        match stage {
            Stage::ExtractingAudio => FileState::ExtractingAudio,
            Stage::Transcribing => FileState::Transcribing,
            Stage::Translating => FileState::Translating,
            Stage::EmittingOutput => FileState::EmittingOutput,
        }
    }
}

/// Result of one stage of one file.
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutcome {
    pub stage: Stage,
    pub ok: bool,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
}

impl StageOutcome {
    fn ok(stage: Stage) -> Self {
        Self { stage, ok: true, error_kind: None, error_message: None }
    }

    fn failed(stage: Stage, err: &SubqueueError) -> Self {
        Self {
            stage,
            ok: false,
            error_kind: Some(err.kind()),
            error_message: Some(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FileOutcome {
    Completed { outputs: Vec<PathBuf> },
    Failed { kind: ErrorKind, message: String },
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct FileReport {
    pub id: WorkItemId,
    pub input_path: PathBuf,
    pub final_state: FileState,
    pub outcome: FileOutcome,
    pub stages: Vec<StageOutcome>,
    /// Segments as emitted; empty when emission was not reached
    pub segments: Vec<TranscriptSegment>,
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub reports: Vec<FileReport>,
}

impl RunSummary {
    fn record(&mut self, report: FileReport) {
        match report.outcome {
            FileOutcome::Completed { .. } => self.completed += 1,
            FileOutcome::Failed { .. } => self.failed += 1,
            FileOutcome::Cancelled => self.cancelled += 1,
        }
        self.reports.push(report);
    }
}

/// Bookkeeping for the file currently moving through the stages
struct FileRun {
    state: FileState,
    stages: Vec<StageOutcome>,
    segments: Vec<TranscriptSegment>,
    label: String,
}

enum StageFlow {
    Emitted(Vec<PathBuf>),
    Cancelled,
}

/// Handle to a run spawned on a background task.
pub struct RunHandle {
    cancel: CancellationToken,
    task: JoinHandle<Result<RunSummary>>,
}

impl RunHandle {
    pub fn cancel(&self) {
        self.cancel.signal();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn wait(self) -> Result<RunSummary> {
        self.task
            .await
            .map_err(|e| SubqueueError::Internal(format!("Run task failed: {}", e)))?
    }
}

/// Clears the running flag even if the run unwinds.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct Orchestrator {
    config: Config,
    stages: Stages,
    throttle: Arc<ThrottleManager>,
    progress: Arc<Mutex<ProgressTracker>>,
    queue: WorkQueue,
    running: AtomicBool,
    // Item currently between `take_next` and its terminal status
    active: Mutex<Option<WorkItemId>>,
}

impl Orchestrator {
    pub fn new(
        config: Config,
        stages: Stages,
        throttle: Arc<ThrottleManager>,
        progress: Arc<Mutex<ProgressTracker>>,
        queue: WorkQueue,
    ) -> Self {
        Self {
            config,
            stages,
            throttle,
            progress,
            queue,
            running: AtomicBool::new(false),
            active: Mutex::new(None),
        }
    }

    /// Wire the ffmpeg, whisper.cpp, Ollama and SRT collaborators from config.
    pub fn from_config(config: Config, queue: WorkQueue) -> Result<Self> {
        config.validate()?;

        let stages = Stages {
            extractor: Arc::from(AudioExtractorFactory::create_extractor(
                config.media.clone(),
                &config.pipeline,
            )?),
            transcriber: Arc::from(TranscriberFactory::create_default(config.transcriber.clone())),
            translator: Arc::from(TranslatorFactory::create_translator(config.translate.clone())?),
            emitter: Arc::new(SrtEmitter::new(&config.media, &config.pipeline)),
        };
        let throttle = Arc::new(ThrottleManager::from_config(&config.throttle));
        let progress = Arc::new(Mutex::new(ProgressTracker::new(config.pipeline.stage_weights)?));

        Ok(Self::new(config, stages, throttle, progress, queue))
    }

    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    pub fn progress_snapshot(&self) -> ProgressSnapshot {
        self.progress.lock().snapshot()
    }

    /// Process the queue on the current task. `Finished` is emitted last.
    pub async fn run(&self, cancel: &CancellationToken, events: &EventSink) -> Result<RunSummary> {
        let result = self.run_guarded(cancel, events).await;
        events.finished();
        result
    }

    /// Process the queue on a background task.
    ///
    /// The returned receiver yields every event of the run and ends with
    /// exactly one `Finished`, including when the run task panics.
    pub fn spawn(self: &Arc<Self>, cancel: CancellationToken) -> (RunHandle, EventReceiver) {
        let (events, rx) = EventSink::channel();
        let orchestrator = Arc::clone(self);
        let supervisor = Arc::clone(self);
        let worker_events = events.clone();
        let worker_cancel = cancel.clone();

        let task = tokio::spawn(async move {
            let worker = tokio::spawn(async move {
                orchestrator.run_guarded(&worker_cancel, &worker_events).await
            });

            let result = match worker.await {
                Ok(result) => result,
                Err(join_error) => {
                    let message = format!("Run aborted unexpectedly: {}", join_error);
                    error!("{}", message);
                    supervisor.fail_active(&message);
                    events.error(message.clone());
                    Err(SubqueueError::Internal(message))
                }
            };

            events.finished();
            result
        });

        (RunHandle { cancel, task }, rx)
    }

    /// Move the in-flight item, if any, to `Failed` once the run can no
    /// longer finish it.
    fn fail_active(&self, message: &str) {
        let Some(id) = self.active.lock().take() else {
            return;
        };
        if let Err(e) = self.queue.mark_status(id, WorkStatus::Failed) {
            warn!("Could not fail interrupted item {}: {}", id, e);
            return;
        }
        if let Err(e) = self.queue.record_message(id, message) {
            warn!("Could not record failure for {}: {}", id, e);
        }
        let name = self.queue.get(id).map(|item| item.display_name()).unwrap_or_else(|| id.to_string());
        self.progress.lock().abandon_file(&name);
    }

    async fn run_guarded(&self, cancel: &CancellationToken, events: &EventSink) -> Result<RunSummary> {
        if self.running.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            let err = SubqueueError::Conflict("A run is already in progress".to_string());
            events.error(err.to_string());
            return Err(err);
        }
        let _guard = RunGuard(&self.running);

        let result = self.process_queue(cancel, events).await;
        if let Err(e) = &result {
            error!("Run stopped: {}", e);
            events.error(format!("Run stopped: {}", e));
        }
        result
    }

    async fn process_queue(&self, cancel: &CancellationToken, events: &EventSink) -> Result<RunSummary> {
        let total = self.queue.pending_count();
        let mut summary = RunSummary::default();

        if total == 0 {
            info!("Queue is empty; nothing to do");
            events.status("Nothing to do: the queue is empty");
            return Ok(summary);
        }

        self.progress.lock().start_tracking(total);
        info!("Processing {} queued files", total);
        events.status(format!("Processing {} file(s)", total));

        let mut index = 0;
        loop {
            if cancel.is_signaled() {
                events.status("Cancelled; remaining files stay queued");
                break;
            }

            let Some(item) = self.queue.take_next() else {
                break;
            };
            *self.active.lock() = Some(item.id);

            let batch_size = index + 1 + self.queue.pending_count();
            self.progress.lock().set_total_files(batch_size);

            let report = match self.process_item(index, batch_size, &item, cancel, events).await {
                Ok(report) => {
                    *self.active.lock() = None;
                    report
                }
                Err(e) => {
                    self.fail_active(&format!("Run stopped: {}", e));
                    return Err(e);
                }
            };
            let stop = report.outcome == FileOutcome::Cancelled;
            summary.record(report);
            index += 1;

            if stop {
                break;
            }
        }

        events.status(format!(
            "Finished: {} completed, {} failed, {} cancelled",
            summary.completed, summary.failed, summary.cancelled
        ));
        Ok(summary)
    }

    async fn process_item(
        &self,
        index: usize,
        batch_size: usize,
        item: &WorkItem,
        cancel: &CancellationToken,
        events: &EventSink,
    ) -> Result<FileReport> {
        let name = item.display_name();
        self.progress.lock().start_file(index, &name, item.settings.enable_translation);

        let mut run = FileRun {
            state: FileState::Idle,
            stages: Vec::new(),
            segments: Vec::new(),
            label: format!("[{}/{}] {}", index + 1, batch_size, name),
        };
        info!("{}: starting", run.label);
        events.status(format!("{}: starting", run.label));

        let flow = self.run_stages(item, &mut run, cancel, events).await;

        let outcome = match flow {
            Ok(StageFlow::Emitted(outputs)) => {
                self.queue.mark_status(item.id, WorkStatus::Completed)?;
                self.queue.record_outputs(item.id, outputs.clone())?;
                let percent = {
                    let mut tracker = self.progress.lock();
                    let percent = tracker.update_file_progress(100.0);
                    tracker.complete_file(&name);
                    percent
                };
                run.state = FileState::Done;

                info!("{}: completed", run.label);
                events.progress(percent, format!("{}: done", run.label));
                for output in &outputs {
                    events.file_completed(item.input_path.clone(), output.clone());
                }
                events.status(format!("{}: completed", run.label));
                FileOutcome::Completed { outputs }
            }
            Ok(StageFlow::Cancelled) => {
                self.queue.mark_status(item.id, WorkStatus::Cancelled)?;
                self.queue.record_message(item.id, "Cancelled by request")?;
                self.progress.lock().abandon_file(&name);
                run.state = FileState::Cancelled;

                warn!("{}: cancelled", run.label);
                events.status(format!("{}: cancelled", run.label));
                FileOutcome::Cancelled
            }
            Err(err) => {
                let message = err.to_string();
                self.queue.mark_status(item.id, WorkStatus::Failed)?;
                self.queue.record_message(item.id, message.clone())?;
                self.progress.lock().abandon_file(&name);
                run.state = FileState::Failed;

                error!("{}: {}", run.label, message);
                events.error(format!("{}: {}", run.label, message));
                events.status(format!("{}: failed", run.label));
                FileOutcome::Failed { kind: err.kind(), message }
            }
        };

        Ok(FileReport {
            id: item.id,
            input_path: item.input_path.clone(),
            final_state: run.state,
            outcome,
            stages: run.stages,
            segments: run.segments,
        })
    }

    async fn run_stages(
        &self,
        item: &WorkItem,
        run: &mut FileRun,
        cancel: &CancellationToken,
        events: &EventSink,
    ) -> Result<StageFlow> {
        let settings = &item.settings;

        if !self.config.media.is_supported(&item.input_path) {
            return Err(SubqueueError::UnsupportedInput(format!(
                "{} is not a recognized media file (accepted: {})",
                item.input_path.display(),
                self.config.media.extensions.join(", ")
            )));
        }

        // Extraction
        if !self.enter_stage(Stage::ExtractingAudio, run, cancel, events) {
            return Ok(StageFlow::Cancelled);
        }
        let on_progress = self.stage_progress(Stage::ExtractingAudio, run, events);
        let audio = self
            .run_stage(
                Stage::ExtractingAudio,
                run,
                self.config.pipeline.extraction_timeout(),
                self.stages.extractor.extract(&item.input_path, on_progress),
            )
            .await?;

        // Transcription
        if !self.enter_stage(Stage::Transcribing, run, cancel, events) {
            discard_audio(&audio.audio_path).await;
            return Ok(StageFlow::Cancelled);
        }
        let on_progress = self.stage_progress(Stage::Transcribing, run, events);
        let transcribed = self
            .run_stage(
                Stage::Transcribing,
                run,
                self.config.pipeline.transcription_timeout(),
                self.stages.transcriber.transcribe(
                    &audio.audio_path,
                    &settings.language,
                    &settings.model_name,
                    on_progress,
                    cancel.stop_poll(),
                ),
            )
            .await;
        discard_audio(&audio.audio_path).await;
        if cancel.is_signaled() {
            return Ok(StageFlow::Cancelled);
        }
        let mut segments = transcribed?;

        if segments.is_empty() {
            info!("{}: no speech detected; using a placeholder segment", run.label);
            events.status(format!("{}: no speech detected", run.label));
            segments.push(TranscriptSegment::placeholder(
                audio.duration_seconds,
                &self.config.subtitle.placeholder_text,
            ));
        }

        // Translation
        if settings.enable_translation {
            if !self.enter_stage(Stage::Translating, run, cancel, events) {
                return Ok(StageFlow::Cancelled);
            }
            if !self.translate_segments(item, &mut segments, run, cancel, events).await {
                return Ok(StageFlow::Cancelled);
            }
        }

        // Emission
        if !self.enter_stage(Stage::EmittingOutput, run, cancel, events) {
            return Ok(StageFlow::Cancelled);
        }
        let translated: Option<Vec<TranscriptSegment>> = settings
            .enable_translation
            .then(|| segments.iter().map(TranscriptSegment::translated_view).collect());
        let ctx = EmitContext {
            input_path: item.input_path.clone(),
            output_dir: output_dir_for(&item.input_path, settings.output_dir.as_deref()),
            subtitle_mode: settings.subtitle_mode,
            target_language: settings.target_language.clone(),
        };
        let outputs = self
            .run_stage(
                Stage::EmittingOutput,
                run,
                self.config.pipeline.emission_timeout(),
                self.stages.emitter.emit(&segments, translated.as_deref(), &ctx),
            )
            .await?;

        run.segments = segments;
        Ok(StageFlow::Emitted(outputs))
    }

    /// Translate every segment, falling back to the original text on failure.
    /// Returns false when cancelled part way.
    async fn translate_segments(
        &self,
        item: &WorkItem,
        segments: &mut [TranscriptSegment],
        run: &mut FileRun,
        cancel: &CancellationToken,
        events: &EventSink,
    ) -> bool {
        let settings = &item.settings;
        let worker_count = self.config.throttle.worker_count;
        let progress = self.stage_progress(Stage::Translating, run, events);
        let total = segments.len();
        let mut failures = 0;
        let mut last_error: Option<SubqueueError> = None;

        for (idx, segment) in segments.iter_mut().enumerate() {
            if cancel.is_signaled() {
                return false;
            }

            if !self.throttle.wait_if_needed(worker_count, cancel).await {
                return false;
            }

            let source = segment.language_tag.as_deref().unwrap_or(&settings.language);
            match self
                .stages
                .translator
                .translate(&segment.text, source, &settings.target_language)
                .await
            {
                Ok(translation) => segment.translated_text = Some(translation),
                Err(e) => {
                    warn!("{}: segment {}/{} kept original text: {}", run.label, idx + 1, total, e);
                    segment.translated_text = Some(segment.text.clone());
                    failures += 1;
                    last_error = Some(e);
                }
            }

            progress(
                (idx + 1) as f64 / total as f64 * 100.0,
                &format!("segment {}/{}", idx + 1, total),
            );
        }

        match last_error {
            Some(err) => {
                events.status(format!(
                    "{}: {} of {} segments kept their original text",
                    run.label, failures, total
                ));
                run.stages.push(StageOutcome::failed(Stage::Translating, &err));
            }
            None => run.stages.push(StageOutcome::ok(Stage::Translating)),
        }
        true
    }

    /// Poll for cancellation, then move the file into `stage`.
    fn enter_stage(&self, stage: Stage, run: &mut FileRun, cancel: &CancellationToken, events: &EventSink) -> bool {
        if cancel.is_signaled() {
            return false;
        }
        run.state = stage.into();
        let percent = self.progress.lock().enter_stage(stage);
        events.progress(percent, format!("{}: {}", run.label, stage));
        true
    }

    /// Await a stage call under its timeout and record the outcome.
    async fn run_stage<T, F>(&self, stage: Stage, run: &mut FileRun, timeout: Duration, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let result = match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(timeout_error(stage, timeout)),
        };

        match &result {
            Ok(_) => run.stages.push(StageOutcome::ok(stage)),
            Err(err) => run.stages.push(StageOutcome::failed(stage, err)),
        }
        result
    }

    /// Progress callback mapping a collaborator's 0-100 onto the stage band.
    fn stage_progress(&self, stage: Stage, run: &FileRun, events: &EventSink) -> ProgressCallback {
        let tracker = Arc::clone(&self.progress);
        let events = events.clone();
        let label = run.label.clone();
        Arc::new(move |percent: f64, message: &str| {
            let file_percent = tracker.lock().update_stage_progress(percent / 100.0);
            events.emit(PipelineEvent::Progress {
                percent: file_percent,
                message: format!("{}: {} ({})", label, stage, message),
            });
        })
    }
}

fn timeout_error(stage: Stage, timeout: Duration) -> SubqueueError {
    let message = format!("{} timed out after {}s", stage, timeout.as_secs());
    match stage {
        Stage::Transcribing => SubqueueError::Model(message),
        Stage::Translating => SubqueueError::Translation(message),
        Stage::ExtractingAudio | Stage::EmittingOutput => SubqueueError::ExternalTool(message),
    }
}

/// Delete extracted audio once transcription no longer needs it.
async fn discard_audio(audio_path: &Path) {
    match tokio::fs::remove_file(audio_path).await {
        Ok(()) => debug!("Removed extracted audio {}", audio_path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove extracted audio {}: {}", audio_path.display(), e),
    }
}

fn output_dir_for(input_path: &Path, configured: Option<&Path>) -> PathBuf {
    match configured {
        Some(dir) => dir.to_path_buf(),
        None => input_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".")),
    }
}
