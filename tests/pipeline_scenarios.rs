use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_test::assert_ok;

use subqueue::cancel::{CancellationToken, StopPoll};
use subqueue::config::Config;
use subqueue::error::{Result, SubqueueError};
use subqueue::events::{EventReceiver, PipelineEvent, ProgressCallback};
use subqueue::media::{AudioExtractor, ExtractedAudio};
use subqueue::orchestrator::{FileOutcome, FileState, Orchestrator, RunSummary, Stages};
use subqueue::progress::{Eta, ProgressTracker};
use subqueue::queue::{Settings, WorkItemId, WorkQueue, WorkStatus};
use subqueue::segment::TranscriptSegment;
use subqueue::subtitle::{EmitContext, SubtitleEmitter};
use subqueue::throttle::ThrottleManager;
use subqueue::transcribe::Transcriber;
use subqueue::translate::Translator;

fn stem(path: &Path) -> String {
    path.file_stem().unwrap().to_string_lossy().to_string()
}

/// Reports fixed durations and optionally enqueues extra work while running.
struct FakeExtractor {
    durations: HashMap<String, f64>,
    enqueue_on: Option<(String, WorkQueue, PathBuf)>,
    audio_dir: Option<PathBuf>,
}

impl FakeExtractor {
    fn new() -> Self {
        Self { durations: HashMap::new(), enqueue_on: None, audio_dir: None }
    }
}

#[async_trait]
impl AudioExtractor for FakeExtractor {
    async fn extract(&self, file_path: &Path, on_progress: ProgressCallback) -> Result<ExtractedAudio> {
        let name = stem(file_path);
        if let Some((trigger, queue, extra)) = &self.enqueue_on {
            if *trigger == name {
                queue.enqueue(extra, Settings::default());
            }
        }
        on_progress(0.0, "probing");

        let audio_path = match &self.audio_dir {
            Some(dir) => {
                let path = dir.join(format!("{}.wav", name));
                tokio::fs::write(&path, b"RIFF").await?;
                path
            }
            None => file_path.with_extension("wav"),
        };
        on_progress(100.0, "done");

        Ok(ExtractedAudio {
            audio_path,
            duration_seconds: self.durations.get(&name).copied().unwrap_or(12.0),
        })
    }
}

/// Two segments per file, none for stems listed as silent, an error for stems
/// listed as failing. The `block_on` stem signals the run's token (as a user
/// would) and waits for the stop poll. The `gate` stem waits for a notify.
struct FakeTranscriber {
    silent: Vec<String>,
    failing: Vec<String>,
    block_on: Option<(String, CancellationToken)>,
    gate: Option<(String, Arc<Notify>)>,
}

impl FakeTranscriber {
    fn new() -> Self {
        Self {
            silent: Vec::new(),
            failing: Vec::new(),
            block_on: None,
            gate: None,
        }
    }

    fn segments_for(name: &str) -> Vec<TranscriptSegment> {
        vec![
            TranscriptSegment::new(0.0, 2.5, format!("{} first line", name)),
            TranscriptSegment::new(2.5, 6.0, format!("{} second line", name)),
        ]
    }
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(
        &self,
        audio_path: &Path,
        _language: &str,
        _model_name: &str,
        on_progress: ProgressCallback,
        should_stop: StopPoll,
    ) -> Result<Vec<TranscriptSegment>> {
        let name = stem(audio_path);

        if let Some((trigger, gate)) = &self.gate {
            if *trigger == name {
                on_progress(10.0, "gated");
                gate.notified().await;
            }
        }

        if let Some((trigger, token)) = &self.block_on {
            if *trigger == name {
                on_progress(30.0, "decoding");
                token.signal();
                while !should_stop() {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                return Err(SubqueueError::Model("Transcription cancelled".to_string()));
            }
        }

        on_progress(50.0, "decoding");
        if self.failing.contains(&name) {
            return Err(SubqueueError::Model("decoder crashed".to_string()));
        }
        if self.silent.contains(&name) {
            return Ok(Vec::new());
        }
        Ok(Self::segments_for(&name))
    }
}

struct PanickingTranscriber;

#[async_trait]
impl Transcriber for PanickingTranscriber {
    async fn transcribe(
        &self,
        _audio_path: &Path,
        _language: &str,
        _model_name: &str,
        _on_progress: ProgressCallback,
        _should_stop: StopPoll,
    ) -> Result<Vec<TranscriptSegment>> {
        panic!("decoder state corrupted");
    }
}

/// Prefixes the target language; fails for any text starting with `fail_prefix`.
struct FakeTranslator {
    fail_prefix: Option<String>,
    calls: AtomicUsize,
}

impl FakeTranslator {
    fn new(fail_prefix: Option<&str>) -> Self {
        Self { fail_prefix: fail_prefix.map(str::to_string), calls: AtomicUsize::new(0) }
    }
}

#[async_trait]
impl Translator for FakeTranslator {
    async fn translate(&self, text: &str, _source_lang: &str, target_lang: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.fail_prefix {
            Some(prefix) if text.starts_with(prefix.as_str()) => {
                Err(SubqueueError::Translation("connection refused".to_string()))
            }
            _ => Ok(format!("[{}] {}", target_lang, text)),
        }
    }
}

#[derive(Debug, Clone)]
struct Emission {
    input_path: PathBuf,
    segments: Vec<TranscriptSegment>,
    translated: Option<Vec<TranscriptSegment>>,
}

#[derive(Default)]
struct RecordingEmitter {
    emissions: Mutex<Vec<Emission>>,
}

#[async_trait]
impl SubtitleEmitter for RecordingEmitter {
    async fn emit(
        &self,
        segments: &[TranscriptSegment],
        translated: Option<&[TranscriptSegment]>,
        ctx: &EmitContext,
    ) -> Result<Vec<PathBuf>> {
        self.emissions.lock().push(Emission {
            input_path: ctx.input_path.clone(),
            segments: segments.to_vec(),
            translated: translated.map(<[TranscriptSegment]>::to_vec),
        });

        let name = stem(&ctx.input_path);
        let mut outputs = vec![ctx.output_dir.join(format!("{}.srt", name))];
        if translated.is_some() {
            outputs.push(ctx.output_dir.join(format!("{}.{}.srt", name, ctx.target_language)));
        }
        Ok(outputs)
    }
}

struct Harness {
    orchestrator: Arc<Orchestrator>,
    queue: WorkQueue,
    translator: Arc<FakeTranslator>,
    emitter: Arc<RecordingEmitter>,
}

fn harness(
    extractor: FakeExtractor,
    transcriber: impl Transcriber + 'static,
    translator: FakeTranslator,
    queue: WorkQueue,
) -> Harness {
    let config = Config::default();
    let translator = Arc::new(translator);
    let emitter = Arc::new(RecordingEmitter::default());

    let stages = Stages {
        extractor: Arc::new(extractor),
        transcriber: Arc::new(transcriber),
        translator: translator.clone(),
        emitter: emitter.clone(),
    };
    let orchestrator = Orchestrator::new(
        config.clone(),
        stages,
        Arc::new(ThrottleManager::new(10_000, Duration::ZERO)),
        Arc::new(Mutex::new(ProgressTracker::new(config.pipeline.stage_weights).unwrap())),
        queue.clone(),
    );

    Harness { orchestrator: Arc::new(orchestrator), queue, translator, emitter }
}

fn translating() -> Settings {
    Settings {
        enable_translation: true,
        target_language: "fr".to_string(),
        ..Settings::default()
    }
}

fn enqueue_all(queue: &WorkQueue, names: &[&str], settings: &Settings) -> Vec<WorkItemId> {
    names
        .iter()
        .map(|name| queue.enqueue(format!("/media/{}", name), settings.clone()))
        .collect()
}

async fn drain(mut events: EventReceiver) -> Vec<PipelineEvent> {
    let mut collected = Vec::new();
    while let Some(event) = events.recv().await {
        collected.push(event);
    }
    collected
}

async fn run_to_end(h: &Harness, cancel: CancellationToken) -> (RunSummary, Vec<PipelineEvent>) {
    let (handle, events) = h.orchestrator.spawn(cancel);
    let summary = assert_ok!(handle.wait().await);
    (summary, drain(events).await)
}

fn assert_finished_once_and_last(events: &[PipelineEvent]) {
    let finished = events.iter().filter(|e| **e == PipelineEvent::Finished).count();
    assert_eq!(finished, 1, "events: {:?}", events);
    assert_eq!(events.last(), Some(&PipelineEvent::Finished));
}

#[tokio::test]
async fn translation_failures_in_one_file_fall_back_to_original_text() {
    let queue = WorkQueue::new();
    let ids = enqueue_all(&queue, &["one.mp4", "two.mp4", "three.mp4"], &translating());
    let h = harness(FakeExtractor::new(), FakeTranscriber::new(), FakeTranslator::new(Some("two")), queue);

    let (summary, events) = run_to_end(&h, CancellationToken::new()).await;

    assert_eq!(summary.completed, 3);
    for id in &ids {
        assert_eq!(h.queue.get(*id).unwrap().status, WorkStatus::Completed);
    }

    let second = &summary.reports[1];
    assert!(second.segments.iter().all(|s| s.translated_text.as_deref() == Some(s.text.as_str())));
    let first = &summary.reports[0];
    assert_eq!(first.segments[0].translated_text.as_deref(), Some("[fr] one first line"));

    let emissions = h.emitter.emissions.lock().clone();
    assert_eq!(emissions.len(), 3);
    let fallback = emissions[1].translated.as_ref().unwrap();
    assert_eq!(fallback[0].text, "two first line");

    assert_eq!(h.translator.calls.load(Ordering::SeqCst), 6);
    let completed = events
        .iter()
        .filter(|e| matches!(e, PipelineEvent::FileCompleted { .. }))
        .count();
    assert_eq!(completed, 6);
    assert!(events
        .iter()
        .any(|e| matches!(e, PipelineEvent::Status(m) if m.contains("2 of 2 segments kept their original text"))));
    assert_finished_once_and_last(&events);
}

#[tokio::test]
async fn cancel_during_second_transcription_leaves_rest_pending() {
    let cancel = CancellationToken::new();
    let queue = WorkQueue::new();
    let ids = enqueue_all(&queue, &["one.mp4", "two.mp4", "three.mp4"], &Settings::default());

    let transcriber = FakeTranscriber {
        block_on: Some(("two".to_string(), cancel.clone())),
        ..FakeTranscriber::new()
    };
    let h = harness(FakeExtractor::new(), transcriber, FakeTranslator::new(None), queue);

    let (summary, events) = run_to_end(&h, cancel).await;

    assert_eq!(h.queue.get(ids[0]).unwrap().status, WorkStatus::Completed);
    assert_eq!(h.queue.get(ids[1]).unwrap().status, WorkStatus::Cancelled);
    assert_eq!(h.queue.get(ids[2]).unwrap().status, WorkStatus::Pending);

    assert_eq!(summary.completed, 1);
    assert_eq!(summary.cancelled, 1);
    assert_eq!(summary.reports[1].outcome, FileOutcome::Cancelled);
    assert_eq!(summary.reports[1].final_state, FileState::Cancelled);

    assert_eq!(h.emitter.emissions.lock().len(), 1);
    assert!(!events.iter().any(|e| matches!(
        e,
        PipelineEvent::FileCompleted { input_path, .. } if input_path.ends_with("two.mp4")
    )));
    assert_finished_once_and_last(&events);
}

#[tokio::test]
async fn empty_transcription_becomes_placeholder_segment() {
    let queue = WorkQueue::new();
    let id = queue.enqueue("/media/quiet.wav", Settings::default());

    let mut extractor = FakeExtractor::new();
    extractor.durations.insert("quiet".to_string(), 42.5);
    let transcriber = FakeTranscriber { silent: vec!["quiet".to_string()], ..FakeTranscriber::new() };
    let h = harness(extractor, transcriber, FakeTranslator::new(None), queue);

    let (summary, _events) = run_to_end(&h, CancellationToken::new()).await;

    assert_eq!(h.queue.get(id).unwrap().status, WorkStatus::Completed);
    let segments = &summary.reports[0].segments;
    assert_eq!(segments.len(), 1);
    assert_eq!(segments[0].start, 0.0);
    assert_eq!(segments[0].end, 42.5);
    assert_eq!(segments[0].text, "[no speech detected]");
}

#[tokio::test]
async fn translation_disabled_emits_transcript_unchanged() {
    let queue = WorkQueue::new();
    let id = queue.enqueue("/media/talk.mkv", Settings::default());
    let h = harness(FakeExtractor::new(), FakeTranscriber::new(), FakeTranslator::new(None), queue);

    let (summary, events) = run_to_end(&h, CancellationToken::new()).await;

    assert_eq!(summary.completed, 1);
    assert_eq!(h.translator.calls.load(Ordering::SeqCst), 0);

    let emissions = h.emitter.emissions.lock().clone();
    assert_eq!(emissions[0].segments, FakeTranscriber::segments_for("talk"));
    assert!(emissions[0].translated.is_none());

    let item = h.queue.get(id).unwrap();
    assert_eq!(item.outputs, vec![PathBuf::from("/media/talk.srt")]);
    assert!(events.contains(&PipelineEvent::FileCompleted {
        input_path: PathBuf::from("/media/talk.mkv"),
        output_path: PathBuf::from("/media/talk.srt"),
    }));
}

#[tokio::test]
async fn statuses_only_move_forward() {
    let queue = WorkQueue::new();
    let ids = enqueue_all(&queue, &["a.mp4", "notes.txt", "c.mov"], &translating());
    let h = harness(FakeExtractor::new(), FakeTranscriber::new(), FakeTranslator::new(Some("c")), queue);

    let (handle, mut events) = h.orchestrator.spawn(CancellationToken::new());

    fn rank(status: WorkStatus) -> u8 {
        match status {
            WorkStatus::Pending => 0,
            WorkStatus::Processing => 1,
            _ => 2,
        }
    }

    let mut seen: HashMap<WorkItemId, WorkStatus> = HashMap::new();
    while let Some(event) = events.recv().await {
        for item in h.queue.list() {
            if let Some(previous) = seen.insert(item.id, item.status) {
                assert!(rank(item.status) >= rank(previous), "{} went {} -> {}", item.id, previous, item.status);
                if previous.is_terminal() {
                    assert_eq!(previous, item.status);
                }
            }
        }
        if event == PipelineEvent::Finished {
            break;
        }
    }

    let summary = assert_ok!(handle.wait().await);
    assert_eq!(summary.completed, 2);
    assert_eq!(summary.failed, 1);

    let unsupported = h.queue.get(ids[1]).unwrap();
    assert_eq!(unsupported.status, WorkStatus::Failed);
    assert!(unsupported.message.unwrap().contains("not a recognized media file"));
}

#[tokio::test]
async fn progress_never_moves_backwards_within_a_file() {
    let queue = WorkQueue::new();
    enqueue_all(&queue, &["one.mp4", "two.mp4"], &translating());
    let h = harness(FakeExtractor::new(), FakeTranscriber::new(), FakeTranslator::new(None), queue);

    let (summary, events) = run_to_end(&h, CancellationToken::new()).await;
    assert_eq!(summary.completed, 2);

    let mut last = 0.0;
    for event in &events {
        match event {
            PipelineEvent::Status(m) if m.ends_with("starting") => last = 0.0,
            PipelineEvent::Progress { percent, .. } => {
                assert!(*percent >= last, "progress went {} -> {}", last, percent);
                last = *percent;
            }
            _ => {}
        }
    }
    assert_eq!(last, 100.0);

    let snapshot = h.orchestrator.progress_snapshot();
    assert_eq!(snapshot.eta_remaining_files, Eta::Known(Duration::ZERO));
}

#[tokio::test]
async fn empty_queue_reports_nothing_to_do() {
    let h = harness(FakeExtractor::new(), FakeTranscriber::new(), FakeTranslator::new(None), WorkQueue::new());

    let (summary, events) = run_to_end(&h, CancellationToken::new()).await;

    assert!(summary.reports.is_empty());
    assert_eq!(events.len(), 2);
    assert!(matches!(&events[0], PipelineEvent::Status(m) if m.contains("Nothing to do")));
    assert_eq!(events[1], PipelineEvent::Finished);
}

#[tokio::test]
async fn items_enqueued_during_a_run_are_processed() {
    let queue = WorkQueue::new();
    let first = queue.enqueue("/media/one.mp4", Settings::default());

    let mut extractor = FakeExtractor::new();
    extractor.enqueue_on = Some(("one".to_string(), queue.clone(), PathBuf::from("/media/late.mp4")));
    let h = harness(extractor, FakeTranscriber::new(), FakeTranslator::new(None), queue);

    let (summary, events) = run_to_end(&h, CancellationToken::new()).await;

    assert_eq!(summary.completed, 2);
    assert_eq!(h.queue.get(first).unwrap().status, WorkStatus::Completed);
    let late = h.queue.list().into_iter().find(|i| i.input_path.ends_with("late.mp4")).unwrap();
    assert_eq!(late.status, WorkStatus::Completed);
    assert!(events.iter().any(|e| matches!(e, PipelineEvent::Status(m) if m.starts_with("[2/2] late.mp4"))));
    assert_finished_once_and_last(&events);
}

#[tokio::test]
async fn panicking_stage_fails_item_and_finishes_once() {
    let queue = WorkQueue::new();
    let ids = enqueue_all(&queue, &["a.mp4", "b.mp4"], &Settings::default());
    let h = harness(FakeExtractor::new(), PanickingTranscriber, FakeTranslator::new(None), queue);

    let (handle, events) = h.orchestrator.spawn(CancellationToken::new());
    let result = handle.wait().await;
    let events = drain(events).await;

    assert!(matches!(result, Err(SubqueueError::Internal(_))));
    assert_finished_once_and_last(&events);
    assert!(events
        .iter()
        .any(|e| matches!(e, PipelineEvent::Error(m) if m.starts_with("Run aborted unexpectedly"))));

    let interrupted = h.queue.get(ids[0]).unwrap();
    assert_eq!(interrupted.status, WorkStatus::Failed);
    assert!(interrupted.message.unwrap().contains("Run aborted unexpectedly"));
    assert_eq!(h.queue.get(ids[1]).unwrap().status, WorkStatus::Pending);

    assert_ok!(h.queue.remove(ids[0]));
    assert_ok!(h.queue.clear());
}

#[tokio::test]
async fn extracted_audio_is_removed_after_transcription() {
    let scratch = assert_fs::TempDir::new().unwrap();
    let queue = WorkQueue::new();
    let ids = enqueue_all(&queue, &["talk.mp4", "broken.mp4"], &Settings::default());

    let mut extractor = FakeExtractor::new();
    extractor.audio_dir = Some(scratch.path().to_path_buf());
    let transcriber = FakeTranscriber { failing: vec!["broken".to_string()], ..FakeTranscriber::new() };
    let h = harness(extractor, transcriber, FakeTranslator::new(None), queue);

    let (summary, _events) = run_to_end(&h, CancellationToken::new()).await;

    assert_eq!(summary.completed, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(h.queue.get(ids[1]).unwrap().status, WorkStatus::Failed);

    let leftover: Vec<_> = std::fs::read_dir(scratch.path()).unwrap().collect();
    assert!(leftover.is_empty(), "audio left behind: {:?}", leftover);
}

#[tokio::test]
async fn second_run_while_active_is_refused_and_leaves_queue_alone() {
    let gate = Arc::new(Notify::new());
    let queue = WorkQueue::new();
    let ids = enqueue_all(&queue, &["gate.mp4", "later.mp4"], &Settings::default());

    let transcriber = FakeTranscriber { gate: Some(("gate".to_string(), Arc::clone(&gate))), ..FakeTranscriber::new() };
    let h = harness(FakeExtractor::new(), transcriber, FakeTranslator::new(None), queue);

    let (handle, mut events) = h.orchestrator.spawn(CancellationToken::new());
    let mut first_run_events = Vec::new();
    while let Some(event) = events.recv().await {
        let transcribing = matches!(&event, PipelineEvent::Progress { message, .. } if message.contains("gated"));
        first_run_events.push(event);
        if transcribing {
            break;
        }
    }

    let (sink, mut refused_events) = subqueue::events::EventSink::channel();
    let err = h.orchestrator.run(&CancellationToken::new(), &sink).await.unwrap_err();
    assert!(matches!(err, SubqueueError::Conflict(_)));
    assert!(matches!(refused_events.try_recv().unwrap(), PipelineEvent::Error(_)));
    assert_eq!(refused_events.try_recv().unwrap(), PipelineEvent::Finished);
    assert!(refused_events.try_recv().is_err());

    assert_eq!(h.queue.get(ids[0]).unwrap().status, WorkStatus::Processing);
    assert_eq!(h.queue.get(ids[1]).unwrap().status, WorkStatus::Pending);

    gate.notify_one();
    let summary = assert_ok!(handle.wait().await);
    first_run_events.extend(drain(events).await);

    assert_eq!(summary.completed, 2);
    assert_finished_once_and_last(&first_run_events);
}
