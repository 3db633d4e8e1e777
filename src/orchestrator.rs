//! Multi-modal interaction orchestrator
//!
//! One task owns the [`SessionState`] and every mutable resource. Camera
//! sampling, descriptor extraction, recognizer timers and remote turns run as
//! spawned tasks that report back through a single event queue. Each report
//! carries the epoch that was current when the work started; anything
//! stamped with an older epoch is dropped on arrival.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::Config;
use crate::customer::{Descriptor, TurnRecord};
use crate::interrupt::{InterruptConfig, InterruptionMonitor};
use crate::lipsync::{LipSync, speech_duration};
use crate::session::{Effect, Input, Mode, SessionState, SessionTimings, TurnKind};
use crate::store::{self, CustomerStore, MatchSettings};
use crate::turn::{ResponseService, TurnExecutor, TurnOutcome, TurnRequest, TurnTexts};
use crate::vision::{
    BoundingBox, Camera, CameraBackoff, CaptureConfig, Detection, FaceAnalyzer, Frame, crop_face,
    encode_jpeg,
};
use crate::voice::{
    AudioChunk, AudioClip, AudioOutput, PlaybackHandle, RecognitionEvent, RecognitionSink,
    SAMPLE_RATE, SpeechRecognizer, energy,
};
use crate::{Error, ErrorKind, Result};

/// Lip-sync and playback polling period
pub const ANIMATION_TICK: Duration = Duration::from_millis(50);

/// Extra time a clip may take past its length before playback is abandoned
pub const PLAYBACK_GRACE: Duration = Duration::from_secs(2);

/// Extra time past the response timeout before a turn is abandoned
pub const TURN_GRACE: Duration = Duration::from_secs(2);

/// Persistent user-facing degradation notices
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Advisory {
    CameraUnavailable,
    FaceRecognitionUnavailable,
    MicrophoneUnavailable,
    SpeechUnavailable,
    StorageVolatile,
}

impl Advisory {
    /// Notice raised when camera sampling keeps failing with `kind`
    #[must_use]
    pub const fn for_sampling_failure(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::ModelLoadFailure => Self::FaceRecognitionUnavailable,
            _ => Self::CameraUnavailable,
        }
    }
}

/// What the renderer sees
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub mode: Mode,
    pub customer_id: Option<String>,
    pub is_new_customer: bool,
    pub last_transcript: String,
    pub last_response_text: String,
    pub lip_sync: f32,
    pub face_available: bool,
    pub advisories: Vec<Advisory>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            mode: Mode::Idle,
            customer_id: None,
            is_new_customer: false,
            last_transcript: String::new(),
            last_response_text: String::new(),
            lip_sync: 0.0,
            face_available: false,
            advisories: Vec::new(),
        }
    }
}

/// External collaborators
pub struct Collaborators {
    pub store: Arc<dyn CustomerStore>,
    pub camera: Option<Arc<dyn Camera>>,
    pub analyzer: Option<Arc<dyn FaceAnalyzer>>,
    pub recognizer: Option<Arc<dyn SpeechRecognizer>>,
    pub output: Option<Arc<dyn AudioOutput>>,
    pub responder: Arc<dyn ResponseService>,
    /// Microphone chunks for barge-in detection
    pub microphone: Option<broadcast::Receiver<AudioChunk>>,
}

/// Orchestrator tuning
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub capture: CaptureConfig,
    pub matching: MatchSettings,
    pub camera_tick: Duration,
    pub presence_interval: Duration,
    pub absence_frames: u32,
    pub timings: SessionTimings,
    pub interrupt: InterruptConfig,
    pub response_timeout: Duration,
    pub history_turns: usize,
    pub texts: TurnTexts,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            capture: CaptureConfig::default(),
            matching: MatchSettings::default(),
            camera_tick: Duration::from_millis(100),
            presence_interval: Duration::from_secs(1),
            absence_frames: 3,
            timings: SessionTimings::default(),
            interrupt: InterruptConfig::default(),
            response_timeout: Duration::from_secs(10),
            history_turns: 10,
            texts: TurnTexts::default(),
        }
    }
}

impl OrchestratorSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            capture: config.face.capture,
            matching: config.face.matching,
            camera_tick: config.camera.tick,
            presence_interval: config.face.presence_interval,
            absence_frames: config.face.absence_frames,
            timings: config.speech.timings,
            interrupt: config.interrupt,
            response_timeout: config.response.timeout,
            history_turns: config.response.history_turns,
            texts: config.texts.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sampling {
    Capture,
    Presence,
}

enum Event {
    Frame {
        epoch: u64,
        sampling: Sampling,
        result: Result<(Frame, Vec<Detection>)>,
    },
    Descriptor {
        epoch: u64,
        result: Result<Descriptor>,
    },
    Recognition {
        epoch: u64,
        event: RecognitionEvent,
    },
    RecognizerTimer {
        epoch: u64,
    },
    TurnFinished {
        epoch: u64,
        outcome: TurnOutcome,
    },
    ForceListening,
}

enum Speech {
    Playback {
        handle: Box<dyn PlaybackHandle>,
        deadline: Instant,
    },
    Silent {
        started: Instant,
        total: Duration,
    },
}

/// Backstop for a turn task that never reports
struct TurnDeadline {
    at: Instant,
    fallback: String,
}

/// Cloneable handle for outside callers
#[derive(Clone)]
pub struct OrchestratorHandle {
    events: mpsc::UnboundedSender<Event>,
    snapshot: watch::Receiver<Snapshot>,
}

impl OrchestratorHandle {
    /// Operator trigger: drop whatever is happening and listen
    ///
    /// # Errors
    ///
    /// Returns error if the orchestrator has stopped
    pub fn force_listening(&self) -> Result<()> {
        self.events
            .send(Event::ForceListening)
            .map_err(|_| Error::Config("orchestrator not running".to_string()))
    }

    /// Whether the orchestrator task is still consuming events
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.events.is_closed()
    }

    /// Current snapshot
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.borrow().clone()
    }

    /// Watch snapshot changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshot.clone()
    }
}

/// The orchestrator task state
pub struct Orchestrator {
    state: SessionState,
    settings: OrchestratorSettings,

    store: Arc<dyn CustomerStore>,
    camera: Option<Arc<dyn Camera>>,
    analyzer: Option<Arc<dyn FaceAnalyzer>>,
    recognizer: Option<Arc<dyn SpeechRecognizer>>,
    output: Option<Arc<dyn AudioOutput>>,
    executor: Arc<TurnExecutor>,
    microphone: Option<broadcast::Receiver<AudioChunk>>,

    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: mpsc::UnboundedReceiver<Event>,
    snapshot_tx: watch::Sender<Snapshot>,

    face_enabled: bool,
    advisories: Vec<Advisory>,

    camera_epoch: u64,
    camera_busy: bool,
    camera_next_at: Instant,
    presence_next_at: Instant,
    backoff: CameraBackoff,
    last_frame: Option<Frame>,

    recognizer_epoch: u64,
    recognizer_attempts: u8,

    turn_epoch: u64,
    turn_task: Option<JoinHandle<()>>,
    turn_deadline: Option<TurnDeadline>,
    pending_clip: Option<AudioClip>,

    speech: Option<Speech>,
    lip_sync: LipSync,
    interrupt: InterruptionMonitor,
}

impl Orchestrator {
    /// Create the orchestrator and its handle
    #[must_use]
    pub fn new(
        collaborators: Collaborators,
        settings: OrchestratorSettings,
    ) -> (Self, OrchestratorHandle) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(Snapshot::default());

        let Collaborators {
            store,
            camera,
            analyzer,
            recognizer,
            output,
            responder,
            microphone,
        } = collaborators;

        let executor = Arc::new(TurnExecutor::new(
            responder,
            settings.response_timeout,
            settings.texts.clone(),
        ));
        let now = Instant::now();

        let handle = OrchestratorHandle {
            events: events_tx.clone(),
            snapshot: snapshot_rx,
        };

        let orchestrator = Self {
            state: SessionState::new(settings.capture, settings.absence_frames, settings.timings),
            interrupt: InterruptionMonitor::new(settings.interrupt),
            settings,
            store,
            camera,
            analyzer,
            recognizer,
            output,
            executor,
            microphone,
            events_tx,
            events_rx,
            snapshot_tx,
            face_enabled: false,
            advisories: Vec::new(),
            camera_epoch: 0,
            camera_busy: false,
            camera_next_at: now,
            presence_next_at: now,
            backoff: CameraBackoff::default(),
            last_frame: None,
            recognizer_epoch: 0,
            recognizer_attempts: 0,
            turn_epoch: 0,
            turn_task: None,
            turn_deadline: None,
            pending_clip: None,
            speech: None,
            lip_sync: LipSync::new(),
        };

        (orchestrator, handle)
    }

    /// Run until shutdown is signalled
    ///
    /// # Errors
    ///
    /// Currently infallible; degraded sensors are reported as advisories
    pub async fn run(mut self, mut shutdown: mpsc::Receiver<()>) -> Result<()> {
        self.initialize_sensors().await;
        self.apply(Input::SensorsReady);
        self.publish();

        let mut camera_tick = tokio::time::interval(self.settings.camera_tick);
        camera_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut animation = tokio::time::interval(ANIMATION_TICK);
        animation.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("shutdown requested");
                    break;
                }
                Some(event) = self.events_rx.recv() => self.handle_event(event),
                chunk = next_chunk(&mut self.microphone) => self.on_microphone(chunk),
                _ = camera_tick.tick() => self.sample_camera(),
                _ = animation.tick() => self.animate(),
            }
            self.publish();
        }

        self.shutdown();
        Ok(())
    }

    async fn initialize_sensors(&mut self) {
        self.face_enabled = match (&self.camera, &self.analyzer) {
            (Some(_), Some(analyzer)) => match analyzer.ready().await {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(
                        kind = ?e.kind(),
                        error = %e,
                        "face analyzer unavailable, face features disabled"
                    );
                    false
                }
            },
            _ => {
                tracing::info!("camera or face analyzer not configured, face features disabled");
                false
            }
        };
        if !self.face_enabled {
            self.advise(Advisory::FaceRecognitionUnavailable);
        }
        if self.recognizer.is_none() {
            self.advise(Advisory::SpeechUnavailable);
        }
        if self.microphone.is_none() {
            self.advise(Advisory::MicrophoneUnavailable);
        }
    }

    fn shutdown(&mut self) {
        if let Some(recognizer) = &self.recognizer {
            recognizer.stop();
        }
        if let Some(task) = self.turn_task.take() {
            task.abort();
        }
        if let Some(Speech::Playback { handle, .. }) = self.speech.take() {
            handle.stop();
        }
    }

    fn advise(&mut self, advisory: Advisory) {
        if !self.advisories.contains(&advisory) {
            tracing::warn!(?advisory, "advisory raised");
            self.advisories.push(advisory);
            self.advisories.sort_unstable();
        }
    }

    fn clear_advisory(&mut self, advisory: Advisory) {
        self.advisories.retain(|a| *a != advisory);
    }

    fn apply(&mut self, input: Input) {
        let had_identity = self.state.current_identity().is_some();
        let effects = self.state.apply(input);

        if had_identity != self.state.current_identity().is_some() {
            // Capture and presence sampling are different pipelines
            self.invalidate_camera();
            self.presence_next_at = Instant::now() + self.settings.presence_interval;
        }

        for effect in effects {
            self.run_effect(effect);
        }
    }

    fn run_effect(&mut self, effect: Effect) {
        tracing::trace!(?effect, "effect");
        match effect {
            Effect::StartRecognizer { after } => {
                self.recognizer_epoch += 1;
                self.recognizer_attempts = 0;
                if after.is_zero() {
                    self.start_recognizer();
                } else {
                    self.schedule_recognizer(after);
                }
            }
            Effect::StopRecognizer => {
                self.recognizer_epoch += 1;
                if let Some(recognizer) = &self.recognizer {
                    recognizer.stop();
                }
            }
            Effect::ArmCapture => {
                self.camera_next_at = self.camera_next_at.max(Instant::now());
            }
            Effect::PauseCapture => self.invalidate_camera(),
            Effect::CaptureFace(bounding_box) => self.capture_face(bounding_box),
            Effect::ExecuteTurn(kind) => self.execute_turn(&kind),
            Effect::CancelTurn => self.cancel_turn(),
            Effect::Speak { text } => self.speak(&text),
            Effect::StopPlayback => {
                if let Some(Speech::Playback { handle, .. }) = self.speech.take() {
                    handle.stop();
                }
                self.speech = None;
                self.interrupt.disarm();
            }
            Effect::ResetLipSync => self.lip_sync.reset(),
            Effect::RecordTurn {
                customer_id,
                user_text,
                assistant_text,
            } => {
                let turn = TurnRecord {
                    user_text,
                    assistant_text,
                    timestamp: Utc::now(),
                };
                self.state.record_turn(&customer_id, turn.clone());
                if let Err(e) = self.store.append_turn(&customer_id, turn) {
                    tracing::warn!(customer = %customer_id, error = %e, "failed to record turn");
                }
            }
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Frame {
                epoch,
                sampling,
                result,
            } => {
                if epoch != self.camera_epoch {
                    return;
                }
                self.camera_busy = false;
                match result {
                    Ok((frame, detections)) => {
                        if self.backoff.record_success() {
                            tracing::info!("camera sampling recovered");
                            self.clear_advisory(Advisory::CameraUnavailable);
                            self.clear_advisory(Advisory::FaceRecognitionUnavailable);
                        }
                        match sampling {
                            Sampling::Capture => {
                                self.last_frame = Some(frame);
                                self.apply(Input::FaceFrame(detections));
                            }
                            Sampling::Presence => self.apply(Input::PresenceFrame(detections)),
                        }
                    }
                    Err(e) => {
                        let delay = self.backoff.record_failure();
                        self.camera_next_at = Instant::now() + delay;
                        tracing::debug!(
                            kind = ?e.kind(),
                            error = %e,
                            failures = self.backoff.failures(),
                            retry_ms = delay.as_millis(),
                            "camera sample failed"
                        );
                        if self.backoff.should_advise() {
                            self.advise(Advisory::for_sampling_failure(e.kind()));
                        }
                    }
                }
            }
            Event::Descriptor { epoch, result } => {
                if epoch != self.camera_epoch {
                    return;
                }
                self.camera_busy = false;
                self.on_descriptor(result);
            }
            Event::Recognition { epoch, event } => {
                if epoch != self.recognizer_epoch {
                    return;
                }
                match event {
                    RecognitionEvent::Transcript(text) => {
                        tracing::info!(transcript = %text, "user said");
                        self.apply(Input::Transcript(text));
                    }
                    RecognitionEvent::Failed(reason) => {
                        tracing::warn!(reason = %reason, "recognizer failed");
                        self.apply(Input::RecognitionFailed);
                    }
                }
            }
            Event::RecognizerTimer { epoch } => {
                if epoch == self.recognizer_epoch {
                    self.start_recognizer();
                }
            }
            Event::TurnFinished { epoch, outcome } => {
                if epoch != self.turn_epoch {
                    return;
                }
                self.turn_task = None;
                self.turn_deadline = None;
                match outcome {
                    TurnOutcome::Spoken { text, clip } => {
                        self.pending_clip = Some(clip);
                        self.apply(Input::ResponseReady { text });
                    }
                    TurnOutcome::Fallback { text } => {
                        self.pending_clip = None;
                        self.apply(Input::ResponseFailed { fallback: text });
                    }
                }
            }
            Event::ForceListening => {
                tracing::info!(mode = ?self.state.mode(), "force listening");
                self.apply(Input::ForceListening);
            }
        }
    }

    fn invalidate_camera(&mut self) {
        self.camera_epoch += 1;
        self.camera_busy = false;
        self.last_frame = None;
    }

    fn sample_camera(&mut self) {
        if !self.face_enabled || self.camera_busy {
            return;
        }
        let now = Instant::now();
        if now < self.camera_next_at {
            return;
        }

        let sampling = if self.state.capture_active() {
            Sampling::Capture
        } else if self.state.presence_active()
            && !self.settings.presence_interval.is_zero()
            && now >= self.presence_next_at
        {
            self.presence_next_at = now + self.settings.presence_interval;
            Sampling::Presence
        } else {
            return;
        };

        let (Some(camera), Some(analyzer)) = (&self.camera, &self.analyzer) else {
            return;
        };
        let camera = Arc::clone(camera);
        let analyzer = Arc::clone(analyzer);
        let tx = self.events_tx.clone();
        let epoch = self.camera_epoch;
        self.camera_busy = true;

        tokio::spawn(async move {
            let result = async {
                let frame = camera.frame().await?;
                let detections = analyzer.detect(&frame).await?;
                Ok((frame, detections))
            }
            .await;
            let _ = tx.send(Event::Frame {
                epoch,
                sampling,
                result,
            });
        });
    }

    fn capture_face(&mut self, bounding_box: BoundingBox) {
        let padding = self.settings.capture.padding;
        let crop: Result<(Frame, Vec<u8>)> = match self.last_frame.take() {
            Some(frame) => crop_face(&frame, bounding_box, padding)
                .and_then(|crop| encode_jpeg(&crop.image).map(|jpeg| (crop, jpeg))),
            None => Err(Error::Image("no frame for capture".to_string())),
        };

        let (crop, jpeg) = match crop {
            Ok(parts) => parts,
            Err(e) => {
                tracing::debug!(error = %e, "face crop failed");
                self.apply(Input::DescriptorFailed);
                return;
            }
        };

        self.apply(Input::FaceCropped(jpeg));

        let Some(analyzer) = self.analyzer.as_ref().map(Arc::clone) else {
            return;
        };
        let tx = self.events_tx.clone();
        let epoch = self.camera_epoch;
        self.camera_busy = true;

        tokio::spawn(async move {
            let result = analyzer.descriptor(&crop).await;
            let _ = tx.send(Event::Descriptor { epoch, result });
        });
    }

    fn on_descriptor(&mut self, result: Result<Descriptor>) {
        if !self.state.capture_active() {
            return;
        }

        let descriptor = match result {
            Ok(descriptor) => descriptor,
            Err(e) => {
                tracing::debug!(error = %e, "descriptor extraction failed, retrying");
                self.apply(Input::DescriptorFailed);
                return;
            }
        };

        match store::identify(
            self.store.as_ref(),
            &descriptor,
            Utc::now(),
            &self.settings.matching,
        ) {
            Ok(identification) => self.apply(Input::FaceIdentified(identification)),
            Err(e) => {
                tracing::warn!(error = %e, "identification failed");
                self.apply(Input::DescriptorFailed);
            }
        }
    }

    fn schedule_recognizer(&self, after: Duration) {
        let tx = self.events_tx.clone();
        let epoch = self.recognizer_epoch;
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(Event::RecognizerTimer { epoch });
        });
    }

    fn start_recognizer(&mut self) {
        if self.state.mode() != Mode::Listening {
            return;
        }
        let Some(recognizer) = &self.recognizer else {
            return;
        };

        let tx = self.events_tx.clone();
        let epoch = self.recognizer_epoch;
        let sink: RecognitionSink = Arc::new(move |event: RecognitionEvent| {
            let _ = tx.send(Event::Recognition { epoch, event });
        });

        match recognizer.start(sink) {
            Ok(()) => {
                self.clear_advisory(Advisory::SpeechUnavailable);
                tracing::debug!("listening");
            }
            Err(e)
                if e.kind() == ErrorKind::RecognitionError && self.recognizer_attempts == 0 =>
            {
                self.recognizer_attempts += 1;
                tracing::debug!(error = %e, "recognizer not started, retrying");
                self.schedule_recognizer(self.settings.timings.recognition_retry);
            }
            Err(e) => {
                tracing::warn!(error = %e, "recognizer failed to start");
                self.advise(Advisory::SpeechUnavailable);
            }
        }
    }

    fn execute_turn(&mut self, kind: &TurnKind) {
        self.turn_epoch += 1;
        self.pending_clip = None;

        let request = TurnRequest::for_turn(
            kind,
            self.state.current_identity(),
            self.state.is_new_customer(),
            self.executor.texts(),
            self.settings.history_turns,
            Utc::now(),
        );
        self.turn_deadline = Some(TurnDeadline {
            at: Instant::now() + self.settings.response_timeout + TURN_GRACE,
            fallback: self.executor.fallback_text(&request),
        });
        let executor = Arc::clone(&self.executor);
        let tx = self.events_tx.clone();
        let epoch = self.turn_epoch;

        self.turn_task = Some(tokio::spawn(async move {
            let outcome = executor.execute(&request).await;
            let _ = tx.send(Event::TurnFinished { epoch, outcome });
        }));
    }

    fn cancel_turn(&mut self) {
        self.turn_epoch += 1;
        self.turn_deadline = None;
        self.pending_clip = None;
        if let Some(task) = self.turn_task.take() {
            task.abort();
        }
    }

    fn speak(&mut self, text: &str) {
        let clip = self.pending_clip.take();
        self.speech = match (clip, &self.output) {
            (Some(clip), Some(output)) => {
                let deadline = Instant::now() + clip.duration() + PLAYBACK_GRACE;
                match output.play(clip) {
                    Ok(handle) => Some(Speech::Playback { handle, deadline }),
                    Err(e) => {
                        // Playback that cannot start counts as already finished
                        tracing::warn!(kind = ?e.kind(), error = %e, "playback failed");
                        None
                    }
                }
            }
            _ => Some(Speech::Silent {
                started: Instant::now(),
                total: speech_duration(text),
            }),
        };

        if self.speech.is_none() {
            self.apply(Input::PlaybackFinished);
            return;
        }
        self.interrupt.arm();
    }

    fn animate(&mut self) {
        match self.state.mode() {
            Mode::Speaking => {}
            Mode::Processing => {
                self.check_turn_deadline();
                return;
            }
            Mode::Idle | Mode::Listening => return,
        }

        let finished = match &self.speech {
            Some(Speech::Playback { handle, deadline }) => {
                self.lip_sync.follow_level(handle.level());
                if Instant::now() >= *deadline && !handle.is_finished() {
                    tracing::warn!("playback overran its clip, abandoning it");
                    true
                } else {
                    handle.is_finished()
                }
            }
            Some(Speech::Silent { started, total }) => {
                let elapsed = started.elapsed();
                self.lip_sync.animate(elapsed, *total);
                elapsed >= *total
            }
            None => true,
        };

        if finished {
            self.apply(Input::PlaybackFinished);
        }
    }

    fn check_turn_deadline(&mut self) {
        let expired = self
            .turn_deadline
            .as_ref()
            .is_some_and(|deadline| Instant::now() >= deadline.at);
        if !expired {
            return;
        }

        let Some(TurnDeadline { fallback, .. }) = self.turn_deadline.take() else {
            return;
        };
        tracing::warn!("turn task never reported, using fallback");
        self.cancel_turn();
        self.apply(Input::ResponseFailed { fallback });
    }

    #[allow(clippy::cast_precision_loss)]
    fn on_microphone(&mut self, chunk: Option<AudioChunk>) {
        let Some(chunk) = chunk else {
            tracing::warn!("microphone stream closed");
            self.microphone = None;
            self.advise(Advisory::MicrophoneUnavailable);
            return;
        };

        if self.state.mode() != Mode::Speaking {
            return;
        }

        let duration = Duration::from_secs_f32(chunk.len() as f32 / SAMPLE_RATE as f32);
        if self.interrupt.observe(energy(&chunk), duration) {
            self.apply(Input::UserInterrupted);
        }
    }

    fn publish(&mut self) {
        if self.store.is_volatile() {
            self.advise(Advisory::StorageVolatile);
        }

        let snapshot = Snapshot {
            mode: self.state.mode(),
            customer_id: self.state.current_identity().map(|r| r.id().to_string()),
            is_new_customer: self.state.is_new_customer(),
            last_transcript: self.state.last_transcript().to_string(),
            last_response_text: self.state.last_response_text().to_string(),
            lip_sync: self.lip_sync.value(),
            face_available: self.face_enabled,
            advisories: self.advisories.clone(),
        };

        self.snapshot_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}

async fn next_chunk(
    microphone: &mut Option<broadcast::Receiver<AudioChunk>>,
) -> Option<AudioChunk> {
    let Some(receiver) = microphone else {
        return std::future::pending().await;
    };

    loop {
        match receiver.recv().await {
            Ok(chunk) => return Some(chunk),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::trace!(skipped, "microphone chunks dropped");
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}
