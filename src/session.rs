//! Conversation state machine
//!
//! The session is a plain value advanced by [`transition`]. Every side effect
//! (starting the recognizer, calling the response service, playing audio) is
//! returned as an [`Effect`] for the orchestrator to carry out, so the rules
//! below can be exercised without timers or devices.
//!
//! ```text
//!   Idle ──SensorsReady──▶ Listening ──Transcript / greeting──▶ Processing
//!                            ▲                                      │
//!                            │ PlaybackFinished / UserInterrupted   │ response
//!                            └──────────────── Speaking ◀───────────┘
//! ```

use std::time::Duration;

use serde::Serialize;

use crate::customer::{IdentityRecord, TurnRecord};
use crate::store::Identification;
use crate::vision::{BoundingBox, CaptureConfig, Detection, FaceTracker, PresenceWatch, TrackStep};

/// Global conversational mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Idle,
    Listening,
    Processing,
    Speaking,
}

impl Mode {
    /// Camera sampling is allowed only in these modes
    #[must_use]
    pub const fn allows_camera(self) -> bool {
        matches!(self, Self::Idle | Self::Listening)
    }
}

/// What started a turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnKind {
    /// Finalized speech-recognition transcript
    Speech(String),
    /// Face-triggered greeting
    Greeting { is_new: bool },
}

/// Events fed into the state machine
#[derive(Debug, Clone)]
pub enum Input {
    /// Sensor initialization finished
    SensorsReady,
    /// Finalized transcript from the speech recognizer
    Transcript(String),
    /// Detections from one capture-mode frame
    FaceFrame(Vec<Detection>),
    /// The still image taken at capture
    FaceCropped(Vec<u8>),
    /// Landmark/descriptor stage failed on the capture
    DescriptorFailed,
    /// Captured descriptor resolved to a customer
    FaceIdentified(Identification),
    /// Detections from one presence-watch frame
    PresenceFrame(Vec<Detection>),
    /// Response service produced playable output
    ResponseReady { text: String },
    /// Response service failed or timed out
    ResponseFailed { fallback: String },
    /// Audio (or silent speech) ran to completion
    PlaybackFinished,
    /// User started talking over the assistant
    UserInterrupted,
    /// Speech engine reported an error
    RecognitionFailed,
    /// Operator trigger
    ForceListening,
}

/// Side effects requested by a transition
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    StartRecognizer { after: Duration },
    StopRecognizer,
    ArmCapture,
    PauseCapture,
    CaptureFace(BoundingBox),
    ExecuteTurn(TurnKind),
    CancelTurn,
    Speak { text: String },
    StopPlayback,
    ResetLipSync,
    RecordTurn {
        customer_id: String,
        user_text: String,
        assistant_text: String,
    },
}

/// Fixed delays applied by the state machine
#[derive(Debug, Clone, Copy)]
pub struct SessionTimings {
    /// Wait after speaking before re-arming the recognizer
    pub settle: Duration,
    /// Wait after a recognizer error before restarting it
    pub recognition_retry: Duration,
}

impl Default for SessionTimings {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(400),
            recognition_retry: Duration::from_millis(500),
        }
    }
}

/// Process-wide session state for one kiosk
#[derive(Debug, Clone)]
pub struct SessionState {
    mode: Mode,
    current_identity: Option<IdentityRecord>,
    is_new_customer: bool,
    greeting_sent: bool,
    tracker: FaceTracker,
    presence: PresenceWatch,
    last_captured_image: Option<Vec<u8>>,
    last_transcript: String,
    last_response_text: String,
    in_flight: Option<TurnKind>,
    timings: SessionTimings,
}

impl SessionState {
    #[must_use]
    pub const fn new(capture: CaptureConfig, absence_frames: u32, timings: SessionTimings) -> Self {
        Self {
            mode: Mode::Idle,
            current_identity: None,
            is_new_customer: false,
            greeting_sent: false,
            tracker: FaceTracker::new(capture),
            presence: PresenceWatch::new(absence_frames),
            last_captured_image: None,
            last_transcript: String::new(),
            last_response_text: String::new(),
            in_flight: None,
            timings,
        }
    }

    #[must_use]
    pub const fn mode(&self) -> Mode {
        self.mode
    }

    #[must_use]
    pub const fn current_identity(&self) -> Option<&IdentityRecord> {
        self.current_identity.as_ref()
    }

    #[must_use]
    pub const fn is_new_customer(&self) -> bool {
        self.is_new_customer
    }

    #[must_use]
    pub const fn greeting_sent(&self) -> bool {
        self.greeting_sent
    }

    #[must_use]
    pub const fn consecutive_face_frames(&self) -> u32 {
        self.tracker.consecutive_frames()
    }

    #[must_use]
    pub const fn tracker(&self) -> &FaceTracker {
        &self.tracker
    }

    #[must_use]
    pub fn last_captured_image(&self) -> Option<&[u8]> {
        self.last_captured_image.as_deref()
    }

    #[must_use]
    pub fn last_transcript(&self) -> &str {
        &self.last_transcript
    }

    #[must_use]
    pub fn last_response_text(&self) -> &str {
        &self.last_response_text
    }

    #[must_use]
    pub const fn in_flight(&self) -> Option<&TurnKind> {
        self.in_flight.as_ref()
    }

    /// Capture pipeline runs only with no identity locked in
    #[must_use]
    pub const fn capture_active(&self) -> bool {
        self.mode.allows_camera() && self.current_identity.is_none()
    }

    /// Presence watch runs only with an identity locked in
    #[must_use]
    pub const fn presence_active(&self) -> bool {
        self.mode.allows_camera() && self.current_identity.is_some()
    }

    /// Append a finished turn to the locked-in identity's log
    ///
    /// Later turns in the same visit build their history from this record.
    pub fn record_turn(&mut self, customer_id: &str, turn: TurnRecord) {
        if let Some(record) = self
            .current_identity
            .as_mut()
            .filter(|record| record.id() == customer_id)
        {
            record.push_turn(turn);
        }
    }

    /// Apply one input in place, returning the effects to run
    pub fn apply(&mut self, input: Input) -> Vec<Effect> {
        match input {
            Input::SensorsReady => {
                if self.mode == Mode::Idle {
                    self.enter_listening(Duration::ZERO)
                } else {
                    Vec::new()
                }
            }
            Input::Transcript(text) => self.on_transcript(text),
            Input::FaceFrame(detections) => self.on_face_frame(&detections),
            Input::FaceCropped(image) => {
                if self.capture_active() {
                    self.last_captured_image = Some(image);
                }
                Vec::new()
            }
            Input::DescriptorFailed => {
                if self.capture_active() {
                    self.tracker.descriptor_failed();
                }
                Vec::new()
            }
            Input::FaceIdentified(identification) => self.on_identified(identification),
            Input::PresenceFrame(detections) => self.on_presence_frame(&detections),
            Input::ResponseReady { text } => self.on_response(text, true),
            Input::ResponseFailed { fallback } => self.on_response(fallback, false),
            Input::PlaybackFinished => {
                if self.mode == Mode::Speaking {
                    self.finish_speaking()
                } else {
                    Vec::new()
                }
            }
            Input::UserInterrupted => {
                if self.mode == Mode::Speaking {
                    tracing::info!("assistant interrupted by user");
                    self.finish_speaking()
                } else {
                    Vec::new()
                }
            }
            Input::RecognitionFailed => {
                if self.mode == Mode::Listening {
                    vec![
                        Effect::StopRecognizer,
                        Effect::StartRecognizer {
                            after: self.timings.recognition_retry,
                        },
                    ]
                } else {
                    Vec::new()
                }
            }
            Input::ForceListening => self.force_listening(),
        }
    }

    fn on_transcript(&mut self, text: String) -> Vec<Effect> {
        if self.mode != Mode::Listening {
            tracing::debug!(mode = ?self.mode, "transcript dropped outside listening");
            return Vec::new();
        }
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Vec::new();
        }

        self.last_transcript = trimmed.to_string();
        self.accept_turn(TurnKind::Speech(trimmed.to_string()))
    }

    fn on_face_frame(&mut self, detections: &[Detection]) -> Vec<Effect> {
        if !self.capture_active() {
            return Vec::new();
        }

        match self.tracker.observe(detections) {
            TrackStep::Lost => {
                self.greeting_sent = false;
                Vec::new()
            }
            TrackStep::Capture(bounding_box) => vec![Effect::CaptureFace(bounding_box)],
            TrackStep::Tracking(_) | TrackStep::Ignored => Vec::new(),
        }
    }

    fn on_identified(&mut self, identification: Identification) -> Vec<Effect> {
        if !self.capture_active() {
            tracing::debug!(mode = ?self.mode, "stale identification dropped");
            return Vec::new();
        }

        let Identification {
            record,
            is_new,
            should_greet,
        } = identification;

        self.current_identity = Some(record);
        self.is_new_customer = is_new;
        self.presence.reset();

        if should_greet && !self.greeting_sent {
            self.greeting_sent = true;
            return self.accept_turn(TurnKind::Greeting { is_new });
        }

        Vec::new()
    }

    fn on_presence_frame(&mut self, detections: &[Detection]) -> Vec<Effect> {
        if !self.presence_active() {
            return Vec::new();
        }

        let present = self.tracker.config().best_face(detections).is_some();
        if self.presence.observe(present) {
            if let Some(record) = self.current_identity.take() {
                tracing::info!(customer = record.id(), "customer left");
            }
            self.is_new_customer = false;
            self.greeting_sent = false;
            self.last_captured_image = None;
            self.tracker.reset();
            self.presence.reset();
        }

        Vec::new()
    }

    fn on_response(&mut self, text: String, succeeded: bool) -> Vec<Effect> {
        if self.mode != Mode::Processing {
            return Vec::new();
        }

        let mut effects = Vec::new();
        if succeeded {
            if let (Some(TurnKind::Speech(user_text)), Some(record)) =
                (&self.in_flight, &self.current_identity)
            {
                effects.push(Effect::RecordTurn {
                    customer_id: record.id().to_string(),
                    user_text: user_text.clone(),
                    assistant_text: text.clone(),
                });
            }
        }

        self.in_flight = None;
        self.mode = Mode::Speaking;
        self.last_response_text.clone_from(&text);
        effects.push(Effect::Speak { text });
        effects
    }

    fn force_listening(&mut self) -> Vec<Effect> {
        match self.mode {
            Mode::Speaking => self.finish_speaking(),
            Mode::Processing => {
                self.in_flight = None;
                let mut effects = vec![Effect::CancelTurn];
                effects.extend(self.enter_listening(Duration::ZERO));
                effects
            }
            Mode::Idle => self.enter_listening(Duration::ZERO),
            Mode::Listening => vec![
                Effect::StopRecognizer,
                Effect::StartRecognizer {
                    after: Duration::ZERO,
                },
            ],
        }
    }

    /// Listening|Idle → Processing; first accepted trigger wins
    fn accept_turn(&mut self, kind: TurnKind) -> Vec<Effect> {
        tracing::debug!(kind = ?kind, "turn accepted");
        self.mode = Mode::Processing;
        self.in_flight = Some(kind.clone());
        if self.current_identity.is_none() {
            self.tracker.reset();
        }
        vec![
            Effect::StopRecognizer,
            Effect::PauseCapture,
            Effect::ExecuteTurn(kind),
        ]
    }

    fn finish_speaking(&mut self) -> Vec<Effect> {
        let mut effects = vec![Effect::StopPlayback, Effect::ResetLipSync];
        effects.extend(self.enter_listening(self.timings.settle));
        effects
    }

    fn enter_listening(&mut self, after: Duration) -> Vec<Effect> {
        self.mode = Mode::Listening;
        vec![Effect::StartRecognizer { after }, Effect::ArmCapture]
    }
}

/// Pure transition: `(state, input) -> (state, effects)`
#[must_use]
pub fn transition(mut state: SessionState, input: Input) -> (SessionState, Vec<Effect>) {
    let effects = state.apply(input);
    (state, effects)
}
