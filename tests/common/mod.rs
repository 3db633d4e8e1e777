//! Shared test utilities

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use image::{Rgb, RgbImage};
use tokio::sync::watch;

use kiosk_concierge::customer::DESCRIPTOR_LEN;
use kiosk_concierge::orchestrator::Snapshot;
use kiosk_concierge::turn::{ResponseService, ServiceReply, TurnRequest};
use kiosk_concierge::vision::{BoundingBox, Camera, Detection, FaceAnalyzer, Frame};
use kiosk_concierge::voice::{
    AudioClip, AudioOutput, PlaybackHandle, RecognitionEvent, RecognitionSink, SAMPLE_RATE,
    SpeechRecognizer, samples_to_wav,
};
use kiosk_concierge::{CustomerRepo, DbPool, Error, Result, db};

/// Set up an in-memory test database
#[must_use]
pub fn setup_test_db() -> DbPool {
    db::init_memory().expect("failed to init test db")
}

/// Customer repository over a fresh in-memory database
#[must_use]
pub fn setup_test_repo() -> CustomerRepo {
    CustomerRepo::new(setup_test_db())
}

/// Generate sine wave audio samples
#[must_use]
pub fn generate_sine_samples(frequency: f32, duration_secs: f32, amplitude: f32) -> Vec<f32> {
    let num_samples = (SAMPLE_RATE as f32 * duration_secs) as usize;
    (0..num_samples)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect()
}

/// Generate silence
#[must_use]
pub fn generate_silence(duration_secs: f32) -> Vec<f32> {
    let num_samples = (SAMPLE_RATE as f32 * duration_secs) as usize;
    vec![0.0; num_samples]
}

/// Descriptor with every component set to `value`
#[must_use]
pub fn descriptor(value: f32) -> Vec<f32> {
    vec![value; DESCRIPTOR_LEN]
}

/// A detection that passes the default capture filter
#[must_use]
pub fn good_face() -> Detection {
    Detection {
        bounding_box: BoundingBox::new(100.0, 60.0, 96.0, 110.0),
        confidence: 0.95,
    }
}

/// Wait until the published snapshot satisfies `pred`
pub async fn wait_for(
    rx: &mut watch::Receiver<Snapshot>,
    pred: impl FnMut(&Snapshot) -> bool,
) -> Snapshot {
    tokio::time::timeout(Duration::from_secs(120), rx.wait_for(pred))
        .await
        .expect("timed out waiting for snapshot")
        .expect("orchestrator stopped")
        .clone()
}

/// Camera returning a flat grey frame, or failing on demand
#[derive(Default)]
pub struct FakeCamera {
    pub failing: AtomicBool,
    pub frames: AtomicUsize,
}

#[async_trait]
impl Camera for FakeCamera {
    async fn frame(&self) -> Result<Frame> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::SensorUnavailable("camera unplugged".to_string()));
        }
        self.frames.fetch_add(1, Ordering::SeqCst);
        Ok(Frame::new(RgbImage::from_pixel(320, 240, Rgb([128, 128, 128]))))
    }
}

/// Face analyzer with scripted detections and a fixed descriptor
pub struct FakeAnalyzer {
    pub ready: bool,
    pub faces: Mutex<Vec<Detection>>,
    pub descriptor: Mutex<Vec<f32>>,
    pub descriptor_calls: AtomicUsize,
    pub detect_failing: AtomicBool,
}

impl FakeAnalyzer {
    #[must_use]
    pub fn with_face(descriptor: Vec<f32>) -> Self {
        Self {
            ready: true,
            faces: Mutex::new(vec![good_face()]),
            descriptor: Mutex::new(descriptor),
            descriptor_calls: AtomicUsize::new(0),
            detect_failing: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn not_ready() -> Self {
        Self {
            ready: false,
            ..Self::with_face(descriptor(0.0))
        }
    }

    pub fn set_faces(&self, faces: Vec<Detection>) {
        *self.faces.lock().unwrap() = faces;
    }

    pub fn set_descriptor(&self, descriptor: Vec<f32>) {
        *self.descriptor.lock().unwrap() = descriptor;
    }
}

#[async_trait]
impl FaceAnalyzer for FakeAnalyzer {
    async fn ready(&self) -> Result<()> {
        if self.ready {
            Ok(())
        } else {
            Err(Error::ModelLoad("weights missing".to_string()))
        }
    }

    async fn detect(&self, _frame: &Frame) -> Result<Vec<Detection>> {
        if self.detect_failing.load(Ordering::SeqCst) {
            return Err(Error::ModelLoad("face sidecar error 500".to_string()));
        }
        Ok(self.faces.lock().unwrap().clone())
    }

    async fn descriptor(&self, _face: &Frame) -> Result<Vec<f32>> {
        self.descriptor_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.descriptor.lock().unwrap().clone())
    }
}

/// Recognizer whose transcripts are injected by the test
#[derive(Default)]
pub struct FakeRecognizer {
    sink: Mutex<Option<RecognitionSink>>,
    pub starts: AtomicUsize,
}

impl FakeRecognizer {
    /// Deliver a transcript if a session is active
    pub fn say(&self, text: &str) -> bool {
        let sink = self.sink.lock().unwrap().clone();
        sink.is_some_and(|sink| {
            sink(RecognitionEvent::Transcript(text.to_string()));
            true
        })
    }
}

impl SpeechRecognizer for FakeRecognizer {
    fn start(&self, sink: RecognitionSink) -> Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        *self.sink.lock().unwrap() = Some(sink);
        Ok(())
    }

    fn stop(&self) {
        self.sink.lock().unwrap().take();
    }

    fn is_active(&self) -> bool {
        self.sink.lock().unwrap().is_some()
    }
}

/// Shared state of one fake playback
#[derive(Default)]
pub struct FakePlayback {
    pub finished: AtomicBool,
    pub stopped: AtomicBool,
}

struct FakeHandle(Arc<FakePlayback>);

impl PlaybackHandle for FakeHandle {
    fn level(&self) -> f32 {
        0.2
    }

    fn is_finished(&self) -> bool {
        self.0.finished.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        self.0.stopped.store(true, Ordering::SeqCst);
        self.0.finished.store(true, Ordering::SeqCst);
    }
}

/// Audio output that plays until told to finish
#[derive(Default)]
pub struct FakeOutput {
    pub plays: Mutex<Vec<Arc<FakePlayback>>>,
}

impl FakeOutput {
    #[must_use]
    pub fn play_count(&self) -> usize {
        self.plays.lock().unwrap().len()
    }

    #[must_use]
    pub fn last(&self) -> Option<Arc<FakePlayback>> {
        self.plays.lock().unwrap().last().cloned()
    }

    /// Let every clip run out
    pub fn finish_all(&self) {
        for play in self.plays.lock().unwrap().iter() {
            play.finished.store(true, Ordering::SeqCst);
        }
    }
}

impl AudioOutput for FakeOutput {
    fn play(&self, _clip: AudioClip) -> Result<Box<dyn PlaybackHandle>> {
        let playback = Arc::new(FakePlayback::default());
        self.plays.lock().unwrap().push(Arc::clone(&playback));
        Ok(Box::new(FakeHandle(playback)))
    }
}

/// Response service that answers every turn with the same reply
pub struct ScriptedResponder {
    pub text: String,
    pub delay: Duration,
    pub crash: bool,
    pub requests: Mutex<Vec<TurnRequest>>,
}

impl ScriptedResponder {
    #[must_use]
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            delay: Duration::ZERO,
            crash: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn stalled() -> Self {
        Self {
            delay: Duration::from_secs(3600),
            ..Self::new("too late")
        }
    }

    /// Answers after `delay`
    #[must_use]
    pub fn delayed(text: &str, delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new(text)
        }
    }

    /// Panics inside the turn task instead of answering
    #[must_use]
    pub fn crashing() -> Self {
        Self {
            crash: true,
            ..Self::new("never sent")
        }
    }

    #[must_use]
    pub fn requests(&self) -> Vec<TurnRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResponseService for ScriptedResponder {
    async fn respond(&self, request: &TurnRequest) -> Result<ServiceReply> {
        self.requests.lock().unwrap().push(request.clone());
        if self.crash {
            panic!("response backend crashed");
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let audio = samples_to_wav(&generate_sine_samples(220.0, 0.5, 0.3), SAMPLE_RATE)?;
        Ok(ServiceReply {
            text: Some(self.text.clone()),
            audio,
        })
    }
}
