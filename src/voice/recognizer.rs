//! Speech recognizer driven by the shared microphone

use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::capture::{AudioChunk, SAMPLE_RATE, samples_to_wav};
use super::stt::SpeechToText;
use super::vad::UtteranceSegmenter;
use crate::{Error, Result};

/// Output of a running recognizer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    /// A finalized utterance
    Transcript(String),
    /// Engine error; the recognizer has stopped
    Failed(String),
}

/// Callback receiving recognizer output
pub type RecognitionSink = Arc<dyn Fn(RecognitionEvent) + Send + Sync>;

/// Speech-to-text engine with explicit start/stop
pub trait SpeechRecognizer: Send + Sync {
    /// Begin recognition, delivering results to `sink`
    ///
    /// # Errors
    ///
    /// Returns `RecognizerNotReady` if the engine cannot start yet
    fn start(&self, sink: RecognitionSink) -> Result<()>;

    /// Stop recognition; pending results are discarded
    fn stop(&self);

    /// Whether a recognition session is active
    fn is_active(&self) -> bool;
}

/// Recognizer segmenting microphone audio locally and transcribing each
/// utterance through a cloud STT provider
pub struct CloudRecognizer {
    stt: Arc<SpeechToText>,
    microphone: broadcast::Sender<AudioChunk>,
    threshold: f32,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl CloudRecognizer {
    #[must_use]
    pub fn new(
        stt: SpeechToText,
        microphone: broadcast::Sender<AudioChunk>,
        threshold: f32,
    ) -> Self {
        Self {
            stt: Arc::new(stt),
            microphone,
            threshold,
            task: Mutex::new(None),
        }
    }
}

impl SpeechRecognizer for CloudRecognizer {
    fn start(&self, sink: RecognitionSink) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| Error::RecognizerNotReady)?;
        let mut task = self.task.lock().map_err(|_| Error::RecognizerNotReady)?;
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return Ok(());
        }

        let mut chunks = self.microphone.subscribe();
        let stt = Arc::clone(&self.stt);
        let mut segmenter = UtteranceSegmenter::new(self.threshold);

        *task = Some(runtime.spawn(async move {
            loop {
                let chunk = match chunks.recv().await {
                    Ok(chunk) => chunk,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "recognizer lagging behind microphone");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        sink(RecognitionEvent::Failed("microphone closed".to_string()));
                        break;
                    }
                };

                let Some(utterance) = segmenter.push(&chunk) else {
                    continue;
                };

                let result = match samples_to_wav(&utterance, SAMPLE_RATE) {
                    Ok(wav) => stt.transcribe(&wav).await,
                    Err(e) => Err(e),
                };

                match result {
                    Ok(text) if text.trim().is_empty() => {}
                    Ok(text) => sink(RecognitionEvent::Transcript(text)),
                    Err(e) => {
                        tracing::warn!(error = %e, "speech recognition failed");
                        sink(RecognitionEvent::Failed(e.to_string()));
                        break;
                    }
                }
            }
        }));

        tracing::debug!("recognizer started");
        Ok(())
    }

    fn stop(&self) {
        if let Ok(mut task) = self.task.lock() {
            if let Some(task) = task.take() {
                task.abort();
                tracing::debug!("recognizer stopped");
            }
        }
    }

    fn is_active(&self) -> bool {
        self.task
            .lock()
            .is_ok_and(|t| t.as_ref().is_some_and(|t| !t.is_finished()))
    }
}
