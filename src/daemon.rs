//! Daemon - the kiosk concierge service
//!
//! Wires sensors, storage, and the remote response service into the
//! orchestrator and serves the HTTP API alongside it.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::api::ApiServerBuilder;
use crate::db::{self, CustomerRepo};
use crate::orchestrator::{Collaborators, Orchestrator, OrchestratorSettings};
use crate::store::{CustomerStore, ResilientStore};
use crate::turn::{ResponseService, ServiceReply, TurnRequest, WebhookClient};
use crate::vision::{Camera, FaceAnalyzer, RemoteFaceAnalyzer, SnapshotCamera};
use crate::voice::{
    AudioOutput, AudioPlayback, CloudRecognizer, MicrophoneTap, SpeechRecognizer, SpeechToText,
};
use crate::{Config, Error, Result};

/// Responder used when no webhook is configured; every turn falls back
struct UnconfiguredResponder;

#[async_trait]
impl ResponseService for UnconfiguredResponder {
    async fn respond(&self, _request: &TurnRequest) -> Result<ServiceReply> {
        Err(Error::Config("no response webhook configured".to_string()))
    }
}

/// The concierge daemon
pub struct Daemon {
    config: Config,
}

impl Daemon {
    /// Create a new daemon instance
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Open the customer database, degrading to memory if it is unusable
    fn init_store(&self) -> Arc<ResilientStore> {
        let path = self.config.db_path();
        if let Err(e) = std::fs::create_dir_all(&self.config.data_dir) {
            tracing::warn!(error = %e, "failed to create data directory");
        }

        match db::init(&path) {
            Ok(pool) => {
                tracing::info!(path = %path.display(), "database initialized");
                Arc::new(ResilientStore::new(Box::new(CustomerRepo::new(pool))))
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "database unavailable, customer records will not persist"
                );
                Arc::new(ResilientStore::volatile())
            }
        }
    }

    fn init_camera(&self) -> Option<Arc<dyn Camera>> {
        if !self.config.camera.enabled {
            tracing::info!("camera disabled");
            return None;
        }
        let url = self.config.camera.snapshot_url.as_ref()?;
        match SnapshotCamera::new(url.clone()) {
            Ok(camera) => Some(Arc::new(camera)),
            Err(e) => {
                tracing::warn!(error = %e, "camera unavailable");
                None
            }
        }
    }

    fn init_analyzer(&self) -> Option<Arc<dyn FaceAnalyzer>> {
        let url = self.config.face.analyzer_url.as_deref()?;
        match RemoteFaceAnalyzer::new(url) {
            Ok(analyzer) => Some(Arc::new(analyzer)),
            Err(e) => {
                tracing::warn!(error = %e, "face analyzer unavailable");
                None
            }
        }
    }

    fn init_recognizer(&self, tap: Option<&MicrophoneTap>) -> Option<Arc<dyn SpeechRecognizer>> {
        let speech = &self.config.speech;
        if !speech.enabled {
            tracing::info!("speech recognition disabled");
            return None;
        }
        let tap = tap?;
        let Some(api_key) = speech.api_key.clone() else {
            tracing::warn!(
                provider = ?speech.provider,
                "no STT API key, speech recognition disabled"
            );
            return None;
        };

        match SpeechToText::new(
            speech.provider,
            api_key,
            speech.model.clone(),
            speech.language.clone(),
        ) {
            Ok(stt) => {
                tracing::info!(
                    provider = ?speech.provider,
                    language = %speech.language,
                    "speech recognition ready"
                );
                Some(Arc::new(CloudRecognizer::new(
                    stt,
                    tap.sender(),
                    speech.vad_threshold,
                )))
            }
            Err(e) => {
                tracing::warn!(error = %e, "speech recognition unavailable");
                None
            }
        }
    }

    fn init_responder(&self) -> Result<Arc<dyn ResponseService>> {
        match &self.config.response.webhook_url {
            Some(url) => {
                tracing::info!(url = %url, "response webhook configured");
                Ok(Arc::new(WebhookClient::new(
                    url.clone(),
                    self.config.response.api_key.clone(),
                )?))
            }
            None => {
                tracing::warn!("no response webhook configured, the assistant can only apologize");
                Ok(Arc::new(UnconfiguredResponder))
            }
        }
    }

    /// Run the daemon until ctrl-c
    ///
    /// # Errors
    ///
    /// Returns error if the orchestrator fails
    pub async fn run(self) -> Result<()> {
        let store = self.init_store();
        let camera = self.init_camera();
        let analyzer = self.init_analyzer();

        // Must stay alive for the whole run; dropping it stops the stream
        let tap = if self.config.speech.enabled || self.config.interrupt.enabled {
            match MicrophoneTap::start() {
                Ok(tap) => Some(tap),
                Err(e) => {
                    tracing::warn!(error = %e, "microphone unavailable");
                    None
                }
            }
        } else {
            None
        };
        let recognizer = self.init_recognizer(tap.as_ref());

        let output: Option<Arc<dyn AudioOutput>> = match AudioPlayback::new() {
            Ok(playback) => Some(Arc::new(playback)),
            Err(e) => {
                tracing::warn!(error = %e, "audio output unavailable, speaking silently");
                None
            }
        };

        let responder = self.init_responder()?;

        let collaborators = Collaborators {
            store: store.clone(),
            camera,
            analyzer,
            recognizer,
            output,
            responder,
            microphone: tap.as_ref().map(MicrophoneTap::subscribe),
        };
        let (orchestrator, handle) =
            Orchestrator::new(collaborators, OrchestratorSettings::from_config(&self.config));

        let api_task = if self.config.api_server.enabled {
            let store: Arc<dyn CustomerStore> = store;
            Some(ApiServerBuilder::new(handle, store, self.config.api_server.port).build().spawn())
        } else {
            None
        };

        // Set up shutdown signal
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = shutdown_tx.send(()).await;
            }
        });

        tracing::info!("concierge running");
        let result = orchestrator.run(shutdown_rx).await;

        if let Some(task) = api_task {
            task.abort();
        }
        drop(tap);

        tracing::info!("concierge stopped");
        result
    }
}
