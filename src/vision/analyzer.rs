//! Face detection and descriptor extraction
//!
//! The analysis model runs outside this process. [`RemoteFaceAnalyzer`]
//! talks to a sidecar over HTTP; when the sidecar is down face features are
//! disabled and the conversation keeps working.

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::camera::Frame;
use super::capture::encode_jpeg;
use crate::customer::{DESCRIPTOR_LEN, Descriptor};
use crate::{Error, Result};

/// Axis-aligned face box in frame pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    #[must_use]
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Width divided by height (0 for degenerate boxes)
    #[must_use]
    pub fn aspect_ratio(&self) -> f32 {
        if self.height <= 0.0 {
            0.0
        } else {
            self.width / self.height
        }
    }
}

/// One detected face
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(rename = "box")]
    pub bounding_box: BoundingBox,
    pub confidence: f32,
}

/// Face-analysis model
#[async_trait]
pub trait FaceAnalyzer: Send + Sync {
    /// Check that the model is loaded and answering
    ///
    /// # Errors
    ///
    /// Returns `ModelLoad` if the model is unavailable
    async fn ready(&self) -> Result<()>;

    /// Detect faces in a frame
    ///
    /// # Errors
    ///
    /// Returns error if detection fails
    async fn detect(&self, frame: &Frame) -> Result<Vec<Detection>>;

    /// Compute the identity descriptor for a face crop
    ///
    /// # Errors
    ///
    /// Returns error if landmarks or the descriptor cannot be computed
    async fn descriptor(&self, face: &Frame) -> Result<Descriptor>;
}

#[derive(Serialize)]
struct ImageRequest {
    image: String,
}

#[derive(Deserialize)]
struct DetectResponse {
    faces: Vec<Detection>,
}

#[derive(Deserialize)]
struct DescriptorResponse {
    descriptor: Option<Vec<f32>>,
}

/// Face analyzer backed by an HTTP sidecar
///
/// Endpoints: `GET /health`, `POST /detect`, `POST /descriptor`, each taking
/// `{ "image": "<base64 jpeg>" }`.
pub struct RemoteFaceAnalyzer {
    client: reqwest::Client,
    base_url: String,
}

impl RemoteFaceAnalyzer {
    /// Create an analyzer for the sidecar at `base_url`
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(3))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn encode(frame: &Frame) -> Result<ImageRequest> {
        let jpeg = encode_jpeg(&frame.image)?;
        Ok(ImageRequest {
            image: base64::engine::general_purpose::STANDARD.encode(jpeg),
        })
    }

    async fn post<T: serde::de::DeserializeOwned>(&self, path: &str, frame: &Frame) -> Result<T> {
        let body = Self::encode(frame)?;
        let response = self
            .client
            .post(format!("{}{path}", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::ModelLoad(format!("face sidecar unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::ModelLoad(format!("face sidecar error {status}: {body}")));
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl FaceAnalyzer for RemoteFaceAnalyzer {
    async fn ready(&self) -> Result<()> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .map_err(|e| Error::ModelLoad(format!("face sidecar unreachable: {e}")))?;

        if response.status().is_success() {
            tracing::info!(url = %self.base_url, "face analyzer ready");
            Ok(())
        } else {
            Err(Error::ModelLoad(format!(
                "face sidecar not ready: {}",
                response.status()
            )))
        }
    }

    async fn detect(&self, frame: &Frame) -> Result<Vec<Detection>> {
        let result: DetectResponse = self.post("/detect", frame).await?;
        tracing::trace!(faces = result.faces.len(), "detection complete");
        Ok(result.faces)
    }

    async fn descriptor(&self, face: &Frame) -> Result<Descriptor> {
        let result: DescriptorResponse = self.post("/descriptor", face).await?;

        match result.descriptor {
            Some(d) if d.len() == DESCRIPTOR_LEN => Ok(d),
            Some(d) => Err(Error::ModelLoad(format!(
                "descriptor has {} dims, expected {DESCRIPTOR_LEN}",
                d.len()
            ))),
            None => Err(Error::Image("no landmarks found in face crop".to_string())),
        }
    }
}
