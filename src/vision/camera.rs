//! Camera frame sources

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use image::RgbImage;

use crate::{Error, Result};

/// A decoded camera frame
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    #[must_use]
    pub fn new(image: RgbImage) -> Self {
        Self {
            image,
            captured_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// A camera sampled on demand (pull, not push)
#[async_trait]
pub trait Camera: Send + Sync {
    /// Grab the most recent frame
    ///
    /// # Errors
    ///
    /// Returns `SensorUnavailable` if the camera cannot be read
    async fn frame(&self) -> Result<Frame>;
}

/// Camera exposed as an HTTP JPEG snapshot endpoint (IP cameras, v4l2 bridges)
pub struct SnapshotCamera {
    client: reqwest::Client,
    url: String,
}

impl SnapshotCamera {
    /// Create a snapshot camera for the given URL
    ///
    /// # Errors
    ///
    /// Returns error if the URL is empty
    pub fn new(url: String) -> Result<Self> {
        if url.is_empty() {
            return Err(Error::Config("camera snapshot URL required".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(2))
            .build()?;

        Ok(Self { client, url })
    }
}

#[async_trait]
impl Camera for SnapshotCamera {
    async fn frame(&self) -> Result<Frame> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| Error::SensorUnavailable(format!("camera unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::SensorUnavailable(format!(
                "camera returned {status}"
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::SensorUnavailable(format!("camera read failed: {e}")))?;

        let image = image::load_from_memory(&bytes)
            .map_err(|e| Error::Image(e.to_string()))?
            .to_rgb8();

        tracing::trace!(width = image.width(), height = image.height(), "frame grabbed");
        Ok(Frame::new(image))
    }
}
