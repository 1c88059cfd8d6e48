//! FrameSource - Capture Device Abstraction
//!
//! ## Responsibilities
//!
//! - Produce raw frames for the vision loop
//! - Isolate the capture transport (HTTP snapshot endpoint in production)
//!
//! The frame source is a singly-owned exclusive resource: only the vision
//! loop holds it, and nothing else touches the device.

use crate::error::{Error, Result};
use futures::future::BoxFuture;
use image::RgbImage;
use std::time::Duration;

/// One frame per call; failures are transient and non-fatal.
pub trait FrameSource: Send {
    fn acquire(&mut self) -> BoxFuture<'_, Result<RgbImage>>;
}

/// Frame source backed by an HTTP snapshot endpoint (e.g. an MJPEG camera's
/// still URL or a local capture daemon).
pub struct HttpFrameSource {
    client: reqwest::Client,
    url: String,
}

impl HttpFrameSource {
    pub fn new(url: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client, url })
    }
}

impl FrameSource for HttpFrameSource {
    fn acquire(&mut self) -> BoxFuture<'_, Result<RgbImage>> {
        Box::pin(async move {
            let resp = self
                .client
                .get(&self.url)
                .send()
                .await
                .map_err(|e| Error::Acquisition(format!("snapshot request failed: {}", e)))?;

            if !resp.status().is_success() {
                return Err(Error::Acquisition(format!(
                    "snapshot endpoint returned {}",
                    resp.status()
                )));
            }

            let bytes = resp
                .bytes()
                .await
                .map_err(|e| Error::Acquisition(format!("snapshot body read failed: {}", e)))?;

            let img = image::load_from_memory(&bytes)
                .map_err(|e| Error::Acquisition(format!("snapshot decode failed: {}", e)))?;
            Ok(img.to_rgb8())
        })
    }
}
