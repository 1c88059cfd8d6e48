//! DetectionState - Shared Detection Flags and Frames
//!
//! ## Responsibilities
//!
//! - Hold the latest clean and annotated frames
//! - Hold the presence flag and the stability flag + stable-since timestamp
//! - Enforce one-shot consume semantics on the stability flag
//! - Carry the background recalibration request into the vision loop
//!
//! The vision loop is the only writer of frames and presence; the
//! orchestrator and HTTP handlers read through the accessors. A read may
//! observe the previous tick's value, which is an accepted staleness bound.

use crate::vision::ops::encode_jpeg;
use chrono::{DateTime, Utc};
use image::RgbImage;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

#[derive(Default)]
struct Inner {
    /// Last unmodified frame (consumed by the classification workflow)
    clean: Option<RgbImage>,
    /// Last annotated frame, pre-encoded for streaming
    annotated_jpeg: Option<Vec<u8>>,
    object_present: bool,
    object_stable: bool,
    stable_since: Option<Instant>,
    recalibrate_requested: bool,
    last_frame_at: Option<DateTime<Utc>>,
}

/// Shared detection state, passed by `Arc` to both continuous loops.
pub struct DetectionState {
    stability_duration: Duration,
    inner: RwLock<Inner>,
}

impl DetectionState {
    pub fn new(stability_duration: Duration) -> Self {
        Self {
            stability_duration,
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Publish this tick's frames.
    pub async fn publish_frames(&self, clean: RgbImage, annotated_jpeg: Vec<u8>) {
        let mut inner = self.inner.write().await;
        inner.clean = Some(clean);
        inner.annotated_jpeg = Some(annotated_jpeg);
        inner.last_frame_at = Some(Utc::now());
    }

    pub async fn set_present(&self, present: bool) {
        self.inner.write().await.object_present = present;
    }

    pub async fn object_present(&self) -> bool {
        self.inner.read().await.object_present
    }

    /// Record a motionless sample.
    ///
    /// Arms the stable-since timestamp on the first still sample and raises
    /// the stability flag once the object has been still for the configured
    /// duration.
    pub async fn mark_still(&self) {
        let now = Instant::now();
        let mut inner = self.inner.write().await;
        let since = *inner.stable_since.get_or_insert(now);
        if now.duration_since(since) >= self.stability_duration {
            inner.object_stable = true;
        }
    }

    /// Record a moving (or absent-object) sample: stillness starts over.
    pub async fn mark_moving(&self) {
        let mut inner = self.inner.write().await;
        inner.stable_since = None;
        inner.object_stable = false;
    }

    /// One-shot read of the stability flag.
    ///
    /// A `true` result resets the flag and clears the stable-since
    /// timestamp, so the same settle event can never trigger a second
    /// classification.
    pub async fn consume_stable(&self) -> bool {
        let mut inner = self.inner.write().await;
        if inner.object_stable {
            inner.object_stable = false;
            inner.stable_since = None;
            true
        } else {
            false
        }
    }

    /// Non-consuming read, for status reporting only.
    pub async fn peek_stable(&self) -> bool {
        self.inner.read().await.object_stable
    }

    pub async fn clean_frame(&self) -> Option<RgbImage> {
        self.inner.read().await.clean.clone()
    }

    /// Latest clean frame as JPEG bytes (never contains overlays).
    pub async fn clean_jpeg(&self) -> crate::error::Result<Option<Vec<u8>>> {
        let frame = { self.inner.read().await.clean.clone() };
        match frame {
            Some(f) => Ok(Some(encode_jpeg(&f)?)),
            None => Ok(None),
        }
    }

    pub async fn annotated_jpeg(&self) -> Option<Vec<u8>> {
        self.inner.read().await.annotated_jpeg.clone()
    }

    pub async fn request_recalibration(&self) {
        self.inner.write().await.recalibrate_requested = true;
    }

    /// Consume a pending recalibration request (vision loop only).
    pub async fn take_recalibration_request(&self) -> bool {
        let mut inner = self.inner.write().await;
        std::mem::take(&mut inner.recalibrate_requested)
    }

    pub async fn last_frame_at(&self) -> Option<DateTime<Utc>> {
        self.inner.read().await.last_frame_at
    }
}
