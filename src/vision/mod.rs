//! VisionEngine - Continuous Frame Analysis
//!
//! ## Responsibilities
//!
//! - Acquire frames from the (exclusively owned) frame source at ~30 fps
//! - Presence detection against a learned background reference
//! - Motion / stability detection against the previous frame
//! - Publish clean and annotated frames into the shared DetectionState
//! - Apply background recalibration requests
//!
//! Presence uses a persistent background model; stability uses a rolling
//! frame-to-frame delta. "Is something here" and "is it moving" are
//! different questions and need different references.

pub mod ops;
pub mod state;

pub use state::DetectionState;

use crate::frame_source::FrameSource;
use image::{GrayImage, Rgb, RgbImage};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

const PRESENCE_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const MOTION_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// Detection thresholds and pacing
#[derive(Debug, Clone)]
pub struct VisionConfig {
    /// Pixel delta vs background above which a pixel counts as foreground
    pub frame_delta_thresh: u8,
    /// Minimum connected-region area for a valid object
    pub min_contour_area: u32,
    /// Pixel delta vs previous frame above which a pixel counts as motion
    pub motion_delta_thresh: u8,
    /// Minimum region area to annotate as motion (visual feedback only)
    pub motion_region_min_area: u32,
    /// Changed-pixel count below which the scene counts as still
    pub stability_pixel_threshold: u32,
    /// Denoise blur radius
    pub blur_radius: u32,
    /// Target inter-frame delay (~30 fps)
    pub frame_interval: Duration,
    /// Pause after a failed acquisition before the next attempt
    pub acquisition_retry_delay: Duration,
    /// Frames discarded at startup before the first background capture
    pub warmup_frames: u32,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            frame_delta_thresh: 30,
            min_contour_area: 500,
            motion_delta_thresh: 15,
            motion_region_min_area: 50,
            stability_pixel_threshold: 1500,
            blur_radius: 10,
            frame_interval: Duration::from_millis(33),
            acquisition_retry_delay: Duration::from_millis(100),
            warmup_frames: 90,
        }
    }
}

/// Per-loop bookkeeping owned by the vision task.
struct LoopCtx {
    /// Smoothed grayscale reference of the empty capture zone.
    /// Replaced wholesale on recalibration, never partially mutated.
    background: Option<GrayImage>,
    /// Previous analyzed grayscale frame, for motion comparison
    prev_gray: Option<GrayImage>,
    warmup_remaining: u32,
}

/// VisionEngine instance
pub struct VisionEngine {
    source: Mutex<Box<dyn FrameSource>>,
    state: Arc<DetectionState>,
    config: VisionConfig,
}

impl VisionEngine {
    pub fn new(
        source: Box<dyn FrameSource>,
        state: Arc<DetectionState>,
        config: VisionConfig,
    ) -> Self {
        Self {
            source: Mutex::new(source),
            state,
            config,
        }
    }

    /// Start the analysis loop. Runs until the process exits; no per-tick
    /// error can stop it.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(
                warmup_frames = self.config.warmup_frames,
                "Starting vision analysis loop"
            );

            let mut ctx = LoopCtx {
                background: None,
                prev_gray: None,
                warmup_remaining: self.config.warmup_frames,
            };

            let mut interval = tokio::time::interval(self.config.frame_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                interval.tick().await;

                let acquired = {
                    let mut source = self.source.lock().await;
                    source.acquire().await
                };

                match acquired {
                    Ok(frame) => self.process_frame(frame, &mut ctx).await,
                    Err(e) => {
                        tracing::debug!(error = %e, "Frame acquisition failed, skipping tick");
                        tokio::time::sleep(self.config.acquisition_retry_delay).await;
                    }
                }
            }
        })
    }

    /// Analyze one frame. Split out of the loop so tests can drive it with
    /// synthetic frames.
    async fn process_frame(&self, frame: RgbImage, ctx: &mut LoopCtx) {
        let clean = frame.clone();
        let gray = ops::box_blur(&ops::to_gray(&frame), self.config.blur_radius);

        // Sensor settle period before the first background capture
        if ctx.warmup_remaining > 0 {
            ctx.warmup_remaining -= 1;
            self.publish(clean.clone(), &clean).await;
            return;
        }

        // Recalibration: replace the background wholesale and reset the
        // previous frame to match, so the first tick afterwards does not
        // see a false motion spike.
        if self.state.take_recalibration_request().await || ctx.background.is_none() {
            ctx.background = Some(gray.clone());
            ctx.prev_gray = Some(gray);
            tracing::info!("Background reference recalibrated");
            self.publish(clean.clone(), &clean).await;
            return;
        }

        let mut annotated = frame;

        // Presence: current frame vs learned background
        let present = {
            let background = match ctx.background.as_ref() {
                Some(b) => b,
                None => return,
            };
            let delta = ops::abs_diff(background, &gray);
            let fg = ops::dilate(
                &ops::binarize(&delta, self.config.frame_delta_thresh),
                2,
            );
            let mut found = false;
            for region in ops::regions(&fg) {
                if region.area > self.config.min_contour_area {
                    found = true;
                    ops::draw_region(&mut annotated, &region, PRESENCE_COLOR);
                }
            }
            found
        };
        self.state.set_present(present).await;

        // Motion / stability: current frame vs previous frame
        if let Some(prev) = ctx.prev_gray.as_ref() {
            let motion = ops::binarize(
                &ops::abs_diff(prev, &gray),
                self.config.motion_delta_thresh,
            );

            if present {
                for region in ops::regions(&motion) {
                    if region.area > self.config.motion_region_min_area {
                        ops::draw_region(&mut annotated, &region, MOTION_COLOR);
                    }
                }
            }

            let pixel_change = ops::count_nonzero(&motion);
            if present && pixel_change < self.config.stability_pixel_threshold {
                self.state.mark_still().await;
            } else {
                self.state.mark_moving().await;
            }
        }

        ctx.prev_gray = Some(gray);
        self.publish(clean, &annotated).await;
    }

    async fn publish(&self, clean: RgbImage, annotated: &RgbImage) {
        match ops::encode_jpeg(annotated) {
            Ok(jpeg) => self.state.publish_frames(clean, jpeg).await,
            Err(e) => tracing::warn!(error = %e, "Annotated frame encode failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use futures::future::BoxFuture;

    struct NullSource;

    impl FrameSource for NullSource {
        fn acquire(&mut self) -> BoxFuture<'_, Result<RgbImage>> {
            Box::pin(async { Err(Error::Acquisition("null source".into())) })
        }
    }

    fn test_config() -> VisionConfig {
        VisionConfig {
            frame_delta_thresh: 30,
            min_contour_area: 100,
            motion_delta_thresh: 15,
            motion_region_min_area: 10,
            stability_pixel_threshold: 40,
            blur_radius: 0,
            warmup_frames: 0,
            ..VisionConfig::default()
        }
    }

    fn engine(stability: Duration) -> (Arc<VisionEngine>, Arc<DetectionState>) {
        let state = Arc::new(DetectionState::new(stability));
        let engine = Arc::new(VisionEngine::new(
            Box::new(NullSource),
            state.clone(),
            test_config(),
        ));
        (engine, state)
    }

    fn empty_ctx() -> LoopCtx {
        LoopCtx {
            background: None,
            prev_gray: None,
            warmup_remaining: 0,
        }
    }

    fn flat_frame() -> RgbImage {
        RgbImage::new(64, 64)
    }

    /// Black frame with a white block covering [x0, x1) x [y0, y1)
    fn frame_with_block(x0: u32, y0: u32, x1: u32, y1: u32) -> RgbImage {
        let mut frame = RgbImage::new(64, 64);
        for y in y0..y1 {
            for x in x0..x1 {
                frame.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }
        frame
    }

    #[tokio::test]
    async fn test_empty_scene_stays_absent() {
        let (engine, state) = engine(Duration::from_millis(100));
        let mut ctx = empty_ctx();

        // First frame calibrates the background
        engine.process_frame(flat_frame(), &mut ctx).await;
        assert!(ctx.background.is_some());

        for _ in 0..5 {
            engine.process_frame(flat_frame(), &mut ctx).await;
            assert!(!state.object_present().await);
            assert!(!state.peek_stable().await);
        }
    }

    #[tokio::test]
    async fn test_object_larger_than_min_area_is_present() {
        let (engine, state) = engine(Duration::from_millis(100));
        let mut ctx = empty_ctx();

        engine.process_frame(flat_frame(), &mut ctx).await;
        // 20x20 block, 24x24 after dilation, well over the 100 px minimum
        engine
            .process_frame(frame_with_block(10, 10, 30, 30), &mut ctx)
            .await;
        assert!(state.object_present().await);
    }

    #[tokio::test]
    async fn test_tiny_region_is_not_presence() {
        let (engine, state) = engine(Duration::from_millis(100));
        let mut ctx = empty_ctx();

        engine.process_frame(flat_frame(), &mut ctx).await;
        // 4x4 block is 8x8 = 64 px after dilation, under the 100 px minimum
        engine
            .process_frame(frame_with_block(10, 10, 14, 14), &mut ctx)
            .await;
        assert!(!state.object_present().await);
    }

    #[tokio::test]
    async fn test_clean_frame_has_no_overlays() {
        let (engine, state) = engine(Duration::from_millis(100));
        let mut ctx = empty_ctx();

        engine.process_frame(flat_frame(), &mut ctx).await;
        engine
            .process_frame(frame_with_block(10, 10, 30, 30), &mut ctx)
            .await;

        let clean = state.clean_frame().await.unwrap();
        // Border of the detected region would be green on the annotated copy
        for y in 0..64 {
            for x in 0..64 {
                let p = clean.get_pixel(x, y);
                assert!(p[0] == p[1] && p[1] == p[2], "overlay leaked into clean frame");
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_still_object_becomes_stable_once() {
        let (engine, state) = engine(Duration::from_millis(500));
        let mut ctx = empty_ctx();

        engine.process_frame(flat_frame(), &mut ctx).await;

        let object = frame_with_block(10, 10, 30, 30);
        // First object frame: big frame-to-frame delta -> moving
        engine.process_frame(object.clone(), &mut ctx).await;
        assert!(!state.peek_stable().await);

        // Identical frames: no motion; hold past the stability duration
        engine.process_frame(object.clone(), &mut ctx).await;
        tokio::time::advance(Duration::from_millis(600)).await;
        engine.process_frame(object.clone(), &mut ctx).await;

        assert!(state.consume_stable().await);
        assert!(!state.consume_stable().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_motion_prevents_stability() {
        let (engine, state) = engine(Duration::from_millis(500));
        let mut ctx = empty_ctx();

        engine.process_frame(flat_frame(), &mut ctx).await;

        // Object jumps around: presence yes, stability never
        for i in 0..6u32 {
            let offset = (i % 2) * 20;
            engine
                .process_frame(frame_with_block(5 + offset, 5, 25 + offset, 25), &mut ctx)
                .await;
            tokio::time::advance(Duration::from_millis(200)).await;
            assert!(state.object_present().await);
            assert!(!state.peek_stable().await);
        }
    }

    #[tokio::test]
    async fn test_recalibration_absorbs_resident_object() {
        let (engine, state) = engine(Duration::from_millis(100));
        let mut ctx = empty_ctx();

        engine.process_frame(flat_frame(), &mut ctx).await;
        let object = frame_with_block(10, 10, 30, 30);
        engine.process_frame(object.clone(), &mut ctx).await;
        assert!(state.object_present().await);

        state.request_recalibration().await;
        engine.process_frame(object.clone(), &mut ctx).await;
        // Background now includes the object; next tick sees an empty zone
        engine.process_frame(object.clone(), &mut ctx).await;
        assert!(!state.object_present().await);
    }

    #[tokio::test]
    async fn test_warmup_frames_skip_detection() {
        let state = Arc::new(DetectionState::new(Duration::from_millis(100)));
        let config = VisionConfig {
            warmup_frames: 2,
            ..test_config()
        };
        let engine = VisionEngine::new(Box::new(NullSource), state.clone(), config);
        let mut ctx = LoopCtx {
            background: None,
            prev_gray: None,
            warmup_remaining: 2,
        };

        engine.process_frame(flat_frame(), &mut ctx).await;
        engine.process_frame(flat_frame(), &mut ctx).await;
        assert!(ctx.background.is_none());
        // Frames still reach the stream during warmup
        assert!(state.annotated_jpeg().await.is_some());

        engine.process_frame(flat_frame(), &mut ctx).await;
        assert!(ctx.background.is_some());
    }
}
