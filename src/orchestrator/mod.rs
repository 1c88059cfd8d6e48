//! Orchestrator - Automatic Classification State Machine
//!
//! ## Responsibilities
//!
//! - Drive the detection -> stability -> classification -> cooldown cycle
//! - Invoke the classification workflow when an object settles
//! - Request background recalibration when the cooldown ends
//!
//! The machine ticks on an interval and consults the shared detection
//! flags; it never touches frames directly. A workflow failure still
//! enters cooldown, so a problematic object cannot spin the classifier.

use crate::speech::SpeechQueue;
use crate::vision::DetectionState;
use crate::workflow::ClassificationWorkflow;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Phase of the automatic classification cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemPhase {
    /// Background is clean, waiting for something to appear
    AwaitingObject,
    /// An object is present, waiting for it to stop moving
    AwaitingStability,
    /// Post-classification pause before the next detection
    Cooldown,
}

/// Current phase, shared read-only with the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseState {
    pub phase: SystemPhase,
    pub entered_at: DateTime<Utc>,
}

/// Orchestrator timing configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub tick_interval: Duration,
    /// Max time in `AwaitingStability` before giving up on the object
    pub stability_timeout: Duration,
    pub cooldown: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(100),
            stability_timeout: Duration::from_secs(10),
            cooldown: Duration::from_secs(10),
        }
    }
}

/// Per-loop timing context, owned by the spawned task.
struct LoopCtx {
    phase_entered: Instant,
}

/// Orchestrator instance
pub struct Orchestrator {
    detection: Arc<DetectionState>,
    workflow: Arc<ClassificationWorkflow>,
    speech: Arc<SpeechQueue>,
    phase: Arc<RwLock<PhaseState>>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        detection: Arc<DetectionState>,
        workflow: Arc<ClassificationWorkflow>,
        speech: Arc<SpeechQueue>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            detection,
            workflow,
            speech,
            phase: Arc::new(RwLock::new(PhaseState {
                phase: SystemPhase::AwaitingObject,
                entered_at: Utc::now(),
            })),
            config,
        }
    }

    /// Handle to the shared phase, for status reporting.
    pub fn phase_handle(&self) -> Arc<RwLock<PhaseState>> {
        self.phase.clone()
    }

    /// Spawn the state machine loop.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(
                tick_ms = self.config.tick_interval.as_millis() as u64,
                "Orchestrator loop started"
            );
            let mut ctx = LoopCtx {
                phase_entered: Instant::now(),
            };
            let mut ticker = tokio::time::interval(self.config.tick_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                self.step(&mut ctx).await;
            }
        })
    }

    async fn set_phase(&self, ctx: &mut LoopCtx, next: SystemPhase) {
        ctx.phase_entered = Instant::now();
        let mut state = self.phase.write().await;
        tracing::info!(from = ?state.phase, to = ?next, "Phase transition");
        state.phase = next;
        state.entered_at = Utc::now();
    }

    async fn current_phase(&self) -> SystemPhase {
        self.phase.read().await.phase
    }

    /// Advance the state machine by one tick.
    async fn step(&self, ctx: &mut LoopCtx) {
        match self.current_phase().await {
            SystemPhase::AwaitingObject => {
                if self.detection.object_present().await {
                    tracing::info!("Object detected, waiting for it to settle");
                    self.speech.push("Moving object detected.").await;
                    self.set_phase(ctx, SystemPhase::AwaitingStability).await;
                }
            }
            SystemPhase::AwaitingStability => {
                if self.detection.consume_stable().await {
                    tracing::info!("Object settled, starting classification");
                    if let Err(e) = self.workflow.run().await {
                        tracing::error!(error = %e, "Classification workflow failed");
                    }
                    self.set_phase(ctx, SystemPhase::Cooldown).await;
                } else if !self.detection.object_present().await {
                    tracing::info!("Object withdrawn before settling");
                    self.set_phase(ctx, SystemPhase::AwaitingObject).await;
                } else if ctx.phase_entered.elapsed() > self.config.stability_timeout {
                    tracing::warn!(
                        timeout_s = self.config.stability_timeout.as_secs(),
                        "Object kept moving past the stability timeout"
                    );
                    self.set_phase(ctx, SystemPhase::AwaitingObject).await;
                }
            }
            SystemPhase::Cooldown => {
                if ctx.phase_entered.elapsed() > self.config.cooldown {
                    tracing::info!("Cooldown finished, recalibrating background");
                    self.detection.request_recalibration().await;
                    self.set_phase(ctx, SystemPhase::AwaitingObject).await;
                }
            }
        }
    }
}
