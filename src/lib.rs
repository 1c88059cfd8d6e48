//! Sortstation Server Library
//!
//! Automated waste-sorting station
//!
//! ## Architecture (9 Components)
//!
//! 1. FrameSource - Frame acquisition from the station camera
//! 2. VisionEngine - Presence and stability detection
//! 3. DetectionState - Shared detection flags and frames
//! 4. Classifier - External image classification adapter
//! 5. ActuationChannel - Microcontroller serial link
//! 6. HistoryService - Classification record persistence
//! 7. ClassificationWorkflow - Capture, classify, dispatch, persist
//! 8. Orchestrator - Automatic classification state machine
//! 9. WebAPI - REST API endpoints
//!
//! ## Design Principles
//!
//! - The vision loop is the only writer of frames and detection flags
//! - The classification workflow is single flight; concurrent triggers
//!   are rejected, never queued
//! - Hardware seams (camera, classifier, serial) are traits

pub mod actuation;
pub mod classifier;
pub mod error;
pub mod frame_source;
pub mod history;
pub mod orchestrator;
pub mod speech;
pub mod state;
pub mod vision;
pub mod web_api;
pub mod workflow;

pub use error::{Error, Result};
pub use state::AppState;
