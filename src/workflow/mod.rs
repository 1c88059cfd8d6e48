//! ClassificationWorkflow - Capture, Classify, Dispatch, Persist
//!
//! ## Responsibilities
//!
//! - Run the bounded classify-and-sort critical section
//! - Enforce single-flight execution (reject, never queue)
//! - Persist exactly one record per invocation
//!
//! The execution token is a `try_lock` on a tokio mutex: a second caller
//! gets `ClassificationInProgress` immediately, and the guard's drop
//! releases the token on every exit path, errors included.

use crate::actuation::ActuationChannel;
use crate::classifier::Classifier;
use crate::error::{Error, Result};
use crate::history::{DispatchStatus, HistoryService};
use crate::speech::SpeechQueue;
use crate::vision::DetectionState;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Result of one completed workflow invocation.
#[derive(Debug, Clone, Serialize)]
pub struct ClassificationOutcome {
    pub record_id: i64,
    pub material: Option<String>,
    pub dispatch_status: DispatchStatus,
    pub spoken_response: String,
}

/// ClassificationWorkflow instance
pub struct ClassificationWorkflow {
    detection: Arc<DetectionState>,
    classifier: Arc<dyn Classifier>,
    actuation: Arc<dyn ActuationChannel>,
    history: Arc<HistoryService>,
    speech: Arc<SpeechQueue>,
    /// Single-flight execution token
    busy: Mutex<()>,
}

impl ClassificationWorkflow {
    pub fn new(
        detection: Arc<DetectionState>,
        classifier: Arc<dyn Classifier>,
        actuation: Arc<dyn ActuationChannel>,
        history: Arc<HistoryService>,
        speech: Arc<SpeechQueue>,
    ) -> Self {
        Self {
            detection,
            classifier,
            actuation,
            history,
            speech,
            busy: Mutex::new(()),
        }
    }

    /// Run one classification end to end.
    ///
    /// Fails fast with `ClassificationInProgress` if another invocation
    /// holds the token, and with `NoFrameAvailable` before the first
    /// captured frame. A failed actuation still completes the workflow;
    /// the failure lands in the record's dispatch status.
    pub async fn run(&self) -> Result<ClassificationOutcome> {
        let _token = self
            .busy
            .try_lock()
            .map_err(|_| Error::ClassificationInProgress)?;

        tracing::info!("Classification workflow started");

        let frame = self
            .detection
            .clean_jpeg()
            .await?
            .ok_or(Error::NoFrameAvailable)?;

        self.speech
            .push("Analyzing the image to classify the object.")
            .await;

        let verdict = match self.classifier.classify(frame).await {
            Ok(v) => v,
            Err(e) => {
                self.speech
                    .push("Sorry, I could not classify the object.")
                    .await;
                return Err(e);
            }
        };
        tracing::info!(
            material = ?verdict.material,
            objects = verdict.objects.len(),
            confidence = verdict.top_confidence(),
            "Classifier verdict received"
        );

        let record_id = self
            .history
            .add_record(
                verdict.material.as_deref(),
                &verdict.objects,
                verdict.top_confidence(),
                DispatchStatus::Pending,
                &verdict.spoken_response,
            )
            .await?;

        let dispatch_status = match verdict.material.as_deref() {
            Some(material) => {
                self.speech
                    .push(format!("Moving the motors to the {} compartment.", material))
                    .await;

                let acked = match self.actuation.send(material).await {
                    Ok(acked) => acked,
                    Err(e) => {
                        tracing::error!(error = %e, material = %material, "Actuation send failed");
                        false
                    }
                };

                if acked {
                    DispatchStatus::Dispatched
                } else {
                    DispatchStatus::ActuationError
                }
            }
            None => {
                tracing::info!("No actuation required");
                DispatchStatus::NotRequired
            }
        };

        if !verdict.spoken_response.is_empty() {
            self.speech.push(verdict.spoken_response.clone()).await;
        }

        self.history.update_status(record_id, dispatch_status).await?;

        tracing::info!(
            record_id = record_id,
            status = %dispatch_status.as_str(),
            "Classification workflow completed"
        );

        Ok(ClassificationOutcome {
            record_id,
            material: verdict.material,
            dispatch_status,
            spoken_response: verdict.spoken_response,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{DetectedObject, Verdict};
    use futures::future::BoxFuture;
    use image::RgbImage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Semaphore;

    fn verdict(material: Option<&str>) -> Verdict {
        Verdict {
            material: material.map(str::to_string),
            objects: vec![DetectedObject {
                name: "water bottle".to_string(),
                confidence: 0.88,
            }],
            spoken_response: "A water bottle, off it goes.".to_string(),
        }
    }

    struct FixedClassifier {
        material: Option<&'static str>,
        calls: AtomicUsize,
    }

    impl FixedClassifier {
        fn new(material: Option<&'static str>) -> Self {
            Self {
                material,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl Classifier for FixedClassifier {
        fn classify(&self, _image: Vec<u8>) -> BoxFuture<'_, Result<Verdict>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Ok(verdict(self.material))
            })
        }
    }

    struct FailingClassifier;

    impl Classifier for FailingClassifier {
        fn classify(&self, _image: Vec<u8>) -> BoxFuture<'_, Result<Verdict>> {
            Box::pin(async { Err(Error::Classifier("no usable material".to_string())) })
        }
    }

    /// Blocks inside classify() until the test releases the gate.
    struct GatedClassifier {
        gate: Arc<Semaphore>,
        entered: Arc<AtomicUsize>,
    }

    impl Classifier for GatedClassifier {
        fn classify(&self, _image: Vec<u8>) -> BoxFuture<'_, Result<Verdict>> {
            let gate = self.gate.clone();
            let entered = self.entered.clone();
            Box::pin(async move {
                entered.fetch_add(1, Ordering::SeqCst);
                let permit = gate
                    .acquire_owned()
                    .await
                    .map_err(|_| Error::Internal("gate closed".to_string()))?;
                permit.forget();
                Ok(verdict(Some("plastic")))
            })
        }
    }

    struct RecordingActuator {
        ack: bool,
        sent: tokio::sync::Mutex<Vec<String>>,
    }

    impl RecordingActuator {
        fn new(ack: bool) -> Self {
            Self {
                ack,
                sent: tokio::sync::Mutex::new(Vec::new()),
            }
        }
    }

    impl ActuationChannel for RecordingActuator {
        fn send<'a>(&'a self, material: &'a str) -> BoxFuture<'a, Result<bool>> {
            Box::pin(async move {
                self.sent.lock().await.push(material.to_string());
                Ok(self.ack)
            })
        }
    }

    async fn history() -> Arc<HistoryService> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let service = HistoryService::new(pool);
        service.init().await.unwrap();
        Arc::new(service)
    }

    async fn detection_with_frame() -> Arc<DetectionState> {
        let state = Arc::new(DetectionState::new(Duration::from_secs(1)));
        state
            .publish_frames(RgbImage::new(8, 8), vec![0xFF, 0xD8])
            .await;
        state
    }

    async fn workflow_with(
        classifier: Arc<dyn Classifier>,
        actuation: Arc<dyn ActuationChannel>,
    ) -> (Arc<ClassificationWorkflow>, Arc<HistoryService>, Arc<SpeechQueue>) {
        let history = history().await;
        let speech = Arc::new(SpeechQueue::new());
        let workflow = Arc::new(ClassificationWorkflow::new(
            detection_with_frame().await,
            classifier,
            actuation,
            history.clone(),
            speech.clone(),
        ));
        (workflow, history, speech)
    }

    #[tokio::test]
    async fn test_no_frame_available() {
        let history = history().await;
        let workflow = ClassificationWorkflow::new(
            Arc::new(DetectionState::new(Duration::from_secs(1))),
            Arc::new(FixedClassifier::new(Some("plastic"))),
            Arc::new(RecordingActuator::new(true)),
            history.clone(),
            Arc::new(SpeechQueue::new()),
        );

        assert!(matches!(workflow.run().await, Err(Error::NoFrameAvailable)));
        assert!(history.recent(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_acknowledged_dispatch() {
        let actuator = Arc::new(RecordingActuator::new(true));
        let (workflow, history, _) = workflow_with(
            Arc::new(FixedClassifier::new(Some("plastic"))),
            actuator.clone(),
        )
        .await;

        let outcome = workflow.run().await.unwrap();
        assert_eq!(outcome.material.as_deref(), Some("plastic"));
        assert_eq!(outcome.dispatch_status, DispatchStatus::Dispatched);

        assert_eq!(actuator.sent.lock().await.as_slice(), ["plastic"]);
        let records = history.recent(10).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].dispatch_status, DispatchStatus::Dispatched);
    }

    #[tokio::test]
    async fn test_unacknowledged_dispatch_is_actuation_error() {
        let (workflow, history, _) = workflow_with(
            Arc::new(FixedClassifier::new(Some("metal"))),
            Arc::new(RecordingActuator::new(false)),
        )
        .await;

        let outcome = workflow.run().await.unwrap();
        assert_eq!(outcome.dispatch_status, DispatchStatus::ActuationError);
        let records = history.recent(10).await.unwrap();
        assert_eq!(records[0].dispatch_status, DispatchStatus::ActuationError);
    }

    #[tokio::test]
    async fn test_none_material_skips_actuation() {
        let actuator = Arc::new(RecordingActuator::new(true));
        let (workflow, history, _) =
            workflow_with(Arc::new(FixedClassifier::new(None)), actuator.clone()).await;

        let outcome = workflow.run().await.unwrap();
        assert_eq!(outcome.dispatch_status, DispatchStatus::NotRequired);
        assert!(actuator.sent.lock().await.is_empty());
        assert_eq!(
            history.recent(10).await.unwrap()[0].dispatch_status,
            DispatchStatus::NotRequired
        );
    }

    #[tokio::test]
    async fn test_classifier_failure_persists_nothing_and_releases_token() {
        let (workflow, history, _) = workflow_with(
            Arc::new(FailingClassifier),
            Arc::new(RecordingActuator::new(true)),
        )
        .await;

        assert!(matches!(workflow.run().await, Err(Error::Classifier(_))));
        assert!(history.recent(10).await.unwrap().is_empty());

        // Token released: the next attempt fails on the classifier again,
        // not on the single-flight guard
        assert!(matches!(workflow.run().await, Err(Error::Classifier(_))));
    }

    #[tokio::test]
    async fn test_concurrent_invocations_single_flight() {
        let gate = Arc::new(Semaphore::new(0));
        let entered = Arc::new(AtomicUsize::new(0));
        let (workflow, history, _) = workflow_with(
            Arc::new(GatedClassifier {
                gate: gate.clone(),
                entered: entered.clone(),
            }),
            Arc::new(RecordingActuator::new(true)),
        )
        .await;

        let first = tokio::spawn({
            let workflow = workflow.clone();
            async move { workflow.run().await }
        });

        // Wait until the first invocation holds the token inside classify()
        while entered.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        // Every attempt while the first is in flight is rejected immediately
        for _ in 0..3 {
            assert!(matches!(
                workflow.run().await,
                Err(Error::ClassificationInProgress)
            ));
        }

        gate.add_permits(1);
        let outcome = first.await.unwrap().unwrap();
        assert_eq!(outcome.dispatch_status, DispatchStatus::Dispatched);

        // Exactly one record from the one invocation that proceeded
        assert_eq!(history.recent(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_speech_messages_for_full_run() {
        let (workflow, _, speech) = workflow_with(
            Arc::new(FixedClassifier::new(Some("organic"))),
            Arc::new(RecordingActuator::new(true)),
        )
        .await;

        workflow.run().await.unwrap();
        let messages = speech.drain().await;
        assert_eq!(messages.len(), 3);
        assert!(messages[0].contains("Analyzing"));
        assert!(messages[1].contains("organic"));
        assert!(messages[2].contains("water bottle"));
    }
}
