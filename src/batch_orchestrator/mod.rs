//! BatchOrchestrator - The Analysis Cycle Loop
//!
//! ## Responsibilities
//!
//! - Drive the capture -> batched inference -> analyze -> publish cycle
//! - One inference call per cycle covering every channel with a frame
//! - Reconcile open capture resources with the registered channel set
//!
//! One failed channel never blocks the rest: capture misses simply leave
//! that channel out of the batch, and a failed inference call skips the
//! whole cycle without touching published results.

use crate::capture_manager::CaptureManager;
use crate::channel_registry::ChannelRegistry;
use crate::inference_client::{InferenceParams, VehicleDetector};
use crate::occupancy_analyzer::{analyze, ThresholdProfile};
use crate::publish_pipeline::{PublishJob, PublishPipeline};
use crate::roi_store::RoiStore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// BatchOrchestrator instance
pub struct BatchOrchestrator {
    registry: Arc<ChannelRegistry>,
    capture: Arc<CaptureManager>,
    detector: Arc<dyn VehicleDetector>,
    roi_store: Arc<RoiStore>,
    publisher: Arc<PublishPipeline>,
    params: InferenceParams,
    profile: ThresholdProfile,
    /// Pause between cycles when no channel is registered
    empty_backoff: Duration,
    cycle: Arc<AtomicU64>,
    running: Arc<RwLock<bool>>,
}

impl BatchOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<ChannelRegistry>,
        capture: Arc<CaptureManager>,
        detector: Arc<dyn VehicleDetector>,
        roi_store: Arc<RoiStore>,
        publisher: Arc<PublishPipeline>,
        params: InferenceParams,
        profile: ThresholdProfile,
        empty_backoff: Duration,
    ) -> Self {
        Self {
            registry,
            capture,
            detector,
            roi_store,
            publisher,
            params,
            profile,
            empty_backoff,
            cycle: Arc::new(AtomicU64::new(0)),
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Cycles completed since start
    pub fn cycle_count(&self) -> u64 {
        self.cycle.load(Ordering::SeqCst)
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Start the cycle loop
    pub async fn start(&self) {
        {
            let mut running = self.running.write().await;
            if *running {
                tracing::warn!("Orchestrator already running");
                return;
            }
            *running = true;
        }

        tracing::info!("Starting batch orchestrator");

        let registry = self.registry.clone();
        let capture = self.capture.clone();
        let detector = self.detector.clone();
        let roi_store = self.roi_store.clone();
        let publisher = self.publisher.clone();
        let params = self.params;
        let profile = self.profile;
        let empty_backoff = self.empty_backoff;
        let cycle = self.cycle.clone();
        let running = self.running.clone();

        tokio::spawn(async move {
            loop {
                {
                    let is_running = running.read().await;
                    if !*is_running {
                        break;
                    }
                }

                let channels = registry.snapshot().await;
                Self::release_orphans(&capture, &channels).await;

                if channels.is_empty() {
                    tokio::time::sleep(empty_backoff).await;
                    continue;
                }

                let n = cycle.fetch_add(1, Ordering::SeqCst);
                let batched = Self::run_cycle(
                    n, &channels, &capture, &detector, &roi_store, &publisher, &params, &profile,
                )
                .await;

                // An empty batch means every stream failed to yield this
                // cycle; back off instead of hammering the openers.
                if !batched {
                    tokio::time::sleep(empty_backoff).await;
                    continue;
                }

                // Cycles run back to back; the yield keeps a saturated loop
                // from starving the runtime.
                tokio::task::yield_now().await;
            }

            capture.release_all().await;
            tracing::info!("Batch orchestrator stopped");
        });
    }

    /// Stop the cycle loop
    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
        tracing::info!("Stopping batch orchestrator");
    }

    /// Release capture resources of channels no longer registered
    async fn release_orphans(capture: &CaptureManager, channels: &[(u32, String)]) {
        for open_id in capture.open_channels().await {
            if !channels.iter().any(|(id, _)| *id == open_id) {
                tracing::info!(channel_id = open_id, "Releasing deregistered channel");
                capture.release(open_id).await;
            }
        }
    }

    /// One full cycle over the channel snapshot.
    ///
    /// Returns `false` when no channel yielded a frame, so the loop can
    /// back off instead of spinning.
    #[allow(clippy::too_many_arguments)]
    async fn run_cycle(
        cycle: u64,
        channels: &[(u32, String)],
        capture: &CaptureManager,
        detector: &Arc<dyn VehicleDetector>,
        roi_store: &RoiStore,
        publisher: &PublishPipeline,
        params: &InferenceParams,
        profile: &ThresholdProfile,
    ) -> bool {
        let mut frames = Vec::with_capacity(channels.len());
        for (channel_id, url) in channels {
            if let Some(frame) = capture.fetch_latest(*channel_id, url, cycle).await {
                frames.push(frame);
            }
        }

        if frames.is_empty() {
            tracing::debug!(
                cycle = cycle,
                channels = channels.len(),
                "No frames this cycle"
            );
            return false;
        }

        let outputs = match detector.infer_batch(&frames, params).await {
            Ok(outputs) => outputs,
            Err(e) => {
                tracing::error!(
                    cycle = cycle,
                    batch_size = frames.len(),
                    error = %e,
                    "Batch inference failed, skipping cycle"
                );
                return true;
            }
        };

        for (frame, detection) in frames.into_iter().zip(outputs) {
            let rois = roi_store.masks_for(frame.channel_id);
            let report = analyze(&detection, &rois, profile);

            tracing::debug!(
                channel_id = frame.channel_id,
                cycle = cycle,
                vehicle_count = detection.vehicle_count,
                directions = report.len(),
                "Channel analyzed"
            );

            publisher
                .submit(PublishJob {
                    frame,
                    detection,
                    report,
                })
                .await;
        }

        true
    }
}
