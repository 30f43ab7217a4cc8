//! PublishPipeline - Bounded Render/Publish Worker Pool
//!
//! ## Responsibilities
//!
//! - Render an annotated, compressed preview image per analyzed frame
//! - Build the ChannelResult and replace it atomically in the ResultStore
//! - Keep slow encodes off the orchestrator's capture/inference cycle
//!
//! Overload policy: one pending slot per channel. Submitting a job while
//! an older one for the same channel is still queued replaces the old job
//! in place: only the latest state matters, and a channel can never be
//! silently starved out of the queue. Render/encode failures drop the job
//! and leave the channel's previous published result intact.

use crate::error::{Error, Result};
use crate::models::{ChannelResult, DetectionOutput, Frame, OccupancyReport};
use crate::occupancy_analyzer::union_masks;
use crate::result_store::ResultStore;
use bytes::Bytes;
use chrono::Utc;
use image::imageops::FilterType;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

/// Overlay color for detected vehicle regions (RGB)
const OVERLAY_COLOR: [u8; 3] = [0, 200, 60];

/// Preview rendering parameters
#[derive(Debug, Clone, Copy)]
pub struct RenderConfig {
    pub preview_width: u32,
    pub preview_height: u32,
    pub jpeg_quality: u8,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            preview_width: 480,
            preview_height: 270,
            jpeg_quality: 45,
        }
    }
}

/// One unit of publish work, submitted fire-and-forget by the orchestrator
pub struct PublishJob {
    pub frame: Frame,
    pub detection: DetectionOutput,
    pub report: OccupancyReport,
}

/// Per-channel latest-slot queue
#[derive(Default)]
struct Pending {
    order: VecDeque<u32>,
    jobs: HashMap<u32, PublishJob>,
}

struct Inner {
    store: Arc<ResultStore>,
    render: RenderConfig,
    pending: Mutex<Pending>,
    notify: Notify,
    running: AtomicBool,
}

/// Bounded pool of publish workers
pub struct PublishPipeline {
    inner: Arc<Inner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl PublishPipeline {
    /// Spawn `worker_count` workers publishing into `store`
    pub fn start(store: Arc<ResultStore>, render: RenderConfig, worker_count: usize) -> Self {
        let inner = Arc::new(Inner {
            store,
            render,
            pending: Mutex::new(Pending::default()),
            notify: Notify::new(),
            running: AtomicBool::new(true),
        });

        let mut handles = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let inner = inner.clone();
            handles.push(tokio::spawn(async move {
                Self::worker_loop(worker_id, inner).await;
            }));
        }

        tracing::info!(worker_count = worker_count, "Publish pipeline started");

        Self {
            inner,
            workers: Mutex::new(handles),
        }
    }

    /// Enqueue a job. Replaces any not-yet-started job for the same channel.
    pub async fn submit(&self, job: PublishJob) {
        let channel_id = job.frame.channel_id;
        {
            let mut pending = self.inner.pending.lock().await;
            if pending.jobs.insert(channel_id, job).is_some() {
                tracing::debug!(
                    channel_id = channel_id,
                    "Replaced pending publish job with a fresher one"
                );
            } else {
                pending.order.push_back(channel_id);
            }
        }
        self.inner.notify.notify_one();
    }

    /// Number of jobs waiting for a worker
    pub async fn backlog(&self) -> usize {
        let pending = self.inner.pending.lock().await;
        pending.jobs.len()
    }

    /// Stop the workers. The queue is abandoned; nothing partially built
    /// is published.
    pub async fn shutdown(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.notify.notify_waiters();

        let mut workers = self.workers.lock().await;
        for handle in workers.drain(..) {
            let _ = handle.await;
        }
        tracing::info!("Publish pipeline stopped");
    }

    async fn worker_loop(worker_id: usize, inner: Arc<Inner>) {
        loop {
            if !inner.running.load(Ordering::SeqCst) {
                break;
            }

            let job = {
                let mut pending = inner.pending.lock().await;
                pending
                    .order
                    .pop_front()
                    .and_then(|id| pending.jobs.remove(&id))
            };

            match job {
                Some(job) => {
                    let channel_id = job.frame.channel_id;
                    if let Err(e) = Self::process(&inner, job).await {
                        // Previous result stays published (stale but valid)
                        tracing::warn!(
                            worker_id = worker_id,
                            channel_id = channel_id,
                            error = %e,
                            "Publish job dropped"
                        );
                    }
                }
                None => inner.notify.notified().await,
            }
        }
    }

    async fn process(inner: &Inner, job: PublishJob) -> Result<()> {
        let preview = render_preview(&job.frame, &job.detection, &inner.render)?;

        let result = ChannelResult {
            channel_id: job.frame.channel_id,
            vehicle_total_count: job.detection.vehicle_count,
            results: job.report,
            preview_jpeg: Some(preview),
            timestamp: Utc::now(),
        };

        if inner.store.publish(result).await {
            tracing::debug!(
                channel_id = job.frame.channel_id,
                cycle = job.frame.cycle,
                "Result published"
            );
        }
        Ok(())
    }
}

/// Render the compressed preview: tint detected regions, downscale,
/// JPEG-encode. Pure function of its inputs.
pub fn render_preview(
    frame: &Frame,
    detection: &DetectionOutput,
    config: &RenderConfig,
) -> Result<Bytes> {
    let mut img = image::load_from_memory(&frame.jpeg)
        .map_err(|e| Error::Render(format!("preview decode failed: {}", e)))?
        .to_rgb8();

    if let Some(union) = union_masks(&detection.masks) {
        let union = union.resample(img.width(), img.height());
        for (x, y, pixel) in img.enumerate_pixels_mut() {
            if union.get(x, y) {
                for (p, c) in pixel.0.iter_mut().zip(OVERLAY_COLOR) {
                    *p = ((*p as u16 + c as u16) / 2) as u8;
                }
            }
        }
    }

    let resized = image::imageops::resize(
        &img,
        config.preview_width,
        config.preview_height,
        FilterType::Triangle,
    );

    let mut out = Vec::new();
    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, config.jpeg_quality)
        .encode_image(&resized)
        .map_err(|e| Error::Render(format!("preview encode failed: {}", e)))?;

    Ok(Bytes::from(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Direction, DirectionReport, RegionMask, TrafficStatus};
    use std::time::Duration;

    fn test_frame(channel_id: u32) -> Frame {
        let img = image::RgbImage::from_pixel(32, 32, image::Rgb([120, 120, 120]));
        let mut jpeg = Vec::new();
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, 90)
            .encode_image(&img)
            .unwrap();
        Frame {
            channel_id,
            cycle: 0,
            jpeg: Bytes::from(jpeg),
            width: 32,
            height: 32,
        }
    }

    fn test_detection(channel_id: u32, vehicle_count: u32) -> DetectionOutput {
        DetectionOutput {
            channel_id,
            vehicle_count,
            masks: vec![RegionMask::from_fn(16, 16, |x, _| x < 8)],
        }
    }

    fn test_report() -> OccupancyReport {
        let mut report = OccupancyReport::new();
        report.insert(
            Direction::Up,
            DirectionReport {
                occupancy_rate: 42.0,
                status: TrafficStatus::Moderate,
            },
        );
        report
    }

    #[test]
    fn test_render_preview_produces_jpeg() {
        let config = RenderConfig {
            preview_width: 16,
            preview_height: 9,
            jpeg_quality: 50,
        };
        let preview = render_preview(&test_frame(1), &test_detection(1, 2), &config).unwrap();
        let decoded = image::load_from_memory(&preview).unwrap();
        assert_eq!(decoded.width(), 16);
        assert_eq!(decoded.height(), 9);
    }

    #[test]
    fn test_render_preview_rejects_bad_frame() {
        let mut frame = test_frame(1);
        frame.jpeg = Bytes::from_static(b"not a jpeg");
        let err = render_preview(&frame, &test_detection(1, 0), &RenderConfig::default());
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_submit_publishes_result() {
        let store = Arc::new(ResultStore::new());
        let pipeline = PublishPipeline::start(store.clone(), RenderConfig::default(), 2);

        pipeline
            .submit(PublishJob {
                frame: test_frame(7),
                detection: test_detection(7, 3),
                report: test_report(),
            })
            .await;

        // wait for a worker to pick it up
        for _ in 0..50 {
            if store.get(7).await.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let result = store.get(7).await.expect("result should be published");
        assert_eq!(result.vehicle_total_count, 3);
        assert!(result.preview_jpeg.is_some());
        assert_eq!(result.results[&Direction::Up].status, TrafficStatus::Moderate);

        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_render_keeps_previous_result() {
        let store = Arc::new(ResultStore::new());
        let pipeline = PublishPipeline::start(store.clone(), RenderConfig::default(), 1);

        pipeline
            .submit(PublishJob {
                frame: test_frame(1),
                detection: test_detection(1, 5),
                report: test_report(),
            })
            .await;
        for _ in 0..50 {
            if store.get(1).await.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(store.get(1).await.is_some());

        // a corrupt frame fails to render; the old result must survive
        let mut bad = test_frame(1);
        bad.jpeg = Bytes::from_static(b"garbage");
        pipeline
            .submit(PublishJob {
                frame: bad,
                detection: test_detection(1, 9),
                report: test_report(),
            })
            .await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let result = store.get(1).await.unwrap();
        assert_eq!(result.vehicle_total_count, 5);

        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn test_pending_job_replaced_per_channel() {
        let store = Arc::new(ResultStore::new());
        // no workers: jobs stay queued so the slot behavior is observable
        let pipeline = PublishPipeline::start(store.clone(), RenderConfig::default(), 0);

        pipeline
            .submit(PublishJob {
                frame: test_frame(1),
                detection: test_detection(1, 1),
                report: test_report(),
            })
            .await;
        pipeline
            .submit(PublishJob {
                frame: test_frame(1),
                detection: test_detection(1, 2),
                report: test_report(),
            })
            .await;
        pipeline
            .submit(PublishJob {
                frame: test_frame(2),
                detection: test_detection(2, 1),
                report: test_report(),
            })
            .await;

        assert_eq!(pipeline.backlog().await, 2);
        pipeline.shutdown().await;
    }
}
