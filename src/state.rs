//! Application state
//!
//! Holds the configuration and the shared pipeline components

use crate::batch_orchestrator::BatchOrchestrator;
use crate::capture_manager::CaptureManager;
use crate::channel_registry::{ChannelRegistry, MissingChannelPolicy};
use crate::inference_client::{InferenceParams, VehicleDetector};
use crate::occupancy_analyzer::ThresholdProfile;
use crate::publish_pipeline::{PublishPipeline, RenderConfig};
use crate::result_store::ResultStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Segmentation service base URL
    pub inference_url: String,
    /// ROI bitmap directory
    pub mask_dir: PathBuf,
    /// Pending frames discarded before each decode
    pub frame_skip: usize,
    /// Per-channel capture budget per cycle (ms)
    pub frame_timeout_ms: u64,
    /// Publish worker pool size
    pub worker_count: usize,
    /// Preview image dimensions
    pub preview_width: u32,
    pub preview_height: u32,
    /// Preview JPEG quality (1-100)
    pub jpeg_quality: u8,
    /// Inference tuning
    pub confidence: f32,
    pub iou: f32,
    pub input_size: u32,
    /// Idle pause when no channel is registered (ms)
    pub empty_backoff_ms: u64,
    /// Delay between pushed MJPEG preview frames (ms)
    pub stream_interval_ms: u64,
    /// Congestion threshold profile name
    pub threshold_profile: String,
    /// What to do with channels absent from an update request
    pub missing_channel_policy: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_or("PORT", 8600),
            inference_url: std::env::var("INFERENCE_URL")
                .unwrap_or_else(|_| "http://localhost:9400".to_string()),
            mask_dir: std::env::var("MASK_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./masks")),
            frame_skip: env_or("FRAME_SKIP", 10),
            frame_timeout_ms: env_or("FRAME_TIMEOUT_MS", 3000),
            worker_count: env_or("WORKER_COUNT", 4),
            preview_width: env_or("PREVIEW_WIDTH", 480),
            preview_height: env_or("PREVIEW_HEIGHT", 270),
            jpeg_quality: env_or("JPEG_QUALITY", 45),
            confidence: env_or("CONFIDENCE", 0.25),
            iou: env_or("IOU", 0.6),
            input_size: env_or("INPUT_SIZE", 320),
            empty_backoff_ms: env_or("EMPTY_BACKOFF_MS", 1000),
            stream_interval_ms: env_or("STREAM_INTERVAL_MS", 100),
            threshold_profile: std::env::var("THRESHOLD_PROFILE")
                .unwrap_or_else(|_| "standard".to_string()),
            missing_channel_policy: std::env::var("MISSING_CHANNEL_POLICY")
                .unwrap_or_else(|_| "retain".to_string()),
        }
    }
}

impl AppConfig {
    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }

    pub fn empty_backoff(&self) -> Duration {
        Duration::from_millis(self.empty_backoff_ms)
    }

    pub fn stream_interval(&self) -> Duration {
        Duration::from_millis(self.stream_interval_ms)
    }

    pub fn render(&self) -> RenderConfig {
        RenderConfig {
            preview_width: self.preview_width,
            preview_height: self.preview_height,
            jpeg_quality: self.jpeg_quality,
        }
    }

    pub fn inference_params(&self) -> InferenceParams {
        InferenceParams {
            confidence: self.confidence,
            iou: self.iou,
            input_size: self.input_size,
        }
    }

    /// Named profile, falling back to the standard one with a warning
    pub fn profile(&self) -> ThresholdProfile {
        ThresholdProfile::by_name(&self.threshold_profile).unwrap_or_else(|| {
            tracing::warn!(
                profile = %self.threshold_profile,
                "Unknown threshold profile, using standard"
            );
            ThresholdProfile::STANDARD
        })
    }

    pub fn policy(&self) -> MissingChannelPolicy {
        MissingChannelPolicy::parse(&self.missing_channel_policy).unwrap_or_else(|| {
            tracing::warn!(
                policy = %self.missing_channel_policy,
                "Unknown missing-channel policy, using retain"
            );
            MissingChannelPolicy::Retain
        })
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application config
    pub config: AppConfig,
    /// Channel id -> stream URL registry
    pub registry: Arc<ChannelRegistry>,
    /// Per-channel stream readers
    pub capture: Arc<CaptureManager>,
    /// Segmentation service adapter
    pub detector: Arc<dyn VehicleDetector>,
    /// Latest published results
    pub store: Arc<ResultStore>,
    /// Render/publish worker pool
    pub publisher: Arc<PublishPipeline>,
    /// The analysis cycle loop
    pub orchestrator: Arc<BatchOrchestrator>,
}
