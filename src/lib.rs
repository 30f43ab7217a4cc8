//! Roadpulse Library
//!
//! Multi-channel traffic CCTV occupancy analysis server
//!
//! ## Architecture (8 Components)
//!
//! 1. ChannelRegistry - Control-plane channel id -> stream URL state
//! 2. CaptureManager - Per-channel stream readers, freshest-frame reads
//! 3. InferenceClient - Batched segmentation service adapter
//! 4. OccupancyAnalyzer - Masks to per-direction occupancy and status
//! 5. RoiStore - Preloaded region-of-interest bitmaps
//! 6. BatchOrchestrator - The capture/infer/analyze/publish cycle loop
//! 7. PublishPipeline - Bounded render/publish worker pool
//! 8. WebAPI - Query, control and MJPEG streaming endpoints
//!
//! ## Design Principles
//!
//! - Freshest frame wins: no channel ever serves a backlog
//! - One inference call per cycle covers every live channel
//! - Published results are replaced whole, never patched

pub mod batch_orchestrator;
pub mod capture_manager;
pub mod channel_registry;
pub mod error;
pub mod inference_client;
pub mod models;
pub mod occupancy_analyzer;
pub mod publish_pipeline;
pub mod result_store;
pub mod roi_store;
pub mod state;
pub mod web_api;

pub use error::{Error, Result};
pub use state::AppState;
