//! CaptureManager - Per-Channel Stream Readers
//!
//! ## Responsibilities
//!
//! - Own one stream-reader resource per registered channel
//! - Serve the freshest decodable frame on demand
//! - Recover from stream failures by lazy reopen, never blocking a cycle
//!
//! `fetch_latest` discards a fixed number of pending frames without
//! decoding them (the transport skips whole JPEGs by marker scan), then
//! decodes exactly one. Any open/read/decode failure releases the
//! channel's resource and yields "no frame" for this cycle; the stream is
//! reopened lazily on the next request.

mod ffmpeg;

pub use ffmpeg::FfmpegOpener;

use crate::error::Result;
use crate::models::Frame;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// An open, ordered source of JPEG frames for one stream address.
///
/// Dropping the stream releases the underlying OS resource.
#[async_trait]
pub trait FrameStream: Send {
    /// Discard one pending frame without decoding it.
    ///
    /// Returns `false` when the stream has nothing more to yield.
    async fn skip(&mut self) -> Result<bool>;

    /// Read the next frame's raw JPEG bytes.
    ///
    /// Returns `None` when the stream has ended.
    async fn next_jpeg(&mut self) -> Result<Option<Bytes>>;
}

/// Opens a `FrameStream` for a stream address. The production opener
/// spawns an ffmpeg transcode process; tests substitute scripted streams.
#[async_trait]
pub trait StreamOpener: Send + Sync {
    async fn open(&self, url: &str) -> Result<Box<dyn FrameStream>>;
}

struct OpenChannel {
    url: String,
    stream: Box<dyn FrameStream>,
}

/// Owns the per-channel stream readers.
///
/// Only the orchestrator calls `fetch_latest`, one channel at a time, so
/// a single lock over the handle map is sufficient.
pub struct CaptureManager {
    opener: Arc<dyn StreamOpener>,
    streams: Mutex<HashMap<u32, OpenChannel>>,
    /// Pending frames discarded before each decode
    frame_skip: usize,
    /// Budget for one skip+decode sequence before the channel is
    /// considered stalled
    frame_timeout: Duration,
}

impl CaptureManager {
    pub fn new(opener: Arc<dyn StreamOpener>, frame_skip: usize, frame_timeout: Duration) -> Self {
        Self {
            opener,
            streams: Mutex::new(HashMap::new()),
            frame_skip,
            frame_timeout,
        }
    }

    /// Fetch the most recent decodable frame for a channel.
    ///
    /// Lazily opens (or reopens, when the URL changed) the channel's
    /// stream. Returns `None` for anything that goes wrong this cycle;
    /// the failed resource is released and retried next cycle.
    pub async fn fetch_latest(&self, channel_id: u32, url: &str, cycle: u64) -> Option<Frame> {
        let mut streams = self.streams.lock().await;

        // Reopen when the control plane changed the source address
        if let Some(open) = streams.get(&channel_id) {
            if open.url != url {
                tracing::info!(channel_id = channel_id, "Source address changed, reopening");
                streams.remove(&channel_id);
            }
        }

        if !streams.contains_key(&channel_id) {
            match self.opener.open(url).await {
                Ok(stream) => {
                    tracing::info!(channel_id = channel_id, "Stream opened");
                    streams.insert(
                        channel_id,
                        OpenChannel {
                            url: url.to_string(),
                            stream,
                        },
                    );
                }
                Err(e) => {
                    tracing::warn!(channel_id = channel_id, error = %e, "Stream open failed");
                    return None;
                }
            }
        }

        let open = streams.get_mut(&channel_id)?;
        let read = tokio::time::timeout(
            self.frame_timeout,
            Self::read_fresh(&mut open.stream, self.frame_skip),
        )
        .await;

        match read {
            Ok(Ok(Some(jpeg))) => match image::load_from_memory(&jpeg) {
                Ok(decoded) => Some(Frame {
                    channel_id,
                    cycle,
                    width: decoded.width(),
                    height: decoded.height(),
                    jpeg,
                }),
                Err(e) => {
                    tracing::warn!(channel_id = channel_id, error = %e, "Frame decode failed, releasing stream");
                    streams.remove(&channel_id);
                    None
                }
            },
            Ok(Ok(None)) => {
                tracing::warn!(channel_id = channel_id, "Stream yielded no frame, releasing");
                streams.remove(&channel_id);
                None
            }
            Ok(Err(e)) => {
                tracing::warn!(channel_id = channel_id, error = %e, "Stream read failed, releasing");
                streams.remove(&channel_id);
                None
            }
            Err(_) => {
                tracing::warn!(
                    channel_id = channel_id,
                    timeout_ms = self.frame_timeout.as_millis() as u64,
                    "Frame fetch timed out, releasing stream"
                );
                streams.remove(&channel_id);
                None
            }
        }
    }

    /// Skip pending frames, then read one
    async fn read_fresh(
        stream: &mut Box<dyn FrameStream>,
        frame_skip: usize,
    ) -> Result<Option<Bytes>> {
        for _ in 0..frame_skip {
            if !stream.skip().await? {
                return Ok(None);
            }
        }
        stream.next_jpeg().await
    }

    /// Release one channel's stream resource
    pub async fn release(&self, channel_id: u32) {
        let mut streams = self.streams.lock().await;
        if streams.remove(&channel_id).is_some() {
            tracing::info!(channel_id = channel_id, "Stream released");
        }
    }

    /// Release every open stream (shutdown)
    pub async fn release_all(&self) {
        let mut streams = self.streams.lock().await;
        let count = streams.len();
        streams.clear();
        if count > 0 {
            tracing::info!(count = count, "All streams released");
        }
    }

    /// Channel ids with an open stream resource
    pub async fn open_channels(&self) -> Vec<u32> {
        let streams = self.streams.lock().await;
        let mut ids: Vec<u32> = streams.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}
