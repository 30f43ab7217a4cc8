//! Shared models and types for roadpulse
//!
//! This module contains types shared across multiple modules
//! to avoid circular dependencies.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Traffic direction within a channel's frame.
///
/// Matches the ROI bitmap naming scheme (`{channel}_{direction}.png`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Low,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::Up, Direction::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Low => "low",
        }
    }

    /// Parse from the ROI asset naming scheme
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "up" => Some(Direction::Up),
            "low" => Some(Direction::Low),
            _ => None,
        }
    }
}

/// Congestion status derived from occupancy rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrafficStatus {
    Free,
    Moderate,
    Heavy,
}

/// Per-direction occupancy figures
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DirectionReport {
    /// ROI coverage, percent, clamped to [0, 100]
    pub occupancy_rate: f32,
    pub status: TrafficStatus,
}

/// Per-channel occupancy report, one entry per direction with an ROI mask.
///
/// BTreeMap keeps the serialized direction order stable.
pub type OccupancyReport = BTreeMap<Direction, DirectionReport>;

/// One decoded image sample from a channel's stream.
///
/// Ephemeral: owned by the orchestrator for the duration of one cycle.
#[derive(Debug, Clone)]
pub struct Frame {
    pub channel_id: u32,
    /// Capture cycle number the frame was fetched in
    pub cycle: u64,
    /// Original JPEG bytes as read from the stream
    pub jpeg: Bytes,
    pub width: u32,
    pub height: u32,
}

/// Boolean region bitmap at a known resolution.
///
/// Used both for detection masks coming back from inference and for
/// intermediate union masks in the analyzer.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionMask {
    width: u32,
    height: u32,
    bits: Vec<bool>,
}

impl RegionMask {
    /// Create an empty (all-false) mask
    pub fn empty(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            bits: vec![false; (width * height) as usize],
        }
    }

    /// Build from a predicate over (x, y)
    pub fn from_fn(width: u32, height: u32, f: impl Fn(u32, u32) -> bool) -> Self {
        let mut bits = Vec::with_capacity((width * height) as usize);
        for y in 0..height {
            for x in 0..width {
                bits.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            bits,
        }
    }

    /// Build from a grayscale image, thresholding at > 127
    pub fn from_luma(img: &image::GrayImage) -> Self {
        Self::from_fn(img.width(), img.height(), |x, y| img.get_pixel(x, y)[0] > 127)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn get(&self, x: u32, y: u32) -> bool {
        self.bits[(y * self.width + x) as usize]
    }

    pub fn set(&mut self, x: u32, y: u32, value: bool) {
        self.bits[(y * self.width + x) as usize] = value;
    }

    /// Number of set pixels
    pub fn area(&self) -> usize {
        self.bits.iter().filter(|b| **b).count()
    }

    /// In-place union with another mask of the same resolution
    pub fn union_with(&mut self, other: &RegionMask) {
        debug_assert_eq!(self.width, other.width);
        debug_assert_eq!(self.height, other.height);
        for (a, b) in self.bits.iter_mut().zip(other.bits.iter()) {
            *a |= *b;
        }
    }

    /// Nearest-neighbour resample to a new resolution
    pub fn resample(&self, width: u32, height: u32) -> RegionMask {
        if width == self.width && height == self.height {
            return self.clone();
        }
        RegionMask::from_fn(width, height, |x, y| {
            let sx = (x as u64 * self.width as u64 / width as u64) as u32;
            let sy = (y as u64 * self.height as u64 / height as u64) as u32;
            self.get(sx.min(self.width - 1), sy.min(self.height - 1))
        })
    }
}

/// Per-frame result from the inference collaborator.
///
/// Consumed once by the occupancy analyzer, then discarded.
#[derive(Debug, Clone)]
pub struct DetectionOutput {
    pub channel_id: u32,
    /// Total detected vehicles in the frame
    pub vehicle_count: u32,
    /// Detected region masks, all at the same resolution
    pub masks: Vec<RegionMask>,
}

/// The published unit: latest analysis state for one channel.
///
/// Replaced as a whole on every publish; readers never observe a mix of
/// an old preview with new numbers.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelResult {
    pub channel_id: u32,
    pub vehicle_total_count: u32,
    pub results: OccupancyReport,
    /// Compressed preview image; excluded from the numeric API
    #[serde(skip)]
    pub preview_jpeg: Option<Bytes>,
    pub timestamp: DateTime<Utc>,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub inference_connected: bool,
    pub active_channels: usize,
    pub published_channels: usize,
}
