//! InferenceClient - Segmentation Service Adapter
//!
//! ## Responsibilities
//!
//! - Submit one batched inference request per cycle (all channels, one call)
//! - Decode per-frame region masks from the response
//! - Connection management and health checks
//!
//! The model itself is an opaque collaborator behind `VehicleDetector`;
//! batch slots are bound to channel ids at submission time and the
//! response must come back in the same order. A failure is a single error
//! for the whole batch.

use crate::error::{Error, Result};
use crate::models::{DetectionOutput, Frame, RegionMask};
use async_trait::async_trait;
use base64::Engine;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::time::Duration;

/// Inference tuning parameters sent with every batch
#[derive(Debug, Clone, Copy)]
pub struct InferenceParams {
    /// Confidence threshold
    pub confidence: f32,
    /// IoU threshold for non-maximum suppression
    pub iou: f32,
    /// Square input resolution frames are resized to server-side
    pub input_size: u32,
}

impl Default for InferenceParams {
    fn default() -> Self {
        Self {
            confidence: 0.25,
            iou: 0.6,
            input_size: 320,
        }
    }
}

/// The opaque inference capability the orchestrator depends on
#[async_trait]
pub trait VehicleDetector: Send + Sync {
    /// Run segmentation over a batch of frames.
    ///
    /// Returns one `DetectionOutput` per input frame, in input order.
    async fn infer_batch(
        &self,
        frames: &[Frame],
        params: &InferenceParams,
    ) -> Result<Vec<DetectionOutput>>;

    /// Whether the collaborator is reachable
    async fn health_check(&self) -> bool;
}

/// One frame's result on the wire
#[derive(Debug, Deserialize)]
struct FrameResult {
    channel_id: u32,
    vehicle_count: u32,
    mask_width: u32,
    mask_height: u32,
    /// Base64-encoded grayscale PNGs, one per detected region
    #[serde(default)]
    masks: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SegmentResponse {
    results: Vec<FrameResult>,
}

/// HTTP adapter for the segmentation service
pub struct InferenceClient {
    client: reqwest::Client,
    base_url: String,
}

impl InferenceClient {
    pub fn new(base_url: String) -> Self {
        Self::with_timeout(base_url, Duration::from_secs(30))
    }

    pub fn with_timeout(base_url: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Decode one base64 PNG region mask
    fn decode_mask(encoded: &str, width: u32, height: u32) -> Result<RegionMask> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| Error::Inference(format!("mask base64 decode failed: {}", e)))?;
        let img = image::load_from_memory(&bytes)
            .map_err(|e| Error::Inference(format!("mask image decode failed: {}", e)))?
            .to_luma8();

        let mask = RegionMask::from_luma(&img);
        if mask.width() != width || mask.height() != height {
            return Err(Error::Inference(format!(
                "mask resolution {}x{} does not match declared {}x{}",
                mask.width(),
                mask.height(),
                width,
                height
            )));
        }
        Ok(mask)
    }
}

#[async_trait]
impl VehicleDetector for InferenceClient {
    async fn infer_batch(
        &self,
        frames: &[Frame],
        params: &InferenceParams,
    ) -> Result<Vec<DetectionOutput>> {
        let url = format!("{}/v1/segment", self.base_url);

        // Slot order binds results back to their channels
        let channels: Vec<String> = frames.iter().map(|f| f.channel_id.to_string()).collect();

        let mut form = Form::new()
            .text("channels", channels.join(","))
            .text("confidence", params.confidence.to_string())
            .text("iou", params.iou.to_string())
            .text("input_size", params.input_size.to_string());

        for frame in frames {
            form = form.part(
                format!("frame_{}", frame.channel_id),
                Part::bytes(frame.jpeg.to_vec())
                    .file_name(format!("{}.jpg", frame.channel_id))
                    .mime_str("image/jpeg")?,
            );
        }

        let resp = self.client.post(&url).multipart(form).send().await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Inference(format!(
                "segmentation failed: {} - {}",
                status, body
            )));
        }

        let parsed: SegmentResponse = resp.json().await?;
        if parsed.results.len() != frames.len() {
            return Err(Error::Inference(format!(
                "expected {} results, got {}",
                frames.len(),
                parsed.results.len()
            )));
        }

        let mut outputs = Vec::with_capacity(parsed.results.len());
        for (frame, result) in frames.iter().zip(parsed.results) {
            if result.channel_id != frame.channel_id {
                return Err(Error::Inference(format!(
                    "result for channel {} in slot for channel {}",
                    result.channel_id, frame.channel_id
                )));
            }

            let masks = result
                .masks
                .iter()
                .map(|m| Self::decode_mask(m, result.mask_width, result.mask_height))
                .collect::<Result<Vec<_>>>()?;

            outputs.push(DetectionOutput {
                channel_id: result.channel_id,
                vehicle_count: result.vehicle_count,
                masks,
            });
        }

        Ok(outputs)
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/healthz", self.base_url);
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_default() {
        let params = InferenceParams::default();
        assert_eq!(params.confidence, 0.25);
        assert_eq!(params.iou, 0.6);
        assert_eq!(params.input_size, 320);
    }

    #[test]
    fn test_decode_mask_roundtrip() {
        let img = image::GrayImage::from_fn(6, 4, |x, _| image::Luma([if x < 3 { 255 } else { 0 }]));
        let mut png = Vec::new();
        image::DynamicImage::ImageLuma8(img)
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();
        let encoded = base64::engine::general_purpose::STANDARD.encode(&png);

        let mask = InferenceClient::decode_mask(&encoded, 6, 4).unwrap();
        assert_eq!(mask.area(), 12);
        assert!(mask.get(0, 0));
        assert!(!mask.get(5, 3));

        // declared resolution must match the decoded image
        assert!(InferenceClient::decode_mask(&encoded, 8, 8).is_err());
        assert!(InferenceClient::decode_mask("!!!", 6, 4).is_err());
    }

    #[test]
    fn test_segment_response_parsing() {
        let json = r#"{
            "results": [
                {"channel_id": 7, "vehicle_count": 3, "mask_width": 320, "mask_height": 320, "masks": []},
                {"channel_id": 2, "vehicle_count": 0, "mask_width": 320, "mask_height": 320}
            ]
        }"#;
        let parsed: SegmentResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.results.len(), 2);
        assert_eq!(parsed.results[0].channel_id, 7);
        assert!(parsed.results[1].masks.is_empty());
    }
}
