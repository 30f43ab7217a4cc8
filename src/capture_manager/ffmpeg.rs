//! ffmpeg-backed `FrameStream`
//!
//! Spawns one long-lived ffmpeg process per channel, transcoding the
//! source stream to MJPEG on stdout. Frames are split on JPEG SOI/EOI
//! markers, so pending frames can be discarded without decoding them.
//!
//! `kill_on_drop` ties the process lifetime to the stream handle: when
//! the CaptureManager releases a channel (decode failure, deregistration,
//! shutdown) the child is killed and no zombie processes accumulate.

use super::{FrameStream, StreamOpener};
use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};

/// JPEG start-of-image marker prefix
const SOI: [u8; 3] = [0xFF, 0xD8, 0xFF];
/// JPEG end-of-image marker
const EOI: [u8; 2] = [0xFF, 0xD9];

const READ_CHUNK: usize = 16 * 1024;
/// Upper bound on buffered bytes while hunting for a frame boundary
const MAX_BUFFER: usize = 8 * 1024 * 1024;

/// Opens streams by spawning ffmpeg
pub struct FfmpegOpener {
    /// Output JPEG quality scale (ffmpeg `-q:v`, 2 best .. 31 worst)
    quality: u32,
}

impl FfmpegOpener {
    pub fn new(quality: u32) -> Self {
        Self { quality }
    }

    /// Check that the ffmpeg binary is available
    pub async fn check_ffmpeg() -> Result<String> {
        let output = Command::new("ffmpeg")
            .arg("-version")
            .output()
            .await
            .map_err(|e| Error::Capture(format!("ffmpeg not found: {}", e)))?;

        if !output.status.success() {
            return Err(Error::Capture("ffmpeg version check failed".to_string()));
        }

        let version = String::from_utf8_lossy(&output.stdout);
        let first_line = version.lines().next().unwrap_or("unknown");
        Ok(first_line.to_string())
    }
}

impl Default for FfmpegOpener {
    fn default() -> Self {
        Self::new(7)
    }
}

#[async_trait]
impl StreamOpener for FfmpegOpener {
    async fn open(&self, url: &str) -> Result<Box<dyn FrameStream>> {
        let mut cmd = Command::new("ffmpeg");

        // TCP transport is more reliable for RTSP sources
        if url.starts_with("rtsp://") {
            cmd.args(["-rtsp_transport", "tcp"]);
        }

        let mut child = cmd
            .args([
                "-nostdin",
                "-i", url,
                "-f", "image2pipe",
                "-vcodec", "mjpeg",
                "-q:v", &self.quality.to_string(),
                "-loglevel", "error",
                "-",
            ])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Capture(format!("ffmpeg spawn failed: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Capture("ffmpeg stdout missing".to_string()))?;

        Ok(Box::new(FfmpegStream {
            _child: child,
            stdout,
            buf: Vec::with_capacity(READ_CHUNK),
        }))
    }
}

/// MJPEG frame reader over an ffmpeg child's stdout
struct FfmpegStream {
    /// Held for kill_on_drop
    _child: Child,
    stdout: ChildStdout,
    buf: Vec<u8>,
}

impl FfmpegStream {
    /// Pull the next complete JPEG out of the buffer, refilling from the
    /// pipe as needed. `None` means the process closed its stdout.
    async fn next_frame(&mut self) -> Result<Option<Bytes>> {
        loop {
            if let Some((start, end)) = find_jpeg(&self.buf) {
                let frame = Bytes::copy_from_slice(&self.buf[start..end]);
                self.buf.drain(..end);
                return Ok(Some(frame));
            }

            if self.buf.len() > MAX_BUFFER {
                return Err(Error::Capture(
                    "no frame boundary within buffer limit".to_string(),
                ));
            }

            let mut chunk = [0u8; READ_CHUNK];
            let n = self.stdout.read(&mut chunk).await?;
            if n == 0 {
                return Ok(None);
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}

#[async_trait]
impl FrameStream for FfmpegStream {
    async fn skip(&mut self) -> Result<bool> {
        Ok(self.next_frame().await?.is_some())
    }

    async fn next_jpeg(&mut self) -> Result<Option<Bytes>> {
        self.next_frame().await
    }
}

/// Locate one complete JPEG in `buf`, returning its byte range
fn find_jpeg(buf: &[u8]) -> Option<(usize, usize)> {
    let start = buf.windows(SOI.len()).position(|w| w == SOI)?;
    let end = buf[start + 2..]
        .windows(EOI.len())
        .position(|w| w == EOI)?;
    Some((start, start + 2 + end + EOI.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_jpeg(payload: &[u8]) -> Vec<u8> {
        let mut v = vec![0xFF, 0xD8, 0xFF, 0xE0];
        v.extend_from_slice(payload);
        v.extend_from_slice(&EOI);
        v
    }

    #[test]
    fn test_find_jpeg_extracts_first_frame() {
        let a = fake_jpeg(b"first");
        let b = fake_jpeg(b"second");
        let mut buf = b"garbage".to_vec();
        buf.extend_from_slice(&a);
        buf.extend_from_slice(&b);

        let (start, end) = find_jpeg(&buf).unwrap();
        assert_eq!(&buf[start..end], a.as_slice());

        // draining the first frame exposes the second
        let rest = &buf[end..];
        let (s2, e2) = find_jpeg(rest).unwrap();
        assert_eq!(&rest[s2..e2], b.as_slice());
    }

    #[test]
    fn test_find_jpeg_incomplete_frame() {
        let mut buf = fake_jpeg(b"frame");
        buf.truncate(buf.len() - 1); // lop off half the EOI marker
        assert!(find_jpeg(&buf).is_none());
        assert!(find_jpeg(b"").is_none());
        assert!(find_jpeg(b"\xFF\xD9").is_none()); // EOI without SOI
    }
}
