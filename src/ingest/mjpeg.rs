//! HTTP MJPEG frame source.
//!
//! This module provides `MjpegSource` for IP cameras and phone webcam apps that serve either
//! a `multipart/x-mixed-replace` MJPEG stream or a single JPEG snapshot per request.
//!
//! The source is responsible for:
//! - Connecting to the stream with bounded connect/read timeouts
//! - Splitting the byte stream on JPEG SOI/EOI markers
//! - Decoding JPEG frames in-memory and stamping their capture time
//!
//! A clean end of the HTTP body is end-of-stream. Decimation is left to the pacer.

use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::time::{Duration, Instant, SystemTime};

use super::{redact_url, FrameSource, SourceStats};
use crate::frame::Frame;

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct MjpegConfig {
    /// Stream or snapshot URL (http/https).
    pub url: String,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl Default for MjpegConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8080/video".to_string(),
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(10),
        }
    }
}

pub struct MjpegSource {
    config: MjpegConfig,
    agent: ureq::Agent,
    stream: Option<HttpStream>,
    last_frame_at: Option<Instant>,
    connected_at: Option<Instant>,
    frame_count: u64,
    ended: bool,
}

enum HttpStream {
    Mjpeg(MjpegStream),
    Snapshot,
}

impl MjpegSource {
    pub fn new(config: MjpegConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(config.connect_timeout)
            .timeout_read(config.read_timeout)
            .build();
        Self {
            config,
            agent,
            stream: None,
            last_frame_at: None,
            connected_at: None,
            frame_count: 0,
            ended: false,
        }
    }

    fn fetch_snapshot(&self) -> Result<Vec<u8>> {
        let response = self
            .agent
            .get(&self.config.url)
            .call()
            .with_context(|| format!("fetch jpeg snapshot from {}", redact_url(&self.config.url)))?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_JPEG_BYTES as u64)
            .read_to_end(&mut bytes)
            .context("read jpeg snapshot")?;
        if bytes.is_empty() {
            return Err(anyhow!("empty jpeg snapshot"));
        }
        Ok(bytes)
    }
}

impl FrameSource for MjpegSource {
    fn connect(&mut self) -> Result<()> {
        let response = self
            .agent
            .get(&self.config.url)
            .call()
            .with_context(|| format!("connect to mjpeg stream {}", redact_url(&self.config.url)))?;
        let content_type = response.header("Content-Type").unwrap_or("");
        if content_type.to_lowercase().contains("multipart") {
            self.stream = Some(HttpStream::Mjpeg(MjpegStream::new(response.into_reader())));
        } else {
            self.stream = Some(HttpStream::Snapshot);
        }
        self.connected_at = Some(Instant::now());
        self.ended = false;
        log::info!("MjpegSource: connected to {}", redact_url(&self.config.url));
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.ended {
            return Ok(None);
        }
        let jpeg_bytes = match self.stream.as_mut() {
            None => return Err(anyhow!("mjpeg source not connected; call connect() first")),
            Some(HttpStream::Mjpeg(stream)) => match stream.read_next_jpeg()? {
                Some(bytes) => bytes,
                None => {
                    self.ended = true;
                    log::info!("MjpegSource: stream {} ended", redact_url(&self.config.url));
                    return Ok(None);
                }
            },
            Some(HttpStream::Snapshot) => self.fetch_snapshot()?,
        };

        let frame = Frame::decode_jpeg(&jpeg_bytes, SystemTime::now())?;
        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        Ok(Some(frame))
    }

    fn is_healthy(&self) -> bool {
        if self.ended {
            return false;
        }
        let Some(connected_at) = self.connected_at else {
            return false;
        };
        let Some(last_frame_at) = self.last_frame_at else {
            return connected_at.elapsed() <= Duration::from_secs(5);
        };
        last_frame_at.elapsed() <= self.config.read_timeout
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: redact_url(&self.config.url),
        }
    }
}

struct MjpegStream {
    reader: Box<dyn Read + Send + Sync>,
    buffer: Vec<u8>,
}

impl MjpegStream {
    fn new(reader: Box<dyn Read + Send + Sync>) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    /// Next complete JPEG, or `None` once the body ends.
    fn read_next_jpeg(&mut self) -> Result<Option<Vec<u8>>> {
        let mut chunk = vec![0u8; 8192];
        loop {
            if let Some((start, end)) = find_jpeg_bounds(&self.buffer) {
                let frame = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                return Ok(Some(frame));
            }

            let read = self.reader.read(&mut chunk).context("read mjpeg chunk")?;
            if read == 0 {
                return Ok(None);
            }
            self.buffer.extend_from_slice(&chunk[..read]);

            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                let keep = 2.min(self.buffer.len());
                let drain_len = self.buffer.len() - keep;
                self.buffer.drain(..drain_len);
            }
        }
    }
}

pub(crate) fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer.windows(2).position(|w| w == [0xFF, 0xD8])?;
    let end = buffer[start + 2..]
        .windows(2)
        .position(|w| w == [0xFF, 0xD9])?;
    Some((start, start + 2 + end + 2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn finds_jpeg_inside_multipart_noise() {
        let buffer = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n\xFF\xD8abc\xFF\xD9\r\n";
        let (start, end) = find_jpeg_bounds(buffer).unwrap();
        assert_eq!(&buffer[start..end], b"\xFF\xD8abc\xFF\xD9");
    }

    #[test]
    fn incomplete_jpeg_is_not_returned() {
        assert_eq!(find_jpeg_bounds(b"\xFF\xD8abc"), None);
        assert_eq!(find_jpeg_bounds(b"no markers"), None);
    }

    #[test]
    fn stream_yields_each_jpeg_then_ends() -> Result<()> {
        let body = b"--frame\r\n\r\n\xFF\xD8one\xFF\xD9\r\n--frame\r\n\r\n\xFF\xD8two\xFF\xD9\r\n".to_vec();
        let mut stream = MjpegStream::new(Box::new(Cursor::new(body)));
        assert_eq!(stream.read_next_jpeg()?.as_deref(), Some(&b"\xFF\xD8one\xFF\xD9"[..]));
        assert_eq!(stream.read_next_jpeg()?.as_deref(), Some(&b"\xFF\xD8two\xFF\xD9"[..]));
        assert_eq!(stream.read_next_jpeg()?, None);
        Ok(())
    }

    #[test]
    fn next_frame_requires_connect() {
        let mut source = MjpegSource::new(MjpegConfig::default());
        assert!(source.next_frame().is_err());
        assert!(!source.is_healthy());
    }
}
