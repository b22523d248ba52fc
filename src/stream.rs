//! Stream publisher.
//!
//! Every processed frame becomes one JPEG part of a `multipart/x-mixed-replace` stream.
//! Frames that raised an alert are annotated with the candidate's bounding box and its
//! distance before encoding.

use anyhow::Result;
use image::{Rgb, RgbImage};

use crate::frame::{encode_rgb_jpeg, Frame};
use crate::locate::Candidate;

pub const BOUNDARY: &str = "frame";
pub const PART_CONTENT_TYPE: &str = "image/jpeg";
/// Content type of the whole response carrying the stream.
pub const STREAM_CONTENT_TYPE: &str = "multipart/x-mixed-replace;boundary=frame";

const ANNOTATION_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const BOX_THICKNESS: u32 = 2;
const LABEL_SCALE: u32 = 2;

/// One part of the multipart stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamChunk {
    pub content_type: &'static str,
    pub boundary: &'static str,
    pub payload: Vec<u8>,
    /// True when the frame raised an alert and carries an annotation.
    pub annotated: bool,
}

impl StreamChunk {
    pub fn jpeg(payload: Vec<u8>, annotated: bool) -> Self {
        Self {
            content_type: PART_CONTENT_TYPE,
            boundary: BOUNDARY,
            payload,
            annotated,
        }
    }

    /// Bytes to relay verbatim as part of the response body.
    pub fn to_multipart_bytes(&self) -> Vec<u8> {
        let header = format!(
            "--{}\r\nContent-Type: {}\r\n\r\n",
            self.boundary, self.content_type
        );
        let mut out = Vec::with_capacity(header.len() + self.payload.len() + 4);
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(&self.payload);
        out.extend_from_slice(b"\r\n\r\n");
        out
    }
}

#[derive(Clone, Copy, Debug)]
pub struct StreamPublisher {
    jpeg_quality: u8,
}

impl StreamPublisher {
    pub fn new(jpeg_quality: u8) -> Self {
        Self { jpeg_quality }
    }

    /// Encode a frame, annotating it when an alert candidate is given.
    pub fn render(&self, frame: &Frame, alert: Option<&Candidate>) -> Result<StreamChunk> {
        match alert {
            None => Ok(StreamChunk::jpeg(frame.encode_jpeg(self.jpeg_quality)?, false)),
            Some(candidate) => {
                let annotated = annotate(frame, candidate);
                Ok(StreamChunk::jpeg(
                    encode_rgb_jpeg(&annotated, self.jpeg_quality)?,
                    true,
                ))
            }
        }
    }
}

/// Copy of the frame with the candidate's box and a "<d.dd>m" label drawn on it.
pub fn annotate(frame: &Frame, candidate: &Candidate) -> RgbImage {
    let mut image = frame.to_rgb_image();
    let r = candidate.region;
    draw_box(&mut image, r.x, r.y, r.width, r.height);
    let label = format!("{:.2}m", candidate.distance_m);
    let label_height = GLYPH_ROWS * LABEL_SCALE;
    let label_y = r.y.saturating_sub(label_height + 4);
    draw_label(&mut image, r.x, label_y, &label);
    image
}

fn put(image: &mut RgbImage, x: u32, y: u32) {
    if x < image.width() && y < image.height() {
        image.put_pixel(x, y, ANNOTATION_COLOR);
    }
}

fn draw_box(image: &mut RgbImage, x: u32, y: u32, w: u32, h: u32) {
    if w == 0 || h == 0 {
        return;
    }
    let (x1, y1) = (x + w - 1, y + h - 1);
    for t in 0..BOX_THICKNESS {
        for xx in x..=x1 {
            put(image, xx, y + t);
            put(image, xx, y1.saturating_sub(t));
        }
        for yy in y..=y1 {
            put(image, x + t, yy);
            put(image, x1.saturating_sub(t), yy);
        }
    }
}

const GLYPH_COLS: u32 = 3;
const GLYPH_ROWS: u32 = 5;

/// 3x5 bitmap glyphs, one row per byte, most significant of the low three bits on the left.
fn glyph(c: char) -> Option<[u8; 5]> {
    Some(match c {
        '0' => [0b111, 0b101, 0b101, 0b101, 0b111],
        '1' => [0b010, 0b110, 0b010, 0b010, 0b111],
        '2' => [0b111, 0b001, 0b111, 0b100, 0b111],
        '3' => [0b111, 0b001, 0b111, 0b001, 0b111],
        '4' => [0b101, 0b101, 0b111, 0b001, 0b001],
        '5' => [0b111, 0b100, 0b111, 0b001, 0b111],
        '6' => [0b111, 0b100, 0b111, 0b101, 0b111],
        '7' => [0b111, 0b001, 0b001, 0b001, 0b001],
        '8' => [0b111, 0b101, 0b111, 0b101, 0b111],
        '9' => [0b111, 0b101, 0b111, 0b001, 0b111],
        '.' => [0b000, 0b000, 0b000, 0b000, 0b010],
        'm' => [0b000, 0b000, 0b111, 0b111, 0b101],
        _ => return None,
    })
}

fn draw_label(image: &mut RgbImage, x: u32, y: u32, text: &str) {
    let advance = (GLYPH_COLS + 1) * LABEL_SCALE;
    for (i, c) in text.chars().enumerate() {
        let Some(rows) = glyph(c) else {
            continue;
        };
        let gx = x + i as u32 * advance;
        for (row, bits) in rows.iter().enumerate() {
            for col in 0..GLYPH_COLS {
                if bits & (0b100 >> col) == 0 {
                    continue;
                }
                for dy in 0..LABEL_SCALE {
                    for dx in 0..LABEL_SCALE {
                        put(
                            image,
                            gx + col * LABEL_SCALE + dx,
                            y + row as u32 * LABEL_SCALE + dy,
                        );
                    }
                }
            }
        }
    }
}
