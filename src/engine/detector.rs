//! YuNet face detection decoding
//!
//! The detector emits one row per face in inference space:
//! - 0-3: x, y, width, height of the box
//! - 4-5: right eye
//! - 6-7: left eye
//! - 8-9: nose tip
//! - 10-11: right mouth corner
//! - 12-13: left mouth corner
//! - 14: score
//!
//! Decoding maps every coordinate back to the original image.

use image::{DynamicImage, GenericImageView};
use ndarray::{ArrayView1, ArrayView2};
use tracing::debug;

use super::preprocess::InferenceSize;
use crate::error::{PipelineError, Result};

/// Number of fields per detector row
pub const ROW_WIDTH: usize = 15;

/// Point in original-image coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

/// Box in original-image coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceBox {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl FaceBox {
    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }
}

/// Box as the detector reports it (origin plus size), in original-image
/// coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl FaceRect {
    pub fn to_box(&self) -> FaceBox {
        FaceBox {
            left: self.x,
            top: self.y,
            right: self.x + self.width,
            bottom: self.y + self.height,
        }
    }
}

/// One detected face
#[derive(Debug, Clone)]
pub struct FaceRecord {
    pub bbox: FaceBox,
    pub left_eye: Point,
    pub right_eye: Point,
    pub nose: Point,
    pub mouth_left: Point,
    pub mouth_right: Point,
    pub score: f32,
    /// Square region around the face, present when cropping was requested
    /// and the region is not empty.
    pub crop: Option<DynamicImage>,
}

/// Pixel rectangle inside an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Decode detector rows into face records, keeping row order.
pub fn decode_faces(
    rows: ArrayView2<'_, f32>,
    original: &DynamicImage,
    inference: InferenceSize,
    crop: bool,
) -> Result<Vec<FaceRecord>> {
    if rows.ncols() != ROW_WIDTH {
        return Err(PipelineError::decoding(format!(
            "detector rows must have {} columns (got {})",
            ROW_WIDTH,
            rows.ncols()
        )));
    }
    if inference.width == 0 || inference.height == 0 {
        return Err(PipelineError::decoding("inference size must be non-zero"));
    }

    let (orig_w, orig_h) = original.dimensions();
    let scale_x = orig_w as f32 / inference.width as f32;
    let scale_y = orig_h as f32 / inference.height as f32;

    let faces = rows
        .rows()
        .into_iter()
        .map(|row| {
            let (rect, mut face) = decode_row(row, scale_x, scale_y);
            if crop {
                face.crop = square_crop_region(orig_w, orig_h, &rect)
                    .map(|r| original.crop_imm(r.x, r.y, r.width, r.height));
            }
            debug!("face: {:?} score {:.3}", face.bbox, face.score);
            face
        })
        .collect();

    Ok(faces)
}

/// Scale one row into original-image coordinates.
fn decode_row(row: ArrayView1<'_, f32>, scale_x: f32, scale_y: f32) -> (FaceRect, FaceRecord) {
    let point = |i: usize| Point {
        x: row[i] * scale_x,
        y: row[i + 1] * scale_y,
    };

    let rect = FaceRect {
        x: row[0] * scale_x,
        y: row[1] * scale_y,
        width: row[2] * scale_x,
        height: row[3] * scale_y,
    };

    let face = FaceRecord {
        bbox: rect.to_box(),
        left_eye: point(6),
        right_eye: point(4),
        nose: point(8),
        mouth_left: point(12),
        mouth_right: point(10),
        score: row[14],
        crop: None,
    };
    (rect, face)
}

/// Square of side `max(w, h)` centered on the box, clamped to the image.
///
/// Works in whole pixels: origin and size are truncated separately. Clamping
/// does not re-center, so the region can come out non-square near an edge.
/// Returns `None` when nothing of the square lies inside the image.
/// Out-of-range or non-finite boxes saturate instead of overflowing.
pub fn square_crop_region(img_w: u32, img_h: u32, rect: &FaceRect) -> Option<CropRegion> {
    let x = rect.x as i64;
    let y = rect.y as i64;
    let w = rect.width as i64;
    let h = rect.height as i64;

    let cx = x.saturating_add(w / 2);
    let cy = y.saturating_add(h / 2);
    let r = w.max(h) / 2;

    let left = cx.saturating_sub(r).max(0);
    let top = cy.saturating_sub(r).max(0);
    let right = cx.saturating_add(r).min(img_w as i64);
    let bottom = cy.saturating_add(r).min(img_h as i64);

    if right <= left || bottom <= top {
        return None;
    }

    Some(CropRegion {
        x: left as u32,
        y: top as u32,
        width: (right - left) as u32,
        height: (bottom - top) as u32,
    })
}
