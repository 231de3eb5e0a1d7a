//! Image utility functions

use std::path::Path;

use anyhow::{Context, Result};
use image::{DynamicImage, Rgba, RgbaImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use crate::engine::FaceRecord;

/// Outline color for detected faces
pub const FACE_OUTLINE: Rgba<u8> = Rgba([255, 0, 0, 255]);

/// Outline thickness in pixels
pub const FACE_OUTLINE_THICKNESS: i32 = 4;

/// Decode image from bytes (JPEG, PNG, etc.)
pub fn decode_image(data: &[u8]) -> Result<DynamicImage> {
    let img = image::load_from_memory(data)?;
    Ok(img)
}

/// Load an image from disk
pub fn load_image(path: &Path) -> Result<DynamicImage> {
    image::open(path).with_context(|| format!("failed to open image {}", path.display()))
}

/// Copy of `image` with every face box outlined
pub fn draw_faces(image: &DynamicImage, faces: &[FaceRecord]) -> RgbaImage {
    let mut canvas = image.to_rgba8();

    for face in faces {
        let left = face.bbox.left.round() as i32;
        let top = face.bbox.top.round() as i32;
        let width = face.bbox.width().round() as i32;
        let height = face.bbox.height().round() as i32;

        // Nested 1px outlines, growing inward
        for inset in 0..FACE_OUTLINE_THICKNESS {
            let w = width - 2 * inset;
            let h = height - 2 * inset;
            if w <= 0 || h <= 0 {
                break;
            }
            let rect = Rect::at(left + inset, top + inset).of_size(w as u32, h as u32);
            draw_hollow_rect_mut(&mut canvas, rect, FACE_OUTLINE);
        }
    }

    canvas
}
