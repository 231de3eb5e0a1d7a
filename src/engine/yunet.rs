//! YuNet raw head decoding
//!
//! The exported YuNet graph has no post-processing: it emits 12 heads, one
//! cls/obj/bbox/kps quadruple per stride (8, 16, 32), ordered
//! `cls_8, cls_16, cls_32, obj_8, .., bbox_8, .., kps_8, ..`. This module
//! fuses them into the 15-column row layout the rest of the crate expects.
//!
//! Rows come out in padded inference space. Padding only extends the right
//! and bottom edges, so these are also unpadded inference coordinates.

use anyhow::{ensure, Result};
use ndarray::{s, Array2, Array4};

use super::detector::ROW_WIDTH;
use super::preprocess::InferenceSize;

/// Feature map strides, in head order
pub const STRIDES: [usize; 3] = [8, 16, 32];

/// cls, obj, bbox, kps
pub const HEADS_PER_STRIDE: usize = 4;

/// Total number of raw heads
pub const HEAD_COUNT: usize = STRIDES.len() * HEADS_PER_STRIDE;

/// Input dimensions must be multiples of the largest stride.
pub const ALIGNMENT: u32 = 32;

/// `size` rounded up to the next multiple of [`ALIGNMENT`]
pub fn padded_size(size: InferenceSize) -> InferenceSize {
    InferenceSize::new(
        size.width.div_ceil(ALIGNMENT) * ALIGNMENT,
        size.height.div_ceil(ALIGNMENT) * ALIGNMENT,
    )
}

/// Zero-pad an NCHW tensor on the right and bottom up to `padded`.
pub fn pad_input(input: &Array4<f32>, padded: InferenceSize) -> Array4<f32> {
    let (n, c, h, w) = input.dim();
    let (ph, pw) = (padded.height as usize, padded.width as usize);
    if (h, w) == (ph, pw) {
        return input.clone();
    }

    let mut out = Array4::<f32>::zeros((n, c, ph.max(h), pw.max(w)));
    out.slice_mut(s![.., .., ..h, ..w]).assign(input);
    out
}

/// Fuse the 12 raw heads into one `[N, 15]` row per anchor cell.
///
/// Each head is a flat buffer in row-major cell order. No score filtering
/// happens here.
pub fn decode_heads(heads: &[Vec<f32>], padded: InferenceSize) -> Result<Array2<f32>> {
    ensure!(
        heads.len() == HEAD_COUNT,
        "YuNet decode expects {} heads, got {}",
        HEAD_COUNT,
        heads.len()
    );

    let (pad_w, pad_h) = (padded.width as usize, padded.height as usize);
    let total_cells: usize = STRIDES
        .iter()
        .map(|&stride| (pad_w / stride) * (pad_h / stride))
        .sum();
    let mut fused = Vec::with_capacity(total_cells * ROW_WIDTH);

    for (index, &stride) in STRIDES.iter().enumerate() {
        ensure!(
            pad_w % stride == 0 && pad_h % stride == 0,
            "input {}x{} not divisible by stride {}",
            pad_w,
            pad_h,
            stride
        );
        let cols = pad_w / stride;
        let rows = pad_h / stride;
        let cells = rows * cols;

        let cls = &heads[index];
        let obj = &heads[index + STRIDES.len()];
        let bbox = &heads[index + STRIDES.len() * 2];
        let kps = &heads[index + STRIDES.len() * 3];

        let expected = [("cls", cls, 1), ("obj", obj, 1), ("bbox", bbox, 4), ("kps", kps, 10)];
        for (name, head, per_cell) in expected {
            ensure!(
                head.len() == cells * per_cell,
                "{name} head for stride {stride} has {} values, expected {}",
                head.len(),
                cells * per_cell
            );
        }

        let stride = stride as f32;
        for row in 0..rows {
            for col in 0..cols {
                let idx = row * cols + col;

                let mut score = (cls[idx].clamp(0.0, 1.0) * obj[idx].clamp(0.0, 1.0)).sqrt();
                if !score.is_finite() {
                    score = 0.0;
                }

                let b = &bbox[idx * 4..idx * 4 + 4];
                let cx = (col as f32 + b[0]) * stride;
                let cy = (row as f32 + b[1]) * stride;
                let w = b[2].exp() * stride;
                let h = b[3].exp() * stride;
                fused.extend([cx - w / 2.0, cy - h / 2.0, w, h]);

                let k = &kps[idx * 10..idx * 10 + 10];
                for point in k.chunks_exact(2) {
                    fused.push((point[0] + col as f32) * stride);
                    fused.push((point[1] + row as f32) * stride);
                }

                fused.push(score);
            }
        }
    }

    Ok(Array2::from_shape_vec((total_cells, ROW_WIDTH), fused)?)
}
