//! OpenVINO engine backend
//!
//! Implements both engine traits on top of an OpenVINO `Core`. Classifiers are
//! loaded from an architecture file plus weights (IR `.xml` + `.bin`, or a
//! single ONNX file). The detector may expose either post-processed YuNet rows
//! (`[N, 15]` or `[1, N, 15]`) or the 12 raw stride heads of the stock
//! `face_detection_yunet` export, which are decoded here.

use std::cmp::Ordering;
use std::path::Path;

use anyhow::{Context, Result};
use ndarray::{Array2, Array4};
use openvino::{CompiledModel, Core, ElementType, InferRequest, Shape, Tensor};
use parking_lot::Mutex;
use tracing::{debug, info};

use super::detector::ROW_WIDTH;
use super::preprocess::{InferenceSize, NormalizedImage};
use super::traits::{ClassifierEngine, DetectorEngine};
use super::yunet::{self, HEAD_COUNT};
use crate::config::InferenceConfig;
use crate::utils::math::iou_xywh;

/// Wrapper for OpenVINO Core that can cross threads
struct SafeCore(Core);
unsafe impl Send for SafeCore {}

/// Wrapper for OpenVINO CompiledModel that can cross threads
struct SafeCompiledModel(CompiledModel);
unsafe impl Send for SafeCompiledModel {}

/// Loaded OpenVINO network
pub struct OpenVinoModel {
    compiled: Mutex<SafeCompiledModel>,
    outputs: usize,
    input_size: Option<InferenceSize>,
}

impl OpenVinoModel {
    fn infer_request(&self) -> Result<InferRequest> {
        let mut compiled = self.compiled.lock();
        compiled
            .0
            .create_infer_request()
            .context("failed to create infer request")
    }
}

/// YuNet filtering applied to raw detector rows
#[derive(Debug, Clone, Copy)]
pub struct DetectionFilter {
    pub score_threshold: f32,
    pub nms_threshold: f32,
    pub top_k: usize,
}

impl Default for DetectionFilter {
    fn default() -> Self {
        Self {
            score_threshold: 0.9,
            nms_threshold: 0.3,
            top_k: 5_000,
        }
    }
}

/// OpenVINO-backed detector and classifier engine
pub struct OpenVinoEngine {
    core: Mutex<SafeCore>,
    device: String,
    filter: DetectionFilter,
}

impl OpenVinoEngine {
    pub fn new(config: &InferenceConfig) -> Result<Self> {
        let core = Core::new()?;
        Ok(Self {
            core: Mutex::new(SafeCore(core)),
            device: config.device.clone(),
            filter: DetectionFilter {
                score_threshold: config.score_threshold,
                nms_threshold: config.nms_threshold,
                top_k: config.top_k,
            },
        })
    }

    /// Compile a model, returning it with its output count.
    fn compile(
        &self,
        model_path: &Path,
        weights_path: Option<&Path>,
    ) -> Result<(SafeCompiledModel, usize)> {
        let model_path = path_str(model_path)?;
        let weights_path = weights_path.map(path_str).transpose()?.unwrap_or("");

        // Core methods need &mut self in the Rust bindings
        let mut core = self.core.lock();
        let model = core
            .0
            .read_model_from_file(model_path, weights_path)
            .with_context(|| format!("failed to read model {model_path}"))?;
        let compiled = core
            .0
            .compile_model(&model, self.device.as_str().into())
            .with_context(|| format!("failed to compile {model_path} for {}", self.device))?;
        let outputs = compiled.get_output_size()?;

        Ok((SafeCompiledModel(compiled), outputs))
    }
}

impl DetectorEngine for OpenVinoEngine {
    type Model = OpenVinoModel;

    fn construct(
        &self,
        weights: &Path,
        config: Option<&Path>,
        input_size: InferenceSize,
    ) -> Result<OpenVinoModel> {
        // ONNX carries its own graph; an IR pair is (xml, bin).
        let (compiled, outputs) = match config {
            Some(config) => self.compile(config, Some(weights))?,
            None => self.compile(weights, None)?,
        };
        anyhow::ensure!(
            outputs == 1 || outputs == HEAD_COUNT,
            "detector must have 1 or {} outputs (got {})",
            HEAD_COUNT,
            outputs
        );
        info!(
            "Detector compiled on {} for {}x{} ({} outputs)",
            self.device, input_size.width, input_size.height, outputs
        );

        Ok(OpenVinoModel {
            compiled: Mutex::new(compiled),
            outputs,
            input_size: Some(input_size),
        })
    }

    fn run(&self, model: &OpenVinoModel, image: &NormalizedImage) -> Result<Array2<f32>> {
        if let Some(expected) = model.input_size {
            anyhow::ensure!(
                expected == image.size(),
                "detector expects {}x{} input, got {}x{}",
                expected.width,
                expected.height,
                image.size().width,
                image.size().height
            );
        }

        let raw = if model.outputs == HEAD_COUNT {
            let padded = yunet::padded_size(image.size());
            let input = yunet::pad_input(&image.to_nchw(), padded);
            let heads = infer(model, &input)?
                .into_iter()
                .map(|(data, _)| data)
                .collect::<Vec<_>>();
            yunet::decode_heads(&heads, padded)?
        } else {
            let (data, dims) = infer(model, &image.to_nchw())?
                .pop()
                .context("detector produced no output")?;
            let rows = match dims.as_slice() {
                [rows, cols] | [1, rows, cols] if *cols as usize == ROW_WIDTH => *rows as usize,
                other => anyhow::bail!(
                    "detector output must be [N, 15] or [1, N, 15] (got {:?})",
                    other
                ),
            };
            Array2::from_shape_vec((rows, ROW_WIDTH), data)
                .context("detector output is not contiguous")?
        };

        Ok(filter_detections(raw, &self.filter))
    }
}

impl ClassifierEngine for OpenVinoEngine {
    type Model = OpenVinoModel;

    fn construct(&self, config: &Path, weights: &Path) -> Result<OpenVinoModel> {
        let (compiled, outputs) = self.compile(config, Some(weights))?;
        Ok(OpenVinoModel {
            compiled: Mutex::new(compiled),
            outputs,
            input_size: None,
        })
    }

    fn run(&self, model: &OpenVinoModel, blob: &Array4<f32>) -> Result<Vec<f32>> {
        let (data, dims) = infer(model, blob)?
            .into_iter()
            .next()
            .context("classifier produced no output")?;
        debug!("classifier output shape {:?}", dims);
        Ok(data)
    }
}

/// Run one synchronous inference on an NCHW tensor.
/// Returns every output as (data, dims), in output index order.
fn infer(model: &OpenVinoModel, input: &Array4<f32>) -> Result<Vec<(Vec<f32>, Vec<i64>)>> {
    let dims: Vec<i64> = input.shape().iter().map(|&d| d as i64).collect();
    let shape = Shape::new(&dims)?;
    let mut tensor = Tensor::new(ElementType::F32, &shape)?;

    {
        let raw = tensor.get_raw_data_mut()?;
        anyhow::ensure!(
            raw.len() == input.len() * 4,
            "input tensor holds {} bytes, expected {}",
            raw.len(),
            input.len() * 4
        );
        for (dst, value) in raw.chunks_exact_mut(4).zip(input.iter()) {
            dst.copy_from_slice(&value.to_ne_bytes());
        }
    }

    let mut request = model.infer_request()?;
    request.set_input_tensor(&tensor)?;
    request.infer()?;

    (0..model.outputs)
        .map(|index| -> Result<(Vec<f32>, Vec<i64>)> {
            let output = request.get_output_tensor_by_index(index)?;
            let dims = output.get_shape()?.get_dimensions().to_vec();
            let data = output
                .get_raw_data()?
                .chunks_exact(4)
                .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
                .collect();
            Ok((data, dims))
        })
        .collect()
}

/// Score filter, sort by score, top-k, then NMS. Survivors come out in
/// descending score order.
pub fn filter_detections(raw: Array2<f32>, filter: &DetectionFilter) -> Array2<f32> {
    let mut rows: Vec<Vec<f32>> = raw
        .rows()
        .into_iter()
        .filter(|row| row[14].is_finite() && row[14] >= filter.score_threshold)
        .filter(|row| row[2] > 0.0 && row[3] > 0.0)
        .map(|row| row.to_vec())
        .collect();

    rows.sort_by(|a, b| b[14].partial_cmp(&a[14]).unwrap_or(Ordering::Equal));
    if filter.top_k > 0 && rows.len() > filter.top_k {
        rows.truncate(filter.top_k);
    }

    let mut kept: Vec<Vec<f32>> = Vec::with_capacity(rows.len());
    for row in rows {
        let overlaps = filter.nms_threshold > 0.0
            && kept
                .iter()
                .any(|k| iou_xywh(&k[..4], &row[..4]) > filter.nms_threshold);
        if !overlaps {
            kept.push(row);
        }
    }

    let count = kept.len();
    let flat: Vec<f32> = kept.into_iter().flatten().collect();
    Array2::from_shape_vec((count, ROW_WIDTH), flat)
        .unwrap_or_else(|_| Array2::zeros((0, ROW_WIDTH)))
}

fn path_str(path: &Path) -> Result<&str> {
    path.to_str()
        .with_context(|| format!("model path is not valid UTF-8: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    fn det(x: f32, y: f32, size: f32, score: f32) -> [f32; 15] {
        let mut row = [0.0; 15];
        row[0] = x;
        row[1] = y;
        row[2] = size;
        row[3] = size;
        row[14] = score;
        row
    }

    #[test]
    fn test_filter_drops_low_scores_and_sorts() {
        let raw = arr2(&[
            det(0.0, 0.0, 10.0, 0.92),
            det(100.0, 100.0, 10.0, 0.5),
            det(200.0, 200.0, 10.0, 0.99),
        ]);
        let kept = filter_detections(raw, &DetectionFilter::default());
        assert_eq!(kept.nrows(), 2);
        assert_eq!(kept[[0, 14]], 0.99);
        assert_eq!(kept[[1, 14]], 0.92);
    }

    #[test]
    fn test_filter_suppresses_overlaps() {
        let raw = arr2(&[
            det(0.0, 0.0, 100.0, 0.95),
            det(5.0, 5.0, 100.0, 0.97),
            det(300.0, 300.0, 50.0, 0.91),
        ]);
        let kept = filter_detections(raw, &DetectionFilter::default());
        assert_eq!(kept.nrows(), 2);
        assert_eq!(kept[[0, 0]], 5.0);
        assert_eq!(kept[[1, 0]], 300.0);
    }

    #[test]
    fn test_filter_top_k() {
        let raw = arr2(&[det(0.0, 0.0, 10.0, 0.95), det(500.0, 500.0, 10.0, 0.97)]);
        let filter = DetectionFilter {
            top_k: 1,
            ..DetectionFilter::default()
        };
        let kept = filter_detections(raw, &filter);
        assert_eq!(kept.nrows(), 1);
        assert_eq!(kept[[0, 14]], 0.97);
    }
}
