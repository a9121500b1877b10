//! ONNX face pipeline: UltraFace detection followed by ArcFace embedding.

use image::{DynamicImage, GenericImageView, RgbImage};
use ndarray::Array4;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::{debug, info, warn};

use super::FeatureExtractor;
use crate::config::FacesConfig;
use crate::error::ExtractError;

const DETECTION_MODEL: (&str, &str) = (
    "ultraface-320.onnx",
    "https://github.com/onnx/models/raw/main/validated/vision/body_analysis/ultraface/models/version-RFB-320.onnx",
);
const EMBEDDING_MODEL: (&str, &str) = (
    "arcface-resnet100.onnx",
    "https://github.com/onnx/models/raw/main/validated/vision/body_analysis/arcface/model/arcfaceresnet100-11-int8.onnx",
);

const DETECTION_WIDTH: u32 = 320;
const DETECTION_HEIGHT: u32 = 240;
const EMBEDDING_SIZE: u32 = 112;

/// Face box in source image pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

fn model_error(e: impl std::fmt::Display) -> ExtractError {
    ExtractError::Model(e.to_string())
}

/// Download a model into `model_dir` unless it is already there.
fn ensure_model(model_dir: &Path, (filename, url): (&str, &str)) -> Result<PathBuf, ExtractError> {
    std::fs::create_dir_all(model_dir).map_err(model_error)?;
    let model_path = model_dir.join(filename);

    if !model_path.exists() {
        info!(model = %filename, "Downloading model...");
        let response = ureq::get(url)
            .call()
            .map_err(|e| ExtractError::Model(format!("failed to download {}: {}", filename, e)))?;

        // Partial downloads never land at the final path
        let partial = model_path.with_extension("part");
        let mut file = std::fs::File::create(&partial).map_err(model_error)?;
        std::io::copy(&mut response.into_reader(), &mut file).map_err(model_error)?;
        std::fs::rename(&partial, &model_path).map_err(model_error)?;
        info!(model = %filename, path = ?model_path, "Model downloaded");
    }

    Ok(model_path)
}

/// A few sessions for the same model so concurrent workers rarely wait on
/// each other; inference needs exclusive access to a session.
struct SessionPool {
    sessions: Vec<Mutex<Session>>,
    next: AtomicUsize,
}

impl SessionPool {
    fn load(model_path: &Path, size: usize, intra_threads: usize) -> Result<Self, ExtractError> {
        let sessions = (0..size.max(1))
            .map(|_| {
                Session::builder()
                    .map_err(model_error)?
                    .with_optimization_level(GraphOptimizationLevel::Level3)
                    .map_err(model_error)?
                    .with_intra_threads(intra_threads.max(1))
                    .map_err(model_error)?
                    .commit_from_file(model_path)
                    .map(Mutex::new)
                    .map_err(model_error)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            sessions,
            next: AtomicUsize::new(0),
        })
    }

    fn with<T>(&self, f: impl FnOnce(&mut Session) -> Result<T, ExtractError>) -> Result<T, ExtractError> {
        let len = self.sessions.len();
        let start = self.next.fetch_add(1, Ordering::Relaxed) % len;

        for offset in 0..len {
            if let Ok(mut session) = self.sessions[(start + offset) % len].try_lock() {
                return f(&mut session);
            }
        }

        let mut session = self.sessions[start]
            .lock()
            .map_err(|_| ExtractError::Model("session lock poisoned".to_string()))?;
        f(&mut session)
    }
}

/// UltraFace + ArcFace extractor producing L2-normalized 512-d embeddings.
pub struct OnnxExtractor {
    detection: SessionPool,
    embedding: SessionPool,
    detection_threshold: f32,
    nms_threshold: f32,
}

impl OnnxExtractor {
    /// Load both models, downloading them on first use. `sessions` is the
    /// number of parallel inference sessions per model and should match the
    /// ingestion concurrency.
    pub fn load(config: &FacesConfig, sessions: usize) -> Result<Self, ExtractError> {
        let detection_path = ensure_model(&config.model_dir, DETECTION_MODEL)?;
        let embedding_path = ensure_model(&config.model_dir, EMBEDDING_MODEL)?;

        let extractor = Self {
            detection: SessionPool::load(&detection_path, sessions, config.intra_threads)?,
            embedding: SessionPool::load(&embedding_path, sessions, config.intra_threads)?,
            detection_threshold: config.detection_threshold,
            nms_threshold: config.nms_threshold,
        };
        info!(sessions, "Face models loaded");
        Ok(extractor)
    }

    fn detect(&self, img: &DynamicImage) -> Result<Vec<(FaceBox, f32)>, ExtractError> {
        let (orig_width, orig_height) = img.dimensions();

        let resized = img
            .resize_exact(DETECTION_WIDTH, DETECTION_HEIGHT, image::imageops::FilterType::Triangle)
            .to_rgb8();
        let input = to_nchw(&resized, 127.0, 128.0)?;

        let candidates = self.detection.with(|session| {
            let outputs = session.run(ort::inputs!["input" => input])?;

            let scores = outputs
                .get("scores")
                .ok_or_else(|| ExtractError::Model("no scores output".to_string()))?;
            let boxes = outputs
                .get("boxes")
                .ok_or_else(|| ExtractError::Model("no boxes output".to_string()))?;

            let (scores_shape, scores_data) = scores.try_extract_tensor::<f32>()?;
            let (_boxes_shape, boxes_data) = boxes.try_extract_tensor::<f32>()?;

            // scores: [1, anchors, 2] (background, face)
            // boxes: [1, anchors, 4] (x1, y1, x2, y2), normalized
            let anchors = scores_shape[1] as usize;
            let mut found = Vec::new();
            for i in 0..anchors {
                let confidence = scores_data[i * 2 + 1];
                if confidence <= self.detection_threshold {
                    continue;
                }

                let x1 = (boxes_data[i * 4] * orig_width as f32) as i32;
                let y1 = (boxes_data[i * 4 + 1] * orig_height as f32) as i32;
                let x2 = (boxes_data[i * 4 + 2] * orig_width as f32) as i32;
                let y2 = (boxes_data[i * 4 + 3] * orig_height as f32) as i32;

                found.push((
                    FaceBox {
                        x: x1.max(0),
                        y: y1.max(0),
                        width: (x2 - x1).max(1),
                        height: (y2 - y1).max(1),
                    },
                    confidence,
                ));
            }
            Ok(found)
        })?;

        Ok(nms(candidates, self.nms_threshold))
    }

    fn embed(&self, face: &DynamicImage) -> Result<Vec<f32>, ExtractError> {
        let resized = face
            .resize_exact(EMBEDDING_SIZE, EMBEDDING_SIZE, image::imageops::FilterType::Triangle)
            .to_rgb8();
        let input = to_nchw(&resized, 127.5, 127.5)?;

        let raw = self.embedding.with(|session| {
            // ArcFace takes "data" and has a single output
            let outputs = session.run(ort::inputs!["data" => input])?;
            let (_, output) = outputs
                .iter()
                .next()
                .ok_or_else(|| ExtractError::Model("no embedding output".to_string()))?;
            let (_shape, data) = output.try_extract_tensor::<f32>()?;
            Ok(data.to_vec())
        })?;

        Ok(l2_normalize(raw))
    }
}

impl FeatureExtractor for OnnxExtractor {
    fn extract(&self, image: &[u8]) -> Result<Vec<Vec<f32>>, ExtractError> {
        let img = image::load_from_memory(image)?;
        let (width, height) = img.dimensions();

        let faces = self.detect(&img)?;
        debug!(faces = faces.len(), width, height, "Detected faces");

        let mut embeddings = Vec::with_capacity(faces.len());
        for (face, confidence) in faces {
            let crop = crop_face(&img, &face, width, height);
            match self.embed(&crop) {
                Ok(embedding) => embeddings.push(embedding),
                Err(e) => warn!(?face, confidence, error = %e, "Skipping face without embedding"),
            }
        }
        Ok(embeddings)
    }
}

/// RGB image to a normalized `[1, 3, H, W]` tensor.
fn to_nchw(rgb: &RgbImage, mean: f32, scale: f32) -> Result<Tensor<f32>, ExtractError> {
    let (width, height) = (rgb.width() as usize, rgb.height() as usize);
    let array = Array4::from_shape_fn((1, 3, height, width), |(_, c, y, x)| {
        (rgb.get_pixel(x as u32, y as u32)[c] as f32 - mean) / scale
    });
    let (data, _offset) = array.into_raw_vec_and_offset();
    Ok(Tensor::from_array(([1usize, 3, height, width], data.into_boxed_slice()))?)
}

fn l2_normalize(v: Vec<f32>) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.into_iter().map(|x| x / norm).collect()
    } else {
        v
    }
}

/// Non-maximum suppression, highest confidence first.
fn nms(mut boxes: Vec<(FaceBox, f32)>, threshold: f32) -> Vec<(FaceBox, f32)> {
    boxes.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut keep: Vec<(FaceBox, f32)> = Vec::new();
    for candidate in boxes {
        if keep.iter().all(|(kept, _)| compute_iou(kept, &candidate.0) <= threshold) {
            keep.push(candidate);
        }
    }
    keep
}

fn compute_iou(a: &FaceBox, b: &FaceBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let intersection = ((x2 - x1).max(0) * (y2 - y1).max(0)) as f32;
    let union = (a.width * a.height + b.width * b.height) as f32 - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

/// Crop with 20% padding, clamped to the image.
fn crop_face(img: &DynamicImage, face: &FaceBox, img_width: u32, img_height: u32) -> DynamicImage {
    let padding_x = (face.width as f32 * 0.2) as i32;
    let padding_y = (face.height as f32 * 0.2) as i32;

    let x = ((face.x - padding_x).max(0) as u32).min(img_width.saturating_sub(1));
    let y = ((face.y - padding_y).max(0) as u32).min(img_height.saturating_sub(1));
    let w = ((face.width + padding_x * 2) as u32).min(img_width - x);
    let h = ((face.height + padding_y * 2) as u32).min(img_height - y);

    img.crop_imm(x, y, w.max(1), h.max(1))
}
