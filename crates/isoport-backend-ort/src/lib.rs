//! Object detection over ONNX Runtime.
//!
//! Expects a YOLOv3 export whose outputs are the raw detection heads, i.e.
//! tensors whose last dimension is `5 + classes` with normalized
//! `[cx, cy, w, h, objectness, scores...]` rows.

pub mod draw;
pub mod postprocess;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use image::imageops::FilterType;
use image::RgbImage;
use isoport_core::fetch::fetch_image;
use isoport_core::{Backend, DetectionJob, Job, ModelArtifact, Payload};
use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::session::{Session, SessionInputValue};
use tracing::{debug, info};

use crate::draw::{class_color, draw_box, draw_label, encode_jpeg_base64, label_font, BOX_THICKNESS};
use crate::postprocess::{collect_candidates, non_max_suppression, Detection};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Device {
    Cpu,
    Cuda { device_id: u32 },
}

#[derive(Clone, Debug)]
pub struct DetectorConfig {
    /// Models live under `<resources_root>/Models`.
    pub resources_root: PathBuf,
    pub device: Device,
    /// Square network input edge, in pixels.
    pub input_size: u32,
    pub score_threshold: f32,
    pub nms_threshold: f32,
}

impl DetectorConfig {
    pub fn new(resources_root: impl Into<PathBuf>) -> Self {
        Self {
            resources_root: resources_root.into(),
            device: Device::Cpu,
            input_size: 416,
            score_threshold: 0.1,
            nms_threshold: 0.4,
        }
    }
}

pub struct OrtBackend {
    config: DetectorConfig,
}

impl OrtBackend {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    /// Map a request's model name onto a file. Names are case-insensitive.
    pub fn resolve_model(&self, name: &str) -> Result<ModelArtifact> {
        if name.eq_ignore_ascii_case("yolov3") {
            Ok(ModelArtifact::OnnxPath(
                self.config.resources_root.join("Models").join("yolov3.onnx"),
            ))
        } else {
            bail!("unsupported model: {name} (expected YOLOv3)")
        }
    }

    fn load(&self, artifact: &ModelArtifact) -> Result<Session> {
        let ModelArtifact::OnnxPath(path) = artifact;
        if !path.is_file() {
            bail!("model file not found: {}", path.display());
        }

        let builder = Session::builder()
            .context("failed to create ORT session builder")?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .context("failed to configure ORT session builder")?;
        let builder = configure_session_builder(builder, &self.config.device)?;

        builder
            .commit_from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))
    }

    pub fn detect(&self, job: DetectionJob) -> Result<Payload> {
        let started = Instant::now();

        let raw = fetch_image(&job.image).context("fetching image")?;
        let artifact = self.resolve_model(&job.model)?;
        let mut session = self.load(&artifact)?;

        let mut image = image::load_from_memory(&raw)
            .context("decoding image")?
            .to_rgb8();
        let (width, height) = image.dimensions();

        let heads = run_network(&mut session, &image, self.config.input_size)?;
        let mut candidates = Vec::new();
        for (row_len, rows) in &heads {
            candidates.extend(collect_candidates(rows, *row_len, width, height, job.confidence));
        }
        let kept = non_max_suppression(
            candidates,
            self.config.score_threshold,
            self.config.nms_threshold,
        );

        let font = label_font()?;
        for det in &kept {
            let label = label_for(det, &job)?;
            debug!(%label, x = det.bbox.x, y = det.bbox.y, w = det.bbox.w, h = det.bbox.h, "detected");
            let color = class_color(color_slot(det.class_id, &job.map_names));
            draw_box(&mut image, &det.bbox, color, BOX_THICKNESS);
            draw_label(&mut image, &font, &label, &det.bbox, color);
        }

        let img_base64 = encode_jpeg_base64(image)?;
        let delta_time = format!("{:.4}", started.elapsed().as_secs_f64());
        info!(model = %job.model, source = %job.image.describe(), detections = kept.len(), %delta_time, "detection finished");

        Ok(Payload::Detection {
            delta_time,
            img_base64,
        })
    }
}

impl Backend for OrtBackend {
    fn name(&self) -> &'static str {
        "onnxruntime"
    }

    fn accepts(&self, job: &Job) -> bool {
        matches!(job, Job::Detect(_))
    }

    fn run(&self, job: Job) -> Result<Payload> {
        match job {
            Job::Detect(job) => self.detect(job),
            other => bail!("onnxruntime backend cannot run {} jobs", other.kind()),
        }
    }
}

/// `class:conf`, or just `conf` without a name map. A class id missing from a
/// non-empty map is an error.
fn label_for(det: &Detection, job: &DetectionJob) -> Result<String> {
    let conf = format!("{:.2}", det.confidence);
    if job.map_names.is_empty() {
        return Ok(conf);
    }
    match job.map_names.get(&det.class_id) {
        Some(name) => Ok(format!("{name}:{conf}")),
        None => bail!(
            "class id {} has no entry in map_names ({} names)",
            det.class_id,
            job.map_names.len()
        ),
    }
}

/// Colour index for a class: its position in `map_names`, or the raw id
/// when there is no map.
fn color_slot(class_id: u32, map_names: &BTreeMap<u32, String>) -> u32 {
    map_names
        .keys()
        .position(|id| *id == class_id)
        .map_or(class_id, |i| i as u32)
}

/// Resize to the square network input, scale to [0, 1], lay out as NCHW RGB.
pub fn preprocess(image: &RgbImage, size: u32) -> Vec<f32> {
    let resized = image::imageops::resize(image, size, size, FilterType::Triangle);
    let plane = (size * size) as usize;
    let mut data = vec![0f32; 3 * plane];
    for (i, pixel) in resized.pixels().enumerate() {
        for c in 0..3 {
            data[c * plane + i] = f32::from(pixel[c]) / 255.0;
        }
    }
    data
}

/// Run the network once; returns each f32 output as `(row_len, flat rows)`.
fn run_network(session: &mut Session, image: &RgbImage, size: u32) -> Result<Vec<(usize, Vec<f32>)>> {
    let input_name = session
        .inputs
        .first()
        .map(|input| input.name.clone())
        .context("model has no inputs")?;

    let data = preprocess(image, size);
    let shape = vec![1usize, 3, size as usize, size as usize];
    let value = ort::value::Tensor::from_array((shape, data))?.into_dyn();

    let outputs = session.run(vec![(input_name, SessionInputValue::from(value))])?;
    let mut heads = Vec::with_capacity(outputs.len());
    for (name, value) in outputs.iter() {
        let array = value
            .try_extract_array::<f32>()
            .with_context(|| format!("output {name} is not an f32 tensor"))?;
        let row_len = array.shape().last().copied().unwrap_or(0);
        if row_len <= 5 {
            debug!(output = %name, shape = ?array.shape(), "skipping non-detection output");
            continue;
        }
        heads.push((row_len, array.iter().copied().collect()));
    }
    Ok(heads)
}

fn configure_session_builder(builder: SessionBuilder, device: &Device) -> Result<SessionBuilder> {
    match device {
        Device::Cpu => Ok(builder),
        Device::Cuda { device_id } => configure_cuda(builder, *device_id),
    }
}

fn configure_cuda(builder: SessionBuilder, device_id: u32) -> Result<SessionBuilder> {
    #[cfg(feature = "cuda")]
    {
        use ort::execution_providers::cuda::CUDAExecutionProvider;
        let ep = CUDAExecutionProvider::default()
            .with_device_id(device_id as i32)
            .build();
        builder
            .with_execution_providers([ep])
            .context("failed to enable ORT CUDA execution provider")
    }
    #[cfg(not(feature = "cuda"))]
    {
        let _ = (builder, device_id);
        bail!("CUDA requested but isoport-backend-ort was built without the `cuda` feature")
    }
}
