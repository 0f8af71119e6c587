//! Frame-graph capability and the VapourSynth script recorder.
//!
//! The pipeline never touches frames. It describes stages to a [`FrameGraph`], which returns
//! the resulting clip state or rejects a representation it cannot feed to a stage.

use std::path::{Path, PathBuf};

use crate::engine_settings::EngineIo;
use crate::error::PipelineError;
use crate::models::{ClipState, ColorRange, NodeRef, PixelFormat, Rational, VideoInfo};

/// A resize and/or format conversion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResizeRequest {
    pub width: u32,
    pub height: u32,
    /// Target format; `None` keeps the current one.
    pub format: Option<PixelFormat>,
    pub matrix_in: Option<String>,
    pub matrix: Option<String>,
    pub range: Option<ColorRange>,
}

impl ResizeRequest {
    pub fn to_size(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Default::default()
        }
    }
}

/// How a model is bound into the graph.
#[derive(Debug, Clone, PartialEq)]
pub enum InferenceBinding {
    /// Compiled TensorRT engine.
    Trt {
        engine_path: PathBuf,
        num_streams: u32,
        io: Option<EngineIo>,
    },
    /// ONNX Runtime with the DirectML provider.
    DirectMl { network_path: PathBuf, fp16: bool },
    /// NCNN Vulkan.
    Ncnn { network_path: PathBuf, fp16: bool },
}

impl InferenceBinding {
    /// Stage label used in errors and logs.
    pub fn stage_name(&self) -> &'static str {
        match self {
            InferenceBinding::Trt { .. } => "TensorRT engine",
            InferenceBinding::DirectMl { .. } => "DirectML model",
            InferenceBinding::Ncnn { .. } => "NCNN model",
        }
    }

    /// Whether the binding takes clips in this format.
    pub fn accepts(&self, format: PixelFormat) -> bool {
        match self {
            InferenceBinding::Trt {
                io: Some(EngineIo::Fp32),
                ..
            } => format == PixelFormat::RgbS,
            InferenceBinding::Trt {
                io: Some(EngineIo::Fp16),
                ..
            } => format == PixelFormat::RgbH,
            InferenceBinding::Ncnn { .. } => format == PixelFormat::RgbS,
            InferenceBinding::Trt { io: None, .. } | InferenceBinding::DirectMl { .. } => {
                format.is_float_rgb()
            }
        }
    }
}

/// Frame interpolation stage.
#[derive(Debug, Clone, PartialEq)]
pub struct InterpolationRequest {
    pub model: String,
    pub fps_in: Rational,
    pub factor_numerator: u32,
    pub factor_denominator: u32,
    pub ensemble: bool,
    pub scene_detect_threshold: f64,
    /// Run the interpolation network through TensorRT.
    pub tensorrt: bool,
}

/// Marks a point the graph can be rolled back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Savepoint(usize);

/// Stage descriptors accepted by the frame-graph engine.
pub trait FrameGraph {
    fn resize(&mut self, clip: &ClipState, request: &ResizeRequest)
        -> Result<ClipState, PipelineError>;

    /// Clamp sample values into `[0, 1]`.
    fn clamp(&mut self, clip: &ClipState) -> Result<ClipState, PipelineError>;

    /// Run a model that upscales by `scale`.
    fn infer(
        &mut self,
        clip: &ClipState,
        binding: &InferenceBinding,
        scale: u32,
    ) -> Result<ClipState, PipelineError>;

    fn interpolate(
        &mut self,
        clip: &ClipState,
        request: &InterpolationRequest,
    ) -> Result<ClipState, PipelineError>;

    fn savepoint(&self) -> Savepoint;

    /// Discard every stage added after `savepoint`.
    fn rollback(&mut self, savepoint: Savepoint);
}

/// Records stages as VapourSynth statements.
///
/// Node 0 is the source clip bound to `clip` by the script template.
#[derive(Debug)]
pub struct ScriptGraph {
    statements: Vec<String>,
    next_node: usize,
    interpolates: bool,
}

impl Default for ScriptGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptGraph {
    pub fn new() -> Self {
        Self {
            statements: Vec::new(),
            next_node: 1,
            interpolates: false,
        }
    }

    /// Clip state of the source node.
    pub fn source(&self, video: &VideoInfo) -> Result<ClipState, PipelineError> {
        Ok(ClipState {
            node: NodeRef(0),
            width: video.width,
            height: video.height,
            format: video.format,
            fps: video.fps()?,
            color_range: video.color_range,
            matrix: video
                .matrix
                .clone()
                .filter(|m| !m.trim().is_empty()),
        })
    }

    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    /// Whether any interpolation stage was recorded.
    pub fn uses_interpolation(&self) -> bool {
        self.interpolates
    }

    /// Script body ending with `clip` bound to `output`.
    pub fn render(&self, output: &ClipState) -> String {
        let mut body = self.statements.join("\n");
        if output.node != NodeRef(0) {
            if !body.is_empty() {
                body.push('\n');
            }
            body.push_str(&format!("clip = {}", var(output.node)));
        }
        body
    }

    fn push(&mut self, input: &ClipState, expr: String) -> ClipState {
        let node = NodeRef(self.next_node);
        self.next_node += 1;
        self.statements.push(format!("{} = {}", var(node), expr));
        ClipState {
            node,
            ..input.clone()
        }
    }
}

impl FrameGraph for ScriptGraph {
    fn resize(
        &mut self,
        clip: &ClipState,
        request: &ResizeRequest,
    ) -> Result<ClipState, PipelineError> {
        if request.width == 0 || request.height == 0 {
            return Err(PipelineError::Graph(format!(
                "resize to {}x{} is empty",
                request.width, request.height
            )));
        }

        let mut args = vec![
            var(clip.node),
            format!("width={}", request.width),
            format!("height={}", request.height),
        ];
        if let Some(format) = request.format {
            args.push(format!("format={}", format.vs_constant()));
        }
        if let Some(matrix_in) = &request.matrix_in {
            args.push(format!("matrix_in_s={}", py_str(matrix_in)));
        }
        if let Some(matrix) = &request.matrix {
            args.push(format!("matrix_s={}", py_str(matrix)));
        }
        if let Some(range) = request.range {
            args.push(format!("range_s={}", py_str(range.as_str())));
        }

        let mut next = self.push(clip, format!("core.resize.Spline36({})", args.join(", ")));
        next.width = request.width;
        next.height = request.height;
        next.format = request.format.unwrap_or(clip.format);
        if let Some(matrix) = &request.matrix {
            next.matrix = Some(matrix.clone());
        }
        if request.range.is_some() {
            next.color_range = request.range;
        }
        Ok(next)
    }

    fn clamp(&mut self, clip: &ClipState) -> Result<ClipState, PipelineError> {
        if !clip.format.is_float_rgb() {
            return Err(PipelineError::UnsupportedRepresentation {
                stage: "clamp".to_string(),
                format: clip.format,
            });
        }
        Ok(self.push(
            clip,
            format!("core.std.Limiter({}, min=0.0, max=1.0)", var(clip.node)),
        ))
    }

    fn infer(
        &mut self,
        clip: &ClipState,
        binding: &InferenceBinding,
        scale: u32,
    ) -> Result<ClipState, PipelineError> {
        if !binding.accepts(clip.format) {
            return Err(PipelineError::UnsupportedRepresentation {
                stage: binding.stage_name().to_string(),
                format: clip.format,
            });
        }

        let input = var(clip.node);
        let expr = match binding {
            InferenceBinding::Trt {
                engine_path,
                num_streams,
                ..
            } => format!(
                "core.trt.Model({}, engine_path={}, num_streams={})",
                input,
                py_path(engine_path),
                num_streams
            ),
            InferenceBinding::DirectMl { network_path, fp16 } => format!(
                "core.ort.Model({}, fp16={}, network_path={}, provider=\"DML\")",
                input,
                py_bool(*fp16),
                py_path(network_path)
            ),
            InferenceBinding::Ncnn { network_path, fp16 } => format!(
                "core.ncnn.Model({}, fp16={}, network_path={})",
                input,
                py_bool(*fp16),
                py_path(network_path)
            ),
        };

        let (width, height) = clip
            .width
            .checked_mul(scale)
            .zip(clip.height.checked_mul(scale))
            .ok_or_else(|| {
                PipelineError::Graph(format!(
                    "{}x upscale of {} overflows",
                    scale,
                    clip.resolution()
                ))
            })?;

        let mut next = self.push(clip, expr);
        next.width = width;
        next.height = height;
        Ok(next)
    }

    fn interpolate(
        &mut self,
        clip: &ClipState,
        request: &InterpolationRequest,
    ) -> Result<ClipState, PipelineError> {
        if request.factor_denominator == 0 {
            return Err(PipelineError::Graph(
                "interpolation factor denominator is zero".to_string(),
            ));
        }

        let expr = format!(
            "rife_cuda.rife({}, model={}, fps_in={}, fps_num={}, fps_den={}, t_tta={}, \
             scene_detect_threshold={}, lt_d2k=True, tensorrt={})",
            var(clip.node),
            py_str(&request.model),
            request.fps_in.as_f64(),
            request.factor_numerator,
            request.factor_denominator,
            py_bool(request.ensemble),
            request.scene_detect_threshold,
            py_bool(request.tensorrt)
        );

        self.interpolates = true;
        let mut next = self.push(clip, expr);
        next.fps = request
            .fps_in
            .scaled(request.factor_numerator, request.factor_denominator);
        Ok(next)
    }

    fn savepoint(&self) -> Savepoint {
        Savepoint(self.statements.len())
    }

    fn rollback(&mut self, savepoint: Savepoint) {
        self.statements.truncate(savepoint.0);
        self.interpolates = self
            .statements
            .iter()
            .any(|s| s.contains("rife_cuda.rife("));
    }
}

fn var(node: NodeRef) -> String {
    if node.0 == 0 {
        "clip".to_string()
    } else {
        format!("clip{}", node.0)
    }
}

fn py_bool(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}

/// Python string literal.
pub fn py_str(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

fn py_path(path: &Path) -> String {
    py_str(&path.to_string_lossy())
}
