//! One model application: pre-upscale resizes, clamp and the inference binding.

use crate::error::PipelineError;
use crate::frame_graph::{FrameGraph, InferenceBinding, ResizeRequest};
use crate::models::{Backend, ClipState, LogLevel, ModelStep, PixelFormat};
use crate::run_context::RunContext;

/// Inference streams shared by every model in a chain.
pub const TOTAL_NUM_STREAMS: u32 = 4;

/// Streams per model: `max(1, 4 / models_in_chain)`.
pub fn stream_count(models_in_chain: usize) -> u32 {
    let models = models_in_chain.max(1) as u32;
    (TOTAL_NUM_STREAMS / models).max(1)
}

/// Aspect-preserving fit: wider than 16:9 fits `target_width`, otherwise `target_height`.
pub fn scale_to_target(width: u32, height: u32, target_width: f64, target_height: f64) -> (u32, u32) {
    let (w, h) = (width as f64, height as f64);
    if w / h > 16.0 / 9.0 {
        (target_width.round() as u32, (target_width * h / w).round() as u32)
    } else {
        ((target_height * w / h).round() as u32, target_height.round() as u32)
    }
}

/// Uniform percentage resize of a dimension.
pub fn scale_by_factor(value: u32, factor: f64) -> u32 {
    (value as f64 * factor / 100.0).round() as u32
}

/// Builds upscale stages for the models of one chain.
pub struct StageBuilder<'a> {
    ctx: &'a RunContext,
    backend: Backend,
    num_streams: u32,
    matrix_in: String,
    chain_settings: Option<&'a str>,
}

impl<'a> StageBuilder<'a> {
    pub fn new(
        ctx: &'a RunContext,
        backend: Backend,
        models_in_chain: usize,
        matrix_in: &str,
        chain_settings: Option<&'a str>,
    ) -> Self {
        Self {
            ctx,
            backend,
            num_streams: stream_count(models_in_chain),
            matrix_in: matrix_in.to_string(),
            chain_settings,
        }
    }

    /// Apply one model step, returning the new clip and its trace lines.
    ///
    /// The attempt converts to half-float RGB first. If the graph rejects that representation,
    /// everything recorded by the attempt is rolled back and it runs once more in
    /// single-precision float.
    pub fn build_upscale_stage(
        &self,
        graph: &mut dyn FrameGraph,
        clip: &ClipState,
        step: &ModelStep,
    ) -> Result<(ClipState, Vec<String>), PipelineError> {
        let savepoint = graph.savepoint();
        match self.attempt(graph, clip, step, PixelFormat::RgbH) {
            Err(e) if e.is_unsupported_representation() => {
                self.ctx.reporter.send_log(
                    LogLevel::Debug,
                    &format!("{}: {}; retrying with RGBS", step.name, e),
                );
                graph.rollback(savepoint);
                self.attempt(graph, clip, step, PixelFormat::RgbS)
            }
            result => result,
        }
    }

    fn attempt(
        &self,
        graph: &mut dyn FrameGraph,
        clip: &ClipState,
        step: &ModelStep,
        representation: PixelFormat,
    ) -> Result<(ClipState, Vec<String>), PipelineError> {
        let mut lines = Vec::new();

        let factor = step.effective_resize_factor();
        let convert = ResizeRequest {
            format: Some(representation),
            matrix_in: clip.format.is_yuv().then(|| self.matrix_in.clone()),
            ..ResizeRequest::to_size(
                scale_by_factor(clip.width, factor),
                scale_by_factor(clip.height, factor),
            )
        };
        let mut current = graph.resize(clip, &convert)?;
        if factor != 100.0 {
            lines.push(format!(
                "Applied Resize Factor Before Upscale: {}%;    New Video Resolution: {}",
                factor,
                current.resolution()
            ));
        }

        let target_height = step.resize_height_before_upscale;
        if target_height != 0 && target_height != current.height {
            let (width, height) = scale_to_target(
                current.width,
                current.height,
                target_height as f64 * 16.0 / 9.0,
                target_height as f64,
            );
            current = graph.resize(&current, &ResizeRequest::to_size(width, height))?;
            lines.push(format!(
                "Applied Resize Height Before Upscale: {}px;    New Video Resolution: {}",
                target_height,
                current.resolution()
            ));
        }

        current = graph.clamp(&current)?;

        let binding = self.bind(step, &current)?;
        self.ctx.reporter.send_log(
            LogLevel::Debug,
            &format!(
                "Upscaling {}x from {} with {} ({} streams)",
                step.scale,
                current.resolution(),
                step.name,
                self.num_streams
            ),
        );
        current = graph.infer(&current, &binding, step.scale)?;
        lines.push(format!(
            "Applied Model: {};    New Video Resolution: {}",
            step.name,
            current.resolution()
        ));

        Ok((current, lines))
    }

    fn bind(&self, step: &ModelStep, clip: &ClipState) -> Result<InferenceBinding, PipelineError> {
        let network_path = self.ctx.cache.model_path(&step.name);
        match self.backend {
            Backend::DirectML | Backend::Ncnn if !network_path.is_file() => {
                Err(PipelineError::NotFound(network_path))
            }
            Backend::DirectML => Ok(InferenceBinding::DirectMl {
                network_path,
                fp16: true,
            }),
            Backend::Ncnn => Ok(InferenceBinding::Ncnn {
                network_path,
                fp16: true,
            }),
            Backend::TensorRT => {
                let settings = step.settings_override().or(self.chain_settings);
                let engine = self
                    .ctx
                    .engine_for(&step.name, settings, clip.width, clip.height)?;
                Ok(InferenceBinding::Trt {
                    engine_path: engine.engine_path,
                    num_streams: self.num_streams,
                    io: engine.io,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_count() {
        assert_eq!(stream_count(1), 4);
        assert_eq!(stream_count(2), 2);
        assert_eq!(stream_count(3), 1);
        assert_eq!(stream_count(4), 1);
        assert_eq!(stream_count(9), 1);
        assert_eq!(stream_count(0), 4);
    }

    #[test]
    fn test_scale_to_target() {
        // 16:9 fits by height.
        assert_eq!(scale_to_target(1280, 720, 1920.0, 1080.0), (1920, 1080));
        // 4:3 fits by height.
        assert_eq!(scale_to_target(640, 480, 1920.0, 1080.0), (1440, 1080));
        // Scope is wider than 16:9, fits by width.
        assert_eq!(scale_to_target(1920, 800, 1920.0, 1080.0), (1920, 800));
        assert_eq!(scale_to_target(2400, 1000, 1920.0, 1080.0), (1920, 800));
    }

    #[test]
    fn test_scale_by_factor() {
        assert_eq!(scale_by_factor(1920, 50.0), 960);
        assert_eq!(scale_by_factor(1280, 100.0), 1280);
        assert_eq!(scale_by_factor(853, 75.0), 640);
    }
}
