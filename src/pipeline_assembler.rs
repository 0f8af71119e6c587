//! Turns a selected chain into frame-graph stages.

use crate::error::PipelineError;
use crate::frame_graph::{FrameGraph, InterpolationRequest, ResizeRequest};
use crate::models::{Backend, Chain, ClipState, ColorRange, Rational};
use crate::run_context::RunContext;
use crate::stage_builder::{scale_by_factor, scale_to_target, StageBuilder};
use crate::trace::PipelineTrace;

/// Matrix names that carry no information.
const UNSPECIFIED_MATRICES: [&str; 3] = ["unknown", "unspec", "2"];

/// Matrix assumed from the frame height when metadata has none.
pub fn default_matrix(height: u32) -> &'static str {
    if height < 720 {
        "170m"
    } else {
        "709"
    }
}

/// Matrix declared by the source, if it is meaningful.
fn metadata_matrix(clip: &ClipState) -> Option<&str> {
    clip.matrix
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty() && !UNSPECIFIED_MATRICES.contains(&m.to_lowercase().as_str()))
}

pub struct PipelineAssembler<'a> {
    ctx: &'a RunContext,
}

impl<'a> PipelineAssembler<'a> {
    pub fn new(ctx: &'a RunContext) -> Self {
        Self { ctx }
    }

    /// Add the chain's stages to `graph` and return the final clip.
    pub fn assemble(
        &self,
        graph: &mut dyn FrameGraph,
        clip: &ClipState,
        container_fps: Rational,
        chain: &Chain,
        backend: Backend,
        trace: &mut PipelineTrace,
    ) -> Result<ClipState, PipelineError> {
        let declared_matrix = metadata_matrix(clip);
        let matrix_in = declared_matrix.unwrap_or_else(|| default_matrix(clip.height));

        let stages = StageBuilder::new(
            self.ctx,
            backend,
            chain.models.len(),
            matrix_in,
            chain.engine_settings_override(),
        );

        let mut current = clip.clone();
        for step in &chain.models {
            let (next, lines) = stages.build_upscale_stage(graph, &current, step)?;
            trace.extend_steps(lines);
            current = next;
        }

        current = self.final_resize(graph, &current, chain, trace)?;

        if !chain.models.is_empty() {
            let matrix = declared_matrix
                .map(str::to_string)
                .unwrap_or_else(|| default_matrix(current.height).to_string());
            let restore = ResizeRequest {
                format: Some(clip.format.output_format()),
                matrix: Some(matrix),
                range: (clip.color_range == Some(ColorRange::Limited))
                    .then_some(ColorRange::Limited),
                ..ResizeRequest::to_size(current.width, current.height)
            };
            current = graph.resize(&current, &restore)?;
        }

        if let Some(interp) = &chain.interpolation {
            let request = InterpolationRequest {
                model: interp.model.clone(),
                fps_in: container_fps,
                factor_numerator: interp.factor_numerator,
                factor_denominator: interp.factor_denominator,
                ensemble: interp.ensemble,
                scene_detect_threshold: interp.scene_detect_threshold,
                tensorrt: backend == Backend::TensorRT,
            };
            current = graph.interpolate(&current, &request)?;
            trace.step(format!(
                "Applied RIFE Interpolation;    New Video FPS: {:.3}",
                current.fps.as_f64()
            ));
        }

        Ok(current)
    }

    fn final_resize(
        &self,
        graph: &mut dyn FrameGraph,
        clip: &ClipState,
        chain: &Chain,
        trace: &mut PipelineTrace,
    ) -> Result<ClipState, PipelineError> {
        let target_height = chain.final_resize_height;
        if target_height != 0 && target_height != clip.height {
            let target_width = (target_height as f64 * clip.width as f64 / clip.height as f64).round();
            let (width, height) =
                scale_to_target(clip.width, clip.height, target_width, target_height as f64);
            let resized = graph.resize(clip, &ResizeRequest::to_size(width, height))?;
            trace.step(format!(
                "Applied Final Resize Height: {}px;    New Video Resolution: {}",
                target_height,
                resized.resolution()
            ));
            return Ok(resized);
        }

        let factor = chain.final_resize_factor;
        if factor != 100.0 {
            let request = ResizeRequest::to_size(
                scale_by_factor(clip.width, factor),
                scale_by_factor(clip.height, factor),
            );
            let resized = graph.resize(clip, &request)?;
            trace.step(format!(
                "Applied Final Resize Factor: {}%;    New Video Resolution: {}",
                factor,
                resized.resolution()
            ));
            return Ok(resized);
        }

        Ok(clip.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NodeRef;

    fn clip(matrix: Option<&str>) -> ClipState {
        ClipState {
            node: NodeRef(0),
            width: 720,
            height: 480,
            format: crate::models::PixelFormat::Yuv420P8,
            fps: Rational::integer(30),
            color_range: None,
            matrix: matrix.map(String::from),
        }
    }

    #[test]
    fn test_default_matrix() {
        assert_eq!(default_matrix(480), "170m");
        assert_eq!(default_matrix(719), "170m");
        assert_eq!(default_matrix(720), "709");
        assert_eq!(default_matrix(2160), "709");
    }

    #[test]
    fn test_metadata_matrix() {
        assert_eq!(metadata_matrix(&clip(Some("709"))), Some("709"));
        assert_eq!(metadata_matrix(&clip(Some("Unknown"))), None);
        assert_eq!(metadata_matrix(&clip(Some(""))), None);
        assert_eq!(metadata_matrix(&clip(None)), None);
    }
}
