//! Runs the profile bound to a slot against one video.

use crate::chain_selector;
use crate::error::PipelineError;
use crate::frame_graph::FrameGraph;
use crate::models::{AppConfig, Chain, ClipState, LogLevel, Rational};
use crate::pipeline_assembler::PipelineAssembler;
use crate::run_context::RunContext;
use crate::trace::PipelineTrace;

pub struct ProfileRunner<'a> {
    ctx: &'a RunContext,
    config: &'a AppConfig,
}

impl<'a> ProfileRunner<'a> {
    pub fn new(ctx: &'a RunContext, config: &'a AppConfig) -> Self {
        Self { ctx, config }
    }

    /// Select a chain for `clip` and assemble it. Without a matching chain the clip is
    /// returned unchanged.
    pub fn run(
        &self,
        graph: &mut dyn FrameGraph,
        slot: u32,
        clip: &ClipState,
        container_fps: Rational,
        trace: &mut PipelineTrace,
    ) -> Result<ClipState, PipelineError> {
        let profile = self.config.profile(slot)?;

        trace.info(format!("Upscale Profile: {}", profile.display_name(slot)));
        trace.info(format!(
            "Original Video Resolution: {};    Original Video FPS: {:.3}",
            clip.resolution(),
            container_fps.as_f64()
        ));

        let Some(chain) =
            chain_selector::select(&profile.chains, clip.pixel_count(), container_fps)
        else {
            trace.info("No Chains Activated");
            self.ctx.reporter.send_log(
                LogLevel::Info,
                &format!(
                    "No chain in slot {} matches {} @ {:.3} fps, passing through",
                    slot,
                    clip.resolution(),
                    container_fps.as_f64()
                ),
            );
            return Ok(clip.clone());
        };
        let index = profile
            .chains
            .iter()
            .position(|c| std::ptr::eq(c, chain))
            .unwrap_or_default();

        trace.info(chain_summary(index, chain));
        let backend = self.config.backend_for(profile);
        self.ctx.reporter.send_log(
            LogLevel::Info,
            &format!(
                "Slot {} chain {} on {} ({} models)",
                slot,
                chain_label(index, chain),
                backend.as_str(),
                chain.models.len()
            ),
        );

        let output = PipelineAssembler::new(self.ctx).assemble(
            graph,
            clip,
            container_fps,
            chain,
            backend,
            trace,
        )?;

        trace.info(format!(
            "Final Video Resolution: {};    Final Video FPS: {:.3}",
            output.resolution(),
            output.fps.as_f64()
        ));
        Ok(output)
    }
}

/// Chain label: its name, or its 1-based position when unnamed.
fn chain_label(index: usize, chain: &Chain) -> String {
    if chain.name.trim().is_empty() {
        (index + 1).to_string()
    } else {
        chain.name.clone()
    }
}

fn chain_summary(index: usize, chain: &Chain) -> String {
    format!(
        "Active Upscale Chain: {};    Resolution Range: {} - {} px;    FPS Range: {} - {}",
        chain_label(index, chain),
        chain.min_px,
        chain.max_px,
        chain.min_fps,
        chain.max_fps
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_label() {
        let mut chain = Chain::accept_all("");
        assert_eq!(chain_label(1, &chain), "2");
        chain.name = "hd".to_string();
        assert_eq!(chain_label(1, &chain), "hd");
    }

    #[test]
    fn test_chain_summary() {
        let mut chain = Chain::accept_all("1");
        chain.max_px = 2_073_600;
        chain.max_fps = Rational::integer(31);
        assert_eq!(
            chain_summary(0, &chain),
            "Active Upscale Chain: 1;    Resolution Range: 0 - 2073600 px;    FPS Range: 0 - 31"
        );
    }
}
