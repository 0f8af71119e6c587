//! State owned by a single run: collaborators, engine cache and probe results.

use std::cell::OnceCell;
use std::path::PathBuf;

use crate::engine_cache::{EngineBuilder, EngineCache};
use crate::engine_settings::{
    build_settings, hint_for_clip, input_io_format, substitute_resolution, EngineIo,
    EngineSettingsResolver, ModelInspector,
};
use crate::error::PipelineError;
use crate::hardware::HardwareProbe;
use crate::models::LogLevel;
use crate::progress_reporter::ProgressReporter;

/// Engine selected for one model application.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineChoice {
    pub engine_path: PathBuf,
    pub settings: String,
    pub io: Option<EngineIo>,
}

pub struct RunContext {
    pub reporter: ProgressReporter,
    pub cache: EngineCache,
    resolver: EngineSettingsResolver,
    builder: Box<dyn EngineBuilder>,
    probe: Box<dyn HardwareProbe>,
    bf16: OnceCell<bool>,
}

impl RunContext {
    pub fn new(
        reporter: ProgressReporter,
        cache: EngineCache,
        inspector: Box<dyn ModelInspector>,
        builder: Box<dyn EngineBuilder>,
        probe: Box<dyn HardwareProbe>,
    ) -> Self {
        Self {
            reporter,
            cache,
            resolver: EngineSettingsResolver::new(inspector),
            builder,
            probe,
            bf16: OnceCell::new(),
        }
    }

    /// bf16 support, probed on first use only.
    pub fn bf16_supported(&self) -> bool {
        *self.bf16.get_or_init(|| {
            let supported = self.probe.supports_bf16();
            self.reporter.send_log(
                LogLevel::Debug,
                &format!("GPU bf16 support: {}", supported),
            );
            supported
        })
    }

    /// Resolve settings for a model at the given clip size and fetch or build its engine.
    ///
    /// An explicit `settings_override` replaces the automatic policy.
    pub fn engine_for(
        &self,
        model_name: &str,
        settings_override: Option<&str>,
        width: u32,
        height: u32,
    ) -> Result<EngineChoice, PipelineError> {
        let settings = match settings_override {
            Some(settings) => settings.to_string(),
            None => {
                let hint = hint_for_clip(
                    self.resolver.resolve(&self.cache.model_path(model_name))?,
                    width,
                    height,
                );
                self.reporter.send_log(
                    LogLevel::Debug,
                    &format!(
                        "{}: shape mode {:?}, declared precision {}",
                        model_name,
                        hint.shape_mode,
                        hint.declared_precision.as_str()
                    ),
                );
                build_settings(&hint, self.bf16_supported())
            }
        };
        let settings = substitute_resolution(&settings, width, height);

        let engine_path = self
            .cache
            .get_or_build(model_name, &settings, self.builder.as_ref())?;

        Ok(EngineChoice {
            engine_path,
            io: input_io_format(&settings),
            settings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ElementType, ModelDescription, TensorInfo};
    use std::cell::Cell;
    use std::io;
    use std::path::Path;
    use std::rc::Rc;

    struct DynamicFp32;

    impl ModelInspector for DynamicFp32 {
        fn inspect(&self, _: &Path) -> Result<ModelDescription, PipelineError> {
            Ok(ModelDescription {
                inputs: vec![TensorInfo {
                    name: "input".to_string(),
                    dims: vec![1, 3, 0, 0],
                    elem_type: ElementType::Float,
                }],
                ..Default::default()
            })
        }
    }

    struct WritingBuilder;

    impl EngineBuilder for WritingBuilder {
        fn build(&self, _: &Path, _: &str, target: &Path) -> io::Result<()> {
            std::fs::write(target, b"engine")
        }
    }

    struct CountingProbe(Rc<Cell<usize>>);

    impl HardwareProbe for CountingProbe {
        fn supports_bf16(&self) -> bool {
            self.0.set(self.0.get() + 1);
            true
        }
    }

    fn context(dir: &Path, probes: Rc<Cell<usize>>) -> RunContext {
        std::fs::write(dir.join("A.onnx"), b"onnx").unwrap();
        let reporter = ProgressReporter::silent();
        RunContext::new(
            reporter.clone(),
            EngineCache::new(dir.to_path_buf(), reporter),
            Box::new(DynamicFp32),
            Box::new(WritingBuilder),
            Box::new(CountingProbe(probes)),
        )
    }

    #[test]
    fn test_probe_runs_once() {
        let dir = tempfile::tempdir().unwrap();
        let probes = Rc::new(Cell::new(0));
        let ctx = context(dir.path(), probes.clone());

        let first = ctx.engine_for("A", None, 1280, 720).unwrap();
        let second = ctx.engine_for("A", None, 1920, 1080).unwrap();
        assert_eq!(probes.get(), 1);
        assert_eq!(first, second);
        assert_eq!(first.io, Some(EngineIo::Fp32));
        assert!(first.settings.starts_with("--bf16"));
    }

    #[test]
    fn test_override_substitutes_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let probes = Rc::new(Cell::new(0));
        let ctx = context(dir.path(), probes.clone());

        let choice = ctx
            .engine_for("A", Some("--fp16 --optShapes=input:%video_resolution%"), 1280, 720)
            .unwrap();
        assert_eq!(choice.settings, "--fp16 --optShapes=input:1x3x720x1280");
        assert_eq!(choice.io, None);
        assert_eq!(probes.get(), 0);
    }
}
