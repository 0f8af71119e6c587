//! On-disk cache of compiled TensorRT engines.
//!
//! Engines are keyed by model name and a checksum of the settings string. They are built
//! lazily and never invalidated.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::error::PipelineError;
use crate::models::LogLevel;
use crate::progress_reporter::ProgressReporter;

/// Compiles a model file into an engine at `target`.
///
/// Best effort: the cache only trusts the presence of `target` afterwards.
pub trait EngineBuilder {
    fn build(&self, model_path: &Path, settings: &str, target: &Path) -> io::Result<()>;
}

/// 32-bit checksum of a settings string, as 8 lowercase hex digits.
pub fn checksum32(settings: &str) -> String {
    format!("{:08x}", crc32fast::hash(settings.as_bytes()))
}

/// Engine file name for a model and settings string.
pub fn cache_key(model_name: &str, settings: &str) -> String {
    format!("{}.{}.engine", model_name, checksum32(settings))
}

pub struct EngineCache {
    models_dir: PathBuf,
    reporter: ProgressReporter,
}

impl EngineCache {
    /// Cache whose engines sit next to the model files.
    pub fn new(models_dir: PathBuf, reporter: ProgressReporter) -> Self {
        Self {
            models_dir,
            reporter,
        }
    }

    /// Path of the ONNX file for a model name.
    pub fn model_path(&self, model_name: &str) -> PathBuf {
        self.models_dir.join(format!("{}.onnx", model_name))
    }

    /// Path the engine for this model and settings string lives at.
    pub fn engine_path(&self, model_name: &str, settings: &str) -> PathBuf {
        self.models_dir.join(cache_key(model_name, settings))
    }

    /// Return the cached engine, building it first on a miss.
    pub fn get_or_build(
        &self,
        model_name: &str,
        settings: &str,
        builder: &dyn EngineBuilder,
    ) -> Result<PathBuf, PipelineError> {
        let engine_path = self.engine_path(model_name, settings);
        if engine_path.exists() {
            return Ok(engine_path);
        }

        let model_path = self.model_path(model_name);
        if !model_path.is_file() {
            return Err(PipelineError::NotFound(model_path));
        }

        self.reporter.send_log(
            LogLevel::Info,
            &format!(
                "Building TensorRT engine for {} ({}), this may take several minutes",
                model_name,
                engine_path.display()
            ),
        );
        self.reporter
            .send_log(LogLevel::Debug, &format!("Engine settings: {}", settings));

        if let Err(e) = builder.build(&model_path, settings, &engine_path) {
            self.reporter.send_log(
                LogLevel::Warning,
                &format!("Engine builder for {} failed: {}", model_name, e),
            );
        }

        if !engine_path.exists() {
            return Err(PipelineError::BuildFailure {
                model: model_name.to_string(),
                engine_path,
            });
        }

        Ok(engine_path)
    }
}

/// Builds engines with NVIDIA's `trtexec`.
pub struct TrtexecBuilder {
    trtexec: PathBuf,
    env: HashMap<String, String>,
}

impl TrtexecBuilder {
    pub fn new(trtexec: PathBuf, env: HashMap<String, String>) -> Self {
        Self { trtexec, env }
    }

    fn command_args(model_path: &Path, settings: &str, target: &Path) -> Vec<String> {
        let mut args = vec![
            format!("--onnx={}", model_path.display()),
            format!("--saveEngine={}", target.display()),
        ];
        args.extend(settings.split_whitespace().map(String::from));
        args
    }
}

impl EngineBuilder for TrtexecBuilder {
    fn build(&self, model_path: &Path, settings: &str, target: &Path) -> io::Result<()> {
        let output = Command::new(&self.trtexec)
            .args(Self::command_args(model_path, settings, target))
            .envs(&self.env)
            .stdin(Stdio::null())
            .output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!(
                    "trtexec exited with code {}: {}",
                    output.status.code().unwrap_or(-1),
                    tail.into_iter().rev().collect::<Vec<_>>().join(" | ")
                ),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct CountingBuilder {
        calls: Cell<usize>,
        write: bool,
    }

    impl EngineBuilder for CountingBuilder {
        fn build(&self, _model: &Path, _settings: &str, target: &Path) -> io::Result<()> {
            self.calls.set(self.calls.get() + 1);
            if self.write {
                std::fs::write(target, b"engine")?;
            }
            Ok(())
        }
    }

    fn cache_with_model(name: &str) -> (tempfile::TempDir, EngineCache) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(format!("{}.onnx", name)), b"onnx").unwrap();
        let cache = EngineCache::new(dir.path().to_path_buf(), ProgressReporter::silent());
        (dir, cache)
    }

    #[test]
    fn test_checksum_format() {
        assert_eq!(checksum32(""), "00000000");
        assert_eq!(checksum32("123456789"), "cbf43926");
        assert_eq!(cache_key("A", "123456789"), "A.cbf43926.engine");
    }

    #[test]
    fn test_distinct_settings_distinct_paths() {
        let (_dir, cache) = cache_with_model("A");
        let fp16 = cache.engine_path("A", "--fp16");
        let bf16 = cache.engine_path("A", "--bf16");
        assert_ne!(fp16, bf16);
        assert_eq!(fp16, cache.engine_path("A", "--fp16"));
    }

    #[test]
    fn test_hit_skips_builder() {
        let (_dir, cache) = cache_with_model("A");
        let builder = CountingBuilder {
            calls: Cell::new(0),
            write: true,
        };

        let first = cache.get_or_build("A", "--fp16", &builder).unwrap();
        assert_eq!(builder.calls.get(), 1);
        let second = cache.get_or_build("A", "--fp16", &builder).unwrap();
        assert_eq!(builder.calls.get(), 1);
        assert_eq!(first, second);
    }

    #[test]
    fn test_missing_artifact_is_build_failure() {
        let (_dir, cache) = cache_with_model("A");
        let builder = CountingBuilder {
            calls: Cell::new(0),
            write: false,
        };
        let err = cache.get_or_build("A", "--fp16", &builder).unwrap_err();
        assert!(matches!(err, PipelineError::BuildFailure { .. }));
        assert_eq!(builder.calls.get(), 1);
    }

    #[test]
    fn test_missing_model_is_not_found() {
        let (_dir, cache) = cache_with_model("A");
        let builder = CountingBuilder {
            calls: Cell::new(0),
            write: true,
        };
        let err = cache.get_or_build("B", "--fp16", &builder).unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(_)));
        assert_eq!(builder.calls.get(), 0);
    }

    #[test]
    fn test_trtexec_args() {
        let args = TrtexecBuilder::command_args(
            Path::new("/m/A.onnx"),
            "--fp16  --skipInference",
            Path::new("/m/A.0.engine"),
        );
        assert_eq!(
            args,
            vec![
                "--onnx=/m/A.onnx",
                "--saveEngine=/m/A.0.engine",
                "--fp16",
                "--skipInference"
            ]
        );
    }
}
