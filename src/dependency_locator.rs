//! Locates the bundled backend (vspipe, ffmpeg, trtexec, Python, models).

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

/// Platform-specific dependency locator.
pub struct DependencyLocator {
    base_path: PathBuf,
    platform: Platform,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    WindowsX64,
    LinuxX64,
    LinuxArm64,
}

const PATH_SEPARATOR: &str = if cfg!(windows) { ";" } else { ":" };

impl DependencyLocator {
    /// Create a locator rooted at `backend_path`, or at the `deps` directory found above the
    /// executable when none is configured.
    pub fn new(backend_path: Option<&Path>) -> Result<Self> {
        let base_path = match backend_path {
            Some(path) => path.to_path_buf(),
            None => {
                let exe_path = env::current_exe().context("Failed to get executable path")?;
                Self::find_deps_directory(&exe_path)
            }
        };
        Ok(Self {
            base_path,
            platform: Self::detect_platform(),
        })
    }

    /// Find the deps directory by searching upward from the executable.
    fn find_deps_directory(exe_path: &Path) -> PathBuf {
        let platform = Self::detect_platform();
        let mut current = exe_path.parent();

        while let Some(dir) = current {
            // Require the platform subdirectory so Cargo's own `deps` is skipped.
            let deps_dir = dir.join("deps");
            if deps_dir.join(platform.suffix()).exists() {
                return deps_dir;
            }
            current = dir.parent();
        }

        PathBuf::from("deps")
    }

    fn detect_platform() -> Platform {
        if cfg!(windows) {
            Platform::WindowsX64
        } else if cfg!(target_arch = "aarch64") {
            Platform::LinuxArm64
        } else {
            Platform::LinuxX64
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Get the platform-specific deps directory.
    fn platform_dir(&self) -> PathBuf {
        self.base_path.join(self.platform.suffix())
    }

    /// Directory holding the `.onnx` models and their compiled engines.
    pub fn models_dir(&self) -> PathBuf {
        self.base_path.join("models")
    }

    /// Directory for the rotating log and the current-run trace.
    pub fn log_dir(&self) -> PathBuf {
        self.base_path.join("logs")
    }

    /// Get the path to vspipe executable.
    pub fn vspipe_path(&self) -> Result<PathBuf> {
        let vs_dir = self.platform_dir().join("vapoursynth");
        let candidates = if cfg!(windows) {
            vec![vs_dir.join("VSPipe.exe"), vs_dir.join("vspipe.exe")]
        } else {
            vec![vs_dir.join("vspipe")]
        };
        Self::bundled_or_system(&candidates, "vspipe")
    }

    /// Get the path to ffmpeg executable.
    pub fn ffmpeg_path(&self) -> Result<PathBuf> {
        let path = self.platform_dir().join("ffmpeg").join(exe_name("ffmpeg"));
        Self::bundled_or_system(&[path], "ffmpeg")
    }

    /// Get the path to the TensorRT engine builder.
    pub fn trtexec_path(&self) -> Result<PathBuf> {
        let path = self.vsmlrt_cuda_path().join(exe_name("trtexec"));
        Self::bundled_or_system(&[path], "trtexec")
    }

    /// Python interpreter used for model inspection.
    pub fn python_executable(&self) -> Result<PathBuf> {
        let candidates = match self.python_home() {
            Some(home) if cfg!(windows) => vec![home.join("python.exe")],
            Some(home) => vec![home.join("bin").join("python3"), home.join("bin").join("python")],
            None => Vec::new(),
        };
        Self::bundled_or_system(&candidates, if cfg!(windows) { "python" } else { "python3" })
    }

    /// `nvidia-smi`, when installed.
    pub fn nvidia_smi_path(&self) -> Option<PathBuf> {
        which::which("nvidia-smi").ok()
    }

    fn bundled_or_system(candidates: &[PathBuf], name: &str) -> Result<PathBuf> {
        if let Some(path) = candidates.iter().find(|p| p.exists()) {
            return Ok(path.clone());
        }

        // Try system PATH as last resort
        if let Ok(system_path) = which::which(name) {
            return Ok(system_path);
        }

        bail!("{} not found in {:?}", name, candidates)
    }

    /// Get the Python home directory, or None if Python is not bundled.
    pub fn python_home(&self) -> Option<PathBuf> {
        let python_dir = self.platform_dir().join("python");
        python_dir.exists().then_some(python_dir)
    }

    /// Get the Python path (bundled site-packages and the interpolation package).
    pub fn python_path(&self) -> String {
        let platform_dir = self.platform_dir();
        let mut paths = vec![platform_dir.join("python-packages")];

        if let Some(python_home) = self.python_home() {
            if cfg!(windows) {
                paths.push(python_home.join("Lib").join("site-packages"));
            } else {
                paths.push(python_home.join("lib").join("python3").join("site-packages"));
            }
        }

        join_paths(&paths)
    }

    /// Get the VapourSynth plugins directory.
    pub fn vapoursynth_plugin_path(&self) -> PathBuf {
        let vs_dir = self.platform_dir().join("vapoursynth");
        if cfg!(windows) {
            vs_dir.join("vs-plugins")
        } else {
            vs_dir.join("plugins")
        }
    }

    /// vs-mlrt CUDA runtime directory (TensorRT libraries and `trtexec`).
    pub fn vsmlrt_cuda_path(&self) -> PathBuf {
        self.vapoursynth_plugin_path().join("vsmlrt-cuda")
    }

    /// Get the bin directory (for PATH).
    pub fn bin_path(&self) -> String {
        let platform_dir = self.platform_dir();
        let mut paths = vec![
            platform_dir.join("ffmpeg"),
            platform_dir.join("vapoursynth"),
            self.vsmlrt_cuda_path(),
        ];
        if let Some(python_home) = self.python_home() {
            paths.push(if cfg!(windows) {
                python_home
            } else {
                python_home.join("bin")
            });
        }
        join_paths(&paths)
    }

    /// Build environment variables for vspipe, ffmpeg, trtexec and Python.
    pub fn build_environment(&self) -> HashMap<String, String> {
        let mut env = HashMap::new();

        env.insert("PYTHONNOUSERSITE".to_string(), "1".to_string());
        if let Some(python_home) = self.python_home() {
            env.insert(
                "PYTHONHOME".to_string(),
                python_home.to_string_lossy().to_string(),
            );
        }
        env.insert("PYTHONPATH".to_string(), self.python_path());

        env.insert(
            "VAPOURSYNTH_PLUGIN_PATH".to_string(),
            self.vapoursynth_plugin_path().to_string_lossy().to_string(),
        );

        let existing_path = env::var("PATH").unwrap_or_default();
        env.insert(
            "PATH".to_string(),
            format!("{}{}{}", self.bin_path(), PATH_SEPARATOR, existing_path),
        );

        if !cfg!(windows) {
            let runtime = self.vsmlrt_cuda_path().to_string_lossy().to_string();
            let library_path = match env::var("LD_LIBRARY_PATH") {
                Ok(existing) if !existing.is_empty() => format!("{}:{}", runtime, existing),
                _ => runtime,
            };
            env.insert("LD_LIBRARY_PATH".to_string(), library_path);
        }

        env
    }
}

impl Platform {
    /// Directory name for this platform.
    pub fn suffix(&self) -> &'static str {
        match self {
            Platform::WindowsX64 => "windows-x64",
            Platform::LinuxX64 => "linux-x64",
            Platform::LinuxArm64 => "linux-arm64",
        }
    }
}

fn exe_name(name: &str) -> String {
    if cfg!(windows) {
        format!("{}.exe", name)
    } else {
        name.to_string()
    }
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join(PATH_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_suffix() {
        assert_eq!(Platform::WindowsX64.suffix(), "windows-x64");
        assert_eq!(Platform::LinuxArm64.suffix(), "linux-arm64");
    }

    #[test]
    fn test_explicit_backend_path() {
        let dir = tempfile::tempdir().unwrap();
        let locator = DependencyLocator::new(Some(dir.path())).unwrap();
        assert_eq!(locator.base_path(), dir.path());
        assert_eq!(locator.models_dir(), dir.path().join("models"));
        assert!(locator.python_home().is_none());
    }

    #[test]
    fn test_environment() {
        let dir = tempfile::tempdir().unwrap();
        let locator = DependencyLocator::new(Some(dir.path())).unwrap();
        let env = locator.build_environment();
        assert_eq!(env.get("PYTHONNOUSERSITE").map(String::as_str), Some("1"));
        assert!(env["VAPOURSYNTH_PLUGIN_PATH"].starts_with(&*dir.path().to_string_lossy()));
        assert!(env["PATH"].contains("vsmlrt-cuda"));
    }

    #[test]
    fn test_bundled_binary_preferred() {
        let dir = tempfile::tempdir().unwrap();
        let locator = DependencyLocator::new(Some(dir.path())).unwrap();
        let ffmpeg_dir = dir
            .path()
            .join(DependencyLocator::detect_platform().suffix())
            .join("ffmpeg");
        std::fs::create_dir_all(&ffmpeg_dir).unwrap();
        let bundled = ffmpeg_dir.join(exe_name("ffmpeg"));
        std::fs::write(&bundled, b"").unwrap();

        assert_eq!(locator.ffmpeg_path().unwrap(), bundled);
    }
}
