//! GPU capability probing.

use std::path::PathBuf;
use std::process::Command;

/// Answers whether the inference device can compute in bf16.
pub trait HardwareProbe {
    fn supports_bf16(&self) -> bool;
}

/// Minimum CUDA compute capability major version with bf16 support.
pub const BF16_MIN_COMPUTE_MAJOR: u32 = 8;

/// Probes the first GPU through `nvidia-smi`.
pub struct NvidiaSmiProbe {
    nvidia_smi: Option<PathBuf>,
}

impl NvidiaSmiProbe {
    pub fn new(nvidia_smi: Option<PathBuf>) -> Self {
        Self { nvidia_smi }
    }

    fn compute_capability(&self) -> Option<String> {
        let program = self.nvidia_smi.as_ref()?;
        let output = Command::new(program)
            .args(["--query-gpu=compute_cap", "--format=csv,noheader"])
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        Some(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl HardwareProbe for NvidiaSmiProbe {
    fn supports_bf16(&self) -> bool {
        self.compute_capability()
            .and_then(|out| compute_major(&out))
            .map(|major| major >= BF16_MIN_COMPUTE_MAJOR)
            .unwrap_or(false)
    }
}

/// Major version from `nvidia-smi` compute capability output (`"8.6"`), first GPU only.
pub fn compute_major(output: &str) -> Option<u32> {
    output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())?
        .split('.')
        .next()?
        .trim()
        .parse()
        .ok()
}

/// A probe with a fixed answer.
pub struct FixedProbe(pub bool);

impl HardwareProbe for FixedProbe {
    fn supports_bf16(&self) -> bool {
        self.0
    }
}
