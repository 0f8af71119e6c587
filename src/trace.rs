//! Per-run record of what the pipeline did.

use std::fs;
use std::io;
use std::path::Path;

/// Summary lines plus one line per applied step, in application order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineTrace {
    info: Vec<String>,
    steps: Vec<String>,
}

impl PipelineTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn info(&mut self, line: impl Into<String>) {
        self.info.push(line.into());
    }

    pub fn step(&mut self, line: impl Into<String>) {
        self.steps.push(line.into());
    }

    pub fn extend_steps<I: IntoIterator<Item = String>>(&mut self, lines: I) {
        self.steps.extend(lines);
    }

    pub fn info_lines(&self) -> &[String] {
        &self.info
    }

    pub fn steps(&self) -> &[String] {
        &self.steps
    }

    /// Info lines, a blank line, then numbered steps.
    pub fn render(&self) -> String {
        let steps: Vec<String> = self
            .steps
            .iter()
            .enumerate()
            .map(|(i, step)| format!("{}. {}", i + 1, step))
            .collect();
        format!("{}\n\n{}", self.info.join("\n"), steps.join("\n"))
    }

    /// Every line, info first, as sent to the GUI.
    pub fn lines(&self) -> Vec<String> {
        self.info.iter().chain(self.steps.iter()).cloned().collect()
    }

    /// Overwrite `path` with the rendered trace.
    pub fn write_to(&self, path: &Path) -> io::Result<()> {
        fs::write(path, self.render())
    }

    /// Empty the current-run file at the start of a run.
    pub fn truncate(path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, "")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_layout() {
        let mut trace = PipelineTrace::new();
        trace.info("Upscale Profile: 1. encode");
        trace.info("Active Upscale Chain: 1");
        trace.step("Applied Model: A;    New Video Resolution: 2560x1440");
        trace.step("Applied Model: B;    New Video Resolution: 5120x2880");

        assert_eq!(
            trace.render(),
            "Upscale Profile: 1. encode\nActive Upscale Chain: 1\n\n\
             1. Applied Model: A;    New Video Resolution: 2560x1440\n\
             2. Applied Model: B;    New Video Resolution: 5120x2880"
        );
    }

    #[test]
    fn test_write_and_truncate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("current.log");

        let mut trace = PipelineTrace::new();
        trace.info("No Chains Activated");
        trace.write_to(&path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "No Chains Activated\n\n");

        PipelineTrace::truncate(&path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "");
    }
}
