//! VapourSynth script generator.
//!
//! Wraps the statements recorded by [`ScriptGraph`] in a template that loads the source and
//! sets the output.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::frame_graph::{py_str, ScriptGraph};
use crate::models::{ClipState, VideoJob};

const TEMPLATE_NAME: &str = "upscale_template.vpy";

/// Generates VapourSynth scripts from a template.
pub struct ScriptGenerator {
    template: String,
    plugin_path: Option<PathBuf>,
}

impl ScriptGenerator {
    /// Create a new script generator, loading the template.
    pub fn new() -> Result<Self> {
        Ok(Self::with_template(Self::load_template()?))
    }

    pub fn with_template(template: String) -> Self {
        Self {
            template,
            plugin_path: None,
        }
    }

    /// Load plugins from this directory instead of relying on autoloading.
    pub fn with_plugin_path(mut self, plugin_path: PathBuf) -> Self {
        self.plugin_path = Some(plugin_path);
        self
    }

    /// Render the script for a job whose stages are recorded in `graph`.
    pub fn render(&self, job: &VideoJob, graph: &ScriptGraph, output: &ClipState) -> String {
        let mut script = self.template.clone();

        script = script.replace("{{INPUT_PATH}}", &py_str(&job.input_path));
        script = script.replace("{{FPS_NUM}}", &job.video.fps_num.to_string());
        script = script.replace("{{FPS_DEN}}", &job.video.fps_den.to_string());

        let plugin_path = self
            .plugin_path
            .as_ref()
            .map(|p| py_str(&p.to_string_lossy()));
        script = process_optional_string("PLUGIN_PATH", plugin_path.as_deref(), script);
        script = process_block("RIFE", graph.uses_interpolation(), script);

        script.replace("{{BODY}}", &graph.render(output))
    }

    /// Generate a .vpy script file for the given job.
    /// Returns the path to the generated script.
    pub fn generate(&self, job: &VideoJob, graph: &ScriptGraph, output: &ClipState) -> Result<PathBuf> {
        let script = self.render(job, graph, output);

        let script_path = env::temp_dir().join(format!("{}.vpy", job.id));
        fs::write(&script_path, &script)
            .with_context(|| format!("Failed to write script to {:?}", script_path))?;

        Ok(script_path)
    }

    /// Load the template from disk, falling back to the embedded copy.
    fn load_template() -> Result<String> {
        let exe_path = env::current_exe()?;
        let exe_dir = exe_path.parent().unwrap_or(Path::new("."));

        let search_paths = [
            // Next to executable
            exe_dir.join("templates").join(TEMPLATE_NAME),
            exe_dir.join("Templates").join(TEMPLATE_NAME),
            // Development: target/release -> templates
            exe_dir.join("..").join("..").join("templates").join(TEMPLATE_NAME),
            // Relative to current dir
            PathBuf::from("templates").join(TEMPLATE_NAME),
        ];

        for path in &search_paths {
            if path.exists() {
                if let Ok(content) = fs::read_to_string(path) {
                    eprintln!("Loaded template from: {:?}", path);
                    return Ok(content);
                }
            }
        }

        eprintln!("Using embedded fallback template");
        Ok(Self::embedded_template())
    }

    /// Embedded fallback template.
    pub fn embedded_template() -> String {
        r#"import sys
import vapoursynth as vs
{{#RIFE}}
import rife_cuda
{{/RIFE}}

core = vs.core
core.num_threads = 4
{{#PLUGIN_PATH}}
core.std.LoadAllPlugins(path={{PLUGIN_PATH}})
{{/PLUGIN_PATH}}

clip = core.ffms2.Source(source={{INPUT_PATH}})
clip = core.std.AssumeFPS(clip, fpsnum={{FPS_NUM}}, fpsden={{FPS_DEN}})

total_frames = clip.num_frames
print(f"INPUT_INFO:frames={total_frames},fps_num={{FPS_NUM}},fps_den={{FPS_DEN}}", file=sys.stderr)

{{BODY}}

clip.set_output()
"#
        .to_string()
    }
}

/// Keep a block's contents when `enabled`, drop the whole block otherwise.
fn process_block(name: &str, enabled: bool, mut script: String) -> String {
    let start_tag = format!("{{{{#{}}}}}", name);
    let end_tag = format!("{{{{/{}}}}}", name);

    if enabled {
        script = remove_tag_line(&start_tag, script);
        script = remove_tag_line(&end_tag, script);
    } else {
        script = remove_block(&start_tag, &end_tag, script);
    }
    script
}

/// Process an optional string parameter.
fn process_optional_string(name: &str, value: Option<&str>, mut script: String) -> String {
    let start_tag = format!("{{{{#{}}}}}", name);
    let end_tag = format!("{{{{/{}}}}}", name);
    let placeholder = format!("{{{{{}}}}}", name);

    if let Some(val) = value {
        script = remove_tag_line(&start_tag, script);
        script = remove_tag_line(&end_tag, script);
        script = script.replace(&placeholder, val);
    } else {
        script = remove_block(&start_tag, &end_tag, script);
    }
    script
}

/// Remove a tag, and its newline when the tag sits alone on a line.
fn remove_tag_line(tag: &str, script: String) -> String {
    let own_line = format!("{}\n", tag);
    script.replace(&own_line, "").replace(tag, "")
}

/// Remove a block from start tag to end tag (including the line).
fn remove_block(start_tag: &str, end_tag: &str, mut script: String) -> String {
    while let Some(start_pos) = script.find(start_tag) {
        if let Some(end_offset) = script[start_pos..].find(end_tag) {
            let end_pos = start_pos + end_offset + end_tag.len();
            let remove_end = if script[end_pos..].starts_with('\n') {
                end_pos + 1
            } else {
                end_pos
            };
            script = format!("{}{}", &script[..start_pos], &script[remove_end..]);
        } else {
            break;
        }
    }
    script
}
