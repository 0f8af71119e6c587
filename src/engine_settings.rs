//! Engine settings: model inspection and the TensorRT settings-string policy.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::PipelineError;
use crate::models::{
    DeclaredPrecision, ElementType, EngineSettingsHint, ModelDescription, ShapeMode,
};

/// Placeholder replaced with the clip's `1x3x{height}x{width}` shape.
pub const VIDEO_RESOLUTION_TOKEN: &str = "%video_resolution%";

/// Ops that break dynamic-shape compilation.
const SHAPE_SENSITIVE_OPS: [&str; 2] = ["Transpose", "Reshape"];

const TACTIC_FLAGS: &str = "--tacticSources=-CUDNN,-CUBLAS,-CUBLAS_LT --skipInference";
const DYNAMIC_SHAPES: &str =
    "--minShapes=input:1x3x8x8 --optShapes=input:1x3x1080x1920 --maxShapes=input:1x3x1080x1920";
const DYNAMIC_MAX_WIDTH: u32 = 1920;
const DYNAMIC_MAX_HEIGHT: u32 = 1080;

/// Reads the declared structure of a model file.
pub trait ModelInspector {
    fn inspect(&self, model_path: &Path) -> Result<ModelDescription, PipelineError>;
}

/// Derives an [`EngineSettingsHint`] from a model file.
pub struct EngineSettingsResolver {
    inspector: Box<dyn ModelInspector>,
}

impl EngineSettingsResolver {
    pub fn new(inspector: Box<dyn ModelInspector>) -> Self {
        Self { inspector }
    }

    pub fn resolve(&self, model_path: &Path) -> Result<EngineSettingsHint, PipelineError> {
        if !model_path.is_file() {
            return Err(PipelineError::NotFound(model_path.to_path_buf()));
        }
        let description = self.inspector.inspect(model_path)?;
        Ok(classify(&description))
    }
}

/// Classify a model description into shape mode and declared precision.
pub fn classify(description: &ModelDescription) -> EngineSettingsHint {
    let shape_mode = if description.inputs.iter().all(|t| t.is_fully_static()) {
        ShapeMode::StaticFixed
    } else if SHAPE_SENSITIVE_OPS
        .iter()
        .any(|op| description.op_types.contains(*op))
    {
        ShapeMode::StaticComputed
    } else {
        ShapeMode::Dynamic
    };

    EngineSettingsHint {
        shape_mode,
        declared_precision: declared_precision(description),
    }
}

fn declared_precision(description: &ModelDescription) -> DeclaredPrecision {
    let types = description
        .inputs
        .iter()
        .chain(description.outputs.iter())
        .map(|t| t.elem_type)
        .chain(description.initializer_types.iter().copied());

    let (mut fp16, mut fp32) = (0usize, 0usize);
    for elem_type in types {
        match elem_type {
            ElementType::Float16 => fp16 += 1,
            ElementType::Float => fp32 += 1,
            _ => {}
        }
    }

    match (fp16 > 0, fp32 > 0) {
        (true, false) => DeclaredPrecision::Fp16,
        (false, true) => DeclaredPrecision::Fp32,
        (true, true) => DeclaredPrecision::Mixed,
        (false, false) => DeclaredPrecision::Unknown,
    }
}

/// Whether a clip fits the shape range of a dynamic engine.
pub fn fits_dynamic_shapes(width: u32, height: u32) -> bool {
    width <= DYNAMIC_MAX_WIDTH && height <= DYNAMIC_MAX_HEIGHT
}

/// Narrow a hint to the clip it will run on: clips beyond the dynamic range get an engine
/// compiled for their own resolution.
pub fn hint_for_clip(hint: EngineSettingsHint, width: u32, height: u32) -> EngineSettingsHint {
    match hint.shape_mode {
        ShapeMode::Dynamic if !fits_dynamic_shapes(width, height) => EngineSettingsHint {
            shape_mode: ShapeMode::StaticComputed,
            ..hint
        },
        _ => hint,
    }
}

/// bf16 compute is used when the device supports it and the model is not already fp16.
pub fn use_bf16(hint: &EngineSettingsHint, hardware_bf16: bool) -> bool {
    hardware_bf16 && hint.declared_precision != DeclaredPrecision::Fp16
}

/// Build the automatic settings string for a model.
///
/// Shapes computed per clip are left as [`VIDEO_RESOLUTION_TOKEN`]; callers run the result
/// through [`substitute_resolution`].
pub fn build_settings(hint: &EngineSettingsHint, hardware_bf16: bool) -> String {
    let (compute, io) = if use_bf16(hint, hardware_bf16) {
        ("--bf16", "--inputIOFormats=fp32:chw --outputIOFormats=fp32:chw")
    } else {
        ("--fp16", "--inputIOFormats=fp16:chw --outputIOFormats=fp16:chw")
    };

    match hint.shape_mode {
        ShapeMode::StaticFixed => format!("{} {} {}", compute, io, TACTIC_FLAGS),
        ShapeMode::StaticComputed => format!(
            "{} --optShapes=input:{} {} {}",
            compute, VIDEO_RESOLUTION_TOKEN, io, TACTIC_FLAGS
        ),
        ShapeMode::Dynamic => format!("{} {} {} {}", compute, DYNAMIC_SHAPES, io, TACTIC_FLAGS),
    }
}

/// Replace the resolution placeholder with `1x3x{height}x{width}`.
pub fn substitute_resolution(settings: &str, width: u32, height: u32) -> String {
    settings.replace(
        VIDEO_RESOLUTION_TOKEN,
        &format!("1x3x{}x{}", height, width),
    )
}

/// IO tensor precision an engine was built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineIo {
    Fp16,
    Fp32,
}

/// IO precision declared by `--inputIOFormats`, if any.
pub fn input_io_format(settings: &str) -> Option<EngineIo> {
    settings
        .split_whitespace()
        .find_map(|arg| arg.strip_prefix("--inputIOFormats="))
        .and_then(|formats| match formats.split(':').next() {
            Some("fp16") => Some(EngineIo::Fp16),
            Some("fp32") => Some(EngineIo::Fp32),
            _ => None,
        })
}

const INSPECT_SCRIPT: &str = r#"
import json, sys
import onnx
model = onnx.load(sys.argv[1], load_external_data=False)
name = onnx.TensorProto.DataType.Name
def tensor(value):
    tt = value.type.tensor_type
    return {"name": value.name, "dims": [d.dim_value for d in tt.shape.dim], "elemType": name(tt.elem_type)}
print(json.dumps({
    "inputs": [tensor(v) for v in model.graph.input],
    "outputs": [tensor(v) for v in model.graph.output],
    "initializerTypes": [name(i.data_type) for i in model.graph.initializer],
    "opTypes": sorted({n.op_type for n in model.graph.node}),
}))
"#;

/// Inspects ONNX files with the bundled Python's `onnx` package.
pub struct PythonOnnxInspector {
    python: PathBuf,
    env: HashMap<String, String>,
}

impl PythonOnnxInspector {
    pub fn new(python: PathBuf, env: HashMap<String, String>) -> Self {
        Self { python, env }
    }
}

impl ModelInspector for PythonOnnxInspector {
    fn inspect(&self, model_path: &Path) -> Result<ModelDescription, PipelineError> {
        let failed = |message: String| PipelineError::Inspection {
            path: model_path.to_path_buf(),
            message,
        };

        let output = Command::new(&self.python)
            .arg("-c")
            .arg(INSPECT_SCRIPT)
            .arg(model_path)
            .envs(&self.env)
            .output()
            .map_err(|e| failed(format!("failed to start {:?}: {}", self.python, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(failed(format!(
                "python exited with code {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }

        serde_json::from_slice(&output.stdout).map_err(|e| failed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TensorInfo;

    fn tensor(dims: &[i64], elem_type: ElementType) -> TensorInfo {
        TensorInfo {
            name: "input".to_string(),
            dims: dims.to_vec(),
            elem_type,
        }
    }

    fn description(dims: &[i64], ops: &[&str], types: &[ElementType]) -> ModelDescription {
        ModelDescription {
            inputs: vec![tensor(dims, types[0])],
            outputs: vec![tensor(dims, types[0])],
            initializer_types: types[1..].to_vec(),
            op_types: ops.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_shape_mode_classification() {
        let fixed = description(&[1, 3, 256, 256], &["Reshape"], &[ElementType::Float]);
        assert_eq!(classify(&fixed).shape_mode, ShapeMode::StaticFixed);

        let computed = description(&[1, 3, 0, 0], &["Conv", "Transpose"], &[ElementType::Float]);
        assert_eq!(classify(&computed).shape_mode, ShapeMode::StaticComputed);

        let dynamic = description(&[1, 3, -1, -1], &["Conv", "DepthToSpace"], &[ElementType::Float]);
        assert_eq!(classify(&dynamic).shape_mode, ShapeMode::Dynamic);
    }

    #[test]
    fn test_precision_tally() {
        let fp16 = description(&[1, 3, 0, 0], &[], &[ElementType::Float16, ElementType::Float16]);
        assert_eq!(classify(&fp16).declared_precision, DeclaredPrecision::Fp16);

        let fp32 = description(&[1, 3, 0, 0], &[], &[ElementType::Float, ElementType::Other]);
        assert_eq!(classify(&fp32).declared_precision, DeclaredPrecision::Fp32);

        let mixed = description(&[1, 3, 0, 0], &[], &[ElementType::Float, ElementType::Float16]);
        assert_eq!(classify(&mixed).declared_precision, DeclaredPrecision::Mixed);

        let unknown = description(&[1, 3, 0, 0], &[], &[ElementType::Bfloat16]);
        assert_eq!(classify(&unknown).declared_precision, DeclaredPrecision::Unknown);
    }

    #[test]
    fn test_settings_policy() {
        let hint = EngineSettingsHint {
            shape_mode: ShapeMode::Dynamic,
            declared_precision: DeclaredPrecision::Fp32,
        };
        let fp16 = build_settings(&hint, false);
        assert!(fp16.starts_with("--fp16 --minShapes=input:1x3x8x8"));
        assert!(fp16.contains("--maxShapes=input:1x3x1080x1920"));
        assert_eq!(input_io_format(&fp16), Some(EngineIo::Fp16));

        let bf16 = build_settings(&hint, true);
        assert!(bf16.starts_with("--bf16"));
        assert_eq!(input_io_format(&bf16), Some(EngineIo::Fp32));

        let fixed = EngineSettingsHint {
            shape_mode: ShapeMode::StaticFixed,
            declared_precision: DeclaredPrecision::Fp16,
        };
        let settings = build_settings(&fixed, true);
        assert!(settings.starts_with("--fp16"));
        assert!(!settings.contains("Shapes"));
        assert!(settings.contains("--skipInference"));
        assert!(settings.contains("--tacticSources=-CUDNN,-CUBLAS,-CUBLAS_LT"));
    }

    #[test]
    fn test_dynamic_hint_limited_to_1080p() {
        let dynamic = EngineSettingsHint {
            shape_mode: ShapeMode::Dynamic,
            declared_precision: DeclaredPrecision::Fp32,
        };
        assert_eq!(hint_for_clip(dynamic, 1920, 1080), dynamic);
        assert_eq!(hint_for_clip(dynamic, 1440, 1080), dynamic);

        for (width, height) in [(2560, 1440), (1920, 1088), (2048, 858)] {
            let narrowed = hint_for_clip(dynamic, width, height);
            assert_eq!(narrowed.shape_mode, ShapeMode::StaticComputed);
            assert_eq!(narrowed.declared_precision, DeclaredPrecision::Fp32);
        }

        let fixed = EngineSettingsHint {
            shape_mode: ShapeMode::StaticFixed,
            ..dynamic
        };
        assert_eq!(hint_for_clip(fixed, 3840, 2160), fixed);
    }

    #[test]
    fn test_static_computed_uses_clip_resolution() {
        let hint = EngineSettingsHint {
            shape_mode: ShapeMode::StaticComputed,
            declared_precision: DeclaredPrecision::Mixed,
        };
        let settings = build_settings(&hint, false);
        assert!(settings.contains(VIDEO_RESOLUTION_TOKEN));

        let concrete = substitute_resolution(&settings, 1280, 720);
        assert!(concrete.contains("--optShapes=input:1x3x720x1280"));
        assert!(!concrete.contains(VIDEO_RESOLUTION_TOKEN));
    }

    #[test]
    fn test_missing_model_is_not_found() {
        struct Unreachable;
        impl ModelInspector for Unreachable {
            fn inspect(&self, _: &Path) -> Result<ModelDescription, PipelineError> {
                panic!("inspector must not run for a missing file");
            }
        }

        let resolver = EngineSettingsResolver::new(Box::new(Unreachable));
        let err = resolver
            .resolve(Path::new("/nonexistent/model.onnx"))
            .unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(_)));
    }

    #[test]
    fn test_io_format_absent() {
        assert_eq!(input_io_format("--fp16 --skipInference"), None);
    }
}
