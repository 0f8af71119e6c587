//! Model introspection results and the engine settings hint derived from them.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// How an inference engine is compiled with respect to input size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShapeMode {
    /// The model declares every input dimension; no shape flags are needed.
    StaticFixed,
    /// Shapes are computed from the clip, one engine per resolution.
    StaticComputed,
    /// One engine covers a range of shapes.
    Dynamic,
}

/// Floating-point precision declared by a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeclaredPrecision {
    #[serde(rename = "FP16")]
    Fp16,
    #[serde(rename = "FP32")]
    Fp32,
    Mixed,
    Unknown,
}

impl DeclaredPrecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeclaredPrecision::Fp16 => "FP16",
            DeclaredPrecision::Fp32 => "FP32",
            DeclaredPrecision::Mixed => "Mixed",
            DeclaredPrecision::Unknown => "Unknown",
        }
    }
}

/// Settings hint for building an engine from a model file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineSettingsHint {
    pub shape_mode: ShapeMode,
    pub declared_precision: DeclaredPrecision,
}

/// Tensor element types as named by ONNX.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ElementType {
    Float,
    Float16,
    Bfloat16,
    Double,
    #[serde(other)]
    Other,
}

/// A declared graph input or output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TensorInfo {
    #[serde(default)]
    pub name: String,

    /// Dimension sizes; zero or negative means the dimension is symbolic.
    #[serde(default)]
    pub dims: Vec<i64>,

    pub elem_type: ElementType,
}

impl TensorInfo {
    pub fn is_fully_static(&self) -> bool {
        self.dims.iter().all(|&d| d > 0)
    }
}

/// What the model reader reports about a model file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDescription {
    #[serde(default)]
    pub inputs: Vec<TensorInfo>,

    #[serde(default)]
    pub outputs: Vec<TensorInfo>,

    /// Element types of the weight initializers.
    #[serde(default)]
    pub initializer_types: Vec<ElementType>,

    /// Operation type names present in the graph.
    #[serde(default)]
    pub op_types: BTreeSet<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_description_from_json() {
        let json = r#"{
            "inputs": [{"name": "input", "dims": [1, 3, 0, 0], "elemType": "FLOAT16"}],
            "outputs": [{"name": "output", "dims": [1, 3, 0, 0], "elemType": "FLOAT16"}],
            "initializerTypes": ["FLOAT16", "INT64"],
            "opTypes": ["Conv", "DepthToSpace"]
        }"#;
        let desc: ModelDescription = serde_json::from_str(json).unwrap();
        assert_eq!(desc.inputs.len(), 1);
        assert!(!desc.inputs[0].is_fully_static());
        assert_eq!(desc.initializer_types[1], ElementType::Other);
        assert!(desc.op_types.contains("Conv"));
    }
}
