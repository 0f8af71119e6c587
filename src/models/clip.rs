//! Clip state threaded through the pipeline.

use serde::{Deserialize, Serialize};

use super::Rational;

/// Pixel formats the worker reasons about.
///
/// Anything the source reports that is not listed here deserializes to `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum PixelFormat {
    Yuv410P8,
    Yuv411P8,
    #[default]
    Yuv420P8,
    Yuv422P8,
    Yuv444P8,
    Yuv420P10,
    Yuv422P10,
    Yuv444P10,
    Yuv420P16,
    Yuv444P16,
    Gray8,
    Gray16,
    Rgb24,
    Rgb48,
    /// Half-float planar RGB.
    RgbH,
    /// Single-precision float planar RGB.
    RgbS,
    #[serde(other)]
    Unknown,
}

impl PixelFormat {
    /// VapourSynth format constant.
    pub fn vs_constant(&self) -> &'static str {
        match self {
            PixelFormat::Yuv410P8 => "vs.YUV410P8",
            PixelFormat::Yuv411P8 => "vs.YUV411P8",
            PixelFormat::Yuv420P8 => "vs.YUV420P8",
            PixelFormat::Yuv422P8 => "vs.YUV422P8",
            PixelFormat::Yuv444P8 => "vs.YUV444P8",
            PixelFormat::Yuv420P10 => "vs.YUV420P10",
            PixelFormat::Yuv422P10 => "vs.YUV422P10",
            PixelFormat::Yuv444P10 => "vs.YUV444P10",
            PixelFormat::Yuv420P16 => "vs.YUV420P16",
            PixelFormat::Yuv444P16 => "vs.YUV444P16",
            PixelFormat::Gray8 => "vs.GRAY8",
            PixelFormat::Gray16 => "vs.GRAY16",
            PixelFormat::Rgb24 => "vs.RGB24",
            PixelFormat::Rgb48 => "vs.RGB48",
            PixelFormat::RgbH => "vs.RGBH",
            PixelFormat::RgbS => "vs.RGBS",
            PixelFormat::Unknown => "vs.NONE",
        }
    }

    /// Formats that are kept as-is when converting back after inference.
    pub fn is_standard_output(&self) -> bool {
        matches!(
            self,
            PixelFormat::Yuv410P8
                | PixelFormat::Yuv411P8
                | PixelFormat::Yuv420P8
                | PixelFormat::Yuv422P8
                | PixelFormat::Yuv444P8
                | PixelFormat::Yuv420P10
                | PixelFormat::Yuv422P10
                | PixelFormat::Yuv444P10
        )
    }

    /// Output format after inference: the input format when standard, 10-bit 4:2:0 otherwise.
    pub fn output_format(&self) -> PixelFormat {
        if self.is_standard_output() {
            *self
        } else {
            PixelFormat::Yuv420P10
        }
    }

    pub fn is_float_rgb(&self) -> bool {
        matches!(self, PixelFormat::RgbH | PixelFormat::RgbS)
    }

    /// Whether converting to RGB needs an input matrix.
    pub fn is_yuv(&self) -> bool {
        matches!(
            self,
            PixelFormat::Yuv410P8
                | PixelFormat::Yuv411P8
                | PixelFormat::Yuv420P8
                | PixelFormat::Yuv422P8
                | PixelFormat::Yuv444P8
                | PixelFormat::Yuv420P10
                | PixelFormat::Yuv422P10
                | PixelFormat::Yuv444P10
                | PixelFormat::Yuv420P16
                | PixelFormat::Yuv444P16
        )
    }
}

/// Color range as reported by the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorRange {
    Full,
    Limited,
}

impl ColorRange {
    /// zimg range name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ColorRange::Full => "full",
            ColorRange::Limited => "limited",
        }
    }
}

/// Handle to a node in the frame graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeRef(pub usize);

/// The current clip: a graph node plus the properties the pipeline decides on.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipState {
    pub node: NodeRef,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub fps: Rational,
    pub color_range: Option<ColorRange>,
    /// Matrix from frame metadata, if the source declared one.
    pub matrix: Option<String>,
}

impl ClipState {
    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn resolution(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}
