//! Video job configuration and encoding settings.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ColorRange, PixelFormat, Rational};
use crate::error::ConfigError;

/// Represents a complete upscale job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoJob {
    /// Unique job identifier
    pub id: Uuid,

    /// Input video file path
    pub input_path: String,

    /// Output video file path
    pub output_path: String,

    /// Slot whose profile is applied
    #[serde(default = "default_slot")]
    pub slot: u32,

    /// Worker configuration file (JSON or `.conf`)
    pub config_path: String,

    /// Probed properties of the input video
    pub video: VideoInfo,

    /// FFmpeg encoding settings
    #[serde(default)]
    pub encoding_settings: EncodingSettings,
}

fn default_slot() -> u32 {
    1
}

/// Properties of the input video, as probed by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,

    /// Container frame rate numerator
    pub fps_num: u64,

    /// Container frame rate denominator
    #[serde(default = "default_fps_den")]
    pub fps_den: u64,

    #[serde(default)]
    pub format: PixelFormat,

    /// `_ColorRange` frame property, if present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_range: Option<ColorRange>,

    /// `_Matrix` frame property name, if present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matrix: Option<String>,

    /// Total frame count of input video
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_frames: Option<i32>,
}

fn default_fps_den() -> u64 {
    1
}

impl VideoInfo {
    /// Container frame rate.
    pub fn fps(&self) -> Result<Rational, ConfigError> {
        Rational::new(self.fps_num, self.fps_den).ok_or_else(|| ConfigError::InvalidValue {
            key: "video.fpsDen".to_string(),
            value: self.fps_den.to_string(),
        })
    }
}

/// Video encoding settings for FFmpeg output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodingSettings {
    /// Output video codec
    #[serde(default)]
    pub codec: VideoCodec,

    /// Encoder preset (speed/quality tradeoff)
    #[serde(default = "default_encoder_preset")]
    pub encoder_preset: String,

    /// Quality setting (CRF for software encoders, CQ for NVENC)
    #[serde(default = "default_quality")]
    pub quality: i32,

    /// Additional FFmpeg arguments
    #[serde(default)]
    pub custom_ffmpeg_args: String,
}

fn default_encoder_preset() -> String {
    "medium".to_string()
}

fn default_quality() -> i32 {
    18
}

impl Default for EncodingSettings {
    fn default() -> Self {
        Self {
            codec: VideoCodec::default(),
            encoder_preset: default_encoder_preset(),
            quality: default_quality(),
            custom_ffmpeg_args: String::new(),
        }
    }
}

/// Supported video codecs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum VideoCodec {
    #[serde(rename = "libx264")]
    H264,

    #[default]
    #[serde(rename = "libx265")]
    H265,

    #[serde(rename = "hevc_nvenc")]
    HevcNvenc,

    #[serde(rename = "ffv1")]
    FFV1,

    #[serde(rename = "prores_ks -profile:v 3")]
    ProResHQ,
}

impl VideoCodec {
    /// Get the FFmpeg codec string.
    pub fn ffmpeg_codec(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "libx264",
            VideoCodec::H265 => "libx265",
            VideoCodec::HevcNvenc => "hevc_nvenc",
            VideoCodec::FFV1 => "ffv1",
            VideoCodec::ProResHQ => "prores_ks",
        }
    }

    /// Codec-specific quality arguments.
    pub fn quality_args(&self, settings: &EncodingSettings) -> Vec<String> {
        match self {
            VideoCodec::H264 | VideoCodec::H265 => vec![
                "-crf".to_string(),
                settings.quality.to_string(),
                "-preset".to_string(),
                settings.encoder_preset.clone(),
            ],
            VideoCodec::HevcNvenc => vec![
                "-preset".to_string(),
                "p7".to_string(),
                "-profile:v".to_string(),
                "main10".to_string(),
                "-rc".to_string(),
                "vbr".to_string(),
                "-cq".to_string(),
                settings.quality.to_string(),
            ],
            VideoCodec::FFV1 => Vec::new(),
            VideoCodec::ProResHQ => vec!["-profile:v".to_string(), "3".to_string()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_codec_serialization() {
        assert_eq!(
            serde_json::to_string(&VideoCodec::HevcNvenc).unwrap(),
            "\"hevc_nvenc\""
        );
        assert_eq!(
            serde_json::to_string(&VideoCodec::ProResHQ).unwrap(),
            "\"prores_ks -profile:v 3\""
        );
    }

    #[test]
    fn test_job_from_json() {
        let json = r#"{
            "id": "67e55044-10b1-426f-9247-bb680e5fe0c8",
            "inputPath": "in.mkv",
            "outputPath": "out.mkv",
            "configPath": "worker.conf",
            "video": {
                "width": 1920, "height": 1080,
                "fpsNum": 24000, "fpsDen": 1001,
                "format": "YUV420P8", "colorRange": "limited"
            }
        }"#;
        let job: VideoJob = serde_json::from_str(json).unwrap();
        assert_eq!(job.slot, 1);
        assert_eq!(job.video.color_range, Some(ColorRange::Limited));
        assert_eq!(job.video.fps().unwrap(), Rational::new(24000, 1001).unwrap());
        assert_eq!(job.encoding_settings.codec, VideoCodec::H265);
    }

    #[test]
    fn test_zero_fps_denominator_rejected() {
        let info = VideoInfo {
            width: 640,
            height: 480,
            fps_num: 30,
            fps_den: 0,
            format: PixelFormat::Yuv420P8,
            color_range: None,
            matrix: None,
            total_frames: None,
        };
        assert!(info.fps().is_err());
    }
}
