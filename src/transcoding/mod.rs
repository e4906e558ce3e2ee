//! Media transformation for the worker.
//!
//! [`TranscodeRequest`] normalizes a dispatch message into a validated
//! format, quality tier and optional resize; [`build_args`] turns it into an
//! ffmpeg invocation. The [`Transcoder`] trait is what the worker calls, with
//! [`ffmpeg::FfmpegTranscoder`] as the real implementation.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use tracing::warn;

use crate::modules::job::events::DispatchMessage;

pub mod ffmpeg;

pub type TransformResult<T> = Result<T, TransformError>;

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("Unsupported output format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    #[error("FFmpeg failed ({exit_code:?}): {stderr}")]
    Ffmpeg {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn transform(&self, input: Bytes, request: &TranscodeRequest) -> TransformResult<Bytes>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Jpg,
    Jpeg,
    Png,
    Webp,
    Gif,
    Bmp,
    Tiff,
    Mp4,
    Webm,
    Mov,
    Mkv,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Jpg => "jpg",
            OutputFormat::Jpeg => "jpeg",
            OutputFormat::Png => "png",
            OutputFormat::Webp => "webp",
            OutputFormat::Gif => "gif",
            OutputFormat::Bmp => "bmp",
            OutputFormat::Tiff => "tiff",
            OutputFormat::Mp4 => "mp4",
            OutputFormat::Webm => "webm",
            OutputFormat::Mov => "mov",
            OutputFormat::Mkv => "mkv",
        }
    }

    pub fn kind(&self) -> MediaKind {
        match self {
            OutputFormat::Mp4 | OutputFormat::Webm | OutputFormat::Mov | OutputFormat::Mkv => {
                MediaKind::Video
            }
            _ => MediaKind::Image,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            OutputFormat::Jpg | OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Png => "image/png",
            OutputFormat::Webp => "image/webp",
            OutputFormat::Gif => "image/gif",
            OutputFormat::Bmp => "image/bmp",
            OutputFormat::Tiff => "image/tiff",
            OutputFormat::Mp4 => "video/mp4",
            OutputFormat::Webm => "video/webm",
            OutputFormat::Mov => "video/quicktime",
            OutputFormat::Mkv => "video/x-matroska",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = TransformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let format = match s.trim().to_lowercase().as_str() {
            "jpg" => OutputFormat::Jpg,
            "jpeg" => OutputFormat::Jpeg,
            "png" => OutputFormat::Png,
            "webp" => OutputFormat::Webp,
            "gif" => OutputFormat::Gif,
            "bmp" => OutputFormat::Bmp,
            "tiff" => OutputFormat::Tiff,
            "mp4" => OutputFormat::Mp4,
            "webm" => OutputFormat::Webm,
            "mov" => OutputFormat::Mov,
            "mkv" => OutputFormat::Mkv,
            _ => return Err(TransformError::UnsupportedFormat(s.to_string())),
        };
        Ok(format)
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Quality {
    High,
    #[default]
    Medium,
    Low,
}

impl Quality {
    /// Unknown tiers fall back to medium.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "high" => Quality::High,
            "low" => Quality::Low,
            _ => Quality::Medium,
        }
    }

    /// 0..1 scale, higher is better.
    pub fn factor(&self) -> f32 {
        match self {
            Quality::High => 0.9,
            Quality::Medium => 0.75,
            Quality::Low => 0.6,
        }
    }

    /// ffmpeg `-q:v` for JPEG-like encoders: 2 (best) .. 31 (worst).
    pub fn qscale(&self) -> u8 {
        let q = 2.0 + (1.0 - self.factor()) * 29.0;
        q.round().clamp(2.0, 31.0) as u8
    }

    pub fn webp_quality(&self) -> u8 {
        (self.factor() * 100.0).round() as u8
    }

    pub fn png_compression(&self) -> u8 {
        match self {
            Quality::High => 9,
            Quality::Medium => 6,
            Quality::Low => 0,
        }
    }

    pub fn crf(&self) -> u8 {
        match self {
            Quality::High => 18,
            Quality::Medium => 23,
            Quality::Low => 28,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resize {
    pub width: u32,
    pub height: u32,
}

impl Resize {
    fn from_settings(
        id: impl fmt::Display,
        settings: &HashMap<String, String>,
    ) -> TransformResult<Option<Self>> {
        let enabled = settings
            .get("resize")
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"));
        if !enabled {
            return Ok(None);
        }

        let width = settings.get("width").map(|v| v.trim()).filter(|v| !v.is_empty());
        let height = settings.get("height").map(|v| v.trim()).filter(|v| !v.is_empty());
        let (Some(width), Some(height)) = (width, height) else {
            warn!(
                "Job {} requested resize without width/height, keeping original size",
                id
            );
            return Ok(None);
        };

        Ok(Some(Self {
            width: parse_dimension("width", width)?,
            height: parse_dimension("height", height)?,
        }))
    }
}

fn parse_dimension(name: &str, value: &str) -> TransformResult<u32> {
    match value.parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(TransformError::InvalidSettings(format!(
            "{} must be a positive integer, got '{}'",
            name, value
        ))),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeRequest {
    pub format: OutputFormat,
    pub quality: Quality,
    pub resize: Option<Resize>,
}

impl TranscodeRequest {
    pub fn from_dispatch(message: &DispatchMessage) -> TransformResult<Self> {
        Ok(Self {
            format: message.output_format.parse()?,
            quality: Quality::parse(&message.output_quality),
            resize: Resize::from_settings(message.id, &message.settings)?,
        })
    }
}

/// Full ffmpeg argument list (without the binary). `normalize_colorspace`
/// converts to rgb24 first, which rescues inputs some image encoders reject.
pub fn build_args(
    input: &Path,
    output: &Path,
    request: &TranscodeRequest,
    normalize_colorspace: bool,
) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-y".into(),
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-i".into(),
        input.to_string_lossy().into_owned(),
    ];

    let mut filters = Vec::new();
    if let Some(resize) = request.resize {
        filters.push(format!("scale={}:{}", resize.width, resize.height));
    }
    if normalize_colorspace && request.format.kind() == MediaKind::Image {
        filters.push("format=rgb24".to_string());
    }
    if !filters.is_empty() {
        args.push("-vf".into());
        args.push(filters.join(","));
    }

    let quality = request.quality;
    let encoder: Vec<String> = match request.format {
        OutputFormat::Jpg | OutputFormat::Jpeg => {
            vec!["-frames:v".into(), "1".into(), "-q:v".into(), quality.qscale().to_string()]
        }
        OutputFormat::Webp => vec![
            "-frames:v".into(),
            "1".into(),
            "-c:v".into(),
            "libwebp".into(),
            "-quality".into(),
            quality.webp_quality().to_string(),
        ],
        OutputFormat::Png => vec![
            "-frames:v".into(),
            "1".into(),
            "-compression_level".into(),
            quality.png_compression().to_string(),
        ],
        OutputFormat::Gif | OutputFormat::Bmp | OutputFormat::Tiff => {
            vec!["-q:v".into(), quality.qscale().to_string()]
        }
        OutputFormat::Webm => vec![
            "-c:v".into(),
            "libvpx-vp9".into(),
            "-crf".into(),
            quality.crf().to_string(),
            "-b:v".into(),
            "0".into(),
            "-c:a".into(),
            "libopus".into(),
        ],
        OutputFormat::Mp4 | OutputFormat::Mov | OutputFormat::Mkv => {
            let mut video = vec![
                "-c:v".into(),
                "libx264".into(),
                "-preset".into(),
                "medium".into(),
                "-crf".into(),
                quality.crf().to_string(),
                "-pix_fmt".into(),
                "yuv420p".into(),
                "-c:a".into(),
                "aac".into(),
            ];
            if request.format != OutputFormat::Mkv {
                video.push("-movflags".into());
                video.push("+faststart".into());
            }
            video
        }
    };
    args.extend(encoder);

    args.push(output.to_string_lossy().into_owned());
    args
}
