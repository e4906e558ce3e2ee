use async_trait::async_trait;
use bytes::Bytes;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{MediaKind, TranscodeRequest, TransformError, TransformResult, Transcoder, build_args};

/// Characters of stderr kept in a failure report.
const STDERR_TAIL: usize = 2000;

/// Runs the system ffmpeg binary against files in a private temp directory.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    binary: String,
}

impl FfmpegTranscoder {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn run(&self, args: &[String]) -> TransformResult<()> {
        debug!("Running {} {}", self.binary, args.join(" "));

        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if output.status.success() {
            return Ok(());
        }

        Err(TransformError::Ffmpeg {
            exit_code: output.status.code(),
            stderr: tail(&String::from_utf8_lossy(&output.stderr), STDERR_TAIL),
        })
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transform(&self, input: Bytes, request: &TranscodeRequest) -> TransformResult<Bytes> {
        let dir = tempfile::tempdir()?;
        let input_path = dir.path().join("input");
        let output_path = dir.path().join(format!("output.{}", request.format.extension()));

        tokio::fs::write(&input_path, &input).await?;
        info!(
            "Transcoding {} bytes to {} ({:?})",
            input.len(),
            request.format,
            request.quality
        );

        let first = self
            .run(&build_args(&input_path, &output_path, request, false))
            .await;

        if let Err(err) = first {
            if request.format.kind() != MediaKind::Image {
                return Err(err);
            }
            warn!("ffmpeg failed, retrying with rgb24 conversion: {}", err);
            remove_partial(&output_path).await;
            self.run(&build_args(&input_path, &output_path, request, true))
                .await?;
        }

        let data = tokio::fs::read(&output_path).await?;
        Ok(Bytes::from(data))
    }
}

async fn remove_partial(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove partial output {}: {}", path.display(), e);
        }
    }
}

fn tail(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    let count = trimmed.chars().count();
    if count <= max_chars {
        return trimmed.to_string();
    }
    trimmed.chars().skip(count - max_chars).collect()
}
