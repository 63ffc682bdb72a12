//! External tools that turn an audio file into features.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;

/// Seconds of audio kept when transcoding for analysis.
const ANALYSIS_WINDOW_SECS: u32 = 300;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{tool} failed: {stderr}")]
    ToolFailed { tool: String, stderr: String },

    #[error("unexpected output: {0}")]
    UnexpectedOutput(String),
}

#[async_trait]
pub trait FeatureExtractor: Send + Sync {
    /// Writes a WAV rendition of `input` to `output`.
    async fn transcode_to_wav(&self, input: &Path, output: &Path) -> Result<(), ExtractionError>;

    async fn detect_bpm(&self, wav: &Path) -> Result<f64, ExtractionError>;

    /// Returns the raw key label reported by the tool.
    async fn detect_key(&self, wav: &Path) -> Result<String, ExtractionError>;
}

/// Runs ffmpeg and command-line analyzers.
pub struct CommandFeatureExtractor {
    ffmpeg: PathBuf,
    bpm_command: Vec<String>,
    key_command: Vec<String>,
}

impl CommandFeatureExtractor {
    pub fn new(ffmpeg: PathBuf, bpm_command: Vec<String>, key_command: Vec<String>) -> Self {
        Self {
            ffmpeg,
            bpm_command,
            key_command,
        }
    }

    pub fn default_bpm_command() -> Vec<String> {
        vec!["aubio".to_string(), "tempo".to_string()]
    }

    pub fn default_key_command() -> Vec<String> {
        vec!["keyfinder-cli".to_string()]
    }

    async fn run_tool(command: &[String], file: &Path) -> Result<String, ExtractionError> {
        let Some((program, args)) = command.split_first() else {
            return Err(ExtractionError::ToolFailed {
                tool: "<empty>".to_string(),
                stderr: "no command configured".to_string(),
            });
        };
        let output = Command::new(program)
            .args(args)
            .arg(file)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            return Err(ExtractionError::ToolFailed {
                tool: program.clone(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

/// First number on the last non-empty line, e.g. `"121.35 bpm"`.
pub fn parse_bpm(stdout: &str) -> Result<f64, ExtractionError> {
    last_line(stdout)
        .and_then(|line| {
            line.split_whitespace()
                .find_map(|token| token.parse::<f64>().ok())
        })
        .filter(|bpm| bpm.is_finite() && *bpm > 0.0)
        .ok_or_else(|| ExtractionError::UnexpectedOutput(stdout.trim().to_string()))
}

pub fn parse_key(stdout: &str) -> String {
    last_line(stdout).unwrap_or_default().to_string()
}

fn last_line(s: &str) -> Option<&str> {
    s.lines().map(str::trim).filter(|l| !l.is_empty()).last()
}

#[async_trait]
impl FeatureExtractor for CommandFeatureExtractor {
    async fn transcode_to_wav(&self, input: &Path, output: &Path) -> Result<(), ExtractionError> {
        let result = Command::new(&self.ffmpeg)
            .arg("-y")
            .arg("-i")
            .arg(input)
            .args(["-t", &ANALYSIS_WINDOW_SECS.to_string(), "-f", "wav"])
            .arg(output)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !result.status.success() {
            return Err(ExtractionError::ToolFailed {
                tool: "ffmpeg".to_string(),
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    async fn detect_bpm(&self, wav: &Path) -> Result<f64, ExtractionError> {
        parse_bpm(&Self::run_tool(&self.bpm_command, wav).await?)
    }

    async fn detect_key(&self, wav: &Path) -> Result<String, ExtractionError> {
        Ok(parse_key(&Self::run_tool(&self.key_command, wav).await?))
    }
}
