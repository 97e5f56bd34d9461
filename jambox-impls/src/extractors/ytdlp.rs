use std::process::Stdio;

use async_trait::async_trait;
use bytes::Bytes;
use log::debug;
use serde::Deserialize;
use tokio::{io::AsyncReadExt, process::Command};

use jambox_core::{ExtractError, Extractor, Metadata};

use super::NetworkDownload;

const YT_UNAVAILABLE: &str = "Video unavailable. This video is not available";
const YT_NOT_FOUND: &str = "Video unavailable";
const YT_ID_ERROR: &str = "Incomplete YouTube ID";

/// Extracts metadata and audio by running the `yt-dlp` program.
pub struct YtDlpExtractor {
    program: String,
    download: NetworkDownload,
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    url: String,
    width: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct VideoInfo {
    title: String,
    #[serde(default)]
    uploader: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    thumbnail: Option<String>,
    #[serde(default)]
    thumbnails: Vec<Thumbnail>,
    #[serde(default)]
    duration: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Format {
    url: String,
    format_id: String,
}

#[derive(Debug, Deserialize)]
struct PlayableVideo {
    format_id: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    formats: Vec<Format>,
}

impl YtDlpExtractor {
    pub fn new() -> Self {
        Self::with_program("yt-dlp")
    }

    /// Uses a different executable, for example a pinned path.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            download: NetworkDownload::new(),
        }
    }

    /// Runs yt-dlp with the given arguments and returns its stdout.
    async fn run(&self, args: &[&str], url: &str) -> Result<String, ExtractError> {
        let mut child = Command::new(&self.program)
            .args(args)
            .args(["--", url])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // The task may be dropped at its deadline
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExtractError::Spawn(e.to_string()))?;

        let mut output = String::new();
        let mut error_output = String::new();

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExtractError::Spawn("stdout is not piped".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| ExtractError::Spawn("stderr is not piped".to_string()))?;

        let (out, err) = tokio::join!(
            stdout.read_to_string(&mut output),
            stderr.read_to_string(&mut error_output)
        );
        out?;
        err.ok();

        let exit = child.wait().await?;

        if !exit.success() {
            return Err(classify_failure(&error_output));
        }

        Ok(output)
    }
}

impl Default for YtDlpExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Extractor for YtDlpExtractor {
    async fn metadata(&self, url: &str) -> Result<Metadata, ExtractError> {
        let output = self
            .run(&["--no-playlist", "--skip-download", "-J"], url)
            .await?;

        parse_metadata(&output)
    }

    async fn audio(&self, url: &str) -> Result<Bytes, ExtractError> {
        let output = self
            .run(&["--no-playlist", "-f", "bestaudio/best", "-j"], url)
            .await?;

        let stream_url = parse_stream_url(&output)?;
        debug!("Resolved stream for {}", url);

        self.download.fetch(&stream_url).await
    }
}

fn parse_metadata(output: &str) -> Result<Metadata, ExtractError> {
    let info: VideoInfo =
        serde_json::from_str(output).map_err(|e| ExtractError::Parse(e.to_string()))?;

    let thumbnail = info
        .thumbnail
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| determine_thumbnail(info.thumbnails));

    Ok(Metadata {
        title: info.title,
        uploader: info.uploader.or(info.channel).unwrap_or_default(),
        thumbnail,
        duration: info.duration.unwrap_or_default().round() as u32,
    })
}

fn parse_stream_url(output: &str) -> Result<String, ExtractError> {
    let entry: PlayableVideo =
        serde_json::from_str(output).map_err(|e| ExtractError::Parse(e.to_string()))?;

    entry
        .formats
        .iter()
        .find(|f| f.format_id == entry.format_id)
        .map(|f| f.url.to_owned())
        .or(entry.url)
        .ok_or_else(|| ExtractError::Failed("No supported format found".to_string()))
}

fn classify_failure(error_output: &str) -> ExtractError {
    if error_output.contains(YT_UNAVAILABLE) {
        return ExtractError::Failed("Resource was found but is unavailable".to_string());
    }

    if error_output.contains(YT_NOT_FOUND) {
        return ExtractError::Failed("Resource was not found".to_string());
    }

    if error_output.contains(YT_ID_ERROR) {
        return ExtractError::Failed("Invalid video id".to_string());
    }

    ExtractError::Failed(error_output.trim().to_string())
}

fn determine_thumbnail(mut thumbnails: Vec<Thumbnail>) -> String {
    // Sort to get the largest at end
    thumbnails.sort_by(|a, b| a.width.cmp(&b.width));

    thumbnails.pop().map(|t| t.url).unwrap_or_default()
}
