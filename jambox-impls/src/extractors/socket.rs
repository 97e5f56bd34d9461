use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::UnixStream,
};

use jambox_core::{ExtractError, Extractor, FetchKind, Metadata};

/// Extracts through an extraction service listening on a Unix domain socket.
///
/// Each request is one connection: a JSON request is written, the write half is
/// closed, and everything the service sends back is the response.
pub struct SocketExtractor {
    path: PathBuf,
}

#[derive(Debug, Serialize)]
struct Request<'a> {
    #[serde(rename = "Type")]
    kind: &'static str,
    #[serde(rename = "URL")]
    url: &'a str,
}

impl SocketExtractor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn request(&self, kind: FetchKind, url: &str) -> Result<Vec<u8>, ExtractError> {
        let request = Request {
            kind: match kind {
                FetchKind::Metadata => "json",
                FetchKind::Audio => "audio",
            },
            url,
        };

        let payload =
            serde_json::to_vec(&request).map_err(|e| ExtractError::Parse(e.to_string()))?;

        let mut stream = UnixStream::connect(&self.path).await.map_err(|e| {
            ExtractError::Spawn(format!(
                "Could not connect to {}: {}",
                self.path.display(),
                e
            ))
        })?;

        stream.write_all(&payload).await?;
        stream.shutdown().await?;

        let mut response = Vec::new();
        stream.read_to_end(&mut response).await?;

        Ok(response)
    }
}

#[async_trait]
impl Extractor for SocketExtractor {
    async fn metadata(&self, url: &str) -> Result<Metadata, ExtractError> {
        let response = self.request(FetchKind::Metadata, url).await?;

        serde_json::from_slice(&response).map_err(|e| ExtractError::Parse(e.to_string()))
    }

    async fn audio(&self, url: &str) -> Result<Bytes, ExtractError> {
        let response = self.request(FetchKind::Audio, url).await?;

        if response.is_empty() {
            return Err(ExtractError::Failed(
                "Extraction service returned no audio".to_string(),
            ));
        }

        Ok(response.into())
    }
}
