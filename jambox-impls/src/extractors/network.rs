use bytes::Bytes;
use reqwest::Client;

use jambox_core::ExtractError;

/// Downloads a remote audio stream into memory.
pub struct NetworkDownload {
    client: Client,
}

impl NetworkDownload {
    /// Anything larger than this is refused
    const MAX_SIZE: usize = 100_000_000; // 100MB

    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    pub async fn fetch(&self, url: &str) -> Result<Bytes, ExtractError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ExtractError::Failed(e.to_string()))?;

        let status = response.status();

        if !status.is_success() {
            return Err(ExtractError::Failed(format!(
                "Stream download failed with {}",
                status
            )));
        }

        if let Some(length) = response.content_length() {
            check_size(length as usize)?;
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ExtractError::Failed(e.to_string()))?;

        check_size(bytes.len())?;
        Ok(bytes)
    }
}

impl Default for NetworkDownload {
    fn default() -> Self {
        Self::new()
    }
}

fn check_size(size: usize) -> Result<(), ExtractError> {
    if size > NetworkDownload::MAX_SIZE {
        return Err(ExtractError::Failed(format!(
            "Stream is too large ({} bytes)",
            size
        )));
    }

    if size == 0 {
        return Err(ExtractError::Failed("Stream is empty".to_string()));
    }

    Ok(())
}
