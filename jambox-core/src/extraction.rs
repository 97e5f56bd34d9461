use std::{marker::PhantomData, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::{Deadline, Task, TaskError, TaskHandle, TaskReply};

/// Describes a resolved source URL.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(rename = "FullTitle")]
    pub title: String,
    #[serde(rename = "Uploader", default)]
    pub uploader: String,
    #[serde(rename = "Thumbnail", default)]
    pub thumbnail: String,
    /// Length in seconds
    #[serde(rename = "Duration", default)]
    pub duration: u32,
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Failed to start extractor: {0}")]
    Spawn(String),
    #[error("Extractor I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse extractor output: {0}")]
    Parse(String),
    #[error("{0}")]
    Failed(String),
    #[error("Extractor timed out")]
    TimedOut,
}

/// The kind of resource a fetch resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    Metadata,
    Audio,
}

/// Resolves source URLs to metadata or raw audio.
///
/// Callers enforce deadlines by dropping the returned future,
/// so implementors must clean up after themselves when dropped.
#[async_trait]
pub trait Extractor
where
    Self: Send + Sync + 'static,
{
    async fn metadata(&self, url: &str) -> Result<Metadata, ExtractError>;

    async fn audio(&self, url: &str) -> Result<Bytes, ExtractError>;
}

/// Represents a type that can be fetched through an [Extractor].
#[async_trait]
pub trait Fetchable
where
    Self: Sized + Send + 'static,
{
    const KIND: FetchKind;

    async fn fetch(extractor: &dyn Extractor, url: &str) -> Result<Self, ExtractError>;
}

#[async_trait]
impl Fetchable for Metadata {
    const KIND: FetchKind = FetchKind::Metadata;

    async fn fetch(extractor: &dyn Extractor, url: &str) -> Result<Self, ExtractError> {
        extractor.metadata(url).await
    }
}

#[async_trait]
impl Fetchable for Bytes {
    const KIND: FetchKind = FetchKind::Audio;

    async fn fetch(extractor: &dyn Extractor, url: &str) -> Result<Self, ExtractError> {
        extractor.audio(url).await
    }
}

/// A task that fetches a single URL through an [Extractor] and reports the result once.
pub struct FetchTask<T> {
    url: String,
    extractor: Arc<dyn Extractor>,
    deadline: Deadline,
    reply: TaskReply<T>,
    kind: PhantomData<T>,
}

impl<T> FetchTask<T>
where
    T: Fetchable,
{
    /// Creates the task along with the handle its result can be awaited on.
    pub fn new(
        extractor: Arc<dyn Extractor>,
        url: impl Into<String>,
        deadline: Deadline,
    ) -> (Self, TaskHandle<T>) {
        let (reply, handle) = TaskHandle::new();

        let task = Self {
            url: url.into(),
            extractor,
            deadline,
            reply,
            kind: PhantomData,
        };

        (task, handle)
    }
}

#[async_trait]
impl<T> Task for FetchTask<T>
where
    T: Fetchable,
{
    async fn process(self: Box<Self>, shutdown: CancellationToken) {
        let description = self.describe();
        let Self {
            url,
            extractor,
            deadline,
            reply,
            ..
        } = *self;

        // Dropping the fetch future is what cancels the extractor
        let result = tokio::select! {
            biased;
            _ = shutdown.cancelled() => Err(TaskError::Cancelled),
            expiry = deadline.expired() => Err(expiry.into()),
            result = T::fetch(extractor.as_ref(), &url) => {
                result.map_err(|e| TaskError::Fetch(e.to_string()))
            }
        };

        if let Err(e) = &result {
            debug!("{} failed: {}", description, e);
        }

        if reply.send(result).is_err() {
            debug!("Nobody is waiting for {} anymore", description);
        }
    }

    fn describe(&self) -> String {
        format!("{:?} fetch of {}", T::KIND, self.url)
    }
}
