use bytes::Bytes;
use serde::Serialize;

use crate::{EntryId, Metadata, QueueItem};

pub type TrackId = EntryId;

/// A single entry in a room's playlist.
#[derive(Debug, Clone, Serialize)]
pub struct Track {
    #[serde(rename = "ID")]
    pub id: TrackId,
    #[serde(skip)]
    pub source_url: String,
    #[serde(flatten)]
    pub metadata: Metadata,
    #[serde(skip)]
    audio: Option<Bytes>,
}

impl Track {
    /// Creates a track that has not been enqueued or downloaded yet.
    pub fn new(source_url: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            id: 0,
            source_url: source_url.into(),
            metadata,
            audio: None,
        }
    }

    /// Returns the downloaded audio, if any.
    pub fn audio(&self) -> Option<Bytes> {
        self.audio.clone()
    }

    pub fn has_audio(&self) -> bool {
        self.audio.as_ref().is_some_and(|a| !a.is_empty())
    }

    pub fn attach_audio(&mut self, audio: Bytes) {
        self.audio = Some(audio);
    }
}

impl QueueItem for Track {
    fn entry_id(&self) -> EntryId {
        self.id
    }

    fn assign_entry_id(&mut self, id: EntryId) {
        self.id = id
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_serializes_without_audio_or_url() {
        let mut track = Track::new(
            "https://youtu.be/abc",
            Metadata {
                title: "Song".to_string(),
                duration: 100,
                ..Default::default()
            },
        );
        track.id = 7;
        track.attach_audio(Bytes::from_static(b"audio"));

        let json = serde_json::to_value(&track).unwrap();

        assert_eq!(json["ID"], 7);
        assert_eq!(json["FullTitle"], "Song");
        assert!(json.get("source_url").is_none());
        assert!(json.get("audio").is_none());
    }

    #[test]
    fn test_empty_audio_does_not_count() {
        let mut track = Track::new("u", Metadata::default());
        assert!(!track.has_audio());

        track.attach_audio(Bytes::new());
        assert!(!track.has_audio());
    }
}
