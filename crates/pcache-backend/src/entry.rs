#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

/// Auxiliary fields stored alongside each record.
///
/// Opaque to the params manager and the collection; only engines look inside.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryMetadata {
    /// Caller-defined fingerprint of the inputs that produced the content.
    pub input_signature: i64,
    /// Milliseconds since the Unix epoch. Engines stamp it on insert when left at 0.
    pub write_timestamp: i64,
}

impl EntryMetadata {
    #[must_use]
    pub fn with_input_signature(input_signature: i64) -> Self {
        Self {
            input_signature,
            write_timestamp: 0,
        }
    }
}

/// One retrieved record: content bytes plus metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    content: Vec<u8>,
    metadata: EntryMetadata,
}

impl Entry {
    #[must_use]
    pub fn new(content: Vec<u8>, metadata: EntryMetadata) -> Self {
        Self { content, metadata }
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn content_size(&self) -> usize {
        self.content.len()
    }

    pub fn metadata(&self) -> &EntryMetadata {
        &self.metadata
    }

    #[must_use]
    pub fn into_content(self) -> Vec<u8> {
        self.content
    }
}
