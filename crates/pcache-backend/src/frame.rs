#![forbid(unsafe_code)]

//! Length-prefixed record frames.
//!
//! A frame is `u32 LE payload length` followed by the bincode payload.
//! The same encoding is used in the data file and in the journal.

use std::io::{self, Read};

use serde::{Deserialize, Serialize};

use crate::{BackendError, BackendResult, EntryMetadata};

/// Upper bound on a single payload; anything larger is treated as garbage.
pub(crate) const MAX_FRAME_LEN: usize = 1 << 30;

const HEADER_LEN: usize = 4;

#[derive(Serialize)]
struct RecordRef<'a> {
    key: &'a str,
    content: &'a [u8],
    metadata: EntryMetadata,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Record {
    pub key: String,
    pub content: Vec<u8>,
    pub metadata: EntryMetadata,
}

/// Outcome of reading one frame from a stream.
#[derive(Debug)]
pub(crate) enum ReadFrame {
    /// A complete payload; `len` is the full frame size including the header.
    Frame { payload: Vec<u8>, len: u64 },
    /// Clean end of stream at a frame boundary.
    End,
    /// The stream ends inside a frame, or the header is implausible.
    Torn,
}

pub(crate) fn encode(
    key: &str,
    content: &[u8],
    metadata: EntryMetadata,
) -> BackendResult<Vec<u8>> {
    let payload = bincode::serde::encode_to_vec(
        &RecordRef {
            key,
            content,
            metadata,
        },
        bincode::config::legacy(),
    )?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(BackendError::TooLarge { len: payload.len() });
    }
    let len = u32::try_from(payload.len()).map_err(|_| BackendError::TooLarge {
        len: payload.len(),
    })?;

    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

pub(crate) fn decode(payload: &[u8]) -> BackendResult<Record> {
    let (record, _) = bincode::serde::decode_from_slice(payload, bincode::config::legacy())?;
    Ok(record)
}

pub(crate) fn read_frame<R: Read>(reader: &mut R) -> io::Result<ReadFrame> {
    let mut header = [0u8; HEADER_LEN];
    match read_full(reader, &mut header)? {
        0 => return Ok(ReadFrame::End),
        HEADER_LEN => {}
        _ => return Ok(ReadFrame::Torn),
    }

    let len = u32::from_le_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Ok(ReadFrame::Torn);
    }

    // Grow with the bytes actually present; a corrupt header must not
    // reserve its claimed length up front.
    let mut payload = Vec::new();
    reader.by_ref().take(len as u64).read_to_end(&mut payload)?;
    if payload.len() < len {
        return Ok(ReadFrame::Torn);
    }

    Ok(ReadFrame::Frame {
        payload,
        len: (HEADER_LEN + len) as u64,
    })
}

/// Fill `buf` until it is full or the stream ends; returns bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
