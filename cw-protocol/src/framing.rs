use cw_error::{CrownwatchError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncBufReadExt;

use crate::{EventEnvelope, ResponseEnvelope, MAX_MESSAGE_SIZE};

/// Everything the worker writes to stdout
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "channel", content = "frame", rename_all = "snake_case")]
pub enum WorkerFrame {
    Response(ResponseEnvelope),
    Event(EventEnvelope),
}

/// Serialize a message as one newline-terminated line
pub fn encode_line<T: Serialize>(message: &T) -> Result<Vec<u8>> {
    let mut json = serde_json::to_vec(message)?;
    json.push(b'\n');
    if json.len() > MAX_MESSAGE_SIZE {
        return Err(CrownwatchError::MessageTooLarge {
            size: json.len(),
            max_size: MAX_MESSAGE_SIZE,
        });
    }
    Ok(json)
}

/// Parse one line produced by [`encode_line`] or [`read_line_bounded`]
pub fn decode_line<T: DeserializeOwned>(line: &[u8]) -> Result<T> {
    if line.len() > MAX_MESSAGE_SIZE {
        return Err(CrownwatchError::MessageTooLarge {
            size: line.len(),
            max_size: MAX_MESSAGE_SIZE,
        });
    }
    let trimmed = line
        .strip_suffix(b"\n")
        .map(|l| l.strip_suffix(b"\r").unwrap_or(l))
        .unwrap_or(line);
    Ok(serde_json::from_slice(trimmed)?)
}

/// Read one line without buffering more than `max_len` bytes.
///
/// Returns `Ok(0)` on EOF. An oversized line yields `InvalidData` after
/// consuming what was buffered so the caller can resynchronise or bail.
pub async fn read_line_bounded<R: tokio::io::AsyncBufRead + Unpin>(
    reader: &mut R,
    out: &mut Vec<u8>,
    max_len: usize,
) -> std::io::Result<usize> {
    out.clear();

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(out.len());
        }

        let mut take_len = available.len();
        let mut found_newline = false;
        if let Some(pos) = available.iter().position(|b| *b == b'\n') {
            take_len = pos + 1;
            found_newline = true;
        }

        let remaining = max_len.saturating_sub(out.len());
        if take_len > remaining {
            let consume_len = remaining.min(available.len());
            reader.consume(consume_len);
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "Message too large",
            ));
        }

        out.extend_from_slice(&available[..take_len]);
        reader.consume(take_len);

        if found_newline {
            return Ok(out.len());
        }
    }
}
