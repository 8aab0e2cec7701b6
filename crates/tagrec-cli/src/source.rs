//! Line-oriented tag source
//!
//! Handheld readers in keyboard-wedge mode type one UID per line. Lines
//! prefixed with `bytes:` carry the raw tag ID as hex, as a driver bridge
//! would forward it.

use async_trait::async_trait;
use tagrec_core::{RawIdentifier, TagEventSource};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tracing::warn;

const BYTES_PREFIX: &str = "bytes:";

/// Parse one input line into a tag event. Blank lines yield `None`.
pub fn parse_line(line: &str) -> Option<RawIdentifier> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    match line.strip_prefix(BYTES_PREFIX) {
        Some(hex_bytes) => {
            let compact: String = hex_bytes.split_whitespace().collect();
            match hex::decode(&compact) {
                Ok(bytes) if !bytes.is_empty() => Some(RawIdentifier::Bytes(bytes)),
                Ok(_) => None,
                Err(e) => {
                    warn!("Ignoring malformed tag bytes '{}': {}", hex_bytes.trim(), e);
                    None
                }
            }
        }
        None => Some(RawIdentifier::Text(line.to_string())),
    }
}

/// Tag source reading one event per line
pub struct LineTagSource<R> {
    lines: Lines<R>,
}

impl<R: AsyncBufRead + Unpin> LineTagSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
        }
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> TagEventSource for LineTagSource<R> {
    async fn next_event(&mut self) -> Option<RawIdentifier> {
        loop {
            match self.lines.next_line().await {
                Ok(Some(line)) => {
                    if let Some(raw) = parse_line(&line) {
                        return Some(raw);
                    }
                }
                Ok(None) => return None,
                Err(e) => {
                    warn!("Failed to read tag input: {}", e);
                    return None;
                }
            }
        }
    }
}
