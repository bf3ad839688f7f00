// SPDX-License-Identifier: MIT

//! Length-prefixed message framing.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// The size of a message header: a big-endian u32 payload length.
pub const MESSAGE_HEADER_SIZE: usize = 4;

/// Default maximum allowable message size (5 MiB). Anything larger is
/// treated as garbage and kills the channel.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 5 * 1024 * 1024;

/// Errors from framing and transport.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("received message of {size} bytes, greater than maximum allowed message size {max}")]
    Oversized { size: usize, max: usize },

    #[error("message payload is not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("codec previously failed; channel must be terminated")]
    Poisoned,

    #[error("connection closed")]
    ConnectionClosed,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Incremental parser for the length-prefixed byte stream.
///
/// Feed it arbitrary-sized chunks; it emits every complete JSON payload and
/// retains partial trailing bytes for the next call. Single-reader: callers
/// serialize access.
pub struct MessageCodec {
    max_message_size: usize,
    header: [u8; MESSAGE_HEADER_SIZE],
    header_filled: usize,
    expected_len: usize,
    payload: Vec<u8>,
    failed: bool,
}

impl MessageCodec {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            max_message_size,
            header: [0; MESSAGE_HEADER_SIZE],
            header_filled: 0,
            expected_len: 0,
            payload: Vec::new(),
            failed: false,
        }
    }

    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Consume a chunk of bytes, returning every complete payload it finishes.
    ///
    /// An announced length above the maximum is fatal: the error is returned
    /// and the codec refuses further input.
    pub fn feed(&mut self, mut data: &[u8]) -> Result<Vec<String>, ProtocolError> {
        if self.failed {
            return Err(ProtocolError::Poisoned);
        }

        let mut messages = Vec::new();
        while !data.is_empty() {
            if self.header_filled < MESSAGE_HEADER_SIZE {
                let take = (MESSAGE_HEADER_SIZE - self.header_filled).min(data.len());
                self.header[self.header_filled..self.header_filled + take]
                    .copy_from_slice(&data[..take]);
                self.header_filled += take;
                data = &data[take..];

                if self.header_filled < MESSAGE_HEADER_SIZE {
                    break;
                }

                self.expected_len = u32::from_be_bytes(self.header) as usize;
                if self.expected_len > self.max_message_size {
                    self.failed = true;
                    return Err(ProtocolError::Oversized {
                        size: self.expected_len,
                        max: self.max_message_size,
                    });
                }
                self.payload.reserve(self.expected_len);
            }

            let take = (self.expected_len - self.payload.len()).min(data.len());
            self.payload.extend_from_slice(&data[..take]);
            data = &data[take..];

            if self.payload.len() == self.expected_len {
                let payload = std::mem::take(&mut self.payload);
                self.header_filled = 0;
                self.expected_len = 0;
                match String::from_utf8(payload) {
                    Ok(text) => messages.push(text),
                    Err(e) => {
                        self.failed = true;
                        return Err(e.into());
                    }
                }
            }
        }

        Ok(messages)
    }
}

/// Prefix a serialized payload with its 4-byte big-endian length.
pub fn encode(payload: &str) -> Vec<u8> {
    let mut framed = Vec::with_capacity(MESSAGE_HEADER_SIZE + payload.len());
    framed.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    framed.extend_from_slice(payload.as_bytes());
    framed
}

/// Read one framed message from `reader`.
pub async fn read_message<R>(reader: &mut R, max_message_size: usize) -> Result<Vec<u8>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; MESSAGE_HEADER_SIZE];
    reader.read_exact(&mut header).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => ProtocolError::ConnectionClosed,
        _ => ProtocolError::Io(e),
    })?;

    let len = u32::from_be_bytes(header) as usize;
    if len > max_message_size {
        return Err(ProtocolError::Oversized { size: len, max: max_message_size });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Write one framed message to `writer`.
pub async fn write_message<W>(writer: &mut W, payload: &[u8]) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
#[path = "codec_tests.rs"]
mod tests;
