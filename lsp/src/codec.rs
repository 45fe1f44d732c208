//! JSON-RPC framing codec for LSP communication.
//!
//! LSP uses `Content-Length: N\r\n\r\n{json}` framing over stdin/stdout.
//! This module provides [`FrameReader`] and [`FrameWriter`] for async
//! reading and writing of framed JSON-RPC messages.
//!
//! Errors are split into two classes. A *malformed* frame (bad header,
//! oversized body, invalid JSON) has been consumed in full and the stream is
//! positioned at the next frame, so the caller may keep reading. A *fatal*
//! error means the byte stream itself is gone or desynchronized.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Maximum frame size (16 MiB) to prevent unbounded memory allocation.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("I/O error on LSP stream: {0}")]
    Io(#[from] std::io::Error),
    #[error("unexpected EOF while reading {0}")]
    UnexpectedEof(&'static str),
    #[error("malformed frame header: {0}")]
    MalformedHeader(String),
    #[error("Content-Length {0} exceeds maximum {MAX_FRAME_BYTES}")]
    Oversized(usize),
    #[error("invalid JSON-RPC body: {0}")]
    InvalidJson(#[source] serde_json::Error),
    #[error("serializing JSON-RPC frame: {0}")]
    Serialize(#[source] serde_json::Error),
}

impl CodecError {
    /// Whether the underlying stream is unusable after this error.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Io(_) | Self::UnexpectedEof(_))
    }
}

/// Reads JSON-RPC frames from an async reader.
///
/// Parses `Content-Length` headers and reads exactly that many bytes,
/// then deserializes the body as JSON.
pub struct FrameReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    /// Read the next JSON-RPC frame.
    ///
    /// Returns `Ok(None)` on EOF at a frame boundary (clean shutdown).
    pub async fn read_frame(&mut self) -> Result<Option<serde_json::Value>, CodecError> {
        let content_length = match self.read_headers().await? {
            Some(len) => len,
            None => return Ok(None),
        };

        if content_length > MAX_FRAME_BYTES {
            self.discard(content_length).await?;
            return Err(CodecError::Oversized(content_length));
        }

        let mut body = vec![0u8; content_length];
        self.reader
            .read_exact(&mut body)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::UnexpectedEof => CodecError::UnexpectedEof("frame body"),
                _ => CodecError::Io(e),
            })?;

        let value = serde_json::from_slice(&body).map_err(CodecError::InvalidJson)?;
        Ok(Some(value))
    }

    /// Parse headers until the empty line separator.
    ///
    /// Returns the `Content-Length` value, or `None` on EOF. A bad header
    /// line does not stop the scan: the rest of the block (and the body, when
    /// its length is known) is consumed so the reader ends up on the next
    /// frame, then the problem is reported.
    async fn read_headers(&mut self) -> Result<Option<usize>, CodecError> {
        let mut content_length: Option<usize> = None;
        let mut problem: Option<String> = None;
        let mut line = Vec::new();
        let mut saw_any_header_bytes = false;

        loop {
            line.clear();
            let bytes_read = self.reader.read_until(b'\n', &mut line).await?;

            if bytes_read == 0 {
                // EOF is only clean before the first header byte of a frame.
                if !saw_any_header_bytes {
                    return Ok(None);
                }
                return Err(CodecError::UnexpectedEof("frame headers"));
            }
            saw_any_header_bytes = true;

            let Ok(text) = std::str::from_utf8(&line) else {
                problem.get_or_insert_with(|| {
                    format!("header line is not UTF-8: {:?}", String::from_utf8_lossy(&line))
                });
                continue;
            };
            let trimmed = text.trim();
            if trimmed.is_empty() {
                break;
            }

            let Some((key, value)) = trimmed.split_once(':') else {
                problem.get_or_insert_with(|| format!("header line without colon: {trimmed:?}"));
                continue;
            };
            if key.trim().eq_ignore_ascii_case("Content-Length") {
                match value.trim().parse::<usize>() {
                    Ok(len) => content_length = Some(len),
                    Err(_) => {
                        problem.get_or_insert_with(|| {
                            format!("invalid Content-Length value: {:?}", value.trim())
                        });
                    }
                }
            }
            // Other headers (e.g. Content-Type) are ignored.
        }

        if let Some(problem) = problem {
            // A usable length still tells us where the next frame starts.
            if let Some(len) = content_length {
                self.discard(len).await?;
            }
            return Err(CodecError::MalformedHeader(problem));
        }
        match content_length {
            Some(len) => Ok(Some(len)),
            None => Err(CodecError::MalformedHeader(
                "missing Content-Length header".to_string(),
            )),
        }
    }

    async fn discard(&mut self, len: usize) -> Result<(), CodecError> {
        let mut limited = (&mut self.reader).take(len as u64);
        let copied = tokio::io::copy(&mut limited, &mut tokio::io::sink()).await?;
        if copied < len as u64 {
            return Err(CodecError::UnexpectedEof("oversized frame body"));
        }
        Ok(())
    }
}

/// Writes JSON-RPC frames to an async writer.
///
/// Serializes JSON and prepends the `Content-Length` header.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Write a JSON-RPC frame with `Content-Length` header.
    pub async fn write_frame(&mut self, msg: &serde_json::Value) -> Result<(), CodecError> {
        let body = serde_json::to_string(msg).map_err(CodecError::Serialize)?;
        let header = format!("Content-Length: {}\r\n\r\n", body.len());

        self.writer.write_all(header.as_bytes()).await?;
        self.writer.write_all(body.as_bytes()).await?;
        self.writer.flush().await?;

        Ok(())
    }

    /// Flush and shut down the underlying writer, signalling EOF to the peer.
    pub async fn shutdown(&mut self) -> Result<(), CodecError> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_roundtrip() {
        let msg = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "textDocument/publishDiagnostics",
            "params": { "uri": "file:///test.rs" }
        });

        let mut buf = Vec::new();
        let mut writer = FrameWriter::new(&mut buf);
        writer.write_frame(&msg).await.unwrap();

        let mut reader = FrameReader::new(buf.as_slice());
        let result = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(result, msg);
    }

    #[tokio::test]
    async fn test_eof_returns_none() {
        let buf: &[u8] = b"";
        let mut reader = FrameReader::new(buf);
        assert!(reader.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_content_length_is_recoverable() {
        let buf: &[u8] = b"Content-Type: application/json\r\n\r\n";
        let mut reader = FrameReader::new(buf);
        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(err, CodecError::MalformedHeader(_)));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn test_eof_mid_headers_is_fatal() {
        // EOF after reading a header line must not be treated as a clean shutdown.
        let buf: &[u8] = b"Content-Length: 10\r\n";
        let mut reader = FrameReader::new(buf);
        let err = reader.read_frame().await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_eof_mid_body_is_fatal() {
        // Content-Length says 100, but only 5 bytes follow
        let buf: &[u8] = b"Content-Length: 100\r\n\r\nhello";
        let mut reader = FrameReader::new(buf);
        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(err, CodecError::UnexpectedEof(_)));
    }

    #[tokio::test]
    async fn test_invalid_length_then_valid_frame() {
        let body = r#"{"jsonrpc":"2.0","id":7,"result":null}"#;
        let stream = format!(
            "Content-Length: banana\r\n\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        );

        let mut reader = FrameReader::new(stream.as_bytes());
        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(err, CodecError::MalformedHeader(_)));
        let value = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(value["id"], 7);
    }

    #[tokio::test]
    async fn test_non_utf8_header_then_valid_frame() {
        let good = r#"{"jsonrpc":"2.0","method":"$/progress"}"#;
        let mut stream = b"X-Junk: \xff\xfe\r\nContent-Length: 2\r\n\r\n{}".to_vec();
        let next = format!("Content-Length: {}\r\n\r\n{good}", good.len());
        stream.extend_from_slice(next.as_bytes());

        let mut reader = FrameReader::new(stream.as_slice());
        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(err, CodecError::MalformedHeader(_)));
        assert!(!err.is_fatal());
        let value = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(value["method"], "$/progress");
        assert!(reader.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_json_body_then_valid_frame() {
        let bad = "not valid json!!!";
        let good = r#"{"jsonrpc":"2.0","method":"exit"}"#;
        let stream = format!(
            "Content-Length: {}\r\n\r\n{bad}Content-Length: {}\r\n\r\n{good}",
            bad.len(),
            good.len()
        );

        let mut reader = FrameReader::new(stream.as_bytes());
        assert!(matches!(
            reader.read_frame().await.unwrap_err(),
            CodecError::InvalidJson(_)
        ));
        assert_eq!(reader.read_frame().await.unwrap().unwrap()["method"], "exit");
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let header = format!("Content-Length: {}\r\n\r\n", MAX_FRAME_BYTES + 1);
        let mut reader = FrameReader::new(header.as_bytes());
        // The body is missing entirely, so draining it hits EOF.
        assert!(reader.read_frame().await.unwrap_err().is_fatal());
    }

    #[tokio::test]
    async fn test_case_insensitive_content_length_and_extra_headers() {
        let body = r#"{"jsonrpc":"2.0","id":1}"#;
        let frame = format!(
            "Content-Type: application/vscode-jsonrpc; charset=utf-8\r\ncontent-length: {}\r\n\r\n{body}",
            body.len(),
        );

        let mut reader = FrameReader::new(frame.as_bytes());
        let result = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(result["id"], 1);
    }

    #[tokio::test]
    async fn test_write_content_length_is_byte_count() {
        // "é" is 2 bytes in UTF-8; Content-Length counts bytes, not characters.
        let msg = serde_json::json!({"k": "é"});
        let mut buf = Vec::new();
        let mut writer = FrameWriter::new(&mut buf);
        writer.write_frame(&msg).await.unwrap();

        let output = String::from_utf8(buf).unwrap();
        let body = serde_json::to_string(&msg).unwrap();
        assert!(output.starts_with(&format!("Content-Length: {}\r\n\r\n", body.len())));
        assert!(output.ends_with(&body));
    }
}
