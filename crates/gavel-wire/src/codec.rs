//! Frame reader and writer over any async byte stream

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::warn;

use crate::{WireError, WireResult, LIST_SENTINEL, MAX_PAYLOAD_BYTES};

fn map_eof(err: std::io::Error) -> WireError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        WireError::Closed
    } else {
        WireError::Io(err)
    }
}

/// Reading half of a framed connection
pub struct FrameReader<R> {
    inner: BufReader<R>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
        }
    }

    /// Read a one-byte command tag; parks until one arrives
    pub async fn read_tag(&mut self) -> WireResult<u8> {
        self.inner.read_u8().await.map_err(map_eof)
    }

    /// Read a length-prefixed UTF-8 payload
    pub async fn read_text(&mut self) -> WireResult<String> {
        let len = self.inner.read_u32().await.map_err(map_eof)? as usize;
        if len > MAX_PAYLOAD_BYTES {
            return Err(WireError::PayloadTooLarge {
                len,
                max: MAX_PAYLOAD_BYTES,
            });
        }
        let mut buf = vec![0u8; len];
        self.inner.read_exact(&mut buf).await.map_err(map_eof)?;
        String::from_utf8(buf).map_err(|_| WireError::InvalidUtf8)
    }

    /// Read a payload and decode it as JSON
    pub async fn read_json<T: DeserializeOwned>(&mut self) -> WireResult<T> {
        let text = self.read_text().await?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Read a 4-byte big-endian signed integer
    pub async fn read_code(&mut self) -> WireResult<i32> {
        self.inner.read_i32().await.map_err(map_eof)
    }

    /// Read a sentinel-terminated list of JSON payloads
    ///
    /// Entries that fail to decode are skipped so the stream stays in sync
    /// with the sender.
    pub async fn read_list<T: DeserializeOwned>(&mut self) -> WireResult<Vec<T>> {
        let mut items = Vec::new();
        loop {
            let text = self.read_text().await?;
            if text == LIST_SENTINEL {
                return Ok(items);
            }
            match serde_json::from_str(&text) {
                Ok(item) => items.push(item),
                Err(e) => warn!(error = %e, "Skipping malformed list entry"),
            }
        }
    }
}

/// Writing half of a framed connection
///
/// Writes are buffered; nothing reaches the peer until [`flush`](Self::flush).
pub struct FrameWriter<W> {
    inner: BufWriter<W>,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner: BufWriter::new(inner),
        }
    }

    pub async fn write_tag(&mut self, tag: u8) -> WireResult<()> {
        self.inner.write_u8(tag).await?;
        Ok(())
    }

    pub async fn write_text(&mut self, text: &str) -> WireResult<()> {
        let bytes = text.as_bytes();
        if bytes.len() > MAX_PAYLOAD_BYTES {
            return Err(WireError::PayloadTooLarge {
                len: bytes.len(),
                max: MAX_PAYLOAD_BYTES,
            });
        }
        self.inner.write_u32(bytes.len() as u32).await?;
        self.inner.write_all(bytes).await?;
        Ok(())
    }

    pub async fn write_json<T: Serialize>(&mut self, value: &T) -> WireResult<()> {
        let text = serde_json::to_string(value)?;
        self.write_text(&text).await
    }

    pub async fn write_code(&mut self, code: i32) -> WireResult<()> {
        self.inner.write_i32(code).await?;
        Ok(())
    }

    /// Write every item as a JSON payload followed by the sentinel
    pub async fn write_list<'a, T, I>(&mut self, items: I) -> WireResult<()>
    where
        T: Serialize + 'a,
        I: IntoIterator<Item = &'a T>,
    {
        for item in items {
            self.write_json(item).await?;
        }
        self.write_text(LIST_SENTINEL).await
    }

    pub async fn flush(&mut self) -> WireResult<()> {
        self.inner.flush().await?;
        Ok(())
    }

    /// Flush and close the write direction
    pub async fn shutdown(&mut self) -> WireResult<()> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

/// Split a TCP stream into framed halves
pub fn framed(stream: TcpStream) -> (FrameReader<OwnedReadHalf>, FrameWriter<OwnedWriteHalf>) {
    let (read, write) = stream.into_split();
    (FrameReader::new(read), FrameWriter::new(write))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Probe {
        id: u32,
    }

    fn pipe() -> (
        FrameReader<tokio::io::DuplexStream>,
        FrameWriter<tokio::io::DuplexStream>,
    ) {
        let (a, b) = tokio::io::duplex(MAX_PAYLOAD_BYTES * 2);
        (FrameReader::new(a), FrameWriter::new(b))
    }

    #[tokio::test]
    async fn test_tag_payload_code_sequence() {
        let (mut reader, mut writer) = pipe();
        writer.write_tag(b'b').await.unwrap();
        writer.write_json(&Probe { id: 7 }).await.unwrap();
        writer.write_code(-1).await.unwrap();
        writer.flush().await.unwrap();

        assert_eq!(reader.read_tag().await.unwrap(), b'b');
        assert_eq!(reader.read_json::<Probe>().await.unwrap(), Probe { id: 7 });
        assert_eq!(reader.read_code().await.unwrap(), -1);
    }

    #[tokio::test]
    async fn test_code_is_big_endian() {
        let (a, mut raw) = tokio::io::duplex(64);
        let mut writer = FrameWriter::new(a);
        writer.write_code(258).await.unwrap();
        writer.flush().await.unwrap();

        let mut buf = [0u8; 4];
        raw.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [0, 0, 1, 2]);
    }

    #[tokio::test]
    async fn test_list_is_sentinel_terminated() {
        let (mut reader, mut writer) = pipe();
        let probes = vec![Probe { id: 1 }, Probe { id: 2 }];
        writer.write_list(&probes).await.unwrap();
        writer.write_list::<Probe, _>(&Vec::new()).await.unwrap();
        writer.flush().await.unwrap();

        assert_eq!(reader.read_list::<Probe>().await.unwrap(), probes);
        assert!(reader.read_list::<Probe>().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_list_entry_is_skipped() {
        let (mut reader, mut writer) = pipe();
        writer.write_text("{not json").await.unwrap();
        writer.write_json(&Probe { id: 3 }).await.unwrap();
        writer.write_text(LIST_SENTINEL).await.unwrap();
        writer.flush().await.unwrap();

        assert_eq!(reader.read_list::<Probe>().await.unwrap(), vec![Probe { id: 3 }]);
    }

    #[tokio::test]
    async fn test_malformed_json_is_recoverable() {
        let (mut reader, mut writer) = pipe();
        writer.write_text("nope").await.unwrap();
        writer.write_code(5).await.unwrap();
        writer.flush().await.unwrap();

        let err = reader.read_json::<Probe>().await.unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(reader.read_code().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_eof_maps_to_closed() {
        let (a, b) = tokio::io::duplex(64);
        drop(b);
        let mut reader = FrameReader::new(a);
        assert!(matches!(reader.read_tag().await, Err(WireError::Closed)));
    }

    #[tokio::test]
    async fn test_oversized_payload_rejected() {
        let (a, mut raw) = tokio::io::duplex(64);
        let mut reader = FrameReader::new(a);
        raw.write_u32((MAX_PAYLOAD_BYTES + 1) as u32).await.unwrap();
        let err = reader.read_text().await.unwrap_err();
        assert!(matches!(err, WireError::PayloadTooLarge { .. }));
        assert!(!err.is_recoverable());
    }
}
