//! Payload framing on the byte stream.
//!
//! The default [`Framing::Unframed`] mode sends the bare JSON payload and
//! treats the reply as complete once the bytes read so far form one whole
//! JSON value (or the peer closes). The other modes add an explicit
//! boundary for peers that expect one, using the `tokio_util` line and
//! length-delimited codecs.

use std::fmt;
use std::io;
use std::str::FromStr;

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use serde::de::IgnoredAny;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{
    Decoder, Encoder, FramedRead, LengthDelimitedCodec, LinesCodec, LinesCodecError,
};

/// How a payload is delimited on the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Framing {
    /// Bare JSON, no delimiter or length prefix.
    #[default]
    Unframed,
    /// JSON followed by a single `\n`.
    Newline,
    /// 4-byte big-endian length followed by the JSON payload.
    LengthPrefixed,
}

/// A framing name that is not one of [`unixcall_config::FRAMING_MODES`].
#[derive(Debug, thiserror::Error)]
#[error("unknown framing mode {0:?}, expected \"unframed\", \"newline\" or \"length-prefixed\"")]
pub struct UnknownFraming(pub String);

impl Framing {
    pub fn as_str(self) -> &'static str {
        match self {
            Framing::Unframed => "unframed",
            Framing::Newline => "newline",
            Framing::LengthPrefixed => "length-prefixed",
        }
    }

    /// Wrap a payload in this framing.
    pub fn encode(self, payload: &[u8]) -> io::Result<Vec<u8>> {
        let mut frame = BytesMut::with_capacity(payload.len() + 4);
        match self {
            Framing::Unframed => frame.extend_from_slice(payload),
            Framing::Newline => {
                let line = std::str::from_utf8(payload)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
                LinesCodec::new()
                    .encode(line, &mut frame)
                    .map_err(|e| lines_error(e, usize::MAX))?;
            }
            Framing::LengthPrefixed => {
                length_delimited(u32::MAX as usize)
                    .encode(Bytes::copy_from_slice(payload), &mut frame)?;
            }
        }
        Ok(frame.to_vec())
    }

    /// Frame `payload` and write it with a single `write_all`, then flush.
    pub async fn write_frame<W>(self, writer: &mut W, payload: &[u8]) -> io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let frame = self.encode(payload)?;
        writer.write_all(&frame).await?;
        writer.flush().await
    }

    /// Read one frame and return its payload.
    ///
    /// Fails with `UnexpectedEof` if the peer closes before a frame is
    /// complete (or before sending anything), and with `InvalidData` if the
    /// payload would exceed `limit`.
    pub async fn read_frame<R>(self, reader: &mut R, limit: usize) -> io::Result<Vec<u8>>
    where
        R: AsyncRead + Unpin,
    {
        match self {
            Framing::Unframed => Ok(next_frame(reader, JsonValueCodec { limit }).await?.to_vec()),
            Framing::Newline => {
                let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(limit));
                match lines.next().await {
                    Some(Ok(line)) => Ok(line.into_bytes()),
                    Some(Err(e)) => Err(lines_error(e, limit)),
                    None => Err(closed_before_reply()),
                }
            }
            Framing::LengthPrefixed => {
                let frame = next_frame(reader, length_delimited(limit)).await?;
                if frame.is_empty() {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "received zero-length frame",
                    ));
                }
                Ok(frame.to_vec())
            }
        }
    }
}

impl fmt::Display for Framing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Framing {
    type Err = UnknownFraming;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unframed" => Ok(Framing::Unframed),
            "newline" => Ok(Framing::Newline),
            "length-prefixed" => Ok(Framing::LengthPrefixed),
            other => Err(UnknownFraming(other.to_string())),
        }
    }
}

fn length_delimited(max_frame_length: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .big_endian()
        .length_field_length(4)
        .max_frame_length(max_frame_length)
        .new_codec()
}

fn closed_before_reply() -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "peer closed the connection before sending any data",
    )
}

fn too_large(limit: usize) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("payload exceeds the {limit} byte limit"),
    )
}

fn lines_error(e: LinesCodecError, limit: usize) -> io::Error {
    match e {
        LinesCodecError::MaxLineLengthExceeded => too_large(limit),
        LinesCodecError::Io(e) => e,
    }
}

/// Pull the first frame off `reader`.
async fn next_frame<R, D>(reader: &mut R, decoder: D) -> io::Result<BytesMut>
where
    R: AsyncRead + Unpin,
    D: Decoder<Item = BytesMut, Error = io::Error> + Unpin,
{
    let mut frames = FramedRead::new(reader, decoder);
    match frames.next().await {
        Some(Ok(frame)) => Ok(frame),
        // FramedRead reports a partial frame left at EOF as `Other`.
        Some(Err(e)) if e.kind() == io::ErrorKind::Other => Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("peer closed the connection mid-frame: {e}"),
        )),
        Some(Err(e)) => Err(e),
        None => Err(closed_before_reply()),
    }
}

/// True while `buf` is a strict prefix of some JSON value.
fn json_incomplete(buf: &[u8]) -> bool {
    match serde_json::from_slice::<IgnoredAny>(buf) {
        Ok(_) => false,
        Err(e) => e.is_eof(),
    }
}

/// Yields the buffered bytes once they hold one complete JSON value.
///
/// At EOF whatever arrived is the payload; malformed JSON surfaces when the
/// message is decoded.
struct JsonValueCodec {
    limit: usize,
}

impl Decoder for JsonValueCodec {
    type Item = BytesMut;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> io::Result<Option<BytesMut>> {
        if src.len() > self.limit {
            return Err(too_large(self.limit));
        }
        if json_incomplete(src) {
            return Ok(None);
        }
        Ok(Some(src.split()))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> io::Result<Option<BytesMut>> {
        if src.len() > self.limit {
            return Err(too_large(self.limit));
        }
        if src.is_empty() {
            return Ok(None);
        }
        Ok(Some(src.split()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use unixcall_config::FRAMING_MODES;

    const PAYLOAD: &[u8] = br#"{"text":"Hello, server!","id":1}"#;

    /// Feed `parts` into a duplex pipe one write at a time, then close it.
    fn piecewise(parts: &'static [&'static str]) -> tokio::io::DuplexStream {
        let (mut tx, rx) = tokio::io::duplex(64);
        tokio::spawn(async move {
            for part in parts {
                tx.write_all(part.as_bytes()).await.unwrap();
                tokio::task::yield_now().await;
            }
        });
        rx
    }

    #[test]
    fn test_parse_names() {
        for name in FRAMING_MODES {
            let framing: Framing = name.parse().unwrap();
            assert_eq!(framing.as_str(), name);
        }
        assert!("chunked".parse::<Framing>().is_err());
        assert_eq!(Framing::default(), Framing::Unframed);
    }

    #[test]
    fn test_encode_shapes() {
        assert_eq!(Framing::Unframed.encode(PAYLOAD).unwrap(), PAYLOAD);

        let newline = Framing::Newline.encode(PAYLOAD).unwrap();
        assert_eq!(newline.last(), Some(&b'\n'));
        assert_eq!(&newline[..PAYLOAD.len()], PAYLOAD);

        let prefixed = Framing::LengthPrefixed.encode(PAYLOAD).unwrap();
        assert_eq!(&prefixed[..4], &(PAYLOAD.len() as u32).to_be_bytes());
        assert_eq!(&prefixed[4..], PAYLOAD);
    }

    #[tokio::test]
    async fn test_unframed_reads_split_value() {
        let mut rx = piecewise(&[r#"{"text":"Hel"#, r#"lo, server!","#, r#""id":1}"#]);
        let got = Framing::Unframed.read_frame(&mut rx, 1024).await.unwrap();
        assert_eq!(got, PAYLOAD);
    }

    #[tokio::test]
    async fn test_unframed_stops_at_complete_value_without_eof() {
        // The writer half stays open: completion must not depend on EOF.
        let (mut tx, mut rx) = tokio::io::duplex(256);
        tx.write_all(PAYLOAD).await.unwrap();
        let got = Framing::Unframed.read_frame(&mut rx, 1024).await.unwrap();
        assert_eq!(got, PAYLOAD);
        drop(tx);
    }

    #[tokio::test]
    async fn test_unframed_returns_truncated_bytes_on_close() {
        let mut rx = piecewise(&[r#"{"text":"x""#]);
        let got = Framing::Unframed.read_frame(&mut rx, 1024).await.unwrap();
        assert_eq!(got, br#"{"text":"x""#);
    }

    #[tokio::test]
    async fn test_empty_stream_is_unexpected_eof() {
        for framing in [Framing::Unframed, Framing::Newline, Framing::LengthPrefixed] {
            let mut empty: &[u8] = &[];
            let err = framing.read_frame(&mut empty, 1024).await.unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof, "{framing}");
        }
    }

    #[tokio::test]
    async fn test_limit_enforced() {
        let mut input: &[u8] = PAYLOAD;
        let err = Framing::Unframed.read_frame(&mut input, 8).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        let framed = Framing::LengthPrefixed.encode(PAYLOAD).unwrap();
        let mut input: &[u8] = &framed;
        let err = Framing::LengthPrefixed
            .read_frame(&mut input, 8)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_newline_strips_delimiter() {
        let mut rx = piecewise(&["{\"text\":\"a\",", "\"id\":2}\n"]);
        let got = Framing::Newline.read_frame(&mut rx, 1024).await.unwrap();
        assert_eq!(got, br#"{"text":"a","id":2}"#);
    }

    #[tokio::test]
    async fn test_length_prefixed_rejects_zero_length() {
        let mut input: &[u8] = &[0, 0, 0, 0];
        let err = Framing::LengthPrefixed
            .read_frame(&mut input, 1024)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_newline_limit_enforced() {
        let mut rx = piecewise(&["{\"text\":\"far too long\",\"id\":2}\n"]);
        let err = Framing::Newline.read_frame(&mut rx, 8).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_newline_without_delimiter_reads_to_eof() {
        let mut rx = piecewise(&[r#"{"text":"a","#, r#""id":2}"#]);
        let got = Framing::Newline.read_frame(&mut rx, 1024).await.unwrap();
        assert_eq!(got, br#"{"text":"a","id":2}"#);
    }

    #[test]
    fn test_newline_encode_rejects_non_utf8() {
        let err = Framing::Newline.encode(&[0xff, 0xfe]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_length_prefixed_short_header_is_eof() {
        let mut input: &[u8] = &[0, 0];
        let err = Framing::LengthPrefixed
            .read_frame(&mut input, 1024)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_length_prefixed_short_body_is_eof() {
        let mut input: &[u8] = &[0, 0, 0, 10, b'{'];
        let err = Framing::LengthPrefixed
            .read_frame(&mut input, 1024)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_write_frame_then_read_frame() {
        for framing in [Framing::Unframed, Framing::Newline, Framing::LengthPrefixed] {
            let (mut tx, mut rx) = tokio::io::duplex(256);
            framing.write_frame(&mut tx, PAYLOAD).await.unwrap();
            drop(tx);
            let got = framing.read_frame(&mut rx, 1024).await.unwrap();
            assert_eq!(got, PAYLOAD, "{framing}");
        }
    }
}
