//! Length-prefixed wire frame codec.
//!
//! Every message on both the terminal link and the host link is wrapped in
//! a `<2-byte big-endian length><payload>` frame. The terminal link's
//! payload additionally carries a 5-byte TPDU ahead of the ISO 8583 body;
//! that split is the caller's concern, not this codec's — this module only
//! knows about the length prefix.

mod error;

pub use error::FrameError;

use bytes::{Bytes, BytesMut};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum payload size in bytes, per spec.
pub const MAX_FRAME_LEN: u16 = 4096;

/// Read one frame from `stream`, enforcing `deadline` across the whole read.
///
/// Distinguishes a clean EOF (remote closed before any bytes), a deadline
/// timeout, and a malformed length prefix so callers can apply the right
/// policy for each.
pub async fn read_frame<S>(stream: &mut S, deadline: Duration) -> Result<Bytes, FrameError>
where
    S: AsyncRead + Unpin,
{
    let fut = read_frame_inner(stream);
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(FrameError::Timeout(deadline)),
    }
}

async fn read_frame_inner<S>(stream: &mut S) -> Result<Bytes, FrameError>
where
    S: AsyncRead + Unpin,
{
    let mut header = [0u8; 2];
    match stream.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Err(FrameError::Eof),
        Err(e) => return Err(FrameError::Io(e)),
    }

    let len = u16::from_be_bytes(header);
    if len == 0 || len > MAX_FRAME_LEN {
        return Err(FrameError::Format(len, MAX_FRAME_LEN));
    }

    let mut payload = BytesMut::zeroed(len as usize);
    match stream.read_exact(&mut payload).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Err(FrameError::Eof),
        Err(e) => return Err(FrameError::Io(e)),
    }

    Ok(payload.freeze())
}

/// Write one frame: a 2-byte big-endian length prefix followed by `payload`.
pub async fn write_frame<S>(stream: &mut S, payload: &[u8]) -> Result<(), FrameError>
where
    S: AsyncWrite + Unpin,
{
    if payload.is_empty() || payload.len() > MAX_FRAME_LEN as usize {
        return Err(FrameError::Format(payload.len() as u16, MAX_FRAME_LEN));
    }

    let mut buf = BytesMut::with_capacity(2 + payload.len());
    buf.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    buf.extend_from_slice(payload);

    stream.write_all(&buf).await?;
    stream.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn round_trip() {
        let (mut a, mut b) = duplex(4096);
        write_frame(&mut a, b"hello").await.unwrap();
        let got = read_frame(&mut b, Duration::from_secs(1)).await.unwrap();
        assert_eq!(&got[..], b"hello");
    }

    #[tokio::test]
    async fn rejects_zero_length() {
        let (mut a, mut b) = duplex(4096);
        a.write_all(&0u16.to_be_bytes()).await.unwrap();
        let err = read_frame(&mut b, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, FrameError::Format(0, MAX_FRAME_LEN)));
    }

    #[tokio::test]
    async fn rejects_oversize_length() {
        let (mut a, mut b) = duplex(8192);
        a.write_all(&(MAX_FRAME_LEN + 1).to_be_bytes()).await.unwrap();
        let err = read_frame(&mut b, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, FrameError::Format(_, MAX_FRAME_LEN)));
    }

    #[tokio::test]
    async fn clean_eof_before_header() {
        let (a, mut b) = duplex(4096);
        drop(a);
        let err = read_frame(&mut b, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, FrameError::Eof));
    }

    #[tokio::test]
    async fn timeout_when_no_data_arrives() {
        let (_a, mut b) = duplex(4096);
        let err = read_frame(&mut b, Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, FrameError::Timeout(_)));
    }

    #[tokio::test]
    async fn write_rejects_oversize_payload() {
        let (mut a, _b) = duplex(8192);
        let big = vec![0u8; MAX_FRAME_LEN as usize + 1];
        let err = write_frame(&mut a, &big).await.unwrap_err();
        assert!(matches!(err, FrameError::Format(_, MAX_FRAME_LEN)));
    }
}
