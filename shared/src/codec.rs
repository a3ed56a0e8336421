//! Frame encoding and exact-length frame reads.

use crate::error::NetError;
use crate::protocol::{Envelope, MessageType};
use crate::{HEADER_SIZE, MAX_BODY_BYTES, PROTOCOL_VERSION};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Encodes one frame: the 16-byte header followed by the raw body.
pub fn encode(
    message_type: MessageType,
    seq: u32,
    body: &[u8],
    flags: u16,
) -> Result<Vec<u8>, NetError> {
    if body.len() > MAX_BODY_BYTES {
        return Err(NetError::BodyTooLarge { len: body.len() });
    }

    let envelope = Envelope::new(message_type, seq, body.len() as u32).with_flags(flags);
    let mut frame = Vec::with_capacity(HEADER_SIZE + body.len());
    frame.extend_from_slice(&envelope.encode()?);
    frame.extend_from_slice(body);
    Ok(frame)
}

/// Reads one frame off the stream.
///
/// The header is validated before any body byte is read, so an oversized
/// `body_len` is rejected without allocating or reading the body.
pub async fn read_frame<R>(reader: &mut R) -> Result<(Envelope, Vec<u8>), NetError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut header = [0u8; HEADER_SIZE];
    read_exact_or_closed(reader, &mut header).await?;
    let envelope = Envelope::decode(&header)?;

    if envelope.version != PROTOCOL_VERSION {
        return Err(NetError::VersionMismatch {
            expected: PROTOCOL_VERSION,
            actual: envelope.version,
        });
    }

    if envelope.body_len as usize > MAX_BODY_BYTES {
        return Err(NetError::DeclaredBodyTooLarge {
            len: envelope.body_len,
        });
    }

    if envelope.body_len == 0 {
        return Ok((envelope, Vec::new()));
    }

    let mut body = vec![0u8; envelope.body_len as usize];
    read_exact_or_closed(reader, &mut body).await?;
    Ok((envelope, body))
}

/// Fills `buf` completely, looping over short reads.
///
/// A zero-byte read before the buffer is full means the peer closed the stream.
async fn read_exact_or_closed<R>(reader: &mut R, buf: &mut [u8]) -> Result<(), NetError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Err(NetError::ConnectionClosed);
        }
        filled += n;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Handshake;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_frame_roundtrip() {
        let body = b"hello frame".to_vec();
        let frame = encode(MessageType(42), 17, &body, 3).unwrap();
        assert_eq!(frame.len(), HEADER_SIZE + body.len());

        let (envelope, decoded) = read_frame(&mut frame.as_slice()).await.unwrap();
        assert_eq!(envelope.version, PROTOCOL_VERSION);
        assert_eq!(envelope.flags, 3);
        assert_eq!(envelope.message_type, MessageType(42));
        assert_eq!(envelope.seq, 17);
        assert_eq!(envelope.body_len as usize, body.len());
        assert_eq!(decoded, body);
    }

    #[tokio::test]
    async fn test_empty_body_frame() {
        let frame = encode(MessageType::PING, 1, &[], 0).unwrap();
        assert_eq!(frame.len(), HEADER_SIZE);

        let (envelope, body) = read_frame(&mut frame.as_slice()).await.unwrap();
        assert_eq!(envelope.message_type, MessageType::PING);
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_max_body_roundtrip() {
        let body = vec![0x5a; MAX_BODY_BYTES];
        let frame = encode(MessageType::PONG, u32::MAX, &body, 0).unwrap();

        let (envelope, decoded) = read_frame(&mut frame.as_slice()).await.unwrap();
        assert_eq!(envelope.seq, u32::MAX);
        assert_eq!(decoded.len(), MAX_BODY_BYTES);
    }

    #[test]
    fn test_encode_rejects_oversized_body() {
        let too_big = vec![0u8; MAX_BODY_BYTES + 1];
        let err = encode(MessageType::PING, 1, &too_big, 0).unwrap_err();
        assert!(matches!(err, NetError::BodyTooLarge { len } if len == MAX_BODY_BYTES + 1));
    }

    #[tokio::test]
    async fn test_read_handles_three_byte_chunks() {
        let body = Handshake::request(PROTOCOL_VERSION, 123).encode().unwrap();
        let frame = encode(MessageType::HANDSHAKE, 1, &body, 0).unwrap();

        let mut builder = Builder::new();
        for chunk in frame.chunks(3) {
            builder.read(chunk);
        }
        let mut stream = builder.build();

        let (envelope, body) = read_frame(&mut stream).await.unwrap();
        assert_eq!(envelope.message_type, MessageType::HANDSHAKE);
        let hs = Handshake::decode(&body).unwrap();
        assert_eq!(hs.nonce, 123);
        assert_eq!(hs.protocol_version, PROTOCOL_VERSION);
    }

    #[tokio::test]
    async fn test_declared_body_too_large_rejected_before_body_read() {
        let mut header = Envelope::new(MessageType::PING, 1, 0).encode().unwrap();
        header[12..16].copy_from_slice(&((MAX_BODY_BYTES as u32) + 1).to_le_bytes());

        // Only the header is available; reading a body would surface ConnectionClosed.
        let err = read_frame(&mut header.as_slice()).await.unwrap_err();
        assert!(matches!(err, NetError::DeclaredBodyTooLarge { .. }));
        assert!(err.is_protocol_error());
    }

    #[tokio::test]
    async fn test_version_mismatch_is_protocol_error() {
        let mut frame = encode(MessageType::PING, 1, &[], 0).unwrap();
        frame[0] = 2;

        let err = read_frame(&mut frame.as_slice()).await.unwrap_err();
        assert!(matches!(
            err,
            NetError::VersionMismatch {
                expected: 1,
                actual: 2
            }
        ));
    }

    #[tokio::test]
    async fn test_truncated_header_is_connection_closed() {
        let frame = encode(MessageType::PING, 1, &[], 0).unwrap();
        let err = read_frame(&mut &frame[..10]).await.unwrap_err();
        assert!(matches!(err, NetError::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_truncated_body_is_connection_closed() {
        let frame = encode(MessageType::PING, 1, &[1, 2, 3, 4], 0).unwrap();
        let err = read_frame(&mut &frame[..HEADER_SIZE + 2]).await.unwrap_err();
        assert!(matches!(err, NetError::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_consecutive_frames_on_one_stream() {
        let mut bytes = encode(MessageType::PING, 1, &[], 0).unwrap();
        bytes.extend(encode(MessageType::PONG, 2, &[9, 9], 0).unwrap());
        let mut reader = bytes.as_slice();

        let (first, _) = read_frame(&mut reader).await.unwrap();
        let (second, body) = read_frame(&mut reader).await.unwrap();
        assert_eq!(first.seq, 1);
        assert_eq!(second.seq, 2);
        assert_eq!(body, vec![9, 9]);
        assert!(matches!(
            read_frame(&mut reader).await,
            Err(NetError::ConnectionClosed)
        ));
    }
}
