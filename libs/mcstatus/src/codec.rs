//! Packet framing for the Server List Ping exchange.
//!
//! Wire format:
//! - varint: 1 to 5 bytes, 7 data bits per byte, high bit = continuation
//! - string: varint byte length followed by UTF-8
//! - frame:  varint(length of id + body) || varint(packet id) || body

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::StatusError;

/// Longest legal varint encoding of an i32.
pub const MAX_VARINT_LEN: usize = 5;

/// Largest frame accepted from a server (favicons make status documents big).
pub const MAX_FRAME_LEN: usize = 2 * 1024 * 1024;

/// Handshake packet ID (client -> server).
pub const HANDSHAKE_ID: i32 = 0x00;

/// Status request and status response packet ID.
pub const STATUS_ID: i32 = 0x00;

/// Ping and pong packet ID.
pub const PING_ID: i32 = 0x01;

/// Handshake `next_state` value selecting the status protocol.
pub const NEXT_STATE_STATUS: i32 = 1;

/// Append a varint.
pub fn put_varint(buf: &mut BytesMut, value: i32) {
    let mut remaining = value as u32;
    loop {
        if remaining & !0x7f == 0 {
            buf.put_u8(remaining as u8);
            return;
        }
        buf.put_u8((remaining as u8 & 0x7f) | 0x80);
        remaining >>= 7;
    }
}

/// Consume a varint from a complete buffer.
pub fn get_varint(buf: &mut impl Buf) -> Result<i32, StatusError> {
    let mut value = 0u32;
    for i in 0..MAX_VARINT_LEN {
        if !buf.has_remaining() {
            return Err(StatusError::Malformed("truncated varint".to_string()));
        }
        let byte = buf.get_u8();
        value |= u32::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(value as i32);
        }
    }
    Err(StatusError::Malformed(format!(
        "varint longer than {MAX_VARINT_LEN} bytes"
    )))
}

/// Append a length-prefixed UTF-8 string.
pub fn put_string(buf: &mut BytesMut, value: &str) {
    put_varint(buf, value.len() as i32);
    buf.put_slice(value.as_bytes());
}

/// Consume a length-prefixed UTF-8 string.
pub fn get_string(buf: &mut impl Buf) -> Result<String, StatusError> {
    let len = get_varint(buf)?;
    let len = usize::try_from(len)
        .map_err(|_| StatusError::Malformed(format!("negative string length {len}")))?;
    if buf.remaining() < len {
        return Err(StatusError::Malformed(format!(
            "string length {len} exceeds remaining {} bytes",
            buf.remaining()
        )));
    }
    let raw = buf.copy_to_bytes(len);
    String::from_utf8(raw.to_vec())
        .map_err(|e| StatusError::Malformed(format!("string is not UTF-8: {e}")))
}

/// Frame a packet body with its ID and length prefix.
pub fn encode_frame(packet_id: i32, body: &[u8]) -> Bytes {
    let mut inner = BytesMut::with_capacity(body.len() + MAX_VARINT_LEN);
    put_varint(&mut inner, packet_id);
    inner.put_slice(body);

    let mut framed = BytesMut::with_capacity(inner.len() + MAX_VARINT_LEN);
    put_varint(&mut framed, inner.len() as i32);
    framed.put_slice(&inner);
    framed.freeze()
}

/// Handshake announcing a status query against `host:port`.
pub fn handshake(protocol_version: i32, host: &str, port: u16) -> Bytes {
    let mut body = BytesMut::new();
    put_varint(&mut body, protocol_version);
    put_string(&mut body, host);
    body.put_u16(port);
    put_varint(&mut body, NEXT_STATE_STATUS);
    encode_frame(HANDSHAKE_ID, &body)
}

/// Empty status request.
pub fn status_request() -> Bytes {
    encode_frame(STATUS_ID, &[])
}

/// Ping carrying an opaque payload the server echoes back.
pub fn ping(payload: i64) -> Bytes {
    encode_frame(PING_ID, &payload.to_be_bytes())
}

/// Split a frame into its packet ID and body.
pub fn split_packet(frame: Bytes) -> Result<(i32, Bytes), StatusError> {
    let mut frame = frame;
    let packet_id = get_varint(&mut frame)?;
    Ok((packet_id, frame))
}

/// Read a varint directly from a stream.
pub async fn read_varint<R: AsyncRead + Unpin>(reader: &mut R) -> Result<i32, StatusError> {
    let mut value = 0u32;
    for i in 0..MAX_VARINT_LEN {
        let byte = reader.read_u8().await?;
        value |= u32::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(value as i32);
        }
    }
    Err(StatusError::Malformed(format!(
        "varint longer than {MAX_VARINT_LEN} bytes"
    )))
}

/// Read one length-prefixed frame (packet ID and body) from a stream.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Bytes, StatusError> {
    let len = read_varint(reader).await?;
    let len = match usize::try_from(len) {
        Ok(len) if len > 0 && len <= MAX_FRAME_LEN => len,
        _ => {
            return Err(StatusError::Malformed(format!("invalid frame length {len}")));
        }
    };

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(Bytes::from(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, &[0x00])]
    #[case(1, &[0x01])]
    #[case(127, &[0x7f])]
    #[case(128, &[0x80, 0x01])]
    #[case(255, &[0xff, 0x01])]
    #[case(25565, &[0xdd, 0xc7, 0x01])]
    #[case(2_147_483_647, &[0xff, 0xff, 0xff, 0xff, 0x07])]
    #[case(-1, &[0xff, 0xff, 0xff, 0xff, 0x0f])]
    fn test_varint_encoding(#[case] value: i32, #[case] expected: &[u8]) {
        let mut buf = BytesMut::new();
        put_varint(&mut buf, value);
        assert_eq!(&buf[..], expected);

        let mut read = Bytes::copy_from_slice(expected);
        assert_eq!(get_varint(&mut read).unwrap(), value);
        assert!(!read.has_remaining());
    }

    #[test]
    fn test_overlong_varint_is_malformed() {
        let mut buf = Bytes::from_static(&[0x80, 0x80, 0x80, 0x80, 0x80, 0x01]);
        let err = get_varint(&mut buf).unwrap_err();
        assert!(matches!(err, StatusError::Malformed(_)));
    }

    #[test]
    fn test_truncated_string_is_malformed() {
        let mut buf = BytesMut::new();
        put_varint(&mut buf, 10);
        buf.put_slice(b"abc");
        let err = get_string(&mut buf.freeze()).unwrap_err();
        assert!(matches!(err, StatusError::Malformed(_)));
    }

    #[test]
    fn test_handshake_layout() {
        let frame = handshake(47, "mc.example.com", 25565);
        let mut buf = frame.clone();

        let len = get_varint(&mut buf).unwrap();
        assert_eq!(len as usize, buf.remaining());
        assert_eq!(get_varint(&mut buf).unwrap(), HANDSHAKE_ID);
        assert_eq!(get_varint(&mut buf).unwrap(), 47);
        assert_eq!(get_string(&mut buf).unwrap(), "mc.example.com");
        assert_eq!(buf.get_u16(), 25565);
        assert_eq!(get_varint(&mut buf).unwrap(), NEXT_STATE_STATUS);
        assert!(!buf.has_remaining());
    }

    #[test]
    fn test_status_request_is_minimal() {
        assert_eq!(&status_request()[..], &[0x01, 0x00]);
    }

    #[tokio::test]
    async fn test_read_frame_from_stream() {
        let frame = ping(42);
        let mut reader = &frame[..];

        let body = read_frame(&mut reader).await.unwrap();
        let (packet_id, mut payload) = split_packet(body).unwrap();
        assert_eq!(packet_id, PING_ID);
        assert_eq!(payload.get_i64(), 42);
    }

    #[tokio::test]
    async fn test_zero_length_frame_rejected() {
        let mut reader: &[u8] = &[0x00];
        let err = read_frame(&mut reader).await.unwrap_err();
        assert!(matches!(err, StatusError::Malformed(_)));
    }
}
