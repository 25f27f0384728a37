//! Length-prefixed request framing over a unix stream socket.
//!
//! A frame is `(type: i64, length: i64)` followed by `length` payload bytes.
//! Frames only ever carry requests; replies are written bare (see the crate
//! docs). All functions take `&UnixStream` and drive readiness themselves so
//! a stream shared between tasks can be used without exclusive access.

use std::io::{self, ErrorKind};

use tokio::net::UnixStream;

/// Size of the `(type, length)` prefix in bytes.
pub const FRAME_HEADER_SIZE: usize = 16;

/// Upper bound on a frame payload. Real payloads are fixed-size structs; a
/// length beyond this means the stream is corrupt.
pub const MAX_FRAME_PAYLOAD: usize = 4096;

/// Read exactly `buf.len()` bytes.
///
/// Returns `Ok(false)` if the peer closed the stream before the first byte,
/// `Err(UnexpectedEof)` if it closed mid-buffer.
async fn read_full(stream: &UnixStream, buf: &mut [u8]) -> io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        stream.readable().await?;
        match stream.try_read(&mut buf[filled..]) {
            Ok(0) => {
                if filled == 0 {
                    return Ok(false);
                }
                return Err(ErrorKind::UnexpectedEof.into());
            }
            Ok(n) => filled += n,
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}

/// Write all of `buf`.
pub async fn write_full(stream: &UnixStream, buf: &[u8]) -> io::Result<()> {
    let mut written = 0;
    while written < buf.len() {
        stream.writable().await?;
        match stream.try_write(&buf[written..]) {
            Ok(n) => written += n,
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Write one framed message.
pub async fn write_frame(stream: &UnixStream, ty: i64, payload: &[u8]) -> io::Result<()> {
    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    frame.extend_from_slice(&ty.to_le_bytes());
    frame.extend_from_slice(&(payload.len() as i64).to_le_bytes());
    frame.extend_from_slice(payload);
    write_full(stream, &frame).await
}

/// Read one framed message.
///
/// Returns `Ok(None)` on a clean close (the peer hung up between frames).
/// A close mid-frame or a nonsensical length is an error.
pub async fn read_frame(stream: &UnixStream) -> io::Result<Option<(i64, Vec<u8>)>> {
    let mut header = [0u8; FRAME_HEADER_SIZE];
    if !read_full(stream, &mut header).await? {
        return Ok(None);
    }
    let ty = i64::from_le_bytes(header[0..8].try_into().unwrap());
    let len = i64::from_le_bytes(header[8..16].try_into().unwrap());
    if len < 0 || len as usize > MAX_FRAME_PAYLOAD {
        return Err(io::Error::new(
            ErrorKind::InvalidData,
            format!("frame length {len} out of range"),
        ));
    }
    let mut payload = vec![0u8; len as usize];
    if !read_full(stream, &mut payload).await? && len != 0 {
        return Err(ErrorKind::UnexpectedEof.into());
    }
    Ok(Some((ty, payload)))
}
