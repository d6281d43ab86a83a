//! Framed transport
//!
//! Each message travels as a 4-byte big-endian length followed by a
//! MessagePack body. The framing layer is payload-agnostic; the typed
//! send/recv pairs keep request and response directions apart.

use std::io::{self, Read, Write};

use bytes::{Buf, BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::trace;

use crate::messages::{Request, Response};

/// Maximum frame payload (16 MiB); a batch of file names never comes
/// close, so anything larger is a corrupt or hostile stream.
pub const MAX_PAYLOAD: usize = 16 * 1024 * 1024;

const LEN_PREFIX: usize = 4;

/// Transport failures.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// Peer closed the connection at a frame boundary.
    #[error("connection closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("frame of {0} bytes exceeds the payload limit")]
    TooLarge(usize),
}

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtoError>;

/// A blocking framed message stream.
pub struct FramedStream<S> {
    stream: S,
    buf: BytesMut,
}

impl<S: Read + Write> FramedStream<S> {
    /// Wrap a connected stream.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buf: BytesMut::with_capacity(4096),
        }
    }

    /// The underlying stream, for shutdown control.
    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    /// Send one client request.
    pub fn send_request(&mut self, request: &Request) -> Result<()> {
        self.send(request)
    }

    /// Receive one client request.
    pub fn recv_request(&mut self) -> Result<Request> {
        self.recv()
    }

    /// Send one server response.
    pub fn send_response(&mut self, response: &Response) -> Result<()> {
        self.send(response)
    }

    /// Receive one server response.
    pub fn recv_response(&mut self) -> Result<Response> {
        self.recv()
    }

    fn send<T: Serialize>(&mut self, message: &T) -> Result<()> {
        let payload = rmp_serde::to_vec(message)?;
        if payload.len() > MAX_PAYLOAD {
            return Err(ProtoError::TooLarge(payload.len()));
        }
        self.buf.clear();
        self.buf.reserve(LEN_PREFIX + payload.len());
        self.buf.put_u32(payload.len() as u32);
        self.buf.put_slice(&payload);
        self.stream.write_all(&self.buf)?;
        self.stream.flush()?;
        trace!(bytes = payload.len(), "frame sent");
        Ok(())
    }

    fn recv<T: DeserializeOwned>(&mut self) -> Result<T> {
        let mut header = [0u8; LEN_PREFIX];
        read_full(&mut self.stream, &mut header, true)?;
        let len = u32::from_be_bytes(header) as usize;
        if len > MAX_PAYLOAD {
            return Err(ProtoError::TooLarge(len));
        }

        self.buf.clear();
        self.buf.resize(len, 0);
        read_full(&mut self.stream, &mut self.buf, false)?;
        trace!(bytes = len, "frame received");
        let message = rmp_serde::from_slice(self.buf.chunk())?;
        Ok(message)
    }
}

/// Read exactly `buf.len()` bytes. EOF before the first byte of a frame
/// is a clean close; EOF mid-frame is an error.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8], at_boundary: bool) -> Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => {
                if at_boundary && filled == 0 {
                    return Err(ProtoError::Closed);
                }
                return Err(ProtoError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "truncated frame",
                )));
            }
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::os::unix::net::UnixStream;
    use std::thread;

    use super::*;

    fn pair() -> (FramedStream<UnixStream>, FramedStream<UnixStream>) {
        let (a, b) = UnixStream::pair().unwrap();
        (FramedStream::new(a), FramedStream::new(b))
    }

    #[test]
    fn test_request_round_trip() {
        let (mut client, mut server) = pair();
        let request = Request::Migrate {
            key: 0xfeed,
            req_num: 7,
            pid: 1234,
            pools: "p1,p2".into(),
            target_state: 2,
        };
        client.send_request(&request).unwrap();
        let received = server.recv_request().unwrap();
        assert_eq!(received, request);
    }

    #[test]
    fn test_response_round_trip_preserves_counters() {
        let (mut client, mut server) = pair();
        let response = Response::ReqStatus {
            success: true,
            req_num: 7,
            pid: 99,
            resident: 1,
            premigrated: 2,
            migrated: 3,
            failed: 4,
            done: false,
        };
        server.send_response(&response).unwrap();
        assert_eq!(client.recv_response().unwrap(), response);
    }

    #[test]
    fn test_many_frames_in_sequence() {
        let (mut client, mut server) = pair();
        let writer = thread::spawn(move || {
            for i in 0..100i64 {
                client
                    .send_request(&Request::ReqStatus {
                        key: 1,
                        req_num: i,
                        pid: 0,
                    })
                    .unwrap();
            }
        });
        for i in 0..100i64 {
            match server.recv_request().unwrap() {
                Request::ReqStatus { req_num, .. } => assert_eq!(req_num, i),
                other => panic!("unexpected message: {other:?}"),
            }
        }
        writer.join().unwrap();
    }

    #[test]
    fn test_clean_close_is_distinguished() {
        let (client, mut server) = pair();
        drop(client);
        assert!(matches!(
            server.recv_request().unwrap_err(),
            ProtoError::Closed
        ));
    }

    #[test]
    fn test_oversize_frame_rejected() {
        let (mut client, mut server) = pair();
        // Hand-craft a header announcing an absurd payload.
        use std::io::Write as _;
        let header = ((MAX_PAYLOAD + 1) as u32).to_be_bytes();
        client.get_ref().write_all(&header).unwrap();
        client.get_ref().flush().unwrap();
        assert!(matches!(
            server.recv_request().unwrap_err(),
            ProtoError::TooLarge(_)
        ));
    }

    #[test]
    fn test_empty_batch_round_trips() {
        let (mut client, mut server) = pair();
        let request = Request::SendObjects {
            key: 1,
            req_num: 2,
            file_names: vec![String::new()],
        };
        client.send_request(&request).unwrap();
        assert_eq!(server.recv_request().unwrap(), request);
    }
}
