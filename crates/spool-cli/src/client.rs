//! Blocking protocol client
//!
//! Connects to the daemon socket, reads the session key the daemon
//! published, and performs the request-number handshake every command
//! starts with.

use std::fs;
use std::os::unix::net::UnixStream;

use anyhow::{bail, Context as _, Result};

use spool_config::DaemonConfig;
use spool_proto::{FramedStream, Request, Response};

/// One connected, handshaken client session.
pub struct Client {
    framed: FramedStream<UnixStream>,
    key: u64,
    req_num: i64,
}

impl Client {
    /// Connect and perform the request-number handshake.
    pub fn connect(config: &DaemonConfig) -> Result<Self> {
        let key_raw = fs::read_to_string(config.key_path())
            .with_context(|| "cannot read the session key; is the daemon running?")?;
        let key = u64::from_str_radix(key_raw.trim(), 16)
            .with_context(|| "malformed session key file")?;

        let stream = UnixStream::connect(config.socket_path())
            .with_context(|| "cannot connect to the daemon socket")?;
        let mut client = Self {
            framed: FramedStream::new(stream),
            key,
            req_num: 0,
        };

        client.send(&Request::ReqNum { key })?;
        match client.recv()? {
            Response::ReqNum { success: true, req_num } => client.req_num = req_num,
            other => bail!("unexpected handshake response: {other:?}"),
        }
        Ok(client)
    }

    /// Connect without the handshake; used by the stop command, which
    /// must go through even while the daemon rejects new work.
    pub fn connect_raw(config: &DaemonConfig) -> Result<Self> {
        let key_raw = fs::read_to_string(config.key_path())
            .with_context(|| "cannot read the session key; is the daemon running?")?;
        let key = u64::from_str_radix(key_raw.trim(), 16)
            .with_context(|| "malformed session key file")?;
        let stream = UnixStream::connect(config.socket_path())
            .with_context(|| "cannot connect to the daemon socket")?;
        Ok(Self {
            framed: FramedStream::new(stream),
            key,
            req_num: 0,
        })
    }

    /// The session key published by the daemon.
    #[must_use]
    pub const fn key(&self) -> u64 {
        self.key
    }

    /// The request number allocated at handshake.
    #[must_use]
    pub const fn req_num(&self) -> i64 {
        self.req_num
    }

    pub fn send(&mut self, request: &Request) -> Result<()> {
        self.framed.send_request(request)?;
        Ok(())
    }

    pub fn recv(&mut self) -> Result<Response> {
        Ok(self.framed.recv_response()?)
    }
}
