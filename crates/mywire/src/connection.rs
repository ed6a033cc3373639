//! Wire connection: framing, sequence tracking, and the connection state
//! machine.
//!
//! The socket itself is abstracted behind [`Transport`]; this layer owns
//! everything between the raw byte stream and typed packets. Strictly
//! synchronous: one outstanding request, blocking reads and writes, no
//! internal threading.

#![allow(clippy::cast_possible_truncation)]

use std::io::{Read, Write};

use mywire_core::Result;
use mywire_core::error::{ConnectionError, ConnectionErrorKind, Error, ProtocolError};

use crate::config::WireConfig;
use crate::protocol::packets::{
    AuthReply, Greeting, GreetingReply, HandshakeResponse, OkPacket, SHA256_PK_REQUEST_PAYLOAD,
    parse_public_key,
};
use crate::protocol::writer::build_frames;
use crate::protocol::{MAX_PACKET_SIZE, PacketHeader, capabilities, client_err};

/// Affected-rows value meaning "errored, nothing counted".
pub const AFFECTED_ROWS_ERROR: u64 = u64::MAX;

/// Blocking byte-stream transport.
///
/// TCP, TLS, Unix sockets, or an in-memory pipe in tests; this layer only
/// requires that `receive` fills the whole buffer or fails.
pub trait Transport {
    /// Send all of `data`, returning the number of bytes written.
    fn send(&mut self, data: &[u8]) -> std::io::Result<usize>;

    /// Fill `buf` completely from the stream.
    fn receive(&mut self, buf: &mut [u8]) -> std::io::Result<()>;
}

impl<T: Read + Write> Transport for T {
    fn send(&mut self, data: &[u8]) -> std::io::Result<usize> {
        self.write_all(data)?;
        self.flush()?;
        Ok(data.len())
    }

    fn receive(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        self.read_exact(buf)
    }
}

/// Connection state in the wire protocol state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireState {
    /// Ready for the next command
    Ready,
    /// A query/execute was sent; its result has not been fully read
    QuerySent,
    /// Terminal: QUIT was sent, or the link failed
    QuitSent,
}

/// A wire-protocol connection over some transport.
pub struct Connection<T: Transport> {
    transport: T,
    config: WireConfig,
    state: WireState,
    /// Sequence number expected on the next inbound frame, and used for the
    /// next outbound one
    next_seq: u8,
    /// Compressed transports run their own sequence numbers; skip the check
    compressed: bool,
    /// Capabilities the server announced in its greeting
    server_capabilities: u32,
    affected_rows: u64,
    last_insert_id: u64,
    status_flags: u16,
    warnings: u16,
    last_message: Option<String>,
    /// Invoked once when the connection transitions to `QuitSent`
    close_hook: Option<Box<dyn FnMut() + Send>>,
}

impl<T: Transport> std::fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state)
            .field("next_seq", &self.next_seq)
            .field("compressed", &self.compressed)
            .field("server_capabilities", &self.server_capabilities)
            .finish_non_exhaustive()
    }
}

pub(crate) fn server_gone() -> Error {
    Error::Connection(ConnectionError {
        kind: ConnectionErrorKind::Disconnected,
        message: client_err::SERVER_GONE_MSG.to_string(),
        source: None,
    })
}

impl<T: Transport> Connection<T> {
    /// Wrap an established transport.
    pub fn new(transport: T, config: WireConfig) -> Self {
        Self {
            transport,
            config,
            state: WireState::Ready,
            next_seq: 0,
            compressed: false,
            server_capabilities: 0,
            affected_rows: AFFECTED_ROWS_ERROR,
            last_insert_id: 0,
            status_flags: 0,
            warnings: 0,
            last_message: None,
            close_hook: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> WireState {
        self.state
    }

    /// The configuration this connection was built with.
    pub fn config(&self) -> &WireConfig {
        &self.config
    }

    /// Capabilities from the server greeting (0 before the greeting).
    pub fn server_capabilities(&self) -> u32 {
        self.server_capabilities
    }

    /// Affected rows from the last command, `None` after a failure.
    pub fn affected_rows(&self) -> Option<u64> {
        if self.affected_rows == AFFECTED_ROWS_ERROR {
            None
        } else {
            Some(self.affected_rows)
        }
    }

    /// Last insert id from the last command.
    pub fn last_insert_id(&self) -> u64 {
        self.last_insert_id
    }

    /// Server status flags from the last response.
    pub fn status_flags(&self) -> u16 {
        self.status_flags
    }

    /// Warning count from the last response.
    pub fn warnings(&self) -> u16 {
        self.warnings
    }

    /// Info message from the last OK packet.
    pub fn last_message(&self) -> Option<&str> {
        self.last_message.as_deref()
    }

    /// Switch sequence checking off for compressed transports, where the
    /// compression envelope tracks its own counters.
    pub fn set_compressed(&mut self, compressed: bool) {
        self.compressed = compressed;
    }

    /// Install a hook run when the connection becomes unusable.
    pub fn set_close_hook(&mut self, hook: Box<dyn FnMut() + Send>) {
        self.close_hook = Some(hook);
    }

    /// Borrow the transport, e.g. to wrap it for TLS.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Tear down and return the transport.
    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Move to the terminal state and fire the close hook.
    pub(crate) fn mark_gone(&mut self) {
        if self.state != WireState::QuitSent {
            self.state = WireState::QuitSent;
            if let Some(hook) = self.close_hook.as_mut() {
                hook();
            }
        }
    }

    pub(crate) fn set_state(&mut self, state: WireState) {
        self.state = state;
    }

    /// Restart sequence numbering; every command opens a fresh exchange.
    pub(crate) fn reset_sequence(&mut self) {
        self.next_seq = 0;
    }

    /// Reset the affected-rows counter to the error sentinel.
    pub(crate) fn reset_upsert_status(&mut self) {
        self.affected_rows = AFFECTED_ROWS_ERROR;
        self.last_message = None;
    }

    /// Fold a decoded OK packet into the connection bookkeeping.
    pub(crate) fn apply_ok(&mut self, ok: &OkPacket) {
        self.affected_rows = ok.affected_rows;
        self.last_insert_id = ok.last_insert_id;
        self.status_flags = ok.status_flags;
        self.warnings = ok.warnings;
        self.last_message = ok.message.clone();
    }

    pub(crate) fn apply_eof_status(&mut self, warnings: u16, status_flags: u16) {
        self.warnings = warnings;
        self.status_flags = status_flags;
    }

    /// Read and validate one frame header.
    ///
    /// The body is untouched: a sequence mismatch fails before any payload
    /// byte is consumed.
    pub fn read_header(&mut self) -> Result<PacketHeader> {
        let mut buf = [0u8; PacketHeader::SIZE];
        if let Err(e) = self.transport.receive(&mut buf) {
            self.mark_gone();
            return Err(Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Disconnected,
                message: client_err::SERVER_GONE_MSG.to_string(),
                source: Some(Box::new(e)),
            }));
        }
        let header = PacketHeader::from_bytes(&buf);
        tracing::trace!(
            seq = header.sequence_id,
            size = header.payload_length,
            "read header"
        );

        if self.compressed || self.next_seq == header.sequence_id {
            // The counter must keep advancing so our next write carries the
            // number the server expects.
            self.next_seq = self.next_seq.wrapping_add(1);
            return Ok(header);
        }

        tracing::warn!(
            expected = self.next_seq,
            received = header.sequence_id,
            size = header.payload_length,
            "packets out of order"
        );
        self.mark_gone();
        Err(Error::Protocol(ProtocolError {
            message: format!(
                "Packets out of order. Expected {} received {}. Packet size={}",
                self.next_seq, header.sequence_id, header.payload_length
            ),
            raw_data: None,
            source: None,
        }))
    }

    fn read_body(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut body = vec![0u8; len];
        if len > 0 {
            if let Err(e) = self.transport.receive(&mut body) {
                self.mark_gone();
                return Err(Error::Connection(ConnectionError {
                    kind: ConnectionErrorKind::Disconnected,
                    message: client_err::SERVER_GONE_MSG.to_string(),
                    source: Some(Box::new(e)),
                }));
            }
        }
        Ok(body)
    }

    /// Read one complete payload, reassembling frames split at the 16 MiB
    /// boundary.
    ///
    /// A frame of exactly the maximum size means more follow; the loop ends
    /// on the first smaller frame, including a legitimate empty terminal
    /// frame.
    pub fn read_packet(&mut self) -> Result<Vec<u8>> {
        let header = self.read_header()?;
        let mut payload = self.read_body(header.payload_length as usize)?;

        if header.payload_length as usize == MAX_PACKET_SIZE {
            loop {
                let cont = self.read_header()?;
                let cont_len = cont.payload_length as usize;
                if cont_len > 0 {
                    let chunk = self.read_body(cont_len)?;
                    payload.extend_from_slice(&chunk);
                }
                if cont_len < MAX_PACKET_SIZE {
                    break;
                }
            }
        }

        Ok(payload)
    }

    /// Read one frame's payload into a caller-provided buffer.
    ///
    /// A destination smaller than the declared size is a caller bug,
    /// surfaced distinctly and *before* the body is consumed; no
    /// multi-frame reassembly happens here.
    pub fn read_packet_into(&mut self, buf: &mut [u8]) -> Result<usize> {
        let header = self.read_header()?;
        let len = header.payload_length as usize;
        if buf.len() < len {
            return Err(Error::Protocol(ProtocolError {
                message: format!(
                    "Packet buffer {} wasn't big enough for {} bytes, {} bytes will be unread",
                    buf.len(),
                    len,
                    len - buf.len()
                ),
                raw_data: None,
                source: None,
            }));
        }
        if len > 0 {
            if let Err(e) = self.transport.receive(&mut buf[..len]) {
                self.mark_gone();
                return Err(Error::Connection(ConnectionError {
                    kind: ConnectionErrorKind::Disconnected,
                    message: client_err::SERVER_GONE_MSG.to_string(),
                    source: Some(Box::new(e)),
                }));
            }
        }
        Ok(len)
    }

    /// Frame and send a payload with the current sequence number.
    pub fn write_payload(&mut self, payload: &[u8]) -> Result<()> {
        let framed = build_frames(payload, self.next_seq);
        let frames = if payload.len() < MAX_PACKET_SIZE {
            1
        } else {
            (payload.len() / MAX_PACKET_SIZE) as u8 + 1
        };
        match self.transport.send(&framed) {
            Ok(_) => {
                self.next_seq = self.next_seq.wrapping_add(frames);
                Ok(())
            }
            Err(e) => {
                self.mark_gone();
                Err(Error::Connection(ConnectionError {
                    kind: ConnectionErrorKind::Disconnected,
                    message: client_err::SERVER_GONE_MSG.to_string(),
                    source: Some(Box::new(e)),
                }))
            }
        }
    }

    /// Read and decode the server greeting. Stores the announced
    /// capabilities for later capability-gated decisions.
    pub fn read_greeting(&mut self) -> Result<Greeting> {
        let payload = self.read_packet()?;
        match GreetingReply::parse(&payload)? {
            GreetingReply::Handshake(greeting) => {
                self.server_capabilities = greeting.capabilities;
                Ok(greeting)
            }
            GreetingReply::Err(err) => {
                self.mark_gone();
                Err(Error::Query(err.to_query_error()))
            }
        }
    }

    /// Encode and send the handshake response.
    ///
    /// `auth_data` is the opaque blob the caller's auth plugin produced for
    /// the greeting scramble.
    pub fn send_handshake_response(
        &mut self,
        auth_data: &[u8],
        auth_plugin: Option<&str>,
    ) -> Result<()> {
        let client_flags = self.config.capability_flags() & self.server_capabilities;
        let response = HandshakeResponse {
            client_flags,
            max_packet_size: self.config.max_packet_size,
            charset: self.config.charset,
            user: &self.config.user,
            auth_data,
            database: self.config.database.as_deref(),
            auth_plugin,
            connect_attrs: &self.config.attributes,
            is_change_user: false,
        };
        let payload = response.encode()?;
        self.write_payload(&payload)
    }

    /// Read the server's reply during authentication.
    pub fn read_auth_reply(&mut self) -> Result<AuthReply> {
        let payload = self.read_packet()?;
        let reply = AuthReply::parse(&payload)?;
        if let AuthReply::Ok(ok) = &reply {
            self.apply_ok(ok);
        }
        Ok(reply)
    }

    /// Send a bare auth-data continuation packet (the change-auth response).
    ///
    /// The exchange is mid-flight, so the sequence counter keeps running.
    pub fn write_auth_data(&mut self, auth_data: &[u8]) -> Result<()> {
        self.write_payload(auth_data)
    }

    /// Ask the server for its SHA-256 public key and read it back.
    pub fn request_public_key(&mut self) -> Result<Vec<u8>> {
        self.write_payload(&SHA256_PK_REQUEST_PAYLOAD)?;
        let payload = self.read_packet()?;
        parse_public_key(&payload)
    }

    /// Request the switch to TLS.
    ///
    /// Sends the truncated handshake response (flags, max packet size,
    /// charset, filler) that precedes the TLS handshake. The caller then
    /// wraps the transport; a server that never announced CLIENT_SSL kills
    /// the connection instead.
    pub fn enable_tls(&mut self) -> Result<()> {
        if self.server_capabilities & capabilities::CLIENT_SSL == 0 {
            self.mark_gone();
            return Err(server_gone());
        }
        let client_flags =
            (self.config.capability_flags() & self.server_capabilities) | capabilities::CLIENT_SSL;
        let mut payload = Vec::with_capacity(32);
        payload.extend_from_slice(&client_flags.to_le_bytes());
        payload.extend_from_slice(&self.config.max_packet_size.to_le_bytes());
        payload.push(self.config.charset);
        payload.resize(payload.len() + 23, 0);
        self.write_payload(&payload)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    /// Scripted transport: hands out pre-recorded inbound bytes and records
    /// everything sent.
    #[derive(Debug, Default)]
    pub(crate) struct MockTransport {
        pub inbound: VecDeque<u8>,
        pub outbound: Vec<u8>,
        pub fail_sends: bool,
    }

    impl MockTransport {
        pub fn with_frames(frames: &[(u8, &[u8])]) -> Self {
            let mut inbound = VecDeque::new();
            for (seq, payload) in frames {
                let header = PacketHeader {
                    payload_length: payload.len() as u32,
                    sequence_id: *seq,
                };
                inbound.extend(header.to_bytes());
                inbound.extend(payload.iter().copied());
            }
            Self {
                inbound,
                outbound: Vec::new(),
                fail_sends: false,
            }
        }
    }

    // The blanket `Read + Write` impl turns this into a `Transport`, same
    // as a real socket.
    impl Read for MockTransport {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let n = buf.len().min(self.inbound.len());
            for slot in buf.iter_mut().take(n) {
                *slot = self.inbound.pop_front().unwrap();
            }
            Ok(n)
        }
    }

    impl Write for MockTransport {
        fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
            if self.fail_sends {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "send failed",
                ));
            }
            self.outbound.extend_from_slice(data);
            Ok(data.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    pub(crate) fn conn_with_frames(frames: &[(u8, &[u8])]) -> Connection<MockTransport> {
        Connection::new(MockTransport::with_frames(frames), WireConfig::new())
    }

    #[test]
    fn read_packet_checks_sequence() {
        let mut conn = conn_with_frames(&[(0, b"ok")]);
        assert_eq!(conn.read_packet().unwrap(), b"ok");
        assert_eq!(conn.next_seq, 1);
    }

    #[test]
    fn sequence_mismatch_fails_without_consuming_body() {
        let mut conn = conn_with_frames(&[(5, b"stale")]);
        conn.next_seq = 3;
        let err = conn.read_header().unwrap_err();
        assert!(err.to_string().contains("Expected 3 received 5"));
        // the body is still unread
        assert_eq!(conn.transport.inbound.len(), 5);
        assert_eq!(conn.state(), WireState::QuitSent);
    }

    #[test]
    fn compressed_mode_skips_sequence_check() {
        let mut conn = conn_with_frames(&[(9, b"x")]);
        conn.set_compressed(true);
        assert_eq!(conn.read_packet().unwrap(), b"x");
    }

    #[test]
    fn multi_frame_reassembly_with_empty_terminator() {
        // 16777215 + 16777215 + 0: the empty frame terminates the loop
        let big = vec![0xAA; MAX_PACKET_SIZE];
        let mut conn = conn_with_frames(&[(0, &big), (1, &big), (2, b"")]);
        let payload = conn.read_packet().unwrap();
        assert_eq!(payload.len(), 2 * MAX_PACKET_SIZE);
        assert!(payload.iter().all(|&b| b == 0xAA));
        assert_eq!(conn.next_seq, 3);
    }

    #[test]
    fn multi_frame_reassembly_uneven_tail() {
        let big = vec![0xBB; MAX_PACKET_SIZE];
        let mut conn = conn_with_frames(&[(0, &big), (1, b"tail")]);
        let payload = conn.read_packet().unwrap();
        assert_eq!(payload.len(), MAX_PACKET_SIZE + 4);
        assert_eq!(&payload[MAX_PACKET_SIZE..], b"tail");
    }

    #[test]
    fn read_packet_into_rejects_small_buffer() {
        let mut conn = conn_with_frames(&[(0, b"abcdef")]);
        let mut buf = [0u8; 3];
        let err = conn.read_packet_into(&mut buf).unwrap_err();
        assert!(err.to_string().contains("wasn't big enough"));
        // distinct from a transport error: the connection is not torn down
        assert_ne!(conn.state(), WireState::QuitSent);
    }

    #[test]
    fn transport_failure_is_terminal_and_fires_hook() {
        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = Arc::clone(&fired);

        let mut conn = conn_with_frames(&[]);
        conn.set_close_hook(Box::new(move || {
            fired_clone.store(true, Ordering::SeqCst);
        }));
        assert!(conn.read_packet().is_err());
        assert_eq!(conn.state(), WireState::QuitSent);
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn write_payload_advances_sequence() {
        let mut conn = conn_with_frames(&[]);
        conn.next_seq = 1;
        conn.write_payload(b"hello").unwrap();
        assert_eq!(conn.next_seq, 2);
        assert_eq!(&conn.transport.outbound[..4], &[5, 0, 0, 1]);
        assert_eq!(&conn.transport.outbound[4..], b"hello");
    }

    #[test]
    fn greeting_roundtrip_sets_capabilities() {
        let mut payload = Vec::new();
        payload.push(10);
        payload.extend_from_slice(b"8.0.36\0");
        payload.extend_from_slice(&42u32.to_le_bytes());
        payload.extend_from_slice(&[0x11; 8]);
        payload.push(0);
        let caps = capabilities::CLIENT_PROTOCOL_41
            | capabilities::CLIENT_SECURE_CONNECTION
            | capabilities::CLIENT_PLUGIN_AUTH;
        payload.extend_from_slice(&((caps & 0xFFFF) as u16).to_le_bytes());
        payload.push(45);
        payload.extend_from_slice(&2u16.to_le_bytes());
        payload.extend_from_slice(&((caps >> 16) as u16).to_le_bytes());
        payload.push(21);
        payload.extend_from_slice(&[0; 10]);
        payload.extend_from_slice(&[0x22; 12]);
        payload.push(0x33);
        payload.extend_from_slice(b"caching_sha2_password\0");

        let mut conn = conn_with_frames(&[(0, &payload)]);
        let greeting = conn.read_greeting().unwrap();
        assert_eq!(greeting.thread_id, 42);
        assert_eq!(conn.server_capabilities(), caps);
        assert_eq!(greeting.auth_plugin.as_deref(), Some("caching_sha2_password"));
        // next outbound packet (the handshake response) must carry seq 1
        conn.send_handshake_response(&[0xAB; 20], greeting.auth_plugin.as_deref())
            .unwrap();
        assert_eq!(conn.transport.outbound[3], 1);
    }

    #[test]
    fn enable_tls_requires_server_support() {
        let mut conn = conn_with_frames(&[]);
        conn.server_capabilities = capabilities::CLIENT_PROTOCOL_41; // no CLIENT_SSL
        assert!(conn.enable_tls().is_err());
        assert_eq!(conn.state(), WireState::QuitSent);

        let mut conn = conn_with_frames(&[]);
        conn.server_capabilities = capabilities::CLIENT_PROTOCOL_41 | capabilities::CLIENT_SSL;
        conn.enable_tls().unwrap();
        // 4 header + 4 flags + 4 max packet + 1 charset + 23 filler
        assert_eq!(conn.transport.outbound.len(), 36);
        let flags = u32::from_le_bytes(conn.transport.outbound[4..8].try_into().unwrap());
        assert!(flags & capabilities::CLIENT_SSL != 0);
    }

    #[test]
    fn public_key_request_roundtrip() {
        let mut reply = vec![0x01];
        reply.extend_from_slice(b"PEMKEY");
        let mut conn = conn_with_frames(&[(2, &reply)]);
        conn.next_seq = 1; // mid-auth exchange
        let key = conn.request_public_key().unwrap();
        assert_eq!(key, b"PEMKEY");
        // the request is a single 0x01 byte written with seq 1; the reply
        // then arrives with seq 2
        assert_eq!(&conn.transport.outbound, &[1, 0, 0, 1, 0x01]);
    }
}
