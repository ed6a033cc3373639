//! Command dispatch: build a command packet, reset sequencing, send it, and
//! drive the matching response decode.
//!
//! Every command starts a fresh exchange, so the sequence counter drops to
//! zero on each send. The connection state gates what may be issued: only
//! `Ready` accepts commands, a pending query must be reaped first, and
//! `QuitSent` is terminal.

use mywire_core::Result;
use mywire_core::error::{ConnectionError, ConnectionErrorKind, Error};

use crate::connection::{Connection, Transport, WireState, server_gone};
use crate::protocol::column::FieldPacket;
use crate::protocol::packets::{
    ChangeUserReply, EofPacket, EofReply, OkPacket, OkReply, PrepareReply, ResultSetHeader,
    StmtPrepareOk, protocol_error,
};
use crate::protocol::rows::RowPacket;
use crate::protocol::{CommandCode, EOF_MARKER, ERROR_MARKER, client_err, server_status};

/// A client command, one case per command kind.
///
/// Prebuilt payloads (execute/fetch/long-data/change-user) are produced by
/// the statement layer above; this type only carries them to the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    /// Close the session
    Quit,
    /// Select a default database
    InitDb { db: &'a str },
    /// Text-protocol query
    Query { sql: &'a str },
    /// Flush server caches
    Refresh { options: u8 },
    /// Ask the server to shut down
    Shutdown { level: u8 },
    /// Human-readable server statistics
    Statistics,
    /// Kill another connection
    ProcessKill { process_id: u32, read_response: bool },
    /// Dump debug info to the server log
    Debug,
    /// Liveness check
    Ping,
    /// Re-authenticate as a different user; payload prebuilt via
    /// `HandshakeResponse { is_change_user: true, .. }`
    ChangeUser { payload: &'a [u8], silent: bool },
    /// Prepare a statement
    StmtPrepare { sql: &'a str },
    /// Execute a prepared statement (prebuilt payload)
    StmtExecute { payload: &'a [u8] },
    /// Fetch cursor rows (prebuilt payload)
    StmtFetch { payload: &'a [u8] },
    /// Reset a prepared statement
    StmtReset { statement_id: u32 },
    /// Stream a long parameter (prebuilt payload, no response)
    StmtSendLongData { payload: &'a [u8] },
    /// Close a prepared statement (no response)
    StmtClose { statement_id: u32 },
    /// Set a server option
    SetOption { option: u16 },
}

impl Command<'_> {
    /// The wire command code.
    pub fn code(&self) -> CommandCode {
        match self {
            Command::Quit => CommandCode::Quit,
            Command::InitDb { .. } => CommandCode::InitDb,
            Command::Query { .. } => CommandCode::Query,
            Command::Refresh { .. } => CommandCode::Refresh,
            Command::Shutdown { .. } => CommandCode::Shutdown,
            Command::Statistics => CommandCode::Statistics,
            Command::ProcessKill { .. } => CommandCode::ProcessKill,
            Command::Debug => CommandCode::Debug,
            Command::Ping => CommandCode::Ping,
            Command::ChangeUser { .. } => CommandCode::ChangeUser,
            Command::StmtPrepare { .. } => CommandCode::StmtPrepare,
            Command::StmtExecute { .. } => CommandCode::StmtExecute,
            Command::StmtFetch { .. } => CommandCode::StmtFetch,
            Command::StmtReset { .. } => CommandCode::StmtReset,
            Command::StmtSendLongData { .. } => CommandCode::StmtSendLongData,
            Command::StmtClose { .. } => CommandCode::StmtClose,
            Command::SetOption { .. } => CommandCode::SetOption,
        }
    }

    /// The command-specific argument bytes (without the command code).
    pub fn argument(&self) -> Vec<u8> {
        match self {
            Command::Quit | Command::Statistics | Command::Debug | Command::Ping => Vec::new(),
            Command::InitDb { db } => db.as_bytes().to_vec(),
            Command::Query { sql } | Command::StmtPrepare { sql } => sql.as_bytes().to_vec(),
            Command::Refresh { options } => vec![*options],
            Command::Shutdown { level } => vec![*level],
            Command::ProcessKill { process_id, .. } => process_id.to_le_bytes().to_vec(),
            Command::ChangeUser { payload, .. }
            | Command::StmtExecute { payload }
            | Command::StmtFetch { payload }
            | Command::StmtSendLongData { payload } => payload.to_vec(),
            Command::StmtReset { statement_id } | Command::StmtClose { statement_id } => {
                statement_id.to_le_bytes().to_vec()
            }
            Command::SetOption { option } => option.to_le_bytes().to_vec(),
        }
    }

    /// Whether send failures should be logged quietly.
    pub fn is_silent(&self) -> bool {
        match self {
            Command::Quit | Command::Ping => true,
            Command::ChangeUser { silent, .. } => *silent,
            _ => false,
        }
    }
}

fn malformed_packet() -> Error {
    protocol_error(client_err::MALFORMED_PACKET_MSG)
}

impl<T: Transport> Connection<T> {
    /// Validate state, reset sequencing and status, and send one command
    /// frame.
    ///
    /// On a write failure the connection transitions to `QuitSent` and the
    /// close hook runs; nothing is retried.
    pub fn send_command(&mut self, code: CommandCode, payload: &[u8], silent: bool) -> Result<()> {
        match self.state() {
            WireState::Ready => {}
            WireState::QuitSent => {
                tracing::error!(command = code.name(), "server is gone");
                return Err(server_gone());
            }
            WireState::QuerySent => {
                tracing::error!(command = code.name(), "command out of sync");
                return Err(Error::Connection(ConnectionError {
                    kind: ConnectionErrorKind::OutOfSync,
                    message: client_err::OUT_OF_SYNC_MSG.to_string(),
                    source: None,
                }));
            }
        }

        self.reset_upsert_status();

        tracing::debug!(
            command = code.name(),
            bytes = payload.len() + 1,
            "sending command"
        );

        // Every command starts a new exchange; sequence numbers restart
        self.reset_sequence();
        let mut frame_payload = Vec::with_capacity(1 + payload.len());
        frame_payload.push(code as u8);
        frame_payload.extend_from_slice(payload);
        if let Err(e) = self.write_payload(&frame_payload) {
            if !silent {
                tracing::warn!(command = code.name(), "error while sending command packet");
            }
            return Err(e);
        }
        Ok(())
    }

    /// Issue a command and run its standard response handling.
    pub fn execute_command(&mut self, command: Command<'_>) -> Result<()> {
        let code = command.code();
        let silent = command.is_silent();
        let argument = command.argument();
        self.send_command(code, &argument, silent)?;

        match command {
            Command::Quit => {
                self.set_state(WireState::QuitSent);
                Ok(())
            }
            Command::Query { .. } | Command::StmtExecute { .. } | Command::StmtFetch { .. } => {
                self.set_state(WireState::QuerySent);
                Ok(())
            }
            Command::InitDb { .. } => {
                let result = self.await_ok().map(|_| ());
                // The server sends affected_rows=0 but libmysql never reads
                // it and callers expect the sentinel; follow that protocol
                self.reset_upsert_status();
                result
            }
            Command::Ping => {
                self.await_ok()?;
                self.reset_upsert_status();
                Ok(())
            }
            Command::ProcessKill { read_response, .. } => {
                if read_response {
                    self.await_ok()?;
                    self.reset_upsert_status();
                } else {
                    // Killing our own connection: the server won't answer
                    self.mark_gone();
                }
                Ok(())
            }
            Command::Refresh { .. } | Command::Shutdown { .. } | Command::StmtReset { .. } => {
                self.await_ok().map(|_| ())
            }
            Command::Debug | Command::SetOption { .. } => self.await_eof().map(|_| ()),
            Command::Statistics
            | Command::ChangeUser { .. }
            | Command::StmtPrepare { .. }
            | Command::StmtSendLongData { .. }
            | Command::StmtClose { .. } => Ok(()),
        }
    }

    /// Read an OK packet, surfacing an embedded server error as a query
    /// error without tearing the connection down.
    pub fn await_ok(&mut self) -> Result<OkPacket> {
        let payload = self.read_packet()?;
        match OkReply::parse(&payload).map_err(|_| malformed_packet())? {
            OkReply::Ok(ok) => {
                self.apply_ok(&ok);
                Ok(ok)
            }
            OkReply::Err(err) => {
                // The error packet carries no server status, so the client
                // cannot know whether more results of a multi-statement are
                // pending; an error always aborts execution, so clear the
                // flag.
                self.clear_more_results_flag();
                self.reset_upsert_status();
                Err(Error::Query(err.to_query_error()))
            }
        }
    }

    /// Read an EOF packet. A marker that is neither an error nor EOF when
    /// EOF was expected is a malformed packet.
    pub fn await_eof(&mut self) -> Result<EofPacket> {
        let payload = self.read_packet()?;
        match payload.first() {
            Some(&ERROR_MARKER) | Some(&EOF_MARKER) => {}
            Some(&other) => {
                tracing::warn!(marker = other, "EOF packet expected, field count wasn't 0xFE");
                return Err(malformed_packet());
            }
            None => return Err(malformed_packet()),
        }
        match EofReply::parse(&payload).map_err(|_| malformed_packet())? {
            EofReply::Eof(eof) => Ok(eof),
            EofReply::Err(err) => {
                self.reset_upsert_status();
                Err(Error::Query(err.to_query_error()))
            }
        }
    }

    /// COM_QUERY: send the query text. The result is read separately via
    /// [`Connection::read_result_header`] and the row readers.
    pub fn send_query(&mut self, sql: &str) -> Result<()> {
        self.execute_command(Command::Query { sql })
    }

    /// Read the first response packet of a query or execute and classify
    /// it. Upsert results fold into the connection bookkeeping; a server
    /// error restores `Ready` and surfaces as a query error.
    pub fn read_result_header(&mut self) -> Result<ResultSetHeader> {
        let payload = self.read_packet()?;
        let header = ResultSetHeader::parse(&payload)?;
        match &header {
            ResultSetHeader::Err(err) => {
                self.set_state(WireState::Ready);
                return Err(Error::Query(err.to_query_error()));
            }
            ResultSetHeader::Upsert(ok) => {
                self.apply_ok(ok);
                self.set_state(WireState::Ready);
            }
            ResultSetHeader::LocalInfile(_) | ResultSetHeader::Columns(_) => {}
        }
        Ok(header)
    }

    /// Read one field-metadata packet of a result set.
    pub fn read_field_packet(&mut self) -> Result<FieldPacket> {
        let payload = self.read_packet()?;
        FieldPacket::parse(&payload)
    }

    /// Read one text-protocol row (or the terminating EOF / error).
    pub fn read_text_row(
        &mut self,
        columns: &[crate::protocol::column::ColumnDef],
    ) -> Result<RowPacket> {
        let payload = self.read_packet()?;
        let row = RowPacket::parse_text(&payload, columns)?;
        self.finish_row(&row);
        Ok(row)
    }

    /// Read one binary-protocol row (or the terminating EOF / error).
    pub fn read_binary_row(
        &mut self,
        columns: &[crate::protocol::column::ColumnDef],
    ) -> Result<RowPacket> {
        let payload = self.read_packet()?;
        let row = RowPacket::parse_binary(&payload, columns)?;
        self.finish_row(&row);
        Ok(row)
    }

    fn finish_row(&mut self, row: &RowPacket) {
        match row {
            RowPacket::Eof {
                warnings,
                status_flags,
            } => {
                self.apply_eof_status(*warnings, *status_flags);
                self.set_state(WireState::Ready);
            }
            RowPacket::Err(_) => self.set_state(WireState::Ready),
            RowPacket::Row(_) => {}
        }
    }

    /// COM_STMT_PREPARE: send the statement text and decode the prepare
    /// response. Parameter/column metadata packets follow and are read with
    /// [`Connection::read_field_packet`].
    pub fn stmt_prepare(&mut self, sql: &str) -> Result<StmtPrepareOk> {
        self.execute_command(Command::StmtPrepare { sql })?;
        let payload = self.read_packet()?;
        match PrepareReply::parse(&payload)? {
            PrepareReply::Ok(ok) => Ok(ok),
            PrepareReply::Err(err) => Err(Error::Query(err.to_query_error())),
        }
    }

    /// COM_STATISTICS: the response is a bare human-readable string.
    pub fn statistics(&mut self) -> Result<String> {
        self.execute_command(Command::Statistics)?;
        let payload = self.read_packet()?;
        Ok(String::from_utf8_lossy(&payload).into_owned())
    }

    /// COM_CHANGE_USER with a prebuilt auth payload. A server error maps to
    /// a query error; an auth-switch request is returned for the caller's
    /// auth machinery.
    pub fn change_user(&mut self, payload: &[u8], silent: bool) -> Result<ChangeUserReply> {
        self.execute_command(Command::ChangeUser { payload, silent })?;
        let response = self.read_packet()?;
        let secure = self.server_capabilities() & crate::protocol::capabilities::CLIENT_SECURE_CONNECTION
            != 0;
        match ChangeUserReply::parse(&response, secure)? {
            ChangeUserReply::Err(err) => Err(Error::Query(err.to_query_error())),
            other => Ok(other),
        }
    }

    /// COM_QUIT: best-effort farewell, then the terminal state.
    pub fn quit(&mut self) -> Result<()> {
        if self.state() == WireState::QuitSent {
            return Ok(());
        }
        let result = self.execute_command(Command::Quit);
        self.set_state(WireState::QuitSent);
        result
    }

    fn clear_more_results_flag(&mut self) {
        let flags = self.status_flags() & !server_status::SERVER_MORE_RESULTS_EXISTS;
        self.apply_eof_status(self.warnings(), flags);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::tests::{MockTransport, conn_with_frames};
    use crate::protocol::column::tests::field_payload;
    use crate::types::FieldType;
    use mywire_core::Value;

    const OK_EMPTY: &[u8] = &[0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00];
    const EOF_41: &[u8] = &[0xFE, 0x00, 0x00, 0x02, 0x00];

    fn err_payload() -> Vec<u8> {
        let mut p = vec![0xFF, 0x26, 0x04, b'#'];
        p.extend_from_slice(b"23000");
        p.extend_from_slice(b"Duplicate entry");
        p
    }

    #[test]
    fn ping_roundtrip() {
        let mut conn = conn_with_frames(&[(1, OK_EMPTY)]);
        conn.execute_command(Command::Ping).unwrap();
        // command byte framed with sequence 0
        assert_eq!(&conn.transport_mut().outbound, &[1, 0, 0, 0, 0x0E]);
        // libmysql-compat: affected rows stay at the sentinel
        assert_eq!(conn.affected_rows(), None);
        assert_eq!(conn.state(), WireState::Ready);
    }

    #[test]
    fn init_db_resets_affected_rows() {
        // OK claiming 3 affected rows; INIT_DB discards it anyway
        let ok = [0x00, 0x03, 0x00, 0x02, 0x00, 0x00, 0x00];
        let mut conn = conn_with_frames(&[(1, &ok)]);
        conn.execute_command(Command::InitDb { db: "shop" }).unwrap();
        assert_eq!(conn.affected_rows(), None);
        let sent = &conn.transport_mut().outbound;
        assert_eq!(&sent[4..], b"\x02shop");
    }

    #[test]
    fn commands_rejected_after_quit() {
        let mut conn = conn_with_frames(&[]);
        conn.quit().unwrap();
        assert_eq!(conn.state(), WireState::QuitSent);

        let err = conn.execute_command(Command::Ping).unwrap_err();
        assert!(err.to_string().contains("gone away"));
        // quit is idempotent
        conn.quit().unwrap();
    }

    #[test]
    fn commands_rejected_mid_query() {
        let mut conn = conn_with_frames(&[]);
        conn.send_query("SELECT 1").unwrap();
        assert_eq!(conn.state(), WireState::QuerySent);

        let err = conn.execute_command(Command::Ping).unwrap_err();
        assert!(err.to_string().contains("out of sync"));
    }

    #[test]
    fn send_failure_is_terminal() {
        let mut transport = MockTransport::default();
        transport.fail_sends = true;
        let mut conn = Connection::new(transport, crate::config::WireConfig::new());
        assert!(conn.execute_command(Command::Ping).is_err());
        assert_eq!(conn.state(), WireState::QuitSent);
    }

    #[test]
    fn await_ok_surfaces_server_error() {
        let mut conn = conn_with_frames(&[(1, &err_payload())]);
        let err = conn
            .execute_command(Command::StmtReset { statement_id: 4 })
            .unwrap_err();
        match err {
            Error::Query(q) => {
                assert_eq!(q.code, 1062);
                assert_eq!(q.sqlstate, "23000");
            }
            other => panic!("expected query error, got {other}"),
        }
        // server-reported errors leave the connection usable
        assert_eq!(conn.state(), WireState::Ready);
    }

    #[test]
    fn await_eof_rejects_wrong_marker() {
        // SET_OPTION expects EOF but the server sends an OK-shaped packet
        let mut conn = conn_with_frames(&[(1, OK_EMPTY)]);
        let err = conn
            .execute_command(Command::SetOption { option: 1 })
            .unwrap_err();
        assert!(err.to_string().contains("Malformed packet"));

        let mut conn = conn_with_frames(&[(1, EOF_41)]);
        conn.execute_command(Command::SetOption { option: 1 }).unwrap();
        let sent = &conn.transport_mut().outbound;
        assert_eq!(&sent[4..], &[0x1B, 0x01, 0x00]);
    }

    #[test]
    fn process_kill_without_response_closes() {
        let mut conn = conn_with_frames(&[]);
        conn.execute_command(Command::ProcessKill {
            process_id: 77,
            read_response: false,
        })
        .unwrap();
        assert_eq!(conn.state(), WireState::QuitSent);
        let sent = &conn.transport_mut().outbound;
        assert_eq!(&sent[4..], &[0x0C, 77, 0, 0, 0]);
    }

    #[test]
    fn process_kill_with_response_awaits_ok() {
        let mut conn = conn_with_frames(&[(1, OK_EMPTY)]);
        conn.execute_command(Command::ProcessKill {
            process_id: 77,
            read_response: true,
        })
        .unwrap();
        assert_eq!(conn.state(), WireState::Ready);
        assert_eq!(conn.affected_rows(), None);
    }

    #[test]
    fn statistics_returns_raw_string() {
        let stats = b"Uptime: 5  Threads: 1  Questions: 7";
        let mut conn = conn_with_frames(&[(1, stats)]);
        assert_eq!(conn.statistics().unwrap(), String::from_utf8_lossy(stats));
    }

    #[test]
    fn stmt_close_and_long_data_have_no_response() {
        let mut conn = conn_with_frames(&[]);
        conn.execute_command(Command::StmtClose { statement_id: 9 })
            .unwrap();
        assert_eq!(conn.state(), WireState::Ready);
        let sent = conn.transport_mut().outbound.clone();
        assert_eq!(&sent[4..], &[0x19, 9, 0, 0, 0]);

        let mut conn = conn_with_frames(&[]);
        conn.execute_command(Command::StmtSendLongData {
            payload: &[1, 0, 0, 0, 0, 0, b'x'],
        })
        .unwrap();
        assert_eq!(conn.state(), WireState::Ready);
    }

    #[test]
    fn stmt_prepare_roundtrip() {
        let prepare_ok = [
            0x00, 0x07, 0x00, 0x00, 0x00, 0x02, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00,
        ];
        let mut conn = conn_with_frames(&[(1, &prepare_ok)]);
        let ok = conn.stmt_prepare("SELECT ?, name FROM t WHERE id = ?").unwrap();
        assert_eq!(ok.statement_id, 7);
        assert_eq!(ok.num_columns, 2);
        assert_eq!(ok.num_params, 1);
    }

    #[test]
    fn query_result_set_flow() {
        // header: 2 columns, then 2 field packets, EOF, 2 rows, EOF
        let col_a = field_payload("a", FieldType::Long as u8, 11, 0);
        let col_b = field_payload("b", FieldType::Long as u8, 11, 0);
        let row1: &[u8] = &[0x01, b'1', 0x01, b'4'];
        let row2: &[u8] = &[0x01, b'2', 0x01, b'5'];
        let final_eof: &[u8] = &[0xFE, 0x01, 0x00, 0x22, 0x00];

        let mut conn = conn_with_frames(&[
            (1, &[0x02]),
            (2, &col_a),
            (3, &col_b),
            (4, EOF_41),
            (5, row1),
            (6, row2),
            (7, final_eof),
        ]);

        conn.send_query("SELECT a, b FROM t").unwrap();
        let header = conn.read_result_header().unwrap();
        let count = match header {
            ResultSetHeader::Columns(n) => n,
            other => panic!("expected columns, got {other:?}"),
        };
        assert_eq!(count, 2);

        let mut columns = Vec::new();
        for _ in 0..count {
            match conn.read_field_packet().unwrap() {
                FieldPacket::Field(col) => columns.push(col),
                other => panic!("expected field, got {other:?}"),
            }
        }
        conn.await_eof().unwrap();

        let mut rows = Vec::new();
        loop {
            match conn.read_text_row(&columns).unwrap() {
                RowPacket::Row(values) => rows.push(values),
                RowPacket::Eof { .. } => break,
                RowPacket::Err(err) => panic!("unexpected error row: {err:?}"),
            }
        }

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], vec![Value::Int(1), Value::Int(4)]);
        assert_eq!(rows[1], vec![Value::Int(2), Value::Int(5)]);
        assert_eq!(conn.state(), WireState::Ready);
        assert_eq!(conn.warnings(), 1);
        assert_eq!(conn.status_flags(), 0x22);
    }

    #[test]
    fn upsert_result_applies_status() {
        let upsert = [0x00, 0x03, 0x09, 0x02, 0x00, 0x00, 0x00];
        let mut conn = conn_with_frames(&[(1, &upsert)]);
        conn.send_query("UPDATE t SET x = 1").unwrap();
        match conn.read_result_header().unwrap() {
            ResultSetHeader::Upsert(ok) => assert_eq!(ok.affected_rows, 3),
            other => panic!("expected upsert, got {other:?}"),
        }
        assert_eq!(conn.affected_rows(), Some(3));
        assert_eq!(conn.last_insert_id(), 9);
        assert_eq!(conn.state(), WireState::Ready);
    }

    #[test]
    fn query_error_restores_ready() {
        let mut conn = conn_with_frames(&[(1, &err_payload())]);
        conn.send_query("INSERT INTO t VALUES (1)").unwrap();
        let err = conn.read_result_header().unwrap_err();
        assert!(matches!(err, Error::Query(_)));
        assert_eq!(conn.state(), WireState::Ready);
    }

    #[test]
    fn change_user_flow() {
        let mut conn = conn_with_frames(&[(1, OK_EMPTY)]);
        let reply = conn.change_user(b"bob\0\x00", false).unwrap();
        assert!(matches!(reply, ChangeUserReply::Ok));

        // switch request
        let mut switch = vec![0xFE];
        switch.extend_from_slice(b"mysql_native_password\0");
        switch.extend_from_slice(&[7; 20]);
        let mut conn = conn_with_frames(&[(1, &switch)]);
        match conn.change_user(b"bob\0\x00", false).unwrap() {
            ChangeUserReply::Switch(req) => {
                assert_eq!(req.plugin, "mysql_native_password");
                assert_eq!(req.data.len(), 20);
            }
            other => panic!("expected switch, got {other:?}"),
        }
    }
}
