// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Control-socket framing.
//
// One request per connection:
//
// ```text
// IPP <length> [KEY=value ...]\n
// <length bytes of IPP request>
// ```
//
// answered with `<status> <extra>\n` and the IPP response.  Status 0 means
// the request was handled and `extra` is the IPP status code; a non-zero
// status rejects the request and no IPP bytes follow.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use tracing::{debug, warn};

use spoolwerk_core::error::{Result, SpoolError};

use crate::ipp::IppEnvironment;
use crate::spooler::Spooler;

/// Longest request line accepted.
const MAX_HEADER_BYTES: u64 = 4096;

/// Largest IPP body accepted.
pub const MAX_REQUEST_BYTES: usize = 1 << 20;

/// Reply status: request handled.
pub const CONTROL_OK: i32 = 0;
/// Reply status: request line or body could not be read.
pub const CONTROL_BAD_REQUEST: i32 = 1;
/// Reply status: the IPP body did not parse.
pub const CONTROL_BAD_IPP: i32 = 2;

/// A parsed request line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlHeader {
    pub length: usize,
    pub env: IppEnvironment,
}

/// Parse `IPP <length> [KEY=value ...]`.
pub fn parse_header(line: &str) -> Result<ControlHeader> {
    let bad = |why: &str| SpoolError::MalformedCommand(format!("control request {line:?}: {why}"));
    let mut words = line.split_whitespace();
    match words.next() {
        Some("IPP") => {}
        Some(_) => return Err(bad("unknown command")),
        None => return Err(bad("empty")),
    }
    let length: usize = words
        .next()
        .ok_or_else(|| bad("missing length"))?
        .parse()
        .map_err(|_| bad("bad length"))?;
    if length > MAX_REQUEST_BYTES {
        return Err(bad("request too large"));
    }

    let mut env = IppEnvironment::default();
    for param in words {
        let (key, value) = param.split_once('=').ok_or_else(|| bad("parameter without '='"))?;
        let value = Some(value.to_string());
        match key {
            "ROOT" => env.root = value,
            "PATH_INFO" => env.path_info = value,
            "REMOTE_USER" => env.remote_user = value,
            "REMOTE_ADDR" => env.remote_addr = value,
            other => debug!(key = other, "control parameter ignored"),
        }
    }
    Ok(ControlHeader { length, env })
}

/// Read one request from a connection.
pub async fn read_request<R>(reader: &mut R) -> Result<(ControlHeader, Vec<u8>)>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let n = (&mut *reader).take(MAX_HEADER_BYTES).read_line(&mut line).await?;
    if n == 0 || !line.ends_with('\n') {
        return Err(SpoolError::MalformedCommand(
            "control request line missing or unterminated".into(),
        ));
    }
    let header = parse_header(line.trim_end())?;
    let mut body = vec![0u8; header.length];
    reader.read_exact(&mut body).await?;
    Ok((header, body))
}

/// A reply ready to be written back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlReply {
    pub status: i32,
    pub extra: i32,
    pub body: Vec<u8>,
}

impl ControlReply {
    pub fn rejected(status: i32) -> Self {
        Self {
            status,
            extra: 0,
            body: Vec::new(),
        }
    }

    pub fn render(&self) -> Vec<u8> {
        let mut out = format!("{} {}\n", self.status, self.extra).into_bytes();
        out.extend_from_slice(&self.body);
        out
    }
}

impl Spooler {
    /// Answer a control request read from the socket.
    pub fn control_request(&self, header: &ControlHeader, body: &[u8]) -> ControlReply {
        match self.handle_ipp(body, &header.env) {
            Ok(response) => ControlReply {
                status: CONTROL_OK,
                extra: i32::from(response.status),
                body: response.body,
            },
            Err(e) => {
                warn!(error = %e, "IPP request rejected");
                ControlReply::rejected(CONTROL_BAD_IPP)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipp::tests::build_request;
    use crate::ipp::{OP_CUPS_GET_PRINTERS, STATUS_OK, parse_ipp_message};
    use crate::testutil::fixture;

    #[test]
    fn header_reads_length_and_environment() {
        let header = parse_header("IPP 42 REMOTE_USER=alice REMOTE_ADDR=10.0.0.9 HTTP_HOST=x").expect("parse");
        assert_eq!(header.length, 42);
        assert_eq!(header.env.remote_user.as_deref(), Some("alice"));
        assert_eq!(header.env.remote_addr.as_deref(), Some("10.0.0.9"));
        assert_eq!(header.env.root, None);
    }

    #[test]
    fn header_errors() {
        for line in ["", "LPD 4", "IPP", "IPP x", "IPP 4 REMOTE_USER", "IPP 99999999"] {
            assert!(
                matches!(parse_header(line), Err(SpoolError::MalformedCommand(_))),
                "{line:?} accepted"
            );
        }
    }

    #[tokio::test]
    async fn request_is_read_and_answered() {
        let fx = fixture(&[("laser1", "")], &[]);
        let ipp = build_request(OP_CUPS_GET_PRINTERS, 3, &[]);
        let mut wire = format!("IPP {} PATH_INFO=/printers\n", ipp.len()).into_bytes();
        wire.extend_from_slice(&ipp);

        let mut reader = tokio::io::BufReader::new(wire.as_slice());
        let (header, body) = read_request(&mut reader).await.expect("read");
        assert_eq!(header.env.path_info.as_deref(), Some("/printers"));

        let reply = fx.spooler.control_request(&header, &body);
        let rendered = reply.render();
        let head = format!("0 {STATUS_OK}\n");
        assert!(rendered.starts_with(head.as_bytes()));
        let message = parse_ipp_message(&rendered[head.len()..]).expect("ipp reply");
        assert_eq!(message.request_id, 3);
    }

    #[tokio::test]
    async fn short_body_is_an_error() {
        let wire = b"IPP 100\nshort".to_vec();
        let mut reader = tokio::io::BufReader::new(wire.as_slice());
        assert!(read_request(&mut reader).await.is_err());
    }

    #[test]
    fn garbage_body_is_rejected() {
        let fx = fixture(&[("laser1", "")], &[]);
        let header = parse_header("IPP 3").expect("parse");
        let reply = fx.spooler.control_request(&header, b"abc");
        assert_eq!(reply.render(), b"2 0\n");
    }
}
