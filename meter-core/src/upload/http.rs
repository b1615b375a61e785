//! Minimal HTTP/1.1 framing for the collector requests.
//!
//! Only what the uploader needs: render a bodyless request and read the status
//! line of the reply. Headers and bodies of responses are ignored.

use core::fmt::{self, Write};

use winnow::ascii::{digit1, space1};
use winnow::combinator::{alt, eof, preceded, terminated};
use winnow::prelude::*;
use winnow::token::{one_of, take_till};

use super::{Request, StatusCode};

pub const USER_AGENT: &str = "meter-agent/0.1";

/// Errors produced while reading a response head.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HttpError {
    /// No line terminator yet; read more bytes.
    Incomplete,
    MalformedStatusLine,
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpError::Incomplete => f.write_str("incomplete status line"),
            HttpError::MalformedStatusLine => f.write_str("malformed status line"),
        }
    }
}

/// Parsed `HTTP/1.x NNN reason` line.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct StatusLine<'a> {
    pub minor_version: u8,
    pub status: StatusCode,
    pub reason: &'a str,
}

/// Writes the request head, ending with the blank line.
///
/// # Errors
///
/// Fails only when `out` runs out of space.
pub fn write_request<W: Write>(
    out: &mut W,
    request: &Request<'_>,
    host: &str,
    port: u16,
) -> fmt::Result {
    write!(out, "{} {} HTTP/1.1\r\n", request.method.as_str(), request.target)?;
    if port == 80 {
        write!(out, "Host: {host}\r\n")?;
    } else {
        write!(out, "Host: {host}:{port}\r\n")?;
    }
    write!(out, "User-Agent: {USER_AGENT}\r\n")?;
    out.write_str("Accept: */*\r\n")?;
    out.write_str("Connection: close\r\n\r\n")
}

/// Parses the status line at the start of `head`.
///
/// # Errors
///
/// [`HttpError::Incomplete`] until a full line is buffered, then
/// [`HttpError::MalformedStatusLine`] for anything not shaped like HTTP/1.x.
pub fn parse_status_line(head: &[u8]) -> Result<StatusLine<'_>, HttpError> {
    let Some(end) = head.iter().position(|&byte| byte == b'\n') else {
        return Err(HttpError::Incomplete);
    };
    let line = core::str::from_utf8(&head[..end]).map_err(|_| HttpError::MalformedStatusLine)?;
    let mut input = line.strip_suffix('\r').unwrap_or(line);

    let (minor_version, code, reason) = status_line
        .parse_next(&mut input)
        .map_err(|_| HttpError::MalformedStatusLine)?;
    if !input.is_empty() {
        return Err(HttpError::MalformedStatusLine);
    }

    Ok(StatusLine {
        minor_version,
        status: StatusCode::new(code),
        reason,
    })
}

fn status_line<'a>(input: &mut &'a str) -> ModalResult<(u8, u16, &'a str)> {
    let minor = preceded("HTTP/1.", one_of('0'..='1'))
        .map(|digit: char| u8::from(digit == '1'))
        .parse_next(input)?;
    let code = preceded(space1, terminated(status_code, alt((space1, eof))))
        .parse_next(input)?;
    let reason = take_till(0.., ['\r', '\n']).parse_next(input)?;
    Ok((minor, code, reason))
}

fn status_code(input: &mut &str) -> ModalResult<u16> {
    digit1
        .verify(|digits: &str| digits.len() == 3)
        .try_map(str::parse::<u16>)
        .parse_next(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use heapless::String;

    #[test]
    fn renders_get_with_host_port() {
        let mut out: String<256> = String::new();
        write_request(&mut out, &Request::get("/v1/gdb/payload/?c=1"), "collector", 8080).unwrap();

        assert_eq!(
            out.as_str(),
            "GET /v1/gdb/payload/?c=1 HTTP/1.1\r\nHost: collector:8080\r\n\
             User-Agent: meter-agent/0.1\r\nAccept: */*\r\nConnection: close\r\n\r\n"
        );
    }

    #[test]
    fn default_port_is_omitted_from_host() {
        let mut out: String<256> = String::new();
        write_request(&mut out, &Request::get("/"), "collector", 80).unwrap();
        assert!(out.contains("\r\nHost: collector\r\n"));
    }

    #[test]
    fn parses_status_with_reason() {
        let line = parse_status_line(b"HTTP/1.1 301 Moved Permanently\r\nLocation: /\r\n").unwrap();
        assert_eq!(line.minor_version, 1);
        assert_eq!(line.status, StatusCode::MOVED_PERMANENTLY);
        assert_eq!(line.reason, "Moved Permanently");
    }

    #[test]
    fn parses_status_without_reason() {
        let line = parse_status_line(b"HTTP/1.0 500\r\n").unwrap();
        assert_eq!(line.minor_version, 0);
        assert_eq!(line.status.as_u16(), 500);
        assert_eq!(line.reason, "");
    }

    #[test]
    fn incomplete_until_newline() {
        assert_eq!(parse_status_line(b"HTTP/1.1 200 O"), Err(HttpError::Incomplete));
    }

    #[test]
    fn rejects_non_http_lines() {
        for head in [
            &b"SSH-2.0-OpenSSH\r\n"[..],
            b"HTTP/2 200\r\n",
            b"HTTP/1.1 20\r\n",
            b"HTTP/1.1 2000 OK\r\n",
            b"HTTP/1.1 abc\r\n",
            b"HTTP/1.1 200OK\r\n",
        ] {
            assert_eq!(
                parse_status_line(head),
                Err(HttpError::MalformedStatusLine),
                "{head:?}"
            );
        }
    }
}
