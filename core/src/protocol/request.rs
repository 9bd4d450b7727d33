use crate::error::{ParseErrorKind, Result, RtspError};

/// A parsed RTSP request (RFC 2326 §6).
///
/// ```text
/// Method SP Request-URI SP RTSP-Version CRLF
/// *(Header: Value CRLF)
/// CRLF
/// [body]
/// ```
///
/// Header lookup is case-insensitive per RFC 2326 §4.2.
#[derive(Debug)]
pub struct RtspRequest {
    /// RTSP method (OPTIONS, DESCRIBE, SETUP, PLAY, TEARDOWN).
    pub method: String,
    /// Request-URI (e.g. `rtsp://host:port/stream/track1`).
    pub uri: String,
    /// Protocol version (expected: `RTSP/1.0`).
    pub version: String,
    /// Headers as ordered (name, value) pairs. Names are stored as-received;
    /// lookups via [`get_header`](Self::get_header) are case-insensitive.
    pub headers: Vec<(String, String)>,
    /// Message body, present when `Content-Length` is set (e.g. Basic-Auth
    /// credentials are never carried in a body — this is mostly vestigial
    /// for RTSP, but `Content-Length` framing is still honored per §6).
    pub body: Vec<u8>,
}

impl RtspRequest {
    /// Parse a complete, body-less RTSP request from its text representation.
    pub fn parse(raw: &str) -> Result<Self> {
        let (req, _) = Self::parse_buf(raw.as_bytes())?;
        Ok(req)
    }

    /// Parse one RTSP request out of `data`, which may contain more bytes
    /// than the request needs (a following interleaved frame, or the start
    /// of the next request). Returns the parsed request and the number of
    /// bytes consumed from the front of `data`.
    pub fn parse_buf(data: &[u8]) -> Result<(Self, usize)> {
        let header_end = find_double_crlf(data).ok_or(RtspError::Parse {
            kind: ParseErrorKind::IncompleteBody,
        })?;

        let header_text = std::str::from_utf8(&data[..header_end]).map_err(|_| RtspError::Parse {
            kind: ParseErrorKind::InvalidHeader,
        })?;

        let mut lines = header_text.lines();
        let request_line = lines.next().ok_or(RtspError::Parse {
            kind: ParseErrorKind::EmptyRequest,
        })?;

        let parts: Vec<&str> = request_line.split_whitespace().collect();
        if parts.len() != 3 {
            return Err(RtspError::Parse {
                kind: ParseErrorKind::InvalidRequestLine,
            });
        }

        let method = parts[0].to_string();
        let uri = parts[1].to_string();
        let version = parts[2].to_string();

        if version != "RTSP/1.0" {
            tracing::warn!(version, "client sent non-RTSP/1.0 version");
        }

        let mut headers = Vec::new();
        for line in lines {
            if line.is_empty() {
                continue;
            }
            let colon_pos = line.find(':').ok_or(RtspError::Parse {
                kind: ParseErrorKind::InvalidHeader,
            })?;
            let name = line[..colon_pos].trim().to_string();
            let value = line[colon_pos + 1..].trim().to_string();
            headers.push((name, value));
        }

        let body_start = header_end + 4;
        let content_length: usize = headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("Content-Length"))
            .and_then(|(_, v)| v.parse().ok())
            .unwrap_or(0);

        if data.len() < body_start + content_length {
            return Err(RtspError::Parse {
                kind: ParseErrorKind::IncompleteBody,
            });
        }

        let body = data[body_start..body_start + content_length].to_vec();
        let consumed = body_start + content_length;

        Ok((
            RtspRequest {
                method,
                uri,
                version,
                headers,
                body,
            },
            consumed,
        ))
    }

    /// Look up a header value by name (case-insensitive, per RFC 2326 §4.2).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Returns the CSeq header value (RFC 2326 §12.17).
    pub fn cseq(&self) -> Option<&str> {
        self.get_header("CSeq")
    }
}

fn find_double_crlf(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n").or_else(|| {
        // Be lenient about bare \n\n, since some clients/tests don't send \r\n.
        data.windows(2).position(|w| w == b"\n\n")
    })
}
