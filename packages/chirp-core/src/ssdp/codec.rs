//! SSDP wire codec.
//!
//! SSDP reuses HTTP/1.1 message framing over UDP: a start line, a block of
//! `Name: value` header lines, and an empty line. There is never a body.
//!
//! Header names are kept exactly as received and looked up ASCII
//! case-insensitively, since devices disagree on casing (`Usn`, `USN`, `usn`).

use std::fmt;

use thiserror::Error;

use crate::protocol_constants::{HTTP_VERSION, MAX_AGE_PREFIX};

/// Errors produced while decoding a datagram.
///
/// Every variant means the datagram is malformed and must be dropped.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// The datagram was empty or contained only whitespace.
    #[error("Malformed message: empty datagram")]
    Empty,

    /// The datagram was not valid UTF-8.
    #[error("Malformed message: datagram is not valid UTF-8")]
    InvalidUtf8,

    /// The first line is neither a request line nor a status line.
    #[error("Malformed message: unparsable start line {0:?}")]
    MalformedStartLine(String),
}

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// First line of an SSDP message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartLine {
    /// `METHOD TARGET HTTP/1.1`, e.g. `NOTIFY * HTTP/1.1`.
    Request {
        method: String,
        target: String,
        version: String,
    },
    /// `HTTP/1.1 CODE REASON`, e.g. `HTTP/1.1 200 OK`.
    Status {
        version: String,
        code: u16,
        reason: String,
    },
}

impl StartLine {
    /// Builds an `HTTP/1.1` request line.
    pub fn request(method: impl Into<String>, target: impl Into<String>) -> Self {
        Self::Request {
            method: method.into(),
            target: target.into(),
            version: HTTP_VERSION.to_string(),
        }
    }

    /// Builds an `HTTP/1.1 200 OK` status line.
    pub fn ok() -> Self {
        Self::Status {
            version: HTTP_VERSION.to_string(),
            code: 200,
            reason: "OK".to_string(),
        }
    }

    fn parse(line: &str) -> CodecResult<Self> {
        let malformed = || CodecError::MalformedStartLine(line.to_string());
        let mut parts = line.splitn(3, ' ');
        let first = parts.next().filter(|s| !s.is_empty()).ok_or_else(malformed)?;
        let second = parts.next().filter(|s| !s.is_empty()).ok_or_else(malformed)?;
        let third = parts.next().unwrap_or("").trim();

        if first.starts_with("HTTP/") {
            let code = second.parse::<u16>().map_err(|_| malformed())?;
            Ok(Self::Status {
                version: first.to_string(),
                code,
                reason: third.to_string(),
            })
        } else {
            if !third.starts_with("HTTP/") {
                return Err(malformed());
            }
            Ok(Self::Request {
                method: first.to_string(),
                target: second.to_string(),
                version: third.to_string(),
            })
        }
    }
}

impl fmt::Display for StartLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request {
                method,
                target,
                version,
            } => write!(f, "{} {} {}", method, target, version),
            Self::Status {
                version,
                code,
                reason,
            } => write!(f, "{} {} {}", version, code, reason),
        }
    }
}

/// Ordered header map with case-insensitive lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value of the first header matching `name`, ignoring ASCII case.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns the header value, or an empty string when absent.
    #[must_use]
    pub fn get_or_empty(&self, name: &str) -> &str {
        self.get(name).unwrap_or("")
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Sets a header, replacing any existing entry with the same name.
    ///
    /// A replaced entry keeps its position but takes the new spelling of `name`.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self
            .entries
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(&name))
        {
            Some(entry) => *entry = (name, value),
            None => self.entries.push((name, value)),
        }
    }

    /// Iterates headers in insertion order with their original spelling.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (k, v) in iter {
            headers.insert(k, v);
        }
        headers
    }
}

/// A decoded SSDP datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SsdpMessage {
    pub start_line: StartLine,
    pub headers: Headers,
}

impl SsdpMessage {
    pub fn new(start_line: StartLine, headers: Headers) -> Self {
        Self {
            start_line,
            headers,
        }
    }

    /// Decodes a raw datagram.
    ///
    /// Accepts both CRLF and bare LF line endings. Header lines without a
    /// colon are skipped; only a bad start line rejects the whole datagram.
    pub fn parse(raw: &[u8]) -> CodecResult<Self> {
        let text = std::str::from_utf8(raw).map_err(|_| CodecError::InvalidUtf8)?;
        let mut lines = text.lines().skip_while(|l| l.trim().is_empty());

        let first = lines.next().ok_or(CodecError::Empty)?;
        let start_line = StartLine::parse(first.trim())?;

        let mut headers = Headers::new();
        for line in lines {
            if line.trim().is_empty() {
                break;
            }
            match line.split_once(':') {
                Some((name, value)) => {
                    headers
                        .entries
                        .push((name.trim().to_string(), value.trim().to_string()));
                }
                None => log::trace!("[SSDP] Skipping header line without colon: {:?}", line),
            }
        }

        Ok(Self {
            start_line,
            headers,
        })
    }

    /// Returns the request method, if this is a request.
    #[must_use]
    pub fn method(&self) -> Option<&str> {
        match &self.start_line {
            StartLine::Request { method, .. } => Some(method),
            StartLine::Status { .. } => None,
        }
    }

    /// Returns the status code, if this is a response.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match &self.start_line {
            StartLine::Status { code, .. } => Some(*code),
            StartLine::Request { .. } => None,
        }
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Encodes the message for the wire.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl fmt::Display for SsdpMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\r\n", self.start_line)?;
        for (name, value) in self.headers.iter() {
            write!(f, "{}: {}\r\n", name, value)?;
        }
        f.write_str("\r\n")
    }
}

/// Parses a `CACHE-CONTROL` value of the form `max-age=<seconds>`.
///
/// Returns 0 when the header is absent, lacks the prefix, or has no leading digits.
#[must_use]
pub fn parse_max_age(value: Option<&str>) -> u64 {
    let Some(value) = value else {
        return 0;
    };
    let value = value.trim();
    let Some(rest) = value
        .get(..MAX_AGE_PREFIX.len())
        .filter(|p| p.eq_ignore_ascii_case(MAX_AGE_PREFIX))
        .map(|_| &value[MAX_AGE_PREFIX.len()..])
    else {
        return 0;
    };
    let digits: String = rest
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().unwrap_or(0)
}
