use std::sync::OnceLock;
use std::time::Duration;

use http::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;

use crate::token_reader::parse_form;
use crate::{ApiError, ApiErrorKind, Error, Request, Result, TransportError};

/// Low-level failure that prevented an HTTP response from forming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportFailure {
    pub message: String,
    pub code: i64,
}

/// What the transport observed while executing the request.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    pub error: Option<TransportFailure>,
    /// Headers as they were actually sent, defaults included.
    pub request_headers: Vec<(String, String)>,
    pub http_version: Option<String>,
    pub effective_url: Option<Url>,
    pub elapsed: Option<Duration>,
}

/// One header block of a raw HTTP response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct HeaderBlock {
    status_line: Option<String>,
    status: Option<u16>,
    fields: Vec<(String, String)>,
}

/// Raw HTTP result of a [`Request`].
#[derive(Debug, Clone)]
pub struct Response {
    request: Request,
    content: String,
    status: u16,
    headers: Vec<(String, String)>,
    info: Diagnostics,
    parsed: OnceLock<Value>,
}

impl Response {
    pub fn new(
        request: Request,
        content: impl Into<String>,
        status: u16,
        headers: Vec<(String, String)>,
        info: Diagnostics,
    ) -> Self {
        Response {
            request,
            content: content.into(),
            status,
            headers,
            info,
            parsed: OnceLock::new(),
        }
    }

    /// Synthetic, never-OK response standing in for a request that got no answer.
    pub fn failed(request: Request, failure: TransportFailure, mut info: Diagnostics) -> Self {
        info.error = Some(failure);
        Response::new(request, String::new(), 0, Vec::new(), info)
    }

    /// Parses a raw HTTP exchange (`status line`, headers, blank line, body).
    ///
    /// Informational `1xx` blocks that precede the final answer are skipped; the last
    /// header block wins.
    pub fn from_raw(request: Request, raw: &str) -> Result<Response> {
        let mut blocks = Vec::new();
        let mut rest = raw;
        loop {
            let (head, tail) = split_head(rest);
            blocks.push(parse_header_block(head));
            rest = tail;
            if !rest.starts_with("HTTP/") {
                break;
            }
        }

        let last = blocks.pop().unwrap_or_default();
        let status = last.status.ok_or_else(|| {
            Error::InvalidArgument("raw response does not start with a status line".to_string())
        })?;
        let info = Diagnostics {
            http_version: last
                .status_line
                .as_deref()
                .and_then(|line| line.split_whitespace().next())
                .map(str::to_string),
            ..Diagnostics::default()
        };
        Ok(Response::new(request, rest, status, last.fields, info))
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.info
    }

    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_json(&self) -> bool {
        self.content_type()
            .map(|ct| ct.starts_with("application/json"))
            .unwrap_or(false)
    }

    pub fn is_xml(&self) -> bool {
        self.content_type()
            .map(|ct| {
                ct.starts_with("text/xml") || ct.starts_with("application/xml") || ct.contains("+xml")
            })
            .unwrap_or(false)
    }

    /// Form-encoded body, the shape of the OAuth token endpoints' answers.
    pub fn is_query_string(&self) -> bool {
        let plain = match self.content_type() {
            None => true,
            Some(ct) => {
                ct.starts_with("text/plain") || ct.starts_with("application/x-www-form-urlencoded")
            }
        };
        plain && self.content.contains('=')
    }

    pub fn is_paginated(&self) -> bool {
        self.request.is_paginated()
    }

    /// Decoded JSON body. Parsed on first use and memoized afterwards.
    pub fn to_value(&self) -> Result<&Value> {
        if let Some(value) = self.parsed.get() {
            return Ok(value);
        }
        if !self.is_json() {
            return Err(self
                .parse_error(format!(
                    "response is not JSON (content type {:?})",
                    self.content_type().unwrap_or_default()
                ))
                .into());
        }
        let value: Value = serde_json::from_str(&self.content).map_err(|e| {
            let message = if self.content.is_empty() {
                e.to_string()
            } else {
                format!("{}\n\n{}", e, self.content)
            };
            self.parse_error(message).with_source(e)
        })?;
        Ok(self.parsed.get_or_init(|| value))
    }

    /// Decoded form-encoded body.
    pub fn to_form(&self) -> Vec<(String, String)> {
        parse_form(&self.content)
    }

    /// Decodes a form-encoded body into `T`.
    pub fn deserialize_form<T: DeserializeOwned>(&self) -> Result<T> {
        serde_urlencoded::from_str(self.content.trim())
            .map_err(|e| self.parse_error(e.to_string()).with_source(e).into())
    }

    /// Decodes an XML body into `T` (attributes are `@name` fields).
    pub fn deserialize_xml<T: DeserializeOwned>(&self) -> Result<T> {
        if !self.is_xml() {
            return Err(self
                .parse_error(format!(
                    "response is not XML (content type {:?})",
                    self.content_type().unwrap_or_default()
                ))
                .into());
        }
        quick_xml::de::from_str(&self.content)
            .map_err(|e| self.parse_error(e.to_string()).with_source(e).into())
    }

    /// Target of the RFC 5988 `Link` header entry whose `rel` matches.
    pub fn pagination_link(&self, rel: &str) -> Option<Url> {
        let value = self.header("Link")?;
        for entry in value.split(',') {
            let mut parts = entry.split(';');
            let target = parts
                .next()?
                .trim()
                .strip_prefix('<')
                .and_then(|t| t.strip_suffix('>'));
            let Some(target) = target else {
                continue;
            };
            let matches = parts.any(|param| match param.split_once('=') {
                Some((name, value)) => {
                    name.trim().eq_ignore_ascii_case("rel")
                        && value
                            .trim()
                            .trim_matches('"')
                            .split_whitespace()
                            .any(|r| r.eq_ignore_ascii_case(rel))
                }
                None => false,
            });
            if matches {
                return self.request.url().join(target).ok();
            }
        }
        None
    }

    /// Typed error describing why this response is not a usable answer.
    ///
    /// A JSON body carrying `message` (and usually `code`) becomes an
    /// [`ApiErrorKind::Provider`] error; a request that never got an answer becomes a
    /// [`TransportError::Network`]; anything else is [`ApiErrorKind::RequestFailed`].
    pub fn to_error(&self) -> Error {
        if !self.content.is_empty() && self.is_json() {
            if let Ok(body) = self.to_value() {
                if let Some(message) = body.get("message").and_then(Value::as_str) {
                    let code = body.get("code").and_then(json_code).unwrap_or_default();
                    return ApiError::new(
                        ApiErrorKind::Provider,
                        code,
                        message,
                        self.request.clone(),
                    )
                    .bind_response(self)
                    .into();
                }
            }
        }

        if let Some(failure) = &self.info.error {
            return TransportError::Network {
                message: failure.message.clone(),
                code: failure.code,
                request: Box::new(self.request.clone()),
            }
            .into();
        }

        let message = if self.is_ok() {
            "response is not a successful API answer".to_string()
        } else {
            match StatusCode::from_u16(self.status)
                .ok()
                .and_then(|s| s.canonical_reason())
            {
                Some(reason) => format!("HTTP {} {}", self.status, reason),
                None => format!("HTTP {}", self.status),
            }
        };
        ApiError::new(
            ApiErrorKind::RequestFailed,
            i64::from(self.status),
            message,
            self.request.clone(),
        )
        .bind_response(self)
        .into()
    }

    fn content_type(&self) -> Option<String> {
        self.header("Content-Type")
            .map(|ct| ct.trim().to_ascii_lowercase())
    }

    fn parse_error(&self, message: String) -> ApiError {
        ApiError::new(
            ApiErrorKind::Parse,
            i64::from(self.status),
            message,
            self.request.clone(),
        )
        .bind_response(self)
    }
}

fn json_code(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

/// Splits at the first blank line; returns the whole input as head if there is none.
fn split_head(raw: &str) -> (&str, &str) {
    let crlf = raw.find("\r\n\r\n").map(|i| (i, 4));
    let lf = raw.find("\n\n").map(|i| (i, 2));
    let split = match (crlf, lf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    };
    match split {
        Some((at, len)) => (&raw[..at], &raw[at + len..]),
        None => (raw, ""),
    }
}

/// Parses one header block; lines that are neither a status line nor `Name: value` are dropped.
fn parse_header_block(block: &str) -> HeaderBlock {
    let mut parsed = HeaderBlock::default();
    for line in block.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if line.starts_with("HTTP/") {
            parsed.status = line
                .split_whitespace()
                .nth(1)
                .and_then(|code| code.parse().ok());
            parsed.status_line = Some(line.to_string());
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            let valid = !name.is_empty()
                && name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-');
            if valid {
                parsed
                    .fields
                    .push((name.to_string(), value.trim().to_string()));
            }
        }
    }
    parsed
}
