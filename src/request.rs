use std::path::PathBuf;

use http::Method;
use url::Url;

use crate::{Error, Result, OAUTH_SIGNATURE_KEY};

/// Query parameters that mark a collection call as paginated.
pub const PAGE_KEY: &str = "page";
pub const PER_PAGE_KEY: &str = "per_page";

/// File attached to a multipart body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePart {
    pub name: String,
    pub path: PathBuf,
}

/// Outbound request payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Body {
    #[default]
    Empty,
    /// `application/x-www-form-urlencoded` fields.
    Form(Vec<(String, String)>),
    /// Opaque payload sent as-is.
    Raw { content_type: String, bytes: Vec<u8> },
    /// `multipart/form-data`; only the text `fields` take part in signing.
    Multipart {
        fields: Vec<(String, String)>,
        files: Vec<FilePart>,
    },
}

impl Body {
    pub fn is_empty(&self) -> bool {
        match self {
            Body::Empty => true,
            Body::Form(fields) => fields.is_empty(),
            Body::Raw { bytes, .. } => bytes.is_empty(),
            Body::Multipart { fields, files } => fields.is_empty() && files.is_empty(),
        }
    }

    /// Key/value pairs of the body that belong in the OAuth signature base.
    pub fn signable_fields(&self) -> &[(String, String)] {
        match self {
            Body::Form(fields) | Body::Multipart { fields, .. } => fields,
            Body::Empty | Body::Raw { .. } => &[],
        }
    }
}

/// Description of a single outbound call.
///
/// The method is always one of `GET`, `HEAD`, `POST`, `PATCH`, `PUT` or `DELETE`,
/// and `GET`/`HEAD` requests never carry a body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    url: Url,
    method: Method,
    body: Body,
    headers: Vec<(String, String)>,
}

impl Request {
    /// Trusts `method` to be one the API speaks; use [`Request::try_new`] for
    /// caller-supplied methods.
    pub fn new(method: Method, url: Url) -> Self {
        Request {
            url,
            method,
            body: Body::Empty,
            headers: Vec::new(),
        }
    }

    /// Validates and uppercases `method` before building the request.
    pub fn try_new(method: &str, url: Url) -> Result<Self> {
        Ok(Request::new(Request::parse_method(method)?, url))
    }

    /// Parses a method name case-insensitively, rejecting anything the API does not speak.
    pub fn parse_method(method: &str) -> Result<Method> {
        let upper = method.trim().to_ascii_uppercase();
        match upper.as_str() {
            "GET" => Ok(Method::GET),
            "HEAD" => Ok(Method::HEAD),
            "POST" => Ok(Method::POST),
            "PATCH" => Ok(Method::PATCH),
            "PUT" => Ok(Method::PUT),
            "DELETE" => Ok(Method::DELETE),
            _ => Err(Error::InvalidArgument(format!(
                "unsupported HTTP method {method:?}"
            ))),
        }
    }

    /// Sets the body. Ignored for `GET` and `HEAD`.
    pub fn with_body(mut self, body: Body) -> Self {
        if !self.is_get() && !self.is_head() {
            self.body = body;
        }
        self
    }

    /// Sets a form-encoded body. Ignored for `GET` and `HEAD`.
    pub fn with_form<I, K, V>(self, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let fields: Vec<(String, String)> = fields
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        if fields.is_empty() {
            self
        } else {
            self.with_body(Body::Form(fields))
        }
    }

    /// Adds a header, replacing any header with the same (case-insensitive) name.
    pub fn with_header<K, V>(mut self, name: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let name = name.into();
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
        self
    }

    pub fn with_headers<I, K, V>(self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        headers
            .into_iter()
            .fold(self, |req, (k, v)| req.with_header(k, v))
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn body(&self) -> &Body {
        &self.body
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

    pub fn is_get(&self) -> bool {
        self.method == Method::GET
    }

    pub fn is_head(&self) -> bool {
        self.method == Method::HEAD
    }

    /// Decoded query parameters, in URL order.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        self.url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    pub fn query_param(&self, key: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    /// A `GET` asking for a specific page or page size of a collection.
    pub fn is_paginated(&self) -> bool {
        self.is_get()
            && self
                .url
                .query_pairs()
                .any(|(k, _)| k == PAGE_KEY || k == PER_PAGE_KEY)
    }

    /// Query parameters plus signable body fields, without any `oauth_signature`.
    pub fn signable_parameters(&self) -> Vec<(String, String)> {
        self.query_pairs()
            .into_iter()
            .chain(self.body.signable_fields().iter().cloned())
            .filter(|(k, _)| k != OAUTH_SIGNATURE_KEY)
            .collect()
    }

    /// Same method, body and headers, pointed at a different URL.
    pub fn copy_with_url(&self, url: Url) -> Request {
        Request {
            url,
            method: self.method.clone(),
            body: self.body.clone(),
            headers: self.headers.clone(),
        }
    }

    pub(crate) fn set_url(&mut self, url: Url) {
        self.url = url;
    }
}
