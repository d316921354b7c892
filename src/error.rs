use thiserror::Error;

use crate::{Request, Response};

pub type Result<T> = std::result::Result<T, Error>;
pub type SignResult<T> = std::result::Result<T, SignError>;
pub type TokenReaderResult<T> = std::result::Result<T, TokenReaderError>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Api(#[from] Box<ApiError>),
    #[error("invalid argument : {0}")]
    InvalidArgument(String),
    #[error("OAuth sign failed : {0}")]
    Signer(#[from] SignError),
    #[error("token acquisition failed : {0}")]
    TokenReader(#[from] TokenReaderError),
    #[error("malformed url : {0}")]
    Url(#[from] url::ParseError),
}

impl Error {
    /// Provider error code, if this error came back from the API.
    pub fn api_code(&self) -> Option<i64> {
        match self {
            Error::Api(err) => Some(err.code),
            _ => None,
        }
    }
}

impl From<ApiError> for Error {
    fn from(err: ApiError) -> Self {
        Error::Api(Box::new(err))
    }
}

#[derive(Error, Debug)]
pub enum TransportError {
    /// The request never produced an HTTP response (DNS, TCP, TLS).
    #[error("request to {} failed : {message} (code {code})", .request.url())]
    Network {
        message: String,
        code: i64,
        request: Box<Request>,
    },
    #[error("HTTP client could not be constructed : {source}")]
    ClientBuild {
        #[source]
        source: BoxError,
    },
    #[error("I/O error while preparing the request : {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    pub fn client_build(src: impl std::error::Error + Send + Sync + 'static) -> Self {
        TransportError::ClientBuild {
            source: Box::new(src),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// The provider answered with an error payload (`stat=fail`, `message`/`code`).
    Provider,
    /// Non-2xx answer, or a 2xx answer that is not a valid API envelope.
    RequestFailed,
    /// The body could not be decoded.
    Parse,
}

/// Failure reported by (or decoded from) a well-formed HTTP response.
#[derive(Error, Debug)]
#[error("{message} (code {code})")]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub code: i64,
    pub message: String,
    pub request: Request,
    pub response: Option<Response>,
    #[source]
    pub source: Option<BoxError>,
}

impl ApiError {
    pub fn new(kind: ApiErrorKind, code: i64, message: impl Into<String>, request: Request) -> Self {
        ApiError {
            kind,
            code,
            message: message.into(),
            request,
            response: None,
            source: None,
        }
    }

    pub(crate) fn bind_response(mut self, response: &Response) -> Self {
        self.response = Some(response.clone());
        self
    }

    pub(crate) fn with_source(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

#[derive(Error, Debug, Clone)]
pub enum SignError {
    #[error("signing key could not be used for HMAC-SHA1 : {0}")]
    InvalidKey(String),
}

#[derive(Error, Debug, Clone)]
pub enum TokenReaderError {
    #[error("response has malformed format: not found {0} in {1}")]
    TokenKeyNotFound(&'static str, String),
}
