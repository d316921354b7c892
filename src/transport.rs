use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use reqwest::blocking::{multipart, Client as HttpClient};
use reqwest::header::CONTENT_TYPE;
use reqwest::Certificate;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use url::{Host, Url};

use crate::{
    Body, Diagnostics, FilePart, Request, Response, Result, TransportConfig, TransportError,
    TransportFailure,
};

/// Executes a [`Request`] and hands back its [`Response`].
///
/// Implementations return `Err` for any response that is not OK, using
/// [`Response::to_error`] to describe it.
pub trait Transport {
    fn execute(&self, request: &Request) -> Result<Response>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn execute(&self, request: &Request) -> Result<Response> {
        (**self).execute(request)
    }
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn execute(&self, request: &Request) -> Result<Response> {
        (**self).execute(request)
    }
}

type RequestHook = Box<dyn Fn(&Request) + Send + Sync>;
type ResponseHook = Box<dyn Fn(&Response) + Send + Sync>;

#[derive(Default)]
struct Hooks {
    request: Vec<RequestHook>,
    success: Vec<ResponseHook>,
    error: Vec<ResponseHook>,
}

/// Connection adjustments learned from earlier failures. Once set they stay set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct ClientFlags {
    bundled_roots: bool,
    force_ipv4: bool,
}

#[derive(Default)]
struct ClientState {
    flags: ClientFlags,
    client: Option<HttpClient>,
}

enum SendError {
    Http(reqwest::Error),
    Io(std::io::Error),
}

/// Blocking [`Transport`] over `reqwest`.
pub struct ReqwestTransport {
    config: TransportConfig,
    state: Mutex<ClientState>,
    memo: Mutex<HashMap<String, Response>>,
    hooks: Hooks,
}

impl ReqwestTransport {
    pub fn new(config: TransportConfig) -> Self {
        ReqwestTransport {
            config,
            state: Mutex::new(ClientState::default()),
            memo: Mutex::new(HashMap::new()),
            hooks: Hooks::default(),
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Called before every request that goes out on the wire.
    pub fn on_request(mut self, hook: impl Fn(&Request) + Send + Sync + 'static) -> Self {
        self.hooks.request.push(Box::new(hook));
        self
    }

    /// Called with every OK response.
    pub fn on_success(mut self, hook: impl Fn(&Response) + Send + Sync + 'static) -> Self {
        self.hooks.success.push(Box::new(hook));
        self
    }

    /// Called with every response that is about to be turned into an error.
    pub fn on_error(mut self, hook: impl Fn(&Response) + Send + Sync + 'static) -> Self {
        self.hooks.error.push(Box::new(hook));
        self
    }

    pub fn clear_memo(&self) {
        self.memo.lock().clear();
    }

    /// Default headers overlaid with the request's own, minus any `Expect`.
    fn outgoing_headers(&self, request: &Request) -> Vec<(String, String)> {
        let mut headers: Vec<(String, String)> = self
            .config
            .default_headers
            .iter()
            .filter(|(k, _)| request.header(k).is_none())
            .cloned()
            .collect();
        headers.extend(request.headers().iter().cloned());
        headers.retain(|(k, _)| !k.eq_ignore_ascii_case("expect"));
        headers
    }

    fn client(&self) -> Result<(HttpClient, ClientFlags)> {
        let mut state = self.state.lock();
        if let Some(client) = &state.client {
            return Ok((client.clone(), state.flags));
        }
        let client = self.build_client(state.flags)?;
        state.client = Some(client.clone());
        Ok((client, state.flags))
    }

    fn update_flags(&self, update: impl FnOnce(&mut ClientFlags)) {
        let mut state = self.state.lock();
        update(&mut state.flags);
        state.client = None;
    }

    fn build_client(&self, flags: ClientFlags) -> Result<HttpClient> {
        let mut builder = HttpClient::builder()
            .connect_timeout(self.config.connect_timeout)
            .timeout(self.config.timeout)
            .user_agent(self.config.user_agent.clone());
        if flags.bundled_roots {
            builder = builder.tls_built_in_root_certs(false);
            for der in webpki_root_certs::TLS_SERVER_ROOT_CERTS {
                let cert =
                    Certificate::from_der(der.as_ref()).map_err(TransportError::client_build)?;
                builder = builder.add_root_certificate(cert);
            }
        }
        if flags.force_ipv4 {
            builder = builder.local_address(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        }
        Ok(builder.build().map_err(TransportError::client_build)?)
    }

    /// Sends `request`, retrying once with bundled roots on a certificate failure and
    /// once over IPv4 when an IPv6 destination is unreachable. A request that still
    /// gets no answer is folded into a synthetic failed [`Response`].
    fn dispatch(&self, request: &Request, headers: &[(String, String)]) -> Result<Response> {
        loop {
            let (client, flags) = self.client()?;
            let started = Instant::now();
            let err = match send(&client, request, headers) {
                Ok(response) => return Ok(response),
                Err(SendError::Io(e)) => return Err(TransportError::Io(e).into()),
                Err(SendError::Http(e)) => e,
            };

            let chain = error_chain(&err);
            if !flags.bundled_roots && is_certificate_error(&chain) {
                warn!(url = %request.url(), error = %chain, "certificate validation failed, retrying with bundled root certificates");
                self.update_flags(|f| f.bundled_roots = true);
                continue;
            }
            if !flags.force_ipv4 && is_unreachable(&chain) && targets_ipv6(request.url(), &chain) {
                warn!(url = %request.url(), error = %chain, "IPv6 destination unreachable, retrying over IPv4");
                self.update_flags(|f| f.force_ipv4 = true);
                continue;
            }

            debug!(url = %request.url(), error = %chain, "request got no response");
            let failure = TransportFailure {
                code: failure_code(&err, &chain),
                message: chain,
            };
            let info = Diagnostics {
                request_headers: headers.to_vec(),
                effective_url: Some(request.url().clone()),
                elapsed: Some(started.elapsed()),
                ..Diagnostics::default()
            };
            return Ok(Response::failed(request.clone(), failure, info));
        }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        ReqwestTransport::new(TransportConfig::default())
    }
}

impl fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReqwestTransport")
            .field("config", &self.config)
            .field("flags", &self.state.lock().flags)
            .field("memoized", &self.memo.lock().len())
            .finish()
    }
}

impl Transport for ReqwestTransport {
    fn execute(&self, request: &Request) -> Result<Response> {
        let headers = self.outgoing_headers(request);
        let key = self.config.memoize.then(|| memo_key(request, &headers));
        if let Some(key) = &key {
            if let Some(hit) = self.memo.lock().get(key).cloned() {
                debug!(method = %request.method(), url = %request.url(), "answered from memo");
                return Ok(hit);
            }
        }

        for hook in &self.hooks.request {
            hook(request);
        }
        debug!(method = %request.method(), url = %request.url(), "dispatching request");
        let response = self.dispatch(request, &headers)?;

        if !response.is_ok() {
            for hook in &self.hooks.error {
                hook(&response);
            }
            return Err(response.to_error());
        }
        for hook in &self.hooks.success {
            hook(&response);
        }
        if let Some(key) = key {
            self.memo.lock().insert(key, response.clone());
        }
        Ok(response)
    }
}

fn send(
    client: &HttpClient,
    request: &Request,
    headers: &[(String, String)],
) -> std::result::Result<Response, SendError> {
    let mut builder = client.request(request.method().clone(), request.url().clone());
    for (name, value) in headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder = match request.body() {
        Body::Empty => builder,
        Body::Form(fields) => builder.form(fields),
        Body::Raw {
            content_type,
            bytes,
        } => builder
            .header(CONTENT_TYPE, content_type.as_str())
            .body(bytes.clone()),
        Body::Multipart { fields, files } => {
            builder.multipart(multipart_form(fields, files).map_err(SendError::Io)?)
        }
    };

    let started = Instant::now();
    let response = builder.send().map_err(SendError::Http)?;
    let status = response.status().as_u16();
    let info = Diagnostics {
        error: None,
        request_headers: headers.to_vec(),
        http_version: Some(format!("{:?}", response.version())),
        effective_url: Some(response.url().clone()),
        elapsed: None,
    };
    let response_headers = response
        .headers()
        .iter()
        .map(|(k, v)| {
            (
                k.as_str().to_string(),
                String::from_utf8_lossy(v.as_bytes()).into_owned(),
            )
        })
        .collect();
    let content = response.text().map_err(SendError::Http)?;
    Ok(Response::new(
        request.clone(),
        content,
        status,
        response_headers,
        Diagnostics {
            elapsed: Some(started.elapsed()),
            ..info
        },
    ))
}

fn multipart_form(
    fields: &[(String, String)],
    files: &[FilePart],
) -> std::io::Result<multipart::Form> {
    let mut form = fields
        .iter()
        .fold(multipart::Form::new(), |form, (k, v)| {
            form.text(k.clone(), v.clone())
        });
    for file in files {
        form = form.file(file.name.clone(), &file.path)?;
    }
    Ok(form)
}

/// Content hash of everything that makes two requests identical on the wire.
fn memo_key(request: &Request, headers: &[(String, String)]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(request.method().as_str());
    hasher.update([0]);
    hasher.update(request.url().as_str());
    hasher.update([0]);
    match request.body() {
        Body::Empty => {}
        Body::Form(fields) => {
            for (k, v) in fields {
                hasher.update(format!("{k}={v}\n"));
            }
        }
        Body::Raw {
            content_type,
            bytes,
        } => {
            hasher.update(content_type);
            hasher.update([0]);
            hasher.update(bytes);
        }
        Body::Multipart { fields, files } => {
            for (k, v) in fields {
                hasher.update(format!("{k}={v}\n"));
            }
            for file in files {
                hasher.update(format!("{}@", file.name));
                // unreadable files fail later, when the form is built
                match std::fs::read(&file.path) {
                    Ok(bytes) => hasher.update(bytes),
                    Err(_) => hasher.update(file.path.display().to_string()),
                }
                hasher.update([0]);
            }
        }
    }
    hasher.update([0]);
    for (k, v) in headers {
        hasher.update(format!("{}:{}\n", k.to_ascii_lowercase(), v));
    }
    format!("{:x}", hasher.finalize())
}

fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut parts = Vec::new();
    let mut current = Some(err);
    while let Some(e) = current {
        let text = e.to_string();
        if !parts.contains(&text) {
            parts.push(text);
        }
        current = e.source();
    }
    parts.join(": ")
}

fn is_certificate_error(chain: &str) -> bool {
    chain.contains("certificate") || chain.contains("UnknownIssuer")
}

fn is_unreachable(chain: &str) -> bool {
    chain.contains("Network is unreachable") || chain.contains("os error 101")
}

fn targets_ipv6(url: &Url, chain: &str) -> bool {
    match url.host() {
        Some(Host::Ipv6(_)) => true,
        Some(Host::Ipv4(_)) | None => false,
        Some(Host::Domain(domain)) => {
            chain.contains("]:") || resolves_to_ipv6(domain, url.port_or_known_default())
        }
    }
}

fn resolves_to_ipv6(domain: &str, port: Option<u16>) -> bool {
    (domain, port.unwrap_or(443))
        .to_socket_addrs()
        .map(|mut addrs| addrs.next().map(|a| a.is_ipv6()).unwrap_or(false))
        .unwrap_or(false)
}

/// curl-compatible codes, so hosts can match on familiar numbers.
fn failure_code(err: &reqwest::Error, chain: &str) -> i64 {
    if err.is_timeout() {
        28
    } else if is_certificate_error(chain) {
        60
    } else if chain.contains("dns error") {
        6
    } else if err.is_connect() {
        7
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use http::Method;

    use super::*;
    use crate::TransportConfig;

    fn request(url: &str) -> Request {
        Request::new(Method::GET, Url::parse(url).unwrap())
    }

    #[test]
    fn request_headers_override_defaults_and_expect_is_dropped() {
        let transport = ReqwestTransport::new(TransportConfig {
            default_headers: vec![
                ("Accept".into(), "application/json".into()),
                ("X-Client".into(), "flickr-oauth1".into()),
            ],
            ..TransportConfig::default()
        });
        let req = request("https://api.flickr.com/services/rest")
            .with_header("accept", "text/xml")
            .with_header("Expect", "100-continue");

        let headers = transport.outgoing_headers(&req);
        assert_eq!(
            headers,
            vec![
                ("X-Client".to_string(), "flickr-oauth1".to_string()),
                ("accept".to_string(), "text/xml".to_string()),
            ]
        );
    }

    #[test]
    fn memo_key_tracks_every_request_component() {
        let base = request("https://api.flickr.com/services/rest?a=1");
        let headers = vec![("Accept".to_string(), "application/json".to_string())];
        let key = memo_key(&base, &headers);

        assert_eq!(key, memo_key(&base.clone(), &headers));
        assert_eq!(key.len(), 64);
        assert_ne!(
            key,
            memo_key(&request("https://api.flickr.com/services/rest?a=2"), &headers)
        );
        assert_ne!(key, memo_key(&base, &[]));

        let post = Request::new(
            Method::POST,
            Url::parse("https://up.flickr.com/services/upload").unwrap(),
        );
        let a = post.clone().with_body(Body::Multipart {
            fields: vec![("title".into(), "x".into())],
            files: vec![FilePart {
                name: "photo".into(),
                path: PathBuf::from("/tmp/a.jpg"),
            }],
        });
        let b = post.with_body(Body::Multipart {
            fields: vec![("title".into(), "x".into())],
            files: vec![FilePart {
                name: "photo".into(),
                path: PathBuf::from("/tmp/b.jpg"),
            }],
        });
        assert_ne!(memo_key(&a, &headers), memo_key(&b, &headers));
    }

    #[test]
    fn memo_key_follows_upload_file_contents() {
        let path = std::env::temp_dir().join(format!("flickr-memo-{}.jpg", std::process::id()));
        let upload = Request::new(
            Method::POST,
            Url::parse("https://up.flickr.com/services/upload").unwrap(),
        )
        .with_body(Body::Multipart {
            fields: vec![("title".into(), "sunset".into())],
            files: vec![FilePart {
                name: "photo".into(),
                path: path.clone(),
            }],
        });

        std::fs::write(&path, b"first version").unwrap();
        let before = memo_key(&upload, &[]);
        assert_eq!(before, memo_key(&upload, &[]));

        std::fs::write(&path, b"second version").unwrap();
        let after = memo_key(&upload, &[]);
        std::fs::remove_file(&path).unwrap();

        assert_ne!(before, after);
    }

    #[test]
    fn failure_classification() {
        assert!(is_certificate_error(
            "error sending request: client error (Connect): invalid peer certificate: UnknownIssuer"
        ));
        assert!(!is_certificate_error("connection refused"));
        assert!(is_unreachable("tcp connect error: Network is unreachable (os error 101)"));

        let literal = Url::parse("https://[2001:db8::1]/services/rest").unwrap();
        assert!(targets_ipv6(&literal, ""));
        let v4 = Url::parse("https://127.0.0.1/services/rest").unwrap();
        assert!(!targets_ipv6(&v4, "Network is unreachable"));
    }

    #[test]
    fn error_chain_skips_repeated_messages() {
        let inner = std::io::Error::new(std::io::ErrorKind::Other, "refused");
        assert_eq!(error_chain(&inner), "refused");
    }

    #[test]
    fn missing_upload_file_is_an_io_error() {
        let transport = ReqwestTransport::default();
        let req = Request::new(
            Method::POST,
            Url::parse("http://127.0.0.1:1/services/upload").unwrap(),
        )
        .with_body(Body::Multipart {
            fields: Vec::new(),
            files: vec![FilePart {
                name: "photo".into(),
                path: PathBuf::from("/definitely/not/here.jpg"),
            }],
        });
        assert!(matches!(
            transport.execute(&req),
            Err(crate::Error::Transport(TransportError::Io(_)))
        ));
    }
}
