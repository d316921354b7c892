use std::fmt;
use std::path::Path;
use std::sync::Arc;

use http::Method;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::token_reader::TokenReader;
use crate::{
    ApiError, ApiErrorKind, Body, Configuration, Domain, Error, FilePart, OAuthParameters,
    Paginator, Profile, ReqwestTransport, Request, Response, Result, Secrets, SessionKey,
    SessionStorage, Signer, Token, Transport, OAUTH_TOKEN_KEY, OAUTH_VERIFIER_KEY,
};

const NO_PARAMS: &[(&str, &str)] = &[];

/// Parameters of the HTTP request the host is currently serving.
///
/// The provider sends the user back to the callback URL with `oauth_token` and
/// `oauth_verifier`; the client reads them from here to finish the handshake.
pub trait RequestContext: Send + Sync {
    /// First non-empty value of `key`, form body before query string.
    fn param(&self, key: &str) -> Option<String>;

    /// URL of the request being served; the default handshake callback.
    fn current_url(&self) -> Option<Url> {
        None
    }
}

/// [`RequestContext`] backed by a URL and/or explicit parameters.
#[derive(Debug, Clone, Default)]
pub struct CallbackParams {
    url: Option<Url>,
    params: Vec<(String, String)>,
}

impl CallbackParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the parameters from the query string of `url`.
    pub fn from_url(url: Url) -> Self {
        let params = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        CallbackParams {
            url: Some(url),
            params,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }
}

impl RequestContext for CallbackParams {
    fn param(&self, key: &str) -> Option<String> {
        self.params
            .iter()
            .find(|(k, v)| k == key && !v.is_empty())
            .map(|(_, v)| v.clone())
    }

    fn current_url(&self) -> Option<Url> {
        self.url.clone()
    }
}

/// Outcome of a successful [`Client::api`] call.
pub enum ApiResponse<'c, T: Transport> {
    Data(Value),
    /// The call asked for a page of a collection (`page`/`per_page`).
    Paginated(Paginator<'c, T>),
}

impl<'c, T: Transport> ApiResponse<'c, T> {
    pub fn is_paginated(&self) -> bool {
        matches!(self, ApiResponse::Paginated(_))
    }

    pub fn into_data(self) -> Option<Value> {
        match self {
            ApiResponse::Data(value) => Some(value),
            ApiResponse::Paginated(_) => None,
        }
    }

    pub fn into_paginator(self) -> Option<Paginator<'c, T>> {
        match self {
            ApiResponse::Paginated(paginator) => Some(paginator),
            ApiResponse::Data(_) => None,
        }
    }
}

impl<T: Transport> fmt::Debug for ApiResponse<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiResponse::Data(value) => f.debug_tuple("Data").field(value).finish(),
            ApiResponse::Paginated(paginator) => {
                f.debug_tuple("Paginated").field(paginator).finish()
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct OAuthProblem {
    oauth_problem: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadAnswer {
    #[serde(rename = "@stat")]
    stat: String,
    photoid: Option<TextNode>,
    ticketid: Option<TextNode>,
    err: Option<UploadFailure>,
}

#[derive(Debug, Deserialize)]
struct TextNode {
    #[serde(rename = "$text")]
    value: String,
}

#[derive(Debug, Deserialize)]
struct UploadFailure {
    #[serde(rename = "@code")]
    code: i64,
    #[serde(rename = "@msg")]
    msg: String,
}

/// Flickr client: drives the OAuth 1.0a handshake and signs every API call.
pub struct Client<T: Transport = ReqwestTransport> {
    config: Configuration,
    transport: T,
    session: SessionStorage,
    context: Arc<dyn RequestContext>,
    access_token: Mutex<Option<Token>>,
    user: Mutex<Option<Option<String>>>,
}

impl Client<ReqwestTransport> {
    pub fn new(config: Configuration, session: SessionStorage) -> Self {
        Client::with_transport(config, ReqwestTransport::default(), session)
    }
}

impl<T: Transport> Client<T> {
    pub fn with_transport(config: Configuration, transport: T, session: SessionStorage) -> Self {
        Client {
            config,
            transport,
            session,
            context: Arc::new(CallbackParams::new()),
            access_token: Mutex::new(None),
            user: Mutex::new(None),
        }
    }

    pub fn with_context(self, context: impl RequestContext + 'static) -> Self {
        Client {
            context: Arc::new(context),
            ..self
        }
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn session(&self) -> &SessionStorage {
        &self.session
    }

    pub fn current_url(&self) -> Option<Url> {
        self.context.current_url()
    }

    /// Where to send the user once a request token was obtained.
    pub fn authorize_url(&self) -> Result<Option<Url>> {
        let Some(token) = self.session.request_token() else {
            return Ok(None);
        };
        let url = self.config.create_url(
            Domain::OAuth,
            "authorize",
            &[
                (OAUTH_TOKEN_KEY, token.token.as_str()),
                ("perms", self.config.permission.as_str()),
            ],
        )?;
        Ok(Some(url))
    }

    /// First leg of the handshake. Discards any previous session state.
    ///
    /// Returns `false` when the provider did not hand out a confirmed request token;
    /// the session stays empty in that case.
    pub fn obtain_request_token(&self, callback: Option<&str>) -> bool {
        self.session.clear_all();
        match self.fetch_request_token(callback) {
            Ok(Some(token)) => {
                self.session.set_request_token(&token);
                true
            }
            Ok(None) => {
                debug!("request token answer was not confirmed");
                false
            }
            Err(err) => {
                warn!(error = %err, problem = ?oauth_problem(&err), "request token could not be obtained");
                false
            }
        }
    }

    /// Exchanges the callback's `verifier` and `token` for an access token.
    pub fn obtain_access_token(&self, verifier: &str, token: &str) -> bool {
        if verifier.is_empty() || token.is_empty() {
            return false;
        }
        match self.fetch_access_token(verifier, token) {
            Ok(Some(access)) => {
                self.session.clear_all();
                self.session.set_access_token(&access);
                self.session.set_consumed_verifier(verifier, token);
                true
            }
            Ok(None) => {
                debug!("access token answer lacked the token pair");
                false
            }
            Err(err) => {
                warn!(error = %err, problem = ?oauth_problem(&err), "access token could not be obtained");
                false
            }
        }
    }

    /// Current access token, finishing the handshake first if the request context
    /// carries a verifier that was not consumed yet.
    pub fn access_token(&self) -> Option<Token> {
        if let Some(token) = self.access_token.lock().clone() {
            return Some(token);
        }
        let token = self.user_access_token()?;
        *self.access_token.lock() = Some(token.clone());
        Some(token)
    }

    /// Installs an access token from a JSON object with `access_token` and
    /// `access_token_secret`.
    pub fn set_access_token(&self, payload: &str) -> Result<()> {
        let value: Value =
            serde_json::from_str(payload).map_err(|e| Error::InvalidArgument(e.to_string()))?;
        let field = |name: &str| value.get(name).and_then(Value::as_str).map(str::to_string);
        match (field("access_token"), field("access_token_secret")) {
            (Some(token), Some(secret)) => {
                self.set_token(Token::new(token, secret));
                Ok(())
            }
            _ => Err(Error::InvalidArgument(
                "access token payload needs both 'access_token' and 'access_token_secret'"
                    .to_string(),
            )),
        }
    }

    pub fn set_token(&self, token: Token) {
        *self.access_token.lock() = Some(token);
    }

    /// Id of the user behind the access token, or `None` when there is no valid one.
    pub fn user(&self) -> Option<String> {
        if let Some(user) = self.user.lock().clone() {
            return user;
        }
        let user = self.user_from_available_data();
        *self.user.lock() = Some(user.clone());
        user
    }

    pub fn profile(&self, username: Option<&str>) -> Result<Profile<'_, T>> {
        Profile::new(self, username)
    }

    pub fn destroy_session(&self) {
        *self.access_token.lock() = None;
        *self.user.lock() = None;
        self.session.clear_all();
    }

    pub fn get(&self, path: &str, params: &[(&str, &str)]) -> Result<ApiResponse<'_, T>> {
        self.api(path, Method::GET, params, NO_PARAMS, NO_PARAMS)
    }

    pub fn head(&self, path: &str, params: &[(&str, &str)]) -> Result<ApiResponse<'_, T>> {
        self.api(path, Method::HEAD, params, NO_PARAMS, NO_PARAMS)
    }

    pub fn post(
        &self,
        path: &str,
        params: &[(&str, &str)],
        post: &[(&str, &str)],
    ) -> Result<ApiResponse<'_, T>> {
        self.api(path, Method::POST, params, post, NO_PARAMS)
    }

    pub fn put(
        &self,
        path: &str,
        params: &[(&str, &str)],
        post: &[(&str, &str)],
    ) -> Result<ApiResponse<'_, T>> {
        self.api(path, Method::PUT, params, post, NO_PARAMS)
    }

    pub fn patch(
        &self,
        path: &str,
        params: &[(&str, &str)],
        post: &[(&str, &str)],
    ) -> Result<ApiResponse<'_, T>> {
        self.api(path, Method::PATCH, params, post, NO_PARAMS)
    }

    pub fn delete(&self, path: &str, params: &[(&str, &str)]) -> Result<ApiResponse<'_, T>> {
        self.api(path, Method::DELETE, params, NO_PARAMS, NO_PARAMS)
    }

    /// Calls the REST method `path` (e.g. `flickr.photos.search`).
    ///
    /// Fails with the error described by the response unless it is JSON with
    /// `stat` equal to `ok`. A `GET` carrying `page` or `per_page` yields a
    /// [`Paginator`] over the returned collection.
    pub fn api(
        &self,
        path: &str,
        method: Method,
        params: &[(&str, &str)],
        post: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> Result<ApiResponse<'_, T>> {
        let mut query: Vec<(&str, &str)> = params
            .iter()
            .filter(|(k, _)| !matches!(*k, "method" | "format" | "nojsoncallback"))
            .copied()
            .collect();
        query.extend([("method", path), ("format", "json"), ("nojsoncallback", "1")]);

        let url = self.config.create_url(Domain::Api, "rest", &query)?;
        let request = Request::try_new(method.as_str(), url)?
            .with_form(post.iter().copied())
            .with_headers(headers.iter().copied());
        let token = self.access_token();
        let request = self.sign(request, token.as_ref(), OAuthParameters::new())?;

        let response = self.execute_rest(&request)?;
        if response.is_paginated() {
            return Ok(ApiResponse::Paginated(Paginator::new(self, response)?));
        }
        Ok(ApiResponse::Data(response.to_value()?.clone()))
    }

    /// Uploads a new photo and returns its id (or the ticket id of an async upload).
    pub fn upload_photo(&self, photo: impl AsRef<Path>, params: &[(&str, &str)]) -> Result<String> {
        self.process_image("upload", photo.as_ref(), params)
    }

    /// Replaces the image of an existing photo.
    pub fn replace_photo(
        &self,
        photo: impl AsRef<Path>,
        photo_id: &str,
        async_: bool,
    ) -> Result<String> {
        let params = [("photo_id", photo_id), ("async", if async_ { "1" } else { "0" })];
        self.process_image("replace", photo.as_ref(), &params)
    }

    /// Signs `request` with the consumer credentials and `token`.
    pub(crate) fn sign(
        &self,
        request: Request,
        token: Option<&Token>,
        parameters: OAuthParameters<'_>,
    ) -> Result<Request> {
        let secrets = Secrets::new(
            self.config.consumer_key.as_str(),
            self.config.consumer_secret.as_str(),
        )
        .token_option(token);
        Ok(Signer::new(&secrets, parameters).sign(request)?)
    }

    /// Executes a REST call and checks the `stat` envelope.
    pub(crate) fn execute_rest(&self, request: &Request) -> Result<Response> {
        let response = self.transport.execute(request)?;
        if !response.is_json() {
            return Err(response.to_error());
        }
        let ok = response
            .to_value()?
            .get("stat")
            .and_then(Value::as_str)
            .map(|stat| stat.eq_ignore_ascii_case("ok"))
            .unwrap_or(false);
        if !ok {
            return Err(response.to_error());
        }
        Ok(response)
    }

    fn fetch_request_token(&self, callback: Option<&str>) -> Result<Option<Token>> {
        let callback = match callback {
            Some(callback) => callback.to_string(),
            None => self
                .current_url()
                .map(String::from)
                .unwrap_or_else(|| "oob".to_string()),
        };
        let url = self
            .config
            .create_url(Domain::OAuth, "request_token", NO_PARAMS)?;
        let request = self.sign(
            Request::new(Method::GET, url),
            None,
            OAuthParameters::new().callback(callback.as_str()),
        )?;

        let response = self.transport.execute(&request)?;
        if !response.is_query_string() {
            return Ok(None);
        }
        let answer = response.parse_oauth_token()?;
        let confirmed = answer
            .get("oauth_callback_confirmed")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        if !confirmed || answer.oauth_token.is_empty() {
            return Ok(None);
        }
        Ok(Some(Token::new(answer.oauth_token, answer.oauth_token_secret)))
    }

    fn fetch_access_token(&self, verifier: &str, token: &str) -> Result<Option<Token>> {
        let secret = self
            .session
            .request_token()
            .map(|t| t.secret)
            .unwrap_or_default();
        let request_token = Token::new(token, secret);
        let url = self
            .config
            .create_url(Domain::OAuth, "access_token", NO_PARAMS)?;
        let request = self.sign(
            Request::new(Method::GET, url),
            Some(&request_token),
            OAuthParameters::new().verifier(verifier),
        )?;

        let response = self.transport.execute(&request)?;
        if !response.is_query_string() {
            return Ok(None);
        }
        let answer = response.parse_oauth_token()?;
        if answer.oauth_token.is_empty() {
            return Ok(None);
        }
        Ok(Some(Token::new(answer.oauth_token, answer.oauth_token_secret)))
    }

    fn user_access_token(&self) -> Option<Token> {
        let verifier = self.context.param(OAUTH_VERIFIER_KEY);
        let token = self.context.param(OAUTH_TOKEN_KEY);
        if let (Some(verifier), Some(token)) = (verifier, token) {
            let consumed = self.session.consumed_verifier();
            if consumed.as_ref() != Some(&(verifier.clone(), token.clone())) {
                if !self.obtain_access_token(&verifier, &token) {
                    // the verifier was bogus, nothing derived from it can be trusted
                    self.session.clear_all();
                }
            }
        }
        self.session.access_token()
    }

    fn user_from_available_data(&self) -> Option<String> {
        let cached = self.session.user_id();
        let token = self.access_token()?;
        let same_token =
            self.session.get(SessionKey::AccessToken).as_deref() == Some(token.token.as_str());
        if cached.is_some() && same_token {
            return cached;
        }
        match self.user_from_access_token() {
            Some(user) => {
                self.session.set_user_id(user.as_str());
                Some(user)
            }
            None => {
                self.session.clear_all();
                None
            }
        }
    }

    fn user_from_access_token(&self) -> Option<String> {
        match self.get("flickr.test.login", NO_PARAMS) {
            Ok(ApiResponse::Data(value)) => value
                .pointer("/user/id")
                .and_then(Value::as_str)
                .map(str::to_string),
            Ok(ApiResponse::Paginated(_)) => None,
            Err(err) => {
                warn!(error = %err, "user behind the access token could not be resolved");
                None
            }
        }
    }

    fn process_image(&self, endpoint: &str, photo: &Path, params: &[(&str, &str)]) -> Result<String> {
        if !photo.is_file() {
            return Err(Error::InvalidArgument(format!(
                "file {} does not exist, provide a valid path to the photo",
                photo.display()
            )));
        }

        let url = self.config.create_url(Domain::Upload, endpoint, NO_PARAMS)?;
        let body = Body::Multipart {
            fields: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            files: vec![FilePart {
                name: "photo".to_string(),
                path: photo.to_path_buf(),
            }],
        };
        let token = self.access_token();
        let request = self.sign(
            Request::new(Method::POST, url).with_body(body),
            token.as_ref(),
            OAuthParameters::new(),
        )?;

        let response = self.transport.execute(&request)?;
        if !response.is_xml() {
            return Err(response.to_error());
        }
        let answer: UploadAnswer = response.deserialize_xml()?;
        if answer.stat.eq_ignore_ascii_case("ok") {
            if let Some(id) = answer.photoid.or(answer.ticketid) {
                return Ok(id.value.trim().to_string());
            }
        }
        match answer.err {
            Some(err) => Err(ApiError::new(ApiErrorKind::Provider, err.code, err.msg, request)
                .bind_response(&response)
                .into()),
            None => Err(response.to_error()),
        }
    }
}

impl<T: Transport> fmt::Debug for Client<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("consumer_key", &self.config.consumer_key)
            .field("permission", &self.config.permission)
            .field("session", &self.session)
            .finish()
    }
}

/// `oauth_problem` reported by the provider's OAuth endpoints, if any.
fn oauth_problem(err: &Error) -> Option<String> {
    match err {
        Error::Api(api) => api
            .response
            .as_ref()?
            .deserialize_form::<OAuthProblem>()
            .ok()?
            .oauth_problem,
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::testing::MockTransport;
    use crate::{MemorySession, OAUTH_CALLBACK_KEY, OAUTH_SIGNATURE_KEY};

    fn client(mock: &MockTransport) -> (Client<&MockTransport>, MemorySession) {
        let backend = MemorySession::new();
        let session = SessionStorage::new(Arc::new(backend.clone()));
        (
            Client::with_transport(Configuration::new("ck", "cs"), mock, session),
            backend,
        )
    }

    #[test]
    fn request_token_is_stored_when_confirmed() {
        let mock = MockTransport::new();
        mock.respond_text(
            200,
            "oauth_callback_confirmed=true&oauth_token=72157626737672178-022bbd2f4c2f3432&oauth_token_secret=fccb68c4e6103197",
        );
        let (client, _) = client(&mock);
        client.session().set_user_id("stale");

        assert!(client.obtain_request_token(Some("https://example.com/callback")));
        assert_eq!(
            client.session().request_token(),
            Some(Token::new("72157626737672178-022bbd2f4c2f3432", "fccb68c4e6103197"))
        );
        assert_eq!(client.session().user_id(), None);

        let sent = mock.last_request().unwrap();
        assert_eq!(sent.url().path(), "/services/oauth/request_token");
        assert_eq!(
            sent.query_param(OAUTH_CALLBACK_KEY).as_deref(),
            Some("https://example.com/callback")
        );
        assert!(sent.query_param(OAUTH_SIGNATURE_KEY).is_some());

        let authorize = client.authorize_url().unwrap().unwrap();
        assert_eq!(
            authorize.as_str(),
            "https://www.flickr.com/services/oauth/authorize?oauth_token=72157626737672178-022bbd2f4c2f3432&perms=read"
        );
    }

    #[test]
    fn request_token_without_secret_leaves_session_empty() {
        let mock = MockTransport::new();
        mock.respond_text(200, "oauth_callback_confirmed=true&oauth_token=abc");
        let (client, backend) = client(&mock);

        assert!(!client.obtain_request_token(None));
        assert!(backend.is_empty());
        assert_eq!(client.authorize_url().unwrap(), None);
    }

    #[test]
    fn unconfirmed_or_failed_request_token_is_soft() {
        let mock = MockTransport::new();
        mock.respond_text(200, "oauth_callback_confirmed=false&oauth_token=a&oauth_token_secret=b")
            .respond_text(401, "oauth_problem=signature_invalid");
        let (client, backend) = client(&mock);

        assert!(!client.obtain_request_token(None));
        assert!(!client.obtain_request_token(None));
        assert!(backend.is_empty());
        assert_eq!(mock.request_count(), 2);
    }

    #[test]
    fn callback_finishes_the_handshake_once() {
        let mock = MockTransport::new();
        mock.respond_text(
            200,
            "fullname=Jamal%20Fanaian&oauth_token=at&oauth_token_secret=ats&user_nsid=21207597%40N07&username=jamalfanaian",
        );
        let (client, _) = client(&mock);
        client.session().set_request_token(&Token::new("rt", "rts"));
        let client = client.with_context(
            CallbackParams::new()
                .with_param(OAUTH_TOKEN_KEY, "rt")
                .with_param(OAUTH_VERIFIER_KEY, "5d1b96a26b494074"),
        );

        assert_eq!(client.access_token(), Some(Token::new("at", "ats")));
        assert_eq!(client.session().access_token(), Some(Token::new("at", "ats")));
        assert_eq!(client.session().request_token(), None);
        assert_eq!(
            client.session().consumed_verifier(),
            Some(("5d1b96a26b494074".to_string(), "rt".to_string()))
        );

        let sent = mock.last_request().unwrap();
        assert_eq!(sent.url().path(), "/services/oauth/access_token");
        assert_eq!(sent.query_param(OAUTH_VERIFIER_KEY).as_deref(), Some("5d1b96a26b494074"));
        assert_eq!(sent.query_param(OAUTH_TOKEN_KEY).as_deref(), Some("rt"));

        // memoized: no second exchange
        assert_eq!(client.access_token(), Some(Token::new("at", "ats")));
        assert_eq!(mock.request_count(), 1);
    }

    #[test]
    fn consumed_verifier_is_not_replayed() {
        let mock = MockTransport::new();
        let (client, _) = client(&mock);
        client.session().set_access_token(&Token::new("at", "ats"));
        client.session().set_consumed_verifier("v", "rt");
        let client = client.with_context(
            CallbackParams::new()
                .with_param(OAUTH_TOKEN_KEY, "rt")
                .with_param(OAUTH_VERIFIER_KEY, "v"),
        );

        assert_eq!(client.access_token(), Some(Token::new("at", "ats")));
        assert_eq!(mock.request_count(), 0);
    }

    #[test]
    fn bogus_verifier_clears_the_session() {
        let mock = MockTransport::new();
        mock.respond_text(401, "oauth_problem=token_rejected");
        let (client, backend) = client(&mock);
        client.session().set_access_token(&Token::new("old", "olds"));
        let client = client.with_context(
            CallbackParams::new()
                .with_param(OAUTH_TOKEN_KEY, "rt")
                .with_param(OAUTH_VERIFIER_KEY, "bogus"),
        );

        assert_eq!(client.access_token(), None);
        assert!(backend.is_empty());
    }

    #[test]
    fn without_callback_params_the_persisted_token_is_used() {
        let mock = MockTransport::new();
        let (client, _) = client(&mock);
        assert_eq!(client.access_token(), None);

        client.session().set_access_token(&Token::new("at", "ats"));
        assert_eq!(client.access_token(), Some(Token::new("at", "ats")));
        assert_eq!(mock.request_count(), 0);
    }

    #[test]
    fn set_access_token_validates_the_payload() {
        let mock = MockTransport::new();
        let (client, _) = client(&mock);

        assert!(matches!(
            client.set_access_token("{not json"),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            client.set_access_token(r#"{"access_token":"a"}"#),
            Err(Error::InvalidArgument(_))
        ));
        client
            .set_access_token(r#"{"access_token":"a","access_token_secret":"b"}"#)
            .unwrap();
        assert_eq!(client.access_token(), Some(Token::new("a", "b")));
        assert_eq!(mock.request_count(), 0);
    }

    #[test]
    fn user_is_resolved_and_cached() {
        let mock = MockTransport::new();
        mock.respond_json(
            200,
            r#"{"user":{"id":"21207597@N07","username":{"_content":"jamalfanaian"}},"stat":"ok"}"#,
        );
        let (client, _) = client(&mock);
        client.session().set_access_token(&Token::new("at", "ats"));

        assert_eq!(client.user().as_deref(), Some("21207597@N07"));
        assert_eq!(client.session().user_id().as_deref(), Some("21207597@N07"));
        assert_eq!(client.user().as_deref(), Some("21207597@N07"));
        assert_eq!(mock.request_count(), 1);

        let sent = mock.last_request().unwrap();
        assert_eq!(sent.query_param("method").as_deref(), Some("flickr.test.login"));
        assert_eq!(sent.query_param(OAUTH_TOKEN_KEY).as_deref(), Some("at"));
    }

    #[test]
    fn cached_user_skips_the_lookup() {
        let mock = MockTransport::new();
        let (client, _) = client(&mock);
        client.session().set_access_token(&Token::new("at", "ats"));
        client.session().set_user_id("42@N01");

        assert_eq!(client.user().as_deref(), Some("42@N01"));
        assert_eq!(mock.request_count(), 0);
    }

    #[test]
    fn failed_user_lookup_clears_the_session() {
        let mock = MockTransport::new();
        mock.respond_json(200, r#"{"stat":"fail","code":98,"message":"Invalid auth token"}"#);
        let (client, backend) = client(&mock);
        client.session().set_access_token(&Token::new("at", "ats"));

        assert_eq!(client.user(), None);
        assert!(backend.is_empty());
    }

    #[test]
    fn destroy_session_forgets_everything() {
        let mock = MockTransport::new();
        let (client, backend) = client(&mock);
        client.set_token(Token::new("a", "b"));
        client.session().set_user_id("1@N01");

        client.destroy_session();
        assert!(backend.is_empty());
        assert_eq!(client.access_token(), None);
        assert_eq!(client.user(), None);
    }

    #[test]
    fn api_merges_the_rest_parameters() {
        let mock = MockTransport::new();
        mock.respond_json(200, r#"{"photo":{"id":"2733"},"stat":"ok"}"#);
        let (client, _) = client(&mock);
        client.set_token(Token::new("at", "ats"));

        let data = client
            .get("flickr.photos.getInfo", &[("photo_id", "2733"), ("format", "xml")])
            .unwrap()
            .into_data()
            .unwrap();
        assert_eq!(data["photo"]["id"], "2733");

        let sent = mock.last_request().unwrap();
        assert_eq!(sent.url().path(), "/services/rest");
        assert_eq!(sent.query_param("method").as_deref(), Some("flickr.photos.getInfo"));
        assert_eq!(sent.query_param("format").as_deref(), Some("json"));
        assert_eq!(sent.query_param("nojsoncallback").as_deref(), Some("1"));
        assert_eq!(sent.query_param("photo_id").as_deref(), Some("2733"));
        assert_eq!(sent.query_param(OAUTH_TOKEN_KEY).as_deref(), Some("at"));
        assert_eq!(
            sent.query_pairs().iter().filter(|(k, _)| k == "format").count(),
            1
        );
    }

    #[test]
    fn api_only_speaks_the_rest_methods() {
        let mock = MockTransport::new();
        mock.respond_json(200, r#"{"stat":"ok"}"#);
        let (client, _) = client(&mock);

        let err = client
            .api("flickr.test.echo", Method::TRACE, &[], NO_PARAMS, NO_PARAMS)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert_eq!(mock.request_count(), 0);

        let lowercase = Method::from_bytes(b"get").unwrap();
        client
            .api("flickr.test.echo", lowercase, &[], NO_PARAMS, NO_PARAMS)
            .unwrap();
        assert_eq!(mock.last_request().unwrap().method(), &Method::GET);
    }

    #[test]
    fn post_bodies_are_signed_form_fields() {
        let mock = MockTransport::new();
        mock.respond_json(200, r#"{"stat":"ok"}"#);
        let (client, _) = client(&mock);

        client
            .post("flickr.photos.setMeta", &[], &[("photo_id", "1"), ("title", "sunset")])
            .unwrap();
        let sent = mock.last_request().unwrap();
        assert_eq!(sent.method(), &Method::POST);
        assert_eq!(
            sent.body(),
            &Body::Form(vec![
                ("photo_id".to_string(), "1".to_string()),
                ("title".to_string(), "sunset".to_string())
            ])
        );
    }

    #[test]
    fn stat_fail_becomes_an_api_error() {
        let mock = MockTransport::new();
        mock.respond_json(200, r#"{"stat":"fail","code":1,"message":"Invalid API key"}"#);
        let (client, _) = client(&mock);

        match client.get("flickr.test.echo", &[]) {
            Err(Error::Api(err)) => {
                assert_eq!(err.kind, ApiErrorKind::Provider);
                assert_eq!(err.code, 1);
                assert_eq!(err.message, "Invalid API key");
                assert!(err.response.is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn non_json_answers_are_rejected() {
        let mock = MockTransport::new();
        mock.respond_xml(200, r#"<rsp stat="ok"/>"#);
        let (client, _) = client(&mock);

        let err = client.get("flickr.test.echo", &[]).unwrap_err();
        assert_eq!(err.api_code(), Some(200));
    }

    #[test]
    fn paginated_calls_yield_a_paginator() {
        let mock = MockTransport::new();
        mock.respond_json(
            200,
            r#"{"photos":{"page":1,"pages":1,"perpage":2,"total":1,"photo":[{"id":"1"}]},"stat":"ok"}"#,
        );
        let (client, _) = client(&mock);

        let response = client
            .get("flickr.people.getPhotos", &[("user_id", "me"), ("per_page", "2")])
            .unwrap();
        assert!(response.is_paginated());
        let items: Vec<Value> = response.into_paginator().unwrap().collect();
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn upload_of_missing_file_never_reaches_the_transport() {
        let mock = MockTransport::new();
        let (client, _) = client(&mock);

        assert!(matches!(
            client.upload_photo("/definitely/not/here.jpg", &[]),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            client.replace_photo("/definitely/not/here.jpg", "1", false),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(mock.request_count(), 0);
    }

    fn temp_photo(name: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("flickr-oauth1-{}-{name}", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(b"\xFF\xD8\xFF\xE0 not really a jpeg").unwrap();
        path
    }

    #[test]
    fn upload_returns_the_photo_id() {
        let photo = temp_photo("upload.jpg");
        let mock = MockTransport::new();
        mock.respond_xml(
            200,
            r#"<?xml version="1.0" encoding="utf-8" ?>
<rsp stat="ok">
<photoid>1234</photoid>
</rsp>"#,
        );
        let (client, _) = client(&mock);
        client.set_token(Token::new("at", "ats"));

        let id = client.upload_photo(&photo, &[("title", "sunset")]).unwrap();
        assert_eq!(id, "1234");

        let sent = mock.last_request().unwrap();
        assert_eq!(sent.url().as_str().split('?').next(), Some("https://up.flickr.com/services/upload"));
        match sent.body() {
            Body::Multipart { fields, files } => {
                assert_eq!(fields, &vec![("title".to_string(), "sunset".to_string())]);
                assert_eq!(files[0].name, "photo");
                assert_eq!(files[0].path, photo);
            }
            other => panic!("unexpected body {other:?}"),
        }
        let _ = std::fs::remove_file(photo);
    }

    #[test]
    fn replace_sends_photo_id_and_async_flag() {
        let photo = temp_photo("replace.jpg");
        let mock = MockTransport::new();
        mock.respond_xml(
            200,
            r#"<rsp stat="ok"><photoid secret="abcdef" originalsecret="abcdef">1234</photoid></rsp>"#,
        );
        let (client, _) = client(&mock);

        assert_eq!(client.replace_photo(&photo, "1234", true).unwrap(), "1234");
        let sent = mock.last_request().unwrap();
        assert_eq!(sent.url().path(), "/services/replace");
        assert_eq!(
            sent.body().signable_fields(),
            &[
                ("photo_id".to_string(), "1234".to_string()),
                ("async".to_string(), "1".to_string())
            ]
        );
        let _ = std::fs::remove_file(photo);
    }

    #[test]
    fn upload_failure_carries_the_provider_code() {
        let photo = temp_photo("fail.jpg");
        let mock = MockTransport::new();
        mock.respond_xml(
            200,
            r#"<rsp stat="fail"><err code="5" msg="Filetype was not recognised" /></rsp>"#,
        );
        let (client, _) = client(&mock);

        match client.upload_photo(&photo, &[]) {
            Err(Error::Api(err)) => {
                assert_eq!(err.kind, ApiErrorKind::Provider);
                assert_eq!(err.code, 5);
                assert_eq!(err.message, "Filetype was not recognised");
            }
            other => panic!("unexpected {other:?}"),
        }
        let _ = std::fs::remove_file(photo);
    }
}
