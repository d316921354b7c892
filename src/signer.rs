use std::borrow::Cow;
use std::sync::atomic::{AtomicU64, Ordering};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use http::Method;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use rand::distr::Alphanumeric;
use rand::Rng;
use sha1::Sha1;
use time::OffsetDateTime;
use url::Url;

use crate::{
    Request, SecretsProvider, SignError, SignResult, OAUTH_CALLBACK_KEY, OAUTH_CONSUMER_KEY,
    OAUTH_NONCE_KEY, OAUTH_SIGNATURE_KEY, OAUTH_SIGNATURE_METHOD_KEY, OAUTH_TIMESTAMP_KEY,
    OAUTH_TOKEN_KEY, OAUTH_VERIFIER_KEY, OAUTH_VERSION_KEY,
};

pub const SIGNATURE_METHOD: &str = "HMAC-SHA1";
pub const OAUTH_VERSION: &str = "1.0";

/// RFC 3986 unreserved characters stay as they are, everything else is escaped.
const RFC3986: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

static NONCE_SEQUENCE: AtomicU64 = AtomicU64::new(0);

pub fn percent_encode(value: &str) -> String {
    utf8_percent_encode(value, RFC3986).to_string()
}

/// Encodes every pair, sorts by encoded key (stable for duplicate keys) and joins with `&`.
pub fn normalize_parameters(params: &[(String, String)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (percent_encode(k), percent_encode(v)))
        .collect();
    encoded.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));
    encoded
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Scheme, authority and path of `url`; query and fragment never take part in the base URL.
pub fn base_url(url: &Url) -> String {
    let mut base = url.clone();
    base.set_query(None);
    base.set_fragment(None);
    base.to_string()
}

pub fn base_string(method: &Method, url: &Url, params: &[(String, String)]) -> String {
    format!(
        "{}&{}&{}",
        method.as_str().to_ascii_uppercase(),
        percent_encode(&base_url(url)),
        percent_encode(&normalize_parameters(params))
    )
}

pub fn hmac_sha1(
    base_string: &str,
    consumer_secret: &str,
    token_secret: Option<&str>,
) -> SignResult<String> {
    let key = format!(
        "{}&{}",
        percent_encode(consumer_secret),
        percent_encode(token_secret.unwrap_or_default())
    );
    let mut mac = Hmac::<Sha1>::new_from_slice(key.as_bytes())
        .map_err(|e| SignError::InvalidKey(e.to_string()))?;
    mac.update(base_string.as_bytes());
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

/// Random alphanumeric value suffixed with a process-wide sequence number,
/// so two nonces from the same process can never collide.
pub fn generate_nonce() -> String {
    let sequence = NONCE_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let random: String = rand::rng()
        .sample_iter(Alphanumeric)
        .take(24)
        .map(char::from)
        .collect();
    format!("{}{:x}", random, sequence)
}

fn unix_timestamp() -> u64 {
    u64::try_from(OffsetDateTime::now_utc().unix_timestamp()).unwrap_or_default()
}

#[derive(Debug, Clone)]
pub struct Signer<'a, TSecretsProvider>
where
    TSecretsProvider: SecretsProvider,
{
    secrets: &'a TSecretsProvider,
    parameters: OAuthParameters<'a>,
}

impl<'a, TSecretsProvider> Signer<'a, TSecretsProvider>
where
    TSecretsProvider: SecretsProvider,
{
    pub fn new(secrets: &'a TSecretsProvider, parameters: OAuthParameters<'a>) -> Self {
        Signer {
            secrets,
            parameters,
        }
    }

    pub fn generate_signature(
        &self,
        method: &Method,
        url: &Url,
        params: &[(String, String)],
    ) -> SignResult<String> {
        let (_, consumer_secret) = self.secrets.get_consumer_key_pair();
        let (_, token_secret) = self.secrets.get_token_option_pair();
        hmac_sha1(&base_string(method, url, params), consumer_secret, token_secret)
    }

    /// Attaches the `oauth_*` parameters and the signature to the query of `request`.
    ///
    /// Stale values of those parameters (left over from an earlier signing of the same
    /// request) are dropped first, so re-signing a copied request yields exactly one
    /// fresh nonce, timestamp and signature.
    pub fn sign(self, mut request: Request) -> SignResult<Request> {
        let oauth = self.oauth_parameters();

        let mut url = request.url().clone();
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| k != OAUTH_SIGNATURE_KEY && !oauth.iter().any(|(o, _)| o == k))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        url.query_pairs_mut()
            .clear()
            .extend_pairs(kept)
            .extend_pairs(oauth.iter().map(|(k, v)| (*k, v.as_str())));
        request.set_url(url);

        let signature = self.generate_signature(
            request.method(),
            request.url(),
            &request.signable_parameters(),
        )?;

        let mut url = request.url().clone();
        url.query_pairs_mut()
            .append_pair(OAUTH_SIGNATURE_KEY, &signature);
        request.set_url(url);

        Ok(request)
    }

    fn oauth_parameters(&self) -> Vec<(&'static str, String)> {
        let (consumer_key, _) = self.secrets.get_consumer_key_pair();
        let (token, _) = self.secrets.get_token_option_pair();
        let nonce = self
            .parameters
            .nonce
            .as_ref()
            .map(|n| n.to_string())
            .unwrap_or_else(generate_nonce);
        let timestamp = self.parameters.timestamp.unwrap_or_else(unix_timestamp);

        let mut params = vec![
            (OAUTH_CONSUMER_KEY, consumer_key.to_string()),
            (OAUTH_NONCE_KEY, nonce),
            (OAUTH_SIGNATURE_METHOD_KEY, SIGNATURE_METHOD.to_string()),
            (OAUTH_TIMESTAMP_KEY, timestamp.to_string()),
        ];
        if let Some(token) = token {
            params.push((OAUTH_TOKEN_KEY, token.to_string()));
        }
        if self.parameters.version {
            params.push((OAUTH_VERSION_KEY, OAUTH_VERSION.to_string()));
        }
        if let Some(ref callback) = self.parameters.callback {
            params.push((OAUTH_CALLBACK_KEY, callback.to_string()));
        }
        if let Some(ref verifier) = self.parameters.verifier {
            params.push((OAUTH_VERIFIER_KEY, verifier.to_string()));
        }
        params
    }
}

#[derive(Debug, Clone)]
pub struct OAuthParameters<'a> {
    callback: Option<Cow<'a, str>>,
    nonce: Option<Cow<'a, str>>,
    timestamp: Option<u64>,
    verifier: Option<Cow<'a, str>>,
    version: bool,
}

impl Default for OAuthParameters<'static> {
    fn default() -> Self {
        OAuthParameters {
            callback: None,
            nonce: None,
            timestamp: None,
            verifier: None,
            version: true,
        }
    }
}

impl<'a> OAuthParameters<'a> {
    pub fn new() -> Self {
        OAuthParameters {
            callback: None,
            nonce: None,
            timestamp: None,
            verifier: None,
            version: true,
        }
    }

    pub fn callback<T>(self, callback: T) -> Self
    where
        T: Into<Cow<'a, str>>,
    {
        OAuthParameters {
            callback: Some(callback.into()),
            ..self
        }
    }

    /// set the oauth_nonce value; a fresh one is generated per request otherwise
    pub fn nonce<T>(self, nonce: T) -> Self
    where
        T: Into<Cow<'a, str>>,
    {
        OAuthParameters {
            nonce: Some(nonce.into()),
            ..self
        }
    }

    /// set the oauth_timestamp value; the current time is used otherwise
    pub fn timestamp<T>(self, timestamp: T) -> Self
    where
        T: Into<u64>,
    {
        OAuthParameters {
            timestamp: Some(timestamp.into()),
            ..self
        }
    }

    pub fn verifier<T>(self, verifier: T) -> Self
    where
        T: Into<Cow<'a, str>>,
    {
        OAuthParameters {
            verifier: Some(verifier.into()),
            ..self
        }
    }

    /// `false` leaves `oauth_version=1.0` out of the signed parameters.
    pub fn version<T>(self, version: T) -> Self
    where
        T: Into<bool>,
    {
        OAuthParameters {
            version: version.into(),
            ..self
        }
    }
}
