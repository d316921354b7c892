use std::collections::HashMap;

use percent_encoding::percent_decode_str;
use serde::Deserialize;

use crate::{Response, Result, TokenReaderError, TokenReaderResult};

const OAUTH_TOKEN_KEY: &str = "oauth_token";

const OAUTH_TOKEN_SECRET_KEY: &str = "oauth_token_secret";

/// Token pair answered by the request-token and access-token endpoints.
#[derive(Deserialize, Debug, Clone)]
pub struct TokenResponse {
    pub oauth_token: String,
    pub oauth_token_secret: String,
    /// Other contents (`oauth_callback_confirmed`, `user_nsid`, `username`, ...)
    #[serde(flatten)]
    pub remain: HashMap<String, String>,
}

impl TokenResponse {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.remain.get(key).map(String::as_str)
    }
}

/// Reads an OAuth token pair out of a [`Response`]. Sealed.
pub trait TokenReader: private::Sealed {
    fn parse_oauth_token(self) -> Result<TokenResponse>;
}

impl TokenReader for Response {
    fn parse_oauth_token(self) -> Result<TokenResponse> {
        (&self).parse_oauth_token()
    }
}

impl TokenReader for &Response {
    fn parse_oauth_token(self) -> Result<TokenResponse> {
        if !self.is_ok() {
            return Err(self.to_error());
        }
        Ok(read_oauth_token(self.content())?)
    }
}

/// Splits a form-encoded body into decoded pairs, keeping empty keys and values.
pub fn parse_form(text: &str) -> Vec<(String, String)> {
    text.trim()
        .split('&')
        .filter(|e| !e.is_empty())
        .map(|e| {
            let mut iter = e.splitn(2, '=');
            (
                decode(iter.next().unwrap_or_default()),
                decode(iter.next().unwrap_or_default()),
            )
        })
        .collect()
}

fn decode(raw: &str) -> String {
    percent_decode_str(&raw.replace('+', " "))
        .decode_utf8_lossy()
        .into_owned()
}

fn read_oauth_token(body: &str) -> TokenReaderResult<TokenResponse> {
    let mut fields: HashMap<String, String> = parse_form(body).into_iter().collect();
    let mut take = |key: &'static str| {
        fields
            .remove(key)
            .ok_or_else(|| TokenReaderError::TokenKeyNotFound(key, body.to_string()))
    };
    let oauth_token = take(OAUTH_TOKEN_KEY)?;
    let oauth_token_secret = take(OAUTH_TOKEN_SECRET_KEY)?;
    Ok(TokenResponse {
        oauth_token,
        oauth_token_secret,
        remain: fields,
    })
}

mod private {
    use crate::Response;

    pub trait Sealed {}
    impl Sealed for Response {}
    impl Sealed for &Response {}
}
