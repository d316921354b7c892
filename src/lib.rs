/*!
flickr-oauth1: Flickr REST client over reqwest, with its own OAuth 1.0a signer.

# Overview

This library drives the three-legged OAuth 1.0a handshake against Flickr, signs
every REST call with HMAC-SHA1 and walks paged collections lazily. Session state
(request token, access token, connected user) lives in a host-provided
[`SessionStore`]; [`MemorySession`] covers tests and single-user tools.

# How to use

## Basic usecase 1 - connecting a user

```rust,no_run
use std::sync::Arc;

use flickr_oauth1::{
    CallbackParams, Client, Configuration, MemorySession, Permission, SessionStorage,
};

fn main() -> flickr_oauth1::Result<()> {
    let config = Configuration::new("[CONSUMER_KEY]", "[CONSUMER_SECRET]")
        .with_permission(Permission::Write);
    let session = SessionStorage::new(Arc::new(MemorySession::new()));

    // step 1: acquire a request token and send the user to the authorize page
    let client = Client::new(config.clone(), session.clone());
    if client.obtain_request_token(Some("https://example.com/flickr/callback")) {
        if let Some(url) = client.authorize_url()? {
            println!("please visit: {url}");
        }
    }

    // step 2: Flickr redirects back with oauth_token and oauth_verifier
    let callback = url::Url::parse(
        "https://example.com/flickr/callback?oauth_token=[TOKEN]&oauth_verifier=[VERIFIER]",
    )?;
    let client = Client::new(config, session).with_context(CallbackParams::from_url(callback));
    match client.user() {
        Some(user) => println!("connected as {user}"),
        None => println!("handshake failed"),
    }
    Ok(())
}
```

## Basic usecase 2 - calling the API

```rust,no_run
use std::sync::Arc;

use flickr_oauth1::{Client, Configuration, MemorySession, SessionStorage};

fn main() -> flickr_oauth1::Result<()> {
    let client = Client::new(
        Configuration::new("[CONSUMER_KEY]", "[CONSUMER_SECRET]"),
        SessionStorage::new(Arc::new(MemorySession::new())),
    );
    client.set_access_token(r#"{"access_token":"[TOKEN]","access_token_secret":"[SECRET]"}"#)?;

    // `per_page` turns the answer into a lazy paginator
    let photos = client.get("flickr.people.getPhotos", &[("user_id", "me"), ("per_page", "50")])?;
    if let Some(paginator) = photos.into_paginator() {
        for photo in paginator.limit_results(120) {
            println!("{} {}", photo["id"], photo["title"]);
        }
    }

    let id = client.upload_photo("sunset.jpg", &[("title", "Sunset")])?;
    println!("uploaded photo {id}");
    Ok(())
}
```
*/
mod client;
mod config;
mod error;
mod paginator;
mod profile;
mod request;
mod response;
mod secrets;
mod session;
mod signer;
mod token_reader;
mod transport;

#[cfg(any(test, feature = "test"))]
pub mod testing;

// exposed to external program
pub use client::{ApiResponse, CallbackParams, Client, RequestContext};
pub use config::{Configuration, Domain, Domains, Permission, TransportConfig};
pub use error::{
    ApiError, ApiErrorKind, Error, Result, SignError, SignResult, TokenReaderError,
    TokenReaderResult, TransportError,
};
pub use paginator::Paginator;
pub use profile::Profile;
pub use request::{Body, FilePart, Request, PAGE_KEY, PER_PAGE_KEY};
pub use response::{Diagnostics, Response, TransportFailure};
pub use secrets::{Secrets, SecretsProvider, Token};
pub use session::{MemorySession, SessionKey, SessionStorage, SessionStore};
pub use signer::{
    base_string, base_url, generate_nonce, hmac_sha1, normalize_parameters, percent_encode,
    OAuthParameters, Signer,
};
pub use token_reader::{TokenReader, TokenResponse};
pub use transport::{ReqwestTransport, Transport};

// exposed constant variables
/// Represents `oauth_callback`.
pub const OAUTH_CALLBACK_KEY: &str = "oauth_callback";
/// Represents `oauth_nonce`.
pub const OAUTH_NONCE_KEY: &str = "oauth_nonce";
/// Represents `oauth_timestamp`.
pub const OAUTH_TIMESTAMP_KEY: &str = "oauth_timestamp";
/// Represents `oauth_verifier`.
pub const OAUTH_VERIFIER_KEY: &str = "oauth_verifier";
/// Represents `oauth_version`.
pub const OAUTH_VERSION_KEY: &str = "oauth_version";
/// Represents `oauth_token`.
pub const OAUTH_TOKEN_KEY: &str = "oauth_token";
/// Represents `oauth_signature`.
pub const OAUTH_SIGNATURE_KEY: &str = "oauth_signature";

// crate-private constant variables
pub(crate) const OAUTH_KEY_PREFIX: &str = "oauth_";
pub(crate) const OAUTH_SIGNATURE_METHOD_KEY: &str = "oauth_signature_method";
pub(crate) const OAUTH_CONSUMER_KEY: &str = "oauth_consumer_key";
