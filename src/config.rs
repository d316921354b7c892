use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::Result;

const OAUTH_DOMAIN: &str = "https://www.flickr.com/services/oauth/";
const API_DOMAIN: &str = "https://api.flickr.com/services/";
const UPLOAD_DOMAIN: &str = "https://up.flickr.com/services/";

/// Access level requested from the user during authorization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    #[default]
    Read,
    Write,
    Delete,
}

impl Permission {
    pub const fn as_str(self) -> &'static str {
        match self {
            Permission::Read => "read",
            Permission::Write => "write",
            Permission::Delete => "delete",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    OAuth,
    Api,
    Upload,
}

/// Base URLs of the three provider hosts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domains {
    pub oauth: String,
    pub api: String,
    pub upload: String,
}

impl Default for Domains {
    fn default() -> Self {
        Domains {
            oauth: OAUTH_DOMAIN.to_string(),
            api: API_DOMAIN.to_string(),
            upload: UPLOAD_DOMAIN.to_string(),
        }
    }
}

/// Application credentials and endpoint layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    pub consumer_key: String,
    pub consumer_secret: String,
    #[serde(default)]
    pub permission: Permission,
    #[serde(default)]
    pub domains: Domains,
}

impl Configuration {
    pub fn new<TKey, TSecret>(consumer_key: TKey, consumer_secret: TSecret) -> Self
    where
        TKey: Into<String>,
        TSecret: Into<String>,
    {
        Configuration {
            consumer_key: consumer_key.into(),
            consumer_secret: consumer_secret.into(),
            permission: Permission::default(),
            domains: Domains::default(),
        }
    }

    pub fn with_permission(self, permission: Permission) -> Self {
        Configuration { permission, ..self }
    }

    pub fn with_domains(self, domains: Domains) -> Self {
        Configuration { domains, ..self }
    }

    /// Base URL of `domain`, always ending in `/` so relative paths append to it.
    pub fn base_url(&self, domain: Domain) -> Result<Url> {
        let raw = match domain {
            Domain::OAuth => &self.domains.oauth,
            Domain::Api => &self.domains.api,
            Domain::Upload => &self.domains.upload,
        };
        let mut url = Url::parse(raw.trim())?;
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Ok(url)
    }

    /// Builds the URL for `path` on `domain` with `params` appended to the query.
    ///
    /// A `path` that already is an absolute http(s) URL is used as-is.
    pub fn create_url<K, V>(&self, domain: Domain, path: &str, params: &[(K, V)]) -> Result<Url>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let path = path.trim();
        let mut url = if path.starts_with("http://") || path.starts_with("https://") {
            Url::parse(path)?
        } else {
            self.base_url(domain)?.join(path.trim_start_matches('/'))?
        };
        if !params.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(params.iter().map(|(k, v)| (k.as_ref(), v.as_ref())));
        }
        Ok(url)
    }
}

/// Tuning of the HTTP transport, built once and handed to it at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub connect_timeout: Duration,
    pub timeout: Duration,
    pub user_agent: String,
    /// Sent with every request unless the request sets the same header.
    pub default_headers: Vec<(String, String)>,
    /// Answer byte-identical requests from an in-process memo.
    pub memoize: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            connect_timeout: Duration::from_secs(10),
            timeout: Duration::from_secs(20),
            user_agent: concat!("flickr-oauth1-rs/", env!("CARGO_PKG_VERSION")).to_string(),
            default_headers: vec![("Accept".to_string(), "application/json".to_string())],
            memoize: true,
        }
    }
}
