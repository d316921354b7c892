use std::borrow::Cow;

use serde::{Deserialize, Serialize};

pub trait SecretsProvider {
    fn get_consumer_key_pair<'a>(&'a self) -> (&'a str, &'a str);

    fn get_token_pair_option<'a>(&'a self) -> Option<(&'a str, &'a str)>;

    fn get_token_option_pair<'a>(&'a self) -> (Option<&'a str>, Option<&'a str>) {
        self.get_token_pair_option()
            .map(|s| (Some(s.0), Some(s.1)))
            .unwrap_or_else(|| (None, None))
    }
}

/// OAuth token pair: either a short-lived request token or a long-lived access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub token: String,
    pub secret: String,
}

impl Token {
    pub fn new<TKey, TSecret>(token: TKey, secret: TSecret) -> Self
    where
        TKey: Into<String>,
        TSecret: Into<String>,
    {
        Token {
            token: token.into(),
            secret: secret.into(),
        }
    }
}

/// Consumer credentials with an optional token pair attached.
#[derive(Debug, Clone)]
pub struct Secrets<'a> {
    consumer_key: Cow<'a, str>,
    consumer_secret: Cow<'a, str>,
    token: Option<(Cow<'a, str>, Cow<'a, str>)>,
}

impl<'a> Secrets<'a> {
    pub fn new<TKey, TSecret>(consumer_key: TKey, consumer_secret: TSecret) -> Self
    where
        TKey: Into<Cow<'a, str>>,
        TSecret: Into<Cow<'a, str>>,
    {
        Secrets {
            consumer_key: consumer_key.into(),
            consumer_secret: consumer_secret.into(),
            token: None,
        }
    }

    pub fn token<TKey, TSecret>(self, token: TKey, token_secret: TSecret) -> Secrets<'a>
    where
        TKey: Into<Cow<'a, str>>,
        TSecret: Into<Cow<'a, str>>,
    {
        Secrets {
            token: Some((token.into(), token_secret.into())),
            ..self
        }
    }

    /// Attaches `token` when present, otherwise leaves the secrets consumer-only.
    pub fn token_option(self, token: Option<&'a Token>) -> Secrets<'a> {
        match token {
            Some(t) => self.token(t.token.as_str(), t.secret.as_str()),
            None => self,
        }
    }
}

impl SecretsProvider for Secrets<'_> {
    fn get_consumer_key_pair<'a>(&'a self) -> (&'a str, &'a str) {
        (&self.consumer_key, &self.consumer_secret)
    }

    fn get_token_pair_option<'a>(&'a self) -> Option<(&'a str, &'a str)> {
        self.token.as_ref().map(|(t, s)| (t.as_ref(), s.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static CONSUMER_KEY: &str = "<CONSUMER_KEY>";
    static CONSUMER_SECRET: &str = "<CONSUMER_SECRET>";
    static TOKEN: &str = "<ACCESS_TOKEN>";
    static TOKEN_SECRET: &str = "<TOKEN_SECRET>";

    #[test]
    fn consumer_only_has_no_token() {
        let secrets = Secrets::new(CONSUMER_KEY, CONSUMER_SECRET);
        assert_eq!(
            secrets.get_consumer_key_pair(),
            (CONSUMER_KEY, CONSUMER_SECRET)
        );
        assert_eq!(secrets.get_token_option_pair(), (None, None));
    }

    #[test]
    fn token_is_attached() {
        let secrets = Secrets::new(CONSUMER_KEY, CONSUMER_SECRET).token(TOKEN, TOKEN_SECRET);
        assert_eq!(secrets.get_token_pair_option(), Some((TOKEN, TOKEN_SECRET)));

        let stored = Token::new("t", "s");
        let secrets = Secrets::new(CONSUMER_KEY, CONSUMER_SECRET).token_option(Some(&stored));
        assert_eq!(secrets.get_token_option_pair(), (Some("t"), Some("s")));
    }
}
