use std::cell::OnceCell;

use serde_json::{Map, Value};
use tracing::warn;

use crate::{ApiResponse, Client, Error, Result, Transport};

/// A Flickr member, looked up by username or the connected user.
pub struct Profile<'c, T: Transport> {
    client: &'c Client<T>,
    username: Option<String>,
    details: OnceCell<Value>,
}

impl<'c, T: Transport> Profile<'c, T> {
    /// `username` is the screen name to look up; `None` means the connected user.
    pub fn new(client: &'c Client<T>, username: Option<&str>) -> Result<Self> {
        if let Some(name) = username {
            if is_numeric(name) {
                return Err(Error::InvalidArgument(format!(
                    "profile {name:?} looks like a numeric id, pass a username or None for the connected user"
                )));
            }
        }
        Ok(Profile {
            client,
            username: username.map(str::to_string),
            details: OnceCell::new(),
        })
    }

    pub fn id(&self) -> Option<String> {
        match &self.username {
            Some(name) => Some(name.clone()),
            None => self.client.user(),
        }
    }

    /// The `person` record of `flickr.people.getInfo`, fetched on first use.
    ///
    /// `None` while the lookup fails; an empty object when nobody is connected.
    pub fn details(&self) -> Option<&Value> {
        if let Some(details) = self.details.get() {
            return Some(details);
        }
        let details = match self.fetch_details() {
            Ok(details) => details,
            Err(err) => {
                warn!(profile = ?self.username, error = %err, "profile details could not be loaded");
                return None;
            }
        };
        Some(self.details.get_or_init(|| details))
    }

    pub fn detail(&self, key: &str) -> Option<&Value> {
        self.details()?.get(key)
    }

    fn fetch_details(&self) -> Result<Value> {
        let user_id = match &self.username {
            Some(name) => {
                let found = self
                    .client
                    .get("flickr.people.findByUsername", &[("username", name.as_str())])?;
                match data(found)?.pointer("/user/id").and_then(Value::as_str) {
                    Some(id) => id.to_string(),
                    None => return Ok(Value::Object(Map::new())),
                }
            }
            None => match self.client.user() {
                Some(user) => user,
                None => return Ok(Value::Object(Map::new())),
            },
        };

        let info = self
            .client
            .get("flickr.people.getInfo", &[("user_id", user_id.as_str())])?;
        Ok(data(info)?
            .get("person")
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new())))
    }
}

fn data<T: Transport>(response: ApiResponse<'_, T>) -> Result<Value> {
    response
        .into_data()
        .ok_or_else(|| Error::InvalidArgument("unexpected paginated answer".to_string()))
}

fn is_numeric(value: &str) -> bool {
    let value = value.trim();
    value.parse::<f64>().is_ok() && value.chars().any(|c| c.is_ascii_digit())
}
