//! Canned-response [`Transport`] for exercising the client without a network.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::{Diagnostics, Request, Response, Result, Transport, TransportFailure};

enum Canned {
    Answer {
        status: u16,
        headers: Vec<(String, String)>,
        body: String,
    },
    Failure(TransportFailure),
}

/// Answers requests from a FIFO of canned responses and records what it was asked.
///
/// Like the real transport, a response that is not OK comes back as `Err`. Once the
/// queue is exhausted every further request fails with a synthetic network error.
#[derive(Default)]
pub struct MockTransport {
    queue: Mutex<VecDeque<Canned>>,
    requests: Mutex<Vec<Request>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(
        &self,
        status: u16,
        headers: Vec<(String, String)>,
        body: impl Into<String>,
    ) -> &Self {
        self.queue.lock().push_back(Canned::Answer {
            status,
            headers,
            body: body.into(),
        });
        self
    }

    pub fn respond_json(&self, status: u16, body: impl Into<String>) -> &Self {
        self.respond(status, content_type("application/json"), body)
    }

    pub fn respond_text(&self, status: u16, body: impl Into<String>) -> &Self {
        self.respond(status, content_type("text/plain;charset=UTF-8"), body)
    }

    pub fn respond_xml(&self, status: u16, body: impl Into<String>) -> &Self {
        self.respond(status, content_type("text/xml; charset=utf-8"), body)
    }

    /// Queues a request that never gets an answer.
    pub fn fail(&self, message: impl Into<String>, code: i64) -> &Self {
        self.queue.lock().push_back(Canned::Failure(TransportFailure {
            message: message.into(),
            code,
        }));
        self
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn last_request(&self) -> Option<Request> {
        self.requests.lock().last().cloned()
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }
}

impl Transport for MockTransport {
    fn execute(&self, request: &Request) -> Result<Response> {
        self.requests.lock().push(request.clone());
        let canned = self.queue.lock().pop_front();
        let response = match canned {
            Some(Canned::Answer {
                status,
                headers,
                body,
            }) => Response::new(
                request.clone(),
                body,
                status,
                headers,
                Diagnostics {
                    request_headers: request.headers().to_vec(),
                    ..Diagnostics::default()
                },
            ),
            Some(Canned::Failure(failure)) => {
                Response::failed(request.clone(), failure, Diagnostics::default())
            }
            None => Response::failed(
                request.clone(),
                TransportFailure {
                    message: "no canned response left".to_string(),
                    code: 7,
                },
                Diagnostics::default(),
            ),
        };
        if response.is_ok() {
            Ok(response)
        } else {
            Err(response.to_error())
        }
    }
}

fn content_type(value: &str) -> Vec<(String, String)> {
    vec![("Content-Type".to_string(), value.to_string())]
}

#[cfg(test)]
mod tests {
    use http::Method;
    use url::Url;

    use super::*;
    use crate::{Error, TransportError};

    #[test]
    fn answers_in_order_and_records() {
        let mock = MockTransport::new();
        mock.respond_json(200, r#"{"stat":"ok"}"#)
            .respond_json(500, r#"{"stat":"fail","code":105,"message":"Service currently unavailable"}"#);

        let req = Request::new(
            Method::GET,
            Url::parse("https://api.flickr.com/services/rest").unwrap(),
        );
        assert_eq!(mock.execute(&req).unwrap().status(), 200);
        assert_eq!(mock.execute(&req).unwrap_err().api_code(), Some(105));
        assert!(matches!(
            mock.execute(&req),
            Err(Error::Transport(TransportError::Network { code: 7, .. }))
        ));
        assert_eq!(mock.request_count(), 3);
        assert_eq!(mock.pending(), 0);
    }
}
