//! Blocking HTTP client the CLI uses to talk to the daemon.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;

use crate::config::Config;
use crate::error::{IndexError, Result};
use crate::server::protocol::{CommonResponse, ServerStatus};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

pub struct Client {
    http: reqwest::blocking::Client,
    base_url: String,
}

impl Client {
    pub fn new(config: &Config) -> Result<Self> {
        Self::with_base_url(config.base_url())
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Client {
            http,
            base_url: base_url.into(),
        })
    }

    /// POST `body` to `route` and return the envelope as sent.
    pub fn call<B: Serialize + ?Sized>(&self, route: &str, body: &B) -> Result<CommonResponse> {
        let url = format!("{}{}", self.base_url, route);
        let response = self.http.post(&url).json(body).send()?;
        let status = response.status();
        let envelope: CommonResponse = response
            .json()
            .map_err(|e| IndexError::Http(format!("{} from {}: {}", status, url, e)))?;
        Ok(envelope)
    }

    /// Like [`Client::call`], failing on a non-zero code.
    pub fn call_ok<B: Serialize + ?Sized>(&self, route: &str, body: &B) -> Result<CommonResponse> {
        let envelope = self.call(route, body)?;
        if !envelope.is_ok() {
            return Err(IndexError::Remote(envelope.message));
        }
        Ok(envelope)
    }

    /// The `data` of a successful call, decoded as `T`.
    pub fn call_data<B: Serialize + ?Sized, T: DeserializeOwned>(&self, route: &str, body: &B) -> Result<T> {
        let envelope = self.call_ok(route, body)?;
        let data = envelope
            .data
            .ok_or_else(|| IndexError::Http(format!("{} returned no data", route)))?;
        serde_json::from_value(data).map_err(|e| IndexError::Http(format!("bad reply from {}: {}", route, e)))
    }

    /// `None` when nothing is listening.
    pub fn status(&self) -> Result<Option<ServerStatus>> {
        match self.call_data("/server/status", &json!({})) {
            Ok(status) => Ok(Some(status)),
            Err(IndexError::NotRunning) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
