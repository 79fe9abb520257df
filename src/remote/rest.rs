//! Thin REST helper every remote-coordinator exchange goes through (design
//! §4.5, §6).
//!
//! Builds a `reqwest::blocking::Client` once, attaches the project's auth
//! header on every call, and folds transport/status failures into the
//! crate's own status vocabulary instead of leaking `reqwest::Error` past
//! this module.

use std::time::{Duration, Instant};

use log::{info, warn};
use reqwest::blocking::Client;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{ReceiveStage, RemoteServerStatus};
use crate::persistence::HubIdentity;
use crate::protocol::base64_variant;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct RestClient {
    client: Client,
    base_url: String,
}

impl RestClient {
    pub fn new(base_url: String) -> Result<Self, RemoteServerStatus> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build().map_err(|_| RemoteServerStatus::LocalResource)?;
        Ok(RestClient { client, base_url })
    }

    /// The raw transport, for callers that stream a response body directly
    /// (firmware downloads) instead of going through [`Self::exchange`].
    pub fn inner_client(&self) -> &Client {
        &self.client
    }

    fn build(&self, method: Method, path: &str, identity: Option<&HubIdentity>) -> reqwest::blocking::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let mut builder = self.client.request(method, url);
        if let Some(identity) = identity {
            let credentials = base64_variant::encode_basic_auth(&identity.hub_id, &identity.hub_key);
            builder = builder.header("Authorization", format!("Basic {credentials}"));
        }
        builder
    }

    pub fn get_json<T: DeserializeOwned>(&self, path: &str, identity: Option<&HubIdentity>) -> Result<T, RemoteServerStatus> {
        self.exchange(Method::GET, path, identity, None::<&()>).1
    }

    pub fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        identity: Option<&HubIdentity>,
        body: &B,
    ) -> Result<T, RemoteServerStatus> {
        self.exchange(Method::POST, path, identity, Some(body)).1
    }

    pub fn put_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        identity: Option<&HubIdentity>,
        body: &B,
    ) -> Result<T, RemoteServerStatus> {
        self.exchange(Method::PUT, path, identity, Some(body)).1
    }

    /// Same as [`Self::put_json`], but also reports the raw HTTP status
    /// code so the remote-action flow can distinguish a 401 (which
    /// invalidates registration, design §7) from any other failure.
    pub fn put_json_with_status<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        identity: Option<&HubIdentity>,
        body: &B,
    ) -> (Option<u16>, Result<T, RemoteServerStatus>) {
        self.exchange(Method::PUT, path, identity, Some(body))
    }

    /// Same as [`Self::get_json`], with the raw status code alongside.
    pub fn get_json_with_status<T: DeserializeOwned>(
        &self,
        path: &str,
        identity: Option<&HubIdentity>,
    ) -> (Option<u16>, Result<T, RemoteServerStatus>) {
        self.exchange(Method::GET, path, identity, None::<&()>)
    }

    pub fn delete(&self, path: &str, identity: Option<&HubIdentity>) -> Result<(), RemoteServerStatus> {
        let started = Instant::now();
        let result = self.build(Method::DELETE, path, identity).send();
        self.log_outcome("DELETE", path, started, &result);
        let response = result.map_err(map_transport_error)?;
        status_to_result(response.status().as_u16())
    }

    fn exchange<B: Serialize, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        identity: Option<&HubIdentity>,
        body: Option<&B>,
    ) -> (Option<u16>, Result<T, RemoteServerStatus>) {
        let started = Instant::now();
        let mut builder = self.build(method.clone(), path, identity);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        let result = builder.send();
        self.log_outcome(method.as_str(), path, started, &result);
        let response = match result.map_err(map_transport_error) {
            Ok(response) => response,
            Err(status) => return (None, Err(status)),
        };

        let code = response.status().as_u16();
        if let Err(status) = status_to_result(code) {
            return (Some(code), Err(status));
        }
        let parsed = response.json::<T>().map_err(|_| RemoteServerStatus::CannotReceive(ReceiveStage::Body));
        (Some(code), parsed)
    }

    fn log_outcome(&self, method: &str, path: &str, started: Instant, result: &Result<reqwest::blocking::Response, reqwest::Error>) {
        let elapsed = started.elapsed();
        match result {
            Ok(response) => {
                info!("{method} {path} -> {} in {:?}", response.status(), elapsed);
            }
            Err(e) => {
                warn!("{method} {path} failed after {:?}: {e}", elapsed);
            }
        }
    }
}

fn map_transport_error(e: reqwest::Error) -> RemoteServerStatus {
    if e.is_timeout() {
        RemoteServerStatus::NoResponse
    } else if e.is_connect() {
        if e.to_string().to_lowercase().contains("tls") || e.to_string().to_lowercase().contains("certificate") {
            RemoteServerStatus::CannotConnectTls
        } else {
            RemoteServerStatus::CannotConnect
        }
    } else {
        RemoteServerStatus::CannotSend
    }
}

fn status_to_result(code: u16) -> Result<(), RemoteServerStatus> {
    if (200..300).contains(&code) {
        Ok(())
    } else if code == 401 {
        Err(RemoteServerStatus::CannotParseResponse)
    } else {
        Err(RemoteServerStatus::CannotReceive(ReceiveStage::Headers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_status_codes_map_to_ok() {
        assert!(status_to_result(200).is_ok());
        assert!(status_to_result(204).is_ok());
    }

    #[test]
    fn error_status_codes_map_to_a_failure_status() {
        assert!(status_to_result(500).is_err());
        assert!(status_to_result(401).is_err());
    }
}
