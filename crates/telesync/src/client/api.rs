//! Remote key-value store client
//!
//! The store exposes a tree of JSON values addressed by path:
//! - `users/{uid}/{feature_data}/{day_key}` holds one ledger value
//! - `{feature}_settings/{uid}` holds `{enabled, interval}`
//!
//! Writes are plain `PUT`s, so writing the same value twice leaves the store
//! in the same state as writing it once.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, USER_AGENT};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::client::tokens::AuthToken;
use crate::db::models::{DayKey, Feature};
use crate::error::{Result, SyncError};

/// User agent for remote store requests
const API_USER_AGENT: &str = concat!("telesync/", env!("CARGO_PKG_VERSION"));

/// Request timeout; bounds a push since the uploader never cancels one itself
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Remote store client
#[derive(Clone)]
pub struct RemoteStoreClient {
    client: Client,
    base_url: String,
}

impl RemoteStoreClient {
    /// Create a new client for the given base URL
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(SyncError::Http)?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Path of a day's value for a feature
    pub fn entry_path(uid: &str, feature: Feature, day: DayKey) -> String {
        format!("/users/{}/{}/{}", uid, feature.data_node(), day)
    }

    /// Path of a feature's settings
    pub fn settings_path(feature: Feature, uid: &str) -> String {
        format!("/{}/{}", feature.settings_node(), uid)
    }

    /// Build the full URL for a given path
    fn build_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Build headers with authorization
    fn build_headers(&self, token: &AuthToken) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(API_USER_AGENT));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&token.authorization_header())
                .map_err(|_| SyncError::auth("Token contains invalid header characters"))?,
        );
        Ok(headers)
    }

    /// Write a JSON value at `path`, replacing whatever was there
    pub async fn put_json<T: Serialize + ?Sized>(
        &self,
        token: &AuthToken,
        path: &str,
        body: &T,
    ) -> Result<()> {
        let url = self.build_url(path);
        let headers = self.build_headers(token)?;

        let response = self
            .client
            .put(&url)
            .headers(headers)
            .json(body)
            .send()
            .await
            .map_err(SyncError::Http)?;

        self.handle_response_status(response).await?;
        Ok(())
    }

    /// Read the JSON value at `path`
    pub async fn get_json<T: DeserializeOwned>(&self, token: &AuthToken, path: &str) -> Result<T> {
        let url = self.build_url(path);
        let headers = self.build_headers(token)?;

        let response = self
            .client
            .get(&url)
            .headers(headers)
            .send()
            .await
            .map_err(SyncError::Http)?;

        let response = self.handle_response_status(response).await?;
        response.json().await.map_err(|e| {
            SyncError::invalid_response(format!("Failed to parse JSON response: {}", e))
        })
    }

    /// Handle response status codes and convert to errors
    async fn handle_response_status(&self, response: Response) -> Result<Response> {
        let status = response.status();

        match status {
            StatusCode::OK | StatusCode::CREATED | StatusCode::ACCEPTED | StatusCode::NO_CONTENT => {
                Ok(response)
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(SyncError::auth(format!(
                "Remote store rejected credentials ({})",
                status
            ))),
            _ => {
                let body = response.text().await.unwrap_or_default();
                Err(SyncError::Remote {
                    status: status.as_u16(),
                    message: body,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_url() {
        let client = RemoteStoreClient::new("https://store.example.com/").unwrap();
        assert_eq!(
            client.build_url("/users/u1/steps_data/2024-06-01"),
            "https://store.example.com/users/u1/steps_data/2024-06-01"
        );
    }

    #[test]
    fn test_paths() {
        let day = DayKey::parse("2024-06-01").unwrap();
        assert_eq!(
            RemoteStoreClient::entry_path("u1", Feature::Location, day),
            "/users/u1/location_data/2024-06-01"
        );
        assert_eq!(
            RemoteStoreClient::settings_path(Feature::Steps, "u1"),
            "/steps_settings/u1"
        );
    }

    #[test]
    fn test_headers_reject_bad_token() {
        let client = RemoteStoreClient::new("https://store.example.com").unwrap();
        let token = AuthToken::new("u1", "bad\ntoken");
        assert!(matches!(
            client.build_headers(&token),
            Err(SyncError::Authentication(_))
        ));
    }
}
