//! Integration tests for the remote store uploader
//!
//! These tests use wiremock to stand in for the remote key-value store.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use telesync::cache::SessionCache;
use telesync::client::{AuthToken, RemoteStoreClient};
use telesync::config::CredentialStore;
use telesync::db::models::{
    DayKey, Feature, FeatureSettings, LedgerEntry, LedgerValue, Location, Reading,
};
use telesync::sync::{PushError, RemoteUploader, Uploader};
use tempfile::TempDir;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Setup {
    _dir: TempDir,
    credentials: Arc<CredentialStore>,
    cache: Arc<SessionCache>,
    uploader: RemoteUploader,
}

/// Uploader pointing at `base_url`, optionally signed in as `u1`
fn setup(base_url: &str, token: Option<AuthToken>) -> Setup {
    let dir = TempDir::new().unwrap();
    let credentials = Arc::new(CredentialStore::with_dir("test", dir.path().to_path_buf()).unwrap());
    if let Some(token) = token {
        credentials.save_token(&token).unwrap();
    }
    let cache = Arc::new(SessionCache::new());
    let uploader = RemoteUploader::new(
        RemoteStoreClient::new(base_url).unwrap(),
        credentials.clone(),
        cache.clone(),
    );
    Setup {
        _dir: dir,
        credentials,
        cache,
        uploader,
    }
}

fn token() -> AuthToken {
    AuthToken::new("u1", "test-access-token").expiring_in(3600)
}

fn steps_entry(total: i64) -> LedgerEntry {
    LedgerEntry {
        feature: Feature::Steps,
        day_key: DayKey::parse("2024-06-01").unwrap(),
        value: LedgerValue::Counter { total },
        updated_at: Utc::now(),
    }
}

mod push_tests {
    use super::*;

    #[tokio::test]
    async fn test_push_puts_counter_at_day_path() {
        let mock_server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/users/u1/steps_data/2024-06-01"))
            .and(header("Authorization", "Bearer test-access-token"))
            .and(body_json(json!(5230)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!(5230)))
            .expect(1)
            .mount(&mock_server)
            .await;

        let s = setup(&mock_server.uri(), Some(token()));
        s.uploader.push(&steps_entry(5230)).await.unwrap();
        assert!(s.cache.token().is_some());
    }

    #[tokio::test]
    async fn test_push_location_body() {
        let mock_server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/users/u1/location_data/2024-06-01"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;

        let s = setup(&mock_server.uri(), Some(token()));
        let captured_at = Utc::now() - chrono::Duration::hours(2);
        let entry = LedgerEntry {
            feature: Feature::Location,
            day_key: DayKey::parse("2024-06-01").unwrap(),
            value: LedgerValue::Latest {
                location: Location {
                    latitude: 35.68,
                    longitude: 139.69,
                    accuracy: 20.0,
                },
                captured_at,
            },
            updated_at: Utc::now(),
        };
        s.uploader.push(&entry).await.unwrap();

        let requests = mock_server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["latitude"], 35.68);
        assert_eq!(body["longitude"], 139.69);
        assert_eq!(body["accuracy"], 20.0);
        assert_eq!(body["timestamp"], captured_at.timestamp_millis());
    }

    #[tokio::test]
    async fn test_push_is_idempotent() {
        let mock_server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/users/u1/steps_data/2024-06-01"))
            .respond_with(ResponseTemplate::new(200))
            .expect(2)
            .mount(&mock_server)
            .await;

        let s = setup(&mock_server.uri(), Some(token()));
        let entry = steps_entry(777);
        s.uploader.push(&entry).await.unwrap();
        s.uploader.push(&entry).await.unwrap();

        let requests = mock_server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].method, requests[1].method);
        assert_eq!(requests[0].url, requests[1].url);
        assert_eq!(requests[0].body, requests[1].body);
    }

    #[tokio::test]
    async fn test_not_signed_in_sends_nothing() {
        let mock_server = MockServer::start().await;
        let s = setup(&mock_server.uri(), None);

        let err = s.uploader.push(&steps_entry(1)).await.unwrap_err();
        assert_eq!(err, PushError::NotSignedIn);
        assert!(mock_server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_expired_token_is_auth_error_without_request() {
        let mock_server = MockServer::start().await;
        let expired = AuthToken::new("u1", "old").expiring_in(-60);
        let s = setup(&mock_server.uri(), Some(expired));

        let err = s.uploader.push(&steps_entry(1)).await.unwrap_err();
        assert!(matches!(err, PushError::Auth(_)));
        assert!(mock_server.received_requests().await.unwrap().is_empty());
        assert!(s.cache.token().is_none());
    }
}

mod error_mapping_tests {
    use super::*;

    async fn push_with_status(status: u16) -> (PushError, Setup) {
        let mock_server = MockServer::start().await;

        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(status).set_body_string("nope"))
            .mount(&mock_server)
            .await;

        let s = setup(&mock_server.uri(), Some(token()));
        let err = s.uploader.push(&steps_entry(10)).await.unwrap_err();
        (err, s)
    }

    #[tokio::test]
    async fn test_unauthorized_is_auth_and_clears_session() {
        let (err, s) = push_with_status(401).await;
        assert!(matches!(err, PushError::Auth(_)));
        assert!(!err.is_transient());
        assert!(s.cache.token().is_none());
        // Stored credentials stay until the user signs out
        assert!(s.credentials.has_credentials());
    }

    #[tokio::test]
    async fn test_forbidden_is_auth() {
        let (err, _) = push_with_status(403).await;
        assert!(matches!(err, PushError::Auth(_)));
    }

    #[tokio::test]
    async fn test_server_errors_are_transient() {
        for status in [500, 502, 503] {
            let (err, s) = push_with_status(status).await;
            assert!(err.is_transient(), "status {} should be transient", status);
            assert!(s.cache.token().is_some());
        }
    }

    #[tokio::test]
    async fn test_throttling_and_request_timeout_are_transient() {
        for status in [408, 429] {
            let (err, _) = push_with_status(status).await;
            assert!(matches!(err, PushError::Network(_)));
        }
    }

    #[tokio::test]
    async fn test_connection_refused_is_transient() {
        let s = setup("http://127.0.0.1:1", Some(token()));
        let err = s.uploader.push(&steps_entry(10)).await.unwrap_err();
        assert!(err.is_transient());
    }
}

mod settings_tests {
    use super::*;

    #[tokio::test]
    async fn test_push_and_fetch_settings() {
        let mock_server = MockServer::start().await;
        let settings = FeatureSettings {
            enabled: true,
            interval: 30,
        };

        Mock::given(method("PUT"))
            .and(path("/steps_settings/u1"))
            .and(body_json(json!({"enabled": true, "interval": 30})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path("/steps_settings/u1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"enabled": true, "interval": 30})),
            )
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path("/location_settings/u1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("null"))
            .mount(&mock_server)
            .await;

        let s = setup(&mock_server.uri(), Some(token()));
        s.uploader
            .push_settings(Feature::Steps, settings)
            .await
            .unwrap();

        assert_eq!(
            s.uploader.fetch_settings(Feature::Steps).await.unwrap(),
            Some(settings)
        );
        assert_eq!(
            s.uploader.fetch_settings(Feature::Location).await.unwrap(),
            None
        );
    }
}

mod cycle_tests {
    use super::*;
    use std::sync::Mutex;
    use telesync::storage::Storage;
    use telesync::sync::{
        AppLifecycle, CycleOutcome, FeatureWorker, Listener, ListenerSampler, RegistrationId,
        SampleSource, Trigger, WorkerConfig,
    };

    /// Delivers one step delta per registration
    struct DeltaSource {
        delta: i64,
        listeners: Mutex<Vec<Listener>>,
    }

    impl SampleSource for DeltaSource {
        fn feature(&self) -> Feature {
            Feature::Steps
        }

        fn register(&self, listener: Listener) -> telesync::Result<RegistrationId> {
            listener.deliver(Reading::StepDelta { delta: self.delta });
            let mut listeners = self.listeners.lock().unwrap();
            listeners.push(listener);
            Ok(listeners.len() as RegistrationId)
        }

        fn unregister(&self, _id: RegistrationId) {}
    }

    #[tokio::test]
    async fn test_failed_push_is_carried_by_next_cycle() {
        let mock_server = MockServer::start().await;

        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;

        let s = setup(&mock_server.uri(), Some(token()));
        let storage = Storage::open_in_memory().unwrap();
        let lifecycle = Arc::new(AppLifecycle::new(false));
        let worker = FeatureWorker::new(
            storage.clone(),
            Arc::new(ListenerSampler::new(Arc::new(DeltaSource {
                delta: 250,
                listeners: Mutex::new(Vec::new()),
            }))),
            Arc::new(s.uploader),
            lifecycle.clone(),
            lifecycle,
            WorkerConfig::default(),
        );

        let mut state = worker.state().unwrap();
        state.enabled = true;
        storage.save_feature_state(&state).unwrap();

        let first = worker.run_cycle(Trigger::Tick).await;
        assert!(matches!(first, CycleOutcome::Failed { .. }));
        assert!(worker.state().unwrap().pending);

        let second = worker.run_cycle(Trigger::Tick).await;
        assert!(matches!(second, CycleOutcome::Synced(_)));

        let requests = mock_server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 2);
        let last: serde_json::Value = serde_json::from_slice(&requests[1].body).unwrap();
        assert_eq!(last, json!(500));
    }
}
