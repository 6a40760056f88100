//! Test helpers: build a hermetic app (memory ledger + memory storage) and a
//! TestServer over the real router.

use axum_test::TestServer;
use courier_api::auth;
use courier_api::setup::routes;
use courier_api::state::AppState;
use courier_core::{BaseConfig, Config, LedgerBackend, StorageBackend, TransferConfig};
use courier_ledger::MemoryLedger;
use courier_storage::MemoryStorage;
use std::sync::Arc;
use uuid::Uuid;

pub const TEST_SECRET: &str = "integration-test-secret-0123456789abcdef";

/// Base URL configured for the test app; issued relay URLs are absolute
/// against it and must be converted back to paths for the test server.
pub const TEST_BASE_URL: &str = "http://localhost";

pub struct TestApp {
    pub server: TestServer,
}

impl TestApp {
    pub fn client(&self) -> &TestServer {
        &self.server
    }
}

pub fn test_config(allow_overwrite: bool) -> Config {
    Config(Box::new(TransferConfig {
        base: BaseConfig {
            server_port: 0,
            cors_origins: vec!["*".to_string()],
            db_max_connections: 5,
            db_timeout_seconds: 5,
            jwt_secret: TEST_SECRET.to_string(),
            jwt_expiry_hours: 1,
            environment: "test".to_string(),
        },
        database_url: None,
        ledger_backend: LedgerBackend::Memory,
        storage_backend: StorageBackend::Memory,
        s3_bucket: None,
        s3_region: None,
        s3_endpoint: None,
        local_storage_path: None,
        public_base_url: TEST_BASE_URL.to_string(),
        location_token_secret: TEST_SECRET.to_string(),
        location_token_ttl_secs: 600,
        upload_ttl_hours: 72,
        download_ttl_hours: 168,
        allow_overwrite,
        archive_chunk_bytes: 4096,
        archive_channel_depth: 4,
        sweep_interval_secs: 0,
        max_body_bytes: 64 * 1024 * 1024,
    }))
}

/// App with default policy (overwrites disabled).
pub fn setup_test_app() -> TestApp {
    setup_test_app_with(false)
}

pub fn setup_test_app_with(allow_overwrite: bool) -> TestApp {
    let config = test_config(allow_overwrite);
    let ledger = Arc::new(MemoryLedger::new());
    let storage = Arc::new(MemoryStorage::new());
    let state = Arc::new(AppState::new(config, ledger, storage));
    let router = routes::build_router(state).expect("router");
    TestApp {
        server: TestServer::new(router).expect("test server"),
    }
}

/// Bearer header value for an account, signed with the test secret.
pub fn bearer_for(account_id: Uuid) -> String {
    let token = auth::issue_token(TEST_SECRET, account_id, 1).expect("sign token");
    format!("Bearer {}", token)
}

/// Convert an issued absolute relay URL into a path the test server accepts.
pub fn transfer_path(url: &str) -> String {
    url.trim_start_matches(TEST_BASE_URL).to_string()
}
