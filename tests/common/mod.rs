use chatrelay::config::Config;
use chatrelay::gateway::{router, AppState};
use chatrelay::{HttpAgentClient, MemoryStore, SqliteMessageLog};
use serde_json::Value;
use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Path the mock agent listens on
pub const AGENT_PATH: &str = "/webhook/chatbotllm";

/// A relay wired to a mock agent and a temporary message log
#[allow(dead_code)]
pub struct TestRelay {
    pub state: Arc<AppState>,
    pub log: Arc<SqliteMessageLog>,
    pub agent: MockServer,
    _dir: TempDir,
}

#[allow(dead_code)]
impl TestRelay {
    /// Bodies the mock agent has received, in order
    pub async fn agent_requests(&self) -> Vec<Value> {
        self.agent
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .map(|req| serde_json::from_slice(&req.body).expect("agent request is JSON"))
            .collect()
    }
}

/// Start a relay whose agent answers every call with `response`
#[allow(dead_code)]
pub async fn start_relay(response: ResponseTemplate) -> TestRelay {
    start_relay_with_timeout(response, 5).await
}

/// Start a relay whose agent calls give up after `timeout_seconds`
#[allow(dead_code)]
pub async fn start_relay_with_timeout(response: ResponseTemplate, timeout_seconds: u64) -> TestRelay {
    let agent = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(AGENT_PATH))
        .respond_with(response)
        .mount(&agent)
        .await;

    let dir = TempDir::new().expect("failed to create tempdir");
    let mut config = Config::default();
    config.agent.url = format!("{}{}", agent.uri(), AGENT_PATH);
    config.agent.timeout_seconds = timeout_seconds;

    let log = Arc::new(
        SqliteMessageLog::new_with_path(dir.path().join("messages.db"))
            .expect("failed to create message log"),
    );
    let client = Arc::new(
        HttpAgentClient::new(config.agent.url.clone(), config.agent.timeout())
            .expect("failed to build agent client"),
    );
    let state = Arc::new(AppState::new(
        &config,
        Arc::new(MemoryStore::new()),
        log.clone(),
        client,
    ));

    TestRelay {
        state,
        log,
        agent,
        _dir: dir,
    }
}

/// Serve the relay's router on an ephemeral local port
#[allow(dead_code)]
pub async fn serve(relay: &TestRelay) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind");
    let addr = listener.local_addr().expect("local addr");
    let app = router(relay.state.clone());
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .expect("server failed");
    });
    addr
}

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}
