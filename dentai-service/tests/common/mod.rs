#![allow(dead_code)]

use dentai_service::config::DentaiConfig;
use dentai_service::services::providers::mock::MockProvider;
use dentai_service::startup::Application;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

pub struct TestApp {
    pub address: String,
    pub client: Client,
    pub provider: Arc<MockProvider>,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }
}

/// Spawn the application on a random port backed by `provider`.
pub async fn spawn_app_with(provider: MockProvider) -> TestApp {
    let provider = Arc::new(provider);
    let app = Application::build_with_provider(DentaiConfig::offline(), provider.clone())
        .await
        .expect("Failed to build application");
    let port = app.port();

    tokio::spawn(async move {
        let _ = app.run_until_stopped().await;
    });

    TestApp {
        address: format!("http://127.0.0.1:{}", port),
        client: Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .expect("Failed to build client"),
        provider,
    }
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with(MockProvider::new()).await
}
