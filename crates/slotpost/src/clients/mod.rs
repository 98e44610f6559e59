//! HTTP adapters for the assembly collaborator traits.

pub mod bluesky;
pub mod catalog;
pub mod images;
pub mod llm;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use assembly::{CollaboratorError, Collaborators};

use crate::config::AppConfig;

pub use bluesky::BlueskyPublisher;
pub use catalog::IgdbCatalog;
pub use images::HttpImageSource;
pub use llm::ChatCompletionsGenerator;

/// Build every collaborator from a validated configuration.
pub fn build(config: &AppConfig) -> Result<Collaborators> {
    let client = http_client(config.http_timeout_secs)?;
    Ok(Collaborators {
        catalog: Arc::new(IgdbCatalog::new(client.clone(), &config.catalog)),
        generator: Arc::new(ChatCompletionsGenerator::new(client.clone(), &config.llm)),
        images: Arc::new(HttpImageSource::new(client.clone())),
        publisher: Arc::new(BlueskyPublisher::new(client, &config.publisher)),
    })
}

pub fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent(concat!("slotpost/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to create HTTP client")
}

/// Map a non-success response to a status error carrying the body.
async fn status_error(service: &str, response: reqwest::Response) -> CollaboratorError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    CollaboratorError::status(service, status, body)
}

fn request_error(service: &str, e: reqwest::Error) -> CollaboratorError {
    CollaboratorError::request(service, e.to_string())
}

fn parse_error(service: &str, e: impl std::fmt::Display) -> CollaboratorError {
    CollaboratorError::parse(service, e.to_string())
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )

}
