//! Example: log in and make authenticated requests through the pipeline.
//!
//! This example demonstrates the full setup of an authenticated HTTP client:
//! 1. Load the pipeline config (profile + base URL)
//! 2. Compose a Tower service stack with a user-agent header over hyper
//! 3. Wrap it in an `ApiClient` that owns the credential store
//! 4. Log in, then call an endpoint; expired credentials are refreshed transparently
//!
//! # Prerequisites
//!
//! A config file at the default config path (e.g.
//! `~/.config/auth-pipeline/config.toml` on Linux), or `AUTH_PIPELINE_CONFIG`
//! pointing at one:
//!
//! ```toml
//! version = 1
//! base_url = "https://api.example.com"
//! renewal_cookie_name = "refreshToken"
//! ```
//!
//! # Usage
//!
//! ```sh
//! AUTH_EMAIL=me@example.com AUTH_PASSWORD=secret cargo run --example use_client
//! ```

use std::sync::Arc;

use http::{HeaderValue, header::USER_AGENT};
use hyper_util::{client::legacy::Client, rt::TokioExecutor};
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::set_header::SetRequestHeaderLayer;

use auth_pipeline::{
    ApiClient, CredentialStore,
    client::{BroadcastNotifier, SessionEvent},
    config,
};

#[tokio::main]
async fn main() {
    // Initialize tracing. Control verbosity via the RUST_LOG env var:
    //   RUST_LOG=auth_pipeline=debug cargo run --example use_client
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "auth_pipeline=info".parse().unwrap()),
        )
        .init();

    // Both ring and aws-lc-rs may be compiled in, so pick one explicitly.
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("failed to install ring crypto provider");

    let profile = std::env::var("AUTH_PIPELINE_PROFILE").unwrap_or_else(|_| "default".into());
    println!("Using profile: {profile}");

    // Step 1: Load the config for the profile.
    let cfg = config::load_config(Some(&profile)).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}");
        std::process::exit(1);
    });
    println!("Base URL:   {:?}", cfg.base_url);

    // Step 2: Build the transport stack with an HTTPS-capable client.
    let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
        .with_webpki_roots()
        .https_or_http()
        .enable_http1()
        .build();
    let http_client = Client::builder(TokioExecutor::new()).build(https_connector);

    let transport = ServiceBuilder::new()
        .layer(SetRequestHeaderLayer::overriding(
            USER_AGENT,
            HeaderValue::from_static("auth-pipeline-demo/0.1"),
        ))
        .service(http_client);

    // Step 3: The client owns the store; the notifier tells us when the
    // session can't be recovered.
    let notifier = Arc::new(BroadcastNotifier::default());
    let mut expired = notifier.subscribe();
    tokio::spawn(async move {
        while let Ok(SessionEvent::Expired) = expired.recv().await {
            eprintln!("Session expired, please log in again");
        }
    });

    let client = ApiClient::from_config(&cfg, transport, CredentialStore::new(), notifier)
        .unwrap_or_else(|e| {
            eprintln!("Failed to create client: {e}");
            std::process::exit(1);
        });

    // Step 4: Log in and make an authenticated request.
    let email = std::env::var("AUTH_EMAIL").unwrap_or_default();
    let password = std::env::var("AUTH_PASSWORD").unwrap_or_default();
    match client.login(&json!({ "email": email, "password": password })).await {
        Ok(credential) => println!("Logged in as {:?}", credential.claims()),
        Err(problem) => {
            eprintln!("Login failed: {problem}");
            std::process::exit(1);
        }
    }

    match client.get_json::<serde_json::Value>("/api/me").await {
        Ok(body) => println!("Body: {body:#}"),
        Err(problem) => eprintln!("Request failed: {problem}"),
    }
}
