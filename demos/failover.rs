//! Shows endpoint selection across several candidate backends.
//!
//! Candidates come from `GRIDGATE_API_URLS` (comma-separated), falling back to
//! two local addresses. The first candidate whose health probe succeeds serves
//! the request.
//!
//! Run with: `GRIDGATE_API_URLS=http://localhost:8080,http://localhost:8081 cargo run --example failover`

use gridgate::{ApiRequest, Error, Gateway, GatewayConfig, ResponseSource};
use url::Url;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter("gridgate=info,failover=info")
        .init();

    let mut config = GatewayConfig::from_env()?;
    if config.endpoints.is_empty() {
        config.endpoints = vec![
            Url::parse("http://localhost:8080")?,
            Url::parse("http://localhost:8081")?,
        ];
    }

    let gateway = Gateway::builder().config(config).build()?;

    for candidate in gateway.resolver().candidates() {
        println!("Candidate: {}", candidate.url);
    }

    let selected = gateway.find_healthy_endpoint().await;
    println!("Selected: {} ({:?})", selected.url, selected.kind);

    match gateway.execute(ApiRequest::get("/status")).await {
        Ok(response) if response.source == ResponseSource::Simulated => {
            println!("No backend reachable, simulated answer: {}", response.data);
        }
        Ok(response) => println!("Backend answered {}: {}", response.status, response.data),
        Err(Error::HttpError { status, raw_response, .. }) => {
            eprintln!("HTTP error {}: {}", status, raw_response);
        }
        Err(e) => eprintln!("Request failed: {}", e),
    }

    for candidate in gateway.resolver().candidates() {
        println!(
            "{} healthy={} last_checked={:?}",
            candidate.url, candidate.is_healthy, candidate.last_health_check
        );
    }

    Ok(())
}
