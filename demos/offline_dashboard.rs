//! Runs the gateway with no reachable backend.
//!
//! Every request is answered by the simulated responder, so sign-in, cached
//! reads, writes and metrics can be exercised without a server.
//!
//! Run with: `cargo run --example offline_dashboard`

use gridgate::simulated::SimulatedTransport;
use gridgate::{ApiError, Client, Gateway};
use http::Method;
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct Site {
    id: u32,
    name: String,
    capacity_kw: f64,
}

#[derive(Debug, Serialize)]
struct NewAlert {
    site_id: u32,
    level: String,
}

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    tracing_subscriber::fmt()
        .with_env_filter("gridgate=debug,offline_dashboard=info")
        .init();

    let simulated = SimulatedTransport::new().with_fixture(
        Method::GET,
        "/sites",
        json!([
            { "id": 1, "name": "North Farm", "capacity_kw": 1200.0 },
            { "id": 2, "name": "Harbour Roof", "capacity_kw": 85.5 },
        ]),
    );

    // Nothing listens on port 1, so health checks fail and the gateway goes offline.
    let gateway = Gateway::builder()
        .base_url("http://127.0.0.1:1")?
        .simulated_transport(simulated)
        .build()?;
    let client = Client::new(gateway);

    let user = client.login("demo@example.com", "demo").await?;
    println!("Signed in as {} ({})", user.display_name, user.role);

    println!("=== Sites ===");
    for _ in 0..2 {
        let sites = client.get::<Vec<Site>>("/sites").await?;
        println!(
            "{} sites, source {:?}, latency {:?}",
            sites.data.len(),
            sites.source,
            sites.latency
        );
    }

    println!("=== Raise alert ===");
    let alert = NewAlert {
        site_id: 1,
        level: "high".to_string(),
    };
    let created = client
        .post::<_, serde_json::Value>("/alerts", &alert)
        .await?;
    println!("Created: {}", created.data);

    let stats = client.gateway().metrics_stats();
    println!(
        "Requests: {}, average {:.1}ms, error rate {:.0}%",
        stats.count,
        stats.avg_duration_ms,
        stats.error_rate * 100.0
    );
    println!("Cache: {:?}", client.gateway().cache_stats());

    client.logout().await?;
    Ok(())
}
