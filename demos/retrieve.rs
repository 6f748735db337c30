//! Retrieve example
//!
//! Downloads one ERA5 field:
//! - Resolving credentials from `CDSAPI_URL`/`CDSAPI_KEY` or `~/.cdsapirc`
//! - Submitting the request and waiting for the job
//! - Downloading the output into a local file
//!
//! Run with `RUST_LOG=cdsapi=debug` to see every poll.

use cdsapi::{Config, Retrieved, connect};
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cdsapi=info")),
        )
        .init();

    let client = connect(Config {
        progress: true,
        ..Default::default()
    })?;

    let request = json!({
        "variable": "2t",
        "product_type": "reanalysis",
        "date": "2012-12-01",
        "time": "12:00"
    });

    let outcome = client
        .retrieve(
            "reanalysis-era5-single-levels",
            &request,
            Some("download.grib".into()),
        )
        .await?;

    match outcome {
        Retrieved::Ready(result) => {
            println!(
                "Saved {} bytes from {} to download.grib",
                result.content_length(),
                result.location()
            );
            result.delete().await;
        }
        Retrieved::Inline(value) => println!("Inline result: {value}"),
        Retrieved::Pending(job) => println!("Submitted as {:?}", job.request_id()),
    }

    client.close().await;
    Ok(())
}
