//! Request bodies, keys and payloads shared by the integration tests

use serde_json::{Value, json};

/// `UID:APIKEY` key selecting the legacy protocol
pub const LEGACY_KEY: &str = "123:abc-def";

/// Basic auth header sent for [`LEGACY_KEY`]
pub const LEGACY_AUTHORIZATION: &str = "Basic MTIzOmFiYy1kZWY=";

/// Personal access token selecting the processes API
pub const TOKEN_KEY: &str = "0f1e2d3c-token";

/// Dataset used by the end-to-end scenarios
pub const ERA5: &str = "reanalysis-era5-single-levels";

/// Single-field ERA5 request
pub fn era5_request() -> Value {
    json!({
        "variable": "2t",
        "product_type": "reanalysis",
        "date": "2012-12-01",
        "time": "12:00"
    })
}

/// Deterministic payload of `len` bytes
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
