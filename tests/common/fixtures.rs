//! Asset fixtures and a mock asset server

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Smallest valid PNG (1x1, transparent)
pub const TINY_PNG: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44, 0x52,
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F, 0x15, 0xC4,
    0x89, 0x00, 0x00, 0x00, 0x0A, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00, 0x01, 0x00, 0x00,
    0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4E, 0x44, 0xAE,
    0x42, 0x60, 0x82,
];

/// JPEG start/end markers around a few payload bytes
pub const TINY_JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46, 0xFF, 0xD9];

/// An asset served by [`start_asset_server`]
pub struct Asset {
    /// Request path, starting with `/`
    pub route: &'static str,
    /// Response body
    pub body: &'static [u8],
    /// Content-Type header
    pub content_type: &'static str,
}

/// Start a mock server serving `assets`; any other path answers 404
pub async fn start_asset_server(assets: &[Asset]) -> MockServer {
    let server = MockServer::start().await;
    for asset in assets {
        Mock::given(method("GET"))
            .and(path(asset.route))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", asset.content_type)
                    .set_body_bytes(asset.body.to_vec()),
            )
            .mount(&server)
            .await;
    }
    server
}

/// Full URL of `route` on `server`
pub fn url_for(server: &MockServer, route: &str) -> String {
    format!("{}{route}", server.uri())
}
