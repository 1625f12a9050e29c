use std::time::Duration;

use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};

/// Builds an HTTP client for a kestrel node's RPC endpoint.
///
/// Submission requests stay open until the pool delivers the final
/// verification result, so the default timeout is generous.
pub fn create_http_client(server_url: &str, config: HttpClientConfig) -> HttpClient {
    HttpClientBuilder::new()
        .request_timeout(config.timeout)
        .max_request_size(config.max_request_size)
        .build(server_url)
        .expect("Failed to create http client")
}

pub struct HttpClientConfig {
    timeout: Duration,
    max_request_size: u32,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            // a serialized transaction may approach the pool's 1 MB cap,
            // plus hex and JSON envelope overhead
            max_request_size: 4 * 1024 * 1024,
        }
    }
}

impl HttpClientConfig {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn max_request_size(mut self, bytes: u32) -> Self {
        self.max_request_size = bytes;
        self
    }
}
