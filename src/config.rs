use std::time::Duration;

use clap::Parser;

use crate::{
    client::{Client, ClientBuilder},
    request::RequestBuilder,
};

pub const DEFAULT_URL: &str = "http://localhost:8000";

/// Fetch an Arrow IPC stream over HTTP and report how long it took.
#[derive(Debug, Clone, Parser)]
#[command(author, version, about, long_about = None, name = "arrow-fetch")]
pub struct Args {
    /// Endpoint serving an Arrow IPC stream.
    #[arg(short, long, env = "ARROW_FETCH_URL", default_value = DEFAULT_URL)]
    pub url: String,

    /// Limit for each of DNS, TCP connect and TLS handshake, in milliseconds.
    #[arg(long, value_name = "MS")]
    pub connect_timeout: Option<u64>,

    /// Limit for the whole exchange, in milliseconds.
    #[arg(long, value_name = "MS")]
    pub timeout: Option<u64>,

    /// Longest allowed pause between body chunks, in milliseconds.
    #[arg(long, value_name = "MS")]
    pub read_timeout: Option<u64>,

    /// Print connection phase timings to stderr.
    #[arg(long)]
    pub stats: bool,
}

impl Args {
    pub fn client(&self) -> crate::Result<Client> {
        let mut builder = ClientBuilder::new();
        if let Some(ms) = self.connect_timeout {
            let timeout = Duration::from_millis(ms);
            builder = builder
                .dns_timeout(timeout)
                .tcp_timeout(timeout)
                .tls_timeout(timeout);
        }
        if let Some(ms) = self.timeout {
            builder = builder.timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = self.read_timeout {
            builder = builder.read_timeout(Duration::from_millis(ms));
        }
        builder.build()
    }

    pub fn request(&self, client: &Client) -> RequestBuilder {
        client
            .get(self.url.as_str())
            .header(http::header::ACCEPT, crate::ipc::ARROW_STREAM_MIME)
    }
}
