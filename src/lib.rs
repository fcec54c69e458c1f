pub mod body;
pub mod client;
pub mod config;
pub mod error;
mod into_uri;
pub mod ipc;
pub mod report;
pub mod request;
pub mod response;
pub mod stats;

pub use client::{Client, ClientBuilder};
pub use error::{Error, Result};
pub use into_uri::IntoUri;
pub use ipc::{ArrowBatchReader, ColumnarTable, StreamingDecoder};
pub use response::Response;
