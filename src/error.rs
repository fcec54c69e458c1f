use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("uri parse error {0}")]
    Uri(#[from] http::uri::InvalidUri),

    #[error("unsupported uri scheme {0}")]
    UnsupportedScheme(String),

    #[error("resolve error {0}")]
    Resolve(#[from] hickory_resolver::ResolveError),

    #[error("io error {0}")]
    Io(#[from] std::io::Error),

    #[error("timeout error {0}")]
    Timeout(#[from] tokio::time::error::Elapsed),

    #[error("rustls error {0}")]
    Rustls(#[from] tokio_rustls::rustls::Error),

    #[error("invalid dns name error {0}")]
    InvalidDnsName(#[from] tokio_rustls::rustls::pki_types::InvalidDnsNameError),

    #[error("hyper error {0}")]
    Hyper(#[from] hyper::Error),

    #[error("http error {0}")]
    Http(#[from] http::Error),

    #[error("http invalid header value {0}")]
    HttpInvalidHeader(#[from] http::header::InvalidHeaderValue),

    #[error("unexpected http status {0}")]
    Status(http::StatusCode),

    #[error("host required")]
    HostRequired,

    #[error("empty resolve result")]
    EmptyResolveResult,

    #[error("all tcp connect failed")]
    AllTcpConnectFailed,

    #[error("body error: {0}")]
    Body(#[from] Box<dyn std::error::Error + Send + Sync + 'static>),

    #[error("body timeout")]
    BodyTimeout,

    #[error("arrow error {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("arrow stream ended without a schema message")]
    MissingSchema,
}

impl Error {
    /// Recover a crate error that travelled through a boxed body error.
    pub(crate) fn from_body(err: Box<dyn std::error::Error + Send + Sync + 'static>) -> Error {
        match err.downcast::<Error>() {
            Ok(err) => *err,
            Err(err) => match err.downcast::<hyper::Error>() {
                Ok(err) => Error::Hyper(*err),
                Err(err) => Error::Body(err),
            },
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_) | Error::BodyTimeout)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_body_unwraps_crate_errors() {
        let boxed: Box<dyn std::error::Error + Send + Sync> = Box::new(Error::BodyTimeout);
        let err = Error::from_body(boxed);
        assert!(matches!(err, Error::BodyTimeout));
        assert!(err.is_timeout());
    }

    #[test]
    fn from_body_keeps_foreign_errors_boxed() {
        let boxed: Box<dyn std::error::Error + Send + Sync> =
            Box::new(std::io::Error::other("reset"));
        let err = Error::from_body(boxed);
        assert!(matches!(err, Error::Body(_)));
        assert_eq!(err.to_string(), "body error: reset");
    }
}
