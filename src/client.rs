use std::{
    collections::HashMap,
    fmt,
    future::Future,
    net::{IpAddr, SocketAddr},
    sync::{Arc, Once},
    time::Duration,
};

use arc_swap::ArcSwap;
use bytes::Bytes;
use hickory_resolver::{
    TokioResolver,
    config::{LookupIpStrategy, NameServerConfig, ResolverConfig},
    name_server::TokioConnectionProvider,
};
use http::{HeaderMap, HeaderValue, Method, Uri, Version, header::HOST, uri::PathAndQuery};
use http_body_util::Empty;
use hyper::body::Incoming;
use hyper::client::conn::{http1, http2};
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpSocket, TcpStream},
    time::Instant,
};
use rustls::{ClientConfig, RootCertStore, pki_types::ServerName};
use tokio_rustls::{TlsConnector, client::TlsStream};
use tracing::{debug, info};

use crate::{
    body,
    into_uri::IntoUri,
    request::{Request, RequestBuilder},
    response::Response,
    stats::Recorder,
};

#[derive(Clone)]
pub struct Client {
    inner: Arc<ArcSwap<ClientRef>>,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Convenience method to make a `GET` request to a URI.
    pub fn get<U: IntoUri>(&self, uri: U) -> RequestBuilder {
        self.request(Method::GET, uri)
    }

    pub fn request<U: IntoUri>(&self, method: Method, uri: U) -> RequestBuilder {
        let request = uri.into_uri().map(|uri| Request::new(method, uri));
        RequestBuilder::new(self.clone(), request)
    }

    /// Pin `domain` to `addrs` for every later request made by this client and
    /// its clones. A port of 0 means "use the port from the URI".
    pub fn resolve_to_addrs(&self, domain: &str, addrs: &[SocketAddr]) {
        self.inner.rcu(|current| {
            let mut next = ClientRef::clone(current);
            next.dns_overrides.insert(domain.to_string(), addrs.to_vec());
            next
        });
    }

    /// Send a `Request` and wait for the response head.
    ///
    /// The body is not read; it streams through the returned [`Response`].
    pub async fn execute(&self, request: Request) -> crate::Result<Response> {
        let client = self.inner.load_full();
        let timeout = request.timeout().copied().or(client.timeout);
        let read_timeout = request.read_timeout().copied().or(client.read_timeout);
        let deadline = timeout.map(|timeout| Instant::now() + timeout);

        if let Some(recorder) = request.recorder() {
            recorder.on_request_start(request.uri());
        }
        info!(method = %request.method(), uri = %request.uri(), "sending request");

        let send = client.send(request, deadline, read_timeout);
        match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, send).await?,
            None => send.await,
        }
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("inner", &self.inner.load_full())
            .finish()
    }
}

#[derive(Clone)]
pub struct ClientRef {
    local_addr: Option<SocketAddr>,
    resolver: TokioResolver,
    dns_overrides: HashMap<String, Vec<SocketAddr>>,
    headers: HeaderMap,
    tls: TlsConnector,

    dns_timeout: Option<Duration>,
    tcp_timeout: Option<Duration>,
    tls_timeout: Option<Duration>,
    timeout: Option<Duration>,
    read_timeout: Option<Duration>,
}

impl fmt::Debug for ClientRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientRef")
            .field("local_addr", &self.local_addr)
            .field("dns_overrides", &self.dns_overrides)
            .field("headers", &self.headers)
            .field("dns_timeout", &self.dns_timeout)
            .field("tcp_timeout", &self.tcp_timeout)
            .field("tls_timeout", &self.tls_timeout)
            .field("timeout", &self.timeout)
            .field("read_timeout", &self.read_timeout)
            .finish_non_exhaustive()
    }
}

/// Run `fut` under an optional phase timeout.
async fn with_timeout<F, T, E>(timeout: Option<Duration>, fut: F) -> crate::Result<T>
where
    F: Future<Output = Result<T, E>>,
    crate::Error: From<E>,
{
    match timeout {
        Some(timeout) => Ok(tokio::time::timeout(timeout, fut).await??),
        None => Ok(fut.await?),
    }
}

impl ClientRef {
    async fn send(
        &self,
        request: Request,
        deadline: Option<Instant>,
        read_timeout: Option<Duration>,
    ) -> crate::Result<Response> {
        let recorder = request.recorder().cloned();
        let recorder = recorder.as_deref();

        let host = request.host()?.trim_start_matches('[').trim_end_matches(']');
        let addrs = self.resolve(host, request.port(), recorder).await?;
        let tcp = self.connect_tcp(&addrs, recorder).await?;

        let mut sender = if request.is_https() {
            let tls = self.connect_tls(host, tcp, recorder).await?;
            let h2 = tls.get_ref().1.alpn_protocol() == Some(&b"h2"[..]);
            handshake(tls, h2).await?
        } else {
            handshake(tcp, request.version() == Version::HTTP_2).await?
        };

        let uri = request.uri().clone();
        let http_request = self.http_request(&request, sender.is_http2())?;
        let res = sender.send(http_request).await?;

        debug!(status = %res.status(), version = ?res.version(), "received response head");
        if let Some(recorder) = recorder {
            recorder.on_response(res.status(), res.version());
        }

        let res = res.map(|incoming| body::boxed(incoming, deadline, read_timeout));
        Ok(Response::new(res, uri, request.recorder().cloned()))
    }

    async fn resolve(
        &self,
        host: &str,
        port: u16,
        recorder: Option<&dyn Recorder>,
    ) -> crate::Result<Vec<SocketAddr>> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(vec![SocketAddr::new(ip, port)]);
        }

        if let Some(recorder) = recorder {
            recorder.on_dns_start(host);
        }

        if let Some(addrs) = self.dns_overrides.get(host) {
            let addrs: Vec<SocketAddr> = addrs
                .iter()
                .map(|addr| match addr.port() {
                    0 => SocketAddr::new(addr.ip(), port),
                    _ => *addr,
                })
                .collect();
            debug!(host, ?addrs, "dns override");
            if let Some(recorder) = recorder {
                recorder.on_dns_done(host, true, Ok(addrs.as_slice()));
            }
            return Ok(addrs);
        }

        let result = with_timeout(self.dns_timeout, self.resolver.lookup_ip(host))
            .await
            .map(|lookup| {
                lookup
                    .iter()
                    .map(|ip| SocketAddr::new(ip, port))
                    .collect::<Vec<_>>()
            })
            .and_then(|addrs| {
                if addrs.is_empty() {
                    Err(crate::Error::EmptyResolveResult)
                } else {
                    Ok(addrs)
                }
            });

        debug!(host, result = ?result.as_ref().map_err(|e| e.to_string()), "dns lookup");
        if let Some(recorder) = recorder {
            recorder.on_dns_done(host, false, result.as_deref());
        }
        result
    }

    async fn connect_tcp(
        &self,
        addrs: &[SocketAddr],
        recorder: Option<&dyn Recorder>,
    ) -> crate::Result<TcpStream> {
        let mut last_error = None;
        for addr in addrs {
            if let Some(recorder) = recorder {
                recorder.on_tcp_start(addr);
            }
            let result = self.connect_one(*addr).await;
            if let Some(recorder) = recorder {
                recorder.on_tcp_done(addr, result.as_ref());
            }
            match result {
                Ok(stream) => {
                    debug!(%addr, "tcp connected");
                    return Ok(stream);
                }
                Err(err) => {
                    debug!(%addr, %err, "tcp connect failed");
                    last_error = Some(err);
                }
            }
        }

        match (addrs.len(), last_error) {
            (0, _) => Err(crate::Error::EmptyResolveResult),
            (1, Some(err)) => Err(err),
            _ => Err(crate::Error::AllTcpConnectFailed),
        }
    }

    async fn connect_one(&self, addr: SocketAddr) -> crate::Result<TcpStream> {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        if let Some(local_addr) = self.local_addr {
            socket.bind(local_addr)?;
        }
        let stream = with_timeout(self.tcp_timeout, socket.connect(addr)).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    async fn connect_tls(
        &self,
        host: &str,
        tcp: TcpStream,
        recorder: Option<&dyn Recorder>,
    ) -> crate::Result<TlsStream<TcpStream>> {
        let server_name = ServerName::try_from(host.to_string())?;
        if let Some(recorder) = recorder {
            recorder.on_tls_start(host);
        }
        let result = with_timeout(self.tls_timeout, self.tls.connect(server_name, tcp)).await;
        if let Some(recorder) = recorder {
            recorder.on_tls_done(result.as_ref().map(|_| ()));
        }
        debug!(host, ok = result.is_ok(), "tls handshake");
        result
    }

    fn http_request(
        &self,
        request: &Request,
        http2: bool,
    ) -> crate::Result<http::Request<Empty<Bytes>>> {
        let (uri, version) = if http2 {
            (request.uri().clone(), Version::HTTP_2)
        } else {
            // HTTP/1 wants origin-form plus a Host header.
            let path = request
                .uri()
                .path_and_query()
                .cloned()
                .unwrap_or_else(|| PathAndQuery::from_static("/"));
            (Uri::from(path), Version::HTTP_11)
        };

        let mut headers = request.headers().clone();
        for (name, value) in &self.headers {
            if !headers.contains_key(name) {
                headers.insert(name.clone(), value.clone());
            }
        }
        if !http2 && !headers.contains_key(HOST) {
            let authority = match request.uri().port_u16() {
                Some(port) => format!("{}:{}", request.host()?, port),
                None => request.host()?.to_string(),
            };
            headers.insert(HOST, HeaderValue::try_from(authority)?);
        }

        let mut req = http::Request::builder()
            .method(request.method().clone())
            .uri(uri)
            .version(version)
            .body(Empty::new())?;
        *req.headers_mut() = headers;
        Ok(req)
    }
}

enum Sender {
    Http1(http1::SendRequest<Empty<Bytes>>),
    Http2(http2::SendRequest<Empty<Bytes>>),
}

impl Sender {
    fn is_http2(&self) -> bool {
        matches!(self, Sender::Http2(_))
    }

    async fn send(
        &mut self,
        request: http::Request<Empty<Bytes>>,
    ) -> crate::Result<http::Response<Incoming>> {
        match self {
            Sender::Http1(sender) => {
                sender.ready().await?;
                Ok(sender.send_request(request).await?)
            }
            Sender::Http2(sender) => {
                sender.ready().await?;
                Ok(sender.send_request(request).await?)
            }
        }
    }
}

/// Perform the HTTP handshake and spawn the connection driver onto the
/// current runtime.
async fn handshake<T>(io: T, http2: bool) -> crate::Result<Sender>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = TokioIo::new(io);
    if http2 {
        let (sender, conn) = http2::handshake(TokioExecutor::new(), io).await?;
        tokio::spawn(async move {
            if let Err(err) = conn.await {
                debug!(%err, "http2 connection closed with error");
            }
        });
        Ok(Sender::Http2(sender))
    } else {
        let (sender, conn) = http1::handshake(io).await?;
        tokio::spawn(async move {
            if let Err(err) = conn.await {
                debug!(%err, "http1 connection closed with error");
            }
        });
        Ok(Sender::Http1(sender))
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClientBuilder {
    local_addr: Option<SocketAddr>,
    lookup_ip_strategy: Option<LookupIpStrategy>,
    name_servers: Option<Vec<NameServerConfig>>,
    headers: Option<HeaderMap>,
    dns_overrides: HashMap<String, Vec<SocketAddr>>,

    dns_timeout: Option<Duration>,
    tcp_timeout: Option<Duration>,
    tls_timeout: Option<Duration>,
    timeout: Option<Duration>,
    read_timeout: Option<Duration>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        ClientBuilder::default()
    }

    pub fn build(self) -> crate::error::Result<Client> {
        let resolver = {
            let mut builder = match self.name_servers {
                Some(name_servers) if !name_servers.is_empty() => {
                    let mut config = ResolverConfig::new();
                    for ns in name_servers {
                        config.add_name_server(ns);
                    }
                    TokioResolver::builder_with_config(config, TokioConnectionProvider::default())
                }
                _ => TokioResolver::builder(TokioConnectionProvider::default()).unwrap_or_else(
                    |err| {
                        debug!(%err, "system resolver config unavailable, using defaults");
                        TokioResolver::builder_with_config(
                            ResolverConfig::default(),
                            TokioConnectionProvider::default(),
                        )
                    },
                ),
            };
            if let Some(strategy) = self.lookup_ip_strategy {
                builder.options_mut().ip_strategy = strategy;
            }
            builder.build()
        };

        Ok(Client {
            inner: Arc::new(ArcSwap::from_pointee(ClientRef {
                resolver,
                local_addr: self.local_addr,
                dns_overrides: self.dns_overrides,
                headers: self.headers.unwrap_or_default(),
                tls: tls_connector(),
                dns_timeout: self.dns_timeout,
                tcp_timeout: self.tcp_timeout,
                tls_timeout: self.tls_timeout,
                timeout: self.timeout,
                read_timeout: self.read_timeout,
            })),
        })
    }

    pub fn local_addr(mut self, addr: SocketAddr) -> Self {
        self.local_addr = Some(addr);
        self
    }

    pub fn resolve_to_addrs(mut self, domain: &str, addrs: &[SocketAddr]) -> Self {
        self.dns_overrides
            .insert(domain.to_string(), addrs.to_vec());
        self
    }

    pub fn lookup_ip_strategy(mut self, strategy: LookupIpStrategy) -> Self {
        self.lookup_ip_strategy = Some(strategy);
        self
    }

    pub fn name_servers<I>(mut self, addr: I) -> Self
    where
        I: IntoIterator<Item = NameServerConfig>,
    {
        self.name_servers = Some(addr.into_iter().collect());
        self
    }

    /// Headers sent with every request unless the request sets them itself.
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = Some(headers);
        self
    }

    pub fn dns_timeout(mut self, timeout: Duration) -> Self {
        self.dns_timeout = Some(timeout);
        self
    }

    pub fn tcp_timeout(mut self, timeout: Duration) -> Self {
        self.tcp_timeout = Some(timeout);
        self
    }

    pub fn tls_timeout(mut self, timeout: Duration) -> Self {
        self.tls_timeout = Some(timeout);
        self
    }

    /// Total timeout, from connecting until the body has been read.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }
}

fn tls_connector() -> TlsConnector {
    ensure_crypto_provider();

    let mut roots = RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();
    for err in &native.errors {
        debug!(%err, "skipping native certificate");
    }
    let (added, ignored) = roots.add_parsable_certificates(native.certs);
    debug!(added, ignored, "loaded native root certificates");

    let mut config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    TlsConnector::from(Arc::new(config))
}

static INIT_TLS: Once = Once::new();

fn ensure_crypto_provider() {
    INIT_TLS.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
