use std::{
    fmt,
    net::SocketAddr,
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use http::{StatusCode, Uri, Version};
use tokio::net::TcpStream;

#[derive(Debug, Clone, Default)]
pub struct Stats {
    pub dns: Option<DnsStats>,
    pub tcp: Option<TcpStats>,
    pub tls: Option<TlsStats>,
    pub response: Option<ResponseStats>,
    pub body: Option<BodyStats>,
}

#[derive(Debug, Clone, Default)]
pub struct DnsStats {
    pub host: String,
    /// The answer came from an IP literal or a `resolve_to_addrs` override.
    pub overridden: bool,
    pub duration: Duration,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TcpStats {
    pub stats: Vec<TcpStat>,
    pub total_duration: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct TcpStat {
    pub dest: String,
    pub duration: Duration,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TlsStats {
    pub server_name: String,
    pub duration: Duration,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResponseStats {
    pub status: StatusCode,
    pub version: Version,
    /// Time from request start to the response head.
    pub time_to_first_byte: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct BodyStats {
    pub bytes: u64,
    pub chunks: u64,
    pub duration: Duration,
}

/// Hooks invoked while a request travels through the connect pipeline.
///
/// Every method has an empty default so implementors only pick the phases
/// they care about.
pub trait Recorder: Send + Sync {
    fn on_request_start(&self, _uri: &Uri) {}

    fn on_dns_start(&self, _host: &str) {}

    fn on_dns_done(
        &self,
        _host: &str,
        _overridden: bool,
        _result: Result<&[SocketAddr], &crate::Error>,
    ) {
    }

    fn on_tcp_start(&self, _dest: &SocketAddr) {}

    fn on_tcp_done(&self, _dest: &SocketAddr, _stream: Result<&TcpStream, &crate::Error>) {}

    fn on_tls_start(&self, _server_name: &str) {}

    fn on_tls_done(&self, _result: Result<(), &crate::Error>) {}

    fn on_response(&self, _status: StatusCode, _version: Version) {}

    fn on_body_chunk(&self, _len: usize) {}

    fn on_body_done(&self) {}
}

/// A cloneable [`Recorder`] that turns the hooks into [`Stats`].
#[derive(Debug, Clone, Default)]
pub struct StatsRecorder {
    inner: Arc<Mutex<StatsRecorderInner>>,
}

#[derive(Debug, Default)]
struct StatsRecorderInner {
    start: Option<Instant>,
    dns_start: Option<Instant>,
    tcp_first_start: Option<Instant>,
    tcp_start: Option<Instant>,
    tls_start: Option<Instant>,
    body_start: Option<Instant>,
    stats: Stats,
}

impl StatsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    pub fn finish(&self) -> Stats {
        self.lock().stats.clone()
    }

    fn lock(&self) -> MutexGuard<'_, StatsRecorderInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn since(start: Option<Instant>) -> Duration {
    start.map(|s| s.elapsed()).unwrap_or_default()
}

impl Recorder for StatsRecorder {
    fn on_request_start(&self, _uri: &Uri) {
        let mut inner = self.lock();
        *inner = StatsRecorderInner {
            start: Some(Instant::now()),
            ..Default::default()
        };
    }

    fn on_dns_start(&self, _host: &str) {
        self.lock().dns_start = Some(Instant::now());
    }

    fn on_dns_done(
        &self,
        host: &str,
        overridden: bool,
        result: Result<&[SocketAddr], &crate::Error>,
    ) {
        let mut inner = self.lock();
        let duration = since(inner.dns_start);
        inner.stats.dns = Some(DnsStats {
            host: host.to_string(),
            overridden,
            duration,
            error: result.err().map(|e| e.to_string()),
        });
    }

    fn on_tcp_start(&self, _dest: &SocketAddr) {
        let mut inner = self.lock();
        let now = Instant::now();
        inner.tcp_first_start.get_or_insert(now);
        inner.tcp_start = Some(now);
    }

    fn on_tcp_done(&self, dest: &SocketAddr, stream: Result<&TcpStream, &crate::Error>) {
        let mut inner = self.lock();
        let duration = since(inner.tcp_start);
        let total_duration = since(inner.tcp_first_start);
        let tcp = inner.stats.tcp.get_or_insert_with(TcpStats::default);
        tcp.stats.push(TcpStat {
            dest: dest.to_string(),
            duration,
            error: stream.err().map(|e| e.to_string()),
        });
        tcp.total_duration = total_duration;
    }

    fn on_tls_start(&self, server_name: &str) {
        let mut inner = self.lock();
        inner.tls_start = Some(Instant::now());
        inner.stats.tls = Some(TlsStats {
            server_name: server_name.to_string(),
            ..Default::default()
        });
    }

    fn on_tls_done(&self, result: Result<(), &crate::Error>) {
        let mut inner = self.lock();
        let duration = since(inner.tls_start);
        if let Some(tls) = inner.stats.tls.as_mut() {
            tls.duration = duration;
            tls.error = result.err().map(|e| e.to_string());
        }
    }

    fn on_response(&self, status: StatusCode, version: Version) {
        let mut inner = self.lock();
        let time_to_first_byte = since(inner.start);
        inner.body_start = Some(Instant::now());
        inner.stats.response = Some(ResponseStats {
            status,
            version,
            time_to_first_byte,
        });
    }

    fn on_body_chunk(&self, len: usize) {
        let mut inner = self.lock();
        let body = inner.stats.body.get_or_insert_with(BodyStats::default);
        body.bytes += len as u64;
        body.chunks += 1;
    }

    fn on_body_done(&self) {
        let mut inner = self.lock();
        let duration = since(inner.body_start);
        inner.stats.body.get_or_insert_with(BodyStats::default).duration = duration;
    }
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(dns) = &self.dns {
            write!(f, "dns {}: {:.2}ms", dns.host, millis(dns.duration))?;
            if dns.overridden {
                write!(f, " (override)")?;
            }
            if let Some(err) = &dns.error {
                write!(f, " error: {err}")?;
            }
            writeln!(f)?;
        }
        if let Some(tcp) = &self.tcp {
            for stat in &tcp.stats {
                write!(f, "tcp {}: {:.2}ms", stat.dest, millis(stat.duration))?;
                if let Some(err) = &stat.error {
                    write!(f, " error: {err}")?;
                }
                writeln!(f)?;
            }
        }
        if let Some(tls) = &self.tls {
            write!(f, "tls {}: {:.2}ms", tls.server_name, millis(tls.duration))?;
            if let Some(err) = &tls.error {
                write!(f, " error: {err}")?;
            }
            writeln!(f)?;
        }
        if let Some(res) = &self.response {
            writeln!(
                f,
                "response {} {:?}: first byte after {:.2}ms",
                res.status,
                res.version,
                millis(res.time_to_first_byte)
            )?;
        }
        if let Some(body) = &self.body {
            writeln!(
                f,
                "body: {} bytes in {} chunks, {:.2}ms",
                body.bytes,
                body.chunks,
                millis(body.duration)
            )?;
        }
        Ok(())
    }
}
