use std::future::Future;
use std::io;
use std::net::{SocketAddr, SocketAddrV4};
use std::net::Ipv4Addr;
use std::pin::Pin;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time;

use crate::types::{outcome, Protocol};

/// One unit of work handed to the executor: test whether `address:port`
/// relays a request for `target_url` over `protocol`.
#[derive(Debug, Clone)]
pub struct ProbeRequest {
    pub address: Ipv4Addr,
    pub port: u16,
    pub protocol: Protocol,
    pub target_url: String,
    pub timeout: Duration,
}

/// What came back from one probe. Always produced, never an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReply {
    pub code: i32,
    pub message: String,
}

impl ProbeReply {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(outcome::CANCELLED, "probe cancelled")
    }
}

pub type ProbeFuture = Pin<Box<dyn Future<Output = ProbeReply> + Send>>;

/// The probe capability the scheduler consumes: one timed network check per
/// invocation, stateless across invocations.
///
/// Implementations enforce `req.timeout` themselves and resolve to exactly
/// one reply; the scheduler does not police wall-clock time on top.
pub trait ProbeExecutor: Send + Sync + 'static {
    fn probe(&self, req: ProbeRequest) -> ProbeFuture;
}

/// Production executor: performs the actual relay attempt over TCP.
///
/// - HTTP: absolute-URI GET through the candidate, any valid status line
///   counts as a relay.
/// - HTTPS: CONNECT tunnel, then a TLS handshake to the target through it.
/// - SOCKS4/SOCKS5: handshake (hostname addressing, no local DNS), then the
///   test request through the tunnel.
#[derive(Debug, Default)]
pub struct RelayProbe;

impl RelayProbe {
    pub fn new() -> Self {
        Self
    }
}

impl ProbeExecutor for RelayProbe {
    fn probe(&self, req: ProbeRequest) -> ProbeFuture {
        Box::pin(async move {
            match time::timeout(req.timeout, attempt_relay(&req)).await {
                Ok(reply) => reply,
                Err(_) => ProbeReply::new(
                    outcome::TIMED_OUT,
                    format!("no reply within {}ms", req.timeout.as_millis()),
                ),
            }
        })
    }
}

async fn attempt_relay(req: &ProbeRequest) -> ProbeReply {
    match relay_once(req).await {
        Ok(reply) => reply,
        Err(e) => classify_io_error(&e),
    }
}

async fn relay_once(req: &ProbeRequest) -> io::Result<ProbeReply> {
    let target = match TargetUrl::parse(&req.target_url) {
        Some(t) => t,
        None => {
            return Ok(ProbeReply::new(
                outcome::PROTOCOL_ERROR,
                format!("invalid target url: {}", req.target_url),
            ))
        }
    };

    let addr = SocketAddr::V4(SocketAddrV4::new(req.address, req.port));
    let mut stream = TcpStream::connect(addr).await?;

    match req.protocol {
        Protocol::Http => {
            let request = format!(
                "GET {} HTTP/1.1\r\nHost: {}\r\nUser-Agent: proxy-scan-rs\r\nConnection: close\r\nProxy-Connection: close\r\n\r\n",
                target.absolute, target.host_header()
            );
            stream.write_all(request.as_bytes()).await?;
            classify_http_head(&read_head(&mut stream).await?)
        }
        Protocol::Https => {
            let connect = format!(
                "CONNECT {0}:{1} HTTP/1.1\r\nHost: {0}:{1}\r\n\r\n",
                target.host, target.port
            );
            stream.write_all(connect.as_bytes()).await?;
            let head = read_head(&mut stream).await?;
            if !connect_granted(&head) {
                return Ok(ProbeReply::new(
                    outcome::PROXY_REFUSED,
                    format!("CONNECT refused: {}", first_line(&head)),
                ));
            }
            tls_handshake(stream, &target.host).await
        }
        Protocol::Socks4 => {
            let granted = socks4_handshake(&mut stream, &target).await?;
            if granted.code != outcome::OK {
                return Ok(granted);
            }
            tunnel_request(stream, &target).await
        }
        Protocol::Socks5 => {
            let granted = socks5_handshake(&mut stream, &target).await?;
            if granted.code != outcome::OK {
                return Ok(granted);
            }
            tunnel_request(stream, &target).await
        }
    }
}

/// Test-request target, split out of the configured URL.
#[derive(Debug, Clone)]
struct TargetUrl {
    host: String,
    port: u16,
    path: String,
    tls: bool,
    absolute: String,
}

impl TargetUrl {
    fn parse(url: &str) -> Option<Self> {
        let url = url.trim();
        let (tls, rest) = if let Some(rest) = url.strip_prefix("https://") {
            (true, rest)
        } else if let Some(rest) = url.strip_prefix("http://") {
            (false, rest)
        } else {
            (false, url)
        };

        let (hostport, path) = match rest.find('/') {
            Some(i) => (&rest[..i], rest[i..].to_string()),
            None => (rest, "/".to_string()),
        };
        let (host, port) = match hostport.split_once(':') {
            Some((h, p)) => (h, p.parse().ok()?),
            None => (hostport, if tls { 443 } else { 80 }),
        };
        if host.is_empty() {
            return None;
        }

        let scheme = if tls { "https" } else { "http" };
        let absolute = format!("{scheme}://{hostport}{path}");
        Some(Self {
            host: host.to_string(),
            port,
            path,
            tls,
            absolute,
        })
    }

    fn host_header(&self) -> String {
        let default = if self.tls { 443 } else { 80 };
        if self.port == default {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// After a SOCKS tunnel is granted, actually push the test request through
/// it: a TLS handshake for https targets, a plain origin-form GET otherwise.
async fn tunnel_request(mut stream: TcpStream, target: &TargetUrl) -> io::Result<ProbeReply> {
    if target.tls {
        return tls_handshake(stream, &target.host).await;
    }
    let request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nUser-Agent: proxy-scan-rs\r\nConnection: close\r\n\r\n",
        target.path,
        target.host_header()
    );
    stream.write_all(request.as_bytes()).await?;
    classify_http_head(&read_head(&mut stream).await?)
}

async fn tls_handshake(stream: TcpStream, host: &str) -> io::Result<ProbeReply> {
    let connector = native_tls::TlsConnector::new().map_err(io::Error::other)?;
    let connector = tokio_native_tls::TlsConnector::from(connector);
    match connector.connect(host, stream).await {
        Ok(_tls) => Ok(ProbeReply::new(
            outcome::OK,
            format!("TLS handshake with {host} completed through proxy"),
        )),
        Err(e) => Ok(ProbeReply::new(
            outcome::PROTOCOL_ERROR,
            format!("TLS handshake failed: {e}"),
        )),
    }
}

/// SOCKS4a CONNECT with hostname addressing (no DNS on our side).
async fn socks4_handshake(stream: &mut TcpStream, target: &TargetUrl) -> io::Result<ProbeReply> {
    let mut req = vec![0x04, 0x01];
    req.extend_from_slice(&target.port.to_be_bytes());
    // 0.0.0.1 signals "hostname follows" per SOCKS4a
    req.extend_from_slice(&[0, 0, 0, 1]);
    req.push(0x00); // empty user id
    req.extend_from_slice(target.host.as_bytes());
    req.push(0x00);
    stream.write_all(&req).await?;

    let mut reply = [0u8; 8];
    stream.read_exact(&mut reply).await?;
    match reply[1] {
        0x5A => Ok(ProbeReply::new(outcome::OK, "SOCKS4 request granted")),
        code => Ok(ProbeReply::new(
            outcome::PROXY_REFUSED,
            format!("SOCKS4 request rejected (0x{code:02X})"),
        )),
    }
}

/// SOCKS5 no-auth negotiation plus a CONNECT command, domain addressing.
async fn socks5_handshake(stream: &mut TcpStream, target: &TargetUrl) -> io::Result<ProbeReply> {
    stream.write_all(&[0x05, 0x01, 0x00]).await?;
    let mut method = [0u8; 2];
    stream.read_exact(&mut method).await?;
    if method[0] != 0x05 {
        return Ok(ProbeReply::new(
            outcome::PROTOCOL_ERROR,
            format!("unexpected SOCKS version 0x{:02X}", method[0]),
        ));
    }
    if method[1] != 0x00 {
        return Ok(ProbeReply::new(
            outcome::PROXY_REFUSED,
            "SOCKS5 proxy requires authentication",
        ));
    }

    if target.host.len() > 255 {
        return Ok(ProbeReply::new(
            outcome::PROTOCOL_ERROR,
            "target hostname too long for SOCKS5",
        ));
    }
    let mut req = vec![0x05, 0x01, 0x00, 0x03, target.host.len() as u8];
    req.extend_from_slice(target.host.as_bytes());
    req.extend_from_slice(&target.port.to_be_bytes());
    stream.write_all(&req).await?;

    let mut head = [0u8; 4];
    stream.read_exact(&mut head).await?;
    if head[1] != 0x00 {
        return Ok(ProbeReply::new(
            outcome::PROXY_REFUSED,
            format!("SOCKS5 connect failed (rep 0x{:02X})", head[1]),
        ));
    }
    // Drain the bound address so the tunnel starts at a clean offset.
    let addr_len = match head[3] {
        0x01 => 4usize,
        0x03 => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            len[0] as usize
        }
        0x04 => 16,
        other => {
            return Ok(ProbeReply::new(
                outcome::PROTOCOL_ERROR,
                format!("unknown SOCKS5 address type 0x{other:02X}"),
            ))
        }
    };
    let mut rest = vec![0u8; addr_len + 2];
    stream.read_exact(&mut rest).await?;
    Ok(ProbeReply::new(outcome::OK, "SOCKS5 connect granted"))
}

/// Read the start of a reply: enough for a status line, bounded at 1 KiB.
async fn read_head<S: AsyncRead + Unpin>(stream: &mut S) -> io::Result<String> {
    let mut buf = Vec::with_capacity(512);
    let mut chunk = [0u8; 256];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(2).any(|w| w == b"\r\n") || buf.len() >= 1024 {
            break;
        }
    }
    Ok(String::from_utf8_lossy(&buf).to_string())
}

fn classify_http_head(head: &str) -> io::Result<ProbeReply> {
    if head.is_empty() {
        return Ok(ProbeReply::new(
            outcome::REMOTE_HOST_CLOSED,
            "connection closed before any reply",
        ));
    }
    let line = first_line(head);
    if line.starts_with("HTTP/") {
        Ok(ProbeReply::new(outcome::OK, line))
    } else {
        Ok(ProbeReply::new(
            outcome::PROTOCOL_ERROR,
            format!("not an HTTP reply: {}", snippet(line, 60)),
        ))
    }
}

fn connect_granted(head: &str) -> bool {
    let line = first_line(head);
    let mut parts = line.split_whitespace();
    matches!(
        (parts.next(), parts.next()),
        (Some(v), Some(status)) if v.starts_with("HTTP/") && status.starts_with('2')
    )
}

fn first_line(s: &str) -> String {
    s.lines().next().unwrap_or("").trim().to_string()
}

fn snippet(s: String, max: usize) -> String {
    let mut s = s;
    if s.len() > max {
        s.truncate(max);
    }
    s
}

fn classify_io_error(e: &io::Error) -> ProbeReply {
    match e.kind() {
        io::ErrorKind::ConnectionRefused => {
            ProbeReply::new(outcome::CONNECTION_REFUSED, "connection refused")
        }
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::UnexpectedEof => ProbeReply::new(
            outcome::REMOTE_HOST_CLOSED,
            format!("connection closed: {e}"),
        ),
        io::ErrorKind::TimedOut => ProbeReply::new(outcome::TIMED_OUT, "connect timed out"),
        _ => ProbeReply::new(outcome::IO_ERROR, e.to_string()),
    }
}
