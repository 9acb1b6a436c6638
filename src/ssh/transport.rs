// ABOUTME: Byte-stream transports used beneath an SSH handshake.
// ABOUTME: TCP dial, proxy-command pipes, HTTP(S) CONNECT tunnels and SOCKS5.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use http_body_util::Empty;
use hyper_util::rt::TokioIo;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Once};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};

/// Any bidirectional byte stream an SSH session can run over.
pub trait DuplexStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> DuplexStream for T {}

pub type BoxedStream = Box<dyn DuplexStream>;

/// Username and password presented to an HTTP or SOCKS5 proxy.
#[derive(Clone)]
pub struct ProxyCredentials {
    pub user: String,
    pub password: String,
}

impl std::fmt::Debug for ProxyCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyCredentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

pub async fn dial_tcp(addr: &str, port: u16) -> io::Result<BoxedStream> {
    let stream = TcpStream::connect((addr, port)).await?;
    stream.set_nodelay(true)?;
    Ok(Box::new(stream))
}

/// A subprocess whose stdout is read and whose stdin is written.
/// The child is killed when the stream is dropped.
pub struct CommandStream {
    _child: Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
}

impl CommandStream {
    pub fn spawn(command: &str) -> io::Result<Self> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::other("proxy command stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("proxy command stdout unavailable"))?;

        Ok(Self {
            _child: child,
            stdin,
            stdout,
        })
    }
}

impl AsyncRead for CommandStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stdout).poll_read(cx, buf)
    }
}

impl AsyncWrite for CommandStream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().stdin).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stdin).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stdin).poll_shutdown(cx)
    }
}

/// Open an HTTP CONNECT tunnel to `host:port` through a proxy reached over `stream`.
pub async fn http_connect(
    stream: BoxedStream,
    host: &str,
    port: u16,
    credentials: Option<&ProxyCredentials>,
) -> Result<BoxedStream, String> {
    let authority = format!("{host}:{port}");

    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .map_err(|e| format!("HTTP handshake failed: {e}"))?;

    tokio::spawn(async move {
        if let Err(e) = conn.with_upgrades().await {
            tracing::debug!("proxy connection error: {}", e);
        }
    });

    let mut request = hyper::Request::builder()
        .method(hyper::Method::CONNECT)
        .uri(authority.as_str())
        .header(hyper::header::HOST, authority.as_str());

    if let Some(creds) = credentials {
        let token = STANDARD.encode(format!("{}:{}", creds.user, creds.password));
        request = request.header(hyper::header::PROXY_AUTHORIZATION, format!("Basic {token}"));
    }

    let request = request
        .body(Empty::<Bytes>::new())
        .map_err(|e| format!("invalid CONNECT request: {e}"))?;

    let response = sender
        .send_request(request)
        .await
        .map_err(|e| format!("CONNECT request failed: {e}"))?;

    if !response.status().is_success() {
        return Err(format!("proxy answered {}", response.status()));
    }

    let upgraded = hyper::upgrade::on(response)
        .await
        .map_err(|e| format!("tunnel upgrade failed: {e}"))?;

    Ok(Box::new(TokioIo::new(upgraded)))
}

fn tls_config() -> Arc<ClientConfig> {
    static PROVIDER: Once = Once::new();
    PROVIDER.call_once(|| {
        let _ = tokio_rustls::rustls::crypto::ring::default_provider().install_default();
    });

    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    Arc::new(
        ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth(),
    )
}

/// Wrap the stream to an HTTPS proxy in TLS, verifying `server_name`.
pub async fn tls_wrap(stream: BoxedStream, server_name: &str) -> Result<BoxedStream, String> {
    let name = ServerName::try_from(server_name.to_string())
        .map_err(|e| format!("invalid TLS server name {server_name:?}: {e}"))?;
    let tls = TlsConnector::from(tls_config())
        .connect(name, stream)
        .await
        .map_err(|e| format!("TLS handshake failed: {e}"))?;
    Ok(Box::new(tls))
}

/// Ask a SOCKS5 proxy reached over `stream` to connect to `host:port`.
pub async fn socks5_connect(
    stream: BoxedStream,
    host: &str,
    port: u16,
    credentials: Option<&ProxyCredentials>,
) -> Result<BoxedStream, String> {
    let result = match credentials {
        Some(creds) => {
            tokio_socks::tcp::Socks5Stream::connect_with_password_and_socket(
                stream,
                (host, port),
                &creds.user,
                &creds.password,
            )
            .await
        }
        None => tokio_socks::tcp::Socks5Stream::connect_with_socket(stream, (host, port)).await,
    };

    result
        .map(|s| Box::new(s.into_inner()) as BoxedStream)
        .map_err(|e| format!("SOCKS5 negotiation failed: {e}"))
}
