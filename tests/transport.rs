// ABOUTME: Integration tests for the raw transports used to reach the first SSH hop.
// ABOUTME: Exercises HTTP CONNECT and SOCKS5 tunnels against local fake proxies, plus command streams.

mod support;

use herd::ssh::transport::{
    BoxedStream, CommandStream, ProxyCredentials, dial_tcp, http_connect, socks5_connect,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

async fn round_trip(mut stream: BoxedStream, payload: &[u8]) -> Vec<u8> {
    stream.write_all(payload).await.unwrap();
    stream.flush().await.unwrap();
    let mut buf = vec![0u8; payload.len()];
    stream.read_exact(&mut buf).await.unwrap();
    buf
}

fn credentials() -> ProxyCredentials {
    ProxyCredentials {
        user: "alice".to_string(),
        password: "s3cret".to_string(),
    }
}

mod http {
    use super::*;

    #[tokio::test]
    async fn connect_tunnel_carries_bytes() {
        support::init_tracing();
        let (port, server) = support::proxy_server::http_proxy(200).await;

        let stream = dial_tcp("127.0.0.1", port).await.unwrap();
        let tunnel = http_connect(stream, "db.internal", 22, None).await.unwrap();
        assert_eq!(round_trip(tunnel, b"SSH-2.0-test\r\n").await, b"SSH-2.0-test\r\n");

        let request = server.await.unwrap();
        assert!(request.head.starts_with("connect db.internal:22 http/1.1"));
        assert!(!request.head.contains("proxy-authorization"));
    }

    #[tokio::test]
    async fn credentials_use_basic_auth() {
        let (port, server) = support::proxy_server::http_proxy(200).await;

        let stream = dial_tcp("127.0.0.1", port).await.unwrap();
        let tunnel = http_connect(stream, "db.internal", 2222, Some(&credentials()))
            .await
            .unwrap();
        drop(tunnel);

        let request = server.await.unwrap();
        // base64("alice:s3cret")
        assert!(
            request
                .head
                .contains("proxy-authorization: basic ywxpy2u6cznjcmv0")
        );
    }

    #[tokio::test]
    async fn refused_connect_is_an_error() {
        let (port, server) = support::proxy_server::http_proxy(407).await;

        let stream = dial_tcp("127.0.0.1", port).await.unwrap();
        let err = http_connect(stream, "db.internal", 22, None)
            .await
            .err()
            .unwrap();
        assert!(err.contains("407"), "unexpected error: {err}");

        server.await.unwrap();
    }
}

mod socks5 {
    use super::*;
    use support::proxy_server::SocksRequest;

    #[tokio::test]
    async fn tunnel_requests_target_by_name() {
        support::init_tracing();
        let (port, server) = support::proxy_server::socks5_proxy().await;

        let stream = dial_tcp("127.0.0.1", port).await.unwrap();
        let tunnel = socks5_connect(stream, "db.internal", 22, None).await.unwrap();
        assert_eq!(round_trip(tunnel, b"hello").await, b"hello");

        assert_eq!(
            server.await.unwrap(),
            SocksRequest {
                target: "db.internal".to_string(),
                port: 22,
                credentials: None,
            }
        );
    }

    #[tokio::test]
    async fn tunnel_authenticates_with_password() {
        let (port, server) = support::proxy_server::socks5_proxy().await;

        let stream = dial_tcp("127.0.0.1", port).await.unwrap();
        let tunnel = socks5_connect(stream, "db.internal", 2200, Some(&credentials()))
            .await
            .unwrap();
        drop(tunnel);

        let seen = server.await.unwrap();
        assert_eq!(seen.port, 2200);
        assert_eq!(
            seen.credentials,
            Some(("alice".to_string(), "s3cret".to_string()))
        );
    }
}

mod command {
    use super::*;

    #[tokio::test]
    async fn subprocess_stdio_is_the_stream() {
        let stream = CommandStream::spawn("cat").unwrap();
        assert_eq!(round_trip(Box::new(stream), b"through cat\n").await, b"through cat\n");
    }

    #[test]
    fn credentials_debug_hides_password() {
        let shown = format!("{:?}", credentials());
        assert!(shown.contains("alice"));
        assert!(!shown.contains("s3cret"));
    }
}
