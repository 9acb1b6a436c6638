// ABOUTME: Minimal HTTP CONNECT and SOCKS5 proxies for transport tests.
// ABOUTME: Each accepts one client, records the handshake, then echoes the tunnel.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

async fn echo(mut stream: TcpStream) {
    let (mut reader, mut writer) = stream.split();
    let _ = tokio::io::copy(&mut reader, &mut writer).await;
}

/// What the HTTP proxy saw before answering.
pub struct ConnectRequest {
    /// Request head, lowercased.
    pub head: String,
}

/// Answer every CONNECT with `status`; echo the tunnel when it is 200.
pub async fn http_proxy(status: u16) -> (u16, JoinHandle<ConnectRequest>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();

        let mut head = Vec::new();
        let mut byte = [0u8; 1];
        while !head.ends_with(b"\r\n\r\n") {
            if stream.read(&mut byte).await.unwrap() == 0 {
                break;
            }
            head.push(byte[0]);
        }

        let response = if status == 200 {
            "HTTP/1.1 200 Connection established\r\n\r\n".to_string()
        } else {
            format!("HTTP/1.1 {status} Denied\r\ncontent-length: 0\r\n\r\n")
        };
        stream.write_all(response.as_bytes()).await.unwrap();

        let request = ConnectRequest {
            head: String::from_utf8_lossy(&head).to_lowercase(),
        };
        if status == 200 {
            echo(stream).await;
        }
        request
    });

    (port, handle)
}

/// What the SOCKS5 proxy was asked for.
#[derive(Debug, PartialEq, Eq)]
pub struct SocksRequest {
    pub target: String,
    pub port: u16,
    pub credentials: Option<(String, String)>,
}

async fn read_string(stream: &mut TcpStream) -> String {
    let len = stream.read_u8().await.unwrap() as usize;
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await.unwrap();
    String::from_utf8_lossy(&buf).into_owned()
}

/// SOCKS5 server accepting "no auth" and username/password.
pub async fn socks5_proxy() -> (u16, JoinHandle<SocksRequest>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();

        assert_eq!(stream.read_u8().await.unwrap(), 5);
        let count = stream.read_u8().await.unwrap() as usize;
        let mut methods = vec![0u8; count];
        stream.read_exact(&mut methods).await.unwrap();

        let credentials = if methods.contains(&2) {
            stream.write_all(&[5, 2]).await.unwrap();
            assert_eq!(stream.read_u8().await.unwrap(), 1);
            let user = read_string(&mut stream).await;
            let password = read_string(&mut stream).await;
            stream.write_all(&[1, 0]).await.unwrap();
            Some((user, password))
        } else {
            stream.write_all(&[5, 0]).await.unwrap();
            None
        };

        let mut request = [0u8; 4];
        stream.read_exact(&mut request).await.unwrap();
        let target = match request[3] {
            1 => {
                let mut octets = [0u8; 4];
                stream.read_exact(&mut octets).await.unwrap();
                std::net::Ipv4Addr::from(octets).to_string()
            }
            3 => read_string(&mut stream).await,
            other => panic!("unexpected address type {other}"),
        };
        let port = stream.read_u16().await.unwrap();

        stream
            .write_all(&[5, 0, 0, 1, 127, 0, 0, 1, 0, 0])
            .await
            .unwrap();

        let seen = SocksRequest {
            target,
            port,
            credentials,
        };
        echo(stream).await;
        seen
    });

    (port, handle)
}
