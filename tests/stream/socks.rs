//! SOCKS5 dialer against a minimal in-process proxy.
use std::net::SocketAddr;

use dialpool::dialer::socks::SocksDialer;
use dialpool::{DialError, Dialer, DialerFactory, Options};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Accepts one SOCKS5 CONNECT, records the requested target, then echoes.
async fn proxy(reply: u8) -> (SocketAddr, tokio::task::JoinHandle<(String, u16)>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();

        let mut greeting = [0u8; 3];
        socket.read_exact(&mut greeting).await.unwrap();
        assert_eq!(greeting, [5, 1, 0]);
        socket.write_all(&[5, 0]).await.unwrap();

        let mut head = [0u8; 5];
        socket.read_exact(&mut head).await.unwrap();
        assert_eq!(&head[..4], &[5, 1, 0, 3]);
        let mut host = vec![0u8; head[4] as usize];
        socket.read_exact(&mut host).await.unwrap();
        let port = socket.read_u16().await.unwrap();

        socket
            .write_all(&[5, reply, 0, 3, 4, b'h', b'o', b's', b't', 0, 80])
            .await
            .unwrap();

        if reply == 0 {
            let (mut reader, mut writer) = socket.split();
            let _ = tokio::io::copy(&mut reader, &mut writer).await;
        }
        (String::from_utf8(host).unwrap(), port)
    });
    (addr, handle)
}

#[tokio::test]
async fn tunnels_through_proxy() {
    let _ = tracing_subscriber::fmt::try_init();

    let (addr, handle) = proxy(0).await;
    let dialer = DialerFactory::standard()
        .build(
            Options::new()
                .with("type", "socks")
                .with("address", addr.to_string()),
        )
        .unwrap();
    assert_eq!(dialer.name(), "Socks");

    let mut conn = dialer.dial(1, "tcp://example.com:8443").await.unwrap();
    conn.write_all(b"tunnel").await.unwrap();
    let mut buf = [0u8; 6];
    conn.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"tunnel");

    drop(conn);
    let (host, port) = handle.await.unwrap();
    assert_eq!(host, "example.com");
    assert_eq!(port, 8443);
}

#[tokio::test]
async fn proxy_rejection() {
    let (addr, handle) = proxy(2).await;
    let dialer = SocksDialer::with_address(addr.to_string());

    let err = dialer.dial(1, "tcp://example.com:25").await.unwrap_err();
    assert!(matches!(err, DialError::Socks(_)), "{err}");
    handle.await.unwrap();
}

#[tokio::test]
async fn missing_proxy_address() {
    let dialer = SocksDialer::new();
    let err = dialer.dial(1, "tcp://example.com:25").await.unwrap_err();
    assert!(matches!(err, DialError::Socks(_)), "{err}");
}
