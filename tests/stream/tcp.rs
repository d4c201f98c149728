//! TCP dialer against a local listener.
use std::net::SocketAddr;

use dialpool::dialer::tcp::TcpDialer;
use dialpool::{stream, DialError, Dialer};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

async fn echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = socket.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });
    addr
}

#[tokio::test]
async fn connects_and_echoes() {
    let _ = tracing_subscriber::fmt::try_init();

    let addr = echo_server().await;
    let dialer = TcpDialer::new();

    let uri = format!("tcp://{addr}");
    assert!(dialer.matched(&uri));
    let mut conn = dialer.dial(1, &uri).await.unwrap();
    assert_eq!(conn.as_tcp().unwrap().peer_addr().unwrap(), addr);

    conn.write_all(b"hello").await.unwrap();
    let mut buf = [0u8; 5];
    conn.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"hello");
}

#[tokio::test]
async fn http_scheme_with_port_and_bind() {
    let addr = echo_server().await;
    let dialer = TcpDialer::new();

    let uri = format!("http://127.0.0.1:{}?bind=127.0.0.1:0", addr.port());
    let conn = dialer.dial(2, &uri).await.unwrap();
    let local = conn.as_tcp().unwrap().local_addr().unwrap();
    assert!(local.ip().is_loopback());
}

#[tokio::test]
async fn refused_connection_is_io_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = TcpDialer::new()
        .dial(3, &format!("tcp://{addr}"))
        .await
        .unwrap_err();
    assert!(matches!(err, DialError::Io(_)), "{err}");
}

#[tokio::test]
async fn pipe_relays_through_dialed_stream() {
    let addr = echo_server().await;
    let upstream = TcpDialer::new()
        .dial(4, &format!("tcp://{addr}"))
        .await
        .unwrap();

    let (client, relay_end) = tokio::io::duplex(1024);
    let relay = tokio::spawn(stream::pipe(relay_end, upstream));

    let (mut reader, mut writer) = tokio::io::split(client);
    writer.write_all(b"through the relay").await.unwrap();
    let mut buf = [0u8; 17];
    reader.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"through the relay");

    drop(writer);
    drop(reader);
    relay.await.unwrap().unwrap();
}
