//! Echo dialer through the default pool.
use dialpool::{DialerFactory, Options, Pool};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

#[tokio::test]
async fn echo_round_trips() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut pool = Pool::new(DialerFactory::standard());
    pool.bootstrap(&Options::new().with("standard", 1)).unwrap();

    let mut conn = pool.dial(1, "tcp://echo").await.unwrap();

    let mut buf = [0u8; 1024];
    let messages: [&[u8]; 3] = [b"hello", b"world", &[7u8; 512]];
    for message in messages {
        conn.write_all(message).await.unwrap();
        conn.read_exact(&mut buf[..message.len()]).await.unwrap();
        assert_eq!(&buf[..message.len()], message);
    }
}

#[tokio::test]
async fn echo_sessions_are_independent() {
    let mut pool = Pool::new(DialerFactory::standard());
    pool.bootstrap(&Options::new().with("standard", 1)).unwrap();

    let mut first = pool.dial(1, "tcp://echo").await.unwrap();
    let mut second = pool.dial(2, "tcp://echo").await.unwrap();

    first.write_all(b"one").await.unwrap();
    second.write_all(b"two").await.unwrap();

    let mut buf = [0u8; 3];
    second.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"two");
    first.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"one");
}
