//! Command dialer spawning real shell processes.
#![cfg(unix)]

use dialpool::dialer::cmd::CmdDialer;
use dialpool::stream::process::CTRL_C;
use dialpool::{Dialer, DialerFactory, Options, Pool};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

#[tokio::test]
async fn output_of_command() {
    let _ = tracing_subscriber::fmt::try_init();

    let dialer = CmdDialer::new();
    let mut conn = dialer
        .dial(1, "tcp://cmd?exec=echo%20out%3B%20echo%20err%201%3E%262")
        .await
        .unwrap();

    let mut output = String::new();
    conn.read_to_string(&mut output).await.unwrap();
    assert_eq!(output, "out\nerr\n");
}

#[tokio::test]
async fn stdin_strips_carriage_returns() {
    let dialer = CmdDialer::new();
    let mut conn = dialer.dial(2, "tcp://cmd?exec=cat").await.unwrap();

    conn.write_all(b"hello\r\n").await.unwrap();
    let mut buf = [0u8; 6];
    conn.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"hello\n");
}

#[tokio::test]
async fn ctrl_c_closes() {
    let dialer = CmdDialer::new();
    let mut conn = dialer.dial(3, "tcp://cmd?exec=cat").await.unwrap();

    let err = conn.write_all(CTRL_C).await.unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::BrokenPipe);

    let mut rest = Vec::new();
    let _ = conn.read_to_end(&mut rest).await;
    assert!(rest.is_empty());
}

#[tokio::test]
async fn working_directory() {
    let dir = std::env::temp_dir();
    let dir = dir.canonicalize().unwrap();
    let uri = format!("tcp://cmd?exec=pwd&dir={}", dir.display());

    let mut conn = CmdDialer::new().dial(4, &uri).await.unwrap();
    let mut output = String::new();
    conn.read_to_string(&mut output).await.unwrap();
    assert_eq!(output.trim_end(), dir.display().to_string());
}

#[tokio::test]
async fn pool_dials_unescaped_command() {
    let mut pool = Pool::new(DialerFactory::standard());
    pool.bootstrap(&Options::new().with("standard", 1)).unwrap();

    let mut conn = pool.dial(5, "tcp://cmd?exec=echo hi").await.unwrap();
    let mut output = String::new();
    conn.read_to_string(&mut output).await.unwrap();
    assert_eq!(output, "hi\n");
}

#[tokio::test]
async fn gbk_output_is_decoded() {
    let dialer = CmdDialer::new();
    let mut conn = dialer
        .dial(
            6,
            "tcp://cmd?exec=printf%20%27%5Cxd6%5Cxd0%5Cxce%5Cxc4%27&LC=zh_CN.GBK",
        )
        .await
        .unwrap();

    let mut output = String::new();
    conn.read_to_string(&mut output).await.unwrap();
    assert_eq!(output, "中文");
}

#[tokio::test]
async fn gb18030_round_trip() {
    let dialer = CmdDialer::new();
    let mut conn = dialer
        .dial(7, "tcp://cmd?exec=cat&LC=zh_CN.GB18030")
        .await
        .unwrap();

    conn.write_all("中文\n".as_bytes()).await.unwrap();
    let mut buf = vec![0u8; "中文\n".len()];
    conn.read_exact(&mut buf).await.unwrap();
    assert_eq!(String::from_utf8(buf).unwrap(), "中文\n");
}

#[cfg(feature = "pty")]
#[tokio::test]
async fn interactive_shell_geometry() {
    use std::time::Duration;

    let dialer = CmdDialer::new();
    let mut conn = dialer
        .dial(8, "tcp://cmd?exec=bash&cols=100&rows=40")
        .await
        .unwrap();

    conn.write_all(b"stty size\n").await.unwrap();

    let mut seen = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), async {
        let mut buf = [0u8; 1024];
        while !String::from_utf8_lossy(&seen).contains("40 100") {
            let n = conn.read(&mut buf).await.unwrap();
            assert!(n > 0, "shell closed early");
            seen.extend_from_slice(&buf[..n]);
        }
    })
    .await
    .unwrap();

    let err = conn.write_all(CTRL_C).await.unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::BrokenPipe);
}
