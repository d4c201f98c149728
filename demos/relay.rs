//! A TCP relay which forwards every accepted connection through a dialer pool.
//!
//! The pool is configured from a JSON file, for example:
//!
//! ```json
//! {
//!     "standard": 1,
//!     "dialers": [
//!         {"type": "balance", "id": "b0", "matcher": "^tcp://internal", "timeout": 5000,
//!          "dialers": [{"type": "socks", "address": "127.0.0.1:1080"}, {"type": "tcp"}]}
//!     ]
//! }
//! ```
//!
//! Run with `cargo run --example relay -- config.json 127.0.0.1:9000 tcp://echo`.

use std::sync::Arc;

use clap::arg;
use color_eyre::eyre::WrapErr as _;
use dialpool::{Options, Pool};
use tokio::net::TcpListener;
use tracing::{info, warn, Instrument as _, Level};
use tracing_subscriber::{
    filter::Targets, fmt::format::FmtSpan, layer::SubscriberExt as _, util::SubscriberInitExt as _,
    Layer as _,
};

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let filter = Targets::new()
        .with_target("dialpool", Level::DEBUG)
        .with_target("relay", Level::TRACE)
        .with_default(Level::INFO);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_span_events(FmtSpan::CLOSE)
                .with_filter(filter),
        )
        .init();

    let args = clap::Command::new("relay")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Relay TCP connections through a dialer pool")
        .args([
            arg!(<CONFIG> "Path to the JSON pool configuration"),
            arg!(<LISTEN> "Address to accept connections on"),
            arg!(<TARGET> "Identifier to dial for each connection"),
        ])
        .get_matches();

    let config = args
        .get_one::<String>("CONFIG")
        .expect("config argument is required");
    let listen = args
        .get_one::<String>("LISTEN")
        .expect("listen argument is required");
    let target = args
        .get_one::<String>("TARGET")
        .expect("target argument is required")
        .clone();

    let text = tokio::fs::read_to_string(config)
        .await
        .wrap_err_with(|| format!("reading {config}"))?;
    let mut pool = Pool::default();
    pool.bootstrap(&Options::from_json(&text)?)?;
    info!(dialers = pool.len(), "pool ready");

    let pool = Arc::new(pool);
    let listener = TcpListener::bind(listen).await?;
    info!(addr = %listener.local_addr()?, %target, "relay listening");

    let mut sid = 0u64;
    loop {
        let (inbound, remote) = listener.accept().await?;
        sid += 1;
        let pool = pool.clone();
        let target = target.clone();

        let span = tracing::info_span!("session", sid, %remote);
        tokio::spawn(
            async move {
                let outbound = match pool.dial(sid, &target).await {
                    Ok(conn) => conn,
                    Err(error) => {
                        warn!(%error, "dial failed");
                        return;
                    }
                };
                match dialpool::stream::pipe(inbound, outbound).await {
                    Ok(bytes) => info!(bytes, "session closed"),
                    Err(error) => warn!(%error, "session aborted"),
                }
            }
            .instrument(span),
        );
    }
}
