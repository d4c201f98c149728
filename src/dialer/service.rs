//! [`tower::Service`] adapter for dialers and pools.
//!
//! This lets a dialer or a [`Pool`] sit at the bottom of a tower stack, so that
//! generic middleware (timeouts, concurrency limits, buffering) can wrap dialing.
//!
//! ```no_run
//! # use dialpool::dialer::service::{DialRequest, DialerService};
//! # use dialpool::Pool;
//! # use tower::ServiceExt as _;
//! # async fn run() {
//! let service = DialerService::from(Pool::default());
//! let conn = service.oneshot(DialRequest::new(1, "tcp://echo")).await.unwrap();
//! # drop(conn);
//! # }
//! ```

use std::sync::Arc;
use std::task::{Context, Poll};

use super::pool::Pool;
use super::Dialer;
use crate::error::DialError;
use crate::stream::Conn;
use crate::BoxFuture;

/// A single dial request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialRequest {
    /// Caller-supplied session id, passed through to the dialer.
    pub sid: u64,
    /// Destination identifier.
    pub uri: String,
}

impl DialRequest {
    /// Create a new request.
    pub fn new<S: Into<String>>(sid: u64, uri: S) -> Self {
        Self {
            sid,
            uri: uri.into(),
        }
    }
}

#[derive(Debug, Clone)]
enum Target {
    Dialer(Arc<dyn Dialer>),
    Pool(Arc<Pool>),
}

/// A [`tower::Service`] which dials each request.
#[derive(Debug, Clone)]
pub struct DialerService {
    target: Target,
}

impl DialerService {
    /// Serve requests with a single dialer.
    pub fn new(dialer: Arc<dyn Dialer>) -> Self {
        Self {
            target: Target::Dialer(dialer),
        }
    }
}

impl From<Pool> for DialerService {
    fn from(pool: Pool) -> Self {
        Self {
            target: Target::Pool(Arc::new(pool)),
        }
    }
}

impl From<Arc<Pool>> for DialerService {
    fn from(pool: Arc<Pool>) -> Self {
        Self {
            target: Target::Pool(pool),
        }
    }
}

impl tower::Service<DialRequest> for DialerService {
    type Response = Conn;
    type Error = DialError;
    type Future = BoxFuture<'static, Result<Conn, DialError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: DialRequest) -> Self::Future {
        let target = self.target.clone();
        Box::pin(async move {
            match target {
                Target::Dialer(dialer) => dialer.dial(req.sid, &req.uri).await,
                Target::Pool(pool) => pool.dial(req.sid, &req.uri).await,
            }
        })
    }
}
