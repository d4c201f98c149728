//! Balancer behavior against scripted mock dialers.
use std::sync::Arc;
use std::time::Duration;

use dialpool::dialer::mock::{MockDialer, MockLog};
use dialpool::{Balancer, ConfigError, DialError, Dialer, DialerFactory, Options};
use serde_json::json;
use tokio::time::Instant;

fn balancer(log: &MockLog, config: serde_json::Value) -> Balancer {
    let mut balancer = Balancer::new(log.factory());
    balancer
        .bootstrap(Options::try_from(config).unwrap())
        .unwrap();
    balancer
}

fn mocks(ids: &[&str], extra: serde_json::Value) -> serde_json::Value {
    ids.iter()
        .map(|id| {
            let mut record = json!({"id": id, "type": "mock"});
            if let (Some(record), Some(extra)) = (record.as_object_mut(), extra.as_object()) {
                record.extend(extra.clone());
            }
            record
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn each_dialer_once_then_timeout() {
    let _ = tracing_subscriber::fmt::try_init();

    let log = MockLog::default();
    let balancer = balancer(
        &log,
        json!({
            "id": "t1",
            "matcher": ".*",
            "timeout": 500,
            "delay": 100,
            "dialers": mocks(&["i0", "i1", "i2"], json!({"uri": "once", "succeed": 1, "fail_remove": 1})),
        }),
    );

    let start = Instant::now();
    let err = balancer.dial(4, "not").await.unwrap_err();
    assert!(matches!(err, DialError::NoMatch(_)));
    assert!(start.elapsed() < Duration::from_millis(100));

    for sid in 0..3 {
        balancer.dial(sid, "once").await.unwrap();
    }
    for id in ["i0", "i1", "i2"] {
        assert_eq!(log.successes(id), 1, "{id}");
    }

    let start = Instant::now();
    let err = balancer.dial(4, "once").await.unwrap_err();
    let elapsed = start.elapsed();
    assert!(err.is_timeout(), "{err}");
    assert!(elapsed >= Duration::from_millis(500), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(600), "{elapsed:?}");

    assert!(balancer.dialer_names().is_empty());
    assert_eq!(log.total(), 6);
}

#[tokio::test(start_paused = true)]
async fn policy_spaces_attempts() {
    let _ = tracing_subscriber::fmt::try_init();

    let log = MockLog::default();
    let balancer = balancer(
        &log,
        json!({
            "id": "t1",
            "timeout": 1000,
            "delay": 100,
            "dialers": mocks(&["i0", "i1", "i2"], json!({"uri": "time"})),
            "policy": [{"matcher": ".*", "limit": [110, 1]}],
        }),
    );

    for sid in 0..10 {
        balancer.dial(sid, "time").await.unwrap();
    }

    for id in ["i0", "i1", "i2"] {
        let attempts = log.attempts(id);
        assert!(!attempts.is_empty());
        for pair in attempts.windows(2) {
            let gap = pair[1].at.duration_since(pair[0].at);
            assert!(gap > Duration::from_millis(110), "{id}: {gap:?}");
        }
    }
    assert_eq!(log.total(), 10);
}

#[tokio::test(start_paused = true)]
async fn policy_quota_per_window() {
    let log = MockLog::default();
    let balancer = balancer(
        &log,
        json!({
            "id": "quota",
            "timeout": 5000,
            "delay": 100,
            "dialers": mocks(&["only"], json!({})),
            "policy": [{"matcher": "^tcp://", "limit": [1000, 2]}],
        }),
    );

    for sid in 0..6 {
        balancer.dial(sid, "tcp://limited:1").await.unwrap();
    }

    let attempts = log.attempts("only");
    assert_eq!(attempts.len(), 6);
    for triple in attempts.windows(3) {
        let span = triple[2].at.duration_since(triple[0].at);
        assert!(span > Duration::from_millis(1000), "{span:?}");
    }
}

#[tokio::test(start_paused = true)]
async fn later_policy_overrides_earlier() {
    let log = MockLog::default();
    let balancer = balancer(
        &log,
        json!({
            "id": "override",
            "timeout": 5000,
            "delay": 100,
            "dialers": mocks(&["only"], json!({})),
            "policy": [
                {"matcher": ".*", "limit": [1000, 1]},
                {"matcher": "^fast$", "limit": [1000, 100]},
            ],
        }),
    );

    let start = Instant::now();
    for sid in 0..5 {
        balancer.dial(sid, "fast").await.unwrap();
    }
    assert!(start.elapsed() < Duration::from_millis(100));

    // a different identifier falls back to the catch-all policy, and shares
    // the dialer's usage window
    let held = tokio::time::timeout(Duration::from_millis(500), balancer.dial(9, "slow")).await;
    assert!(held.is_err(), "catch-all policy should hold the dial back");
}

#[tokio::test]
async fn least_used_spreads_load() {
    let log = MockLog::default();
    let balancer = balancer(
        &log,
        json!({"id": "spread", "dialers": mocks(&["a", "b"], json!({}))}),
    );

    for sid in 0..10u64 {
        balancer.dial(sid, "tcp://anywhere:1").await.unwrap();
        let (a, b) = (log.calls("a"), log.calls("b"));
        assert!(a.abs_diff(b) <= 1, "after {} calls: a={a} b={b}", sid + 1);
        if sid % 2 == 1 {
            assert_eq!(a, b);
        }
    }
}

#[tokio::test]
async fn failing_dialer_is_evicted() {
    let log = MockLog::default();
    let balancer = Balancer::new(DialerFactory::empty());
    balancer.add_dialer(MockDialer::failing("a", 3, log.clone()));
    balancer.add_dialer(MockDialer::always("b", log.clone()));

    for sid in 0..10 {
        balancer.dial(sid, "tcp://anywhere:1").await.unwrap();
    }

    assert_eq!(log.calls("a"), 3);
    assert_eq!(log.successes("b"), 10);
    assert_eq!(balancer.dialer_names(), vec!["b".to_owned()]);
}

#[tokio::test(start_paused = true)]
async fn timeout_bounds_retry_rounds() {
    let log = MockLog::default();
    let balancer = balancer(
        &log,
        json!({
            "id": "down",
            "timeout": 500,
            "delay": 100,
            "dialers": mocks(&["down"], json!({"succeed": 0})),
        }),
    );

    let start = Instant::now();
    let err = balancer.dial(1, "tcp://down:1").await.unwrap_err();
    let elapsed = start.elapsed();

    assert!(err.is_timeout());
    assert_eq!(err.to_string(), "dial to tcp://down:1 timeout");
    assert!(elapsed >= Duration::from_millis(500));
    assert!(elapsed < Duration::from_millis(600));
    assert_eq!(log.calls("down"), 5);
    assert_eq!(balancer.dialer_names(), vec!["down".to_owned()]);
}

#[tokio::test(start_paused = true)]
async fn slow_dial_does_not_block_others() {
    let log = MockLog::default();
    let balancer = Arc::new(Balancer::new(DialerFactory::empty()));
    balancer.add_dialer(MockDialer::bootstrapped(
        Options::new().with("id", "slow").with("latency", 1000),
        log.clone(),
    ));
    balancer.add_dialer(MockDialer::always("fast", log.clone()));

    let slow = {
        let balancer = balancer.clone();
        tokio::spawn(async move { balancer.dial(1, "tcp://x:1").await.map(|_| ()) })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    let start = Instant::now();
    balancer.dial(2, "tcp://x:1").await.unwrap();
    assert!(start.elapsed() < Duration::from_millis(1000));
    assert_eq!(log.attempts("fast")[0].sid, 2);

    slow.await.unwrap().unwrap();
    assert_eq!(log.attempts("slow")[0].sid, 1);
}

#[test]
fn bootstrap_errors() {
    let log = MockLog::default();

    let mut balancer = Balancer::new(log.factory());
    assert!(matches!(
        balancer.bootstrap(Options::new()),
        Err(ConfigError::MissingId)
    ));
    assert!(balancer.dialer_names().is_empty());

    let cases = [
        json!({"id": "t0", "matcher": "["}),
        json!({"id": "t0", "policy": [{"matcher": "[", "limit": []}]}),
        json!({"id": "t0", "policy": [{"matcher": ".*", "limit": [100]}]}),
        json!({"id": "t0", "dialers": [{"type": "xx"}]}),
        json!({"id": "t0", "dialers": [{"type": "balance"}]}),
        json!({"id": "t0", "dialers": [{"type": "mock", "id": "m0"}, {"type": "mock"}]}),
    ];
    for config in cases {
        let mut balancer = Balancer::new(log.factory());
        let result = balancer.bootstrap(Options::try_from(config.clone()).unwrap());
        assert!(result.is_err(), "{config}");
        assert!(balancer.dialer_names().is_empty(), "{config}");
    }

    let balancer = Balancer::new(log.factory());
    assert!(matches!(
        balancer.add_policy(".*", &[]),
        Err(ConfigError::InvalidLimit(_))
    ));
    assert!(matches!(
        balancer.add_policy("[.*", &[1, 1]),
        Err(ConfigError::InvalidMatcher(_))
    ));
    balancer.add_policy(".*", &[100, 1]).unwrap();
}

#[tokio::test(start_paused = true)]
async fn nested_balancers() {
    let log = MockLog::default();
    let outer = balancer(
        &log,
        json!({
            "id": "outer",
            "timeout": 300,
            "delay": 100,
            "dialers": [
                {
                    "type": "balance",
                    "id": "inner",
                    "timeout": 100,
                    "delay": 50,
                    "fail_remove": 1,
                    "dialers": mocks(&["dead"], json!({"succeed": 0})),
                },
                {"type": "mock", "id": "live"},
            ],
        }),
    );

    assert_eq!(outer.dialer_names(), vec!["inner".to_owned(), "live".to_owned()]);

    outer.dial(1, "tcp://x:1").await.unwrap();
    // the inner balancer timed out once, and was evicted by its own fail_remove
    assert_eq!(outer.dialer_names(), vec!["live".to_owned()]);
    assert_eq!(log.successes("live"), 1);
}
