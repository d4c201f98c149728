//! Load-balanced dialing over a private set of sub-dialers.
//!
//! A [`Balancer`] is a [`Dialer`] which owns other dialers. Each call to
//! [`Dialer::dial`] runs a selection-and-retry loop:
//!
//! 1. The last registered [`Policy`] whose matcher accepts the identifier becomes
//!    the active policy, if any.
//! 2. Without a policy, every sub-dialer is a candidate, least used first. With a
//!    policy, a sub-dialer is a candidate if its usage window has expired (which
//!    resets its count) or if it is still under the policy's quota.
//! 3. Candidates that claim the identifier are tried in order. The first success
//!    is returned. A failure counts against the sub-dialer, and once it reaches
//!    the sub-dialer's own `fail_remove` threshold the sub-dialer is evicted for
//!    good.
//! 4. If no candidate succeeded, sleep for `delay` and start over, until `timeout`
//!    has elapsed since the call began.
//!
//! All shared state lives behind a single lock which is never held while a
//! sub-dialer is connecting or while the loop sleeps.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use regex::Regex;
use tokio::time::Instant;
use tracing::{debug, trace, warn, Instrument as _};

use super::{Dialer, DialerFactory};
use crate::error::{ConfigError, DialError};
use crate::options::Options;
use crate::stream::Conn;
use crate::BoxFuture;

const DEFAULT_TIMEOUT: Duration = Duration::from_millis(60_000);
const DEFAULT_DELAY: Duration = Duration::from_millis(500);

/// Minimum spacing between "still waiting" log lines for one dial call.
const WAITING_LOG_INTERVAL: Duration = Duration::from_secs(3);

/// A rate limit applied to identifiers accepted by `matcher`.
///
/// At most `limit` attempts are started on any one sub-dialer within a window of
/// `window`, measured from the first attempt of that window.
#[derive(Debug, Clone)]
pub struct Policy {
    matcher: Regex,
    window: Duration,
    limit: u64,
}

impl Policy {
    /// Build a policy from a matcher pattern and a `[window_ms, max_count]` pair.
    pub fn new(matcher: &str, limit: &[i64]) -> Result<Self, ConfigError> {
        let (window, count) = match limit {
            [window, count, ..] if *window >= 0 && *count >= 0 => (*window as u64, *count as u64),
            _ => return Err(ConfigError::InvalidLimit(limit.to_vec())),
        };

        Ok(Self {
            matcher: Regex::new(matcher)?,
            window: Duration::from_millis(window),
            limit: count,
        })
    }

    /// The usage window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Maximum attempts per sub-dialer within one window.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    fn matches(&self, uri: &str) -> bool {
        self.matcher.is_match(uri)
    }

    fn expired(&self, usage: &Usage, now: Instant) -> bool {
        usage
            .window_start
            .map_or(true, |start| now.saturating_duration_since(start) > self.window)
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Usage {
    window_start: Option<Instant>,
    active: u64,
    failures: u64,
}

#[derive(Debug)]
struct Slot {
    name: String,
    dialer: Arc<dyn Dialer>,
    usage: Usage,
}

#[derive(Debug, Default)]
struct BalancerState {
    slots: Vec<Slot>,
    policies: Vec<Policy>,
}

impl BalancerState {
    fn insert(&mut self, dialer: Arc<dyn Dialer>) {
        let name = dialer.name().to_owned();
        let slot = Slot {
            name,
            dialer,
            usage: Usage::default(),
        };

        match self.slots.iter_mut().find(|s| s.name == slot.name) {
            Some(existing) => *existing = slot,
            None => self.slots.push(slot),
        }
    }

    fn slot_mut(&mut self, name: &str) -> Option<&mut Slot> {
        self.slots.iter_mut().find(|slot| slot.name == name)
    }

    fn any_matched(&self, uri: &str) -> bool {
        self.slots.iter().any(|slot| slot.dialer.matched(uri))
    }

    /// The last registered policy accepting `uri`.
    fn policy(&self, uri: &str) -> Option<Policy> {
        self.policies
            .iter()
            .rev()
            .find(|policy| policy.matches(uri))
            .cloned()
    }

    /// Names of the sub-dialers eligible this round, least used first.
    ///
    /// Under a policy, an expired window resets the sub-dialer's count here.
    fn candidates(&mut self, policy: Option<&Policy>, now: Instant) -> Vec<String> {
        let mut eligible = Vec::with_capacity(self.slots.len());
        for slot in &mut self.slots {
            if let Some(policy) = policy {
                if policy.expired(&slot.usage, now) {
                    slot.usage.active = 0;
                } else if slot.usage.active >= policy.limit {
                    continue;
                }
            }
            eligible.push((slot.usage.active, slot.name.clone()));
        }

        // stable: ties keep registration order
        eligible.sort_by_key(|(active, _)| *active);
        eligible.into_iter().map(|(_, name)| name).collect()
    }

    /// Claim one attempt on `name`, returning the dialer to use.
    ///
    /// Returns `None` when the sub-dialer has been evicted, does not claim `uri`,
    /// or was pushed over quota by a concurrent caller since selection.
    fn begin(
        &mut self,
        name: &str,
        uri: &str,
        policy: Option<&Policy>,
        now: Instant,
    ) -> Option<Arc<dyn Dialer>> {
        let slot = self.slot_mut(name)?;
        if !slot.dialer.matched(uri) {
            return None;
        }

        if let Some(policy) = policy {
            if !policy.expired(&slot.usage, now) && slot.usage.active >= policy.limit {
                trace!(dialer = name, "over quota since selection");
                return None;
            }
        }

        if slot.usage.active == 0 {
            slot.usage.window_start = Some(now);
        }
        slot.usage.active += 1;
        Some(slot.dialer.clone())
    }

    fn succeeded(&mut self, name: &str) {
        if let Some(slot) = self.slot_mut(name) {
            slot.usage.failures = 0;
        }
    }

    fn failed(&mut self, name: &str) {
        let Some(slot) = self.slot_mut(name) else {
            return;
        };
        slot.usage.failures += 1;

        let threshold = match slot.dialer.options().int_val_or("fail_remove", 0) {
            Ok(threshold) => threshold,
            Err(error) => {
                warn!(dialer = name, %error, "ignoring fail_remove");
                0
            }
        };

        if threshold > 0 && slot.usage.failures >= threshold as u64 {
            debug!(
                dialer = name,
                failures = slot.usage.failures,
                "balancer remove dialer by fail count"
            );
            self.slots.retain(|slot| slot.name != name);
        }
    }
}

/// A dialer which balances connections over a set of sub-dialers.
///
/// Configuration keys:
///
/// | key | meaning |
/// |---|---|
/// | `id` | name of the balancer, required |
/// | `matcher` | regex of identifiers this balancer claims, default all |
/// | `timeout` | retry budget per dial in ms, default 60000 |
/// | `delay` | sleep between rounds in ms, default 500 |
/// | `policy` | list of `{matcher, limit: [window_ms, max_count]}` |
/// | `dialers` | list of sub-dialer records, each with a `type` |
///
/// Each sub-dialer may carry `fail_remove` in its own record: after that many
/// consecutive failures it is evicted. Zero (the default) never evicts.
pub struct Balancer {
    id: String,
    options: Options,
    matcher: Option<Regex>,
    timeout: Duration,
    delay: Duration,
    factory: DialerFactory,
    state: Mutex<BalancerState>,
}

impl fmt::Debug for Balancer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Balancer")
            .field("id", &self.id)
            .field("matcher", &self.matcher.as_ref().map(Regex::as_str))
            .field("timeout", &self.timeout)
            .field("delay", &self.delay)
            .finish()
    }
}

impl Default for Balancer {
    fn default() -> Self {
        Self::new(DialerFactory::standard())
    }
}

impl Balancer {
    /// Create an empty balancer which builds sub-dialers from `factory`.
    pub fn new(factory: DialerFactory) -> Self {
        Self {
            id: String::new(),
            options: Options::new(),
            matcher: None,
            timeout: DEFAULT_TIMEOUT,
            delay: DEFAULT_DELAY,
            factory,
            state: Mutex::new(BalancerState::default()),
        }
    }

    /// Register bootstrapped sub-dialers. A dialer replaces any existing one
    /// with the same name, and starts with zeroed usage.
    pub fn add_dialer<D: Dialer + 'static>(&self, dialer: D) {
        self.add_shared(Arc::new(dialer));
    }

    /// Register a bootstrapped, shared sub-dialer.
    pub fn add_shared(&self, dialer: Arc<dyn Dialer>) {
        self.state.lock().insert(dialer);
    }

    /// Append a rate-limit policy. Later policies take precedence.
    pub fn add_policy(&self, matcher: &str, limit: &[i64]) -> Result<(), ConfigError> {
        let policy = Policy::new(matcher, limit)?;
        self.state.lock().policies.push(policy);
        Ok(())
    }

    /// Names of the sub-dialers still registered.
    pub fn dialer_names(&self) -> Vec<String> {
        self.state
            .lock()
            .slots
            .iter()
            .map(|slot| slot.name.clone())
            .collect()
    }

    /// The retry budget for one dial call.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The sleep between retry rounds.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    async fn dial_balanced(&self, sid: u64, uri: &str) -> Result<Conn, DialError> {
        let begin = Instant::now();
        let mut shown: Option<Instant> = None;

        if !self.state.lock().any_matched(uri) {
            return Err(DialError::NoMatch(uri.to_owned()));
        }

        loop {
            let now = Instant::now();
            if now.duration_since(begin) >= self.timeout {
                debug!("balancer dial timeout");
                return Err(DialError::Timeout(uri.to_owned()));
            }

            let (policy, candidates) = {
                let mut state = self.state.lock();
                let policy = state.policy(uri);
                let candidates = state.candidates(policy.as_ref(), now);
                (policy, candidates)
            };
            trace!(?candidates, policy = policy.is_some(), "balancer round");

            for name in candidates {
                let claimed = self
                    .state
                    .lock()
                    .begin(&name, uri, policy.as_ref(), Instant::now());
                let Some(dialer) = claimed else {
                    continue;
                };

                match dialer.dial(sid, uri).await {
                    Ok(conn) => {
                        self.state.lock().succeeded(&name);
                        trace!(dialer = %name, "balancer dial success");
                        return Ok(conn);
                    }
                    Err(error) => {
                        debug!(dialer = %name, %error, "balancer dial fail");
                        self.state.lock().failed(&name);
                    }
                }
            }

            let now = Instant::now();
            if shown.map_or(true, |at| now.duration_since(at) > WAITING_LOG_INTERVAL) {
                debug!("balancer dial is waiting");
                shown = Some(now);
            }
            tokio::time::sleep(self.delay).await;
        }
    }
}

fn duration_option(options: &Options, key: &str, default: Duration) -> Result<Duration, ConfigError> {
    let millis = options.int_val_or(key, default.as_millis() as i64)?;
    u64::try_from(millis)
        .map(Duration::from_millis)
        .map_err(|_| ConfigError::InvalidOption {
            key: key.to_owned(),
            reason: format!("must not be negative, got {millis}"),
        })
}

impl Dialer for Balancer {
    fn name(&self) -> &str {
        &self.id
    }

    fn bootstrap(&mut self, options: Options) -> Result<(), ConfigError> {
        let id = options.str_val("id");
        if id.is_empty() {
            return Err(ConfigError::MissingId);
        }

        let matcher = match options.str_val("matcher") {
            "" => None,
            pattern => Some(Regex::new(pattern)?),
        };
        let timeout = duration_option(&options, "timeout", DEFAULT_TIMEOUT)?;
        let delay = duration_option(&options, "delay", DEFAULT_DELAY)?;

        let mut policies = Vec::new();
        for policy in options.map_list("policy")? {
            policies.push(Policy::new(
                policy.str_val("matcher"),
                &policy.int_list("limit")?,
            )?);
        }

        let mut dialers = Vec::new();
        for record in options.map_list("dialers")? {
            let dialer = self.factory.build(record)?;
            debug!(balancer = id, dialer = dialer.name(), "balancer add dialer");
            dialers.push(dialer);
        }

        self.id = id.to_owned();
        self.matcher = matcher;
        self.timeout = timeout;
        self.delay = delay;

        let state = self.state.get_mut();
        state.policies.extend(policies);
        for dialer in dialers {
            state.insert(dialer);
        }

        self.options = options;
        Ok(())
    }

    fn options(&self) -> &Options {
        &self.options
    }

    fn matched(&self, uri: &str) -> bool {
        self.matcher
            .as_ref()
            .map_or(true, |matcher| matcher.is_match(uri))
    }

    fn dial<'a>(&'a self, sid: u64, uri: &'a str) -> BoxFuture<'a, Result<Conn, DialError>> {
        let span = tracing::debug_span!("balance", id = %self.id, sid, uri);
        Box::pin(self.dial_balanced(sid, uri).instrument(span))
    }
}
