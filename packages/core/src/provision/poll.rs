//! Bounded readiness polling
//!
//! Every wait is an `.await` point, so dropping the future cancels it. A
//! deadline additionally caps total wall-clock time regardless of the
//! attempt budget.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::HostError;

/// Attempt budget for a polling loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSpec {
    pub max_attempts: u32,
    pub interval: Duration,
    /// Upper bound on total time spent, measured from the first attempt
    pub deadline: Option<Duration>,
}

impl PollSpec {
    pub const fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Waiting for sshd after boot
pub const SSH_READY: PollSpec = PollSpec::new(60, Duration::from_secs(3));

/// Waiting for the container engine port after sshd is up
pub const ENGINE_READY: PollSpec = PollSpec::new(48, Duration::from_secs(10));

/// Run `attempt` until it yields a value or the budget is exhausted
///
/// Attempt 1 runs immediately, later attempts are `interval` apart.
pub async fn poll_until<T, F, Fut>(what: &str, spec: PollSpec, mut attempt: F) -> Result<T, HostError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let started = Instant::now();
    let mut attempts = 0;

    while attempts < spec.max_attempts {
        if attempts > 0 {
            if let Some(deadline) = spec.deadline {
                if started.elapsed() + spec.interval > deadline {
                    tracing::debug!("Deadline of {:?} reached waiting for {}", deadline, what);
                    break;
                }
            }
            tokio::time::sleep(spec.interval).await;
        }

        attempts += 1;
        if let Some(value) = attempt(attempts).await {
            tracing::debug!("{} ready after {} attempt(s)", what, attempts);
            return Ok(value);
        }
        tracing::debug!("{} not ready (attempt {}/{})", what, attempts, spec.max_attempts);
    }

    Err(HostError::Timeout {
        target: what.to_string(),
        attempts,
    })
}

/// Opens a connection to a `host:port` target
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, target: &str) -> std::io::Result<()>;
}

/// Plain TCP connect with a per-attempt timeout
#[derive(Debug, Clone, Copy)]
pub struct TcpDialer {
    pub connect_timeout: Duration,
}

impl Default for TcpDialer {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(2),
        }
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, target: &str) -> std::io::Result<()> {
        let connect = tokio::net::TcpStream::connect(target);
        match tokio::time::timeout(self.connect_timeout, connect).await {
            Ok(stream) => stream.map(|_| ()),
            Err(_) => Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("connect to {target} timed out"),
            )),
        }
    }
}

/// Wait until `target` accepts TCP connections
pub async fn wait_for_tcp(target: &str, spec: PollSpec) -> Result<(), HostError> {
    wait_for_tcp_with(&TcpDialer::default(), target, spec).await
}

/// Wait until `target` accepts connections through the given dialer
pub async fn wait_for_tcp_with(
    dialer: &dyn Dialer,
    target: &str,
    spec: PollSpec,
) -> Result<(), HostError> {
    poll_until(target, spec, |_| async move {
        match dialer.dial(target).await {
            Ok(()) => Some(()),
            Err(e) => {
                tracing::debug!("Dial {} failed: {}", target, e);
                None
            }
        }
    })
    .await
}
