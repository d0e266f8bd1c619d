use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::net::TcpStream;
use tokio::time::Instant;

const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_millis(500);
const DEFAULT_BACKOFF: Duration = Duration::from_millis(250);

/// Opens (and immediately drops) a connection to prove a listener exists.
pub trait Connector: Send + Sync {
    fn connect(&self, addr: SocketAddr) -> BoxFuture<'_, io::Result<()>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    fn connect(&self, addr: SocketAddr) -> BoxFuture<'_, io::Result<()>> {
        Box::pin(async move {
            let stream = TcpStream::connect(addr).await?;
            drop(stream);
            Ok(())
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeConfig {
    /// Upper bound for one connection attempt.
    pub attempt_timeout: Duration,
    /// Pause between failed attempts.
    pub backoff: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            backoff: DEFAULT_BACKOFF,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Ready { attempts: u32, elapsed: Duration },
    TimedOut { attempts: u32 },
}

impl ProbeOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }
}

/// Polls a socket until the engine accepts connections.
///
/// Waits between attempts on the tokio clock, so tests running with paused
/// time never sleep for real.
#[derive(Debug, Clone)]
pub struct ReadinessProbe<C = TcpConnector> {
    connector: C,
    config: ProbeConfig,
}

impl Default for ReadinessProbe<TcpConnector> {
    fn default() -> Self {
        Self::new(TcpConnector, ProbeConfig::default())
    }
}

impl<C: Connector> ReadinessProbe<C> {
    pub fn new(connector: C, config: ProbeConfig) -> Self {
        Self { connector, config }
    }

    pub fn config(&self) -> ProbeConfig {
        self.config
    }

    pub fn set_config(&mut self, config: ProbeConfig) {
        self.config = config;
    }

    /// Returns `Ready` on the first successful connection. At least one
    /// attempt is made; no attempt starts once `timeout` has elapsed.
    pub async fn wait_ready(&self, host: IpAddr, port: u16, timeout: Duration) -> ProbeOutcome {
        let addr = SocketAddr::new(host, port);
        let started = Instant::now();
        let deadline = started + timeout;
        let mut attempts = 0_u32;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if attempts > 0 && remaining.is_zero() {
                tracing::debug!(%addr, attempts, "engine readiness timed out");
                return ProbeOutcome::TimedOut { attempts };
            }

            attempts += 1;
            let budget = if remaining.is_zero() {
                self.config.attempt_timeout
            } else {
                self.config.attempt_timeout.min(remaining)
            };

            match tokio::time::timeout(budget, self.connector.connect(addr)).await {
                Ok(Ok(())) => {
                    let elapsed = started.elapsed();
                    tracing::debug!(
                        %addr,
                        attempts,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "engine accepted connection"
                    );
                    return ProbeOutcome::Ready { attempts, elapsed };
                }
                Ok(Err(error)) => {
                    tracing::trace!(%addr, attempts, %error, "readiness attempt refused");
                }
                Err(_) => {
                    tracing::trace!(%addr, attempts, "readiness attempt timed out");
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            tokio::time::sleep(self.config.backoff.min(remaining)).await;
        }
    }
}
