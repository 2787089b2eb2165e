//! ICMP reachability checks

use super::CheckOutcome;
use crate::error::CheckError;
use crate::models::IcmpCheck;
use async_trait::async_trait;
use rand::random;
use serde_json::json;
use std::net::IpAddr;
use std::time::Duration;
use surge_ping::{Client, Config, PingIdentifier, PingSequence, ICMP};

/// Sends a single echo request and returns the round-trip time
#[async_trait]
pub trait Pinger: Send + Sync {
    async fn ping(&self, addr: IpAddr, timeout: Duration) -> Result<Duration, CheckError>;
}

/// Pinger backed by raw ICMP sockets.
///
/// Sockets are opened per family on first use; opening them needs
/// `CAP_NET_RAW` or an unprivileged ping group.
#[derive(Default)]
pub struct SurgePinger {
    v4: tokio::sync::OnceCell<Client>,
    v6: tokio::sync::OnceCell<Client>,
}

impl SurgePinger {
    pub fn new() -> Self {
        Self::default()
    }

    async fn client(&self, addr: IpAddr) -> Result<&Client, CheckError> {
        let (cell, kind) = match addr {
            IpAddr::V4(_) => (&self.v4, ICMP::V4),
            IpAddr::V6(_) => (&self.v6, ICMP::V6),
        };
        cell.get_or_try_init(|| async {
            let config = Config::builder().kind(kind).build();
            Client::new(&config)
                .map_err(|e| CheckError::SourceUnavailable(format!("cannot open ICMP socket: {e}")))
        })
        .await
    }
}

#[async_trait]
impl Pinger for SurgePinger {
    async fn ping(&self, addr: IpAddr, timeout: Duration) -> Result<Duration, CheckError> {
        let client = self.client(addr).await?;
        let mut pinger = client.pinger(addr, PingIdentifier(random())).await;
        pinger.timeout(timeout);
        pinger
            .ping(PingSequence(0), &[0; 8])
            .await
            .map(|(_packet, rtt)| rtt)
            .map_err(|e| CheckError::SourceUnavailable(format!("{addr} unreachable: {e}")))
    }
}

pub async fn run(pinger: &dyn Pinger, check: &IcmpCheck) -> Result<CheckOutcome, CheckError> {
    let timeout = Duration::from_secs(check.timeout_secs.max(1));
    let addr = resolve(&check.host).await?;

    match pinger.ping(addr, timeout).await {
        Ok(rtt) => {
            let rtt_ms = rtt.as_millis() as u64;
            Ok(CheckOutcome::success(
                format!("{} reachable in {} ms", check.host, rtt_ms),
                json!({ "address": addr.to_string(), "rtt_ms": rtt_ms }),
            ))
        }
        Err(err) => Ok(CheckOutcome::failure(
            err.to_string(),
            json!({ "address": addr.to_string(), "error": err.to_string() }),
        )),
    }
}

async fn resolve(host: &str) -> Result<IpAddr, CheckError> {
    if let Ok(addr) = host.parse::<IpAddr>() {
        return Ok(addr);
    }
    tokio::net::lookup_host((host, 0))
        .await
        .map_err(|e| CheckError::SourceUnavailable(format!("cannot resolve {host}: {e}")))?
        .next()
        .map(|sock| sock.ip())
        .ok_or_else(|| CheckError::SourceUnavailable(format!("{host} has no addresses")))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedPinger(Result<Duration, ()>);

    #[async_trait]
    impl Pinger for FixedPinger {
        async fn ping(&self, addr: IpAddr, _timeout: Duration) -> Result<Duration, CheckError> {
            self.0
                .map_err(|_| CheckError::SourceUnavailable(format!("{addr} unreachable: timeout")))
        }
    }

    fn check(host: &str) -> IcmpCheck {
        IcmpCheck {
            host: host.to_string(),
            timeout_secs: 1,
        }
    }

    #[tokio::test]
    async fn test_reachable_host() {
        let outcome = run(&FixedPinger(Ok(Duration::from_millis(12))), &check("10.0.0.1"))
            .await
            .unwrap();
        assert!(outcome.succeeded);
        assert_eq!(outcome.message, "10.0.0.1 reachable in 12 ms");
        assert_eq!(outcome.raw["rtt_ms"], 12);
    }

    #[tokio::test]
    async fn test_unreachable_host_fails() {
        let outcome = run(&FixedPinger(Err(())), &check("10.0.0.2")).await.unwrap();
        assert!(!outcome.succeeded);
        assert!(outcome.message.contains("unreachable"));
    }

    #[tokio::test]
    async fn test_resolves_localhost() {
        let addr = resolve("localhost").await.unwrap();
        assert!(addr.is_loopback());
    }
}
