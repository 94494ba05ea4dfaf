//! Background refresh of the downstream address set.
use crate::constants::MAX_DOWNSTREAM_NUM;
use std::net::{Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

/// Resolves `host` with the platform resolver, keeping at most
/// [`MAX_DOWNSTREAM_NUM`] distinct IPv4 addresses.
pub fn resolve(host: &str) -> std::io::Result<Vec<Ipv4Addr>> {
    let mut addrs = Vec::new();
    for resolved in (host, 0u16).to_socket_addrs()? {
        if let SocketAddr::V4(v4) = resolved
            && !addrs.contains(v4.ip())
        {
            addrs.push(*v4.ip());
            if addrs.len() == MAX_DOWNSTREAM_NUM {
                break;
            }
        }
    }
    Ok(addrs)
}

/// Starts the resolver ticker: a thread that re-resolves `host` every
/// `refresh` and publishes through a single-slot handoff. A full slot
/// means the reactor has not consumed the previous set yet; that cycle is
/// skipped, which is the handoff's natural backpressure.
pub fn spawn_ticker(
    host: String,
    refresh: Duration,
) -> std::io::Result<mpsc::Receiver<Vec<Ipv4Addr>>> {
    let (tx, rx) = mpsc::channel(1);
    std::thread::Builder::new()
        .name("resolver".to_string())
        .spawn(move || {
            loop {
                std::thread::sleep(refresh);
                let addrs = match resolve(&host) {
                    Ok(addrs) if !addrs.is_empty() => addrs,
                    Ok(_) => {
                        warn!("\"{host}\" resolved to no usable address, keeping current set");
                        continue;
                    }
                    Err(err) => {
                        warn!("cannot resolve \"{host}\": {err}");
                        continue;
                    }
                };
                match tx.try_send(addrs) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        debug!("previous resolution not yet consumed, skipping cycle");
                    }
                    Err(TrySendError::Closed(_)) => break,
                }
            }
        })?;
    Ok(rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_address_resolves_to_itself() {
        assert_eq!(
            resolve("127.0.0.1").unwrap(),
            vec![Ipv4Addr::new(127, 0, 0, 1)]
        );
    }

    #[test]
    fn localhost_resolves_to_loopback() {
        let addrs = resolve("localhost").unwrap();
        assert!(addrs.contains(&Ipv4Addr::new(127, 0, 0, 1)));
    }

    #[tokio::test]
    async fn ticker_publishes_and_skips_when_full() {
        let mut rx = spawn_ticker("127.0.0.1".to_string(), Duration::from_millis(10)).unwrap();
        // The slot stays capped at one pending set however many cycles ran.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(
            rx.try_recv().unwrap(),
            vec![Ipv4Addr::new(127, 0, 0, 1)]
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            rx.try_recv().unwrap(),
            vec![Ipv4Addr::new(127, 0, 0, 1)]
        );
    }
}
