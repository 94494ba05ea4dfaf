//! Per-host health probing: one short TCP exchange per health-periodic
//! beat, reported back to the reactor over a channel.
use crate::constants::{HEALTH_REQUEST, HEALTH_RESPONSE};
use std::net::{Ipv4Addr, SocketAddr};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::debug;

/// Verdict of one completed probe, tagged with the host it belongs to.
#[derive(Debug)]
pub struct ProbeOutcome {
    pub addr: Ipv4Addr,
    pub alive: bool,
}

/// Whether a probe task is in flight for a host. A host holds at most one
/// probe; dropping an in-flight state aborts the task, which closes its
/// socket.
pub(crate) enum ProbeState {
    Idle,
    InFlight(JoinHandle<()>),
}

impl ProbeState {
    pub(crate) fn is_idle(&self) -> bool {
        matches!(self, ProbeState::Idle)
    }
}

impl Drop for ProbeState {
    fn drop(&mut self) {
        if let ProbeState::InFlight(task) = self {
            task.abort();
        }
    }
}

/// Spawns one probe cycle against `health_addr` and reports the verdict
/// through `outcomes`.
pub(crate) fn start_probe(
    addr: Ipv4Addr,
    health_addr: SocketAddr,
    outcomes: UnboundedSender<ProbeOutcome>,
) -> ProbeState {
    ProbeState::InFlight(tokio::spawn(async move {
        let alive = probe(health_addr).await;
        let _ = outcomes.send(ProbeOutcome { addr, alive });
    }))
}

/// One probe cycle: connect, send the request, read the verdict. Any
/// failure along the way, and any response whose first read does not open
/// with the exact up literal, is a down verdict.
async fn probe(health_addr: SocketAddr) -> bool {
    let mut stream = match TcpStream::connect(health_addr).await {
        Ok(stream) => stream,
        Err(err) => {
            debug!("health connect to {health_addr} failed: {err}");
            return false;
        }
    };
    if let Err(err) = stream.write_all(HEALTH_REQUEST).await {
        debug!("health request to {health_addr} failed: {err}");
        return false;
    }
    let mut response = [0u8; 64];
    match stream.read(&mut response).await {
        Ok(len) => response[..len].starts_with(HEALTH_RESPONSE),
        Err(err) => {
            debug!("health response from {health_addr} failed: {err}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;

    async fn server_answering(response: &'static [u8]) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 16];
            let len = stream.read(&mut request).await.unwrap();
            assert_eq!(&request[..len], HEALTH_REQUEST);
            stream.write_all(response).await.unwrap();
            // Hold the connection open so the client's read sees exactly
            // this payload.
            tokio::time::sleep(Duration::from_millis(50)).await;
        });
        addr
    }

    #[tokio::test]
    async fn exact_up_response_is_alive() {
        let addr = server_answering(b"health: up\n").await;
        assert!(probe(addr).await);
    }

    #[tokio::test]
    async fn up_response_with_trailer_is_alive() {
        let addr = server_answering(b"health: up\nuptime: 42\n").await;
        assert!(probe(addr).await);
    }

    #[tokio::test]
    async fn down_response_is_dead() {
        let addr = server_answering(b"health: down\n").await;
        assert!(!probe(addr).await);
    }

    #[tokio::test]
    async fn up_without_newline_is_dead() {
        let addr = server_answering(b"health: up").await;
        assert!(!probe(addr).await);
    }

    #[tokio::test]
    async fn closed_connection_is_dead() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });
        assert!(!probe(addr).await);
    }

    #[tokio::test]
    async fn refused_connection_is_dead() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        assert!(!probe(addr).await);
    }
}
