//! Fixed-MTU egress buffers and the best-effort UDP sender behind them.
use crate::aggregate::SlotTable;
use crate::constants::{DOWNSTREAM_BUF_NUM, MAX_PACKETS_PER_SOCKET, MTU};
use std::net::{Ipv4Addr, SocketAddr};
use tokio::net::UdpSocket;
use tracing::{error, warn};

/// Ring of packed datagrams awaiting send. Buffers in `[flush_idx,
/// active_idx)` (modular) are full; the two indices coincide exactly when
/// nothing is queued.
pub struct EgressRing {
    bufs: Vec<Vec<u8>>,
    active_idx: usize,
    flush_idx: usize,
}

impl EgressRing {
    pub fn new() -> Self {
        Self {
            bufs: (0..DOWNSTREAM_BUF_NUM)
                .map(|_| Vec::with_capacity(MTU))
                .collect(),
            active_idx: 0,
            flush_idx: 0,
        }
    }

    pub fn has_pending(&self) -> bool {
        self.active_idx != self.flush_idx
    }

    /// Serializes the used slots into the active buffer in insertion order
    /// and rotates. Slots that never accepted a sample are omitted; each
    /// copied slot's final separator byte becomes `\n`.
    pub fn pack_from(&mut self, table: &mut SlotTable) {
        let buf = &mut self.bufs[self.active_idx];
        for slot in table.slots() {
            if !slot.has_samples() {
                continue;
            }
            let bytes = slot.bytes();
            buf.extend_from_slice(&bytes[..bytes.len() - 1]);
            buf.push(b'\n');
        }
        table.clear();

        if self.bufs[self.active_idx].is_empty() {
            return;
        }

        let next = (self.active_idx + 1) % DOWNSTREAM_BUF_NUM;
        if next == self.flush_idx && !self.bufs[next].is_empty() {
            // Saturated: the oldest queued datagram gives way.
            error!(
                "egress ring full, dropping {} queued bytes",
                self.bufs[next].len()
            );
            self.bufs[next].clear();
            self.flush_idx = (self.flush_idx + 1) % DOWNSTREAM_BUF_NUM;
        }
        self.active_idx = next;
    }

    /// Oldest queued datagram, if any.
    pub fn front(&self) -> Option<&[u8]> {
        self.has_pending()
            .then(|| self.bufs[self.flush_idx].as_slice())
    }

    pub fn pop_front(&mut self) {
        if self.has_pending() {
            self.bufs[self.flush_idx].clear();
            self.flush_idx = (self.flush_idx + 1) % DOWNSTREAM_BUF_NUM;
        }
    }
}

/// Egress UDP socket with a per-socket packet budget.
pub struct EgressSocket {
    socket: UdpSocket,
    packets_sent: u64,
}

impl EgressSocket {
    pub async fn bind() -> std::io::Result<Self> {
        Ok(Self {
            socket: UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?,
            packets_sent: 0,
        })
    }

    /// Sends one datagram, best effort: failures are logged and the
    /// datagram is abandoned. Once the packet budget is spent the socket
    /// is replaced first, so no ephemeral source port lives forever.
    pub async fn send(&mut self, datagram: &[u8], target: SocketAddr) {
        if self.packets_sent > MAX_PACKETS_PER_SOCKET {
            match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await {
                Ok(socket) => {
                    self.socket = socket;
                    self.packets_sent = 0;
                }
                Err(err) => warn!("cannot rotate egress socket: {err}"),
            }
        }
        self.packets_sent += 1;
        if let Err(err) = self.socket.send_to(datagram, target).await {
            warn!("send of {} bytes to {target} failed: {err}", datagram.len());
        }
    }
}
