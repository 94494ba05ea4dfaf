//! The downstream fleet: resolved collector addresses, their health state
//! and round-robin selection among the alive ones.
mod health;
mod resolve;

pub use health::ProbeOutcome;
pub use resolve::{resolve, spawn_ticker};

use health::ProbeState;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

/// One downstream collector: a data-plane UDP address, a health-plane TCP
/// address and the verdict of its most recent completed probe.
pub struct Host {
    addr: Ipv4Addr,
    data_addr: SocketAddr,
    health_addr: SocketAddr,
    alive: bool,
    probe: ProbeState,
}

impl Host {
    fn new(addr: Ipv4Addr, data_port: u16, health_port: u16) -> Self {
        Self {
            addr,
            data_addr: SocketAddr::V4(SocketAddrV4::new(addr, data_port)),
            health_addr: SocketAddr::V4(SocketAddrV4::new(addr, health_port)),
            alive: false,
            probe: ProbeState::Idle,
        }
    }

    /// Updates the alive bit, logging transitions only on edges.
    fn set_alive(&mut self, alive: bool) {
        if alive && !self.alive {
            info!("downstream {} is up", self.addr);
        } else if !alive && self.alive {
            warn!("downstream {} is down", self.addr);
        }
        self.alive = alive;
    }

    /// One health-periodic beat for this host. A probe still in flight
    /// from the previous beat is overdue: it is aborted and counts as a
    /// down verdict before the next probe starts.
    fn tick(&mut self, outcomes: &UnboundedSender<ProbeOutcome>) {
        if !self.probe.is_idle() {
            warn!("health probe to {} overdue, aborting", self.health_addr);
            self.set_alive(false);
        }
        self.probe = health::start_probe(self.addr, self.health_addr, outcomes.clone());
    }
}

/// Ordered host list plus the round-robin cursor.
pub struct HostSet {
    hosts: Vec<Host>,
    cursor: usize,
    data_port: u16,
    health_port: u16,
}

impl HostSet {
    pub fn new(data_port: u16, health_port: u16) -> Self {
        Self {
            hosts: Vec::new(),
            cursor: 0,
            data_port,
            health_port,
        }
    }

    /// Round-robin selection: advances the cursor past at most one full
    /// lap and returns the data address of the first alive host, or `None`
    /// when every host is down.
    pub fn select(&mut self) -> Option<SocketAddr> {
        let count = self.hosts.len();
        for _ in 0..count {
            self.cursor = (self.cursor + 1) % count;
            let host = &self.hosts[self.cursor];
            if host.alive {
                return Some(host.data_addr);
            }
        }
        None
    }

    /// Merges a freshly resolved address set into the fleet. Hosts whose
    /// address survives keep their alive bit and any in-flight probe;
    /// departed hosts drop theirs; unseen addresses join as down.
    pub fn reconcile(&mut self, addrs: &[Ipv4Addr]) {
        let mut fresh: Vec<Ipv4Addr> = Vec::with_capacity(addrs.len());
        for addr in addrs {
            if !fresh.contains(addr) {
                fresh.push(*addr);
            }
        }

        let before = self.hosts.len();
        self.hosts.retain(|host| {
            match fresh.iter().position(|addr| *addr == host.addr) {
                Some(pos) => {
                    fresh.remove(pos);
                    true
                }
                None => {
                    info!("downstream {} no longer resolved, dropping", host.addr);
                    false
                }
            }
        });
        let removed = self.hosts.len() != before;

        for addr in fresh {
            self.hosts.push(Host::new(addr, self.data_port, self.health_port));
        }
        if removed {
            self.cursor = 0;
        }
    }

    /// Applies a completed probe verdict. The host may have been
    /// reconciled away while the probe ran; its verdict is then stale.
    pub fn apply_outcome(&mut self, outcome: ProbeOutcome) {
        if let Some(host) = self.hosts.iter_mut().find(|host| host.addr == outcome.addr) {
            host.probe = ProbeState::Idle;
            host.set_alive(outcome.alive);
        }
    }

    /// Drives every host's probe cycle; called from the health periodic.
    pub fn tick_probes(&mut self, outcomes: &UnboundedSender<ProbeOutcome>) {
        for host in &mut self.hosts {
            host.tick(outcomes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(last: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, last)
    }

    fn set_with(addrs: &[u8], alive: &[u8]) -> HostSet {
        let mut set = HostSet::new(9125, 9126);
        let addrs: Vec<Ipv4Addr> = addrs.iter().map(|last| addr(*last)).collect();
        set.reconcile(&addrs);
        for host in &mut set.hosts {
            host.alive = alive.iter().any(|last| addr(*last) == host.addr);
        }
        set
    }

    #[test]
    fn selection_cycles_over_alive_hosts() {
        let mut set = set_with(&[1, 2], &[1, 2]);
        let picks: Vec<SocketAddr> = (0..6).map(|_| set.select().unwrap()).collect();
        assert_eq!(picks[0], picks[2]);
        assert_eq!(picks[0], picks[4]);
        assert_eq!(picks[1], picks[3]);
        assert_eq!(picks[1], picks[5]);
        assert_ne!(picks[0], picks[1]);
    }

    #[test]
    fn selection_is_fair_across_alive_hosts() {
        let mut set = set_with(&[1, 2, 3], &[1, 2, 3]);
        let mut counts = std::collections::HashMap::new();
        for _ in 0..9 {
            *counts.entry(set.select().unwrap()).or_insert(0u32) += 1;
        }
        assert_eq!(counts.len(), 3);
        assert!(counts.values().all(|count| *count == 3));
    }

    #[test]
    fn dead_hosts_are_skipped() {
        let mut set = set_with(&[1, 2, 3], &[1, 3]);
        for _ in 0..6 {
            let picked = set.select().unwrap();
            assert_ne!(picked.ip(), addr(2));
        }
    }

    #[test]
    fn no_alive_host_selects_nothing() {
        let mut set = set_with(&[1, 2], &[]);
        assert!(set.select().is_none());

        let mut empty = HostSet::new(9125, 9126);
        assert!(empty.select().is_none());
    }

    #[test]
    fn reconcile_is_the_union_without_duplicates() {
        let mut set = set_with(&[1, 2], &[1, 2]);
        set.reconcile(&[addr(2), addr(2), addr(3)]);

        let addrs: Vec<Ipv4Addr> = set.hosts.iter().map(|host| host.addr).collect();
        assert_eq!(addrs, vec![addr(2), addr(3)]);
        // The survivor keeps its verdict, the newcomer starts down.
        assert!(set.hosts[0].alive);
        assert!(!set.hosts[1].alive);
    }

    #[test]
    fn reconcile_with_current_set_is_a_noop() {
        let mut set = set_with(&[1, 2], &[1]);
        set.reconcile(&[addr(1), addr(2)]);

        let addrs: Vec<Ipv4Addr> = set.hosts.iter().map(|host| host.addr).collect();
        assert_eq!(addrs, vec![addr(1), addr(2)]);
        assert!(set.hosts[0].alive);
        assert!(!set.hosts[1].alive);
    }

    #[test]
    fn stale_probe_outcome_is_ignored() {
        let mut set = set_with(&[1], &[]);
        set.apply_outcome(ProbeOutcome {
            addr: addr(9),
            alive: true,
        });
        assert!(!set.hosts[0].alive);
    }

    #[tokio::test]
    async fn overdue_probe_is_aborted_and_marks_the_host_down() {
        let mut set = set_with(&[1], &[1]);
        // A probe that never completes, still in flight at the next beat.
        set.hosts[0].probe = ProbeState::InFlight(tokio::spawn(std::future::pending()));

        let (outcomes, _keep) = tokio::sync::mpsc::unbounded_channel();
        set.tick_probes(&outcomes);

        assert!(!set.hosts[0].alive);
        assert!(!set.hosts[0].probe.is_idle());
        assert!(set.select().is_none());
    }

    #[test]
    fn probe_outcome_flips_the_alive_bit() {
        let mut set = set_with(&[1], &[]);
        set.apply_outcome(ProbeOutcome {
            addr: addr(1),
            alive: true,
        });
        assert!(set.hosts[0].alive);

        set.apply_outcome(ProbeOutcome {
            addr: addr(1),
            alive: false,
        });
        assert!(!set.hosts[0].alive);
    }
}
