//! The single-threaded reactor tying ingress, flushing, health probing and
//! downstream selection together.
use crate::aggregate::SlotTable;
use crate::config::Config;
use crate::downstream::{self, HostSet, ProbeOutcome};
use crate::egress::{EgressRing, EgressSocket};
use std::net::Ipv4Addr;
use tokio::net::UdpSocket;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

/// Owns every piece of relay state. All of it is mutated from [`Engine::run`]
/// on one thread; the resolver ticker is the only other thread and talks
/// through its single-slot channel.
pub struct Engine {
    config: Config,
    ingress: UdpSocket,
    egress: EgressSocket,
    table: SlotTable,
    ring: EgressRing,
    hosts: HostSet,
    resolutions: Option<mpsc::Receiver<Vec<Ipv4Addr>>>,
    outcome_tx: mpsc::UnboundedSender<ProbeOutcome>,
    outcome_rx: mpsc::UnboundedReceiver<ProbeOutcome>,
}

impl Engine {
    /// Binds the sockets and seeds the downstream set. A hostname
    /// downstream is resolved once here and then refreshed by the ticker;
    /// a literal address never starts the ticker. A failed first
    /// resolution is not fatal: the fleet starts empty and the ticker
    /// fills it in.
    pub async fn new(config: Config) -> std::io::Result<Self> {
        let ingress = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, config.data_port)).await?;
        info!("listening for metrics on {}", ingress.local_addr()?);

        let mut hosts = HostSet::new(config.downstream.data_port, config.downstream.health_port);
        let resolutions = match config.downstream.host.parse::<Ipv4Addr>() {
            Ok(addr) => {
                hosts.reconcile(&[addr]);
                None
            }
            Err(_) => {
                let host = &config.downstream.host;
                match downstream::resolve(host) {
                    Ok(addrs) if !addrs.is_empty() => hosts.reconcile(&addrs),
                    Ok(_) => warn!("\"{host}\" resolved to no usable address yet"),
                    Err(err) => warn!("cannot resolve \"{host}\": {err}, will keep retrying"),
                }
                Some(downstream::spawn_ticker(
                    host.clone(),
                    config.dns_refresh_interval,
                )?)
            }
        };

        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        Ok(Self {
            egress: EgressSocket::bind().await?,
            ingress,
            table: SlotTable::new(),
            ring: EgressRing::new(),
            hosts,
            resolutions,
            outcome_tx,
            outcome_rx,
            config,
        })
    }

    /// Runs the reactor until interrupted. Handlers recover locally; only
    /// startup-time failures surface to the caller.
    pub async fn run(mut self) -> std::io::Result<()> {
        let mut flush = tokio::time::interval(self.config.flush_interval);
        flush.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut health = tokio::time::interval(self.config.health_check_interval);
        health.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut reopen = signal(SignalKind::hangup())?;
        let mut interrupt = signal(SignalKind::interrupt())?;

        let mut datagram = vec![0u8; 64 * 1024];
        loop {
            tokio::select! {
                received = self.ingress.recv_from(&mut datagram) => match received {
                    Ok((len, _)) => self.table.ingest_datagram(&datagram[..len], &mut self.ring),
                    Err(err) => warn!("ingress receive failed: {err}"),
                },
                _ = flush.tick() => {
                    if !self.table.is_empty() {
                        self.ring.pack_from(&mut self.table);
                    }
                }
                _ = health.tick() => self.health_tick(),
                Some(outcome) = self.outcome_rx.recv() => self.hosts.apply_outcome(outcome),
                _ = reopen.recv() => info!("reopen signal received and ignored"),
                _ = interrupt.recv() => {
                    info!("interrupt received, shutting down");
                    return Ok(());
                }
            }
            self.drain_egress().await;
        }
    }

    /// One health-periodic beat: settle completed probes, fold in a fresh
    /// resolution if the ticker published one, then start the next probe
    /// round.
    fn health_tick(&mut self) {
        while let Ok(outcome) = self.outcome_rx.try_recv() {
            self.hosts.apply_outcome(outcome);
        }
        if let Some(resolutions) = &mut self.resolutions
            && let Ok(addrs) = resolutions.try_recv()
        {
            self.hosts.reconcile(&addrs);
        }
        self.hosts.tick_probes(&self.outcome_tx);
    }

    /// Sends queued datagrams to round-robin-selected alive downstreams.
    /// With no alive downstream the queue is left alone; the ring drops
    /// the oldest window once it saturates.
    async fn drain_egress(&mut self) {
        while self.ring.has_pending() {
            let Some(target) = self.hosts.select() else {
                break;
            };
            let datagram = self.ring.front().expect("pending ring has a front");
            self.egress.send(datagram, target).await;
            self.ring.pop_front();
        }
    }
}
