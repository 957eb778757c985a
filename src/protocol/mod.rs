pub mod lsdb;
pub mod messages;
pub mod neighbor;
pub mod route_installer;
pub mod routing_table;
pub mod timers;

pub use lsdb::*;
pub use messages::*;
pub use neighbor::*;
pub use route_installer::*;
pub use routing_table::*;
pub use timers::*;

use crate::router::{Router, Transmit};
use log::{debug, error, info, warn};
use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::time::{interval, sleep_until};

pub const PROTOCOL_PORT: u16 = 5000;

/// Routes are re-applied this often even without changes, so failed
/// operations get retried.
const RECONCILE_INTERVAL: Duration = Duration::from_secs(30);
const STATUS_INTERVAL: Duration = Duration::from_secs(15);
const IDLE_WAKEUP: Duration = Duration::from_secs(1);
const RECV_BUFFER_SIZE: usize = 65536;

enum Wake {
    Datagram(std::io::Result<(usize, SocketAddr)>),
    Timer,
    Reconcile,
    Status,
    Shutdown,
}

/// Single-task event loop around one [`Router`]: one UDP socket for all
/// links, the router's timer queue, and the route installer.
pub struct ProtocolEngine<K> {
    router: Router,
    socket: UdpSocket,
    port: u16,
    installer: RouteInstaller<K>,
    installed_version: Option<u64>,
}

impl<K: KernelRoutes> ProtocolEngine<K> {
    pub async fn bind(router: Router, port: u16, kernel: K) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))).await?;
        socket.set_broadcast(true)?;
        info!("Listening for routing messages on port {}", port);

        Ok(Self {
            router,
            socket,
            port,
            installer: RouteInstaller::new(kernel),
            installed_version: None,
        })
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Runs until `shutdown` resolves. Installed routes are left in place.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> anyhow::Result<()> {
        let out = self.router.start(Instant::now());
        self.transmit(out).await;
        self.sync_routes().await;

        let mut buf = vec![0u8; RECV_BUFFER_SIZE];
        let mut reconcile = interval(RECONCILE_INTERVAL);
        let mut status = interval(STATUS_INTERVAL);
        tokio::pin!(shutdown);

        loop {
            let deadline = self
                .router
                .next_deadline()
                .map(tokio::time::Instant::from_std)
                .unwrap_or_else(|| tokio::time::Instant::now() + IDLE_WAKEUP);

            let wake = tokio::select! {
                _ = &mut shutdown => Wake::Shutdown,
                res = self.socket.recv_from(&mut buf) => Wake::Datagram(res),
                _ = sleep_until(deadline) => Wake::Timer,
                _ = reconcile.tick() => Wake::Reconcile,
                _ = status.tick() => Wake::Status,
            };

            let out = match wake {
                Wake::Shutdown => {
                    info!("Shutting down router {}", self.router.id());
                    break;
                }
                Wake::Datagram(Ok((len, SocketAddr::V4(source)))) => {
                    self.router
                        .handle_datagram(*source.ip(), &buf[..len], Instant::now())
                }
                Wake::Datagram(Ok((_, source))) => {
                    debug!("Ignoring datagram from non-IPv4 source {}", source);
                    Vec::new()
                }
                Wake::Datagram(Err(e)) => {
                    error!("Failed to receive packet: {}", e);
                    Vec::new()
                }
                Wake::Timer => self.router.poll_timers(Instant::now()),
                Wake::Reconcile => {
                    self.installed_version = None;
                    Vec::new()
                }
                Wake::Status => {
                    self.log_status();
                    Vec::new()
                }
            };

            self.transmit(out).await;
            self.sync_routes().await;
        }

        Ok(())
    }

    async fn transmit(&self, out: Vec<Transmit>) {
        for transmit in out {
            let Some(link) = self.router.links().get(transmit.link) else {
                continue;
            };

            let data = match transmit.message.encode() {
                Ok(data) => data,
                Err(e) => {
                    error!("Failed to encode message for {}: {}", link.name, e);
                    continue;
                }
            };

            let target = SocketAddr::from((link.broadcast(), self.port));
            if let Err(e) = self.socket.send_to(&data, target).await {
                warn!("Failed to send on {} to {}: {}", link.name, target, e);
            } else {
                debug!("Sent {} bytes on {} to {}", data.len(), link.name, target);
            }
        }
    }

    async fn sync_routes(&mut self) {
        let version = self.router.routes_version();
        if self.installed_version == Some(version) {
            return;
        }

        let report = self.installer.apply(self.router.routes()).await;
        if report.failed > 0 {
            warn!("{} route operations failed, will retry", report.failed);
        }
        self.installed_version = Some(version);
    }

    fn log_status(&self) {
        let snapshot = self.router.snapshot(Instant::now());
        match serde_json::to_string(&snapshot) {
            Ok(json) => debug!("Status: {}", json),
            Err(e) => error!("Failed to serialize status: {}", e),
        }
    }
}
