use log::{debug, info, warn};
use std::future::Future;
use thiserror::Error;
use tokio::process::Command;

use super::routing_table::{Route, RouteChange, RouteTable};

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("failed to run ip: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("ip route {action} {destination} failed: {stderr}")]
    Command {
        action: &'static str,
        destination: String,
        stderr: String,
    },
}

/// The operating system's forwarding table, driven by diff.
///
/// Routes are identified by destination and metric, as in the Linux IPv4
/// table: replacing with another metric adds a second route.
pub trait KernelRoutes {
    /// Adds `route`, replacing the route with the same destination and
    /// metric.
    fn replace(&mut self, route: &Route) -> impl Future<Output = Result<(), RouteError>> + Send;

    fn remove(&mut self, route: &Route) -> impl Future<Output = Result<(), RouteError>> + Send;
}

/// Drives the kernel through the `ip` command.
#[derive(Debug, Clone)]
pub struct IpRouteCommand {
    protocol: String,
}

impl IpRouteCommand {
    /// Routes are tagged with `proto <protocol>` so they are easy to tell
    /// apart from static ones.
    pub fn new(protocol: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
        }
    }

    async fn run(&self, action: &'static str, route: &Route, args: &[String]) -> Result<(), RouteError> {
        let output = Command::new("ip")
            .arg("route")
            .arg(action)
            .args(args)
            .output()
            .await?;

        if !output.status.success() {
            return Err(RouteError::Command {
                action,
                destination: route.destination.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

impl Default for IpRouteCommand {
    fn default() -> Self {
        Self::new("static")
    }
}

impl KernelRoutes for IpRouteCommand {
    async fn replace(&mut self, route: &Route) -> Result<(), RouteError> {
        let args = vec![
            route.destination.to_string(),
            "via".to_string(),
            route.gateway.to_string(),
            "dev".to_string(),
            route.interface.clone(),
            "proto".to_string(),
            self.protocol.clone(),
            "metric".to_string(),
            route.metric.to_string(),
        ];
        self.run("replace", route, &args).await
    }

    async fn remove(&mut self, route: &Route) -> Result<(), RouteError> {
        let args = vec![
            route.destination.to_string(),
            "via".to_string(),
            route.gateway.to_string(),
            "dev".to_string(),
            route.interface.clone(),
            "metric".to_string(),
            route.metric.to_string(),
        ];
        self.run("del", route, &args).await
    }
}

/// Logs route operations without touching the kernel.
#[derive(Debug, Clone, Default)]
pub struct DryRun;

impl KernelRoutes for DryRun {
    async fn replace(&mut self, route: &Route) -> Result<(), RouteError> {
        info!(
            "[dry-run] ip route replace {} via {} dev {} metric {}",
            route.destination, route.gateway, route.interface, route.metric
        );
        Ok(())
    }

    async fn remove(&mut self, route: &Route) -> Result<(), RouteError> {
        info!(
            "[dry-run] ip route del {} via {} dev {} metric {}",
            route.destination, route.gateway, route.interface, route.metric
        );
        Ok(())
    }
}

/// Result of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub replaced: usize,
    pub removed: usize,
    pub failed: usize,
}

/// Keeps the kernel in line with the latest route table, one diff at a
/// time. A failed operation leaves the installed view untouched for that
/// destination, so the next pass retries it.
///
/// A route whose metric changes is deleted before the new one is added,
/// otherwise the kernel would keep both.
#[derive(Debug)]
pub struct RouteInstaller<K> {
    kernel: K,
    installed: RouteTable,
}

impl<K: KernelRoutes> RouteInstaller<K> {
    pub fn new(kernel: K) -> Self {
        Self {
            kernel,
            installed: RouteTable::new(),
        }
    }

    pub fn installed(&self) -> &RouteTable {
        &self.installed
    }

    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    pub async fn apply(&mut self, desired: &RouteTable) -> InstallReport {
        let mut report = InstallReport::default();

        for change in self.installed.diff(desired) {
            match change {
                RouteChange::Replace(route) => {
                    if let Err(e) = self.withdraw_previous(&route).await {
                        warn!("Failed to remove old route {}: {}", route.destination, e);
                        report.failed += 1;
                        continue;
                    }
                    match self.kernel.replace(&route).await {
                        Ok(()) => {
                            info!(
                                "Installed route {} via {} ({}) metric {}",
                                route.destination, route.gateway, route.via, route.metric
                            );
                            self.installed.insert(route);
                            report.replaced += 1;
                        }
                        Err(e) => {
                            warn!("Failed to install route {}: {}", route.destination, e);
                            report.failed += 1;
                        }
                    }
                }
                RouteChange::Remove(route) => match self.kernel.remove(&route).await {
                    Ok(()) => {
                        info!("Removed route {} (was via {})", route.destination, route.gateway);
                        self.installed.remove(&route.destination);
                        report.removed += 1;
                    }
                    Err(e) => {
                        warn!("Failed to remove route {}: {}", route.destination, e);
                        report.failed += 1;
                    }
                },
            }
        }

        if report != InstallReport::default() {
            debug!("Route reconciliation: {:?}", report);
        }
        report
    }

    /// Deletes the installed route to `route.destination` if it carries a
    /// different metric.
    async fn withdraw_previous(&mut self, route: &Route) -> Result<(), RouteError> {
        let Some(previous) = self.installed.get(&route.destination).cloned() else {
            return Ok(());
        };
        if previous.metric == route.metric {
            return Ok(());
        }

        self.kernel.remove(&previous).await?;
        debug!(
            "Removed route {} metric {} ahead of metric {}",
            previous.destination, previous.metric, route.metric
        );
        self.installed.remove(&previous.destination);
        Ok(())
    }
}
