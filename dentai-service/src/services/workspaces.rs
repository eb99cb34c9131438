//! In-memory registry of open workspaces.
//!
//! Every lookup refreshes a workspace's idle clock. A background sweeper
//! closes workspaces nobody has touched within the configured TTL, and the
//! registry refuses to open more than `max_open` at once.

use crate::config::WorkspaceConfig;
use crate::models::Coordinate;
use crate::services::metrics;
use crate::services::{ChatSessionFactory, ClinicGateway};
use crate::views::Workspace;
use dashmap::DashMap;
use service_core::error::AppError;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Seconds a client is told to wait when the registry is full.
const RETRY_AFTER_SECS: u64 = 30;

struct OpenWorkspace {
    workspace: Arc<Workspace>,
    last_touched: Instant,
}

#[derive(Clone)]
pub struct WorkspaceRegistry {
    workspaces: Arc<DashMap<Uuid, OpenWorkspace>>,
    gateway: ClinicGateway,
    chat_factory: Arc<dyn ChatSessionFactory>,
    default_location: Coordinate,
    limits: WorkspaceConfig,
}

impl WorkspaceRegistry {
    pub fn new(
        gateway: ClinicGateway,
        default_location: Coordinate,
        limits: WorkspaceConfig,
    ) -> Self {
        let chat_factory: Arc<dyn ChatSessionFactory> = Arc::new(gateway.clone());
        Self::with_chat_factory(gateway, chat_factory, default_location, limits)
    }

    pub fn with_chat_factory(
        gateway: ClinicGateway,
        chat_factory: Arc<dyn ChatSessionFactory>,
        default_location: Coordinate,
        limits: WorkspaceConfig,
    ) -> Self {
        Self {
            workspaces: Arc::new(DashMap::new()),
            gateway,
            chat_factory,
            default_location,
            limits,
        }
    }

    /// Open a workspace with the dashboard mounted.
    pub fn open(&self) -> Result<Arc<Workspace>, AppError> {
        // Checked before mounting so a refused open never starts a summary call.
        if self.workspaces.len() >= self.limits.max_open {
            tracing::warn!(max_open = self.limits.max_open, "Workspace limit reached");
            return Err(AppError::TooManyRequests(
                "Too many open workspaces".to_string(),
                Some(RETRY_AFTER_SECS),
            ));
        }

        let workspace = Arc::new(Workspace::open(
            self.gateway.clone(),
            self.chat_factory.clone(),
            self.default_location,
        ));
        self.workspaces.insert(
            workspace.id(),
            OpenWorkspace {
                workspace: workspace.clone(),
                last_touched: Instant::now(),
            },
        );
        metrics::set_active_workspaces(self.workspaces.len());

        tracing::info!(workspace_id = %workspace.id(), "Workspace opened");
        Ok(workspace)
    }

    /// Look up a workspace and mark it as used.
    pub fn get(&self, id: &Uuid) -> Option<Arc<Workspace>> {
        self.workspaces.get_mut(id).map(|mut entry| {
            entry.last_touched = Instant::now();
            entry.workspace.clone()
        })
    }

    /// Remove and dispose a workspace. Returns `false` if it was unknown.
    pub fn close(&self, id: &Uuid) -> bool {
        match self.workspaces.remove(id) {
            Some((_, entry)) => {
                entry.workspace.close();
                metrics::set_active_workspaces(self.workspaces.len());
                true
            }
            None => false,
        }
    }

    /// Close every workspace idle for at least `ttl`. Returns how many closed.
    pub fn evict_idle(&self, ttl: Duration) -> usize {
        let now = Instant::now();
        let stale: Vec<Uuid> = self
            .workspaces
            .iter()
            .filter(|entry| now.duration_since(entry.last_touched) >= ttl)
            .map(|entry| *entry.key())
            .collect();

        let mut evicted = 0;
        for id in stale {
            // Re-checked under the shard lock so a concurrent touch wins.
            let removed = self
                .workspaces
                .remove_if(&id, |_, entry| now.duration_since(entry.last_touched) >= ttl);
            if let Some((_, entry)) = removed {
                entry.workspace.close();
                evicted += 1;
                tracing::info!(workspace_id = %id, "Idle workspace closed");
            }
        }

        if evicted > 0 {
            metrics::set_active_workspaces(self.workspaces.len());
        }
        evicted
    }

    /// Run `evict_idle` on the configured interval until `shutdown` fires.
    pub fn spawn_sweeper(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let registry = self.clone();
        let ttl = Duration::from_secs(self.limits.idle_ttl_secs);
        let period = Duration::from_secs(self.limits.sweep_interval_secs.max(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => {
                        tracing::debug!("Workspace sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let evicted = registry.evict_idle(ttl);
                        if evicted > 0 {
                            tracing::info!(
                                evicted,
                                remaining = registry.len(),
                                "Swept idle workspaces"
                            );
                        }
                    }
                }
            }
        })
    }

    pub fn len(&self) -> usize {
        self.workspaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workspaces.is_empty()
    }
}
