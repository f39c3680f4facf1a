// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cluster lifecycle: start, stop, kill, status, and registry persistence.
//!
//! Start wiring order is a hard invariant: orchestrator subscriptions are
//! wired before any agent starts, agents start before the initial input is
//! published, and the initialization barrier is released only after that
//! publish. A fast-completing agent can therefore never publish a terminal
//! topic the orchestrator misses.

use crate::cluster::ClusterHandle;
use crate::error::OrchestratorError;
use crate::events;
use crate::pid::pid_alive;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use zs_core::message::topics;
use zs_core::{
    AgentConfig, Clock, ClusterConfig, ClusterId, ClusterInput, ClusterRecord, ClusterState,
    ConfigRef, FailureInfo, IsolationMode, Message, MessageContent, RetryPolicy, Settings,
    SystemClock, SENDER_ORCHESTRATOR,
};
use zs_engine::{
    Agent, AgentDeps, ClusterSpawner, MessageBus, SubclusterOutcome, DEFAULT_STALE_WINDOW,
};
use zs_isolation::{ContainerRuntime, IsolationManager, PreparedWorkspace};
use zs_logic::AgentRef;
use zs_storage::{Ledger, Registry};
use zs_template::{CustomTemplate, TemplateResolver};

/// Options for a cluster start.
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// Explicit cluster id; falls back to `ZEROSHOT_CLUSTER_ID`, then a
    /// generated slug.
    pub cluster_id: Option<ClusterId>,
    /// Isolation mode; falls back to the settings default, then none.
    pub isolation: Option<IsolationMode>,
    /// Source tree for workspace seeding; falls back to the process cwd.
    pub source_dir: Option<PathBuf>,
}

/// A cluster's registry record with its effective (zombie-aware) state.
#[derive(Debug, Clone)]
pub struct ClusterStatus {
    pub record: ClusterRecord,
    pub state: ClusterState,
}

pub(crate) struct Inner<R: ContainerRuntime> {
    pub storage_dir: PathBuf,
    pub settings: Settings,
    pub registry: Registry,
    pub isolation: IsolationManager<R>,
    pub resolver: RwLock<TemplateResolver>,
    pub clusters: Mutex<HashMap<ClusterId, Arc<ClusterHandle>>>,
}

/// Owns every cluster in this process.
pub struct Orchestrator<R: ContainerRuntime> {
    pub(crate) inner: Arc<Inner<R>>,
}

impl<R: ContainerRuntime> Clone for Orchestrator<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: ContainerRuntime> Orchestrator<R> {
    pub fn new(storage_dir: PathBuf, settings: Settings, runtime: R) -> Self {
        let registry = Registry::new(&storage_dir);
        let isolation = IsolationManager::new(storage_dir.clone(), runtime);
        Self {
            inner: Arc::new(Inner {
                storage_dir,
                settings,
                registry,
                isolation,
                resolver: RwLock::new(TemplateResolver::new()),
                clusters: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Register a user template for `load_config` and template starts.
    pub fn register_template(&self, template: CustomTemplate) {
        self.inner.resolver.write().register(template);
    }

    pub fn storage_dir(&self) -> &PathBuf {
        &self.inner.storage_dir
    }

    pub(crate) fn handle(&self, id: &ClusterId) -> Option<Arc<ClusterHandle>> {
        self.inner.clusters.lock().get(id).cloned()
    }

    /// True if this process currently owns the cluster.
    pub fn owns(&self, id: &ClusterId) -> bool {
        self.inner.clusters.lock().contains_key(id)
    }

    /// Publish a message onto an owned cluster's bus.
    pub async fn publish(
        &self,
        id: &ClusterId,
        message: Message,
    ) -> Result<Message, OrchestratorError> {
        let handle = self
            .handle(id)
            .ok_or_else(|| OrchestratorError::NotFound(id.clone()))?;
        Ok(handle.bus.publish(message).await?)
    }

    /// Resolve a template base and start a cluster from it.
    pub async fn start_from_template(
        &self,
        base: &str,
        params: &HashMap<String, serde_json::Value>,
        input: ClusterInput,
        options: StartOptions,
    ) -> Result<ClusterId, OrchestratorError> {
        let config = self.inner.resolver.read().resolve(base, params)?;
        self.start(config, input, options).await
    }

    /// Start a cluster with a resolved config.
    pub async fn start(
        &self,
        config: ClusterConfig,
        input: ClusterInput,
        options: StartOptions,
    ) -> Result<ClusterId, OrchestratorError> {
        // 1. Cluster identity
        let id = options
            .cluster_id
            .or_else(|| zs_core::env::cluster_id_override().map(ClusterId::new))
            .unwrap_or_else(ClusterId::generate);
        if self.inner.clusters.lock().contains_key(&id) {
            return Err(OrchestratorError::AlreadyRunning(id));
        }

        // 2. Ledger and bus
        let ledger = Ledger::open(&self.inner.storage_dir, id.clone())?;
        let bus = MessageBus::new(id.clone(), Arc::new(Mutex::new(ledger)));
        let created_at = SystemClock.epoch_ms();
        let mut record = ClusterRecord::new(id.clone(), config.clone(), created_at);

        // 3. Workspace isolation
        let mode = options
            .isolation
            .or(self.inner.settings.default_isolation)
            .unwrap_or(IsolationMode::None);
        let source = match options.source_dir {
            Some(dir) => dir,
            None => std::env::current_dir().map_err(zs_storage::StorageError::Io)?,
        };
        match self
            .inner
            .isolation
            .prepare(&id, mode, &source, &self.inner.settings)
            .await?
        {
            PreparedWorkspace::None => {}
            PreparedWorkspace::Worktree(worktree) => record.worktree = Some(worktree),
            PreparedWorkspace::Container(isolation) => record.isolation = Some(isolation),
        }

        let handle = Arc::new(ClusterHandle::new(record, bus));
        self.inner
            .clusters
            .lock()
            .insert(id.clone(), Arc::clone(&handle));

        // 5. Orchestrator-level subscriptions are wired FIRST
        events::wire(self, &handle);

        // 6. Then agents are constructed and started
        for agent_config in config.agents {
            self.add_agent(&handle, agent_config, true);
        }

        // 7. Then the initial input message is published
        let initial = Message::new(
            topics::ISSUE_OPENED,
            SENDER_ORCHESTRATOR,
            MessageContent {
                text: Some(input.task_text()),
                data: input.data(),
            },
        )
        .with_metadata(json!({ "source": "cluster_start" }));
        handle.bus.publish(initial).await?;

        // 8. Barrier released: the cluster is safe to stop from now on
        handle.set_state(ClusterState::Running);
        handle.release_init_barrier();

        // 9. Persist
        self.persist(&handle)?;
        info!(cluster = %id, "cluster started");
        Ok(id)
    }

    /// Construct an agent bound to the cluster, register it in the roster,
    /// and optionally start it.
    pub(crate) fn add_agent(
        &self,
        handle: &Arc<ClusterHandle>,
        config: AgentConfig,
        start_now: bool,
    ) -> Agent {
        let workspace_dir = handle.record.lock().workspace_dir().cloned();
        let spawner: Arc<dyn ClusterSpawner> = Arc::new(self.clone());
        let record = handle.record.lock();
        let created_at = record.created_at;
        drop(record);

        handle.roster.write().push(AgentRef {
            id: config.id.clone(),
            role: config.role.clone(),
        });

        let agent = Agent::new(
            config,
            AgentDeps {
                bus: handle.bus.clone(),
                cluster_id: handle.id.clone(),
                cluster_created_at: created_at,
                roster: Arc::clone(&handle.roster),
                default_model: self.inner.settings.default_model.clone(),
                workspace_dir,
                retry: RetryPolicy::default(),
                stale_window: DEFAULT_STALE_WINDOW,
                spawner: Some(spawner),
            },
        );
        if start_now {
            agent.start();
        }
        handle.agents.lock().push(agent.clone());
        agent
    }

    /// Stop a cluster, preserving its workspace for resume.
    pub async fn stop(&self, id: &ClusterId) -> Result<(), OrchestratorError> {
        let Some(handle) = self.handle(id) else {
            return self.stop_unowned(id);
        };
        self.stop_with_state(&handle, ClusterState::Stopped).await
    }

    /// Shared stop path; `final_state` is `stopped` or `failed`.
    pub(crate) async fn stop_with_state(
        &self,
        handle: &Arc<ClusterHandle>,
        final_state: ClusterState,
    ) -> Result<(), OrchestratorError> {
        // Never stop a cluster that has not yet published its initial
        // input; that would leave a zero-message "corrupted" entry.
        handle.await_init_barrier().await;

        if handle.state().is_terminal() {
            return Ok(());
        }
        handle.set_state(ClusterState::Stopping);

        let agents: Vec<Agent> = handle.agents.lock().clone();
        for agent in &agents {
            agent.stop().await;
        }
        for subscription in handle.subscriptions.lock().drain(..) {
            subscription.unsubscribe();
        }

        let isolation = handle.record.lock().isolation.clone();
        if let Err(e) = self.inner.isolation.stop(&handle.id, isolation.as_ref()).await {
            warn!(cluster = %handle.id, error = %e, "isolation stop failed");
        }

        handle.snapshot_agent_states();
        {
            let mut record = handle.record.lock();
            record.state = final_state;
            record.pid = None;
        }
        self.persist(handle)?;
        handle.bus.close();
        handle.mark_terminal(final_state);
        self.inner.clusters.lock().remove(&handle.id);
        info!(cluster = %handle.id, state = %final_state, "cluster stopped");
        Ok(())
    }

    /// Stop a cluster this process does not own: clears zombies.
    fn stop_unowned(&self, id: &ClusterId) -> Result<(), OrchestratorError> {
        let entries = self.inner.registry.load()?;
        let Some(mut record) = entries.get(id).cloned() else {
            return Err(OrchestratorError::NotFound(id.clone()));
        };
        match record.state {
            ClusterState::Running if record.pid.map(pid_alive).unwrap_or(false) => {
                Err(OrchestratorError::AlreadyRunning(id.clone()))
            }
            ClusterState::Running => {
                record.state = ClusterState::Stopped;
                record.pid = None;
                let mut upserts = HashMap::new();
                upserts.insert(id.clone(), record);
                self.inner.registry.save_merge(&upserts, &[])?;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Kill a cluster: no graceful shutdown, workspace and container are
    /// deleted, the registry entry and ledger are removed.
    pub async fn kill(&self, id: &ClusterId) -> Result<(), OrchestratorError> {
        let owned = self.inner.clusters.lock().remove(id);
        if let Some(handle) = owned {
            for subscription in handle.subscriptions.lock().drain(..) {
                subscription.unsubscribe();
            }
            let agents: Vec<Agent> = handle.agents.lock().clone();
            for agent in &agents {
                agent.stop().await;
            }
            let (isolation, worktree) = {
                let record = handle.record.lock();
                (record.isolation.clone(), record.worktree.clone())
            };
            self.inner
                .isolation
                .kill(id, isolation.as_ref(), worktree.as_ref())
                .await?;
            handle.bus.close();
            handle.mark_terminal(ClusterState::Killed);
        } else {
            let entries = self.inner.registry.load()?;
            let Some(record) = entries.get(id) else {
                return Err(OrchestratorError::NotFound(id.clone()));
            };
            self.inner
                .isolation
                .kill(id, record.isolation.as_ref(), record.worktree.as_ref())
                .await?;
        }

        Ledger::remove(&self.inner.storage_dir, id)?;
        self.inner.registry.save_merge(&HashMap::new(), &[id.clone()])?;
        info!(cluster = %id, "cluster killed");
        Ok(())
    }

    /// Mark a cluster failed and persist before the process exits.
    ///
    /// The fatal-error path for surrounding CLIs; never panics.
    pub async fn mark_failed(&self, id: &ClusterId, reason: &str) {
        if let Some(handle) = self.handle(id) {
            handle.record.lock().failure_info = Some(FailureInfo {
                agent_id: None,
                role: None,
                task_id: None,
                iteration: 0,
                reason: reason.to_string(),
                failed_at: SystemClock.epoch_ms(),
            });
            if let Err(e) = self.stop_with_state(&handle, ClusterState::Failed).await {
                warn!(cluster = %id, error = %e, "failed to persist failure state");
            }
        }
    }

    /// Record failure info and stop with state `failed`. Used by the
    /// orchestrator's own event handlers.
    pub(crate) async fn fail_cluster(&self, handle: &Arc<ClusterHandle>, info: FailureInfo) {
        handle.record.lock().failure_info = Some(info);
        if let Err(e) = self.stop_with_state(handle, ClusterState::Failed).await {
            warn!(cluster = %handle.id, error = %e, "failed to stop failed cluster");
        }
    }

    /// Persist this cluster's record into the shared registry.
    pub(crate) fn persist(&self, handle: &Arc<ClusterHandle>) -> Result<(), OrchestratorError> {
        let record = handle.record.lock().clone();
        let mut upserts = HashMap::new();
        upserts.insert(handle.id.clone(), record);
        self.inner.registry.save_merge(&upserts, &[])?;
        Ok(())
    }

    /// All registry entries with zombie-aware effective states.
    pub fn list(&self) -> Result<Vec<ClusterStatus>, OrchestratorError> {
        let entries = self.inner.registry.load()?;
        let mut statuses: Vec<ClusterStatus> = entries
            .into_values()
            .map(|record| {
                let state = effective_state(&record);
                ClusterStatus { record, state }
            })
            .collect();
        statuses.sort_by_key(|s| s.record.created_at);
        Ok(statuses)
    }

    /// One cluster's status.
    pub fn status(&self, id: &ClusterId) -> Result<ClusterStatus, OrchestratorError> {
        let entries = self.inner.registry.load()?;
        entries
            .get(id)
            .map(|record| ClusterStatus {
                record: record.clone(),
                state: effective_state(record),
            })
            .ok_or_else(|| OrchestratorError::NotFound(id.clone()))
    }

    /// Full message history of a cluster, readable cross-process.
    pub fn export(&self, id: &ClusterId) -> Result<Vec<Message>, OrchestratorError> {
        let ledger = Ledger::open_existing(&self.inner.storage_dir, id.clone())?;
        Ok(ledger.get_all()?)
    }

    /// Startup scan: drop orphan registry entries whose ledger file is
    /// gone, and mark zero-message clusters corrupted.
    pub fn startup_scan(&self) -> Result<Vec<ClusterStatus>, OrchestratorError> {
        let entries = self.inner.registry.load()?;
        let mut upserts = HashMap::new();
        let mut removals = Vec::new();

        for (id, record) in &entries {
            if !Ledger::exists(&self.inner.storage_dir, id) {
                warn!(cluster = %id, "dropping orphan registry entry, ledger missing");
                removals.push(id.clone());
                continue;
            }
            let ledger = Ledger::open(&self.inner.storage_dir, id.clone())?;
            if ledger.count(None)? == 0 && record.state != ClusterState::Corrupted {
                warn!(cluster = %id, "zero-message cluster marked corrupted");
                let mut corrupted = record.clone();
                corrupted.state = ClusterState::Corrupted;
                corrupted.pid = None;
                upserts.insert(id.clone(), corrupted);
            }
        }

        if !upserts.is_empty() || !removals.is_empty() {
            self.inner.registry.save_merge(&upserts, &removals)?;
        }
        self.list()
    }
}

fn effective_state(record: &ClusterRecord) -> ClusterState {
    if record.state == ClusterState::Running {
        match record.pid {
            Some(pid) if pid_alive(pid) => ClusterState::Running,
            _ => ClusterState::Zombie,
        }
    } else {
        record.state
    }
}

#[async_trait]
impl<R: ContainerRuntime> ClusterSpawner for Orchestrator<R> {
    async fn run_subcluster(
        &self,
        config: ConfigRef,
        input: ClusterInput,
    ) -> Result<SubclusterOutcome, String> {
        let resolved = {
            let resolver = self.inner.resolver.read();
            crate::operations::resolve(&resolver, &config).map_err(|e| e.to_string())?
        };
        let id = self
            .start(resolved, input, StartOptions::default())
            .await
            .map_err(|e| e.to_string())?;
        let handle = self
            .handle(&id)
            .ok_or_else(|| "child cluster terminated before tracking".to_string())?;

        let _terminal = handle.await_terminal().await;

        let completion = handle
            .bus
            .find_last(topics::CLUSTER_COMPLETE)
            .map_err(|e| e.to_string())?;
        let success = completion.is_some();
        let summary = completion.and_then(|m| m.content.text);
        Ok(SubclusterOutcome {
            cluster_id: id,
            success,
            summary,
        })
    }
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;
