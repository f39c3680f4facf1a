// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Live cluster handle: the in-memory side of a registry record.

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use zs_core::{AgentStateSnapshot, ClusterId, ClusterRecord, ClusterState};
use zs_engine::{Agent, MessageBus, SubscriptionHandle};
use zs_logic::AgentRef;

/// How long `stop` waits for the initialization barrier before proceeding.
pub const INIT_BARRIER_TIMEOUT: Duration = Duration::from_secs(30);

/// A cluster owned by this process: persisted record plus the live ledger,
/// bus, and agents.
pub struct ClusterHandle {
    pub id: ClusterId,
    pub record: Mutex<ClusterRecord>,
    pub bus: MessageBus,
    pub agents: Mutex<Vec<Agent>>,
    /// Shared (id, role) roster injected into predicate contexts.
    pub roster: Arc<RwLock<Vec<AgentRef>>>,
    /// Orchestrator-level bus subscriptions, dropped on stop.
    pub subscriptions: Mutex<Vec<SubscriptionHandle>>,
    init_tx: watch::Sender<bool>,
    init_rx: watch::Receiver<bool>,
    terminal_tx: watch::Sender<Option<ClusterState>>,
    terminal_rx: watch::Receiver<Option<ClusterState>>,
}

impl ClusterHandle {
    pub fn new(record: ClusterRecord, bus: MessageBus) -> Self {
        let (init_tx, init_rx) = watch::channel(false);
        let (terminal_tx, terminal_rx) = watch::channel(None);
        Self {
            id: record.id.clone(),
            record: Mutex::new(record),
            bus,
            agents: Mutex::new(Vec::new()),
            roster: Arc::new(RwLock::new(Vec::new())),
            subscriptions: Mutex::new(Vec::new()),
            init_tx,
            init_rx,
            terminal_tx,
            terminal_rx,
        }
    }

    /// Release the initialization barrier: the initial input message is
    /// durably published and the cluster is safe to stop.
    pub fn release_init_barrier(&self) {
        let _ = self.init_tx.send(true);
    }

    /// Wait for the initialization barrier with a bounded timeout.
    ///
    /// Prevents a stop racing cluster start from leaving a zero-message
    /// (hence "corrupted") registry entry.
    pub async fn await_init_barrier(&self) {
        let mut rx = self.init_rx.clone();
        let _ = tokio::time::timeout(INIT_BARRIER_TIMEOUT, rx.wait_for(|ready| *ready)).await;
    }

    /// Record the terminal state and wake any subcluster parent waiting on
    /// this cluster.
    pub fn mark_terminal(&self, state: ClusterState) {
        let _ = self.terminal_tx.send(Some(state));
    }

    /// Wait for this cluster to reach a terminal state.
    pub async fn await_terminal(&self) -> ClusterState {
        let mut rx = self.terminal_rx.clone();
        let result = match rx.wait_for(|s| s.is_some()).await {
            Ok(state) => (*state).unwrap_or(ClusterState::Stopped),
            Err(_) => ClusterState::Stopped,
        };
        result
    }

    /// Snapshot agent runtime states into the record for cross-process
    /// status display.
    pub fn snapshot_agent_states(&self) {
        let snapshots: Vec<AgentStateSnapshot> = self
            .agents
            .lock()
            .iter()
            .map(|agent| AgentStateSnapshot {
                agent_id: agent.id(),
                role: agent.role(),
                state: agent.state(),
            })
            .collect();
        self.record.lock().agent_states = snapshots;
    }

    pub fn state(&self) -> ClusterState {
        self.record.lock().state
    }

    pub fn set_state(&self, state: ClusterState) {
        self.record.lock().state = state;
    }
}

#[cfg(test)]
#[path = "cluster_tests.rs"]
mod tests;
