// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Resume: re-enter a failed or cleanly stopped cluster.
//!
//! Both paths rebuild the live cluster around the preserved ledger and
//! workspace. The failed path hands the failed agent a "you previously
//! failed" context; the stopped path re-triggers from the most recent
//! workflow-trigger message in the ledger.

use crate::cluster::ClusterHandle;
use crate::error::OrchestratorError;
use crate::events;
use crate::orchestrator::Orchestrator;
use crate::pid::pid_alive;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use zs_core::message::topics;
use zs_core::{
    Clock, ClusterId, ClusterRecord, ClusterState, Message, SystemClock,
};
use zs_engine::{MessageBus, ResumeContext};
use zs_isolation::ContainerRuntime;
use zs_logic::{LogicEngine, ScriptContext};
use zs_storage::{Ledger, MessageQuery, StorageError};

/// Messages of each diagnostic topic included in a failure-resume context.
const RESUME_CONTEXT_LIMIT: usize = 5;

impl<R: ContainerRuntime> Orchestrator<R> {
    /// Resume a failed or stopped cluster. `prompt` is appended to the
    /// resume context when present.
    pub async fn resume(
        &self,
        id: &ClusterId,
        prompt: Option<&str>,
    ) -> Result<(), OrchestratorError> {
        if self.handle(id).is_some() {
            return Err(OrchestratorError::AlreadyRunning(id.clone()));
        }

        let entries = self.inner.registry.load()?;
        let record = entries
            .get(id)
            .cloned()
            .ok_or_else(|| OrchestratorError::NotFound(id.clone()))?;

        let failed = match record.state {
            ClusterState::Failed => true,
            ClusterState::Stopped => false,
            // A zombie resumes like a stopped cluster once its owner is gone
            ClusterState::Running if !record.pid.map(pid_alive).unwrap_or(false) => false,
            ClusterState::Running => {
                return Err(OrchestratorError::AlreadyRunning(id.clone()));
            }
            state => {
                return Err(OrchestratorError::BadState {
                    id: id.clone(),
                    state,
                });
            }
        };

        let handle = self.rebuild(id, record).await?;

        if failed {
            self.resume_failed(&handle, prompt).await
        } else {
            self.resume_stopped(&handle).await
        }
    }

    /// Rebuild the live cluster: preserved ledger, recreated container,
    /// reconstructed agents.
    async fn rebuild(
        &self,
        id: &ClusterId,
        mut record: ClusterRecord,
    ) -> Result<Arc<ClusterHandle>, OrchestratorError> {
        // A missing ledger means the cluster was killed, not stopped
        let ledger = match Ledger::open_existing(&self.inner.storage_dir, id.clone()) {
            Ok(ledger) => ledger,
            Err(StorageError::Missing(path)) => {
                return Err(OrchestratorError::ResumeNotPossible {
                    id: id.clone(),
                    reason: format!("ledger missing at {}", path.display()),
                });
            }
            Err(e) => return Err(e.into()),
        };
        let bus = MessageBus::new(id.clone(), Arc::new(Mutex::new(ledger)));

        // Recreate the container around the preserved workspace; the
        // workspace itself is reused, never re-copied
        if let Some(isolation) = record.isolation.clone() {
            if isolation.enabled {
                let refreshed = self
                    .inner
                    .isolation
                    .resume_container(id, &isolation, &self.inner.settings)
                    .await?;
                record.isolation = Some(refreshed);
            }
        }

        record.state = ClusterState::Running;
        record.pid = Some(std::process::id());

        let config = record.config.clone();
        let handle = Arc::new(ClusterHandle::new(record, bus));
        self.inner
            .clusters
            .lock()
            .insert(id.clone(), Arc::clone(&handle));

        events::wire(self, &handle);
        for agent_config in config.agents {
            self.add_agent(&handle, agent_config, true);
        }

        // The ledger already holds the initial input; the barrier is
        // trivially satisfied
        handle.release_init_barrier();
        self.persist(&handle)?;
        info!(cluster = %id, "cluster rebuilt for resume");
        Ok(handle)
    }

    /// Failure path: locate the failed agent, hand it a resume context.
    async fn resume_failed(
        &self,
        handle: &Arc<ClusterHandle>,
        prompt: Option<&str>,
    ) -> Result<(), OrchestratorError> {
        let failure_info = handle.record.lock().failure_info.clone();

        // Prefer recorded failure info; fall back to the earliest
        // AGENT_ERROR in the ledger
        let (agent_id, error) = match failure_info {
            Some(info) if info.agent_id.is_some() => {
                (info.agent_id.clone().unwrap_or_default(), info.reason)
            }
            _ => {
                let errors = handle
                    .bus
                    .query(&MessageQuery::topic(topics::AGENT_ERROR))?;
                let first = errors.first().ok_or_else(|| {
                    OrchestratorError::ResumeNotPossible {
                        id: handle.id.clone(),
                        reason: "no failure info and no AGENT_ERROR in ledger".to_string(),
                    }
                })?;
                let agent_id = first
                    .data_field("agent_id")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let error = first
                    .data_field("error")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown failure")
                    .to_string();
                (agent_id, error)
            }
        };

        let agent = handle
            .agents
            .lock()
            .iter()
            .find(|a| a.id() == agent_id)
            .cloned()
            .ok_or_else(|| OrchestratorError::ResumeNotPossible {
                id: handle.id.clone(),
                reason: format!("failed agent '{agent_id}' is not in the cluster config"),
            })?;

        // Curate recent diagnostic context
        let mut recent = Vec::new();
        for topic in [topics::AGENT_OUTPUT, topics::VALIDATION_RESULT] {
            recent.extend(handle.bus.query(&MessageQuery {
                topic: Some(topic.to_string()),
                limit: Some(RESUME_CONTEXT_LIMIT),
                ..Default::default()
            })?);
        }
        recent.sort_by_key(|m| m.sequence);

        let trigger = self
            .latest_workflow_trigger(handle)?
            .ok_or_else(|| OrchestratorError::ResumeNotPossible {
                id: handle.id.clone(),
                reason: "no workflow trigger message in ledger".to_string(),
            })?;

        let mut error_text = error;
        if let Some(extra) = prompt {
            error_text.push_str("\n\nOperator note: ");
            error_text.push_str(extra);
        }

        handle.record.lock().failure_info = None;
        self.persist(handle)?;

        info!(cluster = %handle.id, agent = %agent_id, "resuming failed agent");
        agent.resume(ResumeContext::from_failure(&error_text, &recent, trigger));
        Ok(())
    }

    /// Stopped path: re-trigger from the most recent workflow trigger.
    async fn resume_stopped(&self, handle: &Arc<ClusterHandle>) -> Result<(), OrchestratorError> {
        if let Some(message) = self.latest_workflow_trigger(handle)? {
            if self.any_agent_matches(handle, &message).await {
                let republished = resumed_copy(&message);
                handle.bus.publish(republished).await?;
                info!(
                    cluster = %handle.id,
                    topic = %message.topic,
                    "re-triggered from workflow message"
                );
                return Ok(());
            }
            // Nothing listens to the latest trigger; fall back to the root
            if let Some(root) = handle.bus.find_last(topics::ISSUE_OPENED)? {
                handle.bus.publish(resumed_copy(&root)).await?;
                info!(cluster = %handle.id, "re-published initial input");
                return Ok(());
            }
        }

        Err(OrchestratorError::ResumeNotPossible {
            id: handle.id.clone(),
            reason: "no workflow trigger message in ledger; start a new cluster instead"
                .to_string(),
        })
    }

    /// Most recent ledger message on a workflow-trigger topic.
    fn latest_workflow_trigger(
        &self,
        handle: &Arc<ClusterHandle>,
    ) -> Result<Option<Message>, OrchestratorError> {
        let all = handle.bus.get_all()?;
        Ok(all
            .into_iter()
            .rev()
            .find(|m| topics::WORKFLOW_TRIGGERS.contains(&m.topic.as_str())))
    }

    /// Whether any agent's triggers (topic plus predicate) match a message.
    async fn any_agent_matches(&self, handle: &Arc<ClusterHandle>, message: &Message) -> bool {
        let agents: Vec<zs_engine::Agent> = handle.agents.lock().clone();
        for agent in agents {
            let config = agent.config();
            if message.sender == config.id {
                continue;
            }
            for trigger in &config.triggers {
                if !zs_core::topic_matches(&trigger.topic, &message.topic) {
                    continue;
                }
                match &trigger.logic {
                    None => return true,
                    Some(logic) => {
                        let ctx = ScriptContext {
                            cluster_id: handle.id.to_string(),
                            cluster_created_at: handle.record.lock().created_at,
                            iteration: agent.state().iteration,
                            message: Some(message.clone()),
                            agents: handle.roster.read().clone(),
                            ledger: Some(handle.bus.ledger()),
                            ..Default::default()
                        };
                        if LogicEngine::eval_predicate(&logic.script, ctx).await {
                            return true;
                        }
                    }
                }
            }
        }
        false
    }
}

/// Copy a message for republication with the `_resumed` marker.
fn resumed_copy(original: &Message) -> Message {
    let mut metadata = match &original.metadata {
        serde_json::Value::Object(map) => map.clone(),
        _ => serde_json::Map::new(),
    };
    metadata.insert("_resumed".to_string(), json!(true));
    metadata.insert("resumed_at".to_string(), json!(SystemClock.epoch_ms()));

    let mut copy = Message::new(
        original.topic.clone(),
        original.sender.clone(),
        original.content.clone(),
    );
    copy.receiver = original.receiver.clone();
    copy.metadata = serde_json::Value::Object(metadata);
    copy.sender_model = original.sender_model.clone();
    copy
}

#[cfg(test)]
#[path = "resume_tests.rs"]
mod tests;
