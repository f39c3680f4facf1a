// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The agent state machine.
//!
//! idle -> evaluating on a matching bus delivery; evaluating -> idle when
//! the predicate is false; evaluating -> executing_task when it holds.
//! Task execution runs on its own tokio task so bus handlers stay fast.
//! Transient child failures retry with backoff; every transition is
//! observable as an `AGENT_LIFECYCLE` or `AGENT_ERROR` message.

use crate::bus::{MessageBus, SubscriptionHandle};
use crate::context::{build_prompt, resume_preamble};
use crate::error::TaskError;
use crate::hooks::{run_on_complete, HookInputs};
use crate::metrics::sample_process;
use crate::spawn::{build_argv, spawn_child, wait_and_classify, RunningChild};
use crate::stream::{parse_line, parse_result_output, ChildEvent};
use crate::subcluster::ClusterSpawner;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use zs_core::message::topics;
use zs_core::{
    topic_matches, AgentConfig, AgentKind, AgentPhase, AgentRuntimeState, ClusterId, ClusterInput,
    Clock, Message, MessageContent, RetryPolicy, SystemClock, TaskId, TriggerAction,
};
use zs_logic::{AgentRef, LogicEngine, ScriptContext};

/// Default stale-output warning window.
pub const DEFAULT_STALE_WINDOW: Duration = Duration::from_secs(120);

/// Budget for the child's first output before the attempt is abandoned.
const FIRST_OUTPUT_TIMEOUT: Duration = Duration::from_secs(120);

/// Grace period between SIGTERM and SIGKILL when stopping an agent.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Context handed to a resumed agent after a failure or stop.
#[derive(Debug, Clone)]
pub struct ResumeContext {
    /// "You previously failed" preamble with curated recent messages.
    pub preamble: String,
    /// The message the resumed task re-enters with.
    pub trigger: Message,
}

impl ResumeContext {
    pub fn from_failure(error: &str, recent: &[Message], trigger: Message) -> Self {
        Self {
            preamble: resume_preamble(error, recent),
            trigger,
        }
    }
}

/// Dependencies injected by the orchestrator at agent construction.
pub struct AgentDeps {
    pub bus: MessageBus,
    pub cluster_id: ClusterId,
    pub cluster_created_at: u64,
    /// Shared roster of (id, role) pairs for predicate helpers.
    pub roster: Arc<RwLock<Vec<AgentRef>>>,
    pub default_model: Option<String>,
    /// Workspace directory injected as the child's cwd when the agent
    /// config does not pin one.
    pub workspace_dir: Option<PathBuf>,
    pub retry: RetryPolicy,
    pub stale_window: Duration,
    /// Present only for subcluster agents.
    pub spawner: Option<Arc<dyn ClusterSpawner>>,
}

struct Shared {
    config: RwLock<AgentConfig>,
    bus: MessageBus,
    cluster_id: ClusterId,
    cluster_created_at: u64,
    roster: Arc<RwLock<Vec<AgentRef>>>,
    default_model: Option<String>,
    workspace_dir: Option<PathBuf>,
    retry: RetryPolicy,
    stale_window: Duration,
    spawner: Option<Arc<dyn ClusterSpawner>>,
    state: Mutex<AgentRuntimeState>,
    stopping: AtomicBool,
    busy: AtomicBool,
    subscription: Mutex<Option<SubscriptionHandle>>,
}

/// A configured worker bound to its cluster's bus.
#[derive(Clone)]
pub struct Agent {
    shared: Arc<Shared>,
}

impl Agent {
    pub fn new(config: AgentConfig, deps: AgentDeps) -> Self {
        Self {
            shared: Arc::new(Shared {
                config: RwLock::new(config),
                bus: deps.bus,
                cluster_id: deps.cluster_id,
                cluster_created_at: deps.cluster_created_at,
                roster: deps.roster,
                default_model: deps.default_model,
                workspace_dir: deps.workspace_dir,
                retry: deps.retry,
                stale_window: deps.stale_window,
                spawner: deps.spawner,
                state: Mutex::new(AgentRuntimeState::default()),
                stopping: AtomicBool::new(false),
                busy: AtomicBool::new(false),
                subscription: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> String {
        self.shared.config.read().id.clone()
    }

    pub fn role(&self) -> String {
        self.shared.config.read().role.clone()
    }

    pub fn config(&self) -> AgentConfig {
        self.shared.config.read().clone()
    }

    /// Shallow-merge updates into the agent config (`update_agent` op).
    pub fn update_config(&self, updates: &Value) {
        let mut config = self.shared.config.write();
        if let Ok(mut tree) = serde_json::to_value(&*config) {
            if let (Some(target), Some(patch)) = (tree.as_object_mut(), updates.as_object()) {
                for (key, value) in patch {
                    if key == "id" {
                        continue; // identity is immutable
                    }
                    target.insert(key.clone(), value.clone());
                }
            }
            if let Ok(merged) = serde_json::from_value::<AgentConfig>(tree) {
                *config = merged;
            }
        }
    }

    /// Current runtime state snapshot.
    pub fn state(&self) -> AgentRuntimeState {
        self.shared.state.lock().clone()
    }

    /// Subscribe to the bus and start the liveness watcher. Idempotent.
    pub fn start(&self) {
        let mut subscription = self.shared.subscription.lock();
        if subscription.is_some() {
            return;
        }
        let shared = Arc::clone(&self.shared);
        let handle = self.shared.bus.subscribe(Arc::new(move |message| {
            let shared = Arc::clone(&shared);
            Box::pin(async move {
                Shared::on_message(shared, message).await;
                Ok(())
            })
        }));
        *subscription = Some(handle);
        drop(subscription);

        Shared::spawn_liveness_watcher(Arc::clone(&self.shared));
        debug!(agent = %self.id(), "agent started");
    }

    /// Stop accepting triggers and terminate any in-flight child process
    /// gracefully, escalating to SIGKILL after a deadline.
    pub async fn stop(&self) {
        self.shared.stopping.store(true, Ordering::SeqCst);
        if let Some(subscription) = self.shared.subscription.lock().take() {
            subscription.unsubscribe();
        }

        let pid = self.shared.state.lock().process_pid;
        if let Some(pid) = pid {
            terminate_pid(pid, STOP_GRACE).await;
        }

        let mut state = self.shared.state.lock();
        state.state = AgentPhase::Stopped;
        state.process_pid = None;
        info!(agent = %self.id(), "agent stopped");
    }

    /// Re-enter task execution with an appended resume context.
    pub fn resume(&self, context: ResumeContext) {
        if self.shared.busy.swap(true, Ordering::SeqCst) {
            warn!(agent = %self.id(), "resume ignored, agent busy");
            return;
        }
        self.shared.stopping.store(false, Ordering::SeqCst);
        Shared::spawn_liveness_watcher(Arc::clone(&self.shared));
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            Shared::execute_task(shared, context.trigger, Some(context.preamble)).await;
        });
    }
}

impl Shared {
    async fn on_message(shared: Arc<Self>, message: Message) {
        if shared.stopping.load(Ordering::SeqCst) {
            return;
        }
        let config = shared.config.read().clone();
        if message.sender == config.id {
            return;
        }
        if message.receiver != zs_core::RECEIVER_BROADCAST && message.receiver != config.id {
            return;
        }

        let matching: Vec<_> = config
            .triggers
            .iter()
            .filter(|t| topic_matches(&t.topic, &message.topic))
            .cloned()
            .collect();
        if matching.is_empty() {
            return;
        }
        if shared.busy.load(Ordering::SeqCst) {
            debug!(agent = %config.id, topic = %message.topic, "busy, trigger skipped");
            return;
        }

        shared.set_phase(AgentPhase::Evaluating);

        for trigger in matching {
            if let Some(logic) = &trigger.logic {
                let ctx = ScriptContext {
                    cluster_id: shared.cluster_id.to_string(),
                    cluster_created_at: shared.cluster_created_at,
                    iteration: shared.state.lock().iteration,
                    message: Some(message.clone()),
                    agents: shared.roster.read().clone(),
                    ledger: Some(shared.bus.ledger()),
                    ..Default::default()
                };
                // A predicate that errors is false: back to idle, no spawn
                if !LogicEngine::eval_predicate(&logic.script, ctx).await {
                    continue;
                }
            }

            match &trigger.action {
                TriggerAction::ExecuteTask => {
                    if shared.busy.swap(true, Ordering::SeqCst) {
                        break;
                    }
                    let task_shared = Arc::clone(&shared);
                    let trigger_message = message.clone();
                    tokio::spawn(async move {
                        Shared::execute_task(task_shared, trigger_message, None).await;
                    });
                    return;
                }
                TriggerAction::StopCluster => {
                    let config_id = config.id.clone();
                    let done = Message::new(
                        topics::CLUSTER_COMPLETE,
                        config_id.clone(),
                        MessageContent::text(format!("cluster completion requested by {config_id}")),
                    );
                    if let Err(e) = shared.bus.publish(done).await {
                        warn!(agent = %config_id, error = %e, "failed to publish completion");
                    }
                    shared.set_phase(AgentPhase::Idle);
                    return;
                }
                TriggerAction::Custom(name) => {
                    warn!(agent = %config.id, action = %name, "unknown custom trigger action");
                }
            }
        }

        shared.set_phase(AgentPhase::Idle);
    }

    async fn execute_task(shared: Arc<Self>, trigger: Message, preamble: Option<String>) {
        let config = shared.config.read().clone();
        let task_id = TaskId::new(uuid::Uuid::new_v4().to_string());
        let mut attempt = 0u32;

        loop {
            if shared.stopping.load(Ordering::SeqCst) {
                shared.finish(AgentPhase::Stopped);
                return;
            }
            attempt += 1;
            let iteration = {
                let mut state = shared.state.lock();
                state.iteration += 1;
                state.state = AgentPhase::ExecutingTask;
                state.current_task_id = Some(task_id.clone());
                state.iteration
            };

            let model = config
                .model
                .clone()
                .or_else(|| shared.default_model.clone());
            shared
                .publish_lifecycle(
                    "TASK_STARTED",
                    json!({
                        "iteration": iteration,
                        "model": model.clone(),
                        "task_id": task_id.as_str(),
                    }),
                )
                .await;

            let outcome = if config.kind == AgentKind::Subcluster {
                Self::attempt_subcluster(&shared, &config, &trigger).await
            } else {
                Self::attempt_child(&shared, &config, &trigger, iteration, preamble.as_deref())
                    .await
            };

            if shared.stopping.load(Ordering::SeqCst) {
                let mut state = shared.state.lock();
                state.state = AgentPhase::Stopped;
                state.process_pid = None;
                shared.busy.store(false, Ordering::SeqCst);
                return;
            }

            match outcome {
                Ok((result, output_len)) => {
                    shared
                        .publish_lifecycle(
                            "TASK_COMPLETED",
                            json!({ "iteration": iteration, "task_id": task_id.as_str() }),
                        )
                        .await;

                    let hook = config.hooks.as_ref().and_then(|h| h.on_complete.as_ref());
                    if let Some(hook) = hook {
                        let inputs = HookInputs {
                            agent_id: config.id.clone(),
                            agent_model: model.clone(),
                            task_id: task_id.to_string(),
                            iteration,
                            cluster_id: shared.cluster_id.to_string(),
                            cluster_created_at: shared.cluster_created_at,
                            result: result.clone(),
                            output_len,
                            error_message: None,
                        };
                        if let Err(hook_err) = run_on_complete(hook, &shared.bus, inputs).await {
                            // Hook failures are terminal for the owning role
                            shared
                                .publish_error(&config, &task_id, iteration, attempt, true, &hook_err.to_string())
                                .await;
                            shared.finish(AgentPhase::Idle);
                            return;
                        }
                    }

                    shared.finish(AgentPhase::Idle);
                    return;
                }
                Err(task_err) => {
                    let retryable =
                        task_err.is_retryable() && shared.retry.allows_retry(attempt);
                    shared
                        .publish_error(&config, &task_id, iteration, attempt, !retryable, &task_err.to_string())
                        .await;

                    if !retryable {
                        shared.finish(AgentPhase::Idle);
                        return;
                    }

                    shared.set_phase(AgentPhase::Error);
                    tokio::time::sleep(shared.retry.delay_before(attempt + 1)).await;
                }
            }
        }
    }

    /// One child-process attempt: spawn, stream, classify.
    async fn attempt_child(
        shared: &Arc<Self>,
        config: &AgentConfig,
        trigger: &Message,
        iteration: u32,
        preamble: Option<&str>,
    ) -> Result<(Option<Value>, usize), TaskError> {
        let prompt = {
            let config = config.clone();
            let trigger = trigger.clone();
            let ledger = shared.bus.ledger();
            let preamble = preamble.map(String::from);
            tokio::task::spawn_blocking(move || {
                build_prompt(&config, &trigger, &ledger, iteration, preamble.as_deref())
            })
            .await
            .map_err(|e| TaskError::ChildSpawn(e.to_string()))?
        };

        let argv = build_argv(config, shared.default_model.as_deref());
        let cwd = config
            .cwd
            .clone()
            .or_else(|| shared.workspace_dir.clone());
        let env = vec![(
            "ZEROSHOT_CLUSTER_ID".to_string(),
            shared.cluster_id.to_string(),
        )];

        let mut running: RunningChild = spawn_child(&argv, &prompt, cwd.as_deref(), &env)?;
        shared.state.lock().process_pid = running.pid;

        let mut result_event: Option<ChildEvent> = None;
        let mut output_len = 0usize;
        let mut saw_output = false;

        loop {
            let next = if saw_output {
                running.stdout.next_line().await
            } else {
                match tokio::time::timeout(FIRST_OUTPUT_TIMEOUT, running.stdout.next_line()).await
                {
                    Ok(next) => next,
                    Err(_) => {
                        crate::spawn::stop_child(running.child, Duration::from_secs(1)).await;
                        return Err(TaskError::ChildTimeout(FIRST_OUTPUT_TIMEOUT));
                    }
                }
            };

            let line = match next {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(_) => break,
            };

            saw_output = true;
            output_len += line.len();
            shared.state.lock().last_output_at = Some(SystemClock.epoch_ms());

            let output = Message::new(
                topics::AGENT_OUTPUT,
                config.id.clone(),
                MessageContent::data(json!({ "line": line })),
            );
            if let Err(e) = shared.bus.publish(output).await {
                warn!(agent = %config.id, error = %e, "failed to publish output line");
            }

            if let Some(event) = parse_line(&line) {
                if matches!(event, ChildEvent::Result { .. }) {
                    result_event = Some(event);
                }
            }

            if shared.stopping.load(Ordering::SeqCst) {
                crate::spawn::stop_child(running.child, Duration::from_secs(1)).await;
                return Err(TaskError::ChildSpawn("stopped".to_string()));
            }
        }

        shared.state.lock().process_pid = None;
        wait_and_classify(running).await?;

        match result_event {
            Some(ChildEvent::Result {
                success: true,
                output,
                ..
            }) => {
                let parsed = output.as_deref().and_then(parse_result_output);
                Ok((parsed, output_len))
            }
            Some(ChildEvent::Result {
                success: false,
                error,
                ..
            }) => Err(TaskError::ResultFailure(
                error.unwrap_or_else(|| "child reported failure".to_string()),
            )),
            _ => Ok((None, output_len)),
        }
    }

    async fn attempt_subcluster(
        shared: &Arc<Self>,
        config: &AgentConfig,
        trigger: &Message,
    ) -> Result<(Option<Value>, usize), TaskError> {
        let Some(spawner) = &shared.spawner else {
            return Err(TaskError::Subcluster(
                "no cluster spawner injected".to_string(),
            ));
        };
        let Some(def) = &config.subcluster else {
            return Err(TaskError::Subcluster(
                "subcluster agent without subcluster config".to_string(),
            ));
        };

        let input = ClusterInput::text(
            trigger
                .content
                .text
                .clone()
                .unwrap_or_else(|| trigger.topic.clone()),
        );
        let outcome = spawner
            .run_subcluster(def.config.clone(), input)
            .await
            .map_err(TaskError::Subcluster)?;

        let result = json!({
            "success": outcome.success,
            "cluster_id": outcome.cluster_id.as_str(),
            "summary": outcome.summary,
        });
        if outcome.success {
            Ok((Some(result), 0))
        } else {
            Err(TaskError::Subcluster(
                outcome.summary.unwrap_or_else(|| "subcluster failed".to_string()),
            ))
        }
    }

    fn set_phase(&self, phase: AgentPhase) {
        self.state.lock().state = phase;
    }

    fn finish(&self, phase: AgentPhase) {
        let mut state = self.state.lock();
        state.state = phase;
        state.current_task_id = None;
        state.process_pid = None;
        drop(state);
        self.busy.store(false, Ordering::SeqCst);
    }

    async fn publish_lifecycle(&self, event: &str, extra: Value) {
        let config = self.config.read().clone();
        let mut data = json!({
            "event": event,
            "agent_id": config.id,
            "role": config.role,
        });
        if let (Some(target), Some(patch)) = (data.as_object_mut(), extra.as_object()) {
            for (key, value) in patch {
                target.insert(key.clone(), value.clone());
            }
        }
        let message = Message::new(
            topics::AGENT_LIFECYCLE,
            config.id.clone(),
            MessageContent::data(data),
        );
        if let Err(e) = self.bus.publish(message).await {
            warn!(agent = %config.id, event, error = %e, "failed to publish lifecycle event");
        }
    }

    async fn publish_error(
        &self,
        config: &AgentConfig,
        task_id: &TaskId,
        iteration: u32,
        attempts: u32,
        terminal: bool,
        error: &str,
    ) {
        let message = Message::new(
            topics::AGENT_ERROR,
            config.id.clone(),
            MessageContent::data(json!({
                "agent_id": config.id,
                "role": config.role,
                "task_id": task_id.as_str(),
                "iteration": iteration,
                "attempts": attempts,
                "terminal": terminal,
                "error": error,
            })),
        );
        if let Err(e) = self.bus.publish(message).await {
            warn!(agent = %config.id, error = %e, "failed to publish agent error");
        }
    }

    /// Periodic stale-output watcher. Warning only; the orchestrator never
    /// auto-kills on staleness.
    fn spawn_liveness_watcher(shared: Arc<Self>) {
        tokio::spawn(async move {
            let mut last_warned_for: Option<u64> = None;
            let mut ticker = tokio::time::interval(shared.stale_window / 2);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if shared.stopping.load(Ordering::SeqCst) {
                    return;
                }
                let (phase, last_output, pid) = {
                    let state = shared.state.lock();
                    (state.state, state.last_output_at, state.process_pid)
                };
                if phase != AgentPhase::ExecutingTask {
                    last_warned_for = None;
                    continue;
                }
                let Some(last_output) = last_output else {
                    continue;
                };
                let now = SystemClock.epoch_ms();
                let stale_ms = shared.stale_window.as_millis() as u64;
                if now.saturating_sub(last_output) < stale_ms {
                    continue;
                }
                if last_warned_for == Some(last_output) {
                    continue;
                }
                last_warned_for = Some(last_output);

                let metrics = pid.and_then(sample_process);
                shared
                    .publish_lifecycle(
                        "AGENT_STALE_WARNING",
                        json!({
                            "last_output_at": last_output,
                            "stale_ms": now.saturating_sub(last_output),
                            "rss_bytes": metrics.as_ref().map(|m| m.rss_bytes),
                        }),
                    )
                    .await;
            }
        });
    }
}

/// SIGTERM then SIGKILL after the grace period, by pid.
async fn terminate_pid(pid: u32, grace: Duration) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let target = Pid::from_raw(pid as i32);
    if kill(target, Signal::SIGTERM).is_err() {
        return; // already gone
    }
    tokio::time::sleep(grace).await;
    if kill(target, None).is_ok() {
        warn!(pid, "process ignored SIGTERM, sending SIGKILL");
        let _ = kill(target, Signal::SIGKILL);
    }
}

#[cfg(test)]
#[path = "agent_tests.rs"]
mod tests;
