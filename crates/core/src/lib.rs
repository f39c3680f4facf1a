// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! zs-core: Shared types for the zeroshot coordination engine

pub mod agent;
pub mod clock;
pub mod cluster;
pub mod env;
pub mod id;
pub mod input;
pub mod message;
pub mod retry;
pub mod settings;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use agent::{
    topic_matches, AgentConfig, AgentHooks, AgentKind, AgentPhase, AgentRuntimeState, HookDef,
    LogicDef, SubclusterDef, TransformDef, Trigger, TriggerAction,
};
pub use clock::{Clock, FakeClock, SystemClock};
pub use cluster::{
    AgentStateSnapshot, ClusterConfig, ClusterRecord, ClusterState, ConfigRef, FailureInfo,
    IsolationMode, IsolationRecord, WorktreeRecord,
};
pub use id::{ClusterId, IdGen, SequentialIdGen, TaskId, UuidIdGen};
pub use input::ClusterInput;
pub use message::{topics, Message, MessageContent, RECEIVER_BROADCAST, SENDER_ORCHESTRATOR, SENDER_SYSTEM};
pub use retry::RetryPolicy;
pub use settings::{Settings, SettingsError};
