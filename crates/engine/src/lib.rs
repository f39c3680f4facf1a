// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Agent runtime: the in-process message bus over the ledger, the agent
//! state machine with child-process supervision, hook execution, and
//! process metrics.

mod agent;
mod bus;
mod context;
mod error;
mod hooks;
mod metrics;
mod spawn;
mod stream;
mod subcluster;

pub use agent::{Agent, AgentDeps, ResumeContext, DEFAULT_STALE_WINDOW};
pub use bus::{MessageBus, SubscriptionHandle};
pub use context::build_prompt;
pub use error::{HookError, TaskError};
pub use hooks::{run_on_complete, HookInputs};
pub use metrics::{sample_process, ProcessSample};
pub use spawn::build_argv;
pub use stream::{parse_line, parse_result_output, ChildEvent};
pub use subcluster::{ClusterSpawner, SubclusterOutcome};
