// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test builders, enabled with the `test-support` feature.

use crate::message::{Message, MessageContent};

/// A message pre-stamped with an id and timestamp, as if already published.
///
/// Ledger-level tests append these directly instead of going through a bus.
pub fn seeded_message(topic: &str, sender: &str, content: MessageContent) -> Message {
    let mut message = Message::new(topic, sender, content);
    message.id = format!("test-{}-{}", topic, sender);
    message.timestamp = 1_000;
    message
}
