// Signal bus: scoped subscriptions for global notifications.
//
// Some behaviors react to things that happen elsewhere: wandering agents
// want to hear when a task frees up, sleepers wait for dawn, sheltered
// agents wait for their bunker to be evacuated. A behavior subscribes to a
// `Topic` in its enter path and receives a `Subscription` handle. The handle
// is deliberately not `Clone`: the behavior stores it and hands it back to
// `SignalBus::unsubscribe` in its exit path, which also discards any signals
// still queued for that topic, so nothing reaches an agent after the state
// that wanted it has gone. `SimState::check_invariants` verifies every
// agent holds exactly the subscriptions its active state needs.
//
// Delivery is queued, not immediate: `publish` appends to each subscriber's
// inbox and the behavior drains it with `take` during its next update. The
// bus never calls into behaviors.
//
// **Critical constraint: determinism.** Subscribers are kept in a `BTreeMap`
// keyed by a sequential subscription id, so "longest waiting subscriber"
// and delivery order are the same on every run.

use crate::types::{AgentId, BunkerId, TaskId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Topic {
    /// Work became available (broadcast) or was handed to this agent.
    TaskAvailable,
    DayStarted,
    BunkerEvacuated,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    TaskAvailable(TaskId),
    /// A released task was passed straight to this agent, which now holds it.
    TaskHandedOff(TaskId),
    DayStarted,
    BunkerEvacuated(BunkerId),
}

impl Signal {
    pub fn topic(&self) -> Topic {
        match self {
            Signal::TaskAvailable(_) | Signal::TaskHandedOff(_) => Topic::TaskAvailable,
            Signal::DayStarted => Topic::DayStarted,
            Signal::BunkerEvacuated(_) => Topic::BunkerEvacuated,
        }
    }
}

/// Proof of registration. Return it to `SignalBus::unsubscribe`.
#[must_use = "a dropped subscription keeps receiving signals until unsubscribed"]
#[derive(Debug, PartialEq, Eq)]
pub struct Subscription {
    id: u64,
    agent: AgentId,
    topic: Topic,
}

impl Subscription {
    pub fn topic(&self) -> Topic {
        self.topic
    }

    pub fn agent(&self) -> AgentId {
        self.agent
    }
}

#[derive(Clone, Debug, Default)]
pub struct SignalBus {
    next_id: u64,
    subscribers: BTreeMap<u64, (AgentId, Topic)>,
    inboxes: BTreeMap<AgentId, Vec<Signal>>,
}

impl SignalBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, agent: AgentId, topic: Topic) -> Subscription {
        let id = self.next_id;
        self.next_id += 1;
        self.subscribers.insert(id, (agent, topic));
        Subscription { id, agent, topic }
    }

    /// Release a subscription and drop any undelivered signals for its
    /// topic.
    pub fn unsubscribe(&mut self, subscription: Subscription) {
        self.subscribers.remove(&subscription.id);
        let still_subscribed = self.is_subscribed(subscription.agent, subscription.topic);
        if !still_subscribed && let Some(inbox) = self.inboxes.get_mut(&subscription.agent) {
            inbox.retain(|s| s.topic() != subscription.topic);
            if inbox.is_empty() {
                self.inboxes.remove(&subscription.agent);
            }
        }
    }

    /// Queue `signal` for every subscriber of its topic. Returns the number
    /// of agents reached.
    pub fn publish(&mut self, signal: Signal) -> usize {
        let topic = signal.topic();
        let mut reached = Vec::new();
        for &(agent, t) in self.subscribers.values() {
            if t == topic && !reached.contains(&agent) {
                reached.push(agent);
            }
        }
        for &agent in &reached {
            self.inboxes.entry(agent).or_default().push(signal);
        }
        reached.len()
    }

    /// Queue `signal` for one agent, only if it is subscribed to the topic.
    pub fn send_to(&mut self, agent: AgentId, signal: Signal) -> bool {
        if !self.is_subscribed(agent, signal.topic()) {
            return false;
        }
        self.inboxes.entry(agent).or_default().push(signal);
        true
    }

    /// The agent that has been subscribed to `topic` the longest, skipping
    /// `except`.
    pub fn longest_waiting(&self, topic: Topic, except: AgentId) -> Option<AgentId> {
        self.subscribers
            .values()
            .find(|&&(agent, t)| t == topic && agent != except)
            .map(|&(agent, _)| agent)
    }

    pub fn is_subscribed(&self, agent: AgentId, topic: Topic) -> bool {
        self.subscribers
            .values()
            .any(|&(a, t)| a == agent && t == topic)
    }

    /// Signals queued for `agent` and not yet taken.
    pub fn pending(&self, agent: AgentId) -> &[Signal] {
        self.inboxes.get(&agent).map_or(&[], Vec::as_slice)
    }

    /// Drain the agent's queued signals.
    pub fn take(&mut self, agent: AgentId) -> Vec<Signal> {
        self.inboxes.remove(&agent).unwrap_or_default()
    }

    pub fn subscription_count(&self, agent: AgentId) -> usize {
        self.subscribers.values().filter(|(a, _)| *a == agent).count()
    }
}
