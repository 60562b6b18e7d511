//! Session-scoped publish/subscribe channel for link notifications.
//!
//! The [`EventBus`] is owned by a link session and torn down with it. Two
//! kinds of subscribers exist:
//!
//! - **Peer subscriptions**: a peer handle registered for a [`Topic`].
//!   [`EventBus::publish`] returns the subscribed peers so the owning session
//!   can dispatch to them synchronously. Peers subscribe on entry to the
//!   states that need a topic and unsubscribe on exit, which keeps the
//!   listener count bounded.
//! - **Listeners**: boxed callbacks for observers outside the arena.
//!
//! Every published event is also appended to a journal. The journal grows
//! until drained, so its owner drains it once per step.

use std::collections::HashMap;

use crate::types::{LinkEvent, PeerId};

/// Kind of bus notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    LinkingStarted,
    LinkingStopped,
    LinkAccepted,
    LinkCreated,
    LinkBroken,
}

/// A published notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusEvent {
    /// A source opened a linking session.
    LinkingStarted(PeerId),
    /// A source closed its linking session.
    LinkingStopped(PeerId),
    /// A target accepted a pending link.
    LinkAccepted(PeerId),
    LinkCreated(LinkEvent),
    LinkBroken(LinkEvent),
}

impl BusEvent {
    pub const fn topic(&self) -> Topic {
        match self {
            Self::LinkingStarted(_) => Topic::LinkingStarted,
            Self::LinkingStopped(_) => Topic::LinkingStopped,
            Self::LinkAccepted(_) => Topic::LinkAccepted,
            Self::LinkCreated(_) => Topic::LinkCreated,
            Self::LinkBroken(_) => Topic::LinkBroken,
        }
    }
}

/// Handle returned by [`EventBus::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Callback invoked for every published event.
pub type BusListener = Box<dyn FnMut(&BusEvent) + Send + Sync>;

/// Session-scoped publish/subscribe registry.
#[derive(Default)]
pub struct EventBus {
    peer_subscriptions: HashMap<Topic, Vec<PeerId>>,
    listeners: Vec<(ListenerId, BusListener)>,
    next_listener: u64,
    journal: Vec<BusEvent>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("peer_subscriptions", &self.peer_subscriptions)
            .field("listeners", &self.listeners.len())
            .field("journal", &self.journal.len())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `peer` for `topic`. Duplicate subscriptions are ignored.
    pub fn subscribe(&mut self, topic: Topic, peer: PeerId) {
        let subs = self.peer_subscriptions.entry(topic).or_default();
        if !subs.contains(&peer) {
            subs.push(peer);
        }
    }

    /// Remove `peer` from `topic`. Returns whether it was subscribed.
    pub fn unsubscribe(&mut self, topic: Topic, peer: PeerId) -> bool {
        let Some(subs) = self.peer_subscriptions.get_mut(&topic) else {
            return false;
        };
        let before = subs.len();
        subs.retain(|&p| p != peer);
        before != subs.len()
    }

    /// Remove `peer` from every topic.
    pub fn unsubscribe_all(&mut self, peer: PeerId) {
        for subs in self.peer_subscriptions.values_mut() {
            subs.retain(|&p| p != peer);
        }
    }

    pub fn is_subscribed(&self, topic: Topic, peer: PeerId) -> bool {
        self.peer_subscriptions
            .get(&topic)
            .is_some_and(|subs| subs.contains(&peer))
    }

    pub fn add_listener(&mut self, listener: BusListener) -> ListenerId {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.listeners.push((id, listener));
        id
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        before != self.listeners.len()
    }

    /// Publish an event.
    ///
    /// Listeners run immediately. Returns a snapshot of the peers subscribed
    /// to the event's topic, in subscription order; the caller dispatches to
    /// them.
    pub fn publish(&mut self, event: BusEvent) -> Vec<PeerId> {
        for (_, listener) in &mut self.listeners {
            listener(&event);
        }
        self.journal.push(event);
        self.peer_subscriptions
            .get(&event.topic())
            .cloned()
            .unwrap_or_default()
    }

    /// Events published since the last drain.
    pub fn journal(&self) -> &[BusEvent] {
        &self.journal
    }

    pub fn drain_journal(&mut self) -> Vec<BusEvent> {
        std::mem::take(&mut self.journal)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
