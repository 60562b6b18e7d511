//! Deferred work queued by the session.

use linkage_core::types::{LinkActor, PeerId, ProxyId};

/// Entity a deferred task belongs to. Destroying the owner cancels the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOwner {
    Peer(PeerId),
    Proxy(ProxyId),
}

/// A unit of deferred work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredTask {
    /// Remove an incompatible neighbor from an available peer's node.
    DetachNeighbor(PeerId),
    /// Free a peer's node regardless of its state.
    ForceDetach(PeerId),
    BreakLink(PeerId, LinkActor),
    /// Move a peer to `NodeBlocked` if its node is still occupied.
    BlockIfStillOccupied(PeerId),
    /// Check that structural coupling of a fresh link took effect.
    VerifyCoupling(PeerId),
    /// Check whether a coupled link survived an external decouple.
    VerifyDecouple(PeerId),
    ResyncProxy(ProxyId),
}
