//! Link peer state machine enforcing legal transitions.
//!
//! [`LinkStateMachine`] tracks the current [`LinkState`] of one peer and
//! validates every requested transition against the table of its
//! [`PeerRole`]. Source and Target tables are symmetric, with `Linking`
//! on the source side and `AcceptingLinks` on the target side.

use crate::types::{LinkState, PeerRole};

/// Legal successors of `state` for a peer with the given role.
pub const fn allowed_transitions(role: PeerRole, state: LinkState) -> &'static [LinkState] {
    use LinkState::{
        AcceptingLinks, Available, Linked, Linking, Locked, NodeBlocked, RejectingLinks,
    };
    match (role, state) {
        (PeerRole::Source, Available) => &[Linking, RejectingLinks, NodeBlocked, Locked],
        (PeerRole::Target, Available) => &[AcceptingLinks, RejectingLinks, NodeBlocked, Locked],
        (PeerRole::Source, Linking) | (PeerRole::Target, AcceptingLinks) => &[Available, Linked],
        (_, NodeBlocked | Linked | Locked) => &[Available],
        (_, RejectingLinks) => &[Available, Locked],
        (PeerRole::Source, AcceptingLinks) | (PeerRole::Target, Linking) => &[],
    }
}

/// Tracks a peer's link state and enforces the transition table.
///
/// # Example
///
/// ```
/// use linkage_core::state::LinkStateMachine;
/// use linkage_core::types::{LinkState, PeerRole};
///
/// let mut sm = LinkStateMachine::new(PeerRole::Source);
/// assert_eq!(sm.state(), LinkState::Available);
/// assert!(sm.switch_to(LinkState::Linking).is_ok());
/// assert!(sm.switch_to(LinkState::Locked).is_err());
/// ```
#[derive(Debug, Clone)]
pub struct LinkStateMachine {
    role: PeerRole,
    state: LinkState,
}

/// A rejected transition request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RejectedTransition {
    pub from: LinkState,
    pub to: LinkState,
}

impl LinkStateMachine {
    /// Create a state machine in the [`Available`](LinkState::Available) state.
    #[must_use]
    pub const fn new(role: PeerRole) -> Self {
        Self {
            role,
            state: LinkState::Available,
        }
    }

    #[must_use]
    pub const fn state(&self) -> LinkState {
        self.state
    }

    #[must_use]
    pub const fn role(&self) -> PeerRole {
        self.role
    }

    /// Whether switching to `to` is legal from the current state.
    ///
    /// Switching to the current state is always allowed and is a no-op.
    pub fn can_switch_to(&self, to: LinkState) -> bool {
        to == self.state || allowed_transitions(self.role, self.state).contains(&to)
    }

    /// Validate and apply a transition.
    ///
    /// Returns the previous state on success.
    pub fn switch_to(&mut self, to: LinkState) -> Result<LinkState, RejectedTransition> {
        if !self.can_switch_to(to) {
            return Err(RejectedTransition {
                from: self.state,
                to,
            });
        }
        let from = self.state;
        self.state = to;
        Ok(from)
    }

    /// Set the state without consulting the table.
    ///
    /// Only used when restoring persisted state, before the peer has taken
    /// part in any live transition.
    pub fn reset_to(&mut self, state: LinkState) -> LinkState {
        std::mem::replace(&mut self.state, state)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
