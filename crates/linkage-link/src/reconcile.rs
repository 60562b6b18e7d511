//! Per-step reconciliation of links with the structure around them.
//!
//! Third parties can occupy an attach node, merge or split groups and
//! destroy bodies at any time. The checks here bring peer states back in
//! line: incompatible neighbors are detached, prelinked neighbors are linked,
//! stale links are broken and overloaded joints snap.

use bevy::log::{debug, error, info, warn};

use linkage_core::error::LinkError;
use linkage_core::schedule::Due;
use linkage_core::types::{BodyId, CoupleMode, GroupId, LinkActor, LinkState, PeerId, PeerRole};

use crate::session::LinkSession;
use crate::tasks::{DeferredTask, TaskOwner};

impl LinkSession {
    // -----------------------------------------------------------------------
    // Attach node checks
    // -----------------------------------------------------------------------

    pub(crate) fn check_attach_nodes(&mut self) {
        let ids: Vec<PeerId> = self.peers.keys().copied().collect();
        for id in ids {
            self.restore_lost_joint(id);
            self.check_attach_node(id);
        }
    }

    /// Recreate the joint of a linked source when the physics world lost it.
    fn restore_lost_joint(&mut self, id: PeerId) {
        let Some(peer) = self.peers.get(&id) else {
            return;
        };
        if peer.role() != PeerRole::Source || !peer.is_linked() {
            return;
        }
        let Some(target) = peer.other_peer else {
            return;
        };
        if peer.joint().is_none_or(|joint| joint.is_live(&self.physics)) {
            return;
        }
        warn!("{}: joint missing from physics world, recreating", peer.descriptor);
        if let Err(err) = self.materialize_joint(id, target) {
            error!("{}: cannot recreate joint: {err}", self.descriptor(id));
        }
    }

    fn check_attach_node(&mut self, id: PeerId) {
        let Some(peer) = self.peers.get(&id) else {
            return;
        };
        let state = peer.state();
        if peer.node_check_pending || state == LinkState::Linking {
            return;
        }
        let occupant = self.node_occupant(id);
        let linked_body = peer
            .other_peer
            .and_then(|other| self.peers.get(&other))
            .map(|other| other.body);

        match occupant {
            Some(neighbor) if !peer.allow_coupling() => {
                let task = match state {
                    LinkState::Available => DeferredTask::DetachNeighbor(id),
                    LinkState::Linked => DeferredTask::BreakLink(id, LinkActor::Api),
                    _ => DeferredTask::ForceDetach(id),
                };
                warn!(
                    "{}: {} occupies a node that does not allow coupling",
                    peer.descriptor,
                    self.registry.name_of(neighbor)
                );
                self.schedule_node_check(id, task);
            }
            Some(neighbor) => match state {
                LinkState::Available => self.link_prelinked(id, neighbor),
                LinkState::Linked if linked_body != Some(neighbor) => {
                    warn!(
                        "{}: node taken by {} while linked elsewhere",
                        peer.descriptor,
                        self.registry.name_of(neighbor)
                    );
                    self.schedule_node_check(id, DeferredTask::BreakLink(id, LinkActor::Api));
                }
                _ => {}
            },
            None if state == LinkState::NodeBlocked => {
                info!("{}: node freed", peer.descriptor);
                self.release_peer(id);
            }
            None => {}
        }
    }

    /// Link an available peer to the neighbor that occupies its node, if the
    /// neighbor carries a compatible peer whose node points back.
    fn link_prelinked(&mut self, id: PeerId, neighbor: BodyId) {
        let Some(peer) = self.peers.get(&id) else {
            return;
        };
        let partner = self.registry.get(neighbor).and_then(|record| {
            record.peers().find(|other| {
                self.peers.get(other).is_some_and(|other| {
                    peer.is_compatible(other)
                        && other.state() == LinkState::Available
                        && record.node_occupant(&other.attach_point().id) == Some(peer.body)
                })
            })
        });
        let descriptor = peer.descriptor.clone();
        let (source, target) = match (partner, peer.role()) {
            (Some(partner), PeerRole::Source) => (id, partner),
            (Some(partner), PeerRole::Target) => (partner, id),
            (None, _) => {
                debug!(
                    "{descriptor}: no compatible peer on {}",
                    self.registry.name_of(neighbor)
                );
                self.schedule_node_check(id, DeferredTask::BlockIfStillOccupied(id));
                return;
            }
        };
        match self.link_to_target_with(LinkActor::Api, source, target) {
            Ok(()) => info!("{descriptor}: linked to prelinked neighbor"),
            Err(err) => {
                warn!("{descriptor}: cannot link to prelinked neighbor: {err}");
                self.schedule_node_check(id, DeferredTask::BlockIfStillOccupied(id));
            }
        }
    }

    fn schedule_node_check(&mut self, id: PeerId, task: DeferredTask) {
        if let Some(peer) = self.peers.get_mut(&id) {
            peer.node_check_pending = true;
        }
        self.schedule(TaskOwner::Peer(id), Due::EndOfStep, task);
    }

    /// Clear the pending flag of a node check. Returns `false` for a peer
    /// that no longer exists.
    fn begin_node_check(&mut self, id: PeerId) -> bool {
        self.peers.get_mut(&id).is_some_and(|peer| {
            peer.node_check_pending = false;
            true
        })
    }

    /// Free the peer's node and the neighbor's nodes that hold this body.
    fn free_attach_node(&mut self, id: PeerId) -> Option<BodyId> {
        let peer = self.peers.get(&id)?;
        let body = peer.body;
        let neighbor = self.registry.free_node(body, &peer.config.attach_point.id)?;
        self.registry.free_nodes_holding(neighbor, body);
        Some(neighbor)
    }

    pub(crate) fn detach_incompatible_neighbor(&mut self, id: PeerId) {
        if !self.begin_node_check(id) {
            return;
        }
        let still_incompatible = self
            .peers
            .get(&id)
            .is_some_and(|p| p.state() == LinkState::Available && !p.allow_coupling());
        if still_incompatible && let Some(neighbor) = self.free_attach_node(id) {
            warn!(
                "{}: detached incompatible neighbor {}",
                self.descriptor(id),
                self.registry.name_of(neighbor)
            );
        }
    }

    pub(crate) fn force_detach(&mut self, id: PeerId) {
        if !self.begin_node_check(id) {
            return;
        }
        if let Some(neighbor) = self.free_attach_node(id) {
            warn!(
                "{}: force detached {}",
                self.descriptor(id),
                self.registry.name_of(neighbor)
            );
        }
    }

    pub(crate) fn break_stale_link(&mut self, id: PeerId, actor: LinkActor) {
        if !self.begin_node_check(id) || self.peer_state(id) != Some(LinkState::Linked) {
            return;
        }
        if let Err(err) = self.break_current_link(id, actor) {
            warn!("{}: {err}", self.descriptor(id));
        }
    }

    pub(crate) fn block_if_occupied(&mut self, id: PeerId) {
        if !self.begin_node_check(id) {
            return;
        }
        if self.peer_state(id) != Some(LinkState::Available) || self.node_occupant(id).is_none() {
            return;
        }
        match self.switch_state(id, LinkState::NodeBlocked) {
            Ok(_) => info!("{}: node blocked", self.descriptor(id)),
            Err(err) => warn!("{err}"),
        }
    }

    // -----------------------------------------------------------------------
    // Coupling checks
    // -----------------------------------------------------------------------

    pub(crate) fn verify_coupling(&mut self, source: PeerId) {
        let Some(peer) = self.peers.get(&source) else {
            return;
        };
        let wanted = peer.is_linked() && peer.joint().is_some_and(|j| j.couple_on_link());
        if wanted && !self.is_coupled(source) {
            let descriptor = peer.descriptor.clone();
            error!("{descriptor}: cannot maintain coupling");
            self.status.error(
                self.clock.steps(),
                format!("{descriptor}: cannot maintain coupling"),
            );
        }
    }

    /// Settle a coupled link after an external decouple.
    ///
    /// A `ManualToggle` source whose bodies were split drops its couple flag.
    /// Any other mode reports the mismatch and keeps it visible through
    /// [`LinkSession::coupling_mismatch`].
    pub(crate) fn verify_decouple(&mut self, source: PeerId) {
        let coupled = self.is_coupled(source);
        let step = self.clock.steps();
        let Some(peer) = self.peers.get_mut(&source) else {
            return;
        };
        if !peer.is_linked() || coupled {
            return;
        }
        let mode = peer.couple_mode();
        let Some(joint) = peer.joint.as_mut() else {
            return;
        };
        if !joint.couple_on_link() {
            return;
        }
        if mode == CoupleMode::ManualToggle {
            joint.set_couple_on_link(false);
            info!("{}: decoupled, couple on link reset", peer.descriptor);
            self.status
                .info(step, format!("{}: decoupled", peer.descriptor));
        } else {
            error!("{}: cannot maintain coupling after decouple", peer.descriptor);
            self.status.error(
                step,
                format!("{}: cannot maintain coupling", peer.descriptor),
            );
        }
    }

    /// Tell the session that `body` left its structural group.
    ///
    /// Every coupled link touching the body is re-checked after the
    /// configured settle delay.
    pub fn notify_decoupled(&mut self, body: BodyId) {
        let sources: Vec<PeerId> = self
            .peers
            .values()
            .filter(|p| {
                p.role() == PeerRole::Source
                    && p.is_linked()
                    && p.joint().is_some_and(|j| j.couple_on_link())
            })
            .filter(|p| {
                p.body == body
                    || p
                        .other_peer
                        .and_then(|other| self.peers.get(&other))
                        .is_some_and(|other| other.body == body)
            })
            .map(|p| p.id)
            .collect();
        let due = Due::AfterSteps(self.config.decouple_check_steps);
        for source in sources {
            self.schedule(TaskOwner::Peer(source), due, DeferredTask::VerifyDecouple(source));
        }
    }

    /// Split `body` out of its group into a fresh group, as an external
    /// decouple would, and free every node between it and its neighbors.
    pub fn decouple_body(&mut self, body: BodyId) -> Result<GroupId, LinkError> {
        let record = self.registry.get_mut(body).ok_or(LinkError::UnknownBody(body))?;
        let neighbors: Vec<BodyId> = std::mem::take(&mut record.nodes).into_values().collect();
        for neighbor in neighbors {
            self.registry.free_nodes_holding(neighbor, body);
        }
        let group = self.registry.groups.allocate();
        self.registry.groups.set_group(body, group);
        info!("{} decoupled into {group}", self.registry.name_of(body));
        self.notify_decoupled(body);
        Ok(group)
    }

    // -----------------------------------------------------------------------
    // Destruction
    // -----------------------------------------------------------------------

    /// Destroy a body: links through it break with [`LinkActor::Physics`],
    /// its peers leave the bus, pending tasks are dropped and its physics
    /// children are released.
    pub fn destroy_body(&mut self, body: BodyId) -> Result<(), LinkError> {
        let record = self.registry.get(body).ok_or(LinkError::UnknownBody(body))?;
        let peer_ids: Vec<PeerId> = record.peers().collect();
        let proxy_ids: Vec<_> = record.proxies().collect();
        let name = record.name.clone();

        for &id in &peer_ids {
            let result = match self.peer_state(id) {
                Some(LinkState::Linking) => self.cancel_linking(id),
                Some(LinkState::Linked) => self.break_current_link(id, LinkActor::Physics),
                _ => Ok(()),
            };
            if let Err(err) = result {
                warn!("{}: {err}", self.descriptor(id));
            }
        }
        for id in peer_ids {
            self.bus.unsubscribe_all(id);
            self.tasks.cancel_owner(TaskOwner::Peer(id));
            self.peers.remove(&id);
        }
        for id in proxy_ids {
            self.tasks.cancel_owner(TaskOwner::Proxy(id));
            if let Some(mut proxy) = self.proxies.remove(&id) {
                proxy.release(&mut self.physics);
            }
        }
        if let Some(record) = self.registry.remove(body) {
            self.physics.remove_body(record.rigid_body);
        }
        info!("Body destroyed: {name}");
        Ok(())
    }

    /// Destroy every body of a group. Links leaving the group break exactly
    /// once before any body is removed. Returns the number of bodies.
    pub fn destroy_group(&mut self, group: GroupId) -> Result<usize, LinkError> {
        let bodies = self.registry.groups.bodies_in(group);
        let crossing: Vec<PeerId> = bodies
            .iter()
            .filter_map(|body| self.registry.get(*body))
            .flat_map(|record| record.peers().collect::<Vec<_>>())
            .filter(|id| {
                self.peers.get(id).is_some_and(|p| {
                    p.is_linked()
                        && p.other_peer
                            .and_then(|other| self.peers.get(&other))
                            .is_some_and(|other| !bodies.contains(&other.body))
                })
            })
            .collect();
        for id in crossing {
            if let Err(err) = self.break_current_link(id, LinkActor::Physics) {
                warn!("{}: {err}", self.descriptor(id));
            }
        }
        for &body in &bodies {
            self.destroy_body(body)?;
        }
        info!("Group {group} destroyed ({} bodies)", bodies.len());
        Ok(bodies.len())
    }

    // -----------------------------------------------------------------------
    // Joint strain
    // -----------------------------------------------------------------------

    /// Break every joint whose estimated load exceeds its limits.
    pub(crate) fn check_joint_strain(&mut self) {
        let overloaded: Vec<_> = self
            .peers
            .values()
            .filter(|p| p.is_linked())
            .filter_map(|p| {
                let strain = p.joint()?.check_strain(&self.physics)?;
                Some((p.id, strain))
            })
            .collect();
        for (id, strain) in overloaded {
            let descriptor = self.descriptor(id);
            warn!(
                "{descriptor}: joint broke under load: force={:.1} torque={:.1}",
                strain.force, strain.torque
            );
            if let Err(err) = self.break_current_link(id, LinkActor::Physics) {
                warn!("{descriptor}: {err}");
                continue;
            }
            self.status
                .error(self.clock.steps(), format!("{descriptor}: link broke"));
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
