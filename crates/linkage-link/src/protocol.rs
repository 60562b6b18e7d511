//! Link protocol: linking sessions, link and unlink, coupling and restore.
//!
//! A link happens in two phases. The logical phase updates peer states,
//! renderers, listeners and the bus; the physical phase creates the joint and
//! applies structural coupling. Unlinking runs the physical phase first.

use bevy::log::{debug, error, info, warn};

use linkage_core::error::{LinkCheckError, LinkError, PhysicsError};
use linkage_core::events::BusEvent;
use linkage_core::schedule::Due;
use linkage_core::types::{
    CoupleMode, LinkActor, LinkEvent, LinkState, LinkingMode, PeerId, PeerRole,
};
use linkage_physics::joint::{JointEnds, JointStrength, resolve_break_limit};

use crate::peer::{LinkPeer, PersistedLink};
use crate::session::LinkSession;
use crate::tasks::{DeferredTask, TaskOwner};

impl LinkSession {
    // -----------------------------------------------------------------------
    // Linking sessions
    // -----------------------------------------------------------------------

    /// Open a linking session on an available source.
    ///
    /// Every other compatible peer reacts: sources and same-body targets
    /// reject links, other targets accept them.
    pub fn start_linking(
        &mut self,
        source: PeerId,
        mode: LinkingMode,
        actor: LinkActor,
    ) -> Result<(), LinkError> {
        let peer = self.peer_with_role(source, PeerRole::Source)?;
        if peer.locked || peer.state() != LinkState::Available {
            return Err(LinkError::IllegalTransition {
                peer: source,
                from: peer.state(),
                to: LinkState::Linking,
            });
        }
        self.switch_state(source, LinkState::Linking)?;
        if let Some(peer) = self.peers.get_mut(&source) {
            peer.linking_mode = Some(mode);
            info!("{} started linking: mode={mode:?}, actor={actor:?}", peer.descriptor);
        }
        self.publish(BusEvent::LinkingStarted(source));
        Ok(())
    }

    /// Close the source's linking session. Every reacting peer returns to
    /// `Available`, or `Locked` when locked.
    pub fn cancel_linking(&mut self, source: PeerId) -> Result<(), LinkError> {
        let peer = self.peer_with_role(source, PeerRole::Source)?;
        if peer.state() != LinkState::Linking {
            return Err(LinkError::IllegalTransition {
                peer: source,
                from: peer.state(),
                to: LinkState::Available,
            });
        }
        self.switch_state(source, LinkState::Available)?;
        if let Some(peer) = self.peers.get_mut(&source) {
            peer.linking_mode = None;
            debug!("{} stopped linking", peer.descriptor);
        }
        self.publish(BusEvent::LinkingStopped(source));
        self.settle_available(source);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Legality
    // -----------------------------------------------------------------------

    /// Every reason `source` cannot link to `target` right now.
    ///
    /// Order: joint geometry, renderer obstacles, then state and type checks.
    /// An empty list means the link is legal.
    pub fn check_can_link(
        &self,
        source: PeerId,
        target: PeerId,
    ) -> Result<Vec<LinkCheckError>, LinkError> {
        let src = self.peer_with_role(source, PeerRole::Source)?;
        let tgt = self.peer_with_role(target, PeerRole::Target)?;
        let mut errors = Vec::new();

        if let (Some(from), Some(to)) = (self.link_end(source), self.link_end(target)) {
            if let Some(joint) = src.joint() {
                errors.extend(joint.check_constraints(from, to));
            }
            if let Some(name) = src.config.renderer_name.as_deref()
                && let Some(renderer) = self
                    .registry
                    .get(src.body)
                    .and_then(|record| record.renderer(name))
            {
                errors.extend(renderer.check_collider_hits(from.position, to.position));
            }
        }
        errors.extend(basic_link_errors(src, tgt));
        Ok(errors)
    }

    // -----------------------------------------------------------------------
    // Link
    // -----------------------------------------------------------------------

    /// Complete the source's linking session by linking to `target`.
    ///
    /// On rejection nothing changes and the errors are posted to the status
    /// log.
    pub fn link_to_target(
        &mut self,
        source: PeerId,
        target: PeerId,
        actor: LinkActor,
    ) -> Result<(), LinkError> {
        let src = self.peer_with_role(source, PeerRole::Source)?;
        self.peer_with_role(target, PeerRole::Target)?;
        if src.state() != LinkState::Linking {
            return Err(LinkError::IllegalTransition {
                peer: source,
                from: src.state(),
                to: LinkState::Linked,
            });
        }
        let errors = self.check_can_link(source, target)?;
        if !errors.is_empty() {
            let err = LinkError::Rejected(errors);
            warn!("{}: {err}", self.descriptor(source));
            self.status.error(self.clock.steps(), err.to_string());
            return Err(err);
        }
        self.logical_link(source, target, actor);
        self.physical_link(source, target);
        Ok(())
    }

    /// Link without an interactive session. Opens one if needed and cancels
    /// it again on failure.
    pub fn link_to_target_with(
        &mut self,
        actor: LinkActor,
        source: PeerId,
        target: PeerId,
    ) -> Result<(), LinkError> {
        let started = self.peer_with_role(source, PeerRole::Source)?.state() == LinkState::Available;
        if started {
            self.start_linking(source, LinkingMode::Api, actor)?;
        }
        let result = self.link_to_target(source, target, actor);
        if result.is_err()
            && started
            && let Err(err) = self.cancel_linking(source)
        {
            warn!("{}: {err}", self.descriptor(source));
        }
        result
    }

    fn logical_link(&mut self, source: PeerId, target: PeerId, actor: LinkActor) {
        for (me, other) in [(source, target), (target, source)] {
            if let Some(peer) = self.peers.get_mut(&me) {
                peer.other_peer = Some(other);
            }
        }
        for id in [source, target] {
            if let Err(err) = self.switch_state(id, LinkState::Linked) {
                error!("Link state out of sync: {err}");
            }
        }
        if let Some(peer) = self.peers.get_mut(&source) {
            peer.linking_mode = None;
        }
        self.start_renderer(source, target);

        let event = LinkEvent::new(source, target, actor);
        self.notify_listeners(event, true);
        self.publish(BusEvent::LinkingStopped(source));
        self.publish(BusEvent::LinkAccepted(target));
        self.publish(BusEvent::LinkCreated(event));
        info!(
            "Linked: {} => {}, actor={actor:?}",
            self.descriptor(source),
            self.descriptor(target)
        );
    }

    fn physical_link(&mut self, source: PeerId, target: PeerId) {
        let prelinked = self.node_occupant(source).is_some();
        let Some(peer) = self.peers.get_mut(&source) else {
            return;
        };
        let mode = peer.couple_mode();
        let Some(joint) = peer.joint.as_mut() else {
            return;
        };
        let couple = match mode {
            CoupleMode::AlwaysCoupled => true,
            CoupleMode::NeverCoupled => false,
            CoupleMode::ManualToggle => joint.couple_on_link(),
        } || prelinked;
        joint.set_couple_on_link(couple);

        if let Err(err) = self.materialize_joint(source, target) {
            error!("{}: cannot create joint: {err}", self.descriptor(source));
            self.status
                .error(self.clock.steps(), format!("Cannot create joint: {err}"));
        }
        if couple {
            self.couple_bodies(source, target);
        }
    }

    /// Create the physical joint of a linked pair, replacing any old one.
    pub(crate) fn materialize_joint(&mut self, source: PeerId, target: PeerId) -> Result<(), PhysicsError> {
        let missing = |id: PeerId| PhysicsError::MissingBody(id.to_string());
        let src = self.peers.get(&source).ok_or_else(|| missing(source))?;
        let tgt = self.peers.get(&target).ok_or_else(|| missing(target))?;
        let src_body = self.registry.get(src.body).ok_or_else(|| missing(source))?;
        let tgt_body = self.registry.get(tgt.body).ok_or_else(|| missing(target))?;

        let ends = JointEnds {
            source_body: src_body.rigid_body,
            source_anchor: src.attach_point().local_position(),
            target_body: tgt_body.rigid_body,
            target_anchor: tgt.attach_point().local_position(),
        };
        let Some(config) = src.joint().map(|j| j.config()) else {
            return Ok(());
        };
        let strength = JointStrength {
            break_force: resolve_break_limit(
                config.break_force,
                src_body.break_force,
                tgt_body.break_force,
                self.config.default_break_force,
            ),
            break_torque: resolve_break_limit(
                config.break_torque,
                src_body.break_torque,
                tgt_body.break_torque,
                self.config.default_break_torque,
            ),
        };
        let cable_length = src.cable().map(|c| c.deployed_length());

        let Some(peer) = self.peers.get_mut(&source) else {
            return Ok(());
        };
        let Some(joint) = peer.joint.as_mut() else {
            return Ok(());
        };
        let spec = joint.create_joint(&mut self.physics, ends, strength, cable_length)?;
        joint.adjust_joint(self.time_warp);
        if let Some(cable) = peer.cable.as_mut() {
            cable.sync_to_joint(spec.length);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Coupling
    // -----------------------------------------------------------------------

    /// Merge the bodies of a linked pair. Failure keeps the link and is
    /// reported, never propagated.
    pub(crate) fn couple_bodies(&mut self, source: PeerId, target: PeerId) -> bool {
        let (Some(src), Some(tgt)) = (self.peers.get(&source), self.peers.get(&target)) else {
            return false;
        };
        if !(src.allow_coupling() && tgt.allow_coupling()) {
            error!(
                "{}: cannot maintain coupling with {}: coupling not allowed",
                src.descriptor, tgt.descriptor
            );
            self.status
                .error(self.clock.steps(), format!("Cannot couple {}", tgt.descriptor));
            return false;
        }
        let (src_body, tgt_body) = (src.body, tgt.body);
        if !self
            .merge
            .set_coupled(&mut self.registry.groups, src_body, tgt_body, true)
        {
            error!(
                "{}: cannot maintain coupling with {}: structural merge failed",
                src.descriptor, tgt.descriptor
            );
            self.status
                .error(self.clock.steps(), format!("Cannot couple {}", tgt.descriptor));
            return false;
        }
        let (src_point, tgt_point) = (
            src.attach_point().id.clone(),
            tgt.attach_point().id.clone(),
        );
        info!("Coupled: {} <=> {}", src.descriptor, tgt.descriptor);
        self.registry.occupy_node(src_body, &src_point, tgt_body);
        self.registry.occupy_node(tgt_body, &tgt_point, src_body);
        self.schedule(
            TaskOwner::Peer(source),
            Due::AfterSteps(self.config.coupling_settle_steps),
            DeferredTask::VerifyCoupling(source),
        );
        true
    }

    /// Split a coupled pair and free their mutual nodes.
    pub(crate) fn uncouple_bodies(&mut self, source: PeerId, target: PeerId) {
        let (Some(src), Some(tgt)) = (self.peers.get(&source), self.peers.get(&target)) else {
            return;
        };
        let (src_body, tgt_body) = (src.body, tgt.body);
        let was_coupled = self.registry.group_of(src_body) == self.registry.group_of(tgt_body);
        if was_coupled
            && src_body != tgt_body
            && !self
                .merge
                .set_coupled(&mut self.registry.groups, src_body, tgt_body, false)
        {
            warn!("{}: structural split failed", src.descriptor);
        }
        self.registry.free_nodes_holding(src_body, tgt_body);
        self.registry.free_nodes_holding(tgt_body, src_body);
        if was_coupled {
            debug!("Uncoupled: {} <=> {}", src.descriptor, tgt.descriptor);
        }
    }

    /// Whether the linked pair of `source` shares a structural group.
    pub fn is_coupled(&self, source: PeerId) -> bool {
        let Some(src) = self.peers.get(&source) else {
            return false;
        };
        let Some(tgt) = src.other_peer.and_then(|id| self.peers.get(&id)) else {
            return false;
        };
        src.is_linked()
            && src.body != tgt.body
            && self.registry.group_of(src.body) == self.registry.group_of(tgt.body)
    }

    /// Whether the desired coupling of the link through `peer` differs from
    /// the actual one. Unlinked peers never mismatch.
    pub fn coupling_mismatch(&self, peer: PeerId) -> Result<bool, LinkError> {
        let p = self.peer_ref(peer)?;
        let source = match p.role() {
            PeerRole::Source => peer,
            PeerRole::Target => match p.other_peer {
                Some(source) if p.is_linked() => source,
                _ => return Ok(false),
            },
        };
        let src = self.peer_ref(source)?;
        if !src.is_linked() {
            return Ok(false);
        }
        let wanted = match src.couple_mode() {
            CoupleMode::AlwaysCoupled => true,
            CoupleMode::NeverCoupled => false,
            CoupleMode::ManualToggle => src.joint().is_some_and(|j| j.couple_on_link()),
        };
        Ok(wanted != self.is_coupled(source))
    }

    /// Flip the couple-on-link flag of a `ManualToggle` source and apply it
    /// to a live link. Returns the new flag.
    pub fn toggle_couple_mode(&mut self, source: PeerId) -> Result<bool, LinkError> {
        let peer = self.peer_with_role(source, PeerRole::Source)?;
        if !peer.allow_coupling() {
            return Err(LinkError::CouplingNotAllowed { peer: source });
        }
        if peer.couple_mode() != CoupleMode::ManualToggle {
            return Err(LinkError::CoupleModeFixed {
                peer: source,
                mode: peer.couple_mode(),
            });
        }
        let linked_target = peer.other_peer.filter(|_| peer.is_linked());
        let Some(joint) = self.peers.get_mut(&source).and_then(|p| p.joint.as_mut()) else {
            return Err(LinkError::NoJoint { peer: source });
        };
        let couple = !joint.couple_on_link();
        joint.set_couple_on_link(couple);
        info!("{} couple on link: {couple}", self.descriptor(source));

        if let Some(target) = linked_target {
            if couple {
                self.couple_bodies(source, target);
            } else {
                self.uncouple_bodies(source, target);
            }
        }
        Ok(couple)
    }

    // -----------------------------------------------------------------------
    // Unlink
    // -----------------------------------------------------------------------

    /// Break the link through `peer`, from either end.
    pub fn break_current_link(&mut self, peer: PeerId, actor: LinkActor) -> Result<(), LinkError> {
        let p = self.peer_ref(peer)?;
        if !p.is_linked() {
            return Err(LinkError::NotLinked { peer });
        }
        let other = p.other_peer.ok_or(LinkError::NotLinked { peer })?;
        let (source, target) = match p.role() {
            PeerRole::Source => (peer, other),
            PeerRole::Target => (other, peer),
        };

        if let Some(joint) = self.peers.get_mut(&source).and_then(|p| p.joint.as_mut()) {
            joint.drop_joint(&mut self.physics);
        }
        self.uncouple_bodies(source, target);
        self.stop_renderer(source);

        for id in [source, target] {
            if let Some(p) = self.peers.get_mut(&id) {
                p.other_peer = None;
            }
            if self.peers.contains_key(&id)
                && let Err(err) = self.switch_state(id, LinkState::Available)
            {
                error!("Link state out of sync: {err}");
            }
        }

        let event = LinkEvent::new(source, target, actor);
        self.publish(BusEvent::LinkBroken(event));
        self.notify_listeners(event, false);
        info!(
            "Link broken: {} => {}, actor={actor:?}",
            self.descriptor(source),
            self.descriptor(target)
        );
        for id in [source, target] {
            self.settle_available(id);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Locks
    // -----------------------------------------------------------------------

    /// Apply the external lock authority's decision.
    ///
    /// A busy peer keeps its state and locks once it becomes available.
    pub fn set_locked(&mut self, peer: PeerId, locked: bool) -> Result<(), LinkError> {
        let p = self.peers.get_mut(&peer).ok_or(LinkError::UnknownPeer(peer))?;
        p.locked = locked;
        let state = p.state();
        match (locked, state) {
            (true, LinkState::Available | LinkState::RejectingLinks) => {
                self.switch_state(peer, LinkState::Locked)?;
            }
            (false, LinkState::Locked) => self.release_peer(peer),
            _ => {}
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Restore
    // -----------------------------------------------------------------------

    /// Re-establish a link recorded by a previous session, bypassing the
    /// transition table. Publishes nothing.
    pub fn restore_other_peer(&mut self, source: PeerId, record: &PersistedLink) -> Result<(), LinkError> {
        let peer = self.peer_with_role(source, PeerRole::Source)?;
        let body = self.registry.name_of(peer.body).to_owned();
        let Some(target) = self.resolve_persisted(peer, record) else {
            let err = LinkError::CannotRestore { body };
            warn!(
                "{}: {err} ({}:{})",
                self.descriptor(source),
                record.target_body,
                record.target_attach_point
            );
            self.status.error(self.clock.steps(), err.to_string());
            return Err(err);
        };

        for (me, other) in [(source, target), (target, source)] {
            if let Some(p) = self.peers.get_mut(&me) {
                p.other_peer = Some(other);
            }
            self.reset_state(me, LinkState::Linked);
        }
        self.start_renderer(source, target);

        let couple = record.coupled;
        if let Some(joint) = self.peers.get_mut(&source).and_then(|p| p.joint.as_mut()) {
            joint.set_couple_on_link(couple);
        }
        if let Err(err) = self.materialize_joint(source, target) {
            error!("{}: cannot create joint: {err}", self.descriptor(source));
        }
        if couple {
            self.couple_bodies(source, target);
        }
        info!(
            "Link restored: {} => {}",
            self.descriptor(source),
            self.descriptor(target)
        );
        Ok(())
    }

    fn resolve_persisted(&self, source: &LinkPeer, record: &PersistedLink) -> Option<PeerId> {
        if source.state() != LinkState::Available {
            return None;
        }
        let body = self.registry.find(&record.target_body)?;
        let target = self.registry.get(body)?.peer(&record.target_attach_point)?;
        let peer = self.peers.get(&target)?;
        (source.is_compatible(peer) && peer.state() == LinkState::Available && peer.other_peer.is_none())
            .then_some(target)
    }

    /// Identity of the far end, for persisting a source's link.
    pub fn persisted_link(&self, source: PeerId) -> Option<PersistedLink> {
        let src = self.peers.get(&source)?;
        if src.role() != PeerRole::Source || !src.is_linked() {
            return None;
        }
        let tgt = self.peers.get(&src.other_peer?)?;
        Some(PersistedLink {
            target_body: self.registry.name_of(tgt.body).to_owned(),
            target_attach_point: tgt.attach_point().id.clone(),
            coupled: self.is_coupled(source),
        })
    }
}

/// State, type and coupling checks shared by interactive and API linking.
fn basic_link_errors(source: &LinkPeer, target: &LinkPeer) -> Vec<LinkCheckError> {
    let mut errors = Vec::new();
    if source.locked
        || !matches!(source.state(), LinkState::Available | LinkState::Linking)
    {
        errors.push(LinkCheckError::SourceNotAvailable);
    }
    let accepting = match source.state() {
        LinkState::Linking => LinkState::AcceptingLinks,
        _ => LinkState::Available,
    };
    if target.locked || target.state() != accepting {
        errors.push(LinkCheckError::TargetNotAccepting);
    }
    if source.link_type() != target.link_type() {
        errors.push(LinkCheckError::IncompatibleLinkType);
    }
    if source.couple_mode() == CoupleMode::AlwaysCoupled && !target.allow_coupling() {
        errors.push(LinkCheckError::TargetCannotCouple);
    }
    errors
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
