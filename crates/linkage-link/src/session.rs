//! The link session: arena of bodies, peers and physics children driven by
//! one explicit event bus and one deferred task queue.
//!
//! All link operations are methods on [`LinkSession`]. Peers refer to each
//! other by [`PeerId`]; handles are never reused, so a destroyed peer simply
//! stops resolving.

use std::collections::BTreeMap;

use bevy::log::{debug, info, warn};
use bevy::prelude::Resource;

use linkage_core::config::{JointKind, LinkageConfig, PeerConfig};
use linkage_core::constraint::LinkEnd;
use linkage_core::error::{LinkError, LinkageError, PhysicsError};
use linkage_core::events::{BusEvent, BusListener, EventBus, ListenerId};
use linkage_core::schedule::{DeferredQueue, Due};
use linkage_core::time::SimClock;
use linkage_core::types::{
    BodyId, GroupId, HandleAllocator, LinkEvent, LinkState, PeerId, PeerRole, Pose, ProxyId,
};
use linkage_physics::ambient::{AmbientPhysics, UniformGravity};
use linkage_physics::context::RapierContext;
use linkage_physics::proxy::PhysicsBodyProxy;

use crate::collaborators::{GroupMerge, LinkRenderer, LinkStateListener, StructuralMerge};
use crate::peer::{LinkPeer, topics_for};
use crate::registry::{BodyRegistry, BodySpec};
use crate::status::{StatusLog, StatusMessage};
use crate::tasks::{DeferredTask, TaskOwner};

// ---------------------------------------------------------------------------
// LinkSession
// ---------------------------------------------------------------------------

/// Owns every link participant of one simulation.
#[derive(Resource)]
pub struct LinkSession {
    pub(crate) config: LinkageConfig,
    pub(crate) physics: RapierContext,
    pub(crate) ambient: Box<dyn AmbientPhysics>,
    pub(crate) merge: Box<dyn StructuralMerge>,
    pub(crate) bus: EventBus,
    pub(crate) tasks: DeferredQueue<TaskOwner, DeferredTask>,
    pub(crate) registry: BodyRegistry,
    pub(crate) peers: BTreeMap<PeerId, LinkPeer>,
    pub(crate) proxies: BTreeMap<ProxyId, PhysicsBodyProxy>,
    peer_ids: HandleAllocator,
    proxy_ids: HandleAllocator,
    pub(crate) status: StatusLog,
    pub(crate) clock: SimClock,
    /// Joints are unbreakable while time warp is active.
    pub(crate) time_warp: bool,
}

impl Default for LinkSession {
    fn default() -> Self {
        Self::new(LinkageConfig::default())
    }
}

impl LinkSession {
    pub fn new(config: LinkageConfig) -> Self {
        let physics = RapierContext::from_config(&config);
        let ambient = Box::new(UniformGravity(config.gravity_vec()));
        Self {
            config,
            physics,
            ambient,
            merge: Box::new(GroupMerge),
            bus: EventBus::new(),
            tasks: DeferredQueue::new(),
            registry: BodyRegistry::new(),
            peers: BTreeMap::new(),
            proxies: BTreeMap::new(),
            peer_ids: HandleAllocator::new(),
            proxy_ids: HandleAllocator::new(),
            status: StatusLog::default(),
            clock: SimClock::new(),
            time_warp: false,
        }
    }

    /// Replace the gravity model applied to reactive physics children.
    #[must_use]
    pub fn with_ambient(mut self, ambient: Box<dyn AmbientPhysics>) -> Self {
        self.ambient = ambient;
        self
    }

    /// Replace the structural merge used for coupling.
    #[must_use]
    pub fn with_merge(mut self, merge: Box<dyn StructuralMerge>) -> Self {
        self.merge = merge;
        self
    }

    pub const fn config(&self) -> &LinkageConfig {
        &self.config
    }

    pub const fn physics(&self) -> &RapierContext {
        &self.physics
    }

    pub const fn physics_mut(&mut self) -> &mut RapierContext {
        &mut self.physics
    }

    pub const fn registry(&self) -> &BodyRegistry {
        &self.registry
    }

    pub const fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub const fn clock(&self) -> SimClock {
        self.clock
    }

    pub const fn status(&self) -> &StatusLog {
        &self.status
    }

    pub fn drain_status(&mut self) -> Vec<StatusMessage> {
        self.status.drain()
    }

    /// Bus events published since the last drain, in publication order.
    pub fn drain_events(&mut self) -> Vec<BusEvent> {
        self.bus.drain_journal()
    }

    /// Observe every bus event, including those no peer subscribes to.
    pub fn add_bus_listener(&mut self, listener: BusListener) -> ListenerId {
        self.bus.add_listener(listener)
    }

    pub fn remove_bus_listener(&mut self, id: ListenerId) -> bool {
        self.bus.remove_listener(id)
    }

    pub fn pending_tasks(&self) -> usize {
        self.tasks.len()
    }

    pub const fn is_time_warp(&self) -> bool {
        self.time_warp
    }

    // -----------------------------------------------------------------------
    // Bodies
    // -----------------------------------------------------------------------

    /// Spawn a body in the physics world and register it in its own group.
    pub fn add_body(&mut self, spec: BodySpec) -> Result<BodyId, LinkError> {
        if self.registry.contains_name(&spec.name) {
            return Err(LinkError::DuplicateBody(spec.name));
        }
        let handle = self.physics.add_body(spec.kind, spec.pose, spec.mass);
        let id = self.registry.insert(&spec, handle);
        debug!("Body added: {} ({id}, {:?})", spec.name, spec.kind);
        Ok(id)
    }

    pub fn body_pose(&self, body: BodyId) -> Option<Pose> {
        let record = self.registry.get(body)?;
        self.physics.body_pose(record.rigid_body)
    }

    pub fn group_of(&self, body: BodyId) -> Option<GroupId> {
        self.registry.group_of(body)
    }

    pub fn add_renderer(
        &mut self,
        body: BodyId,
        name: impl Into<String>,
        renderer: Box<dyn LinkRenderer>,
    ) -> Result<(), LinkError> {
        let record = self
            .registry
            .get_mut(body)
            .ok_or(LinkError::UnknownBody(body))?;
        record.renderers.insert(name.into(), renderer);
        Ok(())
    }

    pub fn add_state_listener(
        &mut self,
        body: BodyId,
        listener: Box<dyn LinkStateListener>,
    ) -> Result<(), LinkError> {
        let record = self
            .registry
            .get_mut(body)
            .ok_or(LinkError::UnknownBody(body))?;
        record.listeners.push(listener);
        Ok(())
    }

    /// Record that a third party attached `neighbor` at `attach_point` of
    /// `body`. Node checks react on the next step.
    pub fn attach_node(
        &mut self,
        body: BodyId,
        attach_point: &str,
        neighbor: BodyId,
    ) -> Result<(), LinkError> {
        if self.registry.get(neighbor).is_none() {
            return Err(LinkError::UnknownBody(neighbor));
        }
        if !self.registry.occupy_node(body, attach_point, neighbor) {
            return Err(LinkError::UnknownBody(body));
        }
        debug!(
            "Node {}:{attach_point} occupied by {}",
            self.registry.name_of(body),
            self.registry.name_of(neighbor)
        );
        Ok(())
    }

    /// Free `attach_point` of `body`. Returns the previous occupant.
    pub fn detach_node(
        &mut self,
        body: BodyId,
        attach_point: &str,
    ) -> Result<Option<BodyId>, LinkError> {
        if self.registry.get(body).is_none() {
            return Err(LinkError::UnknownBody(body));
        }
        Ok(self.registry.free_node(body, attach_point))
    }

    /// Neighbor body occupying the peer's attach node.
    pub fn node_occupant(&self, peer: PeerId) -> Option<BodyId> {
        let peer = self.peers.get(&peer)?;
        self.registry
            .get(peer.body)?
            .node_occupant(&peer.config.attach_point.id)
    }

    // -----------------------------------------------------------------------
    // Peers
    // -----------------------------------------------------------------------

    /// Register a link peer on `body`.
    ///
    /// Inconsistent configuration is corrected with a warning rather than
    /// rejected.
    pub fn add_peer(&mut self, body: BodyId, mut config: PeerConfig) -> Result<PeerId, LinkError> {
        let record = self.registry.get(body).ok_or(LinkError::UnknownBody(body))?;
        if record.peer(&config.attach_point.id).is_some() {
            return Err(LinkError::DuplicateAttachPoint {
                body: record.name.clone(),
                attach_point: config.attach_point.id.clone(),
            });
        }
        config.fix_consistency();
        if let Err(err) = config.validate() {
            warn!("{}:{}: {err}", record.name, config.attach_point.id);
        }

        let id = PeerId::new(self.peer_ids.allocate());
        let peer = LinkPeer::new(id, body, &record.name, config);
        debug!("Peer added: {} ({id})", peer.descriptor);
        for &topic in topics_for(peer.role(), peer.state()) {
            self.bus.subscribe(topic, id);
        }
        if let Some(record) = self.registry.get_mut(body) {
            record
                .peers
                .insert(peer.config.attach_point.id.clone(), id);
        }
        self.peers.insert(id, peer);
        Ok(id)
    }

    pub fn peer(&self, id: PeerId) -> Option<&LinkPeer> {
        self.peers.get(&id)
    }

    pub fn peers(&self) -> impl Iterator<Item = &LinkPeer> {
        self.peers.values()
    }

    pub fn peer_state(&self, id: PeerId) -> Option<LinkState> {
        self.peers.get(&id).map(LinkPeer::state)
    }

    /// Look a peer up by body name and attach point id.
    pub fn find_peer(&self, body_name: &str, attach_point: &str) -> Option<PeerId> {
        let body = self.registry.find(body_name)?;
        self.registry.get(body)?.peer(attach_point)
    }

    pub(crate) fn peer_ref(&self, id: PeerId) -> Result<&LinkPeer, LinkError> {
        self.peers.get(&id).ok_or(LinkError::UnknownPeer(id))
    }

    pub(crate) fn peer_with_role(&self, id: PeerId, role: PeerRole) -> Result<&LinkPeer, LinkError> {
        let peer = self.peer_ref(id)?;
        if peer.role() != role {
            return Err(LinkError::WrongRole {
                peer: id,
                expected: role,
                actual: peer.role(),
            });
        }
        Ok(peer)
    }

    pub(crate) fn descriptor(&self, id: PeerId) -> String {
        self.peers
            .get(&id)
            .map_or_else(|| id.to_string(), |p| p.descriptor.clone())
    }

    /// World position and normal of the peer's attach point.
    pub fn link_end(&self, id: PeerId) -> Option<LinkEnd> {
        let peer = self.peers.get(&id)?;
        let record = self.registry.get(peer.body)?;
        let pose = self.physics.body_pose(record.rigid_body)?;
        let point = peer.attach_point();
        Some(LinkEnd {
            position: pose.transform_point(point.local_position()),
            normal: pose.transform_vector(point.local_normal()),
        })
    }

    // -----------------------------------------------------------------------
    // State transitions
    // -----------------------------------------------------------------------

    /// Move a peer along the transition table and update its subscriptions.
    pub(crate) fn switch_state(&mut self, id: PeerId, to: LinkState) -> Result<LinkState, LinkError> {
        let peer = self.peers.get_mut(&id).ok_or(LinkError::UnknownPeer(id))?;
        let from = peer
            .machine
            .switch_to(to)
            .map_err(|rejected| LinkError::IllegalTransition {
                peer: id,
                from: rejected.from,
                to: rejected.to,
            })?;
        if from != to {
            debug!("{} state changed: {from} => {to}", peer.descriptor);
            let role = peer.role();
            self.update_subscriptions(id, role, from, to);
        }
        Ok(from)
    }

    /// Force a state without consulting the transition table.
    pub(crate) fn reset_state(&mut self, id: PeerId, to: LinkState) {
        let Some(peer) = self.peers.get_mut(&id) else {
            return;
        };
        let from = peer.machine.reset_to(to);
        if from != to {
            debug!("{} state reset: {from} => {to}", peer.descriptor);
            let role = peer.role();
            self.update_subscriptions(id, role, from, to);
        }
    }

    fn update_subscriptions(&mut self, id: PeerId, role: PeerRole, from: LinkState, to: LinkState) {
        for &topic in topics_for(role, from) {
            self.bus.unsubscribe(topic, id);
        }
        for &topic in topics_for(role, to) {
            self.bus.subscribe(topic, id);
        }
    }

    /// Return a peer to `Available`, then settle it: a locked peer moves on
    /// to `Locked`, an unlocked one joins any open linking session.
    pub(crate) fn release_peer(&mut self, id: PeerId) {
        if let Err(err) = self.switch_state(id, LinkState::Available) {
            warn!("Cannot release {}: {err}", self.descriptor(id));
            return;
        }
        self.settle_available(id);
    }

    pub(crate) fn settle_available(&mut self, id: PeerId) {
        let Some(peer) = self.peers.get(&id) else {
            return;
        };
        if peer.state() != LinkState::Available {
            return;
        }
        if peer.locked {
            if let Err(err) = self.switch_state(id, LinkState::Locked) {
                warn!("Cannot lock {}: {err}", self.descriptor(id));
            }
            return;
        }
        let open = self
            .peers
            .values()
            .find(|p| {
                p.id != id && p.state() == LinkState::Linking && p.link_type() == peer.link_type()
            })
            .map(|p| p.id);
        if let Some(initiator) = open {
            self.on_linking_started(id, initiator);
        }
    }

    // -----------------------------------------------------------------------
    // Bus dispatch
    // -----------------------------------------------------------------------

    /// Publish on the bus and deliver to the subscribers snapshotted at
    /// publication time.
    pub(crate) fn publish(&mut self, event: BusEvent) {
        let subscribers = self.bus.publish(event);
        for peer in subscribers {
            match event {
                BusEvent::LinkingStarted(initiator) => self.on_linking_started(peer, initiator),
                BusEvent::LinkingStopped(initiator) => self.on_linking_stopped(peer, initiator),
                BusEvent::LinkAccepted(_) | BusEvent::LinkCreated(_) | BusEvent::LinkBroken(_) => {}
            }
        }
    }

    fn on_linking_started(&mut self, me: PeerId, initiator: PeerId) {
        if me == initiator {
            return;
        }
        let (Some(peer), Some(source)) = (self.peers.get(&me), self.peers.get(&initiator)) else {
            return;
        };
        if peer.state() != LinkState::Available || peer.link_type() != source.link_type() {
            return;
        }
        let next = match peer.role() {
            PeerRole::Source => LinkState::RejectingLinks,
            PeerRole::Target if peer.body == source.body => LinkState::RejectingLinks,
            PeerRole::Target => LinkState::AcceptingLinks,
        };
        if let Err(err) = self.switch_state(me, next) {
            warn!("{err}");
        }
    }

    fn on_linking_stopped(&mut self, me: PeerId, initiator: PeerId) {
        if me == initiator {
            return;
        }
        let Some(peer) = self.peers.get(&me) else {
            return;
        };
        if let Some(source) = self.peers.get(&initiator)
            && source.link_type() != peer.link_type()
        {
            return;
        }
        if matches!(
            peer.state(),
            LinkState::RejectingLinks | LinkState::AcceptingLinks
        ) {
            self.release_peer(me);
        }
    }

    // -----------------------------------------------------------------------
    // Collaborators
    // -----------------------------------------------------------------------

    /// Notify same-body listeners of both link ends.
    pub(crate) fn notify_listeners(&mut self, event: LinkEvent, linked: bool) {
        let mut bodies: Vec<BodyId> = [event.source, event.target]
            .iter()
            .filter_map(|id| self.peers.get(id).map(|p| p.body))
            .collect();
        bodies.dedup();
        for body in bodies {
            if let Some(record) = self.registry.get_mut(body) {
                for listener in &mut record.listeners {
                    listener.on_link_state_changed(&event, linked);
                }
            }
        }
    }

    pub(crate) fn start_renderer(&mut self, source: PeerId, target: PeerId) {
        let (Some(from), Some(to)) = (self.link_end(source), self.link_end(target)) else {
            return;
        };
        let Some(peer) = self.peers.get(&source) else {
            return;
        };
        let Some(name) = peer.config.renderer_name.as_deref() else {
            return;
        };
        match self
            .registry
            .get_mut(peer.body)
            .and_then(|record| record.renderer_mut(name))
        {
            Some(renderer) => renderer.start_renderer(from.position, to.position),
            None => warn!("{}: renderer {name} not found", peer.descriptor),
        }
    }

    pub(crate) fn stop_renderer(&mut self, source: PeerId) {
        let Some(peer) = self.peers.get(&source) else {
            return;
        };
        let Some(name) = peer.config.renderer_name.as_deref() else {
            return;
        };
        if let Some(renderer) = self
            .registry
            .get_mut(peer.body)
            .and_then(|record| record.renderer_mut(name))
        {
            renderer.stop_renderer();
        }
    }

    // -----------------------------------------------------------------------
    // Time warp
    // -----------------------------------------------------------------------

    /// Make every joint unbreakable while `warp` is set.
    pub fn set_time_warp(&mut self, warp: bool) {
        if self.time_warp == warp {
            return;
        }
        self.time_warp = warp;
        for joint in self.peers.values_mut().filter_map(|p| p.joint.as_mut()) {
            joint.adjust_joint(warp);
        }
        info!("Time warp {}", if warp { "engaged" } else { "released" });
    }

    // -----------------------------------------------------------------------
    // Cable winch
    // -----------------------------------------------------------------------

    /// Set the deployed cable length. Returns the clamped length.
    pub fn set_cable_length(&mut self, id: PeerId, length: f32) -> Result<f32, LinkError> {
        let peer = self.peers.get_mut(&id).ok_or(LinkError::UnknownPeer(id))?;
        let cable = peer.cable.as_mut().ok_or(LinkError::NoCable { peer: id })?;
        let length = cable.set_deployed_length(length);
        if let Some(joint) = peer.joint.as_mut()
            && joint.config().kind == JointKind::Cable
        {
            joint.set_length(&mut self.physics, length);
        }
        debug!("{} cable length set to {length:.3}", peer.descriptor);
        Ok(length)
    }

    /// Set the signed winch speed. Returns the clamped speed.
    pub fn set_cable_motor_speed(&mut self, id: PeerId, speed: f32) -> Result<f32, LinkError> {
        let peer = self.peers.get_mut(&id).ok_or(LinkError::UnknownPeer(id))?;
        let cable = peer.cable.as_mut().ok_or(LinkError::NoCable { peer: id })?;
        Ok(cable.set_motor_speed(speed))
    }

    fn run_cable_motors(&mut self) {
        let dt = self.config.dt();
        for peer in self.peers.values_mut() {
            let Some(length) = peer.cable.as_mut().and_then(|c| c.advance(dt)) else {
                continue;
            };
            if let Some(joint) = peer.joint.as_mut()
                && joint.config().kind == JointKind::Cable
            {
                joint.set_length(&mut self.physics, length);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Physics children
    // -----------------------------------------------------------------------

    /// Register a detachable physics child of `body`.
    pub fn add_proxy(
        &mut self,
        body: BodyId,
        name: impl Into<String>,
        local_pose: Pose,
        mass: f32,
    ) -> Result<ProxyId, LinkageError> {
        let record = self
            .registry
            .get_mut(body)
            .ok_or(LinkError::UnknownBody(body))?;
        let id = ProxyId::new(self.proxy_ids.allocate());
        record.proxies.insert(name.into(), id);
        self.proxies
            .insert(id, PhysicsBodyProxy::new(id, record.rigid_body, local_pose, mass));
        Ok(id)
    }

    pub fn proxy(&self, id: ProxyId) -> Option<&PhysicsBodyProxy> {
        self.proxies.get(&id)
    }

    pub fn detach_proxy(&mut self, id: ProxyId) -> Result<(), LinkageError> {
        let proxy = self.proxies.get_mut(&id).ok_or(PhysicsError::UnknownProxy(id))?;
        proxy.detach(&mut self.physics)?;
        Ok(())
    }

    pub fn attach_proxy(&mut self, id: ProxyId) -> Result<(), LinkageError> {
        self.tasks.cancel_owner(TaskOwner::Proxy(id));
        let proxy = self.proxies.get_mut(&id).ok_or(PhysicsError::UnknownProxy(id))?;
        proxy.attach(&mut self.physics)?;
        Ok(())
    }

    fn proxies_of_group(&self, group: GroupId) -> Vec<ProxyId> {
        self.registry
            .groups
            .bodies_in(group)
            .into_iter()
            .filter_map(|body| self.registry.get(body))
            .flat_map(|record| record.proxies().collect::<Vec<_>>())
            .collect()
    }

    /// Freeze the detached children of a group before it is packed.
    ///
    /// Every child is processed; the first failure is returned.
    pub fn pack_group(&mut self, group: GroupId) -> Result<(), LinkageError> {
        let mut first_error = None;
        for id in self.proxies_of_group(group) {
            let result = self
                .proxies
                .get_mut(&id)
                .ok_or(PhysicsError::UnknownProxy(id))
                .and_then(|proxy| proxy.suspend_for_pack(&mut self.physics));
            self.schedule_resync(id, result, &mut first_error);
        }
        info!("Group {group} packed");
        first_error.map_or(Ok(()), Err)
    }

    /// Return the packed children of a group to reactive dynamics.
    pub fn unpack_group(&mut self, group: GroupId) -> Result<(), LinkageError> {
        let mut first_error = None;
        for id in self.proxies_of_group(group) {
            let result = self
                .proxies
                .get_mut(&id)
                .ok_or(PhysicsError::UnknownProxy(id))
                .and_then(|proxy| proxy.resume_from_pack(&mut self.physics));
            self.schedule_resync(id, result, &mut first_error);
        }
        info!("Group {group} unpacked");
        first_error.map_or(Ok(()), Err)
    }

    fn schedule_resync(
        &mut self,
        id: ProxyId,
        result: Result<Option<Due>, PhysicsError>,
        first_error: &mut Option<LinkageError>,
    ) {
        match result {
            Ok(Some(due)) => {
                self.tasks.cancel_owner(TaskOwner::Proxy(id));
                self.tasks
                    .schedule(TaskOwner::Proxy(id), due, DeferredTask::ResyncProxy(id));
            }
            Ok(None) => {}
            Err(err) => {
                warn!("{id}: {err}");
                first_error.get_or_insert(err.into());
            }
        }
    }

    fn step_proxies(&mut self) {
        for proxy in self.proxies.values() {
            proxy.step(&mut self.physics, self.ambient.as_ref());
        }
    }

    // -----------------------------------------------------------------------
    // Step
    // -----------------------------------------------------------------------

    /// Advance the session by one fixed step.
    ///
    /// Order: node checks, cable motors, physics children, physics, joint
    /// strain, delayed tasks that became due, end-of-step tasks, clock.
    pub fn step(&mut self) {
        self.check_attach_nodes();
        self.run_cable_motors();
        self.step_proxies();
        self.physics.step();
        self.check_joint_strain();
        for (_, task) in self.tasks.advance_step() {
            self.run_task(task);
        }
        for (_, task) in self.tasks.take_end_of_step() {
            self.run_task(task);
        }
        self.clock.tick(self.config.physics_dt);
    }

    /// Run `n` steps.
    pub fn run_steps(&mut self, n: u32) {
        for _ in 0..n {
            self.step();
        }
    }

    pub(crate) fn schedule(&mut self, owner: TaskOwner, due: Due, task: DeferredTask) {
        debug!("Scheduled {task:?} ({due:?})");
        self.tasks.schedule(owner, due, task);
    }

    pub(crate) fn run_task(&mut self, task: DeferredTask) {
        match task {
            DeferredTask::DetachNeighbor(id) => self.detach_incompatible_neighbor(id),
            DeferredTask::ForceDetach(id) => self.force_detach(id),
            DeferredTask::BreakLink(id, actor) => self.break_stale_link(id, actor),
            DeferredTask::BlockIfStillOccupied(id) => self.block_if_occupied(id),
            DeferredTask::VerifyCoupling(id) => self.verify_coupling(id),
            DeferredTask::VerifyDecouple(id) => self.verify_decouple(id),
            DeferredTask::ResyncProxy(id) => {
                if let Some(proxy) = self.proxies.get_mut(&id) {
                    proxy.resync(&mut self.physics);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use bevy::prelude::Vec3;
    use linkage_core::config::CableConfig;
    use linkage_core::events::Topic;
    use linkage_core::types::AttachPoint;

    use super::*;

    fn session_with_pair() -> (LinkSession, PeerId, PeerId) {
        let mut session = LinkSession::default();
        let tug = session
            .add_body(BodySpec::fixed("tug", Pose::IDENTITY))
            .unwrap();
        let barge = session
            .add_body(BodySpec::dynamic(
                "barge",
                Pose::from_translation(Vec3::new(3.0, 0.0, 0.0)),
                10.0,
            ))
            .unwrap();
        let source = session
            .add_peer(
                tug,
                PeerConfig::source("tow", AttachPoint::new("hitch", Vec3::ZERO, Vec3::X)),
            )
            .unwrap();
        let target = session
            .add_peer(
                barge,
                PeerConfig::target("tow", AttachPoint::new("eye", Vec3::ZERO, Vec3::NEG_X)),
            )
            .unwrap();
        (session, source, target)
    }

    #[test]
    fn duplicate_body_name_rejected() {
        let mut session = LinkSession::default();
        session
            .add_body(BodySpec::fixed("tug", Pose::IDENTITY))
            .unwrap();
        let err = session
            .add_body(BodySpec::fixed("tug", Pose::IDENTITY))
            .unwrap_err();
        assert_eq!(err, LinkError::DuplicateBody("tug".into()));
    }

    #[test]
    fn duplicate_attach_point_rejected() {
        let (mut session, _, _) = session_with_pair();
        let tug = session.registry().find("tug").unwrap();
        let err = session
            .add_peer(
                tug,
                PeerConfig::source("tow", AttachPoint::new("hitch", Vec3::ZERO, Vec3::X)),
            )
            .unwrap_err();
        assert!(matches!(err, LinkError::DuplicateAttachPoint { .. }));
    }

    #[test]
    fn new_peers_subscribe_to_linking_started() {
        let (session, source, target) = session_with_pair();
        assert!(session.bus().is_subscribed(Topic::LinkingStarted, source));
        assert!(session.bus().is_subscribed(Topic::LinkingStarted, target));
        assert_eq!(session.find_peer("barge", "eye"), Some(target));
        assert_eq!(session.peer_state(source), Some(LinkState::Available));
    }

    #[test]
    fn link_end_uses_body_pose() {
        let (session, _, target) = session_with_pair();
        let end = session.link_end(target).unwrap();
        assert!((end.position - Vec3::new(3.0, 0.0, 0.0)).length() < 1e-5);
        assert!((end.normal - Vec3::NEG_X).length() < 1e-5);
    }

    #[test]
    fn switch_state_rejects_illegal_transition() {
        let (mut session, _, target) = session_with_pair();
        let err = session.switch_state(target, LinkState::Linking).unwrap_err();
        assert!(matches!(err, LinkError::IllegalTransition { .. }));
        assert_eq!(session.peer_state(target), Some(LinkState::Available));
    }

    #[test]
    fn cable_errors_without_cable() {
        let (mut session, source, _) = session_with_pair();
        assert_eq!(
            session.set_cable_length(source, 2.0),
            Err(LinkError::NoCable { peer: source })
        );
    }

    #[test]
    fn cable_motor_runs_during_step() {
        let mut session = LinkSession::default();
        let tug = session
            .add_body(BodySpec::fixed("tug", Pose::IDENTITY))
            .unwrap();
        let winch = session
            .add_peer(
                tug,
                PeerConfig::source("tow", AttachPoint::new("winch", Vec3::ZERO, Vec3::Z))
                    .with_cable(CableConfig {
                        max_length: 5.0,
                        deployed_length: 1.0,
                        motor_speed: 1.0,
                    }),
            )
            .unwrap();
        session.set_cable_motor_speed(winch, 1.0).unwrap();
        session.run_steps(10);
        let length = session.peer(winch).unwrap().cable().unwrap().deployed_length();
        assert!((length - 1.2).abs() < 1e-4);
    }

    #[test]
    fn step_advances_clock() {
        let (mut session, _, _) = session_with_pair();
        session.run_steps(5);
        assert_eq!(session.clock().steps(), 5);
    }

    #[test]
    fn bus_listener_sees_events() {
        let (mut session, _, _) = session_with_pair();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        session.add_bus_listener(Box::new(move |event| {
            sink.lock().unwrap().push(*event);
        }));
        session.publish(BusEvent::LinkingStopped(PeerId::new(99)));
        assert_eq!(
            seen.lock().unwrap().as_slice(),
            &[BusEvent::LinkingStopped(PeerId::new(99))]
        );
    }

    #[test]
    fn time_warp_makes_joints_unbreakable() {
        let (mut session, source, _) = session_with_pair();
        session.set_time_warp(true);
        assert!(session.peer(source).unwrap().joint().unwrap().is_unbreakable());
        session.set_time_warp(false);
        assert!(!session.peer(source).unwrap().joint().unwrap().is_unbreakable());
    }
}
