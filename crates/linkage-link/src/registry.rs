//! Per-body registry of link peers, renderers, listeners and physics children.
//!
//! Bodies register their components explicitly at construction; lookups are
//! map accesses keyed by name.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use rapier3d::prelude::RigidBodyHandle;

use linkage_core::types::{BodyId, GroupId, HandleAllocator, PeerId, Pose, ProxyId};
use linkage_physics::context::BodyKind;

use crate::collaborators::{LinkRenderer, LinkStateListener};

// ---------------------------------------------------------------------------
// BodySpec
// ---------------------------------------------------------------------------

/// Spawn parameters of a simulated body.
#[derive(Debug, Clone, PartialEq)]
pub struct BodySpec {
    pub name: String,
    pub kind: BodyKind,
    pub pose: Pose,
    pub mass: f32,
    /// Strength used when a joint does not configure its break force.
    pub break_force: Option<f32>,
    pub break_torque: Option<f32>,
}

impl BodySpec {
    pub fn dynamic(name: impl Into<String>, pose: Pose, mass: f32) -> Self {
        Self {
            name: name.into(),
            kind: BodyKind::Dynamic,
            pose,
            mass,
            break_force: None,
            break_torque: None,
        }
    }

    pub fn fixed(name: impl Into<String>, pose: Pose) -> Self {
        Self {
            name: name.into(),
            kind: BodyKind::Fixed,
            pose,
            mass: 0.0,
            break_force: None,
            break_torque: None,
        }
    }

    #[must_use]
    pub fn with_strength(mut self, break_force: f32, break_torque: f32) -> Self {
        self.break_force = Some(break_force);
        self.break_torque = Some(break_torque);
        self
    }
}

// ---------------------------------------------------------------------------
// GroupTable
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Membership {
    group: GroupId,
    /// Group the body was spawned in; used to split it back out.
    home: GroupId,
}

/// Structural group membership of every body.
#[derive(Debug, Clone, Default)]
pub struct GroupTable {
    members: BTreeMap<BodyId, Membership>,
    ids: HandleAllocator,
}

impl GroupTable {
    /// Put `body` into a fresh group of its own.
    pub fn insert_new(&mut self, body: BodyId) -> GroupId {
        let group = self.allocate();
        self.insert(body, group);
        group
    }

    /// Put `body` into `group`, which also becomes its home group.
    pub fn insert(&mut self, body: BodyId, group: GroupId) {
        self.members.insert(body, Membership { group, home: group });
    }

    pub fn allocate(&mut self) -> GroupId {
        GroupId::new(self.ids.allocate())
    }

    pub fn remove(&mut self, body: BodyId) {
        self.members.remove(&body);
    }

    pub fn group_of(&self, body: BodyId) -> Option<GroupId> {
        self.members.get(&body).map(|m| m.group)
    }

    pub fn home_of(&self, body: BodyId) -> Option<GroupId> {
        self.members.get(&body).map(|m| m.home)
    }

    pub fn set_group(&mut self, body: BodyId, group: GroupId) -> bool {
        let Some(member) = self.members.get_mut(&body) else {
            return false;
        };
        member.group = group;
        true
    }

    /// Move every member of `from` into `to`.
    pub fn reassign(&mut self, from: GroupId, to: GroupId) {
        for member in self.members.values_mut() {
            if member.group == from {
                member.group = to;
            }
        }
    }

    /// Move the members of `current` whose home is `home` back home.
    pub fn split_home(&mut self, home: GroupId, current: GroupId) {
        for member in self.members.values_mut() {
            if member.home == home && member.group == current {
                member.group = home;
            }
        }
    }

    /// Bodies of a group in ascending handle order.
    pub fn bodies_in(&self, group: GroupId) -> Vec<BodyId> {
        self.members
            .iter()
            .filter(|(_, m)| m.group == group)
            .map(|(body, _)| *body)
            .collect()
    }

    pub fn groups(&self) -> BTreeSet<GroupId> {
        self.members.values().map(|m| m.group).collect()
    }
}

// ---------------------------------------------------------------------------
// BodyRecord
// ---------------------------------------------------------------------------

/// Registered components of one body.
pub struct BodyRecord {
    pub id: BodyId,
    pub name: String,
    pub rigid_body: RigidBodyHandle,
    pub break_force: Option<f32>,
    pub break_torque: Option<f32>,
    /// Link peers keyed by attach point id.
    pub(crate) peers: BTreeMap<String, PeerId>,
    pub(crate) proxies: BTreeMap<String, ProxyId>,
    pub(crate) renderers: BTreeMap<String, Box<dyn LinkRenderer>>,
    pub(crate) listeners: Vec<Box<dyn LinkStateListener>>,
    /// Occupied attach nodes: attach point id to neighbor body.
    pub(crate) nodes: BTreeMap<String, BodyId>,
}

impl fmt::Debug for BodyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BodyRecord")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("peers", &self.peers)
            .field("proxies", &self.proxies)
            .field("renderers", &self.renderers.keys().collect::<Vec<_>>())
            .field("listeners", &self.listeners.len())
            .field("nodes", &self.nodes)
            .finish_non_exhaustive()
    }
}

impl BodyRecord {
    pub fn peer(&self, attach_point: &str) -> Option<PeerId> {
        self.peers.get(attach_point).copied()
    }

    pub fn peers(&self) -> impl Iterator<Item = PeerId> + '_ {
        self.peers.values().copied()
    }

    pub fn proxy(&self, name: &str) -> Option<ProxyId> {
        self.proxies.get(name).copied()
    }

    pub fn proxies(&self) -> impl Iterator<Item = ProxyId> + '_ {
        self.proxies.values().copied()
    }

    pub fn has_renderer(&self, name: &str) -> bool {
        self.renderers.contains_key(name)
    }

    pub fn renderer(&self, name: &str) -> Option<&dyn LinkRenderer> {
        self.renderers.get(name).map(|r| &**r)
    }

    pub(crate) fn renderer_mut(&mut self, name: &str) -> Option<&mut Box<dyn LinkRenderer>> {
        self.renderers.get_mut(name)
    }

    /// Neighbor body attached at `attach_point`, if any.
    pub fn node_occupant(&self, attach_point: &str) -> Option<BodyId> {
        self.nodes.get(attach_point).copied()
    }
}

// ---------------------------------------------------------------------------
// BodyRegistry
// ---------------------------------------------------------------------------

/// All bodies of a session.
#[derive(Debug, Default)]
pub struct BodyRegistry {
    bodies: BTreeMap<BodyId, BodyRecord>,
    by_name: HashMap<String, BodyId>,
    ids: HandleAllocator,
    pub(crate) groups: GroupTable,
}

impl BodyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Register a body in a fresh group.
    pub(crate) fn insert(&mut self, spec: &BodySpec, rigid_body: RigidBodyHandle) -> BodyId {
        let id = BodyId::new(self.ids.allocate());
        self.groups.insert_new(id);
        self.by_name.insert(spec.name.clone(), id);
        self.bodies.insert(
            id,
            BodyRecord {
                id,
                name: spec.name.clone(),
                rigid_body,
                break_force: spec.break_force,
                break_torque: spec.break_torque,
                peers: BTreeMap::new(),
                proxies: BTreeMap::new(),
                renderers: BTreeMap::new(),
                listeners: Vec::new(),
                nodes: BTreeMap::new(),
            },
        );
        id
    }

    pub(crate) fn remove(&mut self, id: BodyId) -> Option<BodyRecord> {
        let record = self.bodies.remove(&id)?;
        self.by_name.remove(&record.name);
        self.groups.remove(id);
        for other in self.bodies.values_mut() {
            other.nodes.retain(|_, neighbor| *neighbor != id);
        }
        Some(record)
    }

    pub fn get(&self, id: BodyId) -> Option<&BodyRecord> {
        self.bodies.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: BodyId) -> Option<&mut BodyRecord> {
        self.bodies.get_mut(&id)
    }

    pub fn find(&self, name: &str) -> Option<BodyId> {
        self.by_name.get(name).copied()
    }

    pub fn ids(&self) -> impl Iterator<Item = BodyId> + '_ {
        self.bodies.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }

    pub fn name_of(&self, id: BodyId) -> &str {
        self.bodies.get(&id).map_or("<destroyed>", |b| b.name.as_str())
    }

    pub const fn groups(&self) -> &GroupTable {
        &self.groups
    }

    pub fn group_of(&self, id: BodyId) -> Option<GroupId> {
        self.groups.group_of(id)
    }

    /// Record that `neighbor` occupies `attach_point` of `body`.
    pub(crate) fn occupy_node(&mut self, body: BodyId, attach_point: &str, neighbor: BodyId) -> bool {
        let Some(record) = self.bodies.get_mut(&body) else {
            return false;
        };
        record.nodes.insert(attach_point.to_owned(), neighbor);
        true
    }

    /// Free `attach_point` of `body`. Returns the previous occupant.
    pub(crate) fn free_node(&mut self, body: BodyId, attach_point: &str) -> Option<BodyId> {
        self.bodies.get_mut(&body)?.nodes.remove(attach_point)
    }

    /// Free every node of `body` that holds `neighbor`.
    pub(crate) fn free_nodes_holding(&mut self, body: BodyId, neighbor: BodyId) {
        if let Some(record) = self.bodies.get_mut(&body) {
            record.nodes.retain(|_, occupant| *occupant != neighbor);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
