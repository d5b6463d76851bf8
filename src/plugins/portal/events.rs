//! Synchronous teleport notifications.
//!
//! Teleports can happen every step for many objects, so the event values handed to listeners
//! live in a small free-list pool instead of being allocated per notification. A listener
//! only ever sees a borrowed event for the duration of its call.

use bevy::{prelude::*, utils::HashMap};

use super::crossing::Portable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeleportPhase {
    Pre,
    Post,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TeleportationEvent {
    /// Portal that was crossed.
    pub source: Entity,
    /// Portal the object comes out of.
    pub target: Entity,
    /// Object being teleported.
    pub root: Entity,
    /// Node of the teleported hierarchy this notification is about.
    pub transform: Entity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventHandle(usize);

#[derive(Debug, Default)]
pub struct EventPool {
    slots: Vec<TeleportationEvent>,
    free: Vec<usize>,
    #[cfg(debug_assertions)]
    checked_out: Vec<bool>,
}

impl EventPool {
    pub fn acquire(&mut self, event: TeleportationEvent) -> EventHandle {
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index] = event;
                index
            }
            None => {
                self.slots.push(event);
                #[cfg(debug_assertions)]
                self.checked_out.push(false);
                self.slots.len() - 1
            }
        };
        #[cfg(debug_assertions)]
        {
            self.checked_out[index] = true;
        }
        EventHandle(index)
    }

    pub fn get(&self, handle: EventHandle) -> &TeleportationEvent {
        self.assert_checked_out(handle);
        &self.slots[handle.0]
    }

    pub fn get_mut(&mut self, handle: EventHandle) -> &mut TeleportationEvent {
        self.assert_checked_out(handle);
        &mut self.slots[handle.0]
    }

    pub fn release(&mut self, handle: EventHandle) {
        self.assert_checked_out(handle);
        #[cfg(debug_assertions)]
        {
            self.checked_out[handle.0] = false;
        }
        self.free.push(handle.0);
    }

    /// Number of slots ever allocated.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn in_use(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    #[cfg(debug_assertions)]
    fn assert_checked_out(&self, handle: EventHandle) {
        assert!(
            self.checked_out.get(handle.0).copied().unwrap_or(false),
            "teleportation event {} used after release",
            handle.0
        );
    }

    #[cfg(not(debug_assertions))]
    fn assert_checked_out(&self, _handle: EventHandle) {}
}

/// Hierarchy-wide teleport listener, attached to one node of a teleportable hierarchy.
pub trait TeleportListener: Send + Sync {
    fn pre_teleport(&mut self, _event: &TeleportationEvent) {}
    fn post_teleport(&mut self, _event: &TeleportationEvent) {}
    /// Whether to hear about teleports of an ancestor, not just of this node's own root.
    fn notify_on_parent_teleport(&self) -> bool {
        true
    }
}

pub type TeleportCallback = Box<dyn FnMut(TeleportPhase, &TeleportationEvent) + Send + Sync>;

/// Listener tables and the event pool.
///
/// Each notification goes to the crossed portal's callbacks, then to the hierarchy listeners
/// of every node under the teleported object (root first), then to the callbacks registered
/// for the teleported object itself.
#[derive(Default, Resource)]
pub struct TeleportDispatcher {
    pool: EventPool,
    portal_callbacks: HashMap<Entity, Vec<TeleportCallback>>,
    listeners: HashMap<Entity, Vec<Box<dyn TeleportListener>>>,
    point_callbacks: HashMap<Entity, Vec<TeleportCallback>>,
}

impl TeleportDispatcher {
    pub fn on_portal(
        &mut self,
        portal: Entity,
        callback: impl FnMut(TeleportPhase, &TeleportationEvent) + Send + Sync + 'static,
    ) {
        self.portal_callbacks
            .entry(portal)
            .or_default()
            .push(Box::new(callback));
    }

    pub fn add_listener(&mut self, node: Entity, listener: impl TeleportListener + 'static) {
        self.listeners
            .entry(node)
            .or_default()
            .push(Box::new(listener));
    }

    pub fn on_point(
        &mut self,
        point: Entity,
        callback: impl FnMut(TeleportPhase, &TeleportationEvent) + Send + Sync + 'static,
    ) {
        self.point_callbacks
            .entry(point)
            .or_default()
            .push(Box::new(callback));
    }

    /// Drop everything registered for `entity`.
    pub fn forget(&mut self, entity: Entity) {
        self.portal_callbacks.remove(&entity);
        self.listeners.remove(&entity);
        self.point_callbacks.remove(&entity);
    }

    pub fn pool(&self) -> &EventPool {
        &self.pool
    }

    pub fn dispatch(
        &mut self,
        phase: TeleportPhase,
        source: Entity,
        target: Entity,
        portable: &dyn Portable,
    ) {
        let root = portable.entity();
        let handle = self.pool.acquire(TeleportationEvent {
            source,
            target,
            root,
            transform: root,
        });

        if let Some(callbacks) = self.portal_callbacks.get_mut(&source) {
            let event = self.pool.get(handle);
            for callback in callbacks.iter_mut() {
                callback(phase, event);
            }
        }

        if !self.listeners.is_empty() {
            for node in subtree(portable, root) {
                let listeners = match self.listeners.get_mut(&node) {
                    Some(listeners) => listeners,
                    None => continue,
                };
                self.pool.get_mut(handle).transform = node;
                let event = self.pool.get(handle);
                for listener in listeners.iter_mut() {
                    if node != root && !listener.notify_on_parent_teleport() {
                        continue;
                    }
                    match phase {
                        TeleportPhase::Pre => listener.pre_teleport(event),
                        TeleportPhase::Post => listener.post_teleport(event),
                    }
                }
            }
            self.pool.get_mut(handle).transform = root;
        }

        if let Some(callbacks) = self.point_callbacks.get_mut(&root) {
            let event = self.pool.get(handle);
            for callback in callbacks.iter_mut() {
                callback(phase, event);
            }
        }

        self.pool.release(handle);
    }
}

/// `root` and all its descendants, root first, walked without recursion.
pub fn subtree(portable: &dyn Portable, root: Entity) -> Vec<Entity> {
    let mut nodes = Vec::new();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        nodes.push(node);
        stack.extend(portable.children(node).into_iter().rev());
    }
    nodes
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::plugins::portal::testing::TestBody;

    fn entity(id: u32) -> Entity {
        Entity::from_raw(id)
    }

    type Log = Arc<Mutex<Vec<String>>>;

    struct Recorder {
        name: &'static str,
        log: Log,
        parents: bool,
    }

    impl TeleportListener for Recorder {
        fn pre_teleport(&mut self, event: &TeleportationEvent) {
            self.log
                .lock()
                .unwrap()
                .push(format!("{} pre {:?}", self.name, event.transform));
        }

        fn post_teleport(&mut self, event: &TeleportationEvent) {
            self.log
                .lock()
                .unwrap()
                .push(format!("{} post {:?}", self.name, event.transform));
        }

        fn notify_on_parent_teleport(&self) -> bool {
            self.parents
        }
    }

    #[test]
    fn pool_reuses_released_slots() {
        let mut pool = EventPool::default();
        let event = TeleportationEvent {
            source: entity(1),
            target: entity(2),
            root: entity(3),
            transform: entity(3),
        };
        let first = pool.acquire(event);
        pool.release(first);
        let second = pool.acquire(event);
        assert_eq!(first, second);
        assert_eq!(pool.capacity(), 1);
        assert_eq!(pool.in_use(), 1);
        let third = pool.acquire(event);
        assert_ne!(second, third);
        assert_eq!(pool.capacity(), 2);
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "used after release")]
    fn reading_a_released_event_panics_in_debug() {
        let mut pool = EventPool::default();
        let handle = pool.acquire(TeleportationEvent {
            source: entity(1),
            target: entity(2),
            root: entity(3),
            transform: entity(3),
        });
        pool.release(handle);
        let _ = pool.get(handle);
    }

    #[test]
    fn subtree_is_root_first_depth_first() {
        let body = TestBody::new(entity(10))
            .with_children(entity(10), [entity(11), entity(12)])
            .with_children(entity(11), [entity(13)]);
        assert_eq!(
            subtree(&body, entity(10)),
            vec![entity(10), entity(11), entity(13), entity(12)]
        );
    }

    #[test]
    fn listeners_fire_in_order_and_can_ignore_parents() {
        let log: Log = Default::default();
        let (portal, exit) = (entity(1), entity(2));
        let (root, child, quiet) = (entity(10), entity(11), entity(12));
        let body = TestBody::new(root).with_children(root, [child, quiet]);

        let mut dispatcher = TeleportDispatcher::default();
        let point_log = log.clone();
        dispatcher.on_point(root, move |phase, event| {
            point_log
                .lock()
                .unwrap()
                .push(format!("point {:?} {:?}", phase, event.transform));
        });
        let listeners = [(root, "root", true), (child, "child", true), (quiet, "quiet", false)];
        for (node, name, parents) in listeners {
            dispatcher.add_listener(
                node,
                Recorder {
                    name,
                    log: log.clone(),
                    parents,
                },
            );
        }
        let portal_log = log.clone();
        dispatcher.on_portal(portal, move |phase, event| {
            assert_eq!(event.target, exit);
            portal_log.lock().unwrap().push(format!("portal {:?}", phase));
        });

        dispatcher.dispatch(TeleportPhase::Pre, portal, exit, &body);
        dispatcher.dispatch(TeleportPhase::Post, portal, exit, &body);

        let log = log.lock().unwrap();
        assert_eq!(
            *log,
            vec![
                "portal Pre".to_string(),
                format!("root pre {:?}", root),
                format!("child pre {:?}", child),
                format!("point Pre {:?}", root),
                "portal Post".to_string(),
                format!("root post {:?}", root),
                format!("child post {:?}", child),
                format!("point Post {:?}", root),
            ]
        );
        assert_eq!(dispatcher.pool().in_use(), 0);
    }
}
