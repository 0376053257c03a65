//! Per shard window state. Instances are grouped by partition key and indexed by window start, a
//! key never has two instances with the same start. The store is exclusively owned by its shard,
//! hence there are no locks.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::config::WindowKindTag;
use crate::message::StreamEvent;
use crate::windower::Window;

/// Buffered events of an open window for one partition key.
#[derive(Debug, Clone)]
pub struct WindowInstance {
    key: Arc<str>,
    window: Window,
    /// events in the order they were appended
    events: Vec<StreamEvent>,
    triggered: bool,
    /// latest event time appended so far, used for session gap detection
    last_event_time: i64,
    /// session windows extend their end with every appended event
    extends: bool,
}

impl WindowInstance {
    fn new(key: Arc<str>, window: Window, extends: bool) -> Self {
        Self {
            key,
            window,
            events: Vec::new(),
            triggered: false,
            last_event_time: window.start,
            extends,
        }
    }

    pub fn key(&self) -> &Arc<str> {
        &self.key
    }

    pub fn window(&self) -> Window {
        self.window
    }

    pub fn events(&self) -> &[StreamEvent] {
        &self.events
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered
    }

    pub fn last_event_time(&self) -> i64 {
        self.last_event_time
    }

    /// Appends the event to the buffer. Appending to a triggered instance is a no-op, a triggered
    /// instance is never reopened.
    pub fn append(&mut self, event: StreamEvent) {
        if self.triggered {
            return;
        }
        let event_time = event.event_time();
        self.last_event_time = self.last_event_time.max(event_time);
        if self.extends {
            self.window.end = self.window.end.max(event_time);
        }
        self.events.push(event);
    }

    pub(crate) fn mark_triggered(&mut self) {
        self.triggered = true;
    }
}

/// Mapping from partition key to the open [WindowInstance]s of that key.
#[derive(Debug)]
pub struct WindowStateStore {
    kind: WindowKindTag,
    instances: HashMap<Arc<str>, BTreeMap<i64, WindowInstance>>,
}

impl WindowStateStore {
    pub fn new(kind: WindowKindTag) -> Self {
        Self {
            kind,
            instances: HashMap::new(),
        }
    }

    /// Returns the instance of the key starting at `start`, creating an empty one with the given
    /// end if absent.
    pub fn get_or_create(&mut self, key: &Arc<str>, start: i64, end: i64) -> &mut WindowInstance {
        let extends = self.kind == WindowKindTag::Session;
        self.instances
            .entry(Arc::clone(key))
            .or_default()
            .entry(start)
            .or_insert_with(|| WindowInstance::new(Arc::clone(key), Window::new(start, end), extends))
    }

    pub fn contains(&self, key: &str, start: i64) -> bool {
        self.instances
            .get(key)
            .is_some_and(|windows| windows.contains_key(&start))
    }

    /// Open (not triggered) instances of the key, ordered by window start.
    pub fn all_open_for_key(&self, key: &str) -> impl Iterator<Item = &WindowInstance> {
        self.instances
            .get(key)
            .into_iter()
            .flat_map(|windows| windows.values())
            .filter(|instance| !instance.is_triggered())
    }

    /// Marks the instance of the key starting at `start` as triggered. Returns false if there is no
    /// such open instance.
    pub fn mark_triggered(&mut self, key: &str, start: i64) -> bool {
        match self
            .instances
            .get_mut(key)
            .and_then(|windows| windows.get_mut(&start))
        {
            Some(instance) if !instance.is_triggered() => {
                instance.mark_triggered();
                true
            }
            _ => false,
        }
    }

    /// Marks every open instance for which `should_fire` returns true as triggered and returns how
    /// many were marked.
    pub fn mark_expired(&mut self, mut should_fire: impl FnMut(&WindowInstance) -> bool) -> usize {
        let mut marked = 0;
        for instance in self
            .instances
            .values_mut()
            .flat_map(|windows| windows.values_mut())
        {
            if !instance.is_triggered() && should_fire(instance) {
                instance.mark_triggered();
                marked += 1;
            }
        }
        marked
    }

    /// Removes the triggered instances, sorted by window end then start then key so that the
    /// emission order is deterministic.
    pub fn remove_triggered(&mut self) -> Vec<WindowInstance> {
        let mut removed = Vec::new();
        for windows in self.instances.values_mut() {
            let triggered: Vec<i64> = windows
                .iter()
                .filter(|(_, instance)| instance.is_triggered())
                .map(|(start, _)| *start)
                .collect();
            removed.extend(triggered.iter().filter_map(|start| windows.remove(start)));
        }
        self.instances.retain(|_, windows| !windows.is_empty());
        sort_for_emission(&mut removed);
        removed
    }

    /// Marks every instance as triggered and removes all of them, leaving the store empty.
    pub fn drain_all(&mut self) -> Vec<WindowInstance> {
        let mut drained: Vec<WindowInstance> = self
            .instances
            .drain()
            .flat_map(|(_, windows)| windows.into_values())
            .map(|mut instance| {
                instance.mark_triggered();
                instance
            })
            .collect();
        sort_for_emission(&mut drained);
        drained
    }

    /// Number of instances held.
    pub fn len(&self) -> usize {
        self.instances.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

fn sort_for_emission(instances: &mut [WindowInstance]) {
    instances.sort_by(|a, b| {
        a.window
            .cmp(&b.window)
            .then_with(|| a.key.cmp(&b.key))
    });
}
