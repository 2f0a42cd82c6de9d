//! Local mirror of a queue location.
//!
//! The streaming API reports writes relative to the listened location and at
//! arbitrary depth. Triggers, however, fire per child record with its full
//! value before and after the write, so the watcher keeps the last known value
//! of every child here and turns each server event into per-child changes.

use super::Change;
use crate::database::listen::ServerEvent;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

#[derive(Debug, Default)]
pub struct QueueSnapshot {
    // Push ids sort chronologically, so iteration order is arrival order.
    children: BTreeMap<String, Value>,
}

impl QueueSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.children.get(key)
    }

    /// Applies a server event and returns the resulting child changes in key order.
    ///
    /// Control events and writes that leave a child unchanged produce nothing.
    pub fn apply(&mut self, event: &ServerEvent) -> Vec<(String, Change)> {
        let mut touched = BTreeMap::new();

        match event {
            ServerEvent::Put { path, data } => {
                self.write(&segments(path), data.clone(), &mut touched);
            }
            ServerEvent::Patch { path, data } => {
                let base = segments(path);
                if let Value::Object(entries) = data {
                    for (relative, value) in entries {
                        let mut target = base.clone();
                        target.extend(segments(relative));
                        self.write(&target, value.clone(), &mut touched);
                    }
                }
            }
            ServerEvent::KeepAlive | ServerEvent::Cancel(_) | ServerEvent::AuthRevoked => {}
        }

        touched
            .into_iter()
            .filter_map(|(key, before)| {
                let change = Change::new(before, self.children.get(&key).cloned());
                change.kind().map(|_| (key, change))
            })
            .collect()
    }

    // Records the pre-write value of every child it modifies in `touched`,
    // keeping the earliest one when a child is written more than once.
    fn write(
        &mut self,
        path: &[String],
        data: Value,
        touched: &mut BTreeMap<String, Option<Value>>,
    ) {
        let Some((key, rest)) = path.split_first() else {
            let replacement = match data {
                Value::Object(map) => map.into_iter().filter(|(_, v)| !is_empty(v)).collect(),
                _ => BTreeMap::new(),
            };
            let previous = std::mem::replace(&mut self.children, replacement);
            for (key, value) in previous {
                touched.entry(key).or_insert(Some(value));
            }
            for key in self.children.keys() {
                touched.entry(key.clone()).or_insert(None);
            }
            return;
        };

        touched
            .entry(key.clone())
            .or_insert_with(|| self.children.get(key).cloned());

        let current = self.children.remove(key).unwrap_or(Value::Null);
        let updated = set_at(current, rest, data);
        if !is_empty(&updated) {
            self.children.insert(key.clone(), updated);
        }
    }
}

fn segments(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Replaces the value at `path` inside `node`, pruning maps left empty.
fn set_at(node: Value, path: &[String], data: Value) -> Value {
    let Some((key, rest)) = path.split_first() else {
        return data;
    };

    let mut map = match node {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    let child = map.remove(key).unwrap_or(Value::Null);
    let updated = set_at(child, rest, data);
    if !is_empty(&updated) {
        map.insert(key.clone(), updated);
    }

    if map.is_empty() {
        Value::Null
    } else {
        Value::Object(map)
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}
