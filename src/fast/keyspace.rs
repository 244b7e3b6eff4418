//! Typed keyspace holding every live fast-store structure.

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::warn;

use super::zset::SortedSet;

const SOURCE: &str = "fast::keyspace";

/// A single keyed structure.
#[derive(Debug, Clone)]
pub enum Value {
    Set(HashSet<String>),
    Zset(SortedSet),
    List(VecDeque<String>),
    Counter(i64),
}

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Value::Set(_) => "set",
            Value::Zset(_) => "zset",
            Value::List(_) => "list",
            Value::Counter(_) => "counter",
        }
    }
}

/// The full key → structure map.
///
/// Keys are produced exclusively by `util::keys`, so a key never changes its
/// structure kind in practice; a mismatch is logged and the entry reset rather
/// than panicking.
#[derive(Debug, Default)]
pub struct Keyspace {
    entries: HashMap<String, Value>,
}

macro_rules! typed_accessors {
    ($get:ident, $get_mut:ident, $variant:ident, $ty:ty, $empty:expr) => {
        pub fn $get(&self, key: &str) -> Option<&$ty> {
            match self.entries.get(key) {
                None => None,
                Some(Value::$variant(inner)) => Some(inner),
                Some(other) => {
                    warn!(
                        key,
                        expected = stringify!($variant),
                        found = other.kind(),
                        target_module = SOURCE,
                        "Fast-store key holds unexpected structure kind"
                    );
                    None
                }
            }
        }

        pub fn $get_mut(&mut self, key: &str) -> &mut $ty {
            let slot = self
                .entries
                .entry(key.to_string())
                .or_insert_with(|| Value::$variant($empty));
            if !matches!(slot, Value::$variant(_)) {
                warn!(
                    key,
                    expected = stringify!($variant),
                    found = slot.kind(),
                    target_module = SOURCE,
                    "Resetting fast-store key with unexpected structure kind"
                );
                *slot = Value::$variant($empty);
            }
            match slot {
                Value::$variant(inner) => inner,
                _ => unreachable!(),
            }
        }
    };
}

impl Keyspace {
    pub fn new() -> Self {
        Self::default()
    }

    typed_accessors!(set, set_mut, Set, HashSet<String>, HashSet::new());
    typed_accessors!(zset, zset_mut, Zset, SortedSet, SortedSet::new());
    typed_accessors!(list, list_mut, List, VecDeque<String>, VecDeque::new());

    pub fn counter(&self, key: &str) -> i64 {
        match self.entries.get(key) {
            Some(Value::Counter(value)) => *value,
            Some(other) => {
                warn!(
                    key,
                    expected = "Counter",
                    found = other.kind(),
                    target_module = SOURCE,
                    "Fast-store key holds unexpected structure kind"
                );
                0
            }
            None => 0,
        }
    }

    /// Adjust a counter, clamping at zero. Transient races that would drive a
    /// denormalized count negative self-correct on the next recompute.
    pub fn counter_add(&mut self, key: &str, delta: i64) -> i64 {
        let slot = self
            .entries
            .entry(key.to_string())
            .or_insert(Value::Counter(0));
        if !matches!(slot, Value::Counter(_)) {
            warn!(
                key,
                expected = "Counter",
                found = slot.kind(),
                target_module = SOURCE,
                "Resetting fast-store key with unexpected structure kind"
            );
            *slot = Value::Counter(0);
        }
        if let Value::Counter(value) = slot {
            *value = (*value + delta).max(0);
            *value
        } else {
            unreachable!()
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Remove a key outright. Returns `true` when it existed.
    pub fn remove(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Drop the entry if its container emptied out, keeping key-existence
    /// semantics aligned with the empty-key-is-missing convention.
    pub fn prune_if_empty(&mut self, key: &str) {
        let empty = match self.entries.get(key) {
            Some(Value::Set(set)) => set.is_empty(),
            Some(Value::Zset(zset)) => zset.is_empty(),
            Some(Value::List(list)) => list.is_empty(),
            _ => false,
        };
        if empty {
            self.entries.remove(key);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
