/// Insertion-order-preserving mapping from values to values.
///
/// Keys compare by structural [`equals`](crate::Value::equals), so `Null`
/// is a permitted key and NaN is a usable key (it equals itself
/// structurally even though `NaN != NaN` under the `==` operator).
use std::hash::{Hash, Hasher};

use indexmap::IndexMap;

use crate::value::Value;

/// Key wrapper giving [`Value`] the structural equality and hash the
/// table needs.
#[derive(Debug, Clone)]
pub struct Key(pub Value);

impl PartialEq for Key {
    fn eq(&self, other: &Key) -> bool {
        self.0.equals(&other.0)
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash_structural(state);
    }
}

/// The backing store of a table value.
///
/// Entries may be plain values or [`Property`](crate::Property)
/// indirections; interpretation of properties happens in the member
/// access layer, not here.
#[derive(Debug, Default)]
pub struct Table {
    entries: IndexMap<Key, Value>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Raw lookup: returns the stored entry, including `Property`
    /// indirections.
    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.entries.get(&Key(key.clone()))
    }

    /// Raw insert: replaces an existing entry, keeping its position;
    /// new keys append in insertion order.
    pub fn insert(&mut self, key: Value, value: Value) {
        self.entries.insert(Key(key), value);
    }

    pub fn remove(&mut self, key: &Value) -> Option<Value> {
        self.entries.shift_remove(&Key(key.clone()))
    }

    pub fn contains_key(&self, key: &Value) -> bool {
        self.entries.contains_key(&Key(key.clone()))
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries.iter().map(|(k, v)| (&k.0, v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &Value> {
        self.entries.keys().map(|k| &k.0)
    }
}

impl FromIterator<(Value, Value)> for Table {
    fn from_iter<I: IntoIterator<Item = (Value, Value)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (Key(k), v))
                .collect(),
        }
    }
}
