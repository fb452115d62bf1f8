//! String-keyed map values, the payload type of every document.

use std::{
    collections::BTreeMap,
    fmt,
    fmt::{
        Debug,
        Display,
    },
};

use crate::{
    FieldName,
    FieldPath,
    Value,
};

/// An ordered mapping from field names to values. Key order is not
/// semantically significant; the canonical form keeps keys sorted.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct MapValue(BTreeMap<FieldName, Value>);

impl MapValue {
    pub fn empty() -> Self {
        MapValue(BTreeMap::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &FieldName) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn insert(&mut self, field: FieldName, value: Value) -> Option<Value> {
        self.0.insert(field, value)
    }

    pub fn remove(&mut self, field: &FieldName) -> Option<Value> {
        self.0.remove(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FieldName, &Value)> {
        self.0.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &FieldName> {
        self.0.keys()
    }

    /// Walk a field path through nested maps.
    pub fn get_path(&self, path: &FieldPath) -> Option<&Value> {
        let mut current = self.0.get(path.first())?;
        for segment in &path.segments()[1..] {
            match current {
                Value::Map(m) => current = m.get(segment)?,
                _ => return None,
            }
        }
        Some(current)
    }

    /// Set the value at a field path, materializing intermediate maps. A
    /// non-map value along the way is replaced by a map.
    pub fn set_path(&mut self, path: &FieldPath, value: Value) {
        let mut current = &mut self.0;
        let (last, init) = path
            .segments()
            .split_last()
            .expect("FieldPath is non-empty");
        for segment in init {
            let entry = current
                .entry(segment.clone())
                .or_insert_with(|| Value::Map(MapValue::empty()));
            if !matches!(entry, Value::Map(_)) {
                *entry = Value::Map(MapValue::empty());
            }
            let Value::Map(m) = entry else { unreachable!() };
            current = &mut m.0;
        }
        current.insert(last.clone(), value);
    }

    /// Remove the value at a field path. Missing intermediates make this a
    /// no-op. Returns the removed value.
    pub fn delete_path(&mut self, path: &FieldPath) -> Option<Value> {
        let mut current = &mut self.0;
        let (last, init) = path
            .segments()
            .split_last()
            .expect("FieldPath is non-empty");
        for segment in init {
            match current.get_mut(segment) {
                Some(Value::Map(m)) => current = &mut m.0,
                _ => return None,
            }
        }
        current.remove(last)
    }

    /// Every leaf field path present in this map, depth-first. A nested
    /// empty map counts as a leaf.
    pub fn leaf_paths(&self) -> Vec<FieldPath> {
        let mut out = Vec::new();
        for (name, val) in &self.0 {
            match val {
                Value::Map(m) if !m.is_empty() => {
                    for nested in m.leaf_paths() {
                        let mut segments = vec![name.clone()];
                        segments.extend(Vec::<FieldName>::from(nested));
                        out.push(FieldPath::new(segments).expect("non-empty segments"));
                    }
                },
                _ => out.push(FieldPath::from(name.clone())),
            }
        }
        out
    }
}

impl From<BTreeMap<FieldName, Value>> for MapValue {
    fn from(m: BTreeMap<FieldName, Value>) -> Self {
        MapValue(m)
    }
}

impl From<MapValue> for BTreeMap<FieldName, Value> {
    fn from(m: MapValue) -> Self {
        m.0
    }
}

impl IntoIterator for MapValue {
    type Item = (FieldName, Value);
    type IntoIter = std::collections::btree_map::IntoIter<FieldName, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl FromIterator<(FieldName, Value)> for MapValue {
    fn from_iter<T: IntoIterator<Item = (FieldName, Value)>>(iter: T) -> Self {
        MapValue(iter.into_iter().collect())
    }
}

impl Display for MapValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{k}: {v}")?;
        }
        write!(f, "}}")
    }
}

impl Debug for MapValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self}")
    }
}
