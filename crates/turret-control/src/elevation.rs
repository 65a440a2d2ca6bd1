use std::collections::BTreeMap;

/// Pitch to command for each detector class, keyed by class name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElevationTable {
    map: BTreeMap<String, i32>,
}

const DEFAULT_TABLE: [(&str, i32); 10] = [
    ("blue100", 6_000),
    ("blue200", 8_500),
    ("blue300", 9_500),
    ("blue400", 10_000),
    ("blue500", 14_500),
    ("red100", 8_000),
    ("red200", 10_000),
    ("red300", 14_000),
    ("red400", 18_000),
    ("red500", 20_000),
];

impl Default for ElevationTable {
    fn default() -> Self {
        Self { map: DEFAULT_TABLE.iter().map(|(k, v)| (k.to_string(), *v)).collect() }
    }
}

impl ElevationTable {
    /// Built-in table with `overrides` layered on top.
    pub fn with_overrides(overrides: &BTreeMap<String, i32>) -> Self {
        let mut t = Self::default();
        for (k, v) in overrides {
            t.map.insert(k.clone(), *v);
        }
        t
    }

    pub fn get(&self, class_name: &str) -> Option<i32> {
        self.map.get(class_name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i32)> {
        self.map.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
