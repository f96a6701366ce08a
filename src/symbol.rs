use std::ops::Range;

use fxhash::FxBuildHasher;
use indexmap::IndexMap;
use miette::SourceSpan;

// Symbol table of label -> 1-based word address
type FxMap<K, V> = IndexMap<K, V, FxBuildHasher>;

/// Labels declared during the first pass, in declaration order.
#[derive(Clone, Default, PartialEq, Eq, Debug)]
pub struct LabelTable {
    map: FxMap<String, u32>,
}

impl LabelTable {
    pub fn new() -> Self {
        LabelTable::default()
    }

    /// Record `name` at `addr`. Returns the existing address if the label is already taken.
    pub fn insert(&mut self, name: &str, addr: u32) -> Result<(), u32> {
        let name = name.to_ascii_uppercase();
        match self.map.get(&name) {
            Some(prev) => Err(*prev),
            None => {
                self.map.insert(name, addr);
                Ok(())
            }
        }
    }

    /// Case-insensitive lookup.
    pub fn get(&self, name: &str) -> Option<u32> {
        self.map.get(&name.to_ascii_uppercase()).copied()
    }

    /// First label pointing at `addr`, if any.
    pub fn name_of(&self, addr: u32) -> Option<&str> {
        self.map
            .iter()
            .find(|(_, a)| **a == addr)
            .map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.map.iter().map(|(name, addr)| (name.as_str(), *addr))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Whether an (upper-cased) label matches `[A-Z_][A-Z0-9_]*`.
pub fn is_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_uppercase() || c == '_' => {
            chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
        }
        _ => false,
    }
}

/// Location within source
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub struct Span {
    offs: usize,
    len: usize,
}

impl Span {
    pub fn new(offs: usize, len: usize) -> Self {
        Span { offs, len }
    }

    pub fn dummy() -> Self {
        Span { offs: 0, len: 0 }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn offs(&self) -> usize {
        self.offs
    }

    pub fn end(&self) -> usize {
        self.offs + self.len
    }
}

impl From<Span> for SourceSpan {
    fn from(value: Span) -> Self {
        SourceSpan::new(value.offs().into(), value.len())
    }
}

impl From<Span> for Range<usize> {
    fn from(value: Span) -> Self {
        value.offs()..value.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_keep_declaration_order() {
        let mut table = LabelTable::new();
        table.insert("loop", 3).unwrap();
        table.insert("START", 1).unwrap();
        let names: Vec<_> = table.iter().collect();
        assert_eq!(names, vec![("LOOP", 3), ("START", 1)]);
        assert_eq!(table.get("Loop"), Some(3));
        assert_eq!(table.name_of(1), Some("START"));
    }

    #[test]
    fn duplicate_label_reports_first_address() {
        let mut table = LabelTable::new();
        table.insert("X", 4).unwrap();
        assert_eq!(table.insert("x", 9), Err(4));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn label_names() {
        assert!(is_label_name("LOOP_1"));
        assert!(is_label_name("_START"));
        assert!(!is_label_name("1LOOP"));
        assert!(!is_label_name("MY LABEL"));
        assert!(!is_label_name(""));
        assert!(!is_label_name("A-B"));
    }

    #[test]
    fn span_converts_to_range() {
        let span = Span::new(4, 3);
        let range: Range<usize> = span.into();
        assert_eq!(range, 4..7);
        assert_eq!(span.end(), 7);
    }
}
