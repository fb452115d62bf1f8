//! Paths to fields nested within a document.

use std::{
    fmt,
    fmt::{
        Debug,
        Display,
    },
    str::FromStr,
};

use errors::ErrorMetadata;

use crate::FieldName;

/// A path to a field within a document: a non-empty sequence of raw
/// segments. This is the single internal representation; the dotted string
/// form is a parsing convenience that splits on `.` with no quoting rules.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldPath {
    segments: Vec<FieldName>,
}

impl FieldPath {
    /// Build a path from raw segments. This is the only way to address
    /// segments that themselves contain `.`.
    pub fn new(segments: Vec<FieldName>) -> anyhow::Result<Self> {
        anyhow::ensure!(
            !segments.is_empty(),
            ErrorMetadata::invalid_argument("EmptyFieldPath", "Field paths must be non-empty")
        );
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[FieldName] {
        &self.segments
    }

    pub fn first(&self) -> &FieldName {
        self.segments.first().expect("empty FieldPath?")
    }

    pub fn last(&self) -> &FieldName {
        self.segments.last().expect("empty FieldPath?")
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Whether `self` is a strict or non-strict prefix of `other`.
    pub fn is_prefix_of(&self, other: &FieldPath) -> bool {
        other.segments.len() >= self.segments.len()
            && other.segments[..self.segments.len()] == self.segments[..]
    }

    /// The path without its first segment, if anything remains.
    pub fn tail(&self) -> Option<FieldPath> {
        if self.segments.len() <= 1 {
            return None;
        }
        Some(FieldPath {
            segments: self.segments[1..].to_vec(),
        })
    }

    /// Extend the path by one segment.
    pub fn join(&self, segment: FieldName) -> FieldPath {
        let mut segments = self.segments.clone();
        segments.push(segment);
        FieldPath { segments }
    }
}

impl FromStr for FieldPath {
    type Err = anyhow::Error;

    /// Parse the dotted string convenience form. Splitting is literal: every
    /// `.` is a separator and backticks are part of the segment.
    fn from_str(path: &str) -> anyhow::Result<Self> {
        let segments = path
            .split('.')
            .map(|s| {
                s.parse::<FieldName>().map_err(|_| {
                    anyhow::anyhow!(ErrorMetadata::invalid_argument(
                        "InvalidFieldPath",
                        format!("Field path {path:?} has an empty segment"),
                    ))
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Self::new(segments)
    }
}

impl From<FieldName> for FieldPath {
    fn from(name: FieldName) -> Self {
        FieldPath {
            segments: vec![name],
        }
    }
}

impl From<FieldPath> for Vec<FieldName> {
    fn from(p: FieldPath) -> Self {
        p.segments
    }
}

impl Debug for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}",
            self.segments
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(".")
        )
    }
}

#[cfg(any(test, feature = "testing"))]
impl proptest::arbitrary::Arbitrary for FieldPath {
    type Parameters = ();

    type Strategy = proptest::strategy::BoxedStrategy<FieldPath>;

    fn arbitrary_with((): Self::Parameters) -> Self::Strategy {
        use proptest::prelude::*;
        prop::collection::vec(any::<FieldName>(), 1..4)
            .prop_map(|segments| FieldPath { segments })
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dotted_split_is_literal() {
        let p: FieldPath = "a.b-c.`d`".parse().unwrap();
        let segments: Vec<_> = p.segments().iter().map(|s| s.as_str()).collect();
        assert_eq!(segments, vec!["a", "b-c", "`d`"]);
    }

    #[test]
    fn test_empty_segments_rejected() {
        assert!("".parse::<FieldPath>().is_err());
        assert!("a..b".parse::<FieldPath>().is_err());
        assert!(".a".parse::<FieldPath>().is_err());
    }

    #[test]
    fn test_structured_path_can_hold_dots() {
        let p = FieldPath::new(vec!["a.b".parse().unwrap()]).unwrap();
        assert_eq!(p.len(), 1);
        assert_eq!(p.first().as_str(), "a.b");
    }

    #[test]
    fn test_prefix() {
        let a: FieldPath = "a.b".parse().unwrap();
        let b: FieldPath = "a.b.c".parse().unwrap();
        assert!(a.is_prefix_of(&b));
        assert!(a.is_prefix_of(&a));
        assert!(!b.is_prefix_of(&a));
    }
}
