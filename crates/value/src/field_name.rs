//! Names for individual fields within a document.

use std::{
    fmt::{
        self,
        Debug,
        Display,
    },
    ops::Deref,
    str::FromStr,
};

use errors::ErrorMetadata;

/// A single field name segment. Any non-empty UTF-8 string is legal,
/// including segments with hyphens, leading digits, or spaces; backticks are
/// ordinary characters and carry no quoting semantics.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldName(String);

impl FieldName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Deref for FieldName {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl FromStr for FieldName {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        if s.is_empty() {
            anyhow::bail!(ErrorMetadata::invalid_argument(
                "EmptyFieldName",
                "Field names must be non-empty",
            ));
        }
        Ok(FieldName(s.to_owned()))
    }
}

impl TryFrom<&str> for FieldName {
    type Error = anyhow::Error;

    fn try_from(s: &str) -> anyhow::Result<Self> {
        s.parse()
    }
}

impl TryFrom<String> for FieldName {
    type Error = anyhow::Error;

    fn try_from(s: String) -> anyhow::Result<Self> {
        if s.is_empty() {
            anyhow::bail!(ErrorMetadata::invalid_argument(
                "EmptyFieldName",
                "Field names must be non-empty",
            ));
        }
        Ok(FieldName(s))
    }
}

impl From<FieldName> for String {
    fn from(f: FieldName) -> String {
        f.0
    }
}

impl Debug for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(any(test, feature = "testing"))]
impl proptest::arbitrary::Arbitrary for FieldName {
    type Parameters = ();

    type Strategy = proptest::strategy::BoxedStrategy<FieldName>;

    fn arbitrary_with((): Self::Parameters) -> Self::Strategy {
        use proptest::prelude::*;
        "[a-zA-Z0-9_-]{1,8}"
            .prop_map(|s| FieldName(s))
            .boxed()
    }
}
