//! Route templates over document paths.
//!
//! A template like `users/{userId}/posts/{postId}` matches document paths of
//! the same length; literal segments must match exactly and `{name}`
//! segments capture into the params map. Trailing wildcards are not
//! supported.

use std::{
    collections::BTreeMap,
    fmt::{
        self,
        Display,
    },
    str::FromStr,
};

use errors::ErrorMetadata;
use value::DocumentPath;

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteTemplate {
    segments: Vec<Segment>,
}

impl RouteTemplate {
    /// Number of path segments this template binds.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Match a document path, capturing `{name}` segments positionally.
    pub fn matches(&self, path: &DocumentPath) -> Option<BTreeMap<String, String>> {
        let segments = path.segments();
        if segments.len() != self.segments.len() {
            return None;
        }
        let mut params = BTreeMap::new();
        for (template, actual) in self.segments.iter().zip(segments) {
            match template {
                Segment::Literal(expected) => {
                    if expected != actual {
                        return None;
                    }
                },
                Segment::Param(name) => {
                    params.insert(name.clone(), actual.clone());
                },
            }
        }
        Some(params)
    }
}

impl FromStr for RouteTemplate {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let invalid = |msg: String| {
            anyhow::anyhow!(ErrorMetadata::invalid_argument("InvalidRouteTemplate", msg))
        };
        let mut segments = Vec::new();
        for raw in s.split('/') {
            if raw.is_empty() {
                return Err(invalid(format!("route {s:?} has an empty segment")));
            }
            if raw == "*" || raw == "**" {
                return Err(invalid(format!(
                    "route {s:?} uses a wildcard segment; only {{name}} captures are supported"
                )));
            }
            if let Some(inner) = raw.strip_prefix('{') {
                let Some(name) = inner.strip_suffix('}') else {
                    return Err(invalid(format!("unterminated capture in route {s:?}")));
                };
                if name.is_empty() {
                    return Err(invalid(format!("empty capture name in route {s:?}")));
                }
                segments.push(Segment::Param(name.to_owned()));
            } else if raw.contains('{') || raw.contains('}') {
                return Err(invalid(format!("malformed capture in route {s:?}")));
            } else {
                segments.push(Segment::Literal(raw.to_owned()));
            }
        }
        if segments.len() % 2 != 0 {
            return Err(invalid(format!(
                "route {s:?} must address documents (even segment count)"
            )));
        }
        Ok(RouteTemplate { segments })
    }
}

impl Display for RouteTemplate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let rendered: Vec<String> = self
            .segments
            .iter()
            .map(|segment| match segment {
                Segment::Literal(s) => s.clone(),
                Segment::Param(name) => format!("{{{name}}}"),
            })
            .collect();
        write!(f, "{}", rendered.join("/"))
    }
}
