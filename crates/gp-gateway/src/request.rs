// request.rs — Inbound change requests.
//
// A change set arrives as a JSON object `{path: content}`. Application
// order is the order the paths appear in the document, so ChangeSet keeps
// entries in a Vec and deserializes the map by hand instead of going
// through a sorted map.

use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// File path -> new content, in application order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet(Vec<(String, String)>);

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: impl Into<String>, content: impl Into<String>) -> Self {
        self.0.push((path.into(), content.into()));
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(p, c)| (p.as_str(), c.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<P: Into<String>, C: Into<String>> FromIterator<(P, C)> for ChangeSet {
    fn from_iter<I: IntoIterator<Item = (P, C)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(p, c)| (p.into(), c.into())).collect())
    }
}

impl Serialize for ChangeSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (path, content) in &self.0 {
            map.serialize_entry(path, content)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ChangeSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ChangeSetVisitor;

        impl<'de> Visitor<'de> for ChangeSetVisitor {
            type Value = ChangeSet;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of file path to content")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<ChangeSet, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((path, content)) = access.next_entry::<String, String>()? {
                    entries.push((path, content));
                }
                Ok(ChangeSet(entries))
            }
        }

        deserializer.deserialize_map(ChangeSetVisitor)
    }
}

/// One change request as submitted by a planner or automation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub description: String,

    pub files: ChangeSet,

    /// Opaque blob from an external risk assessor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_assessment: Option<serde_json::Value>,
}
