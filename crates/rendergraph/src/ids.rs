//! Strongly-typed handles used as map keys throughout the engine.
//!
//! Notebook assets are addressed by numeric ids that arrive either as JSON
//! numbers or numeric strings; passes and their output textures are addressed
//! by position once the render graph has been compiled, so no manager ever
//! keys its maps by concatenated strings.

use std::fmt;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            pub fn new(value: u64) -> Self {
                Self(value)
            }

            pub fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                deserialize_numeric_id(deserializer).map(Self)
            }
        }
    };
}

numeric_id!(
    /// Identifier of a shader asset stored in the notebook.
    ShaderId
);

numeric_id!(
    /// Identifier of a texture or data resource stored in the notebook.
    ResourceId
);

fn deserialize_numeric_id<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Helper {
        Num(u64),
        Str(String),
    }

    match Helper::deserialize(deserializer)? {
        Helper::Num(value) => Ok(value),
        Helper::Str(raw) => raw
            .trim()
            .parse::<u64>()
            .map_err(|err| de::Error::custom(format!("invalid id '{raw}': {err}"))),
    }
}

/// Host-side container a renderer draws into (one per render cell).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(pub String);

impl ContainerId {
    pub fn new(id: impl Into<String>) -> Self {
        ContainerId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContainerId {
    fn from(value: &str) -> Self {
        ContainerId::new(value)
    }
}

/// Position of a pass inside a compiled [`RenderGraph`](crate::graph::RenderGraph).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PassIndex(pub usize);

impl fmt::Display for PassIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One declared output texture of one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TextureKey {
    pub pass: PassIndex,
    pub slot: usize,
}

impl TextureKey {
    pub fn new(pass: PassIndex, slot: usize) -> Self {
        Self { pass, slot }
    }
}

/// Scope of a shader reflection: the same shader may be instanced by several
/// passes, each with its own uniform buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UniformScope {
    pub pass: PassIndex,
    pub shader: ShaderId,
}

impl UniformScope {
    pub fn new(pass: PassIndex, shader: ShaderId) -> Self {
        Self { pass, shader }
    }
}

impl fmt::Display for UniformScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pass {} / shader {}", self.pass, self.shader)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_accept_numbers_and_numeric_strings() {
        let ids: Vec<ShaderId> = serde_json::from_str(r#"[3, "14", " 15 "]"#).unwrap();
        assert_eq!(ids, vec![ShaderId(3), ShaderId(14), ShaderId(15)]);
        assert!(serde_json::from_str::<ResourceId>(r#""abc""#).is_err());
    }
}
