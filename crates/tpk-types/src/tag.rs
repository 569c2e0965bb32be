use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::wire;

/// Self-describing `(name, version)` marker written ahead of every
/// serialized aggregate.
///
/// A reader built for version `N` of a type accepts any stored version in
/// `1..=N` under the same name; anything else is refused before a single
/// byte of the payload is interpreted.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeTag {
    name: String,
    version: u32,
}

impl TypeTag {
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Append the wire form of this tag: length-prefixed name, then the
    /// version as little-endian u32.
    pub fn write_to(&self, buf: &mut Vec<u8>) {
        wire::put_str(buf, &self.name);
        buf.extend_from_slice(&self.version.to_le_bytes());
    }

    /// Read a tag from the front of the cursor.
    pub fn read_from(input: &mut &[u8]) -> Result<Self, TypeError> {
        let name = wire::take_str(input)?;
        let version = u32::from_le_bytes(wire::take_array::<4>(input)?);
        Ok(Self { name, version })
    }

    /// Check that data written under `actual` can be read by code expecting
    /// `self`.
    pub fn ensure_compatible(&self, actual: &TypeTag) -> Result<(), TypeError> {
        if self.name == actual.name && actual.version >= 1 && actual.version <= self.version {
            Ok(())
        } else {
            Err(TypeError::IncompatibleTag {
                expected: self.to_string(),
                actual: actual.to_string(),
            })
        }
    }

    /// Read a tag and check it against `self` in one step.
    pub fn expect_from(&self, input: &mut &[u8]) -> Result<TypeTag, TypeError> {
        let actual = Self::read_from(input)?;
        self.ensure_compatible(&actual)?;
        Ok(actual)
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(V{})", self.name, self.version)
    }
}
