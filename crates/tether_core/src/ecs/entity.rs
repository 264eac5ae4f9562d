//! Entity handle with generational index
//!
//! Entities are lightweight handles (8 bytes) that reference a slot in the World.
//! The generation counter prevents use-after-free bugs.

use std::fmt;

/// Entity handle (generation-indexed for safety)
///
/// Format: [32-bit generation | 32-bit index]
/// - Index: Position in the world's entity slot table
/// - Generation: Incremented on entity destruction (prevents use-after-free)
///
/// Example:
/// ```ignore
/// let entity = world.spawn();
/// world.despawn(entity);
/// // entity handle is now invalid (generation mismatch)
/// ```
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId {
    index: u32,
    generation: u32,
}

impl EntityId {
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Serialize to 64-bit integer (reverse lookups, entity-reference fields)
    pub fn to_bits(&self) -> u64 {
        ((self.generation as u64) << 32) | (self.index as u64)
    }

    /// Deserialize from 64-bit integer
    pub fn from_bits(bits: u64) -> Self {
        Self {
            index: bits as u32,
            generation: (bits >> 32) as u32,
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bits_round_trip() {
        let e = EntityId::new(42, 7);
        assert_eq!(EntityId::from_bits(e.to_bits()), e);
        assert_eq!(e.to_bits() >> 32, 7);
    }
}
