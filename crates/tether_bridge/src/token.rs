//! Opaque handles exchanged with the dynamic value layer.
//!
//! A token packs everything needed to validate it without touching the
//! native world:
//!
//! ```text
//! [kind:4][world:12][generation:16][index:32]
//! ```
//!
//! The all-zero value is `Token::INVALID`. Tokens cross the value boundary as
//! `Value::Int` holding the raw bits.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

const INDEX_BITS: u32 = 32;
const GENERATION_BITS: u32 = 16;
const WORLD_BITS: u32 = 12;

const GENERATION_SHIFT: u32 = INDEX_BITS;
const WORLD_SHIFT: u32 = GENERATION_SHIFT + GENERATION_BITS;
const KIND_SHIFT: u32 = WORLD_SHIFT + WORLD_BITS;

/// Largest world id representable in a token.
pub const MAX_WORLD_ID: u16 = (1 << WORLD_BITS) - 1;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TokenKind {
    Invalid = 0,
    World = 1,
    Entity = 2,
    ComponentType = 3,
    Query = 4,
    System = 5,
}

impl TokenKind {
    fn from_bits(bits: u8) -> Self {
        match bits {
            1 => TokenKind::World,
            2 => TokenKind::Entity,
            3 => TokenKind::ComponentType,
            4 => TokenKind::Query,
            5 => TokenKind::System,
            _ => TokenKind::Invalid,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(u64);

impl Token {
    pub const INVALID: Token = Token(0);

    pub(crate) fn pack(kind: TokenKind, world: u16, generation: u16, index: u32) -> Self {
        Token(
            ((kind as u64) << KIND_SHIFT)
                | (((world & MAX_WORLD_ID) as u64) << WORLD_SHIFT)
                | ((generation as u64) << GENERATION_SHIFT)
                | index as u64,
        )
    }

    /// Token naming one incarnation of a world id.
    pub(crate) fn world(world: u16, generation: u16) -> Self {
        Self::pack(TokenKind::World, world, generation, 0)
    }

    #[inline]
    pub fn kind(self) -> TokenKind {
        TokenKind::from_bits((self.0 >> KIND_SHIFT) as u8)
    }

    #[inline]
    pub fn world_id(self) -> u16 {
        ((self.0 >> WORLD_SHIFT) as u16) & MAX_WORLD_ID
    }

    #[inline]
    pub fn generation(self) -> u16 {
        (self.0 >> GENERATION_SHIFT) as u16
    }

    #[inline]
    pub fn index(self) -> u32 {
        self.0 as u32
    }

    #[inline]
    pub fn to_bits(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn from_bits(bits: u64) -> Self {
        Token(bits)
    }

    pub fn is_valid(self) -> bool {
        self.kind() != TokenKind::Invalid
    }

    pub fn to_value(self) -> Value {
        Value::Int(self.0 as i64)
    }

    /// Accepts the `Value::Int` form produced by `to_value`; anything else is
    /// not a token.
    pub fn from_value(value: &Value) -> Option<Token> {
        match value {
            Value::Int(bits) => Some(Token(*bits as u64)),
            _ => None,
        }
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({self})")
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_valid() {
            return write!(f, "invalid");
        }
        write!(
            f,
            "{:?}@{}:{}v{}",
            self.kind(),
            self.world_id(),
            self.index(),
            self.generation()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packing_round_trip() {
        let token = Token::pack(TokenKind::Query, 4095, 0xBEEF, u32::MAX);
        assert_eq!(token.kind(), TokenKind::Query);
        assert_eq!(token.world_id(), 4095);
        assert_eq!(token.generation(), 0xBEEF);
        assert_eq!(token.index(), u32::MAX);
        assert_eq!(Token::from_bits(token.to_bits()), token);
    }

    #[test]
    fn test_invalid_is_zero() {
        assert_eq!(Token::INVALID.to_bits(), 0);
        assert!(!Token::INVALID.is_valid());
        assert_eq!(Token::default(), Token::INVALID);
        assert!(Token::pack(TokenKind::Entity, 1, 0, 0).is_valid());
    }

    #[test]
    fn test_value_boundary() {
        let token = Token::pack(TokenKind::System, 12, 3, 99);
        let value = token.to_value();
        assert_eq!(Token::from_value(&value), Some(token));
        assert_eq!(Token::from_value(&Value::Float(1.0)), None);
    }

    #[test]
    fn test_world_token() {
        let token = Token::world(7, 0);
        assert_eq!(token.kind(), TokenKind::World);
        assert_eq!(token.world_id(), 7);
        assert_eq!(token.to_string(), "World@7:0v0");
    }
}
