// handles.rs - Per-world token allocator
//
// One slot table per token kind. Slots live in fixed-size chunks that are
// never moved once allocated, so `resolve` only needs a read lock on the
// chunk list plus atomic loads. `mint` and `free` are serialized by the
// per-kind allocator mutex. Freed slots are reused oldest-first with a
// bumped generation; a slot whose generation is exhausted is retired.

use crate::config::HandleConfig;
use crate::error::BridgeError;
use crate::marshal::EntityRefs;
use crate::token::{Token, TokenKind};
use crate::value::Value;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};
use tether_core::ecs::EntityId;

const KINDS: [TokenKind; 4] = [
    TokenKind::Entity,
    TokenKind::ComponentType,
    TokenKind::Query,
    TokenKind::System,
];

#[derive(Default)]
struct Slot {
    generation: AtomicU16,
    native: AtomicU64,
    live: AtomicBool,
}

#[derive(Default)]
struct AllocState {
    free: VecDeque<u32>,
    next: u64,
    live: usize,
}

struct SlotTable {
    kind: TokenKind,
    capacity: u64,
    chunk_size: usize,
    chunks: RwLock<Vec<Box<[Slot]>>>,
    alloc: Mutex<AllocState>,
}

impl SlotTable {
    fn new(kind: TokenKind, capacity: u64, chunk_size: usize) -> Self {
        Self {
            kind,
            capacity,
            chunk_size: chunk_size.max(1),
            chunks: RwLock::new(Vec::new()),
            alloc: Mutex::new(AllocState::default()),
        }
    }

    fn alloc(&self) -> MutexGuard<'_, AllocState> {
        self.alloc.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` on a slot under the chunk read lock.
    fn with_slot<R>(&self, index: u32, f: impl FnOnce(&Slot) -> R) -> Option<R> {
        let chunks = self.chunks.read().unwrap_or_else(PoisonError::into_inner);
        let index = index as usize;
        chunks
            .get(index / self.chunk_size)
            .and_then(|chunk| chunk.get(index % self.chunk_size))
            .map(f)
    }

    fn grow_to(&self, index: u64) {
        let mut chunks = self.chunks.write().unwrap_or_else(PoisonError::into_inner);
        while (chunks.len() * self.chunk_size) as u64 <= index {
            let chunk: Box<[Slot]> = (0..self.chunk_size).map(|_| Slot::default()).collect();
            chunks.push(chunk);
        }
    }

    fn mint(&self, world: u16, native: u64) -> Result<Token, BridgeError> {
        let mut alloc = self.alloc();
        let index = match alloc.free.pop_front() {
            Some(index) => index,
            None => {
                if alloc.next >= self.capacity || alloc.next > u32::MAX as u64 {
                    return Err(BridgeError::CapacityExceeded {
                        kind: self.kind,
                        capacity: self.capacity,
                    });
                }
                let index = alloc.next;
                alloc.next += 1;
                self.grow_to(index);
                index as u32
            }
        };
        alloc.live += 1;

        let generation = self
            .with_slot(index, |slot| {
                slot.native.store(native, Ordering::Relaxed);
                slot.live.store(true, Ordering::Release);
                slot.generation.load(Ordering::Acquire)
            })
            .unwrap_or(0);
        Ok(Token::pack(self.kind, world, generation, index))
    }

    fn resolve(&self, token: Token) -> Option<u64> {
        self.with_slot(token.index(), |slot| {
            if !slot.live.load(Ordering::Acquire) {
                return None;
            }
            if slot.generation.load(Ordering::Acquire) != token.generation() {
                return None;
            }
            Some(slot.native.load(Ordering::Relaxed))
        })
        .flatten()
    }

    fn free(&self, token: Token) -> Option<u64> {
        let mut alloc = self.alloc();
        let released = self
            .with_slot(token.index(), |slot| {
                if !slot.live.load(Ordering::Acquire)
                    || slot.generation.load(Ordering::Acquire) != token.generation()
                {
                    return None;
                }
                slot.live.store(false, Ordering::Release);
                let generation = token.generation();
                let retired = generation == u16::MAX;
                if !retired {
                    slot.generation.store(generation + 1, Ordering::Release);
                }
                Some((slot.native.load(Ordering::Relaxed), retired))
            })
            .flatten()?;

        let (native, retired) = released;
        alloc.live -= 1;
        if retired {
            tracing::debug!(kind = ?self.kind, index = token.index(), "retiring exhausted slot");
        } else {
            alloc.free.push_back(token.index());
        }
        Some(native)
    }

    fn live_tokens(&self, world: u16) -> Vec<Token> {
        let chunks = self.chunks.read().unwrap_or_else(PoisonError::into_inner);
        let mut tokens = Vec::new();
        for (c, chunk) in chunks.iter().enumerate() {
            for (i, slot) in chunk.iter().enumerate() {
                if slot.live.load(Ordering::Acquire) {
                    let index = (c * self.chunk_size + i) as u32;
                    let generation = slot.generation.load(Ordering::Acquire);
                    tokens.push(Token::pack(self.kind, world, generation, index));
                }
            }
        }
        tokens
    }

    /// Free every live slot. Chunks and generations survive, so tokens minted
    /// before the reset never validate again.
    fn clear(&self) {
        let mut alloc = self.alloc();
        let chunks = self.chunks.read().unwrap_or_else(PoisonError::into_inner);
        for (c, chunk) in chunks.iter().enumerate() {
            for (i, slot) in chunk.iter().enumerate() {
                if !slot.live.swap(false, Ordering::AcqRel) {
                    continue;
                }
                let generation = slot.generation.load(Ordering::Acquire);
                if generation == u16::MAX {
                    continue;
                }
                slot.generation.store(generation + 1, Ordering::Release);
                alloc.free.push_back((c * self.chunk_size + i) as u32);
            }
        }
        alloc.live = 0;
    }
}

/// Token allocator for one world.
pub struct HandleRegistry {
    world: u16,
    tables: [SlotTable; 4],
    reverse: DashMap<u64, Token>,
}

impl HandleRegistry {
    pub fn new(world: u16, config: &HandleConfig) -> Self {
        let chunk = config.chunk_size;
        Self {
            world,
            tables: [
                SlotTable::new(TokenKind::Entity, config.entity_capacity, chunk),
                SlotTable::new(TokenKind::ComponentType, config.component_type_capacity, chunk),
                SlotTable::new(TokenKind::Query, config.query_capacity, chunk),
                SlotTable::new(TokenKind::System, config.system_capacity, chunk),
            ],
            reverse: DashMap::new(),
        }
    }

    pub fn world_id(&self) -> u16 {
        self.world
    }

    fn table(&self, kind: TokenKind) -> Option<&SlotTable> {
        KINDS
            .iter()
            .position(|&k| k == kind)
            .map(|i| &self.tables[i])
    }

    /// Mint a token for `native`. Entity tokens are also indexed by native id.
    pub fn mint(&self, kind: TokenKind, native: u64) -> Result<Token, BridgeError> {
        let table = self.table(kind).ok_or(BridgeError::WrongKind {
            token: Token::INVALID,
            expected: kind,
        })?;
        let token = table.mint(self.world, native)?;
        if kind == TokenKind::Entity {
            self.reverse.insert(native, token);
        }
        Ok(token)
    }

    /// Native id behind a live token of this world, or `None`.
    pub fn resolve(&self, token: Token) -> Option<u64> {
        if token.world_id() != self.world {
            return None;
        }
        self.table(token.kind())?.resolve(token)
    }

    /// Like `resolve`, but explains the failure.
    pub fn validate(&self, token: Token, kind: TokenKind) -> Result<u64, BridgeError> {
        if !token.is_valid() {
            return Err(BridgeError::InvalidToken { token });
        }
        if token.world_id() != self.world {
            return Err(BridgeError::CrossWorldMisuse {
                token,
                owner: token.world_id(),
                world: self.world,
            });
        }
        if token.kind() != kind {
            return Err(BridgeError::WrongKind { token, expected: kind });
        }
        self.resolve(token).ok_or(BridgeError::InvalidToken { token })
    }

    /// Invalidate `token`. Returns `false` if it was already free or stale.
    pub fn free(&self, token: Token) -> bool {
        if token.world_id() != self.world {
            return false;
        }
        let Some(table) = self.table(token.kind()) else {
            return false;
        };
        match table.free(token) {
            Some(native) => {
                if token.kind() == TokenKind::Entity {
                    self.reverse.remove_if(&native, |_, mapped| *mapped == token);
                }
                true
            }
            None => false,
        }
    }

    /// Existing live entity token for `native`, if any.
    pub fn token_for_native(&self, native: u64) -> Option<Token> {
        let token = *self.reverse.get(&native)?;
        (self.resolve(token) == Some(native)).then_some(token)
    }

    /// Entity token for `native`, minting one if there is none. A stale
    /// reverse entry is treated as a miss.
    pub fn get_or_create_token_for_native(&self, native: u64) -> Result<Token, BridgeError> {
        match self.token_for_native(native) {
            Some(token) => Ok(token),
            None => self.mint(TokenKind::Entity, native),
        }
    }

    pub fn live_count(&self, kind: TokenKind) -> usize {
        self.table(kind).map_or(0, |table| table.alloc().live)
    }

    pub fn tokens_of_kind(&self, kind: TokenKind) -> Vec<Token> {
        self.table(kind)
            .map(|table| table.live_tokens(self.world))
            .unwrap_or_default()
    }

    /// Drop every slot. Outstanding tokens stop resolving.
    pub fn clear(&self) {
        for table in &self.tables {
            table.clear();
        }
        self.reverse.clear();
    }
}

impl EntityRefs for HandleRegistry {
    fn encode(&self, entity: EntityId) -> Value {
        match self.get_or_create_token_for_native(entity.to_bits()) {
            Ok(token) => token.to_value(),
            Err(err) => {
                tracing::warn!(%entity, %err, "cannot mint token for referenced entity");
                Value::Nil
            }
        }
    }

    fn decode(&self, value: &Value) -> Option<EntityId> {
        let token = Token::from_value(value)?;
        if token.kind() != TokenKind::Entity {
            return None;
        }
        self.resolve(token).map(EntityId::from_bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> HandleRegistry {
        HandleRegistry::new(
            3,
            &HandleConfig {
                chunk_size: 4,
                ..HandleConfig::default()
            },
        )
    }

    #[test]
    fn test_mint_resolve_free() {
        let handles = registry();
        let token = handles.mint(TokenKind::Query, 77).unwrap();
        assert_eq!(token.kind(), TokenKind::Query);
        assert_eq!(token.world_id(), 3);
        assert_eq!(handles.resolve(token), Some(77));
        assert_eq!(handles.live_count(TokenKind::Query), 1);

        assert!(handles.free(token));
        assert_eq!(handles.resolve(token), None);
        assert!(!handles.free(token));
        assert_eq!(handles.live_count(TokenKind::Query), 0);
    }

    #[test]
    fn test_reuse_bumps_generation() {
        let handles = registry();
        let first = handles.mint(TokenKind::System, 1).unwrap();
        handles.free(first);
        let second = handles.mint(TokenKind::System, 2).unwrap();
        assert_eq!(first.index(), second.index());
        assert_ne!(first, second);
        assert_eq!(handles.resolve(first), None);
        assert_eq!(handles.resolve(second), Some(2));
    }

    #[test]
    fn test_chunks_grow_without_invalidating() {
        let handles = registry();
        let tokens: Vec<Token> = (0..10)
            .map(|i| handles.mint(TokenKind::Entity, i).unwrap())
            .collect();
        for (i, token) in tokens.iter().enumerate() {
            assert_eq!(handles.resolve(*token), Some(i as u64));
        }
        assert_eq!(handles.tokens_of_kind(TokenKind::Entity), tokens);
    }

    #[test]
    fn test_validate_reports_cause() {
        let handles = registry();
        let other = HandleRegistry::new(4, &HandleConfig::default());
        let foreign = other.mint(TokenKind::Entity, 1).unwrap();
        let query = handles.mint(TokenKind::Query, 1).unwrap();

        assert!(matches!(
            handles.validate(foreign, TokenKind::Entity),
            Err(BridgeError::CrossWorldMisuse { owner: 4, world: 3, .. })
        ));
        assert!(matches!(
            handles.validate(query, TokenKind::Entity),
            Err(BridgeError::WrongKind { .. })
        ));
        assert!(matches!(
            handles.validate(Token::INVALID, TokenKind::Entity),
            Err(BridgeError::InvalidToken { .. })
        ));
        assert_eq!(handles.validate(query, TokenKind::Query), Ok(1));
    }

    #[test]
    fn test_capacity() {
        let handles = HandleRegistry::new(
            1,
            &HandleConfig {
                query_capacity: 2,
                ..HandleConfig::default()
            },
        );
        let a = handles.mint(TokenKind::Query, 0).unwrap();
        handles.mint(TokenKind::Query, 1).unwrap();
        assert!(matches!(
            handles.mint(TokenKind::Query, 2),
            Err(BridgeError::CapacityExceeded { capacity: 2, .. })
        ));
        handles.free(a);
        assert!(handles.mint(TokenKind::Query, 2).is_ok());
    }

    #[test]
    fn test_reverse_index() {
        let handles = registry();
        let token = handles.get_or_create_token_for_native(500).unwrap();
        assert_eq!(handles.get_or_create_token_for_native(500).unwrap(), token);

        handles.free(token);
        assert_eq!(handles.token_for_native(500), None);
        let fresh = handles.get_or_create_token_for_native(500).unwrap();
        assert_ne!(fresh, token);
        assert_eq!(handles.resolve(fresh), Some(500));
    }

    #[test]
    fn test_exhausted_slot_is_retired() {
        let handles = registry();
        let table = handles.table(TokenKind::Entity).unwrap();
        let token = handles.mint(TokenKind::Entity, 9).unwrap();
        table.with_slot(token.index(), |slot| slot.generation.store(u16::MAX, Ordering::Release));
        let last = Token::pack(TokenKind::Entity, 3, u16::MAX, token.index());
        assert!(handles.free(last));

        let next = handles.mint(TokenKind::Entity, 10).unwrap();
        assert_ne!(next.index(), token.index());
    }

    #[test]
    fn test_clear() {
        let handles = registry();
        let token = handles.mint(TokenKind::Entity, 1).unwrap();
        handles.clear();
        assert_eq!(handles.resolve(token), None);
        assert_eq!(handles.live_count(TokenKind::Entity), 0);
    }

    #[test]
    fn test_tokens_stay_dead_after_clear_and_remint() {
        let handles = registry();
        let old: Vec<Token> = (0..8).map(|n| handles.mint(TokenKind::Entity, n).unwrap()).collect();
        handles.free(old[3]);
        handles.clear();

        let fresh: Vec<Token> = (0..8).map(|n| handles.mint(TokenKind::Entity, n).unwrap()).collect();
        for token in &old {
            assert_eq!(handles.resolve(*token), None);
        }
        for (n, token) in fresh.iter().enumerate() {
            assert_eq!(handles.resolve(*token), Some(n as u64));
            assert!(!old.contains(token));
        }
    }
}
