// cursor.rs - Reflective read/write position inside component bytes
//
// A cursor starts positioned on the root value. `push` enters a struct
// scope (selecting its first member), `member`/`next` move between members
// of the current scope and `pop` returns to the enclosing value. Typed
// accessors convert through 64-bit intermediates so narrow fields never
// truncate on read.

use crate::ecs::{PrimitiveKind, TypeDescriptor, TypeKind};
use bytemuck::Pod;
use std::ops::Range;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CursorError {
    #[error("type '{name}' is not a struct")]
    NotAStruct { name: String },

    #[error("type '{ty}' has no member '{member}'")]
    NoSuchMember { ty: String, member: String },

    #[error("member index {index} out of range for type '{ty}' ({count} members)")]
    MemberIndexOutOfRange { ty: String, index: usize, count: usize },

    #[error("value at offset {offset} with size {size} exceeds buffer of {len} bytes")]
    OutOfBounds { offset: usize, size: usize, len: usize },

    #[error("cannot access '{name}' as {expected}")]
    TypeMismatch { name: String, expected: &'static str },

    #[error("pop without matching push")]
    ScopeUnderflow,
}

struct Scope {
    ty: Arc<TypeDescriptor>,
    base: usize,
    selected: Option<usize>,
}

/// Cursor over a component's raw bytes.
///
/// `Cursor<&[u8]>` reads, `Cursor<&mut [u8]>` (or `Cursor<Vec<u8>>`) also writes.
pub struct Cursor<B> {
    bytes: B,
    stack: Vec<Scope>,
}

impl<B: AsRef<[u8]>> Cursor<B> {
    pub fn new(ty: Arc<TypeDescriptor>, bytes: B) -> Self {
        Self {
            bytes,
            stack: vec![Scope {
                ty,
                base: 0,
                selected: None,
            }],
        }
    }

    /// Release the underlying buffer.
    pub fn into_inner(self) -> B {
        self.bytes
    }

    /// Number of pushed scopes (0 at the root).
    pub fn depth(&self) -> usize {
        self.stack.len() - 1
    }

    fn top(&self) -> &Scope {
        // The root scope is never popped.
        &self.stack[self.stack.len() - 1]
    }

    fn top_mut(&mut self) -> &mut Scope {
        let last = self.stack.len() - 1;
        &mut self.stack[last]
    }

    fn current(&self) -> (&Arc<TypeDescriptor>, usize) {
        let top = self.top();
        match top.selected {
            Some(index) => match top.ty.members().get(index) {
                Some(member) => (&member.ty, top.base + member.offset),
                None => (&top.ty, top.base),
            },
            None => (&top.ty, top.base),
        }
    }

    /// Type of the value under the cursor.
    pub fn ty(&self) -> &TypeDescriptor {
        self.current().0
    }

    pub fn ty_arc(&self) -> Arc<TypeDescriptor> {
        Arc::clone(self.current().0)
    }

    /// Byte offset of the value under the cursor.
    pub fn offset(&self) -> usize {
        self.current().1
    }

    fn span(&self) -> Result<Range<usize>, CursorError> {
        let (ty, offset) = self.current();
        let len = self.bytes.as_ref().len();
        let end = offset.checked_add(ty.size).unwrap_or(usize::MAX);
        if end > len {
            return Err(CursorError::OutOfBounds {
                offset,
                size: ty.size,
                len,
            });
        }
        Ok(offset..end)
    }

    /// Enter the struct under the cursor, selecting its first member.
    pub fn push(&mut self) -> Result<(), CursorError> {
        let (ty, base) = self.current();
        if !ty.is_struct() {
            return Err(CursorError::NotAStruct {
                name: ty.name.clone(),
            });
        }
        let ty = Arc::clone(ty);
        let selected = if ty.members().is_empty() { None } else { Some(0) };
        self.stack.push(Scope { ty, base, selected });
        Ok(())
    }

    /// Leave the current struct scope.
    pub fn pop(&mut self) -> Result<(), CursorError> {
        if self.stack.len() <= 1 {
            return Err(CursorError::ScopeUnderflow);
        }
        self.stack.pop();
        Ok(())
    }

    /// Members of the current scope.
    pub fn member_count(&self) -> usize {
        if self.stack.len() <= 1 {
            return 0;
        }
        self.top().ty.members().len()
    }

    /// Select a member of the current scope by name.
    pub fn member(&mut self, name: &str) -> Result<(), CursorError> {
        let top = self.top();
        let found = top
            .ty
            .members()
            .iter()
            .position(|m| m.name.as_deref() == Some(name));
        match found {
            Some(index) if self.stack.len() > 1 => {
                self.top_mut().selected = Some(index);
                Ok(())
            }
            _ => Err(CursorError::NoSuchMember {
                ty: top.ty.name.clone(),
                member: name.to_string(),
            }),
        }
    }

    /// Select a member of the current scope by declaration index.
    pub fn select(&mut self, index: usize) -> Result<(), CursorError> {
        let count = self.member_count();
        if index >= count {
            return Err(CursorError::MemberIndexOutOfRange {
                ty: self.top().ty.name.clone(),
                index,
                count,
            });
        }
        self.top_mut().selected = Some(index);
        Ok(())
    }

    /// Advance to the next member; returns `false` past the last one.
    pub fn next(&mut self) -> bool {
        let count = self.member_count();
        let top = self.top_mut();
        let next = top.selected.map_or(0, |i| i + 1);
        if next < count {
            top.selected = Some(next);
            true
        } else {
            false
        }
    }

    /// Name of the selected member in the current scope.
    pub fn member_name(&self) -> Option<&str> {
        if self.stack.len() <= 1 {
            return None;
        }
        let top = self.top();
        top.selected
            .and_then(|i| top.ty.members().get(i))
            .and_then(|m| m.name.as_deref())
    }

    fn primitive(&self, expected: &'static str) -> Result<PrimitiveKind, CursorError> {
        match self.ty().kind {
            TypeKind::Primitive(kind) => Ok(kind),
            _ => Err(CursorError::TypeMismatch {
                name: self.ty().name.clone(),
                expected,
            }),
        }
    }

    fn read<T: Pod>(&self) -> Result<T, CursorError> {
        let span = self.span()?;
        let bytes = &self.bytes.as_ref()[span.clone()];
        if bytes.len() < std::mem::size_of::<T>() {
            return Err(CursorError::OutOfBounds {
                offset: span.start,
                size: std::mem::size_of::<T>(),
                len: self.bytes.as_ref().len(),
            });
        }
        Ok(bytemuck::pod_read_unaligned(&bytes[..std::mem::size_of::<T>()]))
    }

    /// Raw bytes of the value under the cursor.
    pub fn raw(&self) -> Result<&[u8], CursorError> {
        let span = self.span()?;
        Ok(&self.bytes.as_ref()[span])
    }

    pub fn get_bool(&self) -> Result<bool, CursorError> {
        match self.primitive("bool")? {
            PrimitiveKind::Bool => Ok(self.read::<u8>()? != 0),
            _ => Ok(self.get_int()? != 0),
        }
    }

    /// Read any numeric primitive as a signed 64-bit integer.
    pub fn get_int(&self) -> Result<i64, CursorError> {
        Ok(match self.primitive("int")? {
            PrimitiveKind::Bool => self.read::<u8>()? as i64,
            PrimitiveKind::I8 => self.read::<i8>()? as i64,
            PrimitiveKind::I16 => self.read::<i16>()? as i64,
            PrimitiveKind::I32 => self.read::<i32>()? as i64,
            PrimitiveKind::I64 => self.read::<i64>()?,
            PrimitiveKind::U8 => self.read::<u8>()? as i64,
            PrimitiveKind::U16 => self.read::<u16>()? as i64,
            PrimitiveKind::U32 => self.read::<u32>()? as i64,
            PrimitiveKind::U64 => self.read::<u64>()? as i64,
            PrimitiveKind::F32 => self.read::<f32>()? as i64,
            PrimitiveKind::F64 => self.read::<f64>()? as i64,
            PrimitiveKind::String => self.read::<u32>()? as i64,
            PrimitiveKind::Entity => self.read::<u64>()? as i64,
        })
    }

    /// Read any numeric primitive as an unsigned 64-bit integer.
    pub fn get_uint(&self) -> Result<u64, CursorError> {
        Ok(match self.primitive("uint")? {
            PrimitiveKind::U8 => self.read::<u8>()? as u64,
            PrimitiveKind::U16 => self.read::<u16>()? as u64,
            PrimitiveKind::U32 => self.read::<u32>()? as u64,
            PrimitiveKind::U64 | PrimitiveKind::Entity => self.read::<u64>()?,
            PrimitiveKind::String => self.read::<u32>()? as u64,
            _ => self.get_int()? as u64,
        })
    }

    /// Read any numeric primitive promoted to `f64`.
    pub fn get_float(&self) -> Result<f64, CursorError> {
        Ok(match self.primitive("float")? {
            PrimitiveKind::F32 => self.read::<f32>()? as f64,
            PrimitiveKind::F64 => self.read::<f64>()?,
            kind if kind.is_unsigned() => self.get_uint()? as f64,
            _ => self.get_int()? as f64,
        })
    }

    /// String pool handle stored in a `string` field.
    pub fn get_string_id(&self) -> Result<u32, CursorError> {
        match self.primitive("string")? {
            PrimitiveKind::String => self.read::<u32>(),
            _ => Err(CursorError::TypeMismatch {
                name: self.ty().name.clone(),
                expected: "string",
            }),
        }
    }

    /// Packed entity bits stored in an `entity` field.
    pub fn get_entity(&self) -> Result<u64, CursorError> {
        match self.primitive("entity")? {
            PrimitiveKind::Entity => self.read::<u64>(),
            _ => Err(CursorError::TypeMismatch {
                name: self.ty().name.clone(),
                expected: "entity",
            }),
        }
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> Cursor<B> {
    fn write<T: Pod>(&mut self, value: T) -> Result<(), CursorError> {
        let span = self.span()?;
        let size = std::mem::size_of::<T>();
        let len = self.bytes.as_ref().len();
        if span.len() < size {
            return Err(CursorError::OutOfBounds {
                offset: span.start,
                size,
                len,
            });
        }
        self.bytes.as_mut()[span.start..span.start + size].copy_from_slice(bytemuck::bytes_of(&value));
        Ok(())
    }

    /// Mutable raw bytes of the value under the cursor.
    pub fn raw_mut(&mut self) -> Result<&mut [u8], CursorError> {
        let span = self.span()?;
        Ok(&mut self.bytes.as_mut()[span])
    }

    pub fn set_bool(&mut self, value: bool) -> Result<(), CursorError> {
        match self.primitive("bool")? {
            PrimitiveKind::Bool => self.write::<u8>(value as u8),
            _ => self.set_int(value as i64),
        }
    }

    /// Write a signed integer, narrowing explicitly to the field width.
    pub fn set_int(&mut self, value: i64) -> Result<(), CursorError> {
        match self.primitive("int")? {
            PrimitiveKind::Bool => self.write::<u8>((value != 0) as u8),
            PrimitiveKind::I8 => self.write::<i8>(value as i8),
            PrimitiveKind::I16 => self.write::<i16>(value as i16),
            PrimitiveKind::I32 => self.write::<i32>(value as i32),
            PrimitiveKind::I64 => self.write::<i64>(value),
            PrimitiveKind::U8 => self.write::<u8>(value as u8),
            PrimitiveKind::U16 => self.write::<u16>(value as u16),
            PrimitiveKind::U32 => self.write::<u32>(value as u32),
            PrimitiveKind::U64 => self.write::<u64>(value as u64),
            PrimitiveKind::F32 => self.write::<f32>(value as f32),
            PrimitiveKind::F64 => self.write::<f64>(value as f64),
            PrimitiveKind::String => self.write::<u32>(value as u32),
            PrimitiveKind::Entity => self.write::<u64>(value as u64),
        }
    }

    /// Write an unsigned integer, narrowing explicitly to the field width.
    pub fn set_uint(&mut self, value: u64) -> Result<(), CursorError> {
        match self.primitive("uint")? {
            PrimitiveKind::U64 | PrimitiveKind::Entity => self.write::<u64>(value),
            PrimitiveKind::F32 => self.write::<f32>(value as f32),
            PrimitiveKind::F64 => self.write::<f64>(value as f64),
            _ => self.set_int(value as i64),
        }
    }

    /// Write a float, narrowing explicitly for `f32` and integer fields.
    pub fn set_float(&mut self, value: f64) -> Result<(), CursorError> {
        match self.primitive("float")? {
            PrimitiveKind::F32 => self.write::<f32>(value as f32),
            PrimitiveKind::F64 => self.write::<f64>(value),
            kind if kind.is_unsigned() => self.set_uint(value as u64),
            _ => self.set_int(value as i64),
        }
    }

    pub fn set_string_id(&mut self, id: u32) -> Result<(), CursorError> {
        match self.primitive("string")? {
            PrimitiveKind::String => self.write::<u32>(id),
            _ => Err(CursorError::TypeMismatch {
                name: self.ty().name.clone(),
                expected: "string",
            }),
        }
    }

    pub fn set_entity(&mut self, bits: u64) -> Result<(), CursorError> {
        match self.primitive("entity")? {
            PrimitiveKind::Entity => self.write::<u64>(bits),
            _ => Err(CursorError::TypeMismatch {
                name: self.ty().name.clone(),
                expected: "entity",
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prim(kind: PrimitiveKind) -> Arc<TypeDescriptor> {
        Arc::new(TypeDescriptor::primitive(kind))
    }

    fn health() -> Arc<TypeDescriptor> {
        Arc::new(
            TypeDescriptor::structure("Health")
                .member("current", prim(PrimitiveKind::I16))
                .member("max", prim(PrimitiveKind::U32))
                .member("regen", prim(PrimitiveKind::F32))
                .build(),
        )
    }

    #[test]
    fn walks_members_in_declared_order() {
        let ty = health();
        let mut bytes = vec![0u8; ty.size];
        {
            let mut cursor = Cursor::new(Arc::clone(&ty), bytes.as_mut_slice());
            cursor.push().unwrap();
            cursor.set_int(-5).unwrap();
            assert!(cursor.next());
            cursor.set_uint(4_000_000_000).unwrap();
            assert!(cursor.next());
            cursor.set_float(0.25).unwrap();
            assert!(!cursor.next());
            cursor.pop().unwrap();
        }

        let mut cursor = Cursor::new(ty, bytes.as_slice());
        cursor.push().unwrap();
        assert_eq!(cursor.member_name(), Some("current"));
        assert_eq!(cursor.get_int().unwrap(), -5);
        cursor.member("max").unwrap();
        assert_eq!(cursor.get_uint().unwrap(), 4_000_000_000);
        assert_eq!(cursor.get_int().unwrap(), 4_000_000_000);
        cursor.member("regen").unwrap();
        assert_eq!(cursor.get_float().unwrap(), 0.25);
    }

    #[test]
    fn rejects_unknown_member_and_underflow() {
        let mut cursor = Cursor::new(health(), vec![0u8; 12]);
        assert_eq!(cursor.pop(), Err(CursorError::ScopeUnderflow));
        cursor.push().unwrap();
        assert!(matches!(
            cursor.member("missing"),
            Err(CursorError::NoSuchMember { .. })
        ));
    }

    #[test]
    fn out_of_bounds_is_an_error_not_a_panic() {
        let cursor = Cursor::new(prim(PrimitiveKind::U64), vec![0u8; 4]);
        assert!(matches!(
            cursor.get_uint(),
            Err(CursorError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn push_on_leaf_fails() {
        let mut cursor = Cursor::new(prim(PrimitiveKind::I32), vec![0u8; 4]);
        assert!(matches!(cursor.push(), Err(CursorError::NotAStruct { .. })));
    }
}
