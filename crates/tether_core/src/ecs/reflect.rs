// reflect.rs - Structural type descriptors for component memory
//
// A descriptor tells a cursor how to interpret a component's raw bytes:
// a primitive leaf, an opaque named leaf (interpreted by whoever knows
// the name), or a struct of named members at fixed offsets.

use std::sync::Arc;

/// Primitive leaf kinds understood by the cursor accessors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    /// Handle into the owning world's `StringPool` (stored as `u32`).
    String,
    /// Packed `EntityId` bits (stored as `u64`).
    Entity,
}

impl PrimitiveKind {
    pub const fn size(self) -> usize {
        match self {
            PrimitiveKind::Bool | PrimitiveKind::I8 | PrimitiveKind::U8 => 1,
            PrimitiveKind::I16 | PrimitiveKind::U16 => 2,
            PrimitiveKind::I32 | PrimitiveKind::U32 | PrimitiveKind::F32 => 4,
            PrimitiveKind::String => 4,
            PrimitiveKind::I64 | PrimitiveKind::U64 | PrimitiveKind::F64 => 8,
            PrimitiveKind::Entity => 8,
        }
    }

    pub const fn align(self) -> usize {
        self.size()
    }

    pub const fn name(self) -> &'static str {
        match self {
            PrimitiveKind::Bool => "bool",
            PrimitiveKind::I8 => "i8",
            PrimitiveKind::I16 => "i16",
            PrimitiveKind::I32 => "i32",
            PrimitiveKind::I64 => "i64",
            PrimitiveKind::U8 => "u8",
            PrimitiveKind::U16 => "u16",
            PrimitiveKind::U32 => "u32",
            PrimitiveKind::U64 => "u64",
            PrimitiveKind::F32 => "f32",
            PrimitiveKind::F64 => "f64",
            PrimitiveKind::String => "string",
            PrimitiveKind::Entity => "entity",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "bool" => PrimitiveKind::Bool,
            "i8" => PrimitiveKind::I8,
            "i16" => PrimitiveKind::I16,
            "i32" => PrimitiveKind::I32,
            "i64" => PrimitiveKind::I64,
            "u8" => PrimitiveKind::U8,
            "u16" => PrimitiveKind::U16,
            "u32" => PrimitiveKind::U32,
            "u64" => PrimitiveKind::U64,
            "f32" => PrimitiveKind::F32,
            "f64" => PrimitiveKind::F64,
            "string" => PrimitiveKind::String,
            "entity" => PrimitiveKind::Entity,
            _ => return None,
        })
    }

    pub const fn is_signed(self) -> bool {
        matches!(
            self,
            PrimitiveKind::I8 | PrimitiveKind::I16 | PrimitiveKind::I32 | PrimitiveKind::I64
        )
    }

    pub const fn is_unsigned(self) -> bool {
        matches!(
            self,
            PrimitiveKind::U8 | PrimitiveKind::U16 | PrimitiveKind::U32 | PrimitiveKind::U64
        )
    }

    pub const fn is_float(self) -> bool {
        matches!(self, PrimitiveKind::F32 | PrimitiveKind::F64)
    }
}

/// A named (or anonymous) struct member at a fixed byte offset.
#[derive(Clone, Debug, PartialEq)]
pub struct Member {
    pub name: Option<String>,
    pub offset: usize,
    pub ty: Arc<TypeDescriptor>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TypeKind {
    Primitive(PrimitiveKind),
    /// Interpreted by name; the engine only knows its size.
    Opaque,
    Struct(Vec<Member>),
}

/// Layout description of a component or member type.
#[derive(Clone, Debug, PartialEq)]
pub struct TypeDescriptor {
    pub name: String,
    pub size: usize,
    pub align: usize,
    pub kind: TypeKind,
}

impl TypeDescriptor {
    pub fn primitive(kind: PrimitiveKind) -> Self {
        Self {
            name: kind.name().to_string(),
            size: kind.size(),
            align: kind.align(),
            kind: TypeKind::Primitive(kind),
        }
    }

    pub fn opaque(name: impl Into<String>, size: usize, align: usize) -> Self {
        Self {
            name: name.into(),
            size,
            align,
            kind: TypeKind::Opaque,
        }
    }

    /// Start describing a C-layout struct; member offsets are computed in
    /// declaration order with natural alignment.
    pub fn structure(name: impl Into<String>) -> StructBuilder {
        StructBuilder::new(name)
    }

    pub fn is_struct(&self) -> bool {
        matches!(self.kind, TypeKind::Struct(_))
    }

    pub fn members(&self) -> &[Member] {
        match &self.kind {
            TypeKind::Struct(members) => members,
            _ => &[],
        }
    }
}

/// Builder computing `repr(C)` offsets for struct descriptors.
pub struct StructBuilder {
    name: String,
    members: Vec<Member>,
    cursor: usize,
    align: usize,
}

impl StructBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: Vec::new(),
            cursor: 0,
            align: 1,
        }
    }

    /// Append a named member.
    pub fn member(self, name: impl Into<String>, ty: Arc<TypeDescriptor>) -> Self {
        self.push(Some(name.into()), ty)
    }

    /// Append an anonymous member (padding-like; skipped by walkers).
    pub fn unnamed(self, ty: Arc<TypeDescriptor>) -> Self {
        self.push(None, ty)
    }

    /// Append a member at an explicit offset (layouts declared elsewhere).
    pub fn member_at(mut self, name: impl Into<String>, offset: usize, ty: Arc<TypeDescriptor>) -> Self {
        self.align = self.align.max(ty.align.max(1));
        self.cursor = self.cursor.max(offset + ty.size);
        self.members.push(Member {
            name: Some(name.into()),
            offset,
            ty,
        });
        self
    }

    fn push(mut self, name: Option<String>, ty: Arc<TypeDescriptor>) -> Self {
        let align = ty.align.max(1);
        let offset = align_up(self.cursor, align);
        self.cursor = offset + ty.size;
        self.align = self.align.max(align);
        self.members.push(Member { name, offset, ty });
        self
    }

    pub fn build(self) -> TypeDescriptor {
        TypeDescriptor {
            name: self.name,
            size: align_up(self.cursor, self.align),
            align: self.align,
            kind: TypeKind::Struct(self.members),
        }
    }
}

#[inline]
fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) / align * align
}
