/// The primitive types a task argument or buffer can carry.
///
/// `String` only ever appears as a compile-time constant; no buffer is ever
/// typed `String` because string data cannot flow through the per-chunk
/// buffer pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    Real,
    Bool,
    String,
}

/// The two primitive types that back an actual pooled buffer. `String`
/// constants never need a pool slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferPrimitive {
    Real,
    Bool,
}

impl BufferPrimitive {
    pub const ALL: [BufferPrimitive; 2] = [BufferPrimitive::Real, BufferPrimitive::Bool];
}

impl From<BufferPrimitive> for PrimitiveType {
    fn from(value: BufferPrimitive) -> Self {
        match value {
            BufferPrimitive::Real => PrimitiveType::Real,
            BufferPrimitive::Bool => PrimitiveType::Bool,
        }
    }
}
