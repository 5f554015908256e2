//! The pooled, SIMD-aligned audio buffer type shared between tasks within a
//! chunk, and the "constant" broadcast convention used throughout the
//! engine.

use crate::aligned::AlignedSamples;
use crate::primitive::BufferPrimitive;

/// Fixed-size, SIMD-aligned storage for one task's worth of real or bool
/// samples, plus the constant-broadcast flag.
///
/// When `constant` is set, only element 0 is meaningful and the buffer
/// logically represents that single value repeated across every frame. The
/// flag is a per-buffer tag, not a distinct type: every consumer of a buffer
/// must be prepared to see either shape (REDESIGN FLAGS, "constant flag as
/// runtime polymorphism").
#[derive(Debug)]
pub enum Buffer {
    Real(RealBuffer),
    Bool(BoolBuffer),
}

#[derive(Debug)]
pub struct RealBuffer {
    data: AlignedSamples,
    constant: bool,
}

#[derive(Debug)]
pub struct BoolBuffer {
    data: Vec<bool>,
    constant: bool,
}

impl Buffer {
    pub fn new_real(max_buffer_size: usize) -> Self {
        Buffer::Real(RealBuffer {
            data: AlignedSamples::zeroed(max_buffer_size),
            constant: false,
        })
    }

    pub fn new_bool(max_buffer_size: usize) -> Self {
        Buffer::Bool(BoolBuffer {
            data: vec![false; max_buffer_size],
            constant: false,
        })
    }

    pub fn new(primitive: BufferPrimitive, max_buffer_size: usize) -> Self {
        match primitive {
            BufferPrimitive::Real => Buffer::new_real(max_buffer_size),
            BufferPrimitive::Bool => Buffer::new_bool(max_buffer_size),
        }
    }

    pub fn primitive(&self) -> BufferPrimitive {
        match self {
            Buffer::Real(_) => BufferPrimitive::Real,
            Buffer::Bool(_) => BufferPrimitive::Bool,
        }
    }

    pub fn is_constant(&self) -> bool {
        match self {
            Buffer::Real(b) => b.constant,
            Buffer::Bool(b) => b.constant,
        }
    }

    pub fn as_real(&self) -> &RealBuffer {
        match self {
            Buffer::Real(b) => b,
            Buffer::Bool(_) => panic!("buffer is not a real buffer"),
        }
    }

    pub fn as_real_mut(&mut self) -> &mut RealBuffer {
        match self {
            Buffer::Real(b) => b,
            Buffer::Bool(_) => panic!("buffer is not a real buffer"),
        }
    }

    pub fn as_bool(&self) -> &BoolBuffer {
        match self {
            Buffer::Bool(b) => b,
            Buffer::Real(_) => panic!("buffer is not a bool buffer"),
        }
    }

    pub fn as_bool_mut(&mut self) -> &mut BoolBuffer {
        match self {
            Buffer::Bool(b) => b,
            Buffer::Real(_) => panic!("buffer is not a bool buffer"),
        }
    }
}

impl RealBuffer {
    pub fn is_constant(&self) -> bool {
        self.constant
    }

    pub fn set_constant_flag(&mut self, constant: bool) {
        self.constant = constant;
    }

    /// The constant value, valid only when [`is_constant`](Self::is_constant) is true.
    pub fn constant_value(&self) -> f32 {
        self.data.as_slice()[0]
    }

    pub fn set_constant_value(&mut self, value: f32) {
        self.data.as_mut_slice()[0] = value;
        self.constant = true;
    }

    /// Read the sample at `frame`, honoring the constant-broadcast flag.
    pub fn sample(&self, frame: usize) -> f32 {
        if self.constant {
            self.data.as_slice()[0]
        } else {
            self.data.as_slice()[frame]
        }
    }

    /// Raw backing storage. Only meaningful up to `frames` when not constant.
    pub fn raw(&self) -> &[f32] {
        self.data.as_slice()
    }

    pub fn raw_mut(&mut self) -> &mut [f32] {
        self.constant = false;
        self.data.as_mut_slice()
    }

    /// Flush non-finite samples to zero across the first `frames` samples,
    /// per the engine's `sanitize_inf_nan` policy applied at stage outputs.
    pub fn sanitize_inf_nan(&mut self, frames: usize) {
        let n = if self.constant { 1 } else { frames };
        for s in &mut self.data.as_mut_slice()[0..n] {
            if !s.is_finite() {
                *s = 0.0;
            }
        }
    }
}

impl BoolBuffer {
    pub fn is_constant(&self) -> bool {
        self.constant
    }

    pub fn set_constant_flag(&mut self, constant: bool) {
        self.constant = constant;
    }

    pub fn constant_value(&self) -> bool {
        self.data[0]
    }

    pub fn set_constant_value(&mut self, value: bool) {
        self.data[0] = value;
        self.constant = true;
    }

    pub fn sample(&self, frame: usize) -> bool {
        if self.constant {
            self.data[0]
        } else {
            self.data[frame]
        }
    }

    pub fn raw_mut(&mut self) -> &mut [bool] {
        self.constant = false;
        &mut self.data
    }
}
