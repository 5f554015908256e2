use std::sync::Arc;

use crate::primitive::BufferPrimitive;
use crate::value::Value;

/// Index of a task within a single task graph's task list.
pub type TaskIndex = u32;

/// Index of a dynamic buffer within a single task graph's buffer list.
pub type BufferIndex = u32;

/// Index into the task-function registry, resolved by the front end.
pub type TaskFunctionIndex = u32;

/// A real-valued task input: either a compile-time constant or a reference
/// to one of the graph's dynamic buffers.
#[derive(Debug, Clone, Copy)]
pub enum RealInput {
    Constant(f32),
    Buffer(BufferIndex),
}

/// A bool-valued task input, same shape as [`RealInput`].
#[derive(Debug, Clone, Copy)]
pub enum BoolInput {
    Constant(bool),
    Buffer(BufferIndex),
}

/// A single task argument. Arrays are always sequences of
/// constant-or-buffer elements; strings are always compile-time constants
/// since no buffer is ever string-typed.
#[derive(Debug, Clone)]
pub enum TaskArgument {
    RealIn(RealInput),
    BoolIn(BoolInput),
    StringIn(Arc<str>),
    RealArrayIn(Vec<RealInput>),
    BoolArrayIn(Vec<BoolInput>),
    StringArrayIn(Vec<Arc<str>>),
    RealOut(BufferIndex),
    RealInout(BufferIndex),
}

impl TaskArgument {
    /// The buffer primitive of an `out`/`inout` argument's target buffer.
    pub fn output_primitive(&self) -> Option<BufferPrimitive> {
        match self {
            TaskArgument::RealOut(_) | TaskArgument::RealInout(_) => Some(BufferPrimitive::Real),
            _ => None,
        }
    }

    pub fn output_buffer_index(&self) -> Option<BufferIndex> {
        match self {
            TaskArgument::RealOut(i) | TaskArgument::RealInout(i) => Some(*i),
            _ => None,
        }
    }

    pub fn is_inout(&self) -> bool {
        matches!(self, TaskArgument::RealInout(_))
    }

    /// Visit every dynamic buffer this argument *consumes* (`in`/`inout`,
    /// including array elements), but not the buffer an `out`/`inout`
    /// argument produces into.
    pub fn for_each_consumed_buffer(&self, mut f: impl FnMut(BufferIndex)) {
        match self {
            TaskArgument::RealIn(RealInput::Buffer(b)) => f(*b),
            TaskArgument::BoolIn(BoolInput::Buffer(b)) => f(*b),
            TaskArgument::RealArrayIn(items) => {
                for item in items {
                    if let RealInput::Buffer(b) = item {
                        f(*b);
                    }
                }
            }
            TaskArgument::BoolArrayIn(items) => {
                for item in items {
                    if let BoolInput::Buffer(b) = item {
                        f(*b);
                    }
                }
            }
            TaskArgument::RealInout(b) => f(*b),
            TaskArgument::RealOut(_)
            | TaskArgument::RealIn(RealInput::Constant(_))
            | TaskArgument::BoolIn(BoolInput::Constant(_))
            | TaskArgument::StringIn(_)
            | TaskArgument::StringArrayIn(_) => {}
        }
    }
}

/// A node in the task graph: a task-function index plus typed arguments and
/// the precomputed dependency edges the executor needs at run time.
#[derive(Debug, Clone)]
pub struct Task {
    pub task_function_index: TaskFunctionIndex,
    pub arguments: Vec<TaskArgument>,
    pub predecessor_count: u32,
    pub successors: Vec<TaskIndex>,
}

/// A graph output: either a materialized constant or a reference to one of
/// the graph's dynamic buffers.
#[derive(Debug, Clone)]
pub enum GraphOutput {
    Constant(Value),
    Buffer(BufferIndex),
}

impl GraphOutput {
    pub fn buffer_index(&self) -> Option<BufferIndex> {
        match self {
            GraphOutput::Buffer(b) => Some(*b),
            GraphOutput::Constant(_) => None,
        }
    }
}
