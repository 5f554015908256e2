//! A small builder for constructing [`TaskGraph`] instances by hand. The
//! real producer of task graphs is the (external) front-end compiler; this
//! builder exists so the executor's own tests can assemble small, explicit
//! graphs without replicating a compiler.

use std::collections::HashMap;

use crate::primitive::BufferPrimitive;

use super::task::{BufferIndex, GraphOutput, Task, TaskArgument, TaskFunctionIndex, TaskIndex};
use super::task_graph::TaskGraph;

pub struct TaskGraphBuilder {
    tasks: Vec<Task>,
    buffer_primitives: Vec<BufferPrimitive>,
    outputs: Vec<GraphOutput>,
    remain_active: Option<GraphOutput>,
}

impl TaskGraphBuilder {
    pub fn new() -> Self {
        TaskGraphBuilder {
            tasks: Vec::new(),
            buffer_primitives: Vec::new(),
            outputs: Vec::new(),
            remain_active: None,
        }
    }

    pub fn add_buffer(&mut self, primitive: BufferPrimitive) -> BufferIndex {
        self.buffer_primitives.push(primitive);
        (self.buffer_primitives.len() - 1) as BufferIndex
    }

    /// Add a task with no edges yet; use [`add_edge`](Self::add_edge) to
    /// wire up predecessor/successor relationships afterward.
    pub fn add_task(
        &mut self,
        task_function_index: TaskFunctionIndex,
        arguments: Vec<TaskArgument>,
    ) -> TaskIndex {
        self.tasks.push(Task {
            task_function_index,
            arguments,
            predecessor_count: 0,
            successors: Vec::new(),
        });
        (self.tasks.len() - 1) as TaskIndex
    }

    /// Declare that `to` must not run until `from` has completed.
    pub fn add_edge(&mut self, from: TaskIndex, to: TaskIndex) {
        self.tasks[from as usize].successors.push(to);
        self.tasks[to as usize].predecessor_count += 1;
    }

    pub fn set_outputs(&mut self, outputs: Vec<GraphOutput>) {
        self.outputs = outputs;
    }

    pub fn set_remain_active(&mut self, output: GraphOutput) {
        self.remain_active = Some(output);
    }

    /// Finish building. `max_task_concurrency`/`max_buffer_concurrency` are
    /// upper bounds on simultaneously-live tasks/buffers that the front end
    /// would normally compute from the graph's topology; tests supply them
    /// directly since the toy graphs built here are small enough to reason
    /// about by hand.
    pub fn build(
        self,
        max_task_concurrency: u32,
        max_buffer_concurrency: HashMap<BufferPrimitive, u32>,
    ) -> TaskGraph {
        let remain_active = self
            .remain_active
            .unwrap_or(GraphOutput::Constant(crate::value::Value::Bool(true)));
        TaskGraph::new(
            self.tasks,
            self.buffer_primitives,
            max_task_concurrency,
            max_buffer_concurrency,
            self.outputs,
            remain_active,
        )
    }
}

impl Default for TaskGraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}
