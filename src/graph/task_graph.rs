use std::collections::HashMap;

use crate::primitive::BufferPrimitive;

use super::task::{BufferIndex, GraphOutput, Task, TaskArgument, TaskIndex};

/// A static, read-only DAG of tasks, produced by the (external) front-end
/// compiler and consumed by the executor once per voice or FX run.
///
/// This is exactly the "task graph consumer contract" of the spec (§6):
/// every accessor here corresponds to one bullet of that contract.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    tasks: Vec<Task>,
    buffer_primitives: Vec<BufferPrimitive>,
    buffer_usages: Vec<u32>,
    max_task_concurrency: u32,
    max_buffer_concurrency: HashMap<BufferPrimitive, u32>,
    outputs: Vec<GraphOutput>,
    remain_active: GraphOutput,
    initial_tasks: Vec<TaskIndex>,
}

impl TaskGraph {
    pub(crate) fn new(
        tasks: Vec<Task>,
        buffer_primitives: Vec<BufferPrimitive>,
        max_task_concurrency: u32,
        max_buffer_concurrency: HashMap<BufferPrimitive, u32>,
        outputs: Vec<GraphOutput>,
        remain_active: GraphOutput,
    ) -> Self {
        let buffer_usages = compute_buffer_usages(&tasks, &outputs, &remain_active, buffer_primitives.len());
        let initial_tasks = tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.predecessor_count == 0)
            .map(|(i, _)| i as TaskIndex)
            .collect();

        TaskGraph {
            tasks,
            buffer_primitives,
            buffer_usages,
            max_task_concurrency,
            max_buffer_concurrency,
            outputs,
            remain_active,
            initial_tasks,
        }
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn buffer_count(&self) -> usize {
        self.buffer_primitives.len()
    }

    pub fn buffer_primitive(&self, buffer: BufferIndex) -> BufferPrimitive {
        self.buffer_primitives[buffer as usize]
    }

    pub fn max_task_concurrency(&self) -> u32 {
        self.max_task_concurrency
    }

    pub fn max_buffer_concurrency(&self, primitive: BufferPrimitive) -> u32 {
        self.max_buffer_concurrency.get(&primitive).copied().unwrap_or(0)
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    pub fn outputs(&self) -> &[GraphOutput] {
        &self.outputs
    }

    pub fn remain_active_output(&self) -> &GraphOutput {
        &self.remain_active
    }

    pub fn buffer_usages(&self, buffer: BufferIndex) -> u32 {
        self.buffer_usages[buffer as usize]
    }

    pub fn task_predecessor_count(&self, task: TaskIndex) -> u32 {
        self.tasks[task as usize].predecessor_count
    }

    pub fn task_successors(&self, task: TaskIndex) -> &[TaskIndex] {
        &self.tasks[task as usize].successors
    }

    pub fn task_function_index(&self, task: TaskIndex) -> u32 {
        self.tasks[task as usize].task_function_index
    }

    pub fn task_arguments(&self, task: TaskIndex) -> &[TaskArgument] {
        &self.tasks[task as usize].arguments
    }

    /// Tasks with no predecessors; these are the fork points submitted to
    /// the thread pool at the start of a voice/FX run.
    pub fn initial_tasks(&self) -> &[TaskIndex] {
        &self.initial_tasks
    }
}

/// A buffer's usage count is the number of references across the whole
/// graph that *consume* it: every `in`/`inout` task argument occurrence
/// (including array elements), plus one for every graph output (including
/// `remain_active`) that points at it. `out` argument occurrences don't
/// count: they establish the handle rather than draining it.
///
/// Counting graph outputs here, not just task arguments, is what keeps a
/// buffer alive until the executor has read it as an output: a buffer that's
/// both a task's `in` argument and a graph output must survive until both
/// the consuming task *and* the executor's own output read have released
/// it, not just the former. Without the output's own count, the last task
/// consumer would free the buffer out from under the executor's read.
fn compute_buffer_usages(
    tasks: &[Task],
    outputs: &[GraphOutput],
    remain_active: &GraphOutput,
    buffer_count: usize,
) -> Vec<u32> {
    let mut usages = vec![0u32; buffer_count];
    for task in tasks {
        for arg in &task.arguments {
            arg.for_each_consumed_buffer(|b| usages[b as usize] += 1);
        }
    }
    for output in outputs {
        if let Some(b) = output.buffer_index() {
            usages[b as usize] += 1;
        }
    }
    if let Some(b) = remain_active.buffer_index() {
        usages[b as usize] += 1;
    }
    usages
}
