//! A bounded, pausable thread pool executing opaque task descriptors in
//! FIFO order across N worker threads (§4.2).
//!
//! Task descriptors are plain `Copy` values, not boxed closures: the only
//! heap allocation this type performs is at `start()`, never on
//! `add_task()`. This follows REDESIGN FLAGS' guidance to model the
//! thread-pool payload as a typed value rather than a raw parameter blob.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

use crate::error::InitError;

struct Gate {
    resumed: Mutex<bool>,
    stopping: AtomicBool,
    cv: Condvar,
}

impl Gate {
    fn new(start_paused: bool) -> Self {
        Gate {
            resumed: Mutex::new(!start_paused),
            stopping: AtomicBool::new(false),
            cv: Condvar::new(),
        }
    }

    /// Blocks until the pool is resumed or stopping; returns `false` if the
    /// pool is stopping and the worker should exit.
    fn wait_until_runnable(&self) -> bool {
        let mut guard = self.resumed.lock().unwrap();
        while !*guard && !self.stopping.load(Ordering::Acquire) {
            guard = self.cv.wait(guard).unwrap();
        }
        !self.stopping.load(Ordering::Acquire)
    }

    fn resume(&self) {
        *self.resumed.lock().unwrap() = true;
        self.cv.notify_all();
    }

    fn pause(&self) {
        *self.resumed.lock().unwrap() = false;
    }

    fn stop(&self) {
        self.stopping.store(true, Ordering::Release);
        self.cv.notify_all();
    }
}

/// A thread pool over a fixed task-descriptor type `T`. `T` should be a
/// small `Copy` struct such as the executor's own task-submission record.
pub struct ThreadPool<T: Copy + Send + 'static> {
    sender: Sender<T>,
    receiver: Receiver<T>,
    gate: Arc<Gate>,
    workers: Vec<JoinHandle<()>>,
    thread_count: u32,
    // Kept for the `thread_count == 0` inline-execution path; the threaded
    // path keeps its own clone inside each worker closure instead.
    execute: Arc<dyn Fn(T) + Send + Sync>,
}

impl<T: Copy + Send + 'static> ThreadPool<T> {
    /// Spawn `thread_count` workers pumping a bounded queue of capacity
    /// `max_tasks` (equal to the graph's max task concurrency). When
    /// `thread_count == 0`, no threads are spawned: `resume()` instead
    /// drains the queue inline on the calling thread, which is the
    /// standard real-time-safe mode where the audio-callback thread does
    /// all the work itself.
    pub fn start<F>(
        thread_count: u32,
        max_tasks: u32,
        start_paused: bool,
        execute: F,
    ) -> Result<Self, InitError>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let (sender, receiver) = bounded::<T>(max_tasks.max(1) as usize);
        let gate = Arc::new(Gate::new(start_paused));
        let execute = Arc::new(execute);

        let mut workers = Vec::with_capacity(thread_count as usize);
        for id in 0..thread_count {
            let receiver = receiver.clone();
            let gate = Arc::clone(&gate);
            let execute = Arc::clone(&execute);
            let handle = thread::Builder::new()
                .name(format!("wavelang-worker-{id}"))
                .spawn(move || worker_loop(receiver, gate, execute))
                .map_err(|e| InitError::ThreadPoolStartFailed(e.to_string()))?;
            // Best-effort; a denied priority bump is not a startup failure.
            let _ = thread_priority::set_current_thread_priority(
                thread_priority::ThreadPriority::Max,
            );
            workers.push(handle);
        }

        Ok(ThreadPool {
            sender,
            receiver,
            gate,
            workers,
            thread_count,
            execute,
        })
    }

    /// Enqueue a task descriptor. Never blocks; panics if the queue is at
    /// capacity, which would mean the graph's concurrency bound was wrong.
    /// Safe to call from a worker thread, which is how successors get
    /// resubmitted.
    pub fn add_task(&self, task: T) {
        self.sender
            .try_send(task)
            .expect("thread pool task queue overflow: graph concurrency bound was violated");
    }

    /// Open the gate. For `thread_count == 0`, this instead drains the
    /// queue inline on the calling thread until empty.
    pub fn resume(&self) {
        if self.thread_count == 0 {
            while let Ok(task) = self.receiver.try_recv() {
                (self.execute)(task);
            }
            return;
        }
        self.gate.resume();
    }

    /// Close the gate: in-flight tasks complete, no further dequeues occur.
    /// A no-op in inline mode, since `resume` already drains synchronously.
    pub fn pause(&self) {
        self.gate.pause();
    }

    /// Join all worker threads. Returns the number of tasks still queued
    /// (expected to be zero; the executor must drain the pool before
    /// shutting it down).
    pub fn stop(mut self) -> usize {
        self.gate.stop();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
        self.receiver.len()
    }

    pub fn thread_count(&self) -> u32 {
        self.thread_count
    }
}


fn worker_loop<T: Copy + Send + 'static>(
    receiver: Receiver<T>,
    gate: Arc<Gate>,
    execute: Arc<dyn Fn(T) + Send + Sync>,
) {
    loop {
        if !gate.wait_until_runnable() {
            return;
        }
        match receiver.recv_timeout(std::time::Duration::from_millis(5)) {
            Ok(task) => execute(task),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}
