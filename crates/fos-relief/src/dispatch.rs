//! Fire-and-forget task dispatch to named dedicated threads.
//!
//! Some caches are owned by a single thread and can only be cleared from
//! that thread. Callers post a task and move on: there is no reply and no
//! ordering guarantee relative to the caller.

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Work posted to a dedicated thread.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Errors from spawning a dedicated thread.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Failed to spawn thread {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Something that runs tasks on its own thread.
pub trait TaskDispatch: Send + Sync {
    /// Name of the thread, for logging.
    fn name(&self) -> &str;

    /// Post a task. Never blocks and never reports back.
    fn dispatch(&self, task: Task);
}

enum WorkerMessage {
    Run(Task),
    Shutdown,
}

/// A named thread draining a task queue.
///
/// Each task runs inside a panic isolation boundary so one failing task
/// does not take the thread down with it.
pub struct WorkerThread {
    name: String,
    sender: Sender<WorkerMessage>,
    handle: Option<thread::JoinHandle<()>>,
}

impl WorkerThread {
    /// Spawn a new dedicated thread.
    pub fn spawn(name: impl Into<String>) -> Result<Self, DispatchError> {
        let name = name.into();
        let (sender, receiver) = unbounded();

        let thread_name = name.clone();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                info!("Dedicated thread {} started", thread_name);
                run_worker_loop(&thread_name, receiver);
                info!("Dedicated thread {} stopped", thread_name);
            })
            .map_err(|source| DispatchError::Spawn {
                name: name.clone(),
                source,
            })?;

        Ok(Self {
            name,
            sender,
            handle: Some(handle),
        })
    }
}

impl TaskDispatch for WorkerThread {
    fn name(&self) -> &str {
        &self.name
    }

    fn dispatch(&self, task: Task) {
        if self.sender.send(WorkerMessage::Run(task)).is_err() {
            warn!("Dedicated thread {} is gone, dropping task", self.name);
        }
    }
}

impl Drop for WorkerThread {
    fn drop(&mut self) {
        let _ = self.sender.send(WorkerMessage::Shutdown);
        if let Some(handle) = self.handle.take() {
            // Dropped by one of its own tasks: the loop exits on Shutdown.
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

fn run_worker_loop(name: &str, receiver: Receiver<WorkerMessage>) {
    loop {
        let task = match receiver.recv() {
            Ok(WorkerMessage::Run(task)) => task,
            Ok(WorkerMessage::Shutdown) => {
                debug!("Dedicated thread {} received shutdown", name);
                break;
            }
            Err(_) => {
                debug!("Dedicated thread {} channel closed, shutting down", name);
                break;
            }
        };

        if let Err(panic_info) = panic::catch_unwind(AssertUnwindSafe(task)) {
            let message = if let Some(s) = panic_info.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = panic_info.downcast_ref::<String>() {
                s.clone()
            } else {
                "Unknown panic".to_string()
            };
            error!("Task on dedicated thread {} panicked: {}", name, message);
        }
    }
}
