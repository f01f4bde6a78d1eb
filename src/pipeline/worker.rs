//! START/STOP/QUIT lifecycle shared by every long-lived pipeline thread.
//!
//! The controller and the worker thread share one mutex/condvar pair guarding
//! the worker state and the pending request. START and STOP are acknowledged by
//! the worker, so the controller waits on the condvar instead of polling.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info, warn};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Stopped,
    Running,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Request {
    Idle,
    Start,
    Stop,
    /// Sticky: never replaced once set
    Quit,
}

struct ControlState {
    state: WorkerState,
    request: Request,
    /// Sessions acknowledged so far
    sessions: u64,
}

/// Shared lifecycle control block
pub struct Control {
    inner: Mutex<ControlState>,
    changed: Condvar,
}

impl Control {
    fn new() -> Self {
        Self {
            inner: Mutex::new(ControlState {
                state: WorkerState::Stopped,
                request: Request::Idle,
                sessions: 0,
            }),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ControlState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, ControlState>) -> MutexGuard<'a, ControlState> {
        self.changed
            .wait(guard)
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> WorkerState {
        self.lock().state
    }

    /// Checked by running sessions at every loop iteration
    pub fn stop_requested(&self) -> bool {
        matches!(self.lock().request, Request::Stop | Request::Quit)
    }

    pub fn quit_requested(&self) -> bool {
        self.lock().request == Request::Quit
    }

    pub fn sessions(&self) -> u64 {
        self.lock().sessions
    }

    /// Worker side: park until START (true) or QUIT (false)
    fn wait_for_start<T: Task>(&self, task: &mut T) -> bool {
        let mut guard = self.lock();
        loop {
            match guard.request {
                Request::Start => {
                    task.prepare();
                    guard.request = Request::Idle;
                    guard.state = WorkerState::Running;
                    guard.sessions += 1;
                    self.changed.notify_all();
                    return true;
                }
                Request::Quit => return false,
                // Left over from a session that ended on its own
                Request::Stop => guard.request = Request::Idle,
                Request::Idle => {}
            }
            guard = self.wait(guard);
        }
    }

    fn end_session(&self) {
        let mut guard = self.lock();
        guard.state = WorkerState::Stopped;
        if guard.request == Request::Stop {
            guard.request = Request::Idle;
        }
        self.changed.notify_all();
    }

    fn terminate(&self) {
        let mut guard = self.lock();
        guard.state = WorkerState::Terminated;
        self.changed.notify_all();
    }
}

/// Work performed by a lifecycle-managed thread
pub trait Task: Send + 'static {
    /// One START..STOP session. Must return once `control.stop_requested()`
    /// turns true or the session ends on its own.
    fn run_session(&mut self, control: &Control);

    /// Runs on the worker thread before START is acknowledged. Must not block.
    fn prepare(&mut self) {}

    /// Called exactly once, on the worker thread, before it exits
    fn release(&mut self) {}
}

/// Unblocks a session parked somewhere `stop_requested` is not polled
pub type Interrupt = Box<dyn Fn(&Control) + Send + Sync>;

pub struct WorkerOptions {
    pub name: String,
    /// Pin the worker thread to this CPU core
    pub pin_core: Option<usize>,
    pub interrupt: Option<Interrupt>,
}

impl WorkerOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pin_core: None,
            interrupt: None,
        }
    }
}

/// Controller handle for one worker thread
pub struct Worker {
    name: String,
    control: Arc<Control>,
    interrupt: Option<Interrupt>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    pub fn spawn<T: Task>(options: WorkerOptions, mut task: T) -> Result<Self> {
        let control = Arc::new(Control::new());
        let worker_control = Arc::clone(&control);
        let pin_core = options.pin_core;
        let thread_name = options.name.clone();

        let handle = thread::Builder::new()
            .name(options.name.clone())
            .spawn(move || {
                if let Some(core) = pin_core {
                    pin_current_thread(&thread_name, core);
                }
                while worker_control.wait_for_start(&mut task) {
                    debug!(worker = %thread_name, "session started");
                    task.run_session(&worker_control);
                    worker_control.end_session();
                    debug!(worker = %thread_name, "session ended");
                }
                task.release();
                worker_control.terminate();
            })?;

        Ok(Self {
            name: options.name,
            control,
            interrupt: options.interrupt,
            thread: Mutex::new(Some(handle)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> WorkerState {
        self.control.state()
    }

    /// Number of sessions the worker has acknowledged
    pub fn sessions(&self) -> u64 {
        self.control.sessions()
    }

    /// Returns false when the worker was not stopped
    pub fn start(&self) -> bool {
        let mut guard = self.control.lock();
        if guard.state != WorkerState::Stopped || guard.request == Request::Quit {
            return false;
        }
        let seen = guard.sessions;
        guard.request = Request::Start;
        self.control.changed.notify_all();
        while guard.sessions == seen && guard.state != WorkerState::Terminated {
            guard = self.control.wait(guard);
        }
        info!(worker = %self.name, "running");
        true
    }

    /// Returns false when the worker was not running
    pub fn stop(&self) -> bool {
        {
            let mut guard = self.control.lock();
            if guard.state != WorkerState::Running {
                return false;
            }
            if guard.request != Request::Quit {
                guard.request = Request::Stop;
            }
            self.control.changed.notify_all();
        }
        if let Some(interrupt) = &self.interrupt {
            interrupt(&self.control);
        }
        let mut guard = self.control.lock();
        while guard.state == WorkerState::Running {
            guard = self.control.wait(guard);
        }
        info!(worker = %self.name, "stopped");
        true
    }

    /// Safe in any state. Wakes a parked worker, ends a running session and
    /// joins the thread.
    pub fn quit(&self) {
        let was_running = {
            let mut guard = self.control.lock();
            guard.request = Request::Quit;
            self.control.changed.notify_all();
            guard.state == WorkerState::Running
        };
        if was_running {
            if let Some(interrupt) = &self.interrupt {
                interrupt(&self.control);
            }
        }

        let handle = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!(worker = %self.name, "worker thread panicked");
            }
            info!(worker = %self.name, "terminated");
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.quit();
    }
}

fn pin_current_thread(name: &str, core: usize) {
    let Some(ids) = core_affinity::get_core_ids() else {
        warn!(worker = %name, "cannot query CPU cores, not pinning");
        return;
    };
    match ids.into_iter().find(|id| id.id == core) {
        Some(id) if core_affinity::set_for_current(id) => {
            debug!(worker = %name, core, "pinned to core")
        }
        _ => warn!(worker = %name, core, "failed to pin to core"),
    }
}
