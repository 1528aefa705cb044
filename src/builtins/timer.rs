//! `setTimeout` and the timer queue behind it
//!
//! Each timer sleeps on its own thread and reports its id over a channel
//! once it expires. The interpreter polls the channel between instructions
//! and turns every expired timer into an interrupt, so callbacks always run
//! on the interpreter's thread.

use std::thread;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::builtins::{define_frozen, method};
use crate::runtime::function::Arguments;
use crate::value::Value;
use crate::vm::opcode::CodeRange;
use crate::vm::{Interpreter, InterpreterError, InterpreterResult};

pub struct TimerQueue {
    sender: Sender<u64>,
    receiver: Receiver<u64>,
    pending: FxHashMap<u64, CodeRange>,
    next_id: u64,
}

impl Default for TimerQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerQueue {
    pub fn new() -> Self {
        let (sender, receiver) = channel::unbounded();
        TimerQueue {
            sender,
            receiver,
            pending: FxHashMap::default(),
            next_id: 1,
        }
    }

    /// Arm a timer that releases `range` after `delay`
    pub fn schedule(&mut self, range: CodeRange, delay: Duration) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.pending.insert(id, range);

        let sender = self.sender.clone();
        thread::spawn(move || {
            thread::sleep(delay);
            // The queue may have been dropped in the meantime
            let _ = sender.send(id);
        });
        debug!(id, ?delay, "timer scheduled");
        id
    }

    /// An expired timer's range, without blocking
    pub fn poll(&mut self) -> Option<CodeRange> {
        while let Ok(id) = self.receiver.try_recv() {
            if let Some(range) = self.pending.remove(&id) {
                return Some(range);
            }
        }
        None
    }

    /// Block until a timer expires. `None` if nothing is pending.
    pub fn wait(&mut self) -> Option<CodeRange> {
        while !self.pending.is_empty() {
            match self.receiver.recv() {
                Ok(id) => {
                    if let Some(range) = self.pending.remove(&id) {
                        return Some(range);
                    }
                }
                Err(e) => {
                    warn!(error = %e, "timer channel closed");
                    return None;
                }
            }
        }
        None
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Forget every pending timer. Threads still sleeping send ids that no
    /// longer match anything.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

pub fn install(interp: &mut Interpreter) {
    define_frozen(interp, "setTimeout", method("setTimeout", &["callback", "ms"], set_timeout));
}

/// `setTimeout(callback, ms)`. Returns the timer id.
fn set_timeout(interp: &mut Interpreter, args: &Arguments) -> InterpreterResult<Value> {
    let callback = args.at(0);
    if !callback.is_function() {
        return Err(InterpreterError::TypeError(format!(
            "setTimeout: callback must be a function, got {}",
            callback.get_type()
        )));
    }
    let ms = args.at(1).as_number().filter(|n| !n.is_nan()).unwrap_or(0.0).max(0.0);
    let id = interp.schedule_timer(callback, Duration::from_millis(ms as u64));
    Ok(Value::number(id as f64))
}
