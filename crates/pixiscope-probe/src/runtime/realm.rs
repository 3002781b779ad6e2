//! The page realm: global object, monotonic clock, animation-frame callbacks.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::time::Instant;

use super::{Object, Value};

// ---------------------------------------------------------------------------
// Clocks
// ---------------------------------------------------------------------------

/// High-resolution monotonic time in milliseconds, like `performance.now()`.
pub trait Clock {
    fn now_ms(&self) -> f64;
}

/// Wall clock measured from the moment it was created.
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }
}

/// Clock that only moves when told to. Used by the simulated application so
/// that timings and benchmark loops are deterministic.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<f64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, ms: f64) {
        self.now.set(self.now.get() + ms);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> f64 {
        self.now.get()
    }
}

// ---------------------------------------------------------------------------
// Realm
// ---------------------------------------------------------------------------

type FrameCallback = Rc<dyn Fn(f64)>;

/// Handle returned by [`Realm::on_animation_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameCallbackId(u64);

/// One page execution context.
pub struct Realm {
    global: Object,
    clock: Rc<dyn Clock>,
    frame_callbacks: RefCell<Vec<(FrameCallbackId, FrameCallback)>>,
    next_callback: Cell<u64>,
}

impl Realm {
    pub fn new(clock: Rc<dyn Clock>) -> Self {
        Self {
            global: Object::new(),
            clock,
            frame_callbacks: RefCell::new(Vec::new()),
            next_callback: Cell::new(1),
        }
    }

    /// Realm backed by the wall clock.
    pub fn with_system_clock() -> Self {
        Self::new(Rc::new(SystemClock::new()))
    }

    pub fn global(&self) -> &Object {
        &self.global
    }

    /// Shorthand for reading a global binding.
    pub fn global_value(&self, name: &str) -> Value {
        self.global.get(name)
    }

    pub fn now_ms(&self) -> f64 {
        self.clock.now_ms()
    }

    pub fn clock(&self) -> Rc<dyn Clock> {
        Rc::clone(&self.clock)
    }

    /// Register a callback that runs on every animation frame until it is
    /// cancelled.
    pub fn on_animation_frame(&self, callback: impl Fn(f64) + 'static) -> FrameCallbackId {
        let id = FrameCallbackId(self.next_callback.get());
        self.next_callback.set(id.0 + 1);
        self.frame_callbacks.borrow_mut().push((id, Rc::new(callback)));
        id
    }

    /// Stop delivering frames to a callback. Unknown ids are ignored.
    pub fn cancel_animation_frame(&self, id: FrameCallbackId) {
        self.frame_callbacks.borrow_mut().retain(|(cb, _)| *cb != id);
    }

    pub fn frame_callback_count(&self) -> usize {
        self.frame_callbacks.borrow().len()
    }

    /// Fire one animation frame at the current clock time.
    pub fn advance_frame(&self) {
        let now = self.now_ms();
        // Clone the list so callbacks may register or cancel callbacks.
        let callbacks: Vec<FrameCallback> = self
            .frame_callbacks
            .borrow()
            .iter()
            .map(|(_, cb)| Rc::clone(cb))
            .collect();
        for callback in callbacks {
            callback(now);
        }
    }
}

impl fmt::Debug for Realm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Realm")
            .field("globals", &self.global.keys())
            .field("frame_callbacks", &self.frame_callbacks.borrow().len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
