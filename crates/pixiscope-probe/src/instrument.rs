//! Render instrumentation: scoped patching of pipeline stages and draw calls.
//!
//! Patching works through [`PatchGuard`], which swaps a function-valued
//! property for a wrapper and puts the original back when dropped. Every
//! exit path restores, including early `?` returns and unwinding.
//!
//! Two levels of patches are used during an instrumented render:
//!
//! 1. Each pipeline stage's `execute` entry point is wrapped for the whole
//!    render. The guards live in the capture routine.
//! 2. Inside every stage invocation, the draw-submission primitives of the
//!    low-level drawing context are wrapped, and the guards are dropped before
//!    the invocation returns. The counting wrappers always forward to the
//!    primitives as they were before the capture started, never to another
//!    stage's wrapper, so a draw issued by a nested stage is attributed to
//!    that stage alone and counted once.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::runtime::{Clock, Function, Object, Value};

/// Draw-submission primitives on a WebGL context.
pub const DRAW_PRIMITIVES: [&str; 2] = ["drawElements", "drawArrays"];

/// Name of a pipeline stage's execution entry point.
pub const STAGE_ENTRY_POINT: &str = "execute";

// ---------------------------------------------------------------------------
// PatchGuard
// ---------------------------------------------------------------------------

/// Restores a patched function property when dropped.
#[must_use = "dropping the guard restores the original immediately"]
#[derive(Debug)]
pub struct PatchGuard {
    target: Object,
    key: String,
    original: Value,
}

impl PatchGuard {
    /// Replace `target[key]` with `wrap(current)`. Returns `None` (and leaves
    /// the target untouched) if the property is not a function.
    pub fn install(
        target: &Object,
        key: &str,
        wrap: impl FnOnce(Function) -> Function,
    ) -> Option<Self> {
        let original = target.get(key);
        let current = original.as_function()?.clone();
        target.set(key, wrap(current));
        Some(Self {
            target: target.clone(),
            key: key.to_string(),
            original,
        })
    }

    /// The value that will be put back.
    pub fn original(&self) -> &Value {
        &self.original
    }
}

impl Drop for PatchGuard {
    fn drop(&mut self) {
        self.target.set(self.key.clone(), self.original.clone());
    }
}

// ---------------------------------------------------------------------------
// Recording
// ---------------------------------------------------------------------------

/// Cumulative figures for one pipeline stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipeTiming {
    /// Milliseconds spent inside the stage, inclusive of nested stages.
    pub time: f64,
    /// Number of invocations.
    pub count: u64,
    /// Draw submissions issued directly by this stage.
    pub draw_calls: u64,
}

/// One stage invocation, in the order invocations began.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrawOrderEntry {
    pub index: usize,
    pub pipe: String,
    /// Nesting level: 0 for invocations issued by the top-level render.
    pub depth: usize,
    pub time: f64,
    pub draw_calls: u64,
}

/// What an instrumented render observed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Recording {
    pub pipe_timings: BTreeMap<String, PipeTiming>,
    pub draw_order: Vec<DrawOrderEntry>,
    pub total_draw_calls: u64,
}

#[derive(Debug, Default)]
struct Recorder {
    recording: Recording,
    active: Vec<usize>,
}

impl Recorder {
    fn register(&mut self, stage: &str) {
        self.recording
            .pipe_timings
            .entry(stage.to_string())
            .or_default();
    }

    fn begin(&mut self, stage: &str) -> usize {
        self.recording
            .pipe_timings
            .entry(stage.to_string())
            .or_default()
            .count += 1;
        let index = self.recording.draw_order.len();
        self.recording.draw_order.push(DrawOrderEntry {
            index,
            pipe: stage.to_string(),
            depth: self.active.len(),
            time: 0.0,
            draw_calls: 0,
        });
        self.active.push(index);
        index
    }

    fn finish(&mut self, stage: &str, slot: usize, elapsed: f64) {
        if let Some(timing) = self.recording.pipe_timings.get_mut(stage) {
            timing.time += elapsed;
        }
        if let Some(entry) = self.recording.draw_order.get_mut(slot) {
            entry.time = elapsed;
        }
        self.active.pop();
    }

    fn count_draw(&mut self, stage: &str) {
        self.recording.total_draw_calls += 1;
        if let Some(timing) = self.recording.pipe_timings.get_mut(stage) {
            timing.draw_calls += 1;
        }
        if let Some(entry) = self
            .active
            .last()
            .and_then(|slot| self.recording.draw_order.get_mut(*slot))
        {
            entry.draw_calls += 1;
        }
    }
}

// ---------------------------------------------------------------------------
// Draw interception
// ---------------------------------------------------------------------------

/// A drawing context and its draw primitives as they were before capture.
#[derive(Debug)]
struct DrawContext {
    gl: Object,
    pristine: Vec<(&'static str, Function)>,
}

impl DrawContext {
    fn capture(gl: &Object) -> Option<Self> {
        let pristine: Vec<(&'static str, Function)> = DRAW_PRIMITIVES
            .iter()
            .filter_map(|key| gl.get(key).as_function().map(|f| (*key, f.clone())))
            .collect();
        (!pristine.is_empty()).then(|| Self {
            gl: gl.clone(),
            pristine,
        })
    }

    /// Wrap the draw primitives for one stage invocation.
    fn intercept(&self, stage: &Rc<str>, recorder: &Rc<RefCell<Recorder>>) -> Vec<PatchGuard> {
        self.pristine
            .iter()
            .filter_map(|(key, pristine)| {
                let pristine = pristine.clone();
                let stage = Rc::clone(stage);
                let recorder = Rc::clone(recorder);
                PatchGuard::install(&self.gl, key, move |_current| {
                    Function::new(*key, move |this, args| {
                        recorder.borrow_mut().count_draw(&stage);
                        pristine.call(this, args)
                    })
                })
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Instrumentation
// ---------------------------------------------------------------------------

/// Shared state for one instrumented render.
pub struct Instrumentation {
    recorder: Rc<RefCell<Recorder>>,
    clock: Rc<dyn Clock>,
    draw_context: Option<Rc<DrawContext>>,
}

impl Instrumentation {
    /// `gl` is the renderer's low-level drawing context, if it has one.
    /// Without it, stages are still timed but draw calls are not counted.
    pub fn new(clock: Rc<dyn Clock>, gl: Option<&Object>) -> Self {
        let draw_context = gl.and_then(DrawContext::capture).map(Rc::new);
        if draw_context.is_none() {
            tracing::debug!("no draw context with draw primitives; draw calls will not be counted");
        }
        Self {
            recorder: Rc::new(RefCell::new(Recorder::default())),
            clock,
            draw_context,
        }
    }

    pub fn counts_draw_calls(&self) -> bool {
        self.draw_context.is_some()
    }

    /// Wrap one stage's entry point. Returns `None` if the stage has no
    /// callable entry point.
    pub fn instrument_stage(&self, pipe: &Object, stage: &str) -> Option<PatchGuard> {
        let stage: Rc<str> = Rc::from(stage);
        let recorder = Rc::clone(&self.recorder);
        let clock = Rc::clone(&self.clock);
        let draw_context = self.draw_context.clone();

        let guard = PatchGuard::install(pipe, STAGE_ENTRY_POINT, |original| {
            let name = format!("{stage}.{STAGE_ENTRY_POINT}");
            let stage = Rc::clone(&stage);
            let recorder = Rc::clone(&recorder);
            Function::new(name, move |this, args| {
                let slot = recorder.borrow_mut().begin(&stage);
                let started = clock.now_ms();
                let outcome = {
                    let _draw_guards = draw_context
                        .as_ref()
                        .map(|ctx| ctx.intercept(&stage, &recorder));
                    original.call(this, args)
                };
                let elapsed = clock.now_ms() - started;
                recorder.borrow_mut().finish(&stage, slot, elapsed);
                outcome
            })
        });

        match &guard {
            Some(_) => self.recorder.borrow_mut().register(&stage),
            None => tracing::warn!(stage = %stage, "pipeline stage has no callable entry point"),
        }
        guard
    }

    /// Take what was recorded, dropping stages that never ran.
    pub fn finish(self) -> Recording {
        let mut recording = std::mem::take(&mut self.recorder.borrow_mut().recording);
        recording.pipe_timings.retain(|_, timing| timing.count > 0);
        recording
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{ManualClock, Thrown};

    fn counter_gl(calls: Rc<RefCell<u32>>) -> Object {
        let gl = Object::new();
        for key in DRAW_PRIMITIVES {
            let calls = Rc::clone(&calls);
            gl.set(
                key,
                Function::new(key, move |_, _| {
                    *calls.borrow_mut() += 1;
                    Ok(Value::Undefined)
                }),
            );
        }
        gl
    }

    fn drawing_pipe(gl: &Object, draws: usize) -> Object {
        let gl = gl.clone();
        let pipe = Object::new();
        pipe.set(
            STAGE_ENTRY_POINT,
            Function::new("execute", move |_, _| {
                for _ in 0..draws {
                    gl.call_method("drawElements", &[])?;
                }
                Ok(Value::Undefined)
            }),
        );
        pipe
    }

    fn function_at(obj: &Object, key: &str) -> Function {
        obj.get(key).as_function().cloned().unwrap()
    }

    #[test]
    fn test_patch_guard_restores_on_drop() {
        let target = Object::new();
        let original = Function::new("f", |_, _| Ok(Value::from(1.0)));
        target.set("f", original.clone());
        {
            let guard = PatchGuard::install(&target, "f", |_| {
                Function::new("wrapped", |_, _| Ok(Value::from(2.0)))
            });
            assert!(guard.is_some());
            assert_eq!(target.call_method("f", &[]).unwrap().as_f64(), Some(2.0));
        }
        assert!(function_at(&target, "f").ptr_eq(&original));
    }

    #[test]
    fn test_patch_guard_skips_non_functions() {
        let target = Object::from_props([("f", Value::from(3.0))]);
        assert!(PatchGuard::install(&target, "f", |f| f).is_none());
        assert_eq!(target.get("f").as_f64(), Some(3.0));
    }

    #[test]
    fn test_stage_counts_and_draws() {
        let calls = Rc::new(RefCell::new(0));
        let gl = counter_gl(Rc::clone(&calls));
        let pipe = drawing_pipe(&gl, 3);
        let inst = Instrumentation::new(Rc::new(ManualClock::new()), Some(&gl));
        let guard = inst.instrument_stage(&pipe, "batch").unwrap();

        pipe.call_method(STAGE_ENTRY_POINT, &[]).unwrap();
        pipe.call_method(STAGE_ENTRY_POINT, &[]).unwrap();
        drop(guard);

        let rec = inst.finish();
        assert_eq!(*calls.borrow(), 6, "real primitives still called");
        assert_eq!(rec.total_draw_calls, 6);
        assert_eq!(rec.pipe_timings["batch"].count, 2);
        assert_eq!(rec.pipe_timings["batch"].draw_calls, 6);
        assert_eq!(rec.draw_order.len(), 2);
        assert_eq!(rec.draw_order[1].draw_calls, 3);
    }

    #[test]
    fn test_draw_primitives_restored_between_invocations() {
        let gl = counter_gl(Rc::new(RefCell::new(0)));
        let before = function_at(&gl, "drawElements");
        let seen_inside = Rc::new(RefCell::new(None));
        let probe_gl = gl.clone();
        let seen = Rc::clone(&seen_inside);
        let pipe = Object::new();
        pipe.set(
            STAGE_ENTRY_POINT,
            Function::new("execute", move |_, _| {
                *seen.borrow_mut() = Some(function_at(&probe_gl, "drawElements"));
                Ok(Value::Undefined)
            }),
        );
        let inst = Instrumentation::new(Rc::new(ManualClock::new()), Some(&gl));
        let _guard = inst.instrument_stage(&pipe, "mesh").unwrap();
        pipe.call_method(STAGE_ENTRY_POINT, &[]).unwrap();

        let inside = seen_inside.borrow().clone().unwrap();
        assert!(!inside.ptr_eq(&before), "patched while the stage runs");
        assert!(function_at(&gl, "drawElements").ptr_eq(&before), "restored after");
    }

    #[test]
    fn test_draw_primitives_restored_when_stage_throws() {
        let gl = counter_gl(Rc::new(RefCell::new(0)));
        let before = function_at(&gl, "drawArrays");
        let pipe = Object::new();
        pipe.set(
            STAGE_ENTRY_POINT,
            Function::new("execute", |_, _| Err(Thrown::new("stage exploded"))),
        );
        let inst = Instrumentation::new(Rc::new(ManualClock::new()), Some(&gl));
        let guard = inst.instrument_stage(&pipe, "filter").unwrap();

        let err = pipe.call_method(STAGE_ENTRY_POINT, &[]).unwrap_err();
        assert_eq!(err.message, "stage exploded");
        assert!(function_at(&gl, "drawArrays").ptr_eq(&before));
        drop(guard);
        assert_eq!(inst.finish().pipe_timings["filter"].count, 1);
    }

    #[test]
    fn test_nested_stages_attribute_draws_once() {
        let calls = Rc::new(RefCell::new(0));
        let gl = counter_gl(Rc::clone(&calls));
        let inner = drawing_pipe(&gl, 2);
        let outer = Object::new();
        {
            let inner = inner.clone();
            let gl = gl.clone();
            outer.set(
                STAGE_ENTRY_POINT,
                Function::new("execute", move |_, _| {
                    gl.call_method("drawArrays", &[])?;
                    inner.call_method(STAGE_ENTRY_POINT, &[])?;
                    gl.call_method("drawArrays", &[])
                }),
            );
        }
        let inst = Instrumentation::new(Rc::new(ManualClock::new()), Some(&gl));
        let guards = vec![
            inst.instrument_stage(&outer, "renderGroup").unwrap(),
            inst.instrument_stage(&inner, "batch").unwrap(),
        ];
        outer.call_method(STAGE_ENTRY_POINT, &[]).unwrap();
        drop(guards);

        let rec = inst.finish();
        assert_eq!(*calls.borrow(), 4);
        assert_eq!(rec.total_draw_calls, 4);
        assert_eq!(rec.pipe_timings["renderGroup"].draw_calls, 2);
        assert_eq!(rec.pipe_timings["batch"].draw_calls, 2);
        assert_eq!(rec.draw_order[0].pipe, "renderGroup");
        assert_eq!(rec.draw_order[1].pipe, "batch");
        assert_eq!(rec.draw_order[1].depth, 1);
    }

    #[test]
    fn test_unused_stages_dropped() {
        let pipe_a = drawing_pipe(&Object::new(), 0);
        let pipe_b = drawing_pipe(&Object::new(), 0);
        let inst = Instrumentation::new(Rc::new(ManualClock::new()), None);
        let _a = inst.instrument_stage(&pipe_a, "batch").unwrap();
        let _b = inst.instrument_stage(&pipe_b, "mesh").unwrap();
        pipe_a.call_method(STAGE_ENTRY_POINT, &[]).unwrap();
        let rec = inst.finish();
        assert!(rec.pipe_timings.contains_key("batch"));
        assert!(!rec.pipe_timings.contains_key("mesh"));
    }
}
