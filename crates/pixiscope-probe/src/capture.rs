//! Frame capture: one baseline render, one instrumented render.
//!
//! Both passes are real frames. The baseline gives `renderTime`, the
//! instrumented pass gives `profiledRenderTime` together with per-stage
//! timings, draw-call counts, and the draw-order log. Every patch installed
//! for the instrumented pass is reverted before this module returns, whether
//! the render succeeded or not.
//!
//! At most one capture may run against a renderer at a time. Overlapping
//! captures would patch the same stage objects.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{ProbeError, ProbeResult, RenderPhase};
use crate::ids::NodeIds;
use crate::instructions::{self, InstructionNode};
use crate::instrument::{DrawOrderEntry, Instrumentation, PatchGuard, PipeTiming};
use crate::locate::RootHandle;
use crate::rendering::{canvas_geometry, CanvasGeometry};
use crate::runtime::{Object, Realm, Value};
use crate::stats::{collect_stats, StatsAggregate};

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// JS heap figures, when the page exposes them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySnapshot {
    pub used_js_heap_size: f64,
    pub total_js_heap_size: f64,
    pub js_heap_size_limit: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureResult {
    pub render_time: f64,
    pub profiled_render_time: f64,
    pub total_draw_calls: u64,
    /// False when the renderer has no WebGL context to intercept, in which
    /// case all draw-call figures are zero.
    pub draw_calls_counted: bool,
    pub instruction_count: usize,
    pub scene_totals: StatsAggregate,
    pub pipe_timings: BTreeMap<String, PipeTiming>,
    pub instructions: Vec<InstructionNode>,
    pub draw_order: Vec<DrawOrderEntry>,
    pub memory: Option<MemorySnapshot>,
    pub canvas: Option<CanvasGeometry>,
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// Issue one render of `stage`.
pub(crate) fn render_frame(renderer: &Object, stage: &Object, phase: RenderPhase) -> ProbeResult<()> {
    renderer
        .call_method("render", &[Value::from(stage.clone())])
        .map(|_| ())
        .map_err(|thrown| ProbeError::RenderFailed {
            phase,
            message: thrown.message,
        })
}

fn memory_snapshot(global: &Object) -> Option<MemorySnapshot> {
    let memory = global.get_path(&["performance", "memory"]);
    Some(MemorySnapshot {
        used_js_heap_size: memory.get("usedJSHeapSize").as_f64()?,
        total_js_heap_size: memory.get("totalJSHeapSize").as_f64()?,
        js_heap_size_limit: memory.get("jsHeapSizeLimit").as_f64()?,
    })
}

// ---------------------------------------------------------------------------
// capture_frame
// ---------------------------------------------------------------------------

/// Put patched entry points back, newest first.
fn restore(guards: Vec<PatchGuard>) {
    for guard in guards.into_iter().rev() {
        drop(guard);
    }
}

/// Capture one instrumented frame.
///
/// Fails without rendering if the renderer, display root, stage table, or
/// root instruction set is missing. `ids` is only borrowed after both
/// renders, so page code may call back into the agent while a frame renders.
pub fn capture_frame(
    realm: &Realm,
    roots: &RootHandle,
    ids: &RefCell<NodeIds>,
) -> ProbeResult<CaptureResult> {
    let (renderer, stage) = roots.render_target()?;
    let (Some(pipes), Some(instruction_set)) = (
        renderer.get("renderPipes").as_object().cloned(),
        roots.instruction_set(),
    ) else {
        return Err(ProbeError::CaptureUnsupported);
    };

    let started = realm.now_ms();
    render_frame(renderer, stage, RenderPhase::Baseline)?;
    let render_time = realm.now_ms() - started;
    tracing::debug!(render_time, "baseline render complete");

    let instrumentation = Instrumentation::new(realm.clock(), renderer.get("gl").as_object());
    let draw_calls_counted = instrumentation.counts_draw_calls();

    // A pipe object registered under several names is timed once, under
    // the first of them.
    let mut patched = HashSet::new();
    let mut guards = Vec::new();
    for (name, pipe) in pipes.entries() {
        let Some(pipe) = pipe.as_object() else {
            continue;
        };
        if !patched.insert(pipe.addr()) {
            tracing::debug!(stage = %name, "stage shares its pipe object with another stage");
            continue;
        }
        guards.extend(instrumentation.instrument_stage(pipe, &name));
    }
    tracing::debug!(stages = guards.len(), "pipeline stages instrumented");

    let started = realm.now_ms();
    let outcome = render_frame(renderer, stage, RenderPhase::Instrumented);
    let profiled_render_time = realm.now_ms() - started;

    restore(guards);
    outcome?;

    let recording = instrumentation.finish();
    let mut ids = ids.try_borrow_mut().map_err(|_| ProbeError::Busy)?;
    let tree = instructions::build(instructions::instruction_list(&instruction_set), &mut ids);
    let instruction_count = instructions::count(&tree);

    tracing::debug!(
        profiled_render_time,
        draws = recording.total_draw_calls,
        instructions = instruction_count,
        "instrumented render complete"
    );

    Ok(CaptureResult {
        render_time,
        profiled_render_time,
        total_draw_calls: recording.total_draw_calls,
        draw_calls_counted,
        instruction_count,
        scene_totals: collect_stats(stage),
        pipe_timings: recording.pipe_timings,
        instructions: tree,
        draw_order: recording.draw_order,
        memory: memory_snapshot(realm.global()),
        canvas: canvas_geometry(renderer),
    })
}
