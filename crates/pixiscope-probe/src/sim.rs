//! A simulated PixiJS application.
//!
//! Builds a page realm shaped like a small v8 game: a display tree with every
//! node kind the classifier knows, a WebGL-style renderer whose pipeline
//! stages execute a pre-built instruction set (including a nested render
//! group), a texture manager, and a ticker. The renderer looks its stages
//! and draw primitives up on every call, so patches installed by the probe
//! are observed exactly as they would be in a page.
//!
//! Time comes from a [`ManualClock`] that the renderer advances as it draws,
//! so timings and benchmark loops are deterministic.

use std::cell::Cell;
use std::rc::Rc;

use crate::instructions::instruction_list;
use crate::runtime::{Array, Clock, Function, ManualClock, Object, Realm, Thrown, Value, WeakObject};

/// Milliseconds per animation frame at 60 Hz.
pub const FRAME_INTERVAL_MS: f64 = 1000.0 / 60.0;

/// Where the simulated page registers its objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// `window.__PIXI_APP__ = app`
    AppGlobal,
    /// `window.__PIXI_DEVTOOLS__ = { app, stage, renderer }`
    DevtoolsHook,
    /// `window.__PIXI_STAGE__ = stage` without a renderer.
    StageOnly,
    /// Nothing is registered.
    Hidden,
}

#[derive(Debug, Clone)]
pub struct SimOptions {
    /// Plain sprites inside the world render group.
    pub sprites: usize,
    /// v8 pipeline with render groups and instruction sets. When false the
    /// renderer behaves like v7: it draws directly and has no stage table.
    pub render_groups: bool,
    /// Expose a WebGL context with draw primitives.
    pub webgl: bool,
    pub registration: Registration,
    /// Stage that throws (after issuing its draws) once `fail_from_frame`
    /// renders have started.
    pub failing_pipe: Option<String>,
    pub fail_from_frame: u64,
    pub draw_cost_ms: f64,
    pub frame_overhead_ms: f64,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            sprites: 6,
            render_groups: true,
            webgl: true,
            registration: Registration::AppGlobal,
            failing_pipe: None,
            fail_from_frame: 0,
            draw_cost_ms: 0.05,
            frame_overhead_ms: 0.5,
        }
    }
}

// ---------------------------------------------------------------------------
// Renderer behaviour
// ---------------------------------------------------------------------------

struct SimState {
    options: SimOptions,
    clock: Rc<ManualClock>,
    frames: Cell<u64>,
    current_frame: Cell<u64>,
    draws: Cell<u64>,
}

impl SimState {
    fn advance(&self, ms: f64) {
        self.clock.advance(ms);
    }

    fn should_fail(&self, pipe: &str) -> bool {
        self.options.failing_pipe.as_deref() == Some(pipe)
            && self.current_frame.get() >= self.options.fail_from_frame
    }

    fn draw(&self, renderer: &Object, primitive: &str) -> Result<(), Thrown> {
        match renderer.get("gl") {
            Value::Object(gl) => {
                gl.call_method(primitive, &[])?;
            }
            _ => self.draws.set(self.draws.get() + 1),
        }
        self.advance(self.options.draw_cost_ms);
        Ok(())
    }

    fn run_pipe(&self, renderer: &Object, pipe: &str, instruction: &Value) -> Result<Value, Thrown> {
        let action = instruction.get("action");
        let action = action.as_str().unwrap_or_default();
        let (draws, primitive) = match pipe {
            "renderGroup" => {
                let set = instruction.get("renderGroup").get("instructionSet");
                if let Some(set) = set.as_object() {
                    execute_instruction_set(renderer, set)?;
                }
                (0, "drawElements")
            }
            "batch" | "mesh" | "tilingSprite" | "nineSliceSprite" => (1, "drawElements"),
            "stencilMask" if action == "pushMaskBegin" => (1, "drawElements"),
            "filter" if action == "popFilter" => (1, "drawArrays"),
            _ => (0, "drawElements"),
        };
        for _ in 0..draws {
            self.draw(renderer, primitive)?;
        }
        if self.should_fail(pipe) {
            return Err(Thrown::new(format!("simulated {pipe} failure")));
        }
        Ok(Value::Undefined)
    }

    fn render(&self, renderer: &Object, stage: &Object) -> Result<(), Thrown> {
        let frame = self.frames.get();
        self.frames.set(frame + 1);
        self.current_frame.set(frame);

        if self.options.render_groups {
            let set = stage.get_path(&["renderGroup", "instructionSet"]);
            if let Some(set) = set.as_object() {
                execute_instruction_set(renderer, set)?;
            }
        } else {
            for _ in 0..self.options.sprites + 4 {
                self.draw(renderer, "drawElements")?;
            }
        }
        self.advance(self.options.frame_overhead_ms);
        Ok(())
    }
}

fn execute_instruction_set(renderer: &Object, set: &Object) -> Result<(), Thrown> {
    let pipes = renderer.get("renderPipes");
    for instruction in instruction_list(set) {
        let pipe_id = instruction.get("renderPipeId");
        let pipe_id = pipe_id.as_str().unwrap_or_default();
        let Some(pipe) = pipes.get(pipe_id).as_object().cloned() else {
            return Err(Thrown::new(format!("no render pipe named {pipe_id}")));
        };
        pipe.call_method("execute", &[instruction])?;
    }
    Ok(())
}

const PIPES: &[&str] = &[
    "batch",
    "filter",
    "stencilMask",
    "alphaMask",
    "colorMask",
    "mesh",
    "tilingSprite",
    "nineSliceSprite",
    "renderGroup",
];

fn make_pipe(state: &Rc<SimState>, renderer: &WeakObject, name: &'static str) -> Object {
    let state = Rc::clone(state);
    let renderer = renderer.clone();
    let execute = Function::new("execute", move |_, args| {
        let renderer = renderer
            .upgrade()
            .ok_or_else(|| Thrown::new("renderer was destroyed"))?;
        let instruction = args.first().cloned().unwrap_or_default();
        state.run_pipe(&renderer, name, &instruction)
    });
    Object::from_props([
        ("name", Value::from(name)),
        ("execute", Value::from(execute)),
    ])
}

fn make_gl(state: &Rc<SimState>) -> Object {
    let gl = Object::new();
    for primitive in ["drawElements", "drawArrays"] {
        let state = Rc::clone(state);
        gl.set(
            primitive,
            Function::new(primitive, move |_, _| {
                state.draws.set(state.draws.get() + 1);
                Ok(Value::Undefined)
            }),
        );
    }
    gl
}

// ---------------------------------------------------------------------------
// Scene construction
// ---------------------------------------------------------------------------

fn xy(x: f64, y: f64) -> Value {
    Value::from(Object::from_props([("x", Value::from(x)), ("y", Value::from(y))]))
}

fn noop(name: &str) -> Value {
    Value::from(Function::new(name, |_, _| Ok(Value::Undefined)))
}

fn display_node(label: &str, extra: Vec<(&'static str, Value)>) -> Object {
    let node = Object::from_props([
        ("label", Value::from(label)),
        ("parent", Value::Null),
        ("children", Value::from(Array::new())),
        ("x", Value::from(0.0)),
        ("y", Value::from(0.0)),
        ("scale", xy(1.0, 1.0)),
        ("pivot", xy(0.0, 0.0)),
        ("rotation", Value::from(0.0)),
        ("visible", Value::from(true)),
        ("alpha", Value::from(1.0)),
        ("worldAlpha", Value::from(1.0)),
        ("zIndex", Value::from(0.0)),
        ("eventMode", Value::from("passive")),
    ]);
    for (key, value) in extra {
        node.set(key, value);
    }
    node
}

fn add_child(parent: &Object, child: &Object) {
    child.set("parent", parent.clone());
    if let Some(children) = parent.get("children").as_array() {
        children.push(child.clone());
    }
}

fn texture_source(uid: f64, label: &str, size: (f64, f64), mips: f64) -> Object {
    Object::from_props([
        ("uid", Value::from(uid)),
        ("label", Value::from(label)),
        ("width", Value::from(size.0)),
        ("height", Value::from(size.1)),
        ("pixelWidth", Value::from(size.0)),
        ("pixelHeight", Value::from(size.1)),
        ("resolution", Value::from(1.0)),
        ("format", Value::from("rgba8unorm")),
        ("dimension", Value::from("2d")),
        ("mipLevelCount", Value::from(mips)),
        ("autoGenerateMipmaps", Value::from(mips > 1.0)),
        ("alphaMode", Value::from("premultiply-alpha-on-upload")),
        ("antialias", Value::from(false)),
        ("resource", Value::from(Object::new())),
    ])
}

fn texture(source: &Object, label: &str, w: f64, h: f64) -> Value {
    Value::from(Object::from_props([
        ("label", Value::from(label)),
        ("source", Value::from(source.clone())),
        ("width", Value::from(w)),
        ("height", Value::from(h)),
    ]))
}

fn program(name: &str) -> Value {
    Value::from(Object::from_props([(
        "glProgram",
        Value::from(Object::from_props([
            (
                "vertex",
                Value::from(format!("// {name}.vert\nvoid main() {{ gl_Position = vec4(0.0); }}")),
            ),
            (
                "fragment",
                Value::from(format!("// {name}.frag\nvoid main() {{ gl_FragColor = vec4(1.0); }}")),
            ),
        ])),
    )]))
}

fn instruction_set(entries: Vec<Value>) -> Object {
    let size = entries.len();
    Object::from_props([
        ("instructions", Value::from(Array::from_values(entries))),
        ("instructionSize", Value::from(size)),
    ])
}

fn batch(textures: &[&Object], size: f64) -> Value {
    let list: Array = textures.iter().map(|t| Value::from((*t).clone())).collect();
    Value::from(Object::from_props([
        ("renderPipeId", Value::from("batch")),
        ("action", Value::from("renderBatch")),
        ("start", Value::from(0.0)),
        ("size", Value::from(size)),
        ("blendMode", Value::from("normal")),
        (
            "textures",
            Value::from(Object::from_props([
                ("count", Value::from(list.len())),
                ("textures", Value::from(list)),
            ])),
        ),
        (
            "batcher",
            Value::from(Object::from_props([("shader", program("batch"))])),
        ),
    ]))
}

fn step(pipe: &str, action: &str, extra: Vec<(&'static str, Value)>) -> Value {
    let obj = Object::from_props([
        ("renderPipeId", Value::from(pipe)),
        ("action", Value::from(action)),
    ]);
    for (key, value) in extra {
        obj.set(key, value);
    }
    Value::from(obj)
}

struct Scene {
    stage: Object,
    managed_textures: Array,
}

fn build_scene(options: &SimOptions) -> Scene {
    let atlas = texture_source(1.0, "atlas", (1024.0, 1024.0), 11.0);
    let tiles = texture_source(2.0, "tiles", (256.0, 256.0), 1.0);
    let font = texture_source(3.0, "font", (512.0, 512.0), 1.0);
    let panel_tex = texture_source(4.0, "panel", (64.0, 64.0), 1.0);
    let released = texture_source(5.0, "released", (128.0, 128.0), 1.0);
    released.set("resource", Value::Null);

    let stage = display_node("stage", vec![]);

    let background = display_node(
        "background",
        vec![
            ("renderPipeId", Value::from("tilingSprite")),
            ("texture", texture(&tiles, "tiles", 256.0, 256.0)),
            ("anchor", xy(0.0, 0.0)),
            ("tilePosition", xy(0.0, 0.0)),
            ("tileScale", xy(1.0, 1.0)),
            ("width", Value::from(800.0)),
            ("height", Value::from(600.0)),
        ],
    );
    add_child(&stage, &background);

    // World: its own render group.
    let world = display_node("world", vec![("isRenderGroup", Value::from(true))]);
    add_child(&stage, &world);
    let hero = display_node(
        "hero",
        vec![
            ("texture", texture(&atlas, "hero_0", 64.0, 64.0)),
            ("anchor", xy(0.5, 0.5)),
            ("textures", Value::from(Array::new())),
            ("gotoAndPlay", noop("gotoAndPlay")),
            ("eventMode", Value::from("static")),
            ("x", Value::from(400.0)),
            ("y", Value::from(300.0)),
        ],
    );
    add_child(&world, &hero);
    for i in 0..options.sprites {
        let sprite = display_node(
            &format!("coin-{i}"),
            vec![
                ("texture", texture(&atlas, "coin", 32.0, 32.0)),
                ("anchor", xy(0.5, 0.5)),
                ("x", Value::from(40.0 * i as f64)),
                ("y", Value::from(100.0)),
            ],
        );
        add_child(&world, &sprite);
    }
    let terrain = display_node(
        "terrain",
        vec![
            ("renderPipeId", Value::from("mesh")),
            (
                "geometry",
                Value::from(Object::from_props([
                    (
                        "positions",
                        Value::from((0..8).map(|i| Value::from(i as f64)).collect::<Array>()),
                    ),
                    (
                        "indices",
                        Value::from((0..6).map(|i| Value::from(i as f64)).collect::<Array>()),
                    ),
                    ("topology", Value::from("triangle-list")),
                ])),
            ),
            ("shader", program("terrain")),
            ("texture", texture(&tiles, "ground", 256.0, 256.0)),
        ],
    );
    add_child(&world, &terrain);

    // HUD.
    let hud = display_node("hud", vec![("zIndex", Value::from(10.0))]);
    add_child(&stage, &hud);
    let score = display_node(
        "score",
        vec![
            ("text", Value::from("Score: 0")),
            ("style", Value::from(Object::new())),
            ("texture", texture(&atlas, "score-text", 120.0, 24.0)),
            ("anchor", xy(0.0, 0.0)),
        ],
    );
    add_child(&hud, &score);
    let fps_label = display_node(
        "fps",
        vec![
            ("text", Value::from("60")),
            ("renderPipeId", Value::from("bitmapText")),
            ("style", Value::from(Object::new())),
        ],
    );
    add_child(&hud, &fps_label);
    let panel = display_node(
        "panel",
        vec![
            ("renderPipeId", Value::from("nineSliceSprite")),
            ("texture", texture(&panel_tex, "panel", 64.0, 64.0)),
            ("anchor", xy(0.0, 0.0)),
            ("width", Value::from(200.0)),
            ("height", Value::from(80.0)),
            ("leftWidth", Value::from(8.0)),
            ("topHeight", Value::from(8.0)),
            ("rightWidth", Value::from(8.0)),
            ("bottomHeight", Value::from(8.0)),
        ],
    );
    add_child(&hud, &panel);
    let minimap_mask = display_node(
        "minimap-mask",
        vec![
            ("clear", noop("clear")),
            ("context", Value::from(Object::new())),
        ],
    );
    add_child(&hud, &minimap_mask);
    let minimap = display_node(
        "minimap",
        vec![
            ("clear", noop("clear")),
            ("context", Value::from(Object::new())),
            ("mask", Value::from(minimap_mask.clone())),
        ],
    );
    add_child(&hud, &minimap);

    // Devtools overlay the page hides from tooling.
    let overlay = display_node("debug-overlay", vec![("__devtoolIgnore", Value::from(true))]);
    add_child(&overlay, &display_node("overlay-text", vec![]));
    add_child(&stage, &overlay);

    let particles = display_node(
        "particles",
        vec![
            ("particleChildren", Value::from(Array::new())),
            (
                "filters",
                Value::from(Array::from_values(vec![Value::from(Object::from_props([
                    ("label", Value::from("BlurFilter")),
                    ("padding", Value::from(8.0)),
                    ("resolution", Value::from(1.0)),
                    ("glProgram", program("blur").get("glProgram")),
                ]))])),
            ),
        ],
    );
    add_child(&stage, &particles);

    if options.render_groups {
        let world_sources: Vec<&Object> = vec![&atlas];
        let world_set = instruction_set(vec![
            batch(&world_sources, (options.sprites as f64 + 1.0) * 6.0),
            Value::from(terrain.clone()),
        ]);
        world.set(
            "renderGroup",
            Object::from_props([("instructionSet", Value::from(world_set.clone()))]),
        );

        let filter_effect = Object::from_props([("filters", particles.get("filters"))]);
        let root_set = instruction_set(vec![
            Value::from(background.clone()),
            step("renderGroup", "render", vec![("renderGroup", world.get("renderGroup"))]),
            batch(&[&atlas, &font], 12.0),
            Value::from(panel.clone()),
            step(
                "stencilMask",
                "pushMaskBegin",
                vec![(
                    "mask",
                    Value::from(Object::from_props([("mask", Value::from(minimap_mask))])),
                )],
            ),
            step("stencilMask", "pushMaskEnd", vec![]),
            batch(&[], 6.0),
            step("stencilMask", "popMaskBegin", vec![]),
            step("stencilMask", "popMaskEnd", vec![]),
            step(
                "filter",
                "pushFilter",
                vec![("filterEffect", Value::from(filter_effect))],
            ),
            batch(&[&atlas], 600.0),
            step("filter", "popFilter", vec![]),
        ]);
        stage.set(
            "renderGroup",
            Object::from_props([("instructionSet", Value::from(root_set))]),
        );
    }

    let managed_textures = Array::from_values(
        [atlas, tiles, font, panel_tex, released]
            .into_iter()
            .map(Value::from)
            .collect(),
    );

    Scene {
        stage,
        managed_textures,
    }
}

// ---------------------------------------------------------------------------
// SimApp
// ---------------------------------------------------------------------------

/// A simulated page with a running application.
pub struct SimApp {
    realm: Rc<Realm>,
    state: Rc<SimState>,
    app: Object,
    stage: Object,
    renderer: Object,
}

impl SimApp {
    pub fn new(options: SimOptions) -> Self {
        let clock = Rc::new(ManualClock::new());
        let realm = Rc::new(Realm::new(clock.clone()));
        let state = Rc::new(SimState {
            options,
            clock,
            frames: Cell::new(0),
            current_frame: Cell::new(0),
            draws: Cell::new(0),
        });
        let options = &state.options;

        let scene = build_scene(options);
        let renderer = Object::from_props([
            ("name", Value::from(if options.webgl { "webgl" } else { "webgpu" })),
            ("type", Value::from(if options.webgl { 1.0 } else { 2.0 })),
            ("width", Value::from(800.0)),
            ("height", Value::from(600.0)),
            ("resolution", Value::from(1.0)),
            (
                "background",
                Value::from(Object::from_props([
                    ("color", Value::from(f64::from(0x1099bb))),
                    ("alpha", Value::from(1.0)),
                ])),
            ),
            (
                "canvas",
                Value::from(Object::from_props([
                    ("width", Value::from(800.0)),
                    ("height", Value::from(600.0)),
                    ("clientWidth", Value::from(800.0)),
                    ("clientHeight", Value::from(600.0)),
                ])),
            ),
            (
                "texture",
                Value::from(Object::from_props([(
                    "managedTextures",
                    Value::from(scene.managed_textures.clone()),
                )])),
            ),
        ]);
        if options.webgl {
            renderer.set("gl", make_gl(&state));
        }
        if options.render_groups {
            let weak = renderer.downgrade();
            let pipes = Object::new();
            for name in PIPES {
                pipes.set(*name, make_pipe(&state, &weak, *name));
            }
            renderer.set("renderPipes", pipes);
        }
        {
            let state = Rc::clone(&state);
            renderer.set(
                "render",
                Function::new("render", move |this, args| {
                    let renderer = this
                        .as_object()
                        .cloned()
                        .ok_or_else(|| Thrown::new("render called without a renderer"))?;
                    let target = args.first().cloned().unwrap_or_default();
                    // v8 also accepts `{ container }`.
                    let stage = match target.get("container") {
                        Value::Object(container) => container,
                        _ => target
                            .as_object()
                            .cloned()
                            .ok_or_else(|| Thrown::new("render target is not a container"))?,
                    };
                    state.render(&renderer, &stage)?;
                    Ok(Value::Undefined)
                }),
            );
        }

        let ticker = Object::from_props([
            ("FPS", Value::from(0.0)),
            ("deltaMS", Value::from(FRAME_INTERVAL_MS)),
            ("started", Value::from(true)),
        ]);
        let app = Object::from_props([
            ("stage", Value::from(scene.stage.clone())),
            ("renderer", Value::from(renderer.clone())),
            ("ticker", Value::from(ticker)),
        ]);

        let version = if options.render_groups { "8.6.2" } else { "7.4.2" };
        let global = realm.global();
        global.set(
            "PIXI",
            Object::from_props([("VERSION", Value::from(version))]),
        );
        match options.registration {
            Registration::AppGlobal => global.set("__PIXI_APP__", app.clone()),
            Registration::DevtoolsHook => global.set(
                "__PIXI_DEVTOOLS__",
                Object::from_props([
                    ("app", Value::from(app.clone())),
                    ("stage", Value::from(scene.stage.clone())),
                    ("renderer", Value::from(renderer.clone())),
                ]),
            ),
            Registration::StageOnly => global.set("__PIXI_STAGE__", scene.stage.clone()),
            Registration::Hidden => {}
        }

        tracing::debug!(version, "simulated application ready");

        Self {
            realm,
            state,
            app,
            stage: scene.stage,
            renderer,
        }
    }

    pub fn realm(&self) -> &Rc<Realm> {
        &self.realm
    }

    pub fn app(&self) -> &Object {
        &self.app
    }

    pub fn stage(&self) -> &Object {
        &self.stage
    }

    pub fn renderer(&self) -> &Object {
        &self.renderer
    }

    pub fn clock(&self) -> &ManualClock {
        &self.state.clock
    }

    /// Renders started, including ones that threw.
    pub fn frames_rendered(&self) -> u64 {
        self.state.frames.get()
    }

    /// Draw submissions that reached the context.
    pub fn draw_calls_issued(&self) -> u64 {
        self.state.draws.get()
    }

    /// Run one frame of the application loop: advance time, render, update
    /// the ticker, and fire animation-frame callbacks.
    pub fn tick(&self) {
        let before = self.state.clock.now_ms();
        self.state.clock.advance(FRAME_INTERVAL_MS);
        if let Err(err) = self.renderer.call_method("render", &[Value::from(self.stage.clone())]) {
            tracing::warn!(error = %err, "simulated frame failed");
        }
        let elapsed = self.state.clock.now_ms() - before;
        if let Some(ticker) = self.app.get("ticker").as_object() {
            ticker.set("deltaMS", elapsed);
            ticker.set("FPS", 1000.0 / elapsed);
        }
        self.realm.advance_frame();
    }

    pub fn run_frames(&self, frames: usize) {
        for _ in 0..frames {
            self.tick();
        }
    }
}

impl std::fmt::Debug for SimApp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimApp")
            .field("frames", &self.state.frames.get())
            .field("draws", &self.state.draws.get())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_issues_draws() {
        let sim = SimApp::new(SimOptions::default());
        sim.renderer()
            .call_method("render", &[Value::from(sim.stage().clone())])
            .unwrap();
        assert_eq!(sim.frames_rendered(), 1);
        // background, world batch, terrain, hud batch, panel, stencil push,
        // masked batch, particle batch, filter pop
        assert_eq!(sim.draw_calls_issued(), 9);
        assert!(sim.clock().now_ms() > 0.0);
    }

    #[test]
    fn test_failing_pipe_throws_from_configured_frame() {
        let sim = SimApp::new(SimOptions {
            failing_pipe: Some("mesh".to_string()),
            fail_from_frame: 1,
            ..SimOptions::default()
        });
        let stage = Value::from(sim.stage().clone());
        assert!(sim.renderer().call_method("render", &[stage.clone()]).is_ok());
        let err = sim.renderer().call_method("render", &[stage]).unwrap_err();
        assert_eq!(err.message, "simulated mesh failure");
    }

    #[test]
    fn test_legacy_renderer_has_no_pipeline() {
        let sim = SimApp::new(SimOptions {
            render_groups: false,
            ..SimOptions::default()
        });
        assert!(sim.renderer().get("renderPipes").is_undefined());
        assert!(sim.stage().get("renderGroup").is_undefined());
        sim.tick();
        assert_eq!(sim.draw_calls_issued(), 10);
    }

    #[test]
    fn test_tick_updates_ticker_and_frame_callbacks() {
        let sim = SimApp::new(SimOptions::default());
        let fired = Rc::new(Cell::new(0));
        let counter = Rc::clone(&fired);
        sim.realm().on_animation_frame(move |_| counter.set(counter.get() + 1));
        sim.run_frames(3);
        assert_eq!(fired.get(), 3);
        let fps = sim.app().get_path(&["ticker", "FPS"]).as_f64().unwrap();
        assert!(fps > 0.0 && fps < 60.0);
    }
}
