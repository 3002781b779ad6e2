//! The injected agent: one namespaced global exposing every probe operation.
//!
//! Every method returns a plain JSON-compatible value. Failures are returned
//! as `{"error": "<reason>"}` rather than thrown, because results cross the
//! transport by copy and callers tell success from failure by the presence of
//! the `error` key.
//!
//! Installing twice is safe. The second install replaces the namespace and
//! the previous agent's frame counter stops receiving frames.

use std::cell::{Cell, RefCell, RefMut};
use std::rc::{Rc, Weak};

use serde::Serialize;
use serde_json::json;

use crate::benchmark::run_benchmark;
use crate::capture::capture_frame;
use crate::error::{ProbeError, ProbeResult};
use crate::fps::FrameRateCounter;
use crate::ids::NodeIds;
use crate::locate::{require, RootHandle};
use crate::rendering::rendering_info;
use crate::runtime::{FrameCallbackId, Function, Object, Realm, Thrown, Value, WeakObject};
use crate::snapshot::{instructions_report, page_info, scene_graph, scene_stats, snapshot_all};
use crate::textures::collect_textures;

/// Global the agent installs itself under.
pub const NAMESPACE: &str = "__PIXISCOPE__";

/// Error text returned by a guarded call when the page has no agent.
pub const AGENT_MISSING: &str = "pixiscope agent is not installed in this page";

/// Default benchmark duration when the caller passes none.
pub const DEFAULT_BENCHMARK_MS: f64 = 5000.0;

/// Browser-side build of the agent. Evaluating it installs [`NAMESPACE`] on
/// the page global with the same methods, reply shapes and error strings as
/// [`Agent`]. Evaluating it again replaces the namespace, as
/// [`Agent::install`] does.
pub const AGENT_SCRIPT: &str = include_str!("../js/agent.js");

// ---------------------------------------------------------------------------
// Methods
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    GetInfo,
    GetSceneGraph,
    GetStats,
    GetRendering,
    GetTextures,
    GetInstructions,
    GetFps,
    GetAll,
    Capture,
    Benchmark,
}

impl Method {
    pub const ALL: [Method; 10] = [
        Method::GetInfo,
        Method::GetSceneGraph,
        Method::GetStats,
        Method::GetRendering,
        Method::GetTextures,
        Method::GetInstructions,
        Method::GetFps,
        Method::GetAll,
        Method::Capture,
        Method::Benchmark,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Method::GetInfo => "getInfo",
            Method::GetSceneGraph => "getSceneGraph",
            Method::GetStats => "getStats",
            Method::GetRendering => "getRendering",
            Method::GetTextures => "getTextures",
            Method::GetInstructions => "getInstructions",
            Method::GetFps => "getFps",
            Method::GetAll => "getAll",
            Method::Capture => "capture",
            Method::Benchmark => "benchmark",
        }
    }

    pub fn from_name(name: &str) -> Option<Method> {
        Method::ALL.into_iter().find(|m| m.name() == name)
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Page expression calling `method` with JSON arguments.
pub fn call_expression(method: Method, args: &[serde_json::Value]) -> String {
    let args: Vec<String> = args.iter().map(serde_json::Value::to_string).collect();
    format!("{NAMESPACE}.{}({})", method.name(), args.join(", "))
}

/// Like [`call_expression`], but evaluates to `{"error": AGENT_MISSING}`
/// instead of throwing when the namespace is absent.
pub fn guarded_call_expression(method: Method, args: &[serde_json::Value]) -> String {
    format!(
        "(globalThis.{NAMESPACE} ? {} : {{ error: {} }})",
        call_expression(method, args),
        serde_json::Value::from(AGENT_MISSING)
    )
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

pub struct Agent {
    realm: Weak<Realm>,
    namespace: WeakObject,
    ids: RefCell<NodeIds>,
    fps: RefCell<FrameRateCounter>,
    frame_callback: Cell<Option<FrameCallbackId>>,
}

fn to_json<T: Serialize>(value: T) -> ProbeResult<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| ProbeError::InvalidArgument(e.to_string()))
}

fn duration_arg(args: &[serde_json::Value]) -> ProbeResult<f64> {
    match args.first() {
        None | Some(serde_json::Value::Null) => Ok(DEFAULT_BENCHMARK_MS),
        Some(v) => v
            .as_f64()
            .ok_or_else(|| ProbeError::InvalidArgument(format!("duration must be a number, got {v}"))),
    }
}

impl Agent {
    /// Install the namespace into `realm` and start the frame counter.
    pub fn install(realm: &Rc<Realm>) -> Rc<Agent> {
        let namespace = Object::new();
        let agent = Rc::new(Agent {
            realm: Rc::downgrade(realm),
            namespace: namespace.downgrade(),
            ids: RefCell::new(NodeIds::new()),
            fps: RefCell::new(FrameRateCounter::new()),
            frame_callback: Cell::new(None),
        });

        let weak = Rc::downgrade(&agent);
        let callback = realm.on_animation_frame(move |now| {
            let Some(agent) = weak.upgrade() else {
                return;
            };
            if agent.is_installed() {
                agent.fps.borrow_mut().record_frame(now);
            } else {
                agent.retire();
            }
        });
        agent.frame_callback.set(Some(callback));

        for method in Method::ALL {
            let agent = Rc::clone(&agent);
            namespace.set(
                method.name(),
                Function::new(method.name(), move |_, args| {
                    let args: Vec<serde_json::Value> = args
                        .iter()
                        .map(|a| a.to_json().unwrap_or(serde_json::Value::Null))
                        .collect();
                    Ok(Value::from_json(&agent.call(method, &args)))
                }),
            );
        }
        realm.global().set(NAMESPACE, namespace);
        tracing::debug!(namespace = NAMESPACE, "agent installed");
        agent
    }

    /// Run one method. Failures come back as `{"error": ...}`.
    pub fn call(&self, method: Method, args: &[serde_json::Value]) -> serde_json::Value {
        match self.dispatch(method, args) {
            Ok(value) => value,
            Err(err) => {
                tracing::debug!(method = %method, error = %err, "agent method failed");
                json!({ "error": err.to_string() })
            }
        }
    }

    pub fn restart_frame_counter(&self) {
        self.fps.borrow_mut().restart();
    }

    /// True while the realm's namespace global is still this agent's.
    pub fn is_installed(&self) -> bool {
        let (Some(realm), Some(namespace)) = (self.realm.upgrade(), self.namespace.upgrade()) else {
            return false;
        };
        realm
            .global_value(NAMESPACE)
            .as_object()
            .is_some_and(|current| current.ptr_eq(&namespace))
    }

    /// Stop receiving animation frames.
    fn retire(&self) {
        if let (Some(realm), Some(id)) = (self.realm.upgrade(), self.frame_callback.take()) {
            realm.cancel_animation_frame(id);
            tracing::debug!("replaced agent stopped counting frames");
        }
    }

    fn ids(&self) -> ProbeResult<RefMut<'_, NodeIds>> {
        self.ids.try_borrow_mut().map_err(|_| ProbeError::Busy)
    }

    fn realm(&self) -> ProbeResult<Rc<Realm>> {
        self.realm.upgrade().ok_or(ProbeError::NoApplication)
    }

    fn roots(&self, realm: &Realm) -> ProbeResult<RootHandle> {
        require(realm.global())
    }

    fn ticker_fps(roots: Option<&RootHandle>) -> Option<f64> {
        roots?
            .application
            .as_ref()?
            .get_path(&["ticker", "FPS"])
            .as_f64()
    }

    fn dispatch(&self, method: Method, args: &[serde_json::Value]) -> ProbeResult<serde_json::Value> {
        let realm = self.realm()?;
        let global = realm.global();
        match method {
            Method::GetInfo => to_json(page_info(global)),
            Method::GetSceneGraph => {
                let roots = self.roots(&realm)?;
                to_json(scene_graph(&roots, &mut *self.ids()?)?)
            }
            Method::GetStats => to_json(scene_stats(&self.roots(&realm)?)?),
            Method::GetRendering => to_json(rendering_info(&self.roots(&realm)?)?),
            Method::GetTextures => {
                let roots = self.roots(&realm)?;
                to_json(collect_textures(roots.renderer()?)?)
            }
            Method::GetInstructions => {
                let roots = self.roots(&realm)?;
                to_json(instructions_report(&roots, &mut *self.ids()?)?)
            }
            Method::GetFps => {
                let roots = crate::locate::locate(global);
                to_json(self.fps.borrow().reading(Self::ticker_fps(roots.as_ref())))
            }
            Method::GetAll => {
                let roots = crate::locate::locate(global);
                let fps = self.fps.borrow().reading(Self::ticker_fps(roots.as_ref()));
                to_json(snapshot_all(global, &mut *self.ids()?, fps)?)
            }
            Method::Capture => {
                let roots = self.roots(&realm)?;
                to_json(capture_frame(&realm, &roots, &self.ids)?)
            }
            Method::Benchmark => {
                let duration = duration_arg(args)?;
                let roots = self.roots(&realm)?;
                to_json(run_benchmark(&realm, &roots, duration)?)
            }
        }
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        self.retire();
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tracked = self.ids.try_borrow().map(|ids| ids.live_count()).ok();
        f.debug_struct("Agent")
            .field("tracked_nodes", &tracked)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// In-process evaluation
// ---------------------------------------------------------------------------

/// Parse `__PIXISCOPE__.method(arg, ...)` into its method name and
/// arguments. Arguments must be JSON literals.
pub fn parse_call_expression(expression: &str) -> Option<(String, Vec<serde_json::Value>)> {
    let rest = expression.trim().strip_prefix(NAMESPACE)?.strip_prefix('.')?;
    let open = rest.find('(')?;
    let name = rest[..open].trim();
    let args = rest[open + 1..].trim_end().strip_suffix(')')?;
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    let args: Vec<serde_json::Value> = serde_json::from_str(&format!("[{args}]")).ok()?;
    Some((name.to_string(), args))
}

/// Evaluate a namespace call inside `realm` the way a page would: the
/// namespace is looked up on the global object at call time, and the result
/// is marshalled by copy. `Ok(None)` is an `undefined` result.
pub fn evaluate(realm: &Realm, expression: &str) -> Result<Option<serde_json::Value>, Thrown> {
    let Some((name, args)) = parse_call_expression(expression) else {
        return Err(Thrown::new(format!(
            "SyntaxError: unsupported expression: {expression}"
        )));
    };
    let namespace = match realm.global_value(NAMESPACE) {
        Value::Object(ns) => ns,
        _ => return Err(Thrown::new(format!("ReferenceError: {NAMESPACE} is not defined"))),
    };
    let args: Vec<Value> = args.iter().map(Value::from_json).collect();
    Ok(namespace.call_method(&name, &args)?.to_json())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{Registration, SimApp, SimOptions};

    fn installed(options: SimOptions) -> (SimApp, Rc<Agent>) {
        let sim = SimApp::new(options);
        let agent = Agent::install(sim.realm());
        (sim, agent)
    }

    #[test]
    fn test_method_names_round_trip() {
        for method in Method::ALL {
            assert_eq!(Method::from_name(method.name()), Some(method));
        }
        assert_eq!(Method::from_name("nope"), None);
    }

    #[test]
    fn test_namespace_exposes_every_method() {
        let (sim, _agent) = installed(SimOptions::default());
        let ns = sim.realm().global_value(NAMESPACE);
        for method in Method::ALL {
            assert!(ns.get(method.name()).is_function(), "{method} missing");
        }
    }

    #[test]
    fn test_reinstall_overwrites() {
        let (sim, first) = installed(SimOptions::default());
        let before = sim.realm().global_value(NAMESPACE);
        let second = Agent::install(sim.realm());
        let after = sim.realm().global_value(NAMESPACE);
        assert!(!before.as_object().unwrap().ptr_eq(after.as_object().unwrap()));
        drop(first);
        sim.run_frames(70);
        let fps = second.call(Method::GetFps, &[]);
        assert_eq!(fps["samples"], 1);
    }

    #[test]
    fn test_reinstall_releases_frame_callback() {
        let (sim, first) = installed(SimOptions::default());
        let second = Agent::install(sim.realm());
        assert_eq!(sim.realm().frame_callback_count(), 2);
        assert!(!first.is_installed());
        assert!(second.is_installed());

        sim.tick();
        assert_eq!(sim.realm().frame_callback_count(), 1);
        assert_eq!(first.call(Method::GetFps, &[])["totalFrames"], 0);

        drop(second);
        let _third = Agent::install(sim.realm());
        assert_eq!(sim.realm().frame_callback_count(), 1);
    }

    #[test]
    fn test_page_callback_during_capture() {
        let (sim, agent) = installed(SimOptions::default());
        let batch = sim.renderer().get_path(&["renderPipes", "batch"]);
        let batch = batch.as_object().unwrap().clone();
        let original = batch.get("execute").as_function().unwrap().clone();
        let realm = Rc::downgrade(sim.realm());
        let nested = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&nested);
        batch.set(
            "execute",
            Function::new("execute", move |this, args| {
                if let Some(realm) = realm.upgrade() {
                    let reply = evaluate(&realm, "__PIXISCOPE__.getSceneGraph()")?;
                    sink.borrow_mut().extend(reply);
                }
                original.call(this, args)
            }),
        );

        let capture = agent.call(Method::Capture, &[]);
        assert!(capture.get("error").is_none(), "{capture}");
        let nested = nested.borrow();
        assert!(!nested.is_empty());
        assert!(nested.iter().all(|reply| reply["children"].is_array()));
    }

    #[test]
    fn test_errors_are_payloads() {
        let (_sim, agent) = installed(SimOptions {
            registration: Registration::Hidden,
            ..SimOptions::default()
        });
        assert_eq!(
            agent.call(Method::GetStats, &[]),
            json!({ "error": "No PixiJS application found" })
        );
        assert_eq!(agent.call(Method::GetInfo, &[])["found"], false);
    }

    #[test]
    fn test_benchmark_argument_checked() {
        let (_sim, agent) = installed(SimOptions::default());
        let reply = agent.call(Method::Benchmark, &[json!("fast")]);
        assert!(reply["error"].as_str().unwrap().starts_with("Invalid argument"));
        let reply = agent.call(Method::Benchmark, &[json!(50)]);
        assert!(reply["frameCount"].as_u64().unwrap() > 0);
    }

    #[test]
    fn test_parse_call_expression() {
        assert_eq!(
            parse_call_expression("__PIXISCOPE__.benchmark(250)"),
            Some(("benchmark".to_string(), vec![json!(250)]))
        );
        assert_eq!(
            parse_call_expression(&call_expression(Method::GetStats, &[])),
            Some(("getStats".to_string(), vec![]))
        );
        assert!(parse_call_expression("window.alert(1)").is_none());
        assert!(parse_call_expression("__PIXISCOPE__.x(1").is_none());
    }

    #[test]
    fn test_evaluate_through_namespace() {
        let (sim, _agent) = installed(SimOptions::default());
        let stats = evaluate(sim.realm(), "__PIXISCOPE__.getStats()")
            .unwrap()
            .unwrap();
        assert!(stats["total"].as_u64().unwrap() > 1);
    }

    #[test]
    fn test_evaluate_without_agent() {
        let sim = SimApp::new(SimOptions::default());
        let err = evaluate(sim.realm(), "__PIXISCOPE__.getStats()").unwrap_err();
        assert!(err.message.contains("is not defined"));
    }

    #[test]
    fn test_page_script_exposes_every_method() {
        assert!(AGENT_SCRIPT.contains(&format!("var NAMESPACE = '{NAMESPACE}';")));
        for method in Method::ALL {
            assert!(
                AGENT_SCRIPT.contains(&format!("    {}: method(", method.name())),
                "{method} missing from page script"
            );
        }
    }

    #[test]
    fn test_page_script_error_strings_match() {
        let errors = [
            ProbeError::NoApplication,
            ProbeError::NoStage,
            ProbeError::NoRenderer,
            ProbeError::NoRendererOrStage,
            ProbeError::CaptureUnsupported,
            ProbeError::InstructionsUnsupported,
            ProbeError::NoTextureSystem,
            ProbeError::Busy,
        ];
        for err in errors {
            assert!(AGENT_SCRIPT.contains(&format!("'{err}'")), "{err:?} text differs");
        }
        assert!(AGENT_SCRIPT.contains("'Invalid argument: '"));
        assert!(AGENT_SCRIPT.contains("'Render failed during '"));
    }

    #[test]
    fn test_guarded_expression_shape() {
        let expr = guarded_call_expression(Method::GetInfo, &[]);
        assert!(expr.starts_with("(globalThis.__PIXISCOPE__ ? __PIXISCOPE__.getInfo()"));
        assert!(expr.contains(AGENT_MISSING));
    }
}
