//! Object Locator: find the application, display root, and renderer.
//!
//! Pages register their PixiJS objects in different ways depending on the
//! library version and on whether the devtools hook was set up. The locator
//! tries a fixed list of registration points in priority order and takes the
//! first one that exposes anything at all. Finding nothing is not an error.

use crate::error::{ProbeError, ProbeResult};
use crate::runtime::{Object, Value};

/// Global holding the library namespace, when the page loaded a bundle.
const LIBRARY_GLOBAL: &str = "PIXI";

// ---------------------------------------------------------------------------
// RootHandle
// ---------------------------------------------------------------------------

/// The objects the rest of the probe works from.
#[derive(Debug, Clone)]
pub struct RootHandle {
    pub application: Option<Object>,
    pub stage: Option<Object>,
    pub renderer: Option<Object>,
    pub library: Option<Object>,
    /// Library version string, or `"unknown"`.
    pub version: String,
    /// Which registration point matched.
    pub source: &'static str,
}

impl RootHandle {
    pub fn stage(&self) -> ProbeResult<&Object> {
        self.stage.as_ref().ok_or(ProbeError::NoStage)
    }

    pub fn renderer(&self) -> ProbeResult<&Object> {
        self.renderer.as_ref().ok_or(ProbeError::NoRenderer)
    }

    /// Both objects needed to issue a render.
    pub fn render_target(&self) -> ProbeResult<(&Object, &Object)> {
        match (&self.renderer, &self.stage) {
            (Some(renderer), Some(stage)) => Ok((renderer, stage)),
            _ => Err(ProbeError::NoRendererOrStage),
        }
    }

    /// Leading component of the version string.
    pub fn major_version(&self) -> Option<u32> {
        self.version
            .split('.')
            .next()
            .and_then(|major| major.trim_start_matches('v').parse().ok())
    }

    /// The display root's render group instruction set, if this library
    /// version builds one.
    pub fn instruction_set(&self) -> Option<Object> {
        let stage = self.stage.as_ref()?;
        stage
            .get_path(&["renderGroup", "instructionSet"])
            .as_object()
            .cloned()
    }
}

// ---------------------------------------------------------------------------
// Registration points
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Found {
    application: Option<Object>,
    stage: Option<Object>,
    renderer: Option<Object>,
    version: Option<String>,
}

impl Found {
    fn is_empty(&self) -> bool {
        self.application.is_none() && self.stage.is_none() && self.renderer.is_none()
    }
}

struct Candidate {
    source: &'static str,
    probe: fn(&Object) -> Found,
}

/// Registration points in priority order.
const CANDIDATES: &[Candidate] = &[
    Candidate {
        source: "__PIXI_DEVTOOLS__",
        probe: probe_devtools_hook,
    },
    Candidate {
        source: "__PIXI_APP__",
        probe: probe_app_global,
    },
    Candidate {
        source: "__PIXI_STAGE__",
        probe: probe_split_globals,
    },
    Candidate {
        source: "app",
        probe: probe_conventional_app,
    },
];

fn object_at(obj: &Object, key: &str) -> Option<Object> {
    obj.get(key).as_object().cloned()
}

fn probe_devtools_hook(global: &Object) -> Found {
    let Some(hook) = object_at(global, "__PIXI_DEVTOOLS__") else {
        return Found::default();
    };
    Found {
        application: object_at(&hook, "app"),
        stage: object_at(&hook, "stage"),
        renderer: object_at(&hook, "renderer"),
        version: hook.get("version").as_str().map(str::to_string),
    }
}

fn probe_app_global(global: &Object) -> Found {
    Found {
        application: object_at(global, "__PIXI_APP__"),
        ..Found::default()
    }
}

fn probe_split_globals(global: &Object) -> Found {
    Found {
        stage: object_at(global, "__PIXI_STAGE__"),
        renderer: object_at(global, "__PIXI_RENDERER__"),
        ..Found::default()
    }
}

/// A plain `app` global only counts if it looks like an application.
fn probe_conventional_app(global: &Object) -> Found {
    let candidate = global.get("app");
    if !looks_like_application(&candidate) {
        return Found::default();
    }
    Found {
        application: candidate.as_object().cloned(),
        ..Found::default()
    }
}

fn looks_like_application(value: &Value) -> bool {
    value.as_object().is_some_and(|app| {
        app.get("stage").as_object().is_some() && app.get("renderer").as_object().is_some()
    })
}

// ---------------------------------------------------------------------------
// locate
// ---------------------------------------------------------------------------

/// Find the inspection roots. Returns `None` when no registration point
/// exposes an application, display root, or renderer.
pub fn locate(global: &Object) -> Option<RootHandle> {
    let (source, found) = CANDIDATES.iter().find_map(|candidate| {
        let found = (candidate.probe)(global);
        (!found.is_empty()).then_some((candidate.source, found))
    })?;

    let stage = found
        .stage
        .or_else(|| found.application.as_ref().and_then(|app| object_at(app, "stage")));
    let renderer = found
        .renderer
        .or_else(|| found.application.as_ref().and_then(|app| object_at(app, "renderer")));
    let library = object_at(global, LIBRARY_GLOBAL);

    let version = library
        .as_ref()
        .and_then(|lib| lib.get("VERSION").as_str().map(str::to_string))
        .or(found.version)
        .unwrap_or_else(|| "unknown".to_string());

    tracing::debug!(source, version = %version, "located inspection roots");

    Some(RootHandle {
        application: found.application,
        stage,
        renderer,
        library,
        version,
        source,
    })
}

/// Like [`locate`], but reports absence as [`ProbeError::NoApplication`].
pub fn require(global: &Object) -> ProbeResult<RootHandle> {
    locate(global).ok_or(ProbeError::NoApplication)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
