//! Renderer description: backend, surface size, and pipeline stages.

use serde::{Deserialize, Serialize};

use crate::error::ProbeResult;
use crate::locate::RootHandle;
use crate::runtime::{Object, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasGeometry {
    pub width: f64,
    pub height: f64,
    pub client_width: Option<f64>,
    pub client_height: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderingInfo {
    pub renderer_type: String,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub resolution: f64,
    pub background_color: Option<String>,
    pub background_alpha: Option<f64>,
    pub canvas: Option<CanvasGeometry>,
    pub pipes: Vec<String>,
    pub render_groups: bool,
    pub version: String,
}

/// Backend name from the renderer's `name`, or its numeric `type` flag.
pub fn renderer_type(renderer: &Object) -> String {
    if let Some(name) = renderer.get("name").as_str() {
        return name.to_string();
    }
    let name = match renderer.get("type").as_f64() {
        Some(t) if t == 1.0 => "webgl",
        Some(t) if t == 2.0 => "webgpu",
        Some(t) if t == 4.0 => "canvas",
        _ => "unknown",
    };
    name.to_string()
}

/// Canvas element geometry. Older renderers call the canvas `view`.
pub fn canvas_geometry(renderer: &Object) -> Option<CanvasGeometry> {
    let canvas = match renderer.get("canvas") {
        c @ Value::Object(_) => c,
        _ => renderer.get("view"),
    };
    canvas.as_object()?;
    Some(CanvasGeometry {
        width: canvas.get("width").as_f64().unwrap_or(0.0),
        height: canvas.get("height").as_f64().unwrap_or(0.0),
        client_width: canvas.get("clientWidth").as_f64(),
        client_height: canvas.get("clientHeight").as_f64(),
    })
}

fn hex_color(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.to_string()),
        Value::Number(n) if n.is_finite() && *n >= 0.0 => {
            Some(format!("#{:06x}", (*n as u64) & 0xff_ffff))
        }
        _ => None,
    }
}

fn background(renderer: &Object) -> (Option<String>, Option<f64>) {
    let bg = renderer.get("background");
    if bg.as_object().is_some() {
        let color = bg.get("color");
        // Colour objects expose their hex form through `toHex`.
        let color = match color.as_object() {
            Some(obj) => obj.call_method("toHex", &[]).ok(),
            None => Some(color),
        };
        return (color.as_ref().and_then(hex_color), bg.get("alpha").as_f64());
    }
    (
        hex_color(&renderer.get("backgroundColor")),
        renderer.get("backgroundAlpha").as_f64(),
    )
}

/// Names of the renderer's pipeline stages, in registration order.
pub fn pipe_names(renderer: &Object) -> Vec<String> {
    renderer
        .get("renderPipes")
        .as_object()
        .map(|pipes| pipes.keys())
        .unwrap_or_default()
}

pub fn rendering_info(roots: &RootHandle) -> ProbeResult<RenderingInfo> {
    let renderer = roots.renderer()?;
    let (background_color, background_alpha) = background(renderer);
    Ok(RenderingInfo {
        renderer_type: renderer_type(renderer),
        width: renderer.get("width").as_f64(),
        height: renderer.get("height").as_f64(),
        resolution: renderer.get("resolution").as_f64().unwrap_or(1.0),
        background_color,
        background_alpha,
        canvas: canvas_geometry(renderer),
        pipes: pipe_names(renderer),
        render_groups: roots.instruction_set().is_some(),
        version: roots.version.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProbeError;

    fn roots(renderer: Option<Object>) -> RootHandle {
        RootHandle {
            application: None,
            stage: Some(Object::new()),
            renderer,
            library: None,
            version: "8.0.0".to_string(),
            source: "test",
        }
    }

    #[test]
    fn test_no_renderer() {
        let err = rendering_info(&roots(None)).unwrap_err();
        assert_eq!(err, ProbeError::NoRenderer);
        assert_eq!(err.to_string(), "No renderer found");
    }

    #[test]
    fn test_type_from_flag() {
        let r = Object::from_props([("type", Value::from(2.0))]);
        assert_eq!(renderer_type(&r), "webgpu");
        assert_eq!(renderer_type(&Object::new()), "unknown");
    }

    #[test]
    fn test_full_description() {
        let pipes = Object::from_props([
            ("batch", Value::from(Object::new())),
            ("filter", Value::from(Object::new())),
        ]);
        let canvas = Object::from_props([
            ("width", Value::from(1600.0)),
            ("height", Value::from(1200.0)),
            ("clientWidth", Value::from(800.0)),
        ]);
        let renderer = Object::from_props([
            ("name", Value::from("webgl")),
            ("width", Value::from(800.0)),
            ("height", Value::from(600.0)),
            ("resolution", Value::from(2.0)),
            ("renderPipes", Value::from(pipes)),
            ("canvas", Value::from(canvas)),
            (
                "background",
                Value::from(Object::from_props([
                    ("color", Value::from(1_087_931.0)),
                    ("alpha", Value::from(1.0)),
                ])),
            ),
        ]);
        let info = rendering_info(&roots(Some(renderer))).unwrap();
        assert_eq!(info.renderer_type, "webgl");
        assert_eq!(info.pipes, vec!["batch", "filter"]);
        assert_eq!(info.background_color.as_deref(), Some("#1099bb"));
        assert_eq!(info.canvas.unwrap().client_width, Some(800.0));
        assert!(!info.render_groups);
    }

    #[test]
    fn test_legacy_view_and_background() {
        let view = Object::from_props([("width", Value::from(10.0)), ("height", Value::from(20.0))]);
        let renderer = Object::from_props([
            ("view", Value::from(view)),
            ("backgroundColor", Value::from(0.0)),
        ]);
        assert_eq!(canvas_geometry(&renderer).unwrap().height, 20.0);
        assert_eq!(background(&renderer).0.as_deref(), Some("#000000"));
    }
}
