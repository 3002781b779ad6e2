//! Type Classifier: name a display node's kind from its shape.
//!
//! Display nodes carry no reliable class tag across library versions, so the
//! kind is decided by an ordered list of structural predicates. The first
//! predicate that matches wins. Predicates are not mutually exclusive (every
//! sprite also exposes a child list, every bitmap text also has a `text`
//! field), so more specific kinds must come first. The order of
//! [`CLASSIFIERS`] is part of the contract and is covered by tests.

use serde::{Deserialize, Serialize};

use crate::runtime::Object;

/// Semantic kind of a display node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeKind {
    Container,
    Sprite,
    Text,
    BitmapText,
    #[serde(rename = "HTMLText")]
    HtmlText,
    Mesh,
    Graphics,
    AnimatedSprite,
    TilingSprite,
    NineSliceSprite,
    ParticleContainer,
    Unknown,
}

impl NodeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::Container => "Container",
            NodeKind::Sprite => "Sprite",
            NodeKind::Text => "Text",
            NodeKind::BitmapText => "BitmapText",
            NodeKind::HtmlText => "HTMLText",
            NodeKind::Mesh => "Mesh",
            NodeKind::Graphics => "Graphics",
            NodeKind::AnimatedSprite => "AnimatedSprite",
            NodeKind::TilingSprite => "TilingSprite",
            NodeKind::NineSliceSprite => "NineSliceSprite",
            NodeKind::ParticleContainer => "ParticleContainer",
            NodeKind::Unknown => "Unknown",
        }
    }

    /// Key used in per-type stats tables.
    pub fn stats_key(self) -> String {
        self.as_str().to_ascii_lowercase()
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Predicates
// ---------------------------------------------------------------------------

type Predicate = fn(&Object) -> bool;

fn is_fn(node: &Object, key: &str) -> bool {
    node.get(key).is_function()
}

fn pipe_id_is(node: &Object, id: &str) -> bool {
    node.get("renderPipeId").as_str() == Some(id)
}

fn has_text(node: &Object) -> bool {
    node.get("text").as_str().is_some()
}

fn is_animated_sprite(node: &Object) -> bool {
    node.get("textures").is_array() && is_fn(node, "gotoAndPlay")
}

fn is_tiling_sprite(node: &Object) -> bool {
    node.has("tilePosition") && node.has("tileScale")
}

fn is_nine_slice_sprite(node: &Object) -> bool {
    node.has("leftWidth") && node.has("topHeight")
}

fn is_bitmap_text(node: &Object) -> bool {
    has_text(node)
        && (pipe_id_is(node, "bitmapText") || node.has("_bitmapFont") || node.has("fontName"))
}

fn is_html_text(node: &Object) -> bool {
    has_text(node) && (pipe_id_is(node, "htmlText") || node.has("htmlStyle"))
}

fn is_text(node: &Object) -> bool {
    has_text(node) && node.has("style")
}

fn is_particle_container(node: &Object) -> bool {
    node.get("particleChildren").is_array()
}

fn is_graphics(node: &Object) -> bool {
    is_fn(node, "clear") && (node.has("context") || is_fn(node, "lineStyle"))
}

fn is_mesh(node: &Object) -> bool {
    node.has("geometry") && (node.has("shader") || node.has("material"))
}

fn is_sprite(node: &Object) -> bool {
    node.has("texture") && node.has("anchor")
}

/// Ordered (kind, predicate) pairs. Specific kinds precede the kinds they
/// would otherwise also satisfy.
pub const CLASSIFIERS: &[(NodeKind, Predicate)] = &[
    (NodeKind::AnimatedSprite, is_animated_sprite),
    (NodeKind::TilingSprite, is_tiling_sprite),
    (NodeKind::NineSliceSprite, is_nine_slice_sprite),
    (NodeKind::BitmapText, is_bitmap_text),
    (NodeKind::HtmlText, is_html_text),
    (NodeKind::Text, is_text),
    (NodeKind::ParticleContainer, is_particle_container),
    (NodeKind::Graphics, is_graphics),
    (NodeKind::Mesh, is_mesh),
    (NodeKind::Sprite, is_sprite),
];

/// Classify a display node.
pub fn classify(node: &Object) -> NodeKind {
    CLASSIFIERS
        .iter()
        .find(|(_, predicate)| predicate(node))
        .map(|(kind, _)| *kind)
        .unwrap_or_else(|| {
            if node.get("children").is_array() && node.has_own("parent") {
                NodeKind::Container
            } else {
                NodeKind::Unknown
            }
        })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{Array, Function, Value};

    fn container_props() -> Vec<(&'static str, Value)> {
        vec![("children", Value::from(Array::new())), ("parent", Value::Null)]
    }

    fn node(extra: Vec<(&'static str, Value)>) -> Object {
        let mut props = container_props();
        props.extend(extra);
        Object::from_props(props)
    }

    fn noop(name: &str) -> Value {
        Value::from(Function::new(name, |_, _| Ok(Value::Undefined)))
    }

    #[test]
    fn test_plain_container() {
        assert_eq!(classify(&node(vec![])), NodeKind::Container);
    }

    #[test]
    fn test_unknown_without_parent_field() {
        let orphan = Object::from_props([("children", Value::from(Array::new()))]);
        assert_eq!(classify(&orphan), NodeKind::Unknown);
        assert_eq!(classify(&Object::new()), NodeKind::Unknown);
    }

    #[test]
    fn test_sprite_beats_container() {
        let sprite = node(vec![
            ("texture", Value::from(Object::new())),
            ("anchor", Value::from(Object::new())),
        ]);
        assert_eq!(classify(&sprite), NodeKind::Sprite);
    }

    #[test]
    fn test_bitmap_text_beats_text() {
        let text = node(vec![
            ("text", Value::from("score")),
            ("style", Value::from(Object::new())),
            ("renderPipeId", Value::from("bitmapText")),
        ]);
        assert_eq!(classify(&text), NodeKind::BitmapText);
    }

    #[test]
    fn test_html_text_beats_text() {
        let text = node(vec![
            ("text", Value::from("<b>hi</b>")),
            ("style", Value::from(Object::new())),
            ("renderPipeId", Value::from("htmlText")),
        ]);
        assert_eq!(classify(&text), NodeKind::HtmlText);
    }

    #[test]
    fn test_text_that_is_also_a_sprite() {
        // Older versions implement text as a sprite subclass.
        let text = node(vec![
            ("text", Value::from("hello")),
            ("style", Value::from(Object::new())),
            ("texture", Value::from(Object::new())),
            ("anchor", Value::from(Object::new())),
        ]);
        assert_eq!(classify(&text), NodeKind::Text);
    }

    #[test]
    fn test_animated_sprite_beats_sprite() {
        let anim = node(vec![
            ("texture", Value::from(Object::new())),
            ("anchor", Value::from(Object::new())),
            ("textures", Value::from(Array::new())),
            ("gotoAndPlay", noop("gotoAndPlay")),
        ]);
        assert_eq!(classify(&anim), NodeKind::AnimatedSprite);
    }

    #[test]
    fn test_tiling_and_nine_slice_beat_sprite() {
        let tiling = node(vec![
            ("texture", Value::from(Object::new())),
            ("anchor", Value::from(Object::new())),
            ("tilePosition", Value::from(Object::new())),
            ("tileScale", Value::from(Object::new())),
        ]);
        assert_eq!(classify(&tiling), NodeKind::TilingSprite);

        let nine = node(vec![
            ("texture", Value::from(Object::new())),
            ("anchor", Value::from(Object::new())),
            ("leftWidth", Value::from(10.0)),
            ("topHeight", Value::from(10.0)),
        ]);
        assert_eq!(classify(&nine), NodeKind::NineSliceSprite);
    }

    #[test]
    fn test_graphics_beats_mesh() {
        // Older graphics objects carry a geometry and a shader too.
        let graphics = node(vec![
            ("geometry", Value::from(Object::new())),
            ("shader", Value::from(Object::new())),
            ("clear", noop("clear")),
            ("lineStyle", noop("lineStyle")),
        ]);
        assert_eq!(classify(&graphics), NodeKind::Graphics);

        let mesh = node(vec![
            ("geometry", Value::from(Object::new())),
            ("shader", Value::from(Object::new())),
        ]);
        assert_eq!(classify(&mesh), NodeKind::Mesh);
    }

    #[test]
    fn test_particle_container() {
        let pc = node(vec![("particleChildren", Value::from(Array::new()))]);
        assert_eq!(classify(&pc), NodeKind::ParticleContainer);
    }

    #[test]
    fn test_classification_is_idempotent() {
        let text = node(vec![
            ("text", Value::from("a")),
            ("style", Value::from(Object::new())),
        ]);
        let first = classify(&text);
        let second = classify(&text);
        assert_eq!(first, second);
    }

    #[test]
    fn test_classifier_order_is_fixed() {
        let order: Vec<NodeKind> = CLASSIFIERS.iter().map(|(kind, _)| *kind).collect();
        assert_eq!(
            order,
            vec![
                NodeKind::AnimatedSprite,
                NodeKind::TilingSprite,
                NodeKind::NineSliceSprite,
                NodeKind::BitmapText,
                NodeKind::HtmlText,
                NodeKind::Text,
                NodeKind::ParticleContainer,
                NodeKind::Graphics,
                NodeKind::Mesh,
                NodeKind::Sprite,
            ]
        );
    }

    #[test]
    fn test_stats_key_is_lowercase() {
        assert_eq!(NodeKind::BitmapText.stats_key(), "bitmaptext");
        assert_eq!(NodeKind::HtmlText.stats_key(), "htmltext");
    }
}
