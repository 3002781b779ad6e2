//! Instruction Tree Builder.
//!
//! A render group's instruction set is a flat, pre-order array. Each entry
//! names the pipeline stage that will execute it in `renderPipeId`. Only
//! render-group entries nest: they carry their own instruction set, which is
//! expanded in place as that entry's children.
//!
//! Indices are global across the whole build, in the same order the
//! renderer executes the instructions, so a capture's draw-order log and its
//! instruction tree can be lined up entry for entry.

use serde::{Deserialize, Serialize};

use crate::classify::{classify, NodeKind};
use crate::ids::{NodeId, NodeIds};
use crate::runtime::{Object, Value};
use crate::scene::Point;

// ---------------------------------------------------------------------------
// Output types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstructionNode {
    pub index: usize,
    /// Pipeline stage that executes this instruction.
    pub pipe: String,
    pub payload: InstructionPayload,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<InstructionNode>,
}

impl InstructionNode {
    /// All instructions of this subtree in execution order.
    pub fn flatten(&self) -> Vec<&InstructionNode> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(node.children.iter().rev());
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum InstructionPayload {
    #[serde(rename_all = "camelCase")]
    Batch {
        action: Option<String>,
        start: Option<f64>,
        size: Option<f64>,
        blend_mode: Option<String>,
        textures: Vec<TextureDescriptor>,
        shader: Option<ShaderSource>,
    },
    #[serde(rename_all = "camelCase")]
    Filter {
        action: Option<String>,
        filters: Vec<FilterSummary>,
    },
    #[serde(rename_all = "camelCase")]
    Mask {
        variant: String,
        action: Option<String>,
        mask: Option<NodeRef>,
    },
    #[serde(rename_all = "camelCase")]
    Mesh {
        target: Option<NodeRef>,
        geometry: Option<GeometrySummary>,
        texture: Option<TextureDescriptor>,
        shader: Option<ShaderSource>,
    },
    #[serde(rename_all = "camelCase")]
    TilingSprite {
        target: Option<NodeRef>,
        texture: Option<TextureDescriptor>,
        width: Option<f64>,
        height: Option<f64>,
        tile_position: Option<Point>,
        tile_scale: Option<Point>,
    },
    #[serde(rename_all = "camelCase")]
    NineSliceSprite {
        target: Option<NodeRef>,
        texture: Option<TextureDescriptor>,
        width: Option<f64>,
        height: Option<f64>,
        left_width: Option<f64>,
        top_height: Option<f64>,
        right_width: Option<f64>,
        bottom_height: Option<f64>,
    },
    #[serde(rename_all = "camelCase")]
    RenderGroup { child_count: usize },
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextureDescriptor {
    pub uid: Option<f64>,
    pub label: Option<String>,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub format: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShaderSource {
    pub vertex: String,
    pub fragment: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterSummary {
    pub name: Option<String>,
    pub padding: Option<f64>,
    pub resolution: Option<f64>,
    pub shader: Option<ShaderSource>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeometrySummary {
    pub vertex_count: Option<usize>,
    pub index_count: Option<usize>,
    pub topology: Option<String>,
}

/// A display node referenced from an instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRef {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    pub name: Option<String>,
}

// ---------------------------------------------------------------------------
// Payload extraction
// ---------------------------------------------------------------------------

const MASK_PIPES: &[&str] = &[
    "stencilMask",
    "alphaMask",
    "colorMask",
    "scissorMask",
];

fn string_at(value: &Value, key: &str) -> Option<String> {
    value.get(key).as_str().map(str::to_string)
}

fn number_at(value: &Value, key: &str) -> Option<f64> {
    value.get(key).as_f64()
}

fn point_at(value: &Value, key: &str) -> Option<Point> {
    let p = value.get(key);
    Some(Point {
        x: p.get("x").as_f64()?,
        y: p.get("y").as_f64()?,
    })
}

fn array_len(value: &Value) -> Option<usize> {
    value.as_array().map(|a| a.len())
}

/// Describe a texture or a texture source.
pub(crate) fn texture_descriptor(value: &Value) -> Option<TextureDescriptor> {
    value.as_object()?;
    let source = match value.get("source") {
        source @ Value::Object(_) => source,
        _ => value.clone(),
    };
    Some(TextureDescriptor {
        uid: number_at(&source, "uid").or_else(|| number_at(value, "uid")),
        label: string_at(value, "label").or_else(|| string_at(&source, "label")),
        width: number_at(value, "width").or_else(|| number_at(&source, "width")),
        height: number_at(value, "height").or_else(|| number_at(&source, "height")),
        format: string_at(&source, "format"),
    })
}

/// Shader source text from a WebGL program, falling back to a WebGPU one.
fn shader_source(shader: &Value) -> Option<ShaderSource> {
    let gl = shader.get("glProgram");
    if let (Some(vertex), Some(fragment)) = (gl.get("vertex").as_str(), gl.get("fragment").as_str())
    {
        return Some(ShaderSource {
            vertex: vertex.to_string(),
            fragment: fragment.to_string(),
        });
    }
    let gpu = shader.get("gpuProgram");
    let vertex = gpu.get("vertex").get("source");
    let fragment = gpu.get("fragment").get("source");
    Some(ShaderSource {
        vertex: vertex.as_str()?.to_string(),
        fragment: fragment.as_str()?.to_string(),
    })
}

fn node_ref(value: &Value, ids: &mut NodeIds) -> Option<NodeRef> {
    let node = value.as_object()?;
    Some(NodeRef {
        id: ids.get_or_assign(node),
        kind: classify(node),
        name: ["label", "name"]
            .iter()
            .find_map(|key| string_at(value, key).filter(|s| !s.is_empty())),
    })
}

fn batch_payload(instruction: &Value) -> InstructionPayload {
    let textures = instruction
        .get("textures")
        .get("textures")
        .as_array()
        .map(|list| {
            let count = instruction
                .get("textures")
                .get("count")
                .as_f64()
                .map(|c| c as usize)
                .unwrap_or(list.len());
            list.to_vec()
                .iter()
                .take(count)
                .filter_map(texture_descriptor)
                .collect()
        })
        .unwrap_or_default();
    let shader = shader_source(&instruction.get("batcher").get("shader"))
        .or_else(|| shader_source(&instruction.get("shader")));
    InstructionPayload::Batch {
        action: string_at(instruction, "action"),
        start: number_at(instruction, "start"),
        size: number_at(instruction, "size"),
        blend_mode: string_at(instruction, "blendMode"),
        textures,
        shader,
    }
}

fn filter_payload(instruction: &Value) -> InstructionPayload {
    let filters = instruction
        .get("filterEffect")
        .get("filters")
        .as_array()
        .map(|list| {
            list.to_vec()
                .iter()
                .filter(|f| f.as_object().is_some())
                .map(|f| FilterSummary {
                    name: string_at(f, "label").or_else(|| string_at(f, "name")),
                    padding: number_at(f, "padding"),
                    resolution: number_at(f, "resolution"),
                    shader: shader_source(f),
                })
                .collect()
        })
        .unwrap_or_default();
    InstructionPayload::Filter {
        action: string_at(instruction, "action"),
        filters,
    }
}

fn mask_payload(pipe: &str, instruction: &Value, ids: &mut NodeIds) -> InstructionPayload {
    // Mask effects wrap the masking node in their own `mask` field.
    let effect = instruction.get("mask");
    let target = match effect.get("mask") {
        inner @ Value::Object(_) => inner,
        _ => effect,
    };
    InstructionPayload::Mask {
        variant: pipe.to_string(),
        action: string_at(instruction, "action"),
        mask: node_ref(&target, ids),
    }
}

fn mesh_payload(instruction: &Value, ids: &mut NodeIds) -> InstructionPayload {
    let geometry = instruction.get("geometry");
    let geometry = geometry.as_object().map(|_| GeometrySummary {
        vertex_count: array_len(&geometry.get("positions")).map(|n| n / 2),
        index_count: array_len(&geometry.get("indices")),
        topology: string_at(&geometry, "topology"),
    });
    InstructionPayload::Mesh {
        target: node_ref(instruction, ids),
        geometry,
        texture: texture_descriptor(&instruction.get("texture")),
        shader: shader_source(&instruction.get("shader")),
    }
}

fn tiling_sprite_payload(instruction: &Value, ids: &mut NodeIds) -> InstructionPayload {
    InstructionPayload::TilingSprite {
        target: node_ref(instruction, ids),
        texture: texture_descriptor(&instruction.get("texture")),
        width: number_at(instruction, "width"),
        height: number_at(instruction, "height"),
        tile_position: point_at(instruction, "tilePosition"),
        tile_scale: point_at(instruction, "tileScale"),
    }
}

fn nine_slice_payload(instruction: &Value, ids: &mut NodeIds) -> InstructionPayload {
    InstructionPayload::NineSliceSprite {
        target: node_ref(instruction, ids),
        texture: texture_descriptor(&instruction.get("texture")),
        width: number_at(instruction, "width"),
        height: number_at(instruction, "height"),
        left_width: number_at(instruction, "leftWidth"),
        top_height: number_at(instruction, "topHeight"),
        right_width: number_at(instruction, "rightWidth"),
        bottom_height: number_at(instruction, "bottomHeight"),
    }
}

fn payload(pipe: &str, instruction: &Value, nested: usize, ids: &mut NodeIds) -> InstructionPayload {
    match pipe {
        "batch" => batch_payload(instruction),
        "filter" => filter_payload(instruction),
        p if MASK_PIPES.contains(&p) => mask_payload(p, instruction, ids),
        "mesh" => mesh_payload(instruction, ids),
        "tilingSprite" => tiling_sprite_payload(instruction, ids),
        "nineSliceSprite" => nine_slice_payload(instruction, ids),
        "renderGroup" => InstructionPayload::RenderGroup { child_count: nested },
        _ => InstructionPayload::Other,
    }
}

// ---------------------------------------------------------------------------
// build
// ---------------------------------------------------------------------------

/// The live entries of an instruction set. `instructionSize` bounds the
/// array, which the renderer reuses between frames without truncating.
pub fn instruction_list(set: &Object) -> Vec<Value> {
    let Some(all) = set.get("instructions").as_array().cloned() else {
        return Vec::new();
    };
    let size = set
        .get("instructionSize")
        .as_f64()
        .map(|n| n.max(0.0) as usize)
        .unwrap_or(all.len())
        .min(all.len());
    all.to_vec()
        .into_iter()
        .take(size)
        .filter(|entry| entry.as_object().is_some())
        .collect()
}

fn nested_list(instruction: &Value) -> Vec<Value> {
    instruction
        .get("renderGroup")
        .get("instructionSet")
        .as_object()
        .map(instruction_list)
        .unwrap_or_default()
}

/// One level of the build in progress.
struct Frame {
    pending: std::vec::IntoIter<Value>,
    built: Vec<InstructionNode>,
    /// The render-group entry awaiting these children, if any.
    owner: Option<InstructionNode>,
}

/// Rebuild the instruction tree from a flat, pre-order instruction list.
pub fn build(instructions: Vec<Value>, ids: &mut NodeIds) -> Vec<InstructionNode> {
    let mut next_index = 0;
    let mut stack = vec![Frame {
        pending: instructions.into_iter(),
        built: Vec::new(),
        owner: None,
    }];

    loop {
        let Some(frame) = stack.last_mut() else {
            return Vec::new();
        };
        match frame.pending.next() {
            Some(instruction) => {
                let pipe = string_at(&instruction, "renderPipeId")
                    .unwrap_or_else(|| "unknown".to_string());
                let nested = if pipe == "renderGroup" {
                    nested_list(&instruction)
                } else {
                    Vec::new()
                };
                let node = InstructionNode {
                    index: next_index,
                    payload: payload(&pipe, &instruction, nested.len(), ids),
                    pipe,
                    children: Vec::new(),
                };
                next_index += 1;
                if nested.is_empty() {
                    frame.built.push(node);
                } else {
                    stack.push(Frame {
                        pending: nested.into_iter(),
                        built: Vec::new(),
                        owner: Some(node),
                    });
                }
            }
            None => {
                let Some(done) = stack.pop() else {
                    return Vec::new();
                };
                match (done.owner, stack.last_mut()) {
                    (Some(mut owner), Some(parent)) => {
                        owner.children = done.built;
                        parent.built.push(owner);
                    }
                    _ => return done.built,
                }
            }
        }
    }
}

/// Number of instructions in a built forest, nested ones included.
pub fn count(nodes: &[InstructionNode]) -> usize {
    nodes.iter().map(|n| n.flatten().len()).sum()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
