//! Snapshot Assembler: page info and the composite `getAll` snapshot.

use serde::{Deserialize, Serialize};

use crate::error::{ProbeError, ProbeResult};
use crate::fps::FpsReading;
use crate::ids::NodeIds;
use crate::instructions::{self, InstructionNode};
use crate::locate::{locate, RootHandle};
use crate::rendering::{renderer_type, rendering_info, RenderingInfo};
use crate::runtime::Object;
use crate::scene::{walk, SceneNode};
use crate::stats::{collect_stats, StatsAggregate};

/// Either a section's value or the reason it is missing.
///
/// Serializes as the bare value or as `{"error": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Section<T> {
    Error { error: String },
    Value(T),
}

impl<T> Section<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Section::Value(v) => Some(v),
            Section::Error { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Section::Error { error } => Some(error),
            Section::Value(_) => None,
        }
    }
}

impl<T> From<ProbeResult<T>> for Section<T> {
    fn from(result: ProbeResult<T>) -> Self {
        match result {
            Ok(v) => Section::Value(v),
            Err(e) => Section::Error {
                error: e.to_string(),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Page info
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub found: bool,
    pub version: Option<String>,
    pub source: Option<String>,
    pub has_application: bool,
    pub has_stage: bool,
    pub has_renderer: bool,
    pub renderer_type: Option<String>,
    pub major_version: Option<u32>,
    pub render_groups: bool,
}

/// Describe what the locator found. Finding nothing is reported with
/// `found: false`, not as an error.
pub fn page_info(global: &Object) -> PageInfo {
    let Some(roots) = locate(global) else {
        return PageInfo::default();
    };
    PageInfo {
        found: true,
        version: Some(roots.version.clone()),
        source: Some(roots.source.to_string()),
        has_application: roots.application.is_some(),
        has_stage: roots.stage.is_some(),
        has_renderer: roots.renderer.is_some(),
        renderer_type: roots.renderer.as_ref().map(renderer_type),
        major_version: roots.major_version(),
        render_groups: roots.instruction_set().is_some(),
    }
}

// ---------------------------------------------------------------------------
// Structural reports
// ---------------------------------------------------------------------------

/// Snapshot of the display tree. A root hidden from tooling reads as a
/// missing stage.
pub fn scene_graph(roots: &RootHandle, ids: &mut NodeIds) -> ProbeResult<SceneNode> {
    walk(roots.stage()?, ids).ok_or(ProbeError::NoStage)
}

pub fn scene_stats(roots: &RootHandle) -> ProbeResult<StatsAggregate> {
    Ok(collect_stats(roots.stage()?))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstructionsReport {
    pub count: usize,
    pub instructions: Vec<InstructionNode>,
}

/// The display root's instruction tree as last built by the renderer.
pub fn instructions_report(roots: &RootHandle, ids: &mut NodeIds) -> ProbeResult<InstructionsReport> {
    roots.render_target()?;
    let set = roots
        .instruction_set()
        .ok_or(ProbeError::InstructionsUnsupported)?;
    let tree = instructions::build(instructions::instruction_list(&set), ids);
    Ok(InstructionsReport {
        count: instructions::count(&tree),
        instructions: tree,
    })
}

// ---------------------------------------------------------------------------
// getAll
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllSnapshot {
    pub info: PageInfo,
    pub scene: Section<SceneNode>,
    pub stats: Section<StatsAggregate>,
    pub rendering: Section<RenderingInfo>,
    pub fps: FpsReading,
}

/// Everything cheap to read in one round trip. Sections that cannot be
/// produced carry their own error; the snapshot as a whole only fails when
/// nothing was located.
pub fn snapshot_all(global: &Object, ids: &mut NodeIds, fps: FpsReading) -> ProbeResult<AllSnapshot> {
    let roots = locate(global).ok_or(ProbeError::NoApplication)?;
    Ok(AllSnapshot {
        info: page_info(global),
        scene: scene_graph(&roots, ids).into(),
        stats: scene_stats(&roots).into(),
        rendering: rendering_info(&roots).into(),
        fps,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fps::FrameRateCounter;
    use crate::sim::{Registration, SimApp, SimOptions};

    fn sim(registration: Registration) -> SimApp {
        SimApp::new(SimOptions {
            registration,
            ..SimOptions::default()
        })
    }

    #[test]
    fn test_info_when_nothing_found() {
        let app = sim(Registration::Hidden);
        let info = page_info(app.realm().global());
        assert!(!info.found);
        assert!(info.version.is_none());
    }

    #[test]
    fn test_info_for_v8_app() {
        let app = sim(Registration::AppGlobal);
        let info = page_info(app.realm().global());
        assert!(info.found);
        assert_eq!(info.major_version, Some(8));
        assert_eq!(info.renderer_type.as_deref(), Some("webgl"));
        assert!(info.render_groups);
    }

    #[test]
    fn test_section_serialization() {
        let ok: Section<u32> = Ok(3).into();
        let err: Section<u32> = Err(ProbeError::NoRenderer).into();
        assert_eq!(serde_json::to_value(&ok).unwrap(), serde_json::json!(3));
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            serde_json::json!({ "error": "No renderer found" })
        );
        let back: Section<u32> = serde_json::from_value(serde_json::json!({"error": "x"})).unwrap();
        assert_eq!(back.error(), Some("x"));
    }

    #[test]
    fn test_all_with_stage_only() {
        let app = sim(Registration::StageOnly);
        let all = snapshot_all(
            app.realm().global(),
            &mut NodeIds::new(),
            FrameRateCounter::new().reading(None),
        )
        .unwrap();
        assert!(all.scene.value().is_some());
        assert!(all.stats.value().is_some());
        assert_eq!(all.rendering.error(), Some("No renderer found"));
    }

    #[test]
    fn test_instructions_require_render_groups() {
        let app = SimApp::new(SimOptions {
            render_groups: false,
            ..SimOptions::default()
        });
        let roots = crate::locate::require(app.realm().global()).unwrap();
        let err = instructions_report(&roots, &mut NodeIds::new()).unwrap_err();
        assert_eq!(err, ProbeError::InstructionsUnsupported);
    }

    #[test]
    fn test_scene_and_stats_agree() {
        let app = sim(Registration::AppGlobal);
        let roots = crate::locate::require(app.realm().global()).unwrap();
        let scene = scene_graph(&roots, &mut NodeIds::new()).unwrap();
        let stats = scene_stats(&roots).unwrap();
        assert_eq!(scene.count() as u64, stats.total);
    }
}
