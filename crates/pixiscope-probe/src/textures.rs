//! Texture inventory from the renderer's texture manager.

use serde::{Deserialize, Serialize};

use crate::error::{ProbeError, ProbeResult};
use crate::runtime::{Object, Value};

/// One GPU-resident texture source. Descriptive metadata only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextureRecord {
    pub uid: Option<f64>,
    pub label: Option<String>,
    pub width: f64,
    pub height: f64,
    pub pixel_width: f64,
    pub pixel_height: f64,
    pub resolution: f64,
    pub format: Option<String>,
    pub dimension: Option<String>,
    pub mip_level_count: u32,
    pub auto_generate_mipmaps: bool,
    pub alpha_mode: Option<String>,
    pub antialias: bool,
    pub is_power_of_two: bool,
}

impl TextureRecord {
    /// Estimated GPU footprint assuming four bytes per pixel. A full mip
    /// chain adds a third.
    pub fn estimated_bytes(&self) -> u64 {
        let base = self.pixel_width.max(0.0) * self.pixel_height.max(0.0) * 4.0;
        let total = if self.mip_level_count > 1 {
            base * 4.0 / 3.0
        } else {
            base
        };
        total.round() as u64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextureReport {
    pub count: usize,
    pub estimated_bytes: u64,
    pub textures: Vec<TextureRecord>,
}

fn is_power_of_two(n: f64) -> bool {
    n >= 1.0 && n.fract() == 0.0 && (n as u64).is_power_of_two()
}

fn record(source: &Object) -> Option<TextureRecord> {
    if source.get("resource").is_nullish() {
        return None;
    }
    let num = |key: &str| source.get(key).as_f64();
    let text = |key: &str| source.get(key).as_str().map(str::to_string);

    let width = num("width").unwrap_or(0.0);
    let height = num("height").unwrap_or(0.0);
    let resolution = num("resolution").unwrap_or(1.0);
    let pixel_width = num("pixelWidth").unwrap_or(width * resolution);
    let pixel_height = num("pixelHeight").unwrap_or(height * resolution);

    Some(TextureRecord {
        uid: num("uid"),
        label: text("label").filter(|l| !l.is_empty()),
        width,
        height,
        pixel_width,
        pixel_height,
        resolution,
        format: text("format"),
        dimension: text("dimension"),
        mip_level_count: num("mipLevelCount").map(|n| n.max(1.0) as u32).unwrap_or(1),
        auto_generate_mipmaps: source.get("autoGenerateMipmaps").truthy(),
        alpha_mode: text("alphaMode"),
        antialias: source.get("antialias").truthy(),
        is_power_of_two: is_power_of_two(pixel_width) && is_power_of_two(pixel_height),
    })
}

/// List the textures the renderer's texture manager is tracking. Sources
/// without a backing resource are skipped.
pub fn collect_textures(renderer: &Object) -> ProbeResult<TextureReport> {
    let managed = renderer.get_path(&["texture", "managedTextures"]);
    let Value::Array(managed) = managed else {
        return Err(ProbeError::NoTextureSystem);
    };

    let textures: Vec<TextureRecord> = managed
        .to_vec()
        .iter()
        .filter_map(|v| v.as_object().and_then(record))
        .collect();
    let estimated_bytes = textures.iter().map(TextureRecord::estimated_bytes).sum();

    tracing::debug!(
        managed = managed.len(),
        reported = textures.len(),
        "collected texture inventory"
    );

    Ok(TextureReport {
        count: textures.len(),
        estimated_bytes,
        textures,
    })
}
