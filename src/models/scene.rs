// file: src/models/scene.rs
// description: scene summaries and refined scene sets produced by the text stages
// reference: internal data structures

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SceneSource {
    Optimized,
    New,
}

impl SceneSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SceneSource::Optimized => "optimized",
            SceneSource::New => "new",
        }
    }

    /// Reads a source tag as returned by a model. Decorated tags such as
    /// `optimized_original` map onto their base variant.
    pub fn from_tag(tag: &str) -> Option<Self> {
        let tag = tag.trim().to_ascii_lowercase();
        if tag.starts_with("optimized") {
            Some(SceneSource::Optimized)
        } else if tag.starts_with("new") {
            Some(SceneSource::New)
        } else {
            None
        }
    }
}

fn lenient_source<'de, D>(deserializer: D) -> Result<Option<SceneSource>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(SceneSource::from_tag))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneItem {
    #[serde(default)]
    pub id: u32,
    #[serde(rename = "scene_name", default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub surrounding_objects: String,
    #[serde(default)]
    pub details: String,
    #[serde(default)]
    pub selling_point: String,
    #[serde(default, deserialize_with = "lenient_source")]
    pub source: Option<SceneSource>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneSummary {
    pub is_match: bool,
    #[serde(default)]
    pub mismatch_reason: String,
    #[serde(default)]
    pub scene_count: usize,
    #[serde(default)]
    pub scenes: Vec<SceneItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinedScene {
    pub scenes: Vec<SceneItem>,
}

impl RefinedScene {
    pub fn count_by(&self, source: SceneSource) -> usize {
        self.scenes
            .iter()
            .filter(|scene| scene.source == Some(source))
            .count()
    }

    /// Fills in missing source tags and makes ids unique.
    ///
    /// Untagged scenes whose id appears in `original_ids` are treated as
    /// polished originals, everything else as new. Duplicate or zero ids are
    /// renumbered with the next free id after the current maximum.
    pub fn normalize(&mut self, original_ids: &HashSet<u32>) {
        for scene in &mut self.scenes {
            if scene.source.is_none() {
                scene.source = if original_ids.contains(&scene.id) {
                    Some(SceneSource::Optimized)
                } else {
                    Some(SceneSource::New)
                };
            }
        }

        let mut taken: HashSet<u32> = self
            .scenes
            .iter()
            .map(|s| s.id)
            .filter(|&id| id != 0)
            .collect();
        let mut cursor = taken
            .iter()
            .max()
            .map_or(1, |max| max.checked_add(1).unwrap_or(1));
        let mut seen = HashSet::new();
        for scene in &mut self.scenes {
            if scene.id == 0 || !seen.insert(scene.id) {
                let id = free_id(&taken, cursor);
                scene.id = id;
                taken.insert(id);
                seen.insert(id);
                cursor = id.checked_add(1).unwrap_or(1);
            }
        }
    }
}

/// First id at or after `from` not in `taken`, wrapping past `u32::MAX` to 1.
fn free_id(taken: &HashSet<u32>, from: u32) -> u32 {
    (from.max(1)..=u32::MAX)
        .chain(1..from.max(1))
        .find(|id| !taken.contains(id))
        .unwrap_or(from)
}
