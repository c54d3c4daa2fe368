//! Preset Library
//!
//! A preset is a named [`EffectSettings`] snapshot plus metadata. Storage is
//! abstracted behind [`PresetStore`] so the library works the same over an
//! in-memory map or a directory of JSON files.
//!
//! The four built-in presets are seeded into every store and cannot be
//! overwritten or deleted.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::engine::settings::{EffectSettings, PerformanceMode};
use crate::error::{Result, VoxError};

/// Author recorded on built-in presets
pub const BUILT_IN_AUTHOR: &str = "voxform";

// ============================================================================
// Preset Model
// ============================================================================

/// Preset grouping shown in browsers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PresetCategory {
    VoiceEnhancement,
    VocalEffects,
    Creative,
    Mastering,
    Custom,
    AiGenerated,
}

/// A named settings snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preset {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: PresetCategory,
    pub tags: Vec<String>,
    pub favorite: bool,
    pub built_in: bool,
    pub author: String,
    pub settings: EffectSettings,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Preset {
    /// New user preset with a fresh uuid
    pub fn new(
        name: impl Into<String>,
        category: PresetCategory,
        settings: EffectSettings,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            description: String::new(),
            category,
            tags: Vec::new(),
            favorite: false,
            built_in: false,
            author: String::from("user"),
            settings,
            created_at: now,
            updated_at: now,
        }
    }

    /// Case-insensitive match on name, description or any tag
    pub fn matches(&self, query: &str) -> bool {
        let query = query.to_lowercase();
        self.name.to_lowercase().contains(&query)
            || self.description.to_lowercase().contains(&query)
            || self.tags.iter().any(|t| t.to_lowercase().contains(&query))
    }
}

fn built_in(
    id: &str,
    name: &str,
    description: &str,
    category: PresetCategory,
    tags: &[&str],
    favorite: bool,
    settings: EffectSettings,
) -> Preset {
    let epoch = DateTime::<Utc>::default();
    Preset {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        category,
        tags: tags.iter().map(|t| t.to_string()).collect(),
        favorite,
        built_in: true,
        author: BUILT_IN_AUTHOR.to_string(),
        settings,
        created_at: epoch,
        updated_at: epoch,
    }
}

/// The four presets every library starts with
pub fn built_in_presets() -> Vec<Preset> {
    let toggles = EffectSettings {
        enable_reverb: true,
        enable_delay: true,
        enable_lowpass: true,
        enable_highpass: true,
        enable_ai_enhancement: true,
        enable_noise_reduction: true,
        enable_mastering: true,
        ..EffectSettings::default()
    };

    vec![
        built_in(
            "voice-clarity",
            "Voice Clarity Boost",
            "Enhance speech intelligibility and presence",
            PresetCategory::VoiceEnhancement,
            &["voice", "clarity", "speech"],
            false,
            EffectSettings {
                pitch_shift: 0.0,
                distortion: 0.0,
                reverb_mix: 0.1,
                delay_time: 0.05,
                delay_feedback: 0.1,
                lowpass_freq: 12000.0,
                highpass_freq: 80.0,
                ai_enhancement: 0.8,
                noise_reduction: 0.7,
                ..toggles.clone()
            },
        ),
        built_in(
            "podcast-master",
            "Podcast Master",
            "Professional podcast voice processing",
            PresetCategory::Mastering,
            &["podcast", "broadcast", "professional"],
            true,
            EffectSettings {
                pitch_shift: 0.0,
                distortion: 0.0,
                reverb_mix: 0.05,
                delay_time: 0.02,
                delay_feedback: 0.05,
                lowpass_freq: 15000.0,
                highpass_freq: 100.0,
                ai_enhancement: 0.6,
                noise_reduction: 0.8,
                performance_mode: PerformanceMode::Quality,
                enable_delay: false,
                ..toggles.clone()
            },
        ),
        built_in(
            "creative-voice",
            "Creative Voice FX",
            "Dramatic voice transformation effects",
            PresetCategory::Creative,
            &["creative", "fx", "dramatic"],
            false,
            EffectSettings {
                pitch_shift: -3.0,
                distortion: 0.3,
                reverb_mix: 0.4,
                delay_time: 0.15,
                delay_feedback: 0.25,
                lowpass_freq: 8000.0,
                highpass_freq: 150.0,
                ai_enhancement: 0.4,
                noise_reduction: 0.5,
                enable_pitch_shift: true,
                enable_distortion: true,
                ..toggles.clone()
            },
        ),
        built_in(
            "ai-enhance",
            "AI Enhancement Pro",
            "Maximum adaptive voice enhancement",
            PresetCategory::AiGenerated,
            &["ai", "enhancement", "automatic"],
            true,
            EffectSettings {
                pitch_shift: 0.0,
                distortion: 0.0,
                reverb_mix: 0.2,
                delay_time: 0.08,
                delay_feedback: 0.15,
                lowpass_freq: 18000.0,
                highpass_freq: 60.0,
                ai_enhancement: 1.0,
                noise_reduction: 0.9,
                ..toggles
            },
        ),
    ]
}

// ============================================================================
// Storage
// ============================================================================

/// Key-value preset storage
pub trait PresetStore {
    /// Insert or replace the preset with `preset.id`
    fn save(&mut self, preset: &Preset) -> Result<()>;

    fn load(&self, id: &str) -> Result<Option<Preset>>;

    /// Remove a preset; returns whether it existed
    fn delete(&mut self, id: &str) -> Result<bool>;

    fn list(&self) -> Result<Vec<Preset>>;
}

/// Presets held in memory, ordered by id
#[derive(Debug, Clone, Default)]
pub struct MemoryPresetStore {
    presets: BTreeMap<String, Preset>,
}

impl MemoryPresetStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PresetStore for MemoryPresetStore {
    fn save(&mut self, preset: &Preset) -> Result<()> {
        self.presets.insert(preset.id.clone(), preset.clone());
        Ok(())
    }

    fn load(&self, id: &str) -> Result<Option<Preset>> {
        Ok(self.presets.get(id).cloned())
    }

    fn delete(&mut self, id: &str) -> Result<bool> {
        Ok(self.presets.remove(id).is_some())
    }

    fn list(&self) -> Result<Vec<Preset>> {
        Ok(self.presets.values().cloned().collect())
    }
}

/// One pretty-printed JSON file per preset in a directory
#[derive(Debug, Clone)]
pub struct JsonPresetStore {
    dir: PathBuf,
}

impl JsonPresetStore {
    /// Open (and create if needed) a preset directory
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> Result<PathBuf> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(VoxError::InvalidParameter {
                param: "preset id".to_string(),
                value: id.to_string(),
                expected: "letters, digits, '-' or '_'".to_string(),
            });
        }
        Ok(self.dir.join(format!("{}.json", id)))
    }
}

impl PresetStore for JsonPresetStore {
    fn save(&mut self, preset: &Preset) -> Result<()> {
        let path = self.path_for(&preset.id)?;
        let content = serde_json::to_string_pretty(preset)?;
        fs::write(&path, content)?;
        Ok(())
    }

    fn load(&self, id: &str) -> Result<Option<Preset>> {
        let path = self.path_for(id)?;
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn delete(&mut self, id: &str) -> Result<bool> {
        let path = self.path_for(id)?;
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path)?;
        Ok(true)
    }

    fn list(&self) -> Result<Vec<Preset>> {
        let mut presets = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = fs::read_to_string(&path)?;
            presets.push(serde_json::from_str::<Preset>(&content)?);
        }
        presets.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(presets)
    }
}

/// Lets callers pick a store at runtime
impl PresetStore for Box<dyn PresetStore> {
    fn save(&mut self, preset: &Preset) -> Result<()> {
        (**self).save(preset)
    }

    fn load(&self, id: &str) -> Result<Option<Preset>> {
        (**self).load(id)
    }

    fn delete(&mut self, id: &str) -> Result<bool> {
        (**self).delete(id)
    }

    fn list(&self) -> Result<Vec<Preset>> {
        (**self).list()
    }
}

// ============================================================================
// Library
// ============================================================================

/// Preset operations over any store
#[derive(Debug)]
pub struct PresetLibrary<S: PresetStore> {
    store: S,
}

impl PresetLibrary<MemoryPresetStore> {
    /// Library over a fresh in-memory store
    pub fn in_memory() -> Self {
        // Seeding an in-memory store cannot fail
        let mut store = MemoryPresetStore::new();
        for preset in built_in_presets() {
            store.presets.insert(preset.id.clone(), preset);
        }
        Self { store }
    }
}

impl<S: PresetStore> PresetLibrary<S> {
    /// Wrap `store`, writing the built-in presets into it
    pub fn new(mut store: S) -> Result<Self> {
        for preset in built_in_presets() {
            store.save(&preset)?;
        }
        debug!("built-in presets seeded");
        Ok(Self { store })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn is_built_in(id: &str) -> bool {
        built_in_presets().iter().any(|p| p.id == id)
    }

    pub fn get(&self, id: &str) -> Result<Preset> {
        self.store.load(id)?.ok_or_else(|| VoxError::PresetNotFound {
            id: id.to_string(),
        })
    }

    /// Every preset: built-ins first, then user presets by name
    pub fn list(&self) -> Result<Vec<Preset>> {
        let mut presets = self.store.list()?;
        presets.sort_by(|a, b| {
            b.built_in
                .cmp(&a.built_in)
                .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        });
        Ok(presets)
    }

    /// Save a new user preset and return it
    pub fn create(
        &mut self,
        name: &str,
        description: &str,
        category: PresetCategory,
        settings: EffectSettings,
        tags: &[&str],
    ) -> Result<Preset> {
        let mut preset = Preset::new(name, category, settings);
        preset.description = description.to_string();
        preset.tags = tags.iter().map(|t| t.to_string()).collect();
        self.store.save(&preset)?;
        info!(id = %preset.id, name = %preset.name, "preset created");
        Ok(preset)
    }

    /// Replace a user preset; built-ins are refused
    pub fn update(&mut self, preset: &Preset) -> Result<()> {
        if preset.built_in || Self::is_built_in(&preset.id) {
            return Err(VoxError::BuiltInPreset {
                id: preset.id.clone(),
            });
        }
        let mut updated = preset.clone();
        updated.updated_at = Utc::now();
        self.store.save(&updated)
    }

    /// Delete a user preset; built-ins are refused
    pub fn delete(&mut self, id: &str) -> Result<()> {
        if Self::is_built_in(id) {
            return Err(VoxError::BuiltInPreset { id: id.to_string() });
        }
        if !self.store.delete(id)? {
            return Err(VoxError::PresetNotFound { id: id.to_string() });
        }
        info!(id, "preset deleted");
        Ok(())
    }

    /// Copy any preset (built-ins included) into a new user preset
    pub fn duplicate(&mut self, id: &str, new_name: &str) -> Result<Preset> {
        let source = self.get(id)?;
        let mut copy = Preset::new(new_name, source.category, source.settings);
        copy.description = source.description;
        copy.tags = source.tags;
        self.store.save(&copy)?;
        Ok(copy)
    }

    /// Flip the favorite flag on a user preset
    pub fn toggle_favorite(&mut self, id: &str) -> Result<bool> {
        let mut preset = self.get(id)?;
        preset.favorite = !preset.favorite;
        self.update(&preset)?;
        Ok(preset.favorite)
    }

    pub fn search(&self, query: &str) -> Result<Vec<Preset>> {
        Ok(self.list()?.into_iter().filter(|p| p.matches(query)).collect())
    }

    pub fn by_category(&self, category: PresetCategory) -> Result<Vec<Preset>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|p| p.category == category)
            .collect())
    }

    /// Serialize the given presets as a JSON array
    pub fn export_json(&self, ids: &[&str]) -> Result<String> {
        let presets = ids
            .iter()
            .map(|id| self.get(id))
            .collect::<Result<Vec<_>>>()?;
        Ok(serde_json::to_string_pretty(&presets)?)
    }

    /// Import presets from a JSON array as new user presets
    pub fn import_json(&mut self, json: &str) -> Result<Vec<Preset>> {
        let incoming: Vec<Preset> = serde_json::from_str(json)?;
        let mut imported = Vec::with_capacity(incoming.len());
        for preset in incoming {
            let mut copy = Preset::new(preset.name, preset.category, preset.settings.clamped());
            copy.description = preset.description;
            copy.tags = preset.tags;
            copy.author = preset.author;
            self.store.save(&copy)?;
            imported.push(copy);
        }
        info!(count = imported.len(), "presets imported");
        Ok(imported)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    #[test]
    fn test_built_ins_are_in_range() {
        let presets = built_in_presets();
        let ids: Vec<_> = presets.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["voice-clarity", "podcast-master", "creative-voice", "ai-enhance"]
        );
        for preset in &presets {
            assert!(preset.settings.validate().is_empty(), "{}", preset.id);
            assert!(preset.built_in);
        }
    }

    #[test]
    fn test_library_seeds_and_protects_built_ins() {
        let mut library = PresetLibrary::in_memory();
        assert_eq!(library.list().unwrap().len(), 4);

        let podcast = library.get("podcast-master").unwrap();
        assert_eq!(podcast.settings.performance_mode, PerformanceMode::Quality);
        assert!(!podcast.settings.enable_delay);

        assert!(matches!(
            library.delete("voice-clarity"),
            Err(VoxError::BuiltInPreset { .. })
        ));
        let mut edited = podcast.clone();
        edited.built_in = false;
        assert!(matches!(
            library.update(&edited),
            Err(VoxError::BuiltInPreset { .. })
        ));
    }

    #[test]
    fn test_create_duplicate_delete() {
        let mut library = PresetLibrary::in_memory();
        let created = library
            .create(
                "Radio",
                "Narrow band",
                PresetCategory::Custom,
                EffectSettings::default(),
                &["lofi"],
            )
            .unwrap();
        assert!(Uuid::parse_str(&created.id).is_ok());

        let copy = library.duplicate("creative-voice", "My FX").unwrap();
        assert!(!copy.built_in);
        assert_eq!(copy.settings, library.get("creative-voice").unwrap().settings);

        assert_eq!(library.search("LOFI").unwrap().len(), 1);
        assert_eq!(library.by_category(PresetCategory::Creative).unwrap().len(), 2);

        library.delete(&created.id).unwrap();
        assert!(matches!(
            library.delete(&created.id),
            Err(VoxError::PresetNotFound { .. })
        ));
    }

    #[test]
    fn test_toggle_favorite() {
        let mut library = PresetLibrary::in_memory();
        let created = library
            .create("Warm", "", PresetCategory::Custom, EffectSettings::default(), &[])
            .unwrap();
        assert!(library.toggle_favorite(&created.id).unwrap());
        assert!(library.get(&created.id).unwrap().favorite);
        assert!(library.toggle_favorite("ai-enhance").is_err());
    }

    #[test]
    fn test_json_store_round_trip() {
        let dir = tempdir().unwrap();
        let store = JsonPresetStore::open(dir.path()).unwrap();
        let mut library = PresetLibrary::new(store).unwrap();

        let settings = EffectSettings {
            reverb_mix: 0.25,
            enable_reverb: true,
            ..EffectSettings::default()
        };
        let created = library
            .create("Hall", "", PresetCategory::Custom, settings.clone(), &["space"])
            .unwrap();

        let reopened = PresetLibrary::new(JsonPresetStore::open(dir.path()).unwrap()).unwrap();
        let loaded = reopened.get(&created.id).unwrap();
        assert_eq!(loaded.settings, settings);
        assert_eq!(loaded.tags, vec!["space".to_string()]);
        assert_eq!(reopened.list().unwrap().len(), 5);
    }

    #[test]
    fn test_json_store_rejects_path_ids() {
        let dir = tempdir().unwrap();
        let store = JsonPresetStore::open(dir.path()).unwrap();
        assert!(store.load("../escape").is_err());
    }

    #[test]
    fn test_export_import() {
        let mut library = PresetLibrary::in_memory();
        let json = library.export_json(&["voice-clarity"]).unwrap();

        let imported = library.import_json(&json).unwrap();
        assert_eq!(imported.len(), 1);
        assert_ne!(imported[0].id, "voice-clarity");
        assert!(!imported[0].built_in);
        assert_eq!(
            imported[0].settings,
            library.get("voice-clarity").unwrap().settings
        );
    }
}
