//! Job types and data structures for the compression pipeline.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::CompressError;

/// Risk classification of a compression technique.
///
/// Ordering matters: `Safe < Medium < Absolute` drives the solver's
/// least-risky-first selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    /// Structural techniques with no visible quality impact.
    Safe,
    /// Moderate risk, e.g. lossy image re-encoding at a chosen quality.
    Medium,
    /// Most aggressive techniques, highest fidelity loss.
    Absolute,
}

/// Closed enumeration of size-reduction techniques.
///
/// Declaration order is the deterministic tie-break order used by the solver;
/// derived `Ord` follows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TechniqueKey {
    StreamRecompression,
    StripMetadata,
    RemoveDuplicates,
    StripThumbnails,
    ImageRecompression,
    ImageDownsampling,
    FontSubsetting,
    Flatten,
    RemoveEmbeddedFiles,
}

impl TechniqueKey {
    /// All techniques in declaration order.
    pub const ALL: [TechniqueKey; 9] = [
        TechniqueKey::StreamRecompression,
        TechniqueKey::StripMetadata,
        TechniqueKey::RemoveDuplicates,
        TechniqueKey::StripThumbnails,
        TechniqueKey::ImageRecompression,
        TechniqueKey::ImageDownsampling,
        TechniqueKey::FontSubsetting,
        TechniqueKey::Flatten,
        TechniqueKey::RemoveEmbeddedFiles,
    ];

    /// Risk tier of this technique.
    pub fn tier(self) -> RiskTier {
        match self {
            TechniqueKey::StreamRecompression
            | TechniqueKey::StripMetadata
            | TechniqueKey::RemoveDuplicates
            | TechniqueKey::StripThumbnails => RiskTier::Safe,
            TechniqueKey::ImageRecompression
            | TechniqueKey::ImageDownsampling
            | TechniqueKey::FontSubsetting => RiskTier::Medium,
            TechniqueKey::Flatten | TechniqueKey::RemoveEmbeddedFiles => RiskTier::Absolute,
        }
    }
}

impl std::fmt::Display for TechniqueKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TechniqueKey::StreamRecompression => "stream_recompression",
            TechniqueKey::StripMetadata => "strip_metadata",
            TechniqueKey::RemoveDuplicates => "remove_duplicates",
            TechniqueKey::StripThumbnails => "strip_thumbnails",
            TechniqueKey::ImageRecompression => "image_recompression",
            TechniqueKey::ImageDownsampling => "image_downsampling",
            TechniqueKey::FontSubsetting => "font_subsetting",
            TechniqueKey::Flatten => "flatten",
            TechniqueKey::RemoveEmbeddedFiles => "remove_embedded_files",
        };
        write!(f, "{}", name)
    }
}

/// Image re-encoding parameters forwarded to the compute unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSettings {
    /// JPEG quality, 1..=100.
    pub quality: u8,
    /// Target resolution for downsampling.
    pub target_dpi: u32,
    pub enable_downsampling: bool,
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            quality: 70,
            target_dpi: 150,
            enable_downsampling: true,
        }
    }
}

/// Immutable settings snapshot for a single job.
///
/// Compared by value (not identity) when deciding whether a settings change
/// warrants a recompute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Per-technique toggles. Absent keys count as disabled.
    pub techniques: BTreeMap<TechniqueKey, bool>,
    pub image: ImageSettings,
    /// User-requested output size as a percentage of the original, if any.
    pub target_percent: Option<f64>,
}

impl Default for Settings {
    fn default() -> Self {
        let mut techniques = BTreeMap::new();
        for key in TechniqueKey::ALL {
            techniques.insert(key, key.tier() == RiskTier::Safe);
        }
        Self {
            techniques,
            image: ImageSettings::default(),
            target_percent: None,
        }
    }
}

impl Settings {
    pub fn is_enabled(&self, key: TechniqueKey) -> bool {
        self.techniques.get(&key).copied().unwrap_or(false)
    }

    pub fn enable(&mut self, key: TechniqueKey) {
        self.techniques.insert(key, true);
    }

    pub fn disable(&mut self, key: TechniqueKey) {
        self.techniques.insert(key, false);
    }
}

/// Input file handed to the orchestration layer.
#[derive(Debug, Clone)]
pub struct InputFile {
    /// File name (for display and extension checks).
    pub name: String,
    /// Raw document bytes.
    pub bytes: Bytes,
}

impl InputFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Measured saving for one technique against a common baseline.
///
/// Produced only by the compute unit; consumed read-only here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodResult {
    pub key: TechniqueKey,
    pub saved_bytes: u64,
    /// Opaque per-technique detail payload, if the compute unit provided one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl MethodResult {
    pub fn new(key: TechniqueKey, saved_bytes: u64) -> Self {
        Self {
            key,
            saved_bytes,
            details: None,
        }
    }
}

/// Complete result of one compression run.
///
/// Replaced wholesale on each successful (re)computation, never merged.
#[derive(Debug, Clone, Serialize)]
pub struct CompressionAnalysis {
    pub original_size: u64,
    pub baseline_size: u64,
    pub page_count: usize,
    /// Compressed output. `Bytes` is refcounted, so dropping a stale analysis
    /// releases the buffer without copying.
    #[serde(skip)]
    pub final_output: Bytes,
    pub method_results: Vec<MethodResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_stats: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<serde_json::Value>,
}

impl CompressionAnalysis {
    pub fn final_size(&self) -> u64 {
        self.final_output.len() as u64
    }
}

/// Status of the single-file job slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum JobStatus {
    Idle,
    Validating,
    Processing,
    Done,
    Error { error: CompressError },
}

impl Default for JobStatus {
    fn default() -> Self {
        JobStatus::Idle
    }
}

/// Progress text for an in-flight foreground job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobProgress {
    pub percent: u8,
    pub message: String,
}

/// Read-only view of the job slot, shared between the controller task and
/// its handle.
#[derive(Debug, Clone, Default)]
pub struct JobSnapshot {
    pub status: JobStatus,
    /// Set while a background recompute is in flight; the previous analysis
    /// stays visible and progress updates are suppressed.
    pub is_updating: bool,
    pub progress: Option<JobProgress>,
    pub analysis: Option<Arc<CompressionAnalysis>>,
}

/// Event emitted by the job controller (for UI updates).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum JobEvent {
    StatusChanged { status: JobStatus },
    Progress { percent: u8, message: String },
    Completed { original_size: u64, final_size: u64 },
    Failed { error: CompressError },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn technique_declaration_order_matches_ord() {
        let mut sorted = TechniqueKey::ALL.to_vec();
        sorted.sort();
        assert_eq!(sorted, TechniqueKey::ALL.to_vec());
    }

    #[test]
    fn tiers_are_ordered_by_risk() {
        assert!(RiskTier::Safe < RiskTier::Medium);
        assert!(RiskTier::Medium < RiskTier::Absolute);
    }

    #[test]
    fn default_settings_enable_only_safe_techniques() {
        let settings = Settings::default();
        for key in TechniqueKey::ALL {
            assert_eq!(settings.is_enabled(key), key.tier() == RiskTier::Safe);
        }
    }

    #[test]
    fn settings_compare_by_value() {
        let a = Settings::default();
        let mut b = Settings::default();
        assert_eq!(a, b);
        b.image.quality = 40;
        assert_ne!(a, b);
    }
}
