//! Target-size solver.
//!
//! Pure functions translating "user wants roughly X% of the original size"
//! into concrete settings, from measured per-technique savings when they
//! exist and from fixed zone presets when they do not. All size math stays in
//! exact byte integers; percentages only appear at the classification edge.

use std::cmp::Reverse;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::job::types::{ImageSettings, MethodResult, RiskTier, Settings, TechniqueKey};

/// Achievable-size floors per risk tier, derived from measured results.
///
/// Savings are cumulative: each tier includes every weaker tier. Recomputed
/// on every new set of method results, never persisted independently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompressionPotential {
    /// Smallest size using only safe techniques.
    pub safe_floor: u64,
    /// Smallest size using safe and medium techniques.
    pub medium_floor: u64,
    /// Smallest size using every technique.
    pub absolute_floor: u64,
    pub safe_savings: u64,
    pub medium_savings: u64,
    pub total_savings: u64,
    /// True while some technique has no measurement yet, meaning the floors
    /// are provisional.
    pub has_pending: bool,
}

/// How reachable a requested target percent is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feasibility {
    /// Reachable with safe techniques only.
    Safe,
    /// Requires medium-risk techniques.
    Medium,
    /// Requires the most aggressive techniques.
    Reachable,
    /// Below the absolute floor.
    Unreachable,
}

/// Percentage of `total` that `part` represents, guarding division by zero.
pub fn percent_of(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

/// Derive tier floors from measured per-technique savings.
///
/// Savings are summed additively as measured against the common baseline;
/// overlap between techniques is not corrected, so floors are optimistic
/// lower bounds.
pub fn compute_potential(original_size: u64, results: &[MethodResult]) -> CompressionPotential {
    let tier_sum = |tier: RiskTier| -> u64 {
        results
            .iter()
            .filter(|r| r.key.tier() <= tier)
            .map(|r| r.saved_bytes)
            .sum()
    };

    let safe_savings = tier_sum(RiskTier::Safe);
    let medium_savings = tier_sum(RiskTier::Medium);
    let total_savings = tier_sum(RiskTier::Absolute);

    let has_pending = TechniqueKey::ALL
        .iter()
        .any(|key| !results.iter().any(|r| r.key == *key));

    CompressionPotential {
        safe_floor: original_size.saturating_sub(safe_savings),
        medium_floor: original_size.saturating_sub(medium_savings),
        absolute_floor: original_size.saturating_sub(total_savings),
        safe_savings,
        medium_savings,
        total_savings,
        has_pending,
    }
}

/// Select the least-risky technique set whose measured savings reach
/// `target_bytes`.
///
/// Greedy in ascending tier order, within a tier by descending saved bytes,
/// ties broken by declaration order. Never picks a higher-risk technique
/// while an unselected lower-risk one would still make progress; if every
/// measured technique together falls short, all of them are returned.
pub fn select_methods_for_target(
    original_size: u64,
    target_bytes: u64,
    results: &[MethodResult],
) -> BTreeSet<TechniqueKey> {
    let needed = original_size.saturating_sub(target_bytes);
    let mut selected = BTreeSet::new();
    if needed == 0 {
        return selected;
    }

    let mut ordered: Vec<&MethodResult> = results.iter().collect();
    ordered.sort_by_key(|r| (r.key.tier(), Reverse(r.saved_bytes), r.key));

    let mut accumulated: u64 = 0;
    for result in ordered {
        if result.saved_bytes == 0 {
            continue;
        }
        selected.insert(result.key);
        accumulated += result.saved_bytes;
        if accumulated >= needed {
            break;
        }
    }

    selected
}

/// Measurement-free fallback mapping a target percent to a preset.
///
/// Five fixed zones, from maximum compression at the bottom end to a minimal
/// lossless preset above 90%.
pub fn settings_for_target_percent(percent: f64) -> Settings {
    let mut settings = Settings {
        techniques: TechniqueKey::ALL.iter().map(|k| (*k, false)).collect(),
        image: ImageSettings::default(),
        target_percent: Some(percent),
    };

    let enable_tiers_up_to = |settings: &mut Settings, tier: RiskTier| {
        for key in TechniqueKey::ALL {
            if key.tier() <= tier {
                settings.enable(key);
            }
        }
    };

    if percent <= 35.0 {
        // Maximum: everything on, lowest quality and DPI.
        enable_tiers_up_to(&mut settings, RiskTier::Absolute);
        settings.image = ImageSettings {
            quality: 40,
            target_dpi: 96,
            enable_downsampling: true,
        };
    } else if percent <= 55.0 {
        enable_tiers_up_to(&mut settings, RiskTier::Medium);
        settings.image = ImageSettings {
            quality: 55,
            target_dpi: 120,
            enable_downsampling: true,
        };
    } else if percent <= 75.0 {
        enable_tiers_up_to(&mut settings, RiskTier::Safe);
        settings.enable(TechniqueKey::ImageRecompression);
        settings.enable(TechniqueKey::ImageDownsampling);
        settings.image = ImageSettings {
            quality: 70,
            target_dpi: 150,
            enable_downsampling: true,
        };
    } else if percent <= 90.0 {
        enable_tiers_up_to(&mut settings, RiskTier::Safe);
        settings.image = ImageSettings {
            quality: 85,
            target_dpi: 200,
            enable_downsampling: false,
        };
    } else {
        // Minimal: lossless structural cleanup only.
        settings.enable(TechniqueKey::StreamRecompression);
        settings.enable(TechniqueKey::RemoveDuplicates);
        settings.image = ImageSettings {
            quality: 90,
            target_dpi: 300,
            enable_downsampling: false,
        };
    }

    settings
}

/// Overlay a measured technique selection onto a zone preset.
///
/// The preset contributes image quality and DPI; the selection decides which
/// techniques run.
pub fn merge_selection(mut base: Settings, selected: &BTreeSet<TechniqueKey>) -> Settings {
    for key in TechniqueKey::ALL {
        if selected.contains(&key) {
            base.enable(key);
        } else {
            base.disable(key);
        }
    }
    base.image.enable_downsampling = selected.contains(&TechniqueKey::ImageDownsampling);
    base
}

/// Classify how reachable `target_percent` (final size as a percent of the
/// original) is, against the measured tier floors.
///
/// Tiers are checked in descending floor order: the first tier whose floor
/// the target sits at or above wins; below the absolute floor the target is
/// unreachable.
pub fn classify_feasibility(
    target_percent: f64,
    potential: &CompressionPotential,
    original_size: u64,
) -> Feasibility {
    let safe_pct = percent_of(potential.safe_floor, original_size);
    let medium_pct = percent_of(potential.medium_floor, original_size);
    let absolute_pct = percent_of(potential.absolute_floor, original_size);

    if target_percent >= safe_pct {
        Feasibility::Safe
    } else if target_percent >= medium_pct {
        Feasibility::Medium
    } else if target_percent >= absolute_pct {
        Feasibility::Reachable
    } else {
        Feasibility::Unreachable
    }
}
