//! Rule-based category scoring over a [`FeatureVector`]
//!
//! Each known category has a fixed table of rules. A rule with a positive
//! weight is evidence: it adds its weight and bumps the evidence count. A rule
//! with a negative weight is a penalty and only subtracts. The evidence count
//! then scales the total before it is clamped and rounded.
//!
//! The per-rule thresholds and weights are hand-tuned constants, not learned
//! values. The scaling and clamping constants live in [`ScoringParams`] so a
//! deployment can adjust them without a rebuild.

use crate::config::LabelsConfig;
use serde::{Deserialize, Serialize};
use streetsight_core::{sort_predictions, ColorChannel, Error, FeatureVector, Prediction, Result, SurfaceType};

/// Tunable constants applied around the rule tables
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringParams {
    /// Starting score for a category with a rule table
    #[serde(default = "default_base_confidence")]
    pub base_confidence: f32,

    /// Score given to categories without a rule table
    #[serde(default = "default_fallback_confidence")]
    pub fallback_confidence: f32,

    /// Multiplier at three or more pieces of evidence
    #[serde(default = "default_strong_evidence_multiplier")]
    pub strong_evidence_multiplier: f32,

    /// Multiplier at exactly two pieces of evidence
    #[serde(default = "default_moderate_evidence_multiplier")]
    pub moderate_evidence_multiplier: f32,

    /// Multiplier when no evidence fired
    #[serde(default = "default_no_evidence_multiplier")]
    pub no_evidence_multiplier: f32,

    /// Lower clamp bound
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,

    /// Upper clamp bound
    #[serde(default = "default_max_confidence")]
    pub max_confidence: f32,

    /// Decimal places scores are rounded to
    #[serde(default = "default_decimals")]
    pub decimals: u32,
}

impl Default for ScoringParams {
    fn default() -> Self {
        Self {
            base_confidence: default_base_confidence(),
            fallback_confidence: default_fallback_confidence(),
            strong_evidence_multiplier: default_strong_evidence_multiplier(),
            moderate_evidence_multiplier: default_moderate_evidence_multiplier(),
            no_evidence_multiplier: default_no_evidence_multiplier(),
            min_confidence: default_min_confidence(),
            max_confidence: default_max_confidence(),
            decimals: default_decimals(),
        }
    }
}

impl ScoringParams {
    pub fn validate(&self) -> Result<()> {
        let unit = 0.0..=1.0;
        if !unit.contains(&self.min_confidence) || !unit.contains(&self.max_confidence) {
            return Err(Error::config("scoring confidence bounds must be within [0, 1]"));
        }
        if self.min_confidence > self.max_confidence {
            return Err(Error::config(format!(
                "scoring.min_confidence ({}) exceeds scoring.max_confidence ({})",
                self.min_confidence, self.max_confidence
            )));
        }
        if !unit.contains(&self.base_confidence) || !unit.contains(&self.fallback_confidence) {
            return Err(Error::config(
                "scoring base and fallback confidence must be within [0, 1]",
            ));
        }
        let multipliers = [
            self.strong_evidence_multiplier,
            self.moderate_evidence_multiplier,
            self.no_evidence_multiplier,
        ];
        if multipliers.iter().any(|m| !m.is_finite() || *m <= 0.0) {
            return Err(Error::config("scoring multipliers must be positive"));
        }
        if self.decimals > 6 {
            return Err(Error::config("scoring.decimals must be at most 6"));
        }
        Ok(())
    }

    fn evidence_multiplier(&self, evidence: usize) -> f32 {
        match evidence {
            0 => self.no_evidence_multiplier,
            1 => 1.0,
            2 => self.moderate_evidence_multiplier,
            _ => self.strong_evidence_multiplier,
        }
    }

    fn finish(&self, raw: f32) -> f32 {
        let clamped = raw.clamp(self.min_confidence, self.max_confidence);
        let scale = 10f32.powi(self.decimals as i32);
        (clamped * scale).round() / scale
    }
}

/// One scoring rule. Positive weights are evidence, negative ones penalties.
struct Rule {
    weight: f32,
    applies: fn(&FeatureVector) -> bool,
}

const fn rule(weight: f32, applies: fn(&FeatureVector) -> bool) -> Rule {
    Rule { weight, applies }
}

fn is_red_dominant(f: &FeatureVector) -> bool {
    f.color_distribution.dominant_color == ColorChannel::Red
}

const POTHOLE: &[Rule] = &[
    rule(0.25, |f| f.brightness < 0.4),
    rule(0.30, |f| f.dark_pixel_ratio > 0.3),
    rule(0.20, |f| f.grayscale_tendency > 0.6),
    rule(0.25, |f| f.surface_type == SurfaceType::Asphalt),
    rule(0.15, |f| f.contrast > 0.35),
    rule(0.10, |f| f.texture_complexity > 0.08),
    rule(-0.20, |f| f.brightness > 0.7),
    rule(-0.15, |f| f.color_uniformity < 0.3),
];

const ROAD_DAMAGE: &[Rule] = &[
    rule(0.20, |f| f.brightness < 0.6),
    rule(0.20, |f| f.grayscale_tendency > 0.5),
    rule(0.25, |f| f.contrast > 0.3),
    rule(0.15, |f| f.texture_complexity > 0.05),
    rule(0.20, |f| {
        matches!(f.surface_type, SurfaceType::Asphalt | SurfaceType::Concrete)
    }),
];

const GARBAGE: &[Rule] = &[
    rule(0.30, |f| f.texture_complexity > 0.15),
    rule(0.25, |f| f.variance > 0.02),
    rule(0.20, |f| f.color_uniformity < 0.4),
    rule(0.15, |f| f.grayscale_tendency < 0.5),
    rule(0.15, |f| f.gradient_magnitude > 1.0),
];

const STREETLIGHT: &[Rule] = &[
    rule(0.35, |f| f.brightness > 0.7),
    rule(0.25, |f| f.contrast > 0.6),
    rule(0.15, |f| is_red_dominant(f) || f.color_distribution.red > 0.5),
    rule(-0.30, |f| f.brightness < 0.3),
];

const CONSTRUCTION: &[Rule] = &[
    rule(0.30, |f| f.color_distribution.red > 0.45),
    rule(0.20, |f| f.texture_complexity > 0.10),
    rule(0.15, |f| f.brightness > 0.4 && f.brightness < 0.8),
    rule(0.20, |f| f.color_uniformity < 0.5),
];

const VANDALISM: &[Rule] = &[
    rule(0.30, |f| f.color_uniformity < 0.3),
    rule(0.25, |f| f.contrast > 0.5),
    rule(0.20, |f| f.grayscale_tendency < 0.4),
    rule(0.15, |f| f.texture_complexity > 0.12),
];

const SIDEWALK_DAMAGE: &[Rule] = &[
    rule(0.25, |f| f.surface_type == SurfaceType::Concrete),
    rule(0.20, |f| f.brightness > 0.3 && f.brightness < 0.7),
    rule(0.20, |f| f.grayscale_tendency > 0.6),
    rule(0.15, |f| f.texture_complexity > 0.06),
];

const WATER_LEAK: &[Rule] = &[
    rule(0.25, |f| f.dark_pixel_ratio > 0.25),
    rule(0.20, |f| f.brightness < 0.5),
    rule(0.20, |f| f.color_distribution.blue > f.color_distribution.red),
    rule(0.15, |f| f.texture_complexity < 0.08),
];

const TRAFFIC_SIGN: &[Rule] = &[
    rule(0.25, |f| f.brightness > 0.5),
    rule(0.30, |f| f.color_distribution.red > 0.4 || is_red_dominant(f)),
    rule(0.20, |f| f.contrast > 0.5),
    rule(0.15, |f| f.color_uniformity > 0.5),
];

fn rules_for(category: &str) -> Option<&'static [Rule]> {
    match category {
        "pothole" => Some(POTHOLE),
        "road_damage" => Some(ROAD_DAMAGE),
        "garbage" => Some(GARBAGE),
        "streetlight" => Some(STREETLIGHT),
        "construction" => Some(CONSTRUCTION),
        "vandalism" => Some(VANDALISM),
        "sidewalk_damage" => Some(SIDEWALK_DAMAGE),
        "water_leak" => Some(WATER_LEAK),
        "traffic_sign" => Some(TRAFFIC_SIGN),
        _ => None,
    }
}

/// Score a single category
pub fn score_category(category: &str, features: &FeatureVector, params: &ScoringParams) -> f32 {
    let (raw, evidence) = match rules_for(category) {
        Some(rules) => rules
            .iter()
            .filter(|r| (r.applies)(features))
            .fold((params.base_confidence, 0), |(score, evidence), r| {
                let evidence = if r.weight > 0.0 { evidence + 1 } else { evidence };
                (score + r.weight, evidence)
            }),
        None => (params.fallback_confidence, 1),
    };

    params.finish(raw * params.evidence_multiplier(evidence))
}

/// Score every configured category, sorted by confidence descending
pub fn score(features: &FeatureVector, labels: &LabelsConfig, params: &ScoringParams) -> Vec<Prediction> {
    let mut predictions: Vec<Prediction> = labels
        .ai_categories
        .iter()
        .map(|category| {
            Prediction::new(
                category.clone(),
                score_category(category, features, params),
                labels.backend_for(category),
            )
        })
        .collect();

    sort_predictions(&mut predictions);
    predictions
}

fn default_base_confidence() -> f32 {
    0.05
}

fn default_fallback_confidence() -> f32 {
    0.20
}

fn default_strong_evidence_multiplier() -> f32 {
    1.3
}

fn default_moderate_evidence_multiplier() -> f32 {
    1.1
}

fn default_no_evidence_multiplier() -> f32 {
    0.5
}

fn default_min_confidence() -> f32 {
    0.05
}

fn default_max_confidence() -> f32 {
    0.95
}

fn default_decimals() -> u32 {
    4
}
