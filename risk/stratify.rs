//! Risk group stratification.
//!
//! A [`StratificationPolicy`] maps continuous risk scores (death
//! probabilities) to ordinal labels listed in increasing-risk order. Every bin
//! is right-open, `[lo, hi)`, except the top bin, which is closed on both
//! ends, so each score in [0, 1] lands in exactly one bin.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Label set shared by the five-level policies, lowest risk first.
pub const FIVE_LEVEL_LABELS: [&str; 5] = [
    "Very Low Risk",
    "Low Risk",
    "Medium Risk",
    "High Risk",
    "Very High Risk",
];

/// Label set shared by the three-level policies, lowest risk first.
pub const THREE_LEVEL_LABELS: [&str; 3] = ["Low Risk", "Medium Risk", "High Risk"];

/// Names accepted by [`StratificationPolicy::preset`].
pub const PRESET_NAMES: [&str; 4] = ["five_level", "three_level", "three_level_coarse", "quintile"];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StratifyError {
    #[error("A stratification policy needs at least one label.")]
    NoLabels,
    #[error("Risk group label '{0}' appears more than once.")]
    DuplicateLabel(String),
    #[error("A fixed-threshold policy with {cuts} cut points needs {} labels, but {labels} were given.", .cuts + 1)]
    LabelCountMismatch { cuts: usize, labels: usize },
    #[error("Cut points must lie strictly inside (0, 1); found {0}.")]
    CutOutOfRange(f64),
    #[error("Cut points must be strictly increasing; {previous} is followed by {next}.")]
    CutsNotIncreasing { previous: f64, next: f64 },
    #[error("Risk score {0} is outside [0, 1] and cannot be stratified.")]
    ScoreOutOfRange(f64),
    #[error("Unknown stratification preset '{name}'. Available presets: {}.", PRESET_NAMES.join(", "))]
    UnknownPreset { name: String },
}

/// How scores are cut into groups. Selected per invocation and loaded from
/// configuration, so boundaries can change without rebuilding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum StratificationPolicy {
    /// Fixed interior cut points on the [0, 1] score scale.
    FixedThreshold { cuts: Vec<f64>, labels: Vec<String> },
    /// Equal-frequency bins at the empirical quantiles of the current batch,
    /// one bin per label.
    Quantile { labels: Vec<String> },
}

/// Which binning rule produced a [`Stratification`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinningMethod {
    FixedThreshold,
    Quantile,
    /// Quantile edges collapsed on tied scores; equal-width bins over the
    /// batch's score range were used instead.
    EqualWidthFallback,
}

impl BinningMethod {
    pub fn describe(self) -> &'static str {
        match self {
            Self::FixedThreshold => "fixed thresholds",
            Self::Quantile => "batch quantiles",
            Self::EqualWidthFallback => "equal-width bins (quantile edges collapsed)",
        }
    }
}

/// Group assignment for one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Stratification {
    /// Bin index per score, `0` being the lowest-risk label.
    pub bins: Vec<usize>,
    /// Interior cut points that were applied, ascending.
    pub cuts: Vec<f64>,
    pub method: BinningMethod,
}

impl StratificationPolicy {
    /// Cut points 0.2/0.4/0.6/0.8 with labels `Very Low Risk` … `Very High Risk`.
    pub fn five_level() -> Self {
        Self::FixedThreshold {
            cuts: vec![0.2, 0.4, 0.6, 0.8],
            labels: owned(&FIVE_LEVEL_LABELS),
        }
    }

    /// Cut points 0.33/0.66 with labels `Low Risk`, `Medium Risk`, `High Risk`.
    pub fn three_level() -> Self {
        Self::FixedThreshold {
            cuts: vec![0.33, 0.66],
            labels: owned(&THREE_LEVEL_LABELS),
        }
    }

    /// Cut points 0.3/0.6 with the three-level labels.
    pub fn three_level_coarse() -> Self {
        Self::FixedThreshold {
            cuts: vec![0.3, 0.6],
            labels: owned(&THREE_LEVEL_LABELS),
        }
    }

    /// Batch quintiles with the five-level labels.
    pub fn quintile() -> Self {
        Self::Quantile {
            labels: owned(&FIVE_LEVEL_LABELS),
        }
    }

    pub fn preset(name: &str) -> Result<Self, StratifyError> {
        match name {
            "five_level" => Ok(Self::five_level()),
            "three_level" => Ok(Self::three_level()),
            "three_level_coarse" => Ok(Self::three_level_coarse()),
            "quintile" => Ok(Self::quintile()),
            other => Err(StratifyError::UnknownPreset {
                name: other.to_string(),
            }),
        }
    }

    /// Labels in increasing-risk order.
    pub fn labels(&self) -> &[String] {
        match self {
            Self::FixedThreshold { labels, .. } | Self::Quantile { labels } => labels,
        }
    }

    pub fn validate(&self) -> Result<(), StratifyError> {
        let labels = self.labels();
        if labels.is_empty() {
            return Err(StratifyError::NoLabels);
        }
        for (i, label) in labels.iter().enumerate() {
            if labels[..i].contains(label) {
                return Err(StratifyError::DuplicateLabel(label.clone()));
            }
        }

        if let Self::FixedThreshold { cuts, labels } = self {
            if labels.len() != cuts.len() + 1 {
                return Err(StratifyError::LabelCountMismatch {
                    cuts: cuts.len(),
                    labels: labels.len(),
                });
            }
            for &cut in cuts {
                if !(cut > 0.0 && cut < 1.0) {
                    return Err(StratifyError::CutOutOfRange(cut));
                }
            }
            for pair in cuts.windows(2) {
                if pair[1] <= pair[0] {
                    return Err(StratifyError::CutsNotIncreasing {
                        previous: pair[0],
                        next: pair[1],
                    });
                }
            }
        }
        Ok(())
    }

    /// Assigns every score to a bin.
    pub fn assign(&self, scores: &[f64]) -> Result<Stratification, StratifyError> {
        self.validate()?;
        if let Some(&bad) = scores.iter().find(|s| !(0.0..=1.0).contains(*s)) {
            return Err(StratifyError::ScoreOutOfRange(bad));
        }

        let (cuts, method) = match self {
            Self::FixedThreshold { cuts, .. } => (cuts.clone(), BinningMethod::FixedThreshold),
            Self::Quantile { labels } => quantile_cuts(scores, labels.len()),
        };
        let bins = scores.iter().map(|&s| bin_index(&cuts, s)).collect();
        Ok(Stratification { bins, cuts, method })
    }

    /// Assigns scores and resolves bin indices to labels.
    pub fn assign_labels(
        &self,
        scores: &[f64],
    ) -> Result<(Vec<String>, BinningMethod), StratifyError> {
        let stratification = self.assign(scores)?;
        let labels = self.labels();
        let assigned = stratification
            .bins
            .iter()
            .map(|&bin| labels[bin].clone())
            .collect();
        Ok((assigned, stratification.method))
    }
}

impl Default for StratificationPolicy {
    fn default() -> Self {
        Self::five_level()
    }
}

fn owned(labels: &[&str]) -> Vec<String> {
    labels.iter().map(|s| s.to_string()).collect()
}

/// Number of interior cuts at or below `score`; right-open bins with a
/// closed top bin fall out of this directly.
fn bin_index(cuts: &[f64], score: f64) -> usize {
    cuts.partition_point(|&cut| cut <= score)
}

/// Empirical quantile with linear interpolation between order statistics.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let position = q * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let weight = position - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * weight
}

fn quantile_cuts(scores: &[f64], n_bins: usize) -> (Vec<f64>, BinningMethod) {
    if scores.is_empty() || n_bins <= 1 {
        return (Vec::new(), BinningMethod::Quantile);
    }

    let mut sorted = scores.to_vec();
    sorted.sort_by(f64::total_cmp);

    let edges: Vec<f64> = (0..=n_bins)
        .map(|i| quantile(&sorted, i as f64 / n_bins as f64))
        .collect();
    if edges.windows(2).all(|pair| pair[1] > pair[0]) {
        return (edges[1..n_bins].to_vec(), BinningMethod::Quantile);
    }

    let min = sorted[0];
    let max = sorted[sorted.len() - 1];
    log::warn!(
        "Quantile edges collapsed on tied scores ({} bins over {} rows); falling back to equal-width binning over [{min:.4}, {max:.4}]",
        n_bins,
        scores.len()
    );
    if max <= min {
        // Every score is identical: no cuts, everything in the lowest bin.
        return (Vec::new(), BinningMethod::EqualWidthFallback);
    }
    let width = (max - min) / n_bins as f64;
    let cuts = (1..n_bins).map(|i| min + width * i as f64).collect();
    (cuts, BinningMethod::EqualWidthFallback)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label_of(policy: &StratificationPolicy, score: f64) -> String {
        let (labels, _) = policy.assign_labels(&[score]).unwrap();
        labels[0].clone()
    }

    #[test]
    fn five_level_boundaries_are_lower_inclusive() {
        let policy = StratificationPolicy::five_level();
        assert_eq!(label_of(&policy, 0.0), "Very Low Risk");
        assert_eq!(label_of(&policy, 0.19999), "Very Low Risk");
        assert_eq!(label_of(&policy, 0.2), "Low Risk");
        assert_eq!(label_of(&policy, 0.4), "Medium Risk");
        assert_eq!(label_of(&policy, 0.6), "High Risk");
        assert_eq!(label_of(&policy, 0.8), "Very High Risk");
        assert_eq!(label_of(&policy, 1.0), "Very High Risk");
    }

    #[test]
    fn three_level_presets_differ_only_in_cuts() {
        let fine = StratificationPolicy::three_level();
        let coarse = StratificationPolicy::three_level_coarse();
        assert_eq!(fine.labels(), coarse.labels());
        assert_eq!(label_of(&fine, 0.31), "Low Risk");
        assert_eq!(label_of(&coarse, 0.31), "Medium Risk");
        assert_eq!(label_of(&fine, 0.66), "High Risk");
        assert_eq!(label_of(&coarse, 0.6), "High Risk");
    }

    #[test]
    fn every_score_on_a_fine_grid_gets_exactly_one_label() {
        let policy = StratificationPolicy::five_level();
        let scores: Vec<f64> = (0..=1000).map(|i| i as f64 / 1000.0).collect();
        let stratification = policy.assign(&scores).unwrap();
        for (&score, &bin) in scores.iter().zip(&stratification.bins) {
            let lower = if bin == 0 { 0.0 } else { stratification.cuts[bin - 1] };
            let upper = stratification.cuts.get(bin).copied().unwrap_or(1.0);
            assert!(score >= lower, "{score} below bin {bin}");
            if bin + 1 < policy.labels().len() {
                assert!(score < upper, "{score} not below the upper edge of bin {bin}");
            } else {
                assert!(score <= upper);
            }
        }
    }

    #[test]
    fn quintiles_split_twenty_distinct_scores_evenly() {
        let scores: Vec<f64> = (0..20).map(|i| 0.02 + i as f64 * 0.045).collect();
        let stratification = StratificationPolicy::quintile().assign(&scores).unwrap();
        assert_eq!(stratification.method, BinningMethod::Quantile);
        let mut counts = [0usize; 5];
        for &bin in &stratification.bins {
            counts[bin] += 1;
        }
        assert_eq!(counts, [4, 4, 4, 4, 4]);
    }

    #[test]
    fn quintiles_do_not_depend_on_input_order() {
        let scores = vec![0.9, 0.1, 0.5, 0.3, 0.7, 0.2, 0.8, 0.4, 0.6, 0.05];
        let policy = StratificationPolicy::quintile();
        let stratification = policy.assign(&scores).unwrap();
        // The two largest scores sit in the top bin wherever they appear.
        assert_eq!(stratification.bins[0], 4);
        assert_eq!(stratification.bins[6], 4);
        assert_eq!(stratification.bins[9], 0);
    }

    #[test]
    fn tied_scores_fall_back_to_equal_width() {
        let mut scores = vec![0.1; 10];
        scores.extend(std::iter::repeat(0.9).take(10));
        let stratification = StratificationPolicy::quintile().assign(&scores).unwrap();
        assert_eq!(stratification.method, BinningMethod::EqualWidthFallback);
        assert_eq!(stratification.cuts.len(), 4);
        assert!(stratification.bins[..10].iter().all(|&b| b == 0));
        assert!(stratification.bins[10..].iter().all(|&b| b == 4));
    }

    #[test]
    fn identical_scores_land_in_the_lowest_bin() {
        let scores = vec![0.42; 6];
        let stratification = StratificationPolicy::quintile().assign(&scores).unwrap();
        assert_eq!(stratification.method, BinningMethod::EqualWidthFallback);
        assert!(stratification.bins.iter().all(|&b| b == 0));
    }

    #[test]
    fn invalid_policies_are_rejected() {
        let too_few_labels = StratificationPolicy::FixedThreshold {
            cuts: vec![0.5],
            labels: vec!["Low Risk".to_string()],
        };
        assert_eq!(
            too_few_labels.validate(),
            Err(StratifyError::LabelCountMismatch { cuts: 1, labels: 1 })
        );

        let unsorted = StratificationPolicy::FixedThreshold {
            cuts: vec![0.6, 0.3],
            labels: owned(&THREE_LEVEL_LABELS),
        };
        assert!(matches!(
            unsorted.validate(),
            Err(StratifyError::CutsNotIncreasing { .. })
        ));

        let outside = StratificationPolicy::FixedThreshold {
            cuts: vec![0.0, 0.5],
            labels: owned(&THREE_LEVEL_LABELS),
        };
        assert_eq!(outside.validate(), Err(StratifyError::CutOutOfRange(0.0)));

        let duplicated = StratificationPolicy::Quantile {
            labels: vec!["Low Risk".to_string(), "Low Risk".to_string()],
        };
        assert!(matches!(
            duplicated.validate(),
            Err(StratifyError::DuplicateLabel(_))
        ));
    }

    #[test]
    fn scores_outside_unit_interval_are_rejected() {
        let policy = StratificationPolicy::five_level();
        assert_eq!(
            policy.assign(&[0.5, 1.2]),
            Err(StratifyError::ScoreOutOfRange(1.2))
        );
    }

    #[test]
    fn presets_are_resolved_by_name() {
        for name in PRESET_NAMES {
            assert!(StratificationPolicy::preset(name).is_ok(), "{name}");
        }
        let err = StratificationPolicy::preset("seven_level").unwrap_err();
        assert!(err.to_string().contains("quintile"));
    }

    #[test]
    fn policy_round_trips_through_toml() {
        #[derive(Serialize, Deserialize)]
        struct Wrapper {
            stratification: StratificationPolicy,
        }
        let text = r#"
[stratification]
policy = "fixed_threshold"
cuts = [0.25, 0.75]
labels = ["Low Risk", "Medium Risk", "High Risk"]
"#;
        let parsed: Wrapper = toml::from_str(text).unwrap();
        assert_eq!(
            parsed.stratification,
            StratificationPolicy::FixedThreshold {
                cuts: vec![0.25, 0.75],
                labels: owned(&THREE_LEVEL_LABELS),
            }
        );
        let quantile: Wrapper =
            toml::from_str("[stratification]\npolicy = \"quantile\"\nlabels = [\"A\", \"B\"]\n")
                .unwrap();
        assert_eq!(quantile.stratification.labels().len(), 2);
    }
}
