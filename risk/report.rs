//! Summaries, ordering and CSV export of scored results.

use crate::types::{
    PATIENT_ID_COLUMN, RISK_GROUP_COLUMN, RISK_SCORE_COLUMN, SURVIVAL_RATE_COLUMN, ScoredResult,
    UPDATED_COLUMN,
};
use itertools::Itertools;
use natord::compare;
use std::cmp::Ordering;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

/// Default number of bins for [`score_histogram`].
pub const DEFAULT_HISTOGRAM_BINS: usize = 20;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to write CSV output: {0}")]
    Csv(#[from] csv::Error),
    #[error("I/O error while writing results: {0}")]
    Io(#[from] std::io::Error),
    #[error("Exported CSV was not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("A histogram needs at least one bin.")]
    ZeroBins,
}

/// Headline numbers for one batch of results.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionSummary {
    pub total: usize,
    /// Rows whose group label contains "High".
    pub high_risk: usize,
    /// Rows whose group label contains "Low".
    pub low_risk: usize,
    /// `None` for an empty batch.
    pub mean_risk_score: Option<f64>,
    pub mean_survival_rate: Option<f64>,
}

impl PredictionSummary {
    pub fn from_results(results: &[ScoredResult]) -> Self {
        let total = results.len();
        let high_risk = results
            .iter()
            .filter(|r| r.risk_group.contains("High"))
            .count();
        let low_risk = results
            .iter()
            .filter(|r| r.risk_group.contains("Low"))
            .count();
        let (score_sum, survival_sum) = results
            .iter()
            .fold((0.0, 0.0), |(s, v), r| (s + r.risk_score, v + r.survival_rate));
        let n = total as f64;
        Self {
            total,
            high_risk,
            low_risk,
            mean_risk_score: (total > 0).then(|| score_sum / n),
            mean_survival_rate: (total > 0).then(|| survival_sum / n),
        }
    }
}

/// Row counts per group label.
///
/// Configured labels come first, in policy order and including groups with no
/// rows. Labels outside the policy (possible for pass-through rows) follow in
/// natural order.
pub fn group_distribution(results: &[ScoredResult], labels: &[String]) -> Vec<(String, usize)> {
    let counts = results.iter().map(|r| r.risk_group.as_str()).counts();
    let known: Vec<(String, usize)> = labels
        .iter()
        .map(|label| (label.clone(), counts.get(label.as_str()).copied().unwrap_or(0)))
        .collect();
    let unknown = counts
        .into_iter()
        .filter(|(label, _)| !labels.iter().any(|l| l.as_str() == *label))
        .sorted_by(|a, b| compare(a.0, b.0))
        .map(|(label, count)| (label.to_string(), count));
    known.into_iter().chain(unknown).collect()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistogramBin {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
}

/// Equal-width histogram of survival percentages over [0, 100].
///
/// Bins are right-open except the last, which also takes 100.
pub fn score_histogram(
    results: &[ScoredResult],
    bins: usize,
) -> Result<Vec<HistogramBin>, ReportError> {
    if bins == 0 {
        return Err(ReportError::ZeroBins);
    }
    let width = 100.0 / bins as f64;
    let mut histogram: Vec<HistogramBin> = (0..bins)
        .map(|i| HistogramBin {
            lower: width * i as f64,
            upper: if i + 1 == bins {
                100.0
            } else {
                width * (i + 1) as f64
            },
            count: 0,
        })
        .collect();
    for result in results {
        let value = result.survival_rate.clamp(0.0, 100.0);
        let index = ((value / width).floor() as usize).min(bins - 1);
        histogram[index].count += 1;
    }
    Ok(histogram)
}

/// Display orderings for a result table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// The order rows were uploaded in.
    #[default]
    Input,
    /// Highest survival rate first.
    SurvivalDescending,
    /// Lowest survival rate first.
    SurvivalAscending,
    /// By group in policy order, then by patient identifier.
    RiskGroup,
}

/// Reorders `results` in place. The sort is stable, so rows that compare
/// equal keep their input order.
pub fn sort_results(results: &mut [ScoredResult], order: SortOrder, labels: &[String]) {
    match order {
        SortOrder::Input => {}
        SortOrder::SurvivalDescending => {
            results.sort_by(|a, b| b.survival_rate.total_cmp(&a.survival_rate))
        }
        SortOrder::SurvivalAscending => {
            results.sort_by(|a, b| a.survival_rate.total_cmp(&b.survival_rate))
        }
        SortOrder::RiskGroup => {
            results.sort_by(|a, b| {
                compare_groups(&a.risk_group, &b.risk_group, labels)
                    .then_with(|| compare(&a.risk_group, &b.risk_group))
                    .then_with(|| compare_patient_ids(&a.patient_id, &b.patient_id))
            });
        }
    }
}

fn header(include_updated: bool) -> Vec<&'static str> {
    let mut columns = vec![
        PATIENT_ID_COLUMN,
        RISK_SCORE_COLUMN,
        RISK_GROUP_COLUMN,
        SURVIVAL_RATE_COLUMN,
    ];
    if include_updated {
        columns.push(UPDATED_COLUMN);
    }
    columns
}

/// Writes results as CSV. The score is rounded to 3 decimals and the survival
/// rate to 1 decimal here and nowhere earlier. `Updated` is written only when
/// some row carries a date.
pub fn write_results<W: Write>(writer: W, results: &[ScoredResult]) -> Result<(), ReportError> {
    let include_updated = results.iter().any(|r| r.updated.is_some());
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer.write_record(header(include_updated))?;
    for result in results {
        let mut record = vec![
            result.patient_id.clone(),
            format!("{:.3}", result.risk_score),
            result.risk_group.clone(),
            format!("{:.1}", result.survival_rate),
        ];
        if include_updated {
            record.push(result.updated.clone().unwrap_or_default());
        }
        csv_writer.write_record(&record)?;
    }
    csv_writer.flush()?;
    Ok(())
}

pub fn write_results_csv(path: &Path, results: &[ScoredResult]) -> Result<(), ReportError> {
    let file = BufWriter::new(File::create(path)?);
    write_results(file, results)?;
    log::info!("Wrote {} results to '{}'", results.len(), path.display());
    Ok(())
}

pub fn results_to_csv_string(results: &[ScoredResult]) -> Result<String, ReportError> {
    let mut buffer = Vec::new();
    write_results(&mut buffer, results)?;
    Ok(String::from_utf8(buffer)?)
}

/// Orders two labels by their position in `labels`, unknown labels last.
pub fn compare_groups(a: &str, b: &str, labels: &[String]) -> Ordering {
    let rank = |label: &str| labels.iter().position(|l| l == label).unwrap_or(labels.len());
    rank(a).cmp(&rank(b))
}

/// Orders identifiers by their trailing number when the prefixes match, so
/// `MM-2` precedes `MM-010`. Anything else falls back to natural order.
pub fn compare_patient_ids(a: &str, b: &str) -> Ordering {
    match (split_numeric_suffix(a), split_numeric_suffix(b)) {
        ((prefix_a, Some(n_a)), (prefix_b, Some(n_b))) if prefix_a == prefix_b => {
            n_a.cmp(&n_b).then_with(|| compare(a, b))
        }
        _ => compare(a, b),
    }
}

fn split_numeric_suffix(id: &str) -> (&str, Option<u64>) {
    let prefix = id.trim_end_matches(|c: char| c.is_ascii_digit());
    (prefix, id[prefix.len()..].parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stratify::FIVE_LEVEL_LABELS;
    use crate::types::ScoreSource;
    use approx::assert_abs_diff_eq;

    fn result(id: &str, score: f64, group: &str) -> ScoredResult {
        ScoredResult {
            patient_id: id.to_string(),
            risk_score: score,
            risk_group: group.to_string(),
            survival_rate: (1.0 - score) * 100.0,
            updated: None,
            source: ScoreSource::Computed,
        }
    }

    fn labels() -> Vec<String> {
        FIVE_LEVEL_LABELS.iter().map(|s| s.to_string()).collect()
    }

    fn sample() -> Vec<ScoredResult> {
        vec![
            result("MM-010", 0.85, "Very High Risk"),
            result("MM-002", 0.10, "Very Low Risk"),
            result("MM-003", 0.65, "High Risk"),
            result("MM-001", 0.30, "Low Risk"),
            result("MM-009", 0.90, "Very High Risk"),
        ]
    }

    #[test]
    fn summary_counts_high_and_low_labels() {
        let summary = PredictionSummary::from_results(&sample());
        assert_eq!(summary.total, 5);
        assert_eq!(summary.high_risk, 3);
        assert_eq!(summary.low_risk, 2);
        assert_abs_diff_eq!(summary.mean_risk_score.unwrap(), 0.56, epsilon = 1e-12);
        assert_abs_diff_eq!(summary.mean_survival_rate.unwrap(), 44.0, epsilon = 1e-9);
    }

    #[test]
    fn summary_of_nothing_has_no_means() {
        let summary = PredictionSummary::from_results(&[]);
        assert_eq!(summary.total, 0);
        assert_eq!(summary.mean_risk_score, None);
    }

    #[test]
    fn distribution_keeps_policy_order_and_empty_groups() {
        let mut rows = sample();
        rows.push(result("OLD-1", 0.5, "Intermediate"));
        let distribution = group_distribution(&rows, &labels());
        let expected: Vec<(String, usize)> = vec![
            ("Very Low Risk".into(), 1),
            ("Low Risk".into(), 1),
            ("Medium Risk".into(), 0),
            ("High Risk".into(), 1),
            ("Very High Risk".into(), 2),
            ("Intermediate".into(), 1),
        ];
        assert_eq!(distribution, expected);
    }

    #[test]
    fn distribution_sorts_unlisted_labels_naturally() {
        let rows = vec![
            result("a", 0.1, "Group 10"),
            result("b", 0.2, "Group 2"),
            result("c", 0.3, "Group 10"),
            result("d", 0.4, "Low Risk"),
        ];
        let labels: Vec<String> = vec!["Low Risk".into(), "High Risk".into()];
        let distribution = group_distribution(&rows, &labels);
        let expected: Vec<(String, usize)> = vec![
            ("Low Risk".into(), 1),
            ("High Risk".into(), 0),
            ("Group 2".into(), 1),
            ("Group 10".into(), 2),
        ];
        assert_eq!(distribution, expected);
        assert!(group_distribution(&[], &labels).iter().all(|(_, n)| *n == 0));
    }

    #[test]
    fn histogram_closes_the_top_bin() {
        let rows = vec![
            result("a", 0.0, "x"),
            result("b", 1.0, "x"),
            result("c", 0.5, "x"),
            result("d", 0.52, "x"),
        ];
        let histogram = score_histogram(&rows, DEFAULT_HISTOGRAM_BINS).unwrap();
        assert_eq!(histogram.len(), 20);
        assert_eq!(histogram[0].count, 1);
        assert_eq!(histogram[19].count, 1);
        assert_eq!(histogram[19].upper, 100.0);
        assert_eq!(histogram[9].count, 1);
        assert_eq!(histogram[10].count, 1);
        assert_eq!(histogram.iter().map(|b| b.count).sum::<usize>(), 4);
        assert!(matches!(score_histogram(&rows, 0), Err(ReportError::ZeroBins)));
    }

    #[test]
    fn survival_sorts_are_stable() {
        let mut rows = vec![
            result("a", 0.4, "Low Risk"),
            result("b", 0.2, "Low Risk"),
            result("c", 0.4, "Medium Risk"),
        ];
        sort_results(&mut rows, SortOrder::SurvivalDescending, &labels());
        let ids: Vec<_> = rows.iter().map(|r| r.patient_id.as_str()).collect();
        assert_eq!(ids, ["b", "a", "c"]);

        sort_results(&mut rows, SortOrder::SurvivalAscending, &labels());
        let ids: Vec<_> = rows.iter().map(|r| r.patient_id.as_str()).collect();
        assert_eq!(ids, ["a", "c", "b"]);
    }

    #[test]
    fn risk_group_sort_uses_policy_then_natural_id_order() {
        let mut rows = sample();
        rows.push(result("MM-2", 0.95, "Very High Risk"));
        sort_results(&mut rows, SortOrder::RiskGroup, &labels());
        let ids: Vec<_> = rows.iter().map(|r| r.patient_id.as_str()).collect();
        assert_eq!(ids, ["MM-002", "MM-001", "MM-003", "MM-2", "MM-009", "MM-010"]);
        assert_eq!(
            compare_groups("Low Risk", "Unlisted", &labels()),
            Ordering::Less
        );
    }

    #[test]
    fn patient_ids_compare_by_numeric_suffix() {
        assert_eq!(compare_patient_ids("MM-2", "MM-009"), Ordering::Less);
        assert_eq!(compare_patient_ids("MM-010", "MM-9"), Ordering::Greater);
        assert_eq!(compare_patient_ids("MM-002", "MM-2"), compare("MM-002", "MM-2"));
        assert_eq!(compare_patient_ids("AB-5", "MM-1"), Ordering::Less);
        assert_eq!(compare_patient_ids("P-x", "P-y"), Ordering::Less);
    }

    #[test]
    fn export_rounds_only_at_write_time() {
        let mut row = result("MM-001", 0.123456, "Very Low Risk");
        row.updated = Some("2025-03-14".to_string());
        let text = results_to_csv_string(std::slice::from_ref(&row)).unwrap();
        assert_eq!(
            text,
            "Patient_ID,Risk_Score,Risk_Group,Survival_Rate,Updated\nMM-001,0.123,Very Low Risk,87.7,2025-03-14\n"
        );
        assert_eq!(row.risk_score, 0.123456);
    }

    #[test]
    fn export_without_dates_omits_updated_column() {
        let text = results_to_csv_string(&[result("P1", 0.5, "Medium Risk")]).unwrap();
        assert_eq!(
            text,
            "Patient_ID,Risk_Score,Risk_Group,Survival_Rate\nP1,0.500,Medium Risk,50.0\n"
        );
    }

    #[test]
    fn export_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        write_results_csv(&path, &sample()).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written.lines().count(), 6);
        assert!(written.starts_with("Patient_ID,Risk_Score,Risk_Group,Survival_Rate\n"));
    }
}
