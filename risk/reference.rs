//! Fixed validation results and clinical guidance published with the model.
//!
//! None of these figures are recomputed from uploads. They describe the
//! cohort the model was trained and validated on.

use crate::stratify::StratificationPolicy;
use std::fmt::Write;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Metric {
    pub name: &'static str,
    pub value: f64,
    pub meaning: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeneImportance {
    pub gene: &'static str,
    pub importance: f64,
    pub note: Option<&'static str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cohort {
    pub name: &'static str,
    pub role: &'static str,
    pub patients: usize,
}

/// What the model predicts and on whom it was built.
pub const OUTCOME: &str = "2-year overall survival";

pub const COHORTS: [Cohort; 2] = [
    Cohort {
        name: "TT2",
        role: "training",
        patients: 340,
    },
    Cohort {
        name: "TT3",
        role: "independent validation",
        patients: 214,
    },
];

pub const PERFORMANCE: [Metric; 6] = [
    Metric {
        name: "AUC",
        value: 0.92,
        meaning: "overall discrimination",
    },
    Metric {
        name: "MCC",
        value: 0.85,
        meaning: "robust to class imbalance",
    },
    Metric {
        name: "Recall",
        value: 0.89,
        meaning: "share of true high-risk patients caught",
    },
    Metric {
        name: "Precision",
        value: 0.91,
        meaning: "share of predicted high-risk patients who were high-risk",
    },
    Metric {
        name: "F1-Score",
        value: 0.90,
        meaning: "balance of recall and precision",
    },
    Metric {
        name: "Accuracy",
        value: 0.88,
        meaning: "share of correct classifications",
    },
];

/// Observed mortality (%) per predicted-risk decile in the validation cohort,
/// lowest-risk decile first.
pub const DECILE_MORTALITY: [f64; 10] = [0.0, 10.0, 20.0, 30.0, 45.0, 60.0, 72.0, 85.0, 93.0, 100.0];

/// Spearman correlation between decile rank and observed mortality.
pub const DECILE_SPEARMAN_RHO: f64 = 0.888;

pub const TOP_GENES: [GeneImportance; 10] = [
    GeneImportance {
        gene: "SPARC",
        importance: 0.12,
        note: Some("known MM biomarker; extracellular matrix protein"),
    },
    GeneImportance {
        gene: "C2orf74",
        importance: 0.10,
        note: None,
    },
    GeneImportance {
        gene: "FAM105A",
        importance: 0.09,
        note: None,
    },
    GeneImportance {
        gene: "AKR1C3",
        importance: 0.08,
        note: None,
    },
    GeneImportance {
        gene: "EPS8L3",
        importance: 0.08,
        note: None,
    },
    GeneImportance {
        gene: "IL2",
        importance: 0.07,
        note: Some("immune response; T-cell activation"),
    },
    GeneImportance {
        gene: "SNX2",
        importance: 0.07,
        note: None,
    },
    GeneImportance {
        gene: "LOC100506125",
        importance: 0.06,
        note: None,
    },
    GeneImportance {
        gene: "CD58",
        importance: 0.06,
        note: Some("known MM biomarker; immune regulation and prognosis"),
    },
    GeneImportance {
        gene: "ARHGEF37",
        importance: 0.05,
        note: None,
    },
];

/// One row of the clinical guidance table.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupGuidance {
    pub label: String,
    /// Score interval `[lo, hi)` covered by the group. `None` when boundaries
    /// depend on the batch (quantile policies).
    pub score_range: Option<(f64, f64)>,
    pub action: &'static str,
}

impl GroupGuidance {
    /// Expected survival interval in percent, highest first.
    pub fn survival_range(&self) -> Option<(f64, f64)> {
        self.score_range
            .map(|(lo, hi)| ((1.0 - lo) * 100.0, (1.0 - hi) * 100.0))
    }
}

/// Recommended action for a group label. Labels are matched on their risk
/// word; labels without one get no recommendation.
pub fn recommended_action(label: &str) -> &'static str {
    if label.contains("High") {
        "Aggressive / intensive therapy"
    } else if label.contains("Medium") {
        "Close monitoring / adjust treatment strategy"
    } else if label.contains("Low") {
        "Standard treatment / routine follow-up"
    } else {
        "No recommendation"
    }
}

/// Guidance rows for every group of `policy`, lowest risk first, with score
/// ranges taken from the policy's own cut points.
pub fn group_guidance(policy: &StratificationPolicy) -> Vec<GroupGuidance> {
    let labels = policy.labels();
    let ranges: Vec<Option<(f64, f64)>> = match policy {
        StratificationPolicy::FixedThreshold { cuts, .. } => {
            let mut edges = Vec::with_capacity(cuts.len() + 2);
            edges.push(0.0);
            edges.extend_from_slice(cuts);
            edges.push(1.0);
            edges.windows(2).map(|w| Some((w[0], w[1]))).collect()
        }
        StratificationPolicy::Quantile { .. } => vec![None; labels.len()],
    };
    labels
        .iter()
        .zip(ranges)
        .map(|(label, score_range)| GroupGuidance {
            label: label.clone(),
            score_range,
            action: recommended_action(label),
        })
        .collect()
}

/// Plain-text rendering of all reference tables, as printed by the CLI.
pub fn render(policy: &StratificationPolicy) -> Result<String, std::fmt::Error> {
    let mut out = String::new();
    write_report(&mut out, policy)?;
    Ok(out)
}

fn write_report(out: &mut String, policy: &StratificationPolicy) -> std::fmt::Result {
    writeln!(out, "Outcome: {OUTCOME}")?;
    for cohort in &COHORTS {
        writeln!(
            out,
            "  {:<24} {} (n={})",
            cohort.role, cohort.name, cohort.patients
        )?;
    }

    writeln!(out, "\nValidation performance")?;
    for metric in &PERFORMANCE {
        writeln!(
            out,
            "  {:<10} {:.2}  {}",
            metric.name, metric.value, metric.meaning
        )?;
    }

    writeln!(out, "\nMortality by risk decile (Spearman rho = {DECILE_SPEARMAN_RHO:.3})")?;
    for (decile, mortality) in DECILE_MORTALITY.iter().enumerate() {
        writeln!(out, "  {:>2}  {:>5.1}%", decile + 1, mortality)?;
    }

    writeln!(out, "\nTop contributing genes")?;
    for gene in &TOP_GENES {
        match gene.note {
            Some(note) => writeln!(out, "  {:<14} {:.2}  {}", gene.gene, gene.importance, note)?,
            None => writeln!(out, "  {:<14} {:.2}", gene.gene, gene.importance)?,
        }
    }

    writeln!(out, "\nRisk groups")?;
    for row in group_guidance(policy) {
        match (row.score_range, row.survival_range()) {
            (Some((lo, hi)), Some((best, worst))) => writeln!(
                out,
                "  {:<16} score {lo:.2}-{hi:.2}  survival {worst:.0}-{best:.0}%  {}",
                row.label, row.action
            )?,
            _ => writeln!(out, "  {:<16} batch quantile  {}", row.label, row.action)?,
        }
    }
    Ok(())
}
