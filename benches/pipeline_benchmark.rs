// ========================================================================================
//
//                      MMRISK SCORING PIPELINE BENCHMARK
//
// ========================================================================================
//
// Measures one full pass of the scoring pipeline (parse, align, standardize,
// predict, stratify, export) over synthetic uploads of increasing size, with
// both classifier kinds.
//
// ========================================================================================

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use mmrisk::config::PipelineConfig;
use mmrisk::data::UploadedTable;
use mmrisk::model::{Classifier, ModelArtifact, RegressionTree, TreeNode};
use mmrisk::pipeline::RiskPipeline;
use mmrisk::report::results_to_csv_string;
use mmrisk::stratify::StratificationPolicy;
use rand::distributions::Standard;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt::Write;

/// Genes per synthetic upload, matching the size of the production signature.
const NUM_GENES: usize = 200;
const PATIENT_COUNTS: [usize; 3] = [50, 500, 5_000];
const NUM_TREES: usize = 100;

fn gene_names() -> Vec<String> {
    (1..=NUM_GENES).map(|i| format!("GENE_{i}")).collect()
}

fn synthetic_upload(rng: &mut StdRng, patients: usize) -> String {
    let mut text = gene_names().join(",");
    text.push('\n');
    for _ in 0..patients {
        let row: Vec<String> = (0..NUM_GENES)
            .map(|_| format!("{:.4}", rng.sample::<f64, _>(Standard) * 16.0))
            .collect();
        writeln!(text, "{}", row.join(",")).expect("write to string");
    }
    text
}

fn logistic_artifact(rng: &mut StdRng) -> ModelArtifact {
    ModelArtifact {
        features: gene_names(),
        classifier: Classifier::Logistic {
            intercept: -0.1,
            coefficients: (0..NUM_GENES).map(|_| rng.gen_range(-0.2..0.2)).collect(),
        },
    }
}

fn stump(rng: &mut StdRng) -> RegressionTree {
    RegressionTree {
        nodes: vec![
            TreeNode::Split {
                feature: rng.gen_range(0..NUM_GENES),
                threshold: rng.gen_range(-1.0..1.0),
                left: 1,
                right: 2,
            },
            TreeNode::Leaf {
                value: rng.gen_range(-0.1..0.1),
            },
            TreeNode::Leaf {
                value: rng.gen_range(-0.1..0.1),
            },
        ],
    }
}

fn ensemble_artifact(rng: &mut StdRng) -> ModelArtifact {
    ModelArtifact {
        features: gene_names(),
        classifier: Classifier::TreeEnsemble {
            base_score: 0.0,
            trees: (0..NUM_TREES).map(|_| stump(rng)).collect(),
        },
    }
}

fn bench_full_pass(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(7);
    let artifacts = [
        ("logistic", logistic_artifact(&mut rng)),
        ("tree_ensemble", ensemble_artifact(&mut rng)),
    ];
    let uploads: Vec<(usize, String)> = PATIENT_COUNTS
        .iter()
        .map(|&n| (n, synthetic_upload(&mut rng, n)))
        .collect();

    let mut group = c.benchmark_group("full_pass");
    for (kind, artifact) in artifacts {
        let model = artifact.into_model().expect("benchmark artifact is valid");
        let config = PipelineConfig {
            stratification: StratificationPolicy::quintile(),
            ..PipelineConfig::default()
        };
        let pipeline =
            RiskPipeline::from_artifact(model, config).expect("benchmark pipeline is valid");

        for (patients, upload) in &uploads {
            group.throughput(Throughput::Elements(*patients as u64));
            group.bench_with_input(BenchmarkId::new(kind, patients), upload, |b, text| {
                b.iter(|| {
                    let table = UploadedTable::from_csv_str(black_box(text)).ok();
                    let report = table.and_then(|t| pipeline.run_prediction(&t).ok());
                    report.and_then(|r| results_to_csv_string(&r.results).ok())
                })
            });
        }
    }
    group.finish();
}

criterion_group!(benches, bench_full_pass);
criterion_main!(benches);
