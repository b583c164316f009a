//! Benchmarks for backend output classification.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use deployflow::backend::Classifier;

const LONG_DEPLOY_LOG: &str = "Uploading bundle files to /Workspace/Users/ci/.bundle/transit/dev/files...\n\
    Deploying resources...\n\
    Updating deployment state...\n";

fn classify_benchmark(c: &mut Criterion) {
    let classifier = Classifier::new();
    let log = LONG_DEPLOY_LOG.repeat(200);
    let conflict = format!("{log}Error: deploy lock acquired by ci@example.com. Use --force-lock to override");
    let success = format!("{log}Deployment complete!");

    c.bench_function("classify_success", |b| {
        b.iter(|| classifier.classify(black_box(&success), true));
    });
    c.bench_function("classify_conflict", |b| {
        b.iter(|| classifier.classify(black_box(&conflict), false));
    });
    c.bench_function("classify_fallback", |b| {
        b.iter(|| classifier.classify(black_box(&log), false));
    });
}

criterion_group!(benches, classify_benchmark);
criterion_main!(benches);
