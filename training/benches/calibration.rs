use criterion::{black_box, criterion_group, criterion_main, Criterion};
use emofuse_fusion::calibration::{fit_temperature, softmax, DEFAULT_MAX_ITER};
use emofuse_fusion::{ClassificationMetrics, FeatureVectorizer, SegmentPrediction};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Validation-sized logits with labels sampled at temperature 1.5.
fn synthetic_logits(n: usize) -> (Vec<Vec<f64>>, Vec<usize>) {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let mut logits = Vec::with_capacity(n);
    let mut labels = Vec::with_capacity(n);
    for _ in 0..n {
        let row: Vec<f64> = (0..4).map(|_| rng.gen_range(-4.0..4.0)).collect();
        let probs = softmax(&row, 1.5);
        let draw: f64 = rng.gen();
        let mut acc = 0.0;
        let mut label = 3;
        for (k, p) in probs.iter().enumerate() {
            acc += p;
            if draw < acc {
                label = k;
                break;
            }
        }
        logits.push(row);
        labels.push(label);
    }
    (logits, labels)
}

fn bench_calibration(c: &mut Criterion) {
    let (logits, labels) = synthetic_logits(2000);

    let fit = fit_temperature(&logits, &labels, DEFAULT_MAX_ITER).expect("calibration failed");
    eprintln!(
        "T={:.4} iterations={} nll {:.4} -> {:.4}",
        fit.temperature, fit.iterations, fit.nll_before, fit.nll_after
    );
    let _ = std::io::Write::flush(&mut std::io::stderr());

    c.bench_function("fit_temperature_2000", |b| {
        b.iter(|| fit_temperature(black_box(&logits), black_box(&labels), DEFAULT_MAX_ITER))
    });

    c.bench_function("classification_metrics_2000", |b| {
        b.iter(|| ClassificationMetrics::from_logits(black_box(&logits), black_box(&labels), fit.temperature))
    });
}

fn bench_vectorizer(c: &mut Criterion) {
    let vectorizer = FeatureVectorizer::new();
    let segments: Vec<SegmentPrediction> = ["ANG", "neutral", "happy", "SAD", "exc", "unknown"]
        .iter()
        .cycle()
        .take(24)
        .enumerate()
        .map(|(i, code)| SegmentPrediction::new(*code, (i % 10) as f64 / 10.0))
        .collect();

    c.bench_function("feature_vectorizer_build", |b| {
        b.iter(|| vectorizer.build(black_box(&segments), black_box("I am so tired of this"), None))
    });
}

criterion_group!(benches, bench_calibration, bench_vectorizer);
criterion_main!(benches);
