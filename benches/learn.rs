use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use pdrta::prelude::*;

/// Words `(ab)^k` with geometrically decreasing frequency, half of them taking a slow `a`.
fn sample(scale: usize) -> TimedSample {
    let mut words = vec![];
    for k in 0..8usize {
        for i in 0..(scale >> k) {
            let slow = i % 2 == 0;
            let mut word = vec![];
            for _ in 0..k {
                word.push(("a", if slow { 40 + (i % 5) as u64 } else { 2 + (i % 3) as u64 }));
                word.push(if slow { ("c", 7) } else { ("b", 3) });
            }
            words.push(word);
        }
    }
    TimedSample::from_symbolic(words)
}

fn learn(c: &mut Criterion) {
    let mut group = c.benchmark_group("learn");
    for scale in [64, 256] {
        let sample = sample(scale);
        for tester in [TesterKind::Naive, TesterKind::Analytic] {
            let learner = Learner::new(LearnerConfig::default().with_tester(tester))
                .expect("default configuration is valid");
            group.bench_with_input(
                BenchmarkId::new(format!("{tester:?}"), scale),
                &sample,
                |b, sample| b.iter(|| learner.learn(black_box(sample))),
            );
        }
    }
    group.finish();
}

fn generate(c: &mut Criterion) {
    let learned = Learner::new(LearnerConfig::default())
        .and_then(|learner| learner.learn(&sample(128)))
        .expect("learning the benchmark sample succeeds");
    c.bench_function("generate 1000 words", |b| {
        let mut rng = fastrand::Rng::with_seed(1);
        b.iter(|| learned.generate_sample(&mut rng, 1000, 64))
    });
}

criterion_group!(benches, learn, generate);
criterion_main!(benches);
