use criterion::{criterion_group, criterion_main, Criterion};
use mmlda_rs::attack::{generate_batched, AttackKind, AttackParams, IterativeSchedule};
use mmlda_rs::backbone::{resnet, ModelVersion};
use mmlda_rs::{AttackStrategy, ClassMeans, Classifier, ClipBounds, Head, MarginLayer, ScorePolicy};
use ndarray::Array;
use ndarray::Array2;
use ndarray_rand::rand_distr::{Normal, Uniform};
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use rand_pcg::Pcg64;
use std::time::Duration;

fn build_classifier<R: Rng>(input_size: usize, rng: &mut R) -> Classifier {
    let (backbone, _) = resnet(ModelVersion::V1, input_size, 10, true, rng).unwrap();
    let means = ClassMeans::new(Array::random_using(
        (10, ModelVersion::V1.feature_dim()),
        Normal::new(0., 1.).unwrap(),
        rng,
    ))
    .unwrap();
    Classifier::new(
        backbone,
        Head::Margin(MarginLayer::new(means, ScorePolicy::Softmax)),
    )
    .unwrap()
}

fn bench(c: &mut Criterion) {
    let mut rng = Pcg64::seed_from_u64(69);
    let input_size = 784;

    let layer = MarginLayer::new(
        ClassMeans::new(Array::random_using((10, 256), Normal::new(0., 10.).unwrap(), &mut rng)).unwrap(),
        ScorePolicy::Softmax,
    );
    let embeddings: Array2<f64> = Array::random_using((50, 256), Normal::new(0., 1.).unwrap(), &mut rng);
    c.bench_function("margin::forward batch 50", |b| {
        b.iter(|| layer.forward(&embeddings.view()).unwrap())
    });

    let classifier = build_classifier(input_size, &mut rng);
    let x: Array2<f64> = Array::random_using((50, input_size), Uniform::new(0., 1.), &mut rng);
    let clip = ClipBounds::uniform(input_size, 0., 1.);

    let mut group = c.benchmark_group("attack");
    group.warm_up_time(Duration::from_secs(5));
    group.sample_size(10);
    for kind in [
        AttackKind::FastGradientMethod,
        AttackKind::BasicIterativeMethod,
        AttackKind::MomentumIterativeMethod,
        AttackKind::MadryEtAl,
    ] {
        let strategy = AttackStrategy::from_kind(kind, 1.);
        let params = AttackParams::build(kind, 8. / 256., &IterativeSchedule::default(), &clip, None);
        let mut attack_rng = StdRng::seed_from_u64(0);
        group.bench_function(format!("attack::{}", kind), |b| {
            b.iter(|| {
                generate_batched(&strategy, &classifier, &x.view(), &params, 50, &mut attack_rng).unwrap()
            })
        });
    }
    group.finish();
}

criterion_group! {
    name = benches;
    config = Criterion::default();
    targets = bench
}
criterion_main!(benches);
