use mmlda_rs::attack::{AttackKind, IterativeSchedule};
use mmlda_rs::eval::BudgetSweep;
use mmlda_rs::{AttackStrategy, EvaluationContext, ScorePolicy, ThreatModel};
use more_asserts::assert_ge;

mod common;

const OFFSETS: [f64; 6] = [0.02, 0.05, 0.08, 0.11, 0.14, 0.2];

fn context(kind: AttackKind, threat: ThreatModel, seed: u64) -> EvaluationContext<mmlda_rs::Classifier> {
    let test_set = common::planar_test_set(&OFFSETS);
    EvaluationContext::new(
        common::planar_classifier(ScorePolicy::Softmax),
        test_set,
        common::planar_clip(),
        threat,
        AttackStrategy::from_kind(kind, 1.),
        saturating_schedule(),
        4,
        seed,
    )
    .unwrap()
}

/// Enough steps to cross the whole ball from any random start.
fn saturating_schedule() -> IterativeSchedule {
    IterativeSchedule {
        eps_iter: 2. / 256.,
        nb_iter: 40,
    }
}

fn targeted(kind: AttackKind) -> EvaluationContext<mmlda_rs::Classifier> {
    let targets = common::opposite_targets(&common::planar_test_set(&OFFSETS));
    context(kind, ThreatModel::Targeted { targets }, 0)
}

#[test]
fn zero_budget_keeps_clean_accuracy() {
    let mut ctx = context(AttackKind::FastGradientMethod, ThreatModel::Untargeted, 0);
    let report = ctx.evaluate_budget(0).unwrap();
    assert_eq!(report.accuracy, 1.);
    assert_eq!(report.eps, 0.);
}

#[test]
fn fast_gradient_flips_exactly_the_points_inside_the_budget() {
    let mut ctx = context(AttackKind::FastGradientMethod, ThreatModel::Untargeted, 0);
    let reports = ctx.run_sweep(&BudgetSweep::reference()).unwrap();
    let accuracies: Vec<f64> = reports.iter().map(|r| r.accuracy).collect();
    let expected = [5. / 6., 4. / 6., 3. / 6., 2. / 6.];
    for (acc, exp) in accuracies.iter().zip(expected.iter()) {
        assert!((acc - exp).abs() < 1e-12, "{:?}", accuracies);
    }
    assert_eq!(
        reports.iter().map(|r| r.pixel_step).collect::<Vec<_>>(),
        vec![8, 16, 24, 32]
    );
    assert!(reports.iter().all(|r| !r.targeted));
}

#[test]
fn accuracy_does_not_grow_with_the_budget() {
    for kind in [
        AttackKind::FastGradientMethod,
        AttackKind::BasicIterativeMethod,
        AttackKind::MomentumIterativeMethod,
        AttackKind::MadryEtAl,
    ] {
        let mut ctx = context(kind, ThreatModel::Untargeted, 3);
        let reports = ctx.run_sweep(&BudgetSweep::reference()).unwrap();
        assert_eq!(reports.len(), 4);
        for pair in reports.windows(2) {
            assert_ge!(pair[0].accuracy, pair[1].accuracy, "{}", kind);
        }
    }
}

#[test]
fn targeted_complement_at_the_extremes() {
    let mut ctx = targeted(AttackKind::FastGradientMethod);
    // no perturbation: every prediction is the true label, never the target
    assert_eq!(ctx.evaluate_budget(0).unwrap().accuracy, 1.);
    // a budget wider than every offset reaches every target
    let report = ctx.evaluate_budget(64).unwrap();
    assert_eq!(report.accuracy, 0.);
    assert!(report.targeted);
    assert_eq!(report.to_string(), "eps is 64\nadv_acc_target: 0.000");
}

#[test]
fn targeted_iterative_attacks_reach_targets_inside_the_budget() {
    let mut ctx = targeted(AttackKind::BasicIterativeMethod);
    let report = ctx.evaluate_budget(16).unwrap();
    // offsets below 16/256 are pulled across the boundary
    assert!((report.accuracy - 4. / 6.).abs() < 1e-12);
}

#[test]
fn seeded_sweeps_repeat() {
    let run = || {
        let mut ctx = context(AttackKind::MadryEtAl, ThreatModel::Untargeted, 11);
        ctx.run_sweep(&BudgetSweep::reference()).unwrap()
    };
    assert_eq!(run(), run());
}

#[test]
fn released_context_returns_the_model() {
    let ctx = context(AttackKind::FastGradientMethod, ThreatModel::Untargeted, 0);
    let params = ctx.attack_params(BudgetSweep::eps(8));
    assert!(!params.is_targeted());
    assert_eq!(params.nb_iter, None);
    assert!(!ctx.threat().is_targeted());
    assert_eq!(mmlda_rs::DifferentiableModel::input_dim(ctx.model()), 2);
    let model = ctx.release();
    assert_eq!(mmlda_rs::DifferentiableModel::num_classes(&model), 2);
}

#[test]
fn mismatched_targets_are_rejected() {
    let result = EvaluationContext::new(
        common::planar_classifier(ScorePolicy::Softmax),
        common::planar_test_set(&OFFSETS),
        common::planar_clip(),
        ThreatModel::Targeted {
            targets: ndarray::arr1(&[0, 1]),
        },
        AttackStrategy::from_kind(AttackKind::FastGradientMethod, 1.),
        IterativeSchedule::default(),
        4,
        0,
    );
    assert!(result.is_err());
}
