//! Properties of responsibilities, EM refinement, divergence and the three
//! perturbation operators on seeded synthetic data.

use approx::assert_abs_diff_eq;
use ndarray::{array, Array1, Array2, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};

use mml_mixture::em;
use mml_mixture::perturbation::nearest_component;
use mml_mixture::responsibility;
use mml_mixture::{
    delete_component, kullback_leibler, merge_component, split_component, Covariance,
    MixtureError, MixtureState, Operation, SearchConfig,
};

// ─── helpers ─────────────────────────────────────────────────────────────────

/// 150 points from N((0,0), I), N((6,0), I) and N((0,6), I), 50 each.
fn three_blobs(seed: u64) -> Array2<f64> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut flat = Vec::with_capacity(300);
    for (cx, cy) in [(0.0, 0.0), (6.0, 0.0), (0.0, 6.0)] {
        for _ in 0..50 {
            let zx: f64 = StandardNormal.sample(&mut rng);
            let zy: f64 = StandardNormal.sample(&mut rng);
            flat.push(cx + zx);
            flat.push(cy + zy);
        }
    }
    Array2::from_shape_vec((150, 2), flat).unwrap()
}

/// Random positive-definite 2×2 matrix `A Aᵀ + 0.1 I`.
fn random_covariance(rng: &mut ChaCha8Rng) -> Covariance {
    let a = Array2::from_shape_fn((2, 2), |_| rng.gen_range(-2.0..2.0));
    Covariance::full(a.dot(&a.t()) + Array2::<f64>::eye(2) * 0.1).unwrap()
}

fn random_state(rng: &mut ChaCha8Rng, k: usize) -> MixtureState {
    let means = Array2::from_shape_fn((k, 2), |_| rng.gen_range(-5.0..10.0));
    let covariances = (0..k).map(|_| random_covariance(rng)).collect();
    let raw = Array1::from_shape_fn(k, |_| rng.gen_range(0.1..1.0));
    let weights = &raw / raw.sum();
    MixtureState::new(means, covariances, weights).unwrap()
}

/// EM-refined three-component fit of [`three_blobs`].
fn fitted_three(y: &Array2<f64>) -> em::EmOutcome {
    let state = MixtureState::new(
        array![[0.5, 0.5], [5.5, 0.5], [0.5, 5.5]],
        (0..3).map(|_| Covariance::full(Array2::eye(2)).unwrap()).collect(),
        array![0.3, 0.3, 0.4],
    )
    .unwrap();
    em::run(y.view(), state, None, None, &SearchConfig::default()).unwrap()
}

// ─── responsibilities ────────────────────────────────────────────────────────

#[test]
fn test_responsibility_columns_sum_to_one_for_random_states() {
    let y = three_blobs(1);
    let mut rng = ChaCha8Rng::seed_from_u64(99);
    for k in 1..=4 {
        let state = random_state(&mut rng, k);
        let r = responsibility::compute(y.view(), &state).unwrap();
        for column in r.matrix().axis_iter(Axis(1)) {
            assert_abs_diff_eq!(column.sum(), 1.0, epsilon = 1e-8);
            assert!(column.iter().all(|v| (0.0..=1.0).contains(v)));
        }
        assert_eq!(r.assignments().len(), 150);
    }
}

// ─── EM ──────────────────────────────────────────────────────────────────────

#[test]
fn test_em_does_not_lengthen_the_message() {
    let y = three_blobs(2);
    let mut rng = ChaCha8Rng::seed_from_u64(17);
    let mut starts = vec![MixtureState::new(
        array![[2.0, 2.0], [4.0, 1.0], [1.0, 4.0]],
        (0..3).map(|_| Covariance::full(Array2::eye(2) * 3.0).unwrap()).collect(),
        array![1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0],
    )
    .unwrap()];
    starts.extend((0..10).map(|_| random_state(&mut rng, 3)));

    for threshold in [1e-5, 1e-10] {
        let config = SearchConfig::default().with_em_convergence_threshold(threshold);
        for start in &starts {
            let out = em::run(y.view(), start.clone(), None, None, &config).unwrap();
            let trace = &out.diagnostics.message_length_trace;
            for (step, pair) in trace.windows(2).enumerate() {
                assert!(
                    pair[1] <= pair[0] + em::MESSAGE_LENGTH_TOLERANCE * pair[0].abs(),
                    "message grew at step {step}: {pair:?}"
                );
            }
            assert_abs_diff_eq!(*trace.last().unwrap(), out.message_length.total, epsilon = 1e-9);
        }
    }
}

// ─── divergence ──────────────────────────────────────────────────────────────

#[test]
fn test_divergence_is_non_negative_and_zero_only_on_identity() {
    let mut rng = ChaCha8Rng::seed_from_u64(5);
    for _ in 0..20 {
        let ca = random_covariance(&mut rng);
        let cb = random_covariance(&mut rng);
        let ma = array![rng.gen_range(-3.0..3.0), rng.gen_range(-3.0..3.0)];
        let mb = array![rng.gen_range(-3.0..3.0), rng.gen_range(-3.0..3.0)];

        let ab = kullback_leibler(ma.view(), &ca, mb.view(), &cb).unwrap();
        let ba = kullback_leibler(mb.view(), &cb, ma.view(), &ca).unwrap();
        assert!(ab > 0.0);
        assert!(ba > 0.0);
        assert!((ab - ba).abs() > 1e-9, "unexpectedly symmetric: {ab}");

        let aa = kullback_leibler(ma.view(), &ca, ma.view(), &ca).unwrap();
        assert_abs_diff_eq!(aa, 0.0, epsilon = 1e-9);
    }
}

// ─── delete ──────────────────────────────────────────────────────────────────

#[test]
fn test_delete_renormalizes_weights() {
    let y = three_blobs(3);
    let incumbent = fitted_three(&y);
    for index in 0..3 {
        let p = delete_component(
            y.view(),
            &incumbent.state,
            &incumbent.responsibility,
            index,
            &SearchConfig::default(),
        )
        .unwrap();
        assert_eq!(p.operation, Operation::Delete);
        assert_eq!(p.outcome.state.n_components(), 2);
        assert_abs_diff_eq!(p.outcome.state.weights().sum(), 1.0, epsilon = 1e-8);
    }
    // The incumbent is untouched.
    assert_eq!(incumbent.state.n_components(), 3);
}

// ─── merge / split ───────────────────────────────────────────────────────────

#[test]
fn test_merge_then_split_is_not_a_round_trip() {
    let y = three_blobs(4);
    let config = SearchConfig::default();
    let incumbent = fitted_three(&y);

    let partner = nearest_component(&incumbent.state, 2).unwrap();
    let merged = merge_component(
        y.view(),
        &incumbent.state,
        &incumbent.responsibility,
        2,
        &config,
    )
    .unwrap();
    assert_eq!(merged.partner, Some(partner));
    assert_eq!(merged.outcome.state.n_components(), 2);

    let keep = partner.min(2);
    let split = split_component(
        y.view(),
        &merged.outcome.state,
        &merged.outcome.responsibility,
        keep,
        &config,
    )
    .unwrap();
    assert_eq!(split.outcome.state.n_components(), 3);
    assert_ne!(split.outcome.state, incumbent.state);
}

#[test]
fn test_operators_reject_bad_indices_and_sizes() {
    let y = three_blobs(6);
    let config = SearchConfig::default();
    let incumbent = fitted_three(&y);
    for op in Operation::ALL {
        let err = op
            .apply(y.view(), &incumbent.state, &incumbent.responsibility, 3, &config)
            .unwrap_err();
        assert!(matches!(err, MixtureError::Configuration(_)));
    }

    let single = MixtureState::initialize(y.view(), &config).unwrap();
    let r = responsibility::compute(y.view(), &single).unwrap();
    for op in [Operation::Delete, Operation::Merge] {
        assert!(matches!(
            op.apply(y.view(), &single, &r, 0, &config),
            Err(MixtureError::Configuration(_))
        ));
    }
}
