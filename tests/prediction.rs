use lvef::encoding::{EncodingRules, FeatureVector, encode};
use lvef::model::{Aggregation, RegressionTree, TreeEnsemble, TreeNode};
use lvef::predictor::{BORDERLINE_LOWER_BOUND, NORMAL_LOWER_BOUND, round_lvef};
use lvef::{LvefStatus, ModelError, PredictionError, Predictor, RawObservation, Regressor, TrainedModel};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

/// A plausible linear artifact: wider QRS, longer QTc and faster rates lower the estimate.
fn linear_model() -> TrainedModel {
    TrainedModel::linear(95.0, [-0.1, 1.5, 0.25, -0.2, -0.03, -0.05])
}

fn observation(age: f64, gender: &str, race: &str, qrs: f64, qt: f64, vr: f64) -> RawObservation {
    RawObservation::new()
        .with_number("age", age)
        .with_text("gender", gender)
        .with_text("race", race)
        .with_number("qrs", qrs)
        .with_number("qt", qt)
        .with_number("vr", vr)
}

/// Wraps a model and counts invocations.
struct Counting {
    inner: TrainedModel,
    calls: AtomicUsize,
}

impl Regressor for Counting {
    fn predict(&self, features: &FeatureVector) -> Result<f64, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.predict(features)
    }

    fn technique(&self) -> &'static str {
        self.inner.technique()
    }
}

#[test]
fn reference_scenario_end_to_end() {
    let model = Arc::new(Counting {
        inner: linear_model(),
        calls: AtomicUsize::new(0),
    });
    let predictor = Predictor::new(model.clone(), EncodingRules::default());
    let raw = observation(55.0, "male", "white", 100.0, 420.0, 70.0);

    assert_eq!(
        encode(&raw, predictor.rules()).unwrap().as_array(),
        &[55.0, 0.0, 0.0, 100.0, 420.0, 70.0]
    );

    let result = predictor.handle_prediction(&raw).unwrap();
    assert_eq!(model.calls.load(Ordering::SeqCst), 1);

    // 95 - 5.5 - 20 - 12.6 - 3.5
    assert_eq!(result.lvef, 53.4);
    assert_eq!(result.status, LvefStatus::BorderlineReduced);
}

#[test]
fn missing_age_is_invalid_input_and_skips_the_model() {
    let model = Arc::new(Counting {
        inner: linear_model(),
        calls: AtomicUsize::new(0),
    });
    let predictor = Predictor::new(model.clone(), EncodingRules::default());
    let raw = RawObservation::new()
        .with_text("gender", "female")
        .with_text("race", "black")
        .with_text("qrs", "100")
        .with_text("qt", "420")
        .with_text("vr", "70");

    let err = predictor.handle_prediction(&raw).unwrap_err();
    assert!(matches!(err, PredictionError::InvalidInput(_)));
    assert!(err.public_message().contains("age"));
    assert_eq!(model.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn status_always_matches_the_returned_lvef() {
    let mut rng = StdRng::seed_from_u64(0x1FEF);
    let predictor = Predictor::new(Arc::new(linear_model()), EncodingRules::default());

    for _ in 0..2_000 {
        let raw = observation(
            rng.gen_range(18.0..95.0),
            if rng.gen_bool(0.5) { "male" } else { "female" },
            ["white", "black", "asian", "other"][rng.gen_range(0..4)],
            rng.gen_range(60.0..200.0),
            rng.gen_range(350.0..520.0),
            rng.gen_range(40.0..160.0),
        );
        let result = predictor.handle_prediction(&raw).unwrap();

        assert_eq!(result.lvef, round_lvef(result.lvef));
        let expected = if result.lvef >= NORMAL_LOWER_BOUND {
            LvefStatus::Normal
        } else if result.lvef >= BORDERLINE_LOWER_BOUND {
            LvefStatus::BorderlineReduced
        } else {
            LvefStatus::Reduced
        };
        assert_eq!(result.status, expected, "lvef {}", result.lvef);
    }
}

#[test]
fn concurrent_requests_do_not_interfere() {
    let predictor = Predictor::new(Arc::new(linear_model()), EncodingRules::default());
    let inputs: Vec<RawObservation> = (0..64)
        .map(|i| {
            let i = i as f64;
            observation(30.0 + i, "female", "asian", 80.0 + i, 400.0 + i, 60.0 + i / 2.0)
        })
        .collect();

    let sequential: Vec<_> = inputs
        .iter()
        .map(|raw| predictor.handle_prediction(raw).unwrap())
        .collect();

    let concurrent: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = inputs
            .iter()
            .rev()
            .map(|raw| {
                let predictor = predictor.clone();
                scope.spawn(move || predictor.handle_prediction(raw).unwrap())
            })
            .collect();
        let mut results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        results.reverse();
        results
    });

    assert_eq!(sequential, concurrent);
}

#[test]
fn tree_ensemble_artifact_serves_requests() {
    let ensemble = TreeEnsemble {
        base_score: 0.0,
        aggregation: Aggregation::Mean,
        learning_rate: 1.0,
        trees: vec![RegressionTree {
            nodes: vec![
                TreeNode::Split {
                    feature: 3,
                    threshold: 120.0,
                    left: 1,
                    right: 2,
                },
                TreeNode::Leaf { value: 58.25 },
                TreeNode::Leaf { value: 33.5 },
            ],
        }],
    };
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.toml");
    TrainedModel::tree_ensemble(ensemble).save(&path).unwrap();

    let model = TrainedModel::load(&path).unwrap();
    let predictor = Predictor::new(Arc::new(model), EncodingRules::default());

    let narrow = predictor
        .handle_prediction(&observation(60.0, "male", "white", 96.0, 430.0, 72.0))
        .unwrap();
    assert_eq!(narrow.lvef, 58.25);
    assert_eq!(narrow.status, LvefStatus::Normal);

    let wide = predictor
        .handle_prediction(&observation(60.0, "male", "white", 148.0, 430.0, 72.0))
        .unwrap();
    assert_eq!(wide.status, LvefStatus::Reduced);
}
