mod support;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use support::fixtures::{rank_samples, write_rank_models};
use tzlink::backend::{BackendKind, DeviceError, DeviceProvider, ScoringDevice};
use tzlink::config::RunConfig;
use tzlink::ensemble::{self, EnsembleError, ProcessLauncher};
use tzlink::predictor::predict_one;

#[derive(Default)]
struct CountingDevices {
    acquired: AtomicUsize,
}

impl DeviceProvider for CountingDevices {
    fn acquire(&self) -> Result<ScoringDevice, DeviceError> {
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(ScoringDevice::cpu())
    }
}

fn worker_config(workers: u32) -> RunConfig {
    let mut conf = RunConfig::default();
    conf.general.backend = BackendKind::Cpu;
    conf.rank.workers = workers;
    conf.rank.batch_size = 3;
    conf.ensemble.worker_program = Some(PathBuf::from(env!("CARGO_BIN_EXE_tzlink")));
    conf
}

#[test]
fn every_model_is_scored_in_its_own_process() {
    let temp = tempfile::tempdir().expect("tempdir");
    let conf = worker_config(2);
    let models = write_rank_models(temp.path(), &[1.0, 2.0, 4.0]);
    let features = rank_samples().x;
    let devices = CountingDevices::default();
    let launcher = ProcessLauncher::from_config(&conf).expect("launcher");

    let prediction = ensemble::predict_detailed(&conf, &models, &features, &devices, &launcher)
        .expect("ensemble prediction");

    assert_eq!(devices.acquired.load(Ordering::SeqCst), 0);
    let pids: HashSet<u32> = prediction
        .members
        .iter()
        .map(|member| member.worker_pid.expect("worker pid"))
        .collect();
    assert_eq!(pids.len(), 3);
    assert!(!pids.contains(&std::process::id()));

    let local: Vec<_> = models
        .iter()
        .map(|model| {
            predict_one(&conf, model, &features, conf.rank.batch_size, &devices)
                .expect("local prediction")
        })
        .collect();
    for (member, expected) in prediction.members.iter().zip(&local) {
        assert_eq!(&member.scores, expected);
    }
    let expected_mean = ensemble::mean_scores(&local).expect("mean");
    assert_eq!(prediction.mean.dim(), (8, 1));
    for (got, want) in prediction.mean.iter().zip(expected_mean.iter()) {
        assert!((got - want).abs() < 1e-6, "{got} vs {want}");
    }
}

#[test]
fn missing_model_fails_the_whole_prediction() {
    let temp = tempfile::tempdir().expect("tempdir");
    let conf = worker_config(1);
    let mut models = write_rank_models(temp.path(), &[1.0]);
    models.push(temp.path().join("absent.json"));

    let err = ensemble::predict(&conf, &models, &rank_samples().x, &CountingDevices::default())
        .expect_err("missing model must fail");
    match err {
        EnsembleError::WorkerFailure { index, reason, .. } => {
            assert_eq!(index, 1);
            assert!(reason.contains("absent.json"), "{reason}");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn single_model_is_scored_in_process() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut conf = worker_config(4);
    conf.ensemble.worker_program = Some(temp.path().join("no-such-worker"));
    let models = write_rank_models(temp.path(), &[3.0]);
    let devices = CountingDevices::default();

    let scores = ensemble::predict(&conf, &models, &rank_samples().x, &devices).expect("predict");
    let direct = predict_one(&conf, &models[0], &rank_samples().x, 3, &devices).expect("direct");
    assert_eq!(scores, direct);
    assert_eq!(devices.acquired.load(Ordering::SeqCst), 2);
}
