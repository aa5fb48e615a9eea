use cdlrec::algorithms::{NoiseSpec, RandomBatchSampler};
use cdlrec::*;
use ndarray::Array2;
use std::sync::Arc;

fn small_config() -> Config {
    let mut config = Config::default();
    config.model.input_dim = 16;
    config.model.hidden_dim = 8;
    config.model.num_factors = 4;
    config.pmf.max_iter = 5;
    config.training.batch_size = 8;
    config.training.n_epochs = 3;
    config.training.learning_rate = 0.01;
    config.training.verbose = false;
    config.compute.num_threads = 2;
    config.evaluation.top_m = 10;
    config
}

fn scratch(name: &str) -> String {
    std::env::temp_dir()
        .join(format!("cdlrec-integration-{}", std::process::id()))
        .join(name)
        .to_string_lossy()
        .into_owned()
}

#[test]
fn test_training_flow() {
    let mut dataset = Dataset::synthetic(12, 40, 16, 5, 7);
    dataset.hold_out(0.2, 7);
    let content = dataset.content_matrix().unwrap();
    let index = dataset.interaction_index().unwrap();

    let config = Arc::new(small_config());
    let mut service = TrainingService::new(config, dataset.num_users(), dataset.num_items()).unwrap();
    let report = service
        .run(&content, &index, &mut RandomBatchSampler::new(3))
        .unwrap();

    assert_eq!(report.epochs.len(), 3);
    assert_eq!(report.epochs[0].sweeps, 1);
    assert_eq!(report.epochs[1].sweeps, 1);
    assert!(report.epochs[2].sweeps >= 1 && report.epochs[2].sweeps <= 5);
    for epoch in &report.epochs {
        assert!(epoch.loss.is_finite());
        assert!(epoch.gen_loss > 0.0);
        assert!(epoch.neg_likelihood.is_finite());
    }
    assert_eq!(service.phase(), TrainingPhase::EpochDone);

    // Theta must be exactly the encoding of the content after the last epoch.
    let encoded = service.transform(&content).unwrap();
    assert_eq!(service.theta(), &encoded);

    let recall = service.evaluate(&index, &dataset.test_users);
    assert!(recall.evaluated_users > 0);
    assert!((0.0..=1.0).contains(&recall.recall_at_m));
}

#[test]
fn test_zero_epochs_only_initializes_item_factors() {
    let dataset = Dataset::synthetic(4, 10, 16, 3, 1);
    let content = dataset.content_matrix().unwrap();
    let index = dataset.interaction_index().unwrap();

    let mut config = small_config();
    config.training.n_epochs = 0;
    let mut service = TrainingService::new(Arc::new(config), 4, 10).unwrap();
    let users_before = service.user_factors().clone();

    let report = service
        .run(&content, &index, &mut RandomBatchSampler::new(0))
        .unwrap();

    assert!(report.epochs.is_empty());
    assert_eq!(report.final_loss(), None);
    let encoded = service.transform(&content).unwrap();
    assert_eq!(service.theta(), &encoded);
    assert_eq!(service.item_factors(), &encoded);
    assert_eq!(service.user_factors(), &users_before);
}

#[test]
fn test_tiny_dataset_skips_autoencoder_steps() {
    // Fewer items than one batch: no gradient step, PMF still runs.
    let dataset = Dataset::synthetic(3, 5, 16, 2, 2);
    let content = dataset.content_matrix().unwrap();
    let index = dataset.interaction_index().unwrap();

    let mut config = small_config();
    config.training.n_epochs = 1;
    let mut service = TrainingService::new(Arc::new(config), 3, 5).unwrap();
    let weights_before = service.autoencoder().params().clone();

    let report = service
        .run(&content, &index, &mut RandomBatchSampler::new(0))
        .unwrap();

    assert_eq!(report.epochs.len(), 1);
    assert_eq!(report.epochs[0].gen_loss, 0.0);
    assert_eq!(service.autoencoder().params(), &weights_before);
}

#[test]
fn test_model_round_trip_through_service() {
    let dataset = Dataset::synthetic(6, 16, 16, 3, 4);
    let content = dataset.content_matrix().unwrap();
    let index = dataset.interaction_index().unwrap();
    let config = Arc::new(small_config());

    let mut trained = TrainingService::new(config.clone(), 6, 16).unwrap();
    trained
        .run(&content, &index, &mut RandomBatchSampler::new(5))
        .unwrap();

    let weight_path = scratch("weights.json");
    let pmf_path = scratch("factors.json");
    trained.save_model(&weight_path, Some(&pmf_path)).unwrap();

    let mut other_config = small_config();
    other_config.training.seed = 99;
    let mut restored = TrainingService::new(Arc::new(other_config), 6, 16).unwrap();
    restored.load_model(&weight_path, Some(&pmf_path)).unwrap();

    assert_eq!(restored.user_factors(), trained.user_factors());
    assert_eq!(restored.item_factors(), trained.item_factors());
    assert_eq!(restored.theta(), trained.theta());

    let a = trained.transform(&content).unwrap();
    let b = restored.transform(&content).unwrap();
    assert!(a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() < 1e-5));

    for item in 0..16 {
        assert_eq!(
            restored.predict(0, item).unwrap(),
            trained.predict(0, item).unwrap()
        );
    }
}

#[test]
fn test_resumed_run_keeps_user_factors_and_reencodes_items() {
    let dataset = Dataset::synthetic(5, 12, 16, 3, 6);
    let content = dataset.content_matrix().unwrap();
    let index = dataset.interaction_index().unwrap();

    let mut trained = TrainingService::new(Arc::new(small_config()), 5, 12).unwrap();
    trained
        .run(&content, &index, &mut RandomBatchSampler::new(2))
        .unwrap();
    let weight_path = scratch("weights-resume.json");
    let pmf_path = scratch("factors-resume.json");
    trained.save_model(&weight_path, Some(&pmf_path)).unwrap();

    let mut config = small_config();
    config.training.n_epochs = 0;
    config.training.seed = 17;
    let mut resumed = TrainingService::new(Arc::new(config), 5, 12).unwrap();
    resumed.load_model(&weight_path, Some(&pmf_path)).unwrap();
    assert_eq!(resumed.item_factors(), trained.item_factors());

    resumed
        .run(&content, &index, &mut RandomBatchSampler::new(2))
        .unwrap();

    assert_eq!(resumed.user_factors(), trained.user_factors());
    let encoded = resumed.transform(&content).unwrap();
    assert_eq!(resumed.item_factors(), &encoded);
    assert_eq!(resumed.theta(), &encoded);
}

#[test]
fn test_load_rejects_mismatched_factors() {
    let config = Arc::new(small_config());
    let service = TrainingService::new(config.clone(), 3, 6).unwrap();
    let weight_path = scratch("weights-mismatch.json");
    let pmf_path = scratch("factors-mismatch.json");
    service.save_model(&weight_path, Some(&pmf_path)).unwrap();

    let mut bigger = TrainingService::new(config, 4, 6).unwrap();
    let err = bigger.load_model(&weight_path, Some(&pmf_path)).unwrap_err();
    assert!(matches!(err, CdlError::ShapeMismatch { .. }));
}

#[test]
fn test_content_width_mismatch() {
    let config = Arc::new(small_config());
    let mut service = TrainingService::new(config, 2, 4).unwrap();
    let content = Array2::<f32>::zeros((4, 15));
    let index = InteractionIndex::from_user_lists(vec![vec![0, 1], vec![2]], 4).unwrap();

    let err = service
        .run(&content, &index, &mut RandomBatchSampler::new(0))
        .unwrap_err();
    assert!(matches!(err, CdlError::ShapeMismatch { .. }));
}

#[test]
fn test_invalid_inputs_are_rejected() {
    assert!(matches!(
        "mask-1.5".parse::<NoiseSpec>(),
        Err(CdlError::InvalidNoiseSpec(_))
    ));
    assert!(matches!(
        "blur".parse::<NoiseSpec>(),
        Err(CdlError::InvalidNoiseSpec(_))
    ));
    assert!(matches!(
        InteractionIndex::from_user_lists(vec![vec![0, 7]], 3),
        Err(CdlError::InvalidInteractions(_))
    ));

    let mut config = small_config();
    config.pmf.b = 2.0;
    assert!(matches!(
        TrainingService::new(Arc::new(config), 1, 1),
        Err(CdlError::InvalidConfig(_))
    ));
}

#[test]
fn test_recommend_excludes_training_items() {
    let dataset = Dataset::synthetic(5, 20, 16, 4, 9);
    let content = dataset.content_matrix().unwrap();
    let index = dataset.interaction_index().unwrap();
    let mut service = TrainingService::new(Arc::new(small_config()), 5, 20).unwrap();
    service
        .run(&content, &index, &mut RandomBatchSampler::new(1))
        .unwrap();

    let seen = index.items_of(0);
    let top = service.recommend(0, 5, seen).unwrap();
    assert_eq!(top.len(), 5);
    assert!(top.iter().all(|item| !seen.contains(item)));
}
