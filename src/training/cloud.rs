//! Cloud segmentation training on 38-Cloud patches.

use std::path::Path;

use burn::{
    data::dataloader::DataLoaderBuilder,
    optim::AdamConfig,
    prelude::*,
    record::CompactRecorder,
    tensor::backend::AutodiffBackend,
    train::{
        LearnerBuilder, MetricEarlyStoppingStrategy, StoppingCondition,
        metric::{
            LossMetric,
            store::{Aggregate, Direction, Split},
        },
    },
};

use super::metrics::{
    DiceMetric, F1Metric, JaccardMetric, PrecisionMetric, RecallMetric, SpecificityMetric,
};
use crate::dataset::{
    CloudPatchDataset, CloudPatchFiles, SegmentationBatcher, SegmentationConfig,
    cloud::BANDS,
};
use crate::model::{UNet, UNetConfig};
use crate::{Error, Result};

pub const CONFIG_FILE: &str = "config.json";
pub const MODEL_FILE: &str = "model";

#[derive(Config)]
pub struct CloudTrainingConfig {
    pub model: UNetConfig,
    pub optimizer: AdamConfig,
    #[config(default = 8)]
    pub batch_size: usize,
    #[config(default = 200)]
    pub num_epochs: usize,
    #[config(default = 0.01)]
    pub learning_rate: f64,
    /// Epochs without validation loss improvement before stopping.
    #[config(default = 20)]
    pub patience: usize,
    #[config(default = 0.8)]
    pub train_fraction: f64,
    #[config(default = 384)]
    pub patch_size: usize,
    /// Data loading threads, at least one.
    #[config(default = 4)]
    pub num_workers: usize,
    #[config(default = 42)]
    pub seed: u64,
}

impl CloudTrainingConfig {
    pub fn segmentation(&self) -> SegmentationConfig {
        SegmentationConfig::new()
            .with_channels(self.model.input_channels)
            .with_patch_size(self.patch_size)
    }
}

pub(crate) fn create_artifact_dir(artifact_dir: &Path) -> Result<()> {
    std::fs::remove_dir_all(artifact_dir).ok();
    std::fs::create_dir_all(artifact_dir)?;
    Ok(())
}

pub(crate) fn save_model<B: Backend, M: Module<B>>(model: M, artifact_dir: &Path) -> Result<()> {
    let path = artifact_dir.join(MODEL_FILE);
    model
        .save_file(path.clone(), &CompactRecorder::new())
        .map_err(|err| Error::Record {
            path,
            message: format!("{err:?}"),
        })
}

pub(crate) fn load_weights<B: Backend, M: Module<B>>(
    model: M,
    artifact_dir: &Path,
    device: &B::Device,
) -> Result<M> {
    let path = artifact_dir.join(MODEL_FILE);
    model
        .load_file(path.clone(), &CompactRecorder::new(), device)
        .map_err(|err| Error::Record {
            path,
            message: format!("{err:?}"),
        })
}

pub(crate) fn load_config<C: Config>(artifact_dir: &Path) -> Result<C> {
    let path = artifact_dir.join(CONFIG_FILE);
    C::load(&path).map_err(|err| Error::Config(format!("{}: {err:?}", path.display())))
}

/// Trains a U-Net and saves its configuration and weights in `artifact_dir`.
pub fn train_clouds<B: AutodiffBackend>(
    artifact_dir: &Path,
    train_files: Vec<CloudPatchFiles>,
    valid_files: Vec<CloudPatchFiles>,
    config: CloudTrainingConfig,
    device: B::Device,
) -> Result<UNet<B>> {
    if config.model.input_channels != BANDS.len() {
        return Err(Error::Config(format!(
            "38-Cloud patches have {} bands, model expects {}",
            BANDS.len(),
            config.model.input_channels
        )));
    }
    if train_files.is_empty() || valid_files.is_empty() {
        return Err(Error::Dataset(
            "Training and validation sets must not be empty".to_string(),
        ));
    }

    create_artifact_dir(artifact_dir)?;
    config.save(artifact_dir.join(CONFIG_FILE))?;

    B::seed(config.seed);

    tracing::info!(
        "Training on {} patches, validating on {}",
        train_files.len(),
        valid_files.len()
    );

    let batcher_train = SegmentationBatcher::<B>::new(device.clone(), config.segmentation());
    let batcher_valid =
        SegmentationBatcher::<B::InnerBackend>::new(device.clone(), config.segmentation());

    let dataloader_train = DataLoaderBuilder::new(batcher_train)
        .batch_size(config.batch_size)
        .shuffle(config.seed)
        .num_workers(config.num_workers.max(1))
        .build(CloudPatchDataset::new(train_files));

    let dataloader_valid = DataLoaderBuilder::new(batcher_valid)
        .batch_size(config.batch_size)
        .num_workers(config.num_workers.max(1))
        .build(CloudPatchDataset::new(valid_files));

    let learner = LearnerBuilder::new(artifact_dir)
        .metric_train_numeric(LossMetric::new())
        .metric_valid_numeric(LossMetric::new())
        .metric_train_numeric(JaccardMetric::new())
        .metric_valid_numeric(JaccardMetric::new())
        .metric_valid_numeric(DiceMetric::new())
        .metric_valid_numeric(PrecisionMetric::new())
        .metric_valid_numeric(RecallMetric::new())
        .metric_valid_numeric(SpecificityMetric::new())
        .metric_valid_numeric(F1Metric::new())
        .with_file_checkpointer(CompactRecorder::new())
        .early_stopping(MetricEarlyStoppingStrategy::new::<LossMetric<B>>(
            Aggregate::Mean,
            Direction::Lowest,
            Split::Valid,
            StoppingCondition::NoImprovementSince {
                n_epochs: config.patience,
            },
        ))
        .devices(vec![device.clone()])
        .num_epochs(config.num_epochs)
        .summary()
        .build(
            config.model.init::<B>(&device),
            config.optimizer.init(),
            config.learning_rate,
        );

    let model_trained = learner.fit(dataloader_train, dataloader_valid);

    save_model(model_trained.clone(), artifact_dir)?;
    tracing::info!("Saved trained model to {}", artifact_dir.display());

    Ok(model_trained)
}

/// Restores the U-Net written by [`train_clouds`].
pub fn load_trained_unet<B: Backend>(
    artifact_dir: &Path,
    device: &B::Device,
) -> Result<(UNet<B>, CloudTrainingConfig)> {
    let config: CloudTrainingConfig = load_config(artifact_dir)?;
    let model = load_weights(config.model.init::<B>(device), artifact_dir, device)?;

    Ok((model, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::cloud::tests::write_textured_patch;
    use crate::dataset::load_image_paths;
    use crate::dataset::raster::tests::scratch_dir;
    use burn::backend::{Autodiff, NdArray};

    #[test]
    fn config_round_trips_through_json() {
        let dir = scratch_dir("cloud-config");
        let config = CloudTrainingConfig::new(
            UNetConfig::new().with_base_channels(8),
            AdamConfig::new(),
        )
        .with_patience(5);

        config.save(dir.join(CONFIG_FILE)).unwrap();
        let loaded: CloudTrainingConfig = load_config(&dir).unwrap();

        assert_eq!(loaded.patience, 5);
        assert_eq!(loaded.model.base_channels, 8);
        assert_eq!(loaded.learning_rate, 0.01);
        assert_eq!(loaded.segmentation().channels, 4);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn saved_weights_load_back() {
        let dir = scratch_dir("cloud-weights");
        let device = Default::default();
        let config = CloudTrainingConfig::new(
            UNetConfig::new().with_base_channels(2),
            AdamConfig::new(),
        );
        config.save(dir.join(CONFIG_FILE)).unwrap();

        let model = config.model.init::<NdArray<f32>>(&device);
        save_model(model.clone(), &dir).unwrap();

        let (loaded, _) = load_trained_unet::<NdArray<f32>>(&dir, &device).unwrap();
        let input = Tensor::ones([1, 4, 16, 16], &device);
        loaded
            .forward(input.clone())
            .into_data()
            .assert_approx_eq(&model.forward(input).into_data(), 5);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn band_count_is_checked() {
        let dir = scratch_dir("cloud-bands");
        let config = CloudTrainingConfig::new(
            UNetConfig::new().with_input_channels(3),
            AdamConfig::new(),
        );
        let result = train_clouds::<Autodiff<NdArray<f32>>>(
            &dir,
            Vec::new(),
            Vec::new(),
            config,
            Default::default(),
        );
        assert!(matches!(result, Err(Error::Config(_))));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn one_epoch_writes_a_loadable_model() {
        let root = scratch_dir("cloud-train-data");
        for (i, cloudy_rows) in [0, 4, 8, 16].into_iter().enumerate() {
            write_textured_patch(&root, &format!("patch_{i}"), 16, cloudy_rows);
        }
        let (train_files, valid_files) = load_image_paths(&root, 0.5, 0).unwrap();

        let dir = scratch_dir("cloud-train");
        let device = Default::default();
        let config = CloudTrainingConfig::new(
            UNetConfig::new().with_base_channels(2),
            AdamConfig::new(),
        )
        .with_num_epochs(1)
        .with_batch_size(2)
        .with_patch_size(16)
        .with_num_workers(1);

        train_clouds::<Autodiff<NdArray<f32>>>(&dir, train_files, valid_files, config, device)
            .unwrap();
        assert!(dir.join(CONFIG_FILE).is_file());
        assert!(dir.join(format!("{MODEL_FILE}.mpk")).is_file());

        let (model, config) = load_trained_unet::<NdArray<f32>>(&dir, &device).unwrap();
        assert_eq!(config.patch_size, 16);
        let probabilities = model.forward(Tensor::zeros([1, 4, 16, 16], &device));
        assert_eq!(probabilities.dims(), [1, 1, 16, 16]);

        std::fs::remove_dir_all(&root).ok();
        std::fs::remove_dir_all(&dir).ok();
    }
}
