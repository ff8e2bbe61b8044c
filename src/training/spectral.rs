//! Hyperspectral pixel and neighborhood classification and unmixing drivers.

use std::path::{Path, PathBuf};

use burn::{
    data::dataloader::DataLoaderBuilder,
    data::dataset::{InMemDataset, transform::MapperDataset},
    optim::AdamConfig,
    module::AutodiffModule,
    prelude::*,
    record::CompactRecorder,
    tensor::backend::AutodiffBackend,
    train::{
        LearnerBuilder, MetricEarlyStoppingStrategy, StoppingCondition,
        metric::{
            AccuracyMetric, LossMetric,
            store::{Aggregate, Direction, Split},
        },
    },
};
use serde::{Deserialize, Serialize};

use super::cloud::{CONFIG_FILE, create_artifact_dir, load_weights, save_model};
use super::ensemble::Ensemble;
use crate::dataset::{
    AbundanceBatcher, AbundanceItem, LabeledSamples, Normalization, SpectralBatcher, SpectralItem,
    SplitConfig, TrainSize, train_val_test_split,
};
use crate::evaluation::report::{load_json, save_json, save_metrics_csv};
use crate::metrics::{ClassificationReport, UnmixingReport};
use crate::model::{SpectralCnn, SpectralCnnConfig, SpectralVariant, UnmixingCnn};
use crate::{Error, Result};

pub const EXPERIMENT_PREFIX: &str = "experiment";
pub const METRICS_FILE: &str = "metrics";
pub const NORMALIZATION_FILE: &str = "min-max.json";
pub const MODEL_CONFIG_FILE: &str = "model.json";

#[derive(Config)]
pub struct SpectralTrainingConfig {
    pub optimizer: AdamConfig,
    #[config(default = "SpectralVariant::Strided")]
    pub variant: SpectralVariant,
    #[config(default = 3)]
    pub kernel_size: usize,
    #[config(default = 16)]
    pub n_kernels: usize,
    #[config(default = 1)]
    pub n_layers: usize,
    #[config(default = 0.005)]
    pub learning_rate: f64,
    #[config(default = 150)]
    pub batch_size: usize,
    #[config(default = 10)]
    pub num_epochs: usize,
    #[config(default = 3)]
    pub patience: usize,
    /// Data loading threads, at least one.
    #[config(default = 1)]
    pub num_workers: usize,
    #[config(default = 0)]
    pub seed: u64,
    /// Scale every band with its own training range instead of the global one.
    #[config(default = false)]
    pub per_band_normalization: bool,
    /// Side of the pixel window in each sample; 1 for single spectra.
    #[config(default = 1)]
    pub neighborhood_size: usize,
}

impl SpectralTrainingConfig {
    pub fn model(&self, input_size: usize, n_classes: usize) -> SpectralCnnConfig {
        SpectralCnnConfig::new(input_size, n_classes)
            .with_variant(self.variant.clone())
            .with_kernel_size(self.kernel_size)
            .with_n_kernels(self.n_kernels)
            .with_n_layers(self.n_layers)
            .with_neighborhood_size(self.neighborhood_size)
    }

    /// Bands per pixel in samples of `values` numbers.
    pub fn bands(&self, values: usize) -> Result<usize> {
        let pixels = self.neighborhood_size.pow(2).max(1);
        if values == 0 || values % pixels != 0 {
            return Err(Error::shape_mismatch(&[pixels], &[values]));
        }
        Ok(values / pixels)
    }

    fn normalization<I: AsRef<[f32]>>(&self, train: &[I]) -> Result<Normalization> {
        let values = train.first().map_or(0, |sample| sample.as_ref().len());
        Ok(Normalization::fit(
            self.per_band_normalization,
            self.bands(values)?,
            train.iter().map(|sample| sample.as_ref()),
        ))
    }

    fn loader_workers(&self) -> usize {
        self.num_workers.max(1)
    }
}

/// Train, validation and test items normalized with the training range.
#[derive(Clone, Debug)]
pub struct PreparedSplit<I> {
    pub train: Vec<I>,
    pub val: Vec<I>,
    pub test: Vec<I>,
    pub normalization: Normalization,
}

impl<I> PreparedSplit<I> {
    fn check(&self) -> Result<()> {
        check_set_sizes(self.train.len(), self.val.len(), self.test.len())
    }
}

/// None of the three sets may be empty.
fn check_set_sizes(train: usize, val: usize, test: usize) -> Result<()> {
    if train == 0 || val == 0 || test == 0 {
        return Err(Error::InvalidSplit(format!(
            "training ({train}), validation ({val}) and test ({test}) sets must not be empty"
        )));
    }
    Ok(())
}

/// Splits labeled samples and fits the normalization on the training split.
pub fn prepare_classification(
    samples: &LabeledSamples,
    split: &SplitConfig,
    config: &SpectralTrainingConfig,
) -> Result<PreparedSplit<SpectralItem>> {
    let indices = train_val_test_split(&samples.labels(), split)?;
    let (train, val, test) = indices.select(&samples.items);
    check_set_sizes(train.len(), val.len(), test.len())?;
    let normalization = config.normalization(&train)?;

    tracing::info!(
        "Prepared {} train, {} validation and {} test pixels",
        train.len(),
        val.len(),
        test.len()
    );

    Ok(PreparedSplit {
        train,
        val,
        test,
        normalization,
    })
}

/// Random split of unmixing samples with the configuration's seed, normalized
/// with the training range.
pub fn prepare_unmixing(
    items: &[AbundanceItem],
    train_size: TrainSize,
    val_fraction: f64,
    config: &SpectralTrainingConfig,
) -> Result<PreparedSplit<AbundanceItem>> {
    let split = SplitConfig::new(train_size)
        .with_val_fraction(val_fraction)
        .with_stratified(false)
        .with_seed(config.seed);
    let indices = train_val_test_split(&vec![0; items.len()], &split)?;
    let (train, val, test) = indices.select(items);
    check_set_sizes(train.len(), val.len(), test.len())?;
    let normalization = config.normalization(&train)?;

    Ok(PreparedSplit {
        train,
        val,
        test,
        normalization,
    })
}

/// Trains a spectral classifier; the artifact directory receives the
/// training and model configurations, the normalization range and the weights.
pub fn train_spectral<B: AutodiffBackend>(
    artifact_dir: &Path,
    data: &PreparedSplit<SpectralItem>,
    num_classes: usize,
    config: &SpectralTrainingConfig,
    device: B::Device,
) -> Result<SpectralCnn<B>> {
    data.check()?;
    let bands = config.bands(data.train[0].spectrum.len())?;
    let model_config = config.model(bands, num_classes);
    prepare_artifacts(artifact_dir, config, &model_config, &data.normalization)?;

    B::seed(config.seed);

    let dataloader_train = DataLoaderBuilder::new(SpectralBatcher::<B>::new(device.clone()))
        .batch_size(config.batch_size)
        .shuffle(config.seed)
        .num_workers(config.loader_workers())
        .build(MapperDataset::new(
            InMemDataset::new(data.train.clone()),
            data.normalization.clone(),
        ));

    let dataloader_valid =
        DataLoaderBuilder::new(SpectralBatcher::<B::InnerBackend>::new(device.clone()))
            .batch_size(config.batch_size)
            .num_workers(config.loader_workers())
            .build(MapperDataset::new(
                InMemDataset::new(data.val.clone()),
                data.normalization.clone(),
            ));

    let learner = LearnerBuilder::new(artifact_dir)
        .metric_train_numeric(AccuracyMetric::new())
        .metric_valid_numeric(AccuracyMetric::new())
        .metric_train_numeric(LossMetric::new())
        .metric_valid_numeric(LossMetric::new())
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
            model_config.init::<B>(&device),
            config.optimizer.init(),
            config.learning_rate,
        );

    let model = learner.fit(dataloader_train, dataloader_valid);
    save_model(model.clone(), artifact_dir)?;

    Ok(model)
}

/// Trains an unmixing network with an MSE loss on abundances.
pub fn train_unmixing<B: AutodiffBackend>(
    artifact_dir: &Path,
    data: &PreparedSplit<AbundanceItem>,
    config: &SpectralTrainingConfig,
    device: B::Device,
) -> Result<UnmixingCnn<B>> {
    data.check()?;
    let first = &data.train[0];
    let model_config = config.model(config.bands(first.spectrum.len())?, first.abundances.len());
    prepare_artifacts(artifact_dir, config, &model_config, &data.normalization)?;

    B::seed(config.seed);

    let dataloader_train = DataLoaderBuilder::new(AbundanceBatcher::<B>::new(device.clone()))
        .batch_size(config.batch_size)
        .shuffle(config.seed)
        .num_workers(config.loader_workers())
        .build(MapperDataset::new(
            InMemDataset::new(data.train.clone()),
            data.normalization.clone(),
        ));

    let dataloader_valid =
        DataLoaderBuilder::new(AbundanceBatcher::<B::InnerBackend>::new(device.clone()))
            .batch_size(config.batch_size)
            .num_workers(config.loader_workers())
            .build(MapperDataset::new(
                InMemDataset::new(data.val.clone()),
                data.normalization.clone(),
            ));

    let learner = LearnerBuilder::new(artifact_dir)
        .metric_train_numeric(LossMetric::new())
        .metric_valid_numeric(LossMetric::new())
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
            model_config.init_unmixing::<B>(&device),
            config.optimizer.init(),
            config.learning_rate,
        );

    let model = learner.fit(dataloader_train, dataloader_valid);
    save_model(model.clone(), artifact_dir)?;

    Ok(model)
}

fn prepare_artifacts(
    artifact_dir: &Path,
    config: &SpectralTrainingConfig,
    model: &SpectralCnnConfig,
    normalization: &Normalization,
) -> Result<()> {
    create_artifact_dir(artifact_dir)?;
    config.save(artifact_dir.join(CONFIG_FILE))?;
    model.save(artifact_dir.join(MODEL_CONFIG_FILE))?;
    save_json(&artifact_dir.join(NORMALIZATION_FILE), normalization)
}

/// Restores a classifier written by [`train_spectral`] with the
/// normalization its samples need.
pub fn load_trained_spectral<B: Backend>(
    artifact_dir: &Path,
    device: &B::Device,
) -> Result<(SpectralCnn<B>, Normalization)> {
    let path = artifact_dir.join(MODEL_CONFIG_FILE);
    let model_config = SpectralCnnConfig::load(&path)
        .map_err(|err| Error::Config(format!("{}: {err:?}", path.display())))?;
    let normalization = load_json(&artifact_dir.join(NORMALIZATION_FILE))?;
    let model = load_weights(model_config.init::<B>(device), artifact_dir, device)?;

    Ok((model, normalization))
}

/// Normalizes samples and stacks them as `[n, 1, values, 1]`.
fn spectra_tensor<B: Backend>(
    spectra: &[&[f32]],
    normalization: &Normalization,
    device: &B::Device,
) -> Tensor<B, 4> {
    let values = spectra.first().map_or(0, |s| s.len());
    let mut data: Vec<f32> = spectra.concat();
    data.chunks_mut(values.max(1))
        .for_each(|sample| normalization.apply_all(sample));

    Tensor::from_data(
        TensorData::new(data, Shape::new([spectra.len(), 1, values, 1])).convert::<B::FloatElem>(),
        device,
    )
}

/// Softmax class probabilities, computed batch by batch.
pub fn predict_classes<B: Backend>(
    model: &SpectralCnn<B>,
    items: &[SpectralItem],
    normalization: &Normalization,
    batch_size: usize,
    device: &B::Device,
) -> Tensor<B, 2> {
    let batches = items
        .chunks(batch_size.max(1))
        .map(|chunk| {
            let spectra: Vec<&[f32]> = chunk.iter().map(|item| item.spectrum.as_slice()).collect();
            model.probabilities(spectra_tensor(&spectra, normalization, device))
        })
        .collect();

    Tensor::cat(batches, 0)
}

pub fn predict_abundances<B: Backend>(
    model: &UnmixingCnn<B>,
    items: &[AbundanceItem],
    normalization: &Normalization,
    batch_size: usize,
    device: &B::Device,
) -> Tensor<B, 2> {
    let batches = items
        .chunks(batch_size.max(1))
        .map(|chunk| {
            let spectra: Vec<&[f32]> = chunk.iter().map(|item| item.spectrum.as_slice()).collect();
            model.forward(spectra_tensor(&spectra, normalization, device))
        })
        .collect();

    Tensor::cat(batches, 0)
}

/// Accuracy report of class probabilities against the item labels.
pub fn classification_report<B: Backend>(
    probabilities: Tensor<B, 2>,
    items: &[SpectralItem],
    num_classes: usize,
) -> Result<ClassificationReport> {
    let [n, _] = probabilities.dims();
    let predictions: Vec<usize> = probabilities
        .argmax(1)
        .reshape([n])
        .into_data()
        .iter::<i64>()
        .map(|class| class as usize)
        .collect();
    let truth: Vec<usize> = items.iter().map(|item| item.label).collect();

    ClassificationReport::from_predictions(&predictions, &truth, num_classes)
}

pub fn unmixing_report<B: Backend>(
    abundances: Tensor<B, 2>,
    items: &[AbundanceItem],
) -> Result<UnmixingReport> {
    let [_, endmembers] = abundances.dims();
    let pred: Vec<f32> = abundances.into_data().iter::<f32>().collect();
    let truth: Vec<f32> = items
        .iter()
        .flat_map(|item| item.abundances.iter().copied())
        .collect();

    UnmixingReport::new(&truth, &pred, endmembers)
}

/// One classification experiment per seed `0..n_runs`, each written to
/// `<dest>/experiment_<i>` with its test metrics. Returns the per-run reports.
pub fn run_experiments<B: AutodiffBackend>(
    dest: &Path,
    samples: &LabeledSamples,
    split: &SplitConfig,
    config: &SpectralTrainingConfig,
    n_runs: usize,
    device: B::Device,
) -> Result<Vec<ClassificationReport>> {
    let mut reports = Vec::with_capacity(n_runs);

    for run in 0..n_runs {
        let run_dir = experiment_dir(dest, run);
        let seed = run as u64;
        tracing::info!("Experiment {run}: writing to {}", run_dir.display());

        let data = prepare_classification(samples, &split.clone().with_seed(seed), config)?;
        let run_config = SpectralTrainingConfig {
            seed,
            ..config.clone()
        };

        let model = train_spectral::<B>(
            &run_dir,
            &data,
            samples.num_classes(),
            &run_config,
            device.clone(),
        )?;

        let model = model.valid();
        let probabilities = predict_classes(
            &model,
            &data.test,
            &data.normalization,
            config.batch_size,
            &device,
        );
        let report = classification_report(probabilities, &data.test, samples.num_classes())?;

        tracing::info!(
            "Experiment {run}: OA {:.4}, AA {:.4}, kappa {:.4}",
            report.overall_accuracy,
            report.average_accuracy,
            report.kappa
        );
        save_classification_metrics(&run_dir, &report)?;
        reports.push(report);
    }

    Ok(reports)
}

/// Result of an unmixing ensemble: every member and the combined vote.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UnmixingEnsembleReport {
    pub members: Vec<UnmixingReport>,
    pub ensemble: UnmixingReport,
}

/// Trains `n_models` unmixing networks with seeds `0..n_models` on a single
/// split and combines their test predictions.
pub fn run_unmixing_ensemble<B: AutodiffBackend>(
    dest: &Path,
    data: &PreparedSplit<AbundanceItem>,
    config: &SpectralTrainingConfig,
    n_models: usize,
    ensemble: Ensemble,
    device: B::Device,
) -> Result<UnmixingEnsembleReport> {
    let mut predictions = Vec::with_capacity(n_models);
    let mut members = Vec::with_capacity(n_models);

    for member in 0..n_models {
        let run_dir = experiment_dir(dest, member);
        let run_config = SpectralTrainingConfig {
            seed: member as u64,
            ..config.clone()
        };

        let model = train_unmixing::<B>(&run_dir, data, &run_config, device.clone())?.valid();
        let abundances = predict_abundances(
            &model,
            &data.test,
            &data.normalization,
            config.batch_size,
            &device,
        );

        let report = unmixing_report(abundances.clone(), &data.test)?;
        tracing::info!("Member {member}: RMSE {:.4}", report.rmse);
        save_json(&run_dir.join(format!("{METRICS_FILE}.json")), &report)?;

        members.push(report);
        predictions.push(abundances);
    }

    let vote = ensemble.vote(predictions)?;
    let report = UnmixingEnsembleReport {
        members,
        ensemble: unmixing_report(vote, &data.test)?,
    };

    tracing::info!("Ensemble RMSE {:.4}", report.ensemble.rmse);
    save_json(&dest.join(format!("{METRICS_FILE}.json")), &report)?;

    Ok(report)
}

pub fn experiment_dir(dest: &Path, run: usize) -> PathBuf {
    dest.join(format!("{EXPERIMENT_PREFIX}_{run}"))
}

pub fn save_classification_metrics(dir: &Path, report: &ClassificationReport) -> Result<()> {
    save_json(&dir.join(format!("{METRICS_FILE}.json")), report)?;

    let mut rows = vec![
        ("overall_accuracy".to_string(), report.overall_accuracy),
        ("average_accuracy".to_string(), report.average_accuracy),
        ("kappa".to_string(), report.kappa),
    ];
    rows.extend(
        report
            .per_class_accuracy
            .iter()
            .enumerate()
            .map(|(class, &accuracy)| (format!("class_{class}_accuracy"), accuracy)),
    );
    save_metrics_csv(&dir.join(format!("{METRICS_FILE}.csv")), &rows)
}
