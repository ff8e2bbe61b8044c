//! Deterministic train / validation / test splitting of labeled samples.
//!
//! Splits are computed on indices into the caller's arrays. The sample order
//! is first shuffled with a seeded `ChaCha8Rng`, so a given seed always yields
//! the same split.
//!
//! The training superset is drawn from the shuffled order, either per class
//! (stratified) or globally. The validation set is a nested, stratified draw
//! from that superset, and the test set is everything outside it.

use std::collections::BTreeMap;
use std::str::FromStr;

use burn::config::Config;
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Size of the training superset.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum TrainSize {
    /// Fraction in `(0, 1)` of each class (stratified) or of all samples.
    Fraction(f64),
    /// Number of samples per class (stratified) or in total.
    Count(usize),
}

impl TrainSize {
    fn validate(&self) -> Result<()> {
        match *self {
            TrainSize::Fraction(f) if !(f > 0.0 && f < 1.0) => Err(Error::InvalidSplit(format!(
                "train fraction must lie in (0, 1), got {f}"
            ))),
            TrainSize::Count(0) => Err(Error::InvalidSplit(
                "train count must be at least 1".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// How many of `available` samples to draw.
    fn take(&self, available: usize) -> usize {
        match *self {
            TrainSize::Fraction(f) => (available as f64 * f).floor() as usize,
            TrainSize::Count(n) => n.min(available),
        }
    }
}

impl FromStr for TrainSize {
    type Err = Error;

    /// Integers parse as counts, anything else as a fraction.
    fn from_str(s: &str) -> Result<Self> {
        let size = match s.parse::<usize>() {
            Ok(count) => TrainSize::Count(count),
            Err(_) => TrainSize::Fraction(s.parse::<f64>().map_err(|_| {
                Error::InvalidSplit(format!("`{s}` is neither a count nor a fraction"))
            })?),
        };
        size.validate()?;
        Ok(size)
    }
}

#[derive(Config, Debug)]
pub struct SplitConfig {
    pub train_size: TrainSize,
    /// Fraction of each class of the training superset moved to validation.
    #[config(default = 0.1)]
    pub val_fraction: f64,
    #[config(default = true)]
    pub stratified: bool,
    #[config(default = 0)]
    pub seed: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub val: Vec<usize>,
    pub test: Vec<usize>,
}

impl SplitIndices {
    /// Two-way split of `len` unlabeled items: the first `train_fraction` of a
    /// seeded shuffle goes to `train`, the rest to `test`.
    pub fn holdout(len: usize, train_fraction: f64, seed: u64) -> Result<Self> {
        TrainSize::Fraction(train_fraction).validate()?;
        if len == 0 {
            return Err(Error::InvalidSplit("nothing to split".to_string()));
        }

        let order = permutation(len, seed);
        let cut = TrainSize::Fraction(train_fraction).take(len);

        Ok(Self {
            train: order[..cut].to_vec(),
            val: Vec::new(),
            test: order[cut..].to_vec(),
        })
    }

    pub fn len(&self) -> usize {
        self.train.len() + self.val.len() + self.test.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Gathers `(train, val, test)` items.
    pub fn select<T: Clone>(&self, items: &[T]) -> (Vec<T>, Vec<T>, Vec<T>) {
        let gather = |indices: &[usize]| indices.iter().map(|&i| items[i].clone()).collect();
        (gather(&self.train), gather(&self.val), gather(&self.test))
    }
}

/// Seeded permutation of `0..len`.
pub fn permutation(len: usize, seed: u64) -> Vec<usize> {
    let mut order: Vec<usize> = (0..len).collect();
    order.shuffle(&mut ChaCha8Rng::seed_from_u64(seed));
    order
}

pub fn train_val_test_split(labels: &[usize], config: &SplitConfig) -> Result<SplitIndices> {
    if labels.is_empty() {
        return Err(Error::InvalidSplit("nothing to split".to_string()));
    }
    config.train_size.validate()?;
    if !(0.0..1.0).contains(&config.val_fraction) {
        return Err(Error::InvalidSplit(format!(
            "validation fraction must lie in [0, 1), got {}",
            config.val_fraction
        )));
    }

    let order = permutation(labels.len(), config.seed);
    let superset = draw(&order, labels, config.train_size, config.stratified);

    let val = if config.val_fraction > 0.0 {
        draw(&superset, labels, TrainSize::Fraction(config.val_fraction), true)
    } else {
        Vec::new()
    };

    let mut in_superset = vec![false; labels.len()];
    superset.iter().for_each(|&i| in_superset[i] = true);
    let mut in_val = vec![false; labels.len()];
    val.iter().for_each(|&i| in_val[i] = true);

    let train = superset.into_iter().filter(|&i| !in_val[i]).collect();
    let test = order.into_iter().filter(|&i| !in_superset[i]).collect();

    tracing::debug!(
        "Split {} samples (stratified: {}, seed: {})",
        labels.len(),
        config.stratified,
        config.seed
    );

    Ok(SplitIndices { train, val, test })
}

/// Draws from `candidates` (kept in their given order) either per class, in
/// ascending label order, or from the front of the whole list.
fn draw(candidates: &[usize], labels: &[usize], size: TrainSize, stratified: bool) -> Vec<usize> {
    if !stratified {
        return candidates[..size.take(candidates.len())].to_vec();
    }

    let mut by_class: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for &index in candidates {
        by_class.entry(labels[index]).or_default().push(index);
    }

    by_class
        .into_values()
        .flat_map(|members| {
            let take = size.take(members.len());
            members.into_iter().take(take)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    /// 3 classes with 50, 30 and 20 samples, interleaved.
    fn labels() -> Vec<usize> {
        let mut labels = Vec::new();
        labels.extend(std::iter::repeat(0).take(50));
        labels.extend(std::iter::repeat(1).take(30));
        labels.extend(std::iter::repeat(2).take(20));
        labels.reverse();
        labels
    }

    fn count_class(indices: &[usize], labels: &[usize], class: usize) -> usize {
        indices.iter().filter(|&&i| labels[i] == class).count()
    }

    fn assert_partition(split: &SplitIndices, n: usize) {
        let train: HashSet<_> = split.train.iter().collect();
        let val: HashSet<_> = split.val.iter().collect();
        let test: HashSet<_> = split.test.iter().collect();

        assert_eq!(train.len(), split.train.len(), "duplicate train index");
        assert_eq!(val.len(), split.val.len(), "duplicate val index");
        assert_eq!(test.len(), split.test.len(), "duplicate test index");

        assert!(train.is_disjoint(&val));
        assert!(train.is_disjoint(&test));
        assert!(val.is_disjoint(&test));

        let all: HashSet<usize> = train.into_iter().chain(val).chain(test).copied().collect();
        assert_eq!(all, (0..n).collect());
    }

    #[test]
    fn stratified_split_keeps_class_proportions() {
        let labels = labels();
        let config = SplitConfig::new(TrainSize::Fraction(0.8)).with_val_fraction(0.1);
        let split = train_val_test_split(&labels, &config).unwrap();

        assert_partition(&split, labels.len());

        for (class, size) in [(0, 50), (1, 30), (2, 20)] {
            let superset = count_class(&split.train, &labels, class)
                + count_class(&split.val, &labels, class);
            let expected = (size as f64 * 0.8).floor() as usize;
            assert_eq!(superset, expected, "class {class}");

            let val = count_class(&split.val, &labels, class);
            assert_eq!(val, (expected as f64 * 0.1).floor() as usize, "class {class}");
        }
    }

    #[test]
    fn non_stratified_split_takes_a_global_fraction() {
        let labels = labels();
        let config = SplitConfig::new(TrainSize::Fraction(0.5))
            .with_stratified(false)
            .with_val_fraction(0.0);
        let split = train_val_test_split(&labels, &config).unwrap();

        assert_partition(&split, labels.len());
        assert_eq!(split.train.len(), 50);
        assert!(split.val.is_empty());
        assert_eq!(split.test.len(), 50);
    }

    #[test]
    fn counts_are_capped_by_class_size() {
        let labels = labels();
        let config = SplitConfig::new(TrainSize::Count(25)).with_val_fraction(0.0);
        let split = train_val_test_split(&labels, &config).unwrap();

        assert_partition(&split, labels.len());
        assert_eq!(count_class(&split.train, &labels, 0), 25);
        assert_eq!(count_class(&split.train, &labels, 1), 25);
        assert_eq!(count_class(&split.train, &labels, 2), 20);
    }

    #[test]
    fn same_seed_same_split() {
        let labels = labels();
        let config = SplitConfig::new(TrainSize::Fraction(0.7)).with_seed(7);

        let first = train_val_test_split(&labels, &config).unwrap();
        let second = train_val_test_split(&labels, &config).unwrap();
        assert_eq!(first, second);

        let other = train_val_test_split(&labels, &config.clone().with_seed(8)).unwrap();
        assert_ne!(first, other);
    }

    #[test]
    fn invalid_sizes_are_rejected() {
        let labels = labels();
        for size in [TrainSize::Fraction(0.0), TrainSize::Fraction(1.0), TrainSize::Count(0)] {
            let result = train_val_test_split(&labels, &SplitConfig::new(size));
            assert!(matches!(result, Err(Error::InvalidSplit(_))));
        }

        let config = SplitConfig::new(TrainSize::Fraction(0.5)).with_val_fraction(1.0);
        assert!(train_val_test_split(&labels, &config).is_err());
        assert!(train_val_test_split(&[], &SplitConfig::new(TrainSize::Count(1))).is_err());
    }

    #[test]
    fn train_size_parses_counts_and_fractions() {
        assert_eq!("0.8".parse::<TrainSize>().unwrap(), TrainSize::Fraction(0.8));
        assert_eq!("150".parse::<TrainSize>().unwrap(), TrainSize::Count(150));
        assert!("1.5".parse::<TrainSize>().is_err());
        assert!("abc".parse::<TrainSize>().is_err());
    }

    #[test]
    fn holdout_and_select() {
        let items: Vec<char> = "abcdefghij".chars().collect();
        let split = SplitIndices::holdout(items.len(), 0.8, 3).unwrap();
        assert_partition(&split, items.len());
        assert_eq!(split.train.len(), 8);

        let (train, val, test) = split.select(&items);
        assert_eq!(train.len(), 8);
        assert!(val.is_empty());
        assert_eq!(test.len(), 2);
        assert_eq!(test[0], items[split.test[0]]);
    }
}
