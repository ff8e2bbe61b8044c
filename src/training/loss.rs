use burn::{
    prelude::*,
    tensor::activation::{sigmoid, softmax},
};

/// Soft Jaccard loss `1 - |P ∩ T| / |P ∪ T|` on probability maps.
///
/// A single output channel is a binary foreground probability. With several
/// channels the loss is one minus the mean of the per-class soft indices.
/// An empty union yields an index of 0, so the loss is 1.
#[derive(Config, Debug)]
pub struct JaccardLossConfig {
    #[config(default = 1)]
    pub num_classes: usize,

    /// Apply sigmoid (binary) or softmax (multiclass) to raw logits first.
    #[config(default = false)]
    pub apply_activation: bool,
}

impl JaccardLossConfig {
    pub fn init(&self) -> JaccardLoss {
        self.assertions();
        JaccardLoss {
            num_classes: self.num_classes,
            apply_activation: self.apply_activation,
        }
    }

    fn assertions(&self) {
        assert!(
            self.num_classes >= 1,
            "Number of classes must be at least 1. Got {}",
            self.num_classes
        );
    }
}

#[derive(Clone, Debug)]
pub struct JaccardLoss {
    pub num_classes: usize,
    pub apply_activation: bool,
}

impl JaccardLoss {
    pub fn forward<B: Backend>(&self, inputs: Tensor<B, 4>, targets: Tensor<B, 4, Int>) -> Tensor<B, 1> {
        self.assertions(&inputs, &targets);

        let probs = match (self.apply_activation, self.num_classes) {
            (false, _) => inputs,
            (true, 1) => sigmoid(inputs),
            (true, _) => softmax(inputs, 1),
        };

        let index = if self.num_classes == 1 {
            soft_jaccard(probs, targets.float())
        } else {
            let class_indices = (0..self.num_classes)
                .map(|class_idx| {
                    let class_probs = probs.clone().narrow(1, class_idx, 1);
                    let class_targets = targets.clone().equal_elem(class_idx as i64).float();
                    soft_jaccard(class_probs, class_targets)
                })
                .collect();

            Tensor::cat(class_indices, 0).mean()
        };

        index.ones_like() - index
    }

    fn assertions<B: Backend>(&self, inputs: &Tensor<B, 4>, targets: &Tensor<B, 4, Int>) {
        let input_dims = inputs.dims();
        let target_dims = targets.dims();

        assert!(
            input_dims[0] == target_dims[0],
            "Batch size mismatch: inputs ({}) vs targets ({})",
            input_dims[0],
            target_dims[0]
        );

        assert!(
            input_dims[2] == target_dims[2] && input_dims[3] == target_dims[3],
            "Spatial dimensions mismatch: inputs ({},{}) vs targets ({},{})",
            input_dims[2],
            input_dims[3],
            target_dims[2],
            target_dims[3]
        );

        assert!(
            input_dims[1] == self.num_classes,
            "Inputs should have num_classes ({}) channels, got {}",
            self.num_classes,
            input_dims[1]
        );

        assert!(
            target_dims[1] == 1,
            "Targets should have 1 channel, got {}",
            target_dims[1]
        );
    }
}

fn soft_jaccard<B: Backend>(probs: Tensor<B, 4>, targets: Tensor<B, 4>) -> Tensor<B, 1> {
    let intersection = (probs.clone() * targets.clone()).sum();
    let union = probs.sum() + targets.sum() - intersection.clone();

    // The intersection is zero whenever the union is.
    let empty = union.clone().equal_elem(0.0);
    intersection / union.mask_fill(empty, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{ConfusionCounts, CountMode};
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn tensors(truth: [i64; 4], pred: [f32; 4]) -> (Tensor<TestBackend, 4>, Tensor<TestBackend, 4, Int>) {
        let device = Default::default();
        (
            Tensor::<TestBackend, 1>::from_floats(pred, &device).reshape([1, 1, 2, 2]),
            Tensor::<TestBackend, 1, Int>::from_ints(truth, &device).reshape([1, 1, 2, 2]),
        )
    }

    #[test]
    fn loss_is_one_minus_the_soft_index() {
        let (pred, truth) = tensors([0, 1, 1, 1], [0.2, 0.9, 0.5, 0.1]);
        let loss = JaccardLossConfig::new()
            .init()
            .forward(pred, truth)
            .into_scalar() as f64;

        let expected = ConfusionCounts::accumulate(
            &[0.0, 1.0, 1.0, 1.0],
            &[0.2, 0.9, 0.5, 0.1],
            CountMode::Soft,
        )
        .unwrap()
        .jaccard_loss();

        assert!((loss - expected).abs() < 1e-6, "{loss} != {expected}");
    }

    #[test]
    fn perfect_prediction_has_zero_loss() {
        let (pred, truth) = tensors([0, 1, 1, 0], [0.0, 1.0, 1.0, 0.0]);
        let loss = JaccardLossConfig::new().init().forward(pred, truth).into_scalar();
        assert_eq!(loss, 0.0);
    }

    #[test]
    fn empty_union_has_unit_loss() {
        let (pred, truth) = tensors([0; 4], [0.0; 4]);
        let loss = JaccardLossConfig::new().init().forward(pred, truth).into_scalar();
        assert_eq!(loss, 1.0);
    }

    #[test]
    fn multiclass_loss_averages_classes() {
        let device = Default::default();
        // Class 1 fills the whole image and is predicted perfectly; class 0 is
        // absent and never predicted, so its index is 0.
        let probs = Tensor::<TestBackend, 4>::cat(
            vec![
                Tensor::zeros([1, 1, 2, 2], &device),
                Tensor::ones([1, 1, 2, 2], &device),
            ],
            1,
        );
        let targets = Tensor::<TestBackend, 4, Int>::ones([1, 1, 2, 2], &device);

        let loss = JaccardLossConfig::new()
            .with_num_classes(2)
            .init()
            .forward(probs, targets)
            .into_scalar();
        assert!((loss - 0.5).abs() < 1e-6);
    }

    #[test]
    #[should_panic(expected = "channels")]
    fn channel_count_must_match() {
        let (pred, truth) = tensors([0; 4], [0.0; 4]);
        JaccardLossConfig::new().with_num_classes(2).init().forward(pred, truth);
    }
}
