use std::str::FromStr;

use burn::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// How member predictions are combined.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Voting {
    /// Unweighted mean of all members.
    #[default]
    Mean,
}

impl FromStr for Voting {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mean" => Ok(Voting::Mean),
            other => Err(Error::Config(format!("Unsupported voting `{other}`"))),
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Ensemble {
    pub voting: Voting,
}

impl Ensemble {
    pub fn new(voting: Voting) -> Self {
        Self { voting }
    }

    /// Combines `[samples, outputs]` predictions of every member.
    pub fn vote<B: Backend>(&self, predictions: Vec<Tensor<B, 2>>) -> Result<Tensor<B, 2>> {
        let Some(first) = predictions.first() else {
            return Err(Error::Config("Ensemble has no members".to_string()));
        };
        let dims = first.dims();
        if let Some(other) = predictions.iter().find(|p| p.dims() != dims) {
            return Err(Error::shape_mismatch(&dims, &other.dims()));
        }

        tracing::debug!("Voting over {} members", predictions.len());

        match self.voting {
            Voting::Mean => Ok(Tensor::stack::<3>(predictions, 0)
                .mean_dim(0)
                .reshape(dims)),
        }
    }
}
