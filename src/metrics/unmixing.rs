//! Abundance-map errors for spectral unmixing.
//!
//! Abundances are flat row-major buffers of `pixels x endmembers`.

use std::f64::consts::FRAC_PI_2;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UnmixingReport {
    pub rmse: f64,
    pub per_class_rmse: Vec<f64>,
    pub per_class_rmse_sum: f64,
    pub rms_abundance_angle_distance: f64,
}

impl UnmixingReport {
    pub fn new(truth: &[f32], pred: &[f32], num_endmembers: usize) -> Result<Self> {
        let per_class_rmse = per_class_rmse(truth, pred, num_endmembers)?;
        Ok(Self {
            rmse: rmse(truth, pred)?,
            per_class_rmse_sum: per_class_rmse.iter().sum(),
            per_class_rmse,
            rms_abundance_angle_distance: rms_abundance_angle_distance(
                truth,
                pred,
                num_endmembers,
            )?,
        })
    }
}

pub fn rmse(truth: &[f32], pred: &[f32]) -> Result<f64> {
    check_lengths(truth, pred)?;
    if truth.is_empty() {
        return Ok(0.0);
    }

    let squared: f64 = truth
        .iter()
        .zip(pred)
        .map(|(&t, &p)| (t as f64 - p as f64).powi(2))
        .sum();

    Ok((squared / truth.len() as f64).sqrt())
}

pub fn per_class_rmse(truth: &[f32], pred: &[f32], num_endmembers: usize) -> Result<Vec<f64>> {
    let pixels = pixel_count(truth, pred, num_endmembers)?;
    if pixels == 0 {
        return Ok(vec![0.0; num_endmembers]);
    }

    let mut squared = vec![0.0f64; num_endmembers];
    for (t_row, p_row) in truth
        .chunks_exact(num_endmembers)
        .zip(pred.chunks_exact(num_endmembers))
    {
        for (k, (&t, &p)) in t_row.iter().zip(p_row).enumerate() {
            squared[k] += (t as f64 - p as f64).powi(2);
        }
    }

    Ok(squared
        .into_iter()
        .map(|sum| (sum / pixels as f64).sqrt())
        .collect())
}

/// Root mean square over pixels of the angle between true and predicted
/// abundance vectors.
///
/// A pixel whose vectors include a zero vector contributes an angle of 0 when
/// both are zero and pi/2 otherwise.
pub fn rms_abundance_angle_distance(
    truth: &[f32],
    pred: &[f32],
    num_endmembers: usize,
) -> Result<f64> {
    let pixels = pixel_count(truth, pred, num_endmembers)?;
    if pixels == 0 {
        return Ok(0.0);
    }

    let squared: f64 = truth
        .chunks_exact(num_endmembers)
        .zip(pred.chunks_exact(num_endmembers))
        .map(|(t, p)| angle(t, p).powi(2))
        .sum();

    Ok((squared / pixels as f64).sqrt())
}

fn angle(truth: &[f32], pred: &[f32]) -> f64 {
    let dot: f64 = truth.iter().zip(pred).map(|(&t, &p)| t as f64 * p as f64).sum();
    let norm = |v: &[f32]| v.iter().map(|&x| (x as f64).powi(2)).sum::<f64>().sqrt();
    let (truth_norm, pred_norm) = (norm(truth), norm(pred));

    match (truth_norm == 0.0, pred_norm == 0.0) {
        (true, true) => 0.0,
        (true, false) | (false, true) => FRAC_PI_2,
        (false, false) => (dot / (truth_norm * pred_norm)).clamp(-1.0, 1.0).acos(),
    }
}

fn check_lengths(truth: &[f32], pred: &[f32]) -> Result<()> {
    if truth.len() != pred.len() {
        return Err(Error::shape_mismatch(&[truth.len()], &[pred.len()]));
    }
    Ok(())
}

fn pixel_count(truth: &[f32], pred: &[f32], num_endmembers: usize) -> Result<usize> {
    check_lengths(truth, pred)?;
    if num_endmembers == 0 || truth.len() % num_endmembers != 0 {
        return Err(Error::Dataset(format!(
            "{} abundance values do not divide into {} endmembers",
            truth.len(),
            num_endmembers
        )));
    }
    Ok(truth.len() / num_endmembers)
}
