//! Intensity scaling fitted on the training split and applied to every split.

use burn::config::Config;
use burn::data::dataset::transform::Mapper;
use serde::{Deserialize, Serialize};

use super::hyperspectral::{AbundanceItem, SpectralItem};

/// Global min-max scaling to `[0, 1]`. A constant input maps to 0.
#[derive(Config, Debug)]
pub struct MinMaxNormalize {
    pub min: f32,
    pub max: f32,
}

impl MinMaxNormalize {
    /// Range of every value in `spectra`.
    pub fn fit<'a>(spectra: impl IntoIterator<Item = &'a [f32]>) -> Self {
        let (min, max) = spectra
            .into_iter()
            .flatten()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(min, max), &v| {
                (min.min(v), max.max(v))
            });

        if min > max {
            return Self::new(0.0, 0.0);
        }
        Self::new(min, max)
    }

    pub fn apply(&self, value: f32) -> f32 {
        scale(value, self.min, self.max)
    }

    pub fn apply_all(&self, values: &mut [f32]) {
        values.iter_mut().for_each(|v| *v = self.apply(*v));
    }
}

/// Min-max scaling with a separate range per band.
///
/// Samples may hold several pixels one after another (a neighborhood), each
/// with all of its bands; every pixel is scaled band by band.
#[derive(Config, Debug)]
pub struct PerBandMinMax {
    pub min: Vec<f32>,
    pub max: Vec<f32>,
}

impl PerBandMinMax {
    pub fn fit<'a>(bands: usize, spectra: impl IntoIterator<Item = &'a [f32]>) -> Self {
        let mut min = vec![f32::INFINITY; bands];
        let mut max = vec![f32::NEG_INFINITY; bands];

        for pixel in spectra
            .into_iter()
            .flat_map(|spectrum| spectrum.chunks(bands.max(1)))
        {
            for (band, &v) in pixel.iter().enumerate() {
                min[band] = min[band].min(v);
                max[band] = max[band].max(v);
            }
        }

        // No training values: every band maps to 0.
        for (lo, hi) in min.iter_mut().zip(max.iter_mut()) {
            if *lo > *hi {
                (*lo, *hi) = (0.0, 0.0);
            }
        }

        Self::new(min, max)
    }

    pub fn bands(&self) -> usize {
        self.min.len()
    }

    pub fn apply_all(&self, spectrum: &mut [f32]) {
        let bands = self.bands();
        assert!(
            bands > 0 && spectrum.len() % bands == 0,
            "Sample of {} values does not split into pixels of {} bands",
            spectrum.len(),
            bands
        );

        for pixel in spectrum.chunks_mut(bands) {
            for (band, v) in pixel.iter_mut().enumerate() {
                *v = scale(*v, self.min[band], self.max[band]);
            }
        }
    }
}

/// Scaling fitted on training spectra, either over all bands or per band.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Normalization {
    Global(MinMaxNormalize),
    PerBand(PerBandMinMax),
}

impl Normalization {
    /// `bands` is the number of values per pixel, only used per band.
    pub fn fit<'a>(
        per_band: bool,
        bands: usize,
        spectra: impl IntoIterator<Item = &'a [f32]>,
    ) -> Self {
        if per_band {
            Normalization::PerBand(PerBandMinMax::fit(bands, spectra))
        } else {
            Normalization::Global(MinMaxNormalize::fit(spectra))
        }
    }

    pub fn apply_all(&self, spectrum: &mut [f32]) {
        match self {
            Normalization::Global(normalize) => normalize.apply_all(spectrum),
            Normalization::PerBand(normalize) => normalize.apply_all(spectrum),
        }
    }
}

impl Mapper<SpectralItem, SpectralItem> for Normalization {
    fn map(&self, item: &SpectralItem) -> SpectralItem {
        let mut item = item.clone();
        self.apply_all(&mut item.spectrum);
        item
    }
}

impl Mapper<AbundanceItem, AbundanceItem> for Normalization {
    fn map(&self, item: &AbundanceItem) -> AbundanceItem {
        let mut item = item.clone();
        self.apply_all(&mut item.spectrum);
        item
    }
}

fn scale(value: f32, min: f32, max: f32) -> f32 {
    let range = max - min;
    if range == 0.0 {
        return 0.0;
    }
    (value - min) / range
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_min_max_uses_the_training_range() {
        let train = [vec![2.0, 4.0], vec![6.0, 10.0]];
        let normalize = MinMaxNormalize::fit(train.iter().map(Vec::as_slice));
        assert_eq!((normalize.min, normalize.max), (2.0, 10.0));

        assert_eq!(normalize.apply(6.0), 0.5);
        // Values outside the training range are not clipped.
        assert_eq!(normalize.apply(12.0), 1.25);
    }

    #[test]
    fn normalization_maps_items() {
        let train = [vec![2.0, 4.0], vec![6.0, 10.0]];
        let global = Normalization::fit(false, 2, train.iter().map(Vec::as_slice));
        let per_band = Normalization::fit(true, 2, train.iter().map(Vec::as_slice));

        let item = SpectralItem {
            spectrum: vec![4.0, 7.0],
            label: 1,
        };
        assert_eq!(global.map(&item).spectrum, vec![0.25, 0.625]);
        assert_eq!(per_band.map(&item).spectrum, vec![0.5, 0.5]);
        assert_eq!(per_band.map(&item).label, 1);
    }

    #[test]
    fn constant_input_maps_to_zero() {
        let normalize = MinMaxNormalize::fit([[3.0f32, 3.0].as_slice()]);
        assert_eq!(normalize.apply(3.0), 0.0);

        let empty = MinMaxNormalize::fit(std::iter::empty::<&[f32]>());
        assert_eq!(empty.apply(1.0), 0.0);
    }

    #[test]
    fn per_band_ranges_are_independent() {
        let train = [vec![0.0, 10.0], vec![2.0, 30.0]];
        let normalize = PerBandMinMax::fit(2, train.iter().map(Vec::as_slice));
        assert_eq!(normalize.min, vec![0.0, 10.0]);
        assert_eq!(normalize.max, vec![2.0, 30.0]);

        let mut spectrum = vec![1.0, 20.0];
        normalize.apply_all(&mut spectrum);
        assert_eq!(spectrum, vec![0.5, 0.5]);
    }

    #[test]
    fn per_band_ranges_cover_every_pixel_of_a_neighborhood() {
        // Two pixels of two bands each.
        let train = [vec![0.0, 10.0, 4.0, 50.0]];
        let normalize = PerBandMinMax::fit(2, train.iter().map(Vec::as_slice));
        assert_eq!(normalize.min, vec![0.0, 10.0]);
        assert_eq!(normalize.max, vec![4.0, 50.0]);

        let mut sample = vec![2.0, 30.0, 4.0, 10.0];
        normalize.apply_all(&mut sample);
        assert_eq!(sample, vec![0.5, 0.5, 1.0, 0.0]);

        let unfitted = PerBandMinMax::fit(3, std::iter::empty::<&[f32]>());
        assert_eq!(unfitted.max, vec![0.0; 3]);
    }

    #[test]
    #[should_panic(expected = "does not split")]
    fn per_band_rejects_partial_pixels() {
        let normalize = PerBandMinMax::new(vec![0.0, 0.0], vec![1.0, 1.0]);
        normalize.apply_all(&mut [0.5; 3]);
    }
}
