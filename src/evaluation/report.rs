//! JSON and CSV reports written next to the trained artifacts.

use std::fmt::Write as _;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::metrics::{ConfusionCounts, OverlapReport};

/// Writes `value` as pretty JSON, creating missing parent directories.
pub fn save_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}

pub fn load_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Writes `metric,value` rows.
pub fn save_metrics_csv(path: &Path, rows: &[(String, f64)]) -> Result<()> {
    let mut csv = String::from("metric,value\n");
    for (metric, value) in rows {
        let _ = writeln!(csv, "{metric},{value}");
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, csv)?;
    Ok(())
}

/// Overlap metrics of one evaluated scene.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SceneReport {
    pub name: String,
    pub counts: ConfusionCounts,
    pub metrics: OverlapReport,
    pub inference_seconds: f64,
}

/// Per-scene metrics with their aggregates.
///
/// `overall` is computed from the counts summed over all scenes, `mean` is the
/// unweighted mean of the per-scene ratios.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub threshold: f32,
    pub scenes: Vec<SceneReport>,
    pub overall: OverlapReport,
    pub mean: OverlapReport,
    pub average_inference_seconds: f64,
}

impl EvaluationReport {
    pub fn new(threshold: f32, scenes: Vec<SceneReport>) -> Self {
        let total = scenes
            .iter()
            .fold(ConfusionCounts::default(), |total, scene| total + scene.counts);

        let n = scenes.len().max(1) as f64;
        let mean_of = |metric: fn(&OverlapReport) -> f64| {
            scenes.iter().map(|scene| metric(&scene.metrics)).sum::<f64>() / n
        };
        // Without scenes the mean falls back to the empty counts, like `overall`.
        let mean = if scenes.is_empty() {
            total.report()
        } else {
            OverlapReport {
                jaccard_index: mean_of(|m| m.jaccard_index),
                jaccard_loss: mean_of(|m| m.jaccard_loss),
                dice_coefficient: mean_of(|m| m.dice_coefficient),
                recall: mean_of(|m| m.recall),
                precision: mean_of(|m| m.precision),
                specificity: mean_of(|m| m.specificity),
                f1_score: mean_of(|m| m.f1_score),
            }
        };
        let average_inference_seconds =
            scenes.iter().map(|scene| scene.inference_seconds).sum::<f64>() / n;

        Self {
            threshold,
            overall: total.report(),
            mean,
            average_inference_seconds,
            scenes,
        }
    }

    /// Writes `<dir>/<name>.json` and a per-scene `<dir>/<name>.csv`.
    pub fn save(&self, dir: &Path, name: &str) -> Result<()> {
        save_json(&dir.join(format!("{name}.json")), self)?;

        let mut csv = String::from("scene");
        for (metric, _) in OverlapReport::default().entries() {
            let _ = write!(csv, ",{metric}");
        }
        csv.push_str(",inference_seconds\n");

        for scene in &self.scenes {
            csv.push_str(&csv_field(&scene.name));
            for (_, value) in scene.metrics.entries() {
                let _ = write!(csv, ",{value}");
            }
            let _ = writeln!(csv, ",{}", scene.inference_seconds);
        }

        std::fs::write(dir.join(format!("{name}.csv")), csv)?;
        Ok(())
    }
}

/// Quotes `field` when it holds a separator, quote or line break.
fn csv_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::raster::tests::scratch_dir;

    fn scene(name: &str, truth: &[f32], pred: &[f32], seconds: f64) -> SceneReport {
        let counts = ConfusionCounts::thresholded(truth, pred, 0.5).unwrap();
        SceneReport {
            name: name.to_string(),
            counts,
            metrics: counts.report(),
            inference_seconds: seconds,
        }
    }

    #[test]
    fn overall_uses_summed_counts() {
        let report = EvaluationReport::new(
            0.5,
            vec![
                scene("a", &[1.0, 1.0, 0.0, 0.0], &[1.0, 1.0, 0.0, 0.0], 1.0),
                scene("b", &[1.0, 1.0, 0.0, 0.0], &[1.0, 0.0, 1.0, 0.0], 3.0),
            ],
        );

        // a: tp 2. b: tp 1, fp 1, fn 1. Overall Jaccard 3 / 5.
        assert_eq!(report.overall.jaccard_index, 0.6);
        assert_eq!(report.mean.jaccard_index, (1.0 + 1.0 / 3.0) / 2.0);
        assert_eq!(report.average_inference_seconds, 2.0);
    }

    #[test]
    fn empty_evaluation_has_zero_metrics() {
        let report = EvaluationReport::new(0.5, Vec::new());
        let empty = ConfusionCounts::default().report();
        assert_eq!(report.overall, empty);
        assert_eq!(report.mean, empty);
        assert_eq!(report.overall.jaccard_index, 0.0);
        assert_eq!(report.overall.jaccard_loss, 1.0);
        assert_eq!(report.average_inference_seconds, 0.0);
    }

    #[test]
    fn reports_are_written_as_json_and_csv() {
        let dir = scratch_dir("evaluation-report");
        let report = EvaluationReport::new(0.5, vec![scene("s1", &[1.0], &[1.0], 0.5)]);
        report.save(&dir, "metrics").unwrap();

        let loaded: EvaluationReport = load_json(&dir.join("metrics.json")).unwrap();
        assert_eq!(loaded, report);

        let csv = std::fs::read_to_string(dir.join("metrics.csv")).unwrap();
        let mut lines = csv.lines();
        assert!(lines.next().unwrap().starts_with("scene,jaccard_index,"));
        assert!(lines.next().unwrap().starts_with("s1,1,"));

        save_metrics_csv(&dir.join("rows.csv"), &[("kappa".to_string(), 0.25)]).unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.join("rows.csv")).unwrap(),
            "metric,value\nkappa,0.25\n"
        );

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn scene_names_are_quoted_in_csv() {
        let dir = scratch_dir("evaluation-quoting");
        let report = EvaluationReport::new(
            0.5,
            vec![
                scene("LC08,path 1", &[1.0], &[1.0], 0.5),
                scene("say \"hi\"", &[1.0], &[1.0], 0.5),
            ],
        );
        report.save(&dir, "metrics").unwrap();

        let csv = std::fs::read_to_string(dir.join("metrics.csv")).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        let columns = lines[0].split(',').count();
        assert!(lines[1].starts_with("\"LC08,path 1\","));
        assert!(lines[2].starts_with("\"say \"\"hi\"\"\","));
        // Outside the quoted name, the row has as many separators as the header.
        assert_eq!(lines[1].split(',').count(), columns + 1);

        assert_eq!(csv_field("plain"), "plain");
        std::fs::remove_dir_all(&dir).ok();
    }
}
