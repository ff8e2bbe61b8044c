pub mod report;
pub mod scene;
pub mod threshold;

pub use report::{EvaluationReport, SceneReport, save_json, save_metrics_csv};
pub use scene::{ScenePrediction, evaluate_scene, evaluate_scenes, predict_scene};
pub use threshold::{
    ThresholdScore, best_threshold, threshold_candidates, threshold_scores,
    validation_threshold_scores,
};
