//! Optional statistical scoring path.
//!
//! A trained outlier model is consumed as a black box behind [`AnomalyModel`].
//! The feature vector shape is the model contract and must match what the
//! model saw at training time; a mismatch disables this path, it never takes
//! signature detection down with it.

use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use std::path::Path;
use std::sync::LazyLock;

use crate::parser::LogRecord;

/// Feature names in model order. Index i of a feature vector is the 0/1
/// value of the predicate named here at index i.
pub const FEATURE_NAMES: [&str; 6] = [
    "is_failed_login",
    "is_success_login",
    "is_root_access",
    "is_admin_path",
    "is_web",
    "is_cron",
];

static RE_ADMIN_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/admin|/config|/\.git").expect("regex"));

/// Boolean predicates over the raw line, in [`FEATURE_NAMES`] order.
pub fn featurize(record: &LogRecord) -> [f64; 6] {
    let line = record.raw_text.as_str();
    let bit = |b: bool| if b { 1.0 } else { 0.0 };
    [
        bit(line.contains("Failed password") || line.contains("Invalid user")),
        bit(line.contains("Accepted password") || line.contains("Accepted publickey")),
        bit(line.contains("sudo") || line.contains("USER=root")),
        bit(RE_ADMIN_PATH.is_match(line)),
        bit(line.contains("GET") || line.contains("POST")),
        bit(line.contains("CRON")),
    ]
}

/// Black-box scoring function over a fixed-shape feature vector.
/// Lower scores mean more anomalous.
pub trait AnomalyModel: Send + Sync {
    fn score(&self, features: &[f64]) -> f64;
}

/// Linear decision function exported from an offline-trained model:
/// `score = bias + weights . features`.
#[derive(Debug, Deserialize)]
pub struct LinearModel {
    pub weights: Vec<f64>,
    pub bias: f64,
}

impl LinearModel {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading model file {}", path.display()))?;
        let model: LinearModel =
            serde_json::from_str(&content).context("parsing model file")?;
        if model.weights.len() != FEATURE_NAMES.len() {
            anyhow::bail!(
                "model expects {} features, this build produces {}",
                model.weights.len(),
                FEATURE_NAMES.len()
            );
        }
        Ok(model)
    }
}

impl AnomalyModel for LinearModel {
    fn score(&self, features: &[f64]) -> f64 {
        self.bias
            + self
                .weights
                .iter()
                .zip(features)
                .map(|(w, x)| w * x)
                .sum::<f64>()
    }
}

/// Scorer wrapper pairing a model with the sensitivity threshold.
pub struct AnomalyScorer {
    model: Box<dyn AnomalyModel>,
    threshold: f64,
}

impl AnomalyScorer {
    pub fn new(model: Box<dyn AnomalyModel>, threshold: f64) -> Self {
        Self { model, threshold }
    }

    pub fn score(&self, record: &LogRecord) -> f64 {
        self.model.score(&featurize(record))
    }

    pub fn is_anomalous(&self, record: &LogRecord) -> bool {
        self.score(record) < self.threshold
    }

    /// Short human explanation of which trained predicates fired, in the
    /// shape the original alert messages used.
    pub fn reasons(record: &LogRecord) -> String {
        let features = featurize(record);
        let mut reasons = Vec::new();
        if features[0] == 1.0 {
            reasons.push("Failed login");
        }
        if features[3] == 1.0 {
            reasons.push("Admin path access");
        }
        if features[2] == 1.0 {
            reasons.push("Root access");
        }
        if features[4] == 1.0 {
            reasons.push("Suspicious web request");
        }
        if reasons.is_empty() {
            "General anomaly".to_string()
        } else {
            reasons.join(", ")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::extract;
    use std::io::Write;

    fn record(line: &str) -> LogRecord {
        extract(line)
    }

    #[test]
    fn featurize_ssh_failure() {
        let rec = record("sshd[99]: Failed password for invalid user admin from 203.0.113.9");
        let f = featurize(&rec);
        assert_eq!(f[0], 1.0);
        assert_eq!(f[1], 0.0);
        assert_eq!(f[4], 0.0);
    }

    #[test]
    fn featurize_web_admin_request() {
        let rec = record(r#"192.0.2.1 - - [10/Oct/2024:13:55:36 +0000] "GET /admin HTTP/1.1" 403 1"#);
        let f = featurize(&rec);
        assert_eq!(f[3], 1.0);
        assert_eq!(f[4], 1.0);
        assert_eq!(f[0], 0.0);
    }

    #[test]
    fn featurize_cron_and_sudo() {
        let rec = record("CRON[123]: (root) CMD (run-parts /etc/cron.hourly)");
        assert_eq!(featurize(&rec)[5], 1.0);

        let rec = record("sudo: operator : TTY=pts/0 ; USER=root ; COMMAND=/bin/ls");
        assert_eq!(featurize(&rec)[2], 1.0);
    }

    struct FixedModel(f64);
    impl AnomalyModel for FixedModel {
        fn score(&self, _features: &[f64]) -> f64 {
            self.0
        }
    }

    #[test]
    fn threshold_is_strict_lower_bound() {
        let rec = record("anything");
        let scorer = AnomalyScorer::new(Box::new(FixedModel(-0.05)), -0.05);
        assert!(!scorer.is_anomalous(&rec));
        let scorer = AnomalyScorer::new(Box::new(FixedModel(-0.051)), -0.05);
        assert!(scorer.is_anomalous(&rec));
    }

    #[test]
    fn raising_threshold_never_unflags() {
        let rec = record("sshd[99]: Failed password for root from 203.0.113.9");
        let score = -0.1;
        let thresholds = [-0.5, -0.1, -0.05, 0.0, 0.5];
        let mut previous: Option<bool> = None;
        for t in thresholds {
            let scorer = AnomalyScorer::new(Box::new(FixedModel(score)), t);
            let flagged = scorer.is_anomalous(&rec);
            if let Some(prev) = previous {
                // Monotone: once anomalous at a lower threshold, still
                // anomalous at every higher one.
                assert!(!prev || flagged);
            }
            previous = Some(flagged);
        }
    }

    #[test]
    fn linear_model_scores_dot_product_plus_bias() {
        let model = LinearModel {
            weights: vec![-1.0, 0.5, 0.0, -0.25, 0.1, 0.0],
            bias: 0.2,
        };
        let rec = record("sshd[99]: Failed password for root from 203.0.113.9");
        // features: failed_login=1, rest 0 for this line
        let got = model.score(&featurize(&rec));
        assert!((got - (0.2 - 1.0)).abs() < 1e-9);
    }

    #[test]
    fn model_load_rejects_wrong_dimension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        let mut f = std::fs::File::create(&path).unwrap();
        write!(f, r#"{{"weights": [1.0, 2.0], "bias": 0.0}}"#).unwrap();
        drop(f);
        assert!(LinearModel::load(&path).is_err());
    }

    #[test]
    fn model_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        std::fs::write(
            &path,
            r#"{"weights": [-1.0, 0.0, -0.5, -0.5, 0.1, 0.0], "bias": 0.05}"#,
        )
        .unwrap();
        let model = LinearModel::load(&path).unwrap();
        assert_eq!(model.weights.len(), 6);
        assert!((model.bias - 0.05).abs() < 1e-12);
    }

    #[test]
    fn reasons_summarize_fired_predicates() {
        let rec = record("sshd[99]: Failed password for root from 203.0.113.9");
        assert_eq!(AnomalyScorer::reasons(&rec), "Failed login");

        let rec = record("plain uneventful line");
        assert_eq!(AnomalyScorer::reasons(&rec), "General anomaly");
    }
}
