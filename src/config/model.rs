//! Queueing-model and SLO tuning knobs

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Which finite-capacity queueing model the analyzer builds.
///
/// `Md1k` is the default: LLM inference service times are near-deterministic
/// (equal input/output lengths take the same accelerator time).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ModelType {
    /// M/M/1/K — Markovian arrivals, exponential service times
    #[serde(rename = "MM1K")]
    Mm1k,
    /// M/D/1/K — Markovian arrivals, deterministic service times
    #[serde(rename = "MD1K")]
    #[default]
    Md1k,
}

impl std::fmt::Display for ModelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mm1k => write!(f, "MM1K"),
            Self::Md1k => write!(f, "MD1K"),
        }
    }
}

/// Allocation policy when total demand exceeds cluster capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SaturationPolicy {
    /// No special handling; allocate until capacity runs out
    #[default]
    None,
    /// Satisfy higher-priority classes fully before lower ones
    PriorityExhaustive,
    /// Spread the shortfall across classes
    RoundRobin,
}

/// Model configuration consumed by the host reconciler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Queueing model variant (default: MD1K)
    #[serde(default)]
    pub model_type: ModelType,

    /// Tolerated percentile for latency SLOs, in (0, 1) (default: 0.95)
    #[serde(default = "default_slo_percentile")]
    pub slo_percentile: f64,

    /// System capacity as a multiple of the maximum batch size (default: 10)
    #[serde(default = "default_max_queue_to_batch_ratio")]
    pub max_queue_to_batch_ratio: u32,

    /// Penalty factor applied when switching accelerator types (default: 0.1)
    #[serde(default = "default_accel_penalty_factor")]
    pub accel_penalty_factor: f64,

    /// Allocation policy under saturation (default: none)
    #[serde(default)]
    pub saturation_policy: SaturationPolicy,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_type: ModelType::default(),
            slo_percentile: default_slo_percentile(),
            max_queue_to_batch_ratio: default_max_queue_to_batch_ratio(),
            accel_penalty_factor: default_accel_penalty_factor(),
            saturation_policy: SaturationPolicy::default(),
        }
    }
}

fn default_slo_percentile() -> f64 {
    0.95
}

fn default_max_queue_to_batch_ratio() -> u32 {
    10
}

fn default_accel_penalty_factor() -> f64 {
    0.1
}

impl ModelConfig {
    /// Multiplier turning a mean latency into the configured percentile under
    /// the exponential assumption: `-ln(1 - percentile)`.
    pub fn slo_margin(&self) -> f64 {
        -(1.0 - self.slo_percentile).ln()
    }

    /// Validate the model configuration.
    pub fn validate(&self) -> Result<()> {
        if !(self.slo_percentile > 0.0 && self.slo_percentile < 1.0) {
            return Err(Error::Config(format!(
                "slo_percentile ({}) must be in (0, 1)",
                self.slo_percentile
            )));
        }
        if self.max_queue_to_batch_ratio < 1 {
            return Err(Error::Config(format!(
                "max_queue_to_batch_ratio ({}) must be >= 1",
                self.max_queue_to_batch_ratio
            )));
        }
        if self.accel_penalty_factor < 0.0 {
            return Err(Error::Config(format!(
                "accel_penalty_factor ({}) must be non-negative",
                self.accel_penalty_factor
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let mc = ModelConfig::default();
        assert_eq!(mc.model_type, ModelType::Md1k);
        assert!((mc.slo_percentile - 0.95).abs() < f64::EPSILON);
        assert_eq!(mc.max_queue_to_batch_ratio, 10);
        assert!((mc.accel_penalty_factor - 0.1).abs() < f64::EPSILON);
        assert_eq!(mc.saturation_policy, SaturationPolicy::None);
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
            model_type = "MM1K"
            slo_percentile = 0.99
            max_queue_to_batch_ratio = 4
            accel_penalty_factor = 0.25
            saturation_policy = "priority-exhaustive"
        "#;
        let mc: ModelConfig = toml::from_str(toml).unwrap();
        assert_eq!(mc.model_type, ModelType::Mm1k);
        assert!((mc.slo_percentile - 0.99).abs() < f64::EPSILON);
        assert_eq!(mc.max_queue_to_batch_ratio, 4);
        assert_eq!(mc.saturation_policy, SaturationPolicy::PriorityExhaustive);
    }

    #[test]
    fn test_parse_minimal_toml_uses_defaults() {
        let mc: ModelConfig = toml::from_str("").unwrap();
        assert_eq!(mc.model_type, ModelType::Md1k);
        assert_eq!(mc.max_queue_to_batch_ratio, 10);
    }

    #[test]
    fn test_slo_margin() {
        let mc = ModelConfig::default();
        // -ln(0.05) ~= 2.9957
        assert!((mc.slo_margin() - 2.9957).abs() < 1e-3);
    }

    #[test]
    fn test_validate_percentile_bounds() {
        let mut mc = ModelConfig {
            slo_percentile: 0.0,
            ..ModelConfig::default()
        };
        assert!(mc.validate().is_err());
        mc.slo_percentile = 1.0;
        assert!(mc.validate().is_err());
        mc.slo_percentile = 0.5;
        assert!(mc.validate().is_ok());
    }

    #[test]
    fn test_validate_ratio() {
        let mc = ModelConfig {
            max_queue_to_batch_ratio: 0,
            ..ModelConfig::default()
        };
        let err = mc.validate().unwrap_err();
        assert!(err.to_string().contains("max_queue_to_batch_ratio"));
    }

    #[test]
    fn test_validate_penalty() {
        let mc = ModelConfig {
            accel_penalty_factor: -0.1,
            ..ModelConfig::default()
        };
        assert!(mc.validate().is_err());
    }

    #[test]
    fn test_model_type_display() {
        assert_eq!(ModelType::Mm1k.to_string(), "MM1K");
        assert_eq!(ModelType::Md1k.to_string(), "MD1K");
    }

    #[test]
    fn test_model_type_serde_names() {
        let json = serde_json::to_string(&ModelType::Md1k).unwrap();
        assert_eq!(json, "\"MD1K\"");
        let parsed: ModelType = serde_json::from_str("\"MM1K\"").unwrap();
        assert_eq!(parsed, ModelType::Mm1k);
    }
}
