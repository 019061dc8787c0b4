use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{AllocationError, Result};

pub const DEFAULT_TIME_LIMIT_SECS: f64 = 3600.0;
pub const DEFAULT_GAP_TOLERANCE: f64 = 0.001;

/// Order of the norm bounding per-source cost dispersion.
///
/// Parsed from either an integer `>= 2` or the sentinel `"inf"` (also `"unbounded"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PNorm {
    Finite(u32),
    Unbounded,
}

impl FromStr for PNorm {
    type Err = AllocationError;

    fn from_str(value: &str) -> Result<Self> {
        let value = value.trim();
        if value == "inf" || value == "unbounded" {
            return Ok(PNorm::Unbounded);
        }
        let p: u32 = value.parse().map_err(|_| {
            AllocationError::InvalidConfig(format!(
                "p must be an integer >= 2 or 'inf', got '{value}'"
            ))
        })?;
        if p < 2 {
            return Err(AllocationError::InvalidConfig(format!(
                "p should be an integer greater than or equal to 2, got {p}"
            )));
        }
        Ok(PNorm::Finite(p))
    }
}

impl TryFrom<String> for PNorm {
    type Error = AllocationError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<PNorm> for String {
    fn from(value: PNorm) -> Self {
        value.to_string()
    }
}

impl fmt::Display for PNorm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PNorm::Finite(p) => write!(f, "{p}"),
            PNorm::Unbounded => write!(f, "inf"),
        }
    }
}

/// Validated, immutable parameters of one allocation run.
#[derive(Debug, Clone, PartialEq)]
pub struct FairnessConfig {
    p_norm: PNorm,
    fairness_coefficient: f64,
    time_limit: Duration,
    gap_tolerance: f64,
}

impl FairnessConfig {
    pub fn new(p_norm: PNorm, fairness_coefficient: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&fairness_coefficient) {
            return Err(AllocationError::InvalidConfig(format!(
                "fairness coefficient should be between 0 and 1, got {fairness_coefficient}"
            )));
        }
        Ok(Self {
            p_norm,
            fairness_coefficient,
            time_limit: Duration::from_secs_f64(DEFAULT_TIME_LIMIT_SECS),
            gap_tolerance: DEFAULT_GAP_TOLERANCE,
        })
    }

    pub fn with_time_limit(mut self, seconds: f64) -> Result<Self> {
        if !(seconds > 0.0 && seconds.is_finite()) {
            return Err(AllocationError::InvalidConfig(format!(
                "time limit should be positive, got {seconds}"
            )));
        }
        self.time_limit = Duration::from_secs_f64(seconds);
        Ok(self)
    }

    pub fn with_gap_tolerance(mut self, gap: f64) -> Result<Self> {
        if !(gap >= 0.0 && gap.is_finite()) {
            return Err(AllocationError::InvalidConfig(format!(
                "gap tolerance should be non-negative, got {gap}"
            )));
        }
        self.gap_tolerance = gap;
        Ok(self)
    }

    pub fn p_norm(&self) -> PNorm {
        self.p_norm
    }

    pub fn fairness_coefficient(&self) -> f64 {
        self.fairness_coefficient
    }

    pub fn time_limit(&self) -> Duration {
        self.time_limit
    }

    pub fn gap_tolerance(&self) -> f64 {
        self.gap_tolerance
    }

    /// Normalization factor relating the L1 norm of source costs to their
    /// p-norm, for a problem with `num_sources` sources.
    pub fn eps_bar(&self, num_sources: usize) -> f64 {
        let m = num_sources as f64;
        match self.p_norm {
            PNorm::Finite(p) => {
                1.0 + self.fairness_coefficient * (m.powf(1.0 - 1.0 / p as f64) - 1.0)
            }
            PNorm::Unbounded => 1.0 + self.fairness_coefficient * (m - 1.0),
        }
    }
}

/// Optional YAML run file. Every field may be overridden from the command line.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RunFile {
    #[serde(rename = "pNorm")]
    pub p_norm: Option<PNorm>,
    #[serde(rename = "fairnessCoefficient")]
    pub fairness_coefficient: Option<f64>,
    #[serde(rename = "timeLimitInSeconds")]
    pub time_limit_in_seconds: Option<f64>,
    #[serde(rename = "gapTolerance")]
    pub gap_tolerance: Option<f64>,
}

impl RunFile {
    pub fn from_file(path: &Path) -> Result<Self> {
        let buf = std::fs::read_to_string(path).map_err(|source| AllocationError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&buf)
            .map_err(|e| AllocationError::InvalidConfig(format!("{}: {e}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_norm_orders() {
        assert_eq!("2".parse::<PNorm>().unwrap(), PNorm::Finite(2));
        assert_eq!(" 7 ".parse::<PNorm>().unwrap(), PNorm::Finite(7));
        assert_eq!("inf".parse::<PNorm>().unwrap(), PNorm::Unbounded);
        assert_eq!("unbounded".parse::<PNorm>().unwrap(), PNorm::Unbounded);
        assert!("1".parse::<PNorm>().is_err());
        assert!("0".parse::<PNorm>().is_err());
        assert!("two".parse::<PNorm>().is_err());
        assert_eq!(PNorm::Finite(3).to_string(), "3");
        assert_eq!(PNorm::Unbounded.to_string(), "inf");
    }

    #[test]
    fn rejects_out_of_range_parameters() {
        assert!(FairnessConfig::new(PNorm::Finite(2), -0.1).is_err());
        assert!(FairnessConfig::new(PNorm::Finite(2), 1.01).is_err());
        assert!(FairnessConfig::new(PNorm::Finite(2), f64::NAN).is_err());

        let config = FairnessConfig::new(PNorm::Unbounded, 0.5).unwrap();
        assert!(config.clone().with_time_limit(0.0).is_err());
        assert!(config.clone().with_time_limit(-3.0).is_err());
        assert!(config.clone().with_gap_tolerance(-1e-3).is_err());
        assert_eq!(
            config.with_time_limit(12.5).unwrap().time_limit(),
            Duration::from_secs_f64(12.5)
        );
    }

    #[test]
    fn eps_bar_collapses_without_fairness() {
        for p_norm in [PNorm::Finite(2), PNorm::Finite(5), PNorm::Unbounded] {
            let config = FairnessConfig::new(p_norm, 0.0).unwrap();
            assert_eq!(config.eps_bar(7), 1.0);
        }
    }

    #[test]
    fn eps_bar_at_full_fairness() {
        let finite = FairnessConfig::new(PNorm::Finite(2), 1.0).unwrap();
        assert!((finite.eps_bar(4) - 2.0).abs() < 1e-12);

        let max_norm = FairnessConfig::new(PNorm::Unbounded, 1.0).unwrap();
        assert_eq!(max_norm.eps_bar(4), 4.0);
    }

    #[test]
    fn reads_run_file() {
        let yaml = "pNorm: inf\nfairnessCoefficient: 0.25\ntimeLimitInSeconds: 60\n";
        let run: RunFile = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(run.p_norm, Some(PNorm::Unbounded));
        assert_eq!(run.fairness_coefficient, Some(0.25));
        assert_eq!(run.time_limit_in_seconds, Some(60.0));
        assert_eq!(run.gap_tolerance, None);

        let plain: RunFile = serde_yaml::from_str("pNorm: 2\n").unwrap();
        assert_eq!(plain.p_norm, Some(PNorm::Finite(2)));

        let bad: std::result::Result<RunFile, _> = serde_yaml::from_str("pNorm: '1'\n");
        assert!(bad.is_err());
    }
}
