pub mod properties;
pub mod rehearsal;
pub mod reports;
pub mod sample;

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use properties::{check_networked, check_offline};
pub use rehearsal::run_rehearsal;
pub use sample::{FileLoader, SampleCampaign};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub scenario_name: String,
    pub seed: String,
    pub passed: bool,
    pub checks_run: usize,
    pub failures: Vec<String>,
    #[serde(with = "duration_serde")]
    pub duration: Duration,
}

impl ScenarioResult {
    #[must_use]
    pub fn new(
        scenario_name: impl Into<String>,
        seed: impl Into<String>,
        checks_run: usize,
        failures: Vec<String>,
        duration: Duration,
    ) -> Self {
        Self {
            scenario_name: scenario_name.into(),
            seed: seed.into(),
            passed: failures.is_empty(),
            checks_run,
            failures,
            duration,
        }
    }
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u128::deserialize(deserializer)?;
        Ok(Duration::from_millis(u64::try_from(millis).unwrap_or(0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_passes_without_failures() {
        let result = ScenarioResult::new("offline", "abc", 6, Vec::new(), Duration::from_millis(4));
        assert!(result.passed);
        let failed = ScenarioResult::new("offline", "abc", 6, vec!["boom".into()], Duration::ZERO);
        assert!(!failed.passed);
    }

    #[test]
    fn durations_serialize_as_millis() {
        let result = ScenarioResult::new("rehearsal", "x", 1, Vec::new(), Duration::from_millis(1500));
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["duration"], 1500);
        let back: ScenarioResult = serde_json::from_value(json).unwrap();
        assert_eq!(back.duration, Duration::from_millis(1500));
    }
}
