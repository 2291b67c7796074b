//! Translation between integer state codes and the labels keying the weight table.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::Deserialize;

use crate::RiskError;

/// Code used by profiles and legends for an unknown value.
pub const UNKNOWN_CODE: i64 = -1;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureLegend {
    /// Human readable name of the feature.
    pub display: Option<String>,
    pub states: BTreeMap<i64, String>,
}

/// State labels of every feature.
///
/// Deserializes from a table of features, each with an optional `display` name and a
/// `states` table keyed by the state code:
///
/// ```toml
/// [features.ls_smoker_E0]
/// display = "Smoking Status (V0)"
/// states = { "0" = "Non-smoker", "1" = "Smoker" }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(try_from = "RawLegend")]
pub struct Legend {
    features: IndexMap<String, FeatureLegend>,
}

#[derive(Deserialize)]
struct RawLegend {
    features: IndexMap<String, RawFeatureLegend>,
}

#[derive(Deserialize)]
struct RawFeatureLegend {
    display: Option<String>,
    #[serde(default)]
    states: BTreeMap<String, String>,
}

impl TryFrom<RawLegend> for Legend {
    type Error = RiskError;
    fn try_from(raw: RawLegend) -> Result<Self, Self::Error> {
        let mut legend = Legend::new();
        for (feature, raw_feature) in raw.features {
            let mut states = BTreeMap::new();
            for (code, label) in raw_feature.states {
                let code = code.trim().parse::<i64>().map_err(|_| {
                    RiskError::ModelLoad(format!(
                        "state code {:?} of feature {} is not an integer",
                        code, feature
                    ))
                })?;
                states.insert(code, label);
            }
            legend.features.insert(
                feature,
                FeatureLegend {
                    display: raw_feature.display,
                    states,
                },
            );
        }
        Ok(legend)
    }
}

impl Legend {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn insert(&mut self, feature: &str, code: i64, label: impl Into<String>) {
        self.features
            .entry(feature.to_owned())
            .or_default()
            .states
            .insert(code, label.into());
    }
    pub fn set_display(&mut self, feature: &str, display: impl Into<String>) {
        self.features.entry(feature.to_owned()).or_default().display = Some(display.into());
    }
    pub fn contains(&self, feature: &str) -> bool {
        self.features.contains_key(feature)
    }
    /// Keeps only the features for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.features.retain(|f, _| keep(f));
    }
    pub fn features(&self) -> impl Iterator<Item = (&str, &FeatureLegend)> {
        self.features.iter().map(|(f, l)| (f.as_str(), l))
    }
    pub fn label(&self, feature: &str, code: i64) -> Option<&str> {
        self.features
            .get(feature)?
            .states
            .get(&code)
            .map(String::as_str)
    }
    /// Code of a label (reverse lookup).
    pub fn code(&self, feature: &str, label: &str) -> Option<i64> {
        self.features
            .get(feature)?
            .states
            .iter()
            .find(|(_, l)| l.as_str() == label)
            .map(|(c, _)| *c)
    }
    /// Display name of a feature, the feature name itself if none is set.
    pub fn display_name<'a>(&'a self, feature: &'a str) -> &'a str {
        self.features
            .get(feature)
            .and_then(|l| l.display.as_deref())
            .unwrap_or(feature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookups() {
        let mut legend = Legend::new();
        legend.insert("smoker", UNKNOWN_CODE, "-1");
        legend.insert("smoker", 0, "Non-smoker");
        legend.insert("smoker", 1, "Smoker");
        legend.set_display("smoker", "Smoking Status");
        assert!(legend.contains("smoker"));
        assert_eq!(legend.label("smoker", 1), Some("Smoker"));
        assert_eq!(legend.label("smoker", 2), None);
        assert_eq!(legend.label("bmi", 0), None);
        assert_eq!(legend.code("smoker", "Non-smoker"), Some(0));
        assert_eq!(legend.display_name("smoker"), "Smoking Status");
        assert_eq!(legend.display_name("bmi"), "bmi");
        legend.insert("bmi", 0, "[0,25[");
        legend.retain(|f| f != "smoker");
        assert!(!legend.contains("smoker"));
        assert_eq!(legend.features().count(), 1);
    }

    #[test]
    fn from_toml() {
        let legend: Legend = toml::from_str(
            r#"
            [features.sex_E1_C1]
            display = "Gender"
            states = { "0" = "Male", "1" = "Female" }

            [features.rs570618]
            states = { "-1" = "-1", "0" = "0" }
            "#,
        )
        .unwrap();
        assert_eq!(legend.label("sex_E1_C1", 1), Some("Female"));
        assert_eq!(legend.label("rs570618", UNKNOWN_CODE), Some("-1"));
        assert_eq!(legend.display_name("sex_E1_C1"), "Gender");
        let bad: Result<Legend, _> = toml::from_str("[features.a]\nstates = { x = \"1\" }\n");
        assert!(bad.is_err());
    }
}
