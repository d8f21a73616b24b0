//! Scores and their cross-process handoff

pub mod handoff;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{BrainscoreError, Result};
pub use handoff::{ScoreHandoff, SCORE_PATH_VAR};

/// Floats that may be NaN or infinite. Finite values stay JSON numbers;
/// the others are written as `"NaN"`, `"inf"` and `"-inf"`.
mod float_repr {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    fn name(value: f64) -> &'static str {
        if value.is_nan() {
            "NaN"
        } else if value > 0.0 {
            "inf"
        } else {
            "-inf"
        }
    }

    fn parse(text: &str) -> Option<f64> {
        match text.to_ascii_lowercase().as_str() {
            "nan" => Some(f64::NAN),
            "inf" | "+inf" | "infinity" => Some(f64::INFINITY),
            "-inf" | "-infinity" => Some(f64::NEG_INFINITY),
            _ => None,
        }
    }

    fn from_repr<E: Error>(repr: Repr) -> Result<f64, E> {
        match repr {
            Repr::Number(value) => Ok(value),
            Repr::Text(text) => {
                parse(&text).ok_or_else(|| E::custom(format!("invalid float '{text}'")))
            }
        }
    }

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else {
            serializer.serialize_str(name(*value))
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        from_repr(Repr::deserialize(deserializer)?)
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(
            value: &Option<f64>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(value) => super::serialize(value, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<f64>, D::Error> {
            Option::<Repr>::deserialize(deserializer)?
                .map(from_repr)
                .transpose()
        }
    }
}

/// A benchmark result: a center value with optional error, optionally
/// normalised by a ceiling (in which case the unceiled score is kept in
/// `raw`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
    #[serde(with = "float_repr")]
    pub center: f64,
    #[serde(
        default,
        with = "float_repr::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub error: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Box<Score>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ceiling: Option<Box<Score>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl Score {
    pub fn new(center: f64) -> Self {
        Self {
            center,
            error: None,
            raw: None,
            ceiling: None,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_error(mut self, error: f64) -> Self {
        self.error = Some(error);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Normalise by `ceiling`: the center is divided by the ceiling's
    /// center, the error is carried over unchanged, and both this score and
    /// the ceiling are kept on the result.
    pub fn ceiled(&self, ceiling: &Score) -> Result<Score> {
        if ceiling.center == 0.0 || !ceiling.center.is_finite() {
            return Err(BrainscoreError::InvalidScore(format!(
                "cannot ceil by a ceiling of {}",
                ceiling.center
            )));
        }
        Ok(Score {
            center: self.center / ceiling.center,
            error: self.error,
            raw: Some(Box::new(self.clone())),
            ceiling: Some(Box::new(ceiling.clone())),
            attributes: self.attributes.clone(),
        })
    }

    /// Raw (unceiled) center, falling back to the center itself.
    pub fn raw_center(&self) -> f64 {
        self.raw.as_ref().map_or(self.center, |raw| raw.center)
    }

    pub(crate) fn ensure_finite(&self) -> Result<()> {
        if !self.center.is_finite() {
            return Err(BrainscoreError::InvalidScore(format!(
                "score center {} is not finite",
                self.center
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ceiled_divides_center_and_keeps_error() {
        let raw = Score::new(0.4).with_error(0.05);
        let ceiling = Score::new(0.8).with_error(0.02);
        let ceiled = raw.ceiled(&ceiling).unwrap();

        assert!((ceiled.center - 0.5).abs() < 1e-12);
        assert_eq!(ceiled.error, Some(0.05));
        assert_eq!(ceiled.raw_center(), 0.4);
        assert_eq!(ceiled.ceiling.as_deref(), Some(&ceiling));
    }

    #[test]
    fn zero_ceiling_is_rejected() {
        let result = Score::new(0.4).ceiled(&Score::new(0.0));
        assert!(matches!(result, Err(BrainscoreError::InvalidScore(_))));
    }

    #[test]
    fn serde_omits_empty_parts() {
        let json = serde_json::to_value(Score::new(0.3)).unwrap();
        assert_eq!(json, serde_json::json!({ "center": 0.3 }));
    }

    #[test]
    fn non_finite_floats_survive_json() {
        let score = Score::new(f64::INFINITY).with_error(f64::NAN);
        let json = serde_json::to_value(&score).unwrap();
        assert_eq!(json, serde_json::json!({ "center": "inf", "error": "NaN" }));

        let back: Score = serde_json::from_value(json).unwrap();
        assert_eq!(back.center, f64::INFINITY);
        assert!(back.error.unwrap().is_nan());
    }

    #[test]
    fn float_strings_from_other_writers_are_accepted() {
        let back: Score =
            serde_json::from_str(r#"{"center": 1, "error": "-Infinity"}"#).unwrap();
        assert_eq!(back.center, 1.0);
        assert_eq!(back.error, Some(f64::NEG_INFINITY));

        assert!(serde_json::from_str::<Score>(r#"{"center": "high"}"#).is_err());
    }
}
