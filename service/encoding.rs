//! # Input Validation and Encoding
//!
//! Turns a `RawObservation` into the fixed-order numeric `FeatureVector` the
//! regression model was trained on:
//!
//! `[age, gender_code, race_code, qrs_duration, qt_corrected, ventricular_rate]`
//!
//! - Canonical Order: The order of `FEATURE_NAMES` is a contract with the model
//!   artifact. `TrainedModel::load` refuses artifacts that declare a different
//!   order, because a reordered vector would still produce a number.
//! - Numeric Fields: Must be numbers, or strings that parse as finite numbers.
//!   Missing keys and unparseable strings are errors, never defaults.
//! - Gender: A lenient binary fold. `male` encodes to 0, every other value to 1.
//! - Race: `white`, `black`, `asian`, `other` encode to 0..=3. Unrecognised
//!   values either fold to `other` (`RacePolicy::Lenient`, the default) or are
//!   rejected (`RacePolicy::Strict`).
//! - Plausible Ranges: Optional inclusive bounds per numeric field.

use crate::observation::{RawObservation, RawValue};
use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Index;
use std::str::FromStr;
use thiserror::Error;

/// Number of model inputs.
pub const FEATURE_COUNT: usize = 6;

/// Canonical feature order. Index `i` of a `FeatureVector` holds `FEATURE_NAMES[i]`.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "age",
    "gender",
    "race",
    "qrs_duration",
    "qt_corrected",
    "ventricular_rate",
];

/// The six request fields and the keys each one is accepted under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Age,
    Gender,
    Race,
    QrsDuration,
    QtCorrected,
    VentricularRate,
}

impl Field {
    /// Primary wire name, used in every error message.
    pub fn name(self) -> &'static str {
        self.aliases()[0]
    }

    /// Accepted keys, in lookup priority order.
    pub fn aliases(self) -> &'static [&'static str] {
        match self {
            Field::Age => &["age"],
            Field::Gender => &["gender"],
            Field::Race => &["race"],
            Field::QrsDuration => &["qrs", "qrsDuration", "qrs_duration"],
            Field::QtCorrected => &["qt", "qtCorrected", "qt_corrected", "qtc"],
            Field::VentricularRate => &["vr", "ventricularRate", "ventricular_rate"],
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Every way a raw observation can fail to become a `FeatureVector`.
///
/// All variants surface to clients as `InvalidInput`; the messages name the
/// field and what was expected so the caller can correct and resubmit.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Missing required field '{0}'.")]
    MissingField(Field),
    #[error("Field '{field}' must be a number, but '{value}' could not be parsed as one.")]
    NotNumeric { field: Field, value: String },
    #[error("Field '{field}' must be a {expected}, but a {found} was provided.")]
    WrongType {
        field: Field,
        expected: &'static str,
        found: &'static str,
    },
    #[error("Field '{0}' must be a finite number (NaN and infinity are not accepted).")]
    NonFinite(Field),
    #[error("Field '{field}' is {value}, outside the accepted range [{min}, {max}].")]
    OutOfRange {
        field: Field,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("Field '{field}' has unrecognised value '{value}'. Expected one of: {expected}.")]
    UnrecognisedCategory {
        field: Field,
        value: String,
        expected: &'static str,
    },
    #[error("Request body could not be decoded: {0}")]
    MalformedBody(String),
}

/// Binary gender code. Anything other than `male` folds to `NonMale`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gender {
    Male,
    NonMale,
}

impl Gender {
    /// Case-insensitive and whitespace-tolerant; never fails.
    pub fn from_raw(value: &RawValue) -> Self {
        match value {
            RawValue::Text(s) if s.trim().eq_ignore_ascii_case("male") => Gender::Male,
            _ => Gender::NonMale,
        }
    }

    pub fn code(self) -> f64 {
        match self {
            Gender::Male => 0.0,
            Gender::NonMale => 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Race {
    White,
    Black,
    Asian,
    Other,
}

impl Race {
    const EXPECTED: &'static str = "white, black, asian, other";

    /// Exact (case-insensitive) lookup, no fallback.
    pub fn lookup(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "white" => Some(Race::White),
            "black" => Some(Race::Black),
            "asian" => Some(Race::Asian),
            "other" => Some(Race::Other),
            _ => None,
        }
    }

    /// Resolves a raw value under the given policy.
    pub fn from_raw(value: &RawValue, policy: RacePolicy) -> Result<Self, ValidationError> {
        let found = match value {
            RawValue::Text(s) => match Race::lookup(s) {
                Some(race) => return Ok(race),
                None => s.clone(),
            },
            other if policy == RacePolicy::Strict => {
                return Err(ValidationError::WrongType {
                    field: Field::Race,
                    expected: "string",
                    found: other.type_name(),
                });
            }
            other => other.type_name().to_string(),
        };

        match policy {
            RacePolicy::Lenient => {
                log::warn!("Unrecognised race '{found}' encoded as 'other'");
                Ok(Race::Other)
            }
            RacePolicy::Strict => Err(ValidationError::UnrecognisedCategory {
                field: Field::Race,
                value: found,
                expected: Race::EXPECTED,
            }),
        }
    }

    pub fn code(self) -> f64 {
        match self {
            Race::White => 0.0,
            Race::Black => 1.0,
            Race::Asian => 2.0,
            Race::Other => 3.0,
        }
    }
}

/// How unrecognised race values are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RacePolicy {
    /// Unrecognised values are encoded as `other` and a warning is logged.
    #[default]
    Lenient,
    /// Unrecognised values are rejected as invalid input.
    Strict,
}

impl FromStr for RacePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lenient" => Ok(RacePolicy::Lenient),
            "strict" => Ok(RacePolicy::Strict),
            other => Err(format!(
                "unknown race policy '{other}' (expected 'lenient' or 'strict')"
            )),
        }
    }
}

impl fmt::Display for RacePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RacePolicy::Lenient => f.write_str("lenient"),
            RacePolicy::Strict => f.write_str("strict"),
        }
    }
}

/// Inclusive bounds for one numeric field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueRange {
    pub min: f64,
    pub max: f64,
}

impl ValueRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        (self.min..=self.max).contains(&value)
    }
}

/// Plausible-range bounds for the four numeric fields.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlausibleRanges {
    pub age: ValueRange,
    pub qrs_duration: ValueRange,
    pub qt_corrected: ValueRange,
    pub ventricular_rate: ValueRange,
}

impl Default for PlausibleRanges {
    fn default() -> Self {
        Self {
            age: ValueRange::new(0.0, 120.0),
            qrs_duration: ValueRange::new(0.0, 300.0),
            qt_corrected: ValueRange::new(0.0, 800.0),
            ventricular_rate: ValueRange::new(0.0, 350.0),
        }
    }
}

impl PlausibleRanges {
    fn for_field(&self, field: Field) -> Option<ValueRange> {
        match field {
            Field::Age => Some(self.age),
            Field::QrsDuration => Some(self.qrs_duration),
            Field::QtCorrected => Some(self.qt_corrected),
            Field::VentricularRate => Some(self.ventricular_rate),
            Field::Gender | Field::Race => None,
        }
    }
}

/// The policy knobs of the encoding step.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EncodingRules {
    pub race_policy: RacePolicy,
    /// `None` disables range checks entirely.
    pub ranges: Option<PlausibleRanges>,
}

/// A validated, strongly-typed observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PatientObservation {
    pub age: f64,
    pub gender: Gender,
    pub race: Race,
    pub qrs_duration: f64,
    pub qt_corrected: f64,
    pub ventricular_rate: f64,
}

impl PatientObservation {
    /// Validates every field of `raw`. The first failing field, in canonical
    /// order, is reported.
    pub fn from_raw(raw: &RawObservation, rules: &EncodingRules) -> Result<Self, ValidationError> {
        let age = numeric_field(raw, Field::Age, rules)?;
        let gender = Gender::from_raw(required(raw, Field::Gender)?);
        let race = Race::from_raw(required(raw, Field::Race)?, rules.race_policy)?;
        let qrs_duration = numeric_field(raw, Field::QrsDuration, rules)?;
        let qt_corrected = numeric_field(raw, Field::QtCorrected, rules)?;
        let ventricular_rate = numeric_field(raw, Field::VentricularRate, rules)?;

        Ok(Self {
            age,
            gender,
            race,
            qrs_duration,
            qt_corrected,
            ventricular_rate,
        })
    }

    /// Assembles the model input in canonical order.
    pub fn to_features(&self) -> FeatureVector {
        FeatureVector([
            self.age,
            self.gender.code(),
            self.race.code(),
            self.qrs_duration,
            self.qt_corrected,
            self.ventricular_rate,
        ])
    }
}

/// Validates and encodes in one step.
pub fn encode(raw: &RawObservation, rules: &EncodingRules) -> Result<FeatureVector, ValidationError> {
    PatientObservation::from_raw(raw, rules).map(|obs| obs.to_features())
}

fn required(raw: &RawObservation, field: Field) -> Result<&RawValue, ValidationError> {
    raw.lookup(field.aliases())
        .ok_or(ValidationError::MissingField(field))
}

fn numeric_field(
    raw: &RawObservation,
    field: Field,
    rules: &EncodingRules,
) -> Result<f64, ValidationError> {
    let value = match required(raw, field)? {
        RawValue::Number(n) => *n,
        RawValue::Text(s) => s.trim().parse::<f64>().map_err(|_| ValidationError::NotNumeric {
            field,
            value: s.clone(),
        })?,
        other => {
            return Err(ValidationError::WrongType {
                field,
                expected: "number",
                found: other.type_name(),
            });
        }
    };

    // "nan" and "inf" parse successfully as f64.
    if !value.is_finite() {
        return Err(ValidationError::NonFinite(field));
    }

    if let Some(range) = rules.ranges.as_ref().and_then(|r| r.for_field(field)) {
        if !range.contains(value) {
            return Err(ValidationError::OutOfRange {
                field,
                value,
                min: range.min,
                max: range.max,
            });
        }
    }

    Ok(value)
}

/// The model input: six values in `FEATURE_NAMES` order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector([f64; FEATURE_COUNT]);

impl FeatureVector {
    /// Wraps values that are already in canonical order.
    pub const fn from_array(values: [f64; FEATURE_COUNT]) -> Self {
        Self(values)
    }

    pub fn as_array(&self) -> &[f64; FEATURE_COUNT] {
        &self.0
    }

    pub fn view(&self) -> ArrayView1<'_, f64> {
        ArrayView1::from(&self.0[..])
    }

    /// Name and value pairs, in canonical order.
    pub fn named(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        FEATURE_NAMES.iter().copied().zip(self.0.iter().copied())
    }
}

impl Index<usize> for FeatureVector {
    type Output = f64;

    fn index(&self, index: usize) -> &f64 {
        &self.0[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete() -> RawObservation {
        RawObservation::new()
            .with_number("age", 55.0)
            .with_text("gender", "male")
            .with_text("race", "white")
            .with_number("qrs", 100.0)
            .with_number("qt", 420.0)
            .with_number("vr", 70.0)
    }

    fn lenient() -> EncodingRules {
        EncodingRules::default()
    }

    fn strict() -> EncodingRules {
        EncodingRules {
            race_policy: RacePolicy::Strict,
            ranges: None,
        }
    }

    #[test]
    fn reference_observation_encodes_in_canonical_order() {
        let features = encode(&complete(), &lenient()).unwrap();
        assert_eq!(
            features.as_array(),
            &[55.0, 0.0, 0.0, 100.0, 420.0, 70.0]
        );
    }

    #[test]
    fn long_field_names_are_accepted() {
        let raw = RawObservation::new()
            .with_text("age", "61")
            .with_text("gender", "female")
            .with_text("race", "black")
            .with_text("qrsDuration", "94")
            .with_text("qtCorrected", "441.5")
            .with_text("ventricularRate", "82");
        let features = encode(&raw, &lenient()).unwrap();
        assert_eq!(features.as_array(), &[61.0, 1.0, 1.0, 94.0, 441.5, 82.0]);
    }

    #[test]
    fn snake_case_and_qtc_field_names_are_accepted() {
        let raw = RawObservation::new()
            .with_number("age", 47.0)
            .with_text("gender", "male")
            .with_text("race", "asian")
            .with_text("qrs_duration", "102")
            .with_text("qt_corrected", "430")
            .with_text("ventricular_rate", "66");
        let features = encode(&raw, &lenient()).unwrap();
        assert_eq!(features.as_array(), &[47.0, 0.0, 2.0, 102.0, 430.0, 66.0]);

        let raw = complete();
        let mut with_qtc = RawObservation::new();
        for key in ["age", "gender", "race", "qrs", "vr"] {
            with_qtc.insert(key, raw.lookup(&[key]).unwrap().clone());
        }
        with_qtc.insert("qtc", RawValue::Number(455.0));
        assert_eq!(encode(&with_qtc, &lenient()).unwrap()[4], 455.0);
    }

    #[test]
    fn earliest_alias_wins_when_several_are_sent() {
        let raw = complete()
            .with_number("qrsDuration", 140.0)
            .with_number("qrs_duration", 150.0)
            .with_number("qtc", 500.0)
            .with_number("ventricularRate", 99.0);
        let features = encode(&raw, &lenient()).unwrap();
        assert_eq!(features[3], 100.0);
        assert_eq!(features[4], 420.0);
        assert_eq!(features[5], 70.0);

        let without_short = RawObservation::new()
            .with_number("age", 55.0)
            .with_text("gender", "male")
            .with_text("race", "white")
            .with_number("qrs_duration", 150.0)
            .with_number("qrsDuration", 140.0)
            .with_number("qt", 420.0)
            .with_number("vr", 70.0);
        assert_eq!(encode(&without_short, &lenient()).unwrap()[3], 140.0);
    }

    #[test]
    fn field_aliases_start_with_the_primary_name() {
        for field in [
            Field::Age,
            Field::Gender,
            Field::Race,
            Field::QrsDuration,
            Field::QtCorrected,
            Field::VentricularRate,
        ] {
            assert_eq!(field.aliases()[0], field.name());
        }
        assert_eq!(
            Field::QtCorrected.aliases(),
            &["qt", "qtCorrected", "qt_corrected", "qtc"]
        );
    }

    #[test]
    fn encoding_is_deterministic() {
        let raw = complete();
        let first = encode(&raw, &lenient()).unwrap();
        for _ in 0..100 {
            assert_eq!(encode(&raw, &lenient()).unwrap(), first);
        }
    }

    #[test]
    fn gender_folds_everything_but_male_to_one() {
        let cases = [
            (RawValue::Text("male".into()), 0.0),
            (RawValue::Text(" Male ".into()), 0.0),
            (RawValue::Text("female".into()), 1.0),
            (RawValue::Text("unknown".into()), 1.0),
            (RawValue::Text(String::new()), 1.0),
            (RawValue::Number(0.0), 1.0),
        ];
        for (value, expected) in cases {
            assert_eq!(Gender::from_raw(&value).code(), expected, "{value:?}");
        }
    }

    #[test]
    fn race_lookup_covers_the_table() {
        for (name, code) in [("white", 0.0), ("black", 1.0), ("asian", 2.0), ("other", 3.0)] {
            let race = Race::from_raw(&RawValue::Text(name.into()), RacePolicy::Strict).unwrap();
            assert_eq!(race.code(), code);
        }
        let race = Race::from_raw(&RawValue::Text("ASIAN".into()), RacePolicy::Strict).unwrap();
        assert_eq!(race, Race::Asian);
    }

    #[test]
    fn lenient_policy_folds_unknown_race_to_other() {
        let raw = complete().with_text("race", "hispanic");
        let features = encode(&raw, &lenient()).unwrap();
        assert_eq!(features[2], 3.0);

        let raw = complete().with_number("race", 2.0);
        assert_eq!(encode(&raw, &lenient()).unwrap()[2], 3.0);
    }

    #[test]
    fn strict_policy_rejects_unknown_race() {
        let raw = complete().with_text("race", "hispanic");
        let err = encode(&raw, &strict()).unwrap_err();
        assert_eq!(
            err,
            ValidationError::UnrecognisedCategory {
                field: Field::Race,
                value: "hispanic".into(),
                expected: "white, black, asian, other",
            }
        );
        assert!(err.to_string().contains("race"));

        let raw = complete().with_number("race", 1.0);
        assert!(matches!(
            encode(&raw, &strict()),
            Err(ValidationError::WrongType { field: Field::Race, .. })
        ));
    }

    #[test]
    fn missing_fields_are_named() {
        for field in [
            Field::Age,
            Field::Gender,
            Field::Race,
            Field::QrsDuration,
            Field::QtCorrected,
            Field::VentricularRate,
        ] {
            let mut raw = RawObservation::new();
            for other in [
                ("age", RawValue::Number(55.0)),
                ("gender", RawValue::Text("male".into())),
                ("race", RawValue::Text("white".into())),
                ("qrs", RawValue::Number(100.0)),
                ("qt", RawValue::Number(420.0)),
                ("vr", RawValue::Number(70.0)),
            ] {
                if other.0 != field.name() {
                    raw.insert(other.0, other.1);
                }
            }
            let err = encode(&raw, &lenient()).unwrap_err();
            assert_eq!(err, ValidationError::MissingField(field));
            assert!(err.to_string().contains(&format!("'{}'", field.name())));
        }
    }

    #[test]
    fn non_numeric_strings_are_rejected() {
        let raw = complete().with_text("age", "fifty-five");
        let err = encode(&raw, &lenient()).unwrap_err();
        assert_eq!(
            err,
            ValidationError::NotNumeric {
                field: Field::Age,
                value: "fifty-five".into()
            }
        );

        let raw = complete().with_text("qt", "");
        assert!(matches!(
            encode(&raw, &lenient()),
            Err(ValidationError::NotNumeric { field: Field::QtCorrected, .. })
        ));
    }

    #[test]
    fn non_finite_numbers_are_rejected() {
        for text in ["nan", "NaN", "inf", "-infinity"] {
            let raw = complete().with_text("vr", text);
            assert_eq!(
                encode(&raw, &lenient()).unwrap_err(),
                ValidationError::NonFinite(Field::VentricularRate)
            );
        }
    }

    #[test]
    fn wrong_json_types_are_rejected() {
        let raw = complete().with("qrs", RawValue::Other("boolean"));
        let err = encode(&raw, &lenient()).unwrap_err();
        assert_eq!(
            err,
            ValidationError::WrongType {
                field: Field::QrsDuration,
                expected: "number",
                found: "boolean"
            }
        );
    }

    #[test]
    fn plausible_ranges_are_enforced_only_when_configured() {
        let raw = complete().with_number("age", -4.0);
        assert_eq!(encode(&raw, &lenient()).unwrap()[0], -4.0);

        let rules = EncodingRules {
            race_policy: RacePolicy::Lenient,
            ranges: Some(PlausibleRanges::default()),
        };
        let err = encode(&raw, &rules).unwrap_err();
        assert_eq!(
            err,
            ValidationError::OutOfRange {
                field: Field::Age,
                value: -4.0,
                min: 0.0,
                max: 120.0
            }
        );

        // Bounds are inclusive.
        let raw = complete().with_number("age", 120.0);
        assert!(encode(&raw, &rules).is_ok());
    }

    #[test]
    fn race_policy_parses_from_text() {
        assert_eq!("Strict".parse::<RacePolicy>(), Ok(RacePolicy::Strict));
        assert_eq!(" lenient".parse::<RacePolicy>(), Ok(RacePolicy::Lenient));
        assert!("loose".parse::<RacePolicy>().is_err());
        assert_eq!(RacePolicy::Strict.to_string(), "strict");
    }

    #[test]
    fn named_pairs_follow_feature_names() {
        let features = FeatureVector::from_array([1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let names: Vec<_> = features.named().map(|(name, _)| name).collect();
        assert_eq!(names, FEATURE_NAMES);
        assert_eq!(features.view().len(), FEATURE_COUNT);
    }
}
