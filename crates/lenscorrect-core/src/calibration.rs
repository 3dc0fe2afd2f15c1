//! Named calibrations and their JSON persistence.
//!
//! A calibration file is an array of `{ "transform": [node, ...], "name": "..." }`
//! records. Each `transform` array is the encoded child list of one composite.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec::{encode_children, TransformCodec, TransformDecodeError};
use crate::transform::CompositeTransform;

/// A labelled calibration chain.
#[derive(Clone, Debug, PartialEq)]
pub struct Calibration {
    pub name: String,
    pub transform: CompositeTransform,
}

impl Calibration {
    pub fn new(name: impl Into<String>, transform: CompositeTransform) -> Self {
        Self {
            name: name.into(),
            transform,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CalibrationRecord {
    #[serde(default)]
    transform: Option<Vec<Value>>,
    #[serde(default)]
    name: String,
}

/// Failure of a single calibration entry.
#[derive(thiserror::Error, Debug)]
pub enum CalibrationError {
    #[error("calibration `{name}`: {source}")]
    Decode {
        name: String,
        #[source]
        source: TransformDecodeError,
    },
    #[error("calibration `{name}` has no transform list")]
    MissingTransform { name: String },
    #[error("calibration entry {index} is malformed: {source}")]
    Malformed {
        index: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Failure reading or writing a whole calibration file.
#[derive(thiserror::Error, Debug)]
pub enum CalibrationIoError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("calibration file must hold a JSON array")]
    NotAnArray,
}

/// Decode every entry of a calibration array.
///
/// Only a non-array document is an error for the whole batch; each entry
/// succeeds or fails on its own.
pub fn decode_calibrations(
    value: &Value,
    codec: &TransformCodec<'_>,
) -> Result<Vec<Result<Calibration, CalibrationError>>, CalibrationIoError> {
    let entries = value.as_array().ok_or(CalibrationIoError::NotAnArray)?;
    Ok(entries
        .iter()
        .enumerate()
        .map(|(index, entry)| decode_entry(index, entry, codec))
        .collect())
}

fn decode_entry(
    index: usize,
    entry: &Value,
    codec: &TransformCodec<'_>,
) -> Result<Calibration, CalibrationError> {
    let record: CalibrationRecord = serde_json::from_value(entry.clone())
        .map_err(|source| CalibrationError::Malformed { index, source })?;
    let name = record.name;
    let nodes = record
        .transform
        .ok_or_else(|| CalibrationError::MissingTransform { name: name.clone() })?;
    match codec.decode_composite(&nodes) {
        Ok(transform) => {
            if transform.is_empty() {
                log::warn!("calibration `{name}` has an empty transform list; using identity");
            }
            Ok(Calibration { name, transform })
        }
        Err(source) => Err(CalibrationError::Decode { name, source }),
    }
}

pub fn parse_calibrations(
    json: &str,
    codec: &TransformCodec<'_>,
) -> Result<Vec<Result<Calibration, CalibrationError>>, CalibrationIoError> {
    let value: Value = serde_json::from_str(json)?;
    decode_calibrations(&value, codec)
}

/// Load a calibration file from disk.
pub fn load_calibrations(
    path: impl AsRef<Path>,
    codec: &TransformCodec<'_>,
) -> Result<Vec<Result<Calibration, CalibrationError>>, CalibrationIoError> {
    let raw = fs::read_to_string(path)?;
    parse_calibrations(&raw, codec)
}

pub fn encode_calibrations(calibrations: &[Calibration]) -> Value {
    Value::Array(
        calibrations
            .iter()
            .map(|c| {
                serde_json::json!({
                    "transform": encode_children(&c.transform),
                    "name": c.name,
                })
            })
            .collect(),
    )
}

/// Write calibrations to disk as pretty JSON.
pub fn write_calibrations(
    path: impl AsRef<Path>,
    calibrations: &[Calibration],
) -> Result<(), CalibrationIoError> {
    let json = serde_json::to_string_pretty(&encode_calibrations(calibrations))?;
    fs::write(path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NonLinear2D, Rigid2D, Translation2D, TRANSLATION_TAG};
    use crate::registry::ModelRegistry;
    use serde_json::json;

    fn two_channels() -> Vec<Calibration> {
        vec![
            Calibration::new(
                "c0",
                CompositeTransform::new()
                    .with(NonLinear2D::identity(2, 256, 256).into_transform())
                    .with(Translation2D::new(0.5, -1.25)),
            ),
            Calibration::new(
                "c1",
                CompositeTransform::new()
                    .with(Rigid2D::new(0.002, 3.0, 1.0))
                    .with(CompositeTransform::new().with(Translation2D::new(-2.0, 0.0))),
            ),
        ]
    }

    #[test]
    fn file_round_trip() {
        let reg = ModelRegistry::builtin();
        let codec = TransformCodec::new(&reg);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transforms.json");

        let cals = two_channels();
        write_calibrations(&path, &cals).unwrap();
        let loaded: Vec<Calibration> = load_calibrations(&path, &codec)
            .unwrap()
            .into_iter()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(loaded, cals);
    }

    #[test]
    fn encoded_layout_matches_file_format() {
        let v = encode_calibrations(&two_channels());
        assert_eq!(v[0]["name"], "c0");
        assert_eq!(v[0]["transform"].as_array().unwrap().len(), 2);
        assert_eq!(v[0]["transform"][1]["className"], TRANSLATION_TAG);
        assert_eq!(v[0]["transform"][1]["dataString"], "0.5 -1.25");
    }

    #[test]
    fn bad_entry_does_not_poison_batch() {
        let reg = ModelRegistry::builtin();
        let codec = TransformCodec::new(&reg);
        let v = json!([
            { "name": "good", "transform": [
                { "className": TRANSLATION_TAG, "dataString": "1 2" }
            ]},
            { "name": "bad", "transform": [
                { "className": "unknown.Model", "dataString": "" }
            ]},
            { "name": "none" },
            42
        ]);
        let out = decode_calibrations(&v, &codec).unwrap();
        assert_eq!(out.len(), 4);
        assert!(out[0].is_ok());
        match &out[1] {
            Err(CalibrationError::Decode { name, source }) => {
                assert_eq!(name, "bad");
                assert_eq!(source.tag(), Some("unknown.Model"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            out[2],
            Err(CalibrationError::MissingTransform { .. })
        ));
        assert!(matches!(
            out[3],
            Err(CalibrationError::Malformed { index: 3, .. })
        ));
    }

    #[test]
    fn non_array_document_is_rejected() {
        let reg = ModelRegistry::builtin();
        let codec = TransformCodec::new(&reg);
        assert!(matches!(
            parse_calibrations(r#"{"name": "x"}"#, &codec),
            Err(CalibrationIoError::NotAnArray)
        ));
    }
}
