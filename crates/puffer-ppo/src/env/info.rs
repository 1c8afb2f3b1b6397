//! Auxiliary per-step information payloads.

use ndarray::Array3;
use std::collections::BTreeMap;

/// RGB frame, (height, width, channel)
pub type Frame = Array3<u8>;

/// Info dictionary attached to transitions
pub type Info = BTreeMap<String, InfoValue>;

/// A single info value. Only `Scalar` and non-empty `Array` values can be
/// reduced to a mean for reporting.
#[derive(Clone, Debug, PartialEq)]
pub enum InfoValue {
    Scalar(f64),
    Array(Vec<f64>),
    Text(String),
    Image(Frame),
    Nested(Info),
}

impl InfoValue {
    /// Whether this value can be averaged into a scalar metric
    pub fn is_reducible(&self) -> bool {
        match self {
            InfoValue::Scalar(v) => v.is_finite(),
            InfoValue::Array(v) => !v.is_empty() && v.iter().all(|x| x.is_finite()),
            _ => false,
        }
    }

    /// Values contributed to a running mean
    pub fn samples(&self) -> &[f64] {
        match self {
            InfoValue::Scalar(v) => std::slice::from_ref(v),
            InfoValue::Array(v) => v,
            _ => &[],
        }
    }

    pub fn as_image(&self) -> Option<&Frame> {
        match self {
            InfoValue::Image(frame) => Some(frame),
            _ => None,
        }
    }
}

impl From<f64> for InfoValue {
    fn from(v: f64) -> Self {
        InfoValue::Scalar(v)
    }
}

impl From<f32> for InfoValue {
    fn from(v: f32) -> Self {
        InfoValue::Scalar(v as f64)
    }
}

impl From<&str> for InfoValue {
    fn from(v: &str) -> Self {
        InfoValue::Text(v.to_string())
    }
}

/// Flatten nested info maps into `/`-joined keys.
pub fn unroll(info: &Info) -> Vec<(String, &InfoValue)> {
    let mut out = Vec::new();
    unroll_into("", info, &mut out);
    out
}

fn unroll_into<'a>(prefix: &str, info: &'a Info, out: &mut Vec<(String, &'a InfoValue)>) {
    for (key, value) in info {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}/{}", prefix, key)
        };
        match value {
            InfoValue::Nested(inner) => unroll_into(&path, inner, out),
            _ => out.push((path, value)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unroll_nested() {
        let mut inner = Info::new();
        inner.insert("speed".into(), 2.0f64.into());
        let mut info = Info::new();
        info.insert("goal".into(), 1.0f64.into());
        info.insert("vehicle".into(), InfoValue::Nested(inner));

        let keys: Vec<String> = unroll(&info).into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["goal".to_string(), "vehicle/speed".to_string()]);
    }

    #[test]
    fn test_reducibility() {
        assert!(InfoValue::Scalar(1.0).is_reducible());
        assert!(InfoValue::Array(vec![1.0, 2.0]).is_reducible());
        assert!(!InfoValue::Array(vec![]).is_reducible());
        assert!(!InfoValue::Scalar(f64::NAN).is_reducible());
        assert!(!InfoValue::Text("x".into()).is_reducible());
        assert!(!InfoValue::Image(Frame::zeros((2, 2, 3))).is_reducible());
    }
}
