//! Parameter map parsing
//!
//! Manipulation parameters arrive as a string-keyed JSON map. These helpers
//! read one typed value each, falling back to a default when the key is
//! absent and naming the key in every error.

use serde_json::{Map, Value};

use crate::error::{Result, WmError};

/// Raw manipulation parameters
pub type Parameters = Map<String, Value>;

/// Fail on any key outside `allowed`
pub fn reject_unknown(params: &Parameters, allowed: &[&str]) -> Result<()> {
    match params.keys().find(|key| !allowed.contains(&key.as_str())) {
        Some(key) => Err(WmError::invalid(
            key.as_str(),
            format!("unknown parameter (accepted: {})", allowed.join(", ")),
        )),
        None => Ok(()),
    }
}

/// Find a value under its canonical key or one alias
fn lookup<'a>(params: &'a Parameters, key: &str, alias: Option<&str>) -> Result<Option<&'a Value>> {
    let primary = params.get(key);
    let secondary = alias.and_then(|a| params.get(a));
    match (primary, secondary) {
        (Some(_), Some(_)) => Err(WmError::invalid(
            key,
            format!("given twice (also as '{}')", alias.unwrap_or_default()),
        )),
        (Some(v), None) | (None, Some(v)) => Ok(Some(v)),
        (None, None) => Ok(None),
    }
}

fn as_number(value: &Value, key: &str) -> Result<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        // Form-encoded clients send numbers as strings
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    number.ok_or_else(|| WmError::invalid(key, format!("expected a number, got {}", value)))
}

/// Read a finite float
pub fn get_f64(params: &Parameters, key: &str, alias: Option<&str>, default: f64) -> Result<f64> {
    let value = match lookup(params, key, alias)? {
        Some(v) => as_number(v, key)?,
        None => return Ok(default),
    };
    if !value.is_finite() {
        return Err(WmError::invalid(key, "must be a finite number"));
    }
    Ok(value)
}

/// Read a non-negative integer that fits in u64
pub fn get_u64(params: &Parameters, key: &str, alias: Option<&str>, default: u64) -> Result<u64> {
    let value = match lookup(params, key, alias)? {
        Some(Value::Number(n)) if n.as_u64().is_some() => return Ok(n.as_u64().unwrap_or(default)),
        Some(v) => as_number(v, key)?,
        None => return Ok(default),
    };
    if !value.is_finite() || value < 0.0 || value.fract() != 0.0 || value > u64::MAX as f64 {
        return Err(WmError::invalid(
            key,
            format!("expected a non-negative integer, got {}", value),
        ));
    }
    Ok(value as u64)
}

/// Read a non-negative integer that fits in u32
pub fn get_u32(params: &Parameters, key: &str, alias: Option<&str>, default: u32) -> Result<u32> {
    let value = get_u64(params, key, alias, default as u64)?;
    u32::try_from(value).map_err(|_| WmError::invalid(key, format!("{} is too large", value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Parameters {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn test_default_when_missing() {
        let p = params(json!({}));
        assert_eq!(get_f64(&p, "snr", None, 20.0).unwrap(), 20.0);
        assert_eq!(get_u32(&p, "bitrate", None, 128).unwrap(), 128);
    }

    #[test]
    fn test_numeric_strings_accepted() {
        let p = params(json!({ "cutoff": "3000", "bitrate": "64" }));
        assert_eq!(get_f64(&p, "cutoff", None, 0.0).unwrap(), 3000.0);
        assert_eq!(get_u32(&p, "bitrate", None, 0).unwrap(), 64);
    }

    #[test]
    fn test_alias() {
        let p = params(json!({ "snr_db": 5 }));
        assert_eq!(get_f64(&p, "snr", Some("snr_db"), 20.0).unwrap(), 5.0);

        let both = params(json!({ "snr": 1, "snr_db": 5 }));
        assert!(get_f64(&both, "snr", Some("snr_db"), 20.0).is_err());
    }

    #[test]
    fn test_wrong_type_names_field() {
        let p = params(json!({ "rate": "fast" }));
        let err = get_f64(&p, "rate", None, 1.0).unwrap_err();
        assert!(err.to_string().contains("'rate'"));
    }

    #[test]
    fn test_integer_checks() {
        let p = params(json!({ "seed": -1, "bitrate": 128.5, "sample_rate": 44100.0 }));
        assert!(get_u64(&p, "seed", None, 0).is_err());
        assert!(get_u32(&p, "bitrate", None, 0).is_err());
        assert_eq!(get_u32(&p, "sample_rate", None, 0).unwrap(), 44_100);
    }

    #[test]
    fn test_reject_unknown() {
        let p = params(json!({ "gain_db": 3, "volume": 2 }));
        let err = reject_unknown(&p, &["gain_db"]).unwrap_err();
        assert!(err.to_string().contains("'volume'"));
    }
}
