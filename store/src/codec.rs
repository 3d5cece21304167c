//! Value codec for string-valued host stores

use websettings_core::{SettingValue, ValueCodec};

/// Stores values as JSON text.
///
/// Raw strings that are not valid JSON (written by something other than
/// this codec) decode as plain string values.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl ValueCodec for JsonCodec {
    fn encode(&self, value: &SettingValue) -> String {
        value.to_string()
    }

    fn decode(&self, raw: &str) -> SettingValue {
        serde_json::from_str(raw).unwrap_or_else(|_| SettingValue::String(raw.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_values() {
        let codec = JsonCodec;
        let value = json!({ "width": 640, "maximized": false });
        assert_eq!(codec.decode(&codec.encode(&value)), value);
        assert_eq!(codec.encode(&json!("blue")), "\"blue\"");
    }

    #[test]
    fn test_foreign_raw_string() {
        assert_eq!(JsonCodec.decode("not json"), json!("not json"));
    }
}
