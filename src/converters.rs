//! The converter registry: resolves a path parameter's declared type to a
//! `(regex, decode)` pair.
//!
//! Grounded in `starapi/converters.py`'s `builtin_converters` table; extended
//! with a `uuid` converter since it's a common path-parameter type that the
//! original's registry-by-string-key design makes trivial to add.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::gateway::ParamValue;

/// A single path-segment converter: an anchored regex the segment must match,
/// plus a decode function from the matched string to a typed [`ParamValue`].
#[derive(Clone)]
pub struct Converter {
    name: &'static str,
    regex: Regex,
    decode: Arc<dyn Fn(&str) -> Result<ParamValue, String> + Send + Sync>,
}

impl fmt::Debug for Converter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Converter")
            .field("name", &self.name)
            .field("regex", &self.regex.as_str())
            .finish()
    }
}

impl Converter {
    pub fn new(
        name: &'static str,
        pattern: &str,
        decode: impl Fn(&str) -> Result<ParamValue, String> + Send + Sync + 'static,
    ) -> Self {
        let regex = Regex::new(&format!("^{}$", pattern))
            .unwrap_or_else(|e| panic!("invalid converter regex for {name:?}: {e}"));
        Converter {
            name,
            regex,
            decode: Arc::new(decode),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether a single path segment satisfies this converter's regex.
    pub fn matches(&self, segment: &str) -> bool {
        self.regex.is_match(segment)
    }

    /// Decode a segment already known to match. Returns an error string on a
    /// decode failure (e.g. integer overflow) — a decode failure is treated
    /// as a routing no-match, never a protocol error (§4.2).
    pub fn decode(&self, segment: &str) -> Result<ParamValue, String> {
        (self.decode)(segment)
    }
}

fn str_converter() -> Converter {
    Converter::new("str", r"[^/]*", |s| Ok(ParamValue::Str(s.to_string())))
}

fn int_converter() -> Converter {
    Converter::new("int", r"-?[0-9]+", |s| {
        s.parse::<i64>()
            .map(ParamValue::Int)
            .map_err(|e| e.to_string())
    })
}

fn float_converter() -> Converter {
    Converter::new("float", r"-?[0-9]+(\.[0-9]+)?", |s| {
        s.parse::<f64>()
            .map(ParamValue::Float)
            .map_err(|e| e.to_string())
    })
}

fn uuid_converter() -> Converter {
    Converter::new(
        "uuid",
        r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}",
        |s| {
            uuid::Uuid::parse_str(s)
                .map(ParamValue::Uuid)
                .map_err(|e| e.to_string())
        },
    )
}

fn iso_datetime_converter() -> Converter {
    Converter::new("iso-datetime", r"[^/]*", |s| {
        chrono::DateTime::parse_from_rfc3339(s)
            .map(|dt| ParamValue::DateTime(dt.with_timezone(&chrono::Utc)))
            .map_err(|e| e.to_string())
    })
}

fn epoch_timestamp_converter() -> Converter {
    Converter::new("epoch-timestamp", r"-?[0-9]+", |s| {
        let secs: i64 = s.parse().map_err(|e: std::num::ParseIntError| e.to_string())?;
        chrono::DateTime::from_timestamp(secs, 0)
            .map(ParamValue::DateTime)
            .ok_or_else(|| format!("timestamp {secs} out of range"))
    })
}

static DEFAULT_CONVERTERS: Lazy<Vec<Converter>> = Lazy::new(|| {
    vec![
        str_converter(),
        int_converter(),
        float_converter(),
        uuid_converter(),
        iso_datetime_converter(),
        epoch_timestamp_converter(),
    ]
});

/// Open registry of converters, seeded with the built-in set and extensible
/// via [`ConverterRegistry::register`] before any route referencing a new
/// name is compiled.
#[derive(Debug, Clone)]
pub struct ConverterRegistry {
    converters: HashMap<String, Converter>,
}

impl ConverterRegistry {
    pub fn new() -> Self {
        let mut converters = HashMap::new();
        for conv in DEFAULT_CONVERTERS.iter() {
            converters.insert(conv.name().to_string(), conv.clone());
        }
        ConverterRegistry { converters }
    }

    pub fn register(&mut self, converter: Converter) {
        self.converters.insert(converter.name().to_string(), converter);
    }

    pub fn get(&self, name: &str) -> Option<&Converter> {
        self.converters.get(name)
    }

    pub fn default_converter(&self) -> &Converter {
        self.converters
            .get("str")
            .expect("the str converter is always registered")
    }
}

impl Default for ConverterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_converter_matches_digits_only() {
        let reg = ConverterRegistry::new();
        let int_conv = reg.get("int").unwrap();
        assert!(int_conv.matches("42"));
        assert!(!int_conv.matches("abc"));
        assert_eq!(int_conv.decode("42").unwrap().as_int(), Some(42));
    }

    #[test]
    fn float_converter_decodes() {
        let reg = ConverterRegistry::new();
        let conv = reg.get("float").unwrap();
        assert!(conv.matches("3.14"));
        assert_eq!(conv.decode("3.14").unwrap().as_float(), Some(3.14));
    }

    #[test]
    fn str_converter_matches_anything_without_slash() {
        let reg = ConverterRegistry::new();
        let conv = reg.default_converter();
        assert!(conv.matches("hello-world"));
        assert!(!conv.matches("a/b"));
    }

    #[test]
    fn uuid_converter_round_trips() {
        let reg = ConverterRegistry::new();
        let conv = reg.get("uuid").unwrap();
        let id = uuid::Uuid::new_v4().to_string();
        assert!(conv.matches(&id));
        assert!(conv.decode(&id).is_ok());
    }

    #[test]
    fn unregistered_converter_is_absent() {
        let reg = ConverterRegistry::new();
        assert!(reg.get("does-not-exist").is_none());
    }

    #[test]
    fn custom_converter_can_be_registered() {
        let mut reg = ConverterRegistry::new();
        reg.register(Converter::new("even-int", r"[0-9]+", |s| {
            let n: i64 = s.parse().map_err(|e: std::num::ParseIntError| e.to_string())?;
            if n % 2 == 0 {
                Ok(ParamValue::Int(n))
            } else {
                Err("not even".to_string())
            }
        }));
        let conv = reg.get("even-int").unwrap();
        assert!(conv.decode("4").is_ok());
        assert!(conv.decode("3").is_err());
    }
}
