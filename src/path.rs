//! The path compiler: turns a route pattern into an ordered sequence of
//! literal and parameter segments, and matches a request path against it.
//!
//! Grounded in `starapi/routing.py`'s `PARAM_REGEX` + `_compile_path`, with
//! the open question on parameter syntax (§9 of the spec) resolved in favor
//! of `{name:converter-id}` as the only parameterized form; a bare `{name}`
//! is sugar for the `str` converter.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::converters::{Converter, ConverterRegistry};
use crate::error::Error;
use crate::gateway::ParamValue;

static PARAM_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\{(?P<name>[A-Za-z_][A-Za-z0-9_]*)(:(?P<type>[A-Za-z_][A-Za-z0-9_-]*))?\}$")
        .expect("static PARAM_REGEX is valid")
});

#[derive(Debug, Clone)]
pub enum Segment {
    Literal(String),
    Param { name: String, converter: Converter },
}

/// A path pattern compiled into its segment sequence.
///
/// Invariants (spec §3): splitting on `/` yields N+1 segments; parameter
/// names are unique within the path; matching is length-equal then
/// segment-equal.
#[derive(Debug, Clone)]
pub struct CompiledPath {
    pattern: String,
    segments: Vec<Segment>,
}

impl CompiledPath {
    /// Compile `pattern` against the given converter registry.
    ///
    /// Fails with [`Error::Configuration`] if a parameter names an
    /// unregistered converter, if a parameter name is malformed, or if a
    /// parameter name repeats within the pattern.
    pub fn compile(pattern: &str, registry: &ConverterRegistry) -> Result<Self, Error> {
        let mut raw: Vec<&str> = pattern.split('/').collect();
        // Uniform trailing-slash normalization: ensure the segment list
        // always ends with an (possibly empty) literal, per §4.1.
        if !pattern.ends_with('/') {
            raw.push("");
        }

        let mut segments = Vec::with_capacity(raw.len());
        let mut seen_names = std::collections::HashSet::new();

        for part in raw {
            if let Some(caps) = PARAM_REGEX.captures(part) {
                let name = caps["name"].to_string();
                if !seen_names.insert(name.clone()) {
                    return Err(Error::Configuration(format!(
                        "duplicate path parameter {name:?} in pattern {pattern:?}"
                    )));
                }
                let converter = match caps.name("type") {
                    Some(m) => registry.get(m.as_str()).cloned().ok_or_else(|| {
                        Error::Configuration(format!(
                            "unknown converter {:?} referenced in pattern {pattern:?}",
                            m.as_str()
                        ))
                    })?,
                    None => registry.default_converter().clone(),
                };
                segments.push(Segment::Param { name, converter });
            } else {
                segments.push(Segment::Literal(part.to_string()));
            }
        }

        Ok(CompiledPath {
            pattern: pattern.to_string(),
            segments,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Attempt to match `path` (already slash-normalized by the router)
    /// against this compiled path. A decode failure on a parameter segment
    /// is a no-match, not a protocol error (§4.2).
    pub fn match_path(&self, path: &str) -> Option<std::collections::HashMap<String, ParamValue>> {
        let mut client: Vec<&str> = path.split('/').collect();
        if !path.ends_with('/') {
            client.push("");
        }

        if client.len() != self.segments.len() {
            return None;
        }

        let mut params = std::collections::HashMap::new();
        for (piece, segment) in client.iter().zip(self.segments.iter()) {
            match segment {
                Segment::Literal(lit) => {
                    if lit != piece {
                        return None;
                    }
                }
                Segment::Param { name, converter } => {
                    if !converter.matches(piece) {
                        return None;
                    }
                    let value = converter.decode(piece).ok()?;
                    params.insert(name.clone(), value);
                }
            }
        }
        Some(params)
    }
}
