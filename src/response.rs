//! HTTP responses: status, headers, and content-negotiated body encoding.
//!
//! Grounded in `starapi/responses.py`'s `Response` class (the `_msgspec_parsing`
//! negotiation table, the header post-processing, and the factory methods),
//! and in the teacher's `router::Response` for the "plain status + body,
//! ergonomic `impl Into<..>` factories" texture.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::Error;
use crate::request::Request;

/// The deferred encoding target for a response body.
#[derive(Debug, Clone)]
pub enum Body {
    Empty,
    Bytes(Vec<u8>),
    Text(String),
    /// A structured value (object or array), encoded per content
    /// negotiation at emission time.
    Json(serde_json::Value),
}

impl Body {
    fn is_empty(&self) -> bool {
        matches!(self, Body::Empty)
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Body::Text(s)
    }
}

impl From<&str> for Body {
    fn from(s: &str) -> Self {
        Body::Text(s.to_string())
    }
}

impl From<Vec<u8>> for Body {
    fn from(b: Vec<u8>) -> Self {
        Body::Bytes(b)
    }
}

impl From<serde_json::Value> for Body {
    fn from(v: serde_json::Value) -> Self {
        Body::Json(v)
    }
}

impl<T> From<Option<T>> for Body
where
    T: Into<Body>,
{
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Body::Empty,
        }
    }
}

/// The encoding chosen by content negotiation over `Accept` (§4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Json,
    Yaml,
    Toml,
    MsgPack,
    /// The application-configured default, used when `Accept` names none of
    /// the above.
    Default,
}

/// Negotiate an [`Encoding`] from the `Accept` header value, per §4.8 step 1.
pub fn negotiate(accept: Option<&str>) -> Encoding {
    match accept {
        Some("application/json") => Encoding::Json,
        Some("application/x-yaml") | Some("text/yaml") => Encoding::Yaml,
        Some("application/toml") => Encoding::Toml,
        Some("application/msgpack") | Some("application/x-msgpack") => Encoding::MsgPack,
        _ => Encoding::Default,
    }
}

/// Encodes a structured [`serde_json::Value`] body into bytes for one
/// negotiated format. The core ships JSON/YAML/TOML; MsgPack has no encoder
/// grounded in the dependency stack and raises [`Error::Dependency`] unless
/// the application supplies its own via [`Config::default_encoder`].
///
/// [`Config::default_encoder`]: crate::config::Config::default_encoder
pub trait Encoder: Send + Sync {
    fn encode(&self, value: &serde_json::Value) -> Result<Vec<u8>, Error>;
}

pub struct JsonEncoder;

impl Encoder for JsonEncoder {
    fn encode(&self, value: &serde_json::Value) -> Result<Vec<u8>, Error> {
        serde_json::to_vec(value).map_err(|e| Error::Internal(format!("json encode failed: {e}")))
    }
}

pub struct YamlEncoder;

impl Encoder for YamlEncoder {
    fn encode(&self, value: &serde_json::Value) -> Result<Vec<u8>, Error> {
        serde_yaml::to_string(value)
            .map(String::into_bytes)
            .map_err(|e| Error::Internal(format!("yaml encode failed: {e}")))
    }
}

pub struct TomlEncoder;

impl Encoder for TomlEncoder {
    fn encode(&self, value: &serde_json::Value) -> Result<Vec<u8>, Error> {
        toml::to_string(value)
            .map(String::into_bytes)
            .map_err(|e| Error::Internal(format!("toml encode failed: {e}")))
    }
}

pub struct UnavailableMsgPackEncoder;

impl Encoder for UnavailableMsgPackEncoder {
    fn encode(&self, _value: &serde_json::Value) -> Result<Vec<u8>, Error> {
        Err(Error::Dependency(
            "no msgpack encoder is configured; supply one via Config::with_msgpack_encoder"
                .to_string(),
        ))
    }
}

/// Per-status response rewriting hook, run immediately before encoding.
///
/// Grounded in `starapi/formatters.py`'s `ResponseFormatter`, which looks up
/// a `format_{status_code}` method by name; here the lookup is an explicit
/// map from status code to closure rather than reflection.
#[derive(Clone, Default)]
pub struct ResponseFormatter {
    hooks: std::collections::HashMap<u16, Arc<dyn Fn(&Request, Response) -> Response + Send + Sync>>,
}

impl ResponseFormatter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_status(
        mut self,
        status: u16,
        hook: impl Fn(&Request, Response) -> Response + Send + Sync + 'static,
    ) -> Self {
        self.hooks.insert(status, Arc::new(hook));
        self
    }

    pub fn apply(&self, request: &Request, response: Response) -> Response {
        match self.hooks.get(&response.status_code) {
            Some(hook) => hook(request, response),
            None => response,
        }
    }
}

/// Percent-encode `s`, preserving the fixed safe-character set used for
/// redirect locations (§4.8): `:/%#?=@[]!$&'()*+,;` plus alphanumerics.
pub fn quote_redirect_url(s: &str) -> String {
    const SAFE: &[u8] = b":/%#?=@[]!$&'()*+,;";
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        let is_unreserved = byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' || byte == b'.' || byte == b'~';
        if is_unreserved || SAFE.contains(&byte) {
            out.push(byte as char);
        } else {
            out.push('%');
            out.push_str(&format!("{byte:02X}"));
        }
    }
    out
}

/// Status + headers + deferred body. See §3 and §4.8.
#[derive(Debug, Clone)]
pub struct Response {
    pub status_code: u16,
    /// Lower-cased header names, per §3's "stored lower-cased on the wire".
    pub headers: BTreeMap<String, String>,
    pub media_type: Option<String>,
    pub body: Body,
}

impl Response {
    pub fn new(status_code: u16, body: impl Into<Body>) -> Self {
        Response {
            status_code,
            headers: BTreeMap::new(),
            media_type: None,
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = Some(media_type.into());
        self
    }

    // -- factories, grounded in starapi/responses.py classmethods --------

    pub fn ok(body: impl Into<Body>) -> Self {
        let body = body.into();
        let status = if body.is_empty() { 201 } else { 200 };
        Response::new(status, body)
    }

    pub fn client_error(body: impl Into<Body>) -> Self {
        Response::new(400, body)
    }

    pub fn unauthorized(body: impl Into<Body>) -> Self {
        Response::new(401, body)
    }

    pub fn forbidden(body: impl Into<Body>) -> Self {
        Response::new(403, body)
    }

    pub fn not_found() -> Self {
        Response::new(404, "Not Found")
    }

    pub fn method_not_allowed() -> Self {
        Response::new(405, "Method Not Allowed")
    }

    pub fn internal() -> Self {
        Response::new(500, "Internal Server Error")
    }

    pub fn redirect(url: &str) -> Self {
        Response::new(200, Body::Bytes(Vec::new())).with_header("location", quote_redirect_url(url))
    }

    /// Select an encoder for `encoding`, falling back to `default` when
    /// `encoding` is [`Encoding::Default`].
    fn encoder_for<'a>(encoding: Encoding, default: &'a dyn Encoder) -> Box<dyn Encoder + 'a> {
        match encoding {
            Encoding::Json => Box::new(JsonEncoder),
            Encoding::Yaml => Box::new(YamlEncoder),
            Encoding::Toml => Box::new(TomlEncoder),
            Encoding::MsgPack => Box::new(UnavailableMsgPackEncoder),
            Encoding::Default => {
                // Can't move out of a trait object reference; re-borrow via a
                // thin forwarding encoder.
                struct Forward<'a>(&'a dyn Encoder);
                impl<'a> Encoder for Forward<'a> {
                    fn encode(&self, value: &serde_json::Value) -> Result<Vec<u8>, Error> {
                        self.0.encode(value)
                    }
                }
                Box::new(Forward(default))
            }
        }
    }

    /// Encode the body to bytes per §4.8 step 2.
    fn encode_body(&self, encoding: Encoding, default_encoder: &dyn Encoder) -> Result<Vec<u8>, Error> {
        match &self.body {
            Body::Empty => Ok(Vec::new()),
            Body::Bytes(b) => Ok(b.clone()),
            Body::Text(t) => Ok(t.clone().into_bytes()),
            Body::Json(value) => Self::encoder_for(encoding, default_encoder).encode(value),
        }
    }

    /// Build the outbound header list per §4.8 step 3: lower-case keys,
    /// `content-length` inserted if missing, `content-type` derived from
    /// `media_type` (with a `; charset=utf-8` suffix for `text/*` types).
    fn build_headers(&self, body_len: usize) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut headers = self.headers.clone();
        headers
            .entry("content-length".to_string())
            .or_insert_with(|| body_len.to_string());

        if let Some(media_type) = &self.media_type {
            if !headers.contains_key("content-type") {
                let mut value = media_type.clone();
                if media_type.starts_with("text/") {
                    value.push_str("; charset=utf-8");
                }
                headers.insert("content-type".to_string(), value);
            }
        }

        headers
            .into_iter()
            .map(|(k, v)| (k.into_bytes(), v.into_bytes()))
            .collect()
    }

    /// Send this response over `sender`, applying the `Accept`-driven
    /// encoding negotiation and header post-processing of §4.8.
    pub async fn emit(
        &self,
        accept_header: Option<&str>,
        default_encoder: &dyn Encoder,
        sender: &mut dyn crate::gateway::HttpSender,
    ) -> Result<(), Error> {
        let encoding = negotiate(accept_header);
        let body = self.encode_body(encoding, default_encoder)?;
        let headers = self.build_headers(body.len());

        sender
            .send(crate::gateway::HttpSendMessage::ResponseStart {
                status: self.status_code,
                headers,
            })
            .await?;
        sender
            .send(crate::gateway::HttpSendMessage::ResponseBody { body })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_with_body_is_200_without_body_is_201() {
        assert_eq!(Response::ok("hi").status_code, 200);
        assert_eq!(Response::ok(Body::Empty).status_code, 201);
    }

    #[test]
    fn not_found_has_expected_status_and_body() {
        let resp = Response::not_found();
        assert_eq!(resp.status_code, 404);
        matches!(resp.body, Body::Text(ref t) if t == "Not Found");
    }

    #[test]
    fn method_not_allowed_default_body() {
        let resp = Response::method_not_allowed();
        assert_eq!(resp.status_code, 405);
        assert!(matches!(resp.body, Body::Text(ref t) if t == "Method Not Allowed"));
    }

    #[test]
    fn redirect_quotes_location_preserving_safe_set() {
        let resp = Response::redirect("https://example.com/a b?x=1&y=2");
        let location = resp.headers.get("location").unwrap();
        assert_eq!(location, "https://example.com/a%20b?x=1&y=2");
    }

    #[test]
    fn header_build_is_idempotent() {
        let resp = Response::ok("hello");
        let h1 = resp.build_headers(5);
        let h2 = resp.build_headers(5);
        assert_eq!(h1, h2);
    }

    #[test]
    fn content_length_inserted_when_missing() {
        let resp = Response::ok("hello world");
        let headers = resp.build_headers(11);
        let (_, len) = headers.iter().find(|(k, _)| k == b"content-length").unwrap();
        assert_eq!(len, b"11");
    }

    #[test]
    fn media_type_text_gets_charset_suffix() {
        let resp = Response::ok("hi").with_media_type("text/plain");
        let headers = resp.build_headers(2);
        let (_, ct) = headers.iter().find(|(k, _)| k == b"content-type").unwrap();
        assert_eq!(ct, b"text/plain; charset=utf-8");
    }

    #[test]
    fn json_encoder_roundtrips() {
        let resp = Response::ok(serde_json::json!({"a": 1}));
        let bytes = resp.encode_body(Encoding::Json, &JsonEncoder).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn msgpack_without_encoder_is_a_dependency_error() {
        let resp = Response::ok(serde_json::json!([1, 2, 3]));
        let err = resp.encode_body(Encoding::MsgPack, &JsonEncoder).unwrap_err();
        assert!(matches!(err, Error::Dependency(_)));
    }

    #[test]
    fn negotiate_reads_accept_header() {
        assert_eq!(negotiate(Some("application/json")), Encoding::Json);
        assert_eq!(negotiate(Some("text/yaml")), Encoding::Yaml);
        assert_eq!(negotiate(Some("application/toml")), Encoding::Toml);
        assert_eq!(negotiate(Some("application/msgpack")), Encoding::MsgPack);
        assert_eq!(negotiate(Some("text/html")), Encoding::Default);
        assert_eq!(negotiate(None), Encoding::Default);
    }
}
