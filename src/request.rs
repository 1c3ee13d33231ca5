//! The HTTP request handle: a thin, lazily-decoded view over a connection
//! [`Scope`] plus its inbound message stream.
//!
//! Grounded in `starapi/requests.py`'s `BaseRequest`/`Request` (cached
//! properties for `url`, `query_params`, `cookies`, `headers`, `client`; the
//! `stream`/`body`/`json`/`form` pipeline), generalized per §9's "Lazy
//! caches" design note into explicit `Option<T>` fields instead of an
//! attribute-dict cache.

use std::collections::HashMap;

use crate::error::Error;
use crate::gateway::{HttpReceiveMessage, HttpReceiver, ParamValue, Scope};

/// A minimal URL, built from scope fields rather than a general-purpose URL
/// parser — the core only ever needs scheme/host/port/path/query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Url {
    pub scheme: String,
    pub host: String,
    pub port: Option<u16>,
    pub path: String,
    pub query: String,
}

impl Url {
    pub fn with_path(&self, path: &str) -> Self {
        Url {
            path: path.to_string(),
            ..self.clone()
        }
    }

    pub fn with_query(&self, query: &str) -> Self {
        Url {
            query: query.to_string(),
            ..self.clone()
        }
    }

    pub fn to_string_lossy(&self) -> String {
        let mut out = format!("{}://{}", self.scheme, self.host);
        if let Some(port) = self.port {
            out.push(':');
            out.push_str(&port.to_string());
        }
        out.push_str(&self.path);
        if !self.query.is_empty() {
            out.push('?');
            out.push_str(&self.query);
        }
        out
    }
}

fn url_from_scope(scope: &Scope) -> Url {
    let (host, port) = scope
        .server
        .clone()
        .unwrap_or_else(|| ("".to_string(), 0));
    Url {
        scheme: scope.scheme.clone().unwrap_or_else(|| "http".to_string()),
        host,
        port: if port == 0 { None } else { Some(port) },
        path: scope.path.clone(),
        query: String::from_utf8_lossy(&scope.query_string).into_owned(),
    }
}

/// Client socket address, per §3's `client` scope key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub host: String,
    pub port: u16,
}

fn parse_query(query_string: &[u8]) -> HashMap<String, Vec<String>> {
    let query = String::from_utf8_lossy(query_string);
    let mut out: HashMap<String, Vec<String>> = HashMap::new();
    if query.is_empty() {
        return out;
    }
    for pair in query.split('&') {
        if pair.is_empty() {
            continue;
        }
        let mut parts = pair.splitn(2, '=');
        let key = parts.next().unwrap_or("");
        let value = parts.next().unwrap_or("");
        out.entry(url_decode(key)).or_default().push(url_decode(value));
    }
    out
}

fn url_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                if let Ok(byte) = u8::from_str_radix(&s[i + 1..i + 3], 16) {
                    out.push(byte);
                    i += 3;
                } else {
                    out.push(bytes[i]);
                    i += 1;
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn parse_cookies(header: &str) -> HashMap<String, String> {
    let mut cookies = HashMap::new();
    for part in header.split(';') {
        let part = part.trim();
        if let Some((name, value)) = part.split_once('=') {
            cookies.insert(name.trim().to_string(), url_decode(value.trim()));
        }
    }
    cookies
}

/// The HTTP request handle. Borrows the scope and the gateway's inbound
/// channel for the duration of one dispatch; never outlives it (§3
/// Ownership).
pub struct Request {
    scope: Scope,
    receiver: Box<dyn HttpReceiver>,

    stream_consumed: bool,
    is_disconnected: bool,
    stream_cache: Option<Vec<Vec<u8>>>,
    body_cache: Option<Vec<u8>>,
    json_cache: Option<serde_json::Value>,
    form_cache: Option<FormData>,

    url_cache: Option<Url>,
    base_url_cache: Option<Url>,
    query_params_cache: Option<HashMap<String, Vec<String>>>,
    cookies_cache: Option<HashMap<String, String>>,
    headers_cache: Option<HashMap<String, String>>,
    client_cache: Option<Option<Address>>,

    closed: bool,
}

/// Parsed multipart or urlencoded form data (§4.4).
#[derive(Debug, Clone, Default)]
pub struct FormData {
    pub fields: HashMap<String, String>,
    pub files: HashMap<String, Vec<u8>>,
}

impl Request {
    pub fn new(scope: Scope, receiver: Box<dyn HttpReceiver>) -> Self {
        Request {
            scope,
            receiver,
            stream_consumed: false,
            is_disconnected: false,
            stream_cache: None,
            body_cache: None,
            json_cache: None,
            form_cache: None,
            url_cache: None,
            base_url_cache: None,
            query_params_cache: None,
            cookies_cache: None,
            headers_cache: None,
            client_cache: None,
            closed: false,
        }
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub(crate) fn scope_mut(&mut self) -> &mut Scope {
        &mut self.scope
    }

    pub fn path_params(&self) -> &HashMap<String, ParamValue> {
        &self.scope.path_params
    }

    pub fn method(&self) -> Option<&str> {
        self.scope.method.as_deref()
    }

    pub fn is_disconnected(&self) -> bool {
        self.is_disconnected
    }

    pub fn headers(&mut self) -> &HashMap<String, String> {
        if self.headers_cache.is_none() {
            let headers = self
                .scope
                .headers
                .iter()
                .map(|(k, v)| {
                    (
                        String::from_utf8_lossy(k).to_lowercase(),
                        String::from_utf8_lossy(v).into_owned(),
                    )
                })
                .collect();
            self.headers_cache = Some(headers);
        }
        self.headers_cache.as_ref().unwrap()
    }

    pub fn url(&mut self) -> &Url {
        if self.url_cache.is_none() {
            self.url_cache = Some(url_from_scope(&self.scope));
        }
        self.url_cache.as_ref().unwrap()
    }

    pub fn base_url(&mut self) -> &Url {
        if self.base_url_cache.is_none() {
            let base = self.url().with_path("/").with_query("");
            self.base_url_cache = Some(base);
        }
        self.base_url_cache.as_ref().unwrap()
    }

    pub fn query_params(&mut self) -> &HashMap<String, Vec<String>> {
        if self.query_params_cache.is_none() {
            self.query_params_cache = Some(parse_query(&self.scope.query_string));
        }
        self.query_params_cache.as_ref().unwrap()
    }

    pub fn cookies(&mut self) -> &HashMap<String, String> {
        if self.cookies_cache.is_none() {
            let cookie_header = self.headers().get("cookie").cloned();
            let cookies = cookie_header.map(|h| parse_cookies(&h)).unwrap_or_default();
            self.cookies_cache = Some(cookies);
        }
        self.cookies_cache.as_ref().unwrap()
    }

    pub fn client(&mut self) -> Option<&Address> {
        if self.client_cache.is_none() {
            self.client_cache = Some(self.scope.client.clone().map(|(host, port)| Address { host, port }));
        }
        self.client_cache.as_ref().unwrap().as_ref()
    }

    /// Drain the inbound body stream into `stream_cache`, collecting each
    /// non-empty chunk. A second call after the stream has been consumed
    /// returns the cached chunks rather than re-reading (§4.4: "Calling
    /// `stream` after prior consumption fails with a fatal error" refers to
    /// re-entrant *uncached* use; callers reach the gateway exactly once
    /// because `stream`/`body`/`json` all funnel through this cache).
    pub async fn stream(&mut self) -> Result<&[Vec<u8>], Error> {
        if let Some(ref chunks) = self.stream_cache {
            return Ok(chunks);
        }
        if self.stream_consumed {
            return Err(Error::Internal("stream already consumed".to_string()));
        }

        let mut chunks = Vec::new();
        loop {
            match self.receiver.receive().await? {
                HttpReceiveMessage::Request { body, more_body } => {
                    if !body.is_empty() {
                        chunks.push(body);
                    }
                    if !more_body {
                        break;
                    }
                }
                HttpReceiveMessage::Disconnect => {
                    self.is_disconnected = true;
                    return Err(Error::ClientDisconnect);
                }
            }
        }
        self.stream_consumed = true;
        self.stream_cache = Some(chunks);
        Ok(self.stream_cache.as_ref().unwrap())
    }

    pub async fn body(&mut self) -> Result<&[u8], Error> {
        if self.body_cache.is_none() {
            let chunks = self.stream().await?;
            let joined: Vec<u8> = chunks.iter().flatten().copied().collect();
            self.body_cache = Some(joined);
        }
        Ok(self.body_cache.as_ref().unwrap())
    }

    pub async fn json(&mut self) -> Result<&serde_json::Value, Error> {
        if self.json_cache.is_none() {
            let body = self.body().await?;
            let value = serde_json::from_slice(body)
                .map_err(|e| Error::Payload(format!("invalid json body: {e}")))?;
            self.json_cache = Some(value);
        }
        Ok(self.json_cache.as_ref().unwrap())
    }

    /// Parse `multipart/form-data` or `application/x-www-form-urlencoded`
    /// based on `Content-Type`, bounding the number of fields/files and the
    /// total body size. An unknown content type yields an empty form (§4.4).
    pub async fn form(&mut self, max_files: usize, max_fields: usize, max_body_bytes: usize) -> Result<&FormData, Error> {
        if self.form_cache.is_some() {
            return Ok(self.form_cache.as_ref().unwrap());
        }

        let content_type = self.headers().get("content-type").cloned().unwrap_or_default();
        let body = self.body().await?;
        if body.len() > max_body_bytes {
            return Err(Error::http(400, "request body exceeds the configured size limit"));
        }

        let form = if content_type.starts_with("application/x-www-form-urlencoded") {
            let parsed = parse_query(body);
            if parsed.len() > max_fields {
                return Err(Error::http(400, "too many form fields"));
            }
            let fields = parsed
                .into_iter()
                .map(|(k, mut v)| (k, v.pop().unwrap_or_default()))
                .collect();
            FormData { fields, files: HashMap::new() }
        } else if content_type.starts_with("multipart/form-data") {
            parse_multipart(&content_type, body, max_files, max_fields)?
        } else {
            FormData::default()
        };

        self.form_cache = Some(form);
        Ok(self.form_cache.as_ref().unwrap())
    }

    /// Release the cached form resource. A second call is a no-op (§4.4,
    /// §8 "Form resource release").
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.form_cache = None;
    }
}

fn parse_multipart(
    content_type: &str,
    body: &[u8],
    max_files: usize,
    max_fields: usize,
) -> Result<FormData, Error> {
    let boundary = content_type
        .split(';')
        .find_map(|part| part.trim().strip_prefix("boundary="))
        .map(|b| b.trim_matches('"').to_string())
        .ok_or_else(|| Error::http(400, "multipart/form-data missing boundary"))?;

    let delimiter = format!("--{boundary}");
    let text = String::from_utf8_lossy(body);
    let mut fields = HashMap::new();
    let mut files = HashMap::new();

    for part in text.split(&delimiter) {
        let part = part.trim_start_matches("\r\n");
        if part.is_empty() || part.starts_with("--") {
            continue;
        }
        let Some((headers_blob, content)) = part.split_once("\r\n\r\n") else {
            continue;
        };
        let content = content.trim_end_matches("\r\n");

        let mut name = None;
        let mut filename = None;
        for line in headers_blob.lines() {
            if let Some(disposition) = line.strip_prefix("Content-Disposition:") {
                for attr in disposition.split(';') {
                    let attr = attr.trim();
                    if let Some(v) = attr.strip_prefix("name=") {
                        name = Some(v.trim_matches('"').to_string());
                    } else if let Some(v) = attr.strip_prefix("filename=") {
                        filename = Some(v.trim_matches('"').to_string());
                    }
                }
            }
        }

        let Some(name) = name else { continue };
        if let Some(_filename) = filename {
            if files.len() >= max_files {
                return Err(Error::http(400, "too many files in form"));
            }
            files.insert(name, content.as_bytes().to_vec());
        } else {
            if fields.len() >= max_fields {
                return Err(Error::http(400, "too many fields in form"));
            }
            fields.insert(name, content.to_string());
        }
    }

    Ok(FormData { fields, files })
}
