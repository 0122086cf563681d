//! The narrow view of the HTTP layer the recorder reads from.
//!
//! Any framework can be adapted by implementing [`RequestInfo`] and
//! [`ResponseInfo`]; [`Request`] and [`Response`] are plain owned versions.

use std::collections::BTreeMap;

/// Header multi-map. Lookups ignore ASCII case, names keep their spelling.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Headers {
    entries: Vec<(String, Vec<String>)>,
}

impl Headers {
    pub fn new() -> Self {
        Headers::default()
    }

    /// Add a value, keeping any values already present for `name`.
    pub fn append<N: Into<String>, V: Into<String>>(&mut self, name: N, value: V) {
        let name = name.into();
        match self.position(&name) {
            Some(idx) => self.entries[idx].1.push(value.into()),
            None => self.entries.push((name, vec![value.into()])),
        }
    }

    /// Replace all values for `name`.
    pub fn insert<N: Into<String>, V: Into<String>>(&mut self, name: N, value: V) {
        let name = name.into();
        match self.position(&name) {
            Some(idx) => self.entries[idx].1 = vec![value.into()],
            None => self.entries.push((name, vec![value.into()])),
        }
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_all(name).first().map(String::as_str)
    }

    pub fn get_all(&self, name: &str) -> &[String] {
        match self.position(name) {
            Some(idx) => &self.entries[idx].1,
            None => &[],
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }

    /// One value per header name: the first one.
    pub fn first_values(&self) -> BTreeMap<String, String> {
        self.iter()
            .filter_map(|(name, values)| {
                values
                    .first()
                    .map(|value| (name.to_string(), value.to_string()))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(n, _)| n.eq_ignore_ascii_case(name))
    }
}

/// The authenticated user, if any. Every field may be missing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Principal {
    pub id: Option<String>,
    pub email: Option<String>,
    pub username: Option<String>,
}

pub trait RequestInfo {
    fn method(&self) -> &str;
    /// URI template of the matched route, if routing matched.
    fn route_uri(&self) -> Option<&str>;
    fn path(&self) -> &str;
    fn client_ip(&self) -> &str;
    fn user_agent(&self) -> &str;
    fn headers(&self) -> &Headers;
    fn principal(&self) -> Option<&Principal>;

    fn header_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.headers().get(name).unwrap_or(default)
    }
}

pub trait ResponseInfo {
    fn status_code(&self) -> u16;
    fn headers(&self) -> &Headers;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub route_uri: Option<String>,
    pub client_ip: String,
    pub headers: Headers,
    pub principal: Option<Principal>,
}

impl Request {
    pub fn new<M: Into<String>, P: Into<String>>(method: M, path: P) -> Self {
        Request {
            method: method.into(),
            path: path.into(),
            route_uri: None,
            client_ip: "127.0.0.1".to_string(),
            headers: Headers::new(),
            principal: None,
        }
    }

    pub fn with_route_uri<S: Into<String>>(mut self, uri: S) -> Self {
        self.route_uri = Some(uri.into());
        self
    }

    pub fn with_client_ip<S: Into<String>>(mut self, ip: S) -> Self {
        self.client_ip = ip.into();
        self
    }

    pub fn with_header<N: Into<String>, V: Into<String>>(mut self, name: N, value: V) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.principal = Some(principal);
        self
    }
}

impl RequestInfo for Request {
    fn method(&self) -> &str {
        &self.method
    }

    fn route_uri(&self) -> Option<&str> {
        self.route_uri.as_deref()
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn client_ip(&self) -> &str {
        &self.client_ip
    }

    fn user_agent(&self) -> &str {
        self.headers.get("User-Agent").unwrap_or("")
    }

    fn headers(&self) -> &Headers {
        &self.headers
    }

    fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status_code: u16,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status_code: u16) -> Self {
        Response {
            status_code,
            headers: Headers::new(),
            body: vec![],
        }
    }

    pub fn with_header<N: Into<String>, V: Into<String>>(mut self, name: N, value: V) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_body<B: Into<Vec<u8>>>(mut self, body: B) -> Self {
        self.body = body.into();
        self
    }
}

impl ResponseInfo for Response {
    fn status_code(&self) -> u16 {
        self.status_code
    }

    fn headers(&self) -> &Headers {
        &self.headers
    }
}
