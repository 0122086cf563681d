use crate::{client::TransactionsConfig, http::RequestInfo};

/// Token substituted for numeric path segments.
pub const NUMERIC_SEGMENT: &str = "N";

/// Derives transaction names from the request method and route.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransactionNameResolver {
    config: TransactionsConfig,
}

impl TransactionNameResolver {
    pub fn new(config: TransactionsConfig) -> Self {
        TransactionNameResolver { config }
    }

    /// Name given when the transaction starts: `"{METHOD} {PATH}"`.
    pub fn initial_name<R: RequestInfo + ?Sized>(&self, request: &R) -> String {
        format!("{} {}", request.method(), path(request))
    }

    /// Name to overwrite the initial one with once the response is known,
    /// `None` when route URIs are not in use.
    pub fn final_name<R: RequestInfo + ?Sized>(&self, request: &R) -> Option<String> {
        if !self.config.use_route_uri {
            return None;
        }
        if self.config.normalize_uri {
            Some(normalized_name(request))
        } else {
            Some(route_uri_name(request))
        }
    }
}

/// Matched route template, else the raw path with `""` read as `"/"`.
pub fn path<R: RequestInfo + ?Sized>(request: &R) -> &str {
    match request.route_uri() {
        Some(uri) => uri,
        None if request.path().is_empty() => "/",
        None => request.path(),
    }
}

/// `"{METHOD} /{PATH}"`. A path that already starts with `/` ends up with two.
pub fn route_uri_name<R: RequestInfo + ?Sized>(request: &R) -> String {
    format!("{} /{}", request.method(), path(request))
}

/// `"{METHOD} {segments}"` with empty segments dropped and numeric ones
/// replaced by `N`: `PUT /api/v2/product/6404` gives `PUT api/v2/product/N`.
pub fn normalized_name<R: RequestInfo + ?Sized>(request: &R) -> String {
    format!("{} {}", request.method(), normalize_path(path(request)))
}

pub fn normalize_path(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            if is_numeric(segment) {
                NUMERIC_SEGMENT
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Integer or decimal literal with optional sign and exponent, surrounding
/// whitespace allowed. `v2`, `0x1A` and `inf` are not numeric.
pub fn is_numeric(segment: &str) -> bool {
    let s = segment.trim();
    let s = s.strip_prefix(|c| c == '+' || c == '-').unwrap_or(s);

    let (mantissa, exponent) = match s.find(|c| c == 'e' || c == 'E') {
        Some(idx) => (&s[..idx], Some(&s[idx + 1..])),
        None => (s, None),
    };

    let mut digits = 0;
    let mut dots = 0;
    for c in mantissa.chars() {
        match c {
            '0'..='9' => digits += 1,
            '.' => dots += 1,
            _ => return false,
        }
    }
    if digits == 0 || dots > 1 {
        return false;
    }

    match exponent {
        None => true,
        Some(exp) => {
            let exp = exp.strip_prefix(|c| c == '+' || c == '-').unwrap_or(exp);
            !exp.is_empty() && exp.chars().all(|c| c.is_ascii_digit())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Request;

    fn resolver(use_route_uri: bool, normalize_uri: bool) -> TransactionNameResolver {
        TransactionNameResolver::new(TransactionsConfig {
            use_route_uri,
            normalize_uri,
        })
    }

    #[test]
    fn test_initial_name_uses_route_template() {
        let request = Request::new("GET", "/users/17").with_route_uri("users/{id}");
        assert_eq!(resolver(false, false).initial_name(&request), "GET users/{id}");
    }

    #[test]
    fn test_initial_name_falls_back_to_path() {
        let request = Request::new("POST", "/login");
        assert_eq!(resolver(false, false).initial_name(&request), "POST /login");

        let empty = Request::new("GET", "");
        assert_eq!(resolver(false, false).initial_name(&empty), "GET /");
    }

    #[test]
    fn test_no_final_name_without_route_uri() {
        let request = Request::new("GET", "/users");
        assert_eq!(resolver(false, true).final_name(&request), None);
    }

    #[test]
    fn test_route_uri_name_keeps_double_slash() {
        let request = Request::new("GET", "/users");
        assert_eq!(
            resolver(true, false).final_name(&request).unwrap(),
            "GET //users"
        );

        let routed = Request::new("GET", "/users").with_route_uri("users");
        assert_eq!(
            resolver(true, false).final_name(&routed).unwrap(),
            "GET /users"
        );
    }

    #[test]
    fn test_normalized_name() {
        let request = Request::new("PUT", "/api/v2/product/6404");
        assert_eq!(
            resolver(true, true).final_name(&request).unwrap(),
            "PUT api/v2/product/N"
        );

        let routed = Request::new("PUT", "/api/v2/product/6404")
            .with_route_uri("/api/v2/product/{id}");
        assert_eq!(
            resolver(true, true).final_name(&routed).unwrap(),
            "PUT api/v2/product/{id}"
        );
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/orders/12/items/3.5"), "orders/N/items/N");
        assert_eq!(normalize_path("/"), "");
        assert_eq!(normalize_path("//a//1/"), "a/N");
    }

    #[test]
    fn test_is_numeric() {
        for yes in &["0", "6404", "-3", "+7", "1.5", ".5", "5.", "1e3", "2.5E-4", " 12"] {
            assert!(is_numeric(yes), "{} should be numeric", yes);
        }
        for no in &["", "v2", "12a", "0x1A", "1.2.3", "e5", "1e", "inf", "NaN", "-", "."] {
            assert!(!is_numeric(no), "{} should not be numeric", no);
        }
    }
}
