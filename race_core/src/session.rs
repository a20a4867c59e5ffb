//! Per-worker session: cookie jar plus default headers, merged against each
//! request to build a [`PreparedRequest`] (spec §2 "Session/Adapter glue").
//!
//! Grounded on `pyrace.thread.Thread._create_session`
//! (`examples/original_source/pyrace/thread.py`): a fresh session per
//! worker with the library's own fallback `User-Agent` suppressed, leaving
//! `Accept`, `Accept-Encoding`, and `Connection: keep-alive` as defaults.
//! Header/cookie merge precedence (request overrides session; an explicit
//! `Cookie:` header overrides the cookie map entirely) follows `requests`'
//! own `Session.prepare_request` semantics, which `pyrace` relies on
//! unmodified.

use url::Url;

use crate::cookie::CookieJar;
use crate::error::RaceError;
use crate::http::encode_body;
use crate::multimap::OrderedMultimap;
use crate::work::{PreparedRequest, RequestSpec};

/// Owns one worker's cookie jar and default headers across its whole work
/// queue.
pub struct Session {
    pub jar: CookieJar,
    pub default_headers: OrderedMultimap<String, String>,
}

impl Session {
    /// A fresh session with the library's fallback `User-Agent` removed.
    pub fn new() -> Self {
        let mut default_headers = OrderedMultimap::new();
        default_headers.insert("Accept".to_string(), "*/*".to_string());
        default_headers.insert("Accept-Encoding".to_string(), "gzip, deflate".to_string());
        default_headers.insert("Connection".to_string(), "keep-alive".to_string());
        Self {
            jar: CookieJar::new(),
            default_headers,
        }
    }

    /// Merges `spec` against this session's defaults and cookie jar,
    /// producing a fully materialized request ready for
    /// `crate::http::serialize_request`.
    pub fn prepare(&self, spec: &RequestSpec) -> Result<PreparedRequest, RaceError> {
        let mut url = Url::parse(&spec.url)
            .map_err(|e| RaceError::Transport(format!("invalid URL {:?}: {e}", spec.url)))?;
        for (key, value) in spec.query.iter() {
            url.query_pairs_mut().append_pair(key, value);
        }

        let scheme = url.scheme().to_string();
        let host = url
            .host_str()
            .ok_or_else(|| RaceError::Transport(format!("URL has no host: {}", spec.url)))?
            .to_string();
        let default_port = if scheme.eq_ignore_ascii_case("https") { 443 } else { 80 };
        let port = url.port().unwrap_or(default_port);

        let mut target = url.path().to_string();
        if let Some(query) = url.query() {
            target.push('?');
            target.push_str(query);
        }

        let mut headers = merge_headers(&self.default_headers, &spec.headers);

        if !headers.iter().any(|(k, _)| k.eq_ignore_ascii_case("cookie")) {
            if let Some(cookie_header) = self.combined_cookie_header(&host, spec) {
                headers.insert("Cookie".to_string(), cookie_header);
            }
        }

        let mut body = Vec::new();
        if let Some(spec_body) = &spec.body {
            let (encoded, content_type) = encode_body(spec_body);
            body = encoded;
            if let Some(content_type) = content_type {
                if !headers.iter().any(|(k, _)| k.eq_ignore_ascii_case("content-type")) {
                    headers.insert("Content-Type".to_string(), content_type.to_string());
                }
            }
        }

        Ok(PreparedRequest {
            method: spec.method.clone(),
            scheme,
            host,
            port,
            target,
            headers,
            body,
        })
    }

    /// Cookies to send for `host`: the jar's stored cookies, overridden
    /// entry-by-entry by `spec.cookies`. Returns `None` if there is
    /// nothing to send. Not consulted when `spec.headers` already carries
    /// an explicit `Cookie:` entry (that header wins outright).
    fn combined_cookie_header(&self, host: &str, spec: &RequestSpec) -> Option<String> {
        let mut combined: OrderedMultimap<String, String> = OrderedMultimap::new();
        for (name, value) in self.jar.cookies_for(host) {
            combined.insert(name, value);
        }
        for (name, value) in spec.cookies.iter() {
            // Request-level cookies override the jar's for the same name.
            combined.remove(name);
            combined.insert(name.clone(), value.clone());
        }
        if combined.is_empty() {
            return None;
        }
        Some(
            combined
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Overrides any default header sharing a key (case-insensitively) with an
/// entry in `overrides`, then appends every override entry.
fn merge_headers(
    defaults: &OrderedMultimap<String, String>,
    overrides: &OrderedMultimap<String, String>,
) -> OrderedMultimap<String, String> {
    let mut out = OrderedMultimap::new();
    for (key, value) in defaults.iter() {
        let overridden = overrides
            .iter()
            .any(|(k, _)| k.eq_ignore_ascii_case(key));
        if !overridden {
            out.insert(key.clone(), value.clone());
        }
    }
    for (key, value) in overrides.iter() {
        out.insert(key.clone(), value.clone());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_headers_override_session_defaults() {
        let session = Session::new();
        let mut spec = RequestSpec::get("https://example.test/path");
        spec.headers.insert("Accept".to_string(), "application/json".to_string());

        let prepared = session.prepare(&spec).unwrap();
        let accepts: Vec<_> = prepared
            .headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case("accept"))
            .collect();
        assert_eq!(accepts.len(), 1);
        assert_eq!(accepts[0].1, "application/json");
    }

    #[test]
    fn query_params_are_appended_to_existing_query_string() {
        let session = Session::new();
        let mut spec = RequestSpec::get("https://example.test/path?a=1");
        spec.query.insert("b".to_string(), "2".to_string());

        let prepared = session.prepare(&spec).unwrap();
        assert!(prepared.target.contains("a=1"));
        assert!(prepared.target.contains("b=2"));
    }

    #[test]
    fn jar_cookies_are_sent_when_no_explicit_cookie_header() {
        let mut session = Session::new();
        session.jar.set("example.test", "session_id", "abc");
        let spec = RequestSpec::get("https://example.test/path");

        let prepared = session.prepare(&spec).unwrap();
        let cookie = prepared
            .headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("cookie"))
            .map(|(_, v)| v.clone());
        assert_eq!(cookie, Some("session_id=abc".to_string()));
    }

    #[test]
    fn explicit_cookie_header_overrides_jar_and_cookie_map() {
        let mut session = Session::new();
        session.jar.set("example.test", "session_id", "abc");
        let mut spec = RequestSpec::get("https://example.test/path");
        spec.cookies.insert("other".to_string(), "1".to_string());
        spec.headers.insert("Cookie".to_string(), "manual=yes".to_string());

        let prepared = session.prepare(&spec).unwrap();
        let cookie = prepared
            .headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("cookie"))
            .map(|(_, v)| v.clone());
        assert_eq!(cookie, Some("manual=yes".to_string()));
    }

    #[test]
    fn json_body_sets_content_type_when_absent() {
        let session = Session::new();
        let mut spec = RequestSpec::get("https://example.test/path");
        spec.method = "POST".to_string();
        spec.body = Some(crate::work::Body::Json(serde_json::json!({"a": 1})));

        let prepared = session.prepare(&spec).unwrap();
        let content_type = prepared
            .headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
            .map(|(_, v)| v.clone());
        assert_eq!(content_type, Some("application/json".to_string()));
        assert_eq!(prepared.body, br#"{"a":1}"#);
    }
}
