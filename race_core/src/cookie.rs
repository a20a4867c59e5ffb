//! Per-worker cookie storage (spec §2 "Session/Adapter glue", §4.4).
//!
//! Grounded on `pyrace.thread.Thread._extract_cookies`
//! (`examples/original_source/pyrace/thread.py`): a `Cookie:` header on the
//! request always wins over a separately-supplied cookie map, and malformed
//! entries (no `=`) are logged and dropped rather than failing the request.

use indexmap::IndexMap;

use crate::multimap::OrderedMultimap;

/// A simple per-host cookie store. Real browsers track path/expiry/secure
/// flags; this engine only needs enough fidelity to replay cookies set by
/// one response into the next request to the same host (spec §4.4 names no
/// richer requirement). `IndexMap` keeps cookies in set-order, so
/// `header_value_for` is stable across calls even though HTTP itself does
/// not require it.
#[derive(Debug, Clone, Default)]
pub struct CookieJar {
    by_host: IndexMap<String, IndexMap<String, String>>,
}

impl CookieJar {
    /// An empty jar.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records (or overwrites) one cookie for `host`.
    pub fn set(&mut self, host: &str, name: impl Into<String>, value: impl Into<String>) {
        self.by_host
            .entry(host.to_string())
            .or_default()
            .insert(name.into(), value.into());
    }

    /// All cookies currently stored for `host`, in the order they were
    /// first set.
    pub fn cookies_for(&self, host: &str) -> Vec<(String, String)> {
        self.by_host
            .get(host)
            .map(|map| map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }

    /// Renders the stored cookies for `host` as a `Cookie:` header value, or
    /// `None` if there are none.
    pub fn header_value_for(&self, host: &str) -> Option<String> {
        let cookies = self.cookies_for(host);
        if cookies.is_empty() {
            return None;
        }
        Some(
            cookies
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    /// Parses every `Set-Cookie` header in `response_headers` and stores the
    /// name/value pairs against `host`. Attribute fields (`Path`, `Expires`,
    /// `HttpOnly`, ...) are ignored beyond the first `name=value` segment,
    /// matching `pyrace`'s own cookie handling, which never tracks them.
    pub fn absorb_set_cookie_headers(
        &mut self,
        host: &str,
        response_headers: &OrderedMultimap<String, String>,
    ) {
        for (key, value) in response_headers.iter() {
            if !key.eq_ignore_ascii_case("set-cookie") {
                continue;
            }
            let first_segment = value.split(';').next().unwrap_or("");
            match split_cookie_pair(first_segment) {
                Some((name, val)) => self.set(host, name, val),
                None => log::warn!(
                    "malformed Set-Cookie entry for {host} (no `=`): {first_segment:?}"
                ),
            }
        }
    }

    /// Extracts and stores the cookies that were actually sent with a
    /// request, so a later `<<< EXPR >>>` or callback can inspect what went
    /// over the wire (spec §4.4's `save_sent_cookies`).
    ///
    /// Precedence: if `headers` contains a `Cookie:` entry, its contents are
    /// authoritative and `cookie_map` is ignored entirely. Otherwise every
    /// entry in `cookie_map` is stored individually. Malformed `Cookie:`
    /// segments (no `=`) are logged and skipped, not fatal.
    pub fn extract_sent(
        &mut self,
        host: &str,
        headers: &OrderedMultimap<String, String>,
        cookie_map: &OrderedMultimap<String, String>,
    ) {
        let cookie_header = headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("cookie"))
            .map(|(_, v)| v.clone());

        if let Some(raw) = cookie_header {
            for segment in raw.split(';') {
                let segment = segment.trim();
                if segment.is_empty() {
                    continue;
                }
                match split_cookie_pair(segment) {
                    Some((name, value)) => self.set(host, name, value),
                    None => log::warn!("malformed Cookie header entry for {host}: {segment:?}"),
                }
            }
            return;
        }

        for (name, value) in cookie_map.iter() {
            self.set(host, name.clone(), value.clone());
        }
    }
}

fn split_cookie_pair(segment: &str) -> Option<(String, String)> {
    let segment = segment.trim();
    let eq_pos = segment.find('=')?;
    let (name, value) = segment.split_at(eq_pos);
    let name = name.trim();
    let value = value[1..].trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_header_takes_precedence_over_cookie_map() {
        let mut jar = CookieJar::new();
        let mut headers = OrderedMultimap::new();
        headers.insert("Cookie".to_string(), "a=1; b=2".to_string());
        let mut cookie_map = OrderedMultimap::new();
        cookie_map.insert("c".to_string(), "3".to_string());

        jar.extract_sent("example.test", &headers, &cookie_map);

        let mut stored = jar.cookies_for("example.test");
        stored.sort();
        assert_eq!(
            stored,
            vec![("a".to_string(), "1".to_string()), ("b".to_string(), "2".to_string())]
        );
    }

    #[test]
    fn cookie_map_used_when_no_cookie_header_present() {
        let mut jar = CookieJar::new();
        let headers = OrderedMultimap::new();
        let mut cookie_map = OrderedMultimap::new();
        cookie_map.insert("c".to_string(), "3".to_string());

        jar.extract_sent("example.test", &headers, &cookie_map);

        assert_eq!(jar.cookies_for("example.test"), vec![("c".to_string(), "3".to_string())]);
    }

    #[test]
    fn malformed_cookie_header_entries_are_skipped_not_fatal() {
        let mut jar = CookieJar::new();
        let mut headers = OrderedMultimap::new();
        headers.insert("Cookie".to_string(), "good=1; nobody; also=bad=ok".to_string());
        let cookie_map = OrderedMultimap::new();

        jar.extract_sent("example.test", &headers, &cookie_map);

        let mut stored = jar.cookies_for("example.test");
        stored.sort();
        assert_eq!(
            stored,
            vec![
                ("also".to_string(), "bad=ok".to_string()),
                ("good".to_string(), "1".to_string())
            ]
        );
    }

    #[test]
    fn absorbs_set_cookie_response_headers_ignoring_attributes() {
        let mut jar = CookieJar::new();
        let mut headers = OrderedMultimap::new();
        headers.insert("Set-Cookie".to_string(), "session=abc; Path=/; HttpOnly".to_string());
        headers.insert("Set-Cookie".to_string(), "theme=dark".to_string());

        jar.absorb_set_cookie_headers("example.test", &headers);

        let mut stored = jar.cookies_for("example.test");
        stored.sort();
        assert_eq!(
            stored,
            vec![
                ("session".to_string(), "abc".to_string()),
                ("theme".to_string(), "dark".to_string())
            ]
        );
    }

    #[test]
    fn header_value_joins_with_semicolons() {
        let mut jar = CookieJar::new();
        jar.set("example.test", "a", "1");
        let value = jar.header_value_for("example.test").unwrap();
        assert!(value.contains("a=1"));
    }

    #[test]
    fn header_value_is_none_for_unknown_host() {
        let jar = CookieJar::new();
        assert_eq!(jar.header_value_for("unknown.test"), None);
    }
}
