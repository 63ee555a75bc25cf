use std::collections::BTreeMap;

use axum_extra::extract::cookie::Cookie;
use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderValue, SET_COOKIE};
use serde::{Deserialize, Serialize};
use url::Url;

type CookieMap = BTreeMap<String, BTreeMap<String, String>>;

/// Legacy cookies of one web session.
///
/// Cookies are scoped by host (or by `Domain` attribute, which also matches
/// subdomains); paths are not tracked. A jar is loaded from the session's
/// records before a legacy call and saved back after it, so two web sessions
/// never see each other's `JSESSIONID` or `AUTH_TOKEN`.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(from = "CookieMap", into = "CookieMap")]
pub struct LegacyCookieJar {
    domains: RwLock<CookieMap>,
}

impl LegacyCookieJar {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, domain: &str, name: impl Into<String>, value: impl Into<String>) {
        self.domains
            .write()
            .entry(normalize(domain))
            .or_default()
            .insert(name.into(), value.into());
    }

    pub fn remove(&self, domain: &str, name: &str) {
        if let Some(cookies) = self.domains.write().get_mut(&normalize(domain)) {
            cookies.remove(name);
        }
    }

    /// Value of `name` as it would be sent to `host`.
    #[must_use]
    pub fn get(&self, host: &str, name: &str) -> Option<String> {
        self.matching(host)
            .into_iter()
            .find_map(|(n, v)| (n == name).then_some(v))
    }

    /// Drops every cookie.
    pub fn clear(&self) {
        self.domains.write().clear();
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.domains.read().values().all(BTreeMap::is_empty)
    }

    /// `Cookie` request header for `url`, if any cookie matches.
    #[must_use]
    pub fn header_for(&self, url: &Url) -> Option<HeaderValue> {
        let pairs = self.matching(url.host_str()?);
        if pairs.is_empty() {
            return None;
        }
        let header = pairs
            .iter()
            .map(|(n, v)| format!("{n}={v}"))
            .collect::<Vec<_>>()
            .join("; ");
        HeaderValue::from_str(&header).ok()
    }

    /// Applies the `Set-Cookie` headers of a response from `url`.
    pub fn store_response_cookies(&self, headers: &HeaderMap, url: &Url) {
        let Some(host) = url.host_str() else {
            return;
        };
        for header in headers.get_all(SET_COOKIE) {
            let Ok(raw) = header.to_str() else { continue };
            let Ok(cookie) = Cookie::parse(raw) else {
                tracing::debug!(cookie = %raw, "Ignoring unparsable Set-Cookie from legacy server");
                continue;
            };
            let domain = cookie.domain().unwrap_or(host).to_owned();
            let expired = cookie.max_age().is_some_and(|age| age.is_zero() || age.is_negative());
            if expired {
                self.remove(&domain, cookie.name());
            } else {
                self.add(&domain, cookie.name(), cookie.value());
            }
        }
    }

    fn matching(&self, host: &str) -> Vec<(String, String)> {
        let host = normalize(host);
        self.domains
            .read()
            .iter()
            .filter(|(domain, _)| host == **domain || host.ends_with(&format!(".{domain}")))
            .flat_map(|(_, cookies)| cookies.iter().map(|(n, v)| (n.clone(), v.clone())))
            .collect()
    }
}

impl Clone for LegacyCookieJar {
    fn clone(&self) -> Self {
        Self::from(self.domains.read().clone())
    }
}

impl From<CookieMap> for LegacyCookieJar {
    fn from(domains: CookieMap) -> Self {
        Self {
            domains: RwLock::new(domains),
        }
    }
}

impl From<LegacyCookieJar> for CookieMap {
    fn from(jar: LegacyCookieJar) -> Self {
        jar.domains.into_inner()
    }
}

fn normalize(domain: &str) -> String {
    domain.trim_start_matches('.').to_ascii_lowercase()
}
