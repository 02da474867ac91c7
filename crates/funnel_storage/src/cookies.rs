#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use percent_encoding::percent_decode_str;

/// Read-only view of a `document.cookie` style header (`a=1; b=2`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieJar {
    cookies: BTreeMap<String, String>,
}

impl CookieJar {
    pub fn empty() -> Self {
        Self::default()
    }

    /// First occurrence of a name wins, matching how browsers order the
    /// more specific cookie first.
    pub fn parse(header: &str) -> Self {
        let mut cookies = BTreeMap::new();
        for part in header.split(';') {
            let part = part.trim_start();
            let Some((name, value)) = part.split_once('=') else {
                continue;
            };
            if name.is_empty() {
                continue;
            }
            cookies
                .entry(name.to_string())
                .or_insert_with(|| value.to_string());
        }
        Self { cookies }
    }

    /// Percent-decoded value; a value that does not decode to UTF-8 is
    /// returned raw. Empty values read as absent.
    pub fn get(&self, name: &str) -> Option<String> {
        let raw = self.cookies.get(name)?;
        if raw.is_empty() {
            return None;
        }
        match percent_decode_str(raw).decode_utf8() {
            Ok(decoded) => Some(decoded.into_owned()),
            Err(_) => Some(raw.clone()),
        }
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.cookies.insert(name.into(), value.into());
    }

    pub fn remove(&mut self, name: &str) {
        self.cookies.remove(name);
    }
}
