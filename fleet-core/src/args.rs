use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

const ENTRY_SEP: char = ',';
const KV_SEP: char = '=';
const ESCAPE: char = '\\';

/// Named string arguments handed to suites, with typed accessors.
///
/// Missing keys fall back to the supplied default; present but malformed values
/// are reported as [`Error::InvalidConfig`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Args(BTreeMap<String, String>);

impl Args {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn string(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or(default).to_string()
    }

    pub fn int(&self, key: &str, default: i64) -> Result<i64> {
        self.parse_with(key, default, |raw| raw.parse::<i64>().ok())
    }

    pub fn uint(&self, key: &str, default: u64) -> Result<u64> {
        self.parse_with(key, default, |raw| raw.parse::<u64>().ok())
    }

    pub fn float(&self, key: &str, default: f64) -> Result<f64> {
        self.parse_with(key, default, |raw| raw.parse::<f64>().ok())
    }

    pub fn bool(&self, key: &str, default: bool) -> Result<bool> {
        self.parse_with(key, default, |raw| match raw.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        })
    }

    /// Durations use humantime syntax (`250ms`, `1m 30s`).
    pub fn duration(&self, key: &str, default: Duration) -> Result<Duration> {
        self.parse_with(key, default, |raw| humantime::parse_duration(raw).ok())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.0
    }

    /// Flattened `key=value,...` form used in environment variables.
    #[must_use]
    pub fn encode(&self) -> String {
        join_map(&self.0)
    }

    #[must_use]
    pub fn decode(raw: &str) -> Self {
        Self(split_map(raw))
    }

    fn parse_with<T>(
        &self,
        key: &str,
        default: T,
        parse: impl FnOnce(&str) -> Option<T>,
    ) -> Result<T> {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => parse(raw.trim()).ok_or_else(|| {
                Error::invalid_config(format!("argument `{key}` has invalid value `{raw}`"))
            }),
        }
    }
}

impl From<BTreeMap<String, String>> for Args {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

impl FromIterator<(String, String)> for Args {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Encodes a map as `key=value[,key=value...]` in key order.
///
/// `,`, `=` and `\` inside keys or values are backslash-escaped, so
/// `split_map(&join_map(m)) == m` for every map.
#[must_use]
pub fn join_map<K, V>(map: &BTreeMap<K, V>) -> String
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut out = String::new();
    for (i, (key, value)) in map.iter().enumerate() {
        if i > 0 {
            out.push(ENTRY_SEP);
        }
        escape_into(&mut out, key.as_ref());
        out.push(KV_SEP);
        escape_into(&mut out, value.as_ref());
    }
    out
}

/// Decodes the output of [`join_map`].
///
/// Entries without an unescaped `=` are skipped. A trailing lone `\` is kept literally.
#[must_use]
pub fn split_map(raw: &str) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    let mut key = String::new();
    let mut value = String::new();
    let mut in_value = false;
    let mut chars = raw.chars();

    while let Some(c) = chars.next() {
        let literal = match c {
            ESCAPE => Some(chars.next().unwrap_or(ESCAPE)),
            ENTRY_SEP => {
                if in_value {
                    map.insert(std::mem::take(&mut key), std::mem::take(&mut value));
                } else {
                    key.clear();
                }
                in_value = false;
                None
            }
            KV_SEP if !in_value => {
                in_value = true;
                None
            }
            other => Some(other),
        };

        if let Some(c) = literal {
            if in_value {
                value.push(c);
            } else {
                key.push(c);
            }
        }
    }

    if in_value {
        map.insert(key, value);
    }
    map
}

fn escape_into(out: &mut String, raw: &str) {
    for c in raw.chars() {
        if matches!(c, ENTRY_SEP | KV_SEP | ESCAPE) {
            out.push(ESCAPE);
        }
        out.push(c);
    }
}
