use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

/// Sorted, de-duplicated `key:value` pairs identifying one series of a metric.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TagSet {
    // Series usually carry zero or one tag (`endpoint`).
    tags: SmallVec<[(Arc<str>, Arc<str>); 2]>,
}

impl TagSet {
    pub fn new(pairs: &[(&str, &str)]) -> Self {
        let mut tags: SmallVec<[(Arc<str>, Arc<str>); 2]> = pairs
            .iter()
            .map(|(k, v)| (Arc::<str>::from(*k), Arc::<str>::from(*v)))
            .collect();
        tags.sort_unstable();
        tags.dedup_by(|a, b| a.0 == b.0);
        Self { tags }
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k.as_ref() == key)
            .map(|(_, v)| v.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.tags.iter().map(|(k, v)| (k.as_ref(), v.as_ref()))
    }

    /// Formats `name{k:v,...}`, the series key used in exported summaries.
    ///
    /// `,` and `\` inside keys and values are backslash-escaped so the key parses back.
    pub fn series_key(&self, name: &str) -> String {
        if self.is_empty() {
            return name.to_string();
        }
        format!("{name}{self}")
    }

    /// Splits a `name{k:v,...}` series key back into its parts.
    pub fn parse_series_key(key: &str) -> Option<(&str, Vec<(Cow<'_, str>, Cow<'_, str>)>)> {
        let Some(open) = key.find('{') else {
            return Some((key, Vec::new()));
        };
        let inner = key[open..].strip_prefix('{')?.strip_suffix('}')?;
        let mut pairs = Vec::new();
        for part in split_unescaped(inner).into_iter().filter(|p| !p.is_empty()) {
            let (k, v) = part.split_once(':')?;
            pairs.push((unescape(k)?, unescape(v)?));
        }
        Some((&key[..open], pairs))
    }
}

fn needs_escape(c: char) -> bool {
    matches!(c, ',' | '\\')
}

fn write_escaped(f: &mut fmt::Formatter<'_>, raw: &str) -> fmt::Result {
    for c in raw.chars() {
        if needs_escape(c) {
            f.write_str("\\")?;
        }
        write!(f, "{c}")?;
    }
    Ok(())
}

fn split_unescaped(inner: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    for (i, c) in inner.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            ',' => {
                parts.push(&inner[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&inner[start..]);
    parts
}

/// `None` on a dangling or unknown escape.
fn unescape(raw: &str) -> Option<Cow<'_, str>> {
    if !raw.contains('\\') {
        return Some(Cow::Borrowed(raw));
    }
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            let next = chars.next().filter(|n| needs_escape(*n))?;
            out.push(next);
        } else {
            out.push(c);
        }
    }
    Some(Cow::Owned(out))
}

impl fmt::Display for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (k, v)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write_escaped(f, k)?;
            f.write_str(":")?;
            write_escaped(f, v)?;
        }
        f.write_str("}")
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn tagset_sorts_and_dedups_keys() {
        let set = TagSet::new(&[("status", "200"), ("endpoint", "chat"), ("status", "500")]);
        assert_eq!(set.len(), 2);
        assert_eq!(set.get("endpoint"), Some("chat"));
        assert_eq!(set.get("status"), Some("200"));
        assert_eq!(set.get("missing"), None);
    }

    #[test]
    fn series_key_matches_exported_format() {
        let set = TagSet::new(&[("endpoint", "create-session")]);
        assert_eq!(
            set.series_key("http_req_duration"),
            "http_req_duration{endpoint:create-session}"
        );
        assert_eq!(TagSet::default().series_key("http_reqs"), "http_reqs");
    }

    #[test]
    fn parse_series_key_splits_name_and_tags() {
        assert_eq!(
            TagSet::parse_series_key("http_req_duration{endpoint:chat}"),
            Some((
                "http_req_duration",
                vec![(Cow::Borrowed("endpoint"), Cow::Borrowed("chat"))]
            ))
        );
        assert_eq!(
            TagSet::parse_series_key("iterations"),
            Some(("iterations", vec![]))
        );
        assert_eq!(TagSet::parse_series_key("broken{endpoint"), None);
        assert_eq!(TagSet::parse_series_key("broken{endpoint}"), None);
    }

    #[test]
    fn tag_values_with_separators_round_trip() {
        for endpoint in ["/api/items,list", r"C:\tmp", "a,b:c}", "{x}"] {
            let key = TagSet::new(&[("endpoint", endpoint)]).series_key("http_reqs");
            let (name, tags) = TagSet::parse_series_key(&key).unwrap();
            assert_eq!(name, "http_reqs");
            assert_eq!(tags.len(), 1, "{key}");
            assert_eq!(tags[0].0, "endpoint");
            assert_eq!(tags[0].1, endpoint, "{key}");
        }
        assert_eq!(
            TagSet::new(&[("endpoint", "/api/items,list")]).series_key("http_reqs"),
            r"http_reqs{endpoint:/api/items\,list}"
        );
    }

    #[test]
    fn bad_escapes_are_rejected() {
        assert_eq!(TagSet::parse_series_key(r"m{endpoint:a\q}"), None);
        assert_eq!(TagSet::parse_series_key(r"m{endpoint:a\}"), None);
    }
}
