//! Attribute-list helpers for raw playlist tag lines (`#EXT-X-KEY:METHOD=...,URI="..."`).

/// Splits an attribute list on commas that are not inside quotes.
///
/// Returns raw `(key, value)` pairs; quoted values keep their quotes.
pub(crate) fn split_attributes(rest: &str) -> Vec<(&str, &str)> {
    let mut parts: Vec<&str> = Vec::new();
    let mut in_quotes = false;
    let mut start = 0usize;
    for (idx, ch) in rest.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(rest[start..idx].trim());
                start = idx + 1;
            }
            _ => {}
        }
    }
    if start < rest.len() {
        parts.push(rest[start..].trim());
    }

    parts
        .into_iter()
        .filter(|p| !p.is_empty())
        .filter_map(|part| {
            let (k, v) = part.split_once('=')?;
            Some((k.trim(), v.trim()))
        })
        .collect()
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(value)
}

/// Splits `#TAG:ATTRS` into `("#TAG", "ATTRS")`.
fn split_tag(line: &str) -> Option<(&str, &str)> {
    line.split_once(':')
}

/// Returns the unquoted value of `key` on a tag line.
pub(crate) fn attribute<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let (_, rest) = split_tag(line)?;
    split_attributes(rest)
        .into_iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| unquote(v))
}

/// Rebuilds a tag line with its `URI` attribute replaced, keeping every other
/// attribute and their order untouched.
pub(crate) fn replace_uri(line: &str, uri: &str) -> Option<String> {
    let (tag, rest) = split_tag(line)?;
    let attributes = split_attributes(rest);
    if !attributes.iter().any(|(k, _)| k.eq_ignore_ascii_case("URI")) {
        return None;
    }

    let rebuilt: Vec<String> = attributes
        .into_iter()
        .map(|(k, v)| {
            if k.eq_ignore_ascii_case("URI") {
                format!("{k}=\"{uri}\"")
            } else {
                format!("{k}={v}")
            }
        })
        .collect();
    Some(format!("{tag}:{}", rebuilt.join(",")))
}

/// Rebuilds a tag line without the `key` attribute.
pub(crate) fn remove_attribute(line: &str, key: &str) -> String {
    let Some((tag, rest)) = split_tag(line) else {
        return line.to_owned();
    };
    let kept: Vec<String> = split_attributes(rest)
        .into_iter()
        .filter(|(k, _)| !k.eq_ignore_ascii_case(key))
        .map(|(k, v)| format!("{k}={v}"))
        .collect();
    format!("{tag}:{}", kept.join(","))
}
