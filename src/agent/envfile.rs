// Copyright (c) 2025, Joe Drago <joedrago@gmail.com>
// SPDX-License-Identifier: BSD-2-Clause

//! Line-oriented edits of an agent's `KEY=value` credential file.

const EXPORT_PREFIX: &str = "export ";

/// One `KEY=value` line split into its parts
#[derive(Debug, Clone, PartialEq, Eq)]
struct Assignment<'a> {
    export: bool,
    key: &'a str,
    quote: Option<char>,
}

fn parse_assignment(line: &str) -> Option<(Assignment<'_>, &str)> {
    let trimmed = line.trim_start();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    let (export, rest) = match trimmed.strip_prefix(EXPORT_PREFIX) {
        Some(rest) => (true, rest.trim_start()),
        None => (false, trimmed),
    };
    let (key, raw) = rest.split_once('=')?;
    let key = key.trim();
    if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    let raw = raw.trim_end_matches(['\r', '\n']).trim();
    let quote = raw
        .chars()
        .next()
        .filter(|c| (*c == '"' || *c == '\'') && raw.len() >= 2 && raw.ends_with(*c));
    Some((Assignment { export, key, quote }, raw))
}

fn unquote(raw: &str) -> &str {
    raw.trim().trim_matches('"').trim_matches('\'')
}

/// Value of `key` in `KEY=value` text, with surrounding quotes removed.
/// The last assignment wins, as it would when the file is sourced.
pub fn lookup(content: &str, key: &str) -> Option<String> {
    content
        .lines()
        .filter_map(parse_assignment)
        .filter(|(a, _)| a.key == key)
        .map(|(_, raw)| unquote(raw).to_string())
        .last()
}

/// Rewrite `content` so each key in `updates` carries its new value.
///
/// Lines assigning a recognized key are replaced in place (keeping any `export`
/// prefix and quote style). Comments, blank lines and other keys are preserved
/// byte-for-byte. Recognized keys that never appeared are appended in the order
/// given.
pub fn patch_env(content: &str, updates: &[(&str, &str)]) -> String {
    let mut seen = vec![false; updates.len()];
    let mut out = String::with_capacity(content.len() + 64);

    for line in content.split_inclusive('\n') {
        let replacement = parse_assignment(line).and_then(|(assign, _)| {
            updates
                .iter()
                .position(|(k, _)| *k == assign.key)
                .map(|idx| (idx, assign))
        });

        match replacement {
            Some((idx, assign)) => {
                seen[idx] = true;
                let ending = if line.ends_with("\r\n") {
                    "\r\n"
                } else if line.ends_with('\n') {
                    "\n"
                } else {
                    ""
                };
                out.push_str(&render(&assign, updates[idx].1));
                out.push_str(ending);
            }
            None => out.push_str(line),
        }
    }

    let missing: Vec<usize> = (0..updates.len()).filter(|i| !seen[*i]).collect();
    if !missing.is_empty() && !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    for idx in missing {
        let (key, value) = updates[idx];
        out.push_str(&format!("{}={}\n", key, value));
    }

    out
}

fn render(assign: &Assignment<'_>, value: &str) -> String {
    let prefix = if assign.export { EXPORT_PREFIX } else { "" };
    match assign.quote {
        Some(q) => format!("{}{}={}{}{}", prefix, assign.key, q, value, q),
        None => format!("{}{}={}", prefix, assign.key, value),
    }
}
