//! String-level helpers over a section's inner markup.
//!
//! The merge never re-serializes the document: it splices fragments into the
//! original markup, so everything it did not touch stays byte-identical.
//! `scraper` is only used to read plain text.

use std::ops::Range;

use regex::Regex;
use scraper::Html;

/// Plain text of a markup fragment: text nodes concatenated, whitespace
/// collapsed within each line, blank lines dropped.
pub fn plain_text(markup: &str) -> String {
    let fragment = Html::parse_fragment(markup);
    let raw: String = fragment.root_element().text().collect();
    raw.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// The whitespace before the first child element, or `""` when the markup
/// starts with text or a tag.
pub fn leading_whitespace(markup: &str) -> &str {
    let head = markup.find('<').map_or(markup, |i| &markup[..i]);
    if head.trim().is_empty() { head } else { "" }
}

/// Whether byte `pos` falls inside a tag (between `<` and its `>`).
fn inside_tag(markup: &str, pos: usize) -> bool {
    let before = &markup[..pos];
    match (before.rfind('<'), before.rfind('>')) {
        (Some(open), Some(close)) => open > close,
        (Some(_), None) => true,
        _ => false,
    }
}

fn is_entity_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '#'
}

/// Whether byte `pos` falls strictly inside an entity reference such as `&amp;`.
fn inside_entity(markup: &str, pos: usize) -> bool {
    let before = &markup[..pos];
    let Some(amp) = before.rfind('&') else {
        return false;
    };
    if !before[amp + 1..].chars().all(is_entity_char) {
        return false;
    }
    let rest = &markup[pos..];
    let name_end = rest.find(|c: char| !is_entity_char(c)).unwrap_or(rest.len());
    rest[name_end..].starts_with(';')
}

fn inside_markup(markup: &str, pos: usize) -> bool {
    inside_tag(markup, pos) || inside_entity(markup, pos)
}

/// First occurrence of `needle` that starts and ends in text content.
///
/// Occurrences inside tag names, attribute values or entity references are
/// passed over, so an anchor like `note` never lands in `class="noteref"` and
/// `Tom &` never splits `&amp;`.
pub fn find_in_text(markup: &str, needle: &str) -> Option<usize> {
    if needle.is_empty() {
        return None;
    }
    markup
        .match_indices(needle)
        .map(|(pos, _)| pos)
        .find(|&pos| !inside_markup(markup, pos) && !inside_markup(markup, pos + needle.len()))
}

/// Byte spans of every `<tag>` element in document order, nested ones included.
///
/// Each span runs from the start tag's `<` to the end of its closing tag (or
/// of the start tag itself when self-closing). Unclosed elements are ignored.
pub fn element_spans(markup: &str, tag: &str) -> Vec<Range<usize>> {
    let pattern = format!(r"<(/?){}(?:\s[^>]*?)?(/?)>", regex::escape(tag));
    let Ok(re) = Regex::new(&pattern) else {
        return Vec::new();
    };

    let mut open: Vec<usize> = Vec::new();
    let mut spans = Vec::new();
    for caps in re.captures_iter(markup) {
        let Some(whole) = caps.get(0) else { continue };
        let closing = caps.get(1).is_some_and(|m| !m.as_str().is_empty());
        let self_closing = caps.get(2).is_some_and(|m| !m.as_str().is_empty());
        if closing {
            if let Some(start) = open.pop() {
                spans.push(start..whole.end());
            }
        } else if self_closing {
            spans.push(whole.start()..whole.end());
        } else {
            open.push(whole.start());
        }
    }
    spans.sort_by_key(|span| span.start);
    spans
}

/// Insert `fragment` at byte `pos`.
pub fn insert_at(markup: &mut String, pos: usize, fragment: &str) {
    markup.insert_str(pos, fragment);
}
