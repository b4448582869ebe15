//! Content sniffing for the escalation decision

use ego_tree::iter::Edge;
use scraper::{Html, Node};

/// Markup fragments left behind by client-side rendering frameworks
const SHELL_MARKERS: &[&str] = &[
    "id=\"root\"",
    "id=\"app\"",
    "id=\"__next\"",
    "id=\"__nuxt\"",
    "data-reactroot",
    "ng-version",
    "ng-app",
    "enable javascript",
];

/// Elements whose text is never visible
pub(crate) const HIDDEN_ELEMENTS: &[&str] = &["script", "style", "noscript", "template", "head"];

/// Decides whether a body should be treated as HTML
pub fn is_html(content_type: &str, body: &[u8]) -> bool {
    let content_type = content_type.to_ascii_lowercase();
    if content_type.contains("html") {
        return true;
    }
    if !content_type.is_empty() && !content_type.starts_with("application/octet-stream") {
        return false;
    }
    let head = &body[..body.len().min(512)];
    let head = String::from_utf8_lossy(head).to_ascii_lowercase();
    head.contains("<!doctype html") || head.contains("<html")
}

/// Counts non-whitespace characters of text a reader would see without scripts
pub fn static_text_chars(document: &Html) -> usize {
    let mut hidden_depth = 0usize;
    let mut count = 0usize;

    for edge in document.tree.root().traverse() {
        match edge {
            Edge::Open(node) => match node.value() {
                Node::Element(el) if HIDDEN_ELEMENTS.contains(&el.name()) => hidden_depth += 1,
                Node::Text(text) if hidden_depth == 0 => {
                    count += text.chars().filter(|c| !c.is_whitespace()).count();
                }
                _ => {}
            },
            Edge::Close(node) => {
                if let Node::Element(el) = node.value() {
                    if HIDDEN_ELEMENTS.contains(&el.name()) {
                        hidden_depth = hidden_depth.saturating_sub(1);
                    }
                }
            }
        }
    }

    count
}

/// Whether a lightweight response is a client-rendered shell worth rendering
///
/// True when the page has less static text than `min_static_text_chars` and
/// carries a framework mount point or scripts that would fill it in.
pub fn needs_rendering(content_type: &str, body: &[u8], min_static_text_chars: usize) -> bool {
    if !is_html(content_type, body) {
        return false;
    }

    let html = String::from_utf8_lossy(body);
    let document = Html::parse_document(&html);
    let static_chars = static_text_chars(&document);
    if static_chars >= min_static_text_chars {
        return false;
    }

    let lowered = html.to_ascii_lowercase();
    let has_marker = SHELL_MARKERS.iter().any(|marker| lowered.contains(marker));
    let has_scripts = lowered.contains("<script");

    has_marker || has_scripts
}
