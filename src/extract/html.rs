//! HTML to text with block boundaries
//!
//! One forward pass over `ego_tree` open/close edges. Skipped subtrees are
//! tracked with a depth counter instead of recursion, so nesting depth only
//! costs a counter increment.

use super::{non_whitespace_chars, BlockKind, ExtractionStrategy, TextBlock};
use crate::fetch::sniff::HIDDEN_ELEMENTS;
use ego_tree::iter::Edge;
use ego_tree::NodeRef;
use scraper::node::Element;
use scraper::{ElementRef, Html, Node, Selector};

/// Never rendered regardless of strategy
const NEVER_RENDERED: &[&str] = &["svg", "canvas", "iframe", "object", "button", "select", "input"];

/// Page furniture dropped by `Balanced` and `Precision`
const CHROME_ELEMENTS: &[&str] = &["nav", "footer", "aside", "form", "dialog"];

/// Additionally dropped by `Precision`
const PRECISION_ELEMENTS: &[&str] = &["header", "figure", "menu"];

/// `id`/`class` fragments marking boilerplate containers
const BOILERPLATE_HINTS: &[&str] = &[
    "nav",
    "menu",
    "sidebar",
    "footer",
    "comment",
    "cookie",
    "banner",
    "advert",
    "promo",
    "share",
    "social",
    "related",
    "breadcrumb",
    "subscribe",
    "popup",
    "modal",
];

/// Elements that are never treated as boilerplate containers
const STRUCTURAL_ROOTS: &[&str] = &["html", "body", "main", "article"];

pub(crate) struct Rendered {
    pub text: String,
    pub blocks: Vec<TextBlock>,
    /// Non-whitespace characters kept, excluding block markers
    pub kept_chars: usize,
}

/// Maximum element nesting depth
pub(crate) fn dom_depth(document: &Html) -> usize {
    let mut depth = 0usize;
    let mut max = 0usize;
    for edge in document.tree.root().traverse() {
        match edge {
            Edge::Open(node) if node.value().is_element() => {
                depth += 1;
                max = max.max(depth);
            }
            Edge::Close(node) if node.value().is_element() => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    max
}

/// Document title from `<title>`, falling back to the first `<h1>`
pub(crate) fn title(document: &Html) -> Option<String> {
    ["title", "h1"].iter().find_map(|tag| {
        let selector = Selector::parse(tag).ok()?;
        document
            .select(&selector)
            .next()
            .map(|element| collapse_whitespace(&element.text().collect::<String>()))
            .filter(|s| !s.is_empty())
    })
}

pub(crate) fn render(document: &Html, strategy: ExtractionStrategy) -> Rendered {
    let root = content_root(document, strategy);
    let mut builder = BlockBuilder::new(strategy);

    for edge in root.traverse() {
        match edge {
            Edge::Open(node) => match node.value() {
                Node::Element(el) => builder.open(el),
                Node::Text(text) => builder.text(text),
                _ => {}
            },
            Edge::Close(node) => {
                if let Node::Element(el) = node.value() {
                    builder.close(el);
                }
            }
        }
    }

    builder.finish()
}

/// Subtree holding the main content
///
/// `Recall` always takes the whole body. The other strategies prefer the
/// `<article>` with the most text, then `<main>`.
fn content_root(document: &Html, strategy: ExtractionStrategy) -> NodeRef<'_, Node> {
    if strategy != ExtractionStrategy::Recall {
        let article = Selector::parse("article").ok().and_then(|selector| {
            document
                .select(&selector)
                .max_by_key(|el| el.text().map(|t| t.trim().len()).sum::<usize>())
        });
        if let Some(root) = article.or_else(|| first_match(document, "main, [role=main]")) {
            return *root;
        }
    }

    first_match(document, "body")
        .map(|body| *body)
        .unwrap_or_else(|| document.tree.root())
}

fn first_match<'a>(document: &'a Html, css: &str) -> Option<ElementRef<'a>> {
    let selector = Selector::parse(css).ok()?;
    document.select(&selector).next()
}

fn block_kind(name: &str) -> Option<BlockKind> {
    let kind = match name {
        "h1" => BlockKind::Heading(1),
        "h2" => BlockKind::Heading(2),
        "h3" => BlockKind::Heading(3),
        "h4" => BlockKind::Heading(4),
        "h5" => BlockKind::Heading(5),
        "h6" => BlockKind::Heading(6),
        "li" | "dt" | "dd" => BlockKind::ListItem,
        "pre" => BlockKind::Preformatted,
        "blockquote" => BlockKind::Quote,
        "p" | "div" | "section" | "article" | "main" | "header" | "footer" | "ul" | "ol"
        | "dl" | "table" | "tr" | "td" | "th" | "caption" | "figcaption" | "address"
        | "details" | "summary" | "body" | "html" => BlockKind::Paragraph,
        _ => return None,
    };
    Some(kind)
}

struct BlockBuilder {
    strategy: ExtractionStrategy,
    out: String,
    blocks: Vec<TextBlock>,
    kept_chars: usize,
    current: String,
    pending_space: bool,
    link_chars: usize,
    kinds: Vec<BlockKind>,
    skip_depth: usize,
    pre_depth: usize,
    link_depth: usize,
}

impl BlockBuilder {
    fn new(strategy: ExtractionStrategy) -> Self {
        Self {
            strategy,
            out: String::new(),
            blocks: Vec::new(),
            kept_chars: 0,
            current: String::new(),
            pending_space: false,
            link_chars: 0,
            kinds: Vec::new(),
            skip_depth: 0,
            pre_depth: 0,
            link_depth: 0,
        }
    }

    fn should_skip(&self, el: &Element) -> bool {
        let name = el.name();
        if HIDDEN_ELEMENTS.contains(&name) || NEVER_RENDERED.contains(&name) {
            return true;
        }
        if el.attr("hidden").is_some() || el.attr("aria-hidden") == Some("true") {
            return true;
        }

        match self.strategy {
            ExtractionStrategy::Recall => false,
            ExtractionStrategy::Balanced => CHROME_ELEMENTS.contains(&name) || is_boilerplate(el),
            ExtractionStrategy::Precision => {
                CHROME_ELEMENTS.contains(&name)
                    || PRECISION_ELEMENTS.contains(&name)
                    || is_boilerplate(el)
            }
        }
    }

    fn open(&mut self, el: &Element) {
        // Every element opened inside a skipped subtree bumps the counter so
        // that its close can unwind it symmetrically.
        if self.skip_depth > 0 || self.should_skip(el) {
            self.skip_depth += 1;
            return;
        }

        match el.name() {
            "a" => self.link_depth += 1,
            "pre" => self.pre_depth += 1,
            "br" => {
                if self.pre_depth > 0 {
                    self.current.push('\n');
                } else {
                    self.pending_space = true;
                }
            }
            _ => {}
        }

        if let Some(kind) = block_kind(el.name()) {
            self.flush();
            self.kinds.push(kind);
        }
    }

    fn close(&mut self, el: &Element) {
        if self.skip_depth > 0 {
            self.skip_depth -= 1;
            return;
        }

        match el.name() {
            "a" => self.link_depth = self.link_depth.saturating_sub(1),
            "pre" => self.pre_depth = self.pre_depth.saturating_sub(1),
            _ => {}
        }

        if block_kind(el.name()).is_some() {
            self.flush();
            self.kinds.pop();
        }
    }

    fn text(&mut self, text: &str) {
        if self.skip_depth > 0 {
            return;
        }

        if self.pre_depth > 0 {
            self.current.push_str(text);
            if self.link_depth > 0 {
                self.link_chars += non_whitespace_chars(text);
            }
            return;
        }

        for c in text.chars() {
            if c.is_whitespace() {
                self.pending_space = true;
                continue;
            }
            if self.pending_space && !self.current.is_empty() {
                self.current.push(' ');
            }
            self.pending_space = false;
            self.current.push(c);
            if self.link_depth > 0 {
                self.link_chars += 1;
            }
        }
    }

    fn flush(&mut self) {
        let kind = self.kinds.last().copied().unwrap_or(BlockKind::Paragraph);
        let raw = std::mem::take(&mut self.current);
        let link_chars = std::mem::take(&mut self.link_chars);
        self.pending_space = false;

        let body = match kind {
            BlockKind::Preformatted => raw.trim_matches('\n').trim_end(),
            _ => raw.trim(),
        };
        if body.is_empty() {
            return;
        }

        let chars = non_whitespace_chars(body);
        // Link lists masquerading as paragraphs
        if self.strategy == ExtractionStrategy::Precision
            && matches!(kind, BlockKind::Paragraph | BlockKind::ListItem)
            && link_chars * 2 > chars
        {
            return;
        }

        if !self.out.is_empty() {
            self.out.push_str("\n\n");
        }
        let start = self.out.len();
        match kind {
            BlockKind::Heading(level) => {
                self.out.push_str(&"#".repeat(level as usize));
                self.out.push(' ');
            }
            BlockKind::ListItem => self.out.push_str("- "),
            BlockKind::Quote => self.out.push_str("> "),
            BlockKind::Paragraph | BlockKind::Preformatted => {}
        }
        self.out.push_str(body);

        self.blocks.push(TextBlock {
            kind,
            start,
            end: self.out.len(),
        });
        self.kept_chars += chars;
    }

    fn finish(mut self) -> Rendered {
        self.flush();
        Rendered {
            text: self.out,
            blocks: self.blocks,
            kept_chars: self.kept_chars,
        }
    }
}

fn is_boilerplate(el: &Element) -> bool {
    if STRUCTURAL_ROOTS.contains(&el.name()) {
        return false;
    }
    let mut markers = el.attr("id").unwrap_or_default().to_ascii_lowercase();
    for class in el.classes() {
        markers.push(' ');
        markers.push_str(&class.to_ascii_lowercase());
    }
    if markers.is_empty() {
        return false;
    }
    BOILERPLATE_HINTS.iter().any(|hint| markers.contains(hint))
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
