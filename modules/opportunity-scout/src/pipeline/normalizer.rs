use std::sync::LazyLock;

use regex::Regex;

use opportunity_common::CandidateItem;

static IMAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!\[([^\]]*)\]\([^)]*\)").expect("valid regex"));
static LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]*)\]\([^)]*\)").expect("valid regex"));
static HTML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"</?[A-Za-z][^<>]*>").expect("valid regex"));
static HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*#{1,6}[ \t]*").expect("valid regex"));
static QUOTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*>+[ \t]?").expect("valid regex"));
static EMPHASIS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*|__|~~|`+|\^").expect("valid regex"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Pure per-item text cleanup: markup out, bounded length, preview.
#[derive(Debug, Clone)]
pub struct TextNormalizer {
    max_chars: usize,
    snippet_chars: usize,
}

impl Default for TextNormalizer {
    fn default() -> Self {
        Self::new(2000, 280)
    }
}

impl TextNormalizer {
    pub fn new(max_chars: usize, snippet_chars: usize) -> Self {
        Self {
            max_chars: max_chars.max(1),
            snippet_chars,
        }
    }

    /// Strip then truncate. Applying it to its own output is a no-op.
    pub fn normalize_text(&self, raw: &str) -> String {
        truncate_words(&strip_markup(raw), self.max_chars)
    }

    pub fn snippet(&self, body: &str) -> String {
        truncate_words(&strip_markup(body), self.snippet_chars)
    }

    pub fn normalize(&self, mut item: CandidateItem) -> CandidateItem {
        let combined = if item.body.trim().is_empty() {
            item.title.clone()
        } else {
            format!("{}\n\n{}", item.title, item.body)
        };
        item.text = self.normalize_text(&combined);
        item.snippet = self.snippet(&item.body);
        item
    }

    pub fn normalize_all(&self, items: Vec<CandidateItem>) -> Vec<CandidateItem> {
        items.into_iter().map(|item| self.normalize(item)).collect()
    }
}

fn strip_once(text: &str) -> String {
    let text = IMAGE.replace_all(text, "$1");
    let text = LINK.replace_all(&text, "$1");
    let text = HTML_TAG.replace_all(&text, " ");
    let text = HEADING.replace_all(&text, "");
    let text = QUOTE.replace_all(&text, "");
    let text = EMPHASIS.replace_all(&text, "");
    WHITESPACE.replace_all(&text, " ").trim().to_string()
}

/// Remove Markdown/HTML artifacts and collapse whitespace. Repeats until
/// nothing changes so nested constructs like `<b<i>>` are fully removed.
pub fn strip_markup(text: &str) -> String {
    let mut current = strip_once(text);
    loop {
        let next = strip_once(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

/// Cut to at most `max_chars` characters, backing off to the last space
/// when that keeps at least half the budget.
pub fn truncate_words(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut = text
        .char_indices()
        .nth(max_chars)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    let head = &text[..cut];
    let head = match head.rfind(char::is_whitespace) {
        Some(space) if head[..space].chars().count() >= max_chars / 2 => &head[..space],
        _ => head,
    };
    head.trim_end().to_string()
}
