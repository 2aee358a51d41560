//! HTML → plain text with block-level line breaks preserved.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html};

const BLOCK_TAGS: &[&str] = &[
    "p", "div", "li", "tr", "h1", "h2", "h3", "h4", "h5", "h6", "table", "ul", "ol",
    "blockquote", "pre", "section", "article",
];

fn walk(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            out.push_str(text);
        } else if let Some(el) = ElementRef::wrap(child) {
            let tag = el.value().name();
            if tag == "br" {
                out.push('\n');
                continue;
            }
            if tag == "script" || tag == "style" {
                continue;
            }
            walk(el, out);
            if BLOCK_TAGS.contains(&tag) {
                out.push('\n');
            }
        }
    }
}

/// Convert an HTML fragment to plain text. Block elements become line breaks;
/// runs of spaces collapse; blank lines are dropped.
pub fn html_to_text(html: &str) -> String {
    static SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t\u{00a0}]+").unwrap());

    let fragment = Html::parse_fragment(html);
    let mut raw = String::new();
    walk(fragment.root_element(), &mut raw);

    raw.lines()
        .map(|line| SPACES.replace_all(line, " ").trim().to_string())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_elements_become_lines() {
        let text = html_to_text("<div><p>one</p><p>two  three</p><ul><li>a</li><li>b</li></ul></div>");
        assert_eq!(text, "one\ntwo three\na\nb");
    }

    #[test]
    fn scripts_are_dropped_and_br_breaks() {
        let text = html_to_text("<p>x<br>y</p><script>alert(1)</script>");
        assert_eq!(text, "x\ny");
    }

    #[test]
    fn inline_markup_keeps_one_line() {
        let text = html_to_text("<p>a <strong>b</strong> c</p>");
        assert_eq!(text, "a b c");
    }
}
