//! HTML sanitization as an ordered pattern → replacement table.
//!
//! Rules run top to bottom; order matters (wrappers go before blank-line
//! collapsing, fences before everything else).

use once_cell::sync::Lazy;
use regex::Regex;

struct Rule {
    name: &'static str,
    pattern: Regex,
    replacement: &'static str,
}

fn rule(name: &'static str, pattern: &str, replacement: &'static str) -> Rule {
    Rule {
        name,
        pattern: Regex::new(pattern).expect("sanitize rule pattern is valid"),
        replacement,
    }
}

static RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    vec![
        rule("markdown_fence", r"(?m)^\s*```[a-zA-Z]*\s*$", ""),
        rule("doctype", r"(?i)<!doctype[^>]*>", ""),
        rule("head_block", r"(?is)<head\b[^>]*>.*?</head>", ""),
        rule("document_wrappers", r"(?i)</?(?:html|body)\b[^>]*>", ""),
        rule("script_block", r"(?is)<script\b[^>]*>.*?</script>", ""),
        rule("h1_heading", r"(?is)<h1\b[^>]*>.*?</h1>", ""),
        rule("empty_paragraph", r"(?i)<p>\s*(?:&nbsp;|\u{a0})?\s*</p>", ""),
        rule("page_builder_shortcode", r"\[/?(?:vc_|et_pb_|fusion_)[^\]]*\]", ""),
        rule("blank_lines", r"\n{3,}", "\n\n"),
    ]
});

/// Applies every rule in order and trims the result.
pub fn sanitize(html: &str) -> String {
    let mut out = html.to_string();
    for rule in RULES.iter() {
        let replaced = rule.pattern.replace_all(&out, rule.replacement);
        if let std::borrow::Cow::Owned(changed) = replaced {
            tracing::trace!(rule = rule.name, "sanitize rule applied");
            out = changed;
        }
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_fences_and_wrappers() {
        let raw = "```html\n<html><body><p>Hi</p></body></html>\n```";
        assert_eq!(sanitize(raw), "<p>Hi</p>");
    }

    #[test]
    fn test_removes_scripts_and_h1() {
        let raw = "<h1>Title</h1><p>a</p><script>alert(1)</script><p>b</p>";
        assert_eq!(sanitize(raw), "<p>a</p><p>b</p>");
    }

    #[test]
    fn test_drops_empty_paragraphs_and_shortcodes() {
        let raw = "<p> </p><p>&nbsp;</p>[vc_row][vc_column]<p>text</p>[/vc_column][/vc_row]";
        assert_eq!(sanitize(raw), "<p>text</p>");
    }

    #[test]
    fn test_collapses_blank_lines() {
        assert_eq!(sanitize("<p>a</p>\n\n\n\n<p>b</p>"), "<p>a</p>\n\n<p>b</p>");
    }

    #[test]
    fn test_leaves_placeholders_untouched() {
        let raw = "<p>a</p>%%PROTECTED_0%%<p>b</p>";
        assert_eq!(sanitize(raw), raw);
    }
}
