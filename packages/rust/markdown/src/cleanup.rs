//! Cleanup passes run over converted Markdown before it reaches the model.
//!
//! Each pass is a function `&str -> String` applied in sequence. The goal is
//! dense readable text: images, stray tags and site chrome cost tokens and
//! carry no facts.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

/// Run the full cleanup pipeline on raw Markdown text.
pub(crate) fn run_pipeline(md: &str, base_url: Option<&Url>) -> String {
    let mut result = strip_images(md);

    result = strip_html_tags(&result);
    result = resolve_links(&result, base_url);
    result = drop_boilerplate_lines(&result);
    result = trim_line_ends(&result);
    result = collapse_blank_lines(&result);

    result.trim().to_string()
}

// ---------------------------------------------------------------------------
// Pass 1: Images
// ---------------------------------------------------------------------------

/// Remove Markdown images, including linked images (`[![alt](src)](href)`).
fn strip_images(md: &str) -> String {
    static LINKED_IMG_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"\[!\[[^\]]*\]\([^)]*\)\]\([^)]*\)").expect("valid regex")
    });
    static IMG_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"!\[[^\]]*\]\([^)]*\)").expect("valid regex"));

    let without_linked = LINKED_IMG_RE.replace_all(md, "");
    IMG_RE.replace_all(&without_linked, "").into_owned()
}

// ---------------------------------------------------------------------------
// Pass 2: Leftover tags
// ---------------------------------------------------------------------------

/// Remove any HTML tag that survived conversion, keeping its text.
///
/// Lines inside fenced code blocks are left alone.
fn strip_html_tags(md: &str) -> String {
    static TAG_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"</?[a-zA-Z][a-zA-Z0-9-]*(?:\s[^<>]*)?/?>").expect("valid regex"));

    let mut in_fence = false;
    md.lines()
        .map(|line| {
            if line.trim_start().starts_with("```") {
                in_fence = !in_fence;
                return line.to_string();
            }
            if in_fence {
                line.to_string()
            } else {
                TAG_RE.replace_all(line, "").into_owned()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Pass 3: Links
// ---------------------------------------------------------------------------

/// Make relative link targets absolute so citations stay usable.
fn resolve_links(md: &str, base_url: Option<&Url>) -> String {
    let Some(base) = base_url else {
        return md.to_string();
    };

    static LINK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\[([^\]]*)\]\(([^)\s]+)\)").expect("valid regex"));

    LINK_RE
        .replace_all(md, |caps: &regex::Captures| {
            let text = &caps[1];
            let href = &caps[2];

            if href.starts_with('#') {
                // in-page anchors mean nothing outside the page
                return text.to_string();
            }
            if Url::parse(href).is_ok() {
                return format!("[{text}]({href})");
            }
            match base.join(href) {
                Ok(resolved) => format!("[{text}]({resolved})"),
                Err(_) => text.to_string(),
            }
        })
        .into_owned()
}

// ---------------------------------------------------------------------------
// Pass 4: Site chrome
// ---------------------------------------------------------------------------

/// Drop short lines that are navigation or consent chrome, not content.
fn drop_boilerplate_lines(md: &str) -> String {
    static CHROME_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(
            r"(?i)^\s*(skip to (main )?content|accept( all)? cookies|we use cookies.*|share (on|this).*|sign in|log in|subscribe( now)?|advertisement|back to top)\s*$",
        )
        .expect("valid regex")
    });

    md.lines()
        .filter(|line| !CHROME_RE.is_match(line))
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Pass 5: Whitespace
// ---------------------------------------------------------------------------

fn trim_line_ends(md: &str) -> String {
    md.lines().map(str::trim_end).collect::<Vec<_>>().join("\n")
}

/// Collapse runs of blank lines into a single blank line.
fn collapse_blank_lines(md: &str) -> String {
    static BLANK_RUN_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

    BLANK_RUN_RE.replace_all(md, "\n\n").into_owned()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_images_removes_plain_and_linked() {
        let input = "Intro ![chart](/c.png) text\n[![logo](/l.svg)](https://x.org) after";
        let result = strip_images(input);
        assert_eq!(result, "Intro  text\n after");
    }

    #[test]
    fn strip_html_tags_keeps_text() {
        let result = strip_html_tags("<span class=\"x\">Capacity</span> grew <sup>2</sup>");
        assert_eq!(result, "Capacity grew 2");
    }

    #[test]
    fn strip_html_tags_leaves_code_fences() {
        let input = "```html\n<div>kept</div>\n```\n<div>gone</div>";
        let result = strip_html_tags(input);
        assert!(result.contains("<div>kept</div>"));
        assert!(result.ends_with("gone"));
    }

    #[test]
    fn resolve_links_makes_relative_absolute() {
        let base = Url::parse("https://energy.example.org/reports/2024").unwrap();
        let result = resolve_links("[PDF](/files/report.pdf)", Some(&base));
        assert_eq!(result, "[PDF](https://energy.example.org/files/report.pdf)");
    }

    #[test]
    fn resolve_links_flattens_anchors() {
        let base = Url::parse("https://example.org/page").unwrap();
        let result = resolve_links("see [methods](#methods)", Some(&base));
        assert_eq!(result, "see methods");
    }

    #[test]
    fn resolve_links_leaves_absolute() {
        let base = Url::parse("https://example.org/").unwrap();
        let input = "[mail](mailto:a@b.org) [web](https://other.org/x)";
        assert_eq!(resolve_links(input, Some(&base)), input);
    }

    #[test]
    fn drop_boilerplate_lines_removes_chrome_only() {
        let input = "Skip to content\nPumped hydro stores 90% of grid energy.\nAccept all cookies\nShare this article";
        let result = drop_boilerplate_lines(input);
        assert_eq!(result, "Pumped hydro stores 90% of grid energy.");
    }

    #[test]
    fn collapse_blank_lines_leaves_one_blank() {
        assert_eq!(collapse_blank_lines("a\n\n\n\n\nb"), "a\n\nb");
        assert_eq!(collapse_blank_lines("a\n\nb"), "a\n\nb");
    }

    #[test]
    fn full_pipeline_produces_trimmed_text() {
        let base = Url::parse("https://example.org/a/").unwrap();
        let input = "\n\n# Title   \n\n\n\n![x](y.png)\n<div>Body with [link](b)</div>\nSign in\n\n";
        let result = run_pipeline(input, Some(&base));
        assert_eq!(result, "# Title\n\nBody with [link](https://example.org/a/b)");
    }
}
