//! Snippet markup preparation
//!
//! Markup inserted as text leaves its script fragments inert. Before
//! insertion the fragments are lifted out so the surface can re-create them
//! as live nodes, and every link gets the sampling parameters appended.

use tracing::trace;

/// Markup ready for insertion plus the fragments to activate afterwards
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedContent {
    pub markup: String,
    /// Script bodies in document order
    pub scripts: Vec<String>,
}

/// Strip script fragments and decorate links in one pass
pub fn prepare(markup: &str, link_params: &str) -> PreparedContent {
    let (without_scripts, scripts) = extract_scripts(markup);
    PreparedContent {
        markup: decorate_links(&without_scripts, link_params),
        scripts,
    }
}

/// Query string appended to every snippet link
pub fn link_parameters(sample_rate: f64, snippet_id: i64) -> String {
    format!("sample_rate={}&snippet_name={}", sample_rate, snippet_id)
}

/// Append `params` to the query of `href`, keeping any `#fragment` last
pub fn decorate_href(href: &str, params: &str) -> String {
    let (base, fragment) = match href.find('#') {
        Some(pos) => href.split_at(pos),
        None => (href, ""),
    };
    let delimiter = if base.contains('?') { '&' } else { '?' };
    format!("{}{}{}{}", base, delimiter, params, fragment)
}

/// Remove `<script>` elements, returning the remaining markup and their bodies
///
/// An unterminated script element is left in place.
pub fn extract_scripts(markup: &str) -> (String, Vec<String>) {
    let lower = markup.to_ascii_lowercase();
    let mut output = String::with_capacity(markup.len());
    let mut scripts = Vec::new();
    let mut cursor = 0;

    while let Some(found) = lower[cursor..].find("<script") {
        let open_start = cursor + found;
        let Some(open_end) = tag_end(markup, open_start) else {
            break;
        };
        let Some(close_rel) = lower[open_end..].find("</script") else {
            break;
        };
        let close_start = open_end + close_rel;
        let Some(close_end) = tag_end(markup, close_start) else {
            break;
        };

        output.push_str(&markup[cursor..open_start]);
        scripts.push(markup[open_end..close_start].to_string());
        cursor = close_end;
    }
    output.push_str(&markup[cursor..]);

    trace!(count = scripts.len(), "Script fragments extracted");
    (output, scripts)
}

/// Rewrite the `href` of every anchor tag
pub fn decorate_links(markup: &str, params: &str) -> String {
    let lower = markup.to_ascii_lowercase();
    let mut output = String::with_capacity(markup.len() + 64);
    let mut cursor = 0;

    while let Some(found) = find_anchor(&lower, cursor) {
        let Some(end) = tag_end(markup, found) else {
            break;
        };
        let tag = &markup[found..end];
        output.push_str(&markup[cursor..found]);
        match attribute_value_range(tag, "href") {
            Some((start, stop)) => {
                output.push_str(&tag[..start]);
                output.push_str(&decorate_href(&tag[start..stop], params));
                output.push_str(&tag[stop..]);
            }
            None => output.push_str(tag),
        }
        cursor = end;
    }
    output.push_str(&markup[cursor..]);
    output
}

/// Next `<a` that opens an anchor element (not `<abbr`, `<aside`, ...)
fn find_anchor(lower: &str, from: usize) -> Option<usize> {
    let mut search = from;
    while let Some(rel) = lower[search..].find("<a") {
        let pos = search + rel;
        match lower[pos + 2..].chars().next() {
            Some(c) if c.is_ascii_whitespace() || c == '>' => return Some(pos),
            Some(_) => search = pos + 2,
            None => return None,
        }
    }
    None
}

/// Byte index just past the `>` closing the tag that starts at `start`,
/// skipping quoted attribute values
fn tag_end(markup: &str, start: usize) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (offset, c) in markup[start..].char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"') | (None, '\'') => quote = Some(c),
            (None, '>') => return Some(start + offset + 1),
            (None, _) => {}
        }
    }
    None
}

/// Byte range of an attribute's value inside a single tag
fn attribute_value_range(tag: &str, name: &str) -> Option<(usize, usize)> {
    let lower = tag.to_ascii_lowercase();
    let mut search = 0;
    while let Some(rel) = lower[search..].find(name) {
        let pos = search + rel;
        search = pos + name.len();

        let preceded_by_space = lower[..pos]
            .chars()
            .next_back()
            .map_or(false, |c| c.is_ascii_whitespace());
        if !preceded_by_space {
            continue;
        }

        let rest = &tag[search..];
        let after_name = rest.trim_start();
        let Some(after_eq) = after_name.strip_prefix('=') else {
            continue;
        };
        let value = after_eq.trim_start();
        let value_offset = tag.len() - value.len();

        return match value.chars().next() {
            Some(q @ ('"' | '\'')) => {
                let start = value_offset + 1;
                let len = tag[start..].find(q)?;
                Some((start, start + len))
            }
            Some(_) => {
                let len = value
                    .find(|c: char| c.is_ascii_whitespace() || c == '>')
                    .unwrap_or(value.len());
                Some((value_offset, value_offset + len))
            }
            None => None,
        };
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decorate_href_variants() {
        let params = "sample_rate=0.1&snippet_name=42";
        assert_eq!(
            decorate_href("https://example.com/page", params),
            "https://example.com/page?sample_rate=0.1&snippet_name=42"
        );
        assert_eq!(
            decorate_href("https://example.com/page?a=1", params),
            "https://example.com/page?a=1&sample_rate=0.1&snippet_name=42"
        );
        assert_eq!(
            decorate_href("https://example.com/page?a=1#top", params),
            "https://example.com/page?a=1&sample_rate=0.1&snippet_name=42#top"
        );
    }

    #[test]
    fn test_link_parameters() {
        assert_eq!(link_parameters(0.1, 42), "sample_rate=0.1&snippet_name=42");
        assert_eq!(link_parameters(1.0, 7), "sample_rate=1&snippet_name=7");
    }

    #[test]
    fn test_extract_scripts() {
        let markup = r#"<div class="snippet"><p>Hi</p><SCRIPT type="text/javascript">go(1 > 0);</SCRIPT><script>b()</script></div>"#;
        let (rest, scripts) = extract_scripts(markup);
        assert_eq!(rest, r#"<div class="snippet"><p>Hi</p></div>"#);
        assert_eq!(scripts, vec!["go(1 > 0);", "b()"]);
    }

    #[test]
    fn test_unterminated_script_left_alone() {
        let markup = "<p>a</p><script>never closed";
        let (rest, scripts) = extract_scripts(markup);
        assert_eq!(rest, markup);
        assert!(scripts.is_empty());
    }

    #[test]
    fn test_decorate_links_rewrites_anchor_hrefs_only() {
        let markup = concat!(
            r#"<abbr href="x">A</abbr>"#,
            r#"<a class="cta" href="https://example.com/#f">Go</a>"#,
            r#"<A HREF='about:accounts?action=signup'>Sign</A>"#,
            r#"<a data-href="nope" title="t">plain</a>"#,
        );
        let decorated = decorate_links(markup, "s=1");
        assert_eq!(
            decorated,
            concat!(
                r#"<abbr href="x">A</abbr>"#,
                r#"<a class="cta" href="https://example.com/?s=1#f">Go</a>"#,
                r#"<A HREF='about:accounts?action=signup&s=1'>Sign</A>"#,
                r#"<a data-href="nope" title="t">plain</a>"#,
            )
        );
    }

    #[test]
    fn test_unquoted_href() {
        let decorated = decorate_links("<a href=/path>x</a>", "s=1");
        assert_eq!(decorated, "<a href=/path?s=1>x</a>");
    }

    #[test]
    fn test_prepare_combines_both() {
        let prepared = prepare(
            r#"<a href="https://e.com">x</a><script>init()</script>"#,
            "s=1",
        );
        assert_eq!(prepared.markup, r#"<a href="https://e.com?s=1">x</a>"#);
        assert_eq!(prepared.scripts, vec!["init()"]);
    }
}
