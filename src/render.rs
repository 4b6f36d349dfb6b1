//! text/gemini document renderer.
//!
//! Grounded in the teacher's `gemtext.rs` for the line-classification
//! control flow (preformatted toggle, link-line split-at-first-whitespace)
//! but retargeted per SPEC_FULL.md §4.5 at `av98.py`'s `_handle_gemtext`/
//! `_format_geminiitem` output shape: ANSI-decorated plain text and a
//! `[N] name` link index, not Markdown.

use crate::error::RenderError;
use crate::url::GeminiUrl;

const ANSI_RESET: &str = "\x1b[0m";
const ANSI_UNDERLINE: &str = "\x1b[4m";
const ANSI_BOLD: &str = "\x1b[1m";
const ANSI_BOLD_UNDERLINE: &str = "\x1b[1m\x1b[4m";

/// One entry of the ordered link index built while rendering a page —
/// the session's navigation lookup table, 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkItem {
    pub index: usize,
    pub url: GeminiUrl,
    pub display: String,
}

/// A rendered page: the text stream to show and the link index extracted
/// while rendering it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPage {
    pub text: String,
    pub links: Vec<LinkItem>,
}

/// Render a text/gemini body against `base`, the URL it was fetched from
/// (used to absolutize relative link targets). Malformed link lines are
/// the one deliberate skip named in SPEC_FULL.md §7: logged at debug
/// level and otherwise ignored, never surfaced as an error.
pub fn render(body: &str, base: &GeminiUrl, width: usize) -> Result<RenderedPage, RenderError> {
    let mut out = Vec::new();
    let mut links = Vec::new();
    let mut preformatted = false;

    for line in body.lines() {
        if line.starts_with("```") {
            preformatted = !preformatted;
            continue;
        }
        if preformatted {
            out.push(line.to_string());
            continue;
        }
        if let Some(rest) = line.strip_prefix("=>") {
            let rest = rest.trim_start();
            if rest.is_empty() {
                continue;
            }
            match render_link(rest, base, links.len() + 1) {
                Some((item, rendered)) => {
                    out.push(rendered);
                    links.push(item);
                }
                None => {
                    log::debug!("render: skipping malformed link line: {line:?}");
                }
            }
            continue;
        }
        if let Some(rest) = line.strip_prefix("###") {
            out.push(format!("{ANSI_UNDERLINE}{}{ANSI_RESET}", rest.trim()));
            continue;
        }
        if let Some(rest) = line.strip_prefix("##") {
            out.push(format!("{ANSI_BOLD}{}{ANSI_RESET}", rest.trim()));
            continue;
        }
        if let Some(rest) = line.strip_prefix('#') {
            out.push(format!("{ANSI_BOLD_UNDERLINE}{}{ANSI_RESET}", rest.trim()));
            continue;
        }
        if let Some(rest) = line.strip_prefix("* ") {
            out.push(wrap_with_indent(rest, "* ", "  ", width));
            continue;
        }
        if let Some(rest) = line.strip_prefix('>') {
            out.push(wrap_with_indent(rest.trim_start(), "> ", "> ", width));
            continue;
        }
        out.push(wrap_with_indent(line, "", "", width));
    }

    Ok(RenderedPage {
        text: out.join("\n"),
        links,
    })
}

/// Split a link line's remainder (after `=>`, already trimmed of leading
/// whitespace) into URL and optional display name at the first run of
/// whitespace, absolutize the URL against `base`, and render the
/// `[N] name_or_url` line — prefixed with the scheme in brackets when
/// it isn't `gemini`.
fn render_link(rest: &str, base: &GeminiUrl, index: usize) -> Option<(LinkItem, String)> {
    let mut parts = rest.splitn(2, char::is_whitespace);
    let raw_url = parts.next()?.trim();
    if raw_url.is_empty() {
        return None;
    }
    let name = parts.next().map(str::trim).filter(|s| !s.is_empty());

    let absolutized = base.absolutize(raw_url).ok()?;
    let display = name.map(str::to_string).unwrap_or_else(|| absolutized.as_str());
    let item = LinkItem {
        index,
        url: absolutized.clone(),
        display: display.clone(),
    };

    let rendered = if absolutized.scheme() != "gemini" {
        format!("[{index}] [{}] {display}", absolutized.scheme())
    } else {
        format!("[{index}] {display}")
    };
    Some((item, rendered))
}

/// Word-wrap `text` to `width` columns, prefixing the first line with
/// `first_prefix` and continuation lines with `cont_prefix` — the
/// hand-rolled equivalent of `av98.py`'s `textwrap.fill` usage for
/// bullets and quote blocks (no external wrap crate in the teacher's
/// stack to reuse here).
fn wrap_with_indent(text: &str, first_prefix: &str, cont_prefix: &str, width: usize) -> String {
    if width == 0 || text.is_empty() {
        return format!("{first_prefix}{text}");
    }
    let avail = width.saturating_sub(cont_prefix.len()).max(1);
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if current.is_empty() {
            current.push_str(word);
        } else if current.len() + 1 + word.len() <= avail {
            current.push(' ');
            current.push_str(word);
        } else {
            lines.push(std::mem::take(&mut current));
            current.push_str(word);
        }
    }
    if !current.is_empty() || lines.is_empty() {
        lines.push(current);
    }
    lines
        .into_iter()
        .enumerate()
        .map(|(i, line)| {
            if i == 0 {
                format!("{first_prefix}{line}")
            } else {
                format!("{cont_prefix}{line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
