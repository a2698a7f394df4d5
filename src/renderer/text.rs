//! Plain-text PDF fallback.
//!
//! Used when no chromium instance is available or a high-fidelity render
//! fails. Tags are stripped from the HTML and the remaining text is laid
//! out on A4 pages with a builtin font, so the result is ugly but the
//! reference is never lost.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use printpdf::{BuiltinFont, Mm, PdfDocument};
use regex::Regex;

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").expect("Invalid tag regex"));

/// Upper bound on extracted text; a fallback PDF is a stub, not an archive.
const MAX_TEXT_CHARS: usize = 4000;

const PAGE_WIDTH_MM: f32 = 210.0;
const PAGE_HEIGHT_MM: f32 = 297.0;
const MARGIN_VERTICAL_MM: f32 = 10.0;
const MARGIN_HORIZONTAL_MM: f32 = 12.0;
const FONT_SIZE_PT: f32 = 11.0;
const LINE_HEIGHT_MM: f32 = 6.0;
const CHARS_PER_LINE: usize = 90;

/// Render `html` as a text-only PDF document.
///
/// Accepts any input, including malformed HTML and empty strings. The
/// output always carries the `%PDF` signature.
///
/// # Errors
///
/// Returns an error only if PDF serialization itself fails.
pub fn render_text_pdf(html: &str) -> Result<Vec<u8>> {
    let text = extract_text(html);
    let lines = wrap_lines(&text);

    let (doc, first_page, first_layer) = PdfDocument::new(
        "Archived reference",
        Mm(PAGE_WIDTH_MM),
        Mm(PAGE_HEIGHT_MM),
        "Layer 1",
    );
    let font = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .context("Failed to add builtin font")?;

    let lines_per_page =
        ((PAGE_HEIGHT_MM - 2.0 * MARGIN_VERTICAL_MM) / LINE_HEIGHT_MM).floor() as usize;
    let top_y = PAGE_HEIGHT_MM - MARGIN_VERTICAL_MM - LINE_HEIGHT_MM;

    let mut layer = doc.get_page(first_page).get_layer(first_layer);
    for (i, line) in lines.iter().enumerate() {
        let slot = i % lines_per_page;
        if i > 0 && slot == 0 {
            let (page, layer_index) =
                doc.add_page(Mm(PAGE_WIDTH_MM), Mm(PAGE_HEIGHT_MM), "Layer 1");
            layer = doc.get_page(page).get_layer(layer_index);
        }
        let y = top_y - slot as f32 * LINE_HEIGHT_MM;
        layer.use_text(
            line.clone(),
            FONT_SIZE_PT,
            Mm(MARGIN_HORIZONTAL_MM),
            Mm(y),
            &font,
        );
    }

    doc.save_to_bytes().context("Failed to serialize PDF")
}

/// Strip tags and normalize the text down to what the builtin font can
/// encode.
fn extract_text(html: &str) -> String {
    let stripped = TAG_RE.replace_all(html, " ");
    let mut text: String = stripped
        .chars()
        .map(|c| {
            if c == '\n' || c == '\t' {
                ' '
            } else if c.is_ascii_graphic() || c == ' ' {
                c
            } else {
                // Builtin PDF fonts only cover WinAnsi.
                '?'
            }
        })
        .collect();

    if text.chars().all(|c| c == ' ' || c == '?') {
        text = "(no text content)".to_string();
    }
    text.chars().take(MAX_TEXT_CHARS).collect()
}

fn wrap_lines(text: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        if current.is_empty() {
            current = word.to_string();
        } else if current.len() + 1 + word.len() <= CHARS_PER_LINE {
            current.push(' ');
            current.push_str(word);
        } else {
            lines.push(std::mem::take(&mut current));
            current = word.to_string();
        }
        // Break words longer than a full line.
        while current.len() > CHARS_PER_LINE {
            let rest = current.split_off(CHARS_PER_LINE);
            lines.push(std::mem::replace(&mut current, rest));
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    if lines.is_empty() {
        lines.push("(no text content)".to_string());
    }
    lines
}
