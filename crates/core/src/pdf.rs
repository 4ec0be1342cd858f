use once_cell::sync::Lazy;
use regex::Regex;

use crate::document::Document;
use crate::error::{Result, ReviewError};

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));
static DISALLOWED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[^\w\s,.!?'"()\-:;]"#).expect("punctuation regex"));

/// Extracts one text entry per PDF page and builds a [`Document`] from them.
pub fn parse_pdf(name: &str, bytes: &[u8]) -> Result<Document> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes).map_err(|e| ReviewError::Pdf {
        name: name.to_string(),
        reason: e.to_string(),
    })?;
    tracing::debug!(document = name, pages = pages.len(), "extracted pdf text");
    Document::from_pages(pages.iter().map(|page| clean_text(page)))
}

/// Collapses whitespace runs and drops characters other than word
/// characters, whitespace and basic punctuation.
pub fn clean_text(text: &str) -> String {
    let collapsed = WHITESPACE_RE.replace_all(text, " ");
    DISALLOWED_RE
        .replace_all(collapsed.trim(), "")
        .into_owned()
}
