use std::collections::BTreeMap;
use std::convert::TryFrom;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ReviewError};
use crate::tokenizer::Tokenizer;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub text: String,
    pub num_tokens: usize,
}

#[derive(Debug, Deserialize)]
pub struct PageInput {
    pub text: String,
}

/// Extracted document text keyed by 1-based page number. Token counts are
/// always computed here, including when a document is deserialized.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<u32, PageInput>",
    into = "BTreeMap<u32, Page>"
)]
pub struct Document {
    pages: BTreeMap<u32, Page>,
}

impl Document {
    pub fn from_pages<I, S>(pages: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tokenizer = Tokenizer::cl100k()?;
        let pages = pages
            .into_iter()
            .enumerate()
            .map(|(idx, text)| {
                let text = text.into();
                let num_tokens = tokenizer.count(&text);
                (idx as u32 + 1, Page { text, num_tokens })
            })
            .collect();
        Ok(Self { pages })
    }

    pub fn pages(&self) -> impl Iterator<Item = (u32, &Page)> {
        self.pages.iter().map(|(number, page)| (*number, page))
    }

    pub fn page(&self, number: u32) -> Option<&Page> {
        self.pages.get(&number)
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn total_tokens(&self) -> usize {
        self.pages.values().map(|page| page.num_tokens).sum()
    }

    /// All pages as one blob, each page introduced by a page marker.
    pub fn annotated_text(&self) -> String {
        let mut text = String::new();
        for (number, page) in &self.pages {
            text.push_str(&page_marker(*number));
            text.push('\n');
            text.push_str(&page.text);
            text.push_str("\n\n");
        }
        text
    }
}

pub fn page_marker(number: u32) -> String {
    format!("[PAGE {number}]")
}

impl TryFrom<BTreeMap<u32, PageInput>> for Document {
    type Error = ReviewError;

    fn try_from(value: BTreeMap<u32, PageInput>) -> Result<Self> {
        for (expected, number) in (1u32..).zip(value.keys()) {
            if *number != expected {
                return Err(ReviewError::InvalidDocument(format!(
                    "pages must be numbered contiguously from 1, found page {number} where {expected} was expected"
                )));
            }
        }
        Self::from_pages(value.into_values().map(|page| page.text))
    }
}

impl From<Document> for BTreeMap<u32, Page> {
    fn from(value: Document) -> Self {
        value.pages
    }
}
