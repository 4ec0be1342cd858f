use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use pulldown_cmark::{Event, HeadingLevel, Parser, Tag, TagEnd};
use reqwest::Client;
use serde_json::{json, Value};

pub const NOTION_PAGES_URL: &str = "https://api.notion.com/v1/pages";
pub const MAX_BLOCKS_PER_PAGE: usize = 100;
pub const MAX_TEXT_CHARS: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Heading(u8),
    Paragraph,
    Bulleted,
    Numbered,
}

impl BlockKind {
    fn notion_type(&self) -> &'static str {
        match self {
            BlockKind::Heading(1) => "heading_1",
            BlockKind::Heading(2) => "heading_2",
            BlockKind::Heading(_) => "heading_3",
            BlockKind::Paragraph => "paragraph",
            BlockKind::Bulleted => "bulleted_list_item",
            BlockKind::Numbered => "numbered_list_item",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub kind: BlockKind,
    pub text: String,
}

impl Block {
    pub fn to_json(&self) -> Value {
        let kind = self.kind.notion_type();
        let mut block = json!({"object": "block", "type": kind});
        block[kind] = json!({
            "rich_text": [{"type": "text", "text": {"content": self.text}}]
        });
        block
    }
}

/// One page worth of blocks with its final title.
#[derive(Debug, Clone, PartialEq)]
pub struct PageDraft {
    pub title: String,
    pub children: Vec<Block>,
}

impl PageDraft {
    pub fn payload(&self, parent_id: &str) -> Value {
        json!({
            "parent": {"type": "page_id", "page_id": parent_id},
            "properties": {
                "title": {"title": [{"text": {"content": self.title}}]}
            },
            "children": self.children.iter().map(Block::to_json).collect::<Vec<_>>(),
        })
    }
}

/// Converts markdown into flat Notion blocks. Nested list items become
/// sibling blocks; inline formatting is dropped.
pub fn markdown_to_blocks(markdown: &str) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut lists: Vec<bool> = Vec::new();
    let mut current: Option<BlockKind> = None;
    let mut text = String::new();

    for event in Parser::new(markdown) {
        match event {
            Event::Start(Tag::Heading { level, .. }) => {
                flush(&mut blocks, &mut current, &mut text);
                current = Some(BlockKind::Heading(heading_depth(level)));
            }
            Event::Start(Tag::List(start)) => {
                flush(&mut blocks, &mut current, &mut text);
                lists.push(start.is_some());
            }
            Event::End(TagEnd::List(_)) => {
                flush(&mut blocks, &mut current, &mut text);
                lists.pop();
            }
            Event::Start(Tag::Item) => {
                flush(&mut blocks, &mut current, &mut text);
                current = Some(match lists.last() {
                    Some(true) => BlockKind::Numbered,
                    _ => BlockKind::Bulleted,
                });
            }
            Event::Start(Tag::Paragraph) => {
                if current.is_none() {
                    current = Some(BlockKind::Paragraph);
                } else if !text.is_empty() {
                    text.push('\n');
                }
            }
            Event::End(TagEnd::Paragraph) => {
                if current == Some(BlockKind::Paragraph) {
                    flush(&mut blocks, &mut current, &mut text);
                }
            }
            Event::End(TagEnd::Heading(_)) | Event::End(TagEnd::Item) => {
                flush(&mut blocks, &mut current, &mut text);
            }
            Event::Text(chunk) | Event::Code(chunk) => {
                if current.is_none() {
                    current = Some(BlockKind::Paragraph);
                }
                text.push_str(&chunk);
            }
            Event::SoftBreak => text.push(' '),
            Event::HardBreak => text.push('\n'),
            _ => {}
        }
    }
    flush(&mut blocks, &mut current, &mut text);
    blocks
}

fn heading_depth(level: HeadingLevel) -> u8 {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        _ => 3,
    }
}

fn flush(blocks: &mut Vec<Block>, current: &mut Option<BlockKind>, text: &mut String) {
    let Some(kind) = current.take() else {
        text.clear();
        return;
    };
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        for piece in split_chars(trimmed, MAX_TEXT_CHARS) {
            blocks.push(Block { kind, text: piece });
        }
    }
    text.clear();
}

fn split_chars(text: &str, max: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars.chunks(max).map(|piece| piece.iter().collect()).collect()
}

/// Splits the content over as many pages as the block limit needs and
/// titles them. No content yields a single empty page.
pub fn plan_pages(title: &str, subtitle: Option<&str>, content: Option<&str>) -> Vec<PageDraft> {
    let blocks = content.map(markdown_to_blocks).unwrap_or_default();
    if blocks.is_empty() {
        return vec![PageDraft {
            title: page_title(title, subtitle, None),
            children: Vec::new(),
        }];
    }
    let parts = blocks.len().div_ceil(MAX_BLOCKS_PER_PAGE);
    blocks
        .chunks(MAX_BLOCKS_PER_PAGE)
        .enumerate()
        .map(|(idx, children)| PageDraft {
            title: page_title(title, subtitle, (parts > 1).then_some(idx + 1)),
            children: children.to_vec(),
        })
        .collect()
}

fn page_title(title: &str, subtitle: Option<&str>, part: Option<usize>) -> String {
    match (subtitle, part) {
        (Some(subtitle), Some(part)) => format!("{subtitle} - Part {part} - {title}"),
        (Some(subtitle), None) => format!("{subtitle} - {title}"),
        (None, Some(part)) => format!("Part {part} - {title}"),
        (None, None) => title.to_string(),
    }
}

#[async_trait]
pub trait PagePublisher: Send + Sync {
    /// Creates one page under `parent_id` and returns its id.
    async fn create(&self, parent_id: &str, draft: &PageDraft) -> Result<String>;
}

/// Plans and creates every page for one piece of content, returning the
/// created page ids in order.
pub async fn publish(
    publisher: &dyn PagePublisher,
    parent_id: &str,
    title: &str,
    subtitle: Option<&str>,
    content: Option<&str>,
) -> Result<Vec<String>> {
    let mut ids = Vec::new();
    for draft in plan_pages(title, subtitle, content) {
        let id = publisher
            .create(parent_id, &draft)
            .await
            .with_context(|| format!("failed to publish page {:?}", draft.title))?;
        tracing::info!(page = %draft.title, blocks = draft.children.len(), "page published");
        ids.push(id);
    }
    Ok(ids)
}

pub struct NotionPublisher {
    http: Client,
    token: String,
    version: String,
    url: String,
}

impl NotionPublisher {
    pub fn new(token: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            token: token.into(),
            version: version.into(),
            url: NOTION_PAGES_URL.to_string(),
        }
    }
}

#[async_trait]
impl PagePublisher for NotionPublisher {
    async fn create(&self, parent_id: &str, draft: &PageDraft) -> Result<String> {
        let response = self
            .http
            .post(&self.url)
            .bearer_auth(&self.token)
            .header("Notion-Version", &self.version)
            .json(&draft.payload(parent_id))
            .send()
            .await
            .context("notion request failed")?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(anyhow!("notion returned error (status {status}): {body}"));
        }
        let value: Value = serde_json::from_str(&body).context("failed to decode notion response")?;
        value
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| anyhow!("notion response has no page id"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markdown_maps_to_block_types() {
        let blocks = markdown_to_blocks(
            "# Summary\n\nThe city plans\nnew bus lanes.\n\n## Risks\n\n- cost\n- timing\n\n1. first\n2. second\n",
        );
        let kinds: Vec<_> = blocks.iter().map(|b| b.kind).collect();
        assert_eq!(
            kinds,
            [
                BlockKind::Heading(1),
                BlockKind::Paragraph,
                BlockKind::Heading(2),
                BlockKind::Bulleted,
                BlockKind::Bulleted,
                BlockKind::Numbered,
                BlockKind::Numbered,
            ]
        );
        assert_eq!(blocks[1].text, "The city plans new bus lanes.");
        assert_eq!(blocks[4].text, "timing");
        assert_eq!(blocks[6].text, "second");
    }

    #[test]
    fn long_items_are_split() {
        let item = format!("- {}\n", "é".repeat(4500));
        let blocks = markdown_to_blocks(&item);
        assert_eq!(blocks.len(), 3);
        assert!(blocks.iter().all(|b| b.kind == BlockKind::Bulleted));
        assert_eq!(blocks[0].text.chars().count(), 2000);
        assert_eq!(blocks[2].text.chars().count(), 500);
    }

    #[test]
    fn pages_hold_at_most_a_hundred_blocks() {
        let content: String = (0..250).map(|i| format!("- point {i}\n")).collect();
        let pages = plan_pages("report.pdf", Some("keypoints"), Some(&content));
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[0].children.len(), 100);
        assert_eq!(pages[2].children.len(), 50);
        assert_eq!(pages[0].title, "keypoints - Part 1 - report.pdf");
        assert_eq!(pages[2].title, "keypoints - Part 3 - report.pdf");
    }

    #[test]
    fn titles_and_empty_content() {
        let single = plan_pages("report.pdf", Some("summarization"), Some("One line."));
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].title, "summarization - report.pdf");

        let empty = plan_pages("What is the budget?", None, None);
        assert_eq!(empty.len(), 1);
        assert_eq!(empty[0].title, "What is the budget?");
        assert!(empty[0].children.is_empty());
    }

    #[test]
    fn payload_shape() {
        let draft = PageDraft {
            title: "t".to_string(),
            children: vec![Block {
                kind: BlockKind::Heading(3),
                text: "h".to_string(),
            }],
        };
        let payload = draft.payload("parent-1");
        assert_eq!(payload["parent"]["page_id"], "parent-1");
        assert_eq!(payload["properties"]["title"]["title"][0]["text"]["content"], "t");
        assert_eq!(payload["children"][0]["type"], "heading_3");
        assert_eq!(
            payload["children"][0]["heading_3"]["rich_text"][0]["text"]["content"],
            "h"
        );
    }
}
