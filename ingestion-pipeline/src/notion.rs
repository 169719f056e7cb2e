use common::{error::AppError, storage::types::document::MultimediaRef};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{json, Value};
use tracing::debug;

const NOTION_VERSION: &str = "2022-06-28";
const DEFAULT_API_BASE: &str = "https://api.notion.com/v1";
const PAGE_SIZE: usize = 100;

/// Thin client over the hierarchical page store: database queries, page
/// retrieval and block-tree rendering into plain text plus multimedia
/// references.
pub struct NotionClient {
    http: reqwest::Client,
    token: String,
    api_base: String,
}

impl NotionClient {
    pub fn new(access_token: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            token: access_token.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }

    pub fn with_api_base(access_token: &str, api_base: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            token: access_token.to_string(),
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }

    async fn get_json(&self, path: &str) -> Result<Value, AppError> {
        let response = self
            .http
            .get(format!("{}{path}", self.api_base))
            .bearer_auth(&self.token)
            .header("Notion-Version", NOTION_VERSION)
            .send()
            .await?;

        Self::check(response).await
    }

    async fn post_json(&self, path: &str, body: Value) -> Result<Value, AppError> {
        let response = self
            .http
            .post(format!("{}{path}", self.api_base))
            .bearer_auth(&self.token)
            .header("Notion-Version", NOTION_VERSION)
            .json(&body)
            .send()
            .await?;

        Self::check(response).await
    }

    async fn check(response: reqwest::Response) -> Result<Value, AppError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Notion(format!("{status}: {body}")));
        }

        Ok(response.json().await?)
    }

    /// Retrieve the remote database object (schema snapshot).
    pub async fn get_database(&self, database_id: &str) -> Result<Value, AppError> {
        self.get_json(&format!("/databases/{database_id}")).await
    }

    /// All pages of a database, following pagination cursors.
    pub async fn get_database_pages(&self, database_id: &str) -> Result<Vec<Value>, AppError> {
        let mut pages = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut body = json!({ "page_size": PAGE_SIZE });
            if let Some(start_cursor) = &cursor {
                body["start_cursor"] = json!(start_cursor);
            }

            let response = self
                .post_json(&format!("/databases/{database_id}/query"), body)
                .await?;

            if let Some(results) = response["results"].as_array() {
                pages.extend(results.iter().cloned());
            }

            if response["has_more"].as_bool() == Some(true) {
                cursor = response["next_cursor"].as_str().map(str::to_string);
                if cursor.is_none() {
                    break;
                }
            } else {
                break;
            }
        }

        debug!(database_id, pages = pages.len(), "fetched database pages");
        Ok(pages)
    }

    pub async fn get_page(&self, page_id: &str) -> Result<Value, AppError> {
        self.get_json(&format!("/pages/{page_id}")).await
    }

    async fn fetch_block_children(&self, block_id: &str) -> Result<Vec<Value>, AppError> {
        let mut blocks = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let path = match &cursor {
                Some(start_cursor) => format!(
                    "/blocks/{block_id}/children?page_size={PAGE_SIZE}&start_cursor={start_cursor}"
                ),
                None => format!("/blocks/{block_id}/children?page_size={PAGE_SIZE}"),
            };
            let response = self.get_json(&path).await?;

            if let Some(results) = response["results"].as_array() {
                blocks.extend(results.iter().cloned());
            }

            if response["has_more"].as_bool() == Some(true) {
                cursor = response["next_cursor"].as_str().map(str::to_string);
                if cursor.is_none() {
                    break;
                }
            } else {
                break;
            }
        }

        Ok(blocks)
    }

    /// Render a page's block tree into plain text, collecting multimedia
    /// references with their linear position.
    pub async fn get_page_content_with_multimedia(
        &self,
        page_id: &str,
    ) -> Result<(String, Vec<MultimediaRef>), AppError> {
        let blocks = self.fetch_block_children(page_id).await?;

        let mut parts = Vec::new();
        let mut refs = Vec::new();
        self.walk_blocks(blocks, &mut parts, &mut refs).await?;

        Ok((parts.join("\n\n").trim().to_string(), refs))
    }

    fn walk_blocks<'a>(
        &'a self,
        blocks: Vec<Value>,
        parts: &'a mut Vec<String>,
        refs: &'a mut Vec<MultimediaRef>,
    ) -> BoxFuture<'a, Result<(), AppError>> {
        async move {
            for block in blocks {
                let block_type = block["type"].as_str().unwrap_or_default().to_string();
                let block_id = block["id"].as_str().unwrap_or_default().to_string();
                let has_children = block["has_children"].as_bool() == Some(true);

                if block_type == "table" {
                    if has_children {
                        match self.fetch_block_children(&block_id).await {
                            Ok(rows) => parts.push(render_table_rows(&rows)),
                            Err(_) => parts.push("[Table content]".to_string()),
                        }
                    }
                    continue;
                }

                let (text, multimedia) = render_leaf_block(&block, refs.len());

                let mut rendered = text;
                if has_children {
                    let children = self.fetch_block_children(&block_id).await?;
                    let mut child_parts = Vec::new();
                    self.walk_blocks(children, &mut child_parts, refs).await?;
                    if !child_parts.is_empty() {
                        let nested = child_parts.join("\n\n");
                        rendered = Some(match rendered {
                            Some(own) => format!("{own}\n{nested}"),
                            None => nested,
                        });
                    }
                }

                if let Some(text) = rendered {
                    if !text.trim().is_empty() {
                        parts.push(text);
                    }
                }
                if let Some(media) = multimedia {
                    refs.push(media);
                }
            }

            Ok(())
        }
        .boxed()
    }
}

/// Concatenated `plain_text` of a rich-text array.
fn plain_text(rich_text: &Value) -> String {
    rich_text
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item["plain_text"].as_str())
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}

/// Hosted files carry the URL under `file`, linked ones under `external`.
fn file_url(data: &Value) -> Option<String> {
    data["file"]["url"]
        .as_str()
        .or_else(|| data["external"]["url"].as_str())
        .map(str::to_string)
}

/// Render one childless block into text, plus a multimedia reference when
/// the block is an asset.
pub(crate) fn render_leaf_block(
    block: &Value,
    position: usize,
) -> (Option<String>, Option<MultimediaRef>) {
    let block_type = block["type"].as_str().unwrap_or_default();
    let block_id = block["id"].as_str().map(str::to_string);
    let data = &block[block_type];

    match block_type {
        "paragraph" | "callout" => {
            let text = plain_text(&data["rich_text"]);
            (Some(text), None)
        }
        "heading_1" | "heading_2" | "heading_3" => {
            let level: usize = block_type
                .rsplit('_')
                .next()
                .and_then(|n| n.parse().ok())
                .unwrap_or(1);
            let text = plain_text(&data["rich_text"]);
            (Some(format!("{} {text}", "#".repeat(level))), None)
        }
        "bulleted_list_item" => (Some(format!("• {}", plain_text(&data["rich_text"]))), None),
        "numbered_list_item" => (Some(format!("1. {}", plain_text(&data["rich_text"]))), None),
        "to_do" => {
            let checked = data["checked"].as_bool() == Some(true);
            let checkbox = if checked { "☑" } else { "☐" };
            (
                Some(format!("{checkbox} {}", plain_text(&data["rich_text"]))),
                None,
            )
        }
        "quote" => (Some(format!("> {}", plain_text(&data["rich_text"]))), None),
        "code" => {
            let language = data["language"].as_str().unwrap_or_default();
            let code = plain_text(&data["rich_text"]);
            (Some(format!("```{language}\n{code}\n```")), None)
        }
        "image" | "file" | "video" => {
            let caption = plain_text(&data["caption"]);
            let label = match block_type {
                "image" => "Image",
                "video" => "Video",
                _ => "File",
            };
            let text = if caption.is_empty() {
                format!("[{label}]")
            } else {
                format!("[{label}: {caption}]")
            };
            let media = MultimediaRef {
                kind: block_type.to_string(),
                url: file_url(data),
                caption,
                position,
                block_id,
            };
            (Some(text), Some(media))
        }
        "bookmark" => {
            let url = data["url"].as_str().unwrap_or_default().to_string();
            let caption = plain_text(&data["caption"]);
            let label = if caption.is_empty() {
                url.clone()
            } else {
                caption.clone()
            };
            let media = MultimediaRef {
                kind: "bookmark".to_string(),
                url: Some(url),
                caption,
                position,
                block_id,
            };
            (Some(format!("[Bookmark: {label}]")), Some(media))
        }
        "divider" => (Some("---".to_string()), None),
        _ => (None, None),
    }
}

/// Rows of a table block rendered as pipe-separated lines.
fn render_table_rows(rows: &[Value]) -> String {
    rows.iter()
        .filter_map(|row| {
            let cells = row["table_row"]["cells"].as_array()?;
            let line = cells
                .iter()
                .map(plain_text)
                .collect::<Vec<_>>()
                .join(" | ");
            Some(line)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// The page title lives in whichever property has the `title` type.
pub fn extract_title(page: &Value) -> String {
    if let Some(properties) = page["properties"].as_object() {
        for property in properties.values() {
            if property["type"].as_str() == Some("title") {
                let title = plain_text(&property["title"]);
                if !title.is_empty() {
                    return title;
                }
            }
        }
    }

    "Untitled".to_string()
}
