//! # Pagination
//!
//! Normalizes paginated responses into [`Page`] and assembles every page of a
//! dataset in ascending page order, sequentially or with a bounded concurrent
//! fan-out.

use futures_util::stream::{self, StreamExt, TryStreamExt};
use serde_json::Value;
use std::future::Future;

use crate::errors::{NepseError, Result};

/// One page of a paginated dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub content: Vec<Value>,
    /// Total pages reported by the server; at least 1.
    pub total_pages: u32,
}

/// `null`, `false`, `0`, `""`, `[]` and `{}`.
pub fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
    }
}

impl Page {
    /// Accepts `{"<name>": {"content": [...], "totalPages": N}}`, a bare
    /// `{"content": [...], "totalPages": N}` or a bare array. A falsy value is
    /// no page at all.
    pub fn from_value(value: Value) -> Result<Option<Page>> {
        if is_falsy(&value) {
            return Ok(None);
        }
        match value {
            Value::Array(content) => Ok(Some(Page { content, total_pages: 1 })),
            Value::Object(mut map) => {
                if map.contains_key("content") {
                    return Self::from_envelope(Value::Object(map)).map(Some);
                }
                let name = map
                    .iter()
                    .find(|(_, v)| v.get("content").is_some())
                    .map(|(k, _)| k.clone());
                match name.and_then(|name| map.remove(&name)) {
                    Some(inner) => Self::from_envelope(inner).map(Some),
                    None => Err(NepseError::UnexpectedShape(format!(
                        "no paginated content in object with keys {:?}",
                        map.keys().collect::<Vec<_>>()
                    ))),
                }
            }
            other => Err(NepseError::UnexpectedShape(format!("not a page: {other}"))),
        }
    }

    fn from_envelope(envelope: Value) -> Result<Page> {
        let total_pages = match envelope.get("totalPages") {
            None | Some(Value::Null) => 1,
            Some(n) => n
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| NepseError::UnexpectedShape(format!("totalPages is {n}")))?,
        };
        let content = match envelope.get("content") {
            Some(Value::Array(items)) => items.clone(),
            Some(v) if is_falsy(v) => Vec::new(),
            Some(v) => return Err(NepseError::UnexpectedShape(format!("content is {v}"))),
            None => Vec::new(),
        };
        Ok(Page {
            content,
            total_pages: total_pages.max(1),
        })
    }
}

/// `path&page=n`, or `path?page=n` when the path has no query string.
pub fn page_path(path: &str, page: u32) -> String {
    let separator = if path.contains('?') { '&' } else { '?' };
    format!("{path}{separator}page={page}")
}

fn page_content(value: Value) -> Result<Vec<Value>> {
    Ok(Page::from_value(value)?.map(|p| p.content).unwrap_or_default())
}

/// Fetches pages `1..first.total_pages` with at most `concurrency` in flight
/// and returns every page's content in page order, `first` included.
pub async fn assemble<F, Fut>(first: Page, fetch: F, concurrency: usize) -> Result<Vec<Vec<Value>>>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = Result<Value>>,
{
    let total = first.total_pages;
    let rest: Vec<Vec<Value>> = stream::iter(1..total)
        .map(|page| {
            let request = fetch(page);
            async move { page_content(request.await?) }
        })
        .buffered(concurrency.max(1))
        .try_collect()
        .await?;

    let mut pages = vec![first.content];
    pages.extend(rest);
    Ok(pages)
}

/// Sequential counterpart of [`assemble`].
pub fn assemble_blocking<F>(first: Page, mut fetch: F) -> Result<Vec<Vec<Value>>>
where
    F: FnMut(u32) -> Result<Value>,
{
    // `totalPages` comes from the upstream; grow as pages arrive.
    let total = first.total_pages;
    let mut pages = vec![first.content];
    for page in 1..total {
        pages.push(page_content(fetch(page)?)?);
    }
    Ok(pages)
}

pub fn flatten(pages: Vec<Vec<Value>>) -> Vec<Value> {
    pages.into_iter().flatten().collect()
}
