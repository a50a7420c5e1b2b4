//! Context fetcher (4.H).
//!
//! Given an entity id, pulls its component manifest and fetches the
//! content the organize service needs: text components in full, `.ref.json`
//! sidecars parsed for OCR text and descriptive metadata. A failed
//! sub-fetch is recorded as a warning and the file is omitted — never a
//! fatal error.

use std::collections::BTreeMap;

use futures::future::join_all;
use serde::Deserialize;
use serde_json::Value;

use crate::entity_store::EntityStoreClient;
use crate::error::Result;
use crate::model::{FileInput, FileKind};

const TEXT_EXTENSIONS: &[&str] = &["txt", "md", "markdown", "csv", "json", "html", "htm", "xml", "log"];

/// Components carrying metadata from a prior organize run, never treated as
/// organizable content.
const SKIP_COMPONENTS: &[&str] = &["reorganization-description.txt"];

#[derive(Debug, Deserialize)]
struct RefDescriptor {
    #[serde(default)]
    ocr: Option<String>,
    #[serde(rename = "type", default)]
    file_type: Option<String>,
    #[serde(default)]
    filename: Option<String>,
    #[serde(default)]
    size: Option<u64>,
}

pub struct FetchedContext {
    pub tip: String,
    pub directory_path: String,
    pub files: Vec<FileInput>,
    pub components: BTreeMap<String, String>,
    pub warnings: Vec<String>,
}

fn is_text_component(name: &str) -> bool {
    if SKIP_COMPONENTS.contains(&name) || is_ref_component(name) {
        return false;
    }
    let ext = name.rsplit('.').next().unwrap_or("");
    TEXT_EXTENSIONS.contains(&ext)
}

fn is_ref_component(name: &str) -> bool {
    name.ends_with(".ref.json")
}

/// Fetch the manifest and component content for `id`. Text components are
/// fetched in parallel; `.ref.json` sidecars are parsed into `ref`
/// `FileInput`s carrying OCR text or a short binary descriptor.
pub async fn fetch_context(client: &EntityStoreClient, id: &str) -> Result<FetchedContext> {
    let entity = client.get_entity(id).await?;
    let components = entity.components.clone();

    let mut warnings = Vec::new();

    let text_names: Vec<&String> = components
        .keys()
        .filter(|name| is_text_component(name))
        .collect();
    let ref_names: Vec<&String> = components
        .keys()
        .filter(|name| is_ref_component(name))
        .collect();

    let text_futures = text_names.iter().map(|name| {
        let cid = components.get(name.as_str()).cloned().unwrap_or_default();
        async move {
            let content = client.cat(&cid).await;
            (name.to_string(), content)
        }
    });
    let text_results = join_all(text_futures).await;

    let ref_futures = ref_names.iter().map(|name| {
        let cid = components.get(name.as_str()).cloned().unwrap_or_default();
        async move {
            let content = client.cat(&cid).await;
            (name.to_string(), content)
        }
    });
    let ref_results = join_all(ref_futures).await;

    let mut files = Vec::with_capacity(text_results.len() + ref_results.len());

    for (name, result) in text_results {
        match result {
            Ok(bytes) => {
                let size = bytes.len() as u64;
                let content = String::from_utf8_lossy(&bytes).to_string();
                files.push(FileInput {
                    name: name.clone(),
                    kind: FileKind::Text,
                    content,
                    original_name: None,
                    mime: None,
                    size: Some(size),
                });
            }
            Err(err) => {
                warnings.push(format!("failed to fetch text component `{name}`: {err}"));
            }
        }
    }

    for (name, result) in ref_results {
        match result {
            Ok(bytes) => match serde_json::from_slice::<RefDescriptor>(&bytes) {
                Ok(descriptor) => {
                    let display_name = descriptor.filename.clone().unwrap_or_else(|| name.clone());
                    let content = match &descriptor.ocr {
                        Some(ocr) if !ocr.trim().is_empty() => {
                            format!("[Image/Document: {display_name}]\n{ocr}")
                        }
                        _ => format!("[Binary file: {display_name}]"),
                    };
                    files.push(FileInput {
                        name: name.clone(),
                        kind: FileKind::Ref,
                        content,
                        original_name: descriptor.filename,
                        mime: descriptor.file_type,
                        size: descriptor.size,
                    });
                }
                Err(err) => {
                    warnings.push(format!("failed to parse ref descriptor `{name}`: {err}"));
                }
            },
            Err(err) => {
                warnings.push(format!("failed to fetch ref component `{name}`: {err}"));
            }
        }
    }

    Ok(FetchedContext {
        tip: entity.tip,
        directory_path: directory_path_for(id, &entity.parent),
        files,
        components,
        warnings,
    })
}

/// The entity store has no first-class directory-path concept; the prompt
/// builder only needs a stable, human-readable label, so the id stands in
/// for it directly.
fn directory_path_for(id: &str, _parent: &Option<String>) -> String {
    format!("{id}/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_text_and_ref_components() {
        assert!(is_text_component("notes.txt"));
        assert!(is_text_component("table.csv"));
        assert!(!is_text_component("reorganization-description.txt"));
        assert!(is_ref_component("scan.jpg.ref.json"));
        assert!(!is_ref_component("notes.txt"));
        // A `.ref.json` sidecar's last dotted segment is `json`, which would
        // otherwise also classify it as text; it must only ever be fetched
        // once, as a ref component.
        assert!(!is_text_component("scan.jpg.ref.json"));
    }

    #[test]
    fn ref_descriptor_without_ocr_parses() {
        let raw = serde_json::json!({"type": "image/jpeg", "filename": "scan.jpg", "size": 1024});
        let descriptor: RefDescriptor = serde_json::from_value(raw).unwrap();
        assert!(descriptor.ocr.is_none());
        assert_eq!(descriptor.filename.as_deref(), Some("scan.jpg"));
    }
}
