//! Prompt builder (4.D).
//!
//! Produces the (system, user) prompt pair for a single organize request,
//! spending the configured token budget on file content via the
//! progressive-tax allocator and recording what it did in
//! [`TruncationStats`].

use crate::allocator::{self, AllocatorItem};
use crate::estimator;
use crate::model::{FileInput, FileKind, TruncationStats};

const NO_OCR_TEXT: &str = "(No OCR text available — use filename/metadata for grouping)";
const DIVIDER: &str = "\n---\n";

const SYSTEM_PROMPT: &str = "You are a meticulous file-organization assistant. \
You group a set of files into named, filesystem-safe collections based on their \
content and metadata. You never invent file names that were not given to you, \
and you never omit a given file from the output.";

const INSTRUCTIONS: &str = "\n\nInstructions:\n\
1. Every input file name listed above must appear in your output, either inside a group or in `ungrouped_files`.\n\
2. Only use file names exactly as given above; never invent or alter names.\n\
3. Never output a directory path (a string ending in `/`) as a file name.\n\
4. A file may belong to more than one group when that is meaningful.\n\
5. Group names must be filesystem-safe: no `/ \\ : * ? \" < > |` characters.\n";

pub struct PromptResult {
    pub system_prompt: String,
    pub user_prompt: String,
    pub truncation: TruncationStats,
}

/// Build the metadata block for a single file: name, kind, and whatever
/// optional descriptive fields were supplied.
fn metadata_block(file: &FileInput) -> String {
    let kind = match file.kind {
        FileKind::Text => "text",
        FileKind::Ref => "ref",
    };
    let mut block = format!("name: {}\nkind: {}", file.name, kind);
    if let Some(original) = &file.original_name {
        block.push_str(&format!("\noriginal: {original}"));
    }
    if let Some(mime) = &file.mime {
        block.push_str(&format!("\nmime: {mime}"));
    }
    if let Some(size) = file.size {
        block.push_str(&format!("\nsize: {}", human_size(size)));
    }
    block
}

fn human_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} {}", UNITS[unit])
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

fn fixed_user_prompt_template(directory_path: &str) -> String {
    format!("Organize the files below, found at `{directory_path}`.{INSTRUCTIONS}")
}

/// Build the system and user prompts for `files` located at `directory_path`,
/// spending at most `floor(max_input_tokens * budget_percentage)` input
/// tokens total, per §4.D's budget arithmetic.
pub fn build(
    directory_path: &str,
    files: &[FileInput],
    max_input_tokens: u32,
    budget_percentage: f64,
    custom_prompt: Option<&str>,
    strategy_guidance: Option<&str>,
) -> PromptResult {
    let mut system_prompt = SYSTEM_PROMPT.to_string();
    if let Some(guidance) = strategy_guidance {
        system_prompt.push_str("\n\n");
        system_prompt.push_str(guidance);
    }

    let mut template = fixed_user_prompt_template(directory_path);
    if let Some(custom) = custom_prompt {
        template.push_str("\n\nAdditional instructions from the caller:\n");
        template.push_str(custom);
    }

    let static_tokens = estimator::estimate(&system_prompt) + estimator::estimate(&template);

    let metadata_blocks: Vec<String> = files.iter().map(metadata_block).collect();
    let metadata_tokens: u64 = metadata_blocks.iter().map(|b| estimator::estimate(b)).sum();

    let separator_count = files.len().saturating_sub(1) as u64;
    let separator_tokens = estimator::estimate(DIVIDER) * separator_count;

    let budget_m = (max_input_tokens as f64 * budget_percentage).floor() as u64;
    let spent = static_tokens + metadata_tokens + separator_tokens;
    let content_budget = budget_m.saturating_sub(spent);

    let content_items: Vec<(usize, &FileInput)> = files
        .iter()
        .enumerate()
        .filter(|(_, f)| !f.content.is_empty())
        .collect();

    let allocator_items: Vec<AllocatorItem> = content_items
        .iter()
        .map(|(_, f)| AllocatorItem {
            name: f.name.clone(),
            tokens: estimator::estimate(&f.content),
        })
        .collect();

    let total_original_tokens: u64 = allocator_items.iter().map(|item| item.tokens).sum();
    let allocation_result = allocator::allocate(&allocator_items, content_budget);

    let allocated_by_name: std::collections::HashMap<&str, u64> = allocation_result
        .allocations
        .iter()
        .map(|a| (a.name.as_str(), a.allocated_tokens))
        .collect();

    let mut sections = Vec::with_capacity(files.len());
    for (idx, file) in files.iter().enumerate() {
        let block = &metadata_blocks[idx];
        let body = if file.content.is_empty() {
            match file.kind {
                FileKind::Ref => NO_OCR_TEXT.to_string(),
                FileKind::Text => String::new(),
            }
        } else {
            let budget = allocated_by_name.get(file.name.as_str()).copied().unwrap_or(0);
            estimator::truncate(&file.content, budget)
        };

        if body.is_empty() {
            sections.push(block.clone());
        } else {
            sections.push(format!("{block}\n\n{body}"));
        }
    }

    let user_prompt = format!("{template}\n\n{}", sections.join(DIVIDER));

    let truncation = TruncationStats {
        applied: allocation_result.stats.truncated_count > 0,
        total_original_tokens,
        target_tokens: content_budget,
        deficit: allocation_result.stats.deficit,
        protection_mode_used: allocation_result.stats.protection_mode_used,
        protected_count: allocation_result.stats.protected_count,
        truncated_count: allocation_result.stats.truncated_count,
    };

    PromptResult {
        system_prompt,
        user_prompt,
        truncation,
    }
}
