//! Response validator/sanitizer (4.E).
//!
//! Structural checks are fatal (return `Err`); everything past that point
//! is recoverable and is reconciled against the authoritative input name
//! set, producing warnings rather than failures. §9: dynamic JSON from the
//! LLM is trusted for structure (the schema), never for content.

use std::collections::HashSet;

use crate::error::{OrganizerError, Result};
use crate::matcher::{Confidence, FuzzyMatcher};
use crate::model::{is_directory_path, is_filesystem_safe_name, Group, OrganizePlan};

/// Raw shape returned by the LLM, matching the schema in §6 before any
/// reconciliation against the input set.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct RawPlan {
    pub groups: Vec<RawGroup>,
    pub ungrouped_files: Vec<String>,
    pub reorganization_description: String,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct RawGroup {
    pub group_name: String,
    pub description: String,
    pub files: Vec<String>,
}

pub struct SanitizeResult {
    pub sanitized: OrganizePlan,
    pub warnings: Vec<String>,
}

/// Structural checks from §4.E. Violations are not recoverable.
fn check_structure(raw: &RawPlan) -> Result<()> {
    for group in &raw.groups {
        if !is_filesystem_safe_name(&group.group_name) {
            return Err(OrganizerError::BadResponse(format!(
                "group name `{}` is not filesystem-safe",
                group.group_name
            )));
        }
        if group.files.is_empty() {
            return Err(OrganizerError::BadResponse(format!(
                "group `{}` has no files",
                group.group_name
            )));
        }
    }
    Ok(())
}

/// Reconcile a structurally valid `raw` plan against `input_names`,
/// resolving each referenced name through a fuzzy matcher and recording a
/// warning for every non-exact resolution, drop, or omission.
pub fn sanitize(raw: RawPlan, input_names: &[String]) -> Result<SanitizeResult> {
    check_structure(&raw)?;

    let matcher = FuzzyMatcher::new(input_names.iter().map(|s| s.as_str()));
    let input_set: HashSet<&str> = input_names.iter().map(|s| s.as_str()).collect();

    let mut warnings = Vec::new();
    let mut accounted: HashSet<String> = HashSet::new();

    let mut groups: Vec<Group> = raw
        .groups
        .iter()
        .map(|raw_group| {
            let files = resolve_names(&raw_group.files, &matcher, &mut warnings);
            accounted.extend(files.iter().cloned());
            Group {
                group_name: raw_group.group_name.clone(),
                description: raw_group.description.clone(),
                files,
            }
        })
        .collect();

    let mut ungrouped = resolve_names(&raw.ungrouped_files, &matcher, &mut warnings);
    accounted.extend(ungrouped.iter().cloned());

    // Step 3: append omitted input names to `ungrouped` with one summary warning.
    let missing: Vec<String> = input_names
        .iter()
        .filter(|name| !accounted.contains(name.as_str()))
        .cloned()
        .collect();
    if !missing.is_empty() {
        warnings.push(format!(
            "{} input file(s) were omitted by the model and appended to ungrouped: {}",
            missing.len(),
            missing.join(", ")
        ));
        ungrouped.extend(missing);
    }

    // Step 4: drop any name that still isn't in the input set (should only
    // be names the matcher failed to resolve, since resolved names are by
    // construction in the input set).
    let drop_and_warn = |names: Vec<String>, warnings: &mut Vec<String>, context: &str| -> Vec<String> {
        let (kept, dropped): (Vec<String>, Vec<String>) =
            names.into_iter().partition(|name| input_set.contains(name.as_str()));
        if !dropped.is_empty() {
            warnings.push(format!(
                "dropped name(s) not present in the input set from {context}: {}",
                dropped.join(", ")
            ));
        }
        kept
    };

    for group in &mut groups {
        group.files = drop_and_warn(
            std::mem::take(&mut group.files),
            &mut warnings,
            &format!("group `{}`", group.group_name),
        );
    }
    ungrouped = drop_and_warn(ungrouped, &mut warnings, "ungrouped");

    // Step 5: drop groups left empty by steps 2/4.
    let before = groups.len();
    groups.retain(|group| !group.files.is_empty());
    if groups.len() < before {
        warnings.push(format!(
            "dropped {} group(s) that became empty after reconciliation",
            before - groups.len()
        ));
    }

    let sanitized = OrganizePlan {
        groups,
        ungrouped,
        description: raw.reorganization_description,
        truncation: None,
        warnings: warnings.clone(),
    };

    Ok(SanitizeResult {
        sanitized,
        warnings,
    })
}

/// Resolve every name in `raw_names` via `matcher`, dropping directory-path
/// strings with a warning and recording a warning for every non-exact
/// resolution. Unresolved names are provisionally retained (dropped later,
/// in step 4 of `sanitize`, with their own warning).
fn resolve_names(raw_names: &[String], matcher: &FuzzyMatcher, warnings: &mut Vec<String>) -> Vec<String> {
    let mut resolved = Vec::with_capacity(raw_names.len());

    for raw_name in raw_names {
        if is_directory_path(raw_name) {
            warnings.push(format!("dropped directory-path string `{raw_name}`"));
            continue;
        }

        let result = matcher.resolve(raw_name);
        match result.matched {
            Some(matched) => {
                if result.confidence != Confidence::Exact {
                    warnings.push(format!(
                        "resolved `{raw_name}` to input file `{matched}` ({:?} match)",
                        result.confidence
                    ));
                }
                resolved.push(matched);
            }
            None => {
                // Retained for now; dropped with a warning in step 4 if it
                // truly isn't an input name.
                resolved.push(raw_name.clone());
            }
        }
    }

    resolved
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn every_input_name_appears_at_least_once() {
        let input_names = inputs(&["a.txt", "b.txt", "c.txt"]);
        let raw = RawPlan {
            groups: vec![RawGroup {
                group_name: "docs".to_string(),
                description: "stuff".to_string(),
                files: vec!["a.txt".to_string()],
            }],
            ungrouped_files: vec!["b.txt".to_string()],
            reorganization_description: "grouped docs".to_string(),
        };
        let result = sanitize(raw, &input_names).unwrap();
        let all: HashSet<&str> = result
            .sanitized
            .groups
            .iter()
            .flat_map(|g| g.files.iter().map(|f| f.as_str()))
            .chain(result.sanitized.ungrouped.iter().map(|f| f.as_str()))
            .collect();
        for name in &input_names {
            assert!(all.contains(name.as_str()), "missing {name}");
        }
    }

    #[test]
    fn directory_paths_are_dropped_with_warning() {
        let input_names = inputs(&["a.txt", "b.txt", "c.txt", "d.txt", "e.txt"]);
        let raw = RawPlan {
            groups: vec![RawGroup {
                group_name: "docs".to_string(),
                description: "stuff".to_string(),
                files: vec!["posts/".to_string(), "a.txt".to_string()],
            }],
            ungrouped_files: vec!["b.txt".to_string(), "c.txt".to_string(), "d.txt".to_string()],
            reorganization_description: "desc".to_string(),
        };
        let result = sanitize(raw, &input_names).unwrap();
        assert!(!result
            .sanitized
            .groups
            .iter()
            .flat_map(|g| g.files.iter())
            .any(|f| f.ends_with('/')));
        assert!(result.warnings.iter().any(|w| w.contains("posts/")));
        // e.txt was omitted by the model entirely.
        assert!(result.sanitized.ungrouped.contains(&"e.txt".to_string()));
    }

    #[test]
    fn hallucinated_name_is_dropped() {
        let input_names = inputs(&["a.txt"]);
        let raw = RawPlan {
            groups: vec![RawGroup {
                group_name: "docs".to_string(),
                description: "stuff".to_string(),
                files: vec!["a.txt".to_string(), "zzz_completely_invented.bin".to_string()],
            }],
            ungrouped_files: vec![],
            reorganization_description: "desc".to_string(),
        };
        let result = sanitize(raw, &input_names).unwrap();
        let all_files: Vec<&str> = result
            .sanitized
            .groups
            .iter()
            .flat_map(|g| g.files.iter().map(|f| f.as_str()))
            .collect();
        assert!(!all_files.contains(&"zzz_completely_invented.bin"));
        assert!(result
            .warnings
            .iter()
            .any(|w| w.contains("zzz_completely_invented.bin")));
    }

    #[test]
    fn unsafe_group_name_is_fatal() {
        let input_names = inputs(&["a.txt"]);
        let raw = RawPlan {
            groups: vec![RawGroup {
                group_name: "bad/name".to_string(),
                description: "stuff".to_string(),
                files: vec!["a.txt".to_string()],
            }],
            ungrouped_files: vec![],
            reorganization_description: "desc".to_string(),
        };
        assert!(sanitize(raw, &input_names).is_err());
    }

    #[test]
    fn empty_group_after_reconciliation_is_dropped() {
        let input_names = inputs(&["a.txt"]);
        let raw = RawPlan {
            groups: vec![RawGroup {
                group_name: "ghosts".to_string(),
                description: "stuff".to_string(),
                files: vec!["nonexistent.bin".to_string()],
            }],
            ungrouped_files: vec![],
            reorganization_description: "desc".to_string(),
        };
        let result = sanitize(raw, &input_names).unwrap();
        assert!(result.sanitized.groups.iter().all(|g| g.group_name != "ghosts"));
        assert!(result.sanitized.ungrouped.contains(&"a.txt".to_string()));
    }
}
