//! Entity publisher (4.I).
//!
//! Publishes an `OrganizePlan` against the entity store: one child entity
//! per group, then a single parent version append that adds the
//! reorganization description and removes the components now owned by
//! children. Children are created before the parent is updated (ordering
//! contract, §4.I/§5); the parent append is the atomic commit point, so a
//! crash between child creation and the append simply re-creates children
//! on retry (the store dedupes by content address) without corrupting the
//! parent.

use std::collections::BTreeMap;

use tracing::warn;

use crate::entity_store::{AppendVersionRequest, CreateEntityRequest, EntityStoreClient};
use crate::error::{OrganizerError, Result};
use crate::model::{GroupCreated, OrganizePlan};
use crate::retry::backoff_delay;

const CHILD_ENTITY_TYPE: &str = "PI";
const REORG_DESCRIPTION_COMPONENT: &str = "reorganization-description.txt";
const MIN_CAS_ATTEMPTS: u32 = 3;

pub struct PublishOutcome {
    pub new_tip: String,
    pub new_version: u64,
    pub groups_created: Vec<GroupCreated>,
    pub warnings: Vec<String>,
}

/// Publish `plan` as children of `parent_id`, whose current state is
/// `components` (name -> content address) as fetched by 4.H.
pub async fn publish(
    store: &EntityStoreClient,
    parent_id: &str,
    components: &BTreeMap<String, String>,
    plan: &OrganizePlan,
) -> Result<PublishOutcome> {
    let mut warnings = Vec::new();
    let mut groups_created = Vec::new();
    let mut components_to_remove: Vec<String> = Vec::new();

    for group in &plan.groups {
        let subset: BTreeMap<String, String> = group
            .files
            .iter()
            .filter_map(|name| components.get(name).map(|cid| (name.clone(), cid.clone())))
            .collect();

        if subset.is_empty() {
            warnings.push(format!(
                "group `{}` has no resolvable components, skipped",
                group.group_name
            ));
            continue;
        }

        let child = store
            .create_entity(CreateEntityRequest {
                components: subset.clone(),
                parent: parent_id.to_string(),
                entity_type: CHILD_ENTITY_TYPE.to_string(),
                note: format!("organized into `{}`", group.group_name),
            })
            .await?;

        groups_created.push(GroupCreated {
            group_name: group.group_name.clone(),
            id: child.id,
            files: subset.keys().cloned().collect(),
            description: group.description.clone(),
        });
        components_to_remove.extend(subset.keys().cloned());
    }

    if groups_created.is_empty() {
        // Nothing was published; §9 open question (b) — no children, so the
        // parent is left untouched and the item is marked done downstream.
        let parent = store.get_entity(parent_id).await?;
        return Ok(PublishOutcome {
            new_tip: parent.tip,
            new_version: parent.ver,
            groups_created,
            warnings,
        });
    }

    components_to_remove.sort();
    components_to_remove.dedup();
    components_to_remove.retain(|name| components.contains_key(name));

    let description_cid = store
        .upload(
            REORG_DESCRIPTION_COMPONENT,
            plan.description.clone().into_bytes(),
        )
        .await?;

    // CAS retry: each attempt must refetch the current tip, never reuse the
    // tip captured before the loop began (§9, the source of stale-tip CAS
    // failures).
    let mut attempt = 0u32;
    loop {
        let current = store.get_entity(parent_id).await?;

        let mut new_components = BTreeMap::new();
        new_components.insert(
            REORG_DESCRIPTION_COMPONENT.to_string(),
            description_cid.clone(),
        );

        let result = store
            .append_version(
                parent_id,
                AppendVersionRequest {
                    expect_tip: current.tip.clone(),
                    components: new_components,
                    components_remove: components_to_remove.clone(),
                    note: format!("reorganized into {} group(s)", groups_created.len()),
                },
            )
            .await;

        match result {
            Ok(updated) => {
                return Ok(PublishOutcome {
                    new_tip: updated.tip,
                    new_version: updated.ver,
                    groups_created,
                    warnings,
                });
            }
            Err(OrganizerError::StoreTransient(reason)) if attempt + 1 < MIN_CAS_ATTEMPTS => {
                attempt += 1;
                warn!(attempt, reason = %reason, parent_id, "CAS conflict appending version, refetching tip and retrying");
                tokio::time::sleep(backoff_delay(attempt)).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Group;

    #[test]
    fn skips_group_with_no_resolvable_components() {
        let components: BTreeMap<String, String> = BTreeMap::new();
        let group = Group {
            group_name: "orphans".to_string(),
            description: "desc".to_string(),
            files: vec!["a.txt".to_string()],
        };
        let subset: BTreeMap<String, String> = group
            .files
            .iter()
            .filter_map(|name| components.get(name).map(|cid| (name.clone(), cid.clone())))
            .collect();
        assert!(subset.is_empty());
    }
}
