// SPDX-FileCopyrightText: 2025 Maciej Borzecki <maciek.borzecki@gmail.com>
//
// SPDX-License-Identifier: MIT

use std::collections::BTreeSet;

use crate::cloud::CloudApi;
use crate::error::{Error, Failure, WithChanged};
use crate::resolve::{self, Selector};

/// Work needed to make a set of tags present on a server.
#[derive(Debug, PartialEq)]
pub struct PresentPlan {
    /// Tags missing from the catalog.
    pub to_create: BTreeSet<String>,
    /// Tags missing from the server.
    pub to_assign: BTreeSet<String>,
}

pub fn reconcile_present(
    desired: &BTreeSet<String>,
    catalog: &BTreeSet<String>,
    assigned: &BTreeSet<String>,
) -> PresentPlan {
    PresentPlan {
        to_create: desired.difference(catalog).cloned().collect(),
        to_assign: desired.difference(assigned).cloned().collect(),
    }
}

/// Tags to detach from a server. The catalog is never modified.
pub fn reconcile_absent(
    desired_for_removal: &BTreeSet<String>,
    assigned: &BTreeSet<String>,
) -> BTreeSet<String> {
    desired_for_removal.intersection(assigned).cloned().collect()
}

/// Tag names travel comma separated in a URL path segment.
fn check_names(tags: &[String]) -> Result<(), Error> {
    match tags.iter().find(|t| t.is_empty() || t.contains(',')) {
        Some(bad) => Err(Error::InvalidArguments(format!(
            "invalid tag name \"{}\"",
            bad
        ))),
        None => Ok(()),
    }
}

/// Outcome of tag reconciliation, with the tags on the server afterwards.
#[derive(Debug, PartialEq)]
pub struct TagOutcome {
    pub changed: bool,
    pub uuid: String,
    pub tags: Vec<String>,
}

/// Makes sure the server has all the given tags, creating missing catalog
/// entries first.
pub fn ensure_present<C>(
    cloud: &mut C,
    selector: &Selector,
    tags: &[String],
) -> Result<TagOutcome, Failure>
where
    C: CloudApi + ?Sized,
{
    check_names(tags)?;
    let server = resolve::resolve(cloud, selector)?;
    let desired: BTreeSet<String> = tags.iter().cloned().collect();

    let catalog: BTreeSet<String> = cloud.list_tags()?.into_iter().map(|t| t.name).collect();
    let assigned: BTreeSet<String> = cloud.get_server(&server.uuid)?.tags.into_iter().collect();

    let plan = reconcile_present(&desired, &catalog, &assigned);
    log::debug!("tag plan for {}: {:?}", server.uuid, plan);

    let mut created = false;
    for name in plan.to_create.iter() {
        log::info!("creating tag {}", name);
        cloud.create_tag(name).with_changed(created)?;
        created = true;
    }

    if plan.to_assign.is_empty() {
        return Ok(TagOutcome {
            changed: created,
            uuid: server.uuid,
            tags: assigned.into_iter().collect(),
        });
    }

    let all: Vec<String> = desired.into_iter().collect();
    log::info!("assigning tags {:?} to {}", all, server.uuid);
    cloud.assign_tags(&server.uuid, &all).with_changed(created)?;

    let tags = cloud.get_server(&server.uuid).with_changed(true)?.tags;
    Ok(TagOutcome {
        changed: true,
        uuid: server.uuid,
        tags,
    })
}

/// Makes sure the server has none of the given tags.
pub fn ensure_absent<C>(
    cloud: &mut C,
    selector: &Selector,
    tags: &[String],
) -> Result<TagOutcome, Failure>
where
    C: CloudApi + ?Sized,
{
    check_names(tags)?;
    let server = resolve::resolve(cloud, selector)?;
    let desired: BTreeSet<String> = tags.iter().cloned().collect();
    let assigned: BTreeSet<String> = cloud.get_server(&server.uuid)?.tags.into_iter().collect();

    let to_unassign = reconcile_absent(&desired, &assigned);
    if to_unassign.is_empty() {
        return Ok(TagOutcome {
            changed: false,
            uuid: server.uuid,
            tags: assigned.into_iter().collect(),
        });
    }

    let to_unassign: Vec<String> = to_unassign.into_iter().collect();
    log::info!("removing tags {:?} from {}", to_unassign, server.uuid);
    cloud.unassign_tags(&server.uuid, &to_unassign)?;

    let tags = cloud.get_server(&server.uuid).with_changed(true)?.tags;
    Ok(TagOutcome {
        changed: true,
        uuid: server.uuid,
        tags,
    })
}
