// SPDX-FileCopyrightText: 2025 Maciej Borzecki <maciek.borzecki@gmail.com>
//
// SPDX-License-Identifier: MIT

use crate::cloud::{CloudApi, FirewallRule};
use crate::error::{Failure, WithChanged};
use crate::matcher::{self, RuleCandidate};
use crate::resolve::{self, Selector};

/// Outcome of firewall reconciliation, with the rules of the server
/// afterwards.
#[derive(Debug, PartialEq)]
pub struct FirewallOutcome {
    pub changed: bool,
    pub uuid: String,
    pub rules: Vec<FirewallRule>,
}

/// Creates every candidate rule which does not match an existing rule.
///
/// Existing rules are fetched once. Rules created during the call are not
/// matched against later candidates, so duplicate candidates yield duplicate
/// rules.
pub fn ensure_present<C>(
    cloud: &mut C,
    selector: &Selector,
    candidates: &[RuleCandidate],
) -> Result<FirewallOutcome, Failure>
where
    C: CloudApi + ?Sized,
{
    let server = resolve::resolve(cloud, selector)?;
    let existing = cloud.list_firewall_rules(&server.uuid)?;

    let mut changed = false;
    for candidate in candidates {
        if let Some(position) = matcher::find_match(candidate, &existing) {
            log::debug!("rule {} present at position {}", candidate, position);
            continue;
        }

        log::info!("creating rule {} on {}", candidate, server.uuid);
        cloud
            .create_firewall_rule(&server.uuid, &candidate.to_json())
            .with_changed(changed)?;
        changed = true;
    }

    let rules = if changed {
        cloud.list_firewall_rules(&server.uuid).with_changed(true)?
    } else {
        existing
    };

    Ok(FirewallOutcome {
        changed,
        uuid: server.uuid,
        rules,
    })
}

/// Deletes every existing rule matching any of the candidates.
///
/// A candidate may match several rules. Deleting a rule renumbers the ones
/// after it, so the rules are fetched again after every deletion and
/// deletions are issued one at a time.
pub fn ensure_absent<C>(
    cloud: &mut C,
    selector: &Selector,
    candidates: &[RuleCandidate],
) -> Result<FirewallOutcome, Failure>
where
    C: CloudApi + ?Sized,
{
    let server = resolve::resolve(cloud, selector)?;
    let mut current = cloud.list_firewall_rules(&server.uuid)?;

    let mut changed = false;
    for candidate in candidates {
        while let Some(position) = matcher::find_match(candidate, &current) {
            log::info!(
                "deleting rule at position {} on {}, matched by {}",
                position,
                server.uuid,
                candidate
            );
            cloud
                .delete_firewall_rule(&server.uuid, position)
                .with_changed(changed)?;
            changed = true;

            current = cloud.list_firewall_rules(&server.uuid).with_changed(changed)?;
        }
    }

    Ok(FirewallOutcome {
        changed,
        uuid: server.uuid,
        rules: current,
    })
}
