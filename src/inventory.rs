// SPDX-FileCopyrightText: 2025 Maciej Borzecki <maciek.borzecki@gmail.com>
//
// SPDX-License-Identifier: MIT

use std::collections::{BTreeMap, HashMap};

use serde_json::{Map, Value};

use crate::cloud::{public_ip_of, ApiError, CloudApi, IpAddress, ServerDetail, ServerSummary};
use crate::config::InventoryConfig;

/// Group holding every listed server.
pub const ALL_GROUP: &str = "uc_all";

/// Prefix of host variables.
const VAR_PREFIX: &str = "uc_";

/// Inventory groups, each with a list of host names or addresses.
pub type Groups = BTreeMap<String, Vec<String>>;

/// Maps server uuids to their addresses, fetched in a single request.
struct AddressMap(HashMap<String, Vec<IpAddress>>);

impl AddressMap {
    fn fetch<C>(cloud: &mut C) -> Result<AddressMap, ApiError>
    where
        C: CloudApi + ?Sized,
    {
        let mut map: HashMap<String, Vec<IpAddress>> = HashMap::new();
        for ip in cloud.list_addresses()? {
            if let Some(owner) = ip.server.clone() {
                map.entry(owner).or_default().push(ip);
            }
        }
        Ok(AddressMap(map))
    }

    fn of(&self, uuid: &str) -> &[IpAddress] {
        self.0.get(uuid).map(|v| v.as_slice()).unwrap_or(&[])
    }
}

fn short_name(hostname: &str) -> &str {
    hostname.split('.').next().unwrap_or(hostname)
}

/// Returns the names under which a server is listed.
fn host_names(
    server: &ServerSummary,
    addresses: Option<&AddressMap>,
    conf: &InventoryConfig,
) -> Vec<String> {
    if let Some(addresses) = addresses {
        return public_ip_of(addresses.of(&server.uuid), &conf.default_ipv_version)
            .map(|ip| vec![ip.to_string()])
            .unwrap_or_default();
    }

    let short = short_name(&server.hostname);
    if conf.return_non_fqdn_names && short != server.hostname {
        vec![server.hostname.clone(), short.to_string()]
    } else {
        vec![server.hostname.clone()]
    }
}

fn zone_group(zone: &str) -> String {
    zone.replace('-', "_")
}

/// Lists started servers, grouped by tag and by zone.
pub fn list<C>(cloud: &mut C, conf: &InventoryConfig) -> Result<Groups, ApiError>
where
    C: CloudApi + ?Sized,
{
    let servers = cloud.list_servers()?;
    let addresses = if conf.return_ip_addresses {
        Some(AddressMap::fetch(cloud)?)
    } else {
        None
    };

    let mut groups = Groups::new();
    groups.insert(ALL_GROUP.to_string(), vec![]);

    for server in servers.iter() {
        if server.state != "started" {
            log::debug!("skipping {} in state {}", server.hostname, server.state);
            continue;
        }

        let names = host_names(server, addresses.as_ref(), conf);
        let Some(preferred) = names.last().cloned() else {
            log::warn!(
                "server {} ({}) has no public address, skipping",
                server.hostname,
                server.uuid
            );
            continue;
        };

        groups
            .entry(ALL_GROUP.to_string())
            .or_default()
            .extend(names);

        for tag in server.tags.iter() {
            groups
                .entry(tag.clone())
                .or_default()
                .push(preferred.clone());
        }

        groups
            .entry(zone_group(&server.zone))
            .or_default()
            .push(preferred);
    }

    Ok(groups)
}

/// Returns server attributes with keys prefixed by uc_.
pub fn namespace_fields(server: &ServerDetail) -> Map<String, Value> {
    let value = match serde_json::to_value(server) {
        Ok(Value::Object(obj)) => obj,
        _ => Map::new(),
    };
    value
        .into_iter()
        .map(|(k, v)| (format!("{}{}", VAR_PREFIX, k), v))
        .collect()
}

/// Looks up a single host by address, uuid, hostname or short hostname and
/// returns its variables. An unknown host yields an empty map.
pub fn host<C>(
    cloud: &mut C,
    item: &str,
    conf: &InventoryConfig,
) -> Result<Map<String, Value>, ApiError>
where
    C: CloudApi + ?Sized,
{
    if conf.return_ip_addresses {
        let owner = cloud
            .list_addresses()?
            .into_iter()
            .find(|ip| ip.address == item)
            .and_then(|ip| ip.server);
        if let Some(uuid) = owner {
            let server = cloud.get_server(&uuid)?;
            return Ok(namespace_fields(&server));
        }
    }

    let found = cloud.list_servers()?.into_iter().find(|s| {
        s.uuid == item
            || s.hostname == item
            || (conf.return_non_fqdn_names && short_name(&s.hostname) == item)
    });

    match found {
        Some(s) => {
            let server = cloud.get_server(&s.uuid)?;
            Ok(namespace_fields(&server))
        }
        None => {
            log::debug!("no server matches {}", item);
            Ok(Map::new())
        }
    }
}
