// SPDX-FileCopyrightText: 2025 Maciej Borzecki <maciek.borzecki@gmail.com>
//
// SPDX-License-Identifier: MIT

use std::fmt;

use crate::cloud::CloudApi;
use crate::error::Error;

/// Identifies a single target server.
#[derive(Debug, Clone, PartialEq)]
pub enum Selector {
    Uuid(String),
    Hostname(String),
    Address(String),
}

impl Selector {
    /// Picks a selector from optional arguments, preferring uuid, then
    /// hostname, then address. Empty values count as not given.
    pub fn from_options(
        uuid: Option<&str>,
        hostname: Option<&str>,
        address: Option<&str>,
    ) -> Result<Selector, Error> {
        let given = |v: Option<&str>| v.filter(|s| !s.is_empty()).map(|s| s.to_string());

        if let Some(uuid) = given(uuid) {
            Ok(Selector::Uuid(uuid))
        } else if let Some(hostname) = given(hostname) {
            Ok(Selector::Hostname(hostname))
        } else if let Some(address) = given(address) {
            Ok(Selector::Address(address))
        } else {
            Err(Error::InvalidArguments(
                "one of uuid, hostname or ip_address is required".to_string(),
            ))
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Uuid(u) => write!(f, "uuid {}", u),
            Selector::Hostname(h) => write!(f, "hostname {}", h),
            Selector::Address(a) => write!(f, "IP-address {}", a),
        }
    }
}

/// A resolved server.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerHandle {
    pub uuid: String,
    pub hostname: String,
}

/// Resolves a selector to exactly one server.
pub fn resolve<C>(cloud: &mut C, selector: &Selector) -> Result<ServerHandle, Error>
where
    C: CloudApi + ?Sized,
{
    log::debug!("resolving server by {}", selector);

    match selector {
        Selector::Uuid(uuid) => match cloud.get_server(uuid) {
            Ok(server) => Ok(ServerHandle {
                uuid: server.uuid,
                hostname: server.hostname,
            }),
            Err(err) if err.is_not_found() => Err(Error::NotFound(format!(
                "No server was found with uuid: {}",
                uuid
            ))),
            Err(err) => Err(err.into()),
        },
        Selector::Hostname(hostname) => {
            let mut found = find_by_hostname(cloud, hostname)?;
            match found.len() {
                0 => Err(Error::NotFound(format!(
                    "No server was found with hostname: {}",
                    hostname
                ))),
                1 => Ok(found.remove(0)),
                _ => Err(ambiguous_hostname()),
            }
        }
        Selector::Address(address) => {
            let owner = cloud
                .list_addresses()?
                .into_iter()
                .find(|ip| &ip.address == address)
                .and_then(|ip| ip.server);
            let Some(uuid) = owner else {
                return Err(Error::NotFound(format!(
                    "No server was found with IP-address: {}",
                    address
                )));
            };
            let server = cloud.get_server(&uuid)?;
            Ok(ServerHandle {
                uuid: server.uuid,
                hostname: server.hostname,
            })
        }
    }
}

/// Returns all servers with a given hostname.
pub fn find_by_hostname<C>(cloud: &mut C, hostname: &str) -> Result<Vec<ServerHandle>, Error>
where
    C: CloudApi + ?Sized,
{
    Ok(cloud
        .list_servers()?
        .into_iter()
        .filter(|s| s.hostname == hostname)
        .map(|s| ServerHandle {
            uuid: s.uuid,
            hostname: s.hostname,
        })
        .collect())
}

pub fn ambiguous_hostname() -> Error {
    Error::AmbiguousMatch(
        "More than one server matched the given hostname. Please use unique hostnames."
            .to_string(),
    )
}
