// SPDX-FileCopyrightText: 2025 Maciej Borzecki <maciek.borzecki@gmail.com>
//
// SPDX-License-Identifier: MIT

use core::time;
use std::thread;
use std::time::Instant;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::cloud::{
    CloudApi, IpAddressRequest, LoginUser, ServerDetail, ServerRequest, StorageRequest,
    StorageTemplate,
};
use crate::error::{Error, Failure, WithChanged};
use crate::module::de;
use crate::resolve;

/// Desired state of a server.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ServerState {
    #[default]
    Present,
    Absent,
    Stopped,
}

/// Storage device of a new server. Devices with an OS are cloned from a
/// template, others are created empty.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct StorageArgs {
    #[serde(deserialize_with = "de::u64_value")]
    pub size: u64,
    /// Template uuid or title.
    #[serde(default)]
    pub os: Option<String>,
    #[serde(default)]
    pub tier: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

/// Memory size, either in MiB or as a size string such as 2GiB.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum MemoryAmount {
    MiB(u64),
    Size(String),
}

impl MemoryAmount {
    pub fn as_mib(&self) -> Result<u64, Error> {
        match self {
            MemoryAmount::MiB(v) => Ok(*v),
            MemoryAmount::Size(s) => {
                if let Ok(v) = s.trim().parse::<u64>() {
                    return Ok(v);
                }
                s.trim()
                    .parse::<bytesize::ByteSize>()
                    .map(|b| b.as_u64() / bytesize::MIB)
                    .map_err(|e| {
                        Error::InvalidArguments(format!("invalid memory_amount \"{}\": {}", s, e))
                    })
            }
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct ServerArgs {
    #[serde(default)]
    pub state: ServerState,
    #[serde(default, alias = "CLIENT_ID")]
    pub api_user: Option<String>,
    #[serde(default, alias = "API_KEY")]
    pub api_passwd: Option<String>,
    #[serde(default, alias = "id")]
    pub uuid: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub zone: Option<String>,
    #[serde(default)]
    pub storage_devices: Vec<StorageArgs>,
    #[serde(default)]
    pub plan: Option<String>,
    #[serde(default, deserialize_with = "de::opt_u32")]
    pub core_number: Option<u32>,
    #[serde(default)]
    pub memory_amount: Option<MemoryAmount>,
    #[serde(default)]
    pub ip_addresses: Vec<IpAddressRequest>,
    #[serde(default, deserialize_with = "de::opt_bool")]
    pub firewall: Option<bool>,
    #[serde(default, deserialize_with = "de::opt_bool")]
    pub vnc: Option<bool>,
    #[serde(default)]
    pub vnc_password: Option<String>,
    #[serde(default)]
    pub video_model: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub password_delivery: Option<String>,
    #[serde(default)]
    pub nic_model: Option<String>,
    #[serde(default)]
    pub boot_order: Option<String>,
    #[serde(default, deserialize_with = "de::opt_string")]
    pub avoid_host: Option<String>,
    #[serde(default)]
    pub user_data: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default, deserialize_with = "de::string_list")]
    pub ssh_keys: Vec<String>,
}

impl ServerArgs {
    /// Checks argument combinations.
    pub fn validate(&self) -> Result<(), Error> {
        let given = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.is_empty());

        if !given(&self.uuid) && !given(&self.hostname) {
            return Err(Error::InvalidArguments(
                "one of uuid, hostname is required".to_string(),
            ));
        }
        if self.core_number.is_some() != self.memory_amount.is_some() {
            return Err(Error::InvalidArguments(
                "core_number and memory_amount must be given together".to_string(),
            ));
        }
        if self.api_user.is_some() != self.api_passwd.is_some() {
            return Err(Error::InvalidArguments(
                "api_user and api_passwd must be given together".to_string(),
            ));
        }
        if self.plan.is_some() && self.core_number.is_some() {
            return Err(Error::InvalidArguments(
                "plan is mutually exclusive with core_number and memory_amount".to_string(),
            ));
        }
        if let Some(mem) = self.memory_amount.as_ref() {
            mem.as_mib()?;
        }
        Ok(())
    }
}

/// Polls server state until it reaches the expected one.
#[derive(Debug, Clone)]
pub struct Waiter {
    timeout: time::Duration,
    interval: time::Duration,
}

impl Waiter {
    pub fn new(timeout: time::Duration) -> Self {
        Waiter {
            timeout,
            interval: time::Duration::from_secs(5),
        }
    }

    #[cfg(test)]
    pub fn with_interval(mut self, interval: time::Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn wait_for_state<C>(
        &self,
        cloud: &mut C,
        uuid: &str,
        state: &str,
    ) -> Result<ServerDetail, Error>
    where
        C: CloudApi + ?Sized,
    {
        let now = Instant::now();

        loop {
            let server = cloud.get_server(uuid)?;
            if server.state == state {
                return Ok(server);
            }

            if now.elapsed() >= self.timeout {
                return Err(Error::Timeout(format!(
                    "server {} still in state {}, expected {}",
                    uuid, server.state, state
                )));
            }

            log::debug!(
                "server {} in state {}, waiting for {}",
                uuid,
                server.state,
                state
            );
            thread::sleep(self.interval);
        }
    }
}

/// Result of a server module run.
#[derive(Debug, PartialEq)]
pub struct ServerOutcome {
    pub changed: bool,
    pub msg: Option<String>,
    pub server: Option<ServerDetail>,
    pub public_ip: Option<String>,
}

/// Finds a server by uuid, then by hostname. A uuid which does not exist is
/// not an error, but a hostname shared by several servers is.
pub fn find_server<C>(
    cloud: &mut C,
    uuid: Option<&str>,
    hostname: Option<&str>,
) -> Result<Option<ServerDetail>, Error>
where
    C: CloudApi + ?Sized,
{
    if let Some(uuid) = uuid.filter(|u| !u.is_empty()) {
        match cloud.get_server(uuid) {
            Ok(server) => return Ok(Some(server)),
            Err(err) if err.is_not_found() => {
                log::debug!("no server with uuid {}", uuid);
            }
            Err(err) => return Err(err.into()),
        }
    }

    if let Some(hostname) = hostname.filter(|h| !h.is_empty()) {
        let mut found = resolve::find_by_hostname(cloud, hostname)?;
        match found.len() {
            0 => {}
            1 => return Ok(Some(cloud.get_server(&found.remove(0).uuid)?)),
            _ => return Err(resolve::ambiguous_hostname()),
        }
    }

    Ok(None)
}

fn looks_like_uuid(s: &str) -> bool {
    s.len() == 36
        && s.chars().enumerate().all(|(i, c)| match i {
            8 | 13 | 18 | 23 => c == '-',
            _ => c.is_ascii_hexdigit(),
        })
}

fn on_off(v: bool) -> Value {
    Value::String(if v { "on" } else { "off" }.to_string())
}

/// Builds a request for creating a server from module arguments.
pub fn server_request<C>(cloud: &mut C, args: &ServerArgs) -> Result<ServerRequest, Error>
where
    C: CloudApi + ?Sized,
{
    let required = |name: &str, v: &Option<String>| {
        v.clone()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::InvalidArguments(format!("{} is required to create a server", name)))
    };
    let hostname = required("hostname", &args.hostname)?;
    let zone = required("zone", &args.zone)?;
    if args.storage_devices.is_empty() {
        return Err(Error::InvalidArguments(
            "storage_devices is required to create a server".to_string(),
        ));
    }

    let mut templates: Option<Vec<StorageTemplate>> = None;
    let mut storage_devices = Vec::new();
    for (i, dev) in args.storage_devices.iter().enumerate() {
        let storage = match dev.os.as_deref() {
            None => None,
            Some(os) if looks_like_uuid(os) => Some(os.to_string()),
            Some(os) => {
                if templates.is_none() {
                    templates = Some(cloud.list_templates()?);
                }
                let uuid = templates
                    .iter()
                    .flatten()
                    .find(|t| t.title == os)
                    .map(|t| t.uuid.clone())
                    .ok_or_else(|| Error::NotFound(format!("no storage template \"{}\"", os)))?;
                Some(uuid)
            }
        };
        let title = dev.title.clone().unwrap_or_else(|| match storage {
            Some(_) => format!("{} OS disk", hostname),
            None => format!("{} disk {}", hostname, i),
        });
        storage_devices.push(StorageRequest {
            action: if storage.is_some() { "clone" } else { "create" }.to_string(),
            storage,
            title,
            size: dev.size,
            tier: dev.tier.clone(),
        });
    }

    let mut attributes = Map::new();
    let mut set = |k: &str, v: Option<Value>| {
        if let Some(v) = v {
            attributes.insert(k.to_string(), v);
        }
    };
    set("plan", args.plan.clone().map(Value::String));
    set(
        "core_number",
        args.core_number.map(|v| Value::String(v.to_string())),
    );
    set(
        "memory_amount",
        args.memory_amount
            .as_ref()
            .map(|m| m.as_mib())
            .transpose()?
            .map(|v| Value::String(v.to_string())),
    );
    set("firewall", args.firewall.map(on_off));
    set("vnc", args.vnc.map(on_off));
    set("vnc_password", args.vnc_password.clone().map(Value::String));
    set("video_model", args.video_model.clone().map(Value::String));
    set("timezone", args.timezone.clone().map(Value::String));
    set(
        "password_delivery",
        args.password_delivery.clone().map(Value::String),
    );
    set("nic_model", args.nic_model.clone().map(Value::String));
    set("boot_order", args.boot_order.clone().map(Value::String));
    set("avoid_host", args.avoid_host.clone().map(Value::String));
    set("user_data", args.user_data.clone().map(Value::String));

    let login_user = if args.ssh_keys.is_empty() {
        None
    } else {
        Some(LoginUser {
            username: args.user.clone().unwrap_or_else(|| "root".to_string()),
            create_password: "no".to_string(),
            ssh_keys: args.ssh_keys.clone(),
        })
    };

    Ok(ServerRequest {
        title: args.title.clone().unwrap_or_else(|| hostname.clone()),
        hostname,
        zone,
        storage_devices,
        ip_addresses: args.ip_addresses.clone(),
        login_user,
        attributes,
    })
}

fn ensure_started<C>(
    cloud: &mut C,
    server: ServerDetail,
    waiter: &Waiter,
) -> Result<ServerDetail, Error>
where
    C: CloudApi + ?Sized,
{
    match server.state.as_str() {
        "started" => return Ok(server),
        "stopped" => {
            log::info!("starting server {}", server.uuid);
            cloud.start_server(&server.uuid)?;
        }
        _ => {}
    }
    waiter.wait_for_state(cloud, &server.uuid, "started")
}

fn ensure_stopped<C>(cloud: &mut C, server: &ServerDetail, waiter: &Waiter) -> Result<(), Error>
where
    C: CloudApi + ?Sized,
{
    match server.state.as_str() {
        "stopped" => return Ok(()),
        "started" => {
            log::info!("stopping server {}", server.uuid);
            cloud.stop_server(&server.uuid)?;
        }
        _ => {}
    }
    waiter.wait_for_state(cloud, &server.uuid, "stopped").map(|_| ())
}

/// Creates, starts, stops or destroys a server according to the desired
/// state.
pub fn run<C>(
    cloud: &mut C,
    args: &ServerArgs,
    waiter: &Waiter,
) -> Result<ServerOutcome, Failure>
where
    C: CloudApi + ?Sized,
{
    let found = find_server(cloud, args.uuid.as_deref(), args.hostname.as_deref())?;

    match args.state {
        ServerState::Present => {
            let (server, changed) = match found {
                Some(server) => {
                    let changed = server.state != "started";
                    (server, changed)
                }
                None => {
                    let req = server_request(cloud, args)?;
                    log::info!("creating server {} in {}", req.hostname, req.zone);
                    (cloud.create_server(&req)?, true)
                }
            };
            let server = ensure_started(cloud, server, waiter).with_changed(changed)?;
            Ok(ServerOutcome {
                changed,
                msg: None,
                public_ip: server.public_ip("IPv4").map(|s| s.to_string()),
                server: Some(server),
            })
        }
        ServerState::Stopped => match found {
            Some(server) if server.state == "started" => {
                ensure_stopped(cloud, &server, waiter).with_changed(true)?;
                Ok(ServerOutcome {
                    changed: true,
                    msg: Some(format!("stopped {}", server.hostname)),
                    server: None,
                    public_ip: None,
                })
            }
            Some(server) => Ok(ServerOutcome {
                changed: false,
                msg: Some(format!("server {} is {}", server.hostname, server.state)),
                server: None,
                public_ip: None,
            }),
            None => Ok(ServerOutcome {
                changed: false,
                msg: Some("server absent (didn't exist in the first place)".to_string()),
                server: None,
                public_ip: None,
            }),
        },
        ServerState::Absent => match found {
            Some(server) => {
                let stopping = server.state != "stopped";
                ensure_stopped(cloud, &server, waiter).with_changed(stopping)?;
                log::info!("destroying server {}", server.uuid);
                cloud.destroy_server(&server.uuid).with_changed(stopping)?;
                Ok(ServerOutcome {
                    changed: true,
                    msg: Some(format!("destroyed {}", server.hostname)),
                    server: None,
                    public_ip: None,
                })
            }
            None => Ok(ServerOutcome {
                changed: false,
                msg: Some("server absent (didn't exist in the first place)".to_string()),
                server: None,
                public_ip: None,
            }),
        },
    }
}
