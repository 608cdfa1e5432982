// SPDX-FileCopyrightText: 2025 Maciej Borzecki <maciek.borzecki@gmail.com>
//
// SPDX-License-Identifier: MIT

//! In-memory cloud used by tests.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::cloud::{
    ApiError, CloudApi, FirewallRule, IpAddress, ServerDetail, ServerRequest, ServerSummary,
    StorageDevice, StorageTemplate, Tag,
};

pub struct FakeCloud {
    pub servers: Vec<ServerDetail>,
    pub addresses: Vec<IpAddress>,
    pub catalog: Vec<Tag>,
    pub rules: HashMap<String, Vec<FirewallRule>>,
    pub templates: Vec<StorageTemplate>,
    /// Calls seen so far, as "<operation> <args>".
    pub calls: Vec<String>,
    /// Fail the n-th (1-based) call of an operation.
    pub fail: Option<(&'static str, usize, ApiError)>,
    /// Whether start/stop requests take effect immediately.
    pub instant_transitions: bool,
    created: u32,
}

pub fn remote_error(code: &str) -> ApiError {
    ApiError::Remote {
        code: code.to_string(),
        message: format!("remote says {}", code.to_lowercase()),
    }
}

pub fn server(uuid: &str, hostname: &str, zone: &str, state: &str, tags: &[&str]) -> ServerDetail {
    ServerDetail {
        uuid: uuid.to_string(),
        hostname: hostname.to_string(),
        title: hostname.to_string(),
        zone: zone.to_string(),
        state: state.to_string(),
        tags: tags.iter().map(|t| t.to_string()).collect(),
        ip_addresses: vec![],
        storage_devices: vec![],
        attributes: Map::from_iter([
            ("plan".to_string(), Value::String("1xCPU-1GB".to_string())),
            ("core_number".to_string(), Value::String("1".to_string())),
        ]),
    }
}

pub fn address(addr: &str, access: &str, family: &str, server: Option<&str>) -> IpAddress {
    IpAddress {
        address: addr.to_string(),
        access: access.to_string(),
        family: family.to_string(),
        server: server.map(|s| s.to_string()),
    }
}

pub fn tag(name: &str, servers: &[&str]) -> Tag {
    Tag {
        name: name.to_string(),
        description: None,
        servers: servers.iter().map(|s| s.to_string()).collect(),
    }
}

pub fn rule(position: u32, direction: &str, protocol: &str, port: u32) -> FirewallRule {
    FirewallRule {
        position,
        direction: Some(direction.to_string()),
        family: Some("IPv4".to_string()),
        protocol: Some(protocol.to_string()),
        destination_port_start: Some(port.to_string()),
        destination_port_end: Some(port.to_string()),
        action: Some("accept".to_string()),
        ..Default::default()
    }
}

impl FakeCloud {
    pub fn new() -> Self {
        FakeCloud {
            servers: vec![],
            addresses: vec![],
            catalog: vec![],
            rules: HashMap::new(),
            templates: vec![],
            calls: vec![],
            fail: None,
            instant_transitions: true,
            created: 0,
        }
    }

    /// Two started servers in different zones, each with a public and a
    /// private IPv4 address.
    pub fn with_two_servers() -> Self {
        let mut c = Self::new();
        c.servers = vec![
            server(
                "008c365d-d307-4501-8efc-cd6d3bb0e494",
                "fi.example.com",
                "fi-hel1",
                "started",
                &["web1"],
            ),
            server(
                "009d64ef-31d1-4684-a26b-c86c955cbf46",
                "uk.example.com",
                "uk-lon1",
                "started",
                &[],
            ),
        ];
        c.addresses = vec![
            address(
                "10.1.0.101",
                "public",
                "IPv4",
                Some("008c365d-d307-4501-8efc-cd6d3bb0e494"),
            ),
            address(
                "10.2.0.101",
                "private",
                "IPv4",
                Some("008c365d-d307-4501-8efc-cd6d3bb0e494"),
            ),
            address(
                "10.1.0.102",
                "public",
                "IPv4",
                Some("009d64ef-31d1-4684-a26b-c86c955cbf46"),
            ),
            address("10.1.0.200", "public", "IPv4", None),
        ];
        c.catalog = vec![tag("web1", &["008c365d-d307-4501-8efc-cd6d3bb0e494"])];
        c
    }

    pub fn count(&self, op: &str) -> usize {
        self.calls
            .iter()
            .filter(|c| c.split(' ').next() == Some(op))
            .count()
    }

    fn call(&mut self, op: &'static str, args: &str) -> Result<(), ApiError> {
        if args.is_empty() {
            self.calls.push(op.to_string());
        } else {
            self.calls.push(format!("{} {}", op, args));
        }
        if let Some((fail_op, nth, err)) = &self.fail {
            if *fail_op == op && self.count(op) == *nth {
                return Err(err.clone());
            }
        }
        Ok(())
    }

    fn server_mut(&mut self, uuid: &str) -> Result<&mut ServerDetail, ApiError> {
        self.servers
            .iter_mut()
            .find(|s| s.uuid == uuid)
            .ok_or_else(|| remote_error("SERVER_NOT_FOUND"))
    }
}

impl CloudApi for FakeCloud {
    fn list_servers(&mut self) -> Result<Vec<ServerSummary>, ApiError> {
        self.call("list_servers", "")?;
        Ok(self
            .servers
            .iter()
            .map(|s| ServerSummary {
                uuid: s.uuid.clone(),
                hostname: s.hostname.clone(),
                title: s.title.clone(),
                zone: s.zone.clone(),
                state: s.state.clone(),
                plan: None,
                tags: s.tags.clone(),
            })
            .collect())
    }

    fn get_server(&mut self, uuid: &str) -> Result<ServerDetail, ApiError> {
        self.call("get_server", uuid)?;
        let mut s = self.server_mut(uuid)?.clone();
        s.ip_addresses = self
            .addresses
            .iter()
            .filter(|a| a.server.as_deref() == Some(uuid))
            .cloned()
            .collect();
        Ok(s)
    }

    fn list_addresses(&mut self) -> Result<Vec<IpAddress>, ApiError> {
        self.call("list_addresses", "")?;
        Ok(self.addresses.clone())
    }

    fn list_tags(&mut self) -> Result<Vec<Tag>, ApiError> {
        self.call("list_tags", "")?;
        Ok(self.catalog.clone())
    }

    fn create_tag(&mut self, name: &str) -> Result<Tag, ApiError> {
        self.call("create_tag", name)?;
        if self.catalog.iter().any(|t| t.name == name) {
            return Err(remote_error("TAG_EXISTS"));
        }
        let t = tag(name, &[]);
        self.catalog.push(t.clone());
        Ok(t)
    }

    fn assign_tags(&mut self, uuid: &str, tags: &[String]) -> Result<(), ApiError> {
        self.call("assign_tags", &format!("{} {}", uuid, tags.join(",")))?;
        for t in tags {
            if !self.catalog.iter().any(|c| &c.name == t) {
                return Err(remote_error("TAG_NOT_FOUND"));
            }
        }
        let server = self.server_mut(uuid)?;
        for t in tags {
            if !server.tags.contains(t) {
                server.tags.push(t.clone());
            }
        }
        for c in self.catalog.iter_mut().filter(|c| tags.contains(&c.name)) {
            if !c.servers.iter().any(|s| s == uuid) {
                c.servers.push(uuid.to_string());
            }
        }
        Ok(())
    }

    fn unassign_tags(&mut self, uuid: &str, tags: &[String]) -> Result<(), ApiError> {
        self.call("unassign_tags", &format!("{} {}", uuid, tags.join(",")))?;
        let server = self.server_mut(uuid)?;
        server.tags.retain(|t| !tags.contains(t));
        for c in self.catalog.iter_mut().filter(|c| tags.contains(&c.name)) {
            c.servers.retain(|s| s != uuid);
        }
        Ok(())
    }

    fn list_firewall_rules(&mut self, uuid: &str) -> Result<Vec<FirewallRule>, ApiError> {
        self.call("list_firewall_rules", uuid)?;
        self.server_mut(uuid)?;
        Ok(self.rules.get(uuid).cloned().unwrap_or_default())
    }

    fn create_firewall_rule(
        &mut self,
        uuid: &str,
        fields: &Map<String, Value>,
    ) -> Result<FirewallRule, ApiError> {
        self.call("create_firewall_rule", uuid)?;
        self.server_mut(uuid)?;
        let rules = self.rules.entry(uuid.to_string()).or_default();
        let mut obj = fields.clone();
        obj.insert(
            "position".to_string(),
            Value::from((rules.len() + 1) as u64),
        );
        let rule: FirewallRule = serde_json::from_value(Value::Object(obj))
            .map_err(|e| ApiError::Decode(e.to_string()))?;
        rules.push(rule.clone());
        Ok(rule)
    }

    fn delete_firewall_rule(&mut self, uuid: &str, position: u32) -> Result<(), ApiError> {
        self.call("delete_firewall_rule", &format!("{} {}", uuid, position))?;
        let rules = self.rules.entry(uuid.to_string()).or_default();
        let idx = rules
            .iter()
            .position(|r| r.position == position)
            .ok_or_else(|| remote_error("FIREWALL_RULE_NOT_FOUND"))?;
        rules.remove(idx);
        for (i, r) in rules.iter_mut().enumerate() {
            r.position = (i + 1) as u32;
        }
        Ok(())
    }

    fn create_server(&mut self, req: &ServerRequest) -> Result<ServerDetail, ApiError> {
        self.call("create_server", &req.hostname)?;
        self.created += 1;
        let uuid = format!("00000000-0000-4000-8000-{:012}", self.created);
        let mut s = server(&uuid, &req.hostname, &req.zone, "started", &[]);
        s.title = req.title.clone();
        s.attributes = req.attributes.clone();
        s.storage_devices = req
            .storage_devices
            .iter()
            .enumerate()
            .map(|(i, d)| StorageDevice {
                storage: format!("01000000-0000-4000-8000-{:012}", i),
                storage_title: d.title.clone(),
                storage_size: d.size,
                kind: "disk".to_string(),
                address: format!("virtio:{}", i),
            })
            .collect();
        let ip = address(
            &format!("94.237.0.{}", self.created),
            "public",
            "IPv4",
            Some(&uuid),
        );
        self.addresses.push(ip.clone());
        self.servers.push(s.clone());
        s.ip_addresses = vec![ip];
        Ok(s)
    }

    fn destroy_server(&mut self, uuid: &str) -> Result<(), ApiError> {
        self.call("destroy_server", uuid)?;
        if self.server_mut(uuid)?.state != "stopped" {
            return Err(remote_error("SERVER_STATE_ILLEGAL"));
        }
        self.servers.retain(|s| s.uuid != uuid);
        self.addresses.retain(|a| a.server.as_deref() != Some(uuid));
        Ok(())
    }

    fn start_server(&mut self, uuid: &str) -> Result<(), ApiError> {
        self.call("start_server", uuid)?;
        let instant = self.instant_transitions;
        let s = self.server_mut(uuid)?;
        s.state = if instant { "started" } else { "maintenance" }.to_string();
        Ok(())
    }

    fn stop_server(&mut self, uuid: &str) -> Result<(), ApiError> {
        self.call("stop_server", uuid)?;
        let instant = self.instant_transitions;
        let s = self.server_mut(uuid)?;
        s.state = if instant { "stopped" } else { "maintenance" }.to_string();
        Ok(())
    }

    fn list_templates(&mut self) -> Result<Vec<StorageTemplate>, ApiError> {
        self.call("list_templates", "")?;
        Ok(self.templates.clone())
    }
}
