// SPDX-FileCopyrightText: 2025 Maciej Borzecki <maciek.borzecki@gmail.com>
//
// SPDX-License-Identifier: MIT

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror;

/// Errors reported by the remote API or while talking to it.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    #[error("{code}: {message}")]
    Remote { code: String, message: String },
    #[error("cannot reach API: {0}")]
    Transport(String),
    #[error("cannot decode API response: {0}")]
    Decode(String),
}

impl ApiError {
    /// True when the remote reported a missing resource, eg.
    /// SERVER_NOT_FOUND or IP_ADDRESS_NOT_FOUND.
    pub fn is_not_found(&self) -> bool {
        match self {
            ApiError::Remote { code, .. } => code.ends_with("_NOT_FOUND"),
            _ => false,
        }
    }
}

/// Server as listed by the remote.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerSummary {
    pub uuid: String,
    pub hostname: String,
    pub title: String,
    pub zone: String,
    pub state: String,
    pub plan: Option<String>,
    pub tags: Vec<String>,
}

/// IP address known to the remote, possibly attached to a server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpAddress {
    pub address: String,
    #[serde(default)]
    pub access: String,
    #[serde(default)]
    pub family: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
}

impl IpAddress {
    pub fn is_public(&self) -> bool {
        self.access == "public"
    }
}

/// Storage device attached to a server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageDevice {
    pub storage: String,
    #[serde(default)]
    pub storage_title: String,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub storage_size: u64,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub address: String,
}

/// Full server details. Attributes without a dedicated field are carried in
/// `attributes` verbatim.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerDetail {
    pub uuid: String,
    pub hostname: String,
    pub title: String,
    pub zone: String,
    pub state: String,
    pub tags: Vec<String>,
    pub ip_addresses: Vec<IpAddress>,
    pub storage_devices: Vec<StorageDevice>,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl ServerDetail {
    /// Returns the first public address of a given family, if any.
    pub fn public_ip(&self, family: &str) -> Option<&str> {
        public_ip_of(&self.ip_addresses, family)
    }
}

/// Returns the first public address of a given family, falling back to any
/// public address.
pub fn public_ip_of<'a>(addrs: &'a [IpAddress], family: &str) -> Option<&'a str> {
    addrs
        .iter()
        .filter(|a| a.is_public())
        .find(|a| a.family == family)
        .or_else(|| addrs.iter().find(|a| a.is_public()))
        .map(|a| a.address.as_str())
}

/// Tag from the remote tag catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    pub name: String,
    pub description: Option<String>,
    pub servers: Vec<String>,
}

/// A firewall rule of a server. Positions start at 1 and are renumbered by
/// the remote after every deletion. All other fields are kept as strings.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FirewallRule {
    #[serde(deserialize_with = "lenient_position")]
    pub position: u32,
    #[serde(default, deserialize_with = "lenient_string")]
    pub direction: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub family: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub protocol: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub icmp_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub source_address_start: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub source_address_end: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub source_port_start: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub source_port_end: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub destination_address_start: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub destination_address_end: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub destination_port_start: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub destination_port_end: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub action: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub comment: Option<String>,
}

/// Storage template usable as an OS image.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StorageTemplate {
    pub uuid: String,
    pub title: String,
}

/// Storage device to create along with a server.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageRequest {
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<String>,
    pub title: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
}

/// User created on first boot, with SSH keys.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoginUser {
    pub username: String,
    pub create_password: String,
    pub ssh_keys: Vec<String>,
}

/// Address to request for a new server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpAddressRequest {
    pub access: String,
    pub family: String,
}

/// Everything needed to create a server. Optional attributes not modelled
/// here go into `attributes` and are sent as is.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerRequest {
    pub hostname: String,
    pub title: String,
    pub zone: String,
    pub storage_devices: Vec<StorageRequest>,
    pub ip_addresses: Vec<IpAddressRequest>,
    pub login_user: Option<LoginUser>,
    pub attributes: Map<String, Value>,
}

/// Operations of the remote cloud used by the reconciliation logic.
pub trait CloudApi {
    /// List all servers of the account.
    fn list_servers(&mut self) -> Result<Vec<ServerSummary>, ApiError>;
    /// Get full details of a server.
    fn get_server(&mut self, uuid: &str) -> Result<ServerDetail, ApiError>;
    /// List all IP addresses of the account.
    fn list_addresses(&mut self) -> Result<Vec<IpAddress>, ApiError>;
    /// List the tag catalog.
    fn list_tags(&mut self) -> Result<Vec<Tag>, ApiError>;
    /// Add a tag to the catalog.
    fn create_tag(&mut self, name: &str) -> Result<Tag, ApiError>;
    /// Attach tags to a server.
    fn assign_tags(&mut self, uuid: &str, tags: &[String]) -> Result<(), ApiError>;
    /// Detach tags from a server. The catalog is not touched.
    fn unassign_tags(&mut self, uuid: &str, tags: &[String]) -> Result<(), ApiError>;
    /// List firewall rules of a server, ordered by position.
    fn list_firewall_rules(&mut self, uuid: &str) -> Result<Vec<FirewallRule>, ApiError>;
    /// Create a firewall rule from a set of field values.
    fn create_firewall_rule(
        &mut self,
        uuid: &str,
        fields: &Map<String, Value>,
    ) -> Result<FirewallRule, ApiError>;
    /// Delete the firewall rule at a given position.
    fn delete_firewall_rule(&mut self, uuid: &str, position: u32) -> Result<(), ApiError>;
    /// Create a new server.
    fn create_server(&mut self, req: &ServerRequest) -> Result<ServerDetail, ApiError>;
    /// Destroy a stopped server.
    fn destroy_server(&mut self, uuid: &str) -> Result<(), ApiError>;
    /// Start a stopped server.
    fn start_server(&mut self, uuid: &str) -> Result<(), ApiError>;
    /// Request a soft shutdown of a server.
    fn stop_server(&mut self, uuid: &str) -> Result<(), ApiError>;
    /// List public storage templates.
    fn list_templates(&mut self) -> Result<Vec<StorageTemplate>, ApiError>;
}

/// Normalizes a JSON scalar to its string form. Null yields None.
pub fn scalar_to_string(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

fn lenient_string<'de, D>(d: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<Value>::deserialize(d)?;
    Ok(v.as_ref().and_then(scalar_to_string))
}

fn lenient_position<'de, D>(d: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(d)?;
    scalar_to_string(&v)
        .and_then(|s| s.parse::<u32>().ok())
        .ok_or_else(|| serde::de::Error::custom(format!("invalid rule position {}", v)))
}

fn lenient_u64<'de, D>(d: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(d)?;
    match scalar_to_string(&v) {
        None => Ok(0),
        Some(s) => s
            .parse::<u64>()
            .map_err(|_| serde::de::Error::custom(format!("invalid size {}", v))),
    }
}
