// SPDX-FileCopyrightText: 2025 Maciej Borzecki <maciek.borzecki@gmail.com>
//
// SPDX-License-Identifier: MIT

use std::fmt;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use thiserror;

use crate::cloud::{
    ApiError, CloudApi, FirewallRule, IpAddress, ServerDetail, ServerRequest, ServerSummary,
    StorageTemplate, Tag,
};
use crate::config::Credentials;

pub const API_BASE_URL: &str = "https://api.upcloud.com/1.3";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Method {
    Get,
    Post,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Delete => "DELETE",
        })
    }
}

/// Request to the API, with a path relative to the API base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
}

impl ApiRequest {
    fn get(path: String) -> Self {
        ApiRequest {
            method: Method::Get,
            path,
            body: None,
        }
    }

    fn post(path: String, body: Option<Value>) -> Self {
        ApiRequest {
            method: Method::Post,
            path,
            body,
        }
    }

    fn delete(path: String) -> Self {
        ApiRequest {
            method: Method::Delete,
            path,
            body: None,
        }
    }
}

/// Wraps API transport errors.
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("cannot send request: {0}")]
    Request(reqwest::Error),
    #[error("API returned status {status}, {code}: {message}")]
    Status {
        status: u16,
        code: String,
        message: String,
    },
}

impl From<TransportError> for ApiError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Status { code, message, .. } => ApiError::Remote { code, message },
            TransportError::Request(e) => ApiError::Transport(e.to_string()),
        }
    }
}

/// A way to send requests to the API.
pub trait Transport {
    /// Sends a request returning the response body.
    fn send(&mut self, req: ApiRequest) -> Result<Vec<u8>, TransportError>;
}

mod wire {
    use serde::Deserialize;
    use serde_json::{Map, Value};

    use crate::cloud;

    #[derive(Deserialize, Debug, Default)]
    pub struct TagNames {
        #[serde(default)]
        pub tag: Vec<String>,
    }

    #[derive(Deserialize, Debug)]
    pub struct Server {
        pub uuid: String,
        #[serde(default)]
        pub hostname: String,
        #[serde(default)]
        pub title: String,
        #[serde(default)]
        pub zone: String,
        #[serde(default)]
        pub state: String,
        pub plan: Option<String>,
        #[serde(default)]
        pub tags: TagNames,
    }

    #[derive(Deserialize, Debug)]
    pub struct ServerList {
        #[serde(default)]
        pub server: Vec<Server>,
    }

    #[derive(Deserialize, Debug)]
    pub struct ServerListResponse {
        pub servers: ServerList,
    }

    #[derive(Deserialize, Debug, Default)]
    pub struct IpAddressList {
        #[serde(default)]
        pub ip_address: Vec<cloud::IpAddress>,
    }

    #[derive(Deserialize, Debug)]
    pub struct IpAddressListResponse {
        pub ip_addresses: IpAddressList,
    }

    #[derive(Deserialize, Debug, Default)]
    pub struct StorageDeviceList {
        #[serde(default)]
        pub storage_device: Vec<cloud::StorageDevice>,
    }

    #[derive(Deserialize, Debug)]
    pub struct ServerDetail {
        pub uuid: String,
        #[serde(default)]
        pub hostname: String,
        #[serde(default)]
        pub title: String,
        #[serde(default)]
        pub zone: String,
        #[serde(default)]
        pub state: String,
        #[serde(default)]
        pub tags: TagNames,
        #[serde(default)]
        pub ip_addresses: IpAddressList,
        #[serde(default)]
        pub storage_devices: StorageDeviceList,
        #[serde(flatten)]
        pub attributes: Map<String, Value>,
    }

    #[derive(Deserialize, Debug)]
    pub struct ServerDetailResponse {
        pub server: ServerDetail,
    }

    #[derive(Deserialize, Debug, Default)]
    pub struct ServerUuids {
        #[serde(default)]
        pub server: Vec<String>,
    }

    #[derive(Deserialize, Debug)]
    pub struct Tag {
        pub name: String,
        pub description: Option<String>,
        #[serde(default)]
        pub servers: ServerUuids,
    }

    #[derive(Deserialize, Debug)]
    pub struct TagList {
        #[serde(default)]
        pub tag: Vec<Tag>,
    }

    #[derive(Deserialize, Debug)]
    pub struct TagListResponse {
        pub tags: TagList,
    }

    #[derive(Deserialize, Debug)]
    pub struct TagResponse {
        pub tag: Tag,
    }

    #[derive(Deserialize, Debug)]
    pub struct FirewallRuleList {
        #[serde(default)]
        pub firewall_rule: Vec<cloud::FirewallRule>,
    }

    #[derive(Deserialize, Debug)]
    pub struct FirewallRuleListResponse {
        pub firewall_rules: FirewallRuleList,
    }

    #[derive(Deserialize, Debug)]
    pub struct FirewallRuleResponse {
        pub firewall_rule: cloud::FirewallRule,
    }

    #[derive(Deserialize, Debug)]
    pub struct TemplateList {
        #[serde(default)]
        pub storage: Vec<cloud::StorageTemplate>,
    }

    #[derive(Deserialize, Debug)]
    pub struct TemplateListResponse {
        pub storages: TemplateList,
    }

    #[derive(Deserialize, Debug)]
    pub struct ErrorBody {
        pub error_code: String,
        pub error_message: String,
    }

    #[derive(Deserialize, Debug)]
    pub struct ErrorResponse {
        pub error: ErrorBody,
    }
}

impl From<wire::Tag> for Tag {
    fn from(t: wire::Tag) -> Self {
        Tag {
            name: t.name,
            description: t.description,
            servers: t.servers.server,
        }
    }
}

impl From<wire::ServerDetail> for ServerDetail {
    fn from(s: wire::ServerDetail) -> Self {
        ServerDetail {
            uuid: s.uuid,
            hostname: s.hostname,
            title: s.title,
            zone: s.zone,
            state: s.state,
            tags: s.tags.tag,
            ip_addresses: s.ip_addresses.ip_address,
            storage_devices: s.storage_devices.storage_device,
            attributes: s.attributes,
        }
    }
}

/// Converts an error response body to an error, falling back to the HTTP
/// status when the body cannot be parsed.
fn status_error(status: u16, body: &[u8]) -> TransportError {
    match serde_json::from_slice::<wire::ErrorResponse>(body) {
        Ok(resp) => TransportError::Status {
            status,
            code: resp.error.error_code,
            message: resp.error.error_message,
        },
        Err(_) => TransportError::Status {
            status,
            code: format!("HTTP_{}", status),
            message: String::from_utf8_lossy(body).trim().to_string(),
        },
    }
}

/// Sends requests to the UpCloud API over HTTPS.
pub struct HttpTransport {
    client: reqwest::blocking::Client,
    base_url: String,
    credentials: Credentials,
}

impl HttpTransport {
    pub fn new(credentials: Credentials, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("upcloud-ansible/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(TransportError::Request)?;
        Ok(HttpTransport {
            client,
            base_url: API_BASE_URL.to_string(),
            credentials,
        })
    }
}

impl Transport for HttpTransport {
    fn send(&mut self, req: ApiRequest) -> Result<Vec<u8>, TransportError> {
        let url = format!("{}{}", self.base_url, req.path);
        log::trace!("{} {}", req.method, url);

        let mut builder = match req.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
            Method::Delete => self.client.delete(&url),
        };
        builder = builder
            .basic_auth(&self.credentials.user, Some(&self.credentials.password))
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(body) = req.body.as_ref() {
            builder = builder.json(body);
        }

        let resp = builder.send().map_err(TransportError::Request)?;
        let status = resp.status();
        let body = resp.bytes().map_err(TransportError::Request)?;
        log::trace!("status {}, {} bytes", status, body.len());

        if !status.is_success() {
            return Err(status_error(status.as_u16(), &body));
        }
        Ok(body.to_vec())
    }
}

/// UpCloud API client.
pub struct UpCloudClient<T>
where
    T: Transport,
{
    transport: T,
}

impl UpCloudClient<HttpTransport> {
    /// Returns a client talking to the API with given credentials.
    pub fn connect(credentials: Credentials, timeout: Duration) -> Result<Self, ApiError> {
        Ok(UpCloudClient::new(HttpTransport::new(credentials, timeout)?))
    }
}

impl<T> UpCloudClient<T>
where
    T: Transport,
{
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    // Consume self and return the underlying transport. Only useful for tests
    // to inspect recorded requests.
    #[cfg(test)]
    fn test_into_transport(self) -> T {
        self.transport
    }

    fn call<R>(&mut self, req: ApiRequest) -> Result<R, ApiError>
    where
        R: DeserializeOwned,
    {
        let what = format!("{} {}", req.method, req.path);
        let output = self.transport.send(req)?;
        serde_json::from_slice::<R>(&output).map_err(|e| {
            ApiError::Decode(format!(
                "{}: {}: '{}'",
                what,
                e,
                String::from_utf8_lossy(&output)
            ))
        })
    }

    fn exec(&mut self, req: ApiRequest) -> Result<(), ApiError> {
        self.transport.send(req).map(|_| ()).map_err(ApiError::from)
    }
}

/// Path of a tag or untag request. Tags share a single comma separated
/// segment, each segment is percent-encoded.
fn tag_path(uuid: &str, action: &str, tags: &[String]) -> Result<String, ApiError> {
    if let Some(bad) = tags.iter().find(|t| t.is_empty() || t.contains(',')) {
        return Err(ApiError::Transport(format!("invalid tag name \"{}\"", bad)));
    }
    let joined = tags.join(",");
    let mut url =
        reqwest::Url::parse(API_BASE_URL).map_err(|e| ApiError::Transport(e.to_string()))?;
    url.path_segments_mut()
        .map_err(|_| ApiError::Transport(format!("cannot build path on {}", API_BASE_URL)))?
        .clear()
        .extend(["server", uuid, action, joined.as_str()]);
    Ok(url.path().to_string())
}

fn server_request_body(req: &ServerRequest) -> Value {
    let mut server = req.attributes.clone();
    server.insert("hostname".to_string(), Value::String(req.hostname.clone()));
    server.insert("title".to_string(), Value::String(req.title.clone()));
    server.insert("zone".to_string(), Value::String(req.zone.clone()));
    server.insert(
        "storage_devices".to_string(),
        json!({ "storage_device": req.storage_devices }),
    );
    if !req.ip_addresses.is_empty() {
        server.insert(
            "ip_addresses".to_string(),
            json!({ "ip_address": req.ip_addresses }),
        );
    }
    if let Some(user) = req.login_user.as_ref() {
        server.insert(
            "login_user".to_string(),
            json!({
                "username": user.username,
                "create_password": user.create_password,
                "ssh_keys": { "ssh_key": user.ssh_keys },
            }),
        );
    }
    json!({ "server": server })
}

impl<T> CloudApi for UpCloudClient<T>
where
    T: Transport,
{
    fn list_servers(&mut self) -> Result<Vec<ServerSummary>, ApiError> {
        let resp: wire::ServerListResponse = self.call(ApiRequest::get("/server".to_string()))?;
        Ok(resp
            .servers
            .server
            .into_iter()
            .map(|s| ServerSummary {
                uuid: s.uuid,
                hostname: s.hostname,
                title: s.title,
                zone: s.zone,
                state: s.state,
                plan: s.plan,
                tags: s.tags.tag,
            })
            .collect())
    }

    fn get_server(&mut self, uuid: &str) -> Result<ServerDetail, ApiError> {
        let resp: wire::ServerDetailResponse =
            self.call(ApiRequest::get(format!("/server/{}", uuid)))?;
        Ok(resp.server.into())
    }

    fn list_addresses(&mut self) -> Result<Vec<IpAddress>, ApiError> {
        let resp: wire::IpAddressListResponse =
            self.call(ApiRequest::get("/ip_address".to_string()))?;
        Ok(resp.ip_addresses.ip_address)
    }

    fn list_tags(&mut self) -> Result<Vec<Tag>, ApiError> {
        let resp: wire::TagListResponse = self.call(ApiRequest::get("/tag".to_string()))?;
        Ok(resp.tags.tag.into_iter().map(Tag::from).collect())
    }

    fn create_tag(&mut self, name: &str) -> Result<Tag, ApiError> {
        let resp: wire::TagResponse = self.call(ApiRequest::post(
            "/tag".to_string(),
            Some(json!({ "tag": { "name": name } })),
        ))?;
        Ok(resp.tag.into())
    }

    fn assign_tags(&mut self, uuid: &str, tags: &[String]) -> Result<(), ApiError> {
        self.exec(ApiRequest::post(tag_path(uuid, "tag", tags)?, None))
    }

    fn unassign_tags(&mut self, uuid: &str, tags: &[String]) -> Result<(), ApiError> {
        self.exec(ApiRequest::post(tag_path(uuid, "untag", tags)?, None))
    }

    fn list_firewall_rules(&mut self, uuid: &str) -> Result<Vec<FirewallRule>, ApiError> {
        let resp: wire::FirewallRuleListResponse =
            self.call(ApiRequest::get(format!("/server/{}/firewall_rule", uuid)))?;
        Ok(resp.firewall_rules.firewall_rule)
    }

    fn create_firewall_rule(
        &mut self,
        uuid: &str,
        fields: &Map<String, Value>,
    ) -> Result<FirewallRule, ApiError> {
        let resp: wire::FirewallRuleResponse = self.call(ApiRequest::post(
            format!("/server/{}/firewall_rule", uuid),
            Some(json!({ "firewall_rule": fields })),
        ))?;
        Ok(resp.firewall_rule)
    }

    fn delete_firewall_rule(&mut self, uuid: &str, position: u32) -> Result<(), ApiError> {
        self.exec(ApiRequest::delete(format!(
            "/server/{}/firewall_rule/{}",
            uuid, position
        )))
    }

    fn create_server(&mut self, req: &ServerRequest) -> Result<ServerDetail, ApiError> {
        let resp: wire::ServerDetailResponse = self.call(ApiRequest::post(
            "/server".to_string(),
            Some(server_request_body(req)),
        ))?;
        Ok(resp.server.into())
    }

    fn destroy_server(&mut self, uuid: &str) -> Result<(), ApiError> {
        self.exec(ApiRequest::delete(format!("/server/{}", uuid)))
    }

    fn start_server(&mut self, uuid: &str) -> Result<(), ApiError> {
        self.exec(ApiRequest::post(format!("/server/{}/start", uuid), None))
    }

    fn stop_server(&mut self, uuid: &str) -> Result<(), ApiError> {
        self.exec(ApiRequest::post(
            format!("/server/{}/stop", uuid),
            Some(json!({ "stop_server": { "stop_type": "soft", "timeout": "60" } })),
        ))
    }

    fn list_templates(&mut self) -> Result<Vec<StorageTemplate>, ApiError> {
        let resp: wire::TemplateListResponse =
            self.call(ApiRequest::get("/storage/template".to_string()))?;
        Ok(resp.storages.storage)
    }
}
