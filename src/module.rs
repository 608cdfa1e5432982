// SPDX-FileCopyrightText: 2025 Maciej Borzecki <maciek.borzecki@gmail.com>
//
// SPDX-License-Identifier: MIT

//! Ansible module calling convention: arguments come in as a JSON object,
//! the result goes out as a JSON object on stdout.

use std::io;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::cloud::CloudApi;
use crate::error::{Error, Failure};
use crate::firewall;
use crate::matcher::RuleCandidate;
use crate::resolve::Selector;
use crate::server::{self, ServerArgs, Waiter};
use crate::tags;

/// Modules provided by this tool.
#[derive(Debug, Clone, Copy, PartialEq, clap::ValueEnum)]
pub enum ModuleKind {
    /// Create, stop or destroy servers.
    Server,
    /// Add or remove server tags.
    Tag,
    /// Add or remove server firewall rules.
    Firewall,
}

/// Desired state of tags or firewall rules.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    #[default]
    Present,
    Absent,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TagArgs {
    #[serde(default)]
    pub state: Presence,
    #[serde(default, alias = "UPCLOUD_API_USER")]
    pub api_user: Option<String>,
    #[serde(default, alias = "UPCLOUD_API_PASSWD")]
    pub api_passwd: Option<String>,
    #[serde(default, alias = "id")]
    pub uuid: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(deserialize_with = "de::string_list")]
    pub tags: Vec<String>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FirewallArgs {
    #[serde(default)]
    pub state: Presence,
    #[serde(default, alias = "UPCLOUD_API_USER")]
    pub api_user: Option<String>,
    #[serde(default, alias = "UPCLOUD_API_PASSWD")]
    pub api_passwd: Option<String>,
    #[serde(default, alias = "id")]
    pub uuid: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
    pub firewall_rules: Vec<Map<String, Value>>,
}

/// Parsed module invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum Invocation {
    Server(ServerArgs),
    Tag(TagArgs),
    Firewall(FirewallArgs),
}

/// Reads module arguments. Arguments wrapped in ANSIBLE_MODULE_ARGS are
/// unwrapped, and internal _ansible_ keys are dropped.
pub fn read_args<R>(r: R) -> Result<Map<String, Value>, Error>
where
    R: io::Read,
{
    let v: Value = serde_json::from_reader(r)
        .map_err(|e| Error::InvalidArguments(format!("cannot parse module arguments: {}", e)))?;
    let Value::Object(mut obj) = v else {
        return Err(Error::InvalidArguments(
            "module arguments must be a JSON object".to_string(),
        ));
    };
    if let Some(Value::Object(inner)) = obj.remove("ANSIBLE_MODULE_ARGS") {
        obj = inner;
    }
    Ok(obj
        .into_iter()
        .filter(|(k, _)| !k.starts_with("_ansible_"))
        .collect())
}

fn parse<T>(raw: Map<String, Value>) -> Result<T, Error>
where
    T: DeserializeOwned,
{
    serde_json::from_value(Value::Object(raw)).map_err(|e| Error::InvalidArguments(e.to_string()))
}

impl Invocation {
    pub fn parse(kind: ModuleKind, raw: Map<String, Value>) -> Result<Invocation, Error> {
        let inv = match kind {
            ModuleKind::Server => {
                let args: ServerArgs = parse(raw)?;
                args.validate()?;
                Invocation::Server(args)
            }
            ModuleKind::Tag => Invocation::Tag(parse(raw)?),
            ModuleKind::Firewall => Invocation::Firewall(parse(raw)?),
        };
        Ok(inv)
    }

    /// Credentials given as module arguments, if any.
    pub fn credentials(&self) -> (Option<&str>, Option<&str>) {
        let (user, passwd) = match self {
            Invocation::Server(a) => (&a.api_user, &a.api_passwd),
            Invocation::Tag(a) => (&a.api_user, &a.api_passwd),
            Invocation::Firewall(a) => (&a.api_user, &a.api_passwd),
        };
        (user.as_deref(), passwd.as_deref())
    }

    /// Runs the module, returning the result object.
    pub fn run<C>(&self, cloud: &mut C, waiter: &Waiter) -> Result<Map<String, Value>, Failure>
    where
        C: CloudApi + ?Sized,
    {
        match self {
            Invocation::Server(args) => {
                let outcome = server::run(cloud, args, waiter)?;
                let mut res = Map::new();
                res.insert("changed".to_string(), json!(outcome.changed));
                if let Some(msg) = outcome.msg {
                    res.insert("msg".to_string(), json!(msg));
                }
                if let Some(server) = outcome.server {
                    res.insert("server".to_string(), json!(server));
                }
                if let Some(ip) = outcome.public_ip {
                    res.insert("public_ip".to_string(), json!(ip));
                }
                Ok(res)
            }
            Invocation::Tag(args) => {
                let selector = Selector::from_options(
                    args.uuid.as_deref(),
                    args.hostname.as_deref(),
                    args.ip_address.as_deref(),
                )?;
                let outcome = match args.state {
                    Presence::Present => tags::ensure_present(cloud, &selector, &args.tags)?,
                    Presence::Absent => tags::ensure_absent(cloud, &selector, &args.tags)?,
                };
                Ok(Map::from_iter([
                    ("changed".to_string(), json!(outcome.changed)),
                    ("uuid".to_string(), json!(outcome.uuid)),
                    ("tags".to_string(), json!(outcome.tags)),
                ]))
            }
            Invocation::Firewall(args) => {
                let selector = Selector::from_options(
                    args.uuid.as_deref(),
                    args.hostname.as_deref(),
                    args.ip_address.as_deref(),
                )?;
                let candidates = args
                    .firewall_rules
                    .iter()
                    .map(RuleCandidate::from_json)
                    .collect::<Result<Vec<_>, _>>()?;
                let outcome = match args.state {
                    Presence::Present => firewall::ensure_present(cloud, &selector, &candidates)?,
                    Presence::Absent => firewall::ensure_absent(cloud, &selector, &candidates)?,
                };
                Ok(Map::from_iter([
                    ("changed".to_string(), json!(outcome.changed)),
                    ("uuid".to_string(), json!(outcome.uuid)),
                    ("firewall_rules".to_string(), json!(outcome.rules)),
                ]))
            }
        }
    }
}

/// Result object reported for a failed module run.
pub fn failure_result(failure: &Failure) -> Value {
    json!({
        "failed": true,
        "changed": failure.changed,
        "msg": failure.error.to_string(),
    })
}

/// Lenient deserializers for values which Ansible may pass either typed or
/// as strings.
pub(crate) mod de {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    use crate::cloud::scalar_to_string;

    pub fn opt_bool<'de, D>(d: D) -> Result<Option<bool>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<Value>::deserialize(d)? {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(b)),
            Some(v) => match scalar_to_string(&v).unwrap_or_default().to_lowercase().as_str() {
                "yes" | "true" | "on" | "1" => Ok(Some(true)),
                "no" | "false" | "off" | "0" => Ok(Some(false)),
                _ => Err(serde::de::Error::custom(format!("invalid boolean {}", v))),
            },
        }
    }

    pub fn opt_u32<'de, D>(d: D) -> Result<Option<u32>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<Value>::deserialize(d)?.as_ref().and_then(scalar_to_string) {
            None => Ok(None),
            Some(s) => s
                .trim()
                .parse::<u32>()
                .map(Some)
                .map_err(|_| serde::de::Error::custom(format!("invalid integer \"{}\"", s))),
        }
    }

    pub fn u64_value<'de, D>(d: D) -> Result<u64, D::Error>
    where
        D: Deserializer<'de>,
    {
        let v = Value::deserialize(d)?;
        scalar_to_string(&v)
            .and_then(|s| s.trim().parse::<u64>().ok())
            .ok_or_else(|| serde::de::Error::custom(format!("invalid integer {}", v)))
    }

    pub fn opt_string<'de, D>(d: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<Value>::deserialize(d)?
            .as_ref()
            .and_then(scalar_to_string))
    }

    /// Accepts a list of scalars or a comma separated string.
    pub fn string_list<'de, D>(d: D) -> Result<Vec<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Value::deserialize(d)? {
            Value::String(s) => Ok(s
                .split(',')
                .map(|p| p.trim())
                .filter(|p| !p.is_empty())
                .map(|p| p.to_string())
                .collect()),
            Value::Array(items) => items
                .iter()
                .map(|v| match v {
                    Value::Array(_) | Value::Object(_) | Value::Null => Err(
                        serde::de::Error::custom(format!("invalid list element {}", v)),
                    ),
                    v => Ok(scalar_to_string(v).unwrap_or_default()),
                })
                .collect(),
            v => Err(serde::de::Error::custom(format!("expected a list, got {}", v))),
        }
    }
}
