// SPDX-FileCopyrightText: 2025 Maciej Borzecki <maciek.borzecki@gmail.com>
//
// SPDX-License-Identifier: MIT

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde_json::{Map, Value};

use crate::cloud::{scalar_to_string, FirewallRule};
use crate::error::Error;

/// Fields of a firewall rule which can be matched on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RuleField {
    Position,
    Direction,
    Family,
    Protocol,
    IcmpType,
    SourceAddressStart,
    SourceAddressEnd,
    SourcePortStart,
    SourcePortEnd,
    DestinationAddressStart,
    DestinationAddressEnd,
    DestinationPortStart,
    DestinationPortEnd,
    Action,
    Comment,
}

const ALL_FIELDS: [RuleField; 15] = [
    RuleField::Position,
    RuleField::Direction,
    RuleField::Family,
    RuleField::Protocol,
    RuleField::IcmpType,
    RuleField::SourceAddressStart,
    RuleField::SourceAddressEnd,
    RuleField::SourcePortStart,
    RuleField::SourcePortEnd,
    RuleField::DestinationAddressStart,
    RuleField::DestinationAddressEnd,
    RuleField::DestinationPortStart,
    RuleField::DestinationPortEnd,
    RuleField::Action,
    RuleField::Comment,
];

impl RuleField {
    pub fn name(&self) -> &'static str {
        match self {
            RuleField::Position => "position",
            RuleField::Direction => "direction",
            RuleField::Family => "family",
            RuleField::Protocol => "protocol",
            RuleField::IcmpType => "icmp_type",
            RuleField::SourceAddressStart => "source_address_start",
            RuleField::SourceAddressEnd => "source_address_end",
            RuleField::SourcePortStart => "source_port_start",
            RuleField::SourcePortEnd => "source_port_end",
            RuleField::DestinationAddressStart => "destination_address_start",
            RuleField::DestinationAddressEnd => "destination_address_end",
            RuleField::DestinationPortStart => "destination_port_start",
            RuleField::DestinationPortEnd => "destination_port_end",
            RuleField::Action => "action",
            RuleField::Comment => "comment",
        }
    }

    /// Returns the string value of the field in a rule, if set.
    pub fn get(&self, rule: &FirewallRule) -> Option<String> {
        let v = match self {
            RuleField::Position => return Some(rule.position.to_string()),
            RuleField::Direction => &rule.direction,
            RuleField::Family => &rule.family,
            RuleField::Protocol => &rule.protocol,
            RuleField::IcmpType => &rule.icmp_type,
            RuleField::SourceAddressStart => &rule.source_address_start,
            RuleField::SourceAddressEnd => &rule.source_address_end,
            RuleField::SourcePortStart => &rule.source_port_start,
            RuleField::SourcePortEnd => &rule.source_port_end,
            RuleField::DestinationAddressStart => &rule.destination_address_start,
            RuleField::DestinationAddressEnd => &rule.destination_address_end,
            RuleField::DestinationPortStart => &rule.destination_port_start,
            RuleField::DestinationPortEnd => &rule.destination_port_end,
            RuleField::Action => &rule.action,
            RuleField::Comment => &rule.comment,
        };
        v.clone()
    }
}

impl FromStr for RuleField {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ALL_FIELDS
            .iter()
            .find(|f| f.name() == s)
            .copied()
            .ok_or_else(|| Error::InvalidArguments(format!("unknown firewall rule field \"{}\"", s)))
    }
}

impl fmt::Display for RuleField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A partial firewall rule. Fields not present act as wildcards.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RuleCandidate {
    fields: BTreeMap<RuleField, String>,
}

impl RuleCandidate {
    #[cfg(test)]
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn with(mut self, field: RuleField, value: impl Into<String>) -> Self {
        self.fields.insert(field, value.into());
        self
    }

    /// Builds a candidate from a JSON object, normalizing values to strings.
    /// Null values are left out.
    pub fn from_json(obj: &Map<String, Value>) -> Result<Self, Error> {
        let mut fields = BTreeMap::new();
        for (k, v) in obj.iter() {
            let field = k.parse::<RuleField>()?;
            if let Some(s) = scalar_to_string(v) {
                fields.insert(field, s);
            }
        }
        Ok(RuleCandidate { fields })
    }

    /// Returns the candidate in the shape expected when creating a rule.
    pub fn to_json(&self) -> Map<String, Value> {
        self.fields
            .iter()
            .map(|(f, v)| (f.name().to_string(), Value::String(v.clone())))
            .collect()
    }

    /// True when every field set in the candidate is set to the same value
    /// in the rule.
    pub fn matches(&self, rule: &FirewallRule) -> bool {
        self.fields
            .iter()
            .all(|(field, want)| field.get(rule).as_deref() == Some(want.as_str()))
    }
}

impl fmt::Display for RuleCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .fields
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        write!(f, "{{{}}}", parts.join(", "))
    }
}

/// Returns the position of the first rule matching the candidate.
pub fn find_match(candidate: &RuleCandidate, existing: &[FirewallRule]) -> Option<u32> {
    existing
        .iter()
        .find(|rule| candidate.matches(rule))
        .map(|rule| rule.position)
}
