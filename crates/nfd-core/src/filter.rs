use crate::error::NfdError;
use crate::model::Nic;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Selects which NICs of a VM the driver manages.
///
/// Serialized as `managed`, `any` or `KEY=VALUE`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum NicFilter {
    /// NICs with the managed-DHCP flag (`NFDHCPD=YES`)
    #[default]
    Managed,
    Any,
    /// Case-insensitive match of a NIC attribute
    Attribute { key: String, value: String },
}

impl NicFilter {
    pub fn matches(&self, nic: &Nic) -> bool {
        match self {
            Self::Managed => nic.managed_dhcp,
            Self::Any => true,
            Self::Attribute { key, value } => nic
                .attribute(key)
                .is_some_and(|v| v.eq_ignore_ascii_case(value)),
        }
    }
}

impl FromStr for NicFilter {
    type Err = NfdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.to_ascii_lowercase().as_str() {
            "managed" => return Ok(Self::Managed),
            "any" | "all" => return Ok(Self::Any),
            _ => {}
        }

        let (key, value) = s
            .split_once('=')
            .ok_or_else(|| NfdError::Config(format!("invalid NIC filter '{}'", s)))?;
        let (key, value) = (key.trim(), value.trim());
        if key.is_empty() || value.is_empty() {
            return Err(NfdError::Config(format!("invalid NIC filter '{}'", s)));
        }

        Ok(Self::Attribute {
            key: key.to_string(),
            value: value.to_string(),
        })
    }
}

impl TryFrom<String> for NicFilter {
    type Error = NfdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NicFilter> for String {
    fn from(filter: NicFilter) -> Self {
        filter.to_string()
    }
}

impl fmt::Display for NicFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Managed => write!(f, "managed"),
            Self::Any => write!(f, "any"),
            Self::Attribute { key, value } => write!(f, "{}={}", key, value),
        }
    }
}
