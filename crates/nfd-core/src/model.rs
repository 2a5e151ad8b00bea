use crate::error::{NfdError, Result};
use crate::filter::NicFilter;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

/// A VM as handed over by the host driver framework
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmDescriptor {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub nics: Vec<Nic>,
}

/// One network interface record of a VM
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Nic {
    #[serde(alias = "nic_id", deserialize_with = "string_or_number")]
    pub id: String,
    /// Host-side tap device
    #[serde(alias = "tap", alias = "target")]
    pub device: String,
    pub mac: String,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub network_address: Option<String>,
    #[serde(default)]
    pub network_mask: Option<String>,
    #[serde(default)]
    pub gateway: Option<String>,
    #[serde(default, alias = "nameservers")]
    pub dns: Option<String>,
    /// NIC asks for nfdhcpd-managed DHCP
    #[serde(default, alias = "nfdhcpd")]
    pub managed_dhcp: bool,
    /// NIC is being hot-plugged (or unplugged) by the current event
    #[serde(default)]
    pub attach: bool,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl VmDescriptor {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let vm: Self =
            serde_yaml::from_str(yaml).map_err(|e| NfdError::Descriptor(e.to_string()))?;
        vm.check_ids()?;
        Ok(vm)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let vm: Self =
            serde_json::from_str(json).map_err(|e| NfdError::Descriptor(e.to_string()))?;
        vm.check_ids()?;
        Ok(vm)
    }

    /// Load from a `.json`, `.yaml` or `.yml` file, or stdin when `path` is `-`
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = if path == Path::new("-") {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .map_err(|e| NfdError::io(path, e))?;
            buf
        } else {
            std::fs::read_to_string(path).map_err(|e| NfdError::io(path, e))?
        };

        match path.extension().and_then(|s| s.to_str()) {
            Some("json") => Self::from_json(&content),
            // YAML is a superset of JSON, so stdin takes this path too
            _ => Self::from_yaml(&content),
        }
    }

    /// Hostname handed to nfdhcpd, `one-<vm id>`
    pub fn hostname(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.id)
    }

    /// NIC being hot-plugged by this event, if one is flagged and selected
    pub fn attaching_nic_id(&self, filter: &NicFilter) -> Option<&str> {
        self.nics
            .iter()
            .find(|nic| nic.attach && filter.matches(nic))
            .map(|nic| nic.id.as_str())
    }

    /// NICs this run must touch, in descriptor order.
    ///
    /// An explicit `target` wins; otherwise a NIC flagged as attaching
    /// restricts the run to itself, and a full VM event selects every NIC
    /// the filter accepts.
    pub fn eligible_nics<'a>(
        &'a self,
        filter: &NicFilter,
        target: Option<&'a str>,
    ) -> Vec<&'a Nic> {
        let target = target.or_else(|| self.attaching_nic_id(filter));

        self.nics
            .iter()
            .filter(|nic| filter.matches(nic))
            .filter(|nic| target.is_none_or(|id| id == nic.id))
            .collect()
    }

    fn check_ids(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(NfdError::Descriptor("VM id is empty".into()));
        }
        for nic in &self.nics {
            if nic.id.trim().is_empty() {
                return Err(NfdError::Descriptor(format!(
                    "VM {} has a NIC without id",
                    self.id
                )));
            }
        }
        Ok(())
    }
}

impl Nic {
    /// Attribute lookup used by `KEY=VALUE` filters.
    ///
    /// Typed fields are visible under their upper-case template names so
    /// that `NFDHCPD=YES` keeps working next to free-form attributes.
    pub fn attribute(&self, key: &str) -> Option<String> {
        let flag = |b: bool| if b { "YES" } else { "NO" }.to_string();

        match key.to_ascii_uppercase().as_str() {
            "NIC_ID" => Some(self.id.clone()),
            "TARGET" => Some(self.device.clone()),
            "MAC" => Some(self.mac.clone()),
            "IP" => self.ip.clone(),
            "NFDHCPD" => Some(flag(self.managed_dhcp)),
            "ATTACH" => Some(flag(self.attach)),
            _ => self
                .attributes
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v.clone()),
        }
    }
}

/// Template ids show up both quoted and bare
fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(u64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Number(n) => n.to_string(),
    })
}
