use crate::error::{NfdError, Result};
use crate::filter::NicFilter;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/nfdhcpd/vnm.yaml";

/// Driver settings. Every field falls back to the stock OpenNebula values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DriverConfig {
    /// iptables table holding every chain this driver owns
    pub table: String,
    pub global_chain: String,
    /// Built-in chain the global chain hangs off
    pub entry_hook: String,
    pub chain_prefix: String,
    pub chain_suffix: String,
    /// NFQUEUE number nfdhcpd listens on
    pub queue_num: u16,
    pub mtu: u16,
    pub hostname_prefix: String,
    pub datapath: PathBuf,
    pub lock_path: PathBuf,
    pub iptables_bin: String,
    pub nic_filter: NicFilter,
    /// Match linking rules by substring of the raw rule text instead of
    /// the jump target
    pub loose_link_match: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            table: "mangle".into(),
            global_chain: "opennebula".into(),
            entry_hook: "PREROUTING".into(),
            chain_prefix: "one".into(),
            chain_suffix: "nfdhcpd".into(),
            queue_num: 42,
            mtu: 1450,
            hostname_prefix: "one".into(),
            datapath: PathBuf::from("/var/lib/opennebula-nfdhcpd"),
            lock_path: PathBuf::from("/var/lock/one/.nfdhcpd.lock"),
            iptables_bin: "iptables".into(),
            nic_filter: NicFilter::Managed,
            loose_link_match: false,
        }
    }
}

impl DriverConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self =
            serde_yaml::from_str(yaml).map_err(|e| NfdError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| NfdError::io(path, e))?;
        Self::from_yaml(&content)
    }

    /// Explicit path, else the system config if present, else defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_PATH);
                if default_path.exists() {
                    Self::from_file(default_path)
                } else {
                    tracing::debug!("no config at {}, using defaults", DEFAULT_CONFIG_PATH);
                    Ok(Self::default())
                }
            }
        }
    }

    /// `<prefix>-<vm>-<nic>-<suffix>`
    pub fn chain_name(&self, vm_id: &str, nic_id: &str) -> String {
        format!(
            "{}-{}-{}-{}",
            self.chain_prefix, vm_id, nic_id, self.chain_suffix
        )
    }

    /// Inverse of [`chain_name`](Self::chain_name): `(vm, nic)` for chains
    /// this driver owns, `None` for anything else in the table
    pub fn parse_chain_name<'a>(&self, chain: &'a str) -> Option<(&'a str, &'a str)> {
        let ids = chain
            .strip_prefix(self.chain_prefix.as_str())?
            .strip_prefix('-')?
            .strip_suffix(self.chain_suffix.as_str())?
            .strip_suffix('-')?;
        let (vm, nic) = ids.rsplit_once('-')?;
        (!vm.is_empty() && !nic.is_empty()).then_some((vm, nic))
    }

    /// `<datapath>/<hostname>-<nic>`
    pub fn binding_path(&self, vm_id: &str, nic_id: &str) -> PathBuf {
        self.datapath
            .join(format!("{}-{}-{}", self.hostname_prefix, vm_id, nic_id))
    }

    fn validate(&self) -> Result<()> {
        let names = [
            ("table", &self.table),
            ("global_chain", &self.global_chain),
            ("entry_hook", &self.entry_hook),
            ("chain_prefix", &self.chain_prefix),
            ("chain_suffix", &self.chain_suffix),
            ("iptables_bin", &self.iptables_bin),
        ];
        for (field, value) in names {
            if value.is_empty() || value.chars().any(char::is_whitespace) {
                return Err(NfdError::Config(format!(
                    "{} must be a non-empty word, got '{}'",
                    field, value
                )));
            }
        }

        // iptables caps chain names at 28 characters
        if self.global_chain.len() > 28 {
            return Err(NfdError::Config(format!(
                "global_chain '{}' is longer than 28 characters",
                self.global_chain
            )));
        }

        Ok(())
    }
}
