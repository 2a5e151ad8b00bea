use crate::binding::{BindingFile, DEFAULT_MTU};
use nfd_core::{NfdError, Result};
use std::path::{Path, PathBuf};

/// A binding file found on disk
#[derive(Debug, Clone)]
pub struct StoredBinding {
    pub path: PathBuf,
    pub binding: BindingFile,
}

pub struct BindingReader;

impl BindingReader {
    pub fn new() -> Self {
        Self
    }

    /// Parse `KEY=value` lines. Unknown keys are ignored.
    pub fn parse(&self, content: &str) -> BindingFile {
        let mut binding = BindingFile {
            hostname: String::new(),
            indev: String::new(),
            mac: String::new(),
            ip: String::new(),
            network_address: String::new(),
            network_mask: String::new(),
            gateway: String::new(),
            nameservers: String::new(),
            mtu: DEFAULT_MTU,
        };

        for line in content.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim().to_string();

            match key.trim() {
                "HOSTNAME" => binding.hostname = value,
                "INDEV" => binding.indev = value,
                "MAC" => binding.mac = value,
                "IP" => binding.ip = value,
                "SUBNET" => {
                    let (addr, mask) = value.split_once('/').unwrap_or((value.as_str(), ""));
                    binding.network_address = addr.to_string();
                    binding.network_mask = mask.to_string();
                }
                "GATEWAY" => binding.gateway = value,
                "NAMESERVERS" => binding.nameservers = value,
                "MTU" => binding.mtu = value.parse().unwrap_or(DEFAULT_MTU),
                _ => {}
            }
        }

        binding
    }

    pub fn read(&self, path: &Path) -> Result<BindingFile> {
        let content = std::fs::read_to_string(path).map_err(|e| NfdError::io(path, e))?;
        Ok(self.parse(&content))
    }

    /// Every binding file under `datapath` whose name starts with `prefix`,
    /// sorted by path. A missing directory holds no bindings.
    pub fn read_dir(&self, datapath: &Path, prefix: &str) -> Result<Vec<StoredBinding>> {
        if !datapath.exists() {
            return Ok(vec![]);
        }

        let mut bindings = vec![];
        let entries = std::fs::read_dir(datapath).map_err(|e| NfdError::io(datapath, e))?;

        for entry in entries {
            let entry = entry.map_err(|e| NfdError::io(datapath, e))?;
            let path = entry.path();

            let matches_prefix = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(prefix));
            if !path.is_file() || !matches_prefix {
                continue;
            }

            match self.read(&path) {
                Ok(binding) => bindings.push(StoredBinding { path, binding }),
                Err(e) => tracing::warn!("Skipping unreadable binding file: {}", e),
            }
        }

        bindings.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(bindings)
    }
}

impl Default for BindingReader {
    fn default() -> Self {
        Self::new()
    }
}
