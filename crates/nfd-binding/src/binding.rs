use nfd_core::{Nic, NfdError, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

pub const DEFAULT_MTU: u16 = 1450;

/// What nfdhcpd needs to answer DHCP requests for one NIC
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingFile {
    pub hostname: String,
    pub indev: String,
    pub mac: String,
    pub ip: String,
    pub network_address: String,
    pub network_mask: String,
    pub gateway: String,
    pub nameservers: String,
    pub mtu: u16,
}

impl BindingFile {
    /// Fields for `nic`; absent addressing renders as empty values
    pub fn for_nic(hostname: &str, nic: &Nic, mtu: u16) -> Self {
        let or_empty = |v: &Option<String>| v.clone().unwrap_or_default();

        Self {
            hostname: hostname.to_string(),
            indev: nic.device.clone(),
            mac: nic.mac.clone(),
            ip: or_empty(&nic.ip),
            network_address: or_empty(&nic.network_address),
            network_mask: or_empty(&nic.network_mask),
            gateway: or_empty(&nic.gateway),
            nameservers: or_empty(&nic.dns),
            mtu,
        }
    }

    /// Key/value pairs in the order nfdhcpd expects
    pub fn entries(&self) -> [(&'static str, String); 8] {
        [
            ("HOSTNAME", self.hostname.clone()),
            ("INDEV", self.indev.clone()),
            ("MAC", self.mac.clone()),
            ("IP", self.ip.clone()),
            (
                "SUBNET",
                format!("{}/{}", self.network_address, self.network_mask),
            ),
            ("GATEWAY", self.gateway.clone()),
            ("NAMESERVERS", self.nameservers.clone()),
            ("MTU", self.mtu.to_string()),
        ]
    }

    /// One `KEY=value` line per entry, each newline-terminated
    pub fn render(&self) -> String {
        let mut content = String::new();
        for (key, value) in self.entries() {
            content.push_str(key);
            content.push('=');
            content.push_str(&value);
            content.push('\n');
        }
        content
    }

    /// Create or truncate `path` and write the rendered file
    pub fn save(&self, path: &Path) -> Result<()> {
        let io_err = |e| NfdError::io(path, e);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let file = File::create(path).map_err(io_err)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(self.render().as_bytes()).map_err(io_err)?;
        writer.flush().map_err(io_err)?;

        tracing::info!("Wrote binding file {}", path.display());
        Ok(())
    }
}

/// Delete a binding file. `Ok(false)` when there was nothing to delete.
pub fn remove_binding(path: &Path) -> Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            tracing::info!("Deleted binding file {}", path.display());
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(NfdError::io(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BindingFile {
        BindingFile {
            hostname: "one-7".into(),
            indev: "tap0".into(),
            mac: "02:00:0a:00:00:01".into(),
            ip: "10.0.0.1".into(),
            network_address: "10.0.0.0".into(),
            network_mask: "255.255.255.0".into(),
            gateway: "10.0.0.254".into(),
            nameservers: "8.8.8.8".into(),
            mtu: DEFAULT_MTU,
        }
    }

    #[test]
    fn renders_fixed_order() {
        assert_eq!(
            sample().render(),
            "HOSTNAME=one-7\n\
             INDEV=tap0\n\
             MAC=02:00:0a:00:00:01\n\
             IP=10.0.0.1\n\
             SUBNET=10.0.0.0/255.255.255.0\n\
             GATEWAY=10.0.0.254\n\
             NAMESERVERS=8.8.8.8\n\
             MTU=1450\n"
        );
    }

    #[test]
    fn missing_addressing_renders_empty_values() {
        let nic = bare_nic();
        let binding = BindingFile::for_nic("one-9", &nic, DEFAULT_MTU);
        let text = binding.render();
        assert!(text.contains("IP=\n"));
        assert!(text.contains("SUBNET=/\n"));
        assert!(text.starts_with("HOSTNAME=one-9\nINDEV=tap4\n"));
    }

    fn bare_nic() -> Nic {
        let yaml = "id: 9\nnics:\n  - {id: 0, device: tap4, mac: \"02:00:00:00:00:09\"}\n";
        nfd_core::VmDescriptor::from_yaml(yaml).unwrap().nics.remove(0)
    }

    #[test]
    fn save_overwrites_and_remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("one-7-0");

        std::fs::write(&path, "STALE=1\n".repeat(64)).unwrap();
        sample().save(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), sample().render());

        assert!(remove_binding(&path).unwrap());
        assert!(!path.exists());
        assert!(!remove_binding(&path).unwrap());
    }

    #[test]
    fn save_creates_datapath() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("opennebula-nfdhcpd").join("one-7-0");
        sample().save(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn save_reports_io_errors() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "").unwrap();

        let err = sample().save(&blocker.join("one-7-0")).unwrap_err();
        assert!(matches!(err, NfdError::Io { .. }));
    }
}
