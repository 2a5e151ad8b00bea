use crate::lifecycle::NfdhcpdDriver;
use nfd_binding::BindingReader;
use nfd_core::{CommandRunner, Result, VmDescriptor};
use nfd_ipt::TableSnapshot;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub table: String,
    pub global_chain: String,
    pub global_chain_present: bool,
    /// The entry hook jumps unconditionally to the global chain
    pub entry_linked: bool,
    pub interfaces: Vec<InterfaceStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceStatus {
    pub vm_id: String,
    pub nic_id: String,
    pub chain: String,
    pub device: Option<String>,
    pub chain_present: bool,
    /// Rules in the global chain jumping to `chain`
    pub links: usize,
    pub redirect_rules: usize,
    pub binding: Option<PathBuf>,
}

impl InterfaceStatus {
    /// Chain, link and binding file are all in place
    pub fn is_active(&self) -> bool {
        self.chain_present && self.links > 0 && self.binding.is_some()
    }

    /// Nothing of this NIC is left on the host
    pub fn is_clean(&self) -> bool {
        !self.chain_present && self.links == 0 && self.binding.is_none()
    }

    fn state(&self) -> &'static str {
        if self.is_active() {
            "active"
        } else if self.is_clean() {
            "inactive"
        } else {
            "partial"
        }
    }
}

impl StatusReport {
    pub fn display(&self) {
        println!("📊 nfdhcpd Status\n");

        println!("🔥 Table {}:", self.table);
        println!(
            "  • global chain {} {}",
            self.global_chain,
            if self.global_chain_present { "present" } else { "missing" }
        );
        println!(
            "  • entry hook {}",
            if self.entry_linked { "linked" } else { "not linked" }
        );

        println!("\n🔌 Interfaces ({}):", self.interfaces.len());
        if self.interfaces.is_empty() {
            println!("  (none)");
            return;
        }

        for iface in &self.interfaces {
            let device = iface
                .device
                .as_ref()
                .map(|d| format!(" ({})", d))
                .unwrap_or_default();
            println!(
                "  • VM {} NIC {}{} [{}]",
                iface.vm_id,
                iface.nic_id,
                device,
                iface.state()
            );
            println!(
                "    Chain: {} - {}, {} link(s), {} redirect rule(s)",
                iface.chain,
                if iface.chain_present { "present" } else { "missing" },
                iface.links,
                iface.redirect_rules
            );
            match &iface.binding {
                Some(path) => println!("    Binding: {}", path.display()),
                None => println!("    Binding: (none)"),
            }
        }
    }
}

impl<R: CommandRunner> NfdhcpdDriver<R> {
    /// Read-only view of what is installed.
    ///
    /// With a VM, every NIC the filter accepts is reported whether or not
    /// anything exists for it. Without one, NICs are discovered from chain
    /// names in the table and binding files in the datapath.
    pub fn status(&self, vm: Option<&VmDescriptor>) -> Result<StatusReport> {
        let config = self.config();
        let snapshot = self.store().snapshot()?;
        let global = config.global_chain.as_str();

        let mut interfaces = BTreeMap::new();
        match vm {
            Some(vm) => {
                for nic in vm.nics.iter().filter(|n| config.nic_filter.matches(n)) {
                    let mut iface = self.inspect(&snapshot, &vm.id, &nic.id);
                    iface.device = Some(nic.device.clone());
                    interfaces.insert((vm.id.clone(), nic.id.clone()), iface);
                }
            }
            None => {
                for chain in snapshot.chains.iter() {
                    if let Some((vm_id, nic_id)) = config.parse_chain_name(chain) {
                        interfaces.insert(
                            (vm_id.to_string(), nic_id.to_string()),
                            self.inspect(&snapshot, vm_id, nic_id),
                        );
                    }
                }

                let prefix = format!("{}-", config.hostname_prefix);
                for stored in BindingReader::new().read_dir(&config.datapath, &prefix)? {
                    let ids = stored
                        .path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .and_then(|n| n.strip_prefix(prefix.as_str()))
                        .and_then(|n| n.rsplit_once('-'));
                    let Some((vm_id, nic_id)) = ids else {
                        continue;
                    };
                    let iface = interfaces
                        .entry((vm_id.to_string(), nic_id.to_string()))
                        .or_insert_with(|| self.inspect(&snapshot, vm_id, nic_id));
                    if iface.device.is_none() && !stored.binding.indev.is_empty() {
                        iface.device = Some(stored.binding.indev.clone());
                    }
                }
            }
        }

        Ok(StatusReport {
            table: snapshot.table.clone(),
            global_chain: global.to_string(),
            global_chain_present: snapshot.chains.contains(global),
            entry_linked: self.entry_linked(&snapshot),
            interfaces: interfaces.into_values().collect(),
        })
    }

    fn inspect(&self, snapshot: &TableSnapshot, vm_id: &str, nic_id: &str) -> InterfaceStatus {
        let config = self.config();
        let chain = config.chain_name(vm_id, nic_id);
        let global_rules = snapshot.rules.in_chain(&config.global_chain);
        let links = global_rules.linking_to(&chain, config.loose_link_match);
        let device = links
            .iter()
            .find_map(|r| r.match_value("--physdev-in"))
            .map(str::to_string);
        let binding = config.binding_path(vm_id, nic_id);

        InterfaceStatus {
            vm_id: vm_id.to_string(),
            nic_id: nic_id.to_string(),
            chain_present: snapshot.chains.contains(&chain),
            links: links.len(),
            redirect_rules: snapshot.rules.in_chain(&chain).len(),
            device,
            binding: binding.is_file().then_some(binding),
            chain,
        }
    }
}
