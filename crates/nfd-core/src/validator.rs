use crate::filter::NicFilter;
use crate::model::{Nic, VmDescriptor};
use ipnet::Ipv4Net;
use std::collections::HashSet;
use std::fmt;
use std::net::Ipv4Addr;

/// Linux IFNAMSIZ minus the trailing NUL
const MAX_DEVICE_LEN: usize = 15;

/// Validates the NIC records a run is about to touch, before anything is
/// written. Duplicate devices are detected within that set only.
pub struct NicValidator<'a> {
    nics: Vec<&'a Nic>,
}

impl<'a> NicValidator<'a> {
    pub fn new(nics: impl IntoIterator<Item = &'a Nic>) -> Self {
        Self {
            nics: nics.into_iter().collect(),
        }
    }

    /// Every NIC of `vm` accepted by `filter`
    pub fn for_vm(vm: &'a VmDescriptor, filter: &NicFilter) -> Self {
        Self::new(vm.nics.iter().filter(|n| filter.matches(n)))
    }

    pub fn validate(&self) -> Vec<ValidationWarning> {
        let mut warnings = Vec::new();
        let mut devices = HashSet::new();

        for nic in &self.nics {
            warnings.extend(Self::check_device(nic));
            warnings.extend(Self::check_mac(nic));
            warnings.extend(Self::check_addressing(nic));

            if !nic.device.is_empty() && !devices.insert(nic.device.as_str()) {
                warnings.push(ValidationWarning::DuplicateDevice {
                    device: nic.device.clone(),
                });
            }
        }

        warnings
    }

    fn check_device(nic: &Nic) -> Option<ValidationWarning> {
        let reason = if nic.device.is_empty() {
            "no tap device"
        } else if nic.device.len() > MAX_DEVICE_LEN {
            "device name longer than 15 characters"
        } else if nic.device.chars().any(|c| c.is_whitespace() || c == '/') {
            "device name contains whitespace or '/'"
        } else {
            return None;
        };

        Some(ValidationWarning::InvalidDevice {
            nic: nic.id.clone(),
            device: nic.device.clone(),
            reason: reason.to_string(),
        })
    }

    fn check_mac(nic: &Nic) -> Option<ValidationWarning> {
        let octets: Vec<&str> = nic.mac.split(':').collect();
        let valid = octets.len() == 6
            && octets
                .iter()
                .all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit()));

        (!valid).then(|| ValidationWarning::InvalidMac {
            nic: nic.id.clone(),
            mac: nic.mac.clone(),
        })
    }

    fn check_addressing(nic: &Nic) -> Vec<ValidationWarning> {
        let mut warnings = Vec::new();

        let ip = match nic.ip.as_deref() {
            None => {
                warnings.push(ValidationWarning::MissingAddress {
                    nic: nic.id.clone(),
                });
                None
            }
            Some(raw) => match raw.parse::<Ipv4Addr>() {
                Ok(ip) => Some(ip),
                Err(e) => {
                    warnings.push(ValidationWarning::InvalidAddress {
                        nic: nic.id.clone(),
                        field: "ip",
                        value: raw.to_string(),
                        reason: e.to_string(),
                    });
                    None
                }
            },
        };

        let subnet = match (nic.network_address.as_deref(), nic.network_mask.as_deref()) {
            (Some(addr), Some(mask)) => match parse_subnet(addr, mask) {
                Ok(net) => Some(net),
                Err(reason) => {
                    warnings.push(ValidationWarning::InvalidAddress {
                        nic: nic.id.clone(),
                        field: "subnet",
                        value: format!("{}/{}", addr, mask),
                        reason,
                    });
                    None
                }
            },
            _ => None,
        };

        let gateway = nic.gateway.as_deref().and_then(|raw| match raw.parse::<Ipv4Addr>() {
            Ok(gw) => Some(gw),
            Err(e) => {
                warnings.push(ValidationWarning::InvalidAddress {
                    nic: nic.id.clone(),
                    field: "gateway",
                    value: raw.to_string(),
                    reason: e.to_string(),
                });
                None
            }
        });

        if let Some(net) = subnet {
            if let Some(ip) = ip.filter(|ip| !net.contains(ip)) {
                warnings.push(ValidationWarning::OutsideSubnet {
                    nic: nic.id.clone(),
                    field: "ip",
                    addr: ip,
                    subnet: net,
                });
            }
            if let Some(gw) = gateway.filter(|gw| !net.contains(gw)) {
                warnings.push(ValidationWarning::OutsideSubnet {
                    nic: nic.id.clone(),
                    field: "gateway",
                    addr: gw,
                    subnet: net,
                });
            }
        }

        warnings
    }
}

fn parse_subnet(addr: &str, mask: &str) -> Result<Ipv4Net, String> {
    let addr: Ipv4Addr = addr.parse().map_err(|e| format!("network address: {}", e))?;
    let mask: Ipv4Addr = mask.parse().map_err(|e| format!("network mask: {}", e))?;
    let prefix =
        ipnet::ipv4_mask_to_prefix(mask).map_err(|_| "non-contiguous netmask".to_string())?;
    Ipv4Net::new(addr, prefix)
        .map(|net| net.trunc())
        .map_err(|e| e.to_string())
}

/// Problems found in NIC records
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationWarning {
    InvalidDevice {
        nic: String,
        device: String,
        reason: String,
    },
    DuplicateDevice {
        device: String,
    },
    InvalidMac {
        nic: String,
        mac: String,
    },
    MissingAddress {
        nic: String,
    },
    InvalidAddress {
        nic: String,
        field: &'static str,
        value: String,
        reason: String,
    },
    OutsideSubnet {
        nic: String,
        field: &'static str,
        addr: Ipv4Addr,
        subnet: Ipv4Net,
    },
}

impl ValidationWarning {
    /// Errors block activation; the rest are logged
    pub fn is_error(&self) -> bool {
        match self {
            Self::InvalidDevice { .. } | Self::DuplicateDevice { .. } => true,
            Self::InvalidMac { .. }
            | Self::MissingAddress { .. }
            | Self::InvalidAddress { .. }
            | Self::OutsideSubnet { .. } => false,
        }
    }
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidDevice {
                nic,
                device,
                reason,
            } => write!(f, "NIC {}: invalid device '{}': {}", nic, device, reason),
            Self::DuplicateDevice { device } => {
                write!(f, "device {} is used by more than one NIC", device)
            }
            Self::InvalidMac { nic, mac } => write!(f, "NIC {}: invalid MAC '{}'", nic, mac),
            Self::MissingAddress { nic } => write!(f, "NIC {}: no IPv4 address", nic),
            Self::InvalidAddress {
                nic,
                field,
                value,
                reason,
            } => write!(f, "NIC {}: invalid {} '{}': {}", nic, field, value, reason),
            Self::OutsideSubnet {
                nic,
                field,
                addr,
                subnet,
            } => write!(f, "NIC {}: {} {} is outside {}", nic, field, addr, subnet),
        }
    }
}
