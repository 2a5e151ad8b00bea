use nfd_core::Command;
use std::fmt;

/// A single iptables operation against one table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IptCommand {
    NewChain { chain: String },
    Append { chain: String, spec: Vec<String> },
    /// Insert at the head of the chain
    Insert { chain: String, spec: Vec<String> },
    /// Delete the rule whose spec matches exactly
    Delete { chain: String, spec: Vec<String> },
    Flush { chain: String },
    DeleteChain { chain: String },
    /// `-S`, every rule of the table in save format
    Dump,
}

impl IptCommand {
    /// Jump from `from` to `to`
    pub fn jump(from: &str, to: &str) -> Self {
        Self::Append {
            chain: from.to_string(),
            spec: words(&["-j", to]),
        }
    }

    /// Divert DHCP requests entering through `device` to an NFQUEUE
    pub fn dhcp_redirect(chain: &str, device: &str, queue_num: u16) -> Self {
        let queue = queue_num.to_string();
        Self::Append {
            chain: chain.to_string(),
            spec: words(&[
                "-m",
                "physdev",
                "--physdev-in",
                device,
                "-p",
                "udp",
                "--dport",
                "bootps",
                "-j",
                "NFQUEUE",
                "--queue-num",
                queue.as_str(),
            ]),
        }
    }

    /// Send traffic from `device` into its dedicated chain, ahead of every
    /// other rule in `global`
    pub fn link(global: &str, device: &str, chain: &str) -> Self {
        Self::Insert {
            chain: global.to_string(),
            spec: words(&["-m", "physdev", "--physdev-in", device, "-j", chain]),
        }
    }

    pub fn is_query(&self) -> bool {
        matches!(self, Self::Dump)
    }

    fn args(&self) -> Vec<String> {
        let (op, chain, spec): (&str, Option<&str>, &[String]) = match self {
            Self::NewChain { chain } => ("-N", Some(chain.as_str()), &[]),
            Self::Append { chain, spec } => ("-A", Some(chain.as_str()), spec.as_slice()),
            Self::Insert { chain, spec } => ("-I", Some(chain.as_str()), spec.as_slice()),
            Self::Delete { chain, spec } => ("-D", Some(chain.as_str()), spec.as_slice()),
            Self::Flush { chain } => ("-F", Some(chain.as_str()), &[]),
            Self::DeleteChain { chain } => ("-X", Some(chain.as_str()), &[]),
            Self::Dump => ("-S", None, &[]),
        };

        let mut args = vec![op.to_string()];
        args.extend(chain.map(str::to_string));
        args.extend(spec.iter().cloned());
        args
    }

    /// Executable form: `<bin> -t <table> <op> [chain] [spec...]`
    pub fn to_command(&self, iptables_bin: &str, table: &str) -> Command {
        let mut args = vec!["-t".to_string(), table.to_string()];
        args.extend(self.args());

        if self.is_query() {
            Command::query(iptables_bin, args)
        } else {
            Command::mutation(iptables_bin, args)
        }
    }
}

impl fmt::Display for IptCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.args().join(" "))
    }
}

fn words(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
