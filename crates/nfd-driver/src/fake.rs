//! In-memory stand-in for `iptables` on a single table.
//!
//! Mirrors the behaviors the driver depends on: `-S` listing order,
//! duplicate/missing chain errors, exact-match `-D`, and `-X` refusing
//! chains that are non-empty or still referenced. `--dport bootps` is
//! stored the way the kernel lists it back (`-m udp --dport 67`).

use nfd_core::{Command, CommandOutput, CommandRunner, Result};
use std::cell::RefCell;

const BUILTINS: [&str; 5] = ["PREROUTING", "INPUT", "FORWARD", "OUTPUT", "POSTROUTING"];
const TARGETS: [&str; 5] = ["ACCEPT", "DROP", "RETURN", "NFQUEUE", "MARK"];

type Predicate = Box<dyn Fn(&str) -> bool>;

#[derive(Default)]
pub struct FakeIptables {
    /// (chain, rules) in creation order, builtins first
    chains: RefCell<Vec<(String, Vec<Vec<String>>)>>,
    /// Mutations issued, as `<op> <chain> <spec>`
    log: RefCell<Vec<String>>,
    fail_on: RefCell<Option<Predicate>>,
}

impl FakeIptables {
    pub fn new() -> Self {
        let fake = Self::default();
        fake.chains.replace(
            BUILTINS
                .iter()
                .map(|b| (b.to_string(), Vec::new()))
                .collect(),
        );
        fake
    }

    /// Table with the global chain already set up
    pub fn bootstrapped(global: &str) -> Self {
        let fake = Self::new();
        fake.apply(&["-N", global]);
        fake.apply(&["-A", "PREROUTING", "-j", global]);
        fake.apply(&["-A", global, "-j", "ACCEPT"]);
        fake.log.borrow_mut().clear();
        fake
    }

    /// Run an operation directly, bypassing failure injection
    pub fn apply(&self, args: &[&str]) -> CommandOutput {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        self.execute(&args)
    }

    /// Fail every mutation whose `<op> <chain> <spec>` text satisfies `pred`
    pub fn fail_when(&self, pred: impl Fn(&str) -> bool + 'static) {
        self.fail_on.replace(Some(Box::new(pred)));
    }

    pub fn clear_failures(&self) {
        self.fail_on.replace(None);
    }

    pub fn mutations(&self) -> Vec<String> {
        self.log.borrow().clone()
    }

    pub fn clear_log(&self) {
        self.log.borrow_mut().clear();
    }

    pub fn user_chains(&self) -> Vec<String> {
        self.chains
            .borrow()
            .iter()
            .map(|(name, _)| name.clone())
            .filter(|name| !BUILTINS.contains(&name.as_str()))
            .collect()
    }

    pub fn rules(&self, chain: &str) -> Vec<String> {
        self.chains
            .borrow()
            .iter()
            .find(|(name, _)| name == chain)
            .map(|(_, rules)| rules.iter().map(|r| r.join(" ")).collect())
            .unwrap_or_default()
    }

    pub fn dump(&self) -> String {
        let chains = self.chains.borrow();
        let mut out = String::new();

        for (name, _) in chains.iter().filter(|(n, _)| BUILTINS.contains(&n.as_str())) {
            out.push_str(&format!("-P {} ACCEPT\n", name));
        }
        for (name, _) in chains.iter().filter(|(n, _)| !BUILTINS.contains(&n.as_str())) {
            out.push_str(&format!("-N {}\n", name));
        }
        for (name, rules) in chains.iter() {
            for rule in rules {
                out.push_str(&format!("-A {} {}\n", name, rule.join(" ")));
            }
        }
        out
    }

    fn execute(&self, args: &[String]) -> CommandOutput {
        let Some((op, rest)) = args.split_first() else {
            return CommandOutput::failed(2, "no command specified");
        };

        if op == "-S" {
            return CommandOutput::ok(self.dump());
        }

        let Some((chain, spec)) = rest.split_first() else {
            return CommandOutput::failed(2, "option requires an argument");
        };
        let spec = normalize(spec);
        let mut chains = self.chains.borrow_mut();
        let position = chains.iter().position(|(name, _)| name == chain);

        match (op.as_str(), position) {
            ("-N", Some(_)) => CommandOutput::failed(1, "iptables: Chain already exists.\n"),
            ("-N", None) => {
                chains.push((chain.clone(), Vec::new()));
                CommandOutput::ok("")
            }
            (_, None) => {
                CommandOutput::failed(1, "iptables: No chain/target/match by that name.\n")
            }
            ("-A" | "-I", Some(idx)) => {
                let target = target_of(&spec);
                let known = target.is_none_or(|t| {
                    TARGETS.contains(&t) || chains.iter().any(|(name, _)| name == t)
                });
                if !known {
                    return CommandOutput::failed(
                        2,
                        "iptables v1.8.9 (legacy): Couldn't load target\n",
                    );
                }
                if op == "-A" {
                    chains[idx].1.push(spec);
                } else {
                    chains[idx].1.insert(0, spec);
                }
                CommandOutput::ok("")
            }
            ("-D", Some(idx)) => match chains[idx].1.iter().position(|r| *r == spec) {
                Some(rule) => {
                    chains[idx].1.remove(rule);
                    CommandOutput::ok("")
                }
                None => CommandOutput::failed(
                    1,
                    "iptables: Bad rule (does a matching rule exist in that chain?).\n",
                ),
            },
            ("-F", Some(idx)) => {
                chains[idx].1.clear();
                CommandOutput::ok("")
            }
            ("-X", Some(idx)) => {
                if BUILTINS.contains(&chain.as_str()) {
                    return CommandOutput::failed(2, "iptables: Invalid argument.\n");
                }
                if !chains[idx].1.is_empty() {
                    return CommandOutput::failed(1, "iptables: Directory not empty.\n");
                }
                let referenced = chains
                    .iter()
                    .flat_map(|(_, rules)| rules.iter())
                    .any(|r| target_of(r) == Some(chain.as_str()));
                if referenced {
                    return CommandOutput::failed(1, "iptables: Too many links.\n");
                }
                chains.remove(idx);
                CommandOutput::ok("")
            }
            _ => CommandOutput::failed(2, "unknown option"),
        }
    }
}

impl CommandRunner for FakeIptables {
    fn run(&self, command: &Command) -> Result<CommandOutput> {
        // every call is `<bin> -t <table> <op> ...`
        let args = command.args.get(2..).unwrap_or_default();

        if command.is_mutation() {
            let text = args.join(" ");
            self.log.borrow_mut().push(text.clone());
            if let Some(pred) = self.fail_on.borrow().as_ref() {
                if pred(&text) {
                    return Ok(CommandOutput::failed(1, format!("injected failure: {}\n", text)));
                }
            }
        }

        Ok(self.execute(args))
    }
}

fn target_of(spec: &[String]) -> Option<&str> {
    spec.iter()
        .position(|a| a == "-j" || a == "-g")
        .and_then(|idx| spec.get(idx + 1))
        .map(String::as_str)
}

fn normalize(spec: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(spec.len() + 2);
    let mut iter = spec.iter().peekable();

    while let Some(arg) = iter.next() {
        if arg == "--dport" && out.last().is_some_and(|p: &String| p == "udp") {
            out.push("-m".to_string());
            out.push("udp".to_string());
            out.push(arg.clone());
            if let Some(port) = iter.next() {
                out.push(if port == "bootps" { "67".to_string() } else { port.clone() });
            }
            continue;
        }
        out.push(arg.clone());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_matches_iptables_layout() {
        let fake = FakeIptables::bootstrapped("opennebula");
        fake.apply(&["-N", "one-1-0-nfdhcpd"]);
        fake.apply(&[
            "-A",
            "one-1-0-nfdhcpd",
            "-m",
            "physdev",
            "--physdev-in",
            "tap0",
            "-p",
            "udp",
            "--dport",
            "bootps",
            "-j",
            "NFQUEUE",
            "--queue-num",
            "42",
        ]);

        let dump = fake.dump();
        assert!(dump.starts_with("-P PREROUTING ACCEPT\n"));
        assert!(dump.contains("-N opennebula\n-N one-1-0-nfdhcpd\n"));
        assert!(dump.contains(
            "-A one-1-0-nfdhcpd -m physdev --physdev-in tap0 -p udp -m udp --dport 67 -j NFQUEUE --queue-num 42\n"
        ));
    }

    #[test]
    fn delete_chain_guards() {
        let fake = FakeIptables::bootstrapped("opennebula");
        assert!(!fake.apply(&["-X", "opennebula"]).success);
        assert!(!fake.apply(&["-X", "missing"]).success);
        assert!(!fake.apply(&["-N", "opennebula"]).success);
        assert!(!fake.apply(&["-A", "opennebula", "-j", "nowhere"]).success);
    }
}
