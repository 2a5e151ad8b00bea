use nfd_binding::{BindingFile, remove_binding};
use nfd_core::{
    CommandBatch, CommandRunner, DriverConfig, DryRunRunner, HostLock, Nic, NfdError,
    NicValidator, Result, VmDescriptor,
};
use nfd_ipt::{IptCommand, RuleStore, TableSnapshot};
use serde::Serialize;

/// Outcome of a successful activation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActivationReport {
    /// The global chain had to be created by this run
    pub bootstrapped: bool,
    pub activated: Vec<String>,
    /// NICs whose chain survived an interrupted earlier run and was rebuilt
    pub rebuilt: Vec<String>,
}

/// Outcome of a deactivation in which every NIC converged
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeactivationReport {
    pub deactivated: Vec<String>,
    pub links_removed: usize,
    pub chains_removed: usize,
    pub bindings_removed: usize,
}

/// Installs and removes the per-NIC nfdhcpd chains and binding files.
///
/// Both entry points hold the host lock for their whole body and start
/// from a fresh `-S` snapshot, so they are safe to rerun after a crash or
/// against state changed behind our back.
pub struct NfdhcpdDriver<R> {
    config: DriverConfig,
    runner: R,
    dry_run: bool,
}

impl<R: CommandRunner> NfdhcpdDriver<R> {
    pub fn new(config: DriverConfig, runner: R) -> Self {
        Self {
            config,
            runner,
            dry_run: false,
        }
    }

    /// Query for real, only log mutations and file writes
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub(crate) fn store(&self) -> RuleStore<&R> {
        RuleStore::new(&self.runner, &self.config.iptables_bin, &self.config.table)
    }

    fn batch(&self, commands: impl IntoIterator<Item = IptCommand>) -> CommandBatch {
        let mut batch = CommandBatch::new();
        batch.extend(
            commands
                .into_iter()
                .map(|c| c.to_command(&self.config.iptables_bin, &self.config.table)),
        );
        batch
    }

    fn run_batch(&self, batch: &CommandBatch) -> Result<String> {
        if self.dry_run {
            batch.run(&DryRunRunner::new(&self.runner))
        } else {
            batch.run(&self.runner)
        }
    }

    pub fn activate(&self, vm: &VmDescriptor, target: Option<&str>) -> Result<ActivationReport> {
        let nics = vm.eligible_nics(&self.config.nic_filter, target);
        self.check_nics(vm, &nics)?;

        let _lock = HostLock::acquire(&self.config.lock_path)?;
        let snapshot = self.store().snapshot()?;
        let mut report = ActivationReport::default();

        let bootstrap = self.bootstrap_commands(&snapshot);
        if !bootstrap.is_empty() {
            tracing::info!(
                "Bootstrapping global chain {} in table {}",
                self.config.global_chain,
                self.config.table
            );
            self.run_batch(&self.batch(bootstrap))?;
            report.bootstrapped = !snapshot.chains.contains(&self.config.global_chain);
        }

        let hostname = vm.hostname(&self.config.hostname_prefix);
        for nic in nics {
            tracing::info!("Activating nfdhcpd on VM {} NIC {} ({})", vm.id, nic.id, nic.device);

            let binding = BindingFile::for_nic(&hostname, nic, self.config.mtu);
            let binding_path = self.config.binding_path(&vm.id, &nic.id);
            if self.dry_run {
                tracing::info!("[DRY RUN] Would write binding file {}", binding_path.display());
            } else {
                binding.save(&binding_path)?;
            }

            let chain = self.config.chain_name(&vm.id, &nic.id);
            if snapshot.chains.contains(&chain) {
                tracing::warn!("Chain {} left by an earlier run, rebuilding it", chain);
                report.rebuilt.push(nic.id.clone());
            }

            self.run_batch(&self.batch(self.activation_commands(&snapshot, &chain, nic)))?;
            report.activated.push(nic.id.clone());
        }

        Ok(report)
    }

    pub fn deactivate(
        &self,
        vm: &VmDescriptor,
        target: Option<&str>,
    ) -> Result<DeactivationReport> {
        let _lock = HostLock::acquire(&self.config.lock_path)?;
        let snapshot = self.store().snapshot()?;
        let mut report = DeactivationReport::default();
        let mut failures = Vec::new();

        for nic in vm.eligible_nics(&self.config.nic_filter, target) {
            tracing::info!("Deactivating nfdhcpd on VM {} NIC {} ({})", vm.id, nic.id, nic.device);

            let chain = self.config.chain_name(&vm.id, &nic.id);
            let commands = self.deactivation_commands(&snapshot, &chain);
            let links = commands
                .iter()
                .filter(|c| matches!(c, IptCommand::Delete { .. }))
                .count();
            let chain_present = snapshot.chains.contains(&chain);
            let mut converged = true;

            match self.run_batch(&self.batch(commands)) {
                Ok(_) => {
                    report.links_removed += links;
                    report.chains_removed += usize::from(chain_present);
                }
                Err(e) => {
                    tracing::warn!("Cleanup of {} failed: {}", chain, e);
                    failures.push(e);
                    converged = false;
                }
            }

            let binding_path = self.config.binding_path(&vm.id, &nic.id);
            if self.dry_run {
                tracing::info!("[DRY RUN] Would delete binding file {}", binding_path.display());
            } else {
                match remove_binding(&binding_path) {
                    Ok(removed) => report.bindings_removed += usize::from(removed),
                    Err(e) => {
                        tracing::warn!("{}", e);
                        failures.push(e);
                        converged = false;
                    }
                }
            }

            if converged {
                report.deactivated.push(nic.id.clone());
            }
        }

        if failures.is_empty() {
            Ok(report)
        } else {
            Err(NfdError::Deactivation { failures })
        }
    }

    /// Whatever part of the global chain setup is missing from `snapshot`:
    /// the chain, the jump from the entry hook, and the trailing ACCEPT
    pub fn bootstrap_commands(&self, snapshot: &TableSnapshot) -> Vec<IptCommand> {
        let global = self.config.global_chain.as_str();
        let mut commands = Vec::new();

        if !snapshot.chains.contains(global) {
            commands.push(IptCommand::NewChain {
                chain: global.to_string(),
            });
        }

        if !self.entry_linked(snapshot) {
            commands.push(IptCommand::jump(&self.config.entry_hook, global));
        }

        let has_accept = snapshot
            .rules
            .in_chain(global)
            .iter()
            .any(|r| r.references_chain("ACCEPT") && r.matches.is_empty());
        if !has_accept {
            commands.push(IptCommand::jump(global, "ACCEPT"));
        }

        commands
    }

    /// The entry hook sends all traffic to the global chain through an
    /// unconditional jump
    pub fn entry_linked(&self, snapshot: &TableSnapshot) -> bool {
        snapshot
            .rules
            .in_chain(&self.config.entry_hook)
            .iter()
            .any(|r| r.references_chain(&self.config.global_chain) && r.matches.is_empty())
    }

    /// Create (or rebuild) `chain` for `nic` and link it from the global chain
    pub fn activation_commands(
        &self,
        snapshot: &TableSnapshot,
        chain: &str,
        nic: &Nic,
    ) -> Vec<IptCommand> {
        let global = self.config.global_chain.as_str();
        let mut commands = Vec::new();

        if snapshot.chains.contains(chain) {
            commands.extend(self.unlink_commands(snapshot, chain));
            commands.push(IptCommand::Flush {
                chain: chain.to_string(),
            });
        } else {
            commands.push(IptCommand::NewChain {
                chain: chain.to_string(),
            });
        }

        commands.push(IptCommand::dhcp_redirect(
            chain,
            &nic.device,
            self.config.queue_num,
        ));
        commands.push(IptCommand::link(global, &nic.device, chain));
        commands
    }

    /// Unlink, flush and delete `chain`; empty when nothing is left
    pub fn deactivation_commands(&self, snapshot: &TableSnapshot, chain: &str) -> Vec<IptCommand> {
        let mut commands = self.unlink_commands(snapshot, chain);

        if snapshot.chains.contains(chain) {
            commands.push(IptCommand::Flush {
                chain: chain.to_string(),
            });
            commands.push(IptCommand::DeleteChain {
                chain: chain.to_string(),
            });
        }

        commands
    }

    /// Delete every linking rule for `chain`, replayed as listed
    fn unlink_commands(&self, snapshot: &TableSnapshot, chain: &str) -> Vec<IptCommand> {
        snapshot
            .rules
            .in_chain(&self.config.global_chain)
            .linking_to(chain, self.config.loose_link_match)
            .into_iter()
            .map(|rule| IptCommand::Delete {
                chain: rule.chain.clone(),
                spec: rule.spec_args(),
            })
            .collect()
    }

    /// Only the NICs of this run are checked, so a broken sibling never
    /// blocks a single-NIC attach
    fn check_nics(&self, vm: &VmDescriptor, nics: &[&Nic]) -> Result<()> {
        let findings = NicValidator::new(nics.iter().copied()).validate();
        let mut errors = Vec::new();

        for finding in findings {
            if finding.is_error() {
                errors.push(finding.to_string());
            } else {
                tracing::warn!("VM {}: {}", vm.id, finding);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(NfdError::Descriptor(errors.join("; ")))
        }
    }
}
