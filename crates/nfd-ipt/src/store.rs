use crate::command::IptCommand;
use crate::parser::{ChainSet, RuleSet, TableSnapshot};
use nfd_core::{CommandRunner, NfdError, Result};

/// Read side of the iptables table the driver owns.
///
/// Every call runs a fresh `-S` dump; nothing is cached between calls.
pub struct RuleStore<R> {
    runner: R,
    iptables_bin: String,
    table: String,
}

impl<R: CommandRunner> RuleStore<R> {
    pub fn new(runner: R, iptables_bin: &str, table: &str) -> Self {
        Self {
            runner,
            iptables_bin: iptables_bin.to_string(),
            table: table.to_string(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Raw `-S` output. A table the kernel does not know yet reads as empty.
    pub fn dump(&self) -> Result<String> {
        let command = IptCommand::Dump.to_command(&self.iptables_bin, &self.table);
        tracing::debug!("Querying: {}", command);

        let output = self.runner.run(&command)?;
        if output.success {
            return Ok(output.stdout);
        }

        if output.stderr.contains("Table does not exist") {
            tracing::debug!("table {} does not exist yet", self.table);
            return Ok(String::new());
        }

        Err(NfdError::CommandFailed {
            command: command.to_string(),
            status: output
                .code
                .map(|c| format!("exit status: {}", c))
                .unwrap_or_else(|| "terminated by signal".to_string()),
            output: output.stderr.trim().to_string(),
        })
    }

    /// Chains and rules from a single dump
    pub fn snapshot(&self) -> Result<TableSnapshot> {
        let snapshot = TableSnapshot::parse(&self.table, &self.dump()?);
        tracing::debug!(
            "table {}: {} chains, {} rules",
            self.table,
            snapshot.chains.len(),
            snapshot.rules.len()
        );
        Ok(snapshot)
    }

    /// User-defined chains of the table
    pub fn list_chains(&self) -> Result<ChainSet> {
        Ok(self.snapshot()?.chains)
    }

    /// Rules appended to `chain`, in listing order, raw text preserved
    pub fn list_rules(&self, chain: &str) -> Result<RuleSet> {
        Ok(self.snapshot()?.rules.in_chain(chain))
    }
}
