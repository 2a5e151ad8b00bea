use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use nfd_binding::BindingFile;
use nfd_core::{DriverConfig, NfdError, SystemRunner, VmDescriptor};
use nfd_driver::NfdhcpdDriver;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nfdctl")]
#[command(version, about = "nfdhcpd chain and binding manager", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install DHCP redirection for a VM's NICs
    Activate(LifecycleArgs),
    /// Remove DHCP redirection for a VM's NICs
    Deactivate(LifecycleArgs),
    /// Show installed chains and binding files
    Status {
        /// Restrict the report to this VM
        #[arg(long)]
        vm: Option<PathBuf>,
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the binding file a NIC would get
    Render {
        #[arg(long)]
        vm: PathBuf,
        #[arg(long)]
        nic: String,
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[derive(Args)]
struct LifecycleArgs {
    /// VM descriptor (YAML or JSON), `-` for stdin
    #[arg(long)]
    vm: PathBuf,
    /// Only touch this NIC
    #[arg(long)]
    nic: Option<String>,
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Log mutations instead of running them
    #[arg(long)]
    dry_run: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Activate(args) => activate(args)?,
        Commands::Deactivate(args) => deactivate(args)?,
        Commands::Status { vm, config, json } => {
            show_status(vm.as_deref(), config.as_deref(), json)?
        }
        Commands::Render { vm, nic, config } => render(&vm, &nic, config.as_deref())?,
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<DriverConfig> {
    DriverConfig::load(path).context("Failed to load driver configuration")
}

fn load_vm(path: &Path) -> anyhow::Result<VmDescriptor> {
    VmDescriptor::from_file(path)
        .with_context(|| format!("Failed to load VM descriptor from {}", path.display()))
}

fn driver(config: DriverConfig, dry_run: bool) -> NfdhcpdDriver<SystemRunner> {
    NfdhcpdDriver::new(config, SystemRunner).dry_run(dry_run)
}

fn activate(args: LifecycleArgs) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref())?;
    let vm = load_vm(&args.vm)?;

    let report = driver(config, args.dry_run)
        .activate(&vm, args.nic.as_deref())
        .with_context(|| format!("Activation of VM {} failed", vm.id))?;

    if report.activated.is_empty() {
        tracing::info!("VM {}: no NIC selected for nfdhcpd", vm.id);
    } else {
        tracing::info!(
            "VM {}: activated NIC(s) {}",
            vm.id,
            report.activated.join(", ")
        );
    }
    Ok(())
}

fn deactivate(args: LifecycleArgs) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref())?;
    let vm = load_vm(&args.vm)?;

    match driver(config, args.dry_run).deactivate(&vm, args.nic.as_deref()) {
        Ok(report) => {
            tracing::info!(
                "VM {}: deactivated {} NIC(s), removed {} link(s), {} chain(s), {} binding file(s)",
                vm.id,
                report.deactivated.len(),
                report.links_removed,
                report.chains_removed,
                report.bindings_removed
            );
            Ok(())
        }
        Err(NfdError::Deactivation { failures }) => {
            for failure in &failures {
                tracing::error!("{}", failure);
            }
            anyhow::bail!(
                "Deactivation of VM {} left {} failure(s)",
                vm.id,
                failures.len()
            )
        }
        Err(e) => Err(e).with_context(|| format!("Deactivation of VM {} failed", vm.id)),
    }
}

fn show_status(vm: Option<&Path>, config: Option<&Path>, json: bool) -> anyhow::Result<()> {
    let config = load_config(config)?;
    let vm = vm.map(load_vm).transpose()?;

    let report = driver(config, false)
        .status(vm.as_ref())
        .context("Failed to read iptables state")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        report.display();
    }
    Ok(())
}

fn render(vm: &Path, nic_id: &str, config: Option<&Path>) -> anyhow::Result<()> {
    let config = load_config(config)?;
    let vm = load_vm(vm)?;

    let nic = vm
        .nics
        .iter()
        .find(|n| n.id == nic_id)
        .with_context(|| format!("VM {} has no NIC {}", vm.id, nic_id))?;

    let binding = BindingFile::for_nic(&vm.hostname(&config.hostname_prefix), nic, config.mtu);
    print!("{}", binding.render());
    Ok(())
}
