//! Bastion - operator entry point
//!
//! Runs one reconciliation step per invocation: deploy the proxy
//! configuration, reconcile SSH accounts, sync replicas or manage
//! certificates.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use bastion_common::Warnings;
use bastion_config::EngineConfig;
use bastion_engine::{
    CertificateService, CertificateStore, CommandIssuer, DeployOptions, HaproxyBinary,
    JsonModelStore, ModelProvider, OperatorContext, ProxyConfigDeployer, ReplicaSyncFanout,
    SshAccountReconciler, SyncMode, SystemAccountManager, SystemResolver,
};

/// Bastion - HAProxy and SSH bastion reconciliation
#[derive(Parser, Debug)]
#[command(name = "bastion")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(
        short = 'c',
        long = "config",
        env = "BASTION_CONFIG",
        default_value = "/etc/bastion/bastion.kdl"
    )]
    config: PathBuf,

    /// Enable verbose logging (debug level)
    #[arg(long = "verbose", global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate the configuration file and exit
    CheckConfig,
    /// Render, validate and activate the HAProxy configuration
    Deploy {
        /// Keep the previous files in the archive directory
        #[arg(long)]
        archive: bool,
        /// Print line diffs against the previous files
        #[arg(long)]
        diff: bool,
        /// Skip the replica sync afterwards
        #[arg(long)]
        no_sync: bool,
    },
    /// Bring SSH proxy accounts in line with the model
    Accounts {
        /// Skip the replica sync afterwards
        #[arg(long)]
        no_sync: bool,
    },
    /// Push current state to every replica
    Sync,
    /// Inspect and manage certificates
    Certs {
        #[command(subcommand)]
        command: CertCommands,
    },
}

#[derive(Subcommand, Debug)]
enum CertCommands {
    /// List every serving certificate
    List,
    /// List certificates that expire within the given number of days
    Expiring {
        /// Defaults to `expiry-warning-days` from the configuration
        #[arg(long)]
        days: Option<u32>,
    },
    /// Issue a certificate for one domain, or for every LetsEncrypt domain
    /// that has none
    Issue { domain: Option<String> },
    /// Delete the certificate of a domain
    Delete { domain: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = EngineConfig::from_file(&cli.config).context("Failed to load configuration file")?;

    if let Commands::CheckConfig = cli.command {
        return check_config(&cli.config, &config);
    }
    config
        .validate()
        .into_result()
        .context("Configuration validation failed")?;

    let engine = Engine::new(config);
    match cli.command {
        Commands::CheckConfig => Ok(()),
        Commands::Deploy {
            archive,
            diff,
            no_sync,
        } => {
            engine.deploy(DeployOptions { archive, diff })?;
            engine.sync_after(no_sync, cli.verbose)
        }
        Commands::Accounts { no_sync } => {
            engine.accounts()?;
            engine.sync_after(no_sync, cli.verbose)
        }
        Commands::Sync => engine.sync(cli.verbose),
        Commands::Certs { command } => engine.certs(command),
    }
}

/// Validate the configuration and print a summary
fn check_config(path: &std::path::Path, config: &EngineConfig) -> Result<()> {
    let warnings = config
        .validate()
        .into_result()
        .context("Configuration validation failed")?;
    for warning in &warnings {
        warn!("{}", warning.message);
    }

    info!("Configuration test successful:");
    info!("  - role: {:?}", config.instance.role);
    info!("  - {} replica(s)", config.instance.replicas.len());
    info!(
        "  - {} public address(es)",
        config.proxy.public_addresses.len()
    );

    println!(
        "bastion: configuration file {} test is successful",
        path.display()
    );
    Ok(())
}

/// Engine components wired to the real system
struct Engine {
    config: EngineConfig,
    ctx: OperatorContext,
    model: Arc<JsonModelStore>,
    certs: Arc<CertificateStore>,
}

impl Engine {
    fn new(config: EngineConfig) -> Self {
        let user = std::env::var("USER").unwrap_or_else(|_| "root".to_string());
        let model = Arc::new(JsonModelStore::new(&config.paths.model_file));
        let certs = Arc::new(CertificateStore::new(&config.layout(), model.clone()));
        Self {
            ctx: OperatorContext::admin(user),
            config,
            model,
            certs,
        }
    }

    fn deploy(&self, options: DeployOptions) -> Result<()> {
        if let Err(e) = self.certs.warm_in_background() {
            warn!(error = %e, "Could not start certificate cache warm-up");
        }
        let resolver =
            SystemResolver::from_system_conf().context("Failed to read resolver configuration")?;
        let deployer = ProxyConfigDeployer::new(
            self.config.clone(),
            self.certs.clone(),
            Arc::new(HaproxyBinary::new(&self.config.proxy)),
            Arc::new(resolver),
            self.model.clone(),
        );

        let report = deployer.deploy(&self.ctx, options)?;
        print_warnings(&report.warnings);
        if let Some(prefix) = &report.archived_prefix {
            println!("archived previous configuration as {}*", prefix);
        }
        for diff in &report.diffs {
            print!("{}", diff);
        }
        Ok(())
    }

    fn accounts(&self) -> Result<()> {
        let reconciler = SshAccountReconciler::new(
            &self.config,
            Arc::new(SystemAccountManager::new()),
            self.model.clone(),
        );

        let report = reconciler.reconcile(&self.ctx)?;
        print_warnings(&report.warnings);
        println!(
            "{} created, {} updated, {} deleted",
            report.created.len(),
            report.updated.len(),
            report.deleted.len()
        );
        Ok(())
    }

    fn sync_after(&self, no_sync: bool, verbose: bool) -> Result<()> {
        if no_sync {
            return Ok(());
        }
        self.sync(verbose)
    }

    fn sync(&self, verbose: bool) -> Result<()> {
        let fanout = ReplicaSyncFanout::from_config(&self.config);
        if !fanout.is_active() {
            info!("No replicas to sync");
            return Ok(());
        }

        let mode = if verbose {
            SyncMode::Verbose
        } else {
            SyncMode::Quiet
        };
        let runtime = tokio::runtime::Runtime::new()?;
        let report = runtime.block_on(fanout.sync(mode));
        print_warnings(&report.warnings);

        let failed = report.failed().count();
        if failed > 0 {
            bail!(
                "{} of {} replica(s) failed to sync",
                failed,
                report.outcomes.len()
            );
        }
        Ok(())
    }

    fn certs(&self, command: CertCommands) -> Result<()> {
        let mut warnings = Warnings::new();
        match command {
            CertCommands::List => {
                for cert in self.certs.certificates(&mut warnings)? {
                    print_cert(&cert);
                }
            }
            CertCommands::Expiring { days } => {
                let days = days.unwrap_or(self.config.certificates.expiry_warning_days);
                for cert in self.certs.expiring_within(days, &mut warnings)? {
                    print_cert(&cert);
                }
            }
            CertCommands::Issue { domain } => {
                let service = self.service();
                match domain {
                    Some(domain) => {
                        if !service.ensure(&domain)? {
                            bail!("no certificate could be obtained for {}", domain);
                        }
                        println!("certificate in place for {}", domain);
                    }
                    None => {
                        let model: &dyn ModelProvider = self.model.as_ref();
                        let report = service.issue_missing(&self.ctx, model)?;
                        warnings.extend(report.warnings);
                        for domain in &report.issued {
                            println!("issued {}", domain);
                        }
                    }
                }
            }
            CertCommands::Delete { domain } => {
                self.service().remove(&domain)?;
                println!("deleted certificate for {}", domain);
            }
        }
        print_warnings(&warnings);
        Ok(())
    }

    fn service(&self) -> CertificateService {
        CertificateService::new(
            self.certs.clone(),
            Arc::new(CommandIssuer::new(&self.config.certificates)),
        )
    }
}

fn print_cert(cert: &bastion_engine::CertInfo) {
    println!(
        "{}\t{}\t{}\t{}",
        cert.filename,
        cert.not_after.format("%Y-%m-%d"),
        if cert.lets_encrypt {
            "letsencrypt"
        } else {
            "provided"
        },
        cert.domains.join(",")
    );
}

fn print_warnings(warnings: &Warnings) {
    for warning in warnings.iter() {
        eprintln!("warning: {}", warning);
    }
}
