use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use datastore_backup::config::{
    BackupSchedule, EnvironmentConfig, DEFAULT_CONFIG_FILE, DEFAULT_SCHEDULE_FILE,
};
use datastore_backup::executor::{
    bucket_for_project, list_backups, resolve, restore_plan, run_backup, test_restore,
    ExportOutcome, ExportResult, RestoreOutcome,
};
use datastore_backup::naming::TIMESTAMP_PLACEHOLDER;
use datastore_backup::providers::{Admin, Backend, GcloudCli};
use datastore_backup::request::BackupOptions;
use datastore_backup::resolver::{Target, ValidationMode};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "datastore-backup")]
#[command(about = "Trigger, monitor and verify Cloud Datastore backups to Cloud Storage")]
#[command(version)]
struct Cli {
    /// Environment configuration file (JSON, or TOML with a .toml extension)
    #[arg(long = "configFile", visible_alias = "config-file", global = true, default_value = DEFAULT_CONFIG_FILE)]
    config_file: PathBuf,

    /// Backup schedule file mapping frequencies to entity kinds
    #[arg(long = "backupSchedule", visible_alias = "backup-schedule", global = true, default_value = DEFAULT_SCHEDULE_FILE)]
    backup_schedule: PathBuf,

    /// Account to act as (passed through to gcloud)
    #[arg(long, global = true)]
    account: Option<String>,

    /// Print the commands instead of running them
    #[arg(long, global = true)]
    debug: bool,

    /// Warn and continue on an unknown frequency or environment
    #[arg(long, global = true)]
    lenient: bool,

    /// Treat <ENV> as a GCP project id instead of an environment name;
    /// without <ENV>, the gcloud default project is used
    #[arg(long, global = true)]
    single_project: bool,

    /// Bucket prefix for --single-project (default: {project}_backup)
    #[arg(long = "bucketPrefix", visible_alias = "bucket-prefix", global = true, requires = "single_project")]
    bucket_prefix: Option<String>,

    /// How to reach Datastore and Cloud Storage
    #[arg(long, global = true, value_enum, default_value_t = Backend::Gcloud)]
    backend: Backend,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export the kinds of a frequency for every deployment of an environment
    #[command(allow_missing_positional = true)]
    Backup {
        /// Environment name (or project id with --single-project)
        env: Option<String>,
        /// Frequency from the backup schedule (e.g. daily)
        frequency: String,
    },
    /// Print the import commands for a restore; runs nothing
    #[command(allow_missing_positional = true)]
    Restore {
        env: Option<String>,
        frequency: String,
        /// Export timestamp to restore from
        #[arg(long)]
        timestamp: Option<String>,
    },
    /// Restore a single kind from a backup to prove it is recoverable
    Test {
        env: String,
        frequency: String,
        /// Project to restore into
        project_id: String,
        /// Export timestamp, e.g. 2019-08-21T19:18:29_50232
        timestamp: String,
        /// The one entity kind to restore
        entity_kind: String,
    },
    /// List the exports available in each deployment's bucket
    #[command(allow_missing_positional = true)]
    List {
        env: Option<String>,
        frequency: String,
    },
}

/// Everything a subcommand needs, loaded once up front.
struct Invocation {
    schedule: BackupSchedule,
    config: Option<EnvironmentConfig>,
    target: Target,
    options: BackupOptions,
    mode: ValidationMode,
}

impl Invocation {
    async fn load(cli: &Cli, env: Option<&str>) -> Result<Self> {
        let target = match (cli.single_project, env) {
            (true, Some(project_id)) => Target::Project {
                project_id: project_id.to_string(),
                bucket_prefix: cli.bucket_prefix.clone(),
            },
            (true, None) => Target::Project {
                project_id: GcloudCli::new().default_project().await?,
                bucket_prefix: cli.bucket_prefix.clone(),
            },
            (false, Some(env)) => Target::Environment(env.to_string()),
            (false, None) => bail!("<ENV> is required unless --single-project is set"),
        };

        let schedule = BackupSchedule::load(&cli.backup_schedule)?;
        let config = if target.needs_environment_config() {
            Some(EnvironmentConfig::load(&cli.config_file)?)
        } else {
            None
        };

        Ok(Self {
            schedule,
            config,
            target,
            options: BackupOptions {
                account: cli.account.clone(),
                debug: cli.debug,
            },
            mode: if cli.lenient {
                ValidationMode::Lenient
            } else {
                ValidationMode::Strict
            },
        })
    }
}

async fn backup(invocation: &Invocation, admin: &Admin, frequency: &str) -> Result<()> {
    let results = run_backup(
        admin,
        &invocation.schedule,
        invocation.config.as_ref(),
        &invocation.target,
        frequency,
        &invocation.options,
        invocation.mode,
    )
    .await?;

    for result in &results {
        for line in export_report(result) {
            println!("{}", line);
        }
    }

    let failed = results.iter().filter(|r| r.is_failure()).count();
    if failed > 0 {
        bail!("{} of {} exports failed", failed, results.len());
    }
    Ok(())
}

/// What the operator sees for one deployment's export.
fn export_report(result: &ExportResult) -> Vec<String> {
    match &result.outcome {
        ExportOutcome::Dispatched(operation) => vec![
            format!(
                "✅ {}: backup started {}; use the following command to monitor progress:",
                result.project_id, operation.name
            ),
            format!("\t{}", result.status_command),
        ],
        ExportOutcome::Rendered(command) => vec![
            format!("{}: {}", result.project_id, command),
            format!("\tmonitor status: {}", result.status_command),
        ],
        ExportOutcome::Failed(err) => vec![format!("❌ {}", err)],
    }
}

fn restore(invocation: &Invocation, frequency: &str, timestamp: Option<&str>) -> Result<()> {
    println!("*** Doesn't run anything; just generates example commands ***");
    println!("📝 Make a fresh backup of the kinds you intend to restore before running these.");

    let resolved = resolve(
        &invocation.schedule,
        invocation.config.as_ref(),
        &invocation.target,
        frequency,
        invocation.mode,
    )?;
    let plans = restore_plan(
        &resolved.kinds,
        &resolved.deployments,
        frequency,
        timestamp,
        &invocation.options,
    )?;

    if timestamp.is_none() {
        println!(
            "replace {} with the export you want (specific to each deployment)",
            TIMESTAMP_PLACEHOLDER
        );
    }
    for plan in &plans {
        println!("{}:", plan.project_id);
        println!("\t{}", plan.request.to_command_line());
        println!("\tmonitor status: {}", plan.status.to_command_line());
    }
    Ok(())
}

async fn test(
    invocation: &Invocation,
    admin: &Admin,
    frequency: &str,
    project_id: &str,
    timestamp: &str,
    entity_kind: &str,
) -> Result<()> {
    let resolved = resolve(
        &invocation.schedule,
        invocation.config.as_ref(),
        &invocation.target,
        frequency,
        invocation.mode,
    )?;
    if !resolved.kinds.iter().any(|kind| kind == entity_kind) {
        warn!(
            "{} is not in the {} schedule; the backup may not contain it",
            entity_kind, frequency
        );
    }

    let bucket = bucket_for_project(&resolved.deployments, project_id, frequency);
    let output = test_restore(
        admin,
        entity_kind,
        project_id,
        &bucket,
        timestamp,
        &invocation.options,
    )
    .await?;

    match &output.restore {
        RestoreOutcome::Dispatched(operation) => {
            println!("✅ Test restore of {} started: {}", entity_kind, operation.name)
        }
        RestoreOutcome::Rendered(command) => println!("{}", command),
    }
    println!("\tmonitor status: {}", output.status_command);
    for operation in &output.operations {
        println!("\t{}", operation.summary());
    }
    Ok(())
}

async fn list(invocation: &Invocation, admin: &Admin, frequency: &str) -> Result<()> {
    let resolved = resolve(
        &invocation.schedule,
        invocation.config.as_ref(),
        &invocation.target,
        frequency,
        invocation.mode,
    )?;
    let listings = list_backups(admin, &resolved.deployments, frequency, &invocation.options).await;

    let mut failed = 0;
    for listing in &listings {
        println!("{} ({}):", listing.project_id, listing.bucket);
        match &listing.entries {
            Ok(entries) if entries.is_empty() => println!("\t(no backups)"),
            Ok(entries) => {
                for entry in entries {
                    println!("\t{}", entry);
                }
            }
            Err(err) => {
                failed += 1;
                println!("\t❌ {}", err);
            }
        }
    }

    if failed > 0 {
        bail!("{} of {} listings failed", failed, listings.len());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        "datastore_backup=debug"
    } else {
        "datastore_backup=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match &cli.command {
        Commands::Backup { env, frequency } => {
            let invocation = Invocation::load(&cli, env.as_deref()).await?;
            let admin = Admin::from_backend(cli.backend)?;
            if invocation.options.debug {
                info!("Debug mode: commands are printed, not executed");
            }
            backup(&invocation, &admin, frequency).await?;
        }
        Commands::Restore {
            env,
            frequency,
            timestamp,
        } => {
            let invocation = Invocation::load(&cli, env.as_deref()).await?;
            restore(&invocation, frequency, timestamp.as_deref())?;
        }
        Commands::Test {
            env,
            frequency,
            project_id,
            timestamp,
            entity_kind,
        } => {
            let invocation = Invocation::load(&cli, Some(env)).await?;
            let admin = Admin::from_backend(cli.backend)?;
            test(&invocation, &admin, frequency, project_id, timestamp, entity_kind).await?;
        }
        Commands::List { env, frequency } => {
            let invocation = Invocation::load(&cli, env.as_deref()).await?;
            let admin = Admin::from_backend(cli.backend)?;
            list(&invocation, &admin, frequency).await?;
        }
    }

    Ok(())
}
