mod cli;
mod metrics;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use workbooks_core::pipeline::PollOutcome;
use workbooks_core::{
    load_config, validate_config, AuthToken, BatchRunner, Config, DocumentStore, JobService,
    NewReferral, PipelineContext, PlatformClient, RecordKey, RecordStore, ReferralStatus,
    SqliteRecordStore,
};

use cli::{Cli, Command, LogFormat};

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_format);

    // One record at a time; async is only for platform I/O
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };

    let result = runtime.block_on(run(&cli));

    if let Some(path) = &cli.metrics_file {
        if let Err(e) = metrics::write_metrics(path) {
            warn!("Could not write metrics: {:#}", e);
        }
    }

    if let Err(e) = result {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool, format: LogFormat) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into());

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

async fn run(cli: &Cli) -> Result<()> {
    info!("Loading configuration from {:?}", cli.config);
    let config = load_config(&cli.config)
        .with_context(|| format!("Failed to load config from {:?}", cli.config))?;
    validate_config(&config).context("Configuration validation failed")?;

    let config_json = serde_json::to_string(&config).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    info!(
        "Configuration loaded (hash {}, executable {}, project {})",
        &config_hash[..16],
        config.job.executable_id,
        config.job.output_project
    );

    let store = Arc::new(
        SqliteRecordStore::new(&config.database.path).with_context(|| {
            format!("Failed to open record store at {:?}", config.database.path)
        })?,
    );
    info!("Record store opened at {:?}", config.database.path);

    if !cli.command.needs_platform() {
        return run_offline(&cli.command, store.as_ref());
    }

    let token = AuthToken::new(cli.token.clone().unwrap_or_default())
        .context("A platform token is required (--token or WORKBOOKS_TOKEN)")?;
    let client = Arc::new(
        PlatformClient::new(&config.platform, &config.job, token)
            .context("Failed to create platform client")?,
    );
    info!("Using platform at {}", config.platform.api_url);

    let ctx = PipelineContext::new(
        store as Arc<dyn RecordStore>,
        Arc::clone(&client) as Arc<dyn JobService>,
        client as Arc<dyn DocumentStore>,
    );
    let runner = BatchRunner::new(ctx, &config).with_testing(cli.testing);

    run_stage(&cli.command, runner, &config).await
}

/// Commands that only touch the record store.
fn run_offline(command: &Command, store: &dyn RecordStore) -> Result<()> {
    match command {
        Command::Status => {
            for status in ReferralStatus::ALL {
                let count = store
                    .count_by_status(status)
                    .context("Failed to count records")?;
                println!("{:<16} {}", status.to_string(), count);
            }
        }
        Command::Register { referral, input } => {
            let record = store
                .insert(NewReferral {
                    referral_id: referral.clone(),
                    input_document_id: input.clone(),
                })
                .context("Failed to register referral")?;
            info!(
                "Registered referral {} with input {} as {}",
                record.referral_id, record.input_document_id, record.status
            );
        }
        other => bail!("{:?} needs the platform", other),
    }
    Ok(())
}

async fn run_stage(command: &Command, runner: BatchRunner, config: &Config) -> Result<()> {
    match command {
        Command::Run { output_dir, no_wait } => {
            let mut runner = runner.with_output_dir(output_dir.clone());
            if *no_wait {
                runner = runner.with_wait(Duration::ZERO);
            }
            runner.run().await.context("Batch run aborted")?;
        }
        Command::Verify => {
            runner.authenticate().await?;
            let report = runner.verifier().verify_uploaded(runner.limit()).await?;
            info!(
                "{} passed, {} mismatched, {} unresolved",
                report.passed.len(),
                report.mismatched.len(),
                report.unresolved.len()
            );
        }
        Command::Launch => {
            runner.authenticate().await?;
            runner.launcher().launch_eligible(runner.limit()).await?;
        }
        Command::Monitor => {
            runner.authenticate().await?;
            let report = runner.monitor().monitor_started(runner.limit()).await?;
            for (key, state) in &report.waiting {
                info!("Referral {} still {}", key, state.as_str());
            }
        }
        Command::Fetch { output_dir } => {
            runner.authenticate().await?;
            let dest = output_dir.as_deref().unwrap_or(&config.fetch.output_dir);
            fetch(&runner, dest).await?;
        }
        Command::Lookup {
            input,
            referral,
            project,
        } => {
            runner.authenticate().await?;
            let desc = runner
                .monitor()
                .lookup_by_input(input, project.as_deref())
                .await
                .with_context(|| format!("Lookup for input {} failed", input))?;
            match &desc.artifact {
                Some(artifact) => println!("{}\t{}", desc.id, artifact),
                None => println!("{}\t-", desc.id),
            }

            if let Some(referral) = referral {
                let key = RecordKey::new(referral, input);
                match runner.monitor().poll(&key, &desc.id).await? {
                    PollOutcome::Ready(artifact) => {
                        info!("Recorded artifact {} for referral {}", artifact, key)
                    }
                    PollOutcome::AlreadyAdvanced(status) => {
                        info!("Referral {} already {}; nothing recorded", key, status)
                    }
                    other => warn!("Referral {} not updated: {:?}", key, other),
                }
            }
        }
        Command::Status | Command::Register { .. } => {
            bail!("{:?} does not use the platform", command)
        }
    }
    Ok(())
}

async fn fetch(runner: &BatchRunner, dest: &Path) -> Result<()> {
    let report = runner.fetcher().fetch_ready(dest, runner.limit()).await?;
    info!(
        "{} workbooks delivered to {:?}, {} failed",
        report.delivered.len(),
        dest,
        report.failures.len()
    );
    Ok(())
}
