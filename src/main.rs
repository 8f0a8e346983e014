//! `letta-sync` — the reconciler CLI: load layered manifests, compute or
//! apply a plan for one agent, or drive the upgrade controller for one
//! agent or a selected batch.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use reconciler_core::{ControlPlane, Error, IdentityType, PackageLayer, ReleaseChannel};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// A token that cancels itself on Ctrl-C, threaded into every subcommand
/// that drives the Apply Engine or Upgrade Controller so the caller-side
/// cancellation signal spec.md §5 requires has a real source in this CLI.
fn ctrl_c_token() -> CancellationToken {
    let token = CancellationToken::new();
    let watched = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received ctrl-c, cancelling at the next suspension point");
            watched.cancel();
        }
    });
    token
}

#[derive(Parser)]
#[command(name = "letta-sync", about = "Declarative reconciler for remote agent configurations", version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Write logs to this file in addition to stderr.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute a plan for one agent without applying it.
    Plan(PlanArgs),
    /// Compute and apply a plan for one agent.
    Apply(ApplyArgs),
    /// Drive one agent through the full upgrade flow (load, plan, preview or apply).
    Upgrade(UpgradeArgs),
    /// Drive a selection of agents through the upgrade flow concurrently.
    UpgradeBatch(UpgradeBatchArgs),
    /// Identity sub-reconciler operations.
    Identity {
        #[command(subcommand)]
        command: IdentityCommands,
    },
}

#[derive(Args)]
struct ManifestArgs {
    /// Path inside (or at) the repository containing layered manifests.
    #[arg(short, long, default_value = ".")]
    path: PathBuf,
}

#[derive(Args)]
struct PackageArgs {
    /// Target package version for a layer, `layer=version` (repeatable).
    #[arg(long = "package-version", value_parser = parse_layer_value)]
    package_version: Vec<(PackageLayer, String)>,
    /// Package path for a layer, `layer=path` (repeatable).
    #[arg(long = "package-path", value_parser = parse_layer_value)]
    package_path: Vec<(PackageLayer, String)>,
}

fn parse_layer_value(raw: &str) -> Result<(PackageLayer, String), String> {
    let (layer, value) = raw.split_once('=').ok_or_else(|| format!("expected `layer=value`, got `{raw}`"))?;
    let layer = match layer {
        "base" => PackageLayer::Base,
        "org" => PackageLayer::Org,
        "project" => PackageLayer::Project,
        other => return Err(format!("unknown layer `{other}` (expected base, org, or project)")),
    };
    Ok((layer, value.to_string()))
}

#[derive(Args)]
struct PlanArgs {
    #[command(flatten)]
    manifests: ManifestArgs,
    /// Agent id to plan against.
    agent: String,
    #[command(flatten)]
    package: PackageArgs,
    /// Classify every drifted change as Breaking, ignoring the usual safe/breaking split.
    #[arg(long)]
    force_breaking: bool,
}

#[derive(Args)]
struct ApplyArgs {
    #[command(flatten)]
    manifests: ManifestArgs,
    agent: String,
    #[command(flatten)]
    package: PackageArgs,
    #[arg(long)]
    force_breaking: bool,
    /// Apply breaking changes too (otherwise they're skipped and reported).
    #[arg(long)]
    force: bool,
    /// Allow detach actions to run (otherwise they're skipped).
    #[arg(long)]
    allow_delete: bool,
    /// Compute the plan only; make no control-plane writes.
    #[arg(long)]
    dry_run: bool,
    #[arg(long)]
    org: Option<String>,
    #[arg(long)]
    project: Option<String>,
}

#[derive(Args)]
struct UpgradeArgs {
    #[command(flatten)]
    manifests: ManifestArgs,
    agent: String,
    /// Git short-SHA stamped as this run's version for every `--package-path` layer.
    #[arg(long)]
    git_sha: String,
    #[command(flatten)]
    package: PackageArgs,
    /// Actually apply (otherwise this previews only).
    #[arg(long)]
    apply: bool,
    #[arg(long)]
    force: bool,
    #[arg(long)]
    allow_delete: bool,
    #[arg(long)]
    force_breaking: bool,
    #[arg(long)]
    org: Option<String>,
    #[arg(long)]
    project: Option<String>,
}

#[derive(Args)]
struct UpgradeBatchArgs {
    #[command(flatten)]
    manifests: ManifestArgs,
    /// Candidate agent ids to consider for this batch.
    #[arg(required = true)]
    agents: Vec<String>,
    #[arg(long)]
    git_sha: String,
    #[command(flatten)]
    package: PackageArgs,
    #[arg(long)]
    apply: bool,
    #[arg(long, default_value_t = 5)]
    concurrency: usize,
    #[arg(long)]
    fail_fast: bool,
    /// Only consider agents that already carry a `managed_state` record.
    #[arg(long)]
    managed_only: bool,
    #[arg(long = "role")]
    roles: Vec<String>,
    #[arg(long = "channel")]
    channels: Vec<String>,
    #[arg(long)]
    project: Option<String>,
    #[arg(long)]
    org: Option<String>,
}

#[derive(Subcommand)]
enum IdentityCommands {
    /// Resolve and create-if-missing one identifier, without touching any agent.
    Ensure {
        identifier: String,
        #[arg(long, default_value = "default")]
        org: String,
        #[arg(long, default_value = "user")]
        identity_type: String,
    },
    /// Resolve, ensure, and attach one or more identifiers to an agent.
    Attach {
        agent: String,
        #[arg(required = true)]
        identifiers: Vec<String>,
        #[arg(long, default_value = "default")]
        org: String,
        #[arg(long, default_value = "user")]
        identity_type: String,
    },
    /// Detach one or more identity ids from an agent.
    Detach {
        agent: String,
        #[arg(required = true)]
        identity_ids: Vec<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_file.as_deref());

    match run(cli.command).await {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value).expect("CLI output is always representable as JSON"));
        }
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(exit_code(&e));
        }
    }
}

fn init_tracing(log_file: Option<&std::path::Path>) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "letta_sync=info".into());
    let registry = tracing_subscriber::registry().with(filter).with(tracing_subscriber::fmt::layer());

    match log_file {
        Some(path) => {
            let directory = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_else(|| "letta-sync.log".to_string());
            let appender = tracing_appender::rolling::never(directory, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            // Leaked deliberately: the guard must outlive every span emitted
            // for the remainder of this process, i.e. until `main` exits.
            std::mem::forget(guard);
            registry.with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false)).init();
        }
        None => registry.init(),
    }
}

fn exit_code(e: &anyhow::Error) -> i32 {
    match e.downcast_ref::<Error>() {
        Some(Error::Policy { .. }) => 2,
        _ => 1,
    }
}

fn control_plane() -> reconciler_client::HttpControlPlane {
    reconciler_client::HttpControlPlane::new(reconciler_client::resolve_endpoint())
}

async fn run(command: Commands) -> anyhow::Result<serde_json::Value> {
    match command {
        Commands::Plan(args) => run_plan(args).await,
        Commands::Apply(args) => run_apply(args).await,
        Commands::Upgrade(args) => run_upgrade(args).await,
        Commands::UpgradeBatch(args) => run_upgrade_batch(args).await,
        Commands::Identity { command } => run_identity(command).await,
    }
}

#[tracing::instrument(skip(args))]
async fn run_plan(args: PlanArgs) -> anyhow::Result<serde_json::Value> {
    let loaded = reconciler_manifest::load_manifests(&args.manifests.path)?;
    let cp = control_plane();
    let observed = reconciler_upgrade::fetch_observed(&cp, &args.agent).await?;
    let channel = observed.channel();
    let classified = reconciler_ownership::classify_agent(&observed, &loaded.desired_state);
    let options = reconciler_plan::PlanOptions { target_version: args.package.package_version.into_iter().collect(), force_breaking: args.force_breaking };
    let plan = reconciler_plan::build_plan(&args.agent, &observed, &loaded.desired_state, &classified, channel, &options, Utc::now());

    Ok(serde_json::json!({ "plan": plan, "manifestWarnings": loaded.warnings }))
}

#[tracing::instrument(skip(args))]
async fn run_apply(args: ApplyArgs) -> anyhow::Result<serde_json::Value> {
    let loaded = reconciler_manifest::load_manifests(&args.manifests.path)?;
    let cp = control_plane();
    let observed = reconciler_upgrade::fetch_observed(&cp, &args.agent).await?;
    let role = observed.role();
    let channel = observed.channel();
    let classified = reconciler_ownership::classify_agent(&observed, &loaded.desired_state);

    let package_version: HashMap<PackageLayer, String> = args.package.package_version.into_iter().collect();
    let package_paths: HashMap<PackageLayer, String> = args.package.package_path.into_iter().collect();
    let plan_options = reconciler_plan::PlanOptions { target_version: package_version.clone(), force_breaking: args.force_breaking };
    let now = Utc::now();
    let plan = reconciler_plan::build_plan(&args.agent, &observed, &loaded.desired_state, &classified, channel, &plan_options, now);

    if args.dry_run {
        return Ok(serde_json::json!({ "plan": plan, "applied": false }));
    }

    let mut apply_options = reconciler_apply::ApplyOptions::new(loaded.desired_state);
    apply_options.force = args.force;
    apply_options.allow_delete = args.allow_delete;
    apply_options.package_version = package_version;
    apply_options.package_paths = package_paths;
    apply_options.org = args.org;
    apply_options.project = args.project;
    apply_options.cancellation = ctrl_c_token();

    let result = reconciler_apply::apply_plan(&cp, &plan, &observed, role, channel, &apply_options, now).await?;
    Ok(serde_json::json!({ "plan": plan, "result": result }))
}

#[tracing::instrument(skip(args))]
async fn run_upgrade(args: UpgradeArgs) -> anyhow::Result<serde_json::Value> {
    let loaded = reconciler_manifest::load_manifests(&args.manifests.path)?;
    let cp = control_plane();
    let package_paths: HashMap<PackageLayer, String> = args.package.package_path.into_iter().collect();
    let mode = if args.apply { reconciler_upgrade::UpgradeMode::Apply } else { reconciler_upgrade::UpgradeMode::Preview };
    let mut opts = reconciler_upgrade::UpgradeOptions::with_git_sha(args.git_sha, package_paths, mode);
    opts.force = args.force;
    opts.allow_delete = args.allow_delete;
    opts.force_breaking_preview = args.force_breaking;
    opts.org = args.org;
    opts.project = args.project;
    opts.cancellation = ctrl_c_token();
    for (layer, version) in args.package.package_version {
        opts.package_version.insert(layer, version);
    }

    let outcome = reconciler_upgrade::upgrade_agent(&cp, &args.agent, &loaded.desired_state, &opts, Utc::now()).await?;
    Ok(serde_json::to_value(outcome)?)
}

#[tracing::instrument(skip(args))]
async fn run_upgrade_batch(args: UpgradeBatchArgs) -> anyhow::Result<serde_json::Value> {
    let loaded = reconciler_manifest::load_manifests(&args.manifests.path)?;
    let cp: Arc<dyn ControlPlane> = Arc::new(control_plane());
    let package_paths: HashMap<PackageLayer, String> = args.package.package_path.into_iter().collect();
    let mode = if args.apply { reconciler_upgrade::UpgradeMode::Apply } else { reconciler_upgrade::UpgradeMode::Preview };
    let mut opts = reconciler_upgrade::UpgradeOptions::with_git_sha(args.git_sha, package_paths, mode);
    opts.org = args.org.clone();
    opts.project = args.project.clone();
    opts.cancellation = ctrl_c_token();
    for (layer, version) in args.package.package_version {
        opts.package_version.insert(layer, version);
    }

    let roles: Option<HashSet<_>> = if args.roles.is_empty() { None } else { Some(args.roles.iter().map(|r| reconciler_core::AgentRole::from_tag(r)).collect()) };
    let channels: Option<HashSet<_>> = if args.channels.is_empty() { None } else { Some(args.channels.iter().map(|c| ReleaseChannel::from_tag(c)).collect()) };

    let selection = reconciler_upgrade::BatchSelection { managed_only: args.managed_only, roles, channels, project: args.project, org: args.org };

    let summary = reconciler_upgrade::upgrade_batch(cp, &args.agents, &selection, &loaded.desired_state, &opts, args.concurrency, args.fail_fast).await;
    Ok(serde_json::to_value(summary)?)
}

async fn run_identity(command: IdentityCommands) -> anyhow::Result<serde_json::Value> {
    let cp = control_plane();
    let now = Utc::now();

    match command {
        IdentityCommands::Ensure { identifier, org, identity_type } => {
            let identity_type: IdentityType = identity_type.parse()?;
            let key = reconciler_apply::resolve_identifier(&identifier, &org, identity_type)?;
            // An explicit `identity ensure` invocation is the operator asking
            // for creation; unlike the apply engine's conservative default,
            // every identity type is allowed here.
            let policy = reconciler_apply::AutoCreatePolicy { allow_user: true, allow_service: true, allow_team: true };
            let result = reconciler_apply::ensure_identity(&cp, &key, &policy, now, reconciler_core::SYSTEM_NAME).await?;
            Ok(serde_json::json!({ "identity": result.identity, "created": result.created }))
        }
        IdentityCommands::Attach { agent, identifiers, org, identity_type } => {
            let identity_type: IdentityType = identity_type.parse()?;
            let policy = reconciler_apply::AutoCreatePolicy { allow_user: true, allow_service: true, allow_team: true };
            let (attached, failures) = reconciler_apply::attach_many(&cp, &agent, &identifiers, &org, identity_type, &policy, now).await;
            let failures: Vec<_> = failures.into_iter().map(|(raw, e)| serde_json::json!({ "input": raw, "error": e.to_string() })).collect();
            Ok(serde_json::json!({ "attached": attached, "failures": failures }))
        }
        IdentityCommands::Detach { agent, identity_ids } => {
            reconciler_apply::detach_many(&cp, &agent, &identity_ids).await?;
            Ok(serde_json::json!({ "detached": identity_ids }))
        }
    }
}
