//! toolgate - capability-based sandbox CLI
//!
//! Operator surface for the sandbox: inspect profiles and tool policies,
//! dry-run capability, path and URL checks, and push a demo executor through
//! the full gate.
//!
//! ## Commands
//!
//! - `profiles`: List sandbox profiles
//! - `profile`: Show one profile as JSON
//! - `policy`: Show the resolved policy and config for a tool
//! - `check-caps`: Check a tool's capabilities against a grant and mode
//! - `check-path`: Check paths against an allowed-path whitelist
//! - `check-url`: Check URLs against a network policy
//! - `run`: Run the echo executor through the sandbox

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing::{debug, Level};

use toolgate_core::monitor::NetworkDecision;
use toolgate_core::sandbox::{check_capabilities, parse_capability_list, CapabilityCheck, PathWhitelist};
use toolgate_core::{
    AuditFilter, NetworkMonitor, NetworkPolicy, PolicyIntegration, SandboxMode, SandboxSettings,
    ToolRequest, ToolResponse,
};

#[derive(Parser)]
#[command(name = "toolgate")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Capability-based execution sandbox for agent tool calls", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Settings file (TOML)
    #[arg(long, global = true, env = "TOOLGATE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List sandbox profiles
    Profiles,

    /// Show a sandbox profile as JSON
    Profile {
        /// Profile name
        name: String,
    },

    /// Show the resolved policy and sandbox config for a tool
    Policy {
        /// Tool name
        tool: String,
    },

    /// Check the capabilities a tool needs against a grant
    CheckCaps {
        /// Tool name (capabilities are inferred from it)
        #[arg(long)]
        tool: String,

        /// Sandbox mode
        #[arg(long, default_value = "controlled")]
        mode: SandboxMode,

        /// Granted capabilities, comma separated (e.g. fs:read,state:read)
        #[arg(long, default_value = "")]
        grant: String,
    },

    /// Check paths against an allowed-path whitelist
    CheckPath {
        /// Allowed path pattern (repeatable)
        #[arg(long = "allow")]
        allow: Vec<String>,

        /// Paths to check
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Check URLs against a network policy
    CheckUrl {
        /// Allowed domain (repeatable)
        #[arg(long = "allow")]
        allow: Vec<String>,

        /// Blocked domain substring (repeatable)
        #[arg(long = "block")]
        block: Vec<String>,

        /// Requests per minute per host
        #[arg(long, default_value_t = 60)]
        rpm: u32,

        /// URLs to check, in order
        #[arg(required = true)]
        urls: Vec<String>,
    },

    /// Run the echo executor through the full sandbox gate
    Run {
        /// Tool name
        tool: String,

        /// Tool arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,

        /// Profile to run the tool under
        #[arg(long)]
        profile: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    toolgate_core::init_tracing(cli.json, level);

    let settings = load_settings(cli.config.as_deref())?;

    match cli.command {
        Commands::Profiles => cmd_profiles(&settings),
        Commands::Profile { name } => cmd_profile(&settings, &name),
        Commands::Policy { tool } => cmd_policy(&settings, &tool),
        Commands::CheckCaps { tool, mode, grant } => cmd_check_caps(&tool, mode, &grant),
        Commands::CheckPath { allow, paths } => cmd_check_path(&allow, &paths),
        Commands::CheckUrl {
            allow,
            block,
            rpm,
            urls,
        } => cmd_check_url(allow, block, rpm, &urls).await,
        Commands::Run {
            tool,
            args,
            profile,
        } => cmd_run(&settings, &tool, &args, profile.as_deref()).await,
    }
}

fn load_settings(path: Option<&std::path::Path>) -> Result<SandboxSettings> {
    match path {
        Some(path) => {
            debug!(path = %path.display(), "loading settings");
            SandboxSettings::load(path)
                .with_context(|| format!("Failed to load settings from {}", path.display()))
        }
        None => Ok(SandboxSettings::default()),
    }
}

fn build_integration(settings: &SandboxSettings) -> Result<PolicyIntegration> {
    PolicyIntegration::from_settings(settings).context("Invalid sandbox settings")
}

/// List sandbox profiles
fn cmd_profiles(settings: &SandboxSettings) -> Result<()> {
    let registry = settings.profile_registry()?;
    for profile in registry.list() {
        println!(
            "{:<12} {:<10} {:>7}ms  {}",
            profile.name,
            profile.config.mode,
            profile.config.timeout_ms(),
            profile.description
        );
    }
    Ok(())
}

/// Show a sandbox profile
fn cmd_profile(settings: &SandboxSettings, name: &str) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&profile_json(settings, name)?)?);
    Ok(())
}

fn profile_json(settings: &SandboxSettings, name: &str) -> Result<Value> {
    let registry = settings.profile_registry()?;
    let profile = registry.get(name)?;
    Ok(serde_json::to_value(profile)?)
}

/// Show the resolved policy for a tool
fn cmd_policy(settings: &SandboxSettings, tool: &str) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&policy_json(settings, tool)?)?);
    Ok(())
}

fn policy_json(settings: &SandboxSettings, tool: &str) -> Result<Value> {
    let integration = build_integration(settings)?;
    let request = ToolRequest::new(tool, Value::Null);
    Ok(json!({
        "tool": tool,
        "registered": integration.registered_tools().any(|t| t == tool),
        "inferred_capabilities": request.resolve_required(),
        "policy": integration.policy_for(tool),
        "config": integration.config_for(tool)?,
    }))
}

/// Check capabilities
fn cmd_check_caps(tool: &str, mode: SandboxMode, grant: &str) -> Result<()> {
    let check = caps_report(tool, mode, grant)?;
    match check.reason() {
        None => println!("allowed: '{tool}' may run in {mode} mode"),
        Some(reason) => println!("denied: {reason}"),
    }
    Ok(())
}

fn caps_report(tool: &str, mode: SandboxMode, grant: &str) -> Result<CapabilityCheck> {
    let granted = parse_capability_list(grant)?;
    let required = ToolRequest::new(tool, Value::Null).resolve_required();
    Ok(check_capabilities(&required, &granted, mode))
}

/// Check paths against a whitelist
fn cmd_check_path(allow: &[String], paths: &[String]) -> Result<()> {
    for (path, allowed) in path_report(allow, paths)? {
        println!("{} {}", if allowed { "allow" } else { "deny " }, path);
    }
    Ok(())
}

fn path_report(allow: &[String], paths: &[String]) -> Result<Vec<(String, bool)>> {
    let whitelist = PathWhitelist::compile(allow)?;
    Ok(paths
        .iter()
        .map(|p| (p.clone(), whitelist.is_allowed(p)))
        .collect())
}

/// Check URLs against a network policy
async fn cmd_check_url(allow: Vec<String>, block: Vec<String>, rpm: u32, urls: &[String]) -> Result<()> {
    for (url, decision) in urls.iter().zip(url_report(allow, block, rpm, urls).await) {
        match decision.reason {
            None => println!("allow {url}"),
            Some(reason) => println!("deny  {url} ({reason})"),
        }
    }
    Ok(())
}

async fn url_report(
    allow: Vec<String>,
    block: Vec<String>,
    rpm: u32,
    urls: &[String],
) -> Vec<NetworkDecision> {
    let policy = NetworkPolicy {
        allowed_domains: allow,
        blocked_domains: block,
        max_requests_per_minute: rpm,
        ..NetworkPolicy::default()
    };
    let monitor = NetworkMonitor::default();
    let mut decisions = Vec::with_capacity(urls.len());
    for url in urls {
        decisions.push(monitor.is_request_allowed(url, &policy).await);
    }
    decisions
}

/// Run the echo executor through the sandbox
async fn cmd_run(
    settings: &SandboxSettings,
    tool: &str,
    args: &str,
    profile: Option<&str>,
) -> Result<()> {
    let (response, summary) = run_tool(settings, tool, args, profile).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn run_tool(
    settings: &SandboxSettings,
    tool: &str,
    args: &str,
    profile: Option<&str>,
) -> Result<(ToolResponse, Value)> {
    let args: Value = serde_json::from_str(args).context("--args must be valid JSON")?;
    let mut integration = build_integration(settings)?;
    if let Some(profile) = profile {
        // Explicit [tools.<name>] fields still win; the profile only fills gaps.
        let mut tool_settings = settings.tools.get(tool).cloned().unwrap_or_default();
        tool_settings.profile = Some(profile.to_string());
        integration.register_tool(tool, &tool_settings)?;
    }

    let name = tool.to_string();
    let response = integration
        .execute_tool(tool, args, move |args| async move {
            Ok::<_, String>(json!({
                "success": true,
                "message": format!("echo from {name}"),
                "args": args,
            }))
        })
        .await;

    let manager = integration.manager();
    manager.metrics().flush();
    let audit = manager.audit();
    let summary = json!({
        "audit": audit.stats().await,
        "entries": audit.logs(&AuditFilter { limit: Some(1), ..AuditFilter::default() }).await,
        "executions": manager.stats().await,
        "metrics": manager.metrics().snapshot(),
    });
    Ok((response, summary))
}
