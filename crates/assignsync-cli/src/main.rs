use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};

use assignsync_api::{CapacityScope, HierarchyAction, SyncApi, SyncConfig};
use assignsync_core::{AccountId, CapacitySettings, Trigger};
use assignsync_gateway::http::TrackerConfig;
use assignsync_gateway::{HttpTracker, RequestConfig, Tracker};

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "assignsync")]
#[command(about = "Multi-assignee sync, capacity and hierarchy operations")]
struct Cli {
    /// Tracker site, e.g. https://example.atlassian.net
    #[arg(long)]
    base_url: String,

    /// Account email for basic auth.
    #[arg(long)]
    email: String,

    /// Environment variable holding the API token.
    #[arg(long, default_value = "ASSIGNSYNC_TOKEN")]
    token_env: String,

    /// Field id of the ordered multi-assignee custom field.
    #[arg(long, default_value = "customfield_10050")]
    multi_field: String,

    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one reconciliation pass for a work item.
    Reconcile(ReconcileArgs),
    Capacity {
        #[command(subcommand)]
        command: CapacityCommand,
    },
    Hierarchy {
        #[command(subcommand)]
        command: HierarchyCommand,
    },
    /// Probe the tracker connection.
    Ping,
    /// Print contract versions.
    Version,
}

#[derive(Debug, Args)]
struct ReconcileArgs {
    #[arg(long)]
    item: String,
    #[arg(long)]
    trigger: TriggerArg,
    /// Previous assignee account id (assignee-changed only).
    #[arg(long)]
    from: Option<String>,
    /// New assignee account id (assignee-changed only).
    #[arg(long)]
    to: Option<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TriggerArg {
    AssigneeChanged,
    MultiListChanged,
    ItemCreated,
    FallbackScan,
}

#[derive(Debug, Subcommand)]
enum CapacityCommand {
    /// Aggregate capacity for a project or an explicit user set.
    Report(CapacityReportArgs),
    /// Store capacity settings for a user.
    SetSettings(SetSettingsArgs),
}

#[derive(Debug, Args)]
struct CapacityReportArgs {
    #[arg(long, conflicts_with = "users")]
    project: Option<String>,
    /// Comma-separated account ids.
    #[arg(long, value_delimiter = ',')]
    users: Option<Vec<String>>,
}

#[derive(Debug, Args)]
struct SetSettingsArgs {
    #[arg(long)]
    user: String,
    #[arg(long, default_value_t = 10)]
    max_concurrent: u32,
    #[arg(long, default_value_t = 8.0)]
    hours_per_day: f64,
    #[arg(long)]
    weekly_hours: Option<f64>,
}

#[derive(Debug, Subcommand)]
enum HierarchyCommand {
    /// Resolve a user's authority level.
    Classify(ClassifyArgs),
    /// Check whether a requester may perform an action.
    Check(CheckArgs),
}

#[derive(Debug, Args)]
struct ClassifyArgs {
    #[arg(long)]
    user: String,
    #[arg(long)]
    project: Option<String>,
    #[arg(long, default_value_t = false)]
    bypass_cache: bool,
}

#[derive(Debug, Args)]
struct CheckArgs {
    #[arg(long)]
    action: ActionArg,
    #[arg(long)]
    requester: String,
    #[arg(long)]
    target: Option<String>,
    #[arg(long)]
    project: Option<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ActionArg {
    ViewTeamCapacity,
    ViewCrossProject,
    AssignWork,
}

impl From<ActionArg> for HierarchyAction {
    fn from(value: ActionArg) -> Self {
        match value {
            ActionArg::ViewTeamCapacity => Self::ViewTeamCapacity,
            ActionArg::ViewCrossProject => Self::ViewCrossProject,
            ActionArg::AssignWork => Self::AssignWork,
        }
    }
}

fn trigger_from_args(args: &ReconcileArgs) -> Trigger {
    match args.trigger {
        TriggerArg::AssigneeChanged => Trigger::AssigneeChanged {
            from: args.from.clone().map(AccountId::new),
            to: args.to.clone().map(AccountId::new),
        },
        TriggerArg::MultiListChanged => Trigger::MultiListChanged,
        TriggerArg::ItemCreated => Trigger::ItemCreated,
        TriggerArg::FallbackScan => Trigger::FallbackScan,
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let Cli { base_url, email, token_env, multi_field, timeout_secs, command } = Cli::parse();

    // Deferred so commands that never talk to the tracker need no token.
    let build_api = || -> Result<SyncApi<HttpTracker>> {
        let token = std::env::var(&token_env)
            .with_context(|| format!("API token environment variable {token_env} is not set"))?;
        let tracker_config = TrackerConfig {
            base_url: base_url.clone(),
            email: email.clone(),
            multi_assignee_field: multi_field.clone(),
            request: RequestConfig { timeout_secs, ..RequestConfig::default() },
        };
        let tracker = HttpTracker::new(&tracker_config, &token)?;
        Ok(SyncApi::new(tracker, SyncConfig::default()))
    };

    match command {
        Command::Version => print_json(&serde_json::json!({
            "cli": CLI_CONTRACT_VERSION,
            "api": assignsync_api::API_CONTRACT_VERSION,
        })),
        Command::Ping => {
            let ok = build_api()?.tracker().test_connection().await?;
            print_json(&serde_json::json!({ "connected": ok }))
        }
        Command::Reconcile(args) => {
            let trigger = trigger_from_args(&args);
            let outcome = build_api()?.reconcile(&args.item, &trigger).await?;
            print_json(&outcome)
        }
        Command::Capacity { command } => match command {
            CapacityCommand::Report(args) => {
                let scope = match (args.project, args.users) {
                    (Some(project), _) => CapacityScope::Project(project),
                    (None, Some(users)) => {
                        CapacityScope::Users(users.into_iter().map(AccountId::new).collect())
                    }
                    (None, None) => {
                        return Err(anyhow!("pass either --project or --users"));
                    }
                };
                let report = build_api()?.aggregate_capacity(&scope).await?;
                print_json(&report)
            }
            CapacityCommand::SetSettings(args) => {
                let settings = CapacitySettings {
                    max_concurrent_assignments: args.max_concurrent,
                    working_hours_per_day: args.hours_per_day,
                    total_weekly_capacity_hours: args.weekly_hours,
                };
                settings.validate()?;
                let user = AccountId::new(args.user);
                build_api()?.tracker().set_user_capacity_settings(&user, &settings).await?;
                print_json(&serde_json::json!({ "user": user, "settings": settings }))
            }
        },
        Command::Hierarchy { command } => match command {
            HierarchyCommand::Classify(args) => {
                let profile = build_api()?
                    .classify_hierarchy(
                        &AccountId::new(args.user),
                        args.project.as_deref(),
                        args.bypass_cache,
                    )
                    .await?;
                print_json(&profile)
            }
            HierarchyCommand::Check(args) => {
                let target = args.target.map(AccountId::new);
                let decision = build_api()?
                    .check_hierarchy_permission(
                        args.action.into(),
                        &AccountId::new(args.requester),
                        target.as_ref(),
                        args.project.as_deref(),
                    )
                    .await?;
                print_json(&decision)
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut full = vec!["assignsync", "--base-url", "https://tracker.invalid", "--email", "svc@example.com"];
        full.extend_from_slice(args);
        match Cli::try_parse_from(full) {
            Ok(cli) => cli,
            Err(err) => panic!("args should parse: {err}"),
        }
    }

    #[test]
    fn reconcile_args_parse_with_trigger_and_accounts() {
        let cli = parse(&[
            "reconcile", "--item", "PROJ-7", "--trigger", "assignee-changed", "--to", "acc-a",
        ]);
        let args = match cli.command {
            Command::Reconcile(args) => args,
            other => panic!("expected reconcile, got {other:?}"),
        };
        assert_eq!(args.item, "PROJ-7");
        assert!(matches!(args.trigger, TriggerArg::AssigneeChanged));
        assert_eq!(args.to.as_deref(), Some("acc-a"));
        assert!(args.from.is_none());
    }

    #[test]
    fn capacity_report_users_are_comma_delimited() {
        let cli = parse(&["capacity", "report", "--users", "acc-a,acc-b,acc-c"]);
        let args = match cli.command {
            Command::Capacity { command: CapacityCommand::Report(args) } => args,
            other => panic!("expected capacity report, got {other:?}"),
        };
        assert_eq!(args.users, Some(vec!["acc-a".to_string(), "acc-b".to_string(), "acc-c".to_string()]));
        assert!(args.project.is_none());
    }

    #[test]
    fn capacity_report_rejects_both_scopes() {
        let result = Cli::try_parse_from([
            "assignsync", "--base-url", "https://tracker.invalid", "--email", "svc@example.com",
            "capacity", "report", "--project", "PROJ", "--users", "acc-a",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn set_settings_defaults_apply() {
        let cli = parse(&["capacity", "set-settings", "--user", "acc-a"]);
        let args = match cli.command {
            Command::Capacity { command: CapacityCommand::SetSettings(args) } => args,
            other => panic!("expected set-settings, got {other:?}"),
        };
        assert_eq!(args.max_concurrent, 10);
        assert!((args.hours_per_day - 8.0).abs() < f64::EPSILON);
        assert!(args.weekly_hours.is_none());
    }

    #[test]
    fn hierarchy_check_parses_the_action_value_enum() {
        let cli = parse(&[
            "hierarchy", "check", "--action", "view-team-capacity",
            "--requester", "acc-r", "--target", "acc-t", "--project", "PROJ",
        ]);
        let args = match cli.command {
            Command::Hierarchy { command: HierarchyCommand::Check(args) } => args,
            other => panic!("expected hierarchy check, got {other:?}"),
        };
        assert!(matches!(args.action, ActionArg::ViewTeamCapacity));
        assert_eq!(args.target.as_deref(), Some("acc-t"));
        assert_eq!(HierarchyAction::from(args.action), HierarchyAction::ViewTeamCapacity);
    }

    #[test]
    fn version_needs_no_further_flags() {
        let cli = parse(&["version"]);
        assert!(matches!(cli.command, Command::Version));
    }
}
