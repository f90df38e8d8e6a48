use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use clap::{ArgAction, Args, Parser, Subcommand};
use serde::Serialize;
use toolroom::{
    auth::{LocalIdentityProvider, Principal},
    commands::{
        Command, GetToolCommand, ListAllMovementsCommand, ListPendingMovementsCommand,
        ListToolsCommand, ListUsersCommand, ReconcileCommand, RegisterEntryCommand,
        RegisterReturnCommand, RegisterToolCommand, RegisterUserCommand,
        RegisterWithdrawalCommand, RetireToolCommand, ToolHistoryCommand, UpdateToolCommand,
        UserListing,
    },
    config::{self, AppConfig},
    db::{self, DbPool},
    entities::{HistoryModel, ProfileModel, Role, ToolModel, ToolStatus, ToolType},
    events,
    repositories::{ToolFilter, ToolSort},
    services::{
        catalog::{CreateToolInput, ToolPage, ToolPatch, ToolQuery, UpdateToolInput},
        ledger::{MovementRecord, PendingMovement},
        profiles::{RegisterProfileInput, SimpleProfile},
        reconciliation::ReconcileReport,
        AppServices,
    },
    ServiceError,
};
use tracing::{info, warn};
use uuid::Uuid;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {:#}", err);
            let code = err
                .downcast_ref::<ServiceError>()
                .map(ServiceError::exit_code)
                .unwrap_or(1);
            ExitCode::from(code as u8)
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let context = CliContext::initialize().await?;
    let outcome = dispatch(&context, cli).await;
    context.shutdown().await;
    outcome
}

async fn dispatch(context: &CliContext, cli: Cli) -> Result<()> {
    if let Commands::Migrate = cli.command {
        db::run_migrations(&context.db)
            .await
            .context("failed to run migrations")?;
        println!("Migrations applied");
        return Ok(());
    }

    let actor = context.resolve_actor(cli.as_user).await?;

    match cli.command {
        Commands::Migrate => Ok(()),
        Commands::Tools(command) => handle_tools_command(context, &actor, command, cli.json).await,
        Commands::Movements(command) => {
            handle_movements_command(context, &actor, command, cli.json).await
        }
        Commands::Users(command) => handle_users_command(context, &actor, command, cli.json).await,
        Commands::Reconcile(args) => handle_reconcile(context, &actor, args, cli.json).await,
    }
}

#[derive(Parser)]
#[command(name = "toolroom", about = "Tool inventory and movement ledger", version)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON"
    )]
    json: bool,
    #[arg(
        long = "as",
        global = true,
        value_name = "USER_ID",
        help = "Profile id to act as"
    )]
    as_user: Option<Uuid>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending database migrations
    Migrate,
    #[command(subcommand)]
    Tools(ToolsCommands),
    #[command(subcommand)]
    Movements(MovementsCommands),
    #[command(subcommand)]
    Users(UsersCommands),
    /// Compare tool movement fields with open movements
    Reconcile(ReconcileArgs),
}

#[derive(Subcommand)]
enum ToolsCommands {
    Register(ToolRegisterArgs),
    List(ToolListArgs),
    Show(ToolIdArgs),
    Update(ToolUpdateArgs),
    Retire(ToolIdArgs),
    History(ToolIdArgs),
}

#[derive(Args)]
struct ToolRegisterArgs {
    #[arg(long, help = "Display name of the tool")]
    name: String,
    #[arg(long, help = "Manufacturer brand")]
    brand: String,
    #[arg(long, help = "Unique serial number")]
    serial: String,
    #[arg(long = "type", help = "Electrical, Manual, Mechanical, Special or HeightEquipment")]
    tool_type: ToolType,
    #[arg(long, help = "Optional free-form description")]
    description: Option<String>,
}

#[derive(Args)]
struct ToolListArgs {
    #[arg(long, default_value_t = 0, help = "Zero-based page index")]
    page: u64,
    #[arg(long, help = "Override the configured page size")]
    page_size: Option<u64>,
    #[arg(long = "type")]
    tool_type: Option<ToolType>,
    #[arg(long)]
    status: Option<ToolStatus>,
    #[arg(long, help = "Exact current location")]
    location: Option<String>,
    #[arg(long, help = "Case-insensitive match on name or serial")]
    search: Option<String>,
    #[arg(long, default_value = "name", help = "name, serial or created-at")]
    sort: ToolSort,
    #[arg(long, action = ArgAction::SetTrue, help = "Sort descending")]
    desc: bool,
}

#[derive(Args)]
struct ToolIdArgs {
    #[arg(value_name = "TOOL_ID")]
    tool_id: Uuid,
}

#[derive(Args)]
struct ToolUpdateArgs {
    #[arg(value_name = "TOOL_ID")]
    tool_id: Uuid,
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    brand: Option<String>,
    #[arg(long)]
    serial: Option<String>,
    #[arg(long = "type")]
    tool_type: Option<ToolType>,
    #[arg(long)]
    status: Option<ToolStatus>,
    #[arg(long, help = "New description; an empty value clears it")]
    description: Option<String>,
    #[arg(
        long = "set",
        value_name = "KEY=VALUE",
        action = ArgAction::Append,
        help = "Raw field edit, repeatable"
    )]
    set: Vec<String>,
}

#[derive(Subcommand)]
enum MovementsCommands {
    Withdraw(WithdrawArgs),
    Return(ReturnArgs),
    Entry(EntryArgs),
    Pending,
    All,
}

#[derive(Args)]
struct WithdrawArgs {
    #[arg(long = "tool")]
    tool_id: Uuid,
    #[arg(long = "responsible", help = "Profile id of the person taking the tool")]
    responsible_id: Uuid,
    #[arg(long, help = "Destination, e.g. a job site")]
    location: String,
    #[arg(long = "at", help = "RFC 3339 timestamp; defaults to now")]
    withdrawn_at: Option<DateTime<Utc>>,
    #[arg(long)]
    notes: Option<String>,
}

#[derive(Args)]
struct ReturnArgs {
    #[arg(long = "tool")]
    tool_id: Uuid,
    #[arg(long = "at", help = "RFC 3339 timestamp; defaults to now")]
    returned_at: Option<DateTime<Utc>>,
    #[arg(long)]
    notes: Option<String>,
}

#[derive(Args)]
struct EntryArgs {
    #[arg(long = "tool")]
    tool_id: Uuid,
    #[arg(long = "history", help = "Id of the open movement to close")]
    history_id: Uuid,
    #[arg(long = "at", help = "RFC 3339 timestamp; defaults to now")]
    entry_at: Option<DateTime<Utc>>,
    #[arg(long)]
    notes: Option<String>,
}

#[derive(Subcommand)]
enum UsersCommands {
    Register(UserRegisterArgs),
    List(UserListArgs),
}

#[derive(Args)]
struct UserRegisterArgs {
    #[arg(long)]
    email: String,
    #[arg(long, help = "At least six characters")]
    password: String,
    #[arg(long)]
    first_name: String,
    #[arg(long)]
    last_name: String,
    #[arg(long, default_value = "user", help = "admin or user")]
    role: Role,
}

#[derive(Args)]
struct UserListArgs {
    #[arg(long, action = ArgAction::SetTrue, help = "Only id and full name, by first name")]
    simple: bool,
}

#[derive(Args)]
struct ReconcileArgs {
    #[arg(long, action = ArgAction::SetTrue, help = "Repair what can be repaired")]
    repair: bool,
}

struct CliContext {
    db: Arc<DbPool>,
    services: AppServices,
}

impl CliContext {
    async fn initialize() -> Result<Self> {
        let config: AppConfig = config::load_config().context("failed to load application config")?;
        config::init_tracing(config.log_level(), config.log_json);

        let db_pool = db::establish_connection_from_app_config(&config)
            .await
            .context("failed to connect to database")?;
        if config.auto_migrate {
            db::run_migrations(&db_pool)
                .await
                .context("failed to run migrations")?;
        }
        db::check_connection(&db_pool)
            .await
            .context("database did not answer")?;
        let db = Arc::new(db_pool);

        let (event_sender, event_rx) = events::channel(config.event_channel_capacity);
        tokio::spawn(events::process_events(event_rx));

        let services = AppServices::new(
            db.clone(),
            Arc::new(event_sender),
            &config,
            Arc::new(LocalIdentityProvider::new()),
        );

        Ok(Self { db, services })
    }

    async fn shutdown(self) {
        let CliContext { db, services } = self;
        drop(services);
        if let Err(e) = db::close_shared_pool(db).await {
            warn!(error = %e, "Failed to close database pool");
        }
    }

    /// The first profile can only be registered by someone, so an empty directory runs as admin.
    async fn resolve_actor(&self, as_user: Option<Uuid>) -> Result<Principal> {
        if let Some(user_id) = as_user {
            return Ok(self.services.profiles.resolve_principal(user_id).await?);
        }

        let profiles = self
            .services
            .profiles
            .count()
            .await
            .context("failed to read profiles; has `toolroom migrate` been run?")?;
        if profiles == 0 {
            warn!("No profiles registered yet; running as bootstrap administrator");
            return Ok(Principal::new(Uuid::nil(), Role::Admin));
        }

        Err(anyhow!("pass --as <USER_ID> to choose who is acting"))
    }
}

async fn handle_tools_command(
    context: &CliContext,
    actor: &Principal,
    command: ToolsCommands,
    json: bool,
) -> Result<()> {
    let services = &context.services;
    match command {
        ToolsCommands::Register(args) => {
            let tool = RegisterToolCommand {
                input: CreateToolInput {
                    name: args.name,
                    brand: args.brand,
                    serial: args.serial,
                    tool_type: args.tool_type,
                    description: args.description,
                },
            }
            .execute(services, actor)
            .await?;
            output(json, &tool, render_tool)
        }
        ToolsCommands::List(args) => {
            let page = ListToolsCommand {
                query: ToolQuery {
                    page: args.page,
                    filter: ToolFilter {
                        tool_type: args.tool_type,
                        status: args.status,
                        location: args.location,
                        search: args.search,
                    },
                    sort_by: args.sort,
                    ascending: !args.desc,
                    page_size: args.page_size,
                },
            }
            .execute(services, actor)
            .await?;
            output(json, &page, render_tool_page)
        }
        ToolsCommands::Show(args) => {
            let tool = GetToolCommand {
                tool_id: args.tool_id,
            }
            .execute(services, actor)
            .await?;
            output(json, &tool, render_tool)
        }
        ToolsCommands::Update(args) => {
            let patch = if args.set.is_empty() {
                None
            } else {
                Some(ToolPatch::from_pairs(args.set.iter().map(String::as_str))?)
            };
            let tool = UpdateToolCommand {
                tool_id: args.tool_id,
                input: UpdateToolInput {
                    name: args.name,
                    brand: args.brand,
                    serial: args.serial,
                    tool_type: args.tool_type,
                    status: args.status,
                    description: args.description,
                },
                patch,
            }
            .execute(services, actor)
            .await?;
            output(json, &tool, render_tool)
        }
        ToolsCommands::Retire(args) => {
            let tool = RetireToolCommand {
                tool_id: args.tool_id,
            }
            .execute(services, actor)
            .await?;
            output(json, &tool, render_tool)
        }
        ToolsCommands::History(args) => {
            let history = ToolHistoryCommand {
                tool_id: args.tool_id,
            }
            .execute(services, actor)
            .await?;
            output(json, &history, |rows: &Vec<HistoryModel>| {
                if rows.is_empty() {
                    println!("No movements recorded");
                }
                rows.iter().for_each(render_history);
            })
        }
    }
}

async fn handle_movements_command(
    context: &CliContext,
    actor: &Principal,
    command: MovementsCommands,
    json: bool,
) -> Result<()> {
    let services = &context.services;
    match command {
        MovementsCommands::Withdraw(args) => {
            let movement = RegisterWithdrawalCommand {
                tool_id: args.tool_id,
                responsible_id: args.responsible_id,
                location: args.location,
                withdrawn_at: args.withdrawn_at,
                notes: args.notes,
            }
            .execute(services, actor)
            .await?;
            info!(history_id = %movement.id, "Withdrawal registered");
            output(json, &movement, render_history)
        }
        MovementsCommands::Return(args) => {
            let movement = RegisterReturnCommand {
                tool_id: args.tool_id,
                returned_at: args.returned_at,
                notes: args.notes,
            }
            .execute(services, actor)
            .await?;
            output(json, &movement, render_history)
        }
        MovementsCommands::Entry(args) => {
            let movement = RegisterEntryCommand {
                tool_id: args.tool_id,
                history_id: args.history_id,
                entry_at: args.entry_at,
                notes: args.notes,
            }
            .execute(services, actor)
            .await?;
            output(json, &movement, render_history)
        }
        MovementsCommands::Pending => {
            let pending = ListPendingMovementsCommand
                .execute(services, actor)
                .await?;
            output(json, &pending, |rows: &Vec<PendingMovement>| {
                if rows.is_empty() {
                    println!("Every tool is in storage");
                }
                rows.iter().for_each(render_pending);
            })
        }
        MovementsCommands::All => {
            let movements = ListAllMovementsCommand.execute(services, actor).await?;
            output(json, &movements, |rows: &Vec<MovementRecord>| {
                rows.iter().for_each(render_movement);
            })
        }
    }
}

async fn handle_users_command(
    context: &CliContext,
    actor: &Principal,
    command: UsersCommands,
    json: bool,
) -> Result<()> {
    let services = &context.services;
    match command {
        UsersCommands::Register(args) => {
            let profile = RegisterUserCommand {
                input: RegisterProfileInput {
                    email: args.email,
                    password: args.password,
                    first_name: args.first_name,
                    last_name: args.last_name,
                    role: args.role,
                },
            }
            .execute(services, actor)
            .await?;
            output(json, &profile, render_profile)
        }
        UsersCommands::List(args) => {
            let listing = ListUsersCommand {
                simple: args.simple,
            }
            .execute(services, actor)
            .await?;
            output(json, &listing, |listing: &UserListing| match listing {
                UserListing::Full(profiles) => profiles.iter().for_each(render_profile),
                UserListing::Simple(profiles) => profiles.iter().for_each(render_simple_profile),
            })
        }
    }
}

async fn handle_reconcile(
    context: &CliContext,
    actor: &Principal,
    args: ReconcileArgs,
    json: bool,
) -> Result<()> {
    let report = ReconcileCommand {
        repair: args.repair,
    }
    .execute(&context.services, actor)
    .await?;
    output(json, &report, render_reconcile_report)
}

fn output<T: Serialize>(json: bool, value: &T, render: impl Fn(&T)) -> Result<()> {
    if json {
        print_json(value)
    } else {
        render(value);
        Ok(())
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn render_tool(tool: &ToolModel) {
    let holder = tool
        .current_responsible
        .map(|id| format!(" • held by {}", id))
        .unwrap_or_default();
    println!(
        "- Tool {} • {} ({}) • serial {} • {} • {} • at {}{}",
        tool.id,
        tool.name,
        tool.brand,
        tool.serial,
        tool.tool_type,
        tool.status,
        tool.current_location,
        holder
    );
}

fn render_tool_page(page: &ToolPage) {
    println!(
        "Page {} of {} • {} matching tool(s)",
        page.page + 1,
        page.page_count().max(1),
        page.total
    );
    page.items.iter().for_each(render_tool);
}

fn render_history(row: &HistoryModel) {
    let returned = row
        .entry_at
        .map(|at| at.to_rfc3339())
        .unwrap_or_else(|| "open".to_string());
    println!(
        "- Movement {} • tool {} • to {} • by {} • out {} • back {}",
        row.id,
        row.tool_id,
        row.location,
        row.responsible_id,
        row.withdrawn_at.to_rfc3339(),
        returned
    );
}

fn render_pending(row: &PendingMovement) {
    println!(
        "- {} [{}] • {} {} • at {} since {} • movement {}",
        row.tool_name,
        row.tool_serial,
        row.responsible_first_name,
        row.responsible_last_name,
        row.location,
        row.withdrawn_at.to_rfc3339(),
        row.history_id
    );
}

fn render_movement(row: &MovementRecord) {
    let returned = row
        .entry_at
        .map(|at| at.to_rfc3339())
        .unwrap_or_else(|| "open".to_string());
    println!(
        "- {} [{}] • {} {} • {} • out {} • back {}",
        row.tool_name,
        row.tool_serial,
        row.responsible_first_name,
        row.responsible_last_name,
        row.location,
        row.withdrawn_at.to_rfc3339(),
        returned
    );
}

fn render_profile(profile: &ProfileModel) {
    println!(
        "- User {} • {} • {} • {}",
        profile.id,
        profile.full_name(),
        profile.email,
        profile.role
    );
}

fn render_simple_profile(profile: &SimpleProfile) {
    println!("- {} • {}", profile.id, profile.full_name);
}

fn render_reconcile_report(report: &ReconcileReport) {
    if report.discrepancies.is_empty() {
        println!("Ledger is consistent");
        return;
    }
    for discrepancy in &report.discrepancies {
        println!("- {} • tool {}", discrepancy.kind(), discrepancy.tool_id());
    }
    if !report.repaired.is_empty() {
        println!("Repaired {} tool(s)", report.repaired.len());
    }
    for discrepancy in &report.unresolved {
        println!(
            "! unresolved {} • tool {}",
            discrepancy.kind(),
            discrepancy.tool_id()
        );
    }
}
