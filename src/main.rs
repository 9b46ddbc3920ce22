use config::Config;
use databases::Databases;
use modules::pickems::{
    clock::{Clock, SystemClock},
    outcome::{HttpOutcomeProvider, OutcomeProvider},
    pickems,
    store::ContestStore,
    task::{FlushTask, ResolveTask},
    teams::TeamDirectory,
};
use poise::serenity_prelude::{self as serenity, CreateAllowedMentions};
use std::sync::Arc;
use tasks::TaskManager;
use tracing::{error, info, trace};
use tracing_subscriber::EnvFilter;

mod config;
mod database;
mod databases;
mod modules;
mod tasks;
mod utils;

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[derive(Clone)]
pub struct Data {
    pub task_manager: Arc<TaskManager>,
    pub pickems: Arc<ContestStore>,
    pub provider: Arc<dyn OutcomeProvider>,
    pub clock: Arc<dyn Clock>,
    pub teams: Arc<TeamDirectory>,
    pub config: Arc<Config>,
}

impl std::fmt::Debug for Data {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Data").finish_non_exhaustive()
    }
}

impl Data {
    pub async fn init_tasks(&self, ctx: &serenity::Context) {
        let resolve_task = ResolveTask::new(
            self.pickems.clone(),
            self.provider.clone(),
            self.clock.clone(),
            self.config.resolve_every(),
            self.config.fetch_timeout(),
        );
        self.task_manager.add_task(resolve_task).await;

        let flush_task = FlushTask::new(self.pickems.clone(), self.config.flush_every());
        self.task_manager.add_task(flush_task).await;

        self.task_manager.start_tasks(ctx.clone()).await;
    }
}

type Error = Box<dyn std::error::Error + Send + Sync>;
type Context<'a> = poise::Context<'a, Data, Error>;

#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
async fn register(ctx: Context<'_>) -> Result<(), Error> {
    poise::builtins::register_application_commands_buttons(ctx).await?;
    Ok(())
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    info!("starting pickems");

    let config = match Config::from_env() {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let dbs = match Databases::open(&config).await {
        Ok(dbs) => Arc::new(dbs),
        Err(e) => {
            error!("Failed to open database {}: {}", config.data_path, e);
            std::process::exit(1);
        }
    };
    let store = Arc::new(ContestStore::load(dbs.pickems.clone()).await);
    let teams = Arc::new(TeamDirectory::load(config.teams_path.as_deref()).await);
    let task_manager = Arc::new(TaskManager::new());

    let data = Data {
        task_manager: task_manager.clone(),
        pickems: store.clone(),
        provider: Arc::new(HttpOutcomeProvider::new()),
        clock: Arc::new(SystemClock),
        teams,
        config: config.clone(),
    };

    let intents = serenity::GatewayIntents::non_privileged();
    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions::<Data, Error> {
            allowed_mentions: Some(CreateAllowedMentions::new().empty_roles().empty_users()),
            commands: vec![register(), pickems()],
            pre_command: |ctx| {
                Box::pin(async move {
                    trace!(
                        "Command {} used by {} in {}",
                        ctx.command().qualified_name,
                        ctx.author().tag(),
                        ctx.guild_id()
                            .map_or_else(|| "DM".to_string(), |id| id.to_string())
                    );
                })
            },
            on_error: |error| {
                Box::pin(async move {
                    match error {
                        poise::FrameworkError::Command { error, ctx, .. } => {
                            error!(
                                "Command {} failed for {} in {}: {:?}",
                                ctx.command().qualified_name,
                                ctx.author().tag(),
                                ctx.guild_id()
                                    .map_or_else(|| "DM".to_string(), |id| id.to_string()),
                                error
                            );
                        }
                        err => error!("Other framework error: {:?}", err),
                    }
                })
            },
            ..Default::default()
        })
        .setup(move |ctx, _ready, framework| {
            Box::pin(async move {
                info!("registering commands");
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                data.init_tasks(ctx).await;
                Ok(data)
            })
        })
        .build();

    let client = serenity::ClientBuilder::new(&config.token, intents)
        .framework(framework)
        .await;

    match client {
        Ok(mut client) => {
            let shard_manager = Arc::clone(&client.shard_manager);
            tokio::spawn(async move {
                shutdown_signal().await;
                info!("Shutdown requested, stopping shards");
                shard_manager.shutdown_all().await;
            });

            if let Err(e) = client.start().await {
                error!("Client stopped: {:?}", e);
            }
        }
        Err(e) => error!("Failed to build client: {:?}", e),
    }

    task_manager.shutdown().await;
    match store.flush().await {
        Ok(written) => info!("Saved {} pick'ems on shutdown", written),
        Err(e) => error!("Failed to save pick'ems on shutdown: {}", e),
    }
}
