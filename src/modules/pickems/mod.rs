pub mod clock;
pub mod commands;
pub mod database;
pub mod error;
pub mod outcome;
pub mod record;
pub mod resolver;
pub mod store;
pub mod task;
pub mod teams;

#[cfg(test)]
pub(crate) mod testing;

use commands::*;
use poise::command;

/// 🏒 Predict game winners with your server
#[command(
    slash_command,
    guild_only,
    subcommands("create", "vote", "status", "resolve", "postpone")
)]
pub async fn pickems(_ctx: crate::Context<'_>) -> Result<(), crate::Error> {
    Ok(())
}
