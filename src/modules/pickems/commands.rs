use crate::{Context, Error};
use chrono::{DateTime, Utc};
use poise::command;
use tokio::time::timeout;
use tracing::{info, warn};

use super::{
    error::{StoreError, VoteError},
    record::{format_timestamp, parse_timestamp, Resolution, ScheduledGame, VoteOutcome, VoteRecord},
    resolver::Side,
    teams::TeamDirectory,
};

fn guild_id(ctx: &Context<'_>) -> Result<u64, Error> {
    ctx.guild_id()
        .map(|id| id.get())
        .ok_or_else(|| Error::from("This command only works in a server"))
}

/// Name used as the storage key when no game id is given, so repeat
/// meetings of the same teams stay distinct.
fn default_name(home: &str, away: &str, start: &DateTime<Utc>) -> String {
    format!("{away} @ {home} {}", start.format("%Y-%m-%d"))
}

fn team_label(teams: &TeamDirectory, home: &str, team: &str) -> String {
    let side = if team == home { Side::Home } else { Side::Away };
    teams.label(team, side)
}

/// Open a pick'em for an upcoming game
#[command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn create(
    ctx: Context<'_>,
    #[description = "Home team"] home: String,
    #[description = "Away team"] away: String,
    #[description = "Puck drop in UTC, e.g. 2024-01-01T00:00:00Z"] start: String,
    #[description = "Game id from the schedule"] game_id: Option<u64>,
    #[description = "Display name"] name: Option<String>,
    #[description = "Result feed URL used to settle the pick'em"] link: Option<String>,
    #[description = "Game type (R regular, P playoffs)"] game_type: Option<String>,
) -> Result<(), Error> {
    let guild_id = guild_id(&ctx)?;
    let (home, away) = (home.trim().to_string(), away.trim().to_string());

    let Ok(game_start) = parse_timestamp(start.trim()) else {
        ctx.say("❌ Start time must look like `2024-01-01T00:00:00Z`.")
            .await?;
        return Ok(());
    };

    if home.is_empty() || away.is_empty() || home.eq_ignore_ascii_case(&away) {
        ctx.say("❌ A pick'em needs two different teams.").await?;
        return Ok(());
    }

    let game = ScheduledGame {
        contest_id: game_id,
        name: name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| default_name(&home, &away, &game_start)),
        home_team: home,
        away_team: away,
        game_start,
        link: link.filter(|l| !l.trim().is_empty()),
        game_type: game_type.unwrap_or_else(|| "R".to_string()),
    };

    let store = &ctx.data().pickems;
    if let Some(key) = store.find_matching(guild_id, &game).await {
        ctx.say(format!(
            "📋 That game is already being tracked as `{}`.",
            key.contest
        ))
        .await?;
        return Ok(());
    }

    let teams = &ctx.data().teams;
    let content = format!(
        "🏒 **{}**\n{} vs {}\nPick a winner with `/pickems vote`. Voting closes <t:{}:R>.",
        game.name,
        teams.label(&game.away_team, Side::Away),
        teams.label(&game.home_team, Side::Home),
        game.game_start.timestamp()
    );

    let key = match store.insert(VoteRecord::new(guild_id, game)) {
        Ok(key) => key,
        Err(e) => {
            ctx.say(format!("❌ {e}")).await?;
            return Ok(());
        }
    };
    info!("Created pick'em {} in guild {}", key.contest, guild_id);

    let reply = ctx.say(content).await?;
    let message = reply.message().await?;
    if let Some(handle) = store.get(&key) {
        handle
            .lock()
            .await
            .add_message(format!("{}-{}", message.channel_id, message.id));
    }
    Ok(())
}

/// Pick who wins a game
#[command(slash_command, guild_only, ephemeral)]
pub async fn vote(
    ctx: Context<'_>,
    #[description = "Game id or name"] game: String,
    #[description = "The team you think will win"] team: String,
) -> Result<(), Error> {
    let guild_id = guild_id(&ctx)?;
    let data = ctx.data();

    let Some((key, handle)) = data.pickems.find(guild_id, &game).await else {
        ctx.say(format!("🛑 There's no pick'em called **{game}**."))
            .await?;
        return Ok(());
    };
    let (home, away) = {
        let record = handle.lock().await;
        (record.home_team().to_string(), record.away_team().to_string())
    };
    let label = |team: &str| team_label(&data.teams, &home, team);

    let user_id = ctx.author().id.to_string();
    let message = match data
        .pickems
        .cast_vote(&key, &user_id, &team, data.clock.as_ref())
        .await
    {
        Ok(VoteOutcome::Accepted(team)) => format!("✅ Setting your vote to: {}", label(&team)),
        Ok(VoteOutcome::Changed { current, .. }) => format!(
            "🔄 You have already voted! Changing vote to: {}",
            label(&current)
        ),
        Ok(VoteOutcome::Unchanged(team)) => {
            format!("👍 You have already voted for {}!", label(&team))
        }
        Err(StoreError::Vote(VoteError::VotingClosed {
            locked_in: Some(team),
        })) => format!("⏰ Voting has ended! You have voted for {}", label(&team)),
        Err(StoreError::Vote(VoteError::VotingClosed { locked_in: None })) => {
            "⏰ Voting has ended! You did not vote on this game!".to_string()
        }
        Err(StoreError::Vote(VoteError::InvalidOption(team))) => format!(
            "❌ **{}** isn't playing in this game. Pick {} or {}.",
            team,
            label(&home),
            label(&away)
        ),
        Err(e) => format!("❌ {e}"),
    };

    ctx.say(message).await?;
    Ok(())
}

/// See the votes and result of a game
#[command(slash_command, guild_only, ephemeral)]
pub async fn status(
    ctx: Context<'_>,
    #[description = "Game id or name"] game: String,
) -> Result<(), Error> {
    let guild_id = guild_id(&ctx)?;
    let data = ctx.data();

    let Some((_, handle)) = data.pickems.find(guild_id, &game).await else {
        ctx.say(format!("🛑 There's no pick'em called **{game}**."))
            .await?;
        return Ok(());
    };

    let user_id = ctx.author().id.to_string();
    let message = {
        let record = handle.lock().await;
        let label = |team: &str| team_label(&data.teams, record.home_team(), team);
        let (home_votes, away_votes) = record.vote_counts();

        let result = match record.winner() {
            Some(winner) => format!("🏆 Winner: {}", label(winner)),
            None if record.is_voting_open(data.clock.now()) => {
                format!("🗳️ Voting closes <t:{}:R>", record.deadline().timestamp())
            }
            None => "⏳ Voting closed, waiting for the final score".to_string(),
        };
        let yours = record
            .vote_of(&user_id)
            .map(|team| format!("You picked {}", label(team)))
            .unwrap_or_else(|| "You haven't voted".to_string());

        format!(
            "**{}** ({})\n{}: {} votes\n{}: {} votes\n{}\n{}",
            record.metadata().name,
            format_timestamp(&record.deadline()),
            label(record.away_team()),
            away_votes,
            label(record.home_team()),
            home_votes,
            result,
            yours
        )
    };

    ctx.say(message).await?;
    Ok(())
}

/// Fetch the result of a game now, skipping the usual wait
#[command(slash_command, guild_only, ephemeral, required_permissions = "MANAGE_GUILD")]
pub async fn resolve(
    ctx: Context<'_>,
    #[description = "Game id or name"] game: String,
) -> Result<(), Error> {
    let guild_id = guild_id(&ctx)?;
    let data = ctx.data();

    let Some((key, handle)) = data.pickems.find(guild_id, &game).await else {
        ctx.say(format!("🛑 There's no pick'em called **{game}**."))
            .await?;
        return Ok(());
    };
    let (link, home) = {
        let record = handle.lock().await;
        if let Some(winner) = record.winner() {
            let winner = team_label(&data.teams, record.home_team(), winner);
            drop(record);
            ctx.say(format!("🏆 Already settled: {winner}")).await?;
            return Ok(());
        }
        (record.link().map(str::to_string), record.home_team().to_string())
    };

    let Some(link) = link else {
        ctx.say("❌ This pick'em has no result link to check.").await?;
        return Ok(());
    };

    let outcome = match timeout(data.config.fetch_timeout(), data.provider.fetch(&link)).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => {
            warn!("Manual resolve of {} failed: {}", key, e);
            ctx.say(format!("⚠️ Couldn't fetch the result: {e}")).await?;
            return Ok(());
        }
        Err(_) => {
            ctx.say("⚠️ The result feed took too long to answer.").await?;
            return Ok(());
        }
    };

    let message = match data.pickems.apply_outcome(&key, Some(&outcome)).await? {
        Resolution::Resolved(winner) => {
            format!("🏆 Winner set: {}", team_label(&data.teams, &home, &winner))
        }
        Resolution::Unresolved => format!("⏳ No winner yet, game is {}.", outcome.game_state),
    };
    ctx.say(message).await?;
    Ok(())
}

/// Move a game to a new start time, clearing any winner
#[command(slash_command, guild_only, ephemeral, required_permissions = "MANAGE_GUILD")]
pub async fn postpone(
    ctx: Context<'_>,
    #[description = "Game id or name"] game: String,
    #[description = "New puck drop in UTC, e.g. 2024-01-03T00:30:00Z"] start: String,
) -> Result<(), Error> {
    let guild_id = guild_id(&ctx)?;
    let data = ctx.data();

    let Ok(new_start) = parse_timestamp(start.trim()) else {
        ctx.say("❌ Start time must look like `2024-01-01T00:00:00Z`.")
            .await?;
        return Ok(());
    };
    let Some((key, _)) = data.pickems.find(guild_id, &game).await else {
        ctx.say(format!("🛑 There's no pick'em called **{game}**."))
            .await?;
        return Ok(());
    };

    let message = match data.pickems.postpone(&key, new_start).await? {
        Some(winner) => format!(
            "📅 Moved to <t:{}:F> and cleared the winner ({winner}). Voting is open again.",
            new_start.timestamp()
        ),
        None => format!("📅 Moved to <t:{}:F>.", new_start.timestamp()),
    };
    ctx.say(message).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::pickems::testing::*;

    #[test]
    fn default_names_differ_per_meeting() {
        let first = default_name("Boston Bruins", "Toronto Maple Leafs", &ts("2024-01-01T00:00:00Z"));
        let second = default_name("Boston Bruins", "Toronto Maple Leafs", &ts("2024-02-10T00:30:00Z"));
        assert_eq!(first, "Toronto Maple Leafs @ Boston Bruins 2024-01-01");
        assert_ne!(first, second);

        let keys: Vec<String> = [first, second]
            .into_iter()
            .map(|name| {
                let mut game = game(0, "2024-01-01T00:00:00Z");
                game.contest_id = None;
                game.name = name;
                VoteRecord::new(GUILD, game).key()
            })
            .collect();
        assert_ne!(keys[0], keys[1]);
    }
}
