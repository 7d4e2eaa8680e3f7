use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use log::info;
use serde::Serialize;

use muzze_lib::{
    day_key::{day_key_from_rfc3339, get_day_key, is_day_key_future, is_day_key_today},
    settings::{BackendSettings, ProgressSettings},
    ProgressApp,
};

#[derive(Debug, Parser)]
#[command(name = "muzze-progress", version, about = "Session timer and daily goal progress")]
struct Cli {
    /// Directory holding settings.json and the local database
    #[arg(long, env = "MUZZE_DATA_DIR", default_value = ".muzze")]
    data_dir: PathBuf,

    /// IANA timezone overriding the configured one
    #[arg(long, env = "MUZZE_TIMEZONE")]
    timezone: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the civil-day key for now or for an RFC 3339 timestamp
    DayKey {
        #[arg(long)]
        at: Option<String>,
    },
    /// Print today's goal progress
    Progress {
        #[arg(long)]
        goal: Option<u32>,
    },
    /// Run a session for a fixed time, streaming live progress
    Session {
        #[arg(long, default_value_t = 60)]
        seconds: u64,
        #[arg(long)]
        goal: Option<u32>,
    },
    /// Print the current streak of days meeting the goal
    Streak {
        #[arg(long, default_value_t = 30)]
        days: u32,
    },
    /// Update stored settings; omitted flags keep their current value
    Config {
        #[arg(long)]
        goal: Option<u32>,
        #[arg(long)]
        timezone: Option<String>,
        #[arg(long)]
        user_id: Option<String>,
        /// Hosted REST endpoint; pass an empty value to go back to the local database
        #[arg(long)]
        rest_url: Option<String>,
        #[arg(long, env = "MUZZE_API_KEY", hide_env_values = true)]
        api_key: Option<String>,
        #[arg(long, env = "MUZZE_ACCESS_TOKEN", hide_env_values = true)]
        access_token: Option<String>,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConfigOutput {
    progress: ProgressSettings,
    rest_url: Option<String>,
    api_key_set: bool,
    access_token_set: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DayKeyOutput {
    day_key: String,
    timezone: String,
    is_today: bool,
    is_future: bool,
}

/// `Some("")` clears a stored value, `None` keeps it.
fn merge_setting(update: Option<String>, current: Option<String>) -> Option<String> {
    match update {
        Some(value) if value.trim().is_empty() => None,
        Some(value) => Some(value.trim().to_string()),
        None => current,
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let app = ProgressApp::open(&cli.data_dir, cli.timezone.as_deref())?;
    let tz = app.timezone();

    match cli.command {
        Command::DayKey { at } => {
            let key = match at {
                Some(timestamp) => day_key_from_rfc3339(&timestamp, tz.name())?,
                None => get_day_key(Utc::now(), tz),
            };
            print_json(&DayKeyOutput {
                is_today: is_day_key_today(&key, tz),
                is_future: is_day_key_future(&key, tz),
                day_key: key.to_string(),
                timezone: tz.name().to_string(),
            })?;
        }
        Command::Progress { goal } => {
            print_json(&app.current_progress(goal).await?)?;
        }
        Command::Session { seconds, goal } => {
            app.current_progress(goal).await?;
            let (mut progress_rx, live_task) = app.live_progress();

            app.start_session(goal).await?;
            let deadline = tokio::time::sleep(Duration::from_secs(seconds));
            tokio::pin!(deadline);

            loop {
                tokio::select! {
                    _ = &mut deadline => break,
                    _ = tokio::signal::ctrl_c() => {
                        info!("Interrupted; stopping session early");
                        break;
                    }
                    changed = progress_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let progress = *progress_rx.borrow_and_update();
                        print_json(&progress)?;
                    }
                }
            }

            app.stop_session().await?;
            print_json(&app.current_progress(goal).await?)?;
            live_task.abort();
        }
        Command::Streak { days } => {
            print_json(&app.streak(days).await?)?;
        }
        Command::Config {
            goal,
            timezone,
            user_id,
            rest_url,
            api_key,
            access_token,
        } => {
            let current = app.settings().progress();
            let progress = ProgressSettings {
                daily_goal_minutes: goal.unwrap_or(current.daily_goal_minutes),
                timezone: timezone.unwrap_or(current.timezone),
                user_id: user_id.unwrap_or(current.user_id),
            };
            app.settings().update_progress(progress.clone())?;

            let current = app.settings().backend();
            let backend = BackendSettings {
                rest_url: merge_setting(rest_url, current.rest_url),
                api_key: merge_setting(api_key, current.api_key),
                access_token: merge_setting(access_token, current.access_token),
            };
            app.settings().update_backend(backend.clone())?;

            print_json(&ConfigOutput {
                progress,
                rest_url: backend.rest_url,
                api_key_set: backend.api_key.is_some(),
                access_token_set: backend.access_token.is_some(),
            })?;
        }
    }

    Ok(())
}
