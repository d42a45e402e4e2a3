use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing::{info, warn};

use caddie_turns::api::ApiClient;
use caddie_turns::cache;
use caddie_turns::config::{self, Config};
use caddie_turns::messaging;
use caddie_turns::model::{AttendanceStatus, ListNumber, ListOrder};
use caddie_turns::session::{CaddieEdit, NewCaddie, Session};
use caddie_turns::validation;

#[derive(Debug, Parser)]
#[command(author, version, about = "One-shot caddie turn and roster actions")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Exchange the admin password for a token and keep it
    Login {
        #[arg(long, env = "CADDIE_ADMIN_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Drop the token and all cached state
    Logout,
    /// Print the projected queue of a list
    Queue {
        #[arg(long, value_parser = parse_list)]
        list: ListNumber,
    },
    StartTurn {
        caddie_id: String,
    },
    EndTurn {
        caddie_id: String,
    },
    /// Record an attendance mark
    Attend {
        caddie_id: String,
        #[arg(long, value_enum)]
        status: Mark,
    },
    SetOrder {
        #[arg(long, value_parser = parse_list)]
        list: ListNumber,
        #[arg(value_enum)]
        order: Order,
    },
    /// Set the positional window; omit either bound to clear it
    SetRange {
        #[arg(long, value_parser = parse_list)]
        list: ListNumber,
        #[arg(long)]
        start: Option<u32>,
        #[arg(long)]
        end: Option<u32>,
    },
    SetCallTime {
        #[arg(long, value_parser = parse_list)]
        list: ListNumber,
        call_time: String,
    },
    AddCaddie {
        #[arg(long)]
        name: String,
        #[arg(long, value_parser = parse_list)]
        list: ListNumber,
        #[arg(long)]
        phone: Option<String>,
    },
    EditCaddie {
        caddie_id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long, value_parser = parse_list)]
        list: Option<ListNumber>,
        #[arg(long)]
        phone: Option<String>,
    },
    DeleteCaddie {
        caddie_id: String,
    },
    /// Print the turn announcement of a list
    Announce {
        #[arg(long, value_parser = parse_list)]
        list: ListNumber,
        /// Print a WhatsApp share link instead of the text
        #[arg(long)]
        link: bool,
    },
    /// Print the daily report, or a range report with --to
    Report {
        #[arg(long, value_parser = parse_date)]
        date: NaiveDate,
        #[arg(long, value_parser = parse_date)]
        to: Option<NaiveDate>,
    },
    /// Download the daily CSV report
    ExportCsv {
        #[arg(long, value_parser = parse_date)]
        date: NaiveDate,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Post a message, optionally to one list
    SendMessage {
        content: String,
        #[arg(long, value_parser = parse_list)]
        list: Option<ListNumber>,
    },
    /// List posted messages
    Messages,
    ReadMessage {
        id: String,
    },
    DeleteMessage {
        id: String,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mark {
    Present,
    Late,
    Absent,
    Excused,
}

impl From<Mark> for AttendanceStatus {
    fn from(mark: Mark) -> Self {
        match mark {
            Mark::Present => AttendanceStatus::Present,
            Mark::Late => AttendanceStatus::Late,
            Mark::Absent => AttendanceStatus::Absent,
            Mark::Excused => AttendanceStatus::Excused,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Order {
    Asc,
    Desc,
}

impl From<Order> for ListOrder {
    fn from(order: Order) -> Self {
        match order {
            Order::Asc => ListOrder::Ascending,
            Order::Desc => ListOrder::Descending,
        }
    }
}

fn parse_list(value: &str) -> Result<ListNumber, String> {
    let n: u8 = value
        .parse()
        .map_err(|_| format!("{:?} is not a list number", value))?;
    ListNumber::try_from(n)
}

fn parse_date(value: &str) -> Result<NaiveDate, String> {
    validation::date(value).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;
    run(&cfg, args.command).await
}

async fn run(cfg: &Config, command: Command) -> Result<()> {
    let pool = cache::init_pool(&cfg.database_url()).await?;
    cache::run_migrations(&pool).await?;

    let token = match std::env::var("CADDIE_API_TOKEN") {
        Ok(token) => Some(token),
        Err(_) => cache::load_token(&pool).await?,
    };
    let mut client = ApiClient::from_config(cfg)?.with_token(token);

    // Commands that only talk to the backend.
    match command {
        Command::Login { password } => {
            let res = client.login(&password).await.context("login failed")?;
            cache::save_token(&pool, &res.token).await?;
            println!("logged in (admin: {})", res.admin);
            Ok(())
        }
        Command::Report { date, to } => {
            let report = match to {
                Some(end) => client.range_report(date, end).await?,
                None => serde_json::to_value(client.daily_report(date).await?)?,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::ExportCsv { date, out } => {
            let bytes = client.download_csv(date).await?;
            let out = out.unwrap_or_else(|| PathBuf::from(format!("reporte_{}.csv", date)));
            tokio::fs::write(&out, &bytes)
                .await
                .with_context(|| format!("failed to write {}", out.display()))?;
            info!(path = %out.display(), bytes = bytes.len(), "report saved");
            Ok(())
        }
        Command::SendMessage { content, list } => {
            let message = client.create_message(&content, list).await?;
            println!("{}", client.whatsapp_url(&message.id).await?);
            Ok(())
        }
        Command::Messages => {
            for message in client.list_messages().await? {
                let target = message
                    .target_list
                    .map(|l| format!("list {}", l))
                    .unwrap_or_else(|| "all lists".to_string());
                let unread = if message.read { " " } else { "*" };
                println!("{}{} [{}] {}", unread, message.id, target, message.content);
            }
            Ok(())
        }
        Command::ReadMessage { id } => {
            client.mark_read(&id).await?;
            Ok(())
        }
        Command::DeleteMessage { id } => {
            client.delete_message(&id).await?;
            println!("deleted message {}", id);
            Ok(())
        }
        Command::Logout => {
            if let Err(err) = client.logout().await {
                warn!(%err, "backend logout failed; clearing local session anyway");
            }
            let session = Session::restore(client, cfg.list_defaults(), pool).await?;
            session.sign_out().await?;
            println!("logged out");
            Ok(())
        }
        other => {
            let session = Session::restore(client, cfg.list_defaults(), pool).await?;
            session
                .refresh()
                .await
                .context("failed to load current state")?;
            run_session(&session, other).await
        }
    }
}

async fn run_session(session: &Session<ApiClient>, command: Command) -> Result<()> {
    match command {
        Command::Queue { list } => {
            for (position, caddie) in session.queue(list).await.iter().enumerate() {
                println!("{:>3}. {} [{}] ({})", position + 1, caddie.name, caddie.status, caddie.id);
            }
        }
        Command::StartTurn { caddie_id } => {
            let turn = session.start_turn(&caddie_id).await?;
            println!("turn {} started for {}", turn.id, turn.caddie_name);
        }
        Command::EndTurn { caddie_id } => {
            let closed = session.end_turn(&caddie_id).await?;
            println!("closed {} turn(s) for {}", closed.len(), caddie_id);
        }
        Command::Attend { caddie_id, status } => {
            let record = session.record_attendance(&caddie_id, status.into()).await?;
            println!("{}: {}", record.caddie_name, record.status);
        }
        Command::SetOrder { list, order } => {
            let settings = session.set_order(list, order.into()).await?;
            println!("list {} order: {}", list, settings.order.as_str());
        }
        Command::SetRange { list, start, end } => {
            let settings = session.set_range(list, start, end).await?;
            match settings.range() {
                Some((start, end)) => println!("list {} range: {}-{}", list, start, end),
                None => println!("list {} range cleared", list),
            }
        }
        Command::SetCallTime { list, call_time } => {
            let settings = session.set_call_time(list, &call_time).await?;
            println!("list {} call time: {}", list, settings.call_time);
        }
        Command::AddCaddie { name, list, phone } => {
            let caddie = session
                .add_caddie(NewCaddie {
                    name,
                    list_number: list,
                    phone_number: phone,
                })
                .await?;
            println!("added {} ({})", caddie.name, caddie.id);
        }
        Command::EditCaddie {
            caddie_id,
            name,
            list,
            phone,
        } => {
            let caddie = session
                .edit_caddie(
                    &caddie_id,
                    CaddieEdit {
                        name,
                        list_number: list,
                        phone_number: phone,
                    },
                )
                .await?;
            println!("updated {} ({})", caddie.name, caddie.id);
        }
        Command::DeleteCaddie { caddie_id } => {
            session.delete_caddie(&caddie_id).await?;
            println!("deleted {}", caddie_id);
        }
        Command::Announce { list, link } => {
            let text = session.announcement(list).await;
            if link {
                println!("{}", messaging::whatsapp_link(&text));
            } else {
                println!("{}", text);
            }
        }
        Command::Login { .. }
        | Command::Logout
        | Command::Report { .. }
        | Command::ExportCsv { .. }
        | Command::SendMessage { .. }
        | Command::Messages
        | Command::ReadMessage { .. }
        | Command::DeleteMessage { .. } => unreachable!("backend-only command"),
    }
    Ok(())
}
