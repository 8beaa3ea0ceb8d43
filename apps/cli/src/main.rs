use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use client::{LauncherClient, DEFAULT_SERVER_URL};
use shared::{
    domain::{Item, ItemKind},
    protocol::{ListenerHealth, ListenerState, NamedItem, SaveItemRequest},
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

mod settings_edit;

#[derive(Parser, Debug)]
#[command(name = "smartlink", about = "Manage and run SmartLink launch items")]
struct Cli {
    /// Base URL of the running launcher server.
    #[arg(long, env = "SMARTLINK_URL", default_value = DEFAULT_SERVER_URL)]
    server_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List items, optionally filtered.
    List {
        #[arg(long = "type")]
        kind: Option<String>,
        /// Case-insensitive match on name or topic.
        #[arg(long)]
        kw: Option<String>,
    },
    Show {
        name: String,
    },
    /// Create or replace an item.
    Save {
        name: String,
        #[arg(long = "type", default_value = "exe")]
        kind: String,
        #[arg(long, default_value = "")]
        cmd: String,
        #[arg(long, default_value = "")]
        uri_scheme: String,
        /// Comma-separated card ids.
        #[arg(long, default_value = "")]
        card_id: String,
        #[arg(long, default_value = "")]
        topic: String,
        /// Existing item to rename.
        #[arg(long)]
        rename_from: Option<String>,
        /// Run the item right after saving.
        #[arg(long)]
        run: bool,
    },
    Rm {
        name: String,
    },
    Run {
        name: String,
        /// Brightness level for brightness items.
        #[arg(long)]
        value: Option<u32>,
    },
    Settings {
        #[command(subcommand)]
        command: SettingsCommand,
    },
    /// Connect the Android device over adb.
    Connect {
        ip: Option<String>,
    },
    Disconnect,
    /// Publish on/off on the global cloud topic.
    Cloud {
        #[arg(value_enum)]
        command: PowerCommand,
    },
    Health,
    /// Decode the JSON payload of a music deep link.
    ParseLink {
        link: String,
    },
}

#[derive(Subcommand, Debug)]
enum SettingsCommand {
    Show,
    /// Apply one or more key=value assignments.
    Set {
        #[arg(required = true)]
        assignments: Vec<String>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PowerCommand {
    On,
    Off,
}

impl PowerCommand {
    fn as_str(self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Off => "off",
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    let client = LauncherClient::new(&cli.server_url)?;
    debug!(server = %client.server_url(), "using launcher server");

    match cli.command {
        Command::List { kind, kw } => {
            for item in client.list_items(kind.as_deref(), kw.as_deref()).await? {
                println!("{}", item_row(&item));
            }
        }
        Command::Show { name } => {
            let item = client.get_item(&name).await?;
            println!("{}", serde_json::to_string_pretty(&item)?);
        }
        Command::Save {
            name,
            kind,
            cmd,
            uri_scheme,
            card_id,
            topic,
            rename_from,
            run,
        } => {
            let request = SaveItemRequest {
                old_name: rename_from,
                item: Item::new(ItemKind::parse(&kind), cmd)
                    .with_uri_scheme(uri_scheme)
                    .with_card_ids(card_id)
                    .with_topic(topic),
                run_after_save: run,
            };
            let saved = client.save_item(&name, &request).await?;
            println!("saved {}", item_row(&saved.item));
            if let Some(outcome) = saved.outcome {
                println!("{}", outcome.message);
                if !outcome.ok {
                    anyhow::bail!("run after save failed");
                }
            }
        }
        Command::Rm { name } => {
            client.delete_item(&name).await?;
            println!("deleted {name}");
        }
        Command::Run { name, value } => {
            let outcome = client.run_item(&name, value).await?;
            println!("{}", outcome.message);
        }
        Command::Settings { command } => match command {
            SettingsCommand::Show => {
                let settings = client.settings().await?;
                println!("{}", serde_json::to_string_pretty(&settings)?);
            }
            SettingsCommand::Set { assignments } => {
                let mut settings = client.settings().await?;
                for assignment in &assignments {
                    settings = settings_edit::apply_assignment(&settings, assignment)?;
                }
                let saved = client.update_settings(&settings).await?;
                println!("{}", serde_json::to_string_pretty(&saved)?);
            }
        },
        Command::Connect { ip } => {
            println!("{}", client.connect_device(ip.as_deref()).await?);
        }
        Command::Disconnect => {
            println!("{}", client.disconnect_device().await?);
        }
        Command::Cloud { command } => {
            let outcome = client.publish_power(command.as_str()).await?;
            println!("{}", outcome.message);
        }
        Command::Health => {
            let report = client.health().await?;
            println!("{}", health_line(&report.card));
            println!("{}", health_line(&report.cloud));
        }
        Command::ParseLink { link } => {
            println!("{}", client.parse_link(&link).await?);
        }
    }

    Ok(())
}

fn item_row(named: &NamedItem) -> String {
    let item = &named.item;
    format!(
        "{}\t{}\t{}\tcards={}\ttopic={}",
        named.name, item.kind, item.command, item.card_id, item.topic
    )
}

fn health_line(health: &ListenerHealth) -> String {
    let listener = format!("{:?}", health.listener).to_lowercase();
    let state = match &health.state {
        ListenerState::Starting => "starting".to_string(),
        ListenerState::Disabled => "disabled".to_string(),
        ListenerState::Idle { reason } => format!("idle ({reason})"),
        ListenerState::Connecting { target } => format!("connecting to {target}"),
        ListenerState::Connected { target, since } => {
            format!("connected to {target} since {}", since.to_rfc3339())
        }
        ListenerState::Backoff {
            attempt,
            retry_in_secs,
            last_error,
        } => format!("retry #{attempt} in {retry_in_secs}s after: {last_error}"),
    };
    format!("{listener}: {state}")
}
