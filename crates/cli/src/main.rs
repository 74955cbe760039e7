use anyhow::{anyhow, bail, Result};
use clap::Parser;
use content_locking::{
    ChannelConfig, FormSurface, LinkStatus, LockingClient, LockingClientHandle, SessionView,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "locking-cli")]
#[command(about = "Open a document as a content-locking session and edit it from the terminal")]
#[command(version)]
struct Cli {
    /// Presence server host[:port]
    #[arg(long, default_value = "127.0.0.1:8080")]
    host: String,

    /// Use wss (page served over https)
    #[arg(long)]
    secure: bool,

    /// Document path, e.g. /admin/pages/12/edit/
    #[arg(short, long)]
    path: String,

    /// Identity passed to servers without their own authentication
    #[arg(short, long)]
    user: Option<String>,

    /// Initial form fields as name=value
    #[arg(short, long = "field")]
    fields: Vec<String>,

    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Set { field: String, value: String },
    Unlock,
    Force,
    Cancel,
    Status,
    Quit,
}

fn parse_command(line: &str) -> Result<Command> {
    let line = line.trim();
    let (word, rest) = line.split_once(' ').unwrap_or((line, ""));

    match word {
        "set" => {
            let (field, value) = rest.trim_start().split_once(' ').unwrap_or((rest.trim(), ""));
            if field.is_empty() {
                bail!("usage: set <field> <value>");
            }
            Ok(Command::Set {
                field: field.to_string(),
                value: value.to_string(),
            })
        }
        "unlock" => Ok(Command::Unlock),
        "force" => Ok(Command::Force),
        "cancel" => Ok(Command::Cancel),
        "status" => Ok(Command::Status),
        "quit" | "exit" => Ok(Command::Quit),
        other => Err(anyhow!("unknown command '{}'", other)),
    }
}

fn parse_field(pair: &str) -> Result<(String, String)> {
    pair.split_once('=')
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .ok_or_else(|| anyhow!("field must be name=value, got '{}'", pair))
}

fn describe(view: &SessionView) -> String {
    let presence = match view.link {
        LinkStatus::Connecting => "waiting for presence".to_string(),
        LinkStatus::Lost => "connection lost, presence unknown".to_string(),
        LinkStatus::Live => match view.state {
            Some(state) => format!("{:?}: {}", state, state.message()),
            None => "no conflict".to_string(),
        },
    };
    let mode = if view.locked { "read-only" } else { "editable" };
    format!("[{}] {}", mode, presence)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt().with_max_level(level).init();

    let mut surface = FormSurface::new();
    for pair in &cli.fields {
        let (name, value) = parse_field(pair)?;
        surface = surface.with_field(name, value);
    }

    let mut config = ChannelConfig::new(cli.host, cli.path);
    config.secure = cli.secure;
    config.identity_hint = cli.user;

    info!("Connecting to {}", config.endpoint());
    let (handle, view) = LockingClient::spawn(config, surface).await?;

    tokio::spawn(print_views(view.clone()));
    run_repl(&handle, view).await?;

    let surface = handle.shutdown().await?;
    println!("{}", serde_json::to_string_pretty(&surface)?);
    Ok(())
}

async fn print_views(mut view: watch::Receiver<SessionView>) {
    while view.changed().await.is_ok() {
        let current = view.borrow_and_update().clone();
        println!("{}", describe(&current));
    }
}

async fn run_repl(
    handle: &LockingClientHandle<FormSurface>,
    view: watch::Receiver<SessionView>,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let command = match parse_command(&line) {
            Ok(c) => c,
            Err(e) => {
                warn!("{}", e);
                continue;
            }
        };

        match command {
            Command::Set { field, value } => handle.edit(field, value)?,
            Command::Unlock => handle.request_unlock()?,
            Command::Force => handle.confirm_force_unlock()?,
            Command::Cancel => handle.cancel_unlock()?,
            Command::Status => {
                let current = view.borrow().clone();
                println!("{}", describe(&current));
                println!("{}", serde_json::to_string_pretty(&current)?);
            }
            Command::Quit => break,
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use content_locking::LockUiState;

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            parse_command("set title Hello world").unwrap(),
            Command::Set {
                field: "title".to_string(),
                value: "Hello world".to_string()
            }
        );
        assert_eq!(
            parse_command("set body").unwrap(),
            Command::Set {
                field: "body".to_string(),
                value: String::new()
            }
        );
        assert_eq!(parse_command(" unlock ").unwrap(), Command::Unlock);
        assert_eq!(parse_command("force").unwrap(), Command::Force);
        assert_eq!(parse_command("exit").unwrap(), Command::Quit);
        assert!(parse_command("set").is_err());
        assert!(parse_command("merge").is_err());
    }

    #[test]
    fn test_parse_field() {
        assert_eq!(
            parse_field("title=A=B").unwrap(),
            ("title".to_string(), "A=B".to_string())
        );
        assert!(parse_field("title").is_err());
    }

    #[test]
    fn test_describe_distinguishes_unknown_presence() {
        let mut view = SessionView {
            link: LinkStatus::Connecting,
            state: None,
            locked: false,
            owner: None,
            local: None,
            conflicts: Vec::new(),
            remote_dirty: false,
            local_dirty: false,
        };
        assert_eq!(describe(&view), "[editable] waiting for presence");

        view.link = LinkStatus::Live;
        assert_eq!(describe(&view), "[editable] no conflict");

        view.link = LinkStatus::Lost;
        view.locked = true;
        assert_eq!(describe(&view), "[read-only] connection lost, presence unknown");

        view.link = LinkStatus::Live;
        view.state = Some(LockUiState::IntruderConflict);
        assert!(describe(&view).starts_with("[read-only] IntruderConflict:"));
    }
}
