//! `backpocket` CLI parser and command handlers.
use crate::tether::{Tether, build_fetcher};
use anyhow::{Result, bail};
use backpocket_actors::worker;
use backpocket_actors::NewSave;
use backpocket_common::{SnapshotStatus, Visibility};
use backpocket_config::BackpocketConfig;
use backpocket_extract::{ReadabilityExtractor, process_html};
use backpocket_http::PageFetcher;
use backpocket_http::guard::HostGuard;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "backpocket")]
#[command(about = "Snapshot saved links into readable, archived articles")]
#[command(version)]
pub struct Cli {
    /// Config file (default: ./backpocket.yaml when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Acting user id
    #[arg(short, long, global = true, env = "BACKPOCKET_USER")]
    pub user: Option<String>,

    /// Mirror logs to stderr at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage spaces
    Space {
        #[command(subcommand)]
        command: SpaceCommands,
    },

    /// Save a URL into a space and snapshot it
    Save {
        /// Space id
        space: Uuid,
        url: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        /// Make the save publicly readable
        #[arg(long)]
        public: bool,
        /// Print the finished snapshot instead of the scheduled id
        #[arg(short, long)]
        wait: bool,
    },

    /// Request a new snapshot run for a save
    Refresh {
        save: Uuid,
        /// Re-run even when the snapshot is ready
        #[arg(short, long)]
        force: bool,
        #[arg(short, long)]
        wait: bool,
    },

    /// Show the latest snapshot of a save
    Show {
        save: Uuid,
        /// Include extracted HTML and text
        #[arg(long)]
        content: bool,
        /// Read through the public path (requires --space)
        #[arg(long, requires = "space")]
        public: bool,
        #[arg(long)]
        space: Option<Uuid>,
    },

    /// Manual refresh usage in the current window
    Quota,

    /// Delete a save and its snapshots
    Delete { save: Uuid },

    /// Fetch and extract a URL once, without touching the database
    Extract { url: String },
}

#[derive(Subcommand)]
enum SpaceCommands {
    /// Create a space owned by the acting user
    Create {
        slug: String,
        #[arg(long)]
        public: bool,
    },
}

fn visibility(public: bool) -> Visibility {
    if public {
        Visibility::Public
    } else {
        Visibility::Private
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn run(cli: Cli, cfg: BackpocketConfig, cancel: CancellationToken) -> Result<()> {
    if let Commands::Extract { url } = &cli.command {
        return cmd_extract(&cfg, url).await;
    }

    let tether = Tether::build(&cfg).await?;
    let result = dispatch(&tether, cli, &cancel).await;
    tether.shutdown().await?;
    result
}

async fn dispatch(t: &Tether, cli: Cli, cancel: &CancellationToken) -> Result<()> {
    let user = cli.user.as_deref();
    match cli.command {
        Commands::Space {
            command: SpaceCommands::Create { slug, public },
        } => {
            let space = t.service.create_space(user, &slug, visibility(public)).await?;
            print_json(&space)
        }
        Commands::Save {
            space,
            url,
            title,
            description,
            public,
            wait,
        } => {
            let new = NewSave {
                url,
                title,
                description,
                visibility: visibility(public),
            };
            let (save, snapshot_id) = t.service.create_save(user, space, new).await?;
            if !wait {
                println!("save {} snapshot {} scheduled", save.id, snapshot_id);
            }
            finish_run(t, cancel, snapshot_id).await?;
            if wait {
                print_json(&t.service.get_snapshot(user, save.id, false).await?)?;
            }
            Ok(())
        }
        Commands::Refresh { save, force, wait } => {
            let resp = t.service.request_refresh(user, save, force).await?;
            if !wait || !resp.scheduled {
                print_json(&resp)?;
            }
            if resp.scheduled {
                finish_run(t, cancel, resp.snapshot_id).await?;
                if wait {
                    print_json(&t.service.get_snapshot(user, save, false).await?)?;
                }
            }
            Ok(())
        }
        Commands::Show {
            save,
            content,
            public,
            space,
        } => {
            let view = match (public, space) {
                (true, Some(space)) => t.service.get_public_snapshot(space, save, content).await?,
                (true, None) => bail!("--public needs --space"),
                (false, _) => t.service.get_snapshot(user, save, content).await?,
            };
            match view {
                Some(view) => print_json(&view),
                None => bail!("no snapshot for save {save}"),
            }
        }
        Commands::Quota => print_json(&t.service.quota(user).await?),
        Commands::Delete { save } => {
            t.service.delete_save(user, save).await?;
            println!("deleted save {save}");
            Ok(())
        }
        Commands::Extract { .. } => bail!("extract runs without the database"),
    }
}

/// Keep the process alive until the run is terminal, so a short-lived CLI
/// invocation never exits with the record still `processing`.
async fn finish_run(t: &Tether, cancel: &CancellationToken, snapshot_id: Uuid) -> Result<()> {
    tokio::select! {
        status = worker::watch(&t.worker, snapshot_id) => {
            let status = status?;
            tracing::info!(snapshot_id=%snapshot_id, status=%status, "cli.run.finished");
            if status != SnapshotStatus::Ready {
                eprintln!("snapshot {snapshot_id} ended {status}");
            }
            Ok(())
        }
        _ = cancel.cancelled() => {
            eprintln!("interrupted; snapshot {snapshot_id} may still be processing");
            Ok(())
        }
    }
}

async fn cmd_extract(cfg: &BackpocketConfig, raw: &str) -> Result<()> {
    let guard = HostGuard::new(cfg.fetch.allow_private_networks);
    let url = match guard.check(raw) {
        Ok(url) => url,
        Err(reason) => bail!("{}: {raw}", reason.describe()),
    };
    let fetcher = build_fetcher(cfg)?;
    let page = match fetcher.fetch(&url).await {
        Ok(page) => page,
        Err(err) => bail!("{} ({})", err, err.blocked_reason()),
    };
    let extractor = ReadabilityExtractor::from_config(&cfg.extract);
    let extracted = process_html(&page.html, &page.final_url, &extractor, &cfg.extract)
        .map_err(|err| anyhow::anyhow!("{} ({})", err, err.blocked_reason()))?;
    print_json(&extracted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn public_show_requires_space() {
        let save = Uuid::new_v4().to_string();
        let save = save.as_str();
        assert!(Cli::try_parse_from(["backpocket", "show", save, "--public"]).is_err());
        let space = Uuid::new_v4().to_string();
        let cli = Cli::try_parse_from([
            "backpocket",
            "show",
            save,
            "--public",
            "--space",
            space.as_str(),
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Show { public: true, .. }));
    }

    #[test]
    fn refresh_flags_parse() {
        let save = Uuid::new_v4();
        let raw = save.to_string();
        let cli = Cli::try_parse_from([
            "backpocket",
            "--user",
            "u1",
            "refresh",
            raw.as_str(),
            "--force",
            "--wait",
        ])
        .unwrap();
        assert_eq!(cli.user.as_deref(), Some("u1"));
        match cli.command {
            Commands::Refresh { save: s, force, wait } => {
                assert_eq!(s, save);
                assert!(force && wait);
            }
            _ => panic!("expected refresh"),
        }
    }
}
