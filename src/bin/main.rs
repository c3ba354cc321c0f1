use anyhow::Context;
use comfy_table::{Cell, Table};
use structopt::StructOpt;

use morango_sync::cli::{Cli, Command};
use morango_sync::config::{defaults, Config, DatabaseLocation};
use morango_sync::store::{self, SyncStore};
use morango_sync::transport::client::{BasicAuth, Transport};
use morango_sync::transport::connection::{Connection, NetworkConnection, RequestOptions};

pub async fn main_with_cli(cli: Cli) -> Result<(), anyhow::Error> {
    let config_path = match cli.config {
        Some(path) => path,
        None => defaults::config_path()?,
    };

    if let Command::Configure(_) = cli.command {
        return tokio::task::spawn_blocking(|| Ok(edit::edit_file(config_path)?)).await?;
    }

    let config = Config::load(&config_path)
        .await
        .with_context(|| format!("could not load configuration from {:?}", config_path))?;

    let pool = match &config.database {
        DatabaseLocation::Sqlite(path) => {
            let path = path.to_str().context("database path must be valid UTF-8")?;
            store::connect_sqlite(path).await?
        }
        DatabaseLocation::Ephemeral => store::connect_sqlite(":memory:").await?,
    };
    pool.migrate().await?;

    let transport = Transport::new(config.peer_url.clone());
    let options = RequestOptions {
        basic_auth: config.basic_auth.clone().map(|(username, password)| BasicAuth {
            username,
            password: Some(password),
        }),
        timeout: config.request_timeout,
        max_retries: config.max_retries,
    };
    let connection = NetworkConnection::new(transport, options);

    match cli.command {
        Command::Configure(_) => unreachable!("handled above"),
        Command::Status(_) => print_status(&pool).await,
        Command::Close(_) => close_active_sync_session(&connection, &pool).await,
        Command::Push(push) => {
            let _ = (connection, push);
            todo!(
                "pushing requires a concrete CertificateAuthority and StoreEngine; an embedding \
                 application supplies those (see src/collaborators.rs) and drives \
                 morango_sync::Negotiator directly"
            )
        }
        Command::Pull(pull) => {
            let _ = (connection, pull);
            todo!(
                "pulling requires a concrete CertificateAuthority and StoreEngine; an embedding \
                 application supplies those (see src/collaborators.rs) and drives \
                 morango_sync::Negotiator directly"
            )
        }
    }
}

async fn print_status(pool: &sqlx::SqlitePool) -> Result<(), anyhow::Error> {
    let mut table = Table::new();
    table.load_preset(comfy_table::presets::UTF8_FULL);
    table.set_header(vec!["Sync Session", "Peer", "Active", "Transfer Sessions"]);

    for session in pool.list_sync_sessions().await? {
        let transfers = pool.list_transfer_sessions(session.id).await?;
        table.add_row(vec![
            Cell::new(session.id),
            Cell::new(&session.connection_path),
            Cell::new(session.active),
            Cell::new(transfers.len()),
        ]);
    }

    println!("{}", table);
    Ok(())
}

async fn close_active_sync_session(
    connection: &NetworkConnection,
    pool: &sqlx::SqlitePool,
) -> Result<(), anyhow::Error> {
    let session = pool
        .list_sync_sessions()
        .await?
        .into_iter()
        .find(|session| session.active)
        .context("no active sync session to close")?;

    let has_open_transfer = pool
        .list_transfer_sessions(session.id)
        .await?
        .iter()
        .any(|transfer| transfer.active);
    if has_open_transfer {
        anyhow::bail!("sync session has an open transfer session; close it first");
    }

    connection.close_sync_session(session.id).await?;
    pool.deactivate_sync_session(session.id).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    main_with_cli(Cli::from_args()).await
}
