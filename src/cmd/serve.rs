//! Board server commands: `linboard serve` and `linboard init-db`.

use anyhow::Result;
use std::path::PathBuf;

use linboard::board::db::BoardDb;
use linboard::config::Config;

use super::super::Cli;

/// File, then environment, then flags.
fn effective_config(
    cli: &Cli,
    port: Option<u16>,
    db_path: Option<PathBuf>,
    dev: bool,
) -> Result<Config> {
    let mut config = Config::load_or_default(&cli.config)?;
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(db_path) = db_path {
        config.server.db_path = db_path;
    }
    if dev {
        config.server.dev_mode = true;
    }
    Ok(config)
}

pub async fn cmd_serve(
    cli: &Cli,
    port: Option<u16>,
    db_path: Option<PathBuf>,
    dev: bool,
) -> Result<()> {
    let config = effective_config(cli, port, db_path, dev)?;
    linboard::logging::init(config.logging.format, cli.verbose);
    linboard::board::server::start_server(config).await
}

pub fn cmd_init_db(cli: &Cli, db_path: Option<PathBuf>) -> Result<()> {
    let config = effective_config(cli, None, db_path, false)?;
    linboard::logging::init(config.logging.format, cli.verbose);
    BoardDb::new(&config.server.db_path)?;
    println!(
        "Board database initialized at {}",
        config.server.db_path.display()
    );
    Ok(())
}
