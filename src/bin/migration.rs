use sea_orm::{ConnectOptions, Database};
use sea_orm_migration::MigratorTrait;
use std::time::Duration;
use stockroom_api::{config, migrator::Migrator};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::load_config()?;
    config::init_tracing(cfg.log_level(), cfg.log_json);

    let command = std::env::args().nth(1).unwrap_or_else(|| "up".to_string());
    info!(command = %command, "Starting database migration");

    let mut options = ConnectOptions::new(cfg.database_url().to_string());
    options
        .max_connections(2)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(10))
        .acquire_timeout(Duration::from_secs(10))
        .sqlx_logging(true);

    let db = Database::connect(options).await?;

    let result = match command.as_str() {
        "up" => Migrator::up(&db, None).await,
        "down" => Migrator::down(&db, Some(1)).await,
        "fresh" => Migrator::fresh(&db).await,
        "status" => Migrator::status(&db).await,
        other => {
            error!("Unknown migration command '{}'; expected up, down, fresh or status", other);
            std::process::exit(2);
        }
    };

    if let Err(e) = result {
        error!("Migration failed: {}", e);
        return Err(e.into());
    }

    info!("Migration completed successfully");
    Ok(())
}
