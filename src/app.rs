//! Command dispatch for db-harvest.
//!
//! Resolves configuration, opens the right connector and runs one operation
//! per invocation.

use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::info;

use crate::cli::{Cli, Command, CopyArgs, OutputArgs};
use crate::config::{self, AzureBlobConfig, Config, ConnectionConfig, SnowflakeConfig};
use crate::db::{Connector, DatabaseClient, MssqlConnector, QueryResult, TableRef};
use crate::error::{HarvestError, Result};
use crate::export;
use crate::loader;
use crate::query::{close_quietly, QueryExecutor};
use crate::snowflake::SnowflakeClient;
use crate::storage::BlobUploader;
use crate::summary;
use crate::transform;

/// Runs the command selected on the command line.
pub async fn run(cli: Cli) -> Result<()> {
    config::load_env_file(cli.env_file.as_deref())?;

    let config_path = cli.config_path();
    info!("Loading config from: {}", config_path.display());
    let config = Config::load_from_file(&config_path)?;

    match &cli.command {
        Command::Table {
            table,
            condition,
            output,
        } => {
            let connector = mssql_connector(&cli, &config)?;
            let table = TableRef::parse(table)?;
            let frame = QueryExecutor::new(&connector)
                .query_table(cli.database.as_deref(), &table, condition.as_deref())
                .await?;
            emit(frame, output, &table.display_name()).await
        }
        Command::Query { sql, output } => {
            let connector = mssql_connector(&cli, &config)?;
            let frame = QueryExecutor::new(&connector)
                .query_statement(cli.database.as_deref(), sql)
                .await?;
            emit(frame, output, "Query").await
        }
        Command::Copy(args) => {
            let connector = mssql_connector(&cli, &config)?;
            copy(&connector, cli.database.as_deref(), args).await?;
            Ok(())
        }
        Command::Upload { file, blob_name } => {
            let uploader = BlobUploader::from_config(&AzureBlobConfig::from_env()?)?;
            let blob = uploader.upload_file(file, blob_name.as_deref()).await?;
            println!("{blob}");
            Ok(())
        }
        Command::Snowflake { sql, output } => {
            let frame = snowflake_query(&SnowflakeConfig::from_env()?, sql).await?;
            emit(frame, output, "Query").await
        }
        Command::Summary {
            output_dir,
            details,
            exclude,
            date,
            upload,
        } => {
            let connector = mssql_connector(&cli, &config)?;
            let mut settings = config.summary.clone();
            settings.show_column_details |= *details;
            settings.excluded_databases.extend(exclude.iter().cloned());
            let output_dir = output_dir
                .clone()
                .or_else(|| settings.output_dir.clone())
                .unwrap_or_else(|| PathBuf::from("."));
            let date = date.unwrap_or_else(|| Local::now().date_naive());

            let (_, output) =
                summary::run_summary(&connector, &settings, &output_dir, date).await?;
            println!("{}", output.tables_workbook.display());
            println!("{}", output.columns_workbook.display());

            if *upload {
                let uploader = BlobUploader::from_config(&AzureBlobConfig::from_env()?)?;
                uploader.upload_file(&output.tables_workbook, None).await?;
                uploader.upload_file(&output.columns_workbook, None).await?;
            }
            Ok(())
        }
    }
}

fn mssql_connector(cli: &Cli, config: &Config) -> Result<MssqlConnector> {
    let connection = resolve_connection(cli, config, |key| std::env::var(key).ok())?;
    info!("Connection: {}", connection.display_string());
    Ok(MssqlConnector::new(connection))
}

/// Resolves the final connection configuration from CLI args, config file, and environment.
///
/// Precedence: CLI arguments, then the named connection, then the config's
/// default connection, then `MSSQL_*` variables.
pub fn resolve_connection(
    cli: &Cli,
    config: &Config,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<ConnectionConfig> {
    let mut connection = cli.to_connection_config()?;

    if connection.is_none() {
        if let Some(name) = cli.connection_name() {
            connection = config.get_connection(Some(name)).cloned();
            if connection.is_none() {
                return Err(HarvestError::config(format!(
                    "Connection '{}' not found in config file",
                    name
                )));
            }
        }
    }

    if connection.is_none() {
        connection = config.get_connection(None).cloned();
    }

    let mut connection = connection.unwrap_or_default();
    if cli.linked_server.is_some() {
        connection.linked_server = cli.linked_server.clone();
    }
    connection.apply_defaults_from(lookup);
    Ok(connection)
}

/// Fetches the source frame and writes it into the target table.
///
/// Returns the number of rows loaded.
pub async fn copy(
    connector: &dyn Connector,
    database: Option<&str>,
    args: &CopyArgs,
) -> Result<usize> {
    let executor = QueryExecutor::new(connector);
    let mut frame = match (&args.table, &args.sql) {
        (Some(table), _) => {
            let table = TableRef::parse(table)?;
            executor
                .query_table(database, &table, args.condition.as_deref())
                .await?
        }
        (None, Some(sql)) => executor.query_statement(database, sql).await?,
        (None, None) => {
            return Err(HarvestError::config("copy needs --table or --sql"));
        }
    };
    for column in &args.format_datetime {
        transform::format_sql_datetime(&mut frame, column)?;
    }

    let target = loader::target_table(&args.target)?;
    let target_database = args.target_database.as_deref().or(database);
    let client = connector.connect(target_database).await?;
    let loaded = loader::write_frame(client.as_ref(), &frame, &target, args.mode, args.echo).await;
    close_quietly(client.as_ref()).await;
    loaded
}

async fn snowflake_query(config: &SnowflakeConfig, sql: &str) -> Result<QueryResult> {
    let client = SnowflakeClient::connect(config).await?;
    let result = client.execute_query(sql).await;
    close_quietly(&client).await;
    let frame = result?;
    info!("Query executed successfully ({} rows)", frame.row_count);
    Ok(frame)
}

/// Applies output options to a fetched frame: optional date formatting, then
/// a workbook, JSON or tab-separated text on stdout.
pub async fn emit(mut frame: QueryResult, output: &OutputArgs, default_sheet: &str) -> Result<()> {
    for column in &output.format_datetime {
        transform::format_sql_datetime(&mut frame, column)?;
    }

    if let Some(path) = &output.out {
        let saved = write_workbook(path, output.sheet.as_deref().unwrap_or(default_sheet), &frame)?;
        println!("{}", saved.display());
        if output.upload {
            let uploader = BlobUploader::from_config(&AzureBlobConfig::from_env()?)?;
            uploader.upload_file(&saved, None).await?;
        }
    } else if output.json {
        let json = serde_json::to_string_pretty(&frame)
            .map_err(|e| HarvestError::internal(format!("JSON encoding failed: {e}")))?;
        println!("{json}");
    } else {
        print!("{}", frame.to_tsv());
    }
    Ok(())
}

fn write_workbook(path: &Path, sheet: &str, frame: &QueryResult) -> Result<PathBuf> {
    if path
        .extension()
        .and_then(|e| e.to_str())
        .map_or(true, |e| !e.eq_ignore_ascii_case("xlsx"))
    {
        return Err(HarvestError::config(format!(
            "Output file {} must end in .xlsx",
            path.display()
        )));
    }
    export::write_single(path, sheet, frame)
}
