//! sentiment-etl
//!
//! ```bash
//! sentiment-etl run --source guardian
//! sentiment-etl dashboard --source twitter --keyword Oil --view analytics
//! ```

use chrono::{Local, NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use sentiment_etl::dashboard::{self, DashboardQuery, DashboardView};
use sentiment_etl::fetcher::FetcherFactory;
use sentiment_etl::storage::AnalyticsStore;
use sentiment_etl::{ETLConfig, Pipeline, SourceKind};

#[derive(Parser)]
#[command(name = "sentiment-etl", about = "Tweet / Guardian sentiment ETL", version)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Source {
    Twitter,
    Guardian,
}

impl From<Source> for SourceKind {
    fn from(value: Source) -> Self {
        match value {
            Source::Twitter => SourceKind::Twitter,
            Source::Guardian => SourceKind::Guardian,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum View {
    Table,
    Analytics,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, score and store recent records once
    Run {
        #[arg(short, long, value_enum)]
        source: Source,
        /// Override the recency window (minutes)
        #[arg(long)]
        max_age_minutes: Option<i64>,
    },
    /// Browse stored scores
    Dashboard {
        #[arg(short, long, value_enum)]
        source: Source,
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
        #[arg(short, long)]
        keyword: Option<String>,
        #[arg(long, default_value = "2021-01-01")]
        start_date: NaiveDate,
        #[arg(long, default_value = "2022-01-01")]
        end_date: NaiveDate,
        /// Override the table name
        #[arg(long)]
        table: Option<String>,
        #[arg(long, value_enum, default_value = "table")]
        view: View,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Run {
            source,
            max_age_minutes,
        } => {
            run_once(source.into(), max_age_minutes).await;
            println!("Pipeline executed successfully!");
        }
        Commands::Dashboard {
            source,
            database_url,
            keyword,
            start_date,
            end_date,
            table,
            view,
        } => {
            let source: SourceKind = source.into();
            let mut query = DashboardQuery::new(source, start_date, end_date);
            query.keyword = keyword;
            if let Some(table) = table {
                query.table = table;
            }

            let store = AnalyticsStore::connect(&database_url).await?;
            let documents = dashboard::load(&store, &query).await?;
            let rows = dashboard::prepare_rows(&documents, query.keyword.as_deref(), &Local);
            let view = match view {
                View::Table => DashboardView::Table,
                View::Analytics => DashboardView::Analytics,
            };

            println!(
                "{} sentiment | keyword={} start date={} end date={}\n",
                source,
                query.keyword.as_deref().unwrap_or(""),
                start_date,
                end_date
            );
            println!("{}", dashboard::render(&rows, view));
        }
    }

    Ok(())
}

/// 配置或抓取器构建失败也只记录日志，调用方始终视为执行完成
async fn run_once(source: SourceKind, max_age_minutes: Option<i64>) {
    let config = match ETLConfig::from_env(source) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {}", e);
            return;
        }
    };
    let config = match max_age_minutes {
        Some(minutes) => config.with_max_age_minutes(minutes),
        None => config,
    };

    let fetcher = match FetcherFactory::create(&config) {
        Ok(fetcher) => fetcher,
        Err(e) => {
            tracing::error!("Failed to build {} fetcher: {}", source, e);
            return;
        }
    };

    let pipeline = match Pipeline::from_config(config) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            tracing::error!("Failed to build pipeline: {}", e);
            return;
        }
    };

    let report = pipeline.run(fetcher.as_ref(), Utc::now()).await;
    if !report.is_clean() {
        tracing::warn!("Run finished with errors: {:?}", report);
    }
}
