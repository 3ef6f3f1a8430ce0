// 計測値データーベースをいじる
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use futures_util::TryStreamExt;
use sqlx::sqlite::SqlitePool;

/// 計測値データーベースをいじる
#[derive(Parser, Debug)]
#[command(name = "manipulate_db")]
#[command(version, about, long_about = None)]
struct Cli {
    /// データベースURL
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite:energy_data.db")]
    database_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// 計測値を新しい順に得る
    #[clap(alias = "get-record")]
    Get(GetArgs),
    /// 異常フラグの付いた計測値を得る
    Anomalies,
}

#[derive(Debug, Args)]
struct GetArgs {
    /// レコード数
    #[arg(short = 'C', long, default_value_t = 10)]
    count: u32,
}

#[derive(sqlx::FromRow)]
struct Row {
    timestamp: String,
    voltage: f64,
    current: f64,
    power_factor: f64,
    power: f64,
    energy: f64,
    anomaly: bool,
}

impl Row {
    fn show(&self) -> String {
        format!(
            "{} {:.2} V, {:.2} A, pf {:.3}, {:.2} W, {:.3} kWh{}",
            self.timestamp,
            self.voltage,
            self.current,
            self.power_factor,
            self.power,
            self.energy,
            if self.anomaly { " [ANOMALY]" } else { "" }
        )
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    // コマンドライン引数
    let cli = Cli::parse();

    let pool = SqlitePool::connect(&cli.database_url)
        .await
        .context("データベースとの接続失敗")?;

    match &cli.command {
        Commands::Get(args) => exec_get_record(&pool, args).await,
        Commands::Anomalies => exec_anomalies(&pool).await,
    }
}

/// 計測値を新しい順に表示する
async fn exec_get_record(pool: &SqlitePool, args: &GetArgs) -> anyhow::Result<()> {
    let rows = sqlx::query_as::<_, Row>(
        r#"SELECT timestamp, voltage, current, power_factor, power, energy, anomaly
            FROM readings ORDER BY timestamp DESC LIMIT ?1"#,
    )
    .bind(args.count)
    .fetch_all(pool)
    .await?;

    for row in rows.iter() {
        println!("{}", row.show());
    }
    println!("{} rows.", rows.len());
    Ok(())
}

/// 異常フラグの付いた計測値を表示する
async fn exec_anomalies(pool: &SqlitePool) -> anyhow::Result<()> {
    let mut rows = sqlx::query_as::<_, Row>(
        r#"SELECT timestamp, voltage, current, power_factor, power, energy, anomaly
            FROM readings WHERE anomaly = 1 ORDER BY timestamp DESC"#,
    )
    .fetch(pool);

    let mut counter: usize = 0;
    while let Some(row) = rows.try_next().await? {
        println!("{}", row.show());
        counter += 1;
    }
    println!("{} anomalies.", counter);
    Ok(())
}
