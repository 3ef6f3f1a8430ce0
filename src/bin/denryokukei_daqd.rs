// 電力計からデーターを収集してデーターベースに蓄積する。
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use clap::Parser;
use denryokukei::Reading;
use denryokukei::acquisition::{AcquisitionLoop, DisplaySink};
use denryokukei::config::{ConfigError, MonitorConfig};
use denryokukei::meter::MeterReader;
use denryokukei::store::{ReadingStore, StorageError};
use std::process::ExitCode;
use std::result;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Error)]
pub enum DaqDaemonError {
    #[error(r#"config "{0}""#)]
    Config(#[from] ConfigError),

    #[error(r#"serial port "{0}""#)]
    SerialPort(#[from] serialport::Error),

    #[error(r#"storage "{0}""#)]
    Storage(#[from] StorageError),
}

/// 電力計を定期的に読み出してデーターベースに蓄積する。
#[derive(Parser, Debug)]
#[command(name = "denryokukei_daqd")]
#[command(version, about, long_about = None)]
struct Cli {
    /// 設定ファイル名
    #[arg(short = 'S', long, default_value = "denryokukei.toml")]
    config_file: String,

    /// データベースURL
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "sqlite:energy_data.db?mode=rwc"
    )]
    database_url: String,
}

/// 最新値と履歴をログに出す表示面
struct TracingSink;

impl DisplaySink for TracingSink {
    fn accept(&mut self, latest: &Reading, recent: &[Reading]) {
        tracing::info!("{latest}");
        if latest.anomaly() {
            tracing::warn!("anomaly detected at {}", latest.timestamp_key());
        }
        tracing::debug!("{} readings in recent history", recent.len());
    }
}

/// 電力計からデーターを収集する
async fn exec_data_acquisition(
    cli: &Cli,
    cancel: CancellationToken,
) -> result::Result<(), DaqDaemonError> {
    // 設定ファイルの欠落・破損は致命的。取得を始める前に止まる。
    let config = MonitorConfig::from_file(&cli.config_file)?;

    // シリアルポートを開く
    let serial_port = serialport::new(&config.serial_port, config.baudrate)
        .data_bits(config.data_bits()?)
        .parity(config.parity()?)
        .stop_bits(config.stop_bits()?)
        .timeout(config.timeout())
        .open()?;
    let reader = MeterReader::new(serial_port, config.slave_address);

    // データーベースに接続してテーブルを用意する
    let store = ReadingStore::connect(&cli.database_url).await?;
    store.ensure_schema().await?;

    let acquisition = AcquisitionLoop::new(
        reader,
        store,
        TracingSink,
        config.thresholds(),
        config.refresh_interval(),
    );
    let store = acquisition.run(cancel).await?;
    store.close().await;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let app_info = format!("{} / {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    // tracingの設定
    let registry = tracing_subscriber::registry();

    // systemd-journaldに接続
    match tracing_journald::layer() {
        // journaldにログ出力する
        Ok(journald_layer) => registry.with(journald_layer).init(),
        // journaldが使えないので、標準出力にログ出力する
        Err(e) => {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_timer(tracing_subscriber::fmt::time::LocalTime::rfc_3339())
                        .with_file(false)
                        .with_line_number(false)
                        .with_thread_names(false)
                        .with_thread_ids(false)
                        .with_ansi(false),
                )
                .init();
            tracing::warn!("couldn't connect to journald: {}", e)
        }
    }

    dotenv::dotenv().ok();

    // コマンドライン引数
    let cli = Cli::parse();

    // Ctrl-Cで停止要求を出す
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("stop requested");
            signal_cancel.cancel();
        }
    });

    // サービスを開始する
    tracing::info!("{app_info} started.");
    match exec_data_acquisition(&cli, cancel).await {
        Ok(()) => {
            tracing::info!("{app_info} stopped.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("{app_info} aborted, reason: {e}");
            ExitCode::FAILURE
        }
    }
}
