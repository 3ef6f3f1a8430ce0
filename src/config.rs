// 監視設定ファイル
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use crate::anomaly::Thresholds;
use serde::Deserialize;
use serialport::{DataBits, Parity, StopBits};
use std::io;
use std::path::Path;
use std::time::Duration;
use std::{fs, result};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(r#"config file read "{0}""#)]
    Read(#[from] io::Error),

    #[error(r#"config file parse "{0}""#)]
    Parse(#[from] toml::de::Error),

    #[error(r#"invalid value for "{field}": {value}"#)]
    Invalid { field: &'static str, value: String },
}

/// 監視設定。起動時に一度だけ読み込んで以後変更しない。
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    pub serial_port: String,
    pub slave_address: u8,
    pub baudrate: u32,
    pub bytesize: u8,
    pub parity: String,
    pub stopbits: u8,
    pub timeout: f64,      // 秒
    pub refresh_rate: f64, // 秒
    pub anomaly_voltage_high: f64,
    pub anomaly_voltage_low: f64,
    pub anomaly_current_high: f64,
    pub anomaly_power_high: f64,
}

impl MonitorConfig {
    /// 設定ファイルから読み込む。無い・壊れている・値が不正なら起動中止。
    pub fn from_file<P: AsRef<Path>>(path: P) -> result::Result<Self, ConfigError> {
        let file = fs::read_to_string(path)?;
        Self::from_toml(&file)
    }

    pub fn from_toml(document: &str) -> result::Result<Self, ConfigError> {
        let config = toml::from_str::<MonitorConfig>(document)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> result::Result<(), ConfigError> {
        // timestampキーが秒精度なので1秒未満の周期は同一キー衝突を起こす
        if self.refresh_rate < 1.0 {
            return Err(ConfigError::Invalid {
                field: "refresh_rate",
                value: format!("{} (must be at least 1 second)", self.refresh_rate),
            });
        }
        if self.timeout <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "timeout",
                value: self.timeout.to_string(),
            });
        }
        self.data_bits()?;
        self.parity()?;
        self.stop_bits()?;
        Ok(())
    }

    pub fn data_bits(&self) -> result::Result<DataBits, ConfigError> {
        match self.bytesize {
            5 => Ok(DataBits::Five),
            6 => Ok(DataBits::Six),
            7 => Ok(DataBits::Seven),
            8 => Ok(DataBits::Eight),
            n => Err(ConfigError::Invalid {
                field: "bytesize",
                value: n.to_string(),
            }),
        }
    }

    pub fn parity(&self) -> result::Result<Parity, ConfigError> {
        match self.parity.as_str() {
            "N" => Ok(Parity::None),
            "E" => Ok(Parity::Even),
            "O" => Ok(Parity::Odd),
            s => Err(ConfigError::Invalid {
                field: "parity",
                value: s.to_string(),
            }),
        }
    }

    pub fn stop_bits(&self) -> result::Result<StopBits, ConfigError> {
        match self.stopbits {
            1 => Ok(StopBits::One),
            2 => Ok(StopBits::Two),
            n => Err(ConfigError::Invalid {
                field: "stopbits",
                value: n.to_string(),
            }),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs_f64(self.refresh_rate)
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            voltage_high: self.anomaly_voltage_high,
            voltage_low: self.anomaly_voltage_low,
            current_high: self.anomaly_current_high,
            power_high: self.anomaly_power_high,
        }
    }
}

#[cfg(test)]
const DOCUMENT: &str = r#"
serial_port = "/dev/ttyUSB0"
slave_address = 1
baudrate = 9600
bytesize = 8
parity = "N"
stopbits = 1
timeout = 0.5
refresh_rate = 5.0
anomaly_voltage_high = 250.0
anomaly_voltage_low = 200.0
anomaly_current_high = 10.0
anomaly_power_high = 2000.0
"#;

#[test]
fn test1() {
    let config = MonitorConfig::from_toml(DOCUMENT).unwrap();
    assert_eq!(config.serial_port, "/dev/ttyUSB0");
    assert_eq!(config.slave_address, 1);
    assert_eq!(config.baudrate, 9600);
    assert_eq!(config.data_bits().unwrap(), DataBits::Eight);
    assert_eq!(config.parity().unwrap(), Parity::None);
    assert_eq!(config.stop_bits().unwrap(), StopBits::One);
    assert_eq!(config.timeout(), Duration::from_millis(500));
    assert_eq!(config.refresh_interval(), Duration::from_secs(5));
    assert_eq!(
        config.thresholds(),
        Thresholds {
            voltage_high: 250.0,
            voltage_low: 200.0,
            current_high: 10.0,
            power_high: 2000.0,
        }
    );
}

#[test]
fn test2() {
    // 必須キーの欠落は読み込み失敗
    let document = DOCUMENT.replace(r#"serial_port = "/dev/ttyUSB0""#, "");
    assert!(matches!(
        MonitorConfig::from_toml(&document),
        Err(ConfigError::Parse(_))
    ));

    // 壊れた文書も読み込み失敗
    assert!(matches!(
        MonitorConfig::from_toml("serial_port = ["),
        Err(ConfigError::Parse(_))
    ));
}

#[test]
fn test3() {
    // 1秒未満の取得周期は設定エラー
    let document = DOCUMENT.replace("refresh_rate = 5.0", "refresh_rate = 0.5");
    assert!(matches!(
        MonitorConfig::from_toml(&document),
        Err(ConfigError::Invalid {
            field: "refresh_rate",
            ..
        })
    ));

    // 未対応のパリティ指定も設定エラー
    let document = DOCUMENT.replace(r#"parity = "N""#, r#"parity = "M""#);
    assert!(matches!(
        MonitorConfig::from_toml(&document),
        Err(ConfigError::Invalid { field: "parity", .. })
    ));
}
