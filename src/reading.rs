// 電力計の計測値
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use crate::anomaly::{self, Thresholds};
use chrono::{Local, NaiveDateTime, Timelike};
use std::fmt;

/// データーベースのtimestampキーの書式(秒精度)
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// レジスタ読み出し値(スケール適用前)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawRegisters {
    pub voltage: u32,      // レジスタ0
    pub current: u32,      // レジスタ2
    pub power_factor: u32, // レジスタ4
    pub power: u32,        // レジスタ6
    pub energy: u32,       // レジスタ8
}

/// 計測値ひとそろい。取得に成功したときにだけ作られる。
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub timestamp: NaiveDateTime,
    pub voltage: f64,      // V
    pub current: f64,      // A
    pub power_factor: f64, // 力率
    pub power: f64,        // W
    pub energy: f64,       // kWh
    anomaly: bool,         // しきい値判定結果。構築時に確定する。
}

impl Reading {
    /// レジスタ値にスケールを適用して計測値を作る
    pub fn from_raw(timestamp: NaiveDateTime, raw: &RawRegisters, thresholds: &Thresholds) -> Self {
        let voltage = raw.voltage as f64 / 100.0;
        let current = raw.current as f64 / 100.0;
        let power_factor = raw.power_factor as f64 / 1000.0;
        let power = raw.power as f64 / 100.0;
        let energy = raw.energy as f64 / 1000.0;
        let anomaly = anomaly::classify(voltage, current, power, thresholds);
        Reading {
            timestamp,
            voltage,
            current,
            power_factor,
            power,
            energy,
            anomaly,
        }
    }

    /// データーベースに保存済みの行から計測値を復元する
    pub(crate) fn from_stored(
        timestamp: NaiveDateTime,
        voltage: f64,
        current: f64,
        power_factor: f64,
        power: f64,
        energy: f64,
        anomaly: bool,
    ) -> Self {
        Reading {
            timestamp,
            voltage,
            current,
            power_factor,
            power,
            energy,
            anomaly,
        }
    }

    pub fn anomaly(&self) -> bool {
        self.anomaly
    }

    /// timestampキー文字列
    pub fn timestamp_key(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} {:.2} V, {:.2} A, pf {:.3}, {:.2} W, {:.3} kWh{}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.voltage,
            self.current,
            self.power_factor,
            self.power,
            self.energy,
            if self.anomaly { " [ANOMALY]" } else { "" }
        )
    }
}

/// 取得時刻(ローカル時刻、秒精度に切り捨て)
pub fn acquisition_time() -> NaiveDateTime {
    let now = Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}

#[cfg(test)]
use chrono::NaiveDate;

#[test]
fn test1() {
    let timestamp = NaiveDate::from_ymd_opt(2025, 6, 1)
        .unwrap()
        .and_hms_opt(12, 34, 56)
        .unwrap();
    let thresholds = Thresholds {
        voltage_high: 250.0,
        voltage_low: 200.0,
        current_high: 10.0,
        power_high: 2000.0,
    };

    // スケールは電圧/電流/電力が1/100、力率/電力量が1/1000
    let raw = RawRegisters {
        voltage: 23500,
        current: 500,
        power_factor: 950,
        power: 220000,
        energy: 1500,
    };
    let reading = Reading::from_raw(timestamp, &raw, &thresholds);
    assert_eq!(reading.voltage, 235.0);
    assert_eq!(reading.current, 5.0);
    assert_eq!(reading.power_factor, 0.95);
    assert_eq!(reading.power, 2200.0);
    assert_eq!(reading.energy, 1.5);
    // 電力 2200 W > 2000 W なので異常
    assert!(reading.anomaly());

    assert_eq!(reading.timestamp_key(), "2025-06-01 12:34:56");
}

#[test]
fn test2() {
    let timestamp = NaiveDate::from_ymd_opt(2025, 6, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap();
    let thresholds = Thresholds {
        voltage_high: 250.0,
        voltage_low: 200.0,
        current_high: 10.0,
        power_high: 2000.0,
    };

    let raw = RawRegisters {
        voltage: 23500,
        current: 500,
        power_factor: 950,
        power: 110000,
        energy: 0,
    };
    let reading = Reading::from_raw(timestamp, &raw, &thresholds);
    assert!(!reading.anomaly());
    assert_eq!(reading.power, 1100.0);
    assert_eq!(reading.energy, 0.0);
}

#[test]
fn test3() {
    // 取得時刻は秒精度
    let t = acquisition_time();
    assert_eq!(t.and_utc().timestamp_subsec_nanos(), 0);
}
