// 計測値データーベース
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use crate::reading::{Reading, TIMESTAMP_FORMAT};
use chrono::NaiveDateTime;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::result;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error(r#"database "{0}""#)]
    Database(#[from] sqlx::Error),

    #[error(r#"duplicate timestamp "{0}" (refresh interval too short?)"#)]
    DuplicateTimestamp(String),

    #[error(r#"stored timestamp parse "{0}""#)]
    Timestamp(#[from] chrono::ParseError),
}

/// 計測値の追記専用ストア。timestampが主キー。
#[derive(Clone)]
pub struct ReadingStore {
    pool: SqlitePool,
}

impl ReadingStore {
    /// データーベースに接続する。
    /// 書き込むのは取得ループひとつだけなので接続もひとつでよい。
    pub async fn connect(database_url: &str) -> result::Result<Self, StorageError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(database_url)
            .await?;
        Ok(ReadingStore { pool })
    }

    /// テーブルがなければ作る。既存のテーブルには触らない。
    pub async fn ensure_schema(&self) -> result::Result<(), StorageError> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS readings (
                timestamp TEXT PRIMARY KEY,
                voltage REAL,
                current REAL,
                power_factor REAL,
                power REAL,
                energy REAL,
                anomaly INTEGER
            )"#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// 計測値をひとつ追記する。timestampの重複は黙って上書きせず
    /// 区別可能なエラーとして返す。
    pub async fn append(&self, reading: &Reading) -> result::Result<(), StorageError> {
        let timestamp = reading.timestamp_key();
        let result = sqlx::query(
            r#"INSERT INTO readings
                ( timestamp, voltage, current, power_factor, power, energy, anomaly )
                VALUES ( ?1, ?2, ?3, ?4, ?5, ?6, ?7 )"#,
        )
        .bind(&timestamp)
        .bind(reading.voltage)
        .bind(reading.current)
        .bind(reading.power_factor)
        .bind(reading.power)
        .bind(reading.energy)
        .bind(reading.anomaly())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StorageError::DuplicateTimestamp(timestamp))
            }
            Err(e) => Err(StorageError::Database(e)),
        }
    }

    /// 新しい順に最大n件返す。何度呼んでも同じ結果になる。
    pub async fn recent(&self, n: u32) -> result::Result<Vec<Reading>, StorageError> {
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

        let rows = sqlx::query_as::<_, Row>(
            r#"SELECT timestamp, voltage, current, power_factor, power, energy, anomaly
                FROM readings ORDER BY timestamp DESC LIMIT ?1"#,
        )
        .bind(n)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let timestamp = NaiveDateTime::parse_from_str(&row.timestamp, TIMESTAMP_FORMAT)?;
                Ok(Reading::from_stored(
                    timestamp,
                    row.voltage,
                    row.current,
                    row.power_factor,
                    row.power,
                    row.energy,
                    row.anomaly,
                ))
            })
            .collect()
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
use crate::anomaly::Thresholds;
#[cfg(test)]
use crate::reading::RawRegisters;
#[cfg(test)]
use chrono::NaiveDate;

#[cfg(test)]
fn reading_at(second: u32, power: u32) -> Reading {
    let timestamp = NaiveDate::from_ymd_opt(2025, 6, 1)
        .unwrap()
        .and_hms_opt(12, 0, second)
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
        power,
        energy: 1500,
    };
    Reading::from_raw(timestamp, &raw, &thresholds)
}

#[cfg(test)]
async fn memory_store() -> ReadingStore {
    let store = ReadingStore::connect("sqlite::memory:").await.unwrap();
    store.ensure_schema().await.unwrap();
    store
}

#[tokio::test]
async fn test1() {
    // 追記した順の逆順(新しい順)で返る
    let store = memory_store().await;
    let r1 = reading_at(1, 110000);
    let r2 = reading_at(2, 110000);
    let r3 = reading_at(3, 110000);
    store.append(&r1).await.unwrap();
    store.append(&r2).await.unwrap();
    store.append(&r3).await.unwrap();

    let recent = store.recent(3).await.unwrap();
    assert_eq!(recent, vec![r3.clone(), r2.clone(), r1.clone()]);

    // 件数指定が多すぎてもある分だけ返る
    let recent = store.recent(10).await.unwrap();
    assert_eq!(recent.len(), 3);

    // 追記なしで呼び直しても同じ結果(冪等)
    let again = store.recent(10).await.unwrap();
    assert_eq!(recent, again);

    // 新しい2件だけ
    let recent = store.recent(2).await.unwrap();
    assert_eq!(recent, vec![r3, r2]);
}

#[tokio::test]
async fn test2() {
    // timestampの重複は拒否されて、ストアの中身は変わらない
    let store = memory_store().await;
    let first = reading_at(1, 110000);
    let duplicate = reading_at(1, 220000);
    store.append(&first).await.unwrap();

    assert!(matches!(
        store.append(&duplicate).await,
        Err(StorageError::DuplicateTimestamp(_))
    ));

    let recent = store.recent(10).await.unwrap();
    assert_eq!(recent, vec![first]);
}

#[tokio::test]
async fn test3() {
    // 異常フラグも含めて往復する
    let store = memory_store().await;
    let reading = reading_at(0, 220000); // 2200 W > 2000 W
    assert!(reading.anomaly());
    store.append(&reading).await.unwrap();

    let recent = store.recent(1).await.unwrap();
    assert_eq!(recent.len(), 1);
    assert!(recent[0].anomaly());
    assert_eq!(recent[0], reading);

    // テーブル作成は何度実行してもよい
    store.ensure_schema().await.unwrap();
    assert_eq!(store.recent(1).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test4() {
    // 空のストア
    let store = memory_store().await;
    assert!(store.recent(10).await.unwrap().is_empty());
    store.close().await;
}
