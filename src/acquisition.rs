// 取得ループ(読み出し→判定→追記→公開)
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use crate::anomaly::Thresholds;
use crate::meter::ReadMeter;
use crate::reading::{self, Reading};
use crate::store::{ReadingStore, StorageError};
use std::result;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// 表示面へ渡す履歴の件数
pub const HISTORY_DEPTH: u32 = 10;

/// 表示面。サイクルごとに最新値と新しい順の履歴を受け取る。
/// 描画方法はこちらでは関知しない。
pub trait DisplaySink {
    fn accept(&mut self, latest: &Reading, recent: &[Reading]);
}

/// 取得ループ。電力計とストアのハンドルはここが専有する。
pub struct AcquisitionLoop<R, D> {
    reader: R,
    store: ReadingStore,
    sink: D,
    thresholds: Thresholds,
    refresh_interval: Duration,
}

impl<R, D> AcquisitionLoop<R, D>
where
    R: ReadMeter,
    D: DisplaySink,
{
    pub fn new(
        reader: R,
        store: ReadingStore,
        sink: D,
        thresholds: Thresholds,
        refresh_interval: Duration,
    ) -> Self {
        AcquisitionLoop {
            reader,
            store,
            sink,
            thresholds,
            refresh_interval,
        }
    }

    /// 停止要求まで取得サイクルを繰り返す。
    /// 停止時は実行中のサイクルを終えてから抜ける。
    /// 正常終了ならストアを返すので呼び出し側が閉じる。
    pub async fn run(
        mut self,
        cancel: CancellationToken,
    ) -> result::Result<ReadingStore, StorageError> {
        while !cancel.is_cancelled() {
            self.run_cycle().await?;
            // サイクル終了から次の開始までを取得周期とする(固定レートではない)。
            // 読み出しに時間がかかった分だけ次のサイクルは遅れる。
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.refresh_interval) => {}
            }
        }
        tracing::info!("acquisition loop stopped");
        Ok(self.store)
    }

    /// 1サイクル。読み出し失敗はこのサイクルを飛ばすだけで、
    /// 即時の再試行はしない(次のティックが再試行を兼ねる)。
    /// ストアへの追記失敗だけがループを止める。
    async fn run_cycle(&mut self) -> result::Result<(), StorageError> {
        let timestamp = reading::acquisition_time();
        let raw = match self.reader.read() {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("meter read failed, skipping this cycle: {e}");
                return Ok(());
            }
        };

        let reading = Reading::from_raw(timestamp, &raw, &self.thresholds);
        self.store.append(&reading).await?;

        let recent = self.store.recent(HISTORY_DEPTH).await?;
        self.sink.accept(&reading, &recent);
        Ok(())
    }
}

#[cfg(test)]
use crate::modbus::DeviceError;
#[cfg(test)]
use crate::reading::RawRegisters;
#[cfg(test)]
use std::collections::VecDeque;
#[cfg(test)]
use std::io;
#[cfg(test)]
use std::sync::{Arc, Mutex};

/// 台本どおりの結果を返して、尽きたら停止要求を出す電力計(テスト用)
#[cfg(test)]
struct ScriptedMeter {
    script: VecDeque<result::Result<RawRegisters, DeviceError>>,
    cancel: CancellationToken,
}

#[cfg(test)]
impl ReadMeter for ScriptedMeter {
    fn read(&mut self) -> result::Result<RawRegisters, DeviceError> {
        let next = self.script.pop_front().unwrap_or_else(|| {
            Err(DeviceError::Io(io::Error::from(io::ErrorKind::TimedOut)))
        });
        if self.script.is_empty() {
            self.cancel.cancel();
        }
        next
    }
}

#[cfg(test)]
#[derive(Clone, Default)]
struct RecordingSink {
    published: Arc<Mutex<Vec<(Reading, Vec<Reading>)>>>,
}

#[cfg(test)]
impl DisplaySink for RecordingSink {
    fn accept(&mut self, latest: &Reading, recent: &[Reading]) {
        self.published
            .lock()
            .unwrap()
            .push((latest.clone(), recent.to_vec()));
    }
}

#[cfg(test)]
const THRESHOLDS: Thresholds = Thresholds {
    voltage_high: 250.0,
    voltage_low: 200.0,
    current_high: 10.0,
    power_high: 2000.0,
};

#[cfg(test)]
async fn memory_store() -> ReadingStore {
    let store = ReadingStore::connect("sqlite::memory:").await.unwrap();
    store.ensure_schema().await.unwrap();
    store
}

#[tokio::test]
async fn test1() {
    // 成功サイクル: 追記されて最新値と履歴が公開される
    let cancel = CancellationToken::new();
    let meter = ScriptedMeter {
        script: VecDeque::from(vec![Ok(RawRegisters {
            voltage: 23500,
            current: 500,
            power_factor: 950,
            power: 220000,
            energy: 1500,
        })]),
        cancel: cancel.clone(),
    };
    let sink = RecordingSink::default();
    let published = sink.published.clone();

    let store = memory_store().await;
    let acquisition = AcquisitionLoop::new(
        meter,
        store,
        sink,
        THRESHOLDS,
        Duration::from_millis(10),
    );
    let store = acquisition.run(cancel).await.unwrap();

    // ストアには異常フラグ付きの1行だけ
    let rows = store.recent(10).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].power, 2200.0);
    assert!(rows[0].anomaly());

    // 公開は1回、最新値は追記した行、履歴は新しい順
    let published = published.lock().unwrap();
    assert_eq!(published.len(), 1);
    let (latest, recent) = &published[0];
    assert_eq!(*latest, rows[0]);
    assert_eq!(*recent, rows);
}

#[tokio::test]
async fn test2() {
    // 読み出し失敗: ストアは変化せず、公開もされず、ループは止まらない
    let cancel = CancellationToken::new();
    let meter = ScriptedMeter {
        script: VecDeque::from(vec![Err(DeviceError::Io(io::Error::from(
            io::ErrorKind::TimedOut,
        )))]),
        cancel: cancel.clone(),
    };
    let sink = RecordingSink::default();
    let published = sink.published.clone();

    let store = memory_store().await;
    let acquisition = AcquisitionLoop::new(
        meter,
        store,
        sink,
        THRESHOLDS,
        Duration::from_millis(10),
    );
    let store = acquisition.run(cancel).await.unwrap();

    assert!(store.recent(10).await.unwrap().is_empty());
    assert!(published.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test3() {
    // 失敗サイクルの次のティックで回復する(即時再試行はしない)
    let cancel = CancellationToken::new();
    let meter = ScriptedMeter {
        script: VecDeque::from(vec![
            Err(DeviceError::Checksum { register: 0 }),
            Ok(RawRegisters {
                voltage: 23500,
                current: 500,
                power_factor: 950,
                power: 110000,
                energy: 1500,
            }),
        ]),
        cancel: cancel.clone(),
    };
    let sink = RecordingSink::default();
    let published = sink.published.clone();

    let store = memory_store().await;
    let acquisition = AcquisitionLoop::new(
        meter,
        store,
        sink,
        THRESHOLDS,
        Duration::from_millis(10),
    );
    let store = acquisition.run(cancel).await.unwrap();

    let rows = store.recent(10).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert!(!rows[0].anomaly());
    assert_eq!(published.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test4() {
    // 停止要求済みならサイクルをひとつも回さない
    let cancel = CancellationToken::new();
    cancel.cancel();
    let meter = ScriptedMeter {
        script: VecDeque::new(),
        cancel: cancel.clone(),
    };
    let sink = RecordingSink::default();
    let published = sink.published.clone();

    let store = memory_store().await;
    let acquisition = AcquisitionLoop::new(
        meter,
        store,
        sink,
        THRESHOLDS,
        Duration::from_millis(10),
    );
    let store = acquisition.run(cancel).await.unwrap();

    assert!(store.recent(10).await.unwrap().is_empty());
    assert!(published.lock().unwrap().is_empty());
    store.close().await;
}
