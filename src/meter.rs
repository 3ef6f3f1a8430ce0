// 電力計からの一括読み出し
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use crate::modbus::{self, DeviceError};
use crate::reading::RawRegisters;
use std::io;

/// レジスタアドレス
pub const REGISTER_VOLTAGE: u16 = 0;
pub const REGISTER_CURRENT: u16 = 2;
pub const REGISTER_POWER_FACTOR: u16 = 4;
pub const REGISTER_POWER: u16 = 6;
pub const REGISTER_ENERGY: u16 = 8;

/// 計測値をひとそろい読み出す。取得ループはこのトレイト越しに電力計を見る。
pub trait ReadMeter {
    fn read(&mut self) -> Result<RawRegisters, DeviceError>;
}

/// シリアルポート上の電力計。ポートはここが専有する。
pub struct MeterReader<T> {
    port: T,
    slave: u8,
}

impl<T> MeterReader<T>
where
    T: io::Read + io::Write,
{
    pub fn new(port: T, slave: u8) -> Self {
        MeterReader { port, slave }
    }
}

impl<T> ReadMeter for MeterReader<T>
where
    T: io::Read + io::Write,
{
    /// 5レジスタすべての読み出しに成功したときだけ値を返す。
    /// どれかひとつでも失敗したら全体が失敗(部分的な計測値は作らない)。
    fn read(&mut self) -> Result<RawRegisters, DeviceError> {
        let voltage = modbus::read_register(&mut self.port, self.slave, REGISTER_VOLTAGE)?;
        let current = modbus::read_register(&mut self.port, self.slave, REGISTER_CURRENT)?;
        let power_factor =
            modbus::read_register(&mut self.port, self.slave, REGISTER_POWER_FACTOR)?;
        let power = modbus::read_register(&mut self.port, self.slave, REGISTER_POWER)?;
        let energy = modbus::read_register(&mut self.port, self.slave, REGISTER_ENERGY)?;
        Ok(RawRegisters {
            voltage,
            current,
            power_factor,
            power,
            energy,
        })
    }
}

#[cfg(test)]
use crate::modbus::transaction::{MockPort, encode_read_request, encode_value_response};

#[test]
fn test1() {
    // 5レジスタ分の応答を順に返す
    let responses = [
        encode_value_response(0x01, 23500),  // 電圧
        encode_value_response(0x01, 500),    // 電流
        encode_value_response(0x01, 950),    // 力率
        encode_value_response(0x01, 220000), // 電力
        encode_value_response(0x01, 1500),   // 電力量
    ]
    .concat();
    let mut reader = MeterReader::new(MockPort::new(responses), 0x01);

    let raw = reader.read().unwrap();
    assert_eq!(
        raw,
        RawRegisters {
            voltage: 23500,
            current: 500,
            power_factor: 950,
            power: 220000,
            energy: 1500,
        }
    );
}

#[test]
fn test2() {
    // 3つ目のレジスタで応答が途絶えたら全体が失敗する
    let responses = [
        encode_value_response(0x01, 23500),
        encode_value_response(0x01, 500),
    ]
    .concat();
    let mut reader = MeterReader::new(MockPort::new(responses), 0x01);
    assert!(reader.read().is_err());
}

#[test]
fn test3() {
    // 要求はアドレス0,2,4,6,8の順で出る
    let responses = [
        encode_value_response(0x01, 1),
        encode_value_response(0x01, 2),
        encode_value_response(0x01, 3),
        encode_value_response(0x01, 4),
        encode_value_response(0x01, 5),
    ]
    .concat();
    let mut port = MockPort::new(responses);
    {
        let mut reader = MeterReader::new(&mut port, 0x01);
        reader.read().unwrap();
    }
    let expected = [
        encode_read_request(0x01, REGISTER_VOLTAGE),
        encode_read_request(0x01, REGISTER_CURRENT),
        encode_read_request(0x01, REGISTER_POWER_FACTOR),
        encode_read_request(0x01, REGISTER_POWER),
        encode_read_request(0x01, REGISTER_ENERGY),
    ]
    .concat();
    assert_eq!(port.tx, expected);
}
