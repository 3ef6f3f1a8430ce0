// シリアル通信 レジスタ読み出しトランザクション
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use crate::modbus::DeviceError;
use crate::modbus::parser::{self, MeterResponse};
use std::io;

/// レジスタ読み出しファンクションコード
pub const FUNCTION_READ_INPUT: u8 = 0x04;

/// CRC-16/MODBUS (多項式0xA001、初期値0xFFFF)
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xffff;
    for byte in data {
        crc ^= *byte as u16;
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xa001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// 読み出し要求フレームを組み立てる
/// [slave, function, addr上位, addr下位, crc下位, crc上位]
pub fn encode_read_request(slave: u8, register: u16) -> Vec<u8> {
    let mut frame = vec![
        slave,
        FUNCTION_READ_INPUT,
        (register >> 8) as u8,
        register as u8,
    ];
    let crc = crc16(&frame);
    frame.push((crc & 0xff) as u8);
    frame.push((crc >> 8) as u8);
    frame
}

fn dump(xs: &[u8]) -> String {
    xs.iter().map(|b| format!("{:02X}", b)).collect::<String>()
}

/// レジスタをひとつ読み出す。要求送信から応答検証までをひとつの
/// トランザクションとして行う。再試行はしない。
pub fn read_register<T>(port: &mut T, slave: u8, register: u16) -> Result<u32, DeviceError>
where
    T: io::Read + io::Write,
{
    let request = encode_read_request(slave, register);
    tracing::trace!(target:"Tx->","{}", dump(&request));
    port.write_all(&request)?;
    port.flush()?;

    // 先頭3バイトで正常応答か例外応答かが決まる
    let mut head = [0u8; 3];
    port.read_exact(&mut head)?;
    let mut frame = head.to_vec();
    if head[1] & 0x80 != 0 {
        // 例外応答 [slave, function|0x80, code, crc, crc]
        let mut rest = [0u8; 2];
        port.read_exact(&mut rest)?;
        frame.extend_from_slice(&rest);
    } else {
        // 正常応答 [slave, function, 0x03, 値3バイト, crc, crc]
        let mut rest = [0u8; 5];
        port.read_exact(&mut rest)?;
        frame.extend_from_slice(&rest);
    }
    tracing::trace!(target:"<-Rx","{}", dump(&frame));

    // CRC検証(下位、上位の順で付く)
    let (payload, crc_bytes) = frame.split_at(frame.len() - 2);
    let received = u16::from(crc_bytes[0]) | u16::from(crc_bytes[1]) << 8;
    if crc16(payload) != received {
        return Err(DeviceError::Checksum { register });
    }

    match parser::parse_response(payload, slave, FUNCTION_READ_INPUT) {
        Ok((_rest, MeterResponse::Value(value))) => Ok(value),
        Ok((_rest, MeterResponse::Exception(code))) => {
            Err(DeviceError::Exception { register, code })
        }
        Err(_) => Err(DeviceError::Malformed { register }),
    }
}

#[cfg(test)]
pub(crate) struct MockPort {
    rx: io::Cursor<Vec<u8>>,
    pub(crate) tx: Vec<u8>,
}

#[cfg(test)]
impl MockPort {
    pub(crate) fn new(response: Vec<u8>) -> Self {
        MockPort {
            rx: io::Cursor::new(response),
            tx: Vec::new(),
        }
    }
}

#[cfg(test)]
impl io::Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        io::Read::read(&mut self.rx, buf)
    }
}

#[cfg(test)]
impl io::Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx.extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// 正常応答フレームを組み立てる(テスト用)
#[cfg(test)]
pub(crate) fn encode_value_response(slave: u8, value: u32) -> Vec<u8> {
    let mut frame = vec![
        slave,
        FUNCTION_READ_INPUT,
        3,
        (value >> 16) as u8,
        (value >> 8) as u8,
        value as u8,
    ];
    let crc = crc16(&frame);
    frame.push((crc & 0xff) as u8);
    frame.push((crc >> 8) as u8);
    frame
}

#[test]
fn test1() {
    // CRC-16/MODBUSのチェック値
    assert_eq!(crc16(b"123456789"), 0x4b37);

    // 要求フレームのCRCは全体を通すとゼロ検証になる
    let request = encode_read_request(0x01, 0x0006);
    assert_eq!(&request[..4], &[0x01, 0x04, 0x00, 0x06]);
    let (payload, crc_bytes) = request.split_at(4);
    let received = u16::from(crc_bytes[0]) | u16::from(crc_bytes[1]) << 8;
    assert_eq!(crc16(payload), received);
}

#[test]
fn test2() {
    // 正常応答からレジスタ値が得られて、要求が書き込まれている
    let mut port = MockPort::new(encode_value_response(0x01, 23500));
    let value = read_register(&mut port, 0x01, 0x0000).unwrap();
    assert_eq!(value, 23500);
    assert_eq!(port.tx, encode_read_request(0x01, 0x0000));
}

#[test]
fn test3() {
    // CRC破損はチェックサムエラー
    let mut response = encode_value_response(0x01, 23500);
    let last = response.len() - 1;
    response[last] ^= 0xff;
    let mut port = MockPort::new(response);
    assert!(matches!(
        read_register(&mut port, 0x01, 0x0000),
        Err(DeviceError::Checksum { register: 0 })
    ));
}

#[test]
fn test4() {
    // 例外応答
    let mut frame = vec![0x01, FUNCTION_READ_INPUT | 0x80, 0x02];
    let crc = crc16(&frame);
    frame.push((crc & 0xff) as u8);
    frame.push((crc >> 8) as u8);
    let mut port = MockPort::new(frame);
    assert!(matches!(
        read_register(&mut port, 0x01, 0x0002),
        Err(DeviceError::Exception {
            register: 2,
            code: 0x02
        })
    ));
}

#[test]
fn test5() {
    // 応答が途中で途切れたらi/oエラー(タイムアウト相当)
    let mut response = encode_value_response(0x01, 23500);
    response.truncate(5);
    let mut port = MockPort::new(response);
    assert!(matches!(
        read_register(&mut port, 0x01, 0x0000),
        Err(DeviceError::Io(_))
    ));
}
