// 応答フレームのパーサー
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use nom::Parser;
use nom::branch::alt;
use nom::bytes::complete::tag;
use nom::combinator::map;
use nom::number::complete::{be_u8, be_u24};

/// レジスタ読み出し応答
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeterResponse {
    /// 正常応答。3バイト符号なしレジスタ値。
    Value(u32),
    /// 例外応答。機器側のエラーコード。
    Exception(u8),
}

/// CRCを除いた応答フレームを解析する
pub fn parse_response<'a>(
    input: &'a [u8],
    slave: u8,
    function: u8,
) -> nom::IResult<&'a [u8], MeterResponse> {
    // [slave, function, 0x03, 値3バイト]
    let normal_head = [slave, function, 3];
    let normal = map((tag(&normal_head[..]), be_u24), |(_, value)| {
        MeterResponse::Value(value)
    });

    // [slave, function | 0x80, エラーコード]
    let exception_head = [slave, function | 0x80];
    let exception = map((tag(&exception_head[..]), be_u8), |(_, code)| {
        MeterResponse::Exception(code)
    });

    alt((normal, exception)).parse(input)
}

#[test]
fn test1() {
    // 正常応答
    let frame: &[u8] = &[0x01, 0x04, 0x03, 0x03, 0x5b, 0xcc];
    assert_eq!(
        parse_response(frame, 0x01, 0x04).unwrap(),
        (&[][..], MeterResponse::Value(0x035bcc))
    );

    // 最大値(3バイト)
    let frame: &[u8] = &[0x11, 0x04, 0x03, 0xff, 0xff, 0xff];
    assert_eq!(
        parse_response(frame, 0x11, 0x04).unwrap(),
        (&[][..], MeterResponse::Value(0x00ff_ffff))
    );
}

#[test]
fn test2() {
    // 例外応答
    let frame: &[u8] = &[0x01, 0x84, 0x02];
    assert_eq!(
        parse_response(frame, 0x01, 0x04).unwrap(),
        (&[][..], MeterResponse::Exception(0x02))
    );
}

#[test]
fn test3() {
    // スレーブアドレス不一致は解析失敗
    let frame: &[u8] = &[0x02, 0x04, 0x03, 0x00, 0x00, 0x01];
    assert!(parse_response(frame, 0x01, 0x04).is_err());

    // 途中で切れたフレームも解析失敗
    let frame: &[u8] = &[0x01, 0x04, 0x03, 0x00];
    assert!(parse_response(frame, 0x01, 0x04).is_err());
}
