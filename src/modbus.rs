// 電力計レジスタ読み出しプロトコル
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use std::io;
use thiserror::Error;

pub mod parser;
pub mod transaction;

pub use transaction::*;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error(r#"i/o "{0}""#)]
    Io(#[from] io::Error),

    #[error("checksum mismatch (register {register})")]
    Checksum { register: u16 },

    #[error("device exception {code:#04x} (register {register})")]
    Exception { register: u16, code: u8 },

    #[error("malformed response (register {register})")]
    Malformed { register: u16 },
}
