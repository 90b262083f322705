//! 入力行のトークン列。
//!
//! 空白区切りのみを行う最小のトークナイザ。クォートやエスケープは扱わない。
//! 入力はバイト列のまま分割するので、UTF-8 でないファイル名や引数もそのまま exec に渡る。
//! [`Tokens`] は 1 行ごとに作られ、行の処理が終わると drop で解放される。
//! インデックスは生存期間中ずっと安定している。

use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::OsStrExt;

/// 1 行分のトークン列。0 始まりで長さ固定、生成後は不変。
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Tokens {
    tokens: Vec<OsString>,
}

impl Tokens {
    /// `line` を ASCII 空白で分割する。改行や連続する空白は区切りとして扱う。
    pub fn tokenize(line: impl AsRef<[u8]>) -> Self {
        Self {
            tokens: line
                .as_ref()
                .split(u8::is_ascii_whitespace)
                .filter(|word| !word.is_empty())
                .map(|word| OsStr::from_bytes(word).to_os_string())
                .collect(),
        }
    }

    /// トークン数。
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// `i` 番目のトークン。範囲外なら `None`。
    pub fn get(&self, i: usize) -> Option<&OsStr> {
        self.tokens.get(i).map(OsString::as_os_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &OsStr> {
        self.tokens.iter().map(OsString::as_os_str)
    }
}
