//! トークン列をパイプラインのステージに分割する状態機械。
//!
//! 左から走査し、`|` でステージを区切り、`<` / `>` の直後のトークンを
//! リダイレクト先として取り出す。演算子はトークン全体の完全一致でのみ認識する。
//!
//! [`StageScanner`] はステージを 1 つずつ返すイテレータで、executor は境界が
//! 見つかり次第そのステージを起動する（後続ステージの解析を待たない）。

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::PathBuf;

use crate::tokens::Tokens;

const PIPE: &str = "|";
const REDIRECT_IN: &str = "<";
const REDIRECT_OUT: &str = ">";

fn is_operator(token: &OsStr) -> bool {
    token == PIPE || token == REDIRECT_IN || token == REDIRECT_OUT
}

/// パイプライン中の 1 コマンド。
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Stage {
    /// 引数ベクタ。先頭がプログラム名。空にはならない。
    pub argv: Vec<OsString>,
    /// `< file` の入力ファイル。最初のステージのみ。
    pub input: Option<PathBuf>,
    /// `> file` の出力ファイル（作成・切り詰め）。最後のステージのみ。
    pub output: Option<PathBuf>,
}

/// ステージの後ろに何が続くか。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Link {
    /// `|` で次のステージに接続する。
    Pipe,
    /// 行末。最後のステージ。
    End,
}

/// 構文エラー。走査はここで打ち切られる。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyntaxError {
    /// `|` の前後にコマンドがない。引数は直後のトークン（行末なら `newline`）。
    EmptyStage(String),
    /// リダイレクト演算子の後にファイル名がない。
    MissingRedirectTarget(&'static str),
    /// `<` が最初以外のステージにある。
    InputNotFirst,
    /// `>` が最後以外のステージにある。
    OutputNotLast,
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyStage(near) => write!(f, "syntax error near unexpected token `{near}'"),
            Self::MissingRedirectTarget(op) => write!(f, "syntax error: missing file name after `{op}'"),
            Self::InputNotFirst => write!(f, "syntax error: `<' is only allowed on the first command"),
            Self::OutputNotLast => write!(f, "syntax error: `>' is only allowed on the last command"),
        }
    }
}

impl std::error::Error for SyntaxError {}

/// トークン列を左から走査してステージを順に返す。
pub struct StageScanner<'a> {
    tokens: &'a Tokens,
    pos: usize,
    /// これから返すステージの番号（0 始まり）。
    index: usize,
    done: bool,
}

impl<'a> StageScanner<'a> {
    pub fn new(tokens: &'a Tokens) -> Self {
        Self {
            tokens,
            pos: 0,
            index: 0,
            done: tokens.is_empty(),
        }
    }

    /// リダイレクト演算子の直後のトークンを取り出し、位置を 2 つ進める。
    fn redirect_target(&mut self, op: &'static str) -> Result<PathBuf, SyntaxError> {
        match self.tokens.get(self.pos + 1) {
            Some(target) if !is_operator(target) => {
                self.pos += 2;
                Ok(PathBuf::from(target))
            }
            _ => Err(SyntaxError::MissingRedirectTarget(op)),
        }
    }

    fn scan_stage(&mut self) -> Result<(Stage, Link), SyntaxError> {
        let mut stage = Stage::default();
        loop {
            match self.tokens.get(self.pos) {
                None => {
                    if stage.argv.is_empty() {
                        return Err(SyntaxError::EmptyStage("newline".to_string()));
                    }
                    return Ok((stage, Link::End));
                }
                Some(token) if token == PIPE => {
                    if stage.argv.is_empty() {
                        return Err(SyntaxError::EmptyStage(PIPE.to_string()));
                    }
                    if stage.output.is_some() {
                        return Err(SyntaxError::OutputNotLast);
                    }
                    self.pos += 1;
                    return Ok((stage, Link::Pipe));
                }
                Some(token) if token == REDIRECT_IN => {
                    if self.index > 0 {
                        return Err(SyntaxError::InputNotFirst);
                    }
                    // 複数指定時は最後の指定が有効
                    stage.input = Some(self.redirect_target(REDIRECT_IN)?);
                }
                Some(token) if token == REDIRECT_OUT => {
                    stage.output = Some(self.redirect_target(REDIRECT_OUT)?);
                }
                Some(word) => {
                    stage.argv.push(word.to_os_string());
                    self.pos += 1;
                }
            }
        }
    }
}

impl Iterator for StageScanner<'_> {
    type Item = Result<(Stage, Link), SyntaxError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let result = self.scan_stage();
        match &result {
            Ok((_, Link::Pipe)) => self.index += 1,
            Ok((_, Link::End)) | Err(_) => self.done = true,
        }
        Some(result)
    }
}
