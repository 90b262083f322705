//! シェルのセッション状態を保持するモジュール。
//!
//! 端末制御の情報（[`Session`]）、直前の終了ステータス、`exit` 要求フラグを
//! 1 つの値にまとめ、executor・ビルトインへ明示的に渡す。グローバル変数は持たない。

use crate::terminal::Session;

/// シェルの実行状態。REPL ループ全体で共有される。
pub struct Shell {
    /// 起動時に確定する端末・プロセスグループ情報。
    pub session: Session,
    /// 直前のコマンドの終了ステータス。
    pub last_status: i32,
    /// `exit` ビルトインで true にセットされ、REPL ループを終了させる。
    pub should_exit: bool,
}

impl Shell {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            last_status: 0,
            should_exit: false,
        }
    }
}
