//! psh ライブラリ — テスト・ベンチマーク用にモジュールを公開する。
//!
//! バイナリ本体は `main.rs` の REPL ループ。
//!
//! ## モジュール構成
//!
//! | モジュール | 役割 |
//! |-----------|------|
//! | [`tokens`] | 入力行のトークン列（空白区切り） |
//! | [`stage`] | トークン列をステージに分割する状態機械（`|`、`<`、`>`） |
//! | [`executor`] | コマンド実行（ビルトイン高速パス、パイプライン接続、フォアグラウンド制御） |
//! | [`spawn`] | fork + fd 付け替え + exec によるステージ起動、パイプ作成 |
//! | [`path`] | `argv[0]` → `$PATH` の順で exec を試す PATH 解決 |
//! | [`builtins`] | ビルトイン（`exit`, `cd`, `pwd`, `help`, `?`） |
//! | [`job`] | パイプライン 1 本分のプロセスグループと待機 |
//! | [`terminal`] | セッション初期化、ターミナル所有権の受け渡し、シグナルガード |
//! | [`shell`] | シェルのセッション状態（端末情報、終了ステータス、`exit` 要求） |

pub mod builtins;
pub mod executor;
pub mod job;
pub mod path;
pub mod shell;
pub mod spawn;
pub mod stage;
pub mod terminal;
pub mod tokens;
