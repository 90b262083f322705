//! ビルトインコマンドの実装。
//!
//! ビルトインは閉じた列挙型 [`Builtin`] で表し、名前との対応は静的テーブルで持つ。
//! 検索は完全一致のみ（前方一致やエイリアスはない）。
//! 終了ステータスは通常の慣例どおり 0 が成功、非 0 が失敗。

use std::env;
use std::ffi::{OsStr, OsString};
use std::io::{self, Write};
use std::path::Path;

use crate::shell::Shell;

/// シェルに組み込まれたコマンド。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Help,
    Exit,
    Cd,
    Pwd,
}

struct Entry {
    name: &'static str,
    builtin: Builtin,
    doc: &'static str,
}

/// ビルトインテーブル。`help` はこの順で一覧を出力する。
static TABLE: [Entry; 5] = [
    Entry { name: "?", builtin: Builtin::Help, doc: "show this help menu" },
    Entry { name: "help", builtin: Builtin::Help, doc: "show this help menu" },
    Entry { name: "exit", builtin: Builtin::Exit, doc: "exit the command shell" },
    Entry {
        name: "cd",
        builtin: Builtin::Cd,
        doc: "changes the working directory to the given directory",
    },
    Entry {
        name: "pwd",
        builtin: Builtin::Pwd,
        doc: "prints the current working directory to standard output",
    },
];

impl Builtin {
    /// 名前に完全一致するビルトインを返す。該当なしなら `None`（外部コマンドとして扱う）。
    pub fn lookup(name: impl AsRef<OsStr>) -> Option<Self> {
        let name = name.as_ref();
        TABLE.iter().find(|e| name == e.name).map(|e| e.builtin)
    }

    /// ビルトインを実行し、終了ステータスを返す。
    ///
    /// `args[0]` はコマンド名。通常の出力は `out` に書く。
    /// `cd` / `pwd` の失敗はディレクトリエラーとして標準出力に報告する。
    pub fn run<S: AsRef<OsStr>>(self, shell: &mut Shell, args: &[S], out: &mut dyn Write) -> i32 {
        let result = match self {
            Builtin::Help => builtin_help(out),
            Builtin::Exit => Ok(builtin_exit(shell)),
            Builtin::Cd => Ok(builtin_cd(args)),
            Builtin::Pwd => builtin_pwd(out),
        };
        result.unwrap_or_else(|e| {
            let name = args.first().map(|a| a.as_ref().to_string_lossy()).unwrap_or_default();
            eprintln!("psh: {}: write error: {}", name, e);
            1
        })
    }
}

/// `help` / `?` — 登録済みコマンドと説明を一覧表示する。
fn builtin_help(out: &mut dyn Write) -> io::Result<i32> {
    for e in &TABLE {
        writeln!(out, "{} - {}", e.name, e.doc)?;
    }
    out.flush()?;
    Ok(0)
}

/// `exit` — REPL ループに終了を要求する。引数は無視し、ステータス 0 で終了する。
fn builtin_exit(shell: &mut Shell) -> i32 {
    shell.should_exit = true;
    0
}

/// `cd [dir]` — カレントディレクトリを変更する。引数省略時は `$HOME` に移動。
/// 失敗時はディレクトリを変更しない。
fn builtin_cd<S: AsRef<OsStr>>(args: &[S]) -> i32 {
    let target: OsString = match args.get(1) {
        Some(dir) => dir.as_ref().to_os_string(),
        None => match env::var_os("HOME") {
            Some(home) => home,
            None => {
                println!("psh: cd: HOME not set");
                return 1;
            }
        },
    };

    let target = Path::new(&target);
    if let Err(e) = env::set_current_dir(target) {
        println!("psh: cd: {}: {}", target.display(), e);
        1
    } else {
        0
    }
}

/// `pwd` — カレントディレクトリの絶対パスを出力する。
fn builtin_pwd(out: &mut dyn Write) -> io::Result<i32> {
    match env::current_dir() {
        Ok(dir) => {
            writeln!(out, "{}", dir.display())?;
            out.flush()?;
            Ok(0)
        }
        Err(e) => {
            println!("psh: pwd: {}", e);
            Ok(1)
        }
    }
}
