//! コマンド実行: ビルトイン判定、リダイレクト適用、パイプライン接続、フォアグラウンド制御。
//!
//! - [`execute`]: 1 行分のトークン列を実行し、終了ステータスを返す
//! - 単一ステージのビルトイン: fork なしの高速パス（[`execute_builtin`]）。`> file` に対応
//! - それ以外: [`execute_pipeline`]
//!   - [`StageScanner`] がステージ境界を見つけるたびにそのステージを起動する
//!   - 最初のステージの PID がパイプライン全体のプロセスグループになる
//!   - 各ステージ起動直後に、親で不要になったパイプ端・リダイレクト fd を閉じる
//!   - 全ステージ起動後にまとめて待機し、[`ForegroundGuard`] の drop でターミナルをシェルに戻す

use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::{AsFd, OwnedFd};
use std::path::Path;

use crate::builtins::Builtin;
use crate::job::Job;
use crate::shell::Shell;
use crate::spawn::{self, Launch};
use crate::stage::{Link, Stage, StageScanner};
use crate::terminal::ForegroundGuard;
use crate::tokens::Tokens;

/// 1 行分のトークン列を実行し、終了ステータスを返す。空行なら直前のステータスをそのまま返す。
///
/// ディスパッチ:
/// 1. 単一ステージでプログラムがビルトイン → [`execute_builtin`]
/// 2. それ以外（外部コマンド、パイプライン、パイプ中のビルトイン） → [`execute_pipeline`]
pub fn execute(shell: &mut Shell, tokens: &Tokens) -> i32 {
    if tokens.is_empty() {
        return shell.last_status;
    }

    if let Some(Ok((stage, Link::End))) = StageScanner::new(tokens).next() {
        if let Some(builtin) = Builtin::lookup(&stage.argv[0]) {
            return execute_builtin(shell, builtin, &stage);
        }
    }

    execute_pipeline(shell, tokens)
}

// ── ビルトイン高速パス ──────────────────────────────────────────────

/// 単一ビルトインを fork なしで実行する。
///
/// `> file` があればファイルを作成・切り詰めてから出力先にする。
/// `< file` は開けることだけ確認する（ビルトインは標準入力を読まない）。
fn execute_builtin(shell: &mut Shell, builtin: Builtin, stage: &Stage) -> i32 {
    if let Some(path) = &stage.input {
        if let Err(status) = open_input(path) {
            return status;
        }
    }

    match &stage.output {
        Some(path) => match open_output(path) {
            Ok(mut file) => builtin.run(shell, &stage.argv, &mut file),
            Err(status) => status,
        },
        None => builtin.run(shell, &stage.argv, &mut io::stdout()),
    }
}

/// 入力リダイレクト先を読み取り専用で開く。失敗時は標準出力に報告して `Err(1)`。
fn open_input(path: &Path) -> Result<File, i32> {
    File::open(path).map_err(|e| {
        println!("psh: {}: {}", path.display(), e);
        1
    })
}

/// 出力リダイレクト先を読み書き用に作成・切り詰めで開く。失敗時は標準出力に報告して `Err(1)`。
fn open_output(path: &Path) -> Result<File, i32> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .map_err(|e| {
            println!("psh: {}: {}", path.display(), e);
            1
        })
}

// ── パイプライン ────────────────────────────────────────────────────

/// パイプライン（単一 or 複数ステージ）を子プロセスとして実行する。
///
/// 処理の流れ:
/// 1. [`ForegroundGuard`] を取得（SIGTTOU を無視）
/// 2. ステージを 1 つ取り出すたびにパイプを作って起動し、最初の起動直後にターミナルを渡す
/// 3. 構文エラー・ファイルエラー・fork 失敗では残りのステージを起動せず打ち切る
/// 4. 起動済みの全ステージを待機し、guard の drop でターミナルと SIGTTOU を戻す
fn execute_pipeline(shell: &mut Shell, tokens: &Tokens) -> i32 {
    let foreground = ForegroundGuard::acquire(shell.session);
    let mut job = Job::new();
    let mut upstream: Option<OwnedFd> = None;
    let mut failure: Option<i32> = None;

    for item in StageScanner::new(tokens) {
        let (stage, link) = match item {
            Ok(scanned) => scanned,
            Err(e) => {
                eprintln!("psh: {}", e);
                failure = Some(2);
                break;
            }
        };

        let first = job.is_empty();
        match launch_stage(shell, &mut job, &stage, link, upstream.take()) {
            Ok(next) => upstream = next,
            Err(status) => {
                failure = Some(status);
                break;
            }
        }
        if first {
            foreground.hand_over(job.pgid());
        }
    }

    // 打ち切った場合に残る読み出し端。閉じると上流は EOF / SIGPIPE で終了する
    drop(upstream);

    let status = job.wait(shell.session.is_interactive());
    drop(foreground);
    failure.unwrap_or(status)
}

/// 1 ステージ分の入出力を決めて起動し、次のステージが読むパイプの読み出し端を返す。
///
/// stdin は入力ファイル、前段のパイプ、継承のいずれか。
/// stdout は次段へのパイプ、出力ファイル、継承のいずれか。
/// 起動後、親側の stdin / stdout の fd は `spawn` 内で drop されて閉じる。
fn launch_stage(
    shell: &mut Shell,
    job: &mut Job,
    stage: &Stage,
    link: Link,
    upstream: Option<OwnedFd>,
) -> Result<Option<OwnedFd>, i32> {
    let stdin = match &stage.input {
        Some(path) => Some(OwnedFd::from(open_input(path)?)),
        None => upstream,
    };

    let (stdout, next) = match link {
        Link::Pipe => {
            let (read, write) = spawn::pipe().map_err(|e| {
                eprintln!("psh: pipe: {}", e);
                1
            })?;
            (Some(write), Some(read))
        }
        Link::End => match &stage.output {
            Some(path) => (Some(OwnedFd::from(open_output(path)?)), None),
            None => (None, None),
        },
    };

    let launch = Launch {
        args: &stage.argv,
        stdin,
        stdout,
        close_in_child: next.as_ref().map(|fd| fd.as_fd()),
        pgid: job.pgid(),
        foreground: shell.session.is_interactive() && job.is_empty(),
    };
    let pid = spawn::spawn(shell, launch).map_err(|e| {
        eprintln!("{}", e);
        1
    })?;
    job.push(pid);
    Ok(next)
}
