//! ステージの起動（fork → プロセスグループ設定 → fd 付け替え → exec）。
//!
//! ## 構成
//!
//! | 項目 | 役割 |
//! |-----|------|
//! | [`pipe`] | close-on-exec 付きのパイプを `OwnedFd` の組で作る |
//! | [`Launch`] | 1 ステージ分の起動要求（argv、stdin/stdout、子で閉じる fd、グループ） |
//! | [`spawn`] | fork して子 PID を返す。子はビルトインを実行するか PATH 解決して exec する |
//!
//! 親プロセスは [`Launch`] が持つ fd を `spawn` の終了時に drop して閉じる。
//! 子プロセスは `dup2` で標準入出力に付け替えた後、元の fd を閉じる。

use std::env;
use std::ffi::OsString;
use std::fmt;
use std::io::{self, Write};
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};

use libc::pid_t;

use crate::builtins::Builtin;
use crate::path::{ExecPlan, PATH_KEY};
use crate::shell::Shell;
use crate::terminal;

// ── エラー型 ──────────────────────────────────────────────────────

/// ステージ起動の失敗。
#[derive(Debug)]
pub enum SpawnError {
    /// 引数に NUL バイトが含まれていて exec できない。
    Nul { command: String },
    /// `fork` の失敗（プロセス数上限など）。
    Fork(io::Error),
}

impl fmt::Display for SpawnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nul { command } => write!(f, "psh: {}: argument contains a NUL byte", command),
            Self::Fork(e) => write!(f, "psh: fork: {}", e),
        }
    }
}

impl std::error::Error for SpawnError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Nul { .. } => None,
            Self::Fork(e) => Some(e),
        }
    }
}

// ── パイプ ────────────────────────────────────────────────────────

/// パイプを作成し `(読み出し端, 書き込み端)` を返す。
///
/// 両端に close-on-exec を付けるため、`dup2` で標準入出力に付け替えなかった端が
/// exec 先に漏れることはない。
pub fn pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds: [RawFd; 2] = [-1; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(io::Error::last_os_error());
    }
    let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    set_cloexec(&read)?;
    set_cloexec(&write)?;
    Ok((read, write))
}

fn set_cloexec(fd: &OwnedFd) -> io::Result<()> {
    if unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

// ── 起動 ──────────────────────────────────────────────────────────

/// 1 ステージ分の起動要求。
pub struct Launch<'a> {
    /// 引数ベクタ。`args[0]` がコマンド名。
    pub args: &'a [OsString],
    /// stdin に接続する fd（`None` なら継承）。パイプの読み出し端か入力ファイル。
    pub stdin: Option<OwnedFd>,
    /// stdout に接続する fd（`None` なら継承）。パイプの書き込み端か出力ファイル。
    pub stdout: Option<OwnedFd>,
    /// 親が次のステージ用に保持している fd。子では不要なので閉じる。
    pub close_in_child: Option<BorrowedFd<'a>>,
    /// 参加するプロセスグループ。0 なら子の PID で新しいグループを作る。
    pub pgid: pid_t,
    /// 子の側からもターミナルを掌握する（対話モードのパイプライン先頭ステージ）。
    pub foreground: bool,
}

/// 子プロセスで実行するもの。fork 前に決めておく。
enum Program {
    Builtin(Builtin),
    External(ExecPlan),
}

/// ステージを子プロセスとして起動し、子 PID を返す。
///
/// 子プロセスは `pgid` のグループに入り、シグナル処理をデフォルトに戻し、
/// stdin/stdout を付け替えてから、ビルトインなら実行して `_exit`、
/// それ以外は PATH 解決して exec する。
/// 親側でも `setpgid` を呼び、exec 前後どちらでもグループが確定しているようにする。
pub fn spawn(shell: &mut Shell, launch: Launch<'_>) -> Result<pid_t, SpawnError> {
    let args: &[OsString] = launch.args;
    let requested_pgid = launch.pgid;
    let name = args.first().map(OsString::as_os_str).unwrap_or_default();

    let program = match Builtin::lookup(name) {
        Some(builtin) => Program::Builtin(builtin),
        None => {
            let path_var = env::var_os(PATH_KEY);
            let plan = ExecPlan::new(args, path_var.as_deref()).map_err(|_| SpawnError::Nul {
                command: name.to_string_lossy().into_owned(),
            })?;
            Program::External(plan)
        }
    };

    // バッファ済みの出力が子に複製されないよう fork 前に吐き出す
    let _ = io::stdout().flush();

    let pid = unsafe { libc::fork() };
    if pid < 0 {
        return Err(SpawnError::Fork(io::Error::last_os_error()));
    }
    if pid == 0 {
        run_child(shell, args, program, launch);
    }

    let pgid = if requested_pgid == 0 { pid } else { requested_pgid };
    if unsafe { libc::setpgid(pid, pgid) } < 0 {
        let err = io::Error::last_os_error();
        // EACCES: 子が既に exec 済み（子側の setpgid で設定されている）
        if err.raw_os_error() != Some(libc::EACCES) {
            eprintln!("psh: setpgid: {}", err);
        }
    }

    // launch が持つ stdin / stdout はここで drop され、親側のコピーが閉じる
    Ok(pid)
}

fn run_child(shell: &mut Shell, args: &[OsString], program: Program, launch: Launch<'_>) -> ! {
    unsafe {
        libc::setpgid(0, launch.pgid);
    }
    if launch.foreground {
        // SIGTTOU は親の ForegroundGuard により無視されている
        unsafe {
            libc::tcsetpgrp(shell.session.terminal_fd(), libc::getpgrp());
        }
    }
    terminal::reset_child_signals();

    let redirected = redirect(launch.stdin, libc::STDIN_FILENO)
        .and_then(|()| redirect(launch.stdout, libc::STDOUT_FILENO));
    if let Err(e) = redirected {
        eprintln!("psh: dup2: {}", e);
        unsafe { libc::_exit(1) }
    }
    if let Some(fd) = launch.close_in_child {
        unsafe {
            libc::close(fd.as_raw_fd());
        }
    }

    match program {
        Program::Builtin(builtin) => {
            let mut out = io::stdout();
            let status = builtin.run(shell, args, &mut out);
            let _ = out.flush();
            unsafe { libc::_exit(status) }
        }
        Program::External(plan) => plan.exec(),
    }
}

/// `fd` を `target` に付け替え、元の fd を閉じる。
fn redirect(fd: Option<OwnedFd>, target: RawFd) -> io::Result<()> {
    let Some(fd) = fd else {
        return Ok(());
    };
    if fd.as_raw_fd() == target {
        // 既に目的の番号にある。close-on-exec だけ外して残す
        let raw = fd.into_raw_fd();
        if unsafe { libc::fcntl(raw, libc::F_SETFD, 0) } < 0 {
            return Err(io::Error::last_os_error());
        }
        return Ok(());
    }
    if unsafe { libc::dup2(fd.as_raw_fd(), target) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
