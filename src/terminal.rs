//! 端末制御とシグナル処理。
//!
//! - [`Session`]: 起動時に一度だけ確定する端末情報（対話モードか、端末 fd、termios、シェルの pgid）
//! - [`ForegroundGuard`]: パイプライン実行中のフォアグラウンド所有権。
//!   生存中は SIGTTOU を無視し、drop でターミナルをシェルに戻して termios と SIGTTOU を復元する
//! - [`IgnoredSignal`]: シグナルを一時的に `SIG_IGN` にし、drop で元の処理に戻す RAII ガード

use std::io;

use libc::{c_int, pid_t};

/// シェル自身が無視するシグナル。キーボードからのシグナルはフォアグラウンドのパイプラインにだけ届く。
const SHELL_IGNORED_SIGNALS: [c_int; 4] = [libc::SIGINT, libc::SIGQUIT, libc::SIGTERM, libc::SIGTSTP];

/// 子プロセスで exec 前に `SIG_DFL` に戻すシグナル。
///
/// SIGPIPE は Rust ランタイムが起動時に無視設定にするため、ここで戻さないと
/// `yes | head -n 1` のような上流プロセスが終了しない。
const CHILD_DEFAULT_SIGNALS: [c_int; 6] = [
    libc::SIGINT,
    libc::SIGQUIT,
    libc::SIGTERM,
    libc::SIGTSTP,
    libc::SIGTTOU,
    libc::SIGPIPE,
];

fn report(what: &str) {
    eprintln!("psh: {}: {}", what, io::Error::last_os_error());
}

// ── Session ──────────────────────────────────────────────────────────

/// 端末とプロセスグループに関するセッション状態。起動時に確定し、以後は変化しない。
#[derive(Clone, Copy)]
pub struct Session {
    interactive: bool,
    terminal_fd: c_int,
    /// 起動時の termios。シェルがフォアグラウンドに戻るたびに復元する。
    tmodes: Option<libc::termios>,
    shell_pgid: pid_t,
}

impl Session {
    /// セッションを初期化する。
    ///
    /// 標準入力が端末なら、フォアグラウンドになるまで SIGTTIN で自身を停止し、
    /// 自身のプロセスグループを作ってターミナルを掌握し、termios を保存してから
    /// SIGINT / SIGQUIT / SIGTERM / SIGTSTP を無視する。
    /// 端末でなければ何も変更しない。
    pub fn init() -> Self {
        let terminal_fd = libc::STDIN_FILENO;
        if unsafe { libc::isatty(terminal_fd) } != 1 {
            return Self::detached();
        }

        // フォアグラウンドに移されると SIGCONT で再開し、ループ条件を再評価する
        loop {
            let pgid = unsafe { libc::getpgrp() };
            let fg = unsafe { libc::tcgetpgrp(terminal_fd) };
            if fg == pgid {
                break;
            }
            if fg < 0 {
                report("tcgetpgrp");
                break;
            }
            unsafe {
                libc::kill(-pgid, libc::SIGTTIN);
            }
        }

        for sig in SHELL_IGNORED_SIGNALS {
            unsafe {
                libc::signal(sig, libc::SIG_IGN);
            }
        }

        let shell_pid = unsafe { libc::getpid() };
        if unsafe { libc::getpgrp() } != shell_pid && unsafe { libc::setpgid(shell_pid, shell_pid) } < 0 {
            report("setpgid");
        }
        let shell_pgid = unsafe { libc::getpgrp() };

        {
            let _ttou = IgnoredSignal::new(libc::SIGTTOU);
            if unsafe { libc::tcsetpgrp(terminal_fd, shell_pgid) } < 0 {
                report("tcsetpgrp");
            }
        }

        let mut tmodes: libc::termios = unsafe { std::mem::zeroed() };
        let tmodes = if unsafe { libc::tcgetattr(terminal_fd, &mut tmodes) } == 0 {
            Some(tmodes)
        } else {
            report("tcgetattr");
            None
        };

        Self {
            interactive: true,
            terminal_fd,
            tmodes,
            shell_pgid,
        }
    }

    /// 端末を持たないセッション。シグナル処理も端末も変更しない。
    pub fn detached() -> Self {
        Self {
            interactive: false,
            terminal_fd: libc::STDIN_FILENO,
            tmodes: None,
            shell_pgid: unsafe { libc::getpgrp() },
        }
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    pub fn terminal_fd(&self) -> c_int {
        self.terminal_fd
    }

    pub fn shell_pgid(&self) -> pid_t {
        self.shell_pgid
    }

    /// ターミナルのフォアグラウンドをシェルのグループに戻し、保存した termios を復元する。
    /// 呼び出し側で SIGTTOU を無視しておくこと。
    fn reclaim_terminal(&self) {
        if unsafe { libc::tcsetpgrp(self.terminal_fd, self.shell_pgid) } < 0 {
            report("tcsetpgrp");
        }
        if let Some(tmodes) = &self.tmodes {
            if unsafe { libc::tcsetattr(self.terminal_fd, libc::TCSADRAIN, tmodes) } < 0 {
                report("tcsetattr");
            }
        }
    }
}

// ── シグナルガード ───────────────────────────────────────────────────

/// シグナルを `SIG_IGN` にし、drop で直前の処理に戻す。
pub struct IgnoredSignal {
    signal: c_int,
    previous: libc::sighandler_t,
}

impl IgnoredSignal {
    pub fn new(signal: c_int) -> Self {
        let previous = unsafe { libc::signal(signal, libc::SIG_IGN) };
        Self { signal, previous }
    }
}

impl Drop for IgnoredSignal {
    fn drop(&mut self) {
        if self.previous != libc::SIG_ERR {
            unsafe {
                libc::signal(self.signal, self.previous);
            }
        }
    }
}

/// fork 後の子プロセスで、シェルが変更したシグナル処理をデフォルトに戻す。
pub fn reset_child_signals() {
    for sig in CHILD_DEFAULT_SIGNALS {
        unsafe {
            libc::signal(sig, libc::SIG_DFL);
        }
    }
}

// ── ForegroundGuard ─────────────────────────────────────────────────

/// パイプライン 1 本分のフォアグラウンド所有権。
///
/// 取得から drop まで SIGTTOU を無視する。[`hand_over`](Self::hand_over) で
/// ターミナルをパイプラインのプロセスグループに渡し、drop でシェルに戻す。
/// エラーで早期リターンする経路でも drop で必ず復元される。
pub struct ForegroundGuard {
    session: Session,
    // フィールドは宣言順に drop される。ターミナル回収の後で SIGTTOU を戻す。
    _ttou: IgnoredSignal,
}

impl ForegroundGuard {
    pub fn acquire(session: Session) -> Self {
        Self {
            session,
            _ttou: IgnoredSignal::new(libc::SIGTTOU),
        }
    }

    /// ターミナルのフォアグラウンドを `pgid` に渡す。非対話モードでは何もしない。
    /// 失敗は報告するが実行は続ける（シグナルの配送先が正しくなくなるだけ）。
    pub fn hand_over(&self, pgid: pid_t) {
        if !self.session.interactive {
            return;
        }
        if unsafe { libc::tcsetpgrp(self.session.terminal_fd, pgid) } < 0 {
            report("tcsetpgrp");
        }
    }
}

impl Drop for ForegroundGuard {
    fn drop(&mut self) {
        if self.session.interactive {
            self.session.reclaim_terminal();
        }
    }
}
