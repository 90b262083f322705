//! パイプライン 1 本分のプロセスグループと待機。
//!
//! 最初に起動したステージの PID がグループ ID になり、以降のステージは
//! 同じグループに参加する（端末からのシグナルがパイプライン全体に届く）。
//! 全ステージを起動してから [`Job::wait`] でまとめて待機する。

use std::io;

use libc::{c_int, pid_t};

/// 起動済みパイプライン。
#[derive(Debug, Default)]
pub struct Job {
    /// プロセスグループ ID。まだ 1 つも起動していなければ 0。
    pgid: pid_t,
    /// 起動順の PID。
    pids: Vec<pid_t>,
    /// 停止したグループに終了要求を送った後か。
    terminating: bool,
}

impl Job {
    pub fn new() -> Self {
        Self::default()
    }

    /// 次に起動するステージが参加すべきグループ。0 なら新しいグループのリーダーになる。
    pub fn pgid(&self) -> pid_t {
        self.pgid
    }

    pub fn is_empty(&self) -> bool {
        self.pids.is_empty()
    }

    /// 起動したステージを登録する。最初の PID がグループ ID として確定する。
    pub fn push(&mut self, pid: pid_t) {
        if self.pgid == 0 {
            self.pgid = pid;
        }
        self.pids.push(pid);
    }

    /// 全ステージの終了を待ち、最後のステージの終了ステータスを返す。
    ///
    /// `foreground` はグループがターミナルを所有しているか（対話モード）。
    /// 停止したステージの扱いは [`on_stop`] を参照。ジョブの一時停止には対応しない。
    pub fn wait(mut self, foreground: bool) -> i32 {
        let mut status = 0;
        for pid in std::mem::take(&mut self.pids) {
            match self.wait_pid(pid, foreground) {
                Ok(raw) => status = exit_code(raw),
                Err(e) => {
                    eprintln!("psh: wait: {}", e);
                    status = 1;
                }
            }
        }
        status
    }

    /// `pid` が終了するまで待ち、`waitpid` の raw status を返す。
    fn wait_pid(&mut self, pid: pid_t, foreground: bool) -> io::Result<i32> {
        loop {
            let mut raw: i32 = 0;
            let ret = unsafe { libc::waitpid(pid, &mut raw, libc::WUNTRACED) };
            if ret < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            if libc::WIFSTOPPED(raw) {
                let action = on_stop(libc::WSTOPSIG(raw), foreground, self.terminating);
                self.apply(pid, action);
                continue;
            }
            return Ok(raw);
        }
    }

    fn apply(&mut self, pid: pid_t, action: StopAction) {
        let signals: &[c_int] = match action {
            StopAction::Resume => {
                eprintln!("psh: job control is not supported; resuming {}", pid);
                &[libc::SIGCONT]
            }
            StopAction::Terminate => {
                eprintln!("psh: {}: stopped without the terminal; terminating", pid);
                self.terminating = true;
                &[libc::SIGTERM, libc::SIGCONT]
            }
            StopAction::Kill => &[libc::SIGKILL],
        };
        for &sig in signals {
            unsafe {
                libc::kill(-self.pgid, sig);
            }
        }
    }
}

/// 停止したステージへの対処。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopAction {
    /// SIGCONT でグループごと再開する。
    Resume,
    /// SIGTERM を送ってから再開し、終了させる。
    Terminate,
    /// 終了要求後にまた停止した。SIGKILL で確実に終わらせる。
    Kill,
}

/// 停止シグナルから対処を決める。
///
/// 再開するのはグループがターミナルを所有しているときの SIGTSTP / SIGSTOP だけ。
/// SIGTTIN / SIGTTOU はターミナルを持たないグループが読み書きした結果なので、
/// 再開してもすぐ同じ理由で止まる。非対話モードでは全ステージがバックグラウンドなので常に終了させる。
fn on_stop(signal: c_int, foreground: bool, terminating: bool) -> StopAction {
    let background_io = signal == libc::SIGTTIN || signal == libc::SIGTTOU;
    if terminating {
        StopAction::Kill
    } else if foreground && !background_io {
        StopAction::Resume
    } else {
        StopAction::Terminate
    }
}

/// `waitpid` の raw status を終了ステータスに変換する。
/// シグナルで終了した場合は 128 + シグナル番号。
pub fn exit_code(raw: i32) -> i32 {
    if libc::WIFEXITED(raw) {
        libc::WEXITSTATUS(raw)
    } else if libc::WIFSIGNALED(raw) {
        128 + libc::WTERMSIG(raw)
    } else {
        1
    }
}
