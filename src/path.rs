//! PATH 解決と exec。
//!
//! `argv[0]` をそのまま exec し、ENOENT で失敗したら `$PATH` の各ディレクトリを
//! 左から順に `dir + "/" + argv[0]` で試す。ENOENT 以外の失敗（EACCES 等）で探索を打ち切る。
//!
//! 候補パスと argv の `CString` は fork 前に親プロセスで [`ExecPlan::new`] が組み立て、
//! 子プロセスは [`ExecPlan::exec`] で順に exec するだけにする。

use std::ffi::{CStr, CString, NulError, OsStr, OsString};
use std::io::{self, Write};
use std::os::unix::ffi::{OsStrExt, OsStringExt};

/// 検索パスを保持する環境変数名。
pub const PATH_KEY: &str = "PATH";

/// exec を試す順に候補パスを返す。
///
/// 先頭は `name` そのもの（絶対パス・相対パスの両方をカバー）。
/// 続いて `path_var` を `:` で分割した各エントリ。空エントリは飛ばす。
pub fn candidates(name: impl AsRef<OsStr>, path_var: Option<&OsStr>) -> Vec<OsString> {
    let name = name.as_ref();
    let mut out = vec![name.to_os_string()];
    if let Some(paths) = path_var {
        for dir in paths.as_bytes().split(|&b| b == b':').filter(|d| !d.is_empty()) {
            let mut full = OsStr::from_bytes(dir).to_os_string();
            full.push("/");
            full.push(name);
            out.push(full);
        }
    }
    out
}

// ── CStringVec ────────────────────────────────────────────────────

/// `execv` 用の CString ベクタ。NULL 終端のポインタ配列を保持する。
struct CStringVec {
    _strings: Vec<CString>,
    ptrs: Vec<*const libc::c_char>,
}

impl CStringVec {
    fn from_args<S: AsRef<OsStr>>(args: &[S]) -> Result<Self, NulError> {
        let strings = args
            .iter()
            .map(|s| CString::new(s.as_ref().as_bytes()))
            .collect::<Result<Vec<_>, _>>()?;
        // CString の中身はヒープ上にあるため、Vec がムーブしてもポインタは有効
        let mut ptrs: Vec<*const libc::c_char> = strings.iter().map(|s| s.as_ptr()).collect();
        ptrs.push(std::ptr::null());
        Ok(Self {
            _strings: strings,
            ptrs,
        })
    }

    fn as_ptr(&self) -> *const *const libc::c_char {
        self.ptrs.as_ptr()
    }
}

// ── ExecPlan ──────────────────────────────────────────────────────

/// 1 ステージ分の exec 計画。argv と試行順の候補パス。
pub struct ExecPlan {
    name: OsString,
    argv: CStringVec,
    candidates: Vec<CString>,
}

impl ExecPlan {
    /// `args[0]` をコマンド名として計画を作る。`args` は空でないこと。
    /// いずれかの引数や候補パスに NUL バイトが含まれる場合は失敗する。
    pub fn new<S: AsRef<OsStr>>(args: &[S], path_var: Option<&OsStr>) -> Result<Self, NulError> {
        let name: &OsStr = args.first().map(AsRef::as_ref).unwrap_or_default();
        let argv = CStringVec::from_args(args)?;
        let candidates = candidates(name, path_var)
            .into_iter()
            .map(|p| CString::new(p.into_vec()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            name: name.to_os_string(),
            argv,
            candidates,
        })
    }

    /// 候補を先頭から順に `exec` に渡す。
    ///
    /// `exec` は成功すれば戻らず、失敗時はそのエラーを返す関数。
    /// ENOENT なら次の候補へ進み、それ以外のエラーで打ち切る。
    /// 戻り値は探索を終了させたエラー（全候補が ENOENT なら ENOENT）。
    pub fn search<F>(&self, mut exec: F) -> io::Error
    where
        F: FnMut(&CStr) -> io::Error,
    {
        let mut last = io::Error::from_raw_os_error(libc::ENOENT);
        for path in &self.candidates {
            let err = exec(path);
            if err.raw_os_error() != Some(libc::ENOENT) {
                return err;
            }
            last = err;
        }
        last
    }

    /// プロセスイメージを置き換える。失敗したら報告して終了ステータス 1 で `_exit` する。
    /// fork 後の子プロセスでのみ呼ぶこと。
    pub fn exec(&self) -> ! {
        let err = self.search(|path| {
            unsafe {
                libc::execv(path.as_ptr(), self.argv.as_ptr());
            }
            io::Error::last_os_error()
        });

        // 直後に _exit するので書き込み失敗は報告先がない
        let name = self.name.to_string_lossy();
        let mut out = io::stdout().lock();
        if err.raw_os_error() == Some(libc::ENOENT) {
            let _ = writeln!(out, "{}: command not found", name);
        } else {
            let _ = writeln!(out, "psh: {}: {}", name, err);
        }
        let _ = out.flush();
        unsafe { libc::_exit(1) }
    }
}
