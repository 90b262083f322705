//! psh バイナリを標準入力経由で駆動する結合テスト。
//!
//! 標準入力はパイプなので非対話モード（プロンプトなし、ターミナル制御なし）で動く。

use std::ffi::{CStr, OsStr, OsString};
use std::fs;
use std::io::{self, Write};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

fn run(dir: &Path, input: impl AsRef<[u8]>) -> Output {
    run_with_path(dir, input, None)
}

fn run_with_path(dir: &Path, input: impl AsRef<[u8]>, path: Option<OsString>) -> Output {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_psh"));
    cmd.current_dir(dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(path) = path {
        cmd.env("PATH", path);
    }
    let mut child = cmd.spawn().expect("failed to start psh");
    let mut stdin = child.stdin.take().unwrap();
    // `exit` で先に終了した場合は書き込みが EPIPE になるが、結果には影響しない
    let _ = stdin.write_all(input.as_ref());
    drop(stdin);
    child.wait_with_output().unwrap()
}

/// 疑似端末を制御端末に持つ新しいセッションで psh を動かす。
///
/// 標準入力はパイプのままなので psh は非対話モードで、起動したステージは
/// 端末のバックグラウンドグループになる。`limit` 以内に終わらなければ kill して panic する。
fn run_on_pty(dir: &Path, input: &str, limit: Duration) -> Output {
    let master = unsafe { libc::posix_openpt(libc::O_RDWR | libc::O_NOCTTY) };
    assert!(master >= 0, "posix_openpt: {}", io::Error::last_os_error());
    let master = unsafe { OwnedFd::from_raw_fd(master) };
    unsafe {
        assert_eq!(libc::grantpt(master.as_raw_fd()), 0);
        assert_eq!(libc::unlockpt(master.as_raw_fd()), 0);
    }
    let mut name = [0 as libc::c_char; 128];
    let ret = unsafe { libc::ptsname_r(master.as_raw_fd(), name.as_mut_ptr(), name.len()) };
    assert_eq!(ret, 0);
    let slave = unsafe { CStr::from_ptr(name.as_ptr()) }.to_owned();

    let mut cmd = Command::new(env!("CARGO_BIN_EXE_psh"));
    cmd.current_dir(dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    unsafe {
        cmd.pre_exec(move || {
            // セッションリーダーが O_NOCTTY なしで端末を開くと制御端末になる
            if libc::setsid() < 0 {
                return Err(io::Error::last_os_error());
            }
            let fd = libc::open(slave.as_ptr(), libc::O_RDWR);
            if fd < 0 {
                return Err(io::Error::last_os_error());
            }
            libc::close(fd);
            Ok(())
        });
    }

    let mut child = cmd.spawn().expect("failed to start psh");
    let mut stdin = child.stdin.take().unwrap();
    let _ = stdin.write_all(input.as_bytes());
    drop(stdin);

    let deadline = Instant::now() + limit;
    while child.try_wait().unwrap().is_none() {
        if Instant::now() > deadline {
            let _ = child.kill();
            let out = child.wait_with_output().unwrap();
            panic!("psh did not finish; stderr: {}", stderr(&out));
        }
        thread::sleep(Duration::from_millis(20));
    }
    drop(master);
    child.wait_with_output().unwrap()
}

/// `/proc/<pid>/stat` の 5 番目のフィールド（プロセスグループ）を出力するスクリプト。
const PRINT_PGID: &str = "cut -d' ' -f5 /proc/$$/stat\n";

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn canonical(dir: &Path) -> PathBuf {
    fs::canonicalize(dir).unwrap()
}

fn write_script(path: &Path, body: &str, mode: u32) {
    fs::write(path, body).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).unwrap();
}

// ── パイプライン ──

#[test]
fn two_stage_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let out = run(dir.path(), "echo hi | wc -c\n");
    assert_eq!(stdout(&out).trim(), "3");
    assert!(out.status.success());
}

#[test]
fn three_stage_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let out = run(dir.path(), "printf c\\nb\\na\\n | sort | head -n 1\n");
    assert_eq!(stdout(&out), "a\n");
}

#[test]
fn pipelines_match_system_shell() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["b.txt", "a.txt", "c.log"] {
        fs::write(dir.path().join(name), name).unwrap();
    }
    let lines = [
        "echo one two three | tr a-z A-Z",
        "ls | sort -r | head -n 2",
        "echo hi | cat | cat | cat | wc -c",
        "ls -1 | grep txt | wc -l",
    ];
    for line in lines {
        let expected = Command::new("/bin/sh")
            .arg("-c")
            .arg(line)
            .current_dir(dir.path())
            .output()
            .unwrap();
        let actual = run(dir.path(), &format!("{}\n", line));
        assert_eq!(actual.stdout, expected.stdout, "pipeline: {}", line);
    }
}

#[test]
fn stages_run_concurrently() {
    // 全ステージを起動してから待つので、head の終了で yes が SIGPIPE を受けて終わる
    let dir = tempfile::tempdir().unwrap();
    let out = run(dir.path(), "yes | head -n 1\necho done\n");
    assert_eq!(stdout(&out), "y\ndone\n");
}

#[test]
fn failing_stage_does_not_stop_shell() {
    let dir = tempfile::tempdir().unwrap();
    let out = run(dir.path(), "false | true\nfalse\necho ok\n");
    assert_eq!(stdout(&out), "ok\n");
    assert!(out.status.success());
}

#[test]
fn builtin_inside_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let out = run(dir.path(), "pwd | cat\n");
    assert_eq!(stdout(&out), format!("{}\n", canonical(dir.path()).display()));
}

#[test]
fn pipeline_stages_share_one_group() {
    let dir = tempfile::tempdir().unwrap();
    write_script(&dir.path().join("a.sh"), &format!("#!/bin/sh\n{}", PRINT_PGID), 0o755);
    for name in ["b.sh", "c.sh"] {
        write_script(&dir.path().join(name), &format!("#!/bin/sh\ncat\n{}", PRINT_PGID), 0o755);
    }
    let out = run(dir.path(), "./a.sh | ./b.sh | ./c.sh\n");
    let groups: Vec<i32> = stdout(&out)
        .lines()
        .map(|l| l.trim().parse().unwrap())
        .collect();
    assert_eq!(groups.len(), 3, "stdout: {}", stdout(&out));
    assert!(groups.iter().all(|&g| g == groups[0]), "groups: {:?}", groups);
    // 非対話モードの psh はテストプロセスのグループにいる
    assert_ne!(groups[0], unsafe { libc::getpgrp() });
}

#[test]
fn each_pipeline_gets_its_own_group() {
    let dir = tempfile::tempdir().unwrap();
    write_script(&dir.path().join("a.sh"), &format!("#!/bin/sh\n{}", PRINT_PGID), 0o755);
    let out = run(dir.path(), "./a.sh\n./a.sh\n");
    let text = stdout(&out);
    let groups: Vec<&str> = text.lines().collect();
    assert_eq!(groups.len(), 2);
    assert_ne!(groups[0], groups[1]);
}

#[test]
fn terminal_read_from_background_group_does_not_hang() {
    let dir = tempfile::tempdir().unwrap();
    let out = run_on_pty(dir.path(), "cat /dev/tty\necho after\n", Duration::from_secs(10));
    assert_eq!(stdout(&out), "after\n");
    let err = stderr(&out);
    assert!(err.lines().count() <= 1, "stderr: {}", err);
    assert!(!err.contains("resuming"), "stderr: {}", err);
}

// ── リダイレクト ──

#[test]
fn redirect_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let out = run(dir.path(), "echo hello world > out.txt\ncat < out.txt\n");
    assert_eq!(stdout(&out), "hello world\n");
    assert_eq!(fs::read_to_string(dir.path().join("out.txt")).unwrap(), "hello world\n");
}

#[test]
fn non_utf8_file_name_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let out = run(dir.path(), b"echo bytes > caf\xe9.txt\ncat < caf\xe9.txt\n");
    assert_eq!(stdout(&out), "bytes\n");
    let name = OsStr::from_bytes(b"caf\xe9.txt");
    assert_eq!(fs::read_to_string(dir.path().join(name)).unwrap(), "bytes\n");
}

#[test]
fn output_redirect_truncates() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("f.txt"), "a much longer previous content\n").unwrap();
    let out = run(dir.path(), "echo hi > f.txt\n");
    assert_eq!(stdout(&out), "");
    assert_eq!(fs::read_to_string(dir.path().join("f.txt")).unwrap(), "hi\n");
}

#[test]
fn redirects_at_both_ends_of_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("in.txt"), "abc\n").unwrap();
    let out = run(dir.path(), "cat < in.txt | tr a-z A-Z > out.txt\n");
    assert_eq!(stdout(&out), "");
    assert_eq!(fs::read_to_string(dir.path().join("out.txt")).unwrap(), "ABC\n");
}

#[test]
fn missing_input_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let out = run(dir.path(), "cat < nonexistent.txt\necho still here\n");
    let text = stdout(&out);
    assert!(text.contains("psh: nonexistent.txt: "), "stdout: {}", text);
    assert!(text.ends_with("still here\n"), "stdout: {}", text);
    assert!(out.status.success());
}

#[test]
fn pwd_into_file() {
    let dir = tempfile::tempdir().unwrap();
    let out = run(dir.path(), "pwd > out.txt\n");
    assert_eq!(stdout(&out), "");
    let written = fs::read_to_string(dir.path().join("out.txt")).unwrap();
    assert_eq!(written, format!("{}\n", canonical(dir.path()).display()));
}

// ── ビルトイン ──

#[test]
fn cd_then_pwd() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("sub")).unwrap();
    let out = run(dir.path(), "cd sub\npwd\n");
    assert_eq!(stdout(&out), format!("{}\n", canonical(&dir.path().join("sub")).display()));
}

#[test]
fn cd_to_missing_dir_keeps_cwd() {
    let dir = tempfile::tempdir().unwrap();
    let out = run(dir.path(), "cd nowhere\npwd\n");
    let text = stdout(&out);
    assert!(text.starts_with("psh: cd: nowhere: "), "stdout: {}", text);
    assert!(text.ends_with(&format!("{}\n", canonical(dir.path()).display())));
}

#[test]
fn cd_affects_later_commands() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("sub")).unwrap();
    fs::write(dir.path().join("sub").join("note.txt"), "inside\n").unwrap();
    let out = run(dir.path(), "cd sub\ncat < note.txt\n");
    assert_eq!(stdout(&out), "inside\n");
}

#[test]
fn help_lists_builtins() {
    let dir = tempfile::tempdir().unwrap();
    let text = stdout(&run(dir.path(), "help\n"));
    for name in ["? - ", "help - ", "exit - ", "cd - ", "pwd - "] {
        assert!(text.contains(name), "missing {:?} in {}", name, text);
    }
    assert_eq!(stdout(&run(dir.path(), "?\n")), text);
}

#[test]
fn exit_stops_reading() {
    let dir = tempfile::tempdir().unwrap();
    let out = run(dir.path(), "exit\necho unreachable\n");
    assert_eq!(stdout(&out), "");
    assert_eq!(out.status.code(), Some(0));
}

#[test]
fn end_of_input_exits_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let out = run(dir.path(), "");
    assert_eq!(stdout(&out), "");
    assert_eq!(out.status.code(), Some(0));
}

#[test]
fn blank_lines_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let out = run(dir.path(), "\n   \necho x\n");
    assert_eq!(stdout(&out), "x\n");
}

// ── PATH 解決 ──

#[test]
fn path_lookup_matches_absolute_invocation() {
    let dir = tempfile::tempdir().unwrap();
    let bin = dir.path().join("bin");
    fs::create_dir(&bin).unwrap();
    write_script(&bin.join("hello-psh"), "#!/bin/sh\necho hello from path\n", 0o755);

    let mut path = OsString::from(dir.path().join("empty"));
    path.push(":");
    path.push(&bin);
    path.push(":/usr/bin:/bin");

    let input = format!("hello-psh\n{}\n", bin.join("hello-psh").display());
    let out = run_with_path(dir.path(), &input, Some(path));
    assert_eq!(stdout(&out), "hello from path\nhello from path\n");
}

#[test]
fn relative_path_runs_without_path_search() {
    let dir = tempfile::tempdir().unwrap();
    write_script(&dir.path().join("local.sh"), "#!/bin/sh\necho local\n", 0o755);
    let out = run_with_path(dir.path(), "./local.sh\n", Some(OsString::from("/nonexistent")));
    assert_eq!(stdout(&out), "local\n");
}

#[test]
fn unknown_command_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let out = run(dir.path(), "no-such-command-psh\necho ok\n");
    assert_eq!(stdout(&out), "no-such-command-psh: command not found\nok\n");
    assert!(out.status.success());
}

#[test]
fn permission_denied_stops_path_search() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a");
    let b = dir.path().join("b");
    fs::create_dir(&a).unwrap();
    fs::create_dir(&b).unwrap();
    write_script(&a.join("tool"), "#!/bin/sh\necho from a\n", 0o644);
    write_script(&b.join("tool"), "#!/bin/sh\necho from b\n", 0o755);

    let mut path = a.into_os_string();
    path.push(":");
    path.push(&b);

    let out = run_with_path(dir.path(), "tool\n", Some(path));
    let text = stdout(&out);
    assert!(text.starts_with("psh: tool: "), "stdout: {}", text);
    assert!(!text.contains("from b"), "stdout: {}", text);
}

// ── 構文エラー ──

#[test]
fn syntax_errors_are_reported_and_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let out = run(dir.path(), "echo hi |\n| wc\ncat <\necho ok\n");
    assert_eq!(stdout(&out), "ok\n");
    let err = stderr(&out);
    assert_eq!(err.matches("syntax error").count(), 3, "stderr: {}", err);
}

#[test]
fn stages_before_syntax_error_still_run() {
    // ステージは境界が見つかった時点で起動するので、エラーより前のステージは実行される
    let dir = tempfile::tempdir().unwrap();
    let out = run(dir.path(), "touch made |\necho ok\n");
    assert_eq!(stdout(&out), "ok\n");
    assert!(stderr(&out).contains("syntax error near unexpected token `newline'"));
    assert!(dir.path().join("made").exists());
}

#[test]
fn misplaced_redirects_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let out = run(dir.path(), "echo hi > f.txt | cat\necho ok\n");
    assert_eq!(stdout(&out), "ok\n");
    assert!(stderr(&out).contains("only allowed on the last command"));
    assert!(!dir.path().join("f.txt").exists());
}
