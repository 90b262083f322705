//! psh — パイプラインとリダイレクトに対応した小さな対話シェル
//!
//! REPL ループ: プロンプト表示 → 1 行読み取り → トークン分割 → 実行 → ループ
//!
//! 標準入力が端末のときだけ `"<行番号>: "` のプロンプトを表示する。
//! `exit` または入力終端で終了ステータス 0 で終了する。

use std::io::{self, BufRead, Write};

use psh::executor;
use psh::shell::Shell;
use psh::terminal::Session;
use psh::tokens::Tokens;

fn prompt(line_num: usize) {
    let mut stdout = io::stdout();
    let _ = write!(stdout, "{}: ", line_num);
    let _ = stdout.flush();
}

fn main() {
    let mut shell = Shell::new(Session::init());
    let interactive = shell.session.is_interactive();

    let stdin = io::stdin();
    let mut line: Vec<u8> = Vec::new();
    let mut line_num: usize = 0;

    loop {
        if interactive {
            prompt(line_num);
        }

        line.clear();
        match stdin.lock().read_until(b'\n', &mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                eprintln!("psh: read error: {}", e);
                break;
            }
        }

        let tokens = Tokens::tokenize(&line);
        shell.last_status = executor::execute(&mut shell, &tokens);

        if shell.should_exit {
            break;
        }
        line_num += 1;
    }

    std::process::exit(0);
}
