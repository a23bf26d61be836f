//! Interactive read-eval-print loop.
//!
//! Line editing and history via rustyline; a persistent [`Session`] keeps
//! declarations alive across inputs. Incomplete input (an unclosed block
//! or a dangling expression) switches to a continuation prompt.

use hemlock_runtime::{RuntimeError, RuntimeOptions, Session};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

const PROMPT: &str = "hemlock> ";
const CONTINUATION_PROMPT: &str = "    ... ";

pub fn run(options: &RuntimeOptions) -> i32 {
    let mut session = Session::new(options);
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("hemlock: cannot start line editor: {}", e);
            return 1;
        }
    };

    let history_path = dirs::home_dir().map(|home| home.join(".hemlock").join("repl_history"));
    if let Some(path) = &history_path {
        let _ = editor.load_history(path);
    }

    println!("Hemlock v{} REPL", env!("CARGO_PKG_VERSION"));
    println!("Type exit to quit\n");

    let mut buffer = String::new();
    loop {
        let prompt = if buffer.is_empty() {
            PROMPT
        } else {
            CONTINUATION_PROMPT
        };
        match editor.readline(prompt) {
            Ok(line) => {
                let trimmed = line.trim();
                if buffer.is_empty() && (trimmed == "exit" || trimmed == "quit") {
                    break;
                }
                if trimmed.is_empty() && buffer.is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(&line);
                if !buffer.is_empty() {
                    buffer.push('\n');
                }
                buffer.push_str(&line);

                match session.eval(&buffer) {
                    Ok(value) => {
                        buffer.clear();
                        if !value.is_null() {
                            println!("{}", session.format_value(&value));
                        }
                    }
                    Err(error) if is_incomplete(&error) => {
                        // Keep buffering until the input parses.
                    }
                    Err(error) => {
                        buffer.clear();
                        hemlock_runtime::report_repl_error(&error);
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                buffer.clear();
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("hemlock: {}", e);
                break;
            }
        }
    }

    if let Some(path) = &history_path {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let _ = editor.save_history(path);
    }
    0
}

/// Whether a parse failure looks like truncated-but-valid input that a
/// continuation line could complete.
fn is_incomplete(error: &RuntimeError) -> bool {
    match error {
        RuntimeError::Parse(parse) => {
            parse.message.contains("end of input") || parse.message.contains("unclosed")
        }
        _ => false,
    }
}
