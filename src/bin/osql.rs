//!
//! opaldb CLI binary
//! -----------------
//! Interactive SQL interpreter over a local opaldb data directory. Reads
//! multi-line statements terminated by `;`, submits them through a session
//! and renders row batches as ASCII tables. A one-shot mode runs a single
//! query from the command line.

use std::env;
use std::process::ExitCode;

use anyhow::Result;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use opaldb::cli::render_output;
use opaldb::config::EngineOptions;
use opaldb::Engine;

fn print_usage(program: &str) {
    eprintln!(
        "Usage:\n  {program} [--data-dir <path>]                 # start the interactive interpreter\n  {program} -q \"<SQL>\" [--data-dir <path>]      # run a one-shot statement\n\nFlags:\n  --data-dir <path>   Database directory (default: opaldb_data, or OPALDB_DATA_DIR)\n  -q, --query <SQL>   Run one statement and exit\n  -h, --help          Show this help\n\nInteractive commands:\n  help                show this help\n  quit | exit         checkpoint and leave\n  <SQL>;              execute a statement (multi-line input until ';')"
    );
}

fn main() -> ExitCode {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let mut args: Vec<String> = env::args().collect();
    let program = args.remove(0);
    let mut options = EngineOptions::from_env();
    let mut query: Option<String> = None;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--data-dir" => {
                if i + 1 >= args.len() {
                    eprintln!("--data-dir requires a value");
                    print_usage(&program);
                    return ExitCode::from(2);
                }
                options.data_dir = args[i + 1].clone().into();
                i += 2;
            }
            "-q" | "--query" => {
                if i + 1 >= args.len() {
                    eprintln!("{} requires a value", args[i]);
                    print_usage(&program);
                    return ExitCode::from(2);
                }
                query = Some(args[i + 1].clone());
                i += 2;
            }
            "-h" | "--help" => {
                print_usage(&program);
                return ExitCode::SUCCESS;
            }
            other => {
                eprintln!("unknown flag '{}'", other);
                print_usage(&program);
                return ExitCode::from(2);
            }
        }
    }

    // Unrecoverable startup or recovery failure exits nonzero.
    let engine = match Engine::open(options) {
        Ok(e) => e,
        Err(e) => {
            eprintln!("opaldb: startup failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = match query {
        Some(sql) => run_once(&engine, &sql),
        None => repl(&engine),
    };

    let shutdown = engine.shutdown();
    match (result, shutdown) {
        (Ok(()), Ok(())) => ExitCode::SUCCESS,
        (Err(e), _) => {
            eprintln!("opaldb: {}", e);
            ExitCode::FAILURE
        }
        (_, Err(e)) => {
            eprintln!("opaldb: shutdown failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_once(engine: &std::sync::Arc<Engine>, sql: &str) -> Result<()> {
    let mut session = engine.session();
    match session.submit(sql) {
        Ok(output) => {
            println!("{}", render_output(&output));
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn repl(engine: &std::sync::Arc<Engine>) -> Result<()> {
    println!("opaldb interactive interpreter. Statements end with ';'. Type 'help' for help.");
    let mut editor = DefaultEditor::new()?;
    let mut session = engine.session();
    let mut pending = String::new();

    loop {
        let prompt = if pending.is_empty() {
            format!("{}> ", session.current_database())
        } else {
            "   ...> ".to_string()
        };
        match editor.readline(&prompt) {
            Ok(line) => {
                let trimmed = line.trim();
                if pending.is_empty() {
                    match trimmed.to_ascii_lowercase().as_str() {
                        "" => continue,
                        "quit" | "exit" => break,
                        "help" => {
                            print_usage("osql");
                            continue;
                        }
                        _ => {}
                    }
                }
                pending.push_str(&line);
                pending.push('\n');
                if !trimmed.ends_with(';') {
                    continue;
                }
                let sql = std::mem::take(&mut pending);
                let _ = editor.add_history_entry(sql.trim());
                match session.submit(&sql) {
                    Ok(output) => println!("{}", render_output(&output)),
                    // Statement errors print and the session continues.
                    Err(e) => eprintln!("{}", e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                pending.clear();
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
