use clap::Parser;
use mint_rs::dap::{self, Message, Response};
use mint_rs::scheduler::Scheduler;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::io::{Read, Write};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mint")]
#[command(version)]
#[command(about = "The mint language runtime", long_about = None)]
struct Cli {
    /// Pre-arm a breakpoint: MODULE LINE (repeatable)
    #[arg(short = 'b', long = "breakpoint", num_args = 2, value_names = ["MODULE", "LINE"], action = clap::ArgAction::Append)]
    breakpoint: Vec<String>,

    /// Pause before executing the first instruction
    #[arg(long)]
    wait: bool,

    /// Speak the Debug Adapter Protocol over stdin/stdout
    #[arg(long)]
    stdio: bool,

    /// Main script to run (.mn)
    #[arg(name = "FILE")]
    file: Option<PathBuf>,

    /// Arguments passed to the script
    #[arg(allow_hyphen_values = true, trailing_var_arg = true)]
    args: Vec<String>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.stdio {
        return run_stdio_adapter();
    }

    let mut scheduler = Scheduler::new().map_err(|e| anyhow::anyhow!("setup failed: {}", e))?;
    scheduler.debug.wait_on_start = cli.wait;
    for pair in cli.breakpoint.chunks(2) {
        let line: u32 = pair[1]
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid breakpoint line '{}'", pair[1]))?;
        scheduler.debug.breakpoints.push((pair[0].clone(), line));
    }

    match cli.file {
        Some(file) => {
            let code = run_file(scheduler, file, cli.args)?;
            std::process::exit(code);
        }
        None => run_repl(scheduler),
    }
}

fn run_file(mut scheduler: Scheduler, file: PathBuf, args: Vec<String>) -> anyhow::Result<i32> {
    if let Err(error) = scheduler.process_from_main_file(&file, &args) {
        eprintln!("{}", error);
        return Ok(1);
    }
    Ok(scheduler.run())
}

fn history_path() -> PathBuf {
    std::env::var("HOME")
        .map(|home| PathBuf::from(home).join(".mint_history"))
        .unwrap_or_else(|_| PathBuf::from(".mint_history"))
}

fn run_repl(mut scheduler: Scheduler) -> anyhow::Result<()> {
    let mut editor = DefaultEditor::new()?;
    let history = history_path();
    let _ = editor.load_history(&history);

    println!("mint interactive shell");
    println!("Type 'exit' to quit");

    loop {
        match editor.readline("mint> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if line == "exit" || line == "quit" {
                    break;
                }
                editor.add_history_entry(line)?;

                match scheduler.process_from_repl_buffer(line) {
                    Ok(_) => {
                        scheduler.run();
                    }
                    Err(error) => eprintln!("{}", error),
                }
            }
            Err(ReadlineError::Interrupted) => break,
            Err(ReadlineError::Eof) => break,
            Err(error) => {
                eprintln!("{}", error);
                break;
            }
        }
    }

    if let Err(error) = editor.save_history(&history) {
        eprintln!("warning: could not save history: {}", error);
    }
    Ok(())
}

/// Minimal DAP endpoint: answer every request with an error response so a
/// frontend can detect this build has no attached debugger, and leave on
/// `disconnect`/`terminate`.
fn run_stdio_adapter() -> anyhow::Result<()> {
    let mut decoder = dap::Decoder::new();
    let mut stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    let mut chunk = [0u8; 4096];
    let mut seq = 0i64;

    loop {
        let read = stdin.read(&mut chunk)?;
        if read == 0 {
            return Ok(());
        }
        decoder.feed(&chunk[..read]);
        while let Some(message) = decoder.next_message()? {
            if let Message::Request(request) = message {
                seq += 1;
                let done =
                    request.command == "disconnect" || request.command == "terminate";
                let response = Message::Response(Response {
                    seq,
                    request_seq: request.seq,
                    success: done,
                    command: request.command.clone(),
                    message: if done {
                        None
                    } else {
                        Some("debugger frontend is not attached".to_string())
                    },
                    body: None,
                });
                stdout.write_all(&dap::encode(&response))?;
                stdout.flush()?;
                if done {
                    return Ok(());
                }
            }
        }
    }
}
