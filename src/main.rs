use clap::Parser;
use cloak::{
    cli::{Args, Commands},
    error::{Error, Result},
    parser::parse,
    repl::{ReplPrompt, ReplValidator, SyntaxHighlighter},
    runtime::Interpreter,
    tokenizer::tokenize,
};
use dirs::home_dir;
use log::{debug, info};
use nu_ansi_term::{Color, Style};
use reedline::{DefaultHinter, FileBackedHistory, Reedline, Signal};
use std::{fs, path::PathBuf, process};

fn run_file(file: PathBuf) -> Result<Option<i32>> {
    let source = fs::read_to_string(file)?;

    let tokens = tokenize(&source)?;
    let program = parse(&tokens)?;
    debug!("executing {} top-level statements", program.statements.len());

    Interpreter::new().execute(&program)
}

fn check_file(file: PathBuf) -> Result<()> {
    let source = fs::read_to_string(file)?;

    let tokens = tokenize(&source)?;
    for token in &tokens {
        println!("{:>4}:{:<3} {:?}", token.line, token.column, token.kind);
    }

    let program = parse(&tokens)?;
    println!("parsed {} top-level statements", program.statements.len());

    Ok(())
}

fn run_repl() -> Result<()> {
    let mut line_editor = Reedline::create()
        .with_hinter(Box::new(
            DefaultHinter::default().with_style(Style::new().italic().fg(Color::LightGray)),
        ))
        .with_highlighter(Box::new(SyntaxHighlighter))
        .with_validator(Box::new(ReplValidator));

    // Add file-backed history if possible
    if let Some(history) = home_dir()
        .map(|home| home.join(".cloak_history"))
        .and_then(|path| FileBackedHistory::with_file(100, path).ok())
        .map(Box::new)
    {
        line_editor = line_editor.with_history(history);
    } else {
        eprintln!("NOTE: Failed to load history. Persistence is now disabled.")
    }

    let prompt = ReplPrompt;
    let mut interpreter = Interpreter::new();

    loop {
        match line_editor.read_line(&prompt)? {
            Signal::Success(buffer) => {
                let result = tokenize(&buffer)
                    .and_then(|tokens| parse(&tokens))
                    .and_then(|program| interpreter.execute(&program));
                match result {
                    Ok(Some(code)) => process::exit(code),
                    Ok(None) => {}
                    Err(err) => eprintln!("{}", err),
                }
            }
            Signal::CtrlD | Signal::CtrlC => {
                break Ok(());
            }
        }
    }
}

fn exit_code(err: &Error) -> i32 {
    match err {
        Error::Syntax { .. } => 65,
        Error::Runtime { .. } => 70,
        Error::Io(_) => 74,
    }
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let result = match args.command {
        Commands::Run { file } => {
            info!("FILE MODE");
            debug!("file: {:?}", file);

            match run_file(file) {
                Ok(Some(code)) => process::exit(code),
                Ok(None) => Ok(()),
                Err(err) => Err(err),
            }
        }
        Commands::Check { file } => {
            info!("CHECK MODE");
            debug!("file: {:?}", file);

            check_file(file)
        }
        Commands::Repl => {
            info!("REPL MODE");

            run_repl()
        }
    };

    if let Err(err) = result {
        eprintln!("{}", err);
        process::exit(exit_code(&err));
    }
}
