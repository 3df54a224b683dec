use std::io::{self, Write};
use std::process::ExitCode;
use std::time::Duration;

use orion_client::style::Style;
use orion_client::{ChatSession, RelayClient, TerminalRenderer, TurnOutcome};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error};

const DEFAULT_URL: &str = "http://127.0.0.1:8787";

fn print_help() {
    println!("orion — chat with O.R.I.Ö.N from the terminal");
    println!();
    println!("Usage:");
    println!("  orion [--url <url>] [--token <token>] [--agent <id>]");
    println!();
    println!("Options:");
    println!("  --url <url>            Relay base URL (default: $ORION_URL or {DEFAULT_URL})");
    println!("  --token <token>        Bearer token (default: $ORION_TOKEN)");
    println!("  --agent <id>           Agent profile to talk to");
    println!("  --idle-timeout <secs>  Give up on a reply that stalls this long");
    println!("  --version              Print version");
    println!("  --help                 Print this help");
    println!();
    println!("Ctrl+C stops a reply in progress; at the prompt it exits. /quit exits too.");
}

fn flag_value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return ExitCode::SUCCESS;
    }

    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("orion {}", env!("CARGO_PKG_VERSION"));
        return ExitCode::SUCCESS;
    }

    init_tracing();

    let url = flag_value(&args, "--url")
        .or_else(|| std::env::var("ORION_URL").ok())
        .unwrap_or_else(|| DEFAULT_URL.to_string());
    let token = flag_value(&args, "--token").or_else(|| std::env::var("ORION_TOKEN").ok());

    let idle_timeout = match flag_value(&args, "--idle-timeout") {
        Some(raw) => match raw.parse::<u64>() {
            Ok(secs) if secs > 0 => Some(Duration::from_secs(secs)),
            _ => {
                error!(value = %raw, "--idle-timeout expects a positive number of seconds");
                return ExitCode::FAILURE;
            }
        },
        None => None,
    };

    let mut client = match RelayClient::new(&url) {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, "failed to create relay client");
            return ExitCode::FAILURE;
        }
    };
    if let Some(token) = token {
        client = client.with_token(token);
    }

    let style = Style::new();
    let mut session = ChatSession::new(client, TerminalRenderer::new(io::stdout(), style));
    if let Some(agent) = flag_value(&args, "--agent") {
        session = session.with_agent(agent);
    }
    if let Some(limit) = idle_timeout {
        session = session.with_idle_timeout(limit);
    }
    let session = session.with_welcome();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to create async runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run_repl(&session, style)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "terminal error");
            ExitCode::FAILURE
        }
    }
}

fn prompt(style: Style) -> io::Result<()> {
    let mut stdout = io::stdout();
    write!(stdout, "{}you › {}", style.dim(), style.reset())?;
    stdout.flush()
}

async fn run_repl(session: &ChatSession, style: Style) -> io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        prompt(style)?;
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            println!();
            return Ok(());
        };

        let line = line.trim();
        match line {
            "" => continue,
            "/quit" | "/exit" => return Ok(()),
            _ => {}
        }

        let turn = session.send(line.to_string());
        tokio::pin!(turn);
        let outcome = tokio::select! {
            outcome = &mut turn => outcome,
            _ = tokio::signal::ctrl_c() => {
                session.cancel();
                turn.await
            }
        };

        debug!(?outcome, "turn finished");
        if outcome == TurnOutcome::Cancelled {
            println!("{}(stopped){}", style.dim(), style.reset());
        }
    }
}
