//! A simple program demonstrates how to use `converse` as a library.
//!
//! The model is replayed from the JSON script at `CONVERSE_SCRIPT`, so the
//! whole conversation loop can be tried without any backend.

#[macro_use]
extern crate tracing;

use std::env;
use std::io::Write as _;
use std::time::Duration;

use converse::core::{AgentSession, Error, ResolvedCompletion};
use converse::{Script, SessionBuilder};
use converse_model::Role;
use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use tokio::io::{self, AsyncBufReadExt};
use tokio::select;
use tokio::time::sleep;

const BAR_CHAR: &str = "▎";

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let Ok(script_path) = env::var("CONVERSE_SCRIPT") else {
        eprintln!("CONVERSE_SCRIPT environment variable is not set");
        return;
    };
    let script = match Script::load(&script_path).await {
        Ok(script) => script,
        Err(err) => {
            eprintln!("{err}");
            return;
        }
    };
    let (model_provider, config) = script.into_parts();

    let mut session_builder =
        SessionBuilder::with_model_provider(model_provider).with_config(config);
    if let Ok(system_prompt) = env::var("CONVERSE_SYSTEM_PROMPT") {
        session_builder = session_builder.with_system_prompt(system_prompt);
    }
    let session = session_builder.build();

    let progress_style = ProgressStyle::with_template("{spinner} {wide_msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");

    loop {
        print!("> ");
        std::io::stdout().flush().ok();

        let Some(line) = read_line().await else {
            break;
        };
        match line.trim() {
            "" => continue,
            "/quit" => break,
            "/reset" => {
                session.reset();
                println!("{}", "Conversation cleared.".dimmed());
            }
            "/transcript" => print_transcript(&session),
            input => match respond(&session, input, &progress_style).await {
                Ok(completion) => print_summary(&completion),
                Err(err) => {
                    println!("{}{}", BAR_CHAR.bright_red(), err.bright_red());
                }
            },
        }
    }
}

async fn respond(
    session: &AgentSession,
    input: &str,
    progress_style: &ProgressStyle,
) -> Result<ResolvedCompletion, Error> {
    let mut handle = session.stream(input).await?;

    let progress_bar = ProgressBar::new_spinner();
    progress_bar.set_style(progress_style.clone());
    progress_bar.set_message("🤔 Thinking...");
    let mut printed = false;

    loop {
        let sleep = sleep(Duration::from_millis(100));
        let token = select! {
            token = handle.next() => token,
            _ = sleep => {
                progress_bar.inc(1);
                continue;
            }
        };
        let Some(token) = token else {
            break;
        };
        let token = token?;

        // Finish the progress bar before printing anything else.
        if !printed {
            progress_bar.finish_and_clear();
            print!("{}🤖 ", BAR_CHAR.bright_cyan());
            printed = true;
        }
        print!("{}", token.bright_white());
        std::io::stdout().flush().ok();
    }

    progress_bar.finish_and_clear();
    if printed {
        println!();
    }
    handle.collect_response().await
}

fn print_summary(completion: &ResolvedCompletion) {
    let calls = completion
        .entries
        .iter()
        .filter(|entry| entry.message().role() == Role::Tool)
        .count();
    let Some(metrics) = completion
        .entries
        .last()
        .and_then(|entry| entry.metrics())
    else {
        return;
    };
    println!(
        "{}",
        format!(
            "{} tokens, {} ms, {calls} function calls",
            metrics.tokens,
            metrics.latency.as_millis(),
        )
        .dimmed()
    );
}

fn print_transcript(session: &AgentSession) {
    match serde_json::to_string_pretty(&session.transcript()) {
        Ok(json) => println!("{json}"),
        Err(err) => error!("cannot serialize the transcript: {err}"),
    }
}

async fn read_line() -> Option<String> {
    let mut stdin = io::BufReader::new(io::stdin());
    let mut line = String::new();

    match stdin.read_line(&mut line).await {
        Ok(0) => None,
        Ok(_) => Some(line),
        Err(err) => {
            error!("error reading input: {}", err);
            None
        }
    }
}
