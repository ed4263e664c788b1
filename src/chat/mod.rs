//! Line-oriented terminal front end for a practice session.

mod commands;
mod transcript;

pub use commands::{ParsedCommand, SlashCommand, get_help_text, parse_slash_command};
pub use transcript::TranscriptPrinter;

use crate::error::SessionError;
use crate::session::{SendOptions, SessionController};
use anyhow::Result;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::{JoinError, JoinHandle};

type Exchange = JoinHandle<std::result::Result<(), SessionError>>;

/// Drive `controller` from stdin until `/bye` or end of input.
///
/// With `prime` set the assistant opens the conversation.
pub async fn run(controller: Arc<SessionController>, prime: bool) -> Result<()> {
    let printer = spawn_printer(&controller);

    println!("🎯 {} ({})", controller.mode().display_name(), controller.mode().description());
    println!("Type your reply and press Enter. /help lists commands.\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut in_flight: Option<Exchange> = None;

    if prime {
        in_flight = Some(spawn_send(&controller, String::new()));
    }

    loop {
        tokio::select! {
            result = join_in_flight(&mut in_flight) => {
                in_flight = None;
                report(result);
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let Some(parsed) = parse_slash_command(line) else {
                    if in_flight.is_some() {
                        println!("⏳ Still replying. Wait a moment or /cancel.");
                    } else {
                        in_flight = Some(spawn_send(&controller, line.to_string()));
                    }
                    continue;
                };

                if in_flight.is_some() && !parsed.command.available_while_replying() {
                    println!("⏳ /{} is available once the reply finishes (or after /cancel).", parsed.command.command());
                    continue;
                }

                match parsed.command {
                    SlashCommand::Bye => break,
                    SlashCommand::Help => println!("{}\n", get_help_text()),
                    SlashCommand::Cancel => controller.cancel_response(),
                    SlashCommand::Clear => controller.clear_conversation().await,
                    SlashCommand::Regen => {
                        let controller = controller.clone();
                        in_flight = Some(tokio::spawn(async move { controller.regenerate_response().await }));
                    }
                    SlashCommand::Load => match parsed.argument() {
                        Some(id) => {
                            if let Err(e) = controller.load_conversation(id).await {
                                tracing::debug!(error = %e, "load failed");
                            }
                        }
                        None => println!("Usage: /load <conversation id>  (see `rehearse history`)"),
                    },
                }
            }
        }
    }

    controller.cancel_response();
    if let Some(task) = in_flight.take() {
        report(task.await);
    }
    controller.shutdown().await;
    printer.abort();

    println!("\n👋 Good practice. See you next time!");
    Ok(())
}

fn spawn_send(controller: &Arc<SessionController>, text: String) -> Exchange {
    let controller = controller.clone();
    tokio::spawn(async move { controller.send_message(&text, SendOptions::default()).await })
}

fn spawn_printer(controller: &SessionController) -> JoinHandle<()> {
    let mut rx = controller.subscribe();
    tokio::spawn(async move {
        let mut printer = TranscriptPrinter::new();
        let initial = printer.render(&rx.borrow_and_update());
        emit(&initial);
        while rx.changed().await.is_ok() {
            let view = rx.borrow_and_update().clone();
            emit(&printer.render(&view));
        }
    })
}

fn emit(out: &str) {
    if out.is_empty() {
        return;
    }
    let mut stdout = std::io::stdout().lock();
    let _ = stdout.write_all(out.as_bytes());
    let _ = stdout.flush();
}

async fn join_in_flight(task: &mut Option<Exchange>) -> std::result::Result<std::result::Result<(), SessionError>, JoinError> {
    match task {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

/// Failures are already on the session view; this only notes cancellation
fn report(result: std::result::Result<std::result::Result<(), SessionError>, JoinError>) {
    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) if e.is_cancelled() => println!("\n⏹  Reply stopped."),
        Ok(Err(e)) if e.is_not_configured() => println!("💡 Set api.base_url and api.api_key (or REHEARSE_API_URL / REHEARSE_API_KEY), then try again."),
        Ok(Err(SessionError::InvalidState(message))) => println!("⚠️  {}", message),
        Ok(Err(e)) => tracing::debug!(error = %e, "exchange ended with an error"),
        Err(e) => tracing::error!(error = %e, "exchange task failed"),
    }
}
