//! Fieldhand CLI - line-oriented front end for the farm assistant.
//!
//! # Event Loop
//!
//! A single task selects over four sources:
//!
//! 1. A line from stdin (chat message or slash command)
//! 2. [`Session::next_update`] (stream frames, countdown ticks, settled requests)
//! 3. Task batches broadcast by the session
//! 4. Ctrl-C
//!
//! All state lives in the engine; this binary only prints what changed.

mod commands;
mod render;

use anyhow::Result;
use std::{
    fs::{self, OpenOptions},
    io::{Write, stdout},
    path::PathBuf,
    sync::{Arc, Mutex},
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use commands::{Command, Input, command_help};
use fieldhand_engine::{
    ChatClient, FieldhandConfig, HttpFarmApi, PendingTask, Session, StreamEvent, Update,
};

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (log_file, init_warnings) = open_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // Stdout carries the conversation; without a log file, drop logs.
    tracing_subscriber::registry().with(env_filter).init();
}

fn open_log_file() -> (Option<(PathBuf, std::fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&candidate)
        {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // Primary: ~/.fieldhand/logs/fieldhand.log
    if let Some(config_path) = FieldhandConfig::path()
        && let Some(config_dir) = config_path.parent()
    {
        candidates.push(config_dir.join("logs").join("fieldhand.log"));
    }

    candidates.push(PathBuf::from(".fieldhand").join("logs").join("fieldhand.log"));

    candidates
}

fn load_config() -> FieldhandConfig {
    match FieldhandConfig::load() {
        Ok(Some(config)) => config,
        Ok(None) => FieldhandConfig::default(),
        Err(e) => {
            eprintln!("Ignoring config: {e}");
            tracing::warn!(error = %e, "Config could not be loaded");
            FieldhandConfig::default()
        }
    }
}

enum Woke {
    Line(std::io::Result<Option<String>>),
    Update(Update),
    Tasks(Result<Vec<PendingTask>, broadcast::error::RecvError>),
    Interrupt,
}

enum Flow {
    Continue,
    Quit,
}

struct Repl {
    session: Session,
    /// Highest board key already printed.
    shown_up_to: u64,
    /// A reply is being printed and the cursor sits mid-line.
    mid_line: bool,
}

impl Repl {
    fn say(&mut self, text: impl std::fmt::Display) {
        if self.mid_line {
            println!();
            self.mid_line = false;
        }
        println!("{text}");
    }

    fn flush_notices(&mut self) {
        for notice in self.session.take_notices() {
            self.say(format_args!("* {notice}"));
        }
    }

    fn show_new_entries(&mut self) {
        let fresh: Vec<String> = self
            .session
            .state()
            .board()
            .entries()
            .filter(|entry| entry.key.value() > self.shown_up_to)
            .map(render::entry_line)
            .collect();
        if let Some(max) = self.session.state().board().entries().map(|e| e.key.value()).max() {
            self.shown_up_to = self.shown_up_to.max(max);
        }
        for line in fresh {
            self.say(format_args!("+ {line}"));
        }
    }

    fn list(&mut self) {
        let lines: Vec<String> = self
            .session
            .state()
            .board()
            .entries()
            .map(render::entry_line)
            .collect();
        if lines.is_empty() {
            self.say("No actions.");
        }
        for line in lines {
            self.say(line);
        }
    }

    fn sources(&mut self) {
        let lines: Vec<String> = self
            .session
            .state()
            .citations()
            .all()
            .iter()
            .map(render::citation_line)
            .collect();
        if lines.is_empty() {
            self.say("No sources for the last reply.");
        }
        for line in lines {
            self.say(line);
        }
    }

    fn on_line(&mut self, line: &str) -> Flow {
        match Input::parse(line) {
            Input::Empty => {}
            Input::Chat(text) => {
                if self.session.send(text) {
                    print!("< ");
                    let _ = stdout().flush();
                    self.mid_line = true;
                }
            }
            Input::Command(command) => match command {
                Command::List => self.list(),
                Command::Confirm(key) => self.session.confirm(key),
                Command::Cancel(key) => self.session.cancel(key),
                Command::Undo(key) => self.session.undo(key),
                Command::Auto { key, enabled } => self.session.set_auto_confirm(key, enabled),
                Command::Dismiss(key) => self.session.dismiss(key),
                Command::Retry => self.session.retry_last_failed(),
                Command::Sources => self.sources(),
                Command::Help => self.say(command_help()),
                Command::Usage(usage) => self.say(format_args!("Usage: /{usage}")),
                Command::Unknown(name) => {
                    self.say(format_args!("Unknown command /{name}. Try /help."));
                }
                Command::Quit => return Flow::Quit,
            },
        }
        self.flush_notices();
        Flow::Continue
    }

    fn on_update(&mut self, update: Update) {
        match update {
            Update::Stream(StreamEvent::MessageDelta { text }) => {
                print!("{text}");
                let _ = stdout().flush();
                self.mid_line = true;
            }
            Update::Stream(StreamEvent::ToolCallDelta { .. }) => {
                if let Some(line) = self.session.state().active_tool().and_then(render::tool_line)
                {
                    self.say(line);
                }
            }
            Update::Stream(StreamEvent::ToolCallResult { .. }) => self.show_new_entries(),
            Update::Stream(StreamEvent::Citation(_)) | Update::Tick | Update::Settled(_) => {}
            Update::TurnFinished => {
                let sources = self.session.state().citations().all().len();
                if sources > 0 {
                    self.say(format_args!("({sources} sources, /sources to list)"));
                } else if self.mid_line {
                    println!();
                    self.mid_line = false;
                }
            }
            Update::TurnFailed => {
                let error = self
                    .session
                    .state()
                    .conversation()
                    .messages()
                    .last()
                    .filter(|message| message.is_error())
                    .map(|message| message.content().to_string());
                if let Some(error) = error {
                    self.say(error);
                }
            }
        }
        self.flush_notices();
    }

    fn on_tasks(&mut self, tasks: &[PendingTask]) {
        self.say(format_args!(
            "Scheduled {} task{}",
            tasks.len(),
            if tasks.len() == 1 { "" } else { "s" }
        ));
        self.show_new_entries();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let resolved = load_config().resolve();
    tracing::info!(base_url = resolved.client.base_url(), "Starting session");

    let client = ChatClient::new(resolved.client.clone());
    let api = Arc::new(HttpFarmApi::new(&resolved.client));
    let mut session = Session::new(client, api, &resolved.session);

    match session.load_fields().await {
        Ok(count) => tracing::info!(count, "Loaded fields"),
        Err(e) => tracing::warn!(error = %e, "Could not load fields; field names will be missing"),
    }

    let mut tasks_rx = session.subscribe_tasks();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut repl = Repl {
        session,
        shown_up_to: 0,
        mid_line: false,
    };

    repl.say(format_args!(
        "Fieldhand - connected to {}. /help for commands.",
        resolved.client.base_url()
    ));

    loop {
        let woke = tokio::select! {
            line = lines.next_line() => Woke::Line(line),
            update = repl.session.next_update() => Woke::Update(update),
            tasks = tasks_rx.recv() => Woke::Tasks(tasks),
            _ = tokio::signal::ctrl_c() => Woke::Interrupt,
        };

        match woke {
            Woke::Line(Ok(Some(line))) => {
                if let Flow::Quit = repl.on_line(&line) {
                    break;
                }
            }
            Woke::Line(Ok(None)) | Woke::Interrupt => break,
            Woke::Line(Err(e)) => {
                tracing::error!(error = %e, "stdin read failed");
                break;
            }
            Woke::Update(update) => repl.on_update(update),
            Woke::Tasks(Ok(tasks)) => repl.on_tasks(&tasks),
            Woke::Tasks(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                tracing::warn!(skipped, "Task notifications lagged");
            }
            Woke::Tasks(Err(broadcast::error::RecvError::Closed)) => break,
        }
    }

    let in_flight = repl.session.requests_in_flight();
    if in_flight > 0 {
        repl.say(format_args!(
            "Exiting with {in_flight} request(s) still in flight."
        ));
    }
    tracing::info!("Session ended");
    Ok(())
}
