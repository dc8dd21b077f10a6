use crate::{
    bus::{Event, EventBus},
    render::DisplayRecord,
    view::{ScrollAnimation, View},
    widget::{ChatWidget, SubmitOutcome},
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{error, info, warn};

/// Frame interval used when revealing a long conversation.
const SCROLL_STEP: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Display the command list.
    Help,
    /// Submit the lead form: `/submit email=a@b.c site=example.com keyword=seo`
    Submit(BTreeMap<String, String>),
    /// Open the chat after a successful submission.
    Open,
    Collapse,
    Expand,
    /// Redraw the stored conversation.
    History,
    Quit,
    /// Anything not starting with `/` is a chat line.
    Say(String),
    Unknown(String),
}

pub const HELP: &str = "These commands are supported:
/help                         Display this text.
/submit key=value ...         Submit the lead form (email, site, telegram, keyword).
/open                         Open the chat after submitting.
/collapse, /expand            Hide or show the chat box.
/history                      Redraw the conversation.
/quit                         Leave.
Anything else is sent to the chat.";

pub fn parse_command(line: &str) -> Command {
    let line = line.trim();
    let Some(rest) = line.strip_prefix('/') else {
        return Command::Say(line.to_string());
    };

    let (name, args) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
    match name.to_ascii_lowercase().as_str() {
        "help" => Command::Help,
        "submit" => Command::Submit(parse_fields(args)),
        "open" => Command::Open,
        "collapse" => Command::Collapse,
        "expand" => Command::Expand,
        "history" => Command::History,
        "quit" | "exit" => Command::Quit,
        other => Command::Unknown(other.to_string()),
    }
}

fn parse_fields(args: &str) -> BTreeMap<String, String> {
    args.split_whitespace()
        .filter_map(|pair| pair.split_once('='))
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

/// Reduces rendered bubble markup to something readable in a terminal.
pub fn plain_text(html: &str) -> String {
    let html = html
        .replace("<br />", "\n")
        .replace("</p>", "\n")
        .replace("</li>", "\n")
        .replace("</tr>", "\n")
        .replace("</td>", "\t")
        .replace("</th>", "\t");

    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }

    out.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
        .trim_end()
        .to_string()
}

fn record_line(record: &DisplayRecord) -> String {
    format!("{}: {}", record.sender.label(), plain_text(&record.body_html()))
}

/// How many of `total` lines are visible after each frame of the scroll to the end.
fn reveal_counts(total: usize, step: Duration) -> Vec<usize> {
    if total == 0 {
        return Vec::new();
    }

    let mut counts: Vec<usize> = ScrollAnimation::new(0.0, total as f64)
        .frames(step)
        .into_iter()
        .map(|position| (position.ceil() as usize).min(total))
        .collect();
    counts.dedup();
    counts
}

/// Prints `lines` along the scroll easing, pausing between frames.
async fn scroll_to_end(lines: Vec<String>) {
    let mut shown = 0;
    for count in reveal_counts(lines.len(), SCROLL_STEP) {
        if shown > 0 {
            tokio::time::sleep(SCROLL_STEP).await;
        }
        for line in &lines[shown..count] {
            println!("{}", line);
        }
        shown = count;
    }
}

fn flush(pending: &mut Vec<String>) {
    for line in pending.drain(..) {
        println!("{}", line);
    }
}

fn describe(view: View) -> &'static str {
    match view {
        View::Form => "lead form (use /submit)",
        View::Submitted => "form submitted (use /open to start chatting)",
        View::Chat { full_screen: true } => "chat (full screen)",
        View::Chat { full_screen: false } => "chat",
        View::Collapsed => "chat collapsed (use /expand)",
    }
}

/// Prints bus events until the bus closes. A lagging receiver skips ahead.
async fn print_events(mut bus_rx: broadcast::Receiver<Event>) {
    // Conversation lines wait here until the widget asks to scroll to them.
    let mut pending: Vec<String> = Vec::new();
    loop {
        let event = match bus_rx.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!("Terminal fell behind, {} event(s) skipped", skipped);
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        match event {
            Event::Rendered(records) => pending.extend(records.iter().map(record_line)),
            Event::MessageAppended(record) => pending.push(record_line(&record)),
            Event::ScrollToEnd => scroll_to_end(std::mem::take(&mut pending)).await,
            Event::Typing => {
                flush(&mut pending);
                println!("Agent is typing...");
            }
            Event::ViewChanged(view) => {
                flush(&mut pending);
                println!("-- {} --", describe(view));
            }
            Event::Notice(text) => {
                flush(&mut pending);
                println!("{}", text);
            }
            Event::Alert(text) => {
                flush(&mut pending);
                println!("!! {}", text);
            }
        }
    }
}

pub struct TerminalInterface {
    bus: Arc<EventBus>,
    widget: Arc<ChatWidget>,
}

impl TerminalInterface {
    pub fn new(bus: Arc<EventBus>, widget: Arc<ChatWidget>) -> Self {
        Self { bus, widget }
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        // Spawn the printer before load() so the restored conversation shows up.
        let printer = tokio::spawn(print_events(self.bus.subscribe()));

        self.widget.load().await?;
        println!("{}", HELP);

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            match parse_command(&line) {
                Command::Quit => break,
                command => {
                    if let Err(e) = self.dispatch(command).await {
                        error!("Command failed: {}", e);
                    }
                }
            }
        }

        info!("Terminal session ended");
        printer.abort();
        Ok(())
    }

    async fn dispatch(&self, command: Command) -> crate::error::Result<()> {
        match command {
            Command::Help => println!("{}", HELP),
            Command::Submit(fields) => {
                if !self.widget.view().form_visible() {
                    println!("The form was already submitted.");
                    return Ok(());
                }
                if let SubmitOutcome::Accepted(Some(message)) =
                    self.widget.submit_form(&fields).await?
                {
                    println!("{}", message);
                }
            }
            Command::Open => {
                self.widget.open_chat().await?;
            }
            Command::Collapse => {
                self.widget.collapse().await?;
            }
            Command::Expand => {
                self.widget.expand().await?;
            }
            Command::History => {
                self.widget.load().await?;
            }
            Command::Say(text) => {
                if !self.widget.view().chat_visible() {
                    println!("The chat is not open.");
                    return Ok(());
                }
                self.widget.send(&text).await?;
            }
            Command::Unknown(name) => println!("Unknown command /{}. Try /help.", name),
            Command::Quit => {}
        }
        Ok(())
    }
}
