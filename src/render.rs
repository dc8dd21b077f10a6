//! Turns stored chat messages into display markup.
//!
//! Agent replies are markdown and go through a [`MarkdownEngine`]. The engine is
//! obtained through an [`EngineLoader`], which runs its load step at most once
//! and remembers a failure so rendering degrades to plain text instead of
//! retrying on every call.

use crate::chat::{ChatMessage, Sender};
use pulldown_cmark::{html, CowStr, Event, Options, Parser, Tag};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{error, info};

/// Converts markdown source into HTML that is safe to embed in the page.
pub trait MarkdownEngine: Send + Sync {
    fn convert(&self, markdown: &str) -> String;
}

/// CommonMark with tables, strikethrough and single newlines kept as line breaks.
/// Raw HTML in the source is escaped, and `javascript:` links are neutralised.
#[derive(Debug, Clone)]
pub struct PulldownEngine {
    options: Options,
}

impl Default for PulldownEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PulldownEngine {
    pub fn new() -> Self {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_STRIKETHROUGH);
        Self { options }
    }
}

impl MarkdownEngine for PulldownEngine {
    fn convert(&self, markdown: &str) -> String {
        let parser = Parser::new_ext(markdown, self.options).map(|event| match event {
            Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
            Event::SoftBreak => Event::HardBreak,
            Event::Start(Tag::Link {
                link_type,
                dest_url,
                title,
                id,
            }) if is_script_url(&dest_url) => Event::Start(Tag::Link {
                link_type,
                dest_url: CowStr::Borrowed("#"),
                title,
                id,
            }),
            other => other,
        });

        let mut out = String::with_capacity(markdown.len() * 3 / 2);
        html::push_html(&mut out, parser);
        out
    }
}

fn is_script_url(url: &str) -> bool {
    let scheme = url.trim_start().to_ascii_lowercase();
    scheme.starts_with("javascript:") || scheme.starts_with("vbscript:") || scheme.starts_with("data:")
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    // Writing into a `String` is infallible.
    pulldown_cmark_escape::escape_html(&mut out, text).expect("writing to a String is infallible");
    out
}

pub type LoadFuture = Pin<Box<dyn Future<Output = anyhow::Result<Arc<dyn MarkdownEngine>>> + Send>>;

/// Asynchronously initialised, cached markdown capability.
pub struct EngineLoader {
    load: Box<dyn Fn() -> LoadFuture + Send + Sync>,
    engine: OnceCell<Option<Arc<dyn MarkdownEngine>>>,
}

impl EngineLoader {
    pub fn new<F, Fut>(load: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Arc<dyn MarkdownEngine>>> + Send + 'static,
    {
        Self {
            load: Box::new(move || -> LoadFuture { Box::pin(load()) }),
            engine: OnceCell::new(),
        }
    }

    /// Loader for the bundled pulldown-cmark engine.
    pub fn pulldown() -> Self {
        Self::new(|| async {
            Ok::<_, anyhow::Error>(Arc::new(PulldownEngine::new()) as Arc<dyn MarkdownEngine>)
        })
    }

    /// The engine, or `None` if loading failed. Only the first call loads.
    pub async fn get(&self) -> Option<Arc<dyn MarkdownEngine>> {
        self.engine
            .get_or_init(|| async {
                match (self.load)().await {
                    Ok(engine) => {
                        info!("Markdown engine ready");
                        Some(engine)
                    }
                    Err(e) => {
                        error!("Markdown engine failed to load: {:#}", e);
                        None
                    }
                }
            })
            .await
            .clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.engine.initialized()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    /// Already-converted HTML.
    Html(String),
    /// Text to be escaped on output.
    Text(String),
}

/// One rendered message bubble.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayRecord {
    pub time: i64,
    pub sender: Sender,
    pub body: Body,
}

impl DisplayRecord {
    pub fn css_class(&self) -> &'static str {
        match self.sender {
            Sender::User => "user-message",
            Sender::Agent => "agent-message",
        }
    }

    pub fn body_html(&self) -> String {
        match &self.body {
            Body::Html(html) => html.clone(),
            Body::Text(text) => escape_html(text),
        }
    }

    pub fn to_html(&self) -> String {
        format!(
            "<p class=\"{}\"><strong>{}:</strong> {}</p>",
            self.css_class(),
            self.sender.label(),
            self.body_html()
        )
    }
}

#[derive(Clone)]
pub struct Renderer {
    loader: Arc<EngineLoader>,
}

impl Renderer {
    pub fn new(loader: Arc<EngineLoader>) -> Self {
        Self { loader }
    }

    /// One record per message, in the order given.
    pub async fn render(&self, messages: &[ChatMessage]) -> Vec<DisplayRecord> {
        let engine = self.loader.get().await;
        messages
            .iter()
            .map(|msg| render_with(engine.as_deref(), msg))
            .collect()
    }

    pub async fn render_one(&self, message: &ChatMessage) -> DisplayRecord {
        let engine = self.loader.get().await;
        render_with(engine.as_deref(), message)
    }
}

fn render_with(engine: Option<&dyn MarkdownEngine>, msg: &ChatMessage) -> DisplayRecord {
    let body = match (msg.sender, engine) {
        (Sender::Agent, Some(engine)) => Body::Html(engine.convert(&msg.content)),
        _ => Body::Text(msg.content.clone()),
    };

    DisplayRecord {
        time: msg.time,
        sender: msg.sender,
        body,
    }
}

/// Concatenated markup for a whole conversation.
pub fn to_markup(records: &[DisplayRecord]) -> String {
    records.iter().map(DisplayRecord::to_html).collect()
}
