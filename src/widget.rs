//! The lead form / chat widget controller.
//!
//! Front ends call the operations below in response to user input and redraw
//! from the events published on the [`EventBus`]. Storage is the only state
//! that outlives the widget; the current [`View`] is recomputed on `load`.

use crate::{
    bus::{Event, EventBus},
    chat::{ChatMessage, Sender},
    client::BackendClient,
    clock::Clock,
    error::{Error, Result},
    history::MessageStore,
    kv::KeyValueStore,
    render::{to_markup, EngineLoader, Renderer},
    session::SessionManager,
    view::View,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Agent message recorded when a chat request fails.
pub const CHAT_ERROR_PLACEHOLDER: &str = "An error occurred. Please try again.";

pub const PRUNE_INTERVAL: Duration = Duration::from_secs(5 * 60);

const SUBMITTED_NOTICE: &str = "Form submitted successfully! Preparing the chat...";
const READY_NOTICE: &str = "Building the sample link takes about 1 to 5 minutes. \
Meanwhile you can talk with our search ranking consultant at any time.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted(Option<String>),
    /// Carries the text shown to the user.
    Rejected(String),
}

pub struct ChatWidget {
    sessions: SessionManager,
    history: MessageStore,
    renderer: Renderer,
    client: BackendClient,
    bus: Arc<EventBus>,
    view: Mutex<View>,
    viewport_width: Mutex<u32>,
    notice_delay: Duration,
}

impl ChatWidget {
    /// Builds a widget over `kv`, creating the session id if this storage has none.
    pub async fn new(
        kv: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        bus: Arc<EventBus>,
        api_base: &str,
        viewport_width: u32,
    ) -> Result<Self> {
        let sessions = SessionManager::new(kv.clone(), clock.clone());
        let session_id = sessions.get_or_create_session_id().await?;
        info!("Session ID (from local storage): {}", session_id);

        Ok(Self {
            sessions,
            history: MessageStore::new(kv, clock),
            renderer: Renderer::new(Arc::new(EngineLoader::pulldown())),
            client: BackendClient::new(api_base, session_id)?,
            bus,
            view: Mutex::new(View::Form),
            viewport_width: Mutex::new(viewport_width),
            notice_delay: Duration::from_secs(2),
        })
    }

    pub fn with_engine_loader(mut self, loader: Arc<EngineLoader>) -> Self {
        self.renderer = Renderer::new(loader);
        self
    }

    /// Pause between the "submitted" and "ready to chat" notices.
    pub fn with_notice_delay(mut self, delay: Duration) -> Self {
        self.notice_delay = delay;
        self
    }

    pub fn session_id(&self) -> &str {
        self.client.session_id()
    }

    pub fn history(&self) -> &MessageStore {
        &self.history
    }

    pub fn view(&self) -> View {
        *self.view.lock().unwrap()
    }

    pub fn set_viewport_width(&self, width: u32) {
        *self.viewport_width.lock().unwrap() = width;
    }

    fn width(&self) -> u32 {
        *self.viewport_width.lock().unwrap()
    }

    fn set_view(&self, view: View) {
        *self.view.lock().unwrap() = view;
        self.bus.publish(Event::ViewChanged(view));
    }

    /// Page-load flow: prune, restore the layout, redraw the conversation.
    pub async fn load(&self) -> Result<View> {
        self.prune_or_reset().await?;

        let locked = self.sessions.is_submission_locked().await?;
        let collapsed = self.sessions.collapsed().await?;
        let view = View::initial(locked, collapsed, self.width());
        debug!(locked, collapsed, ?view, "Restoring widget");
        self.set_view(view);

        self.rerender().await?;
        Ok(view)
    }

    /// Posts the lead form and, when accepted, arms the submission lock.
    pub async fn submit_form(&self, fields: &BTreeMap<String, String>) -> Result<SubmitOutcome> {
        let message = match self.client.submit_lead(fields).await {
            Ok(message) => message,
            Err(Error::Backend(message)) => {
                warn!("Lead submission rejected: {}", message);
                self.bus.publish(Event::Alert(message.clone()));
                return Ok(SubmitOutcome::Rejected(message));
            }
            Err(Error::Http(e)) => {
                warn!("Lead submission failed: {}", e);
                let message = format!("Error sending the form: {}", e);
                self.bus.publish(Event::Alert(message.clone()));
                return Ok(SubmitOutcome::Rejected(message));
            }
            Err(e) => return Err(e),
        };

        self.sessions.mark_submitted().await?;
        self.set_view(View::Submitted);
        self.bus.publish(Event::Notice(SUBMITTED_NOTICE.to_string()));

        if !self.notice_delay.is_zero() {
            tokio::time::sleep(self.notice_delay).await;
        }
        self.bus.publish(Event::Notice(READY_NOTICE.to_string()));

        Ok(SubmitOutcome::Accepted(message))
    }

    /// The "start chatting" button under the success notice.
    pub async fn open_chat(&self) -> Result<View> {
        self.sessions.set_collapsed(false).await?;
        let view = self.view().open_chat(self.width());
        self.set_view(view);
        self.rerender().await?;
        Ok(view)
    }

    /// Sends one chat line. Returns the agent reply that was recorded, if any.
    ///
    /// The user message is stored and published before the request goes out;
    /// the reply (or the error placeholder) only after it comes back.
    pub async fn send(&self, text: &str) -> Result<Option<ChatMessage>> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }

        let user_msg = self.history.append(Sender::User, text).await?;
        self.publish_message(&user_msg).await;
        self.save_snapshot().await?;

        self.bus.publish(Event::Typing);
        let reply = match self.client.ask(text).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!("Chat request failed: {}", e);
                CHAT_ERROR_PLACEHOLDER.to_string()
            }
        };

        let agent_msg = self.history.append(Sender::Agent, reply).await?;
        self.publish_message(&agent_msg).await;

        Ok(Some(agent_msg))
    }

    pub async fn collapse(&self) -> Result<View> {
        self.sessions.set_collapsed(true).await?;
        let view = self.view().collapse();
        self.set_view(view);
        Ok(view)
    }

    pub async fn expand(&self) -> Result<View> {
        self.sessions.set_collapsed(false).await?;
        let view = self.view().expand(self.width());
        self.set_view(view);
        self.bus.publish(Event::ScrollToEnd);
        Ok(view)
    }

    /// Prunes on a fixed interval until the handle is aborted.
    pub fn spawn_pruner(&self, interval: Duration) -> JoinHandle<()> {
        let history = self.history.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; load() has just pruned.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = history.prune_expired().await {
                    warn!("Periodic prune failed: {}", e);
                }
            }
        })
    }

    /// Drops expired messages. Unreadable history is discarded rather than shown.
    async fn prune_or_reset(&self) -> Result<()> {
        match self.history.prune_expired().await {
            Ok(_) => Ok(()),
            Err(Error::CorruptHistory(e)) => {
                warn!("Discarding unreadable chat history: {}", e);
                self.history.reset().await
            }
            Err(e) => Err(e),
        }
    }

    async fn rerender(&self) -> Result<()> {
        self.prune_or_reset().await?;
        let messages = self.history.list().await?;
        let records = self.renderer.render(&messages).await;
        self.bus.publish(Event::Rendered(records));
        self.bus.publish(Event::ScrollToEnd);
        Ok(())
    }

    async fn publish_message(&self, message: &ChatMessage) {
        let record = self.renderer.render_one(message).await;
        self.bus.publish(Event::MessageAppended(record));
        self.bus.publish(Event::ScrollToEnd);
    }

    async fn save_snapshot(&self) -> Result<()> {
        self.prune_or_reset().await?;
        let messages = self.history.list().await?;
        let records = self.renderer.render(&messages).await;
        self.history.save_snapshot(&to_markup(&records)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::history::{MESSAGES_KEY, SNAPSHOT_KEY};
    use crate::kv::MemoryKv;
    use crate::session::{COLLAPSED_KEY, SUBMITTED_AT_KEY};
    use tokio::sync::broadcast;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    struct Harness {
        widget: ChatWidget,
        kv: Arc<MemoryKv>,
        clock: Arc<ManualClock>,
        events: broadcast::Receiver<Event>,
    }

    async fn harness(api_base: &str, width: u32) -> Harness {
        let kv = Arc::new(MemoryKv::new());
        let clock = Arc::new(ManualClock::new(10_000_000));
        let bus = Arc::new(EventBus::new());
        let events = bus.subscribe();
        let widget = ChatWidget::new(kv.clone(), clock.clone(), bus, api_base, width)
            .await
            .unwrap()
            .with_notice_delay(Duration::ZERO);
        Harness {
            widget,
            kv,
            clock,
            events,
        }
    }

    fn drain(events: &mut broadcast::Receiver<Event>) -> Vec<Event> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    #[tokio::test]
    async fn fresh_load_shows_form() {
        let mut h = harness("http://127.0.0.1:9", 1280).await;

        assert_eq!(h.widget.load().await.unwrap(), View::Form);
        assert!(h.widget.session_id().starts_with("sess-10000000-"));

        let events = drain(&mut h.events);
        assert!(matches!(events[0], Event::ViewChanged(View::Form)));
        assert!(matches!(&events[1], Event::Rendered(records) if records.is_empty()));
    }

    #[tokio::test]
    async fn locked_session_restores_chat_and_collapse() {
        let h = harness("http://127.0.0.1:9", 400).await;
        h.kv.set(SUBMITTED_AT_KEY, "9999000").await.unwrap();

        assert_eq!(
            h.widget.load().await.unwrap(),
            View::Chat { full_screen: true }
        );

        h.widget.collapse().await.unwrap();
        assert_eq!(h.kv.get(COLLAPSED_KEY).await.unwrap().as_deref(), Some("true"));
        assert_eq!(h.widget.load().await.unwrap(), View::Collapsed);

        h.widget.set_viewport_width(1280);
        assert_eq!(
            h.widget.expand().await.unwrap(),
            View::Chat { full_screen: false }
        );
        assert_eq!(h.kv.get(COLLAPSED_KEY).await.unwrap().as_deref(), Some("false"));
    }

    #[tokio::test]
    async fn load_prunes_and_recovers_from_corrupt_history() {
        let h = harness("http://127.0.0.1:9", 1280).await;
        h.kv.set(MESSAGES_KEY, "not json").await.unwrap();
        h.widget.load().await.unwrap();
        assert!(h.widget.history().list().await.unwrap().is_empty());

        h.widget.history().append(Sender::User, "old").await.unwrap();
        h.clock.advance(2 * 60 * 60 * 1000);
        h.widget.history().append(Sender::User, "new").await.unwrap();
        h.widget.load().await.unwrap();

        let left = h.widget.history().list().await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].content, "new");
    }

    #[tokio::test]
    async fn accepted_submission_locks_form() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/lead/submit"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "ok",
                "message": "received"
            })))
            .mount(&server)
            .await;

        let mut h = harness(&server.uri(), 400).await;
        let fields = BTreeMap::from([("email".to_string(), "a@example.com".to_string())]);

        let outcome = h.widget.submit_form(&fields).await.unwrap();
        assert_eq!(outcome, SubmitOutcome::Accepted(Some("received".into())));
        assert_eq!(h.widget.view(), View::Submitted);
        assert_eq!(
            h.kv.get(SUBMITTED_AT_KEY).await.unwrap().as_deref(),
            Some("10000000")
        );

        assert_eq!(
            h.widget.open_chat().await.unwrap(),
            View::Chat { full_screen: true }
        );
        assert!(drain(&mut h.events)
            .iter()
            .any(|e| matches!(e, Event::Notice(n) if n == READY_NOTICE)));

        // A reload within half an hour goes straight to the chat.
        h.clock.advance(29 * 60 * 1000);
        assert_eq!(
            h.widget.load().await.unwrap(),
            View::Chat { full_screen: true }
        );
    }

    #[tokio::test]
    async fn rejected_submission_alerts_and_keeps_form() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/lead/submit"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "error"
            })))
            .mount(&server)
            .await;

        let mut h = harness(&server.uri(), 1280).await;
        let outcome = h.widget.submit_form(&BTreeMap::new()).await.unwrap();

        assert_eq!(
            outcome,
            SubmitOutcome::Rejected(crate::client::SUBMIT_FALLBACK_MESSAGE.to_string())
        );
        assert_eq!(h.widget.view(), View::Form);
        assert_eq!(h.kv.get(SUBMITTED_AT_KEY).await.unwrap(), None);
        assert!(drain(&mut h.events)
            .iter()
            .any(|e| matches!(e, Event::Alert(_))));
    }

    #[tokio::test]
    async fn send_records_user_then_agent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "answer": "**Sure**" })),
            )
            .mount(&server)
            .await;

        let mut h = harness(&server.uri(), 1280).await;
        let reply = h.widget.send("  can you help?  ").await.unwrap().unwrap();
        assert_eq!(reply.content, "**Sure**");

        let stored = h.widget.history().list().await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].sender, Sender::User);
        assert_eq!(stored[0].content, "can you help?");
        assert_eq!(stored[1].sender, Sender::Agent);

        let appended: Vec<_> = drain(&mut h.events)
            .into_iter()
            .filter_map(|e| match e {
                Event::MessageAppended(record) => Some(record),
                _ => None,
            })
            .collect();
        assert_eq!(appended.len(), 2);
        assert_eq!(appended[0].sender, Sender::User);
        assert!(appended[1].body_html().contains("<strong>Sure</strong>"));

        let snapshot = h.kv.get(SNAPSHOT_KEY).await.unwrap().unwrap();
        assert!(snapshot.contains("can you help?"));
    }

    /// Answers `/chat` with whatever history was stored when the request arrived.
    struct HistoryAtRequest {
        kv: Arc<MemoryKv>,
    }

    impl Respond for HistoryAtRequest {
        fn respond(&self, _request: &Request) -> ResponseTemplate {
            let stored = self.kv.peek(MESSAGES_KEY).unwrap_or_default();
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "answer": stored }))
        }
    }

    #[tokio::test]
    async fn user_message_is_stored_before_the_request() {
        let server = MockServer::start().await;
        let h = harness(&server.uri(), 1280).await;
        Mock::given(method("POST"))
            .and(path("/chat"))
            .respond_with(HistoryAtRequest { kv: h.kv.clone() })
            .expect(1)
            .mount(&server)
            .await;

        let reply = h.widget.send("is my site indexed?").await.unwrap().unwrap();

        let seen: Vec<ChatMessage> = serde_json::from_str(&reply.content).unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].sender, Sender::User);
        assert_eq!(seen[0].content, "is my site indexed?");
    }

    #[tokio::test]
    async fn open_chat_hides_expired_messages() {
        let mut h = harness("http://127.0.0.1:9", 1280).await;
        h.widget.set_view(View::Submitted);
        h.widget.history().append(Sender::User, "stale").await.unwrap();
        h.clock.advance(2 * 60 * 60 * 1000);
        drain(&mut h.events);

        h.widget.open_chat().await.unwrap();

        let rendered: Vec<_> = drain(&mut h.events)
            .into_iter()
            .filter_map(|e| match e {
                Event::Rendered(records) => Some(records),
                _ => None,
            })
            .collect();
        assert_eq!(rendered.len(), 1);
        assert!(rendered[0].is_empty());
        assert!(h.widget.history().list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn snapshot_leaves_out_expired_messages() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "answer": "ok" })))
            .mount(&server)
            .await;

        let h = harness(&server.uri(), 1280).await;
        h.widget.history().append(Sender::User, "from last week").await.unwrap();
        h.clock.advance(2 * 60 * 60 * 1000);
        h.widget.send("fresh question").await.unwrap();

        let snapshot = h.kv.get(SNAPSHOT_KEY).await.unwrap().unwrap();
        assert!(snapshot.contains("fresh question"));
        assert!(!snapshot.contains("from last week"));
    }

    #[tokio::test]
    async fn failed_chat_persists_placeholder() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let h = harness(&server.uri(), 1280).await;
        let reply = h.widget.send("hello").await.unwrap().unwrap();
        assert_eq!(reply.content, CHAT_ERROR_PLACEHOLDER);

        let stored = h.widget.history().list().await.unwrap();
        assert_eq!(stored.last().unwrap().content, CHAT_ERROR_PLACEHOLDER);
    }

    #[tokio::test]
    async fn blank_input_is_ignored() {
        let h = harness("http://127.0.0.1:9", 1280).await;
        assert!(h.widget.send("   ").await.unwrap().is_none());
        assert!(h.widget.history().list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn pruner_drops_expired_messages() {
        let h = harness("http://127.0.0.1:9", 1280).await;
        h.widget.history().append(Sender::User, "stale").await.unwrap();
        h.clock.advance(2 * 60 * 60 * 1000);

        let handle = h.widget.spawn_pruner(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();

        assert!(h.widget.history().list().await.unwrap().is_empty());
    }
}
