//! Текстовый чат: подбор собеседника подтверждает relay, согласования нет.
//!
//! ```text
//! IDLE → SEARCHING → CONNECTED → ENDED → (findNewChat) → SEARCHING
//! ```

use crate::config::{TYPING_COOLDOWN, TYPING_TTL};
use crate::ephemeral::Indicator;
use crate::error::SessionError;
use crate::presence::PresenceCounter;
use crate::session::{subscribe_relay, SessionContext};
use crate::signaling::events::{
    ChatConnectedPayload, MessagePayload, RelayEvent, CHAT_CONNECTED, CONNECT, DISCONNECT,
    FIND_TEXT_PARTNER, PARTNER_DISCONNECTED, RECEIVE_MESSAGE, SEND_MESSAGE, TYPING,
};
use crate::signaling::{SignalingChannel, Subscription};
use crate::utils::random_id;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};

pub const CONNECTED_NOTICE: &str = "You are now chatting with a stranger!";
pub const DISCONNECTED_NOTICE: &str = "Stranger has disconnected.";
pub const SEARCHING_NOTICE: &str = "Looking for someone to chat with...";

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TextState {
    Idle,
    Searching,
    Connected,
    Ended,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Author {
    Me,
    Partner,
    System,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEntry {
    pub author: Author,
    pub text: String,
    pub at: DateTime<Utc>,
}

impl TranscriptEntry {
    fn new(author: Author, text: impl Into<String>) -> Self {
        Self {
            author,
            text: text.into(),
            at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TextSnapshot {
    pub session_id: String,
    pub state: TextState,
    pub partner: Option<String>,
    pub transcript: Vec<TranscriptEntry>,
}

pub(crate) enum TextCommand {
    SendMessage {
        text: String,
        reply: oneshot::Sender<Result<bool, SessionError>>,
    },
    FindNewChat,
    Keystroke,
}

pub(crate) enum TextInput {
    Relay(RelayEvent),
    Command(TextCommand),
    Unmount,
}

pub(crate) struct TextController {
    id: String,
    channel: SignalingChannel,
    state: TextState,
    partner: Option<String>,
    transcript: Vec<TranscriptEntry>,
    // собеседник печатает
    partner_typing: Arc<Indicator<()>>,
    // мы недавно отправили typing: пока активен, новых уведомлений не шлём
    typing_cooldown: Indicator<()>,
    resume_on_reconnect: bool,
    snapshot: Arc<watch::Sender<TextSnapshot>>,
}

impl TextController {
    pub(crate) fn new(channel: SignalingChannel) -> Self {
        let id = random_id();
        let (snapshot, _) = watch::channel(TextSnapshot {
            session_id: id.clone(),
            state: TextState::Idle,
            partner: None,
            transcript: Vec::new(),
        });
        Self {
            id,
            channel,
            state: TextState::Idle,
            partner: None,
            transcript: Vec::new(),
            partner_typing: Arc::new(Indicator::new(TYPING_TTL)),
            typing_cooldown: Indicator::new(TYPING_COOLDOWN),
            resume_on_reconnect: false,
            snapshot: Arc::new(snapshot),
        }
    }

    pub(crate) fn state(&self) -> TextState {
        self.state
    }

    pub(crate) fn transcript(&self) -> &[TranscriptEntry] {
        &self.transcript
    }

    /// Монтирование: пустая переписка и запрос на подбор
    pub(crate) fn start(&mut self) {
        self.transcript.clear();
        self.begin_search();
    }

    pub(crate) fn handle(&mut self, input: TextInput) {
        match input {
            TextInput::Relay(event) => self.on_relay(event),
            TextInput::Command(TextCommand::SendMessage { text, reply }) => {
                let _ = reply.send(self.send_message(&text));
            }
            TextInput::Command(TextCommand::FindNewChat) => self.find_new_chat(),
            TextInput::Command(TextCommand::Keystroke) => self.keystroke(),
            TextInput::Unmount => self.unmount(),
        }
    }

    fn on_relay(&mut self, event: RelayEvent) {
        match event {
            RelayEvent::ChatConnected(payload) => self.chat_connected(payload),
            RelayEvent::ReceiveMessage(MessagePayload { text }) => {
                if self.state != TextState::Connected {
                    debug!(session = %self.id, state = ?self.state, "message from stale partner discarded");
                    return;
                }
                self.partner_typing.clear();
                self.append(Author::Partner, text);
            }
            RelayEvent::Typing => {
                if self.state == TextState::Connected {
                    self.partner_typing.set(());
                }
            }
            RelayEvent::PartnerDisconnected => {
                if self.state != TextState::Connected {
                    debug!(session = %self.id, state = ?self.state, "partner-disconnected without a partner");
                    return;
                }
                info!(session = %self.id, partner = ?self.partner, "partner left the chat");
                self.append(Author::System, DISCONNECTED_NOTICE);
                self.drop_pairing();
                self.set_state(TextState::Ended);
            }
            RelayEvent::Disconnected => self.channel_lost(),
            RelayEvent::Connected => {
                if self.resume_on_reconnect {
                    info!(session = %self.id, "relay is back, resuming matchmaking");
                    self.find_new_chat();
                }
            }
            other => debug!(session = %self.id, event = ?other, "event not handled by text session"),
        }
    }

    fn chat_connected(&mut self, payload: ChatConnectedPayload) {
        if self.state != TextState::Searching {
            warn!(session = %self.id, state = ?self.state, "unexpected chat-connected ignored");
            return;
        }
        info!(session = %self.id, partner = ?payload.partner_id, "chat connected");
        self.partner = payload.partner_id;
        self.transcript
            .push(TranscriptEntry::new(Author::System, CONNECTED_NOTICE));
        self.set_state(TextState::Connected);
    }

    /// Оптимистичная отправка: сообщение попадает в переписку до ответа relay
    pub(crate) fn send_message(&mut self, text: &str) -> Result<bool, SessionError> {
        if text.trim().is_empty() {
            return Ok(false);
        }
        if self.state != TextState::Connected {
            return Err(SessionError::NotConnected);
        }
        self.append(Author::Me, text);
        self.channel.emit(
            SEND_MESSAGE,
            &MessagePayload {
                text: text.to_string(),
            },
        )?;
        Ok(true)
    }

    fn find_new_chat(&mut self) {
        self.transcript = vec![TranscriptEntry::new(Author::System, SEARCHING_NOTICE)];
        self.begin_search();
    }

    fn keystroke(&mut self) {
        if self.state != TextState::Connected || self.typing_cooldown.is_active() {
            return;
        }
        match self.channel.emit_empty(TYPING) {
            Ok(()) => self.typing_cooldown.set(()),
            Err(e) => debug!(session = %self.id, "typing notice not sent: {}", e),
        }
    }

    fn begin_search(&mut self) {
        self.drop_pairing();
        match self.channel.emit_empty(FIND_TEXT_PARTNER) {
            Ok(()) => {
                self.resume_on_reconnect = false;
                self.set_state(TextState::Searching);
            }
            Err(e) => {
                warn!(session = %self.id, "cannot enter matchmaking yet: {}", e);
                self.resume_on_reconnect = true;
                self.set_state(TextState::Idle);
            }
        }
    }

    /// Транспорт к relay потерян; завершённый чат остаётся завершённым
    fn channel_lost(&mut self) {
        if self.state == TextState::Ended {
            debug!(session = %self.id, "relay connection lost after chat ended");
            return;
        }
        warn!(session = %self.id, state = ?self.state, "relay connection lost");
        let in_flight = self.state != TextState::Idle || self.resume_on_reconnect;
        self.drop_pairing();
        self.resume_on_reconnect = in_flight;
        self.set_state(TextState::Idle);
    }

    fn drop_pairing(&mut self) {
        self.partner = None;
        self.partner_typing.clear();
        self.typing_cooldown.clear();
    }

    fn unmount(&mut self) {
        info!(session = %self.id, "unmounting text session");
        self.drop_pairing();
        self.resume_on_reconnect = false;
        self.set_state(TextState::Idle);
    }

    fn append(&mut self, author: Author, text: impl Into<String>) {
        self.transcript.push(TranscriptEntry::new(author, text));
        self.publish();
    }

    fn set_state(&mut self, state: TextState) {
        if self.state != state {
            debug!(session = %self.id, from = ?self.state, to = ?state, "text state");
        }
        self.state = state;
        self.publish();
    }

    fn publish(&self) {
        self.snapshot.send_modify(|s| {
            s.state = self.state;
            s.partner = self.partner.clone();
            s.transcript = self.transcript.clone();
        });
    }
}

/// Смонтированный экран текстового чата
pub struct TextSession {
    id: String,
    inputs: mpsc::UnboundedSender<TextInput>,
    snapshot: Arc<watch::Sender<TextSnapshot>>,
    partner_typing: Arc<Indicator<()>>,
    presence: PresenceCounter,
    task: Option<JoinHandle<()>>,
}

impl TextSession {
    /// Подписывается на relay и сразу встаёт в очередь подбора
    pub fn mount(ctx: &SessionContext) -> Self {
        let (inputs, rx) = mpsc::unbounded_channel();
        let mut controller = TextController::new(ctx.channel.clone());

        let forward = inputs.clone();
        let subscriptions = subscribe_relay(
            &ctx.channel,
            &[
                CHAT_CONNECTED,
                RECEIVE_MESSAGE,
                TYPING,
                PARTNER_DISCONNECTED,
                CONNECT,
                DISCONNECT,
            ],
            move |event| {
                let _ = forward.send(TextInput::Relay(event));
            },
        );

        let id = controller.id.clone();
        let snapshot = controller.snapshot.clone();
        let partner_typing = controller.partner_typing.clone();
        let span = info_span!("text", session = %id);
        let task = tokio::spawn(
            async move {
                controller.start();
                run(controller, rx, subscriptions).await;
            }
            .instrument(span),
        );

        Self {
            id,
            inputs,
            snapshot,
            partner_typing,
            presence: ctx.presence.clone(),
            task: Some(task),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn snapshot(&self) -> TextSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TextSnapshot> {
        self.snapshot.subscribe()
    }

    pub fn state(&self) -> TextState {
        self.snapshot.borrow().state
    }

    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        self.snapshot.borrow().transcript.clone()
    }

    pub fn presence_count(&self) -> u32 {
        self.presence.count()
    }

    pub fn partner_typing(&self) -> bool {
        self.partner_typing.is_active()
    }

    pub fn subscribe_typing(&self) -> watch::Receiver<Option<()>> {
        self.partner_typing.subscribe()
    }

    /// `Ok(false)` для пустого сообщения, `NotConnected` вне CONNECTED
    pub async fn send_message(&self, text: impl Into<String>) -> Result<bool, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.command(TextCommand::SendMessage {
            text: text.into(),
            reply,
        })?;
        rx.await.map_err(|_| SessionError::Closed)?
    }

    pub fn find_new_chat(&self) -> Result<(), SessionError> {
        self.command(TextCommand::FindNewChat)
    }

    /// Локальное нажатие клавиши; уведомление `typing` уходит не чаще раза в 2 с
    pub fn keystroke(&self) -> Result<(), SessionError> {
        self.command(TextCommand::Keystroke)
    }

    pub async fn unmount(mut self) {
        let _ = self.inputs.send(TextInput::Unmount);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(session = %self.id, "text session task ended abnormally: {}", e);
            }
        }
    }

    fn command(&self, command: TextCommand) -> Result<(), SessionError> {
        self.inputs
            .send(TextInput::Command(command))
            .map_err(|_| SessionError::Closed)
    }
}

impl Drop for TextSession {
    fn drop(&mut self) {
        if self.task.is_some() {
            let _ = self.inputs.send(TextInput::Unmount);
        }
    }
}

async fn run(
    mut controller: TextController,
    mut rx: mpsc::UnboundedReceiver<TextInput>,
    subscriptions: Vec<Subscription>,
) {
    while let Some(input) = rx.recv().await {
        let unmount = matches!(input, TextInput::Unmount);
        controller.handle(input);
        if unmount {
            break;
        }
    }
    drop(subscriptions);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::test_support::ScriptedRelay;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tokio::time::{advance, timeout};

    async fn controller() -> (ScriptedRelay, TextController) {
        let relay = ScriptedRelay::new();
        let channel = relay.connected_channel().await;
        let mut controller = TextController::new(channel);
        controller.start();
        (relay, controller)
    }

    async fn connected() -> (ScriptedRelay, TextController) {
        let (relay, mut controller) = controller().await;
        controller.handle(TextInput::Relay(RelayEvent::ChatConnected(
            ChatConnectedPayload::default(),
        )));
        relay.drain_emitted();
        (relay, controller)
    }

    fn received(text: &str) -> TextInput {
        TextInput::Relay(RelayEvent::ReceiveMessage(MessagePayload { text: text.into() }))
    }

    fn authors(controller: &TextController) -> Vec<(Author, &str)> {
        controller
            .transcript()
            .iter()
            .map(|e| (e.author, e.text.as_str()))
            .collect()
    }

    async fn settle() {
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn mount_resets_transcript_and_searches() {
        let (relay, controller) = controller().await;
        assert_eq!(controller.state(), TextState::Searching);
        assert!(controller.transcript().is_empty());
        assert_eq!(relay.drain_events(), vec![FIND_TEXT_PARTNER]);
    }

    #[tokio::test]
    async fn pairing_announces_stranger() {
        let (_relay, mut controller) = controller().await;
        controller.handle(TextInput::Relay(RelayEvent::ChatConnected(
            ChatConnectedPayload {
                partner_id: Some("P".into()),
            },
        )));
        assert_eq!(controller.state(), TextState::Connected);
        assert_eq!(authors(&controller), vec![(Author::System, CONNECTED_NOTICE)]);
        assert_eq!(controller.snapshot.borrow().partner.as_deref(), Some("P"));
    }

    #[tokio::test]
    async fn sent_message_is_appended_once() {
        let (relay, mut controller) = connected().await;

        assert!(controller.send_message("hi").unwrap());

        assert_eq!(
            authors(&controller),
            vec![(Author::System, CONNECTED_NOTICE), (Author::Me, "hi")]
        );
        let frames = relay.drain_emitted();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, SEND_MESSAGE);
        assert_eq!(frames[0].data, json!({ "text": "hi" }));
    }

    #[tokio::test]
    async fn blank_message_is_noop() {
        let (relay, mut controller) = connected().await;
        assert!(!controller.send_message("   \n\t").unwrap());
        assert_eq!(controller.transcript().len(), 1);
        assert!(relay.drain_emitted().is_empty());
    }

    #[tokio::test]
    async fn sending_requires_partner() {
        let (relay, mut controller) = controller().await;
        relay.drain_emitted();
        assert!(matches!(
            controller.send_message("hello?"),
            Err(SessionError::NotConnected)
        ));
        assert!(controller.transcript().is_empty());
        assert!(relay.drain_emitted().is_empty());
    }

    #[tokio::test]
    async fn partner_messages_only_while_connected() {
        let (_relay, mut controller) = controller().await;
        controller.handle(received("stale"));
        assert!(controller.transcript().is_empty());

        controller.handle(TextInput::Relay(RelayEvent::ChatConnected(
            ChatConnectedPayload::default(),
        )));
        controller.handle(received("hey"));
        assert_eq!(
            authors(&controller),
            vec![(Author::System, CONNECTED_NOTICE), (Author::Partner, "hey")]
        );
    }

    #[tokio::test]
    async fn partner_leaving_ends_without_research() {
        let (relay, mut controller) = connected().await;

        controller.handle(TextInput::Relay(RelayEvent::PartnerDisconnected));

        assert_eq!(controller.state(), TextState::Ended);
        assert_eq!(
            controller.transcript().last().map(|e| (e.author, e.text.as_str())),
            Some((Author::System, DISCONNECTED_NOTICE))
        );
        assert_eq!(controller.transcript().len(), 2);
        assert!(relay.drain_emitted().is_empty());

        controller.handle(received("too late"));
        assert_eq!(controller.transcript().len(), 2);
    }

    #[tokio::test]
    async fn find_new_chat_resets_transcript() {
        let (relay, mut controller) = connected().await;
        controller.handle(TextInput::Relay(RelayEvent::PartnerDisconnected));

        controller.handle(TextInput::Command(TextCommand::FindNewChat));

        assert_eq!(controller.state(), TextState::Searching);
        assert_eq!(authors(&controller), vec![(Author::System, SEARCHING_NOTICE)]);
        assert_eq!(relay.drain_events(), vec![FIND_TEXT_PARTNER]);
    }

    #[tokio::test(start_paused = true)]
    async fn keystrokes_are_rate_limited() {
        let (relay, mut controller) = connected().await;

        for _ in 0..5 {
            controller.handle(TextInput::Command(TextCommand::Keystroke));
        }
        assert_eq!(relay.drain_events(), vec![TYPING]);

        advance(Duration::from_millis(1900)).await;
        controller.handle(TextInput::Command(TextCommand::Keystroke));
        assert!(relay.drain_emitted().is_empty());

        advance(Duration::from_millis(200)).await;
        settle().await;
        controller.handle(TextInput::Command(TextCommand::Keystroke));
        assert_eq!(relay.drain_events(), vec![TYPING]);
    }

    #[tokio::test]
    async fn keystrokes_while_searching_are_silent() {
        let (relay, mut controller) = controller().await;
        relay.drain_emitted();
        controller.handle(TextInput::Command(TextCommand::Keystroke));
        assert!(relay.drain_emitted().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn partner_typing_follows_latest_notice() {
        let (_relay, mut controller) = connected().await;
        let typing = controller.partner_typing.clone();

        controller.handle(TextInput::Relay(RelayEvent::Typing));
        advance(Duration::from_millis(500)).await;
        controller.handle(TextInput::Relay(RelayEvent::Typing));

        advance(Duration::from_millis(1600)).await;
        settle().await;
        assert!(typing.is_active());

        advance(Duration::from_millis(400)).await;
        settle().await;
        assert!(!typing.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn partner_message_hides_typing() {
        let (_relay, mut controller) = connected().await;
        controller.handle(TextInput::Relay(RelayEvent::Typing));
        assert!(controller.partner_typing.is_active());

        controller.handle(received("done typing"));
        assert!(!controller.partner_typing.is_active());
    }

    #[tokio::test]
    async fn channel_loss_resumes_search_on_reconnect() {
        let (relay, mut controller) = connected().await;

        controller.handle(TextInput::Relay(RelayEvent::Disconnected));
        assert_eq!(controller.state(), TextState::Idle);
        assert!(matches!(
            controller.send_message("anyone?"),
            Err(SessionError::NotConnected)
        ));

        controller.handle(TextInput::Relay(RelayEvent::Connected));
        assert_eq!(controller.state(), TextState::Searching);
        assert_eq!(authors(&controller), vec![(Author::System, SEARCHING_NOTICE)]);
        assert_eq!(relay.drain_events(), vec![FIND_TEXT_PARTNER]);
    }

    #[tokio::test]
    async fn ended_chat_survives_channel_loss() {
        let (relay, mut controller) = connected().await;
        controller.handle(TextInput::Relay(RelayEvent::PartnerDisconnected));

        controller.handle(TextInput::Relay(RelayEvent::Disconnected));
        controller.handle(TextInput::Relay(RelayEvent::Connected));

        assert_eq!(controller.state(), TextState::Ended);
        assert!(relay.drain_emitted().is_empty());
    }

    // ---------- смонтированная сессия ----------

    async fn wait_for<F>(rx: &mut watch::Receiver<TextSnapshot>, pred: F) -> TextSnapshot
    where
        F: Fn(&TextSnapshot) -> bool,
    {
        timeout(Duration::from_secs(5), async {
            loop {
                {
                    let snap = rx.borrow_and_update();
                    if pred(&snap) {
                        return snap.clone();
                    }
                }
                rx.changed().await.expect("text session dropped its state");
            }
        })
        .await
        .expect("timed out waiting for text state")
    }

    #[tokio::test]
    async fn mounted_chat_round_trip() {
        let relay = ScriptedRelay::new();
        let channel = relay.connected_channel().await;
        let ctx = SessionContext::with_presence(
            channel.clone(),
            PresenceCounter::new(),
            Config::default(),
        );
        let idle = channel.handler_count();
        let session = TextSession::mount(&ctx);
        let mut rx = session.subscribe();

        assert_eq!(relay.next_emitted().await.event, FIND_TEXT_PARTNER);
        assert!(matches!(
            session.send_message("early").await,
            Err(SessionError::NotConnected)
        ));

        relay.push(CHAT_CONNECTED, Value::Null);
        wait_for(&mut rx, |s| s.state == TextState::Connected).await;

        assert!(session.send_message("hi").await.unwrap());
        let frame = relay.next_emitted().await;
        assert_eq!(frame.event, SEND_MESSAGE);
        assert_eq!(frame.data["text"], "hi");

        relay.push(RECEIVE_MESSAGE, json!({ "text": "hello" }));
        let snap = wait_for(&mut rx, |s| s.transcript.len() == 3).await;
        assert_eq!(snap.transcript[1].author, Author::Me);
        assert_eq!(snap.transcript[2].author, Author::Partner);
        assert_eq!(snap.transcript[2].text, "hello");

        relay.push(PARTNER_DISCONNECTED, Value::Null);
        wait_for(&mut rx, |s| s.state == TextState::Ended).await;

        session.unmount().await;
        assert_eq!(channel.handler_count(), idle);
    }

    #[tokio::test]
    async fn transport_swap_restarts_search() {
        let relay = ScriptedRelay::new();
        let channel = relay.connected_channel().await;
        let ctx = SessionContext::with_presence(
            channel.clone(),
            PresenceCounter::new(),
            Config::default(),
        );
        let session = TextSession::mount(&ctx);
        let mut rx = session.subscribe();

        assert_eq!(relay.next_emitted().await.event, FIND_TEXT_PARTNER);
        relay.push(CHAT_CONNECTED, Value::Null);
        wait_for(&mut rx, |s| s.state == TextState::Connected).await;

        channel.connect().await.unwrap();
        relay.accept().await;

        assert_eq!(relay.next_emitted().await.event, FIND_TEXT_PARTNER);
        let snap = wait_for(&mut rx, |s| s.state == TextState::Searching).await;
        assert_eq!(snap.transcript.len(), 1);
        assert_eq!(snap.transcript[0].text, SEARCHING_NOTICE);
        assert!(matches!(
            session.send_message("still there?").await,
            Err(SessionError::NotConnected)
        ));
        session.unmount().await;
    }

    #[tokio::test]
    async fn unmount_clears_partner_typing() {
        let relay = ScriptedRelay::new();
        let channel = relay.connected_channel().await;
        let ctx = SessionContext::with_presence(
            channel,
            PresenceCounter::new(),
            Config::default(),
        );
        let session = TextSession::mount(&ctx);
        let mut rx = session.subscribe();
        let mut typing = session.subscribe_typing();

        relay.push(CHAT_CONNECTED, Value::Null);
        wait_for(&mut rx, |s| s.state == TextState::Connected).await;
        relay.push(TYPING, Value::Null);
        timeout(Duration::from_secs(1), typing.wait_for(Option::is_some))
            .await
            .unwrap()
            .unwrap();
        assert!(session.partner_typing());

        session.unmount().await;
        assert!(typing.borrow().is_none());
    }

    #[tokio::test]
    async fn handle_reports_closed_after_task_exit() {
        let relay = ScriptedRelay::new();
        let channel = relay.connected_channel().await;
        let ctx = SessionContext::with_presence(
            channel,
            PresenceCounter::new(),
            Config::default(),
        );
        let session = TextSession::mount(&ctx);
        let _ = session.inputs.send(TextInput::Unmount);
        timeout(Duration::from_secs(5), session.inputs.closed())
            .await
            .unwrap();

        assert!(matches!(
            session.find_new_chat(),
            Err(SessionError::Closed)
        ));
        assert!(matches!(
            session.send_message("x").await,
            Err(SessionError::Closed)
        ));
    }
}
