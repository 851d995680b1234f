//! Видеозвонок: поиск собеседника, согласование WebRTC через relay, завершение
//! и автоматический повторный поиск.
//!
//! ```text
//! IDLE → SEARCHING → ANSWERING | OFFERING → CONNECTED → ENDED → SEARCHING
//! ```
//!
//! Одновременно существует не больше одного peer connection. Новое создаётся
//! только после явного закрытия предыдущего, а события закрытых соединений
//! отбрасываются по номеру поколения.

use crate::config::{Config, REACTION_TTL};
use crate::ephemeral::Indicator;
use crate::error::{MediaError, NegotiationError, SessionError};
use crate::media::{MediaLease, MediaSource};
use crate::peer::{
    NegotiationPayload, PeerConnector, PeerEventSink, PeerLink, PeerRole, PeerSignal, RemoteTrack,
};
use crate::presence::PresenceCounter;
use crate::session::{subscribe_relay, SessionContext};
use crate::signaling::events::{
    AnswerCallPayload, CallAcceptedPayload, CallPartnerPayload, IncomingCallPayload, RelayEvent,
    ANSWER_CALL, CALL_ACCEPTED, CALL_PARTNER, CONNECT, DISCONNECT, END_CALL, FIND_VIDEO_PARTNER,
    INCOMING_CALL, PARTNER_DISCONNECTED,
};
use crate::signaling::{SignalingChannel, Subscription};
use crate::utils::random_id;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, info_span, warn, Instrument};

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CallState {
    Idle,
    Searching,
    Answering,
    Offering,
    Connected,
    Ended,
}

impl CallState {
    /// Есть собеседник и (будущее) peer connection
    pub fn is_paired(self) -> bool {
        matches!(
            self,
            CallState::Answering | CallState::Offering | CallState::Connected
        )
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Reaction {
    Heart,
    Laugh,
    ThumbsUp,
    Fire,
    Wow,
    Clap,
}

impl Reaction {
    pub const ALL: [Reaction; 6] = [
        Reaction::Heart,
        Reaction::Laugh,
        Reaction::ThumbsUp,
        Reaction::Fire,
        Reaction::Wow,
        Reaction::Clap,
    ];

    pub fn emoji(self) -> &'static str {
        match self {
            Reaction::Heart => "❤️",
            Reaction::Laugh => "😂",
            Reaction::ThumbsUp => "👍",
            Reaction::Fire => "🔥",
            Reaction::Wow => "😮",
            Reaction::Clap => "👏",
        }
    }
}

impl FromStr for Reaction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "heart" => Ok(Reaction::Heart),
            "laugh" => Ok(Reaction::Laugh),
            "thumbs-up" | "thumbsup" => Ok(Reaction::ThumbsUp),
            "fire" => Ok(Reaction::Fire),
            "wow" => Ok(Reaction::Wow),
            "clap" => Ok(Reaction::Clap),
            other => Err(format!("unknown reaction `{}`", other)),
        }
    }
}

/// Состояние звонка для слоя представления
#[derive(Debug, Clone)]
pub struct CallSnapshot {
    pub session_id: String,
    pub state: CallState,
    pub partner: Option<String>,
    pub muted: bool,
    pub video_off: bool,
    pub remote_tracks: Vec<RemoteTrack>,
    pub media_error: Option<MediaError>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallCommand {
    FindNewPartner,
    LeaveCall,
    CallPartner(String),
}

pub(crate) enum CallInput {
    Relay(RelayEvent),
    Command(CallCommand),
    Peer(u64, PeerSignal),
    NegotiationTimeout(u64),
    Unmount,
}

struct ActivePeer {
    generation: u64,
    link: Box<dyn PeerLink>,
}

pub(crate) struct CallController {
    id: String,
    channel: SignalingChannel,
    connector: Arc<dyn PeerConnector>,
    media: Option<Arc<MediaLease>>,
    media_error: Option<MediaError>,
    state: CallState,
    partner: Option<String>,
    peer: Option<ActivePeer>,
    generation: u64,
    remote_tracks: Vec<RemoteTrack>,
    resume_on_reconnect: bool,
    negotiation_timeout: Duration,
    timeout_task: Option<JoinHandle<()>>,
    inputs: mpsc::UnboundedSender<CallInput>,
    snapshot: Arc<watch::Sender<CallSnapshot>>,
}

impl CallController {
    pub(crate) fn new(
        channel: SignalingChannel,
        connector: Arc<dyn PeerConnector>,
        media: Result<MediaLease, MediaError>,
        config: &Config,
        inputs: mpsc::UnboundedSender<CallInput>,
    ) -> Self {
        let id = random_id();
        let (media, media_error) = match media {
            Ok(lease) => (Some(Arc::new(lease)), None),
            Err(e) => (None, Some(e)),
        };
        let (snapshot, _) = watch::channel(CallSnapshot {
            session_id: id.clone(),
            state: CallState::Idle,
            partner: None,
            muted: false,
            video_off: false,
            remote_tracks: Vec::new(),
            media_error: media_error.clone(),
        });
        Self {
            id,
            channel,
            connector,
            media,
            media_error,
            state: CallState::Idle,
            partner: None,
            peer: None,
            generation: 0,
            remote_tracks: Vec::new(),
            resume_on_reconnect: false,
            negotiation_timeout: config.negotiation_timeout,
            timeout_task: None,
            inputs,
            snapshot: Arc::new(snapshot),
        }
    }

    pub(crate) fn state(&self) -> CallState {
        self.state
    }

    pub(crate) fn partner(&self) -> Option<&str> {
        self.partner.as_deref()
    }

    pub(crate) fn has_peer(&self) -> bool {
        self.peer.is_some()
    }

    /// Монтирование: сразу встаём в очередь поиска
    pub(crate) async fn start(&mut self) {
        if let Some(e) = &self.media_error {
            error!(session = %self.id, "local media unavailable, not searching: {}", e);
            self.publish();
            return;
        }
        self.begin_search().await;
    }

    pub(crate) async fn handle(&mut self, input: CallInput) {
        match input {
            CallInput::Relay(event) => self.on_relay(event).await,
            CallInput::Command(CallCommand::FindNewPartner) => self.find_new_partner().await,
            CallInput::Command(CallCommand::LeaveCall) => self.leave_call().await,
            CallInput::Command(CallCommand::CallPartner(target)) => self.call_partner(target).await,
            CallInput::Peer(generation, signal) => self.on_peer(generation, signal).await,
            CallInput::NegotiationTimeout(generation) => {
                if self.current_generation() == Some(generation)
                    && matches!(self.state, CallState::Answering | CallState::Offering)
                {
                    self.fail(NegotiationError::Timeout).await;
                }
            }
            CallInput::Unmount => self.unmount().await,
        }
    }

    async fn on_relay(&mut self, event: RelayEvent) {
        match event {
            RelayEvent::IncomingCall(payload) => self.incoming_call(payload).await,
            RelayEvent::CallAccepted(payload) => self.call_accepted(payload).await,
            RelayEvent::PartnerDisconnected => {
                if self.state.is_paired() {
                    info!(session = %self.id, partner = ?self.partner, "partner disconnected");
                    self.end_call(false).await;
                } else {
                    debug!(session = %self.id, state = ?self.state, "partner-disconnected without a partner");
                }
            }
            RelayEvent::Disconnected => self.channel_lost().await,
            RelayEvent::Connected => {
                if self.resume_on_reconnect {
                    info!(session = %self.id, "relay is back, resuming matchmaking");
                    self.begin_search().await;
                }
            }
            other => debug!(session = %self.id, event = ?other, "event not handled by call session"),
        }
    }

    async fn find_new_partner(&mut self) {
        if self.media_error.is_some() {
            warn!(session = %self.id, "findNewPartner ignored: no local media");
            return;
        }
        self.begin_search().await;
    }

    async fn leave_call(&mut self) {
        if self.media_error.is_some() {
            return;
        }
        let notify = self.state.is_paired();
        self.end_call(notify).await;
    }

    async fn incoming_call(&mut self, payload: IncomingCallPayload) {
        if self.state != CallState::Searching {
            warn!(
                session = %self.id,
                from = %payload.from_id,
                state = ?self.state,
                "duplicate offer rejected"
            );
            return;
        }

        info!(session = %self.id, from = %payload.from_id, "incoming call");
        self.partner = Some(payload.from_id.clone());
        self.set_state(CallState::Answering);

        if let Err(e) = self.open_peer(PeerRole::Responder).await {
            return self.fail(e).await;
        }
        let offer = payload.offer;
        let answer = match self.negotiate(|link| link.accept_offer(offer)).await {
            Ok(answer) => answer,
            Err(e) => return self.fail(e).await,
        };

        let reply = AnswerCallPayload {
            target_id: payload.from_id,
            answer,
        };
        if let Err(e) = self.channel.emit(ANSWER_CALL, &reply) {
            warn!(session = %self.id, "failed to send answer: {}", e);
            return self.end_call(false).await;
        }
        debug!(session = %self.id, "answer sent, waiting for remote media");
    }

    async fn call_partner(&mut self, target: String) {
        if self.state != CallState::Searching {
            warn!(session = %self.id, state = ?self.state, "call-partner ignored outside searching");
            return;
        }

        info!(session = %self.id, target = %target, "calling partner");
        self.partner = Some(target.clone());
        self.set_state(CallState::Offering);

        if let Err(e) = self.open_peer(PeerRole::Initiator).await {
            return self.fail(e).await;
        }
        let offer = match self.negotiate(|link| link.create_offer()).await {
            Ok(offer) => offer,
            Err(e) => return self.fail(e).await,
        };

        let request = CallPartnerPayload {
            target_id: target,
            offer,
        };
        if let Err(e) = self.channel.emit(CALL_PARTNER, &request) {
            warn!(session = %self.id, "failed to send offer: {}", e);
            self.end_call(false).await;
        }
    }

    async fn call_accepted(&mut self, payload: CallAcceptedPayload) {
        if self.state != CallState::Offering {
            warn!(session = %self.id, state = ?self.state, "unexpected call-accepted ignored");
            return;
        }
        let answer = payload.answer;
        match self.negotiate(|link| link.apply_answer(answer)).await {
            Ok(()) => self.connected(),
            Err(e) => self.fail(e).await,
        }
    }

    async fn on_peer(&mut self, generation: u64, signal: PeerSignal) {
        if self.current_generation() != Some(generation) {
            debug!(session = %self.id, generation, "event from a closed peer connection dropped");
            return;
        }
        match signal {
            PeerSignal::RemoteTrack(track) => {
                self.remote_tracks.push(track);
                if self.state == CallState::Answering {
                    self.connected();
                } else {
                    self.publish();
                }
            }
            PeerSignal::Failed(reason) => {
                error!(session = %self.id, "peer connection failed: {}", reason);
                self.end_call(false).await;
            }
        }
    }

    fn connected(&mut self) {
        self.cancel_timeout();
        info!(session = %self.id, partner = ?self.partner, "call connected");
        self.set_state(CallState::Connected);
    }

    /// Поиск: закрыть соединение, забыть собеседника, отправить запрос в relay
    async fn begin_search(&mut self) {
        self.teardown_peer().await;
        self.partner = None;
        self.remote_tracks.clear();
        match self.channel.emit_empty(FIND_VIDEO_PARTNER) {
            Ok(()) => {
                self.resume_on_reconnect = false;
                self.set_state(CallState::Searching);
            }
            Err(e) => {
                warn!(session = %self.id, "cannot enter matchmaking yet: {}", e);
                self.resume_on_reconnect = true;
                self.set_state(CallState::Idle);
            }
        }
    }

    /// Завершение звонка; из ENDED сразу уходим в новый поиск
    async fn end_call(&mut self, notify_relay: bool) {
        self.teardown_peer().await;
        if notify_relay {
            if let Err(e) = self.channel.emit_empty(END_CALL) {
                warn!(session = %self.id, "failed to notify relay about end of call: {}", e);
            }
        }
        self.partner = None;
        self.remote_tracks.clear();
        self.set_state(CallState::Ended);
        self.begin_search().await;
    }

    async fn fail(&mut self, err: NegotiationError) {
        error!(session = %self.id, partner = ?self.partner, "negotiation failed: {}", err);
        self.end_call(false).await;
    }

    /// Транспорт к relay потерян: текущая пара считается мёртвой
    async fn channel_lost(&mut self) {
        if self.media_error.is_some() {
            return;
        }
        let in_flight = self.state != CallState::Idle || self.resume_on_reconnect;
        warn!(session = %self.id, state = ?self.state, "relay connection lost");
        self.teardown_peer().await;
        self.partner = None;
        self.remote_tracks.clear();
        self.resume_on_reconnect = in_flight;
        self.set_state(CallState::Idle);
    }

    async fn open_peer(&mut self, role: PeerRole) -> Result<(), NegotiationError> {
        self.teardown_peer().await;
        self.generation += 1;
        let generation = self.generation;

        let inputs = self.inputs.clone();
        let sink = PeerEventSink::new(generation, move |generation, signal| {
            let _ = inputs.send(CallInput::Peer(generation, signal));
        });
        let stream = self.media.as_ref().map(|lease| lease.stream().clone());
        let link = self.connector.create(role, stream, sink).await?;
        self.peer = Some(ActivePeer { generation, link });
        self.arm_timeout(generation);
        Ok(())
    }

    async fn negotiate<'a, T, F, Fut>(&'a self, step: F) -> Result<T, NegotiationError>
    where
        F: FnOnce(&'a dyn PeerLink) -> Fut,
        Fut: Future<Output = Result<T, NegotiationError>> + 'a,
    {
        let peer = self.peer.as_ref().ok_or(NegotiationError::Closed)?;
        timeout(self.negotiation_timeout, step(peer.link.as_ref()))
            .await
            .map_err(|_| NegotiationError::Timeout)?
    }

    async fn teardown_peer(&mut self) {
        self.cancel_timeout();
        if let Some(peer) = self.peer.take() {
            debug!(session = %self.id, generation = peer.generation, "closing peer connection");
            peer.link.close().await;
        }
    }

    fn current_generation(&self) -> Option<u64> {
        self.peer.as_ref().map(|p| p.generation)
    }

    fn arm_timeout(&mut self, generation: u64) {
        self.cancel_timeout();
        let inputs = self.inputs.clone();
        let after = self.negotiation_timeout;
        self.timeout_task = Some(tokio::spawn(async move {
            sleep(after).await;
            let _ = inputs.send(CallInput::NegotiationTimeout(generation));
        }));
    }

    fn cancel_timeout(&mut self) {
        if let Some(task) = self.timeout_task.take() {
            task.abort();
        }
    }

    async fn unmount(&mut self) {
        info!(session = %self.id, "unmounting call session");
        self.teardown_peer().await;
        self.partner = None;
        self.remote_tracks.clear();
        self.resume_on_reconnect = false;
        self.set_state(CallState::Idle);
        self.media = None;
    }

    fn set_state(&mut self, state: CallState) {
        if self.state != state {
            debug!(session = %self.id, from = ?self.state, to = ?state, "call state");
        }
        self.state = state;
        self.publish();
    }

    fn publish(&self) {
        let (muted, video_off) = self
            .media
            .as_ref()
            .map_or((false, false), |m| (m.is_muted(), m.is_video_off()));
        self.snapshot.send_modify(|s| {
            s.state = self.state;
            s.partner = self.partner.clone();
            s.remote_tracks = self.remote_tracks.clone();
            s.media_error = self.media_error.clone();
            s.muted = muted;
            s.video_off = video_off;
        });
    }
}

/// Смонтированный экран видеочата
pub struct CallSession {
    id: String,
    inputs: mpsc::UnboundedSender<CallInput>,
    snapshot: Arc<watch::Sender<CallSnapshot>>,
    media: Option<Arc<MediaLease>>,
    reaction: Indicator<Reaction>,
    presence: PresenceCounter,
    task: Option<JoinHandle<()>>,
}

impl CallSession {
    /// Захватывает медиа, подписывается на relay и сразу начинает поиск
    pub async fn mount(
        ctx: &SessionContext,
        media: &MediaSource,
        connector: Arc<dyn PeerConnector>,
    ) -> Self {
        let lease = media.acquire().await;
        let (inputs, rx) = mpsc::unbounded_channel();
        let mut controller = CallController::new(
            ctx.channel.clone(),
            connector,
            lease,
            &ctx.config,
            inputs.clone(),
        );

        let forward = inputs.clone();
        let subscriptions = subscribe_relay(
            &ctx.channel,
            &[
                INCOMING_CALL,
                CALL_ACCEPTED,
                PARTNER_DISCONNECTED,
                CONNECT,
                DISCONNECT,
            ],
            move |event| {
                let _ = forward.send(CallInput::Relay(event));
            },
        );

        let id = controller.id.clone();
        let snapshot = controller.snapshot.clone();
        let media = controller.media.clone();
        let span = info_span!("call", session = %id);
        let task = tokio::spawn(
            async move {
                controller.start().await;
                run(controller, rx, subscriptions).await;
            }
            .instrument(span),
        );

        Self {
            id,
            inputs,
            snapshot,
            media,
            reaction: Indicator::new(REACTION_TTL),
            presence: ctx.presence.clone(),
            task: Some(task),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn snapshot(&self) -> CallSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CallSnapshot> {
        self.snapshot.subscribe()
    }

    pub fn state(&self) -> CallState {
        self.snapshot.borrow().state
    }

    pub fn presence_count(&self) -> u32 {
        self.presence.count()
    }

    pub fn local_media(&self) -> Option<&Arc<MediaLease>> {
        self.media.as_ref()
    }

    pub fn find_new_partner(&self) -> Result<(), SessionError> {
        self.command(CallCommand::FindNewPartner)
    }

    pub fn leave_call(&self) -> Result<(), SessionError> {
        self.command(CallCommand::LeaveCall)
    }

    /// Сами звоним найденному собеседнику (инициирующая сторона)
    pub fn call_partner(&self, target: impl Into<String>) -> Result<(), SessionError> {
        self.command(CallCommand::CallPartner(target.into()))
    }

    /// Переключает микрофон; возвращает `true`, если он теперь выключен
    pub fn toggle_mute(&self) -> bool {
        let muted = self.media.as_ref().is_some_and(|m| m.toggle_mute());
        self.snapshot.send_modify(|s| s.muted = muted);
        muted
    }

    /// Переключает камеру; возвращает `true`, если она теперь выключена
    pub fn toggle_video(&self) -> bool {
        let off = self.media.as_ref().is_some_and(|m| m.toggle_video());
        self.snapshot.send_modify(|s| s.video_off = off);
        off
    }

    pub fn react(&self, reaction: Reaction) {
        debug!(session = %self.id, ?reaction, "reaction");
        self.reaction.set(reaction);
    }

    pub fn reaction(&self) -> Option<Reaction> {
        self.reaction.get()
    }

    pub fn subscribe_reaction(&self) -> watch::Receiver<Option<Reaction>> {
        self.reaction.subscribe()
    }

    /// Размонтирование: закрыть соединение, снять подписки, отпустить медиа
    pub async fn unmount(mut self) {
        let _ = self.inputs.send(CallInput::Unmount);
        self.reaction.clear();
        self.media = None;
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(session = %self.id, "call session task ended abnormally: {}", e);
            }
        }
    }

    fn command(&self, command: CallCommand) -> Result<(), SessionError> {
        self.inputs
            .send(CallInput::Command(command))
            .map_err(|_| SessionError::Closed)
    }
}

impl Drop for CallSession {
    fn drop(&mut self) {
        if self.task.is_some() {
            let _ = self.inputs.send(CallInput::Unmount);
        }
    }
}

async fn run(
    mut controller: CallController,
    mut rx: mpsc::UnboundedReceiver<CallInput>,
    subscriptions: Vec<Subscription>,
) {
    while let Some(input) = rx.recv().await {
        let unmount = matches!(input, CallInput::Unmount);
        controller.handle(input).await;
        if unmount {
            break;
        }
    }
    drop(subscriptions);
}
