//! Общие заглушки для тестов: relay в памяти и peer connector со счётчиком живых соединений.

use crate::error::NegotiationError;
use crate::media::{LocalStream, TrackKind};
use crate::peer::{
    NegotiationPayload, PeerConnector, PeerEventSink, PeerLink, PeerRole, PeerSignal, RemoteTrack,
};
use crate::signaling::events::RelayFrame;
use crate::signaling::{ChannelConfig, MemoryConnector, RelayEnd, SignalingChannel};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);
const FLUSH: &str = "__flush";

/// Сторона relay для тестов: толкает события клиенту и читает то, что он отправил
pub(crate) struct ScriptedRelay {
    connector: Arc<MemoryConnector>,
    ends: tokio::sync::Mutex<mpsc::UnboundedReceiver<RelayEnd>>,
    current: Mutex<Option<RelayEnd>>,
}

impl ScriptedRelay {
    pub(crate) fn new() -> Self {
        let (connector, ends) = MemoryConnector::new();
        Self {
            connector: Arc::new(connector),
            ends: tokio::sync::Mutex::new(ends),
            current: Mutex::new(None),
        }
    }

    pub(crate) fn channel_config() -> ChannelConfig {
        ChannelConfig {
            reconnect_delay: Duration::from_millis(100),
            max_reconnect_attempts: 3,
        }
    }

    pub(crate) fn connector(&self) -> &Arc<MemoryConnector> {
        &self.connector
    }

    pub(crate) fn channel(&self) -> SignalingChannel {
        SignalingChannel::new(self.connector.clone(), Self::channel_config())
    }

    pub(crate) async fn connected_channel(&self) -> SignalingChannel {
        let channel = self.channel();
        channel.connect().await.expect("in-memory connect");
        self.accept().await;
        channel
    }

    /// Принимает следующее подключение клиента; возвращает прежний транспорт
    pub(crate) async fn accept(&self) -> Option<RelayEnd> {
        let end = timeout(WAIT, async { self.ends.lock().await.recv().await })
            .await
            .expect("timed out waiting for client to connect")
            .expect("connector dropped");
        self.current.lock().unwrap().replace(end)
    }

    pub(crate) fn push(&self, event: &str, data: Value) {
        let current = self.current.lock().unwrap();
        let end = current.as_ref().expect("no accepted transport");
        assert!(end.send(event, data), "client closed transport");
    }

    /// Ждёт, пока клиент разошлёт подписчикам всё, что уже отправлено
    pub(crate) async fn flush(&self, channel: &SignalingChannel) {
        let notify = Arc::new(Notify::new());
        let signal = notify.clone();
        let _sub = channel.on(FLUSH, move |_| signal.notify_one());
        self.push(FLUSH, Value::Null);
        timeout(WAIT, notify.notified())
            .await
            .expect("timed out flushing relay events");
    }

    pub(crate) async fn next_emitted(&self) -> RelayFrame {
        let mut end = self.take_end();
        let frame = timeout(WAIT, end.recv()).await;
        self.current.lock().unwrap().replace(end);
        frame
            .expect("timed out waiting for client frame")
            .expect("client closed transport")
    }

    /// Всё, что клиент успел отправить, без ожидания
    pub(crate) fn drain_emitted(&self) -> Vec<RelayFrame> {
        let mut current = self.current.lock().unwrap();
        let end = current.as_mut().expect("no accepted transport");
        std::iter::from_fn(|| end.try_recv()).collect()
    }

    pub(crate) fn drain_events(&self) -> Vec<String> {
        self.drain_emitted().into_iter().map(|f| f.event).collect()
    }

    /// Клиент закрыл исходящую сторону текущего транспорта
    pub(crate) async fn expect_client_closed(&self) {
        let mut end = self.take_end();
        loop {
            match timeout(WAIT, end.recv()).await {
                Ok(Some(_)) => continue,
                Ok(None) => break,
                Err(_) => panic!("client kept the transport open"),
            }
        }
        self.current.lock().unwrap().replace(end);
    }

    /// Рвёт текущий транспорт со стороны relay
    pub(crate) fn drop_transport(&self) {
        self.current.lock().unwrap().take();
    }

    fn take_end(&self) -> RelayEnd {
        self.current
            .lock()
            .unwrap()
            .take()
            .expect("no accepted transport")
    }
}

struct Counters {
    live: AtomicUsize,
    peak: AtomicUsize,
    created: AtomicUsize,
}

/// Peer connector без сети; считает живые соединения
#[derive(Clone)]
pub(crate) struct MockConnector {
    counters: Arc<Counters>,
    fail_create: Arc<AtomicBool>,
    fail_negotiation: Arc<AtomicBool>,
    hang_negotiation: Arc<AtomicBool>,
    sinks: Arc<Mutex<Vec<PeerEventSink>>>,
    roles: Arc<Mutex<Vec<PeerRole>>>,
}

impl MockConnector {
    pub(crate) fn new() -> Self {
        Self {
            counters: Arc::new(Counters {
                live: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                created: AtomicUsize::new(0),
            }),
            fail_create: Arc::new(AtomicBool::new(false)),
            fail_negotiation: Arc::new(AtomicBool::new(false)),
            hang_negotiation: Arc::new(AtomicBool::new(false)),
            sinks: Arc::new(Mutex::new(Vec::new())),
            roles: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn live(&self) -> usize {
        self.counters.live.load(Ordering::SeqCst)
    }

    pub(crate) fn peak(&self) -> usize {
        self.counters.peak.load(Ordering::SeqCst)
    }

    pub(crate) fn created(&self) -> usize {
        self.counters.created.load(Ordering::SeqCst)
    }

    pub(crate) fn roles(&self) -> Vec<PeerRole> {
        self.roles.lock().unwrap().clone()
    }

    pub(crate) fn fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_negotiation(&self, fail: bool) {
        self.fail_negotiation.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn hang_negotiation(&self, hang: bool) {
        self.hang_negotiation.store(hang, Ordering::SeqCst);
    }

    /// Имитирует событие от последнего созданного соединения
    pub(crate) fn emit_latest(&self, signal: PeerSignal) {
        let sink = self
            .sinks
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no peer connection created");
        sink.emit(signal);
    }

    /// Событие от соединения по его порядковому номеру (с нуля)
    pub(crate) fn emit_nth(&self, index: usize, signal: PeerSignal) {
        let sink = self.sinks.lock().unwrap()[index].clone();
        sink.emit(signal);
    }

    pub(crate) fn remote_track(kind: TrackKind) -> RemoteTrack {
        RemoteTrack {
            id: format!("{:?}", kind).to_lowercase(),
            stream_id: "remote".into(),
            kind,
            rtp: None,
        }
    }
}

#[async_trait]
impl PeerConnector for MockConnector {
    async fn create(
        &self,
        role: PeerRole,
        _media: Option<Arc<LocalStream>>,
        events: PeerEventSink,
    ) -> Result<Box<dyn PeerLink>, NegotiationError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(NegotiationError::MissingLocalDescription);
        }
        let live = self.counters.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.peak.fetch_max(live, Ordering::SeqCst);
        let n = self.counters.created.fetch_add(1, Ordering::SeqCst);
        self.sinks.lock().unwrap().push(events);
        self.roles.lock().unwrap().push(role);
        Ok(Box::new(MockLink {
            n,
            counters: self.counters.clone(),
            closed: AtomicBool::new(false),
            fail: self.fail_negotiation.load(Ordering::SeqCst),
            hang: self.hang_negotiation.load(Ordering::SeqCst),
        }))
    }
}

struct MockLink {
    n: usize,
    counters: Arc<Counters>,
    closed: AtomicBool,
    fail: bool,
    hang: bool,
}

impl MockLink {
    async fn step(&self) -> Result<(), NegotiationError> {
        if self.hang {
            std::future::pending::<()>().await;
        }
        if self.fail {
            return Err(NegotiationError::MissingLocalDescription);
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(NegotiationError::Closed);
        }
        Ok(())
    }

    fn release(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.counters.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl PeerLink for MockLink {
    async fn create_offer(&self) -> Result<NegotiationPayload, NegotiationError> {
        self.step().await?;
        Ok(NegotiationPayload::offer(format!("offer-{}", self.n)))
    }

    async fn accept_offer(
        &self,
        _offer: NegotiationPayload,
    ) -> Result<NegotiationPayload, NegotiationError> {
        self.step().await?;
        Ok(NegotiationPayload::answer(format!("answer-{}", self.n)))
    }

    async fn apply_answer(&self, _answer: NegotiationPayload) -> Result<(), NegotiationError> {
        self.step().await
    }

    async fn close(&self) {
        self.release();
    }
}

impl Drop for MockLink {
    fn drop(&mut self) {
        self.release();
    }
}
