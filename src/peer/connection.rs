use crate::config::Config;
use crate::error::NegotiationError;
use crate::media::{LocalStream, TrackKind};
use crate::peer::ice::rtc_config;
use crate::peer::types::{NegotiationPayload, RemoteTrack, ServerConfig};
use crate::peer::{PeerConnector, PeerEventSink, PeerLink, PeerRole, PeerSignal};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::APIBuilder;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Период ожидания восстановления после `Disconnected`
pub const GRACE_PERIOD: Duration = Duration::from_secs(10);

type GraceTask = Arc<Mutex<Option<JoinHandle<()>>>>;

pub struct WebRtcConnector {
    ice_servers: Vec<ServerConfig>,
    grace_period: Duration,
    include_loopback: bool,
}

impl WebRtcConnector {
    pub fn new(config: &Config) -> Self {
        Self {
            ice_servers: config.ice_servers.clone(),
            grace_period: GRACE_PERIOD,
            include_loopback: false,
        }
    }

    /// Собирать и loopback-кандидатов (оба пира на одной машине)
    pub fn with_loopback(mut self) -> Self {
        self.include_loopback = true;
        self
    }
}

#[async_trait]
impl PeerConnector for WebRtcConnector {
    /// создаём Peer с локальными треками; события уходят в `events`
    async fn create(
        &self,
        role: PeerRole,
        media: Option<Arc<LocalStream>>,
        events: PeerEventSink,
    ) -> Result<Box<dyn PeerLink>, NegotiationError> {
        let mut engine = MediaEngine::default();
        engine.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut engine)?;
        let mut settings = SettingEngine::default();
        settings.set_include_loopback_candidate(self.include_loopback);
        let api = APIBuilder::new()
            .with_media_engine(engine)
            .with_interceptor_registry(registry)
            .with_setting_engine(settings)
            .build();

        let pc = Arc::new(api.new_peer_connection(rtc_config(&self.ice_servers)).await?);
        debug!(generation = events.generation(), ?role, "peer connection created");

        // после close() соединение молчит
        let closed = Arc::new(AtomicBool::new(false));
        let events = {
            let closed = closed.clone();
            PeerEventSink::new(events.generation(), move |_, signal| {
                if !closed.load(Ordering::SeqCst) {
                    events.emit(signal);
                }
            })
        };

        match &media {
            Some(stream) => {
                for track in stream.tracks() {
                    let rtp: Arc<dyn TrackLocal + Send + Sync> = track.rtp();
                    pc.add_track(rtp).await?;
                }
            }
            // без своего медиа инициатор всё равно должен принять удалённое
            None if role == PeerRole::Initiator => {
                for kind in [RTPCodecType::Audio, RTPCodecType::Video] {
                    pc.add_transceiver_from_kind(
                        kind,
                        Some(RTCRtpTransceiverInit {
                            direction: RTCRtpTransceiverDirection::Recvonly,
                            send_encodings: vec![],
                        }),
                    )
                    .await?;
                }
            }
            None => {}
        }

        let track_events = events.clone();
        pc.on_track(Box::new(move |track: Arc<TrackRemote>, _, _| {
            let kind = match track.kind() {
                RTPCodecType::Audio => TrackKind::Audio,
                _ => TrackKind::Video,
            };
            info!(id = %track.id(), ?kind, "remote track received");
            track_events.emit(PeerSignal::RemoteTrack(RemoteTrack {
                id: track.id(),
                stream_id: track.stream_id(),
                kind,
                rtp: Some(track),
            }));
            Box::pin(async {})
        }));

        let grace: GraceTask = Arc::new(Mutex::new(None));
        let grace_task = grace.clone();
        let grace_period = self.grace_period;
        // делаем копию для обработчика состояний
        let pc_state = Arc::downgrade(&pc);

        pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
            debug!("Peer connection state changed to: {:?}", st);

            match st {
                RTCPeerConnectionState::Connected => {
                    // отменяем отложенный разрыв, если он был
                    if let Some(handle) = take_grace(&grace_task) {
                        info!("peer connection recovered within grace period");
                        handle.abort();
                    }
                }

                RTCPeerConnectionState::Disconnected => {
                    let mut slot = grace_task.lock().unwrap_or_else(|e| e.into_inner());
                    // уже ожидаем? – ничего не делаем
                    if slot.is_some() {
                        return Box::pin(async {});
                    }
                    warn!(
                        "peer connection disconnected, waiting {} s",
                        grace_period.as_secs()
                    );
                    let events = events.clone();
                    let pc = pc_state.clone();
                    *slot = Some(tokio::spawn(async move {
                        sleep(grace_period).await;
                        let Some(pc) = pc.upgrade() else {
                            return;
                        };
                        let state_now = pc.connection_state();
                        if state_now != RTCPeerConnectionState::Connected {
                            dump_selected_pair(&pc, "GRACE-EXPIRED").await;
                            events.emit(PeerSignal::Failed(format!(
                                "not recovered after grace period, state {:?}",
                                state_now
                            )));
                        }
                    }));
                }

                RTCPeerConnectionState::Failed => {
                    if let Some(handle) = take_grace(&grace_task) {
                        handle.abort();
                    }
                    let events = events.clone();
                    let pc = pc_state.clone();
                    return Box::pin(async move {
                        if let Some(pc) = pc.upgrade() {
                            dump_selected_pair(&pc, "FAILED").await;
                        }
                        events.emit(PeerSignal::Failed("ice transport failed".into()));
                    });
                }

                RTCPeerConnectionState::Closed => {
                    if let Some(handle) = take_grace(&grace_task) {
                        handle.abort();
                    }
                }

                _ => {}
            }
            Box::pin(async {})
        }));

        Ok(Box::new(WebRtcLink { pc, grace, closed }))
    }
}

fn take_grace(grace: &GraceTask) -> Option<JoinHandle<()>> {
    grace.lock().unwrap_or_else(|e| e.into_inner()).take()
}

struct WebRtcLink {
    pc: Arc<RTCPeerConnection>,
    grace: GraceTask,
    closed: Arc<AtomicBool>,
}

impl WebRtcLink {
    /// Ставит local description и ждёт окончания сбора кандидатов (без trickle)
    async fn finish_local(
        &self,
        desc: webrtc::peer_connection::sdp::session_description::RTCSessionDescription,
    ) -> Result<String, NegotiationError> {
        let mut gathered = self.pc.gathering_complete_promise().await;
        self.pc.set_local_description(desc).await?;
        let _ = gathered.recv().await;
        let local = self
            .pc
            .local_description()
            .await
            .ok_or(NegotiationError::MissingLocalDescription)?;
        Ok(local.sdp)
    }
}

#[async_trait]
impl PeerLink for WebRtcLink {
    async fn create_offer(&self) -> Result<NegotiationPayload, NegotiationError> {
        let offer = self.pc.create_offer(None).await?;
        let sdp = self.finish_local(offer).await?;
        Ok(NegotiationPayload::offer(sdp))
    }

    async fn accept_offer(
        &self,
        offer: NegotiationPayload,
    ) -> Result<NegotiationPayload, NegotiationError> {
        self.pc.set_remote_description(offer.into_rtc()?).await?;
        let answer = self.pc.create_answer(None).await?;
        let sdp = self.finish_local(answer).await?;
        Ok(NegotiationPayload::answer(sdp))
    }

    async fn apply_answer(&self, answer: NegotiationPayload) -> Result<(), NegotiationError> {
        self.pc.set_remote_description(answer.into_rtc()?).await?;
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(handle) = take_grace(&self.grace) {
            handle.abort();
        }
        if let Err(e) = self.pc.close().await {
            warn!("failed to close peer connection: {}", e);
        }
    }
}

/// Быстрый снимок getStats → выбранная пара
async fn dump_selected_pair(pc: &RTCPeerConnection, moment: &str) {
    let stats = pc.get_stats().await;
    for (_, v) in stats.reports {
        if let webrtc::stats::StatsReportType::CandidatePair(pair) = v {
            if pair.nominated {
                info!(
                    "STATS {moment}: {}:{} bytes={}/{} state={:?}",
                    pair.local_candidate_id,
                    pair.remote_candidate_id,
                    pair.bytes_sent,
                    pair.bytes_received,
                    pair.state
                );
            }
        }
    }
}
