//! Локальный захват аудио/видео.
//!
//! `MediaSource` владеет потоком захвата и раздаёт его через `MediaLease`.
//! Поток останавливается, когда отпущена последняя аренда, поэтому
//! повторные подключения в рамках одного монтирования не запрашивают
//! разрешение заново.

use crate::error::MediaError;
use crate::utils::random_id;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Кадр тишины Opus (20 мс)
pub const OPUS_SILENCE: &[u8] = &[0xf8, 0xff, 0xfe];
/// Длительность одного аудиокадра
pub const AUDIO_FRAME: Duration = Duration::from_millis(20);

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

/// Локальный трек; флаг `enabled` переключается без пересогласования
pub struct LocalTrack {
    kind: TrackKind,
    enabled: AtomicBool,
    stopped: AtomicBool,
    rtp: Arc<TrackLocalStaticSample>,
}

impl LocalTrack {
    pub fn new(kind: TrackKind, stream_id: &str) -> Self {
        let (mime, id) = match kind {
            TrackKind::Audio => (MIME_TYPE_OPUS, "audio"),
            TrackKind::Video => (MIME_TYPE_VP8, "video"),
        };
        let rtp = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: mime.to_owned(),
                ..Default::default()
            },
            id.to_owned(),
            stream_id.to_owned(),
        ));
        Self {
            kind,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
            rtp,
        }
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Инвертирует флаг, возвращает новое значение
    pub fn toggle(&self) -> bool {
        !self.enabled.fetch_xor(true, Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn rtp(&self) -> Arc<TrackLocalStaticSample> {
        self.rtp.clone()
    }

    /// Пишет кадр захвата; выключенный трек кадры отбрасывает (`Ok(false)`)
    pub async fn write_sample(&self, sample: &Sample) -> Result<bool, MediaError> {
        if self.is_stopped() {
            return Err(MediaError::Stopped);
        }
        if !self.is_enabled() {
            return Ok(false);
        }
        self.rtp
            .write_sample(sample)
            .await
            .map_err(|e| MediaError::Unavailable(e.to_string()))?;
        Ok(true)
    }

    /// Пишет сырой кадр кодека длительностью `duration`
    pub async fn write_frame(&self, data: Bytes, duration: Duration) -> Result<bool, MediaError> {
        let sample = Sample {
            data,
            duration,
            ..Default::default()
        };
        self.write_sample(&sample).await
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

pub struct LocalStream {
    id: String,
    tracks: Vec<Arc<LocalTrack>>,
}

impl LocalStream {
    pub fn new(constraints: &MediaConstraints) -> Self {
        let id = random_id();
        let mut tracks = Vec::new();
        if constraints.audio {
            tracks.push(Arc::new(LocalTrack::new(TrackKind::Audio, &id)));
        }
        if constraints.video {
            tracks.push(Arc::new(LocalTrack::new(TrackKind::Video, &id)));
        }
        Self { id, tracks }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[Arc<LocalTrack>] {
        &self.tracks
    }

    pub fn track(&self, kind: TrackKind) -> Option<&Arc<LocalTrack>> {
        self.tracks.iter().find(|t| t.kind() == kind)
    }

    pub fn is_stopped(&self) -> bool {
        self.tracks.iter().all(|t| t.is_stopped())
    }

    fn stop(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

/// Источник захвата (камера/микрофон или внешний конвейер кадров)
#[async_trait]
pub trait CaptureDevice: Send + Sync {
    async fn open(&self, constraints: &MediaConstraints) -> Result<LocalStream, MediaError>;
}

/// Треки, которые наполняет встраивающее приложение через `LocalTrack::write_sample`
#[derive(Debug, Default, Clone, Copy)]
pub struct SampleCapture;

#[async_trait]
impl CaptureDevice for SampleCapture {
    async fn open(&self, constraints: &MediaConstraints) -> Result<LocalStream, MediaError> {
        if !constraints.audio && !constraints.video {
            return Err(MediaError::Unavailable("no tracks requested".into()));
        }
        Ok(LocalStream::new(constraints))
    }
}

struct Shared {
    stream: Arc<LocalStream>,
    leases: usize,
}

type SharedSlot = Arc<Mutex<Option<Shared>>>;

pub struct MediaSource {
    device: Arc<dyn CaptureDevice>,
    constraints: MediaConstraints,
    shared: SharedSlot,
}

impl MediaSource {
    pub fn new(device: Arc<dyn CaptureDevice>, constraints: MediaConstraints) -> Self {
        Self {
            device,
            constraints,
            shared: Arc::new(Mutex::new(None)),
        }
    }

    /// Выдаёт аренду на общий поток, открывая устройство только при первой аренде
    pub async fn acquire(&self) -> Result<MediaLease, MediaError> {
        if let Some(lease) = self.lease_existing() {
            return Ok(lease);
        }

        let opened = Arc::new(self.device.open(&self.constraints).await?);
        let mut slot = self.shared.lock().unwrap_or_else(|e| e.into_inner());
        let stream = match slot.as_mut() {
            // пока ждали устройство, поток уже открыла другая сессия
            Some(existing) => {
                opened.stop();
                existing.leases += 1;
                existing.stream.clone()
            }
            None => {
                info!(stream = %opened.id(), tracks = opened.tracks().len(), "local media acquired");
                *slot = Some(Shared {
                    stream: opened.clone(),
                    leases: 1,
                });
                opened
            }
        };
        Ok(MediaLease {
            stream,
            shared: self.shared.clone(),
        })
    }

    pub fn active_leases(&self) -> usize {
        self.shared
            .lock()
            .map(|s| s.as_ref().map_or(0, |s| s.leases))
            .unwrap_or(0)
    }

    fn lease_existing(&self) -> Option<MediaLease> {
        let mut slot = self.shared.lock().unwrap_or_else(|e| e.into_inner());
        let existing = slot.as_mut()?;
        existing.leases += 1;
        debug!(leases = existing.leases, "reusing local media");
        Some(MediaLease {
            stream: existing.stream.clone(),
            shared: self.shared.clone(),
        })
    }
}

/// Аренда общего потока; последняя отпущенная аренда останавливает треки
pub struct MediaLease {
    stream: Arc<LocalStream>,
    shared: SharedSlot,
}

impl MediaLease {
    pub fn stream(&self) -> &Arc<LocalStream> {
        &self.stream
    }

    /// Возвращает `true`, если микрофон теперь выключен
    pub fn toggle_mute(&self) -> bool {
        match self.stream.track(TrackKind::Audio) {
            Some(track) => !track.toggle(),
            None => false,
        }
    }

    /// Возвращает `true`, если камера теперь выключена
    pub fn toggle_video(&self) -> bool {
        match self.stream.track(TrackKind::Video) {
            Some(track) => !track.toggle(),
            None => false,
        }
    }

    pub fn is_muted(&self) -> bool {
        self.stream
            .track(TrackKind::Audio)
            .is_some_and(|t| !t.is_enabled())
    }

    pub fn is_video_off(&self) -> bool {
        self.stream
            .track(TrackKind::Video)
            .is_some_and(|t| !t.is_enabled())
    }
}

impl Drop for MediaLease {
    fn drop(&mut self) {
        let mut slot = self.shared.lock().unwrap_or_else(|e| e.into_inner());
        let Some(shared) = slot.as_mut() else {
            return;
        };
        if !Arc::ptr_eq(&shared.stream, &self.stream) {
            warn!("dropping lease for a stream that is no longer shared");
            return;
        }
        shared.leases -= 1;
        if shared.leases == 0 {
            info!(stream = %shared.stream.id(), "last lease released, stopping local media");
            shared.stream.stop();
            *slot = None;
        }
    }
}
