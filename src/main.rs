//! Терминальный клиент: текстовый чат со stdin или видеосессия с сэмплами
//! вместо настоящей камеры.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use bytes::Bytes;
use strangers::media::{LocalTrack, SampleCapture, TrackKind, AUDIO_FRAME, OPUS_SILENCE};
use strangers::session::{Author, TextSnapshot};
use strangers::{
    logger, CallSession, Config, MediaConstraints, MediaSource, Reaction, SessionContext,
    SessionMode, SignalingChannel, TextSession, WebRtcConnector,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(name = "strangers")]
#[command(about = "Anonymous one-to-one chat over a relay server")]
struct Cli {
    /// Режим чата
    #[arg(long, value_enum, default_value = "text")]
    mode: SessionMode,
    /// JSON-файл конфигурации
    #[arg(long)]
    config: Option<PathBuf>,
    /// Адрес relay (перекрывает конфигурацию и окружение)
    #[arg(long)]
    relay_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(url) = cli.relay_url {
        config.relay_url = url;
        config.validate()?;
    }
    logger::init(&config);

    let channel = SignalingChannel::websocket(&config);
    channel
        .connect()
        .await
        .with_context(|| format!("connecting to {}", config.relay_url))?;
    let ctx = SessionContext::new(channel.clone(), config.clone());

    match cli.mode {
        SessionMode::Text => run_text(&ctx).await?,
        SessionMode::Video => run_video(&ctx, &config).await?,
    }

    channel.disconnect();
    Ok(())
}

// ============================================================================
// Текстовый режим
// ============================================================================

async fn run_text(ctx: &SessionContext) -> anyhow::Result<()> {
    let session = TextSession::mount(ctx);
    let printer = tokio::spawn(print_transcript(session.subscribe()));
    let mut typing = session.subscribe_typing();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("commands: /next, /quit");
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match line.trim() {
                    "/quit" => break,
                    "/next" => session.find_new_chat()?,
                    // stdin отдаёт строку целиком, нажатий клавиш не видно: typing не шлём
                    _ => {
                        if let Err(e) = session.send_message(line).await {
                            println!("! {}", e);
                        }
                    }
                }
            }
            changed = typing.changed() => {
                if changed.is_err() {
                    break;
                }
                if typing.borrow_and_update().is_some() {
                    println!("  (stranger is typing...)");
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.unmount().await;
    printer.abort();
    Ok(())
}

async fn print_transcript(mut rx: watch::Receiver<TextSnapshot>) {
    let mut printed = 0;
    let mut state = None;
    loop {
        {
            let snap = rx.borrow_and_update();
            if state != Some(snap.state) {
                info!(state = ?snap.state, "text session");
                state = Some(snap.state);
            }
            // переписка сброшена (новый поиск)
            if snap.transcript.len() < printed {
                printed = 0;
            }
            for entry in &snap.transcript[printed..] {
                let who = match entry.author {
                    Author::Me => "you",
                    Author::Partner => "stranger",
                    Author::System => "*",
                };
                println!("[{}] {}: {}", entry.at.format("%H:%M:%S"), who, entry.text);
            }
            printed = snap.transcript.len();
        }
        if rx.changed().await.is_err() {
            break;
        }
    }
}

// ============================================================================
// Видеорежим
// ============================================================================

async fn run_video(ctx: &SessionContext, config: &Config) -> anyhow::Result<()> {
    let media = MediaSource::new(Arc::new(SampleCapture), MediaConstraints::default());
    let connector = Arc::new(WebRtcConnector::new(config));
    let session = CallSession::mount(ctx, &media, connector).await;
    let feeder = session
        .local_media()
        .and_then(|lease| lease.stream().track(TrackKind::Audio).cloned())
        .map(|track| tokio::spawn(feed_silence(track)));

    let mut snapshots = session.subscribe();
    let mut reactions = session.subscribe_reaction();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("commands: /next, /leave, /mute, /video, /react <name>, /quit");
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let mut words = line.split_whitespace();
                match (words.next(), words.next()) {
                    (Some("/quit"), _) => break,
                    (Some("/next"), _) => session.find_new_partner()?,
                    (Some("/leave"), _) => session.leave_call()?,
                    (Some("/mute"), _) => {
                        let muted = session.toggle_mute();
                        println!("microphone {}", if muted { "off" } else { "on" });
                    }
                    (Some("/video"), _) => {
                        let off = session.toggle_video();
                        println!("camera {}", if off { "off" } else { "on" });
                    }
                    (Some("/react"), Some(name)) => match name.parse::<Reaction>() {
                        Ok(reaction) => session.react(reaction),
                        Err(e) => println!("! {}", e),
                    },
                    (Some(other), _) => println!("! unknown command `{}`", other),
                    (None, _) => {}
                }
            }
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snap = snapshots.borrow_and_update().clone();
                if let Some(e) = &snap.media_error {
                    warn!("local media unavailable: {}", e);
                }
                println!(
                    "state: {:?}, partner: {}, remote tracks: {}, online: {}",
                    snap.state,
                    snap.partner.as_deref().unwrap_or("-"),
                    snap.remote_tracks.len(),
                    session.presence_count()
                );
            }
            changed = reactions.changed() => {
                if changed.is_err() {
                    break;
                }
                if let Some(reaction) = *reactions.borrow_and_update() {
                    println!("  {}", reaction.emoji());
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.unmount().await;
    if let Some(feeder) = feeder {
        feeder.abort();
    }
    Ok(())
}

/// Без настоящего микрофона шлёт тишину, чтобы у собеседника появился аудиотрек
async fn feed_silence(track: Arc<LocalTrack>) {
    let mut ticker = tokio::time::interval(AUDIO_FRAME);
    loop {
        ticker.tick().await;
        match track.write_frame(Bytes::from_static(OPUS_SILENCE), AUDIO_FRAME).await {
            Ok(_) => {}
            Err(e) => {
                debug!("audio feed stopped: {}", e);
                break;
            }
        }
    }
}
