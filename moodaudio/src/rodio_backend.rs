//! Speaker output through rodio
//!
//! rodio's output stream cannot leave the thread that created it, so a
//! dedicated thread owns the stream and one sink per deck. Decks are thin
//! handles sending commands to that thread; the thread publishes positions
//! back and fires end-of-media signals when a sink drains.

use crate::backend::{resolve_media_path, AudioBackend, Deck, DeckId, EndSignal};
use crate::error::{AudioError, Result};
use moodstream::TrackRef;
use parking_lot::Mutex;
use rodio::{Decoder, OutputStream, Sink};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, warn};

const STATUS_POLL: Duration = Duration::from_millis(25);

enum DeckCommand {
    Open {
        path: PathBuf,
        end: EndSignal,
        reply: Sender<Result<()>>,
    },
    Play(DeckId),
    Pause(DeckId),
    Stop(DeckId),
    SetGain(DeckId, f32),
    Seek {
        deck: DeckId,
        position: Duration,
        reply: Sender<Result<()>>,
    },
}

#[derive(Debug, Clone, Copy, Default)]
struct DeckStatus {
    position: Duration,
    playing: bool,
}

type StatusMap = Arc<Mutex<HashMap<DeckId, DeckStatus>>>;

struct OutputDeck {
    sink: Sink,
    end: EndSignal,
    ended: bool,
}

/// Backend playing local files on the default output device
pub struct RodioBackend {
    tx: Sender<DeckCommand>,
    status: StatusMap,
    media_root: PathBuf,
}

impl RodioBackend {
    /// Open the default output device and start the audio thread
    pub fn new(media_root: impl Into<PathBuf>) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<DeckCommand>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();
        let status: StatusMap = Arc::new(Mutex::new(HashMap::new()));
        let thread_status = Arc::clone(&status);

        thread::Builder::new()
            .name("moodaudio-output".to_string())
            .spawn(move || {
                let (_stream, handle) = match OutputStream::try_default() {
                    Ok(pair) => {
                        let _ = ready_tx.send(Ok(()));
                        pair
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(AudioError::Device(e.to_string())));
                        return;
                    }
                };
                let mut decks: HashMap<DeckId, OutputDeck> = HashMap::new();

                loop {
                    match rx.recv_timeout(STATUS_POLL) {
                        Ok(DeckCommand::Open { path, end, reply }) => {
                            let opened = open_sink(&handle, &path).map(|sink| {
                                sink.pause();
                                decks.insert(
                                    end.deck(),
                                    OutputDeck {
                                        sink,
                                        end,
                                        ended: false,
                                    },
                                );
                            });
                            let _ = reply.send(opened);
                        }
                        Ok(DeckCommand::Play(id)) => {
                            if let Some(deck) = decks.get(&id) {
                                deck.sink.play();
                            }
                        }
                        Ok(DeckCommand::Pause(id)) => {
                            if let Some(deck) = decks.get(&id) {
                                deck.sink.pause();
                            }
                        }
                        Ok(DeckCommand::Stop(id)) => {
                            if let Some(deck) = decks.remove(&id) {
                                deck.sink.stop();
                            }
                            thread_status.lock().remove(&id);
                        }
                        Ok(DeckCommand::SetGain(id, gain)) => {
                            if let Some(deck) = decks.get(&id) {
                                deck.sink.set_volume(gain.clamp(0.0, 1.0));
                            }
                        }
                        Ok(DeckCommand::Seek {
                            deck,
                            position,
                            reply,
                        }) => {
                            let result = match decks.get(&deck) {
                                Some(d) => d
                                    .sink
                                    .try_seek(position)
                                    .map_err(|e| AudioError::Seek(e.to_string())),
                                None => Err(AudioError::BackendClosed),
                            };
                            let _ = reply.send(result);
                        }
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => break,
                    }

                    let mut status = thread_status.lock();
                    for (id, deck) in decks.iter_mut() {
                        let drained = deck.sink.empty();
                        status.insert(
                            *id,
                            DeckStatus {
                                position: deck.sink.get_pos(),
                                playing: !drained && !deck.sink.is_paused(),
                            },
                        );
                        if drained && !deck.ended {
                            deck.ended = true;
                            deck.end.notify();
                        }
                    }
                }
                debug!("Audio output thread exited");
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                tx,
                status,
                media_root: media_root.into(),
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(AudioError::BackendClosed),
        }
    }
}

fn open_sink(handle: &rodio::OutputStreamHandle, path: &Path) -> Result<Sink> {
    let file = File::open(path)
        .map_err(|_| AudioError::TrackNotFound(path.display().to_string()))?;
    let source = Decoder::new(BufReader::new(file)).map_err(|e| AudioError::Decode {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    let sink = Sink::try_new(handle).map_err(|e| AudioError::Device(e.to_string()))?;
    sink.append(source);
    Ok(sink)
}

impl AudioBackend for RodioBackend {
    fn name(&self) -> &str {
        "rodio"
    }

    fn open(&self, track: &TrackRef, end: EndSignal) -> Result<Box<dyn Deck>> {
        let path = resolve_media_path(&self.media_root, &track.file_url)
            .ok_or_else(|| AudioError::TrackNotFound(track.file_url.clone()))?;
        let id = end.deck();
        let (reply, result) = mpsc::channel();
        self.tx
            .send(DeckCommand::Open { path, end, reply })
            .map_err(|_| AudioError::BackendClosed)?;
        result.recv().map_err(|_| AudioError::BackendClosed)??;

        Ok(Box::new(RodioDeck {
            id,
            tx: self.tx.clone(),
            status: Arc::clone(&self.status),
            gain: 1.0,
        }))
    }
}

struct RodioDeck {
    id: DeckId,
    tx: Sender<DeckCommand>,
    status: StatusMap,
    gain: f32,
}

impl RodioDeck {
    fn send(&self, command: DeckCommand) {
        if self.tx.send(command).is_err() {
            error!(deck = self.id, "Audio output thread is gone");
        }
    }

    fn status(&self) -> DeckStatus {
        self.status.lock().get(&self.id).copied().unwrap_or_default()
    }
}

impl Deck for RodioDeck {
    fn play(&mut self, _user_initiated: bool) -> Result<()> {
        self.tx
            .send(DeckCommand::Play(self.id))
            .map_err(|_| AudioError::BackendClosed)
    }

    fn pause(&mut self) {
        self.send(DeckCommand::Pause(self.id));
    }

    fn stop(&mut self) {
        self.send(DeckCommand::Stop(self.id));
    }

    fn set_gain(&mut self, gain: f32) {
        self.gain = gain.clamp(0.0, 1.0);
        self.send(DeckCommand::SetGain(self.id, self.gain));
    }

    fn gain(&self) -> f32 {
        self.gain
    }

    fn position(&self) -> Duration {
        self.status().position
    }

    fn seek(&mut self, position: Duration) -> Result<()> {
        let (reply, result) = mpsc::channel();
        self.tx
            .send(DeckCommand::Seek {
                deck: self.id,
                position,
                reply,
            })
            .map_err(|_| AudioError::BackendClosed)?;
        let outcome = result.recv().map_err(|_| AudioError::BackendClosed)?;
        if outcome.is_ok() {
            if let Some(status) = self.status.lock().get_mut(&self.id) {
                status.position = position;
            }
        }
        outcome
    }

    fn is_playing(&self) -> bool {
        self.status().playing
    }
}

impl Drop for RodioDeck {
    fn drop(&mut self) {
        if self.tx.send(DeckCommand::Stop(self.id)).is_err() {
            warn!(deck = self.id, "Deck dropped after the audio thread exited");
        }
    }
}
