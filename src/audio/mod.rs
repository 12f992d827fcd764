pub mod beep;

use std::sync::{
    mpsc::{self, Sender},
    Arc, Mutex,
};
use std::thread;

use anyhow::{anyhow, Result};
use log::warn;

/// Audible confirmation played when a code is decoded.
///
/// Best effort: implementations never fail the scan.
pub trait ScanCue: Send + Sync {
    fn play(&self);
}

/// Cue that does nothing, for headless runs and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentCue;

impl ScanCue for SilentCue {
    fn play(&self) {}
}

enum CueCommand {
    Beep,
}

/// Plays the scanner beep on a dedicated audio thread.
///
/// The output stream is not `Send`, so it lives on its own thread and is
/// driven through a command channel. Without the `sound` feature the thread
/// only logs.
pub struct BeepCue {
    tx: Arc<Mutex<Option<Sender<CueCommand>>>>,
}

impl Default for BeepCue {
    fn default() -> Self {
        Self::new()
    }
}

impl BeepCue {
    pub fn new() -> Self {
        Self {
            tx: Arc::new(Mutex::new(None)),
        }
    }

    fn ensure_thread(&self) -> Result<Sender<CueCommand>> {
        let mut guard = self
            .tx
            .lock()
            .map_err(|_| anyhow!("audio cue state poisoned"))?;
        if let Some(tx) = guard.as_ref() {
            return Ok(tx.clone());
        }

        let (tx, rx) = mpsc::channel::<CueCommand>();

        thread::Builder::new()
            .name("scan-cue".to_string())
            .spawn(move || {
                #[cfg(feature = "sound")]
                let mut output: Option<(rodio::OutputStream, rodio::Sink)> = None;

                while let Ok(cmd) = rx.recv() {
                    match cmd {
                        CueCommand::Beep => {
                            #[cfg(feature = "sound")]
                            {
                                if output.is_none() {
                                    match open_output() {
                                        Ok(opened) => output = Some(opened),
                                        Err(err) => {
                                            warn!("Failed to play sound: {err:#}");
                                            continue;
                                        }
                                    }
                                }
                                if let Some((_, sink)) = output.as_ref() {
                                    sink.append(beep::Beep::scanner());
                                }
                            }

                            #[cfg(not(feature = "sound"))]
                            log::debug!("scan cue (sound disabled)");
                        }
                    }
                }
            })
            .map_err(|e| anyhow!("failed to spawn audio thread: {e}"))?;

        *guard = Some(tx.clone());
        Ok(tx)
    }
}

#[cfg(feature = "sound")]
fn open_output() -> Result<(rodio::OutputStream, rodio::Sink)> {
    let (stream, handle) = rodio::OutputStream::try_default()
        .map_err(|e| anyhow!("Failed to create audio output stream: {e}"))?;
    let sink =
        rodio::Sink::try_new(&handle).map_err(|e| anyhow!("Failed to create audio sink: {e}"))?;
    Ok((stream, sink))
}

impl ScanCue for BeepCue {
    fn play(&self) {
        let sent = self
            .ensure_thread()
            .and_then(|tx| tx.send(CueCommand::Beep).map_err(|e| anyhow!(e.to_string())));
        if let Err(err) = sent {
            warn!("Failed to play sound: {err:#}");
        }
    }
}
