// Speech worker: a dedicated thread that owns the frame dispatcher.
//
// The host talks to it only through a mailbox channel. Stage creation (model
// loading) runs on a short-lived helper thread and reports back through the
// same mailbox, so audio frames keep queueing while models load.

pub mod dispatcher;
pub mod messages;

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::config::SpeechConfig;
use crate::error::{Result, SpeechError};
use crate::speech::models::ModelLoader;
use crate::speech::processor::{create_stages, SpeechProcessor};

use dispatcher::{Frame, FrameDispatcher};
use messages::{WorkerConfig, WorkerEvent, WorkerMessage};

enum Mailbox {
    Message(WorkerMessage),
    StagesReady(SpeechConfig, Result<Vec<Box<dyn SpeechProcessor>>>),
    Terminate,
}

/// Host-side handle to a running worker. Dropping it terminates the worker.
pub struct WorkerHandle {
    mailbox: Sender<Mailbox>,
    thread: Option<JoinHandle<()>>,
}

/// Starts a worker thread. Outbound messages are delivered to `events`.
pub fn spawn_worker(
    loader: Arc<dyn ModelLoader>,
    events: Sender<WorkerEvent>,
) -> Result<WorkerHandle> {
    let (tx, rx) = mpsc::channel();
    let init_tx = tx.clone();
    let thread = std::thread::Builder::new()
        .name("speech-worker".into())
        .spawn(move || run_worker(rx, init_tx, loader, events))?;
    Ok(WorkerHandle {
        mailbox: tx,
        thread: Some(thread),
    })
}

impl WorkerHandle {
    pub fn post(&self, message: WorkerMessage) -> Result<()> {
        self.mailbox
            .send(Mailbox::Message(message))
            .map_err(|_| SpeechError::WorkerTerminated)
    }

    /// Stops the worker and waits for it to exit. Messages still queued
    /// behind the stop request are discarded.
    pub fn terminate(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        let _ = self.mailbox.send(Mailbox::Terminate);
        thread.join().map_err(|_| SpeechError::WorkerTerminated)
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::error!("speech worker exited abnormally: {}", e);
        }
    }
}

fn run_worker(
    mailbox: Receiver<Mailbox>,
    init_tx: Sender<Mailbox>,
    loader: Arc<dyn ModelLoader>,
    events: Sender<WorkerEvent>,
) {
    tracing::info!("speech worker started");
    let mut dispatcher = FrameDispatcher::new(events);

    while let Ok(message) = mailbox.recv() {
        match message {
            Mailbox::Message(WorkerMessage::Config { config }) => {
                if dispatcher.begin_init() {
                    if let Err((speech_config, e)) =
                        start_init(config, loader.clone(), init_tx.clone())
                    {
                        dispatcher.complete_init(speech_config, Err(e));
                    }
                }
            }
            Mailbox::Message(WorkerMessage::Audio { audio, vad }) => {
                dispatcher.push_frame(Frame {
                    vad,
                    samples: audio,
                });
            }
            Mailbox::StagesReady(speech_config, stages) => {
                dispatcher.complete_init(speech_config, stages);
            }
            Mailbox::Terminate => break,
        }
    }

    tracing::info!(
        frames = dispatcher.frames_processed(),
        pending = dispatcher.backlog_len(),
        "speech worker stopped"
    );
}

/// Creates the stages on a helper thread, which posts them back when done.
fn start_init(
    config: WorkerConfig,
    loader: Arc<dyn ModelLoader>,
    reply: Sender<Mailbox>,
) -> std::result::Result<(), (SpeechConfig, SpeechError)> {
    let fallback = config.speech_config.clone();
    tracing::info!(stages = ?config.stages, "initializing stages");
    std::thread::Builder::new()
        .name("stage-init".into())
        .spawn(move || {
            let stages = create_stages(&config.stages, &config.speech_config, loader.as_ref());
            let _ = reply.send(Mailbox::StagesReady(config.speech_config, stages));
        })
        .map(|_| ())
        .map_err(|e| (fallback, SpeechError::Io(e)))
}
