// Frame dispatcher: the worker-side state machine.
//
//   Uninitialized --config--> Initializing --stages ready--> Ready
//                                   |                          |
//                                   +--- stage error ---> Halted <--+
//
// Frames arriving before Ready are queued and replayed in arrival order the
// moment the stages exist, so nothing captured during model loading is lost.
// Each frame runs through every stage before the next one starts.

use std::collections::VecDeque;
use std::sync::mpsc::Sender;

use crate::config::SpeechConfig;
use crate::error::{Result, SpeechError};
use crate::speech::context::{SpeechContext, SpeechEvent};
use crate::speech::processor::SpeechProcessor;
use crate::worker::messages::WorkerEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Uninitialized,
    Initializing,
    Ready,
    /// A stage failed; frames are dropped from here on.
    Halted,
}

/// One VAD-scored frame of samples.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub vad: bool,
    pub samples: Vec<f32>,
}

pub struct FrameDispatcher {
    state: DispatcherState,
    backlog: VecDeque<Frame>,
    context: Option<SpeechContext>,
    stages: Vec<Box<dyn SpeechProcessor>>,
    events: Sender<WorkerEvent>,
    dropped: u64,
}

impl FrameDispatcher {
    pub fn new(events: Sender<WorkerEvent>) -> Self {
        Self {
            state: DispatcherState::Uninitialized,
            backlog: VecDeque::new(),
            context: None,
            stages: Vec::new(),
            events,
            dropped: 0,
        }
    }

    pub fn state(&self) -> DispatcherState {
        self.state
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    pub fn frames_processed(&self) -> u64 {
        self.context.as_ref().map_or(0, |c| c.frames_processed)
    }

    /// Moves to `Initializing`. Returns false if a config was already taken.
    pub fn begin_init(&mut self) -> bool {
        if self.state != DispatcherState::Uninitialized {
            tracing::warn!(state = ?self.state, "ignoring repeated config message");
            return false;
        }
        self.state = DispatcherState::Initializing;
        true
    }

    pub fn push_frame(&mut self, frame: Frame) {
        match self.state {
            DispatcherState::Uninitialized | DispatcherState::Initializing => {
                self.backlog.push_back(frame);
            }
            DispatcherState::Ready => self.process_frame(frame),
            DispatcherState::Halted => {
                self.dropped += 1;
                tracing::trace!(dropped = self.dropped, "dropping frame, pipeline halted");
            }
        }
    }

    /// Installs the created stages and replays the backlog, or halts with a
    /// single error event if creation failed.
    pub fn complete_init(
        &mut self,
        config: SpeechConfig,
        stages: Result<Vec<Box<dyn SpeechProcessor>>>,
    ) {
        if self.state != DispatcherState::Initializing {
            tracing::warn!(state = ?self.state, "stages ready outside initialization");
            return;
        }
        let stages = match stages {
            Ok(stages) => stages,
            Err(e) => {
                tracing::error!("stage initialization failed: {}", e);
                self.halt(e);
                return;
            }
        };

        let events = self.events.clone();
        self.context = Some(SpeechContext::new(
            config,
            Box::new(move |event: &SpeechEvent| {
                let _ = events.send(WorkerEvent::Event(event.clone()));
            }),
        ));
        self.stages = stages;
        self.state = DispatcherState::Ready;
        let _ = self.events.send(WorkerEvent::initialized());
        tracing::info!(
            stages = self.stages.len(),
            backlog = self.backlog.len(),
            "speech pipeline initialized"
        );

        while let Some(frame) = self.backlog.pop_front() {
            if self.state != DispatcherState::Ready {
                break;
            }
            self.process_frame(frame);
        }
    }

    fn process_frame(&mut self, frame: Frame) {
        let Some(context) = self.context.as_mut() else {
            return;
        };
        context.is_speech = frame.vad;
        let result = self
            .stages
            .iter_mut()
            .try_for_each(|stage| stage.process(context, &frame.samples));
        context.frames_processed += 1;

        if let Err(e) = result {
            tracing::error!(frame = context.frames_processed, "stage failed: {}", e);
            self.halt(e);
        }
    }

    fn halt(&mut self, error: SpeechError) {
        let event = SpeechEvent::error(error.to_string());
        match self.context.as_mut() {
            Some(context) => context.dispatch(event),
            None => {
                let _ = self.events.send(WorkerEvent::Event(event));
            }
        }
        self.backlog.clear();
        self.state = DispatcherState::Halted;
    }
}
