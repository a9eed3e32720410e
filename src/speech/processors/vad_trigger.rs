use crate::error::Result;
use crate::speech::context::{SpeechContext, SpeechEvent};
use crate::speech::processor::SpeechProcessor;

/// Activates the pipeline while the VAD reports speech.
#[derive(Debug, Default)]
pub struct VadTrigger;

impl VadTrigger {
    pub fn new() -> Self {
        Self
    }
}

impl SpeechProcessor for VadTrigger {
    fn process(&mut self, context: &mut SpeechContext, _frame: &[f32]) -> Result<()> {
        if context.is_speech != context.is_active {
            let event = if context.is_speech {
                SpeechEvent::activate()
            } else {
                SpeechEvent::deactivate()
            };
            context.dispatch(event);
        }
        context.is_active = context.is_speech;
        Ok(())
    }

    fn reset(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SpeechConfig;
    use crate::speech::context::EventType;
    use std::sync::mpsc;

    #[test]
    fn test_edges_dispatch_once() {
        let (tx, rx) = mpsc::channel();
        let mut context = SpeechContext::new(
            SpeechConfig::default(),
            Box::new(move |event| {
                let _ = tx.send(event.event_type);
            }),
        );
        let mut trigger = VadTrigger::new();

        for speech in [false, true, true, true, false, false, true] {
            context.is_speech = speech;
            trigger.process(&mut context, &[]).unwrap();
            assert_eq!(context.is_active, speech);
        }

        let events: Vec<EventType> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                EventType::Activate,
                EventType::Deactivate,
                EventType::Activate
            ]
        );
    }
}
