use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};

use crate::config::SpeechConfig;

/// Text-to-speech playback of bot replies.
pub trait SpeechSink: Send + Sync {
    fn speak(&self, text: &str);
    fn stop(&self);
}

pub struct SilentSpeech;

impl SpeechSink for SilentSpeech {
    fn speak(&self, _text: &str) {}
    fn stop(&self) {}
}

/// Speaks through an external TTS program (`espeak`, `say`, ...), one
/// utterance at a time.
pub struct CommandSpeech {
    program: String,
    args: Vec<String>,
    child: Mutex<Option<Child>>,
}

impl CommandSpeech {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            child: Mutex::new(None),
        }
    }

    fn kill_current(slot: &mut Option<Child>) {
        if let Some(mut child) = slot.take() {
            if let Ok(Some(_)) = child.try_wait() {
                return;
            }
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl SpeechSink for CommandSpeech {
    fn speak(&self, text: &str) {
        let mut slot = self
            .child
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Self::kill_current(&mut slot);

        match Command::new(&self.program)
            .args(&self.args)
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(child) => *slot = Some(child),
            Err(error) => {
                tracing::warn!("Speech playback unavailable ({}): {}", self.program, error);
            }
        }
    }

    fn stop(&self) {
        let mut slot = self
            .child
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Self::kill_current(&mut slot);
    }
}

impl Drop for CommandSpeech {
    fn drop(&mut self) {
        self.stop();
    }
}

pub fn from_config(config: &SpeechConfig) -> Arc<dyn SpeechSink> {
    if config.enabled && !config.command.trim().is_empty() {
        tracing::info!("Speech playback through {}", config.command);
        Arc::new(CommandSpeech::new(config.command.clone(), config.args.clone()))
    } else {
        Arc::new(SilentSpeech)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_program_is_not_fatal() {
        let speech = CommandSpeech::new("parley-definitely-not-a-tts-binary", Vec::new());
        speech.speak("hello");
        speech.stop();
    }

    #[test]
    fn disabled_config_is_silent() {
        let sink = from_config(&SpeechConfig::default());
        sink.speak("nothing happens");
        sink.stop();
    }
}
