//! Voice command classification.
//!
//! Recognized speech is normalized (trimmed, lower-cased) and matched by
//! substring in a fixed priority order.  Substring matching is deliberate:
//! the recognizer regularly hears "explorer" for "explore", and whole
//! phrases like "let's explore now" should still count.
//!
//! | Priority | Text contains | Command |
//! |---|---|---|
//! | 1 | `pause` | [`VoiceCommand::Pause`] |
//! | 2 | `explore` | [`VoiceCommand::Explore`] |
//! | 3 | `home` | [`VoiceCommand::Home`] |
//! | 4 | anything else | [`VoiceCommand::GoTo`] with the whole text as the object name |

use serde::Serialize;

/// A classified utterance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "command", content = "target", rename_all = "snake_case")]
pub enum VoiceCommand {
    /// Stop the active autonomous behavior.
    Pause,
    /// Start the look-around behavior.
    Explore,
    /// Drive back to where the process started.
    Home,
    /// Drive to the tracked object with this label.
    GoTo(String),
}

impl VoiceCommand {
    /// Classify recognized text.
    pub fn parse(text: &str) -> Self {
        let text = text.trim().to_lowercase();
        if text.contains("pause") {
            VoiceCommand::Pause
        } else if text.contains("explore") {
            VoiceCommand::Explore
        } else if text.contains("home") {
            VoiceCommand::Home
        } else {
            VoiceCommand::GoTo(text)
        }
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            VoiceCommand::Pause => "pause",
            VoiceCommand::Explore => "explore",
            VoiceCommand::Home => "home",
            VoiceCommand::GoTo(_) => "go_to",
        }
    }
}
