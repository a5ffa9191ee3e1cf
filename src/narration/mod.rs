pub mod engine;
pub mod memory;
pub mod phrases;
pub mod prefs;
pub mod queue;

pub use engine::{CommandSpeech, LogSpeech, SpeechDone, SpeechEngine, Utterance};
pub use memory::{NarrationMemory, ERROR_COOLDOWN};
pub use phrases::{match_error, Cue};
pub use prefs::VoicePreferences;
pub use queue::NarrationQueue;
