//! Boundaries to the third-party speech-to-text and language-model
//! services. Both are traits so the workflow and the tests can swap the
//! network clients out.

pub mod analysis;
pub mod transcription;

pub use analysis::{Analysis, AnalysisGateway, ChatCompletionGateway, PromptSet};
pub use transcription::{ElevenLabsGateway, Transcription, TranscriptionGateway};
