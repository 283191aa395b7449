mod findings;
mod frame;
mod session;
mod source;

pub use findings::{AnalysisLog, ChatMessage, ChatRole};
pub use frame::CapturedImage;
pub use session::{SessionId, SessionSummary};
pub use source::{SourceId, WindowSource};
