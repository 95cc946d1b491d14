mod recorder;
mod stack;
mod validator;

pub use recorder::ReplayRecorder;
pub use stack::{RecordedFrame, ReplayStack};
pub use validator::ReplayValidator;
