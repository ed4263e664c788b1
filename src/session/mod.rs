//! The active practice conversation: message store, feedback throttle and
//! the controller that drives exchanges with the model.

mod controller;
mod feedback;
pub mod store;

pub use controller::{ControllerSettings, SendOptions, SessionController, SessionOptions, SessionServices};
pub use feedback::FeedbackScheduler;
pub use store::{MessageStore, SessionContext, SessionMetadata};
