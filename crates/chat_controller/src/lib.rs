//! Chat turn orchestration on top of the engine client and session store.
//!
//! [`SessionReducer`] folds one turn's protocol events into an assistant
//! message; [`ChatController`] owns the active session and drives turns through
//! a [`ChatTransport`], persisting after every turn.

mod commands;
mod controller;
mod error;
mod preview;
mod reducer;
mod settings;
mod title;
mod transport;

pub use commands::{parse_slash_command, SlashCommand, HELP_TEXT};
pub use controller::{ChatController, Persistence, TurnCanceller, TurnObserver};
pub use error::ControllerError;
pub use preview::{arguments_preview, result_preview, truncate_chars};
pub use reducer::{SessionReducer, TurnOutcome, TurnStatus};
pub use settings::{ChatSettings, DEFAULT_MAX_TOKENS, DEFAULT_MODEL, DEFAULT_TEMPERATURE};
pub use title::{provisional_title, sanitize_title};
pub use transport::{ChatTransport, EventSink, TurnInterruption};
