pub mod api;
pub mod config;
pub mod controller;
pub mod events;
pub mod history;
pub mod models;
pub mod state;
pub mod storage;

pub use api::{ApiError, ChatApi, ChatCompletionClient, KeyTest};
pub use controller::{ChatController, SendOutcome};
pub use events::{EventSender, NoticeLevel, UiEvent};
pub use history::MessageLog;
pub use models::{ConnectionStatus, Message, MessageStatus, Provider, Role, Settings, Theme};
pub use state::App;
pub use storage::Storage;
