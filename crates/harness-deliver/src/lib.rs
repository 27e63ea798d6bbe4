pub mod backend;
pub mod error;
pub mod github;
pub mod prompt;
pub mod task_queue;
pub mod types;
pub mod webhook;

pub use backend::*;
pub use error::*;
pub use github::*;
pub use prompt::*;
pub use task_queue::*;
pub use types::*;
pub use webhook::*;
