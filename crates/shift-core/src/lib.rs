pub mod bulk;
pub mod config;
pub mod events;
pub mod rejection;
pub mod state;
pub mod types;
pub mod validation;
pub mod window;

pub use bulk::*;
pub use config::*;
pub use events::*;
pub use rejection::*;
pub use state::*;
pub use types::*;
pub use validation::*;
pub use window::*;
