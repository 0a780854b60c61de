pub mod config;
pub mod error;
pub mod types;

pub use config::SkillmatchConfig;
pub use error::{Result, SkillmatchError};
pub use types::*;
