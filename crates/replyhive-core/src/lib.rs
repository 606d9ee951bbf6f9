pub mod classifier;
pub mod config;
pub mod error;
pub mod executor;
pub mod gate;
pub mod pipeline;
pub mod retrieval;
pub mod skill;
pub mod skills;

pub use classifier::*;
pub use config::*;
pub use error::*;
pub use executor::*;
pub use gate::*;
pub use pipeline::*;
pub use retrieval::*;
pub use skill::*;
