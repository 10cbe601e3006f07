pub mod advisor;
pub mod correction;
pub mod cursor_nav;
pub mod device;
pub mod error;
pub mod focus;
pub mod keyboard;
pub mod markup;
pub mod model;
pub mod pacing;
pub mod session;
pub mod sim;
pub mod synth;
pub mod verify;

pub use error::{EngineError, SynthesisError};
pub use session::{run, Session};
