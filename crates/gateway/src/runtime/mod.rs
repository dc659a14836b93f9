pub mod cancel;
pub mod mux;
pub mod turn;

pub use cancel::{CancelMap, CancelToken};
pub use mux::EventSink;
pub use turn::{run_turn, TurnHandle, TurnInput, MAX_MODEL_TURNS};
