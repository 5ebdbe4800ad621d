pub mod cycle;
pub mod events;

pub use cycle::{
    CycleReport, CycleState, FetchOptions, run_fetch_cycle, run_fetch_cycle_streaming,
};
pub use events::DigestEvent;
