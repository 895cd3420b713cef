mod correlation;
mod scheduler;
mod substrate;

pub use correlation::*;
pub use scheduler::*;
pub use substrate::*;
