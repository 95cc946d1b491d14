mod observer;
mod random;
mod tick;

pub use observer::{Scene, StepObserver};
pub use random::SeededRandom;
pub use tick::{FixedTimestep, Simulation};
