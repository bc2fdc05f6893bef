pub mod outcome;
pub mod record;

pub use outcome::TaskOutcome;
pub use record::IterationRecord;
