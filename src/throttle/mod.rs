//! Throttle verification and visitor state management.

mod clock;
mod identity;
mod memory;
mod period;
mod record;
mod result;
mod store;
mod verifier;

pub use clock::{Clock, ManualClock, SystemClock};
pub use identity::{ClientIdentity, ClientRecognizer};
pub use memory::InMemoryVisitorStore;
pub use period::{AttemptPeriod, TimeUnit};
pub use record::VisitorRecord;
pub use result::VerificationResult;
pub use store::{configured_store, TimeoutStore, VisitorStore};
pub use verifier::{EffectiveLimits, ThrottleVerifier};
