pub mod broadcast;

pub use broadcast::{EventBroadcaster, Subscription};
