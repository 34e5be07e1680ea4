//! The subscription store: subscriptions, per-destination blocklists, and
//! their atomic JSON persistence.

pub mod persist;
pub mod store;
pub mod subscription;

pub use persist::{
    load,
    save,
};
pub use store::SubscriptionStore;
pub use subscription::{
    DestinationBlocklist,
    Subscription,
};
