pub mod entitlement;
pub mod events;
pub mod profiles;
pub mod store;
