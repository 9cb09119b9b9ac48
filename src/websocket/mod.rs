pub mod notifications;
pub mod registry;
