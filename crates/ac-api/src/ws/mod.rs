pub mod messages;
pub mod subscriber;
