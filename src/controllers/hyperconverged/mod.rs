pub mod client;
pub mod conditions;
mod controller;
pub mod events;
pub mod migration;
pub mod reconciler;
pub mod reconcilers;
pub mod request;
pub mod schedule;
pub mod tainted;
pub mod upgrade;

pub use controller::run;
