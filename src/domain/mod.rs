//! 领域事件

pub mod events;

pub use events::DomainEvent;
