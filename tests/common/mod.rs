#![allow(dead_code)]

pub mod entities;
pub mod mocks;
pub mod repositories;

pub use entities::{Order, User};
pub use mocks::{MockSession, MockSessionFactory, RecordingObserver, ScriptedTransactionManager};
pub use repositories::{OrderRepository, UserRepository};
