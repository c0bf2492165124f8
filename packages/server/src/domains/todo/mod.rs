//! Ordinary CRUD on lists and items. Out of the coordinator's core budget
//! except where it intersects recurrence (detachment, template-linked
//! items); kept here because the recurrence worker writes directly into
//! these tables.

pub mod models;
pub mod store;

pub use models::{ItemStatus, StatusHistory, TodoItem, TodoList};
