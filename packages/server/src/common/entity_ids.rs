//! Typed ID definitions for every persisted entity.

pub use super::id::{Id, V4, V7};

/// Marker type for `TodoList` rows.
pub struct TodoList;

/// Marker type for `TodoItem` rows.
pub struct TodoItem;

/// Marker type for `RecurringTemplate` rows.
pub struct RecurringTemplate;

/// Marker type for `RecurringTemplateException` rows.
pub struct RecurringTemplateException;

/// Marker type for `GenerationJob` rows.
pub struct GenerationJob;

/// Marker type for `DeadLetterJob` rows.
pub struct DeadLetterJob;

/// Marker type for `StatusHistory` rows.
pub struct StatusHistory;

pub type TodoListId = Id<TodoList>;
pub type TodoItemId = Id<TodoItem>;
pub type TemplateId = Id<RecurringTemplate>;
pub type ExceptionId = Id<RecurringTemplateException>;
pub type JobId = Id<GenerationJob>;
pub type DeadLetterId = Id<DeadLetterJob>;
pub type StatusHistoryId = Id<StatusHistory>;
