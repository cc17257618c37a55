/// Read access to question sets supplied by the content authoring side.
pub mod question_store;
/// Serialized question-set definitions.
pub mod models;
/// Storage abstraction layer shared by question sources.
pub mod storage;
