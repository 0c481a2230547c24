//! Core evaluation: runtime values, entity data, the expression interpreter and the
//! deny-overrides policy evaluator.

mod entities;
pub mod evaluator;
pub mod expression;
mod value;

pub use entities::{Entities, Entity, Lookup};
pub use evaluator::{evaluate, Evaluator};
pub use expression::EvaluationError;
pub use value::{Value, ENTITY_ESCAPE};
