use log::debug;

use super::context::EngineContext;
use super::writer::Writer;
use crate::core::{FieldType, RepositoryError, Result, Value};
use crate::schema::Entity;

/// Counter-style updates on numeric fields, run through the optimistic
/// update path.
pub struct Updater<E: Entity> {
    ctx: EngineContext<E>,
    writer: Writer<E>,
}

impl<E: Entity> Updater<E> {
    pub fn new(ctx: EngineContext<E>) -> Self {
        Self {
            writer: Writer::new(ctx.clone()),
            ctx,
        }
    }

    pub async fn increment_field(&self, record: E, field: &str, amount: f64) -> Result<E> {
        self.adjust(record, field, amount).await
    }

    /// Never goes below zero.
    pub async fn decrement_field(&self, record: E, field: &str, amount: f64) -> Result<E> {
        self.adjust(record, field, -amount).await
    }

    async fn adjust(&self, record: E, field: &str, delta: f64) -> Result<E> {
        let field_type = self.ctx.schema.field_type(field)?;
        if !field_type.is_numeric() {
            return Err(RepositoryError::IllegalArgument(format!(
                "'{}' is not a numeric field and cannot be incremented or decremented",
                field
            )));
        }
        debug!("Adjusting field='{}' by {}", field, delta);

        let schema = self.ctx.schema.clone();
        let field = field.to_string();
        self.writer
            .update(record, move |entity| {
                let current = schema.get(entity, &field)?;
                let next = adjusted(field_type, &current, delta);
                schema.set(entity, &field, next)
            })
            .await
    }
}

fn adjusted(field_type: FieldType, current: &Value, delta: f64) -> Value {
    if field_type.is_integral() {
        let current = current.as_i64().unwrap_or(0);
        let next = current.saturating_add(delta.trunc() as i64);
        Value::Integer(if delta < 0.0 { next.max(0) } else { next })
    } else {
        let next = current.as_f64().unwrap_or(0.0) + delta;
        Value::Float(if delta < 0.0 { next.max(0.0) } else { next })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decrement_floors_at_zero() {
        assert_eq!(adjusted(FieldType::Integer, &Value::Integer(3), -5.0), Value::Integer(0));
        assert_eq!(adjusted(FieldType::Double, &Value::Float(1.5), -2.0), Value::Float(0.0));
    }

    #[test]
    fn test_increment_from_missing_value() {
        assert_eq!(adjusted(FieldType::Long, &Value::Null, 2.0), Value::Integer(2));
        assert_eq!(adjusted(FieldType::Float, &Value::Float(0.25), 0.5), Value::Float(0.75));
    }
}
