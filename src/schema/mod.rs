//! Schema reflection cache
//!
//! Every entity type describes itself once through [`Keyed::describe`]: key
//! layout, secondary indexes and a typed getter/setter per field. The
//! resulting [`EntitySchema`] is memoized process-wide by [`schema_of`] and
//! gives the engines "field name → typed value" access without runtime
//! reflection.

pub mod descriptor;
pub mod model;
pub mod registry;

pub use descriptor::{
    EntitySchema, EntitySchemaBuilder, FieldDescriptor, IndexDefinition, IndexKind, KeyShape,
};
pub use model::{ETAG_ATTRIBUTE, ETaggable, Entity, Keyed, Serializable};
pub use registry::{registered_schema_count, schema_of};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{FieldType, RepositoryError, Result, Value};
    use chrono::{DateTime, Utc};

    #[derive(Debug, Clone, Default)]
    struct Audit {
        created_at: Option<DateTime<Utc>>,
        updated_at: Option<DateTime<Utc>>,
    }

    impl Keyed for Audit {
        fn describe() -> Result<EntitySchema<Self>> {
            EntitySchema::builder("Audit")
                .hash_key("createdAt")
                .field("createdAt", FieldType::Date, |a: &Audit| a.created_at.into(), |a, v| {
                    a.created_at = if v.is_null() { None } else { Some(v.into_date()?) };
                    Ok(())
                })
                .field("updatedAt", FieldType::Date, |a: &Audit| a.updated_at.into(), |a, v| {
                    a.updated_at = if v.is_null() { None } else { Some(v.into_date()?) };
                    Ok(())
                })
                .timestamps("createdAt", "updatedAt")
                .build()
        }
    }

    #[derive(Debug, Clone, Default)]
    struct Order {
        customer: String,
        number: i64,
        total: f64,
        audit: Audit,
        etag: Option<String>,
    }

    impl Keyed for Order {
        fn describe() -> Result<EntitySchema<Self>> {
            let audit = Audit::describe()?;
            EntitySchema::builder("Order")
                .hash_key("customer")
                .range_key("number")
                .field("customer", FieldType::Text, |o: &Order| o.customer.clone().into(), |o, v| {
                    o.customer = v.into_text()?;
                    Ok(())
                })
                .field("number", FieldType::Long, |o: &Order| o.number.into(), |o, v| {
                    o.number = v.into_i64()?;
                    Ok(())
                })
                .field("total", FieldType::Double, |o: &Order| o.total.into(), |o, v| {
                    o.total = v.into_f64()?;
                    Ok(())
                })
                .embed(&audit, audit_of, audit_of_mut)
                .local_index("byTotal", "total")
                .global_index("byCreated", "createdAt", "number")
                .pagination_index("byTotal")
                .build()
        }
    }

    fn audit_of(o: &Order) -> &Audit {
        &o.audit
    }

    fn audit_of_mut(o: &mut Order) -> &mut Audit {
        &mut o.audit
    }

    impl Serializable for Order {}

    impl ETaggable for Order {
        fn etag(&self) -> Option<&str> {
            self.etag.as_deref()
        }

        fn set_etag(&mut self, etag: String) {
            self.etag = Some(etag);
        }
    }

    fn order() -> Order {
        Order {
            customer: "alice".into(),
            number: 7,
            total: 12.5,
            ..Default::default()
        }
    }

    #[test]
    fn test_schema_is_memoized() {
        let first = schema_of::<Order>().unwrap();
        let second = Order::schema().unwrap();
        assert!(std::sync::Arc::ptr_eq(&first, &second));
        assert!(registered_schema_count().unwrap() >= 1);
    }

    #[test]
    fn test_typed_access_by_name() {
        let schema = Order::schema().unwrap();
        let mut o = order();

        assert_eq!(schema.get(&o, "total").unwrap(), Value::Float(12.5));
        schema.set(&mut o, "number", Value::from("9")).unwrap();
        assert_eq!(o.number, 9);

        let err = schema.get(&o, "missing").unwrap_err();
        assert!(matches!(err, RepositoryError::FieldNotFound { .. }));
    }

    #[test]
    fn test_embedded_fields_and_timestamps_are_flattened() {
        let schema = Order::schema().unwrap();
        assert!(schema.has_field("createdAt"));
        assert_eq!(schema.created_field(), Some("createdAt"));

        let mut o = order();
        schema
            .set(&mut o, "createdAt", Value::from("1700000000000"))
            .unwrap();
        assert_eq!(o.audit.created_at.map(|d| d.timestamp_millis()), Some(1_700_000_000_000));
    }

    #[test]
    fn test_key_shapes() {
        let schema = Order::schema().unwrap();
        let local = schema.key_shape(Some("byTotal")).unwrap();
        assert_eq!(local.hash_field, "customer");
        assert_eq!(local.range_field.as_deref(), Some("total"));
        assert!(!local.global);

        let global = schema.key_shape(Some("byCreated")).unwrap();
        assert_eq!(global.hash_field, "createdAt");
        assert!(global.global);

        assert_eq!(schema.default_shape(), local);
        assert_eq!(schema.index_for_range_field("number").unwrap().name, "byCreated");
        assert!(schema.key_shape(Some("nope")).is_err());
    }

    #[test]
    fn test_item_round_trip_skips_unknown_attributes() {
        let schema = Order::schema().unwrap();
        let mut item = schema.to_item(&order());
        assert!(!item.contains_key("createdAt"));
        item.insert("etag".into(), Value::from("abc"));

        let back = schema.from_item(&item).unwrap();
        assert_eq!(back.customer, "alice");
        assert_eq!(back.number, 7);
    }

    #[test]
    fn test_etag_ignores_the_etag_itself() {
        let mut a = order();
        let first = a.generate_etag().unwrap();
        let second = a.generate_etag().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 16);

        a.total = 13.0;
        assert_ne!(a.generate_etag().unwrap(), first);
        assert_eq!(a.etag_key_identifier().unwrap(), "Order_alice/7");
    }

    #[test]
    fn test_build_rejects_undeclared_key() {
        let result = EntitySchema::<Order>::builder("Broken")
            .hash_key("id")
            .build();
        assert!(matches!(result, Err(RepositoryError::IllegalArgument(_))));
    }
}
