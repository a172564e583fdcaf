#![allow(dead_code)]

use chrono::{DateTime, Utc};
use memorepo::{ETaggable, EntitySchema, FieldType, Keyed, QueryMap, Result, Serializable};

// ===== User: hash-only, global index byCountry(country, age) =====

#[derive(Debug, Clone, Default, PartialEq)]
pub struct User {
    pub id: String,
    pub email: String,
    pub age: i64,
    pub country: String,
    pub logins: i64,
    pub etag: Option<String>,
}

impl Keyed for User {
    fn describe() -> Result<EntitySchema<Self>> {
        EntitySchema::builder("User")
            .hash_key("id")
            .field("id", FieldType::Text, |u: &User| u.id.clone().into(), |u, v| {
                u.id = v.into_text()?;
                Ok(())
            })
            .field("email", FieldType::Text, |u: &User| u.email.clone().into(), |u, v| {
                u.email = v.into_text()?;
                Ok(())
            })
            .field("age", FieldType::Integer, |u: &User| u.age.into(), |u, v| {
                u.age = v.into_i64()?;
                Ok(())
            })
            .field("country", FieldType::Text, |u: &User| u.country.clone().into(), |u, v| {
                u.country = v.into_text()?;
                Ok(())
            })
            .field("logins", FieldType::Long, |u: &User| u.logins.into(), |u, v| {
                u.logins = v.into_i64()?;
                Ok(())
            })
            .global_index("byCountry", "country", "age")
            .build()
    }
}

impl Serializable for User {}

impl ETaggable for User {
    fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    fn set_etag(&mut self, etag: String) {
        self.etag = Some(etag);
    }
}

pub fn user(id: &str, age: i64, country: &str) -> User {
    User {
        id: id.to_string(),
        email: format!("{}@example.com", id),
        age,
        country: country.to_string(),
        ..Default::default()
    }
}

pub fn users() -> Vec<User> {
    vec![
        user("ada", 36, "NO"),
        user("bo", 19, "NO"),
        user("cy", 52, "SE"),
        user("di", 24, "NO"),
        user("ed", 41, "DK"),
        user("fa", 30, "NO"),
        user("gu", 67, "SE"),
    ]
}

// ===== Reading: hash + range, local index byTemperature =====

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reading {
    pub device: String,
    pub seq: i64,
    pub temperature: f64,
    pub taken_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub etag: Option<String>,
}

fn optional_date(v: memorepo::Value) -> Result<Option<DateTime<Utc>>> {
    if v.is_null() { Ok(None) } else { v.into_date().map(Some) }
}

impl Keyed for Reading {
    fn describe() -> Result<EntitySchema<Self>> {
        EntitySchema::builder("Reading")
            .hash_key("device")
            .range_key("seq")
            .field("device", FieldType::Text, |r: &Reading| r.device.clone().into(), |r, v| {
                r.device = v.into_text()?;
                Ok(())
            })
            .field("seq", FieldType::Long, |r: &Reading| r.seq.into(), |r, v| {
                r.seq = v.into_i64()?;
                Ok(())
            })
            .field("temperature", FieldType::Double, |r: &Reading| r.temperature.into(), |r, v| {
                r.temperature = v.into_f64()?;
                Ok(())
            })
            .field("takenAt", FieldType::Date, |r: &Reading| r.taken_at.into(), |r, v| {
                r.taken_at = optional_date(v)?;
                Ok(())
            })
            .field("createdAt", FieldType::Date, |r: &Reading| r.created_at.into(), |r, v| {
                r.created_at = optional_date(v)?;
                Ok(())
            })
            .field("updatedAt", FieldType::Date, |r: &Reading| r.updated_at.into(), |r, v| {
                r.updated_at = optional_date(v)?;
                Ok(())
            })
            .local_index("byTemperature", "temperature")
            .timestamps("createdAt", "updatedAt")
            .build()
    }
}

impl Serializable for Reading {}

impl ETaggable for Reading {
    fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    fn set_etag(&mut self, etag: String) {
        self.etag = Some(etag);
    }
}

pub fn reading(device: &str, seq: i64, temperature: f64) -> Reading {
    Reading {
        device: device.to_string(),
        seq,
        temperature,
        taken_at: DateTime::from_timestamp_millis(1_700_000_000_000 + seq * 3_600_000),
        ..Default::default()
    }
}

pub fn query(pairs: &[(&str, &str)]) -> QueryMap {
    let mut map = QueryMap::new();
    for (key, value) in pairs {
        map.entry(key.to_string()).or_default().push(value.to_string());
    }
    map
}
