use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;
use crate::core::{ContextError, DataType, Result, Value};

/// Conversion between a typed Rust field and a context [`Value`].
///
/// `Null` converts to the zero value of non-optional types, which is how an
/// absent context key reads back as the declared default.
pub trait ContextValue: Sized {
    fn data_type() -> DataType;

    fn to_value(&self) -> Value;

    fn from_value(value: Value) -> Result<Self>;
}

fn mismatch(expected: DataType, value: &Value) -> ContextError {
    ContextError::TypeMismatch(format!(
        "Expected {}, found {} '{}'",
        expected,
        value.type_name(),
        value
    ))
}

impl ContextValue for i64 {
    fn data_type() -> DataType {
        DataType::Integer
    }

    fn to_value(&self) -> Value {
        Value::Integer(*self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match DataType::Integer.coerce(value)? {
            Value::Null => Ok(0),
            Value::Integer(i) => Ok(i),
            other => Err(mismatch(DataType::Integer, &other)),
        }
    }
}

impl ContextValue for i32 {
    fn data_type() -> DataType {
        DataType::Integer
    }

    fn to_value(&self) -> Value {
        Value::Integer(i64::from(*self))
    }

    fn from_value(value: Value) -> Result<Self> {
        let wide = i64::from_value(value)?;
        i32::try_from(wide).map_err(|_| {
            ContextError::TypeMismatch(format!("Integer {} is out of range for i32", wide))
        })
    }
}

impl ContextValue for f64 {
    fn data_type() -> DataType {
        DataType::Float
    }

    fn to_value(&self) -> Value {
        Value::Float(*self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match DataType::Float.coerce(value)? {
            Value::Null => Ok(0.0),
            Value::Float(f) => Ok(f),
            other => Err(mismatch(DataType::Float, &other)),
        }
    }
}

impl ContextValue for bool {
    fn data_type() -> DataType {
        DataType::Boolean
    }

    fn to_value(&self) -> Value {
        Value::Boolean(*self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match DataType::Boolean.coerce(value)? {
            Value::Null => Ok(false),
            Value::Boolean(b) => Ok(b),
            other => Err(mismatch(DataType::Boolean, &other)),
        }
    }
}

impl ContextValue for String {
    fn data_type() -> DataType {
        DataType::Text
    }

    fn to_value(&self) -> Value {
        Value::Text(self.clone())
    }

    fn from_value(value: Value) -> Result<Self> {
        match DataType::Text.coerce(value)? {
            Value::Null => Ok(String::new()),
            Value::Text(s) => Ok(s),
            other => Err(mismatch(DataType::Text, &other)),
        }
    }
}

impl ContextValue for serde_json::Value {
    fn data_type() -> DataType {
        DataType::Json
    }

    fn to_value(&self) -> Value {
        Value::Json(self.clone())
    }

    fn from_value(value: Value) -> Result<Self> {
        Ok(value.to_json())
    }
}

impl ContextValue for Uuid {
    fn data_type() -> DataType {
        DataType::Text
    }

    fn to_value(&self) -> Value {
        Value::Text(self.to_string())
    }

    fn from_value(value: Value) -> Result<Self> {
        let text = String::from_value(value)?;
        if text.is_empty() {
            return Ok(Uuid::nil());
        }
        Uuid::parse_str(&text)
            .map_err(|e| ContextError::TypeMismatch(format!("Invalid UUID '{}': {}", text, e)))
    }
}

impl ContextValue for DateTime<Utc> {
    fn data_type() -> DataType {
        DataType::Text
    }

    fn to_value(&self) -> Value {
        Value::Text(self.to_rfc3339())
    }

    fn from_value(value: Value) -> Result<Self> {
        let text = String::from_value(value)?;
        if text.is_empty() {
            return Ok(DateTime::<Utc>::UNIX_EPOCH);
        }
        DateTime::parse_from_rfc3339(&text)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| ContextError::TypeMismatch(format!("Invalid timestamp '{}': {}", text, e)))
    }
}

impl ContextValue for NaiveDate {
    fn data_type() -> DataType {
        DataType::Text
    }

    fn to_value(&self) -> Value {
        Value::Text(self.format("%Y-%m-%d").to_string())
    }

    fn from_value(value: Value) -> Result<Self> {
        let text = String::from_value(value)?;
        if text.is_empty() {
            return Ok(NaiveDate::default());
        }
        NaiveDate::parse_from_str(&text, "%Y-%m-%d")
            .map_err(|e| ContextError::TypeMismatch(format!("Invalid date '{}': {}", text, e)))
    }
}

impl<T: ContextValue> ContextValue for Option<T> {
    fn data_type() -> DataType {
        T::data_type()
    }

    fn to_value(&self) -> Value {
        match self {
            Some(value) => value.to_value(),
            None => Value::Null,
        }
    }

    fn from_value(value: Value) -> Result<Self> {
        if value.is_null() {
            return Ok(None);
        }
        T::from_value(value).map(Some)
    }
}
