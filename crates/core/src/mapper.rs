use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime};

use crate::CoreError;
use crate::event::ChangeEvent;
use crate::value::{Row, Value};

pub type TransformFn = dyn Fn(&ChangeEvent) -> Result<Row, CoreError> + Send + Sync;

/// Turns the raw value mapping of a change event into the columns written to
/// the target table. Resolved once per table; `map` must stay pure.
#[derive(Clone, Default)]
pub enum ColumnMapper {
    #[default]
    Identity,
    /// `target column -> source column`.
    Rename(BTreeMap<String, String>),
    Transform(Arc<TransformFn>),
}

impl fmt::Debug for ColumnMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identity => f.write_str("Identity"),
            Self::Rename(map) => f.debug_tuple("Rename").field(map).finish(),
            Self::Transform(_) => f.write_str("Transform(..)"),
        }
    }
}

impl ColumnMapper {
    pub fn rename<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::Rename(
            pairs
                .into_iter()
                .map(|(target, source)| (target.into(), source.into()))
                .collect(),
        )
    }

    pub fn transform<F>(f: F) -> Self
    where
        F: Fn(&ChangeEvent) -> Result<Row, CoreError> + Send + Sync + 'static,
    {
        Self::Transform(Arc::new(f))
    }

    /// Coerce values into SQLite-friendly types: booleans become 0/1 and the
    /// named timestamp columns are parsed into epoch milliseconds.
    pub fn sqlite_affinity<I, S>(timestamp_columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let timestamps: BTreeSet<String> = timestamp_columns.into_iter().map(Into::into).collect();
        Self::transform(move |event| {
            event
                .value
                .iter()
                .map(|(column, value)| {
                    let coerced = match value {
                        Value::Boolean(b) => Value::Integer(i64::from(*b)),
                        Value::Text(text) if timestamps.contains(column) => {
                            Value::Integer(parse_timestamp_millis(text)?)
                        }
                        other => other.clone(),
                    };
                    Ok::<_, CoreError>((column.clone(), coerced))
                })
                .collect()
        })
    }

    pub fn map(&self, event: &ChangeEvent) -> Result<Row, CoreError> {
        match self {
            Self::Identity => Ok(event.value.clone()),
            Self::Rename(columns) => Ok(columns
                .iter()
                .filter_map(|(target, source)| {
                    event
                        .value
                        .get(source)
                        .map(|value| (target.clone(), value.clone()))
                })
                .collect()),
            Self::Transform(f) => f(event),
        }
    }
}

/// Parse an RFC 3339 or PostgreSQL text timestamp into milliseconds since the
/// Unix epoch. Timestamps without an offset are taken as UTC.
pub fn parse_timestamp_millis(text: &str) -> Result<i64, CoreError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.timestamp_millis());
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f%#z", "%Y-%m-%dT%H:%M:%S%.f%#z"] {
        if let Ok(dt) = DateTime::parse_from_str(text, format) {
            return Ok(dt.timestamp_millis());
        }
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(dt.and_utc().timestamp_millis());
        }
    }
    Err(CoreError::InvalidValue(format!("unparseable timestamp: {text}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::row;

    fn todo_event() -> ChangeEvent {
        ChangeEvent::insert(row([
            ("id", Value::from("t1")),
            ("title", Value::from("milk")),
            ("completed", Value::from(true)),
            ("created_at", Value::from("2024-08-06T12:00:00.000Z")),
        ]))
    }

    #[test]
    fn identity_passes_value_through() {
        let event = todo_event();
        assert_eq!(ColumnMapper::Identity.map(&event).unwrap(), event.value);
    }

    #[test]
    fn rename_looks_up_source_columns() {
        let mapper = ColumnMapper::rename([("todo_id", "id"), ("label", "title"), ("ghost", "missing")]);
        let mapped = mapper.map(&todo_event()).unwrap();

        assert_eq!(mapped.len(), 2);
        assert_eq!(mapped["todo_id"], Value::from("t1"));
        assert_eq!(mapped["label"], Value::from("milk"));
        assert!(!mapped.contains_key("ghost"));
    }

    #[test]
    fn booleans_become_integers() {
        let mapper = ColumnMapper::sqlite_affinity(["created_at"]);
        let mapped = mapper.map(&todo_event()).unwrap();
        assert_eq!(mapped["completed"], Value::Integer(1));

        let event = ChangeEvent::update(row([("id", Value::from("t1")), ("completed", Value::from(false))]));
        assert_eq!(mapper.map(&event).unwrap()["completed"], Value::Integer(0));
    }

    #[test]
    fn timestamps_become_epoch_millis() {
        let mapper = ColumnMapper::sqlite_affinity(["created_at"]);
        let mapped = mapper.map(&todo_event()).unwrap();
        assert_eq!(mapped["created_at"], Value::Integer(1_722_945_600_000));
        assert_eq!(mapped["title"], Value::from("milk"));
    }

    #[test]
    fn postgres_timestamp_text_is_parsed() {
        assert_eq!(
            parse_timestamp_millis("2024-08-06 12:00:00.5+00").unwrap(),
            1_722_945_600_500
        );
        assert_eq!(parse_timestamp_millis("2024-08-06 12:00:00").unwrap(), 1_722_945_600_000);
        assert!(matches!(
            parse_timestamp_millis("yesterday"),
            Err(CoreError::InvalidValue(_))
        ));
    }

    #[test]
    fn mapping_is_repeatable() {
        let mapper = ColumnMapper::sqlite_affinity(["created_at"]);
        let event = todo_event();
        assert_eq!(mapper.map(&event).unwrap(), mapper.map(&event).unwrap());
    }
}
