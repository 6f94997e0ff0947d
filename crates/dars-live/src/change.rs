use serde_json::Value;

use dars_types::feed::{ChangeKind, ChangeRecord, Record};
use dars_types::models::RowId;

use crate::error::MalformedChange;

/// A change record validated against one table's row type.
#[derive(Debug, Clone, PartialEq)]
pub enum Change<T> {
    Insert(T),
    Update(T),
    Delete { id: RowId },
}

impl<T: Record> Change<T> {
    pub fn decode(record: &ChangeRecord) -> Result<Self, MalformedChange> {
        if record.table != T::TABLE {
            return Err(MalformedChange::WrongTable {
                expected: T::TABLE,
                got: record.table,
            });
        }

        match record.event_type {
            ChangeKind::Insert => Ok(Self::Insert(decode_row(record)?)),
            ChangeKind::Update => Ok(Self::Update(decode_row(record)?)),
            ChangeKind::Delete => {
                let old = record
                    .old
                    .as_ref()
                    .ok_or(MalformedChange::MissingRow(ChangeKind::Delete))?;
                let id = old
                    .get("id")
                    .and_then(Value::as_i64)
                    .ok_or(MalformedChange::MissingId)?;
                Ok(Self::Delete { id })
            }
        }
    }

    pub fn id(&self) -> RowId {
        match self {
            Self::Insert(row) | Self::Update(row) => row.id(),
            Self::Delete { id } => *id,
        }
    }
}

fn decode_row<T: Record>(record: &ChangeRecord) -> Result<T, MalformedChange> {
    let new = record
        .new
        .as_ref()
        .ok_or(MalformedChange::MissingRow(record.event_type))?;
    Ok(serde_json::from_value(new.clone())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use dars_types::feed::{Row, Table};
    use dars_types::models::Topic;
    use serde_json::json;

    fn topic(id: RowId) -> Topic {
        Topic {
            id,
            title: "هندسه".into(),
            description: String::new(),
            room_id: None,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn decodes_each_kind() {
        let row = Row::Topic(topic(4));
        let insert = ChangeRecord::insert(&row).unwrap();
        assert_eq!(Change::<Topic>::decode(&insert).unwrap(), Change::Insert(topic_from(&insert)));

        let delete = ChangeRecord::delete(&row).unwrap();
        assert_eq!(Change::<Topic>::decode(&delete).unwrap(), Change::Delete { id: 4 });
    }

    fn topic_from(record: &ChangeRecord) -> Topic {
        serde_json::from_value(record.new.clone().unwrap()).unwrap()
    }

    #[test]
    fn rejects_malformed_records() {
        let mut record = ChangeRecord::insert(&Row::Topic(topic(1))).unwrap();
        record.table = Table::Messages;
        assert!(matches!(
            Change::<Topic>::decode(&record),
            Err(MalformedChange::WrongTable { .. })
        ));

        let mut record = ChangeRecord::insert(&Row::Topic(topic(1))).unwrap();
        record.new = Some(json!({"id": "not-a-number"}));
        assert!(matches!(Change::<Topic>::decode(&record), Err(MalformedChange::Decode(_))));

        record.new = None;
        assert!(matches!(
            Change::<Topic>::decode(&record),
            Err(MalformedChange::MissingRow(ChangeKind::Insert))
        ));

        let mut record = ChangeRecord::delete(&Row::Topic(topic(1))).unwrap();
        record.old = Some(json!({"title": "بدون شناسه"}));
        assert!(matches!(Change::<Topic>::decode(&record), Err(MalformedChange::MissingId)));
    }
}
