use crate::models::{NewMessage, UserRow};
use crate::{Database, format_ts, parse_ts};
use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use dars_types::api::{NotificationRequest, UpdateTopicRequest};
use dars_types::feed::{ColumnType, Order, Row, SnapshotQuery, Table};
use dars_types::models::{
    Message, Notification, NotificationType, PrivateMessage, Reaction, RowId, SenderRole, Topic,
    conversation_key,
};
use rusqlite::Connection;
use rusqlite::types::{Type, Value as SqlValue};
use tracing::debug;
use uuid::Uuid;

type RowMapper = fn(&rusqlite::Row<'_>) -> rusqlite::Result<Row>;

/// Most rows one snapshot returns. Past this, the newest rows win.
pub const MAX_SNAPSHOT_ROWS: u32 = 500;

impl Database {
    // -- Users --

    /// Creates a user. The first account on a fresh database becomes the admin.
    pub fn create_user(
        &self,
        id: &str,
        username: &str,
        display_name: Option<&str>,
        password_hash: &str,
    ) -> Result<SenderRole> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let existing: i64 = tx.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
            let role = if existing == 0 {
                SenderRole::Admin
            } else {
                SenderRole::Member
            };
            tx.execute(
                "INSERT INTO users (id, username, display_name, role, password, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    id,
                    username,
                    display_name,
                    role.as_str(),
                    password_hash,
                    format_ts(Utc::now())
                ],
            )?;
            tx.commit()?;
            Ok(role)
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    /// Returns true when the stored flag actually changed.
    pub fn set_subscription_enabled(&self, user_id: &str, enabled: bool) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET subscription_enabled = ?2 WHERE id = ?1 AND subscription_enabled != ?2",
                rusqlite::params![user_id, enabled],
            )?;
            Ok(changed > 0)
        })
    }

    // -- Messages --

    pub fn insert_message(&self, new: &NewMessage<'_>) -> Result<Message> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (sender_name, sender_role, message, topic_id, user_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    new.sender_name,
                    new.sender_role,
                    new.message,
                    new.topic_id,
                    new.user_id,
                    format_ts(Utc::now())
                ],
            )?;
            let id = conn.last_insert_rowid();
            query_by_id(conn, Table::Messages, id, message_from_row)?
                .ok_or_else(|| anyhow!("message {} vanished after insert", id))
        })
    }

    pub fn get_message(&self, id: RowId) -> Result<Option<Message>> {
        self.with_conn(|conn| query_by_id(conn, Table::Messages, id, message_from_row))
    }

    /// Returns (old, new) when the message exists.
    pub fn set_message_pinned(&self, id: RowId, pinned: bool) -> Result<Option<(Message, Message)>> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let Some(old) = query_by_id(&tx, Table::Messages, id, message_from_row)? else {
                return Ok(None);
            };
            tx.execute(
                "UPDATE messages SET is_pinned = ?2 WHERE id = ?1",
                rusqlite::params![id, pinned],
            )?;
            let new = query_by_id(&tx, Table::Messages, id, message_from_row)?
                .ok_or_else(|| anyhow!("message {} vanished during update", id))?;
            tx.commit()?;
            Ok(Some((old, new)))
        })
    }

    pub fn delete_message(&self, id: RowId) -> Result<Option<Message>> {
        self.with_conn(|conn| delete_returning(conn, Table::Messages, id, message_from_row))
    }

    // -- Topics --

    pub fn create_topic(&self, title: &str, description: &str, room_id: Option<RowId>) -> Result<Topic> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO topics (title, description, room_id, created_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![title, description, room_id, format_ts(Utc::now())],
            )?;
            let id = conn.last_insert_rowid();
            query_by_id(conn, Table::Topics, id, topic_from_row)?
                .ok_or_else(|| anyhow!("topic {} vanished after insert", id))
        })
    }

    pub fn get_topic(&self, id: RowId) -> Result<Option<Topic>> {
        self.with_conn(|conn| query_by_id(conn, Table::Topics, id, topic_from_row))
    }

    pub fn update_topic(&self, id: RowId, req: &UpdateTopicRequest) -> Result<Option<(Topic, Topic)>> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let Some(old) = query_by_id(&tx, Table::Topics, id, topic_from_row)? else {
                return Ok(None);
            };
            tx.execute(
                "UPDATE topics SET
                    title = COALESCE(?2, title),
                    description = COALESCE(?3, description),
                    is_active = COALESCE(?4, is_active)
                 WHERE id = ?1",
                rusqlite::params![id, req.title, req.description, req.is_active],
            )?;
            let new = query_by_id(&tx, Table::Topics, id, topic_from_row)?
                .ok_or_else(|| anyhow!("topic {} vanished during update", id))?;
            tx.commit()?;
            Ok(Some((old, new)))
        })
    }

    pub fn delete_topic(&self, id: RowId) -> Result<Option<Topic>> {
        self.with_conn(|conn| delete_returning(conn, Table::Topics, id, topic_from_row))
    }

    // -- Notifications --

    pub fn create_notification(&self, req: &NotificationRequest) -> Result<Notification> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO notifications
                    (title, message, notification_type, color, link, priority, is_active, start_date, end_date, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                rusqlite::params![
                    req.title,
                    req.message,
                    req.notification_type.as_str(),
                    req.color,
                    req.link,
                    req.priority,
                    req.is_active,
                    req.start_date.map(format_ts),
                    req.end_date.map(format_ts),
                    format_ts(Utc::now())
                ],
            )?;
            let id = conn.last_insert_rowid();
            query_by_id(conn, Table::Notifications, id, notification_from_row)?
                .ok_or_else(|| anyhow!("notification {} vanished after insert", id))
        })
    }

    pub fn update_notification(
        &self,
        id: RowId,
        req: &NotificationRequest,
    ) -> Result<Option<(Notification, Notification)>> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let Some(old) = query_by_id(&tx, Table::Notifications, id, notification_from_row)? else {
                return Ok(None);
            };
            tx.execute(
                "UPDATE notifications SET
                    title = ?2, message = ?3, notification_type = ?4, color = ?5, link = ?6,
                    priority = ?7, is_active = ?8, start_date = ?9, end_date = ?10
                 WHERE id = ?1",
                rusqlite::params![
                    id,
                    req.title,
                    req.message,
                    req.notification_type.as_str(),
                    req.color,
                    req.link,
                    req.priority,
                    req.is_active,
                    req.start_date.map(format_ts),
                    req.end_date.map(format_ts)
                ],
            )?;
            let new = query_by_id(&tx, Table::Notifications, id, notification_from_row)?
                .ok_or_else(|| anyhow!("notification {} vanished during update", id))?;
            tx.commit()?;
            Ok(Some((old, new)))
        })
    }

    pub fn delete_notification(&self, id: RowId) -> Result<Option<Notification>> {
        self.with_conn(|conn| delete_returning(conn, Table::Notifications, id, notification_from_row))
    }

    // -- Webinar reactions --

    pub fn insert_reaction(&self, webinar_id: RowId, participant_id: &str, reaction_type: &str) -> Result<Reaction> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO webinar_reactions (webinar_id, participant_id, reaction_type, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![webinar_id, participant_id, reaction_type, format_ts(Utc::now())],
            )?;
            let id = conn.last_insert_rowid();
            query_by_id(conn, Table::WebinarReactions, id, reaction_from_row)?
                .ok_or_else(|| anyhow!("reaction {} vanished after insert", id))
        })
    }

    // -- Private messages --

    pub fn insert_private_message(
        &self,
        sender_id: Uuid,
        recipient_id: Uuid,
        sender_name: &str,
        message: &str,
    ) -> Result<PrivateMessage> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO private_messages
                    (conversation_key, sender_id, recipient_id, sender_name, message, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    conversation_key(sender_id, recipient_id),
                    sender_id.to_string(),
                    recipient_id.to_string(),
                    sender_name,
                    message,
                    format_ts(Utc::now())
                ],
            )?;
            let id = conn.last_insert_rowid();
            query_by_id(conn, Table::PrivateMessages, id, private_message_from_row)?
                .ok_or_else(|| anyhow!("private message {} vanished after insert", id))
        })
    }

    /// Marks a message read on behalf of its recipient. Returns (old, new) only
    /// when the flag flipped.
    pub fn mark_private_read(
        &self,
        id: RowId,
        reader_id: Uuid,
    ) -> Result<Option<(PrivateMessage, PrivateMessage)>> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let Some(old) = query_by_id(&tx, Table::PrivateMessages, id, private_message_from_row)? else {
                return Ok(None);
            };
            if old.recipient_id != reader_id || old.is_read {
                return Ok(None);
            }
            tx.execute("UPDATE private_messages SET is_read = 1 WHERE id = ?1", [id])?;
            let new = query_by_id(&tx, Table::PrivateMessages, id, private_message_from_row)?
                .ok_or_else(|| anyhow!("private message {} vanished during update", id))?;
            tx.commit()?;
            Ok(Some((old, new)))
        })
    }

    // -- Snapshot reads --

    /// One bulk read of a live table, filtered and ordered as requested.
    pub fn snapshot(&self, query: &SnapshotQuery) -> Result<Vec<Row>> {
        query.validate()?;
        self.with_conn(|conn| query_snapshot(conn, query))
    }
}

fn select_list(table: Table) -> String {
    table.columns().join(", ")
}

fn query_snapshot(conn: &Connection, query: &SnapshotQuery) -> Result<Vec<Row>> {
    let columns = select_list(query.table);
    let mut sql = format!("SELECT {} FROM {}", columns, query.table);
    let mut params: Vec<SqlValue> = Vec::with_capacity(query.filters.len() + 1);

    for (i, filter) in query.filters.iter().enumerate() {
        sql.push_str(if i == 0 { " WHERE " } else { " AND " });
        sql.push_str(&format!("{} {} ?{}", filter.column, filter.op.sql(), i + 1));
        params.push(bind_value(&filter.column, &filter.value)?);
    }

    let order = if query.order.is_empty() {
        query.table.natural_order()
    } else {
        query.order.clone()
    };

    let capped = match query.limit {
        Some(limit) if limit <= MAX_SNAPSHOT_ROWS => {
            sql.push_str(&order_clause(&order));
            sql.push_str(&format!(" LIMIT ?{}", params.len() + 1));
            params.push(SqlValue::Integer(i64::from(limit)));
            false
        }
        _ => {
            // Newest rows first inside, then the requested order outside.
            sql.push_str(&format!(
                " ORDER BY created_at DESC, id DESC LIMIT ?{}",
                params.len() + 1
            ));
            params.push(SqlValue::Integer(i64::from(MAX_SNAPSHOT_ROWS)));
            sql = format!("SELECT {} FROM ({}){}", columns, sql, order_clause(&order));
            true
        }
    };

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(params.iter()), row_mapper(query.table))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    if capped && rows.len() == MAX_SNAPSHOT_ROWS as usize {
        debug!("snapshot of {} truncated to the newest {} rows", query.table, MAX_SNAPSHOT_ROWS);
    }
    Ok(rows)
}

fn order_clause(order: &[Order]) -> String {
    let terms: Vec<String> = order
        .iter()
        .map(|o| format!("{} {}", o.column, if o.ascending { "ASC" } else { "DESC" }))
        .collect();
    format!(" ORDER BY {}", terms.join(", "))
}

/// Converts a filter's text value to the column's storage representation.
fn bind_value(column: &str, value: &str) -> Result<SqlValue> {
    Ok(match ColumnType::of(column) {
        ColumnType::Bool => {
            let flag = ColumnType::parse_bool(value)
                .ok_or_else(|| anyhow!("'{}' is not a boolean for column {}", value, column))?;
            SqlValue::Integer(i64::from(flag))
        }
        ColumnType::Timestamp => SqlValue::Text(format_ts(parse_ts(value)?)),
        ColumnType::Plain => match value.parse::<i64>() {
            Ok(n) => SqlValue::Integer(n),
            Err(_) => SqlValue::Text(value.to_string()),
        },
    })
}

fn row_mapper(table: Table) -> RowMapper {
    match table {
        Table::Messages => |r| message_from_row(r).map(Row::Message),
        Table::Topics => |r| topic_from_row(r).map(Row::Topic),
        Table::Notifications => |r| notification_from_row(r).map(Row::Notification),
        Table::WebinarReactions => |r| reaction_from_row(r).map(Row::Reaction),
        Table::PrivateMessages => |r| private_message_from_row(r).map(Row::PrivateMessage),
    }
}

fn query_by_id<T>(
    conn: &Connection,
    table: Table,
    id: RowId,
    map: fn(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
) -> Result<Option<T>> {
    let sql = format!("SELECT {} FROM {} WHERE id = ?1", select_list(table), table);
    conn.query_row(&sql, [id], map).optional()
}

fn delete_returning<T>(
    conn: &mut Connection,
    table: Table,
    id: RowId,
    map: fn(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
) -> Result<Option<T>> {
    let tx = conn.transaction()?;
    let Some(old) = query_by_id(&tx, table, id, map)? else {
        return Ok(None);
    };
    tx.execute(&format!("DELETE FROM {} WHERE id = ?1", table), [id])?;
    tx.commit()?;
    Ok(Some(old))
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let sql = format!(
        "SELECT id, username, display_name, role, password, subscription_enabled, created_at
         FROM users WHERE {} = ?1",
        column
    );
    conn.query_row(&sql, [value], |row| {
        Ok(UserRow {
            id: row.get(0)?,
            username: row.get(1)?,
            display_name: row.get(2)?,
            role: row.get(3)?,
            password: row.get(4)?,
            subscription_enabled: row.get(5)?,
            created_at: row.get(6)?,
        })
    })
    .optional()
}

// -- Row mappers. Column order follows `Table::columns()`. --

fn message_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        sender_name: row.get(1)?,
        sender_role: role_at(row, 2)?,
        message: row.get(3)?,
        topic_id: row.get(4)?,
        user_id: opt_uuid_at(row, 5)?,
        is_pinned: row.get(6)?,
        created_at: ts_at(row, 7)?,
    })
}

fn topic_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Topic> {
    Ok(Topic {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        room_id: row.get(3)?,
        is_active: row.get(4)?,
        created_at: ts_at(row, 5)?,
    })
}

fn notification_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Notification> {
    let kind: String = row.get(3)?;
    Ok(Notification {
        id: row.get(0)?,
        title: row.get(1)?,
        message: row.get(2)?,
        notification_type: NotificationType::parse(&kind)
            .ok_or_else(|| conversion_error(3, format!("unknown notification type '{}'", kind)))?,
        color: row.get(4)?,
        link: row.get(5)?,
        priority: row.get(6)?,
        is_active: row.get(7)?,
        start_date: opt_ts_at(row, 8)?,
        end_date: opt_ts_at(row, 9)?,
        created_at: ts_at(row, 10)?,
    })
}

fn reaction_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Reaction> {
    Ok(Reaction {
        id: row.get(0)?,
        webinar_id: row.get(1)?,
        participant_id: uuid_at(row, 2)?,
        reaction_type: row.get(3)?,
        created_at: ts_at(row, 4)?,
    })
}

fn private_message_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PrivateMessage> {
    Ok(PrivateMessage {
        id: row.get(0)?,
        conversation_key: row.get(1)?,
        sender_id: uuid_at(row, 2)?,
        recipient_id: uuid_at(row, 3)?,
        sender_name: row.get(4)?,
        message: row.get(5)?,
        is_read: row.get(6)?,
        created_at: ts_at(row, 7)?,
    })
}

fn conversion_error(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, msg.into())
}

fn ts_at(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_ts(&raw).map_err(|e| conversion_error(idx, e.to_string()))
}

fn opt_ts_at(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| parse_ts(&s).map_err(|e| conversion_error(idx, e.to_string())))
        .transpose()
}

fn uuid_at(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| conversion_error(idx, format!("corrupt uuid '{}': {}", raw, e)))
}

fn opt_uuid_at(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        s.parse()
            .map_err(|e| conversion_error(idx, format!("corrupt uuid '{}': {}", s, e)))
    })
    .transpose()
}

fn role_at(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<SenderRole> {
    let raw: String = row.get(idx)?;
    SenderRole::parse(&raw).ok_or_else(|| conversion_error(idx, format!("unknown role '{}'", raw)))
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
