//! Change-feed wire format and PostgREST-style filters.
//!
//! A change record is what the backend publishes after every committed
//! mutation. Row payloads stay loosely typed (`serde_json::Value`) on the wire
//! and are validated into [`Row`] / [`Record`] types at the subscription
//! boundary.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{Message, Notification, PrivateMessage, Reaction, RowId, Topic};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("unknown table '{0}'")]
    UnknownTable(String),
    #[error("unknown column '{column}' on table '{table}'")]
    UnknownColumn { table: Table, column: String },
    #[error("malformed filter '{0}'")]
    Malformed(String),
    #[error("unsupported operator '{0}'")]
    UnsupportedOperator(String),
    #[error("realtime filters only support equality, got '{0}'")]
    NotEquality(String),
    #[error("'{value}' is not a valid {kind} for column '{column}'")]
    BadValue {
        column: String,
        kind: &'static str,
        value: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Messages,
    Topics,
    Notifications,
    WebinarReactions,
    PrivateMessages,
}

impl Table {
    pub const ALL: [Table; 5] = [
        Self::Messages,
        Self::Topics,
        Self::Notifications,
        Self::WebinarReactions,
        Self::PrivateMessages,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Messages => "messages",
            Self::Topics => "topics",
            Self::Notifications => "notifications",
            Self::WebinarReactions => "webinar_reactions",
            Self::PrivateMessages => "private_messages",
        }
    }

    /// Columns clients may filter or order on.
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            Self::Messages => &[
                "id", "sender_name", "sender_role", "message", "topic_id", "user_id", "is_pinned",
                "created_at",
            ],
            Self::Topics => &["id", "title", "description", "room_id", "is_active", "created_at"],
            Self::Notifications => &[
                "id", "title", "message", "notification_type", "color", "link", "priority",
                "is_active", "start_date", "end_date", "created_at",
            ],
            Self::WebinarReactions => {
                &["id", "webinar_id", "participant_id", "reaction_type", "created_at"]
            }
            Self::PrivateMessages => &[
                "id", "conversation_key", "sender_id", "recipient_id", "sender_name", "message",
                "is_read", "created_at",
            ],
        }
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns().contains(&column)
    }

    /// Ordering a snapshot read uses when the caller does not ask for one.
    pub fn natural_order(&self) -> Vec<Order> {
        match self {
            Self::Notifications => vec![Order::desc("priority"), Order::desc("created_at")],
            _ => vec![Order::asc("created_at"), Order::asc("id")],
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Table {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| FilterError::UnknownTable(s.to_string()))
    }
}

/// Storage type of a filterable column, as far as filter values care.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Bool,
    Timestamp,
    Plain,
}

impl ColumnType {
    pub fn of(column: &str) -> Self {
        match column {
            "is_pinned" | "is_active" | "is_read" => Self::Bool,
            "created_at" | "start_date" | "end_date" => Self::Timestamp,
            _ => Self::Plain,
        }
    }

    pub fn parse_bool(value: &str) -> Option<bool> {
        match value {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Which change kinds a subscription wants. `*` means all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EventFilter {
    #[default]
    #[serde(rename = "*")]
    All,
    #[serde(rename = "INSERT")]
    Insert,
    #[serde(rename = "UPDATE")]
    Update,
    #[serde(rename = "DELETE")]
    Delete,
}

impl EventFilter {
    pub fn admits(&self, kind: ChangeKind) -> bool {
        matches!(
            (self, kind),
            (Self::All, _)
                | (Self::Insert, ChangeKind::Insert)
                | (Self::Update, ChangeKind::Update)
                | (Self::Delete, ChangeKind::Delete)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl FilterOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
        }
    }

    pub fn sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
        }
    }

    fn parse(s: &str) -> Result<Self, FilterError> {
        match s {
            "eq" => Ok(Self::Eq),
            "gt" => Ok(Self::Gt),
            "gte" => Ok(Self::Gte),
            "lt" => Ok(Self::Lt),
            "lte" => Ok(Self::Lte),
            other => Err(FilterError::UnsupportedOperator(other.to_string())),
        }
    }
}

/// A single column predicate, written `column=op.value` (e.g. `topic_id=eq.5`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
    pub value: String,
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl ToString) -> Self {
        Self {
            column: column.into(),
            op: FilterOp::Eq,
            value: value.to_string(),
        }
    }

    pub fn new(column: impl Into<String>, op: FilterOp, value: impl ToString) -> Self {
        Self {
            column: column.into(),
            op,
            value: value.to_string(),
        }
    }

    /// Parse a query-string pair such as (`topic_id`, `eq.5`).
    pub fn from_param(column: &str, expr: &str) -> Result<Self, FilterError> {
        let (op, value) = expr
            .split_once('.')
            .ok_or_else(|| FilterError::Malformed(format!("{column}={expr}")))?;
        if column.is_empty() {
            return Err(FilterError::Malformed(format!("{column}={expr}")));
        }
        Ok(Self {
            column: column.to_string(),
            op: FilterOp::parse(op)?,
            value: value.to_string(),
        })
    }

    pub fn check_column(&self, table: Table) -> Result<(), FilterError> {
        if table.has_column(&self.column) {
            Ok(())
        } else {
            Err(FilterError::UnknownColumn {
                table,
                column: self.column.clone(),
            })
        }
    }

    /// Rejects values the column can never hold, like `is_active=eq.maybe`.
    pub fn check_value(&self) -> Result<(), FilterError> {
        let kind = match ColumnType::of(&self.column) {
            ColumnType::Bool if ColumnType::parse_bool(&self.value).is_none() => "boolean",
            ColumnType::Timestamp if self.value.parse::<DateTime<Utc>>().is_err() => "timestamp",
            _ => return Ok(()),
        };
        Err(FilterError::BadValue {
            column: self.column.clone(),
            kind,
            value: self.value.clone(),
        })
    }

    /// Evaluate the predicate against a JSON row. A missing column never matches.
    pub fn matches(&self, row: &Value) -> bool {
        let Some(field) = row.get(&self.column) else {
            return false;
        };
        let actual = match field {
            Value::String(s) => s.clone(),
            Value::Null => "null".to_string(),
            other => other.to_string(),
        };
        let ord = compare_values(&actual, &self.value);
        match self.op {
            FilterOp::Eq => ord == Ordering::Equal,
            FilterOp::Gt => ord == Ordering::Greater,
            FilterOp::Gte => ord != Ordering::Less,
            FilterOp::Lt => ord == Ordering::Less,
            FilterOp::Lte => ord != Ordering::Greater,
        }
    }
}

/// Numbers compare numerically, timestamps chronologically, anything else as text.
fn compare_values(actual: &str, expected: &str) -> Ordering {
    if let (Ok(a), Ok(b)) = (actual.parse::<f64>(), expected.parse::<f64>()) {
        return a.partial_cmp(&b).unwrap_or(Ordering::Equal);
    }
    if let (Ok(a), Ok(b)) = (
        actual.parse::<DateTime<Utc>>(),
        expected.parse::<DateTime<Utc>>(),
    ) {
        return a.cmp(&b);
    }
    actual.cmp(expected)
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}.{}", self.column, self.op.as_str(), self.value)
    }
}

impl FromStr for Filter {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (column, expr) = s
            .split_once('=')
            .ok_or_else(|| FilterError::Malformed(s.to_string()))?;
        Self::from_param(column, expr)
    }
}

impl Serialize for Filter {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Filter {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

impl Order {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            ascending: true,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            ascending: false,
        }
    }

    /// Parse a comma separated order list such as `priority.desc,created_at.desc`.
    pub fn parse_list(s: &str) -> Result<Vec<Self>, FilterError> {
        s.split(',')
            .filter(|part| !part.is_empty())
            .map(|part| match part.split_once('.') {
                None => Ok(Self::asc(part)),
                Some((column, "asc")) => Ok(Self::asc(column)),
                Some((column, "desc")) => Ok(Self::desc(column)),
                Some(_) => Err(FilterError::Malformed(part.to_string())),
            })
            .collect()
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dir = if self.ascending { "asc" } else { "desc" };
        write!(f, "{}.{}", self.column, dir)
    }
}

/// A one-time bulk read used to seed a live list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotQuery {
    pub table: Table,
    pub filters: Vec<Filter>,
    pub order: Vec<Order>,
    pub limit: Option<u32>,
}

impl SnapshotQuery {
    pub fn new(table: Table) -> Self {
        Self {
            table,
            filters: Vec::new(),
            order: table.natural_order(),
            limit: None,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order(mut self, order: Vec<Order>) -> Self {
        self.order = order;
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn validate(&self) -> Result<(), FilterError> {
        for filter in &self.filters {
            filter.check_column(self.table)?;
            filter.check_value()?;
        }
        for order in &self.order {
            if !self.table.has_column(&order.column) {
                return Err(FilterError::UnknownColumn {
                    table: self.table,
                    column: order.column.clone(),
                });
            }
        }
        Ok(())
    }

    /// Query-string pairs for `GET /rest/{table}`.
    pub fn to_query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = self
            .filters
            .iter()
            .map(|f| (f.column.clone(), format!("{}.{}", f.op.as_str(), f.value)))
            .collect();
        if !self.order.is_empty() {
            let order: Vec<String> = self.order.iter().map(ToString::to_string).collect();
            pairs.push(("order".into(), order.join(",")));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit".into(), limit.to_string()));
        }
        pairs
    }

    pub fn from_query_pairs<'a>(
        table: Table,
        pairs: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<Self, FilterError> {
        let mut query = Self::new(table);
        for (key, value) in pairs {
            match key {
                "order" => query.order = Order::parse_list(value)?,
                "limit" => {
                    let limit = value
                        .parse()
                        .map_err(|_| FilterError::Malformed(format!("limit={value}")))?;
                    query.limit = Some(limit);
                }
                column => query.filters.push(Filter::from_param(column, value)?),
            }
        }
        query.validate()?;
        Ok(query)
    }
}

/// One row-level change as delivered on the feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub table: Table,
    #[serde(rename = "eventType")]
    pub event_type: ChangeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old: Option<Value>,
    pub commit_timestamp: DateTime<Utc>,
}

impl ChangeRecord {
    pub fn insert(row: &Row) -> serde_json::Result<Self> {
        Ok(Self {
            table: row.table(),
            event_type: ChangeKind::Insert,
            new: Some(row.to_value()?),
            old: None,
            commit_timestamp: Utc::now(),
        })
    }

    pub fn update(new: &Row, old: &Row) -> serde_json::Result<Self> {
        Ok(Self {
            table: new.table(),
            event_type: ChangeKind::Update,
            new: Some(new.to_value()?),
            old: Some(old.to_value()?),
            commit_timestamp: Utc::now(),
        })
    }

    pub fn delete(old: &Row) -> serde_json::Result<Self> {
        Ok(Self {
            table: old.table(),
            event_type: ChangeKind::Delete,
            new: None,
            old: Some(old.to_value()?),
            commit_timestamp: Utc::now(),
        })
    }

    /// The row a filter is evaluated against: `old` for deletes, `new` otherwise.
    pub fn filter_row(&self) -> Option<&Value> {
        match self.event_type {
            ChangeKind::Delete => self.old.as_ref(),
            ChangeKind::Insert | ChangeKind::Update => self.new.as_ref(),
        }
    }
}

/// Scope of one logical change-feed channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionSpec {
    pub table: Table,
    #[serde(default)]
    pub event: EventFilter,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,
}

impl SubscriptionSpec {
    pub fn table(table: Table) -> Self {
        Self {
            table,
            event: EventFilter::All,
            filter: None,
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_event(mut self, event: EventFilter) -> Self {
        self.event = event;
        self
    }

    pub fn validate(&self) -> Result<(), FilterError> {
        if let Some(filter) = &self.filter {
            filter.check_column(self.table)?;
            if filter.op != FilterOp::Eq {
                return Err(FilterError::NotEquality(filter.to_string()));
            }
            filter.check_value()?;
        }
        Ok(())
    }

    pub fn matches(&self, change: &ChangeRecord) -> bool {
        if change.table != self.table || !self.event.admits(change.event_type) {
            return false;
        }
        match &self.filter {
            None => true,
            Some(filter) => change.filter_row().is_some_and(|row| filter.matches(row)),
        }
    }
}

/// A row from any live table.
#[derive(Debug, Clone, PartialEq)]
pub enum Row {
    Message(Message),
    Topic(Topic),
    Notification(Notification),
    Reaction(Reaction),
    PrivateMessage(PrivateMessage),
}

impl Row {
    pub fn table(&self) -> Table {
        match self {
            Self::Message(_) => Table::Messages,
            Self::Topic(_) => Table::Topics,
            Self::Notification(_) => Table::Notifications,
            Self::Reaction(_) => Table::WebinarReactions,
            Self::PrivateMessage(_) => Table::PrivateMessages,
        }
    }

    pub fn id(&self) -> RowId {
        match self {
            Self::Message(r) => r.id,
            Self::Topic(r) => r.id,
            Self::Notification(r) => r.id,
            Self::Reaction(r) => r.id,
            Self::PrivateMessage(r) => r.id,
        }
    }

    pub fn to_value(&self) -> serde_json::Result<Value> {
        match self {
            Self::Message(r) => serde_json::to_value(r),
            Self::Topic(r) => serde_json::to_value(r),
            Self::Notification(r) => serde_json::to_value(r),
            Self::Reaction(r) => serde_json::to_value(r),
            Self::PrivateMessage(r) => serde_json::to_value(r),
        }
    }
}

/// A typed row that can live in a reconciled list.
pub trait Record: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    const TABLE: Table;

    fn id(&self) -> RowId;

    fn created_at(&self) -> DateTime<Utc>;

    /// Tie-break key for chronological lists.
    fn sort_key(&self) -> (DateTime<Utc>, RowId) {
        (self.created_at(), self.id())
    }

    fn into_row(self) -> Row;
}

macro_rules! impl_record {
    ($ty:ty, $table:expr, $variant:ident) => {
        impl Record for $ty {
            const TABLE: Table = $table;

            fn id(&self) -> RowId {
                self.id
            }

            fn created_at(&self) -> DateTime<Utc> {
                self.created_at
            }

            fn into_row(self) -> Row {
                Row::$variant(self)
            }
        }
    };
}

impl_record!(Message, Table::Messages, Message);
impl_record!(Topic, Table::Topics, Topic);
impl_record!(Notification, Table::Notifications, Notification);
impl_record!(Reaction, Table::WebinarReactions, Reaction);
impl_record!(PrivateMessage, Table::PrivateMessages, PrivateMessage);
