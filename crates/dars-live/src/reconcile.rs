//! Pure list patching for change-feed events.
//!
//! Lists are keyed by row id. Appended lists stay in `(created_at, id)` order;
//! prepended lists put the newest row first and leave the rest untouched.

use dars_types::feed::Record;

use crate::change::Change;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Chronological lists: new rows go at the tail.
    Append,
    /// Newest-first lists: new rows go at the head.
    Prepend,
}

/// How one consumer's list treats incoming rows.
pub struct ListPolicy<T> {
    pub placement: Placement,
    /// Rows failing this are never shown; an UPDATE that makes a row
    /// ineligible removes it.
    pub eligible: fn(&T) -> bool,
}

impl<T> Clone for ListPolicy<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ListPolicy<T> {}

impl<T> ListPolicy<T> {
    pub fn append() -> Self {
        Self {
            placement: Placement::Append,
            eligible: |_| true,
        }
    }

    pub fn prepend() -> Self {
        Self {
            placement: Placement::Prepend,
            eligible: |_| true,
        }
    }

    pub fn only(mut self, eligible: fn(&T) -> bool) -> Self {
        self.eligible = eligible;
        self
    }
}

/// Apply one change to a copy of `list`.
pub fn reconcile<T: Record>(list: &[T], change: Change<T>, policy: &ListPolicy<T>) -> Vec<T> {
    let mut next = list.to_vec();
    apply(&mut next, change, policy);
    next
}

/// Apply one change in place. Returns whether the list changed.
pub fn apply<T: Record>(list: &mut Vec<T>, change: Change<T>, policy: &ListPolicy<T>) -> bool {
    match change {
        Change::Insert(row) => {
            if !(policy.eligible)(&row) || position(list, row.id()).is_some() {
                return false;
            }
            place(list, row, policy.placement);
            true
        }
        Change::Update(row) => match position(list, row.id()) {
            Some(index) if (policy.eligible)(&row) => {
                list[index] = row;
                true
            }
            Some(index) => {
                list.remove(index);
                true
            }
            None if (policy.eligible)(&row) => {
                place(list, row, policy.placement);
                true
            }
            None => false,
        },
        Change::Delete { id } => match position(list, id) {
            Some(index) => {
                list.remove(index);
                true
            }
            None => false,
        },
    }
}

fn position<T: Record>(list: &[T], id: i64) -> Option<usize> {
    list.iter().position(|row| row.id() == id)
}

fn place<T: Record>(list: &mut Vec<T>, row: T, placement: Placement) {
    match placement {
        Placement::Prepend => list.insert(0, row),
        Placement::Append => {
            let key = row.sort_key();
            // Fast path: the live tail
            if list.last().is_none_or(|last| last.sort_key() <= key) {
                list.push(row);
            } else {
                let index = list.partition_point(|existing| existing.sort_key() <= key);
                list.insert(index, row);
            }
        }
    }
}
