//! Cloud lists: an ordered sequence of scalars with positional edits.
//!
//! Indices are 0-based. Growth beyond the configured list length limit is
//! discarded rather than rejected, so a `push` onto a full list is simply
//! ineffective.

use crate::config::Limits;
use crate::data::CloudData;
use crate::update::{Completion, DataState, UpdateOperation};
use crate::value::CloudValue;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ListOperation {
    Push { value: CloudValue },
    Unshift { value: CloudValue },
    Insert { index: usize, value: CloudValue },
    Pop,
    Remove { index: usize },
    Empty,
    Replace { index: usize, value: CloudValue },
    ReplaceLast { value: CloudValue },
    CopyFrom { values: Vec<CloudValue> },
}

/// How to undo one applied [`ListOperation`].
#[derive(Debug, Clone, PartialEq)]
pub enum ListUndo {
    Nothing,
    RemoveAt(usize),
    InsertAt(usize, CloudValue),
    ReplaceAt(usize, CloudValue),
    Restore(Vec<CloudValue>),
}

impl ListOperation {
    fn values(&self) -> &[CloudValue] {
        match self {
            ListOperation::Push { value }
            | ListOperation::Unshift { value }
            | ListOperation::Insert { value, .. }
            | ListOperation::Replace { value, .. }
            | ListOperation::ReplaceLast { value } => std::slice::from_ref(value),
            ListOperation::CopyFrom { values } => values,
            ListOperation::Pop | ListOperation::Remove { .. } | ListOperation::Empty => &[],
        }
    }

    /// Index this operation would write to, or `None` if it is a no-op.
    fn replace_target(&self, list: &[CloudValue]) -> Option<usize> {
        let (index, value) = match self {
            ListOperation::Replace { index, value } => (*index, value),
            ListOperation::ReplaceLast { value } => (list.len().checked_sub(1)?, value),
            _ => return None,
        };
        (list.get(index)? != value).then_some(index)
    }
}

impl fmt::Display for ListOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListOperation::Push { value } => write!(f, "push {value}"),
            ListOperation::Unshift { value } => write!(f, "unshift {value}"),
            ListOperation::Insert { index, value } => write!(f, "insert {value} at {index}"),
            ListOperation::Pop => f.write_str("pop last item"),
            ListOperation::Remove { index } => write!(f, "remove item {index}"),
            ListOperation::Empty => f.write_str("empty"),
            ListOperation::Replace { index, value } => {
                write!(f, "replace item {index} with {value}")
            }
            ListOperation::ReplaceLast { value } => write!(f, "replace last item with {value}"),
            ListOperation::CopyFrom { values } => write!(f, "copy from {} items", values.len()),
        }
    }
}

impl UpdateOperation for ListOperation {
    type Value = Vec<CloudValue>;
    type Undo = ListUndo;

    const DATA_TYPE_NAME: &'static str = "cloud list";

    fn apply(&self, state: &mut DataState<Vec<CloudValue>>) -> ListUndo {
        if !self.would_change(state) {
            return ListUndo::Nothing;
        }
        let list = &mut state.value;
        match self {
            ListOperation::Push { value } => {
                list.push(value.clone());
                ListUndo::RemoveAt(list.len() - 1)
            }
            ListOperation::Unshift { value } => {
                list.insert(0, value.clone());
                ListUndo::RemoveAt(0)
            }
            ListOperation::Insert { index, value } => {
                list.insert(*index, value.clone());
                ListUndo::RemoveAt(*index)
            }
            ListOperation::Pop => match list.pop() {
                Some(old) => ListUndo::InsertAt(list.len(), old),
                None => ListUndo::Nothing,
            },
            ListOperation::Remove { index } => ListUndo::InsertAt(*index, list.remove(*index)),
            ListOperation::Empty => ListUndo::Restore(std::mem::take(list)),
            ListOperation::Replace { value, .. } | ListOperation::ReplaceLast { value } => {
                match self.replace_target(list) {
                    Some(index) => {
                        ListUndo::ReplaceAt(index, std::mem::replace(&mut list[index], value.clone()))
                    }
                    None => ListUndo::Nothing,
                }
            }
            ListOperation::CopyFrom { values } => {
                ListUndo::Restore(std::mem::replace(list, values.clone()))
            }
        }
    }

    fn revert(&self, state: &mut DataState<Vec<CloudValue>>, undo: ListUndo) {
        let list = &mut state.value;
        match undo {
            ListUndo::Nothing => {}
            ListUndo::RemoveAt(index) => {
                if index < list.len() {
                    list.remove(index);
                }
            }
            ListUndo::InsertAt(index, value) => {
                if index <= list.len() {
                    list.insert(index, value);
                }
            }
            ListUndo::ReplaceAt(index, value) => {
                if let Some(slot) = list.get_mut(index) {
                    *slot = value;
                }
            }
            ListUndo::Restore(values) => *list = values,
        }
    }

    fn would_change(&self, state: &DataState<Vec<CloudValue>>) -> bool {
        let list = &state.value;
        let has_room = list.len() < state.limits.list_length;
        match self {
            ListOperation::Push { .. } | ListOperation::Unshift { .. } => has_room,
            ListOperation::Insert { index, .. } => has_room && *index <= list.len(),
            ListOperation::Pop | ListOperation::Empty => !list.is_empty(),
            ListOperation::Remove { index } => *index < list.len(),
            ListOperation::Replace { .. } | ListOperation::ReplaceLast { .. } => {
                self.replace_target(list).is_some()
            }
            ListOperation::CopyFrom { values } => values != list,
        }
    }

    fn changed(&self, undo: &ListUndo) -> bool {
        !matches!(undo, ListUndo::Nothing)
    }

    fn is_legal(&self, limits: &Limits) -> bool {
        if let ListOperation::CopyFrom { values } = self {
            if values.len() > limits.list_length {
                return false;
            }
        }
        self.values().iter().all(|v| v.fits(limits.string_length))
    }

    fn replace_all(values: Vec<CloudValue>) -> Self {
        ListOperation::CopyFrom { values }
    }
}

pub type CloudList = CloudData<ListOperation>;

impl CloudData<ListOperation> {
    pub fn push(&self, value: impl Into<CloudValue>) -> Completion {
        self.submit(ListOperation::Push {
            value: value.into(),
        })
    }

    pub fn unshift(&self, value: impl Into<CloudValue>) -> Completion {
        self.submit(ListOperation::Unshift {
            value: value.into(),
        })
    }

    /// Insert `value` so that it ends up at `index`.
    pub fn add(&self, index: usize, value: impl Into<CloudValue>) -> Completion {
        self.submit(ListOperation::Insert {
            index,
            value: value.into(),
        })
    }

    pub fn pop(&self) -> Completion {
        self.submit(ListOperation::Pop)
    }

    pub fn remove(&self, index: usize) -> Completion {
        self.submit(ListOperation::Remove { index })
    }

    pub fn empty(&self) -> Completion {
        self.submit(ListOperation::Empty)
    }

    pub fn replace(&self, index: usize, value: impl Into<CloudValue>) -> Completion {
        self.submit(ListOperation::Replace {
            index,
            value: value.into(),
        })
    }

    pub fn replace_last(&self, value: impl Into<CloudValue>) -> Completion {
        self.submit(ListOperation::ReplaceLast {
            value: value.into(),
        })
    }

    /// Overwrite the whole list.
    pub fn copy_from<I, V>(&self, values: I) -> Completion
    where
        I: IntoIterator<Item = V>,
        V: Into<CloudValue>,
    {
        self.submit(ListOperation::CopyFrom {
            values: values.into_iter().map(Into::into).collect(),
        })
    }

    pub fn get(&self, index: usize) -> Option<CloudValue> {
        self.manager().read(|list| list.get(index).cloned())
    }

    pub fn len(&self) -> usize {
        self.manager().read(Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A copy of the current contents.
    pub fn copy(&self) -> Vec<CloudValue> {
        self.value()
    }

    pub fn index_of(&self, value: &CloudValue) -> Option<usize> {
        self.manager()
            .read(|list| list.iter().position(|item| item == value))
    }

    pub fn last_index_of(&self, value: &CloudValue) -> Option<usize> {
        self.manager()
            .read(|list| list.iter().rposition(|item| item == value))
    }

    pub fn contains(&self, value: &CloudValue) -> bool {
        self.index_of(value).is_some()
    }

    /// Items rendered as plain text and joined with `separator`.
    pub fn join(&self, separator: &str) -> String {
        self.manager().read(|list| {
            list.iter()
                .map(|item| match item {
                    CloudValue::Text(s) => s.clone(),
                    CloudValue::Number(n) => n.to_string(),
                })
                .collect::<Vec<_>>()
                .join(separator)
        })
    }
}
