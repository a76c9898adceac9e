//! Revocable commands and ordered groups of them.

use std::collections::vec_deque;
use std::collections::VecDeque;

/// A change that can be applied to a target and undone again.
///
/// `revoke` must undo exactly what the matching `execute` did, so that
/// `execute; revoke` leaves the target as it was.
pub trait RevocableCommand {
    type Target;

    fn execute(&mut self, target: &mut Self::Target);
    fn revoke(&mut self, target: &mut Self::Target);
}

/// An ordered queue of commands, executed front to back and revoked back to
/// front.
#[derive(Debug, Clone)]
pub struct RevocableCommandGroup<C> {
    commands: VecDeque<C>,
}

impl<C> RevocableCommandGroup<C> {
    pub fn new() -> Self {
        Self {
            commands: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn first(&self) -> Option<&C> {
        self.commands.front()
    }

    pub fn first_mut(&mut self) -> Option<&mut C> {
        self.commands.front_mut()
    }

    pub fn last(&self) -> Option<&C> {
        self.commands.back()
    }

    pub fn last_mut(&mut self) -> Option<&mut C> {
        self.commands.back_mut()
    }

    pub fn push(&mut self, command: C) {
        self.commands.push_back(command);
    }

    /// Move every command of `other` to the back of `self`.
    pub fn append(&mut self, other: &mut Self) {
        self.commands.append(&mut other.commands);
    }

    pub fn shift(&mut self) -> Option<C> {
        self.commands.pop_front()
    }

    pub fn pop(&mut self) -> Option<C> {
        self.commands.pop_back()
    }

    /// Remove all commands, leaving the group empty.
    pub fn take(&mut self) -> Self {
        Self {
            commands: std::mem::take(&mut self.commands),
        }
    }

    pub fn iter(&self) -> vec_deque::Iter<'_, C> {
        self.commands.iter()
    }
}

impl<C: RevocableCommand> RevocableCommand for RevocableCommandGroup<C> {
    type Target = C::Target;

    fn execute(&mut self, target: &mut C::Target) {
        for command in self.commands.iter_mut() {
            command.execute(target);
        }
    }

    fn revoke(&mut self, target: &mut C::Target) {
        for command in self.commands.iter_mut().rev() {
            command.revoke(target);
        }
    }
}

impl<C> Default for RevocableCommandGroup<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> FromIterator<C> for RevocableCommandGroup<C> {
    fn from_iter<I: IntoIterator<Item = C>>(iter: I) -> Self {
        Self {
            commands: iter.into_iter().collect(),
        }
    }
}

impl<C> IntoIterator for RevocableCommandGroup<C> {
    type Item = C;
    type IntoIter = vec_deque::IntoIter<C>;

    fn into_iter(self) -> Self::IntoIter {
        self.commands.into_iter()
    }
}

impl<'a, C> IntoIterator for &'a RevocableCommandGroup<C> {
    type Item = &'a C;
    type IntoIter = vec_deque::Iter<'a, C>;

    fn into_iter(self) -> Self::IntoIter {
        self.commands.iter()
    }
}
