//! Lexical scopes and local slot allocation.
//!
//! Slots are numbered densely from 1 in declaration order. Closing a scope
//! releases its slots so sibling scopes reuse them; the high-water mark is what
//! the function prologue reserves.

use crate::error::{CodegenErrorType, InternalError};
use alloc::{string::String, vec::Vec};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScopeKind {
    /// The outermost scope of a function, holding its parameters.
    Function,
    Block,
    /// Loop headers and bodies.
    Loop,
    /// The scope of a catch clause, holding the caught value.
    Catch,
}

impl ScopeKind {
    /// Whether a name may be declared again in the same scope, the new local
    /// hiding the old one. Only plain blocks allow it; the scopes that bind
    /// parameters, loop variables or the caught value do not.
    pub const fn allows_shadowing(self) -> bool {
        matches!(self, Self::Block)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Local {
    pub name: String,
    pub slot: u16,
    pub mutable: bool,
    /// Whether a nested closure has captured this local.
    pub captured: bool,
}

#[derive(Clone, Debug)]
struct Scope {
    kind: ScopeKind,
    first_slot: usize,
    locals: Vec<Local>,
}

/// Slots released at once, as encoded in `LEAVE_SCOPE last count`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotRange {
    pub last: u16,
    pub count: u16,
}

#[derive(Debug)]
pub struct ScopeStack {
    scopes: Vec<Scope>,
    next_slot: usize,
    high_water_mark: usize,
}

impl Default for ScopeStack {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeStack {
    pub const fn new() -> Self {
        Self {
            scopes: Vec::new(),
            next_slot: 1,
            high_water_mark: 0,
        }
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    pub fn open_scope(&mut self, kind: ScopeKind) {
        self.scopes.push(Scope {
            kind,
            first_slot: self.next_slot,
            locals: Vec::new(),
        });
    }

    pub fn declare_local(&mut self, name: &str, mutable: bool) -> Result<u16, CodegenErrorType> {
        let slot = u16::try_from(self.next_slot).map_err(|_| CodegenErrorType::TooManyLocals)?;
        let scope = self
            .scopes
            .last_mut()
            .ok_or(CodegenErrorType::Internal(InternalError::ScopeUnderflow))?;
        if !scope.kind.allows_shadowing() && scope.locals.iter().any(|local| local.name == name) {
            return Err(CodegenErrorType::Redeclaration(name.into()));
        }
        scope.locals.push(Local {
            name: name.into(),
            slot,
            mutable,
            captured: false,
        });
        self.next_slot += 1;
        self.high_water_mark = self.high_water_mark.max(usize::from(slot));
        Ok(slot)
    }

    /// The innermost visible local called `name`.
    pub fn resolve_local(&self, name: &str) -> Option<&Local> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.locals.iter().rev().find(|local| local.name == name))
    }

    pub fn resolve_local_mut(&mut self, name: &str) -> Option<&mut Local> {
        self.scopes.iter_mut().rev().find_map(|scope| {
            scope
                .locals
                .iter_mut()
                .rev()
                .find(|local| local.name == name)
        })
    }

    /// Pops the innermost scope, returning the slots it held.
    pub fn close_scope(&mut self) -> Result<Option<SlotRange>, InternalError> {
        let depth = self.depth().checked_sub(1).ok_or(InternalError::ScopeUnderflow)?;
        let released = self.slots_above(depth);
        if let Some(scope) = self.scopes.pop() {
            self.next_slot = scope.first_slot;
        }
        Ok(released)
    }

    /// Slots held by the scopes deeper than `depth`, the ones a jump out to a
    /// construct at that depth leaves behind.
    pub fn slots_above(&self, depth: usize) -> Option<SlotRange> {
        let first = self.scopes.get(depth)?.first_slot;
        let count = self.next_slot - first;
        if count == 0 {
            return None;
        }
        Some(SlotRange {
            last: u16::try_from(self.next_slot - 1).ok()?,
            count: u16::try_from(count).ok()?,
        })
    }

    /// Most slots ever live at once.
    pub const fn high_water_mark(&self) -> usize {
        self.high_water_mark
    }
}
