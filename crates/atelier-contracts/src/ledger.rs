use indexmap::IndexSet;
use serde::Serialize;

pub const RECENT_CAPACITY: usize = 10;

/// Tracks which images the user most likely means when a follow-up request
/// omits an explicit reference.
///
/// `recent` is kept oldest-first internally so that eviction and
/// insert-if-absent are both cheap; [`RecencyLedger::recent`] yields it
/// most-recent-first. A name that is already present keeps its original
/// position when recorded again.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecencyLedger {
    last_generated: Option<String>,
    last_edited: Option<String>,
    entries: IndexSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerSnapshot {
    pub last_generated: Option<String>,
    pub last_edited: Option<String>,
    pub recent: Vec<String>,
}

impl RecencyLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_generated(&mut self, name: impl Into<String>) {
        let name = name.into();
        self.touch(&name);
        self.last_generated = Some(name);
    }

    pub fn record_edited(&mut self, name: impl Into<String>) {
        let name = name.into();
        self.touch(&name);
        self.last_edited = Some(name);
    }

    pub fn last_generated(&self) -> Option<&str> {
        self.last_generated.as_deref()
    }

    pub fn last_edited(&self) -> Option<&str> {
        self.last_edited.as_deref()
    }

    pub fn most_recent(&self) -> Option<&str> {
        self.entries
            .last()
            .map(String::as_str)
            .or(self.last_generated.as_deref())
            .or(self.last_edited.as_deref())
    }

    pub fn recent(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().rev().map(String::as_str)
    }

    /// Default edit target: what was just created wins over what was merely
    /// touched last.
    pub fn implicit_target(&self) -> Option<&str> {
        self.last_generated().or_else(|| self.most_recent())
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            last_generated: self.last_generated.clone(),
            last_edited: self.last_edited.clone(),
            recent: self.recent().map(str::to_string).collect(),
        }
    }

    fn touch(&mut self, name: &str) {
        if self.entries.contains(name) {
            return;
        }
        self.entries.insert(name.to_string());
        while self.entries.len() > RECENT_CAPACITY {
            self.entries.shift_remove_index(0);
        }
    }
}
