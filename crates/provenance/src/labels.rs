use std::collections::BTreeSet;

use promlint_promql::PosRange;
use serde::Serialize;

/// Labels present on every series a node returns.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", content = "labels", rename_all = "snake_case")]
pub enum LabelSet {
    /// Nothing can be said without looking at live data.
    #[default]
    Unknown,
    /// Every returned series is provably label-less.
    Empty,
    /// Every returned series carries all of these labels. Never empty.
    Set(BTreeSet<String>),
}

impl LabelSet {
    /// Build a set from label names; no names gives `Unknown`.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set: BTreeSet<String> = names.into_iter().map(Into::into).collect();
        if set.is_empty() {
            Self::Unknown
        } else {
            Self::Set(set)
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        matches!(self, Self::Set(set) if set.contains(name))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        let set = match self {
            Self::Set(set) => Some(set),
            Self::Unknown | Self::Empty => None,
        };
        set.into_iter().flatten().map(String::as_str)
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }

    /// Returns true for a provably label-less result.
    pub fn is_label_less(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Guaranteed names as a plain set; empty for `Unknown` and `Empty`.
    pub fn to_set(&self) -> BTreeSet<String> {
        self.names().map(str::to_owned).collect()
    }

    pub(crate) fn insert(&mut self, name: &str) {
        match self {
            Self::Set(set) => {
                set.insert(name.to_owned());
            }
            Self::Unknown | Self::Empty => *self = Self::Set(BTreeSet::from([name.to_owned()])),
        }
    }

    pub(crate) fn remove(&mut self, name: &str) {
        if let Self::Set(set) = self {
            set.remove(name);
            if set.is_empty() {
                *self = Self::Unknown;
            }
        }
    }
}

/// Why a label is provably absent and which part of the query decides it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExcludedLabel {
    pub reason: String,
    pub fragment: PosRange,
}

impl ExcludedLabel {
    pub fn new(reason: impl Into<String>, fragment: PosRange) -> Self {
        Self {
            reason: reason.into(),
            fragment,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_names_are_unknown() {
        assert_eq!(LabelSet::from_names(Vec::<String>::new()), LabelSet::Unknown);
        assert!(LabelSet::from_names(["job"]).contains("job"));
    }

    #[test]
    fn insert_and_remove() {
        let mut set = LabelSet::Empty;
        set.insert("job");
        assert_eq!(set, LabelSet::from_names(["job"]));
        set.remove("job");
        assert!(set.is_unknown());

        let mut empty = LabelSet::Empty;
        empty.remove("job");
        assert!(empty.is_label_less());
    }

    #[test]
    fn names_of_unknown_are_empty() {
        assert_eq!(LabelSet::Unknown.names().count(), 0);
        assert_eq!(
            LabelSet::from_names(["b", "a"]).names().collect::<Vec<_>>(),
            vec!["a", "b"]
        );
    }
}
