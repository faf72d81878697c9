//! Last-known parameter values.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};

use crate::camera::{Parameter, ParameterValue};

/// Which channel produced an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateSource {
    /// Pushed by the live view transport
    Event,
    /// Read by the polling fallback
    Poll,
}

impl fmt::Display for UpdateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateSource::Event => f.write_str("event"),
            UpdateSource::Poll => f.write_str("poll"),
        }
    }
}

/// A known parameter value and where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterEntry {
    pub value: ParameterValue,
    pub source: UpdateSource,
    pub updated_at: DateTime<Utc>,
}

/// Per-parameter state. Absent parameters are unknown.
#[derive(Debug, Clone, Default)]
pub struct ParameterState {
    entries: HashMap<Parameter, ParameterEntry>,
}

impl ParameterState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite `parameter` unconditionally and return the stored entry.
    pub fn update(
        &mut self,
        parameter: Parameter,
        value: ParameterValue,
        source: UpdateSource,
    ) -> ParameterEntry {
        let entry = ParameterEntry {
            value,
            source,
            updated_at: Utc::now(),
        };
        self.entries.insert(parameter, entry.clone());
        entry
    }

    pub fn get(&self, parameter: Parameter) -> Option<&ParameterEntry> {
        self.entries.get(&parameter)
    }

    pub fn is_known(&self, parameter: Parameter) -> bool {
        self.entries.contains_key(&parameter)
    }

    /// Number of known parameters
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Known parameters in [`Parameter::ALL`] order.
    pub fn iter(&self) -> impl Iterator<Item = (Parameter, &ParameterEntry)> + '_ {
        Parameter::ALL
            .into_iter()
            .filter_map(move |p| self.entries.get(&p).map(|e| (p, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{FocusState, GainState};

    fn focus(n: f64) -> ParameterValue {
        ParameterValue::Focus(FocusState { normalised: n })
    }

    #[test]
    fn test_unknown_until_first_update() {
        let mut state = ParameterState::new();
        assert!(!state.is_known(Parameter::Focus));

        state.update(Parameter::Focus, focus(0.2), UpdateSource::Poll);
        assert!(state.is_known(Parameter::Focus));
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn test_last_write_wins_across_sources() {
        let mut state = ParameterState::new();
        state.update(Parameter::Focus, focus(0.2), UpdateSource::Event);
        state.update(Parameter::Focus, focus(0.7), UpdateSource::Poll);

        let entry = state.get(Parameter::Focus).unwrap();
        assert_eq!(entry.value, focus(0.7));
        assert_eq!(entry.source, UpdateSource::Poll);
    }

    #[test]
    fn test_iter_follows_polling_order() {
        let mut state = ParameterState::new();
        state.update(Parameter::Gain, ParameterValue::Gain(GainState { gain: 6 }), UpdateSource::Poll);
        state.update(Parameter::Focus, focus(0.1), UpdateSource::Poll);

        let order: Vec<_> = state.iter().map(|(p, _)| p).collect();
        assert_eq!(order, vec![Parameter::Focus, Parameter::Gain]);
    }
}
