//! Per-node parameter storage.
//!
//! Every non-directive line inside an `action` block becomes one entry: the first
//! token is the keyword, the remaining tokens are its values. Entries are kept in
//! source order and duplicates are never dropped, so actions that care about the
//! order of repeated keywords (the `beep` cue) can read all of them with
//! [`ParameterStore::get_all`]. Single-valued lookups ([`ParameterStore::get`])
//! resolve to the last occurrence.

use crate::error::ActionError;
use std::fmt;
use std::str::FromStr;

/// One `keyword value...` line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Parameter {
    /// First token of the line.
    pub keyword: String,
    /// Remaining tokens, in order.
    pub values: Vec<String>,
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.keyword)?;
        for value in &self.values {
            write!(f, " {value}")?;
        }
        Ok(())
    }
}

/// Ordered keyword → values store owned by each action node.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParameterStore {
    entries: Vec<Parameter>,
}

impl ParameterStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `tokens[0] → tokens[1..]`. Empty token lists are ignored.
    pub fn record(&mut self, tokens: &[String]) {
        if let Some((keyword, values)) = tokens.split_first() {
            self.insert(keyword, values.iter().cloned());
        }
    }

    /// Append an occurrence of `keyword`.
    pub fn insert<I, S>(&mut self, keyword: &str, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entries.push(Parameter {
            keyword: keyword.to_string(),
            values: values.into_iter().map(Into::into).collect(),
        });
    }

    /// Values of the last occurrence of `keyword`.
    pub fn get(&self, keyword: &str) -> Option<&[String]> {
        self.entries
            .iter()
            .rev()
            .find(|p| p.keyword == keyword)
            .map(|p| p.values.as_slice())
    }

    /// Every occurrence of `keyword`, in source order.
    pub fn get_all<'a>(&'a self, keyword: &'a str) -> impl Iterator<Item = &'a [String]> + 'a {
        self.entries
            .iter()
            .filter(move |p| p.keyword == keyword)
            .map(|p| p.values.as_slice())
    }

    /// True if `keyword` appeared at least once, with or without values.
    pub fn contains(&self, keyword: &str) -> bool {
        self.entries.iter().any(|p| p.keyword == keyword)
    }

    /// First value of the last occurrence of `keyword`.
    pub fn first(&self, keyword: &str) -> Option<&str> {
        self.get(keyword)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Parse the first value of `keyword`, or `Ok(None)` if it is absent.
    pub fn parse<T>(&self, keyword: &str) -> Result<Option<T>, ActionError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.get(keyword) {
            None => Ok(None),
            Some([]) => Err(ActionError::Parameter(format!(
                "'{keyword}' requires a value"
            ))),
            Some([value, ..]) => value.parse::<T>().map(Some).map_err(|e| {
                ActionError::Parameter(format!("invalid value '{value}' for '{keyword}': {e}"))
            }),
        }
    }

    /// Parse the first value of `keyword`, falling back to `default` when absent.
    pub fn parse_or<T>(&self, keyword: &str, default: T) -> Result<T, ActionError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        Ok(self.parse(keyword)?.unwrap_or(default))
    }

    /// Parse every value of the last occurrence of `keyword`.
    pub fn parse_list<T>(&self, keyword: &str) -> Result<Option<Vec<T>>, ActionError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        let Some(values) = self.get(keyword) else {
            return Ok(None);
        };
        values
            .iter()
            .map(|value| {
                value.parse::<T>().map_err(|e| {
                    ActionError::Parameter(format!(
                        "invalid value '{value}' for '{keyword}': {e}"
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }

    /// All entries in source order.
    pub fn entries(&self) -> &[Parameter] {
        &self.entries
    }

    /// One entry per keyword, holding the last occurrence, in order of first appearance.
    pub fn latest(&self) -> Vec<(&str, &[String])> {
        let mut seen: Vec<(&str, &[String])> = Vec::new();
        for p in &self.entries {
            match seen.iter_mut().find(|(k, _)| *k == p.keyword) {
                Some(slot) => slot.1 = &p.values,
                None => seen.push((&p.keyword, &p.values)),
            }
        }
        seen
    }

    /// Number of recorded lines.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no line was recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(line: &str) -> Vec<String> {
        line.split_whitespace().map(String::from).collect()
    }

    #[test]
    fn test_values_keep_token_order() {
        let mut store = ParameterStore::new();
        store.record(&tokens("channels 3 1 2"));
        assert_eq!(store.get("channels").unwrap(), ["3", "1", "2"]);
        assert_eq!(store.parse_list::<u32>("channels").unwrap(), Some(vec![3, 1, 2]));
    }

    #[test]
    fn test_duplicates_accumulate_and_get_takes_last() {
        let mut store = ParameterStore::new();
        store.record(&tokens("beep twice"));
        store.record(&tokens("boop 3"));
        store.record(&tokens("beep once"));

        assert_eq!(store.len(), 3);
        assert_eq!(store.first("beep"), Some("once"));
        let beeps: Vec<_> = store.get_all("beep").collect();
        assert_eq!(beeps, vec![&["twice".to_string()][..], &["once".to_string()][..]]);
        assert_eq!(store.latest().len(), 2);
        assert_eq!(store.latest()[0], ("beep", &["once".to_string()][..]));
    }

    #[test]
    fn test_flag_without_values() {
        let mut store = ParameterStore::new();
        store.record(&tokens("restore"));
        assert!(store.contains("restore"));
        assert!(store.parse::<f64>("restore").is_err());
        assert!(!store.contains("Restore"));
    }

    #[test]
    fn test_parse_reports_keyword_and_value() {
        let mut store = ParameterStore::new();
        store.record(&tokens("seconds soon"));
        let err = store.parse::<f64>("seconds").unwrap_err();
        assert!(err.to_string().contains("'soon'"));
        assert!(err.to_string().contains("'seconds'"));
        assert_eq!(store.parse_or("minutes", 0.0_f64).unwrap(), 0.0);
    }

    #[test]
    fn test_display_reproduces_line() {
        let mut store = ParameterStore::new();
        store.record(&tokens("scan 0 0.5 10"));
        assert_eq!(store.entries()[0].to_string(), "scan 0 0.5 10");
    }
}
