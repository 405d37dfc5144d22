//! Area keyword filter
//!
//! Restricts a snapshot to incidents whose location mentions one of the
//! configured street or neighbourhood names. An empty keyword list keeps
//! every incident.

use otw_common::CanonicalEvent;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct AreaFilter {
    keywords: Vec<String>,
}

impl AreaFilter {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keywords = keywords
            .into_iter()
            .map(|k| k.as_ref().trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        Self { keywords }
    }

    pub fn is_enabled(&self) -> bool {
        !self.keywords.is_empty()
    }

    pub fn matches(&self, event: &CanonicalEvent) -> bool {
        if !self.is_enabled() {
            return true;
        }
        let location = event.location.to_lowercase();
        self.keywords.iter().any(|k| location.contains(k.as_str()))
    }

    /// Keep only the matching incidents
    pub fn apply(&self, events: Vec<CanonicalEvent>) -> Vec<CanonicalEvent> {
        if !self.is_enabled() {
            return events;
        }
        let before = events.len();
        let kept: Vec<_> = events.into_iter().filter(|e| self.matches(e)).collect();
        debug!(before, after = kept.len(), "Applied area filter");
        kept
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use otw_common::EventStatus;

    fn event(id: &str, location: &str) -> CanonicalEvent {
        CanonicalEvent {
            id: id.to_string(),
            event_type: "COLLISION".to_string(),
            location: location.to_string(),
            start_time: None,
            end_time: None,
            priority: "HIGH".to_string(),
            status: EventStatus::Active,
            geo_coordinates: None,
        }
    }

    #[test]
    fn test_empty_filter_keeps_everything() {
        let filter = AreaFilter::new(Vec::<String>::new());
        assert!(!filter.is_enabled());
        assert_eq!(filter.apply(vec![event("1", "Anywhere")]).len(), 1);
    }

    #[test]
    fn test_keywords_match_case_insensitively() {
        let filter = AreaFilter::new(["Kanata", "March Road", "  "]);
        let kept = filter.apply(vec![
            event("1", "march road at Legget"),
            event("2", "Bank St"),
            event("3", "KANATA AVE"),
        ]);
        let ids: Vec<_> = kept.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "3"]);
    }
}
