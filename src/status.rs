//! Terminal outcome of a feed load, shared by the parser, the loader and the store.
use std::fmt;

/// Outcome reported for every feed load.
///
/// `NotModified` and `RefreshPostponed` are informational: the feed is intact
/// and nothing went wrong, there was simply nothing to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LoadStatus {
    #[default]
    Ok,
    /// Cancelled by the caller or the engine.
    Aborted,
    /// A memory reservation failed.
    OutOfMemory,
    /// No data arrived within the load timeout.
    ServerTimeout,
    /// The transport reported a failure or a non-success response.
    LoadingError,
    /// The document was malformed or not a feed.
    ParsingError,
    /// The server answered 304; the stored copy is current.
    NotModified,
    /// The minimum update interval has not elapsed yet.
    RefreshPostponed,
}

impl LoadStatus {
    /// True when the feed is usable after this outcome.
    pub fn is_success(self) -> bool {
        matches!(
            self,
            LoadStatus::Ok | LoadStatus::NotModified | LoadStatus::RefreshPostponed
        )
    }

    /// Human-readable message shown for this status.
    pub fn message(self) -> &'static str {
        match self {
            LoadStatus::Ok => "Feed loaded",
            LoadStatus::Aborted => "Loading was aborted",
            LoadStatus::OutOfMemory => "Not enough memory to load the feed",
            LoadStatus::ServerTimeout => "The server did not respond in time",
            LoadStatus::LoadingError => "The feed could not be downloaded",
            LoadStatus::ParsingError => "The document is not a valid RSS or Atom feed",
            LoadStatus::NotModified => "The feed has not changed since the last update",
            LoadStatus::RefreshPostponed => "The feed was updated too recently",
        }
    }

    /// Stable identifier used in persisted documents.
    pub fn as_str(self) -> &'static str {
        match self {
            LoadStatus::Ok => "ok",
            LoadStatus::Aborted => "aborted",
            LoadStatus::OutOfMemory => "out-of-memory",
            LoadStatus::ServerTimeout => "timeout",
            LoadStatus::LoadingError => "loading-error",
            LoadStatus::ParsingError => "parsing-error",
            LoadStatus::NotModified => "not-modified",
            LoadStatus::RefreshPostponed => "postponed",
        }
    }

    /// Parses the value written by [`LoadStatus::as_str`]. Unknown strings map to `Ok`.
    pub fn from_str_lossy(value: &str) -> Self {
        match value {
            "aborted" => LoadStatus::Aborted,
            "out-of-memory" => LoadStatus::OutOfMemory,
            "timeout" => LoadStatus::ServerTimeout,
            "loading-error" => LoadStatus::LoadingError,
            "parsing-error" => LoadStatus::ParsingError,
            "not-modified" => LoadStatus::NotModified,
            "postponed" => LoadStatus::RefreshPostponed,
            _ => LoadStatus::Ok,
        }
    }
}

impl fmt::Display for LoadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [LoadStatus; 8] = [
        LoadStatus::Ok,
        LoadStatus::Aborted,
        LoadStatus::OutOfMemory,
        LoadStatus::ServerTimeout,
        LoadStatus::LoadingError,
        LoadStatus::ParsingError,
        LoadStatus::NotModified,
        LoadStatus::RefreshPostponed,
    ];

    #[test]
    fn test_persisted_names_survive_reload() {
        for status in ALL {
            assert_eq!(LoadStatus::from_str_lossy(status.as_str()), status);
        }
    }

    #[test]
    fn test_informational_statuses_are_success() {
        assert!(LoadStatus::NotModified.is_success());
        assert!(LoadStatus::RefreshPostponed.is_success());
        assert!(!LoadStatus::ParsingError.is_success());
        assert!(!LoadStatus::Aborted.is_success());
    }

    #[test]
    fn test_every_status_has_a_message() {
        for status in ALL {
            assert!(!status.message().is_empty());
        }
    }
}
