use thiserror::Error;

/// Which upstream metadata provider a request went to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    /// Weekly text schedules (Provider A)
    Jikan,
    /// Absolute next-airing timestamps (Provider B)
    AniList,
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

impl Provider {
    pub fn display_name(&self) -> &'static str {
        match self {
            Provider::Jikan => "Jikan",
            Provider::AniList => "AniList",
        }
    }
}

/// Failure talking to an upstream provider
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FetchError {
    /// Provider asked us to back off and retries ran out
    #[error("{0} rate limit exceeded{}", .1.map(|s| format!(", try again in {}s", s)).unwrap_or_default())]
    RateLimited(Provider, Option<u64>),

    /// Non-success HTTP status
    #[error("{0} API error: {1} {2}")]
    Http(Provider, u16, String),

    /// Connection or transport failure
    #[error("{0} request failed: {1}")]
    Transport(Provider, String),

    /// Body could not be decoded into the provider schema
    #[error("Failed to decode {0} response: {1}")]
    Decode(Provider, String),
}

impl FetchError {
    pub fn provider(&self) -> Provider {
        match self {
            FetchError::RateLimited(p, _)
            | FetchError::Http(p, _, _)
            | FetchError::Transport(p, _)
            | FetchError::Decode(p, _) => *p,
        }
    }

    /// Get detailed diagnostic information about the error
    pub fn diagnostics(&self) -> String {
        match self {
            FetchError::RateLimited(provider, retry_after) => {
                let wait = retry_after
                    .map(|s| format!("{} seconds", s))
                    .unwrap_or_else(|| "a moment".to_string());
                format!("Rate Limited\nProvider: {}\nSuggestion: Wait {} and try again", provider, wait)
            }
            FetchError::Http(provider, status, message) => {
                format!("Server Error\nProvider: {}\nStatus: {}\nMessage: {}\nSuggestion: Try again later", provider, status, message)
            }
            FetchError::Transport(provider, source) => {
                format!("Connection Failed\nProvider: {}\nError: {}\nSuggestion: Check internet connection", provider, source)
            }
            FetchError::Decode(provider, source) => {
                format!("Parse Error\nProvider: {}\nError: {}\nSuggestion: Provider response changed or is invalid", provider, source)
            }
        }
    }
}

/// Why a free-text broadcast description could not be parsed
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BroadcastParseError {
    #[error("broadcast text is empty")]
    Empty,

    #[error("broadcast text does not match '<Day> at <HH:MM>': {0}")]
    NoMatch(String),

    #[error("unknown day of week: {0}")]
    UnknownDay(String),

    #[error("invalid broadcast time: {0}")]
    InvalidTime(String),
}

/// Why a broadcast slot could not be placed in the viewer's zone
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProjectionError {
    #[error("epoch {0} is outside the representable range")]
    InvalidEpoch(i64),

    #[error("local time {0} does not exist in the target zone")]
    NonexistentLocalTime(String),
}

/// Any reason a record was skipped while building a rendering pass
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error(transparent)]
    Parse(#[from] BroadcastParseError),

    #[error(transparent)]
    Projection(#[from] ProjectionError),
}
