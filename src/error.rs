//! Error type for live segment production.
//!
//! Boundary conditions (a segment requested too early, too late or past the
//! end) are ordinary variants so callers can answer with "not found" and the
//! measured time delta. [`LiveError::http_status`] gives the status a hosting
//! layer should use.

/// Result type for livesim operations.
pub type Result<T> = std::result::Result<T, LiveError>;

#[derive(Debug, thiserror::Error)]
pub enum LiveError {
    /// Box-level failure while reading or rewriting media.
    #[error(transparent)]
    Media(#[from] livesim_media::Error),

    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// The requested segment is not available yet.
    #[error("Segment {segment} not yet available ({wait_s:.3}s early)")]
    NotYetAvailable { segment: u32, wait_s: f64 },

    /// The requested segment left the time-shift window.
    #[error("Segment {segment} expired from the time-shift window ({age_s:.3}s ago)")]
    ExpiredFromWindow { segment: u32, age_s: f64 },

    /// The requested segment is at or after the stop number.
    #[error("Segment {segment} is beyond the end of the presentation")]
    BeyondEnd { segment: u32 },

    #[error("Unknown representation: {0}")]
    UnknownRepresentation(String),

    /// Content does not match the configuration or is internally inconsistent.
    #[error("Consistency error: {0}")]
    Consistency(String),

    /// A blocking task failed to complete.
    #[error("Task error: {0}")]
    Task(String),
}

impl LiveError {
    /// Map this error to an appropriate HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            LiveError::NotYetAvailable { .. } => 404,
            LiveError::ExpiredFromWindow { .. } => 404,
            LiveError::BeyondEnd { .. } => 404,
            LiveError::UnknownRepresentation(_) => 404,
            LiveError::Media(_) => 500,
            LiveError::Io { .. } => 500,
            LiveError::Consistency(_) => 500,
            LiveError::Task(_) => 500,
        }
    }

    /// Whether the error is an expected boundary condition rather than a fault.
    pub fn is_boundary(&self) -> bool {
        matches!(
            self,
            LiveError::NotYetAvailable { .. }
                | LiveError::ExpiredFromWindow { .. }
                | LiveError::BeyondEnd { .. }
        )
    }

    /// Signed distance in seconds between the request and the segment's
    /// availability: negative when early, positive when expired.
    pub fn time_delta_s(&self) -> Option<f64> {
        match self {
            LiveError::NotYetAvailable { wait_s, .. } => Some(-wait_s),
            LiveError::ExpiredFromWindow { age_s, .. } => Some(*age_s),
            _ => None,
        }
    }

    /// Convenience constructor for [`LiveError::Consistency`].
    pub fn consistency(message: impl Into<String>) -> Self {
        LiveError::Consistency(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boundary_errors_map_to_not_found() {
        let early = LiveError::NotYetAvailable { segment: 5, wait_s: 2.0 };
        assert_eq!(early.http_status(), 404);
        assert!(early.is_boundary());
        assert_eq!(early.time_delta_s(), Some(-2.0));
        assert_eq!(early.to_string(), "Segment 5 not yet available (2.000s early)");

        assert_eq!(LiveError::BeyondEnd { segment: 9 }.http_status(), 404);
    }

    #[test]
    fn test_media_errors_are_fatal() {
        let err = LiveError::from(livesim_media::Error::MissingBox("moof"));
        assert_eq!(err.http_status(), 500);
        assert!(!err.is_boundary());
        assert_eq!(err.to_string(), "Missing required box: moof");
    }
}
