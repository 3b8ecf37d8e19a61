use super::ApiError;

/// What the session should do with a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Not a token problem; hand the error to the caller unchanged.
    Propagate,
    /// Refresh the access token, then replay the request.
    Refresh,
    /// Token still expired after the allowed replays.
    GiveUp,
}

/// How many times a request may be replayed after a token refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_replays: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_replays: 1 }
    }
}

impl RetryPolicy {
    pub fn new(max_replays: u32) -> Self {
        Self { max_replays }
    }

    /// Never refresh; an expired token fails the request immediately.
    pub fn none() -> Self {
        Self { max_replays: 0 }
    }

    pub fn max_replays(&self) -> u32 {
        self.max_replays
    }

    pub fn decide(&self, error: &ApiError, replays_done: u32) -> RetryDecision {
        if !error.is_token_expired() {
            RetryDecision::Propagate
        } else if replays_done < self.max_replays {
            RetryDecision::Refresh
        } else {
            RetryDecision::GiveUp
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expired() -> ApiError {
        ApiError::TokenExpired {
            status: Some(401),
            message: "expired".into(),
        }
    }

    #[test]
    fn test_default_allows_one_replay() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.decide(&expired(), 0), RetryDecision::Refresh);
        assert_eq!(policy.decide(&expired(), 1), RetryDecision::GiveUp);
    }

    #[test]
    fn test_other_errors_propagate() {
        let policy = RetryPolicy::default();
        let err = ApiError::validation("bad");
        assert_eq!(policy.decide(&err, 0), RetryDecision::Propagate);
        assert_eq!(
            policy.decide(&ApiError::authentication("nope"), 0),
            RetryDecision::Propagate
        );
    }

    #[test]
    fn test_none_gives_up_immediately() {
        assert_eq!(RetryPolicy::none().decide(&expired(), 0), RetryDecision::GiveUp);
    }
}
