//! Status taxonomy surfaced in [`crate::listener::Summary`] and returned from
//! [`crate::transport::Transport::query`].

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// 200 OK and a valid DNS body.
    Complete,
    /// The HTTPS client returned a transport error before reaching a usable
    /// response. Not treated as server misbehaviour; does not arm hangover.
    SendFailed,
    /// HTTP status != 200, or the hangover gate rejected the query outright.
    HttpError,
    /// Input query was too short (< 2 bytes).
    BadQuery,
    /// Response too short, unreadable, or echoed a nonzero transaction ID.
    BadResponse,
    /// Padding failure or other locally unexpected condition.
    InternalError,
}

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("query is shorter than 2 bytes")]
    BadQuery,
    #[error("forwarder is in servfail hangover")]
    Hangover,
    #[error("failed to pad query: {0}")]
    Padding(#[source] dns_wire::Error),
    #[error("HTTPS request failed: {0}")]
    SendFailed(#[source] anyhow::Error),
    #[error("failed to read response body: {0}")]
    BadResponseBody(#[source] anyhow::Error),
    #[error("upstream returned HTTP {0}")]
    HttpStatus(u16),
    #[error("response is too short or echoed a non-zero transaction ID")]
    BadResponseId,
}

impl QueryError {
    pub fn status(&self) -> Status {
        match self {
            QueryError::BadQuery => Status::BadQuery,
            QueryError::Hangover | QueryError::HttpStatus(_) => Status::HttpError,
            QueryError::Padding(_) => Status::InternalError,
            QueryError::SendFailed(_) => Status::SendFailed,
            QueryError::BadResponseBody(_) | QueryError::BadResponseId => Status::BadResponse,
        }
    }

    /// The HTTP status to report in the Summary: the wrapped status for
    /// [`QueryError::HttpStatus`], 0 otherwise.
    pub fn http_status(&self) -> u16 {
        match self {
            QueryError::HttpStatus(code) => *code,
            _ => 0,
        }
    }
}
