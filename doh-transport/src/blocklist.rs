//! Blocklist Arbiter: brackets the network call with pre- and post-block checks
//! against a replaceable [`BlocklistOracle`].

use std::sync::Arc;

use http::HeaderMap;

/// External collaborator that knows which queries/answers are blocked and can
/// translate an upstream block stamp into human-readable blocklist names.
pub trait BlocklistOracle: Send + Sync {
    /// Whether on-device blocking is currently enabled.
    fn on_device_block(&self) -> bool;

    /// Returns a comma-separated list of blocklist names that match `query`, or
    /// an empty string if none match.
    fn block_request(&self, query: &[u8]) -> anyhow::Result<String>;

    /// Returns a comma-separated list of blocklist names that match `answer`, or
    /// an empty string if none match.
    fn block_response(&self, answer: &[u8]) -> anyhow::Result<String>;

    /// The response header the upstream server uses to report its own block stamp.
    fn blocklist_stamp_header_key(&self) -> &str;

    /// Translates an upstream block stamp into human-readable blocklist names.
    fn stamp_to_names(&self, stamp: &str) -> anyhow::Result<String>;
}

/// The outcome of a pre-block check: either the query should be forwarded
/// unchanged, or it was intercepted and a synthetic response is ready.
pub enum PreBlock {
    Forward,
    Blocked { response: Vec<u8>, blocklists: String },
}

/// Applies the pre-block check: if the oracle reports on-device blocking enabled
/// and matches `query`, synthesizes a block response and reports the matching
/// blocklist names. Any oracle error, or an empty match, lets the query proceed
/// to network forwarding.
pub fn apply_pre_block(oracle: Option<&Arc<dyn BlocklistOracle>>, query: &[u8]) -> PreBlock {
    let Some(oracle) = oracle else {
        return PreBlock::Forward;
    };

    if !oracle.on_device_block() {
        return PreBlock::Forward;
    }

    let blocklists = match oracle.block_request(query) {
        Ok(names) if !names.is_empty() => names,
        Ok(_) => return PreBlock::Forward,
        Err(error) => {
            tracing::debug!(%error, "Blocklist oracle failed on pre-block check");
            return PreBlock::Forward;
        }
    };

    match dns_wire::synthesize_blocked(query) {
        Ok(response) => PreBlock::Blocked {
            response,
            blocklists,
        },
        Err(error) => {
            tracing::debug!(%error, "Failed to synthesize block response");
            PreBlock::Forward
        }
    }
}

/// The outcome of a post-block check against the upstream answer.
pub struct PostBlock {
    pub blocklists: String,
    /// Replacement response body, if the client enforced blocking locally.
    pub replacement: Option<Vec<u8>>,
}

/// Applies the post-block check: first consults the response header named by
/// [`BlocklistOracle::blocklist_stamp_header_key`]; if present, it is translated
/// to names without touching the answer. Otherwise, if on-device blocking is
/// enabled, the answer itself is checked and, on a match, replaced with a
/// synthesized block response for the original query.
pub fn apply_post_block(
    oracle: Option<&Arc<dyn BlocklistOracle>>,
    query: &[u8],
    response_headers: &HeaderMap,
    answer: &[u8],
) -> PostBlock {
    let Some(oracle) = oracle else {
        return PostBlock {
            blocklists: String::new(),
            replacement: None,
        };
    };

    let stamp_header = oracle.blocklist_stamp_header_key();
    if let Some(stamp) = response_headers
        .get(stamp_header)
        .and_then(|v| v.to_str().ok())
    {
        match oracle.stamp_to_names(stamp) {
            Ok(names) => {
                return PostBlock {
                    blocklists: names,
                    replacement: None,
                };
            }
            Err(error) => {
                tracing::debug!(%error, "Failed to translate blocklist stamp");
            }
        }
    }

    if !oracle.on_device_block() {
        return PostBlock {
            blocklists: String::new(),
            replacement: None,
        };
    }

    match oracle.block_response(answer) {
        Ok(names) if !names.is_empty() => match dns_wire::synthesize_blocked(query) {
            Ok(response) => PostBlock {
                blocklists: names,
                replacement: Some(response),
            },
            Err(error) => {
                tracing::debug!(%error, "Failed to synthesize block response");
                PostBlock {
                    blocklists: names,
                    replacement: None,
                }
            }
        },
        Ok(_) => PostBlock {
            blocklists: String::new(),
            replacement: None,
        },
        Err(error) => {
            tracing::debug!(%error, "Blocklist oracle failed on post-block check");
            PostBlock {
                blocklists: String::new(),
                replacement: None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeOracle {
        on_device: bool,
        request_block: &'static str,
        response_block: &'static str,
        stamp_header: &'static str,
        stamp_names: &'static str,
    }

    impl BlocklistOracle for FakeOracle {
        fn on_device_block(&self) -> bool {
            self.on_device
        }

        fn block_request(&self, _query: &[u8]) -> anyhow::Result<String> {
            Ok(self.request_block.to_owned())
        }

        fn block_response(&self, _answer: &[u8]) -> anyhow::Result<String> {
            Ok(self.response_block.to_owned())
        }

        fn blocklist_stamp_header_key(&self) -> &str {
            self.stamp_header
        }

        fn stamp_to_names(&self, _stamp: &str) -> anyhow::Result<String> {
            Ok(self.stamp_names.to_owned())
        }
    }

    fn sample_query() -> Vec<u8> {
        dns_wire::pad(&[0x12, 0x34, 1, 0, 0, 1, 0, 0, 0, 0, 0, 0, 3, b'f', b'o', b'o', 0, 0, 1, 0, 1]).unwrap()
    }

    #[test]
    fn pre_block_forwards_when_no_oracle() {
        let outcome = apply_pre_block(None, &sample_query());
        assert!(matches!(outcome, PreBlock::Forward));
    }

    #[test]
    fn pre_block_intercepts_on_match() {
        let oracle: Arc<dyn BlocklistOracle> = Arc::new(FakeOracle {
            on_device: true,
            request_block: "ads,trackers",
            response_block: "",
            stamp_header: "x-bl",
            stamp_names: "",
        });

        let outcome = apply_pre_block(Some(&oracle), &sample_query());

        match outcome {
            PreBlock::Blocked { blocklists, .. } => assert_eq!(blocklists, "ads,trackers"),
            PreBlock::Forward => panic!("expected a blocked outcome"),
        }
    }

    #[test]
    fn post_block_prefers_header_over_local_check() {
        let oracle: Arc<dyn BlocklistOracle> = Arc::new(FakeOracle {
            on_device: true,
            request_block: "",
            response_block: "should-not-be-used",
            stamp_header: "x-bl",
            stamp_names: "malware",
        });

        let mut headers = HeaderMap::new();
        headers.insert("x-bl", "stamp123".parse().unwrap());

        let outcome = apply_post_block(Some(&oracle), &sample_query(), &headers, &[]);

        assert_eq!(outcome.blocklists, "malware");
        assert!(outcome.replacement.is_none());
    }

    #[test]
    fn post_block_falls_back_to_local_answer_check() {
        let oracle: Arc<dyn BlocklistOracle> = Arc::new(FakeOracle {
            on_device: true,
            request_block: "",
            response_block: "malware",
            stamp_header: "x-bl",
            stamp_names: "",
        });

        let outcome = apply_post_block(Some(&oracle), &sample_query(), &HeaderMap::new(), &[]);

        assert_eq!(outcome.blocklists, "malware");
        assert!(outcome.replacement.is_some());
    }
}
