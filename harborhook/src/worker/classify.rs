//! Sends the signed HTTP request for a delivery attempt and classifies the
//! outcome by transport error or status code (§4.2 step 7).

use crate::model::Outcome;
use std::time::{Duration, Instant};

pub struct SendOutcome {
    pub outcome: Outcome,
    pub http_status: Option<i32>,
    pub latency_ms: i32,
    pub detail: Option<String>,
}

pub async fn send_and_classify(
    client: &reqwest::Client,
    url: &str,
    body: &[u8],
    headers: &[(String, String)],
) -> SendOutcome {
    let start = Instant::now();

    let mut req = client.post(url).body(body.to_vec());
    for (name, value) in headers {
        req = req.header(name, value);
    }

    let result = req.send().await;
    let latency_ms = latency_ms(start.elapsed());

    match result {
        Ok(response) => {
            let status = response.status();
            let code = status.as_u16() as i32;
            let outcome = if (200..300).contains(&code) {
                Outcome::Success
            } else if code == 429 {
                Outcome::Http429
            } else if (400..500).contains(&code) {
                Outcome::Http4xx
            } else if code >= 500 {
                Outcome::Http5xx
            } else {
                Outcome::Other
            };

            SendOutcome {
                outcome,
                http_status: Some(code),
                latency_ms,
                detail: if outcome.is_success() {
                    None
                } else {
                    Some(format!("unexpected status {code}"))
                },
            }
        }
        Err(err) => {
            let message = err.to_string();
            let lower = message.to_lowercase();
            let outcome = if lower.contains("timeout") || lower.contains("timed out") {
                Outcome::Timeout
            } else if lower.contains("connection refused") {
                Outcome::ConnectionRefused
            } else if lower.contains("dns") || lower.contains("no such host") {
                Outcome::DnsError
            } else {
                Outcome::Network
            };

            SendOutcome {
                outcome,
                http_status: None,
                latency_ms,
                detail: Some(message),
            }
        }
    }
}

fn latency_ms(elapsed: Duration) -> i32 {
    elapsed.as_millis().min(i32::MAX as u128) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latency_ms_caps_at_i32_max() {
        let huge = Duration::from_secs(u64::MAX / 1000);
        assert_eq!(latency_ms(huge), i32::MAX);
    }

    #[test]
    fn latency_ms_converts_normally() {
        assert_eq!(latency_ms(Duration::from_millis(42)), 42);
    }
}
