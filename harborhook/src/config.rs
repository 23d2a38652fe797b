use std::env;
use std::time::Duration;

/// Application configuration parsed from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bus_type: String,
    pub nats_url: String,
    pub host: String,
    pub port: u16,

    pub max_attempts: u32,
    pub backoff_schedule: Vec<Duration>,
    pub backoff_jitter_pct: f64,
    pub publish_dlq_topic: bool,
    pub http_client_timeout: Duration,
    pub worker_max_inflight: usize,
    pub signing_leeway_seconds: i64,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let database_url =
            env::var("DATABASE_URL").map_err(|_| "DATABASE_URL must be set".to_string())?;

        let bus_type = env::var("BUS_TYPE").unwrap_or_else(|_| "inmemory".to_string());
        let nats_url =
            env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string());
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port: u16 = env::var("PORT")
            .unwrap_or_else(|_| "8092".to_string())
            .parse()
            .map_err(|_| "PORT must be a valid u16".to_string())?;

        let max_attempts: u32 = env::var("MAX_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5);

        let backoff_schedule = match env::var("BACKOFF_SCHEDULE") {
            Ok(raw) => parse_schedule(&raw)?,
            Err(_) => default_schedule(),
        };

        let backoff_jitter_pct: f64 = env::var("BACKOFF_JITTER_PCT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.25);

        let publish_dlq_topic: bool = env::var("PUBLISH_DLQ_TOPIC")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(false);

        let http_client_timeout = Duration::from_secs(
            env::var("HTTP_CLIENT_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(15),
        );

        let worker_max_inflight: usize = env::var("WORKER_MAX_INFLIGHT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1000);

        let signing_leeway_seconds: i64 = env::var("SIGNING_LEEWAY_SECONDS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(300);

        Ok(Config {
            database_url,
            bus_type,
            nats_url,
            host,
            port,
            max_attempts,
            backoff_schedule,
            backoff_jitter_pct,
            publish_dlq_topic,
            http_client_timeout,
            worker_max_inflight,
            signing_leeway_seconds,
        })
    }
}

fn default_schedule() -> Vec<Duration> {
    vec![
        Duration::from_secs(1),
        Duration::from_secs(4),
        Duration::from_secs(16),
        Duration::from_secs(60),
        Duration::from_secs(240),
        Duration::from_secs(600),
    ]
}

fn parse_schedule(raw: &str) -> Result<Vec<Duration>, String> {
    raw.split(',')
        .map(|part| parse_duration(part.trim()))
        .collect()
}

/// Parses durations like "1s", "4m", "10m" — the unit suffixes used in
/// `backoff_schedule` configuration.
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if let Some(num) = s.strip_suffix("ms") {
        return num
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| format!("invalid duration: {s}"));
    }
    if let Some(num) = s.strip_suffix('s') {
        return num
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| format!("invalid duration: {s}"));
    }
    if let Some(num) = s.strip_suffix('m') {
        return num
            .parse::<u64>()
            .map(|m| Duration::from_secs(m * 60))
            .map_err(|_| format!("invalid duration: {s}"));
    }
    if let Some(num) = s.strip_suffix('h') {
        return num
            .parse::<u64>()
            .map(|h| Duration::from_secs(h * 3600))
            .map_err(|_| format!("invalid duration: {s}"));
    }
    s.parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| format!("invalid duration: {s}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_schedule() {
        let schedule = parse_schedule("1s,4s,16s,1m,4m,10m").unwrap();
        assert_eq!(schedule[0], Duration::from_secs(1));
        assert_eq!(schedule[3], Duration::from_secs(60));
        assert_eq!(schedule[5], Duration::from_secs(600));
    }

    #[test]
    fn default_schedule_matches_spec() {
        let schedule = default_schedule();
        assert_eq!(schedule.len(), 6);
        assert_eq!(schedule[0], Duration::from_secs(1));
        assert_eq!(schedule[5], Duration::from_secs(600));
    }
}
