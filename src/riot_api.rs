use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue, RETRY_AFTER};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::thread::sleep;
use std::time::{Duration, Instant};
use thiserror::Error;

const DDRAGON_VERSIONS_URL: &str = "https://ddragon.leagueoflegends.com/api/versions.json";
const DEFAULT_MAX_REQS_PER_2MIN: usize = 80;
const DEFAULT_MAX_REQS_PER_SEC: usize = 20;
const WINDOW_SHORT: Duration = Duration::from_secs(1);
const WINDOW_LONG: Duration = Duration::from_secs(120);

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Riot API key was rejected (expired or invalid)")]
    CredentialExpired,
    #[error("too many requests for URL {0}")]
    RateLimited(String),
    #[error("request to {url} failed with status {status}")]
    Status { url: String, status: StatusCode },
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected response shape from {0}")]
    Shape(String),
    #[error("API key is not a valid header value")]
    InvalidKey,
}

/// Blocking client for the two Riot hosts a collection run touches: the
/// regional host (match-v5) and the platform host (league-v4). The stored API
/// key is replaced in place when the operator supplies a fresh one mid-run.
pub struct RiotClient {
    client: Client,
    api_key: Mutex<String>,
    regional_base: String,
    platform_base: String,
    limiter: Mutex<RateLimiter>,
}

impl RiotClient {
    pub fn new(platform: &str, api_key: String) -> Self {
        let platform = platform.trim().to_uppercase();

        Self {
            client: Client::new(),
            api_key: Mutex::new(api_key.trim().to_string()),
            regional_base: regional_host(&platform).to_string(),
            platform_base: format!("https://{}.api.riotgames.com", platform.to_lowercase()),
            limiter: Mutex::new(RateLimiter::new(
                DEFAULT_MAX_REQS_PER_SEC,
                DEFAULT_MAX_REQS_PER_2MIN,
            )),
        }
    }

    pub fn set_max_reqs_per_2min(&self, max_reqs_per_2min: usize) {
        let mut limiter = self
            .limiter
            .lock()
            .expect("Rate limiter mutex poisoned while setting max");
        limiter.set_max_per_2min(max_reqs_per_2min);
    }

    /// Replaces the stored key; every subsequent request uses the new one.
    pub fn set_api_key(&self, api_key: &str) {
        let mut key = self.api_key.lock().expect("API key mutex poisoned");
        *key = api_key.trim().to_string();
    }

    #[cfg(test)]
    pub fn current_api_key(&self) -> String {
        self.api_key.lock().expect("API key mutex poisoned").clone()
    }

    pub fn get_match_json(&self, match_id: &str) -> Result<Value, ApiError> {
        let url = format!("{}/lol/match/v5/matches/{}", self.regional_base, match_id);

        self.get_json(&url)
    }

    /// Ranked-solo tier and division for one player, as "TIER DIVISION"
    /// (e.g. "GOLD IV"), or None when the player has no solo-queue entry.
    pub fn get_solo_rank_by_puuid(&self, puuid: &str) -> Result<Option<String>, ApiError> {
        let url = format!(
            "{}/lol/league/v4/entries/by-puuid/{}",
            self.platform_base, puuid
        );

        let entries: Value = self.get_json(&url)?;
        Ok(solo_rank_from_entries(&entries))
    }

    /// Numeric champion id to name, from the Data Dragon champion index.
    /// Ban slots only carry champion ids; the map turns them into the same
    /// names match-v5 uses for picks. No auth and no rate limit on this host.
    pub fn get_champion_names(&self) -> Result<HashMap<i64, String>, ApiError> {
        let versions: Value = self
            .client
            .get(DDRAGON_VERSIONS_URL)
            .send()?
            .error_for_status()?
            .json()?;
        let latest = versions
            .get(0)
            .and_then(|version| version.as_str())
            .ok_or_else(|| ApiError::Shape(DDRAGON_VERSIONS_URL.to_string()))?;

        let url = format!(
            "https://ddragon.leagueoflegends.com/cdn/{}/data/en_US/champion.json",
            latest
        );
        let index: Value = self.client.get(&url).send()?.error_for_status()?.json()?;

        let data = index
            .get("data")
            .and_then(|data| data.as_object())
            .ok_or_else(|| ApiError::Shape(url.clone()))?;

        let mut names = HashMap::new();
        for champion in data.values() {
            // "key" is the numeric id; "id" matches the championName strings
            // in match-v5 participant objects.
            let key = champion
                .get("key")
                .and_then(|key| key.as_str())
                .and_then(|key| key.parse::<i64>().ok());
            let name = champion.get("id").and_then(|id| id.as_str());

            if let (Some(key), Some(name)) = (key, name) {
                names.insert(key, name.to_string());
            }
        }

        Ok(names)
    }

    fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, ApiError> {
        let response = self.request_with_retry(url)?;
        Ok(response.json()?)
    }

    fn auth_headers(&self) -> Result<HeaderMap, ApiError> {
        let key = self.api_key.lock().expect("API key mutex poisoned").clone();

        let mut headers = HeaderMap::new();
        headers.insert(
            "X-Riot-Token",
            HeaderValue::from_str(&key).map_err(|_| ApiError::InvalidKey)?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        Ok(headers)
    }

    fn request_with_retry(&self, url: &str) -> Result<reqwest::blocking::Response, ApiError> {
        const MAX_ATTEMPTS: usize = 2;
        let mut attempt = 0;

        loop {
            attempt += 1;

            self.wait_rate_limit();

            let response = self.client.get(url).headers(self.auth_headers()?).send()?;
            let status = response.status();

            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                return Err(ApiError::CredentialExpired);
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                if attempt >= MAX_ATTEMPTS {
                    return Err(ApiError::RateLimited(url.to_string()));
                }

                let delay = parse_retry_after(&response).unwrap_or(Duration::from_secs(10));
                sleep(delay);
                continue;
            }

            if !status.is_success() {
                return Err(ApiError::Status {
                    url: url.to_string(),
                    status,
                });
            }

            return Ok(response);
        }
    }

    fn wait_rate_limit(&self) {
        let mut limiter = self
            .limiter
            .lock()
            .expect("Rate limiter mutex poisoned while waiting");
        limiter.wait();
    }
}

fn regional_host(platform: &str) -> &'static str {
    match platform {
        "KR" | "JP1" => "https://asia.api.riotgames.com",
        "NA1" | "BR1" | "LA1" | "LA2" | "OC1" => "https://americas.api.riotgames.com",
        _ => "https://europe.api.riotgames.com",
    }
}

fn solo_rank_from_entries(entries: &Value) -> Option<String> {
    entries
        .as_array()?
        .iter()
        .find(|entry| entry.get("queueType").and_then(|q| q.as_str()) == Some("RANKED_SOLO_5x5"))
        .and_then(|entry| {
            let tier = entry.get("tier")?.as_str()?;
            let division = entry.get("rank")?.as_str()?;
            Some(format!("{} {}", tier, division))
        })
}

fn parse_retry_after(response: &reqwest::blocking::Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Sliding-window limiter over two windows (per-second and per-2-minutes).
pub struct RateLimiter {
    max_per_sec: usize,
    max_per_2min: usize,
    window_short: VecDeque<Instant>,
    window_long: VecDeque<Instant>,
}

impl RateLimiter {
    pub fn new(max_per_sec: usize, max_per_2min: usize) -> Self {
        Self {
            max_per_sec,
            max_per_2min,
            window_short: VecDeque::new(),
            window_long: VecDeque::new(),
        }
    }

    pub fn set_max_per_2min(&mut self, max_per_2min: usize) {
        self.max_per_2min = max_per_2min;
    }

    pub fn wait(&mut self) {
        loop {
            let now = Instant::now();
            self.prune(now);

            match self.next_free_slot(now) {
                Some(delay) => sleep(delay),
                None => {
                    self.window_short.push_back(now);
                    self.window_long.push_back(now);
                    return;
                }
            }
        }
    }

    /// How long until a request is allowed, or None if one is allowed now.
    fn next_free_slot(&self, now: Instant) -> Option<Duration> {
        if self.window_short.len() >= self.max_per_sec {
            if let Some(oldest) = self.window_short.front() {
                let elapsed = now.duration_since(*oldest);
                if elapsed < WINDOW_SHORT {
                    return Some(WINDOW_SHORT - elapsed);
                }
            }
        }

        if self.window_long.len() >= self.max_per_2min {
            if let Some(oldest) = self.window_long.front() {
                let elapsed = now.duration_since(*oldest);
                if elapsed < WINDOW_LONG {
                    return Some(WINDOW_LONG - elapsed);
                }
            }
        }

        None
    }

    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.window_short.front() {
            if now.duration_since(*front) > WINDOW_SHORT {
                self.window_short.pop_front();
            } else {
                break;
            }
        }

        while let Some(front) = self.window_long.front() {
            if now.duration_since(*front) > WINDOW_LONG {
                self.window_long.pop_front();
            } else {
                break;
            }
        }
    }
}
