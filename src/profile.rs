//! GitHub profile panel: REST + GraphQL fetch, memory-only caching, and
//! content change detection.
//!
//! The profile has no persistent tier; a stale in-memory copy is the only
//! degradation source. Layered on the cache is a fingerprint comparison over
//! a fixed subset of fields so consumers can ask "did anything meaningful
//! change since I last looked?" without diffing payloads themselves.

use crate::cache::{Backing, CacheConfig, CacheError, FetchError, FreshCache};
use crate::json::parse_json_with_path;
use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};
use ts_rs::TS;

#[derive(Debug, Clone, Serialize, TS)]
#[ts(export)]
pub struct ProfileRepo {
    pub name: String,
    pub description: Option<String>,
    pub html_url: String,
    pub language: Option<String>,
    pub stargazers_count: i64,
    pub forks_count: i64,
    /// Volatile; excluded from the change fingerprint.
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, TS)]
#[ts(export)]
pub struct Profile {
    pub name: String,
    pub login: String,
    pub bio: Option<String>,
    pub avatar_url: String,
    pub html_url: String,
    pub public_repos: i64,
    pub followers: i64,
    pub following: i64,
    pub location: Option<String>,
    pub blog: Option<String>,
    pub twitter_username: Option<String>,
    pub repos: Vec<ProfileRepo>,
    /// Names of pinned repositories (GraphQL; empty without an API token).
    pub pinned: Vec<String>,
}

// -- Wire shapes --

#[derive(Deserialize)]
struct ApiUser {
    login: String,
    name: Option<String>,
    bio: Option<String>,
    avatar_url: String,
    html_url: String,
    public_repos: i64,
    followers: i64,
    following: i64,
    location: Option<String>,
    blog: Option<String>,
    twitter_username: Option<String>,
}

#[derive(Deserialize)]
struct ApiRepo {
    name: String,
    description: Option<String>,
    html_url: String,
    language: Option<String>,
    stargazers_count: i64,
    forks_count: i64,
    updated_at: Option<String>,
}

#[derive(Deserialize)]
struct PinnedResponse {
    data: Option<PinnedData>,
}

#[derive(Deserialize)]
struct PinnedData {
    user: Option<PinnedUser>,
}

#[derive(Deserialize)]
struct PinnedUser {
    #[serde(rename = "pinnedItems")]
    pinned_items: PinnedItems,
}

#[derive(Deserialize)]
struct PinnedItems {
    nodes: Vec<PinnedNode>,
}

#[derive(Deserialize)]
struct PinnedNode {
    name: String,
}

// -- Change detection --

/// Stable content fingerprint over the fields that matter to viewers.
///
/// Volatile fields (repo `updated_at`, recent activity) are deliberately
/// excluded: hashing them would flag a change on nearly every fetch.
fn fingerprint(profile: &Profile) -> [u8; 32] {
    let mut canon = String::new();
    let mut field = |value: &str| {
        canon.push_str(value);
        canon.push('\x1f');
    };

    field(&profile.name);
    field(&profile.login);
    field(profile.bio.as_deref().unwrap_or(""));
    field(profile.location.as_deref().unwrap_or(""));
    field(profile.blog.as_deref().unwrap_or(""));
    field(profile.twitter_username.as_deref().unwrap_or(""));
    let _ = write!(
        canon,
        "{}|{}|{}\x1f",
        profile.public_repos, profile.followers, profile.following
    );
    for repo in &profile.repos {
        let _ = write!(
            canon,
            "{}|{}|{}|{}\x1f",
            repo.name,
            repo.description.as_deref().unwrap_or(""),
            repo.stargazers_count,
            repo.forks_count
        );
    }
    for name in &profile.pinned {
        canon.push_str(name);
        canon.push('\x1f');
    }

    Sha256::digest(canon.as_bytes()).into()
}

#[derive(Default)]
struct DetectorState {
    baseline: Option<[u8; 32]>,
    changed: bool,
}

/// Process-wide change flag, sticky until consumed.
#[derive(Default)]
pub struct ChangeDetector {
    state: Mutex<DetectorState>,
}

impl ChangeDetector {
    /// Record a freshly fetched profile. The first observation establishes
    /// the baseline and reports nothing; later observations with a differing
    /// fingerprint arm the flag.
    fn observe(&self, profile: &Profile) {
        let fp = fingerprint(profile);
        let mut state = self.state.lock().expect("detector lock poisoned");
        match state.baseline {
            None => state.baseline = Some(fp),
            Some(previous) if previous != fp => {
                debug!("profile content changed");
                state.baseline = Some(fp);
                state.changed = true;
            }
            Some(_) => {}
        }
    }

    /// Return the flag and clear it in one step; an immediate second call
    /// reports `false` until another change is observed.
    fn consume(&self) -> bool {
        let mut state = self.state.lock().expect("detector lock poisoned");
        std::mem::take(&mut state.changed)
    }
}

// -- Upstream backing --

pub struct ProfileBacking {
    http: reqwest::Client,
    api_base: String,
    graphql_url: String,
    username: String,
    token: Option<String>,
    detector: Arc<ChangeDetector>,
}

impl ProfileBacking {
    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .http
            .get(url)
            .header("user-agent", concat!("binder/", env!("CARGO_PKG_VERSION")));
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, FetchError> {
        let response = self
            .request(url)
            .send()
            .await
            .map_err(|e| FetchError::Unavailable(anyhow!(e).context("profile request failed")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Unavailable(anyhow!(
                "profile API returned {status} for {url}"
            )));
        }

        let body = response.text().await.map_err(|e| {
            FetchError::Unavailable(anyhow!(e).context("profile body read failed"))
        })?;
        parse_json_with_path(&body).map_err(FetchError::Malformed)
    }

    /// Pinned repositories are only reachable through the GraphQL endpoint.
    /// Failures here degrade to an empty list rather than failing the fetch.
    async fn fetch_pinned(&self) -> Vec<String> {
        let Some(token) = &self.token else {
            return Vec::new();
        };

        let query = json!({
            "query": "query($login: String!) { user(login: $login) { \
                      pinnedItems(first: 6, types: REPOSITORY) { \
                      nodes { ... on Repository { name } } } } }",
            "variables": { "login": self.username },
        });

        let result = self
            .http
            .post(&self.graphql_url)
            .header("user-agent", concat!("binder/", env!("CARGO_PKG_VERSION")))
            .bearer_auth(token)
            .json(&query)
            .send()
            .await;

        let response = match result {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                warn!(status = %response.status(), "pinned repository query rejected");
                return Vec::new();
            }
            Err(e) => {
                warn!(error = %e, "pinned repository query failed");
                return Vec::new();
            }
        };

        match response.json::<PinnedResponse>().await {
            Ok(parsed) => parsed
                .data
                .and_then(|d| d.user)
                .map(|u| u.pinned_items.nodes.into_iter().map(|n| n.name).collect())
                .unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "pinned repository payload unreadable");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl Backing for ProfileBacking {
    type Value = Arc<Profile>;

    fn source(&self) -> &'static str {
        "profile"
    }

    // Memory-only instance: there is no persistent tier.
    async fn load(&self) -> Result<Option<(Arc<Profile>, DateTime<Utc>)>, FetchError> {
        Ok(None)
    }

    async fn fetch(&self) -> Result<Arc<Profile>, FetchError> {
        let user: ApiUser = self
            .get_json(&format!("{}/users/{}", self.api_base, self.username))
            .await?;
        let repos: Vec<ApiRepo> = self
            .get_json(&format!(
                "{}/users/{}/repos?sort=updated&per_page=6",
                self.api_base, self.username
            ))
            .await?;
        let pinned = self.fetch_pinned().await;

        let profile = Profile {
            name: user.name.unwrap_or_else(|| user.login.clone()),
            login: user.login,
            bio: user.bio,
            avatar_url: user.avatar_url,
            html_url: user.html_url,
            public_repos: user.public_repos,
            followers: user.followers,
            following: user.following,
            location: user.location,
            blog: user.blog,
            twitter_username: user.twitter_username,
            repos: repos
                .into_iter()
                .map(|repo| ProfileRepo {
                    name: repo.name,
                    description: repo.description,
                    html_url: repo.html_url,
                    language: repo.language,
                    stargazers_count: repo.stargazers_count,
                    forks_count: repo.forks_count,
                    updated_at: repo.updated_at,
                })
                .collect(),
            pinned,
        };

        // Fingerprints are taken on genuine upstream fetches only; cache hits
        // and stale reads never re-arm the flag.
        self.detector.observe(&profile);
        Ok(Arc::new(profile))
    }

    async fn store(&self, _value: &Arc<Profile>) -> Result<(), FetchError> {
        Ok(())
    }
}

/// The profile cache instance plus its change-detection layer.
pub struct ProfileService {
    cache: FreshCache<ProfileBacking>,
    detector: Arc<ChangeDetector>,
}

impl ProfileService {
    pub fn new(
        http: reqwest::Client,
        api_base: String,
        graphql_url: String,
        username: String,
        token: Option<String>,
        memory_ttl: std::time::Duration,
    ) -> Self {
        let detector = Arc::new(ChangeDetector::default());
        let backing = ProfileBacking {
            http,
            api_base,
            graphql_url,
            username,
            token,
            detector: detector.clone(),
        };
        let cache = FreshCache::new(
            backing,
            CacheConfig {
                memory_ttl,
                // No persistent tier; the TTL here is never consulted since
                // `load` always reports absence.
                persistent_ttl: memory_ttl,
                fallback: None,
            },
        );
        Self { cache, detector }
    }

    pub async fn get(&self) -> Result<Arc<Profile>, CacheError> {
        self.cache.get().await
    }

    pub fn invalidate(&self) {
        self.cache.invalidate();
    }

    pub fn consume_change_flag(&self) -> bool {
        self.detector.consume()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> Profile {
        Profile {
            name: "Katsune".to_owned(),
            login: "KatsuneNiko".to_owned(),
            bio: Some("Card collector".to_owned()),
            avatar_url: "https://example.com/avatar.png".to_owned(),
            html_url: "https://github.com/KatsuneNiko".to_owned(),
            public_repos: 12,
            followers: 34,
            following: 56,
            location: Some("Brisbane".to_owned()),
            blog: None,
            twitter_username: None,
            repos: vec![ProfileRepo {
                name: "binder".to_owned(),
                description: Some("Collection tracker".to_owned()),
                html_url: "https://github.com/KatsuneNiko/binder".to_owned(),
                language: Some("TypeScript".to_owned()),
                stargazers_count: 5,
                forks_count: 1,
                updated_at: Some("2025-01-01T00:00:00Z".to_owned()),
            }],
            pinned: vec!["binder".to_owned()],
        }
    }

    #[test]
    fn volatile_fields_do_not_change_fingerprint() {
        let a = profile();
        let mut b = profile();
        b.repos[0].updated_at = Some("2025-06-30T12:00:00Z".to_owned());
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn content_fields_change_fingerprint() {
        let a = profile();
        let mut b = profile();
        b.repos[0].stargazers_count += 1;
        assert_ne!(fingerprint(&a), fingerprint(&b));

        let mut c = profile();
        c.bio = Some("Retired card collector".to_owned());
        assert_ne!(fingerprint(&a), fingerprint(&c));
    }

    #[test]
    fn first_observation_reports_unchanged() {
        let detector = ChangeDetector::default();
        detector.observe(&profile());
        assert!(!detector.consume());
    }

    #[test]
    fn change_flag_is_sticky_until_consumed() {
        let detector = ChangeDetector::default();
        detector.observe(&profile());

        let mut changed = profile();
        changed.followers += 1;
        detector.observe(&changed);

        // Unconsumed flag survives an unchanged re-fetch.
        detector.observe(&changed);

        assert!(detector.consume());
        assert!(!detector.consume());
    }

    #[test]
    fn repeated_identical_observations_never_arm_flag() {
        let detector = ChangeDetector::default();
        detector.observe(&profile());
        detector.observe(&profile());
        detector.observe(&profile());
        assert!(!detector.consume());
    }
}
