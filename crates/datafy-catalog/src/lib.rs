//! Typed client for the catalog API: paginated top-item lists and
//! batch-by-id lookups.

mod payload;
mod transport;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::warn;

pub use payload::*;
pub use transport::*;

pub const CRATE_NAME: &str = "datafy-catalog";

/// Maximum number of items the catalog accepts per request.
pub const MAX_REQUEST_ITEMS: usize = 50;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Error requesting {resource}: {source}")]
    Request {
        resource: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("Error requesting {resource}: http status {status}: {body}")]
    HttpStatus {
        resource: String,
        status: u16,
        body: String,
    },
    #[error("Error requesting {resource}: invalid response: {source}")]
    Validation {
        resource: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeRange {
    #[default]
    ShortTerm,
    MediumTerm,
    LongTerm,
}

impl TimeRange {
    pub fn as_str(self) -> &'static str {
        match self {
            TimeRange::ShortTerm => "short_term",
            TimeRange::MediumTerm => "medium_term",
            TimeRange::LongTerm => "long_term",
        }
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "short_term" => Ok(TimeRange::ShortTerm),
            "medium_term" => Ok(TimeRange::MediumTerm),
            "long_term" => Ok(TimeRange::LongTerm),
            other => Err(format!("unknown time range `{other}`")),
        }
    }
}

/// The four logical requests the snapshot pipeline issues.
///
/// Failures are absorbed here: a failed page or chunk ends the request and
/// whatever was already fetched is returned. Callers that need completeness
/// compare lengths themselves.
#[async_trait]
pub trait CatalogApi: Send + Sync {
    async fn top_tracks(&self, token: &str, nitems: usize) -> Vec<TrackObject>;

    async fn top_artists(&self, token: &str, nitems: usize) -> Vec<ArtistObject>;

    async fn artists(&self, token: &str, ids: &[String]) -> Vec<ArtistObject>;

    async fn audio_features(&self, token: &str, ids: &[String]) -> Vec<AudioFeaturesObject>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TopItemKind {
    Tracks,
    Artists,
}

impl TopItemKind {
    fn as_str(self) -> &'static str {
        match self {
            TopItemKind::Tracks => "tracks",
            TopItemKind::Artists => "artists",
        }
    }
}

pub struct CatalogClient<T> {
    transport: T,
    time_range: TimeRange,
}

impl<T: CatalogTransport> CatalogClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            time_range: TimeRange::default(),
        }
    }

    pub fn with_time_range(mut self, time_range: TimeRange) -> Self {
        self.time_range = time_range;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    async fn fetch_top_items<I: DeserializeOwned>(
        &self,
        token: &str,
        kind: TopItemKind,
        nitems: usize,
    ) -> Vec<I> {
        let path = format!("me/top/{}", kind.as_str());
        let mut data: Vec<I> = Vec::with_capacity(nitems);

        while data.len() < nitems {
            let offset = data.len();
            let limit = (nitems - offset).min(MAX_REQUEST_ITEMS);
            let query = vec![
                ("time_range".to_string(), self.time_range.as_str().to_string()),
                ("limit".to_string(), limit.to_string()),
                ("offset".to_string(), offset.to_string()),
            ];

            let page = match self.transport.get_json(token, &path, &query).await {
                Ok(json) => parse_response::<PagingObject<I>>(&path, json).map(|p| p.items),
                Err(err) => Err(err),
            };

            match page {
                Ok(items) if items.is_empty() => break,
                Ok(items) => data.extend(items.into_iter().take(limit)),
                Err(err) => {
                    warn!(
                        error = %err,
                        resource = kind.as_str(),
                        offset,
                        "Error requesting most played {}", kind.as_str()
                    );
                    warn!(
                        fetched = data.len(),
                        requested = nitems,
                        "Got {} {} out of {} requested",
                        data.len(),
                        kind.as_str(),
                        nitems
                    );
                    break;
                }
            }
        }

        data
    }

    async fn fetch_by_ids<R, I>(
        &self,
        token: &str,
        path: &str,
        ids: &[String],
        unwrap: impl Fn(R) -> Vec<Option<I>>,
    ) -> Vec<I>
    where
        R: DeserializeOwned,
    {
        let mut data = Vec::with_capacity(ids.len());

        for batch in ids.chunks(MAX_REQUEST_ITEMS) {
            let query = vec![("ids".to_string(), batch.join(","))];
            let result = match self.transport.get_json(token, path, &query).await {
                Ok(json) => parse_response::<R>(path, json),
                Err(err) => Err(err),
            };

            match result {
                Ok(envelope) => data.extend(unwrap(envelope).into_iter().flatten()),
                Err(err) => {
                    warn!(
                        error = %err,
                        resource = path,
                        fetched = data.len(),
                        requested = ids.len(),
                        "Error requesting {path} data"
                    );
                    break;
                }
            }
        }

        data
    }
}

fn parse_response<R: DeserializeOwned>(resource: &str, json: JsonValue) -> Result<R, CatalogError> {
    serde_json::from_value(json).map_err(|source| CatalogError::Validation {
        resource: resource.to_string(),
        source,
    })
}

#[async_trait]
impl<T: CatalogTransport> CatalogApi for CatalogClient<T> {
    async fn top_tracks(&self, token: &str, nitems: usize) -> Vec<TrackObject> {
        self.fetch_top_items(token, TopItemKind::Tracks, nitems).await
    }

    async fn top_artists(&self, token: &str, nitems: usize) -> Vec<ArtistObject> {
        self.fetch_top_items(token, TopItemKind::Artists, nitems).await
    }

    async fn artists(&self, token: &str, ids: &[String]) -> Vec<ArtistObject> {
        self.fetch_by_ids(token, "artists", ids, |r: ArtistsResponse| r.artists)
            .await
    }

    async fn audio_features(&self, token: &str, ids: &[String]) -> Vec<AudioFeaturesObject> {
        self.fetch_by_ids(token, "audio-features", ids, |r: AudioFeaturesResponse| {
            r.audio_features
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    type Responder = Box<dyn Fn(&str, &[(String, String)]) -> JsonValue + Send + Sync>;

    /// Records every request and answers from a closure; optionally fails
    /// the n-th call (zero-based).
    struct RecordingTransport {
        calls: Mutex<Vec<(String, Vec<(String, String)>)>>,
        fail_on_call: Option<usize>,
        respond: Responder,
    }

    impl RecordingTransport {
        fn new(respond: Responder) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail_on_call: None,
                respond,
            }
        }

        fn failing_on(mut self, call: usize) -> Self {
            self.fail_on_call = Some(call);
            self
        }

        fn calls(&self) -> Vec<(String, Vec<(String, String)>)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CatalogTransport for RecordingTransport {
        async fn get_json(
            &self,
            _token: &str,
            path: &str,
            query: &[(String, String)],
        ) -> Result<JsonValue, CatalogError> {
            let index = {
                let mut calls = self.calls.lock().unwrap();
                calls.push((path.to_string(), query.to_vec()));
                calls.len() - 1
            };
            if self.fail_on_call == Some(index) {
                return Err(CatalogError::HttpStatus {
                    resource: path.to_string(),
                    status: 502,
                    body: "bad gateway".into(),
                });
            }
            Ok((self.respond)(path, query))
        }
    }

    fn param(query: &[(String, String)], name: &str) -> String {
        query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
            .unwrap_or_default()
    }

    fn numbered_tracks(_path: &str, query: &[(String, String)]) -> JsonValue {
        let limit: usize = param(query, "limit").parse().unwrap();
        let offset: usize = param(query, "offset").parse().unwrap();
        let items: Vec<JsonValue> = (offset..offset + limit)
            .map(|i| json!({"id": format!("t{i}"), "name": format!("Track {i}")}))
            .collect();
        json!({ "items": items })
    }

    fn echo_artists(_path: &str, query: &[(String, String)]) -> JsonValue {
        let artists: Vec<JsonValue> = param(query, "ids")
            .split(',')
            .map(|id| json!({"id": id, "name": id.to_uppercase(), "genres": []}))
            .collect();
        json!({ "artists": artists })
    }

    fn offsets_and_limits(calls: &[(String, Vec<(String, String)>)]) -> Vec<(usize, usize)> {
        calls
            .iter()
            .map(|(_, q)| {
                (
                    param(q, "offset").parse().unwrap(),
                    param(q, "limit").parse().unwrap(),
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn pagination_issues_ceil_rounds_with_advancing_offsets() {
        let client = CatalogClient::new(RecordingTransport::new(Box::new(numbered_tracks)));

        let tracks = client.top_tracks("token", 120).await;

        assert_eq!(tracks.len(), 120);
        assert_eq!(tracks[0].id.as_deref(), Some("t0"));
        assert_eq!(tracks[119].id.as_deref(), Some("t119"));
        let calls = client.transport().calls();
        assert!(calls.iter().all(|(path, _)| path == "me/top/tracks"));
        assert_eq!(offsets_and_limits(&calls), vec![(0, 50), (50, 50), (100, 20)]);
        assert!(calls
            .iter()
            .all(|(_, q)| param(q, "time_range") == "short_term"));
    }

    #[tokio::test]
    async fn pagination_exact_multiple_uses_full_last_round() {
        let client = CatalogClient::new(RecordingTransport::new(Box::new(numbered_tracks)))
            .with_time_range(TimeRange::LongTerm);

        let tracks = client.top_tracks("token", 100).await;

        assert_eq!(tracks.len(), 100);
        let calls = client.transport().calls();
        assert_eq!(offsets_and_limits(&calls), vec![(0, 50), (50, 50)]);
        assert_eq!(param(&calls[0].1, "time_range"), "long_term");
    }

    #[tokio::test]
    async fn failed_round_returns_items_accumulated_so_far() {
        let client = CatalogClient::new(
            RecordingTransport::new(Box::new(numbered_tracks)).failing_on(1),
        );

        let tracks = client.top_tracks("token", 120).await;

        assert_eq!(tracks.len(), 50);
        assert_eq!(client.transport().calls().len(), 2);
    }

    #[tokio::test]
    async fn malformed_page_counts_as_failed_round() {
        let client = CatalogClient::new(RecordingTransport::new(Box::new(|_: &str, query: &[(String, String)]| {
            if param(query, "offset") == "0" {
                numbered_tracks("me/top/tracks", query)
            } else {
                json!({ "items": "not-a-list" })
            }
        })));

        let tracks = client.top_tracks("token", 80).await;

        assert_eq!(tracks.len(), 50);
    }

    #[tokio::test]
    async fn short_catalog_stops_on_empty_page() {
        let client = CatalogClient::new(RecordingTransport::new(Box::new(|_: &str, query: &[(String, String)]| {
            if param(query, "offset") == "0" {
                json!({ "items": [{"id": "a1"}, {"id": "a2"}] })
            } else {
                json!({ "items": [] })
            }
        })));

        let artists = client.top_artists("token", 100).await;

        assert_eq!(artists.len(), 2);
        let calls = client.transport().calls();
        assert_eq!(offsets_and_limits(&calls), vec![(0, 50), (2, 50)]);
        assert!(calls.iter().all(|(path, _)| path == "me/top/artists"));
    }

    #[tokio::test]
    async fn batch_lookup_chunks_ids_by_fifty_preserving_order() {
        let client = CatalogClient::new(RecordingTransport::new(Box::new(echo_artists)));
        let ids: Vec<String> = (0..120).map(|i| format!("ar{i}")).collect();

        let artists = client.artists("token", &ids).await;

        let calls = client.transport().calls();
        assert_eq!(calls.len(), 3);
        let sizes: Vec<usize> = calls
            .iter()
            .map(|(_, q)| param(q, "ids").split(',').count())
            .collect();
        assert_eq!(sizes, vec![50, 50, 20]);
        let returned: Vec<String> = artists.into_iter().filter_map(|a| a.id).collect();
        assert_eq!(returned, ids);
    }

    #[tokio::test]
    async fn failed_chunk_aborts_remaining_but_keeps_fetched() {
        let client = CatalogClient::new(
            RecordingTransport::new(Box::new(echo_artists)).failing_on(1),
        );
        let ids: Vec<String> = (0..150).map(|i| format!("ar{i}")).collect();

        let artists = client.artists("token", &ids).await;

        assert_eq!(artists.len(), 50);
        assert_eq!(client.transport().calls().len(), 2);
    }

    #[tokio::test]
    async fn empty_id_list_issues_no_requests() {
        let client = CatalogClient::new(RecordingTransport::new(Box::new(echo_artists)));
        assert!(client.artists("token", &[]).await.is_empty());
        assert!(client.transport().calls().is_empty());
    }

    #[tokio::test]
    async fn audio_features_are_read_from_audio_features_field() {
        let client = CatalogClient::new(RecordingTransport::new(Box::new(|path: &str, query: &[(String, String)]| {
            assert_eq!(path, "audio-features");
            let features: Vec<JsonValue> = param(query, "ids")
                .split(',')
                .map(|id| json!({"id": id, "danceability": 0.5}))
                .collect();
            json!({
                "audio_features": features,
                "artists": [{"id": "decoy"}]
            })
        })));
        let ids = vec!["t1".to_string(), "t2".to_string()];

        let features = client.audio_features("token", &ids).await;

        let returned: Vec<_> = features.iter().filter_map(|f| f.id.clone()).collect();
        assert_eq!(returned, ids);
    }

    #[tokio::test]
    async fn audio_features_under_wrong_field_are_a_validation_error() {
        let client = CatalogClient::new(RecordingTransport::new(Box::new(|_: &str, _: &[(String, String)]| {
            json!({ "artists": [{"id": "t1"}] })
        })));

        let features = client
            .audio_features("token", &["t1".to_string()])
            .await;

        assert!(features.is_empty());
    }

    #[tokio::test]
    async fn null_entries_are_skipped() {
        let client = CatalogClient::new(RecordingTransport::new(Box::new(|_: &str, _: &[(String, String)]| {
            json!({ "audio_features": [{"id": "t1"}, null] })
        })));

        let features = client
            .audio_features("token", &["t1".to_string(), "t2".to_string()])
            .await;

        assert_eq!(features.len(), 1);
    }

    #[test]
    fn validation_error_message_names_resource() {
        let err = parse_response::<ArtistsResponse>("artists", json!({"nope": 1})).unwrap_err();
        assert!(err.to_string().starts_with("Error requesting artists"));
    }

    #[test]
    fn time_range_parses_catalog_names() {
        assert_eq!("medium_term".parse::<TimeRange>().unwrap(), TimeRange::MediumTerm);
        assert!("forever".parse::<TimeRange>().is_err());
        assert_eq!(TimeRange::default().to_string(), "short_term");
    }
}
