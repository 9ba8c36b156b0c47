//! Core relational model for Datafy listening snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "datafy-core";

/// Provider name under which catalog OAuth accounts are stored.
pub const CATALOG_PROVIDER: &str = "spotify";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackRow {
    pub track_id: String,
    pub name: String,
    pub explicit: bool,
    pub popularity: i32,
    pub album_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtistRow {
    pub artist_id: String,
    pub name: String,
    pub popularity: i32,
    pub followers: i64,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlbumRow {
    pub album_id: String,
    pub name: String,
    pub album_type: String,
    pub total_tracks: i32,
    pub release_year: i32,
    pub image_url: Option<String>,
}

/// Acoustic descriptors for one track, 1:1 with [`TrackRow`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackFeaturesRow {
    pub track_id: String,
    pub duration_ms: i32,
    pub acousticness: f32,
    pub danceability: f32,
    pub instrumentalness: f32,
    pub liveness: f32,
    pub loudness: f32,
    pub speechiness: f32,
    pub energy: f32,
    pub valence: f32,
    pub key: i32,
    pub mode: i32,
    pub tempo: f32,
    pub time_signature: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TrackArtistRow {
    pub track_id: String,
    pub artist_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AlbumArtistRow {
    pub album_id: String,
    pub artist_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TrackGenreRow {
    pub track_id: String,
    pub genre: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ArtistGenreRow {
    pub artist_id: String,
    pub genre: String,
}

/// One position of a user's top-tracks list within one snapshot run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackRankingRow {
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub ranking: i32,
    pub track_id: String,
}

/// One position of a user's top-artists list within one snapshot run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtistRankingRow {
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub ranking: i32,
    pub artist_id: String,
}

/// Everything one snapshot run commits, in dependency order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotData {
    pub taken_at: DateTime<Utc>,
    pub albums: Vec<AlbumRow>,
    pub artists: Vec<ArtistRow>,
    pub tracks: Vec<TrackRow>,
    pub track_features: Vec<TrackFeaturesRow>,
    pub track_artists: Vec<TrackArtistRow>,
    pub album_artists: Vec<AlbumArtistRow>,
    pub track_genres: Vec<TrackGenreRow>,
    pub artist_genres: Vec<ArtistGenreRow>,
    pub track_rankings: Vec<TrackRankingRow>,
    pub artist_rankings: Vec<ArtistRankingRow>,
}

impl SnapshotData {
    pub fn empty(taken_at: DateTime<Utc>) -> Self {
        Self {
            taken_at,
            albums: Vec::new(),
            artists: Vec::new(),
            tracks: Vec::new(),
            track_features: Vec::new(),
            track_artists: Vec::new(),
            album_artists: Vec::new(),
            track_genres: Vec::new(),
            artist_genres: Vec::new(),
            track_rankings: Vec::new(),
            artist_rankings: Vec::new(),
        }
    }

    pub fn counts(&self) -> SnapshotCounts {
        SnapshotCounts {
            albums: self.albums.len(),
            artists: self.artists.len(),
            tracks: self.tracks.len(),
            track_features: self.track_features.len(),
            track_artists: self.track_artists.len(),
            album_artists: self.album_artists.len(),
            track_genres: self.track_genres.len(),
            artist_genres: self.artist_genres.len(),
            track_rankings: self.track_rankings.len(),
            artist_rankings: self.artist_rankings.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.counts() == SnapshotCounts::default()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotCounts {
    pub albums: usize,
    pub artists: usize,
    pub tracks: usize,
    pub track_features: usize,
    pub track_artists: usize,
    pub album_artists: usize,
    pub track_genres: usize,
    pub artist_genres: usize,
    pub track_rankings: usize,
    pub artist_rankings: usize,
}

/// What happens when an inserted row collides with an existing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Replace every mutable column with the incoming value.
    Overwrite,
    /// Keep the existing row untouched.
    Ignore,
}

/// Persisted tables, with their column layout declared up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Album,
    Artist,
    Track,
    TrackFeatures,
    TrackArtist,
    AlbumArtist,
    TrackGenre,
    ArtistGenre,
    TrackRanking,
    ArtistRanking,
}

impl EntityKind {
    /// Base-data tables in foreign-key order.
    pub const BASE: [EntityKind; 8] = [
        EntityKind::Album,
        EntityKind::Artist,
        EntityKind::Track,
        EntityKind::TrackFeatures,
        EntityKind::TrackArtist,
        EntityKind::AlbumArtist,
        EntityKind::TrackGenre,
        EntityKind::ArtistGenre,
    ];

    pub const RANKINGS: [EntityKind; 2] = [EntityKind::TrackRanking, EntityKind::ArtistRanking];

    pub fn table(self) -> &'static str {
        match self {
            EntityKind::Album => "datafy_album",
            EntityKind::Artist => "datafy_artist",
            EntityKind::Track => "datafy_track",
            EntityKind::TrackFeatures => "datafy_track_features",
            EntityKind::TrackArtist => "datafy_track_artist",
            EntityKind::AlbumArtist => "datafy_album_artist",
            EntityKind::TrackGenre => "datafy_track_genre",
            EntityKind::ArtistGenre => "datafy_artist_genre",
            EntityKind::TrackRanking => "datafy_track_ranking",
            EntityKind::ArtistRanking => "datafy_artist_ranking",
        }
    }

    pub fn key_columns(self) -> &'static [&'static str] {
        match self {
            EntityKind::Album => &["album_id"],
            EntityKind::Artist => &["artist_id"],
            EntityKind::Track | EntityKind::TrackFeatures => &["track_id"],
            EntityKind::TrackArtist => &["track_id", "artist_id"],
            EntityKind::AlbumArtist => &["album_id", "artist_id"],
            EntityKind::TrackGenre => &["track_id", "genre"],
            EntityKind::ArtistGenre => &["artist_id", "genre"],
            EntityKind::TrackRanking | EntityKind::ArtistRanking => {
                &["user_id", "timestamp", "ranking"]
            }
        }
    }

    /// Columns rewritten on conflict. Empty for link and history tables.
    pub fn mutable_columns(self) -> &'static [&'static str] {
        match self {
            EntityKind::Album => &[
                "name",
                "album_type",
                "total_tracks",
                "release_year",
                "image_url",
            ],
            EntityKind::Artist => &["name", "popularity", "followers", "image_url"],
            EntityKind::Track => &["name", "explicit", "popularity", "album_id"],
            EntityKind::TrackFeatures => &[
                "duration_ms",
                "acousticness",
                "danceability",
                "instrumentalness",
                "liveness",
                "loudness",
                "speechiness",
                "energy",
                "valence",
                "key",
                "mode",
                "tempo",
                "time_signature",
            ],
            EntityKind::TrackArtist
            | EntityKind::AlbumArtist
            | EntityKind::TrackGenre
            | EntityKind::ArtistGenre
            | EntityKind::TrackRanking
            | EntityKind::ArtistRanking => &[],
        }
    }

    /// Full insert column list: key columns, then mutable ones, then any
    /// write-once payload columns.
    pub fn columns(self) -> Vec<&'static str> {
        let mut columns = self.key_columns().to_vec();
        columns.extend_from_slice(self.mutable_columns());
        match self {
            EntityKind::TrackRanking => columns.push("track_id"),
            EntityKind::ArtistRanking => columns.push("artist_id"),
            _ => {}
        }
        columns
    }

    pub fn conflict_policy(self) -> ConflictPolicy {
        if self.mutable_columns().is_empty() {
            ConflictPolicy::Ignore
        } else {
            ConflictPolicy::Overwrite
        }
    }
}

/// A single bindable column value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnValue {
    Text(String),
    NullableText(Option<String>),
    Bool(bool),
    Int(i32),
    BigInt(i64),
    Real(f32),
    Timestamp(DateTime<Utc>),
}

impl ColumnValue {
    /// Stable textual form, used to compare key columns.
    pub fn key_fragment(&self) -> String {
        match self {
            ColumnValue::Text(v) => v.clone(),
            ColumnValue::NullableText(v) => v.clone().unwrap_or_default(),
            ColumnValue::Bool(v) => v.to_string(),
            ColumnValue::Int(v) => v.to_string(),
            ColumnValue::BigInt(v) => v.to_string(),
            ColumnValue::Real(v) => v.to_string(),
            ColumnValue::Timestamp(v) => v.to_rfc3339(),
        }
    }
}

/// A row that maps onto one [`EntityKind`] table.
pub trait EntityRow {
    const KIND: EntityKind;

    /// Values in [`EntityKind::columns`] order.
    fn values(&self) -> Vec<ColumnValue>;
}

fn text(value: &str) -> ColumnValue {
    ColumnValue::Text(value.to_string())
}

impl EntityRow for AlbumRow {
    const KIND: EntityKind = EntityKind::Album;

    fn values(&self) -> Vec<ColumnValue> {
        vec![
            text(&self.album_id),
            text(&self.name),
            text(&self.album_type),
            ColumnValue::Int(self.total_tracks),
            ColumnValue::Int(self.release_year),
            ColumnValue::NullableText(self.image_url.clone()),
        ]
    }
}

impl EntityRow for ArtistRow {
    const KIND: EntityKind = EntityKind::Artist;

    fn values(&self) -> Vec<ColumnValue> {
        vec![
            text(&self.artist_id),
            text(&self.name),
            ColumnValue::Int(self.popularity),
            ColumnValue::BigInt(self.followers),
            ColumnValue::NullableText(self.image_url.clone()),
        ]
    }
}

impl EntityRow for TrackRow {
    const KIND: EntityKind = EntityKind::Track;

    fn values(&self) -> Vec<ColumnValue> {
        vec![
            text(&self.track_id),
            text(&self.name),
            ColumnValue::Bool(self.explicit),
            ColumnValue::Int(self.popularity),
            ColumnValue::NullableText(self.album_id.clone()),
        ]
    }
}

impl EntityRow for TrackFeaturesRow {
    const KIND: EntityKind = EntityKind::TrackFeatures;

    fn values(&self) -> Vec<ColumnValue> {
        vec![
            text(&self.track_id),
            ColumnValue::Int(self.duration_ms),
            ColumnValue::Real(self.acousticness),
            ColumnValue::Real(self.danceability),
            ColumnValue::Real(self.instrumentalness),
            ColumnValue::Real(self.liveness),
            ColumnValue::Real(self.loudness),
            ColumnValue::Real(self.speechiness),
            ColumnValue::Real(self.energy),
            ColumnValue::Real(self.valence),
            ColumnValue::Int(self.key),
            ColumnValue::Int(self.mode),
            ColumnValue::Real(self.tempo),
            ColumnValue::Int(self.time_signature),
        ]
    }
}

impl EntityRow for TrackArtistRow {
    const KIND: EntityKind = EntityKind::TrackArtist;

    fn values(&self) -> Vec<ColumnValue> {
        vec![text(&self.track_id), text(&self.artist_id)]
    }
}

impl EntityRow for AlbumArtistRow {
    const KIND: EntityKind = EntityKind::AlbumArtist;

    fn values(&self) -> Vec<ColumnValue> {
        vec![text(&self.album_id), text(&self.artist_id)]
    }
}

impl EntityRow for TrackGenreRow {
    const KIND: EntityKind = EntityKind::TrackGenre;

    fn values(&self) -> Vec<ColumnValue> {
        vec![text(&self.track_id), text(&self.genre)]
    }
}

impl EntityRow for ArtistGenreRow {
    const KIND: EntityKind = EntityKind::ArtistGenre;

    fn values(&self) -> Vec<ColumnValue> {
        vec![text(&self.artist_id), text(&self.genre)]
    }
}

impl EntityRow for TrackRankingRow {
    const KIND: EntityKind = EntityKind::TrackRanking;

    fn values(&self) -> Vec<ColumnValue> {
        vec![
            text(&self.user_id),
            ColumnValue::Timestamp(self.timestamp),
            ColumnValue::Int(self.ranking),
            text(&self.track_id),
        ]
    }
}

impl EntityRow for ArtistRankingRow {
    const KIND: EntityKind = EntityKind::ArtistRanking;

    fn values(&self) -> Vec<ColumnValue> {
        vec![
            text(&self.user_id),
            ColumnValue::Timestamp(self.timestamp),
            ColumnValue::Int(self.ranking),
            text(&self.artist_id),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_features() -> TrackFeaturesRow {
        TrackFeaturesRow {
            track_id: "t1".into(),
            duration_ms: 215_000,
            acousticness: 0.1,
            danceability: 0.7,
            instrumentalness: 0.0,
            liveness: 0.2,
            loudness: -5.5,
            speechiness: 0.05,
            energy: 0.8,
            valence: 0.6,
            key: 5,
            mode: 1,
            tempo: 120.0,
            time_signature: 4,
        }
    }

    #[test]
    fn every_kind_declares_values_matching_its_columns() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 6, 0, 0).single().unwrap();
        let widths = [
            (
                EntityKind::Album,
                AlbumRow {
                    album_id: "al".into(),
                    name: "A".into(),
                    album_type: "album".into(),
                    total_tracks: 10,
                    release_year: 2020,
                    image_url: None,
                }
                .values()
                .len(),
            ),
            (
                EntityKind::Artist,
                ArtistRow {
                    artist_id: "ar".into(),
                    name: "B".into(),
                    popularity: 1,
                    followers: 2,
                    image_url: None,
                }
                .values()
                .len(),
            ),
            (
                EntityKind::Track,
                TrackRow {
                    track_id: "t".into(),
                    name: "C".into(),
                    explicit: false,
                    popularity: 3,
                    album_id: None,
                }
                .values()
                .len(),
            ),
            (EntityKind::TrackFeatures, sample_features().values().len()),
            (
                EntityKind::TrackArtist,
                TrackArtistRow {
                    track_id: "t".into(),
                    artist_id: "ar".into(),
                }
                .values()
                .len(),
            ),
            (
                EntityKind::TrackRanking,
                TrackRankingRow {
                    user_id: "u".into(),
                    timestamp: ts,
                    ranking: 0,
                    track_id: "t".into(),
                }
                .values()
                .len(),
            ),
            (
                EntityKind::ArtistRanking,
                ArtistRankingRow {
                    user_id: "u".into(),
                    timestamp: ts,
                    ranking: 0,
                    artist_id: "ar".into(),
                }
                .values()
                .len(),
            ),
        ];

        for (kind, width) in widths {
            assert_eq!(kind.columns().len(), width, "{kind:?}");
        }
    }

    #[test]
    fn link_and_history_tables_never_overwrite() {
        for kind in [
            EntityKind::TrackArtist,
            EntityKind::AlbumArtist,
            EntityKind::TrackGenre,
            EntityKind::ArtistGenre,
            EntityKind::TrackRanking,
            EntityKind::ArtistRanking,
        ] {
            assert_eq!(kind.conflict_policy(), ConflictPolicy::Ignore, "{kind:?}");
        }
        for kind in [
            EntityKind::Album,
            EntityKind::Artist,
            EntityKind::Track,
            EntityKind::TrackFeatures,
        ] {
            assert_eq!(kind.conflict_policy(), ConflictPolicy::Overwrite, "{kind:?}");
            for column in kind.mutable_columns() {
                assert!(!kind.key_columns().contains(column));
            }
        }
    }

    #[test]
    fn ranking_key_is_user_timestamp_position() {
        assert_eq!(
            EntityKind::TrackRanking.columns(),
            vec!["user_id", "timestamp", "ranking", "track_id"]
        );
        assert_eq!(
            EntityKind::ArtistRanking.key_columns(),
            &["user_id", "timestamp", "ranking"]
        );
    }

    #[test]
    fn empty_snapshot_reports_zero_counts() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 6, 0, 0).single().unwrap();
        let data = SnapshotData::empty(ts);
        assert!(data.is_empty());
        let json = serde_json::to_value(data.counts()).unwrap();
        assert_eq!(json["track_rankings"], 0);
    }
}
