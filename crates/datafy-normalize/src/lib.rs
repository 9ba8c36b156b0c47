//! Catalog payloads -> deduplicated relational rows.
//!
//! A [`SnapshotContext`] accumulates everything one snapshot run discovers,
//! across every account in the batch, and is consumed by
//! [`SnapshotContext::finalize`] into a [`SnapshotData`] bundle.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use datafy_catalog::{AlbumObject, ArtistObject, AudioFeaturesObject, ImageObject, TrackObject};
use datafy_core::{
    AlbumArtistRow, AlbumRow, ArtistGenreRow, ArtistRankingRow, ArtistRow, SnapshotData,
    TrackArtistRow, TrackFeaturesRow, TrackGenreRow, TrackRankingRow, TrackRow,
};
use thiserror::Error;
use tracing::warn;

pub const CRATE_NAME: &str = "datafy-normalize";

pub const UNTITLED: &str = "Untitled";
pub const UNKNOWN_ARTIST: &str = "Unknown";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("{resource} response returned {received} items for {requested} requested ids")]
    CountMismatch {
        resource: &'static str,
        requested: usize,
        received: usize,
    },
}

/// Run-scoped accumulator. One per snapshot run, never shared.
#[derive(Debug)]
pub struct SnapshotContext {
    taken_at: DateTime<Utc>,
    tracks: BTreeMap<String, TrackRow>,
    albums: BTreeMap<String, AlbumRow>,
    artists: BTreeMap<String, ArtistRow>,
    artist_genres: BTreeMap<String, BTreeSet<String>>,
    features: BTreeMap<String, TrackFeaturesRow>,
    track_artists: BTreeSet<TrackArtistRow>,
    album_artists: BTreeSet<AlbumArtistRow>,
    referenced_artists: BTreeSet<String>,
    track_rankings: Vec<TrackRankingRow>,
    artist_rankings: Vec<ArtistRankingRow>,
}

impl SnapshotContext {
    pub fn new(taken_at: DateTime<Utc>) -> Self {
        Self {
            taken_at,
            tracks: BTreeMap::new(),
            albums: BTreeMap::new(),
            artists: BTreeMap::new(),
            artist_genres: BTreeMap::new(),
            features: BTreeMap::new(),
            track_artists: BTreeSet::new(),
            album_artists: BTreeSet::new(),
            referenced_artists: BTreeSet::new(),
            track_rankings: Vec::new(),
            artist_rankings: Vec::new(),
        }
    }

    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }

    /// Records one user's top tracks: track, album and link rows plus the
    /// user's ranking for this run. A track seen earlier in the run keeps its
    /// first row; an album seen earlier is replaced by the latest payload.
    pub fn ingest_top_tracks(&mut self, user_id: &str, tracks: &[TrackObject]) {
        for (position, track) in tracks.iter().enumerate() {
            let Some(track_id) = present(&track.id) else {
                continue;
            };

            let album_id = track.album.as_ref().and_then(|album| self.ingest_album(album));

            self.tracks
                .entry(track_id.to_string())
                .or_insert_with(|| track_row(track, track_id, album_id));

            for artist in track.artists.iter().flatten() {
                let Some(artist_id) = present(&artist.id) else {
                    continue;
                };
                self.track_artists.insert(TrackArtistRow {
                    track_id: track_id.to_string(),
                    artist_id: artist_id.to_string(),
                });
                self.referenced_artists.insert(artist_id.to_string());
            }

            self.track_rankings.push(TrackRankingRow {
                user_id: user_id.to_string(),
                timestamp: self.taken_at,
                ranking: position as i32,
                track_id: track_id.to_string(),
            });
        }
    }

    /// Records one user's top artists. These payloads are complete, so the
    /// artists count as resolved.
    pub fn ingest_top_artists(&mut self, user_id: &str, artists: &[ArtistObject]) {
        for (position, artist) in artists.iter().enumerate() {
            let Some(artist_id) = self.ingest_artist(artist) else {
                continue;
            };
            self.artist_rankings.push(ArtistRankingRow {
                user_id: user_id.to_string(),
                timestamp: self.taken_at,
                ranking: position as i32,
                artist_id,
            });
        }
    }

    /// Artist ids referenced by tracks or albums with no full artist payload
    /// yet, sorted.
    pub fn unresolved_artist_ids(&self) -> Vec<String> {
        self.referenced_artists
            .iter()
            .filter(|id| !self.artists.contains_key(*id))
            .cloned()
            .collect()
    }

    /// Every track id discovered so far, sorted.
    pub fn track_ids(&self) -> Vec<String> {
        self.tracks.keys().cloned().collect()
    }

    /// Ingests the artist-detail response for `requested`. The response must
    /// carry exactly one artist per requested id.
    pub fn resolve_artists(
        &mut self,
        requested: &[String],
        fetched: &[ArtistObject],
    ) -> Result<(), NormalizeError> {
        if fetched.len() != requested.len() {
            return Err(NormalizeError::CountMismatch {
                resource: "artists",
                requested: requested.len(),
                received: fetched.len(),
            });
        }
        for artist in fetched {
            self.ingest_artist(artist);
        }
        Ok(())
    }

    /// Attaches audio features for `requested` track ids. Every requested id
    /// must end up with exactly one features row.
    pub fn attach_features(
        &mut self,
        requested: &[String],
        fetched: &[AudioFeaturesObject],
    ) -> Result<(), NormalizeError> {
        let mismatch = |received| NormalizeError::CountMismatch {
            resource: "audio-features",
            requested: requested.len(),
            received,
        };

        if fetched.len() != requested.len() {
            return Err(mismatch(fetched.len()));
        }

        let wanted: BTreeSet<&str> = requested.iter().map(String::as_str).collect();
        let mut attached = BTreeMap::new();
        for features in fetched {
            match present(&features.id) {
                Some(id) if wanted.contains(id) => {
                    attached.insert(id.to_string(), features_row(features, id));
                }
                other => {
                    warn!(track_id = ?other, "audio features for a track that was not requested");
                }
            }
        }

        if attached.len() != requested.len() {
            return Err(mismatch(attached.len()));
        }
        self.features.extend(attached);
        Ok(())
    }

    /// Derives track genres and emits the bundle.
    pub fn finalize(self) -> SnapshotData {
        let track_genres: BTreeSet<TrackGenreRow> = self
            .track_artists
            .iter()
            .flat_map(|link| {
                self.artist_genres
                    .get(&link.artist_id)
                    .into_iter()
                    .flatten()
                    .map(|genre| TrackGenreRow {
                        track_id: link.track_id.clone(),
                        genre: genre.clone(),
                    })
            })
            .collect();

        let artist_genres = self
            .artist_genres
            .iter()
            .flat_map(|(artist_id, genres)| {
                genres.iter().map(|genre| ArtistGenreRow {
                    artist_id: artist_id.clone(),
                    genre: genre.clone(),
                })
            })
            .collect();

        SnapshotData {
            taken_at: self.taken_at,
            albums: self.albums.into_values().collect(),
            artists: self.artists.into_values().collect(),
            tracks: self.tracks.into_values().collect(),
            track_features: self.features.into_values().collect(),
            track_artists: self.track_artists.into_iter().collect(),
            album_artists: self.album_artists.into_iter().collect(),
            track_genres: track_genres.into_iter().collect(),
            artist_genres,
            track_rankings: self.track_rankings,
            artist_rankings: self.artist_rankings,
        }
    }

    fn ingest_album(&mut self, album: &AlbumObject) -> Option<String> {
        let album_id = album.id.trim();
        if album_id.is_empty() {
            return None;
        }
        for artist in &album.artists {
            let Some(artist_id) = present(&artist.id) else {
                continue;
            };
            self.album_artists.insert(AlbumArtistRow {
                album_id: album_id.to_string(),
                artist_id: artist_id.to_string(),
            });
            self.referenced_artists.insert(artist_id.to_string());
        }
        self.albums
            .insert(album_id.to_string(), album_row(album, album_id));
        Some(album_id.to_string())
    }

    fn ingest_artist(&mut self, artist: &ArtistObject) -> Option<String> {
        let artist_id = present(&artist.id)?.to_string();
        let genres = artist.genres.iter().flatten().cloned().collect();
        self.artist_genres.insert(artist_id.clone(), genres);
        self.artists
            .insert(artist_id.clone(), artist_row(artist, &artist_id));
        Some(artist_id)
    }
}

fn present(id: &Option<String>) -> Option<&str> {
    id.as_deref().map(str::trim).filter(|id| !id.is_empty())
}

fn first_image_url(images: &[ImageObject]) -> Option<String> {
    images.first().map(|image| image.url.clone())
}

fn or_default_name(name: Option<&str>, fallback: &str) -> String {
    match name.map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => fallback.to_string(),
    }
}

/// Leading `YYYY` of a catalog release date (`YYYY`, `YYYY-MM` or
/// `YYYY-MM-DD`), `0` when absent.
pub fn release_year(release_date: &str) -> i32 {
    release_date
        .split('-')
        .next()
        .and_then(|year| year.trim().parse().ok())
        .unwrap_or(0)
}

pub fn track_row(track: &TrackObject, track_id: &str, album_id: Option<String>) -> TrackRow {
    TrackRow {
        track_id: track_id.to_string(),
        name: or_default_name(track.name.as_deref(), UNTITLED),
        explicit: track.explicit.unwrap_or(false),
        popularity: track.popularity.unwrap_or(0),
        album_id,
    }
}

pub fn album_row(album: &AlbumObject, album_id: &str) -> AlbumRow {
    AlbumRow {
        album_id: album_id.to_string(),
        name: or_default_name(Some(album.name.as_str()), UNTITLED),
        album_type: album.album_type.clone(),
        total_tracks: album.total_tracks,
        release_year: release_year(&album.release_date),
        image_url: first_image_url(&album.images),
    }
}

pub fn artist_row(artist: &ArtistObject, artist_id: &str) -> ArtistRow {
    ArtistRow {
        artist_id: artist_id.to_string(),
        name: or_default_name(artist.name.as_deref(), UNKNOWN_ARTIST),
        popularity: artist.popularity.unwrap_or(0),
        followers: artist
            .followers
            .as_ref()
            .and_then(|f| f.total)
            .unwrap_or(0),
        image_url: artist.images.as_deref().and_then(first_image_url),
    }
}

pub fn features_row(features: &AudioFeaturesObject, track_id: &str) -> TrackFeaturesRow {
    TrackFeaturesRow {
        track_id: track_id.to_string(),
        duration_ms: features.duration_ms.unwrap_or(0),
        acousticness: features.acousticness.unwrap_or(0.0),
        danceability: features.danceability.unwrap_or(0.0),
        instrumentalness: features.instrumentalness.unwrap_or(0.0),
        liveness: features.liveness.unwrap_or(0.0),
        loudness: features.loudness.unwrap_or(0.0),
        speechiness: features.speechiness.unwrap_or(0.0),
        energy: features.energy.unwrap_or(0.0),
        valence: features.valence.unwrap_or(0.0),
        key: features.key.unwrap_or(0),
        mode: features.mode.unwrap_or(0),
        tempo: features.tempo.unwrap_or(0.0),
        time_signature: features.time_signature.unwrap_or(0),
    }
}
