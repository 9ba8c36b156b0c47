//! Response schemas for the catalog endpoints the snapshot pipeline reads.
//!
//! Only the fields the pipeline uses are declared; everything else in a
//! response is dropped during deserialization.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageObject {
    pub url: String,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub width: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FollowersObject {
    #[serde(default)]
    pub total: Option<i64>,
}

/// Full artist object, as returned by `/me/top/artists` and `/artists`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ArtistObject {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub popularity: Option<i32>,
    #[serde(default)]
    pub followers: Option<FollowersObject>,
    #[serde(default)]
    pub genres: Option<Vec<String>>,
    #[serde(default)]
    pub images: Option<Vec<ImageObject>>,
}

/// Artist stub embedded in track and album payloads. Carries no genres or
/// follower counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SimplifiedArtistObject {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlbumObject {
    pub id: String,
    pub name: String,
    pub album_type: String,
    pub total_tracks: i32,
    pub release_date: String,
    pub images: Vec<ImageObject>,
    pub artists: Vec<SimplifiedArtistObject>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TrackObject {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub explicit: Option<bool>,
    #[serde(default)]
    pub popularity: Option<i32>,
    #[serde(default)]
    pub duration_ms: Option<i32>,
    #[serde(default)]
    pub album: Option<AlbumObject>,
    #[serde(default)]
    pub artists: Option<Vec<SimplifiedArtistObject>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AudioFeaturesObject {
    #[serde(default, alias = "track_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub duration_ms: Option<i32>,
    #[serde(default)]
    pub acousticness: Option<f32>,
    #[serde(default)]
    pub danceability: Option<f32>,
    #[serde(default)]
    pub instrumentalness: Option<f32>,
    #[serde(default)]
    pub liveness: Option<f32>,
    #[serde(default)]
    pub loudness: Option<f32>,
    #[serde(default)]
    pub speechiness: Option<f32>,
    #[serde(default)]
    pub energy: Option<f32>,
    #[serde(default)]
    pub valence: Option<f32>,
    #[serde(default)]
    pub key: Option<i32>,
    #[serde(default)]
    pub mode: Option<i32>,
    #[serde(default)]
    pub tempo: Option<f32>,
    #[serde(default)]
    pub time_signature: Option<i32>,
}

/// `GET /me/top/{type}` envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct PagingObject<T> {
    pub items: Vec<T>,
}

/// `GET /artists?ids=..` envelope. Unknown ids come back as `null`.
#[derive(Debug, Clone, Deserialize)]
pub struct ArtistsResponse {
    pub artists: Vec<Option<ArtistObject>>,
}

/// `GET /audio-features?ids=..` envelope. Tracks without an analysis come
/// back as `null`.
#[derive(Debug, Clone, Deserialize)]
pub struct AudioFeaturesResponse {
    pub audio_features: Vec<Option<AudioFeaturesObject>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn track_payload_drops_unknown_fields_and_keeps_album() {
        let track: TrackObject = serde_json::from_value(json!({
            "id": "t1",
            "name": "Song",
            "explicit": true,
            "popularity": 71,
            "available_markets": ["SE"],
            "is_local": false,
            "album": {
                "id": "al1",
                "name": "Record",
                "album_type": "album",
                "total_tracks": 12,
                "release_date": "2019-05-03",
                "release_date_precision": "day",
                "images": [{"url": "https://img/640", "height": 640, "width": 640}],
                "artists": [{"id": "ar1", "name": "Band", "type": "artist"}]
            },
            "artists": [{"id": "ar1", "name": "Band"}]
        }))
        .unwrap();

        assert_eq!(track.id.as_deref(), Some("t1"));
        let album = track.album.unwrap();
        assert_eq!(album.total_tracks, 12);
        assert_eq!(album.artists[0].id.as_deref(), Some("ar1"));
    }

    #[test]
    fn album_without_required_fields_is_rejected() {
        let result = serde_json::from_value::<TrackObject>(json!({
            "id": "t1",
            "album": {"id": "al1", "name": "Record"}
        }));
        assert!(result.is_err());
    }

    #[test]
    fn audio_features_accept_track_id_alias() {
        let features: AudioFeaturesObject =
            serde_json::from_value(json!({"track_id": "t9", "tempo": 98.5})).unwrap();
        assert_eq!(features.id.as_deref(), Some("t9"));
        assert_eq!(features.tempo, Some(98.5));
        assert_eq!(features.key, None);
    }
}
