/// Event engine: activity writes, secondary indexes and feed fan-out
mod engine;

pub use engine::EventEngine;

use crate::{
    error::{ApiError, ApiResult, ErrorCode},
    models::{Event, EventObject, Visibility},
    validation::{length_between, valid_coordinates, FieldReport},
};
use serde::{Deserialize, Serialize};

/// Radius used when only `nearest` is given, half the earth's circumference
const WHOLE_EARTH_M: f64 = 20_037_509.0;

/// Upper bound on radius search hits
const RADIUS_RESULT_CAP: usize = 1_000;

/// Event body for create and update.
///
/// On update every field but `enabled` must either be absent or equal the
/// stored value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventBody {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(rename = "type", default)]
    pub verb: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub object: Option<EventObject>,
    #[serde(default)]
    pub target: Option<EventObject>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub visibility: Option<Visibility>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

impl EventBody {
    /// Field checks for a new event
    pub fn validate_new(&self) -> ApiResult<()> {
        let mut report = FieldReport::new();
        report
            .require(self.id.is_none(), ErrorCode::EventIdPreset)
            .require(
                self.verb
                    .as_deref()
                    .map(|verb| length_between(verb, 1, 30))
                    .unwrap_or(false),
                ErrorCode::VerbLength,
            )
            .require(self.visibility.is_some(), ErrorCode::VisibilityMissing);

        if let (Some(latitude), Some(longitude)) = (self.latitude, self.longitude) {
            report.require(valid_coordinates(latitude, longitude), ErrorCode::InvalidCoordinates);
        }
        report.finish()
    }

    /// Whether any semantic field differs from `event`
    pub fn changes_payload(&self, event: &Event) -> bool {
        fn differs<T: PartialEq>(proposed: &Option<T>, current: &T) -> bool {
            proposed.as_ref().map(|value| value != current).unwrap_or(false)
        }
        fn differs_opt<T: PartialEq>(proposed: &Option<T>, current: &Option<T>) -> bool {
            proposed.is_some() && proposed != current
        }

        differs(&self.id, &event.id)
            || differs(&self.verb, &event.verb)
            || differs(&self.visibility, &event.visibility)
            || differs(&self.tags, &event.tags)
            || differs_opt(&self.language, &event.language)
            || differs_opt(&self.priority, &event.priority)
            || differs_opt(&self.location, &event.location)
            || differs_opt(&self.latitude, &event.latitude)
            || differs_opt(&self.longitude, &event.longitude)
            || differs_opt(&self.object, &event.object)
            || differs_opt(&self.target, &event.target)
            || differs_opt(&self.metadata, &event.metadata)
    }
}

/// Raw `GET /events` query string
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchParams {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub rad: Option<f64>,
    pub nearest: Option<i64>,
    pub location: Option<String>,
    pub object: Option<String>,
}

/// A validated event search
#[derive(Debug, Clone, PartialEq)]
pub enum EventQuery {
    Geo {
        latitude: f64,
        longitude: f64,
        radius_m: f64,
        limit: usize,
    },
    Object(String),
    Location(String),
}

impl SearchParams {
    /// Enforce the search bounds. `nearest` wins over `rad` when both are set.
    pub fn into_query(self) -> ApiResult<EventQuery> {
        if let Some(nearest) = self.nearest {
            if !(1..=200).contains(&nearest) {
                return Err(ErrorCode::GeoNearestOutOfBounds.into());
            }
        }

        if let (Some(latitude), Some(longitude)) = (self.lat, self.lon) {
            if !valid_coordinates(latitude, longitude) {
                return Err(ErrorCode::InvalidCoordinates.into());
            }

            let radius = self.rad.unwrap_or(0.0);
            return match self.nearest {
                Some(nearest) => Ok(EventQuery::Geo {
                    latitude,
                    longitude,
                    radius_m: WHOLE_EARTH_M,
                    limit: nearest as usize,
                }),
                None if radius == 0.0 => Err(ErrorCode::GeoParametersMissing.into()),
                None if radius < 2.0 => Err(ErrorCode::GeoRadiusTooSmall.into()),
                None => Ok(EventQuery::Geo {
                    latitude,
                    longitude,
                    radius_m: radius,
                    limit: RADIUS_RESULT_CAP,
                }),
            };
        }

        let non_empty = |value: Option<String>| value.filter(|value| !value.trim().is_empty());
        if let Some(object) = non_empty(self.object) {
            return Ok(EventQuery::Object(object));
        }
        if let Some(location) = non_empty(self.location) {
            return Ok(EventQuery::Location(location));
        }
        Err(ApiError::Code(ErrorCode::EventSearchMissing))
    }
}

/// `{"events":[...], "events_count":N}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventList {
    pub events: Vec<Event>,
    pub events_count: usize,
}

impl From<Vec<Event>> for EventList {
    fn from(events: Vec<Event>) -> Self {
        Self {
            events_count: events.len(),
            events,
        }
    }
}

/// Newest first, ties broken by id
pub fn sort_newest_first(events: &mut [Event]) {
    events.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
}
