//! Rise and set of an object over the local terrain horizon.
//!
//! A day is sampled coarsely, visibility flips are bracketed between samples
//! and each bracket is bisected down to the time tolerance.

use chrono::{DateTime, FixedOffset, NaiveDate, TimeDelta, TimeZone, Utc};
use std::fmt;
use tracing::{debug, info};

use crate::celestial::{position, CelestialObject};
use crate::config::HorizonConfig;
use crate::elevation::ElevationSource;
use crate::error::HorizonError;
use crate::geodesy::GeoCoordinate;
use crate::intersector::{HorizonPoint, TerrainIntersector};
use crate::observer::Observer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Rise,
    Set,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Rise => write!(f, "rise"),
            EventKind::Set => write!(f, "set"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisibilitySample {
    pub time: DateTime<Utc>,
    pub azimuth: f64,
    pub elevation: f64,
    pub terrain_angle: Option<f64>, // None when the terrain was not consulted
    pub visible: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HorizonEvent {
    pub kind: EventKind,
    pub time: DateTime<Utc>,
    pub azimuth: f64,
    pub object_elevation: f64,
    pub terrain_angle: f64,
    pub intersection: Option<GeoCoordinate>,
    pub distance: Option<f64>, // meters from the observer to `intersection`
}

#[derive(Debug, Clone, PartialEq)]
pub struct HorizonReport {
    pub events: Vec<HorizonEvent>,
    pub is_always_visible: bool,
    pub never_visible: bool,
    pub samples: usize,
}

pub struct HorizonEventDetector<E> {
    intersector: TerrainIntersector<E>,
    config: HorizonConfig,
}

impl<E: ElevationSource> HorizonEventDetector<E> {
    pub fn new(intersector: TerrainIntersector<E>, config: HorizonConfig) -> Self {
        Self {
            intersector,
            config,
        }
    }

    pub fn intersector(&self) -> &TerrainIntersector<E> {
        &self.intersector
    }

    /// Rise and set events of `object` for the local day `date`.
    ///
    /// The day starts at local midnight for a UTC offset of
    /// `utc_offset_secs` seconds and lasts 24 hours.
    pub async fn calculate_horizon_events(
        &self,
        observer: &Observer,
        date: NaiveDate,
        utc_offset_secs: i32,
        object: CelestialObject,
    ) -> Result<HorizonReport, HorizonError> {
        self.calculate_horizon_events_with_progress(observer, date, utc_offset_secs, object, |_| {})
            .await
    }

    /// Same as [`Self::calculate_horizon_events`], reporting the sampled
    /// fraction of the day in [0, 1] as it goes.
    pub async fn calculate_horizon_events_with_progress<P>(
        &self,
        observer: &Observer,
        date: NaiveDate,
        utc_offset_secs: i32,
        object: CelestialObject,
        mut progress: P,
    ) -> Result<HorizonReport, HorizonError>
    where
        P: FnMut(f64),
    {
        let start = day_start(date, utc_offset_secs)?;
        let end = start + TimeDelta::days(1);
        let interval = TimeDelta::seconds(self.config.sample_interval_secs.max(1));

        let total = (end - start).num_seconds() / interval.num_seconds() + 1;
        let mut samples = Vec::with_capacity(total as usize);
        let mut current_time = start;

        while current_time <= end {
            samples.push(self.sample(observer, object, current_time).await);
            progress(samples.len() as f64 / total as f64);
            current_time += interval;
        }

        let mut events = Vec::new();
        for window in samples.windows(2) {
            let (before, after) = (&window[0], &window[1]);
            if before.visible == after.visible {
                continue;
            }

            let kind = if after.visible {
                EventKind::Rise
            } else {
                EventKind::Set
            };
            let time = self
                .refine(observer, object, before.time, after.time, before.visible)
                .await;
            let event = self.assemble(observer, object, kind, time).await;
            debug!(kind = %event.kind, time = %event.time, terrain = event.terrain_angle, "Horizon event");
            events.push(event);
        }

        let is_always_visible = events.is_empty() && samples.iter().all(|s| s.visible);
        let never_visible = events.is_empty() && !samples.iter().any(|s| s.visible);

        info!(
            observer = %observer.name,
            ?object,
            %date,
            events = events.len(),
            samples = samples.len(),
            "Calculated horizon events"
        );

        Ok(HorizonReport {
            events,
            is_always_visible,
            never_visible,
            samples: samples.len(),
        })
    }

    /// Visibility of `object` at one instant.
    pub async fn sample(
        &self,
        observer: &Observer,
        object: CelestialObject,
        time: DateTime<Utc>,
    ) -> VisibilitySample {
        let pos = position(object, time, observer.coordinate);

        // Far from the horizon the terrain cannot change the answer
        if pos.elevation < self.config.band_low || pos.elevation > self.config.band_high {
            return VisibilitySample {
                time,
                azimuth: pos.azimuth,
                elevation: pos.elevation,
                terrain_angle: None,
                visible: pos.elevation > 0.0,
            };
        }

        let horizon = self.horizon(observer, pos.azimuth).await;
        VisibilitySample {
            time,
            azimuth: pos.azimuth,
            elevation: pos.elevation,
            terrain_angle: Some(horizon.angle),
            visible: pos.elevation > horizon.angle,
        }
    }

    // Returns the first instant in the new state.
    async fn refine(
        &self,
        observer: &Observer,
        object: CelestialObject,
        mut lo: DateTime<Utc>,
        mut hi: DateTime<Utc>,
        before: bool,
    ) -> DateTime<Utc> {
        let tolerance = TimeDelta::seconds(self.config.time_tolerance_secs.max(1));

        while hi - lo > tolerance {
            let mid = lo + (hi - lo) / 2;
            if self.sample(observer, object, mid).await.visible == before {
                lo = mid;
            } else {
                hi = mid;
            }
        }

        hi
    }

    async fn assemble(
        &self,
        observer: &Observer,
        object: CelestialObject,
        kind: EventKind,
        time: DateTime<Utc>,
    ) -> HorizonEvent {
        let pos = position(object, time, observer.coordinate);
        let horizon = self.horizon(observer, pos.azimuth).await;

        HorizonEvent {
            kind,
            time,
            azimuth: pos.azimuth,
            object_elevation: pos.elevation,
            terrain_angle: horizon.angle,
            intersection: horizon.coordinate,
            distance: horizon.distance,
        }
    }

    async fn horizon(&self, observer: &Observer, azimuth: f64) -> HorizonPoint {
        self.intersector
            .horizon_angle(observer, azimuth, self.config.search_radius)
            .await
    }
}

fn day_start(date: NaiveDate, utc_offset_secs: i32) -> Result<DateTime<Utc>, HorizonError> {
    let offset = FixedOffset::east_opt(utc_offset_secs)
        .ok_or_else(|| HorizonError::InvalidDate(format!("UTC offset {}s", utc_offset_secs)))?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| HorizonError::InvalidDate(date.to_string()))?;

    offset
        .from_local_datetime(&midnight)
        .single()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| HorizonError::InvalidDate(format!("{} at {}", date, offset)))
}
