use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sightline::celestial::{position, CelestialObject};
use sightline::config::Config;
use sightline::elevation::ElevationService;
use sightline::geodesy::{az_alt_to_enu, GeoCoordinate};
use sightline::horizon::HorizonEventDetector;
use sightline::intersector::TerrainIntersector;
use sightline::observer::Observer;
use sightline::tile_cache::TileCache;

#[derive(Parser)]
#[command(name = "sightline")]
#[command(about = "Line up landmarks with the Sun and Moon over real terrain", long_about = None)]
struct Cli {
    /// TOML configuration file (defaults apply when omitted)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ground elevation at one or more "lat,lon" points
    Elevation {
        #[arg(required = true, allow_hyphen_values = true, value_parser = parse_point)]
        points: Vec<GeoCoordinate>,
    },
    /// Azimuth and elevation of the Sun or Moon
    Position {
        #[command(flatten)]
        location: Location,
        #[command(flatten)]
        when: When,
    },
    /// Where the line from the object through the POI meets the ground
    Intersect {
        #[command(flatten)]
        location: Location,
        #[command(flatten)]
        when: When,
        /// Search distance in meters
        #[arg(long, default_value = "50000")]
        max_distance: f64,
    },
    /// Where to stand to see the object behind the POI
    Photographer {
        #[command(flatten)]
        location: Location,
        #[command(flatten)]
        when: When,
    },
    /// Rise and set over the terrain horizon for one local day
    Horizon {
        #[command(flatten)]
        location: Location,
        #[arg(long, value_enum, default_value = "sun")]
        object: CelestialObject,
        /// Local date, YYYY-MM-DD
        #[arg(long)]
        date: NaiveDate,
        /// Hours east of UTC for the local day
        #[arg(long, default_value = "0", allow_negative_numbers = true)]
        utc_offset: f64,
        /// Eye height above looked-up ground, meters
        #[arg(long, default_value = "1.7")]
        eye_height: f64,
    },
}

#[derive(Args)]
struct Location {
    #[arg(long, allow_negative_numbers = true)]
    lat: f64,
    #[arg(long, allow_negative_numbers = true)]
    lon: f64,
    /// Meters above sea level; looked up from terrain when omitted
    #[arg(long, allow_negative_numbers = true)]
    elevation: Option<f64>,
}

#[derive(Args)]
struct When {
    #[arg(long, value_enum, default_value = "sun")]
    object: CelestialObject,
    /// RFC 3339 instant, now when omitted
    #[arg(long)]
    time: Option<DateTime<Utc>>,
}

impl When {
    fn instant(&self) -> DateTime<Utc> {
        self.time.unwrap_or_else(Utc::now)
    }
}

fn parse_point(s: &str) -> Result<GeoCoordinate, String> {
    let (lat, lon) = s
        .split_once(',')
        .ok_or_else(|| format!("expected lat,lon but got '{}'", s))?;
    let lat: f64 = lat.trim().parse().map_err(|e| format!("latitude: {}", e))?;
    let lon: f64 = lon.trim().parse().map_err(|e| format!("longitude: {}", e))?;
    if !(-90.0..=90.0).contains(&lat) {
        return Err(format!("latitude {} out of range", lat));
    }
    Ok(GeoCoordinate::new(lat, lon))
}

fn init_logging(verbose: bool) {
    let default = if verbose { "sightline=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::default(),
    };
    info!(scheme = ?config.source.tile_scheme(), "Starting");

    let cache = TileCache::from_config(&config);
    let service = ElevationService::new(cache.clone());

    match cli.command {
        Command::Elevation { points } => {
            let elevations = service.elevations(&points).await;
            for (point, elevation) in points.iter().zip(elevations) {
                match elevation {
                    Some(meters) => println!("{}  {:.1} m", point, meters),
                    None => println!("{}  unavailable", point),
                }
            }
        }

        Command::Position { location, when } => {
            let coordinate = GeoCoordinate::new(location.lat, location.lon);
            let pos = position(when.object, when.instant(), coordinate);
            println!("{:?} at {}", when.object, pos.time);
            println!("  Azimuth:   {:.2}°", pos.azimuth);
            println!("  Elevation: {:.2}°", pos.elevation);
        }

        Command::Intersect {
            location,
            when,
            max_distance,
        } => {
            let poi = resolve(&location, 0.0, &service).await;
            let object = position(when.object, when.instant(), poi.coordinate);
            let intersector = TerrainIntersector::new(service.clone(), config.intersector.clone());

            // From the object, through the POI, onward to the ground
            let direction = -az_alt_to_enu(object.azimuth, object.elevation);
            println!(
                "{:?} az {:.2}° el {:.2}°, POI {} at {:.0} m",
                when.object, object.azimuth, object.elevation, poi.coordinate, poi.elevation
            );

            match intersector
                .cast_ray(poi.coordinate, poi.elevation, direction, max_distance)
                .await
            {
                Some(hit) => {
                    println!("  Ground hit: {}", hit.coordinate);
                    println!("  Distance:   {:.0} m", hit.horizontal_distance);
                    println!("  Terrain:    {:.0} m", hit.terrain_elevation);
                }
                None => println!("  No terrain intersection within {:.0} m", max_distance),
            }
        }

        Command::Photographer { location, when } => {
            let poi = resolve(&location, 0.0, &service).await;
            let object = position(when.object, when.instant(), poi.coordinate);
            let intersector = TerrainIntersector::new(service.clone(), config.intersector.clone());

            let spot = intersector
                .photographer_position(poi.coordinate, poi.elevation, &object)
                .await;

            println!("Stand at {}", spot.coordinate);
            println!("  Distance from POI: {:.0} m", spot.distance);
            if let Some(ground) = spot.ground_elevation {
                println!("  Ground elevation:  {:.0} m", ground);
            }
            if !spot.clear_line_of_sight {
                println!("  No clear line of sight found, projected position");
            }
        }

        Command::Horizon {
            location,
            object,
            date,
            utc_offset,
            eye_height,
        } => {
            let observer = resolve(&location, eye_height, &service).await;
            let offset_secs = (utc_offset * 3600.0).round() as i32;
            let offset =
                FixedOffset::east_opt(offset_secs).context("UTC offset must be within ±24h")?;

            let intersector = TerrainIntersector::new(service.clone(), config.intersector.clone());
            let detector = HorizonEventDetector::new(intersector, config.horizon.clone());
            let report = detector
                .calculate_horizon_events(&observer, date, offset_secs, object)
                .await?;

            println!(
                "{:?} on {} from {} ({:.0} m)",
                object, date, observer.coordinate, observer.elevation
            );
            if report.is_always_visible {
                println!("  Above the horizon all day");
            } else if report.never_visible {
                println!("  Never clears the horizon");
            }
            for event in &report.events {
                print!(
                    "  {:<4} {}  az {:>6.2}°  terrain {:>5.2}°",
                    event.kind.to_string(),
                    event.time.with_timezone(&offset).format("%H:%M:%S"),
                    event.azimuth,
                    event.terrain_angle
                );
                match (event.intersection, event.distance) {
                    (Some(ridge), Some(d)) => println!("  ridge {} ({:.1} km)", ridge, d / 1000.0),
                    _ => println!(),
                }
            }
        }
    }

    cache.log_stats();
    Ok(())
}

async fn resolve(location: &Location, eye_height: f64, service: &ElevationService) -> Observer {
    let coordinate = GeoCoordinate::new(location.lat, location.lon);
    let observer = Observer::resolve(
        "poi".to_string(),
        coordinate,
        location.elevation,
        eye_height,
        service,
    )
    .await;

    if location.elevation.is_none() {
        info!(elevation = observer.elevation, "Looked up observer elevation");
    }
    observer
}
