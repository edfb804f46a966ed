//! Loading tours from GPX files, or generating a synthetic one

use anyhow::{Context, bail};
use std::path::{Path, PathBuf};
use tour_track_lib::{GeoPoint, TourSet};

fn read_gpx(path: &Path) -> anyhow::Result<gpx::Gpx> {
    let file =
        std::fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let reader = std::io::BufReader::new(file);
    gpx::read(reader).with_context(|| format!("parsing GPX {}", path.display()))
}

/// Concatenate every track segment of every file into one tour set
pub async fn load_tours(paths: Vec<PathBuf>) -> anyhow::Result<TourSet> {
    tokio::task::spawn_blocking(move || {
        let mut tours = TourSet::new();
        for path in &paths {
            let gpx = read_gpx(path)?;
            let before = tours.tour_count();
            tours.push_gpx(&gpx);
            tracing::info!(
                file = %path.display(),
                tours = tours.tour_count() - before,
                "Loaded GPX file"
            );
        }
        if tours.is_empty() {
            bail!("no usable track points in {} file(s)", paths.len());
        }
        Ok(tours)
    })
    .await
    .context("GPX loading task failed")?
}

/// Two wiggly tours next to each other around (`lat`, `lon`)
pub fn demo_tours(lat: f64, lon: f64, num_points: usize) -> anyhow::Result<TourSet> {
    let per_tour = (num_points / 2).max(2);
    let mut tours = TourSet::new();
    for tour in 0..2 {
        let offset = tour as f64 * 0.02;
        let points = (0..per_tour)
            .map(|i| {
                let t = i as f64 / per_tour as f64;
                let lat = (lat + offset + t * 0.05 + (t * 50.0).sin() * 0.001).clamp(-85.0, 85.0);
                let lon = wrap_longitude(lon + t * 0.1 + (t * 30.0).cos() * 0.001);
                GeoPoint::from_degrees(lat, lon)
            })
            .collect::<Result<Vec<_>, _>>()?;
        tours.push_tour(points);
    }
    Ok(tours)
}

fn wrap_longitude(lon: f64) -> f64 {
    (lon + 180.0).rem_euclid(360.0) - 180.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_tours() {
        let tours = demo_tours(47.0, 8.0, 1000).unwrap();
        assert_eq!(tours.len(), 1000);
        assert_eq!(tours.tour_starts(), &[0, 500]);
    }

    #[test]
    fn test_demo_tours_wrap_at_dateline() {
        let tours = demo_tours(0.0, 179.98, 200).unwrap();
        assert!(tours.points().iter().any(|p| p.longitude() < 0.0));
        assert!(tours.points().iter().any(|p| p.longitude() > 0.0));
    }

    #[tokio::test]
    async fn test_missing_file_is_reported() {
        let result = load_tours(vec![PathBuf::from("/nonexistent/track.gpx")]).await;
        let message = format!("{:#}", result.unwrap_err());
        assert!(message.contains("/nonexistent/track.gpx"));
    }
}
