use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tour_track_lib::LayerConfig;

#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
/// Tour Track - Feeds GPS tours through the background track geometry pipeline and logs what
/// each simulated frame receives
pub struct Settings {
    /// GPX files to load; every track segment becomes one tour
    #[clap(short, long, value_name = "FILE")]
    pub gpx_files: Vec<PathBuf>,

    /// Number of synthetic points to generate when no GPX file is given
    #[clap(long, default_value = "5000")]
    pub demo_points: usize,

    /// Start latitude of the camera (defaults to the first track point)
    #[clap(long, allow_hyphen_values = true)]
    pub lat: Option<f64>,

    /// Start longitude of the camera (defaults to the first track point)
    #[clap(long, allow_hyphen_values = true)]
    pub lon: Option<f64>,

    /// Start zoom level (fractional values allowed)
    #[clap(short, long, default_value = "12.0")]
    pub zoom: f64,

    /// Number of frames to simulate
    #[clap(short, long, default_value = "120")]
    pub frames: usize,

    /// Horizontal camera pan per frame in pixels
    #[clap(long, default_value = "24.0", allow_hyphen_values = true)]
    pub pan_step: f64,

    /// Time between two simulated frames in milliseconds
    #[clap(long, default_value = "16")]
    pub frame_interval_ms: u64,

    /// Request a camera jump (zoom in or out by one level) every N frames, 0 disables
    #[clap(long, default_value = "0")]
    pub camera_jump_every: usize,

    /// Tile size in pixels
    #[clap(long, default_value = "256")]
    pub tile_size: u32,

    /// Decimation threshold in pixels
    #[clap(long, default_value = "3.0")]
    pub min_distance: f64,

    /// Minimum time between two worker passes in milliseconds
    #[clap(long, default_value = "50")]
    pub submit_interval_ms: u64,

    /// Minimum spacing of direction arrows in pixels; omit to disable arrows
    #[clap(long)]
    pub arrows: Option<f64>,
}

impl Settings {
    pub fn layer_config(&self) -> LayerConfig {
        LayerConfig {
            tile_size: self.tile_size,
            min_pixel_distance: self.min_distance,
            min_submit_interval: Duration::from_millis(self.submit_interval_ms),
            direction_arrows: self.arrows,
            ..LayerConfig::default()
        }
    }

    #[inline]
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::try_parse_from(["tour-track"]).unwrap();
        assert!(settings.gpx_files.is_empty());
        assert_eq!(settings.frames, 120);
        assert_eq!(settings.layer_config(), LayerConfig::default());
    }

    #[test]
    fn test_layer_config_from_flags() {
        let settings = Settings::try_parse_from([
            "tour-track",
            "--gpx-files",
            "a.gpx",
            "-g",
            "b.gpx",
            "--lon",
            "-122.5",
            "--arrows",
            "40",
            "--submit-interval-ms",
            "100",
        ])
        .unwrap();
        assert_eq!(settings.gpx_files.len(), 2);
        assert_eq!(settings.lon, Some(-122.5));

        let config = settings.layer_config();
        assert_eq!(config.direction_arrows, Some(40.0));
        assert_eq!(config.min_submit_interval, Duration::from_millis(100));
        config.validate().unwrap();
    }
}
