mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = ["./livesim.toml", "./config.toml"];

    for path_str in default_paths {
        let path = Path::new(path_str);
        if path.exists() {
            return load_config(path);
        }
    }

    Ok(Config::default())
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    let content = &config.content;
    if content.segment_duration_s == 0 {
        anyhow::bail!("Segment duration cannot be 0");
    }
    if content.nr_segments_in_loop == 0 {
        anyhow::bail!("Loop must contain at least one segment");
    }
    if !content.base_path.exists() {
        tracing::warn!("Content path does not exist: {:?}", content.base_path);
    }

    if config.media.is_empty() {
        anyhow::bail!("No media configured");
    }
    for media in &config.media {
        if media.timescale == 0 {
            anyhow::bail!("Timescale of {:?} media cannot be 0", media.kind);
        }
        if media.representations.is_empty() {
            anyhow::bail!("{:?} media has no representations", media.kind);
        }
    }

    let live = &config.live;
    if live.splices_per_minute > 0 && 60 % live.splices_per_minute != 0 {
        anyhow::bail!(
            "Splices per minute must divide 60, got {}",
            live.splices_per_minute
        );
    }
    if live.availability_time_offset.is_nan() || live.availability_time_offset < 0.0 {
        anyhow::bail!(
            "Availability time offset must be non-negative, got {}",
            live.availability_time_offset
        );
    }
    if let Some(stop) = live.stop_number {
        if stop <= live.start_number {
            anyhow::bail!(
                "Stop number {} must be after start number {}",
                stop,
                live.start_number
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml: &str) -> Config {
        toml::from_str(toml).unwrap()
    }

    const MINIMAL: &str = r#"
        [[media]]
        kind = "video"
        timescale = 90000
        representations = ["V300"]
    "#;

    #[test]
    fn test_defaults() {
        let config = parse(MINIMAL);
        assert_eq!(config.content.nr_segments_in_loop, 350);
        assert_eq!(config.content.segment_duration_s, 6);
        assert_eq!(config.time_shift_buffer_depth_s(), 300);
        assert_eq!(config.live.availability_start_time.timestamp(), 0);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_infinite_availability_time_offset() {
        let config = parse(&format!("{MINIMAL}\n[live]\navailability_time_offset = inf\n"));
        assert!(config.live.availability_time_offset.is_infinite());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_rejects_bad_splice_density() {
        let config = parse(&format!("{MINIMAL}\n[live]\nsplices_per_minute = 7\n"));
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_rejects_zero_timescale_and_empty_media() {
        let config = parse(
            r#"
            [[media]]
            kind = "audio"
            timescale = 0
            representations = ["A48"]
        "#,
        );
        assert!(validate_config(&config).is_err());
        assert!(validate_config(&Config::default()).is_err());
    }

    #[test]
    fn test_media_lookup() {
        let config = parse(MINIMAL);
        assert_eq!(config.media_for("V300").map(|m| m.timescale), Some(90000));
        assert!(config.media_for("A48").is_none());
    }
}
